//! End-to-end tests of the reqwest transport against a mock HTTP server

use std::sync::Arc;
use std::time::Duration;

use mobius_core::{
    ApiClient, ClientConfig, ErrorCode, MemoryTokenStore, StoredTokens, TokenStore,
};
use mockito::{Matcher, Server};
use serde_json::{json, Value};

fn user() -> Value {
    json!({
        "id": "u-1",
        "email": "t@example.com",
        "name": "Test User",
        "role": "user",
        "createdAt": "2024-05-01T12:00:00Z",
        "updatedAt": "2024-05-01T12:00:00Z"
    })
}

fn client_for(url: String, tokens: Arc<MemoryTokenStore>) -> ApiClient {
    ApiClient::builder(ClientConfig::new(url, Duration::from_secs(5)))
        .token_store(tokens)
        .build()
        .expect("Failed to build client")
}

#[tokio::test]
async fn login_over_http() {
    //* Given
    let mut server = Server::new_async().await;
    let login = server
        .mock("POST", "/auth/login")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({"email": "t@example.com", "password": "pw"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"user": user(), "token": "tok1", "refreshToken": "ref1"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let tokens = Arc::new(MemoryTokenStore::new());
    let client = client_for(server.url(), tokens.clone());

    //* When
    let session = client
        .session()
        .login("t@example.com", "pw")
        .await
        .expect("login failed");

    //* Then
    login.assert_async().await;
    assert_eq!(session.user.email, "t@example.com");
    assert_eq!(tokens.access_token().as_deref(), Some("tok1"));
    assert_eq!(tokens.refresh_token().as_deref(), Some("ref1"));
}

#[tokio::test]
async fn refresh_and_retry_over_http() {
    //* Given
    let mut server = Server::new_async().await;

    let stale = server
        .mock("GET", "/contexts")
        .match_header("authorization", "Bearer tok1")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail": "Token expired"}"#)
        .expect(1)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/auth/refresh")
        .match_body(Matcher::Json(json!({"refreshToken": "ref1"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"user": user(), "token": "tok2"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let fresh = server
        .mock("GET", "/contexts")
        .match_header("authorization", "Bearer tok2")
        .match_header("x-correlation-id", Matcher::Regex("^[0-9a-f]{32}$".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items": ["a"]}"#)
        .expect(1)
        .create_async()
        .await;

    let tokens = Arc::new(MemoryTokenStore::with_tokens(StoredTokens::new("tok1", "ref1")));
    let client = client_for(server.url(), tokens.clone());

    //* When
    let body: Value = client.get("/contexts").await.expect("request failed");

    //* Then
    stale.assert_async().await;
    refresh.assert_async().await;
    fresh.assert_async().await;
    assert_eq!(body, json!({"items": ["a"]}));
    assert_eq!(tokens.access_token().as_deref(), Some("tok2"));
    assert_eq!(tokens.refresh_token().as_deref(), Some("ref1"));
}

#[tokio::test]
async fn not_found_over_http() {
    //* Given
    let mut server = Server::new_async().await;
    let missing = server
        .mock("GET", "/contexts/42")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail": "X not found"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(server.url(), Arc::new(MemoryTokenStore::new()));

    //* When
    let err = client.get::<Value>("/contexts/42").await.unwrap_err();

    //* Then
    missing.assert_async().await;
    assert_eq!(err.code(), Some(ErrorCode::ClientError));
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "X not found");
}

#[tokio::test]
async fn query_parameters_over_http() {
    //* Given
    let mut server = Server::new_async().await;
    let search = server
        .mock("GET", "/contexts")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("q".into(), "vector search".into()),
            Matcher::UrlEncoded("limit".into(), "5".into()),
        ]))
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(server.url(), Arc::new(MemoryTokenStore::new()));

    //* When
    let request = mobius_core::ApiRequest::get("/contexts")
        .query("q", "vector search")
        .query("limit", "5");
    let response = client.request(request).await.expect("request failed");

    //* Then
    search.assert_async().await;
    assert_eq!(response.json::<Vec<Value>>().unwrap(), Vec::<Value>::new());
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    // Nothing listens on the discard port
    let client = client_for("http://127.0.0.1:9".to_string(), Arc::new(MemoryTokenStore::new()));

    let err = client.get::<Value>("/contexts").await.unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::NetworkError));
}
