use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use mobius_core::{ApiClient, ApiError};
use serde_json::Value;
use tracing::info;

use crate::config::CliConfig;

pub const USAGE: &str = "\
Usage: mobius <command>

Commands:
  login [email]            Sign in and store the session tokens
  register <email> <name>  Create an account and sign in
  logout                   Sign out and clear stored tokens
  refresh                  Exchange the refresh token for a new access token
  status                   Show session and configuration state
  get <path>               Authenticated GET, printing the JSON response
  help                     Show this message

Environment:
  MOBIUS_API_URL               API base URL (default http://localhost:8000/api/v1)
  MOBIUS_API_TIMEOUT_DEFAULT   Request timeout in milliseconds (default 30000)
  MOBIUS_TOKEN_STORE           keyring (default), file or memory
  RUST_LOG                     Log filter (default warn)";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    Register { email: String, name: String },
    Logout,
    Refresh,
    Status,
    Get { path: String },
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["login"] => Ok(Command::Login { email: None }),
            ["login", email] => Ok(Command::Login {
                email: Some(email.to_string()),
            }),
            ["register", email, name @ ..] if !name.is_empty() => Ok(Command::Register {
                email: email.to_string(),
                name: name.join(" "),
            }),
            ["logout"] => Ok(Command::Logout),
            ["refresh"] => Ok(Command::Refresh),
            ["status"] => Ok(Command::Status),
            ["get", path] => Ok(Command::Get {
                path: path.to_string(),
            }),
            [] | ["help"] | ["--help"] | ["-h"] => Ok(Command::Help),
            _ => Err(USAGE.to_string()),
        }
    }
}

pub async fn run(command: Command, client: &ApiClient, config: &mut CliConfig) -> Result<()> {
    match command {
        Command::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = rpassword::prompt_password(format!("Password for {email}: "))
                .context("Failed to read password")?;

            let session = client
                .session()
                .login(&email, &password)
                .await
                .map_err(describe)?;
            println!("Logged in as {}", session.user.display_name());

            config.last_email = Some(email);
            config.save()?;
        }
        Command::Register { email, name } => {
            let password = rpassword::prompt_password("Choose a password: ")
                .context("Failed to read password")?;
            let session = client
                .session()
                .register(&email, &password, &name)
                .await
                .map_err(describe)?;
            println!("Registered and logged in as {}", session.user.display_name());

            config.last_email = Some(email);
            config.save()?;
        }
        Command::Logout => {
            client.session().logout().await;
            println!("Logged out");
        }
        Command::Refresh => {
            let session = client
                .session()
                .refresh_token(None)
                .await
                .context("Token refresh failed")?;
            println!("Session refreshed for {}", session.user.display_name());
        }
        Command::Status => {
            let state = client.session().state();
            println!("Session:      {state:?}");
            println!("Tokens saved: {}", client.token_store().has_tokens());
            if let Some(email) = &config.last_email {
                println!("Last login:   {email}");
            }
        }
        Command::Get { path } => {
            let body: Value = client.get(&path).await.map_err(describe)?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Help => println!("{USAGE}"),
    }
    Ok(())
}

/// Turn a client error into a user-facing message carrying its code
fn describe(error: ApiError) -> anyhow::Error {
    info!(error = ?error, "Command failed");
    match error.classified() {
        Some(classified) => match classified.status() {
            Some(status) => anyhow::anyhow!("{} [{} {}]", classified.message(), classified.code(), status),
            None => anyhow::anyhow!("{} [{}]", classified.message(), classified.code()),
        },
        None => anyhow::Error::new(error),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("No value entered");
    }
    Ok(value)
}
