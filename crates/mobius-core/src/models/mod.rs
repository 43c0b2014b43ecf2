//! Data models exchanged with the Mobius backend.
//!
//! - `User`: the authenticated principal, owned by the backend
//! - `Session`, `StoredTokens`: an authenticated session and its persisted token pair
//! - `Credentials`, `Registration`: transient request bodies for the auth endpoints
//! - `AuthResponse`: wire shape returned by login, register and refresh

pub mod session;
pub mod user;

pub use session::{AuthResponse, Credentials, Registration, Session, StoredTokens};
pub use user::User;
