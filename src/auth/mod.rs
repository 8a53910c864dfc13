//! Authentication: credential storage, headers, and token refresh

pub mod manager;
pub mod types;

pub use manager::AuthManager;
pub use types::{Credential, CredentialKind, RefreshResponse};
