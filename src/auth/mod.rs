//! Accounts, sessions and password reset
//!
//! Credentials live in `config.yaml` as bcrypt hashes; notification
//! preferences live in `usuarios.json`. Sessions are in-memory bearer ids.

pub mod accounts;
pub mod password;
pub mod reset;
pub mod session;

pub use accounts::{Accounts, ProfileUpdate, Registration, UserSummary};
pub use password::{PasswordHasher, DEFAULT_BCRYPT_COST};
pub use reset::{ResetFlow, RESET_TOKEN_TTL_MINUTES};
pub use session::{AuthContext, Role, SessionManager, SessionSnapshot, DEFAULT_SESSION_TTL};

use crate::alerts::NotifierError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User '{0}' not found")]
    UnknownUser(String),

    #[error("User '{0}' already exists")]
    UserExists(String),

    #[error("Only addresses ending in '{0}' may register")]
    EmailDomainNotAllowed(String),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("{0}")]
    InvalidPassword(String),

    #[error("Reset link is invalid, expired or already used")]
    InvalidToken,

    #[error("{0}")]
    Forbidden(String),

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),
}
