//! Flat-file persistence for accounts and characters

pub mod accounts;
pub mod characters;
pub mod table;

pub use accounts::{Account, AccountStore};
pub use characters::{CharacterRecord, CharacterStore};
pub use table::JsonTable;

/// Errors from the flat-file stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("File access failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse store file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid username")]
    InvalidUsername,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Wrong username or password")]
    BadCredentials,
}
