//! Account records: username to password hash

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use super::{JsonTable, StoreError};

const MAX_USERNAME_CHARS: usize = 20;
const MIN_USERNAME_CHARS: usize = 3;
const MIN_PASSWORD_CHARS: usize = 4;
/// Hex digits after `Guest_`; keeps the name within the display-name cap
const GUEST_SUFFIX_CHARS: usize = 8;

/// Stored account row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// SHA-256 of the password, hex encoded
    pub password_hash: String,
    #[serde(default)]
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub is_admin: bool,
    pub is_guest: bool,
    /// Registered by this login
    pub created: bool,
}

/// Account store backed by `accounts.json`
#[derive(Clone)]
pub struct AccountStore {
    table: JsonTable<AccountRecord>,
}

impl AccountStore {
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let table = JsonTable::open(data_dir.join("accounts.json")).await?;
        Ok(Self { table })
    }

    /// Log in, registering unknown usernames on first use. Guests get a
    /// generated name and nothing is stored.
    pub async fn authenticate(&self, username: &str, password: &str, is_guest: bool) -> Result<Account, StoreError> {
        if is_guest {
            return Ok(Account {
                username: guest_name(),
                is_admin: false,
                is_guest: true,
                created: false,
            });
        }

        let username = validate_username(username)?;
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(StoreError::InvalidPassword);
        }

        let hash = hash_password(password);
        let fresh = AccountRecord {
            password_hash: hash.clone(),
            is_admin: false,
            created_at: Utc::now(),
        };
        let (record, created) = self.table.get_or_insert(&username, fresh).await?;
        if record.password_hash != hash {
            return Err(StoreError::BadCredentials);
        }
        if created {
            info!(username = %username, "Account registered");
        }

        Ok(Account {
            username,
            is_admin: record.is_admin,
            is_guest: false,
            created,
        })
    }
}

/// Hex SHA-256 of a password
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn validate_username(raw: &str) -> Result<String, StoreError> {
    let name = raw.trim();
    let len = name.chars().count();
    let allowed = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) || !allowed {
        return Err(StoreError::InvalidUsername);
    }
    Ok(name.to_string())
}

fn guest_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("Guest_{}", &id[..GUEST_SUFFIX_CHARS])
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> AccountStore {
        let dir = std::env::temp_dir().join(format!("blockyard-accounts-{}", Uuid::new_v4()));
        AccountStore::open(&dir).await.unwrap()
    }

    #[test]
    fn password_hash_is_sha256_hex() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn first_login_registers_then_checks_password() {
        let accounts = store().await;
        let first = accounts.authenticate("steve", "hunter2", false).await.unwrap();
        assert!(first.created);
        assert_eq!(first.username, "steve");

        let again = accounts.authenticate("steve", "hunter2", false).await.unwrap();
        assert!(!again.created);

        let wrong = accounts.authenticate("steve", "nope1", false).await;
        assert!(matches!(wrong, Err(StoreError::BadCredentials)));
    }

    #[tokio::test]
    async fn guests_get_generated_names() {
        let accounts = store().await;
        let guest = accounts.authenticate("", "", true).await.unwrap();
        assert!(guest.is_guest);
        assert!(guest.username.starts_with("Guest_"));
        assert_eq!(guest.username.len(), "Guest_".len() + GUEST_SUFFIX_CHARS);

        let other = accounts.authenticate("", "", true).await.unwrap();
        assert_ne!(guest.username, other.username);
    }

    #[tokio::test]
    async fn rejects_bad_usernames_and_short_passwords() {
        let accounts = store().await;
        assert!(matches!(
            accounts.authenticate("a", "password", false).await,
            Err(StoreError::InvalidUsername)
        ));
        assert!(matches!(
            accounts.authenticate("bad name", "password", false).await,
            Err(StoreError::InvalidUsername)
        ));
        assert!(matches!(
            accounts.authenticate("alex", "abc", false).await,
            Err(StoreError::InvalidPassword)
        ));
    }
}
