//! Saved characters: cosmetics and last position per account

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{JsonTable, StoreError};
use crate::sim::math::{xyz, Vec3};
use crate::ws::protocol::Customization;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterRecord {
    #[serde(flatten)]
    pub customization: Customization,
    #[serde(with = "xyz")]
    pub position: Vec3,
    pub saved_at: DateTime<Utc>,
}

/// Character store backed by `characters.json`
#[derive(Clone)]
pub struct CharacterStore {
    table: JsonTable<CharacterRecord>,
}

impl CharacterStore {
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let table = JsonTable::open(data_dir.join("characters.json")).await?;
        Ok(Self { table })
    }

    pub async fn load(&self, username: &str) -> Option<CharacterRecord> {
        self.table.get(username).await
    }

    pub async fn save(&self, username: &str, record: CharacterRecord) -> Result<(), StoreError> {
        debug!(username = %username, "Saving character");
        self.table.upsert(username, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn saved_character_loads_back() {
        let dir = std::env::temp_dir().join(format!("blockyard-characters-{}", Uuid::new_v4()));
        let store = CharacterStore::open(&dir).await.unwrap();
        assert!(store.load("steve").await.is_none());

        let record = CharacterRecord {
            customization: Customization {
                name: "Steve".to_string(),
                color: "#ff0000".to_string(),
                hat: "cap".to_string(),
                cape: "none".to_string(),
            },
            position: Vec3::new(3.0, 1.0, -2.0),
            saved_at: Utc::now(),
        };
        store.save("steve", record.clone()).await.unwrap();

        let reopened = CharacterStore::open(&dir).await.unwrap();
        assert_eq!(reopened.load("steve").await, Some(record));
    }
}
