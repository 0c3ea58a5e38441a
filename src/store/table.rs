//! JSON object file used as a key-value table

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::StoreError;

/// Key-value table kept in memory and written through to one JSON file
pub struct JsonTable<V> {
    path: PathBuf,
    rows: Arc<Mutex<HashMap<String, V>>>,
}

impl<V> Clone for JsonTable<V> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            rows: self.rows.clone(),
        }
    }
}

impl<V> JsonTable<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Open the table at `path`. A missing file is an empty table.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let rows = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => HashMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Store file missing, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), rows = rows.len(), "Store loaded");
        Ok(Self {
            path,
            rows: Arc::new(Mutex::new(rows)),
        })
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.rows.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    /// Insert or replace a row and rewrite the file
    pub async fn upsert(&self, key: &str, value: V) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let previous = rows.insert(key.to_string(), value);
        if let Err(e) = self.flush(&rows).await {
            match previous {
                Some(old) => rows.insert(key.to_string(), old),
                None => rows.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Insert only if the key is absent. Returns the stored row either way and
    /// whether it was newly inserted.
    pub async fn get_or_insert(&self, key: &str, value: V) -> Result<(V, bool), StoreError> {
        let mut rows = self.rows.lock().await;
        if let Some(existing) = rows.get(key) {
            return Ok((existing.clone(), false));
        }
        rows.insert(key.to_string(), value.clone());
        if let Err(e) = self.flush(&rows).await {
            // Memory must not hold a row the file never got
            rows.remove(key);
            return Err(e);
        }
        Ok((value, true))
    }

    async fn flush(&self, rows: &HashMap<String, V>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let text = serde_json::to_string_pretty(rows)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("blockyard-table-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[tokio::test]
    async fn missing_file_is_empty_and_writes_create_it() {
        let path = scratch("rows.json");
        let table: JsonTable<u32> = JsonTable::open(&path).await.unwrap();
        assert_eq!(table.len().await, 0);

        table.upsert("a", 1).await.unwrap();
        let reopened: JsonTable<u32> = JsonTable::open(&path).await.unwrap();
        assert_eq!(reopened.get("a").await, Some(1));
    }

    #[tokio::test]
    async fn get_or_insert_keeps_first_value() {
        let table: JsonTable<u32> = JsonTable::open(scratch("rows.json")).await.unwrap();
        assert_eq!(table.get_or_insert("k", 1).await.unwrap(), (1, true));
        assert_eq!(table.get_or_insert("k", 2).await.unwrap(), (1, false));
    }

    #[tokio::test]
    async fn failed_insert_leaves_no_row_behind() {
        let path = scratch("rows.json");
        let table: JsonTable<u32> = JsonTable::open(&path).await.unwrap();

        // A directory where the temp file goes makes the write fail
        let blocker = path.with_extension("json.tmp");
        tokio::fs::create_dir_all(&blocker).await.unwrap();
        assert!(matches!(table.get_or_insert("k", 1).await, Err(StoreError::Io(_))));
        assert_eq!(table.get("k").await, None);

        tokio::fs::remove_dir(&blocker).await.unwrap();
        assert_eq!(table.get_or_insert("k", 2).await.unwrap(), (2, true));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let path = scratch("rows.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "{not json").await.unwrap();
        let result: Result<JsonTable<u32>, _> = JsonTable::open(&path).await;
        assert!(matches!(result, Err(StoreError::Parse(_))));
    }
}
