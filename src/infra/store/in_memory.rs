// In-memory implementation of CredentialStore.
//
// Used by the test suites and handy for embedding the manager in a process
// that does not want anything touching disk. Same contract as the file
// store, minus the backup semantics (there is no file to back up).

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::auth::{AuthError, CredentialRecord, CredentialStore};

/// DashMap-backed store: a concurrent map, safe to share across tasks
/// without wrapping the whole thing in a Mutex.
#[allow(dead_code)]
pub struct InMemoryCredentialStore {
    records: DashMap<String, CredentialRecord>,
}

#[allow(dead_code)]
impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self, id: &str) -> Result<Option<CredentialRecord>, AuthError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, id: &str, record: &CredentialRecord) -> Result<(), AuthError> {
        self.records.insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), AuthError> {
        self.records.remove(id);
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<String>, AuthError> {
        let mut ids: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record() -> CredentialRecord {
        CredentialRecord {
            access_token: "tok".to_string(),
            refresh_token: None,
            expiry: Utc::now() + Duration::minutes(5),
            scopes: vec![],
        }
    }

    #[tokio::test]
    async fn save_load_delete() {
        let store = InMemoryCredentialStore::new();
        assert!(store.load("x").await.unwrap().is_none());

        store.save("x", &record()).await.unwrap();
        assert!(store.load("x").await.unwrap().is_some());
        assert_eq!(store.list_ids().await.unwrap(), vec!["x"]);

        store.delete("x").await.unwrap();
        assert!(store.load("x").await.unwrap().is_none());
    }
}
