//! Server-record storage.
//!
//! The chat core only reads records; writes come from the HTTP surface.

use chrono::Utc;
use mcpchat_mcp::BoxFuture;
use mcpchat_types::{NewServerRecord, ServerRecord, ServerType};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid server record: {0}")]
    Invalid(String),

    #[error("A server named '{name}' already exists")]
    AlreadyExists { name: String },
}

/// Optional filters for [`ServerStore::list`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    /// Case-sensitive substring of the record name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub server_type: Option<ServerType>,
}

impl RecordFilter {
    fn matches(&self, record: &ServerRecord) -> bool {
        let name_ok = self
            .name
            .as_deref()
            .is_none_or(|needle| record.name().contains(needle));
        let type_ok = self
            .server_type
            .is_none_or(|t| record.server_type() == t);
        name_ok && type_ok
    }
}

/// Persistent registry of tool-server records.
pub trait ServerStore: Send + Sync {
    fn get(&self, id: u64) -> BoxFuture<'_, Result<Option<ServerRecord>, StoreError>>;

    fn get_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<ServerRecord>, StoreError>>;

    /// Records matching `filter`, ordered by id.
    fn list<'a>(
        &'a self,
        filter: &'a RecordFilter,
    ) -> BoxFuture<'a, Result<Vec<ServerRecord>, StoreError>>;

    fn create(&self, record: NewServerRecord) -> BoxFuture<'_, Result<ServerRecord, StoreError>>;

    /// Replace a record's fields. `None` if the id does not exist.
    fn update(
        &self,
        id: u64,
        record: NewServerRecord,
    ) -> BoxFuture<'_, Result<Option<ServerRecord>, StoreError>>;

    /// Remove a record. `false` if the id does not exist.
    fn delete(&self, id: u64) -> BoxFuture<'_, Result<bool, StoreError>>;
}

#[derive(Default)]
struct Records {
    next_id: u64,
    by_id: BTreeMap<u64, ServerRecord>,
}

impl Records {
    fn check_name(&self, fields: &NewServerRecord, except: Option<u64>) -> Result<(), StoreError> {
        if fields.name.trim().is_empty() {
            return Err(StoreError::Invalid("name must not be empty".into()));
        }
        let taken = self
            .by_id
            .values()
            .any(|r| r.name() == fields.name && Some(r.id) != except);
        if taken {
            return Err(StoreError::AlreadyExists {
                name: fields.name.clone(),
            });
        }
        Ok(())
    }
}

/// In-process store backed by an ordered map.
#[derive(Default)]
pub struct MemoryServerStore {
    records: RwLock<Records>,
}

impl MemoryServerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServerStore for MemoryServerStore {
    fn get(&self, id: u64) -> BoxFuture<'_, Result<Option<ServerRecord>, StoreError>> {
        Box::pin(async move { Ok(self.records.read().await.by_id.get(&id).cloned()) })
    }

    fn get_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<ServerRecord>, StoreError>> {
        Box::pin(async move {
            let records = self.records.read().await;
            Ok(records.by_id.values().find(|r| r.name() == name).cloned())
        })
    }

    fn list<'a>(
        &'a self,
        filter: &'a RecordFilter,
    ) -> BoxFuture<'a, Result<Vec<ServerRecord>, StoreError>> {
        Box::pin(async move {
            let records = self.records.read().await;
            Ok(records
                .by_id
                .values()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect())
        })
    }

    fn create(&self, fields: NewServerRecord) -> BoxFuture<'_, Result<ServerRecord, StoreError>> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            records.check_name(&fields, None)?;
            records.next_id += 1;
            let record = ServerRecord {
                id: records.next_id,
                fields,
                created_time: Utc::now(),
                updated_time: None,
            };
            records.by_id.insert(record.id, record.clone());
            tracing::info!("Registered MCP server '{}' as {}", record.name(), record.id);
            Ok(record)
        })
    }

    fn update(
        &self,
        id: u64,
        fields: NewServerRecord,
    ) -> BoxFuture<'_, Result<Option<ServerRecord>, StoreError>> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            if !records.by_id.contains_key(&id) {
                return Ok(None);
            }
            records.check_name(&fields, Some(id))?;
            let Some(record) = records.by_id.get_mut(&id) else {
                return Ok(None);
            };
            record.fields = fields;
            record.updated_time = Some(Utc::now());
            Ok(Some(record.clone()))
        })
    }

    fn delete(&self, id: u64) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let removed = self.records.write().await.by_id.remove(&id);
            if let Some(record) = &removed {
                tracing::info!("Removed MCP server '{}' ({id})", record.name());
            }
            Ok(removed.is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_increasing_ids() {
        let store = MemoryServerStore::new();
        let a = store.create(NewServerRecord::stdio("a", "cat")).await.unwrap();
        let b = store.create(NewServerRecord::stdio("b", "cat")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert!(a.updated_time.is_none());
        assert_eq!(store.get(2).await.unwrap().unwrap().name(), "b");
        assert!(store.get(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_and_empty_names_are_rejected() {
        let store = MemoryServerStore::new();
        store.create(NewServerRecord::stdio("fs", "cat")).await.unwrap();

        let err = store
            .create(NewServerRecord::stdio("fs", "cat"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let err = store
            .create(NewServerRecord::stdio("  ", "cat"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn update_keeps_id_and_allows_same_name() {
        let store = MemoryServerStore::new();
        let rec = store.create(NewServerRecord::stdio("fs", "cat")).await.unwrap();
        store.create(NewServerRecord::stdio("other", "cat")).await.unwrap();

        let mut fields = rec.fields.clone();
        fields.description = Some("files".into());
        let updated = store.update(rec.id, fields).await.unwrap().unwrap();
        assert_eq!(updated.id, rec.id);
        assert_eq!(updated.created_time, rec.created_time);
        assert!(updated.updated_time.is_some());

        let clash = store
            .update(rec.id, NewServerRecord::stdio("other", "cat"))
            .await
            .unwrap_err();
        assert!(matches!(clash, StoreError::AlreadyExists { .. }));

        assert!(
            store
                .update(99, NewServerRecord::stdio("x", "cat"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn list_filters_by_name_and_type() {
        let store = MemoryServerStore::new();
        store.create(NewServerRecord::stdio("local-fs", "cat")).await.unwrap();
        store
            .create(NewServerRecord::http("remote-fs", ServerType::Sse, "http://h/sse"))
            .await
            .unwrap();
        store
            .create(NewServerRecord::http("search", ServerType::StreamableHttp, "http://h/mcp"))
            .await
            .unwrap();

        let all = store.list(&RecordFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let fs = RecordFilter {
            name: Some("fs".into()),
            server_type: None,
        };
        assert_eq!(store.list(&fs).await.unwrap().len(), 2);

        let remote_fs = RecordFilter {
            name: Some("fs".into()),
            server_type: Some(ServerType::Sse),
        };
        let found = store.list(&remote_fs).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "remote-fs");

        // case-sensitive
        let upper = RecordFilter {
            name: Some("FS".into()),
            server_type: None,
        };
        assert!(store.list(&upper).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_and_lookup_by_name() {
        let store = MemoryServerStore::new();
        let rec = store.create(NewServerRecord::stdio("fs", "cat")).await.unwrap();
        assert_eq!(store.get_by_name("fs").await.unwrap().unwrap().id, rec.id);
        assert!(store.delete(rec.id).await.unwrap());
        assert!(!store.delete(rec.id).await.unwrap());
        assert!(store.get_by_name("fs").await.unwrap().is_none());
    }
}
