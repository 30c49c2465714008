//! In-process implementation of DocumentStore.
//!
//! Backs local runs and tests. Documents live in per-collection `Vec`s behind
//! an async `RwLock`, so query results come back in insertion order. Every
//! mutation is broadcast on an [`EventBus`] while the write lock is held,
//! which keeps change events in mutation order.

use super::models::{Document, FieldFilter, Fields};
use super::traits::{DocumentStore, LiveQuery};
use crate::error::{CrmError, Result};
use crate::events::{ChangeAction, ChangeEvent, EventBus, EventEmitter, FaultKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// ```
/// use crm_sync::store::{DocumentStore, FieldFilter, Fields, MemoryDocumentStore};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let store = MemoryDocumentStore::new();
/// let mut fields = Fields::new();
/// fields.insert("ownerId".into(), json!("u1"));
/// let id = store.add("contacts", fields).await.unwrap();
///
/// let mine = store
///     .query("contacts", &FieldFilter::eq("ownerId", "u1"))
///     .await
///     .unwrap();
/// assert_eq!(mine[0].id, id);
/// # });
/// ```
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    bus: EventBus,
    available: AtomicBool,
    denied: RwLock<HashSet<String>>,
}

impl MemoryDocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::with_event_capacity(crate::events::DEFAULT_CAPACITY)
    }

    /// Create a store whose change channel buffers `capacity` events per
    /// listener before the slowest listener starts lagging.
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            bus: EventBus::new(capacity),
            available: AtomicBool::new(true),
            denied: RwLock::new(HashSet::new()),
        }
    }

    /// Number of registered live queries.
    pub fn listener_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Simulate a lost connection: every call fails with `Unavailable` and
    /// every live query is terminated.
    pub fn disconnect(&self, message: &str) {
        self.available.store(false, Ordering::SeqCst);
        info!(message, "Memory store disconnected");
        self.bus.emit_fault(None, FaultKind::Unavailable, message);
    }

    pub fn reconnect(&self) {
        self.available.store(true, Ordering::SeqCst);
    }

    /// Simulate an access-rule change denying `collection`. Live queries on
    /// it are terminated with `PermissionDenied`.
    pub async fn revoke_access(&self, collection: &str, message: &str) {
        self.denied.write().await.insert(collection.to_string());
        self.bus
            .emit_fault(Some(collection), FaultKind::PermissionDenied, message);
    }

    pub async fn restore_access(&self, collection: &str) {
        self.denied.write().await.remove(collection);
    }

    async fn check_access(&self, collection: &str) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CrmError::Unavailable("memory store is disconnected".into()));
        }
        if self.denied.read().await.contains(collection) {
            return Err(CrmError::PermissionDenied(format!(
                "access to `{collection}` is denied"
            )));
        }
        Ok(())
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.check_access(collection).await?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        self.check_access(collection).await?;
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        let event = if let Some(existing) = docs.iter_mut().find(|d| d.id == id) {
            let before = std::mem::replace(&mut existing.fields, fields.clone());
            ChangeEvent::new(collection, ChangeAction::Updated, id)
                .with_before(before)
                .with_after(fields)
        } else {
            docs.push(Document::new(id, fields.clone()));
            ChangeEvent::new(collection, ChangeAction::Created, id).with_after(fields)
        };
        self.bus.emit_change(event);
        Ok(())
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String> {
        self.check_access(collection).await?;
        let id = Uuid::new_v4().simple().to_string();
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(Document::new(id.clone(), fields.clone()));
        self.bus.emit_change(
            ChangeEvent::new(collection, ChangeAction::Created, id.clone()).with_after(fields),
        );
        debug!(collection, id = %id, "Document added");
        Ok(id)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.check_access(collection).await?;
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(());
        };
        if let Some(pos) = docs.iter().position(|d| d.id == id) {
            let removed = docs.remove(pos);
            self.bus.emit_change(
                ChangeEvent::new(collection, ChangeAction::Deleted, id).with_before(removed.fields),
            );
        }
        Ok(())
    }

    async fn query(&self, collection: &str, filter: &FieldFilter) -> Result<Vec<Document>> {
        self.check_access(collection).await?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(&d.fields))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn listen(&self, collection: &str, filter: FieldFilter) -> LiveQuery {
        LiveQuery::new(collection, filter, self.bus.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(owner: &str, title: &str) -> Fields {
        let mut f = Fields::new();
        f.insert("ownerId".into(), json!(owner));
        f.insert("title".into(), json!(title));
        f
    }

    #[tokio::test]
    async fn test_add_assigns_unique_ids() {
        let store = MemoryDocumentStore::new();
        let a = store.add("notes", fields("u1", "a")).await.unwrap();
        let b = store.add("notes", fields("u1", "b")).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.get("notes", &a).await.unwrap().unwrap().fields["title"], "a");
    }

    #[tokio::test]
    async fn test_query_filters_and_keeps_insertion_order() {
        let store = MemoryDocumentStore::new();
        store.add("notes", fields("u1", "first")).await.unwrap();
        store.add("notes", fields("u2", "other")).await.unwrap();
        store.add("notes", fields("u1", "second")).await.unwrap();

        let docs = store
            .query("notes", &FieldFilter::eq("ownerId", "u1"))
            .await
            .unwrap();
        let titles: Vec<_> = docs.iter().map(|d| d.fields["title"].clone()).collect();
        assert_eq!(titles, vec![json!("first"), json!("second")]);
    }

    #[tokio::test]
    async fn test_set_overwrites_whole_document() {
        let store = MemoryDocumentStore::new();
        let mut first = fields("u1", "a");
        first.insert("extra".into(), json!(1));
        store.set("settings", "u1", first).await.unwrap();
        store.set("settings", "u1", fields("u1", "b")).await.unwrap();

        let doc = store.get("settings", "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields["title"], "b");
        assert!(doc.get("extra").is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryDocumentStore::new();
        let id = store.add("notes", fields("u1", "a")).await.unwrap();
        store.delete("notes", &id).await.unwrap();
        store.delete("notes", &id).await.unwrap();
        store.delete("missing-collection", "nope").await.unwrap();
        assert!(store.get("notes", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_and_revoke() {
        let store = MemoryDocumentStore::new();
        store.disconnect("network down");
        let err = store.get("notes", "x").await.unwrap_err();
        assert!(matches!(err, CrmError::Unavailable(_)));
        store.reconnect();

        store.revoke_access("notes", "rules").await;
        let err = store.add("notes", fields("u1", "a")).await.unwrap_err();
        assert!(matches!(err, CrmError::PermissionDenied(_)));
        store.restore_access("notes").await;
        assert!(store.add("notes", fields("u1", "a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_listen_registration_is_released_on_drop() {
        let store = MemoryDocumentStore::new();
        let live = store.listen("notes", FieldFilter::eq("ownerId", "u1"));
        assert_eq!(store.listener_count(), 1);
        drop(live);
        assert_eq!(store.listener_count(), 0);
    }
}
