//! Trait abstraction for the remote document store

use super::models::{Document, FieldFilter, Fields};
use crate::error::{CrmError, Result};
use crate::events::{ChangeEvent, StoreEvent};
use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Trait abstracting the hosted document database.
///
/// Implementations own persistence, id assignment and change notification.
/// Writes are last-writer-wins; there are no transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. A missing document is `Ok(None)`.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Create or fully overwrite the document stored under `id`.
    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;

    /// Insert a new document and return its store-assigned id.
    async fn add(&self, collection: &str, fields: Fields) -> Result<String>;

    /// Remove a document. Deleting a missing id succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// One-shot equality query, in the store's native order.
    async fn query(&self, collection: &str, filter: &FieldFilter) -> Result<Vec<Document>>;

    /// Register a live query. Changes made after this returns are observed
    /// by the returned handle; dropping it releases the registration.
    fn listen(&self, collection: &str, filter: FieldFilter) -> LiveQuery;
}

/// Registration of a live equality query against a store's event stream.
pub struct LiveQuery {
    collection: String,
    filter: FieldFilter,
    receiver: broadcast::Receiver<StoreEvent>,
}

impl LiveQuery {
    pub fn new(
        collection: impl Into<String>,
        filter: FieldFilter,
        receiver: broadcast::Receiver<StoreEvent>,
    ) -> Self {
        Self {
            collection: collection.into(),
            filter,
            receiver,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn filter(&self) -> &FieldFilter {
        &self.filter
    }

    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        event.collection == self.collection && event.touches(&self.filter.field, &self.filter.value)
    }

    /// Wait until the result set may have changed.
    ///
    /// Returns `Ok(())` on a relevant change, or when events were dropped
    /// because this listener lagged (the caller re-reads the full set either
    /// way). A store fault for this collection, or the store going away,
    /// is returned as an error and ends the live query.
    pub async fn changed(&mut self) -> Result<()> {
        loop {
            match self.receiver.recv().await {
                Ok(StoreEvent::Change(event)) => {
                    if self.is_relevant(&event) {
                        return Ok(());
                    }
                }
                Ok(StoreEvent::Fault(fault)) => {
                    if fault.affects(&self.collection) {
                        return Err(fault.to_error());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        collection = %self.collection,
                        skipped,
                        "Live query lagged behind store events"
                    );
                    return Ok(());
                }
                Err(RecvError::Closed) => {
                    return Err(CrmError::Unavailable(
                        "store event channel closed".to_string(),
                    ));
                }
            }
        }
    }

    /// Discard already-queued events so one re-read covers all of them.
    /// A queued fault is still reported.
    pub fn drain(&mut self) -> Result<()> {
        loop {
            match self.receiver.try_recv() {
                Ok(StoreEvent::Fault(fault)) if fault.affects(&self.collection) => {
                    return Err(fault.to_error());
                }
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Closed) => {
                    return Err(CrmError::Unavailable(
                        "store event channel closed".to_string(),
                    ));
                }
            }
        }
    }
}
