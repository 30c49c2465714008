//! Per-entity data-access adapters
//!
//! Each adapter translates domain operations into document store calls,
//! stamps or filters every call by the caller's [`OwnerId`], and maps raw
//! documents into typed records.

pub mod contacts;
pub mod deals;
pub mod retention;
pub mod templates;

pub use contacts::{Contact, ContactAdapter, ContactInput};
pub use deals::{Deal, DealAdapter, DealStage, NewDeal};
pub use retention::{DataRetentionSettings, RetentionAdapter, RetentionInput};
pub use templates::{NewTemplate, RecurringTaskTemplate, TaskInterval, TemplateAdapter};

use crate::error::{CrmError, Result};
use crate::mapper::{DocumentReader, MalformedPolicy, Record};
use crate::notify::{notify_outcome, Notifier};
use crate::owner::{OwnerId, OWNER_FIELD};
use crate::store::{Document, DocumentStore};
use crate::subscription::SubscriptionManager;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Dependencies shared by every adapter.
#[derive(Clone)]
pub struct AdapterContext {
    store: Arc<dyn DocumentStore>,
    policy: MalformedPolicy,
    notifier: Option<Arc<dyn Notifier>>,
}

impl AdapterContext {
    pub fn new(store: Arc<dyn DocumentStore>, policy: MalformedPolicy) -> Self {
        Self {
            store,
            policy,
            notifier: None,
        }
    }

    /// Report mutation outcomes through `notifier` (builder pattern).
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn policy(&self) -> MalformedPolicy {
        self.policy
    }

    pub(crate) fn subscriptions<T: Record>(&self) -> SubscriptionManager<T> {
        SubscriptionManager::new(self.store.clone(), self.policy)
    }

    pub(crate) fn report<T>(&self, success: &str, failure: &str, result: &Result<T>) {
        notify_outcome(self.notifier.as_deref(), success, failure, result);
    }

    /// Read a document and check it belongs to `owner`.
    ///
    /// A missing document is `Ok(None)`. A document owned by someone else,
    /// or with no owner stamp at all, is `PermissionDenied`.
    pub(crate) async fn owned_document(
        &self,
        collection: &str,
        owner: &OwnerId,
        id: &str,
    ) -> Result<Option<Document>> {
        validate_id(id)?;
        let Some(doc) = self.store.get(collection, id).await? else {
            return Ok(None);
        };
        if doc.get(OWNER_FIELD).and_then(|v| v.as_str()) != Some(owner.as_str()) {
            warn!(collection, id, owner = %owner, "Rejected access to foreign document");
            return Err(CrmError::PermissionDenied(format!(
                "{collection}/{id} is not owned by the caller"
            )));
        }
        Ok(Some(doc))
    }

    /// Ownership-checked, idempotent delete.
    pub(crate) async fn delete_owned(&self, collection: &str, owner: &OwnerId, id: &str) -> Result<()> {
        if self.owned_document(collection, owner, id).await?.is_none() {
            debug!(collection, id, "Delete of missing document treated as success");
            return Ok(());
        }
        self.store.delete(collection, id).await?;
        debug!(collection, id, owner = %owner, "Document deleted");
        Ok(())
    }
}

/// Timestamp carried forward from a stored document on rewrite. A malformed
/// value is logged and treated as absent.
fn stored_timestamp(doc: &Document, collection: &str, field: &str) -> Option<DateTime<Utc>> {
    match DocumentReader::new(doc).optional_timestamp(field) {
        Ok(ts) => ts,
        Err(e) => {
            warn!(
                collection,
                id = %doc.id,
                field,
                error = %e,
                "Ignoring malformed stored timestamp"
            );
            None
        }
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(CrmError::InvalidArgument("document id must not be empty".into()));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CrmError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}
