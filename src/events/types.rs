//! Change notifications emitted by a document store

use crate::error::CrmError;
use crate::store::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The mutation that produced a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// A single document mutation.
///
/// Carries the document's fields before and after the mutation so that live
/// queries can decide whether the change entered, left or stayed inside their
/// result set. Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub action: ChangeAction,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Fields>,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ChangeEvent {
    /// Create a new ChangeEvent with the current timestamp
    pub fn new(
        collection: impl Into<String>,
        action: ChangeAction,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            action,
            document_id: document_id.into(),
            before: None,
            after: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_before(mut self, fields: Fields) -> Self {
        self.before = Some(fields);
        self
    }

    pub fn with_after(mut self, fields: Fields) -> Self {
        self.after = Some(fields);
        self
    }

    /// Whether either side of the mutation has `field == value`.
    pub fn touches(&self, field: &str, value: &Value) -> bool {
        [&self.before, &self.after]
            .into_iter()
            .flatten()
            .any(|fields| fields.get(field) == Some(value))
    }
}

/// Category of a store-side failure pushed to live queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Unavailable,
    PermissionDenied,
}

/// A failure that terminates live queries.
///
/// `collection == None` affects every collection (connection loss).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFault {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub kind: FaultKind,
    pub message: String,
}

impl StoreFault {
    pub fn affects(&self, collection: &str) -> bool {
        self.collection.as_deref().map_or(true, |c| c == collection)
    }

    pub fn to_error(&self) -> CrmError {
        match self.kind {
            FaultKind::Unavailable => CrmError::Unavailable(self.message.clone()),
            FaultKind::PermissionDenied => CrmError::PermissionDenied(self.message.clone()),
        }
    }
}

/// Everything a store broadcasts to its listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    Change(ChangeEvent),
    Fault(StoreFault),
}

/// Sink for store events. Emitting never blocks and never fails.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: StoreEvent);

    fn emit_change(&self, event: ChangeEvent) {
        self.emit(StoreEvent::Change(event));
    }

    fn emit_fault(&self, collection: Option<&str>, kind: FaultKind, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.emit(StoreEvent::Fault(StoreFault {
            collection: collection.map(str::to_string),
            kind,
            message: message.into(),
        }));
    }
}
