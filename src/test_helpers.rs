//! Test helper factories and mock state builders
#![allow(dead_code)]

use crate::api::create_router;
use crate::notify::{Notifier, RecordingNotifier};
use crate::store::{Document, DocumentStore, Fields, MemoryDocumentStore};
use crate::{AppState, Config, OwnerId};
use axum::Router;
use serde_json::json;
use std::sync::Arc;

/// In-memory AppState plus handles to the store and notifier behind it.
pub struct MockApp {
    pub state: AppState,
    pub store: Arc<MemoryDocumentStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl MockApp {
    pub fn router(&self) -> Router {
        create_router(Arc::new(self.state.clone()))
    }
}

pub fn mock_app() -> MockApp {
    let store = Arc::new(MemoryDocumentStore::new());
    let notifier = Arc::new(RecordingNotifier::granted());
    let state = AppState::with_store(
        Config::default(),
        store.clone(),
        Some(notifier.clone() as Arc<dyn Notifier>),
    );
    MockApp {
        state,
        store,
        notifier,
    }
}

/// Create a mock AppState with an empty in-memory store
pub fn mock_app_state() -> AppState {
    mock_app().state
}

pub fn owner(raw: &str) -> OwnerId {
    OwnerId::new(raw).unwrap()
}

pub fn fields(value: serde_json::Value) -> Fields {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Write a raw document, bypassing adapter validation.
pub async fn put_raw(store: &MemoryDocumentStore, collection: &str, id: &str, value: serde_json::Value) {
    store.set(collection, id, fields(value)).await.unwrap();
}

pub fn contact_doc(id: &str, owner: &str, name: &str) -> Document {
    Document::new(
        id,
        fields(json!({
            "name": name,
            "ownerId": owner,
            "createdAt": { "seconds": 1_700_000_000, "nanoseconds": 0 },
        })),
    )
}
