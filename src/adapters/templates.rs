//! Recurring task templates
//!
//! Templates are created and deleted, never edited in place.

use super::{require_text, AdapterContext};
use crate::error::{CrmError, Result};
use crate::mapper::{DocumentReader, FieldsBuilder, FromDocument, MappingError, Record};
use crate::owner::{OwnerId, OWNER_FIELD};
use crate::store::Document;
use crate::subscription::{CancelHandle, Snapshot, SnapshotStream};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

pub const COLLECTION: &str = "recurringTaskTemplates";

/// How often a task generated from a template recurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskInterval {
    Daily,
    Weekly,
    Monthly,
}

impl TaskInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskInterval::Daily => "daily",
            TaskInterval::Weekly => "weekly",
            TaskInterval::Monthly => "monthly",
        }
    }
}

impl fmt::Display for TaskInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskInterval {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(TaskInterval::Daily),
            "weekly" => Ok(TaskInterval::Weekly),
            "monthly" => Ok(TaskInterval::Monthly),
            other => Err(format!("unknown interval `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringTaskTemplate {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub interval: TaskInterval,
    pub owner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl FromDocument for RecurringTaskTemplate {
    fn from_document(doc: &Document) -> std::result::Result<Self, MappingError> {
        let r = DocumentReader::new(doc);
        Ok(Self {
            id: r.id().to_string(),
            title: r.str("title")?,
            description: r.optional_str("description")?,
            interval: r.parsed("interval")?,
            owner_id: r.str(OWNER_FIELD)?,
            created_at: r.optional_timestamp("createdAt")?,
        })
    }
}

impl Record for RecurringTaskTemplate {
    const COLLECTION: &'static str = COLLECTION;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Payload for creating a template. The id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewTemplate {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub interval: TaskInterval,
}

impl NewTemplate {
    pub fn new(title: impl Into<String>, interval: TaskInterval) -> Self {
        Self {
            title: title.into(),
            description: None,
            interval,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Data access for recurring task templates
#[derive(Clone)]
pub struct TemplateAdapter {
    ctx: AdapterContext,
}

impl TemplateAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    /// Create a template owned by `owner` and return its store-assigned id.
    pub async fn add(&self, owner: &OwnerId, template: NewTemplate) -> Result<String> {
        let result = self.add_inner(owner, template).await;
        self.ctx
            .report("Template added", "Failed to add template", &result);
        result
    }

    async fn add_inner(&self, owner: &OwnerId, template: NewTemplate) -> Result<String> {
        let title = require_text("title", &template.title)?;
        let description = template
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let fields = FieldsBuilder::new()
            .set("title", title)
            .set_opt("description", description)
            .set("interval", template.interval.as_str())
            .set(OWNER_FIELD, owner.as_str())
            .timestamp("createdAt", Utc::now())
            .build();

        let id = self.ctx.store().add(COLLECTION, fields).await?;
        info!(owner = %owner, id = %id, interval = %template.interval, "Recurring template created");
        Ok(id)
    }

    /// Delete a template. Missing ids succeed; another owner's template is
    /// `PermissionDenied`.
    pub async fn delete(&self, owner: &OwnerId, id: &str) -> Result<()> {
        let result = self.ctx.delete_owned(COLLECTION, owner, id).await;
        self.ctx
            .report("Template deleted", "Failed to delete template", &result);
        result
    }

    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<RecurringTaskTemplate>> {
        self.ctx.subscriptions::<RecurringTaskTemplate>().fetch(owner).await
    }

    pub fn subscribe<U, E>(&self, owner: &OwnerId, on_update: U, on_error: E) -> CancelHandle
    where
        U: FnMut(Snapshot<RecurringTaskTemplate>) + Send + 'static,
        E: FnOnce(CrmError) + Send + 'static,
    {
        self.ctx
            .subscriptions::<RecurringTaskTemplate>()
            .subscribe(owner, on_update, on_error)
    }

    pub fn snapshots(&self, owner: &OwnerId) -> SnapshotStream<RecurringTaskTemplate> {
        self.ctx
            .subscriptions::<RecurringTaskTemplate>()
            .snapshots(owner)
    }
}
