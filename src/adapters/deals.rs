//! Deal pipeline

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

pub const COLLECTION: &str = "deals";

/// Pipeline stage, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStage {
    Lead,
    Qualified,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl DealStage {
    pub const ALL: [DealStage; 6] = [
        DealStage::Lead,
        DealStage::Qualified,
        DealStage::Proposal,
        DealStage::Negotiation,
        DealStage::Won,
        DealStage::Lost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DealStage::Lead => "lead",
            DealStage::Qualified => "qualified",
            DealStage::Proposal => "proposal",
            DealStage::Negotiation => "negotiation",
            DealStage::Won => "won",
            DealStage::Lost => "lost",
        }
    }

    /// Won and lost deals are closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, DealStage::Won | DealStage::Lost)
    }
}

impl fmt::Display for DealStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DealStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown deal stage `{s}`"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    pub title: String,
    /// Amount in minor currency units.
    pub value: u64,
    pub stage: DealStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromDocument for Deal {
    fn from_document(doc: &Document) -> std::result::Result<Self, MappingError> {
        let r = DocumentReader::new(doc);
        let created_at = r.timestamp("createdAt")?;
        Ok(Self {
            id: r.id().to_string(),
            title: r.str("title")?,
            value: r.u64("value")?,
            stage: r.parsed("stage")?,
            contact_id: r.optional_str("contactId")?,
            owner_id: r.str(OWNER_FIELD)?,
            created_at,
            updated_at: r.optional_timestamp("updatedAt")?.unwrap_or(created_at),
        })
    }
}

impl Record for Deal {
    const COLLECTION: &'static str = COLLECTION;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewDeal {
    pub title: String,
    #[serde(default)]
    pub value: u64,
    #[serde(default = "default_stage")]
    pub stage: DealStage,
    #[serde(default)]
    pub contact_id: Option<String>,
}

fn default_stage() -> DealStage {
    DealStage::Lead
}

impl NewDeal {
    pub fn new(title: impl Into<String>, value: u64) -> Self {
        Self {
            title: title.into(),
            value,
            stage: DealStage::Lead,
            contact_id: None,
        }
    }

    pub fn in_stage(mut self, stage: DealStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn for_contact(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }
}

/// Data access for deals
#[derive(Clone)]
pub struct DealAdapter {
    ctx: AdapterContext,
}

impl DealAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    pub async fn add(&self, owner: &OwnerId, deal: NewDeal) -> Result<String> {
        let result = self.add_inner(owner, deal).await;
        self.ctx.report("Deal added", "Failed to add deal", &result);
        result
    }

    async fn add_inner(&self, owner: &OwnerId, deal: NewDeal) -> Result<String> {
        let title = require_text("title", &deal.title)?;
        let contact_id = deal
            .contact_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let now = Utc::now();
        let fields = FieldsBuilder::new()
            .set("title", title)
            .set("value", deal.value)
            .set("stage", deal.stage.as_str())
            .set_opt("contactId", contact_id)
            .set(OWNER_FIELD, owner.as_str())
            .timestamp("createdAt", now)
            .timestamp("updatedAt", now)
            .build();

        let id = self.ctx.store().add(COLLECTION, fields).await?;
        info!(owner = %owner, id = %id, stage = %deal.stage, "Deal created");
        Ok(id)
    }

    /// Move a deal to another pipeline stage.
    pub async fn move_stage(&self, owner: &OwnerId, id: &str, stage: DealStage) -> Result<Deal> {
        let result = self.move_stage_inner(owner, id, stage).await;
        self.ctx
            .report("Deal moved", "Failed to move deal", &result);
        result
    }

    async fn move_stage_inner(&self, owner: &OwnerId, id: &str, stage: DealStage) -> Result<Deal> {
        let existing = self
            .ctx
            .owned_document(COLLECTION, owner, id)
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("{COLLECTION}/{id}")))?;

        let mut fields = existing.fields;
        let updated = FieldsBuilder::new()
            .set("stage", stage.as_str())
            .timestamp("updatedAt", Utc::now())
            .build();
        fields.extend(updated);

        let deal = Deal::from_document(&Document::new(id, fields.clone()))
            .map_err(|e| e.into_malformed(COLLECTION, id))?;
        self.ctx.store().set(COLLECTION, id, fields).await?;
        info!(owner = %owner, id, stage = %stage, "Deal stage changed");
        Ok(deal)
    }

    pub async fn delete(&self, owner: &OwnerId, id: &str) -> Result<()> {
        let result = self.ctx.delete_owned(COLLECTION, owner, id).await;
        self.ctx.report("Deal deleted", "Failed to delete deal", &result);
        result
    }

    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<Deal>> {
        self.ctx.subscriptions::<Deal>().fetch(owner).await
    }

    pub fn subscribe<U, E>(&self, owner: &OwnerId, on_update: U, on_error: E) -> CancelHandle
    where
        U: FnMut(Snapshot<Deal>) + Send + 'static,
        E: FnOnce(CrmError) + Send + 'static,
    {
        self.ctx
            .subscriptions::<Deal>()
            .subscribe(owner, on_update, on_error)
    }

    pub fn snapshots(&self, owner: &OwnerId) -> SnapshotStream<Deal> {
        self.ctx.subscriptions::<Deal>().snapshots(owner)
    }
}
