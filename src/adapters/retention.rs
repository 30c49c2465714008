//! Per-user data retention settings
//!
//! One document per user, keyed by the owner id. The key is what scopes the
//! document: older documents carry only `retentionDays` and `lastUpdated`,
//! with no `ownerId` stamp. `save` is a full overwrite: any field not supplied
//! is gone afterwards. Settings are never deleted.

use super::{stored_timestamp, AdapterContext};
use crate::error::{CrmError, Result};
use crate::mapper::{DocumentReader, FieldsBuilder, FromDocument, MappingError};
use crate::owner::{OwnerId, OWNER_FIELD};
use crate::store::Document;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

pub const COLLECTION: &str = "dataRetentionSettings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRetentionSettings {
    pub retention_days: u32,
    pub last_updated: DateTime<Utc>,
    pub owner_id: String,
}

impl FromDocument for DataRetentionSettings {
    fn from_document(doc: &Document) -> std::result::Result<Self, MappingError> {
        let r = DocumentReader::new(doc);
        let days = r.u64("retentionDays")?;
        let retention_days = u32::try_from(days)
            .ok()
            .filter(|d| *d > 0)
            .ok_or_else(|| MappingError::InvalidValue {
                field: "retentionDays".to_string(),
                reason: format!("{days} is not a positive 32-bit day count"),
            })?;
        Ok(Self {
            retention_days,
            last_updated: r.timestamp("lastUpdated")?,
            owner_id: r
                .optional_str(OWNER_FIELD)?
                .unwrap_or_else(|| r.id().to_string()),
        })
    }
}

/// Caller-supplied part of the settings; `lastUpdated` is stamped on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetentionInput {
    pub retention_days: u32,
}

impl RetentionInput {
    pub fn days(retention_days: u32) -> Self {
        Self { retention_days }
    }
}

/// Data access for the retention singleton
#[derive(Clone)]
pub struct RetentionAdapter {
    ctx: AdapterContext,
}

impl RetentionAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    /// Overwrite the caller's settings and return what was stored.
    ///
    /// `lastUpdated` is strictly greater than the previously stored value
    /// even if the clock has not advanced since the last save.
    pub async fn save(&self, owner: &OwnerId, input: RetentionInput) -> Result<DataRetentionSettings> {
        let result = self.save_inner(owner, input).await;
        self.ctx.report(
            "Retention settings saved",
            "Failed to save retention settings",
            &result,
        );
        result
    }

    async fn save_inner(&self, owner: &OwnerId, input: RetentionInput) -> Result<DataRetentionSettings> {
        if input.retention_days == 0 {
            return Err(CrmError::InvalidArgument(
                "retentionDays must be a positive integer".into(),
            ));
        }

        let previous = self
            .stored(owner)
            .await?
            .and_then(|doc| stored_timestamp(&doc, COLLECTION, "lastUpdated"));
        let settings = DataRetentionSettings {
            retention_days: input.retention_days,
            last_updated: next_timestamp(previous, Utc::now()),
            owner_id: owner.as_str().to_string(),
        };

        let fields = FieldsBuilder::new()
            .set("retentionDays", settings.retention_days)
            .timestamp("lastUpdated", settings.last_updated)
            .set(OWNER_FIELD, owner.as_str())
            .build();
        self.ctx.store().set(COLLECTION, owner.as_str(), fields).await?;

        info!(owner = %owner, retention_days = settings.retention_days, "Retention settings saved");
        Ok(settings)
    }

    /// The caller's settings, or `None` if they were never saved.
    pub async fn get(&self, owner: &OwnerId) -> Result<Option<DataRetentionSettings>> {
        let Some(doc) = self.stored(owner).await? else {
            return Ok(None);
        };
        DataRetentionSettings::from_document(&doc)
            .map(Some)
            .map_err(|e| e.into_malformed(COLLECTION, &doc.id))
    }
}

impl RetentionAdapter {
    /// Read the document under the caller's key. An `ownerId` stamp, when
    /// present, must name the caller.
    async fn stored(&self, owner: &OwnerId) -> Result<Option<Document>> {
        let Some(doc) = self.ctx.store().get(COLLECTION, owner.as_str()).await? else {
            return Ok(None);
        };
        match doc.get(OWNER_FIELD) {
            None | Some(Value::Null) => {}
            Some(Value::String(stamped)) if stamped == owner.as_str() => {}
            Some(_) => {
                warn!(owner = %owner, "Retention settings stamped with another owner");
                return Err(CrmError::PermissionDenied(format!(
                    "{COLLECTION}/{owner} is not owned by the caller"
                )));
            }
        }
        Ok(Some(doc))
    }
}

fn next_timestamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + Duration::milliseconds(1),
        _ => now,
    }
}
