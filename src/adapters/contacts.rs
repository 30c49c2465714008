//! Contacts

use super::{require_text, stored_timestamp, AdapterContext};
use crate::error::{CrmError, Result};
use crate::mapper::{DocumentReader, FieldsBuilder, FromDocument, MappingError, Record};
use crate::owner::{OwnerId, OWNER_FIELD};
use crate::store::{Document, Fields};
use crate::subscription::{CancelHandle, Snapshot, SnapshotStream};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

pub const COLLECTION: &str = "contacts";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    /// Empty when the stored document has no `tags` field.
    pub tags: Vec<String>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl FromDocument for Contact {
    fn from_document(doc: &Document) -> std::result::Result<Self, MappingError> {
        let r = DocumentReader::new(doc);
        Ok(Self {
            id: r.id().to_string(),
            name: r.str("name")?,
            email: r.optional_str("email")?,
            phone: r.optional_str("phone")?,
            company: r.optional_str("company")?,
            tags: r.str_list_or_default("tags")?,
            owner_id: r.str(OWNER_FIELD)?,
            created_at: r.timestamp("createdAt")?,
        })
    }
}

impl Record for Contact {
    const COLLECTION: &'static str = COLLECTION;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Editable contact fields, used for both create and update.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContactInput {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ContactInput {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    fn to_fields(&self, owner: &OwnerId, created_at: DateTime<Utc>) -> Result<Fields> {
        let name = require_text("name", &self.name)?;
        let email = non_blank(self.email.as_deref());
        if let Some(email) = &email {
            if !email.contains('@') {
                return Err(CrmError::InvalidArgument(format!(
                    "`{email}` is not an email address"
                )));
            }
        }
        let mut tags: Vec<String> = self
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let mut seen = HashSet::new();
        tags.retain(|t| seen.insert(t.clone()));

        Ok(FieldsBuilder::new()
            .set("name", name)
            .set_opt("email", email)
            .set_opt("phone", non_blank(self.phone.as_deref()))
            .set_opt("company", non_blank(self.company.as_deref()))
            .set("tags", tags)
            .set(OWNER_FIELD, owner.as_str())
            .timestamp("createdAt", created_at)
            .build())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Data access for contacts
#[derive(Clone)]
pub struct ContactAdapter {
    ctx: AdapterContext,
}

impl ContactAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    pub async fn add(&self, owner: &OwnerId, input: ContactInput) -> Result<String> {
        let result = self.add_inner(owner, input).await;
        self.ctx.report("Contact added", "Failed to add contact", &result);
        result
    }

    async fn add_inner(&self, owner: &OwnerId, input: ContactInput) -> Result<String> {
        let fields = input.to_fields(owner, Utc::now())?;
        let id = self.ctx.store().add(COLLECTION, fields).await?;
        info!(owner = %owner, id = %id, "Contact created");
        Ok(id)
    }

    /// Replace the editable fields of a contact. `createdAt` and the owner
    /// stamp are preserved; fields left out of `input` are cleared.
    pub async fn update(&self, owner: &OwnerId, id: &str, input: ContactInput) -> Result<Contact> {
        let result = self.update_inner(owner, id, input).await;
        self.ctx
            .report("Contact updated", "Failed to update contact", &result);
        result
    }

    async fn update_inner(&self, owner: &OwnerId, id: &str, input: ContactInput) -> Result<Contact> {
        let existing = self
            .ctx
            .owned_document(COLLECTION, owner, id)
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("{COLLECTION}/{id}")))?;
        let created_at =
            stored_timestamp(&existing, COLLECTION, "createdAt").unwrap_or_else(Utc::now);

        let fields = input.to_fields(owner, created_at)?;
        let updated = Document::new(id, fields.clone());
        let contact =
            Contact::from_document(&updated).map_err(|e| e.into_malformed(COLLECTION, id))?;
        self.ctx.store().set(COLLECTION, id, fields).await?;
        info!(owner = %owner, id, "Contact updated");
        Ok(contact)
    }

    pub async fn delete(&self, owner: &OwnerId, id: &str) -> Result<()> {
        let result = self.ctx.delete_owned(COLLECTION, owner, id).await;
        self.ctx
            .report("Contact deleted", "Failed to delete contact", &result);
        result
    }

    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<Contact>> {
        self.ctx.subscriptions::<Contact>().fetch(owner).await
    }

    pub fn subscribe<U, E>(&self, owner: &OwnerId, on_update: U, on_error: E) -> CancelHandle
    where
        U: FnMut(Snapshot<Contact>) + Send + 'static,
        E: FnOnce(CrmError) + Send + 'static,
    {
        self.ctx
            .subscriptions::<Contact>()
            .subscribe(owner, on_update, on_error)
    }

    pub fn snapshots(&self, owner: &OwnerId) -> SnapshotStream<Contact> {
        self.ctx.subscriptions::<Contact>().snapshots(owner)
    }
}
