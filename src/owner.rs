//! Identity of the authenticated principal that owns user-scoped records.

use crate::error::{CrmError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the document field every user-scoped record is stamped and
/// filtered with.
pub const OWNER_FIELD: &str = "ownerId";

/// Non-empty identifier of the principal on whose behalf an operation runs.
///
/// Every adapter call takes one explicitly; there is no ambient "current
/// user". Constructing one from a blank string fails with
/// [`CrmError::InvalidArgument`], so no query is ever issued without a
/// scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(CrmError::InvalidArgument(
                "owner id must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OwnerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for OwnerId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        OwnerId::new(raw).map_err(serde::de::Error::custom)
    }
}
