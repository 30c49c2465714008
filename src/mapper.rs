//! Record mapping: raw store documents to typed domain records
//!
//! Store-native timestamps are `{"seconds": i64, "nanoseconds": u32}` objects.
//! RFC 3339 strings and integer epoch milliseconds are accepted on read as
//! well; all three become `DateTime<Utc>`. Writes always use the native form.

use crate::error::{CrmError, Result};
use crate::store::{Document, Fields};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Why a single document failed to map
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("field `{field}` should be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("field `{field}` has invalid value: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl MappingError {
    pub fn into_malformed(self, collection: &str, id: &str) -> CrmError {
        CrmError::MalformedRecord {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: self.to_string(),
        }
    }
}

/// A typed record decoded from a store document.
pub trait FromDocument: Sized {
    fn from_document(doc: &Document) -> std::result::Result<Self, MappingError>;
}

/// A user-scoped record stored in its own collection.
pub trait Record: FromDocument + Clone + Send + Sync + 'static {
    /// Wire name of the collection holding this record type.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// What to do with a malformed document inside a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Drop the offending document, log it, and deliver the rest.
    #[default]
    SkipAndLog,
    /// Fail the whole snapshot with `MalformedRecord`.
    AbortSnapshot,
}

impl FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "skip_and_log" | "skip" => Ok(Self::SkipAndLog),
            "abort_snapshot" | "abort" => Ok(Self::AbortSnapshot),
            other => Err(format!("unknown malformed-record policy: {other}")),
        }
    }
}

/// Map a query result onto typed records according to `policy`.
///
/// Returns the mapped records and the number of documents skipped.
pub fn map_documents<T: Record>(
    docs: &[Document],
    policy: MalformedPolicy,
) -> Result<(Vec<T>, usize)> {
    let mut records = Vec::with_capacity(docs.len());
    let mut skipped = 0;
    for doc in docs {
        match T::from_document(doc) {
            Ok(record) => records.push(record),
            Err(e) => match policy {
                MalformedPolicy::AbortSnapshot => {
                    return Err(e.into_malformed(T::COLLECTION, &doc.id));
                }
                MalformedPolicy::SkipAndLog => {
                    warn!(
                        collection = T::COLLECTION,
                        id = %doc.id,
                        error = %e,
                        "Skipping malformed record"
                    );
                    skipped += 1;
                }
            },
        }
    }
    Ok((records, skipped))
}

// ============================================================================
// Timestamps
// ============================================================================

/// Encode a timestamp in the store-native form.
pub fn timestamp_to_value(ts: DateTime<Utc>) -> Value {
    json!({
        "seconds": ts.timestamp(),
        "nanoseconds": ts.timestamp_subsec_nanos(),
    })
}

/// Decode any accepted temporal representation.
pub fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Object(map) => {
            let seconds = map.get("seconds")?.as_i64()?;
            let nanos = match map.get("nanoseconds") {
                Some(n) => u32::try_from(n.as_u64()?).ok()?,
                None => 0,
            };
            Utc.timestamp_opt(seconds, nanos).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}

// ============================================================================
// Field access
// ============================================================================

/// Typed accessors over a document's fields.
///
/// `optional_*` accessors treat both an absent field and an explicit `null`
/// as `None`; a present value of the wrong shape is still an error.
pub struct DocumentReader<'a> {
    doc: &'a Document,
}

impl<'a> DocumentReader<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self { doc }
    }

    pub fn id(&self) -> &'a str {
        &self.doc.id
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.doc.fields.get(field).filter(|v| !v.is_null())
    }

    fn required(&self, field: &str) -> std::result::Result<&'a Value, MappingError> {
        self.present(field)
            .ok_or_else(|| MappingError::MissingField(field.to_string()))
    }

    pub fn str(&self, field: &str) -> std::result::Result<String, MappingError> {
        self.required(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| wrong_type(field, "a string"))
    }

    pub fn optional_str(&self, field: &str) -> std::result::Result<Option<String>, MappingError> {
        self.present(field)
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| wrong_type(field, "a string"))
            })
            .transpose()
    }

    pub fn u64(&self, field: &str) -> std::result::Result<u64, MappingError> {
        self.required(field)?
            .as_u64()
            .ok_or_else(|| wrong_type(field, "a non-negative integer"))
    }

    pub fn timestamp(&self, field: &str) -> std::result::Result<DateTime<Utc>, MappingError> {
        timestamp_from_value(self.required(field)?)
            .ok_or_else(|| wrong_type(field, "a timestamp"))
    }

    pub fn optional_timestamp(
        &self,
        field: &str,
    ) -> std::result::Result<Option<DateTime<Utc>>, MappingError> {
        self.present(field)
            .map(|v| timestamp_from_value(v).ok_or_else(|| wrong_type(field, "a timestamp")))
            .transpose()
    }

    /// String list that defaults to empty when absent.
    pub fn str_list_or_default(&self, field: &str) -> std::result::Result<Vec<String>, MappingError> {
        let Some(value) = self.present(field) else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| wrong_type(field, "an array of strings"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| wrong_type(field, "an array of strings"))
            })
            .collect()
    }

    /// Parse a string field through `FromStr`.
    pub fn parsed<T>(&self, field: &str) -> std::result::Result<T, MappingError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.str(field)?;
        raw.parse().map_err(|e: T::Err| MappingError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

fn wrong_type(field: &str, expected: &'static str) -> MappingError {
    MappingError::WrongType {
        field: field.to_string(),
        expected,
    }
}

/// Builder for the field map written to the store.
#[derive(Debug, Default)]
pub struct FieldsBuilder {
    fields: Fields,
}

impl FieldsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    /// Set the field only when a value is present; absent stays absent.
    pub fn set_opt(self, field: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.set(field, v),
            None => self,
        }
    }

    pub fn timestamp(self, field: &str, ts: DateTime<Utc>) -> Self {
        self.set(field, timestamp_to_value(ts))
    }

    pub fn build(self) -> Fields {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Probe {
        id: String,
        name: String,
    }

    impl FromDocument for Probe {
        fn from_document(doc: &Document) -> std::result::Result<Self, MappingError> {
            let r = DocumentReader::new(doc);
            Ok(Self {
                id: r.id().to_string(),
                name: r.str("name")?,
            })
        }
    }

    impl Record for Probe {
        const COLLECTION: &'static str = "probes";
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn doc(id: &str, fields: Value) -> Document {
        Document::new(id, fields.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_timestamp_forms_agree() {
        let native = json!({"seconds": 1_700_000_000, "nanoseconds": 500_000_000});
        let rfc = json!("2023-11-14T22:13:20.5Z");
        let millis = json!(1_700_000_000_500_i64);

        let a = timestamp_from_value(&native).unwrap();
        assert_eq!(a, timestamp_from_value(&rfc).unwrap());
        assert_eq!(a, timestamp_from_value(&millis).unwrap());
        assert_eq!(timestamp_from_value(&timestamp_to_value(a)).unwrap(), a);
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        assert!(timestamp_from_value(&json!("yesterday")).is_none());
        assert!(timestamp_from_value(&json!({"nanoseconds": 3})).is_none());
        assert!(timestamp_from_value(&json!(true)).is_none());
    }

    #[test]
    fn test_optional_absent_and_null_are_none() {
        let d = doc("x", json!({"a": null}));
        let r = DocumentReader::new(&d);
        assert_eq!(r.optional_str("a").unwrap(), None);
        assert_eq!(r.optional_str("b").unwrap(), None);
        assert_eq!(r.optional_timestamp("b").unwrap(), None);
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let d = doc("x", json!({"a": 3, "tags": ["ok", 1]}));
        let r = DocumentReader::new(&d);
        assert!(matches!(r.str("a"), Err(MappingError::WrongType { .. })));
        assert!(matches!(r.optional_str("a"), Err(MappingError::WrongType { .. })));
        assert!(r.str_list_or_default("tags").is_err());
        assert_eq!(r.str_list_or_default("missing").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_map_documents_skip_and_log() {
        let docs = vec![
            doc("1", json!({"name": "ok"})),
            doc("2", json!({"title": "no name"})),
            doc("3", json!({"name": "fine"})),
        ];
        let (records, skipped) =
            map_documents::<Probe>(&docs, MalformedPolicy::SkipAndLog).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "fine");
    }

    #[test]
    fn test_map_documents_abort() {
        let docs = vec![
            doc("1", json!({"name": "ok"})),
            doc("2", json!({"name": 7})),
        ];
        let err = map_documents::<Probe>(&docs, MalformedPolicy::AbortSnapshot).unwrap_err();
        match err {
            CrmError::MalformedRecord { collection, id, .. } => {
                assert_eq!(collection, "probes");
                assert_eq!(id, "2");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("abort".parse::<MalformedPolicy>().unwrap(), MalformedPolicy::AbortSnapshot);
        assert_eq!(
            "Skip-And-Log".parse::<MalformedPolicy>().unwrap(),
            MalformedPolicy::SkipAndLog
        );
        assert!("explode".parse::<MalformedPolicy>().is_err());
    }
}
