//! Raw document shapes exchanged with the document store

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field map of a schemaless document
pub type Fields = serde_json::Map<String, Value>;

/// A document as returned by the store: a store-assigned id plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Equality predicate `field == value`, the only filter live queries support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        fields.get(&self.field) == Some(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_exact_value_only() {
        let filter = FieldFilter::eq("ownerId", "u1");
        let mut fields = Fields::new();
        fields.insert("ownerId".into(), json!("u1"));
        assert!(filter.matches(&fields));

        fields.insert("ownerId".into(), json!("u10"));
        assert!(!filter.matches(&fields));

        fields.remove("ownerId");
        assert!(!filter.matches(&fields));
    }
}
