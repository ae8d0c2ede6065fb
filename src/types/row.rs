//! Row representations flowing through the pipeline.
//!
//! A [`Row`] is a name-keyed mapping of scalar values conforming to an entity schema.
//! No native integers are stored: integer variants are stringified at decode time to
//! tolerate type drift across schema versions. [`StagedRow`] wraps a row (or a
//! tombstone) with the reconciliation identity and the `updated_at` watermark used for
//! last-writer-wins conflict resolution.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Field name that always carries the source document id.
pub const DOC_ID_FIELD: &str = "doc_id";
/// Field name that carries the document creation timestamp (RFC 3339).
pub const CREATED_AT_FIELD: &str = "created_at";
/// Field name that carries the document update timestamp (RFC 3339).
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// A scalar cell stored in a [`Row`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Bool(bool),
}

impl FieldValue {
    /// Returns the string content if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(value) => Some(value),
            FieldValue::Bool(_) => None,
        }
    }

    /// Renders this value as JSON for diagnostic payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::String(value) => serde_json::Value::String(value.clone()),
            FieldValue::Bool(value) => serde_json::Value::Bool(*value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

/// A flat, schema-conformant row keyed by field name.
///
/// Invariant maintained by the projector: every key is a member of the entity's schema
/// field-name set, plus the always-present identity fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: BTreeMap<String, FieldValue>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Inserts a field, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Returns the value stored under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns `true` if a field with `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates over `(name, value)` pairs in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the set of field names present in this row.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Renders the row as a JSON object for warning and error payloads.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, FieldValue)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Payload of a staged row: either a full projected row or a deletion tombstone.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedPayload {
    Upsert(Row),
    Tombstone,
}

/// An immutable entry in an entity's append-only staging buffer.
///
/// `key` is the reconciliation identity: the document id for plain entities, or the
/// composite item identity for the fan-out entity. The `updated_at` watermark decides
/// conflicts under last-writer-wins, independent of arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub key: String,
    pub doc_id: String,
    pub updated_at: DateTime<Utc>,
    pub payload: StagedPayload,
}

impl StagedRow {
    /// Creates a staged upsert carrying a projected row.
    pub fn upsert(
        key: impl Into<String>,
        doc_id: impl Into<String>,
        updated_at: DateTime<Utc>,
        row: Row,
    ) -> Self {
        Self {
            key: key.into(),
            doc_id: doc_id.into(),
            updated_at,
            payload: StagedPayload::Upsert(row),
        }
    }

    /// Creates a staged tombstone marking the document as deleted.
    pub fn tombstone(doc_id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        let doc_id = doc_id.into();
        Self {
            key: doc_id.clone(),
            doc_id,
            updated_at,
            payload: StagedPayload::Tombstone,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.payload, StagedPayload::Tombstone)
    }

    /// Returns the projected row for upserts, `None` for tombstones.
    pub fn row(&self) -> Option<&Row> {
        match &self.payload {
            StagedPayload::Upsert(row) => Some(row),
            StagedPayload::Tombstone => None,
        }
    }
}
