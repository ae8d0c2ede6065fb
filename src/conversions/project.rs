//! Projection of decoded rows onto a target entity schema.

use chrono::{DateTime, Utc};

use crate::conversions::decode::DecodeWarning;
use crate::schema::EntitySchema;
use crate::types::row::{CREATED_AT_FIELD, DOC_ID_FIELD, FieldValue, Row, UPDATED_AT_FIELD};

/// Projects a decoded row onto the schema's field-name set.
///
/// Iterates in the schema's field order, copying through any field that is present;
/// absent fields are simply omitted, since the target representation distinguishes
/// "column not set" from "empty string". The identity fields `doc_id`, `created_at`,
/// and `updated_at` are always included, derived from the event timestamps.
///
/// Decoded fields the schema does not recognize produce one aggregated warning naming
/// all of them, and are dropped. The result therefore upholds the projection
/// invariant: its key set is a subset of the schema field-name set.
pub fn project_row(
    schema: &EntitySchema,
    decoded: &Row,
    doc_id: &str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> (Row, Vec<DecodeWarning>) {
    let mut warnings = Vec::new();

    let unknown: Vec<&str> = decoded
        .field_names()
        .filter(|name| !schema.contains(name))
        .collect();
    if !unknown.is_empty() {
        warnings.push(DecodeWarning {
            path: String::new(),
            message: format!(
                "{} decoded field(s) not present in the target schema were dropped",
                unknown.len()
            ),
            payload: serde_json::json!(unknown),
        });
    }

    let mut row = Row::new();
    for name in schema.field_names() {
        if let Some(value) = decoded.get(name) {
            row.insert(name, value.clone());
        }
    }

    row.insert(DOC_ID_FIELD, FieldValue::String(doc_id.to_string()));
    row.insert(CREATED_AT_FIELD, FieldValue::String(created_at.to_rfc3339()));
    row.insert(UPDATED_AT_FIELD, FieldValue::String(updated_at.to_rfc3339()));

    (row, warnings)
}
