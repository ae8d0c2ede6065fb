//! Tagged-variant representation of document field values.

use std::collections::BTreeMap;

/// A single document field value as produced by the transport layer.
///
/// [`Variant`] is a closed sum type: every shape the document store can emit has an
/// explicit case, including [`Variant::Unrecognized`] for payloads the transport could
/// not classify. This makes the unrecognized branch a real, testable case for the
/// decoder rather than an implicit fallthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Null,
    String(String),
    Bool(bool),
    Integer(i64),
    /// Nested map of field name to value. A [`BTreeMap`] keeps decoding deterministic.
    Map(BTreeMap<String, Variant>),
    Array(Vec<Variant>),
    /// A payload shape the transport layer could not classify. The raw JSON is kept
    /// so that decode warnings can surface it for manual inspection.
    Unrecognized(serde_json::Value),
}

impl Variant {
    /// Returns `true` for scalar cases, meaning values that can occupy a single column.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Variant::String(_) | Variant::Bool(_) | Variant::Integer(_)
        )
    }

    /// Renders this variant as JSON for diagnostic payloads.
    ///
    /// Only used when building warning and error payloads. Integers stay numeric here
    /// since the rendering is for humans, not for the target schema.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Variant::Null => serde_json::Value::Null,
            Variant::String(value) => serde_json::Value::String(value.clone()),
            Variant::Bool(value) => serde_json::Value::Bool(*value),
            Variant::Integer(value) => serde_json::Value::Number((*value).into()),
            Variant::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Variant::Array(items) => {
                serde_json::Value::Array(items.iter().map(Variant::to_json).collect())
            }
            Variant::Unrecognized(raw) => raw.clone(),
        }
    }
}
