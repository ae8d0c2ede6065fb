//! One-to-many expansion of box documents into tube-level rows.
//!
//! A box document holds a fixed number of named bag slots; each populated slot carries
//! an ordered list of tube identifiers plus a few bag-level attributes. One box
//! document therefore becomes zero or more item rows in the target table, one per tube
//! across all populated slots, each replicating the box-level common fields.

use std::collections::BTreeMap;

use crate::conversions::decode::{DecodeWarning, DecodedValue, NestedFields};
use crate::types::row::{FieldValue, Row};

/// Entity kind whose documents fan out into item rows.
pub const BOX_ENTITY: &str = "boxes";

/// The fixed bag slot names of a box document.
pub const BAG_SLOTS: [&str; 4] = ["bag_1", "bag_2", "bag_3", "bag_4"];

/// Bag type indicator fields, checked in priority order.
///
/// The data model guarantees at most one is ever populated; the priority order is a
/// defensive tie-break, not a business rule.
const BAG_TYPE_PRIORITY: [&str; 3] = ["specimen_type", "assay_type", "control_type"];

const TUBES_FIELD: &str = "tubes";
const BAG_ID_FIELD: &str = "bag_id";
const CARRIER_FIELD: &str = "carrier";
const SHIPPED_AT_FIELD: &str = "shipped_at";
const BAG_TYPE_FIELD: &str = "bag_type";

/// Field of an item row naming the tube; part of the item identity.
pub const TUBE_ID_FIELD: &str = "tube_id";

/// Field of the box document naming the owning site; part of the container identity.
pub const SITE_ID_FIELD: &str = "site_id";

/// Separator used in composite reconciliation keys.
const KEY_SEPARATOR: char = '|';

/// Builds the reconciliation key of one item row: `box|site|tube`.
pub fn item_key(doc_id: &str, site_id: &str, tube_id: &str) -> String {
    format!("{doc_id}{KEY_SEPARATOR}{site_id}{KEY_SEPARATOR}{tube_id}")
}

/// Builds the container identity key: `box|site`.
pub fn container_key(doc_id: &str, site_id: &str) -> String {
    format!("{doc_id}{KEY_SEPARATOR}{site_id}")
}

/// Extracts the container identity from an item key.
pub fn container_key_of(item_key: &str) -> Option<String> {
    let mut segments = item_key.split(KEY_SEPARATOR);
    let doc_id = segments.next()?;
    let site_id = segments.next()?;
    segments.next()?;
    Some(container_key(doc_id, site_id))
}

/// Returns `true` if `key` identifies an item belonging to the box document `doc_id`,
/// regardless of site.
pub fn item_belongs_to_box(key: &str, doc_id: &str) -> bool {
    key.split(KEY_SEPARATOR).next() == Some(doc_id)
}

/// Expands a decoded box document into one flat row per tube identifier.
///
/// Box-level scalar fields are replicated verbatim into every item row; each row
/// additionally carries the owning bag's resolved type, identifier, auxiliary fields,
/// and the tube identifier. A box with no populated bag slots yields zero rows and is
/// a no-op, not an error.
pub fn expand_box(decoded: &NestedFields) -> (Vec<Row>, Vec<DecodeWarning>) {
    let mut warnings = Vec::new();

    let mut common: Vec<(String, FieldValue)> = Vec::new();
    for (name, value) in decoded {
        if BAG_SLOTS.contains(&name.as_str()) {
            continue;
        }
        match value.to_field_value() {
            Some(field_value) => common.push((name.clone(), field_value)),
            None => warnings.push(DecodeWarning {
                path: name.clone(),
                message: "non-scalar box-level field skipped during fan-out".to_string(),
                payload: decoded_value_to_json(value),
            }),
        }
    }

    let mut rows = Vec::new();
    for slot in BAG_SLOTS {
        let Some(DecodedValue::Map(bag)) = decoded.get(slot) else {
            continue;
        };

        let tubes = bag_tube_ids(slot, bag, &mut warnings);
        if tubes.is_empty() {
            continue;
        }

        let bag_type = BAG_TYPE_PRIORITY
            .iter()
            .find_map(|indicator| bag.get(*indicator).and_then(DecodedValue::as_str));

        for tube_id in tubes {
            let mut row: Row = common.iter().cloned().collect();
            if let Some(bag_type) = bag_type {
                row.insert(BAG_TYPE_FIELD, FieldValue::String(bag_type.to_string()));
            }
            for attribute in [BAG_ID_FIELD, CARRIER_FIELD, SHIPPED_AT_FIELD] {
                if let Some(value) = bag.get(attribute).and_then(DecodedValue::to_field_value) {
                    row.insert(attribute, value);
                }
            }
            row.insert(TUBE_ID_FIELD, FieldValue::String(tube_id.clone()));
            rows.push(row);
        }
    }

    (rows, warnings)
}

/// Collects the ordered tube identifiers of one bag slot.
fn bag_tube_ids(
    slot: &str,
    bag: &BTreeMap<String, DecodedValue>,
    warnings: &mut Vec<DecodeWarning>,
) -> Vec<String> {
    let Some(value) = bag.get(TUBES_FIELD) else {
        return Vec::new();
    };
    let DecodedValue::List(elements) = value else {
        warnings.push(DecodeWarning {
            path: format!("{slot}_{TUBES_FIELD}"),
            message: "bag tube list has an unexpected shape".to_string(),
            payload: decoded_value_to_json(value),
        });
        return Vec::new();
    };

    elements
        .iter()
        .filter_map(|element| match element {
            DecodedValue::String(tube_id) => Some(tube_id.clone()),
            other => {
                warnings.push(DecodeWarning {
                    path: format!("{slot}_{TUBES_FIELD}"),
                    message: "non-textual tube identifier skipped".to_string(),
                    payload: decoded_value_to_json(other),
                });
                None
            }
        })
        .collect()
}

/// Renders a decoded value as JSON for warning payloads.
fn decoded_value_to_json(value: &DecodedValue) -> serde_json::Value {
    match value {
        DecodedValue::String(value) => serde_json::Value::String(value.clone()),
        DecodedValue::Bool(value) => serde_json::Value::Bool(*value),
        DecodedValue::List(elements) => {
            serde_json::Value::Array(elements.iter().map(decoded_value_to_json).collect())
        }
        DecodedValue::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), decoded_value_to_json(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested(entries: Vec<(&str, DecodedValue)>) -> NestedFields {
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }

    fn bag(tubes: Vec<&str>, extra: Vec<(&str, DecodedValue)>) -> DecodedValue {
        let mut entries: BTreeMap<String, DecodedValue> = extra
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        entries.insert(
            TUBES_FIELD.to_string(),
            DecodedValue::List(
                tubes
                    .into_iter()
                    .map(|tube| DecodedValue::String(tube.to_string()))
                    .collect(),
            ),
        );
        DecodedValue::Map(entries)
    }

    #[test]
    fn test_empty_box_yields_zero_rows() {
        let decoded = nested(vec![(
            "site_id",
            DecodedValue::String("site-1".to_string()),
        )]);

        let (rows, warnings) = expand_box(&decoded);

        assert!(rows.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_two_bags_two_tubes_each_yield_four_rows() {
        let decoded = nested(vec![
            ("site_id", DecodedValue::String("site-1".to_string())),
            ("rack", DecodedValue::String("r-7".to_string())),
            (
                "bag_1",
                bag(
                    vec!["t-1", "t-2"],
                    vec![
                        ("bag_id", DecodedValue::String("b-1".to_string())),
                        ("specimen_type", DecodedValue::String("serum".to_string())),
                    ],
                ),
            ),
            (
                "bag_2",
                bag(
                    vec!["t-3", "t-4"],
                    vec![
                        ("bag_id", DecodedValue::String("b-2".to_string())),
                        ("control_type", DecodedValue::String("blank".to_string())),
                        ("carrier", DecodedValue::String("drone".to_string())),
                    ],
                ),
            ),
        ]);

        let (rows, warnings) = expand_box(&decoded);

        assert!(warnings.is_empty());
        assert_eq!(rows.len(), 4);

        // Every row replicates the box-level common fields verbatim.
        for row in &rows {
            assert_eq!(row.get("site_id"), Some(&FieldValue::from("site-1")));
            assert_eq!(row.get("rack"), Some(&FieldValue::from("r-7")));
        }

        assert_eq!(rows[0].get("tube_id"), Some(&FieldValue::from("t-1")));
        assert_eq!(rows[0].get("bag_id"), Some(&FieldValue::from("b-1")));
        assert_eq!(rows[0].get("bag_type"), Some(&FieldValue::from("serum")));
        assert!(!rows[0].contains("carrier"));

        assert_eq!(rows[3].get("tube_id"), Some(&FieldValue::from("t-4")));
        assert_eq!(rows[3].get("bag_id"), Some(&FieldValue::from("b-2")));
        assert_eq!(rows[3].get("bag_type"), Some(&FieldValue::from("blank")));
        assert_eq!(rows[3].get("carrier"), Some(&FieldValue::from("drone")));
    }

    #[test]
    fn test_bag_type_priority_order() {
        let decoded = nested(vec![(
            "bag_1",
            bag(
                vec!["t-1"],
                vec![
                    ("control_type", DecodedValue::String("blank".to_string())),
                    ("specimen_type", DecodedValue::String("serum".to_string())),
                ],
            ),
        )]);

        let (rows, _) = expand_box(&decoded);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("bag_type"), Some(&FieldValue::from("serum")));
    }

    #[test]
    fn test_bag_without_tubes_is_skipped() {
        let decoded = nested(vec![(
            "bag_1",
            DecodedValue::Map(
                [(
                    "bag_id".to_string(),
                    DecodedValue::String("b-1".to_string()),
                )]
                .into_iter()
                .collect(),
            ),
        )]);

        let (rows, warnings) = expand_box(&decoded);

        assert!(rows.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_non_scalar_common_field_warned() {
        let decoded = nested(vec![
            (
                "history",
                DecodedValue::List(vec![DecodedValue::String("old".to_string())]),
            ),
            ("bag_1", bag(vec!["t-1"], vec![])),
        ]);

        let (rows, warnings) = expand_box(&decoded);

        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains("history"));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, "history");
    }

    #[test]
    fn test_item_and_container_keys() {
        let key = item_key("box-1", "site-9", "t-3");

        assert_eq!(key, "box-1|site-9|t-3");
        assert_eq!(container_key_of(&key), Some("box-1|site-9".to_string()));
        assert!(item_belongs_to_box(&key, "box-1"));
        assert!(!item_belongs_to_box(&key, "box-2"));
        assert!(container_key_of("box-1|site-9").is_none());
    }
}
