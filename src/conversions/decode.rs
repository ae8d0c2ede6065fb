//! Iterative decoding and flattening of tagged-variant field trees.
//!
//! The decoder walks a document's field map with an explicit work list, never native
//! recursion, so decoding depth is bounded by memory rather than call-stack depth.
//! Two output modes share the decode core: flattened mode emits a single-level row
//! with underscore-joined path keys, nested mode rebuilds a tree mirroring the input
//! structure for consumers that inspect sub-structure later (fan-out, log payloads).
//!
//! Anomalies are never fatal: the offending field is dropped and a [`DecodeWarning`]
//! is accumulated alongside the result, so one bad field cannot abort a document.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::policy::Policies;
use crate::types::row::{FieldValue, Row};
use crate::types::variant::Variant;

/// Sentinel key denoting a known upstream data-quality defect, never stored.
const UNDEFINED_KEY: &str = "undefined";

/// A non-fatal anomaly observed while decoding one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeWarning {
    /// Underscore-joined path of the offending field; empty for document-level warnings.
    pub path: String,
    pub message: String,
    /// Raw payload for manual inspection, rendered as JSON.
    pub payload: serde_json::Value,
}

impl DecodeWarning {
    fn new(path: impl Into<String>, message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            payload,
        }
    }
}

/// A decoded value in nested mode.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    String(String),
    Bool(bool),
    List(Vec<DecodedValue>),
    Map(BTreeMap<String, DecodedValue>),
}

impl DecodedValue {
    /// Returns the textual content for string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DecodedValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Converts a scalar decoded value into a row cell.
    pub fn to_field_value(&self) -> Option<FieldValue> {
        match self {
            DecodedValue::String(value) => Some(FieldValue::String(value.clone())),
            DecodedValue::Bool(value) => Some(FieldValue::Bool(*value)),
            DecodedValue::List(_) | DecodedValue::Map(_) => None,
        }
    }
}

/// Nested-mode decode output: the rebuilt top-level field map.
pub type NestedFields = BTreeMap<String, DecodedValue>;

/// Sanitizes a map key for use as (part of) a column identifier.
///
/// A key beginning with a digit gains a `d_` prefix at every nesting depth, in both
/// modes. Flattened mode additionally rewrites literal `.` to `_`, since flattened
/// keys must be valid column identifiers.
fn sanitize_key(key: &str, flattened: bool) -> String {
    let mut sanitized = if key.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("d_{key}")
    } else {
        key.to_string()
    };

    if flattened {
        sanitized = sanitized.replace('.', "_");
    }

    sanitized
}

/// Joins a path segment onto an underscore-joined path.
fn join_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}_{segment}")
    }
}

/// Converts a scalar variant into a row cell. Integers are stringified in decimal so
/// that no native numbers survive into rows.
fn scalar_to_field_value(variant: &Variant) -> Option<FieldValue> {
    match variant {
        Variant::String(value) => Some(FieldValue::String(value.clone())),
        Variant::Bool(value) => Some(FieldValue::Bool(*value)),
        Variant::Integer(value) => Some(FieldValue::String(value.to_string())),
        _ => None,
    }
}

/// Returns a scalar variant's textual form for multi-select membership tests.
fn scalar_option_text(variant: &Variant) -> Option<String> {
    match variant {
        Variant::String(value) => Some(value.clone()),
        Variant::Bool(value) => Some(value.to_string()),
        Variant::Integer(value) => Some(value.to_string()),
        _ => None,
    }
}

/// Filters and sanitizes the entries of one map level into a work queue.
///
/// Applies the `undefined` sentinel rule and the ignore policy: the top-level ignore
/// set only at the document root, the nested ignore set at any depth.
fn filter_map_entries<'a>(
    entity: &str,
    entries: &'a BTreeMap<String, Variant>,
    policies: &Policies,
    flattened: bool,
    top_level: bool,
    parent_path: &str,
    warnings: &mut Vec<DecodeWarning>,
) -> VecDeque<(String, &'a Variant)> {
    let mut queue = VecDeque::with_capacity(entries.len());

    for (key, variant) in entries {
        if key == UNDEFINED_KEY {
            warnings.push(DecodeWarning::new(
                join_path(parent_path, key),
                "field with sentinel key `undefined` dropped",
                variant.to_json(),
            ));
            continue;
        }

        if top_level && policies.ignore.is_top_level_ignored(entity, key) {
            continue;
        }
        if policies.ignore.is_nested_ignored(entity, key) {
            continue;
        }

        queue.push_back((sanitize_key(key, flattened), variant));
    }

    queue
}

/// Expands a multi-select array into one `"1"`/`"0"` flag per known option.
///
/// Scalar elements are collected into a set and compared against the catalog's option
/// list; non-scalar elements are skipped with a warning. Flags come back in catalog
/// order as `(key, value)` pairs to be keyed under `base_option` by the caller.
fn one_hot_flags(
    base: &str,
    path: &str,
    options: &[String],
    items: &[Variant],
    flattened: bool,
    warnings: &mut Vec<DecodeWarning>,
) -> Vec<(String, String)> {
    let mut selected = HashSet::new();
    for (index, item) in items.iter().enumerate() {
        match scalar_option_text(item) {
            Some(text) => {
                selected.insert(text);
            }
            None => warnings.push(DecodeWarning::new(
                join_path(path, &index.to_string()),
                "non-scalar element in multi-select array skipped",
                item.to_json(),
            )),
        }
    }

    options
        .iter()
        .map(|option| {
            let flag = if selected.contains(option) { "1" } else { "0" };
            let key = join_path(base, &sanitize_key(option, flattened));
            (key, flag.to_string())
        })
        .collect()
}

/// Decodes a document's field map into a single-level row.
///
/// Each leaf's key is the underscore-joined, sanitized path from the document root.
/// Arrays at cataloged paths expand one-hot; un-cataloged arrays of scalars cannot
/// occupy a single flat column and are dropped with a warning, while arrays holding
/// maps or arrays are walked with the zero-based element index as a path segment.
pub fn decode_flattened(
    entity: &str,
    fields: &BTreeMap<String, Variant>,
    policies: &Policies,
) -> (Row, Vec<DecodeWarning>) {
    let mut warnings = Vec::new();
    let mut out = Row::new();

    // Work list of (path, variant) pairs; explicit so nesting depth is unbounded.
    let mut work: VecDeque<(String, &Variant)> =
        filter_map_entries(entity, fields, policies, true, true, "", &mut warnings)
            .into_iter()
            .map(|(key, variant)| (key, variant))
            .collect();

    while let Some((path, variant)) = work.pop_front() {
        match variant {
            Variant::Null => {}
            Variant::String(_) | Variant::Bool(_) => {
                let key = if policies.mixed_type.contains(entity, &path) {
                    format!("{path}_string")
                } else {
                    path
                };
                if let Some(value) = scalar_to_field_value(variant) {
                    out.insert(key, value);
                }
            }
            Variant::Integer(value) => {
                out.insert(path, FieldValue::String(value.to_string()));
            }
            Variant::Map(entries) => {
                let children =
                    filter_map_entries(entity, entries, policies, true, false, &path, &mut warnings);
                for (key, child) in children {
                    work.push_back((join_path(&path, &key), child));
                }
            }
            Variant::Array(items) => {
                if items.is_empty() {
                    // The target schema has no representation for a typed empty column.
                    continue;
                }

                if let Some(options) = policies.multi_select.options(entity, &path) {
                    for (key, flag) in
                        one_hot_flags(&path, &path, options, items, true, &mut warnings)
                    {
                        out.insert(key, FieldValue::String(flag));
                    }
                } else if items.iter().all(|item| item.is_scalar() || *item == Variant::Null) {
                    warnings.push(DecodeWarning::new(
                        path,
                        "un-cataloged array cannot be represented as a flat column",
                        Variant::Array(items.clone()).to_json(),
                    ));
                } else {
                    for (index, item) in items.iter().enumerate() {
                        work.push_back((join_path(&path, &index.to_string()), item));
                    }
                }
            }
            Variant::Unrecognized(raw) => {
                warnings.push(DecodeWarning::new(
                    path,
                    "unrecognized variant shape dropped",
                    raw.clone(),
                ));
            }
        }
    }

    (out, warnings)
}

/// One in-flight map level of the nested-mode traversal.
struct Frame<'a> {
    /// Key of this map in its parent; empty for the root frame.
    key: String,
    /// Underscore-joined path from the root, used for catalog lookups and warnings.
    path: String,
    queue: VecDeque<(String, &'a Variant)>,
    out: NestedFields,
}

/// Decodes a document's field map into a tree mirroring the input structure.
///
/// Shares the decode core with [`decode_flattened`] but rebuilds maps instead of
/// joining paths, so consumers that need sub-structure (the fan-out transformer, log
/// payloads) can still see it. Un-cataloged arrays are recovered as ordered lists of
/// their decoded scalar elements.
pub fn decode_nested(
    entity: &str,
    fields: &BTreeMap<String, Variant>,
    policies: &Policies,
) -> (NestedFields, Vec<DecodeWarning>) {
    let mut warnings = Vec::new();

    let root_queue = filter_map_entries(entity, fields, policies, false, true, "", &mut warnings);
    // Explicit frame stack instead of recursion; one frame per open map level.
    let mut stack = vec![Frame {
        key: String::new(),
        path: String::new(),
        queue: root_queue,
        out: BTreeMap::new(),
    }];

    loop {
        let next = stack
            .last_mut()
            .expect("frame stack never empties before the root frame returns")
            .queue
            .pop_front();

        let Some((key, variant)) = next else {
            let frame = stack.pop().expect("frame stack is non-empty");
            let Some(parent) = stack.last_mut() else {
                return (frame.out, warnings);
            };
            // Maps left empty after filtering are dropped, mirroring empty arrays.
            if !frame.out.is_empty() {
                parent.out.insert(frame.key, DecodedValue::Map(frame.out));
            }
            continue;
        };

        let parent_path = stack.last().expect("frame stack is non-empty").path.clone();
        let path = join_path(&parent_path, &key);

        match variant {
            Variant::Null => {}
            Variant::String(value) => {
                let current = stack.last_mut().expect("frame stack is non-empty");
                current.out.insert(key, DecodedValue::String(value.clone()));
            }
            Variant::Bool(value) => {
                let current = stack.last_mut().expect("frame stack is non-empty");
                current.out.insert(key, DecodedValue::Bool(*value));
            }
            Variant::Integer(value) => {
                let current = stack.last_mut().expect("frame stack is non-empty");
                current
                    .out
                    .insert(key, DecodedValue::String(value.to_string()));
            }
            Variant::Map(entries) => {
                let queue =
                    filter_map_entries(entity, entries, policies, false, false, &path, &mut warnings);
                stack.push(Frame {
                    key,
                    path,
                    queue,
                    out: BTreeMap::new(),
                });
            }
            Variant::Array(items) => {
                if items.is_empty() {
                    continue;
                }

                if let Some(options) = policies.multi_select.options(entity, &path) {
                    let flags = one_hot_flags(&key, &path, options, items, false, &mut warnings);
                    let current = stack.last_mut().expect("frame stack is non-empty");
                    for (flag_key, flag) in flags {
                        current.out.insert(flag_key, DecodedValue::String(flag));
                    }
                } else {
                    let mut elements = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        match item {
                            Variant::Null => {}
                            Variant::String(value) => {
                                elements.push(DecodedValue::String(value.clone()))
                            }
                            Variant::Bool(value) => elements.push(DecodedValue::Bool(*value)),
                            Variant::Integer(value) => {
                                elements.push(DecodedValue::String(value.to_string()))
                            }
                            other => warnings.push(DecodeWarning::new(
                                join_path(&path, &index.to_string()),
                                "non-scalar element in un-cataloged array skipped",
                                other.to_json(),
                            )),
                        }
                    }
                    if !elements.is_empty() {
                        let current = stack.last_mut().expect("frame stack is non-empty");
                        current.out.insert(key, DecodedValue::List(elements));
                    }
                }
            }
            Variant::Unrecognized(raw) => {
                warnings.push(DecodeWarning::new(
                    path,
                    "unrecognized variant shape dropped",
                    raw.clone(),
                ));
            }
        }
    }
}
