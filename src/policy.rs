//! Static decode policy tables.
//!
//! These tables are immutable configuration loaded once at process start and passed
//! explicitly into the decoder and pipeline rather than referenced as ambient global
//! state, so unit tests can substitute their own tables deterministically.

use std::collections::{HashMap, HashSet};

/// Per-entity field filtering applied during decoding.
///
/// *Top-level ignored* fields are never decoded from the document root; *nested
/// ignored* fields are dropped wherever they appear, at any depth. Matching happens on
/// the raw document key, before sanitization.
#[derive(Debug, Clone, Default)]
pub struct IgnorePolicy {
    top_level: HashMap<String, HashSet<String>>,
    nested: HashMap<String, HashSet<String>>,
}

impl IgnorePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top_level<I, S>(mut self, entity: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.top_level
            .entry(entity.to_string())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_nested<I, S>(mut self, entity: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nested
            .entry(entity.to_string())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn is_top_level_ignored(&self, entity: &str, field: &str) -> bool {
        self.top_level
            .get(entity)
            .is_some_and(|fields| fields.contains(field))
    }

    pub fn is_nested_ignored(&self, entity: &str, field: &str) -> bool {
        self.nested
            .get(entity)
            .is_some_and(|fields| fields.contains(field))
    }

    /// Size of the entity's top-level ignore set, used by the update-mask churn check.
    pub fn top_level_len(&self, entity: &str) -> usize {
        self.top_level.get(entity).map_or(0, HashSet::len)
    }
}

/// Known options of multi-select fields, keyed by `(entity, path)`.
///
/// An array at a cataloged path is expanded one-hot: one `"1"`/`"0"` flag field per
/// known option, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct MultiSelectCatalog {
    options: HashMap<(String, String), Vec<String>>,
}

impl MultiSelectCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options<I, S>(mut self, entity: &str, path: &str, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.insert(
            (entity.to_string(), path.to_string()),
            options.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Returns the ordered option list for `(entity, path)`, if the path is cataloged.
    pub fn options(&self, entity: &str, path: &str) -> Option<&[String]> {
        self.options
            .get(&(entity.to_string(), path.to_string()))
            .map(Vec::as_slice)
    }
}

/// Field paths historically polymorphic between scalar and object.
///
/// A scalar at a cataloged path gets a `_string` key suffix in flattened mode so it
/// cannot collide with the expanded sub-fields of the object variant.
#[derive(Debug, Clone, Default)]
pub struct MixedTypeCatalog {
    paths: HashMap<String, HashSet<String>>,
}

impl MixedTypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths<I, S>(mut self, entity: &str, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths
            .entry(entity.to_string())
            .or_default()
            .extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn contains(&self, entity: &str, path: &str) -> bool {
        self.paths
            .get(entity)
            .is_some_and(|paths| paths.contains(path))
    }
}

/// Bundle of all decode policy tables, passed as one unit into the decoder.
#[derive(Debug, Clone, Default)]
pub struct Policies {
    pub ignore: IgnorePolicy,
    pub multi_select: MultiSelectCatalog,
    pub mixed_type: MixedTypeCatalog,
}
