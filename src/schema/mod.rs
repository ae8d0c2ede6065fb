//! Entity schemas and the schema registry collaborator.
//!
//! An [`EntitySchema`] is an ordered list of `(name, type)` pairs per entity kind.
//! Field order is significant only for display; correctness depends on the field-name
//! set, which defines the projection boundary: any decoded field outside it is dropped
//! with a warning before a row is staged.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use crate::error::{ErrorKind, FlowResult};
use crate::flow_error;
use crate::types::row::{CREATED_AT_FIELD, DOC_ID_FIELD, UPDATED_AT_FIELD};

/// Target column type of a schema field.
///
/// Types are textual by design to tolerate drift across schema versions; the
/// distinction here only informs display and table DDL owned by external tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Boolean,
    Timestamp,
}

/// One `(name, type)` pair of an entity schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Shorthand for the common textual field case.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }
}

/// The target schema of one entity kind.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    entity: String,
    fields: Vec<FieldSchema>,
    names: HashSet<String>,
}

impl EntitySchema {
    /// Creates a schema from an ordered field list.
    ///
    /// The identity fields `doc_id`, `created_at`, and `updated_at` are always part of
    /// the field-name set, whether or not the caller lists them.
    pub fn new(entity: impl Into<String>, mut fields: Vec<FieldSchema>) -> Self {
        for (name, field_type) in [
            (DOC_ID_FIELD, FieldType::Text),
            (CREATED_AT_FIELD, FieldType::Timestamp),
            (UPDATED_AT_FIELD, FieldType::Timestamp),
        ] {
            if !fields.iter().any(|field| field.name == name) {
                fields.push(FieldSchema::new(name, field_type));
            }
        }

        let names = fields.iter().map(|field| field.name.clone()).collect();
        Self {
            entity: entity.into(),
            fields,
            names,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Iterates field names in schema order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    /// Returns `true` if `name` is part of the schema field-name set.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }
}

/// Trait for resolving entity schemas.
///
/// The registry is an external collaborator: loading and editing schemas is out of
/// scope here, only resolution is. Implementations should be cheap to clone and safe
/// to share across concurrent invocations.
pub trait SchemaRegistry {
    /// Returns the schema for `entity`, or an error if the entity kind is unknown.
    fn entity_schema(
        &self,
        entity: &str,
    ) -> impl Future<Output = FlowResult<Arc<EntitySchema>>> + Send;

    /// Returns all known entity kinds, in registration order.
    fn entities(&self) -> impl Future<Output = FlowResult<Vec<String>>> + Send;
}

/// Immutable in-memory schema registry, loaded once at process start.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaRegistry {
    schemas: HashMap<String, Arc<EntitySchema>>,
    order: Vec<String>,
}

impl StaticSchemaRegistry {
    pub fn new(schemas: Vec<EntitySchema>) -> Self {
        let order = schemas
            .iter()
            .map(|schema| schema.entity().to_string())
            .collect();
        let schemas = schemas
            .into_iter()
            .map(|schema| (schema.entity().to_string(), Arc::new(schema)))
            .collect();

        Self { schemas, order }
    }
}

impl SchemaRegistry for StaticSchemaRegistry {
    async fn entity_schema(&self, entity: &str) -> FlowResult<Arc<EntitySchema>> {
        self.schemas.get(entity).cloned().ok_or_else(|| {
            flow_error!(
                ErrorKind::MissingEntitySchema,
                "Entity kind not found in the schema registry",
                format!("No schema is registered for entity `{entity}`")
            )
        })
    }

    async fn entities(&self) -> FlowResult<Vec<String>> {
        Ok(self.order.clone())
    }
}
