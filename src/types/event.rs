//! Inbound change events from the document store's change feed.
//!
//! The transport layer decodes the wire envelope and hands the pipeline a typed
//! [`ChangeEvent`]. Absence of [`ChangeEvent::value`] signals document deletion.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::variant::Variant;

/// A point-in-time view of a document carried by a change event.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Fully qualified document name; the last two path segments are the entity kind
    /// and the document id.
    pub name: String,
    /// Top-level field map of the document.
    pub fields: BTreeMap<String, Variant>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// The set of top-level field paths changed by an update event.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMask {
    pub field_paths: Vec<String>,
}

/// One per-document write event observed on the change feed.
///
/// Events for the same document may arrive out of order and duplicated across
/// invocations; no ordering is assumed here. Convergence comes from the reconciler's
/// last-writer-wins rule, not from arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// The document state after the write. `None` signals deletion.
    pub value: Option<DocumentSnapshot>,
    /// The document state before the write, when the feed provides it.
    pub old_value: Option<DocumentSnapshot>,
    /// Changed top-level field paths, present on updates.
    pub update_mask: Option<UpdateMask>,
}

/// Error raised when a document name cannot be split into entity kind and document id.
#[derive(Debug, Error)]
pub enum ParseDocumentPathError {
    #[error("document name has fewer than two path segments: `{0}`")]
    TooFewSegments(String),
    #[error("document name has an empty entity or id segment: `{0}`")]
    EmptySegment(String),
}

/// The identity extracted from a document name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPath {
    pub entity_kind: String,
    pub doc_id: String,
}

/// Splits a fully qualified document name into its entity kind and document id.
///
/// The entity kind and document id are the last two `/`-separated segments, matching
/// the document store's `.../<collection>/<document>` naming scheme.
pub fn parse_document_path(name: &str) -> Result<DocumentPath, ParseDocumentPathError> {
    let mut segments = name.rsplit('/');
    let doc_id = segments
        .next()
        .ok_or_else(|| ParseDocumentPathError::TooFewSegments(name.to_string()))?;
    let entity_kind = segments
        .next()
        .ok_or_else(|| ParseDocumentPathError::TooFewSegments(name.to_string()))?;

    if entity_kind.is_empty() || doc_id.is_empty() {
        return Err(ParseDocumentPathError::EmptySegment(name.to_string()));
    }

    Ok(DocumentPath {
        entity_kind: entity_kind.to_string(),
        doc_id: doc_id.to_string(),
    })
}

impl ChangeEvent {
    /// Returns `true` if this event signals a document deletion.
    pub fn is_deletion(&self) -> bool {
        self.value.is_none()
    }

    /// Returns the snapshot naming the document, preferring the post-write state.
    pub fn snapshot(&self) -> Option<&DocumentSnapshot> {
        self.value.as_ref().or(self.old_value.as_ref())
    }
}
