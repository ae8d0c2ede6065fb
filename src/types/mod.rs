//! Core data types flowing through the pipeline.

pub mod event;
pub mod row;
pub mod variant;

pub use event::{ChangeEvent, DocumentPath, DocumentSnapshot, UpdateMask, parse_document_path};
pub use row::{
    CREATED_AT_FIELD, DOC_ID_FIELD, FieldValue, Row, StagedPayload, StagedRow, UPDATED_AT_FIELD,
};
pub use variant::Variant;
