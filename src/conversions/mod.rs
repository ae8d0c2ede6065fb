//! Conversion of tagged-variant documents into schema-conformant rows.

pub mod decode;
pub mod project;

pub use decode::{DecodeWarning, DecodedValue, NestedFields, decode_flattened, decode_nested};
pub use project::project_row;
