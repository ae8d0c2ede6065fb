//! Change-data-capture pipeline from a document store into flat, schema-conformant
//! tables.
//!
//! Per-document change events are decoded from their tagged-variant representation,
//! flattened, projected onto per-entity schemas, and appended to staging buffers
//! ([`pipeline`]). A periodic reconciler converges the buffers into target tables
//! under last-writer-wins semantics, applies deletion tombstones, grooms fan-out
//! containers, and purges expired staged rows ([`reconcile`]).
//!
//! Design stance: the event path is write-only and absorbs every recoverable failure
//! into diagnostic sinks, so the change feed never sees a fatal error for a decodable
//! event. Correctness under out-of-order and duplicated delivery comes entirely from
//! the `updated_at` watermark carried by every staged row.

pub mod concurrency;
pub mod config;
pub mod conversions;
pub mod error;
pub mod fanout;
mod macros;
pub mod pipeline;
pub mod policy;
pub mod reconcile;
pub mod schema;
pub mod sinks;
pub mod store;
pub mod types;
