//! Store traits for the staging buffer and the authoritative target tables.
//!
//! Both stores are owned by the storage backend's own transactional semantics: the
//! design relies on statement-level atomicity of each merge or delete call, never on
//! cross-statement transactions or in-process locking. Reconciliation queries are
//! templated, which is why the traits expose fixed operations rather than a query
//! surface.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;

use crate::error::FlowResult;
use crate::types::row::StagedRow;

/// Trait for the append-only per-entity staging buffer.
///
/// Staged rows are immutable once appended and consumed read-only by the reconciler.
/// Implementations must tolerate duplicate appends for the same document, since
/// upstream delivery is at-least-once.
pub trait BufferStore {
    /// Appends one staged row (or tombstone) to the entity's buffer.
    fn append_staged_row(
        &self,
        entity: &str,
        staged: StagedRow,
    ) -> impl Future<Output = FlowResult<()>> + Send;

    /// Returns the latest staged row per reconciliation key for the entity.
    ///
    /// "Latest" is decided by the `updated_at` watermark; among equal watermarks the
    /// later-appended row wins, which keeps re-reads of an unchanged buffer stable.
    fn latest_staged_rows(
        &self,
        entity: &str,
    ) -> impl Future<Output = FlowResult<Vec<StagedRow>>> + Send;

    /// Deletes staged rows whose watermark is older than `older_than`, merged or not.
    ///
    /// Returns the number of rows purged. This bounds buffer growth and is what makes
    /// the buffer an at-most-once-within-window guarantee.
    fn purge_staged_rows(
        &self,
        entity: &str,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = FlowResult<u64>> + Send;
}

/// Trait for the authoritative target tables, written only by the reconciler.
pub trait TargetStore {
    /// Merges staged upserts into the entity's target table with last-writer-wins
    /// semantics: a row replaces the stored one only if its `updated_at` watermark is
    /// strictly newer. Tombstones in `rows` are ignored. Returns the number of rows
    /// inserted or replaced.
    fn merge_rows(
        &self,
        entity: &str,
        rows: Vec<StagedRow>,
    ) -> impl Future<Output = FlowResult<u64>> + Send;

    /// Deletes the target rows with the given reconciliation keys, applying
    /// tombstones. Missing keys are not an error. Returns the number of rows removed.
    fn delete_rows(
        &self,
        entity: &str,
        keys: Vec<String>,
    ) -> impl Future<Output = FlowResult<u64>> + Send;

    /// Deletes item rows of `container` whose key is not in `keep` ("moved out of
    /// container"). Only meaningful for the fan-out entity. Returns the number of
    /// rows removed.
    fn delete_items_not_in(
        &self,
        entity: &str,
        container: &str,
        keep: &HashSet<String>,
    ) -> impl Future<Output = FlowResult<u64>> + Send;

    /// Deletes every item row belonging to the box document `doc_id`, across all
    /// sites; used to cascade a container deletion. Returns the number of rows
    /// removed.
    fn delete_box_items(
        &self,
        entity: &str,
        doc_id: &str,
    ) -> impl Future<Output = FlowResult<u64>> + Send;
}
