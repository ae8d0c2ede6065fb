//! In-memory implementation of the buffer and target stores.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::FlowResult;
use crate::fanout::{container_key_of, item_belongs_to_box};
use crate::store::base::{BufferStore, TargetStore};
use crate::types::row::{Row, StagedRow};

/// One converged row in a target table.
#[derive(Debug, Clone)]
struct TargetEntry {
    updated_at: DateTime<Utc>,
    row: Row,
}

/// Inner state of [`MemoryStore`].
#[derive(Debug, Default)]
struct Inner {
    /// Append-only staging buffers per entity, in append order.
    staged: HashMap<String, Vec<StagedRow>>,
    /// Converged target tables per entity, keyed by reconciliation key.
    target: HashMap<String, BTreeMap<String, TargetEntry>>,
}

/// In-memory storage implementing both [`BufferStore`] and [`TargetStore`].
///
/// [`MemoryStore`] keeps all staged and converged data in memory, making it ideal for
/// testing the pipeline and reconciler, debugging convergence behavior, and
/// development workflows. All data is lost when the process terminates. Every method
/// mutates under a single lock, which models the statement-level atomicity the design
/// expects from a real backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows currently staged for `entity`.
    pub async fn staged_len(&self, entity: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.staged.get(entity).map_or(0, Vec::len)
    }

    /// Returns a copy of the converged target rows for `entity`, in key order.
    ///
    /// This method is useful for testing and verification of reconciliation behavior.
    pub async fn target_rows(&self, entity: &str) -> Vec<Row> {
        let inner = self.inner.lock().await;
        inner
            .target
            .get(entity)
            .map(|table| table.values().map(|entry| entry.row.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the converged target row stored under `key`, if any.
    pub async fn target_row(&self, entity: &str, key: &str) -> Option<Row> {
        let inner = self.inner.lock().await;
        inner
            .target
            .get(entity)
            .and_then(|table| table.get(key))
            .map(|entry| entry.row.clone())
    }
}

impl BufferStore for MemoryStore {
    async fn append_staged_row(&self, entity: &str, staged: StagedRow) -> FlowResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .staged
            .entry(entity.to_string())
            .or_default()
            .push(staged);

        Ok(())
    }

    async fn latest_staged_rows(&self, entity: &str) -> FlowResult<Vec<StagedRow>> {
        let inner = self.inner.lock().await;

        let mut latest: BTreeMap<&str, &StagedRow> = BTreeMap::new();
        for staged in inner.staged.get(entity).into_iter().flatten() {
            // `>=` so that among equal watermarks the later-appended row wins.
            let replace = match latest.get(staged.key.as_str()) {
                Some(current) => staged.updated_at >= current.updated_at,
                None => true,
            };
            if replace {
                latest.insert(&staged.key, staged);
            }
        }

        Ok(latest.into_values().cloned().collect())
    }

    async fn purge_staged_rows(&self, entity: &str, older_than: DateTime<Utc>) -> FlowResult<u64> {
        let mut inner = self.inner.lock().await;

        let Some(staged) = inner.staged.get_mut(entity) else {
            return Ok(0);
        };
        let before = staged.len();
        staged.retain(|row| row.updated_at >= older_than);

        Ok((before - staged.len()) as u64)
    }
}

impl TargetStore for MemoryStore {
    async fn merge_rows(&self, entity: &str, rows: Vec<StagedRow>) -> FlowResult<u64> {
        let mut inner = self.inner.lock().await;
        let table = inner.target.entry(entity.to_string()).or_default();

        let mut merged = 0u64;
        for staged in rows {
            let Some(row) = staged.row() else {
                continue;
            };
            let newer = table
                .get(&staged.key)
                .is_none_or(|entry| staged.updated_at > entry.updated_at);
            if newer {
                table.insert(
                    staged.key.clone(),
                    TargetEntry {
                        updated_at: staged.updated_at,
                        row: row.clone(),
                    },
                );
                merged += 1;
            }
        }

        info!(entity, merged, "merged staged rows into target table");

        Ok(merged)
    }

    async fn delete_rows(&self, entity: &str, keys: Vec<String>) -> FlowResult<u64> {
        let mut inner = self.inner.lock().await;
        let Some(table) = inner.target.get_mut(entity) else {
            return Ok(0);
        };

        let mut deleted = 0u64;
        for key in keys {
            if table.remove(&key).is_some() {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    async fn delete_items_not_in(
        &self,
        entity: &str,
        container: &str,
        keep: &HashSet<String>,
    ) -> FlowResult<u64> {
        let mut inner = self.inner.lock().await;
        let Some(table) = inner.target.get_mut(entity) else {
            return Ok(0);
        };

        let before = table.len();
        table.retain(|key, _| {
            container_key_of(key).as_deref() != Some(container) || keep.contains(key)
        });

        Ok((before - table.len()) as u64)
    }

    async fn delete_box_items(&self, entity: &str, doc_id: &str) -> FlowResult<u64> {
        let mut inner = self.inner.lock().await;
        let Some(table) = inner.target.get_mut(entity) else {
            return Ok(0);
        };

        let before = table.len();
        table.retain(|key, _| !item_belongs_to_box(key, doc_id));

        Ok((before - table.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::item_key;
    use crate::types::row::{FieldValue, StagedPayload};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn row(status: &str) -> Row {
        [("status".to_string(), FieldValue::from(status))]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_latest_staged_rows_picks_newest_watermark() {
        let store = MemoryStore::new();
        store
            .append_staged_row("samples", StagedRow::upsert("x", "x", at(2), row("new")))
            .await
            .unwrap();
        store
            .append_staged_row("samples", StagedRow::upsert("x", "x", at(1), row("old")))
            .await
            .unwrap();

        let latest = store.latest_staged_rows("samples").await.unwrap();

        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].row(), Some(&row("new")));
    }

    #[tokio::test]
    async fn test_merge_is_last_writer_wins_not_arrival_order() {
        let store = MemoryStore::new();

        store
            .merge_rows(
                "samples",
                vec![StagedRow::upsert("x", "x", at(2), row("newer"))],
            )
            .await
            .unwrap();
        let merged = store
            .merge_rows(
                "samples",
                vec![StagedRow::upsert("x", "x", at(1), row("older"))],
            )
            .await
            .unwrap();

        assert_eq!(merged, 0);
        assert_eq!(store.target_row("samples", "x").await, Some(row("newer")));
    }

    #[tokio::test]
    async fn test_merge_ignores_tombstones() {
        let store = MemoryStore::new();

        let merged = store
            .merge_rows(
                "samples",
                vec![StagedRow {
                    key: "x".to_string(),
                    doc_id: "x".to_string(),
                    updated_at: at(1),
                    payload: StagedPayload::Tombstone,
                }],
            )
            .await
            .unwrap();

        assert_eq!(merged, 0);
        assert!(store.target_rows("samples").await.is_empty());
    }

    #[tokio::test]
    async fn test_purge_removes_old_rows_merged_or_not() {
        let store = MemoryStore::new();
        store
            .append_staged_row("samples", StagedRow::upsert("x", "x", at(1), row("old")))
            .await
            .unwrap();
        store
            .append_staged_row("samples", StagedRow::upsert("y", "y", at(5), row("new")))
            .await
            .unwrap();

        let purged = store.purge_staged_rows("samples", at(3)).await.unwrap();

        assert_eq!(purged, 1);
        assert_eq!(store.staged_len("samples").await, 1);
    }

    #[tokio::test]
    async fn test_delete_items_not_in_scopes_to_container() {
        let store = MemoryStore::new();
        let keys = [
            item_key("box-1", "site-1", "t-1"),
            item_key("box-1", "site-1", "t-2"),
            item_key("box-2", "site-1", "t-3"),
        ];
        for key in &keys {
            store
                .merge_rows(
                    "boxes",
                    vec![StagedRow::upsert(key.clone(), "box", at(1), row("r"))],
                )
                .await
                .unwrap();
        }

        let keep: HashSet<String> = [keys[0].clone()].into_iter().collect();
        let deleted = store
            .delete_items_not_in("boxes", "box-1|site-1", &keep)
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.target_row("boxes", &keys[0]).await.is_some());
        assert!(store.target_row("boxes", &keys[1]).await.is_none());
        // Other containers are untouched.
        assert!(store.target_row("boxes", &keys[2]).await.is_some());
    }

    #[tokio::test]
    async fn test_delete_box_items_crosses_sites() {
        let store = MemoryStore::new();
        for key in [
            item_key("box-1", "site-1", "t-1"),
            item_key("box-1", "site-2", "t-2"),
            item_key("box-2", "site-1", "t-3"),
        ] {
            store
                .merge_rows(
                    "boxes",
                    vec![StagedRow::upsert(key, "box", at(1), row("r"))],
                )
                .await
                .unwrap();
        }

        let deleted = store.delete_box_items("boxes", "box-1").await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(store.target_rows("boxes").await.len(), 1);
    }
}
