//! Periodic convergence of staging buffers into target tables.
//!
//! A reconciliation run processes every known entity kind concurrently, one task per
//! entity. Within one entity the steps are strictly ordered: merge upserts, apply
//! tombstones, groom fan-out containers, purge expired staged rows. The run itself
//! always reports success to its scheduler; per-entity failures are logged and retried
//! implicitly on the next cadence, since the buffers are append-only and merging is
//! idempotent.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{ErrorKind, FlowError, FlowResult};
use crate::fanout::{BOX_ENTITY, container_key_of};
use crate::flow_error;
use crate::schema::SchemaRegistry;
use crate::store::base::{BufferStore, TargetStore};
use crate::types::row::StagedRow;

/// Row counts of one entity's reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Staged upserts that won last-writer-wins and landed in the target table.
    pub merged: u64,
    /// Target rows removed by tombstones.
    pub deleted: u64,
    /// Fan-out item rows removed because their container no longer lists them.
    pub moved_out: u64,
    /// Fan-out item rows removed by a container-level tombstone cascade.
    pub cascaded: u64,
    /// Staged rows dropped by the retention purge.
    pub purged: u64,
}

/// Drives convergence of staged rows into target tables.
///
/// Cloneable so each per-entity task can own its collaborators; all collaborators are
/// expected to be handles over shared state.
#[derive(Debug, Clone)]
pub struct Reconciler<R, B, T> {
    registry: R,
    buffer: B,
    target: T,
    retention: chrono::Duration,
}

impl<R, B, T> Reconciler<R, B, T>
where
    R: SchemaRegistry + Clone + Send + Sync + 'static,
    B: BufferStore + Clone + Send + Sync + 'static,
    T: TargetStore + Clone + Send + Sync + 'static,
{
    pub fn new(registry: R, buffer: B, target: T, retention: chrono::Duration) -> Self {
        Self {
            registry,
            buffer,
            target,
            retention,
        }
    }

    /// Reconciles every known entity kind, one concurrent task per entity.
    ///
    /// Always returns `Ok`: a failed entity is logged and left for the next run, and
    /// one entity's failure never blocks the others. Merging is idempotent, so
    /// re-processing the same staged rows on the next cadence is safe.
    pub async fn reconcile_all(&self) -> FlowResult<()> {
        let entities = match self.registry.entities().await {
            Ok(entities) => entities,
            Err(err) => {
                error!(error = %err, "failed to list entities; skipping reconciliation run");
                return Ok(());
            }
        };

        let mut tasks = JoinSet::new();
        for entity in entities {
            let reconciler = self.clone();
            tasks.spawn(async move {
                reconciler
                    .reconcile_entity(&entity)
                    .await
                    .map(|summary| (entity.clone(), summary))
                    .map_err(|err| (entity, err))
            });
        }

        let mut errors: Vec<FlowError> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((entity, summary))) => {
                    info!(
                        entity,
                        merged = summary.merged,
                        deleted = summary.deleted,
                        moved_out = summary.moved_out,
                        cascaded = summary.cascaded,
                        purged = summary.purged,
                        "entity reconciled"
                    );
                }
                Ok(Err((entity, err))) => {
                    error!(entity, error = %err, "entity reconciliation failed");
                    errors.push(err);
                }
                Err(join_error) => {
                    errors.push(flow_error!(
                        ErrorKind::ReconcileTaskPanic,
                        "A reconciliation task terminated abnormally",
                        join_error.to_string()
                    ));
                }
            }
        }

        if !errors.is_empty() {
            let aggregated = FlowError::from(errors);
            error!(error = %aggregated, "reconciliation run completed with failures");
        }

        Ok(())
    }

    /// Runs the ordered reconciliation steps for one entity kind.
    ///
    /// Step order is significant: tombstone deletions must see the merged state, and
    /// the purge must come last so a failed merge leaves its staged rows available for
    /// the next run.
    pub async fn reconcile_entity(&self, entity: &str) -> FlowResult<ReconcileSummary> {
        let snapshot = self.buffer.latest_staged_rows(entity).await?;

        let mut upserts = Vec::new();
        let mut tombstones = Vec::new();
        for staged in snapshot {
            if staged.is_tombstone() {
                tombstones.push(staged);
            } else {
                upserts.push(staged);
            }
        }

        let mut summary = ReconcileSummary::default();

        // Authoritative container membership is defined by the newest box version
        // alone: only the staged rows carrying a container's maximum watermark count.
        // Stale staged rows of older versions still sit in the buffer until the purge
        // and must not pin their items into the target table.
        let container_membership = if entity == BOX_ENTITY {
            newest_container_membership(&upserts)
        } else {
            HashMap::new()
        };

        // Step 1: merge the newest staged version of every key, last writer wins.
        summary.merged = self.target.merge_rows(entity, upserts).await?;

        // Step 2: apply tombstones.
        let tombstone_doc_ids: Vec<String> = tombstones
            .iter()
            .map(|staged| staged.doc_id.clone())
            .collect();
        let tombstone_keys: Vec<String> =
            tombstones.into_iter().map(|staged| staged.key).collect();
        summary.deleted = self.target.delete_rows(entity, tombstone_keys).await?;

        // Steps 3 and 4 only apply to the fan-out entity.
        if entity == BOX_ENTITY {
            // Step 3: remove items the newest box version no longer lists.
            for (container, keep) in container_membership {
                summary.moved_out += self
                    .target
                    .delete_items_not_in(entity, &container, &keep)
                    .await?;
            }

            // Step 4: a deleted box document takes all of its item rows with it,
            // across every site.
            for doc_id in tombstone_doc_ids {
                summary.cascaded += self.target.delete_box_items(entity, &doc_id).await?;
            }
        }

        // Final step: drop staged rows past the retention window, merged or not.
        let watermark = Utc::now() - self.retention;
        summary.purged = self.buffer.purge_staged_rows(entity, watermark).await?;

        Ok(summary)
    }
}

/// Groups staged item upserts by container and keeps, per container, only the keys
/// staged at that container's maximum `updated_at` watermark.
///
/// Rows at older watermarks belong to superseded box versions; an item listed only by
/// a superseded version has moved out and must not appear in its container's keep set.
fn newest_container_membership(upserts: &[StagedRow]) -> HashMap<String, HashSet<String>> {
    let mut newest: HashMap<String, (DateTime<Utc>, HashSet<String>)> = HashMap::new();

    for staged in upserts {
        let Some(container) = container_key_of(&staged.key) else {
            continue;
        };
        let entry = newest
            .entry(container)
            .or_insert_with(|| (staged.updated_at, HashSet::new()));
        if staged.updated_at > entry.0 {
            entry.0 = staged.updated_at;
            entry.1.clear();
        }
        if staged.updated_at == entry.0 {
            entry.1.insert(staged.key.clone());
        }
    }

    newest
        .into_iter()
        .map(|(container, (_, keys))| (container, keys))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::item_key;
    use crate::schema::{EntitySchema, FieldSchema, StaticSchemaRegistry};
    use crate::store::memory::MemoryStore;
    use crate::types::row::{FieldValue, Row, StagedRow};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn row(status: &str) -> Row {
        [("status".to_string(), FieldValue::from(status))]
            .into_iter()
            .collect()
    }

    fn reconciler(
        entities: Vec<&str>,
        store: &MemoryStore,
    ) -> Reconciler<StaticSchemaRegistry, MemoryStore, MemoryStore> {
        let registry = StaticSchemaRegistry::new(
            entities
                .into_iter()
                .map(|entity| EntitySchema::new(entity, vec![FieldSchema::text("status")]))
                .collect(),
        );
        Reconciler::new(
            registry,
            store.clone(),
            store.clone(),
            chrono::Duration::hours(24),
        )
    }

    #[tokio::test]
    async fn test_newest_staged_version_wins() {
        let store = MemoryStore::new();
        store
            .append_staged_row("samples", StagedRow::upsert("x", "x", at(2), row("newer")))
            .await
            .unwrap();
        store
            .append_staged_row("samples", StagedRow::upsert("x", "x", at(1), row("older")))
            .await
            .unwrap();

        let summary = reconciler(vec!["samples"], &store)
            .reconcile_entity("samples")
            .await
            .unwrap();

        assert_eq!(summary.merged, 1);
        assert_eq!(store.target_row("samples", "x").await, Some(row("newer")));
    }

    #[tokio::test]
    async fn test_tombstone_deletes_after_merge() {
        let store = MemoryStore::new();
        store
            .append_staged_row("samples", StagedRow::upsert("x", "x", at(1), row("live")))
            .await
            .unwrap();
        store
            .append_staged_row("samples", StagedRow::tombstone("x", at(2)))
            .await
            .unwrap();

        let summary = reconciler(vec!["samples"], &store)
            .reconcile_entity("samples")
            .await
            .unwrap();

        assert_eq!(summary.deleted, 1);
        assert!(store.target_row("samples", "x").await.is_none());
    }

    #[tokio::test]
    async fn test_moved_out_items_are_removed() {
        let store = MemoryStore::new();
        let old_key = item_key("box-1", "site-1", "t-old");
        let new_key = item_key("box-1", "site-1", "t-new");

        // A previous run converged the old membership.
        store
            .merge_rows(
                BOX_ENTITY,
                vec![StagedRow::upsert(old_key.clone(), "box-1", at(1), row("r"))],
            )
            .await
            .unwrap();

        // A newer box version lists a different tube.
        store
            .append_staged_row(
                BOX_ENTITY,
                StagedRow::upsert(new_key.clone(), "box-1", at(2), row("r")),
            )
            .await
            .unwrap();

        let summary = reconciler(vec![BOX_ENTITY], &store)
            .reconcile_entity(BOX_ENTITY)
            .await
            .unwrap();

        assert_eq!(summary.moved_out, 1);
        assert!(store.target_row(BOX_ENTITY, &old_key).await.is_none());
        assert!(store.target_row(BOX_ENTITY, &new_key).await.is_some());
    }

    #[tokio::test]
    async fn test_stale_staged_rows_do_not_pin_moved_out_items() {
        let store = MemoryStore::new();
        let reconciler = reconciler(vec![BOX_ENTITY], &store);

        // Version 1 lists two tubes; both staged rows stay in the buffer for the
        // whole retention window.
        let v1 = Utc::now() - chrono::Duration::hours(2);
        for tube in ["t-1", "t-2"] {
            store
                .append_staged_row(
                    BOX_ENTITY,
                    StagedRow::upsert(item_key("box-1", "site-9", tube), "box-1", v1, row("r")),
                )
                .await
                .unwrap();
        }
        reconciler.reconcile_entity(BOX_ENTITY).await.unwrap();

        // Version 2 drops t-2. Its v1 staged row is still buffered, but membership
        // comes from the container's newest watermark only.
        let v2 = Utc::now() - chrono::Duration::hours(1);
        store
            .append_staged_row(
                BOX_ENTITY,
                StagedRow::upsert(item_key("box-1", "site-9", "t-1"), "box-1", v2, row("r")),
            )
            .await
            .unwrap();
        let summary = reconciler.reconcile_entity(BOX_ENTITY).await.unwrap();

        assert_eq!(summary.moved_out, 1);
        assert!(
            store
                .target_row(BOX_ENTITY, &item_key("box-1", "site-9", "t-1"))
                .await
                .is_some()
        );
        assert!(
            store
                .target_row(BOX_ENTITY, &item_key("box-1", "site-9", "t-2"))
                .await
                .is_none()
        );
        // The stale staged row is still buffered and a further pass must not
        // resurrect the item.
        reconciler.reconcile_entity(BOX_ENTITY).await.unwrap();
        assert!(
            store
                .target_row(BOX_ENTITY, &item_key("box-1", "site-9", "t-2"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_box_tombstone_cascades_across_sites() {
        let store = MemoryStore::new();
        for key in [
            item_key("box-1", "site-1", "t-1"),
            item_key("box-1", "site-2", "t-2"),
        ] {
            store
                .merge_rows(
                    BOX_ENTITY,
                    vec![StagedRow::upsert(key, "box-1", at(1), row("r"))],
                )
                .await
                .unwrap();
        }
        store
            .append_staged_row(BOX_ENTITY, StagedRow::tombstone("box-1", at(2)))
            .await
            .unwrap();

        let summary = reconciler(vec![BOX_ENTITY], &store)
            .reconcile_entity(BOX_ENTITY)
            .await
            .unwrap();

        assert_eq!(summary.cascaded, 2);
        assert!(store.target_rows(BOX_ENTITY).await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_staged_rows_are_purged() {
        let store = MemoryStore::new();
        store
            .append_staged_row(
                "samples",
                StagedRow::upsert("x", "x", Utc::now() - chrono::Duration::hours(48), row("old")),
            )
            .await
            .unwrap();
        store
            .append_staged_row(
                "samples",
                StagedRow::upsert("y", "y", Utc::now(), row("fresh")),
            )
            .await
            .unwrap();

        let summary = reconciler(vec!["samples"], &store)
            .reconcile_entity("samples")
            .await
            .unwrap();

        assert_eq!(summary.purged, 1);
        assert_eq!(store.staged_len("samples").await, 1);
    }

    #[tokio::test]
    async fn test_reconcile_entity_is_idempotent() {
        let store = MemoryStore::new();
        store
            .append_staged_row("samples", StagedRow::upsert("x", "x", Utc::now(), row("v1")))
            .await
            .unwrap();
        let reconciler = reconciler(vec!["samples"], &store);

        let first = reconciler.reconcile_entity("samples").await.unwrap();
        let second = reconciler.reconcile_entity("samples").await.unwrap();

        assert_eq!(first.merged, 1);
        // The second run sees the same staged row but the target is already newer-or-equal.
        assert_eq!(second.merged, 0);
        assert_eq!(store.target_row("samples", "x").await, Some(row("v1")));
    }

    #[tokio::test]
    async fn test_reconcile_all_runs_every_entity() {
        let store = MemoryStore::new();
        store
            .append_staged_row("samples", StagedRow::upsert("s", "s", Utc::now(), row("a")))
            .await
            .unwrap();
        store
            .append_staged_row("orders", StagedRow::upsert("o", "o", Utc::now(), row("b")))
            .await
            .unwrap();

        reconciler(vec!["samples", "orders"], &store)
            .reconcile_all()
            .await
            .unwrap();

        assert!(store.target_row("samples", "s").await.is_some());
        assert!(store.target_row("orders", "o").await.is_some());
    }

    /// Target store wrapper that fails every merge for one entity.
    #[derive(Debug, Clone)]
    struct FailingTarget {
        inner: MemoryStore,
        failing_entity: String,
    }

    impl TargetStore for FailingTarget {
        async fn merge_rows(&self, entity: &str, rows: Vec<StagedRow>) -> FlowResult<u64> {
            if entity == self.failing_entity {
                return Err(flow_error!(
                    ErrorKind::TargetMergeFailed,
                    "Merge rejected by the target store"
                ));
            }
            self.inner.merge_rows(entity, rows).await
        }

        async fn delete_rows(&self, entity: &str, keys: Vec<String>) -> FlowResult<u64> {
            self.inner.delete_rows(entity, keys).await
        }

        async fn delete_items_not_in(
            &self,
            entity: &str,
            container: &str,
            keep: &std::collections::HashSet<String>,
        ) -> FlowResult<u64> {
            self.inner.delete_items_not_in(entity, container, keep).await
        }

        async fn delete_box_items(&self, entity: &str, doc_id: &str) -> FlowResult<u64> {
            self.inner.delete_box_items(entity, doc_id).await
        }
    }

    #[tokio::test]
    async fn test_reconcile_all_isolates_per_entity_failures() {
        let store = MemoryStore::new();
        store
            .append_staged_row("samples", StagedRow::upsert("s", "s", Utc::now(), row("a")))
            .await
            .unwrap();
        store
            .append_staged_row("orders", StagedRow::upsert("o", "o", Utc::now(), row("b")))
            .await
            .unwrap();

        let registry = StaticSchemaRegistry::new(vec![
            EntitySchema::new("samples", vec![FieldSchema::text("status")]),
            EntitySchema::new("orders", vec![FieldSchema::text("status")]),
        ]);
        let target = FailingTarget {
            inner: store.clone(),
            failing_entity: "orders".to_string(),
        };
        let reconciler = Reconciler::new(
            registry,
            store.clone(),
            target,
            chrono::Duration::hours(24),
        );

        let result = reconciler.reconcile_all().await;

        // The run reports success and the healthy entity converges; the failed
        // entity's staged rows are still buffered for the next run.
        assert!(result.is_ok());
        assert!(store.target_row("samples", "s").await.is_some());
        assert!(store.target_row("orders", "o").await.is_none());
        assert_eq!(store.staged_len("orders").await, 1);
    }
}
