//! Per-event processing path: decode, project, buffer.
//!
//! One event is fully decoded, projected, and buffered before the next is started
//! within an invocation; the hosting invocation model may run many events
//! concurrently across independent invocations. The pipeline makes no cross-event
//! ordering assumption: correctness for out-of-order or duplicated events comes from
//! the reconciler's last-writer-wins rule, not from arrival order.
//!
//! Nothing recoverable escapes this module as a fatal error. Decode anomalies become
//! warnings, persistence failures are recorded through the error sink with enough
//! context for manual replay, and the event completes either way. Only a malformed
//! envelope, which cannot even be attributed to an entity, is returned to the caller.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::conversions::decode::{DecodeWarning, decode_flattened, decode_nested};
use crate::conversions::project::project_row;
use crate::bail;
use crate::error::{ErrorKind, FlowResult};
use crate::fanout::{BOX_ENTITY, SITE_ID_FIELD, TUBE_ID_FIELD, expand_box, item_key};
use crate::policy::Policies;
use crate::schema::SchemaRegistry;
use crate::sinks::{ErrorSink, WarningSink, record_error_best_effort, record_warning_best_effort};
use crate::store::base::BufferStore;
use crate::types::event::{ChangeEvent, parse_document_path};
use crate::types::row::{FieldValue, Row, StagedRow};

/// What the pipeline did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Projected rows were appended to the staging buffer.
    Staged(usize),
    /// A deletion tombstone was appended.
    TombstoneStaged,
    /// Every changed path was in the top-level ignore set; nothing was buffered.
    SkippedIgnoredChurn,
    /// The event could not be processed; details went to the error sink.
    Dropped,
}

/// The per-event processing path.
///
/// Holds the policy tables and the collaborators each event needs. Cheap to clone
/// when the collaborators are; one instance can serve any number of sequential
/// events.
#[derive(Debug, Clone)]
pub struct EventPipeline<R, B, W, E> {
    registry: R,
    buffer: B,
    warning_sink: W,
    error_sink: E,
    policies: Arc<Policies>,
}

impl<R, B, W, E> EventPipeline<R, B, W, E>
where
    R: SchemaRegistry,
    B: BufferStore,
    W: WarningSink,
    E: ErrorSink,
{
    pub fn new(
        registry: R,
        buffer: B,
        warning_sink: W,
        error_sink: E,
        policies: Arc<Policies>,
    ) -> Self {
        Self {
            registry,
            buffer,
            warning_sink,
            error_sink,
            policies,
        }
    }

    /// Processes one change event end to end: decode, project, buffer.
    ///
    /// Returns an error only for a malformed envelope; every downstream anomaly is
    /// absorbed into the sinks so the transport boundary never sees a fatal failure.
    pub async fn process_event(&self, event: &ChangeEvent) -> FlowResult<EventOutcome> {
        let Some(snapshot) = event.snapshot() else {
            bail!(
                ErrorKind::InvalidEvent,
                "Change event carries neither a value nor an old value"
            );
        };
        let path = parse_document_path(&snapshot.name)?;
        let entity = path.entity_kind;
        let doc_id = path.doc_id;

        let Some(value) = &event.value else {
            // Absence of `value` signals deletion. The tombstone is stamped at event
            // receipt so it outranks every staged version of the document.
            debug!(%entity, %doc_id, "staging tombstone");
            let staged = StagedRow::tombstone(&doc_id, Utc::now());
            return Ok(if self.append(&entity, &doc_id, staged).await {
                EventOutcome::TombstoneStaged
            } else {
                EventOutcome::Dropped
            });
        };

        if let Some(mask) = &event.update_mask {
            let ignore_len = self.policies.ignore.top_level_len(&entity);
            if mask.field_paths.len() < ignore_len
                && mask
                    .field_paths
                    .iter()
                    .all(|path| self.policies.ignore.is_top_level_ignored(&entity, path))
            {
                debug!(%entity, %doc_id, "skipping event: only ignored fields changed");
                return Ok(EventOutcome::SkippedIgnoredChurn);
            }
        }

        let schema = match self.registry.entity_schema(&entity).await {
            Ok(schema) => schema,
            Err(err) => {
                record_error_best_effort(
                    &self.error_sink,
                    &entity,
                    &doc_id,
                    "schema_lookup",
                    serde_json::Value::Null,
                    &err,
                )
                .await;
                return Ok(EventOutcome::Dropped);
            }
        };

        if entity == BOX_ENTITY {
            let (nested, warnings) = decode_nested(&entity, &value.fields, &self.policies);
            self.emit_warnings(&entity, &doc_id, warnings).await;

            let site_id = nested
                .get(SITE_ID_FIELD)
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();

            let (item_rows, warnings) = expand_box(&nested);
            self.emit_warnings(&entity, &doc_id, warnings).await;

            let mut staged_count = 0;
            for item in item_rows {
                let tube_id = item
                    .get(TUBE_ID_FIELD)
                    .and_then(FieldValue::as_str)
                    .unwrap_or_default()
                    .to_string();

                let (projected, warnings) = project_row(
                    &schema,
                    &item,
                    &doc_id,
                    value.create_time,
                    value.update_time,
                );
                self.emit_warnings(&entity, &doc_id, warnings).await;

                let key = item_key(&doc_id, &site_id, &tube_id);
                let staged = StagedRow::upsert(key, &doc_id, value.update_time, projected);
                if self.append(&entity, &doc_id, staged).await {
                    staged_count += 1;
                }
            }

            Ok(EventOutcome::Staged(staged_count))
        } else {
            let (decoded, warnings) = decode_flattened(&entity, &value.fields, &self.policies);
            self.emit_warnings(&entity, &doc_id, warnings).await;

            let (projected, warnings) = project_row(
                &schema,
                &decoded,
                &doc_id,
                value.create_time,
                value.update_time,
            );
            self.emit_warnings(&entity, &doc_id, warnings).await;

            let staged = StagedRow::upsert(doc_id.clone(), &doc_id, value.update_time, projected);
            Ok(if self.append(&entity, &doc_id, staged).await {
                EventOutcome::Staged(1)
            } else {
                EventOutcome::Dropped
            })
        }
    }

    /// Appends one staged row, absorbing failures into the error sink.
    ///
    /// A single row's persistence failure never aborts the rest of the event.
    async fn append(&self, entity: &str, doc_id: &str, staged: StagedRow) -> bool {
        let payload = staged
            .row()
            .map(Row::to_json)
            .unwrap_or_else(|| serde_json::json!({ "is_deleted": true }));

        match self.buffer.append_staged_row(entity, staged).await {
            Ok(()) => true,
            Err(err) => {
                record_error_best_effort(
                    &self.error_sink,
                    entity,
                    doc_id,
                    "buffer_append",
                    payload,
                    &err,
                )
                .await;
                false
            }
        }
    }

    async fn emit_warnings(&self, entity: &str, doc_id: &str, warnings: Vec<DecodeWarning>) {
        for warning in warnings {
            let message = if warning.path.is_empty() {
                warning.message
            } else {
                format!("{} (at `{}`)", warning.message, warning.path)
            };
            record_warning_best_effort(&self.warning_sink, entity, doc_id, warning.payload, &message)
                .await;
        }
    }
}
