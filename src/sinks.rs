//! Warning and error sinks.
//!
//! Both sinks are best-effort collaborators: a failure to record a diagnostic must
//! never fail the operation that produced it. Callers go through
//! [`record_warning_best_effort`] and [`record_error_best_effort`], which downgrade
//! sink failures to log lines.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{FlowError, FlowResult};

/// Trait for recording non-fatal decode and schema warnings.
pub trait WarningSink {
    fn record_warning(
        &self,
        entity: &str,
        doc_id: &str,
        payload: serde_json::Value,
        message: &str,
    ) -> impl Future<Output = FlowResult<()>> + Send;
}

/// Trait for recording persistence and reconciliation failures with enough context
/// for manual replay.
pub trait ErrorSink {
    fn record_error(
        &self,
        entity: &str,
        doc_id: &str,
        operation: &str,
        payload: serde_json::Value,
        error: &FlowError,
    ) -> impl Future<Output = FlowResult<()>> + Send;
}

/// Records a warning, downgrading a sink failure to a log line.
pub async fn record_warning_best_effort<W: WarningSink>(
    sink: &W,
    entity: &str,
    doc_id: &str,
    payload: serde_json::Value,
    message: &str,
) {
    if let Err(err) = sink.record_warning(entity, doc_id, payload, message).await {
        warn!(entity, doc_id, error = %err, "failed to record warning");
    }
}

/// Records an error, downgrading a sink failure to a log line.
pub async fn record_error_best_effort<E: ErrorSink>(
    sink: &E,
    entity: &str,
    doc_id: &str,
    operation: &str,
    payload: serde_json::Value,
    error: &FlowError,
) {
    if let Err(err) = sink
        .record_error(entity, doc_id, operation, payload, error)
        .await
    {
        warn!(entity, doc_id, operation, error = %err, "failed to record error");
    }
}

/// A warning captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWarning {
    pub entity: String,
    pub doc_id: String,
    pub payload: serde_json::Value,
    pub message: String,
}

/// An error captured by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct RecordedError {
    pub entity: String,
    pub doc_id: String,
    pub operation: String,
    pub payload: serde_json::Value,
    pub error: FlowError,
}

#[derive(Debug, Default)]
struct Inner {
    warnings: Vec<RecordedWarning>,
    errors: Vec<RecordedError>,
}

/// In-memory sink capturing warnings and errors for inspection.
///
/// Useful for testing and verification: operators of the real system consult the log
/// tables this stands in for, and tests consult this instead.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded warnings, in record order.
    pub async fn warnings(&self) -> Vec<RecordedWarning> {
        let inner = self.inner.lock().await;
        inner.warnings.clone()
    }

    /// Returns a copy of all recorded errors, in record order.
    pub async fn errors(&self) -> Vec<RecordedError> {
        let inner = self.inner.lock().await;
        inner.errors.clone()
    }
}

impl WarningSink for MemorySink {
    async fn record_warning(
        &self,
        entity: &str,
        doc_id: &str,
        payload: serde_json::Value,
        message: &str,
    ) -> FlowResult<()> {
        let mut inner = self.inner.lock().await;
        inner.warnings.push(RecordedWarning {
            entity: entity.to_string(),
            doc_id: doc_id.to_string(),
            payload,
            message: message.to_string(),
        });

        Ok(())
    }
}

impl ErrorSink for MemorySink {
    async fn record_error(
        &self,
        entity: &str,
        doc_id: &str,
        operation: &str,
        payload: serde_json::Value,
        error: &FlowError,
    ) -> FlowResult<()> {
        let mut inner = self.inner.lock().await;
        inner.errors.push(RecordedError {
            entity: entity.to_string(),
            doc_id: doc_id.to_string(),
            operation: operation.to_string(),
            payload,
            error: error.clone(),
        });

        Ok(())
    }
}
