//! Structured audit trail events.

use serde::{Deserialize, Serialize};

/// Severity of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry of the audit trail.
///
/// `step` names the pipeline stage that produced the record
/// (`market_data_integrity.poll`, `execution.execution_cancel`, ...);
/// `inputs_hash`/`outputs_hash` carry canonical content hashes so a
/// decision can be replayed against the exact values that produced it.
/// The store assigns `id` on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: u64,
    pub ts: i64,
    pub step: String,
    pub level: AuditLevel,
    pub message: String,
    pub reason: Option<String>,
    pub inputs_hash: Option<String>,
    pub outputs_hash: Option<String>,
    pub params_version_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// Start a record for the given step at the given instant.
    #[must_use]
    pub fn new(ts: i64, step: impl Into<String>, level: AuditLevel, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            ts,
            step: step.into(),
            level,
            message: message.into(),
            reason: None,
            inputs_hash: None,
            outputs_hash: None,
            params_version_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_inputs_hash(mut self, hash: impl Into<String>) -> Self {
        self.inputs_hash = Some(hash.into());
        self
    }

    #[must_use]
    pub fn with_outputs_hash(mut self, hash: impl Into<String>) -> Self {
        self.outputs_hash = Some(hash.into());
        self
    }

    #[must_use]
    pub fn with_params_version(mut self, id: impl Into<String>) -> Self {
        self.params_version_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
