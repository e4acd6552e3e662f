//! In-memory registry of export operations.
//!
//! Owned by [`crate::context::AppContext`]; records are lost on restart.
//! Each operation is written only by its background task (plus the cancel
//! endpoint tripping its token). Readers get cloned snapshots.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use cs_core::{Error, Operation, OperationId, OperationKind, OperationStatus, ProjectId, Result};

struct Entry {
    op: Operation,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct OperationRegistry {
    entries: Mutex<HashMap<OperationId, Entry>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending operation and return it with its cancel token.
    pub fn create(&self, kind: OperationKind, project_id: ProjectId) -> (Operation, CancellationToken) {
        let op = Operation::new(kind, project_id);
        let cancel = CancellationToken::new();
        self.entries.lock().insert(
            op.id,
            Entry {
                op: op.clone(),
                cancel: cancel.clone(),
            },
        );
        (op, cancel)
    }

    pub fn get(&self, id: OperationId) -> Option<Operation> {
        self.entries.lock().get(&id).map(|e| e.op.clone())
    }

    /// Every operation, newest first.
    pub fn list(&self) -> Vec<Operation> {
        let mut ops: Vec<_> = self.entries.lock().values().map(|e| e.op.clone()).collect();
        ops.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ops
    }

    /// Apply `f` unless the operation is already terminal.
    fn update(&self, id: OperationId, what: &str, f: impl FnOnce(&mut Operation)) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&id) else {
            tracing::warn!(operation_id = %id, what, "Update for unknown operation");
            return false;
        };
        if entry.op.status.is_terminal() {
            tracing::debug!(
                operation_id = %id,
                status = ?entry.op.status,
                what,
                "Ignoring update to finished operation"
            );
            return false;
        }
        f(&mut entry.op);
        true
    }

    /// pending -> processing
    pub fn start(&self, id: OperationId) -> bool {
        let started = self.update(id, "start", |op| op.status = OperationStatus::Processing);
        if started {
            tracing::info!(operation_id = %id, "Operation processing");
        }
        started
    }

    /// Record progress in percent. Values are clamped to `[0, 100]` and never
    /// move backwards; updates outside `processing` are dropped.
    pub fn set_progress(&self, id: OperationId, percent: f64) {
        if percent.is_nan() {
            return;
        }
        self.update(id, "progress", |op| {
            if op.status != OperationStatus::Processing {
                return;
            }
            let clamped = percent.clamp(0.0, 100.0);
            if clamped > op.progress {
                op.progress = clamped;
                tracing::debug!(operation_id = %op.id, progress = clamped, "Operation progress");
            }
        });
    }

    pub fn complete(&self, id: OperationId, output_files: Vec<String>) -> bool {
        let done = self.update(id, "complete", |op| {
            op.status = OperationStatus::Completed;
            op.progress = 100.0;
            op.output_files = output_files;
            op.completed_at = Some(Utc::now());
        });
        if done {
            tracing::info!(operation_id = %id, "Operation completed");
        }
        done
    }

    pub fn fail(&self, id: OperationId, err: &Error) -> bool {
        let failed = self.update(id, "fail", |op| {
            op.status = OperationStatus::Failed;
            op.error = Some(err.user_message());
            op.error_kind = Some(err.kind());
            op.completed_at = Some(Utc::now());
        });
        if failed {
            tracing::warn!(operation_id = %id, error = %err, "Operation failed");
        }
        failed
    }

    /// Trip the operation's cancel token. The owning task observes it and
    /// moves the record to `failed`.
    pub fn cancel(&self, id: OperationId) -> Result<Operation> {
        let entries = self.entries.lock();
        let entry = entries
            .get(&id)
            .ok_or_else(|| Error::not_found("operation", id))?;
        if entry.op.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "operation {id} already {}",
                status_word(entry.op.status)
            )));
        }
        entry.cancel.cancel();
        tracing::info!(operation_id = %id, "Operation cancellation requested");
        Ok(entry.op.clone())
    }

    /// Forget every finished operation. Returns how many were dropped.
    pub fn clear_finished(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.op.status.is_terminal());
        before - entries.len()
    }

    /// Trip every outstanding token, used on shutdown.
    pub fn cancel_all(&self) {
        for entry in self.entries.lock().values() {
            if !entry.op.status.is_terminal() {
                entry.cancel.cancel();
            }
        }
    }
}

fn status_word(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Pending => "pending",
        OperationStatus::Processing => "processing",
        OperationStatus::Completed => "completed",
        OperationStatus::Failed => "failed",
    }
}
