//! Task verdicts and the backend status mapping.
//!
//! Handlers never throw across the dispatch boundary; every entry resolves
//! to one of these verdicts and the engine applies the matching inbox
//! policy.

use swsync_sai::SaiStatus;

/// What happened to one inbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Settled; erase from the inbox. Covers idempotent outcomes.
    Success,
    /// Malformed or contradictory input; erase and log at ERROR, no
    /// error-bus publish.
    Invalid,
    /// Dependency not met or transient backend state; leave in the inbox
    /// for the next wake-up.
    NeedRetry,
    /// Backend rejected the operation; publish to the error bus, then the
    /// per-table policy decides erase or retry.
    Failed,
    /// Non-recoverable; the daemon terminates.
    Fatal,
}

impl TaskStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Invalid)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, TaskStatus::NeedRetry)
    }
}

/// Maps a backend status for a `create` into the verdict taxonomy.
///
/// `ItemAlreadyExists` settles idempotently, `NotExecuted` retries.
pub fn handle_create_status(status: SaiStatus) -> TaskStatus {
    match status {
        SaiStatus::Success | SaiStatus::ItemAlreadyExists => TaskStatus::Success,
        SaiStatus::NotExecuted => TaskStatus::NeedRetry,
        _ => TaskStatus::Failed,
    }
}

/// Maps a backend status for a `set`.
pub fn handle_set_status(status: SaiStatus) -> TaskStatus {
    match status {
        SaiStatus::Success => TaskStatus::Success,
        SaiStatus::NotExecuted => TaskStatus::NeedRetry,
        _ => TaskStatus::Failed,
    }
}

/// Maps a backend status for a `remove`.
///
/// `ItemNotFound` settles idempotently.
pub fn handle_remove_status(status: SaiStatus) -> TaskStatus {
    match status {
        SaiStatus::Success | SaiStatus::ItemNotFound => TaskStatus::Success,
        SaiStatus::NotExecuted => TaskStatus::NeedRetry,
        _ => TaskStatus::Failed,
    }
}
