//! Notifications published on the engine bus.

use canvas_core::{FileStatus, NodeId};

use crate::interaction::AuthoringPrompt;
use crate::store::StoreChange;

/// Severity of a non-blocking notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// Where the host should go when the current view can no longer be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationTarget {
    /// The onboarding / home flow.
    Onboarding,
}

/// Event delivered to engine subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One or more mirrored collections changed.
    StoreChanged(StoreChange),
    /// Non-fatal problem, e.g. a poll that failed and will be retried.
    Notice { level: NoticeLevel, message: String },
    /// A mutation was rejected remotely. Local state is being re-fetched.
    MutationFailed { mutation: &'static str, message: String },
    /// The project is gone; the view was torn down.
    NavigateAway(NavigationTarget),
    /// An authoring step needs user input.
    Prompt(AuthoringPrompt),
    /// Output chunk from a running file.
    RunOutput { file: NodeId, output: String },
    /// A run ended, by completion or by an explicit stop.
    RunFinished {
        file: NodeId,
        status: FileStatus,
        return_code: Option<i32>,
    },
    /// Code generation started or finished for a file.
    Generating { file: NodeId, active: bool },
}
