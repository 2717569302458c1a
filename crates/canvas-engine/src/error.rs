//! Error types for the canvas engine.

use canvas_client::ClientError;
use canvas_core::NodeId;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A remote call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A user action was rejected locally; nothing was sent.
    #[error("{0}")]
    Invalid(#[from] InvalidAction),

    /// The project no longer exists remotely. Terminal for the view.
    #[error("Project not found")]
    ProjectNotFound,

    /// The gesture does not apply in the current interaction state.
    #[error("Cannot {action} while {state}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },

    /// The id does not name a known file, folder or placeholder.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// The engine was torn down.
    #[error("Engine has been torn down")]
    TornDown,
}

impl EngineError {
    /// Whether the error came back from the remote store, as opposed to a
    /// local rejection.
    pub fn is_remote(&self) -> bool {
        matches!(self, EngineError::Client(_))
    }
}

/// User actions rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidAction {
    #[error("Cannot connect {0} to itself")]
    SelfLoop(NodeId),

    #[error("An edge from {from} to {to} already exists")]
    DuplicateEdge { from: NodeId, to: NodeId },

    #[error("{0} is required")]
    EmptyField(&'static str),

    #[error("Deleting folder {folder} also deletes {files} file(s); confirmation required")]
    CascadeNotConfirmed { folder: NodeId, files: usize },

    #[error("Dropped data is not a node payload")]
    UnreadablePayload,

    #[error("No {0} prompt is open")]
    NoPrompt(&'static str),

    #[error("{0} is already running")]
    AlreadyRunning(NodeId),
}
