//! State-sync engine for a project canvas backed by a remote store.
//!
//! The engine mirrors a project's files, folders, edges and layout metadata,
//! turns them into a renderable graph, drives the user's gestures through a
//! small state machine and persists the results optimistically.
//!
//! ## Parts
//!
//! - **Canvas State Store** ([`CanvasStateStore`]): the polled mirror. A
//!   collection is only replaced when its content changed.
//! - **Graph View Builder** ([`build_graph`]): pure derivation of render
//!   nodes and edges; children of a folder get folder-relative positions.
//! - **Interaction Controller** ([`InteractionController`]): drag, connect,
//!   resize, selection and drop authoring, yielding [`Mutation`] batches.
//! - **Mutation Dispatcher** ([`MutationDispatcher`]): optimistic patch,
//!   ordered remote writes, refresh on failure.
//! - **Execution Status Tracker** ([`ExecutionTracker`]): the running set,
//!   one push channel per run and the periodic status poll.
//!
//! [`CanvasEngine`] wires them together for one mounted view.
//!
//! ## Coordinates
//!
//! ```text
//! absolute = relative + parent.position   (file inside a folder)
//! absolute = relative                     (top-level file or folder)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use canvas_client::{ClientConfig, HttpRemoteStore};
//! use canvas_engine::{CanvasEngine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Arc::new(HttpRemoteStore::new(ClientConfig::load()?)?);
//!     let engine = CanvasEngine::new(client, EngineConfig::default());
//!     let mut events = engine.subscribe();
//!     engine.mount()?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
mod debounce;
pub mod dispatch;
mod engine;
mod error;
pub mod events;
pub mod execution;
pub mod interaction;
pub mod store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_fixtures;
pub mod view;

pub use config::{EngineConfig, ViewProfile};
pub use debounce::Debouncer;
pub use dispatch::{DispatchOutcome, Mutation, MutationDispatcher};
pub use engine::CanvasEngine;
pub use error::{EngineError, EngineResult, InvalidAction};
pub use events::{EngineEvent, NavigationTarget, NoticeLevel};
pub use execution::ExecutionTracker;
pub use interaction::{
    folder_at, AuthoringPrompt, DragSession, DragTarget, InteractionController,
    InteractionState, NodeConfiguration, PlaceholderNode, MIN_FOLDER_HEIGHT, MIN_FOLDER_WIDTH,
};
pub use store::{CanvasStateStore, StoreChange};
pub use view::{build_graph, RenderEdge, RenderGraph, RenderNode, RenderNodeKind, TransientState};
