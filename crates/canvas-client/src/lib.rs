//! Client for the remote project store backing the canvas.
//!
//! The canvas engine only depends on the [`RemoteStore`] trait; the
//! [`HttpRemoteStore`] implementation talks to the store's REST API and turns
//! run output into a [`PushChannel`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use canvas_client::{ClientConfig, HttpRemoteStore, RemoteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = HttpRemoteStore::new(ClientConfig::load()?)?;
//!     let snapshot = store.fetch_snapshot().await?;
//!     println!("{} files, {} folders", snapshot.files.len(), snapshot.folders.len());
//!     Ok(())
//! }
//! ```

mod channel;
mod config;
mod error;
mod http;
mod sse;
mod store;
mod types;

pub use channel::{ChannelHandle, PushChannel, PushSender, DEFAULT_CHANNEL_CAPACITY};
pub use config::{ClientConfig, API_URL_ENV};
pub use error::{ClientError, ClientResult};
pub use http::HttpRemoteStore;
pub use sse::EventDecoder;
pub use store::RemoteStore;
pub use types::{
    ContentBody, DescriptionBody, FolderPatch, NewFile, NewFolder, RunCompletion, RunEvent,
    RunStatus,
};
