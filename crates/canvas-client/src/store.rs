//! The remote project store contract the canvas depends on.

use async_trait::async_trait;
use canvas_core::{
    EdgeEntity, FileEntity, FolderEntity, MetadataMap, NodeId, Point, ProjectSnapshot,
    RelationType,
};

use crate::channel::PushChannel;
use crate::error::ClientResult;
use crate::types::{FolderPatch, NewFile, NewFolder, RunStatus};

/// Request/response and streaming operations over a project's files, folders,
/// edges and metadata cache.
///
/// Implementations must be cheap to share: the engine holds one behind an
/// `Arc` and calls it from several tasks.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    // Collections
    async fn list_files(&self) -> ClientResult<Vec<FileEntity>>;
    async fn list_folders(&self) -> ClientResult<Vec<FolderEntity>>;
    async fn list_edges(&self) -> ClientResult<Vec<EdgeEntity>>;
    async fn get_metadata(&self) -> ClientResult<MetadataMap>;

    // Files
    async fn create_file(&self, file: &NewFile) -> ClientResult<FileEntity>;
    async fn update_file_position(&self, id: &NodeId, position: Point) -> ClientResult<()>;
    async fn update_file_content(&self, id: &NodeId, content: &str) -> ClientResult<()>;
    async fn update_file_description(&self, id: &NodeId, description: &str) -> ClientResult<()>;
    /// Move a file into `folder`, or out of any folder when `None`.
    async fn move_file_to_folder(&self, id: &NodeId, folder: Option<&NodeId>)
        -> ClientResult<()>;
    async fn delete_file(&self, id: &NodeId) -> ClientResult<()>;
    /// Ask the store to generate code for a file from its description.
    async fn generate_file(&self, id: &NodeId) -> ClientResult<()>;

    // Folders
    async fn create_folder(&self, folder: &NewFolder) -> ClientResult<FolderEntity>;
    async fn update_folder(&self, id: &NodeId, patch: &FolderPatch) -> ClientResult<()>;
    async fn delete_folder(&self, id: &NodeId) -> ClientResult<()>;

    // Edges
    async fn create_edge(&self, edge: &EdgeEntity) -> ClientResult<()>;
    async fn delete_edge(
        &self,
        from: &NodeId,
        to: &NodeId,
        relation: &RelationType,
    ) -> ClientResult<()>;

    // Execution
    /// Start running a file and open its output channel.
    async fn run_file(&self, id: &NodeId) -> ClientResult<PushChannel>;
    async fn stop_file(&self, id: &NodeId) -> ClientResult<()>;
    async fn file_status(&self, id: &NodeId) -> ClientResult<RunStatus>;

    /// Fetch all four collections concurrently.
    async fn fetch_snapshot(&self) -> ClientResult<ProjectSnapshot> {
        let (files, folders, edges, metadata) = tokio::try_join!(
            self.list_files(),
            self.list_folders(),
            self.list_edges(),
            self.get_metadata()
        )?;
        Ok(ProjectSnapshot {
            files,
            folders,
            edges,
            metadata,
        })
    }
}
