//! Mutation Dispatcher.
//!
//! A batch of mutations is validated locally, applied to the state store as
//! one optimistic patch, then sent to the remote store in order. The first
//! remote failure stops the batch; reconciling after it is up to the caller,
//! which re-fetches the store.

use std::sync::Arc;

use canvas_client::{FolderPatch, NewFile, NewFolder, RemoteStore};
use canvas_core::{EdgeEntity, EdgeKey, NodeId, Point, RelationType};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error};

use crate::error::{EngineError, EngineResult, InvalidAction};
use crate::events::EngineEvent;
use crate::interaction::validate_edge;
use crate::store::{CanvasStateStore, StoreChange};

/// A change to persist.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create a file, place it at `position` and optionally file it into
    /// `folder`.
    CreateFile {
        file: NewFile,
        position: Point,
        folder: Option<NodeId>,
    },
    CreateFolder(NewFolder),
    UpdatePosition {
        id: NodeId,
        position: Point,
    },
    UpdateContent {
        id: NodeId,
        content: String,
    },
    UpdateDescription {
        id: NodeId,
        description: String,
    },
    MoveToFolder {
        id: NodeId,
        folder: Option<NodeId>,
    },
    CreateEdge(EdgeEntity),
    DeleteEdge {
        from: NodeId,
        to: NodeId,
        relation: RelationType,
    },
    DeleteFile(NodeId),
    /// Delete a folder. With `cascade` its files are deleted first; without
    /// it they are released in place.
    DeleteFolder {
        id: NodeId,
        cascade: bool,
    },
    ResizeFolder {
        id: NodeId,
        width: f64,
        height: f64,
    },
    MoveFolder {
        id: NodeId,
        position: Point,
    },
    RenameFolder {
        id: NodeId,
        name: String,
    },
    SetFolderExpanded {
        id: NodeId,
        expanded: bool,
    },
    /// Generate a file's code from its description.
    GenerateFile(NodeId),
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::CreateFile { .. } => "create-file",
            Mutation::CreateFolder(_) => "create-folder",
            Mutation::UpdatePosition { .. } => "update-position",
            Mutation::UpdateContent { .. } => "update-content",
            Mutation::UpdateDescription { .. } => "update-description",
            Mutation::MoveToFolder { .. } => "move-to-folder",
            Mutation::CreateEdge(_) => "create-edge",
            Mutation::DeleteEdge { .. } => "delete-edge",
            Mutation::DeleteFile(_) => "delete-file",
            Mutation::DeleteFolder { .. } => "delete-folder",
            Mutation::ResizeFolder { .. } => "resize-folder",
            Mutation::MoveFolder { .. } => "move-folder",
            Mutation::RenameFolder { .. } => "rename-folder",
            Mutation::SetFolderExpanded { .. } => "set-folder-expanded",
            Mutation::GenerateFile(_) => "generate-file",
        }
    }

    /// Whether success should be followed by an explicit refresh rather
    /// than waiting for the next poll. True when the store assigns ids or
    /// derives state the optimistic patch cannot know.
    pub fn requires_refresh(&self) -> bool {
        matches!(
            self,
            Mutation::CreateFile { .. }
                | Mutation::CreateFolder(_)
                | Mutation::MoveToFolder { .. }
                | Mutation::DeleteFile(_)
                | Mutation::DeleteFolder { .. }
                | Mutation::GenerateFile(_)
        )
    }

    /// Entity whose geometry the mutation writes.
    fn geometry_target(&self) -> Option<&NodeId> {
        match self {
            Mutation::UpdatePosition { id, .. }
            | Mutation::ResizeFolder { id, .. }
            | Mutation::MoveFolder { id, .. } => Some(id),
            _ => None,
        }
    }

    fn folder_patch(&self) -> Option<FolderPatch> {
        match self {
            Mutation::ResizeFolder { width, height, .. } => Some(FolderPatch::size(*width, *height)),
            Mutation::MoveFolder { position, .. } => {
                Some(FolderPatch::position(position.x, position.y))
            }
            Mutation::RenameFolder { name, .. } => Some(FolderPatch {
                name: Some(name.clone()),
                ..Default::default()
            }),
            Mutation::SetFolderExpanded { expanded, .. } => Some(FolderPatch {
                is_expanded: Some(*expanded),
                ..Default::default()
            }),
            _ => None,
        }
    }
}

/// What a dispatched batch did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Mutations acknowledged by the remote store.
    pub sent: usize,
    /// At least one acknowledged mutation asks for an explicit refresh.
    pub needs_refresh: bool,
    /// Ids assigned by the remote store to created entities.
    pub created: Vec<NodeId>,
}

pub struct MutationDispatcher {
    client: Arc<dyn RemoteStore>,
    store: Arc<RwLock<CanvasStateStore>>,
    events: broadcast::Sender<EngineEvent>,
}

impl MutationDispatcher {
    pub fn new(
        client: Arc<dyn RemoteStore>,
        store: Arc<RwLock<CanvasStateStore>>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            client,
            store,
            events,
        }
    }

    pub async fn dispatch(&self, mutation: Mutation) -> EngineResult<DispatchOutcome> {
        self.dispatch_all(vec![mutation]).await
    }

    /// Validate, patch and send a batch.
    ///
    /// Local rejections return before anything is patched or sent. A remote
    /// failure publishes [`EngineEvent::MutationFailed`] and returns the
    /// error; the optimistic patch stays until the next refresh replaces it.
    pub async fn dispatch_all(&self, mutations: Vec<Mutation>) -> EngineResult<DispatchOutcome> {
        if mutations.is_empty() {
            return Ok(DispatchOutcome::default());
        }

        let (plan, marked) = {
            let mut store = self.store.write().await;
            let plan = expand_cascades(mutations, &store);
            validate_batch(&plan, &store)?;

            let mut change = StoreChange::default();
            let mut marked = Vec::new();
            for mutation in &plan {
                change = change.merge(apply_optimistic(mutation, &mut store));
                if let Some(id) = mutation.geometry_target() {
                    if !store.is_dirty(id) {
                        store.mark_dirty(id.clone());
                        marked.push(id.clone());
                    }
                }
            }
            if let Some(change) = store.commit(change) {
                let _ = self.events.send(EngineEvent::StoreChanged(change));
            }
            (plan, marked)
        };

        let mut outcome = DispatchOutcome::default();
        let mut failure = None;
        for mutation in &plan {
            match self.send(mutation).await {
                Ok(created) => {
                    debug!(mutation = mutation.name(), "mutation acknowledged");
                    outcome.sent += 1;
                    outcome.needs_refresh |= mutation.requires_refresh();
                    outcome.created.extend(created);
                }
                Err(e) => {
                    error!(mutation = mutation.name(), error = %e, "mutation failed");
                    let _ = self.events.send(EngineEvent::MutationFailed {
                        mutation: mutation.name(),
                        message: e.to_string(),
                    });
                    failure = Some(e);
                    break;
                }
            }
        }

        if !marked.is_empty() {
            let mut store = self.store.write().await;
            for id in &marked {
                store.clear_dirty(id);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    async fn send(&self, mutation: &Mutation) -> EngineResult<Option<NodeId>> {
        let client = &self.client;
        match mutation {
            Mutation::CreateFile {
                file,
                position,
                folder,
            } => {
                let created = client.create_file(file).await?;
                client.update_file_position(&created.id, *position).await?;
                if let Some(folder) = folder {
                    client.move_file_to_folder(&created.id, Some(folder)).await?;
                }
                return Ok(Some(created.id));
            }
            Mutation::CreateFolder(folder) => {
                let created = client.create_folder(folder).await?;
                return Ok(Some(created.id));
            }
            Mutation::UpdatePosition { id, position } => {
                client.update_file_position(id, *position).await?
            }
            Mutation::UpdateContent { id, content } => client.update_file_content(id, content).await?,
            Mutation::UpdateDescription { id, description } => {
                client.update_file_description(id, description).await?
            }
            Mutation::MoveToFolder { id, folder } => {
                client.move_file_to_folder(id, folder.as_ref()).await?
            }
            Mutation::CreateEdge(edge) => client.create_edge(edge).await?,
            Mutation::DeleteEdge { from, to, relation } => {
                client.delete_edge(from, to, relation).await?
            }
            Mutation::DeleteFile(id) => client.delete_file(id).await?,
            Mutation::DeleteFolder { id, .. } => client.delete_folder(id).await?,
            Mutation::GenerateFile(id) => client.generate_file(id).await?,
            Mutation::ResizeFolder { id, .. }
            | Mutation::MoveFolder { id, .. }
            | Mutation::RenameFolder { id, .. }
            | Mutation::SetFolderExpanded { id, .. } => {
                if let Some(patch) = mutation.folder_patch() {
                    client.update_folder(id, &patch).await?
                }
            }
        }
        Ok(None)
    }
}

/// Replace cascading folder deletes with per-file deletes followed by the
/// folder delete.
fn expand_cascades(mutations: Vec<Mutation>, store: &CanvasStateStore) -> Vec<Mutation> {
    let mut plan = Vec::with_capacity(mutations.len());
    for mutation in mutations {
        match mutation {
            Mutation::DeleteFolder { id, cascade: true } => {
                plan.extend(
                    store
                        .files_in(&id)
                        .into_iter()
                        .map(|f| Mutation::DeleteFile(f.id.clone())),
                );
                plan.push(Mutation::DeleteFolder { id, cascade: false });
            }
            other => plan.push(other),
        }
    }
    plan
}

fn require_file(store: &CanvasStateStore, id: &NodeId) -> EngineResult<()> {
    match store.file(id) {
        Some(_) => Ok(()),
        None => Err(EngineError::UnknownNode(id.clone())),
    }
}

fn require_folder(store: &CanvasStateStore, id: &NodeId) -> EngineResult<()> {
    match store.folder(id) {
        Some(_) => Ok(()),
        None => Err(EngineError::UnknownNode(id.clone())),
    }
}

fn require_text(value: &str, field: &'static str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(InvalidAction::EmptyField(field).into());
    }
    Ok(())
}

/// Local checks for a whole batch, before anything is patched or sent.
fn validate_batch(plan: &[Mutation], store: &CanvasStateStore) -> EngineResult<()> {
    let mut new_edges: Vec<EdgeKey> = Vec::new();
    for mutation in plan {
        match mutation {
            Mutation::CreateFile { file, folder, .. } => {
                require_text(&file.file_path, "file name")?;
                if let Some(folder) = folder {
                    require_folder(store, folder)?;
                }
            }
            Mutation::CreateFolder(folder) => require_text(&folder.name, "folder name")?,
            Mutation::UpdatePosition { id, .. }
            | Mutation::UpdateContent { id, .. }
            | Mutation::UpdateDescription { id, .. }
            | Mutation::DeleteFile(id)
            | Mutation::GenerateFile(id) => require_file(store, id)?,
            Mutation::MoveToFolder { id, folder } => {
                require_file(store, id)?;
                if let Some(folder) = folder {
                    require_folder(store, folder)?;
                }
            }
            Mutation::CreateEdge(edge) => {
                validate_edge(&edge.from, &edge.to, store)?;
                let key = edge.key();
                if new_edges.contains(&key) {
                    return Err(InvalidAction::DuplicateEdge {
                        from: key.from,
                        to: key.to,
                    }
                    .into());
                }
                new_edges.push(key);
            }
            Mutation::DeleteEdge { .. } => {}
            Mutation::RenameFolder { id, name } => {
                require_folder(store, id)?;
                require_text(name, "folder name")?;
            }
            Mutation::DeleteFolder { id, .. }
            | Mutation::ResizeFolder { id, .. }
            | Mutation::MoveFolder { id, .. }
            | Mutation::SetFolderExpanded { id, .. } => require_folder(store, id)?,
        }
    }
    Ok(())
}

fn apply_optimistic(mutation: &Mutation, store: &mut CanvasStateStore) -> StoreChange {
    match mutation {
        Mutation::CreateFile { .. } | Mutation::CreateFolder(_) | Mutation::GenerateFile(_) => {
            StoreChange::default()
        }
        Mutation::UpdatePosition { id, position } => store.set_file_position(id, *position),
        Mutation::UpdateContent { id, content } => store.set_file_content(id, content),
        Mutation::UpdateDescription { id, description } => store.set_description(id, description),
        Mutation::MoveToFolder { id, folder } => store.set_file_parent(id, folder.clone()),
        Mutation::CreateEdge(edge) => store.insert_edge(edge.clone()),
        Mutation::DeleteEdge { from, to, .. } => {
            store.remove_edge(&EdgeKey::new(from.clone(), to.clone()))
        }
        Mutation::DeleteFile(id) => store.remove_file(id),
        Mutation::DeleteFolder { id, cascade } => store.remove_folder(id, *cascade),
        Mutation::ResizeFolder { id, .. }
        | Mutation::MoveFolder { id, .. }
        | Mutation::RenameFolder { id, .. }
        | Mutation::SetFolderExpanded { id, .. } => match mutation.folder_patch() {
            Some(patch) => store.update_folder(id, &patch),
            None => StoreChange::default(),
        },
    }
}
