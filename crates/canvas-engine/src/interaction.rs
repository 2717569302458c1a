//! Interaction Controller.
//!
//! A synchronous state machine over drag, connect and resize gestures, plus
//! selection and the drag-authoring prompts. It reads the state store but
//! never writes it: completed gestures come back as [`Mutation`] batches for
//! the dispatcher.
//!
//! ```text
//! Idle -> Dragging(file | folder | placeholder) -> Idle
//! Idle -> Connecting(source)                    -> Idle
//! Idle -> Resizing(folder)                      -> Idle
//! ```
//!
//! Pointer positions are canvas (absolute) coordinates.

use std::collections::{BTreeSet, HashMap};

use canvas_client::{NewFile, NewFolder};
use canvas_core::{
    file_center, file_type_for_path, DragPayload, EdgeEntity, EdgeKey, FolderEntity, NodeId,
    NodeTemplate, PayloadFlow, Point, RelationType, TransferData, FOLDER_COLLAPSED_HEIGHT,
};
use serde::Serialize;
use tracing::debug;

use crate::dispatch::Mutation;
use crate::error::{EngineError, EngineResult, InvalidAction};
use crate::store::CanvasStateStore;
use crate::view::TransientState;

/// Smallest size a folder can be resized to.
pub const MIN_FOLDER_WIDTH: f64 = 200.0;
pub const MIN_FOLDER_HEIGHT: f64 = FOLDER_COLLAPSED_HEIGHT * 2.0;

// =============================================================================
// States
// =============================================================================

/// What is being dragged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DragTarget {
    File(NodeId),
    Folder(NodeId),
    /// A session-only node.
    Placeholder(NodeId),
}

impl DragTarget {
    pub fn id(&self) -> &NodeId {
        match self {
            DragTarget::File(id) | DragTarget::Folder(id) | DragTarget::Placeholder(id) => id,
        }
    }
}

/// An active drag.
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    pub target: DragTarget,
    /// Pointer position minus node origin, captured at drag start.
    pub pointer_offset: Point,
    /// Absolute node origin at drag start.
    pub origin: Point,
    /// Live absolute node origin.
    pub current: Point,
    /// Folder under the dragged file's center.
    pub hovered_folder: Option<NodeId>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub enum InteractionState {
    #[default]
    Idle,
    Dragging(DragSession),
    Connecting {
        source: NodeId,
    },
    Resizing {
        folder: NodeId,
        width: f64,
        height: f64,
    },
}

impl InteractionState {
    pub fn name(&self) -> &'static str {
        match self {
            InteractionState::Idle => "idle",
            InteractionState::Dragging(_) => "dragging",
            InteractionState::Connecting { .. } => "connecting",
            InteractionState::Resizing { .. } => "resizing",
        }
    }
}

// =============================================================================
// Authoring
// =============================================================================

/// A node that lives only in this session, with no remote representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceholderNode {
    pub id: NodeId,
    pub label: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub position: Point,
}

/// An authoring step waiting for user input.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthoringPrompt {
    /// Name a new file dropped at `position`.
    NameFile {
        position: Point,
        template: Option<NodeTemplate>,
        category: Option<String>,
    },
    /// Name a new folder dropped at `position`.
    NameFolder { position: Point },
    /// Decide what a generic palette entry becomes.
    ConfigureNode { position: Point, payload: DragPayload },
    /// Pick the relation and description of a new edge.
    DescribeEdge { from: NodeId, to: NodeId },
}

impl AuthoringPrompt {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthoringPrompt::NameFile { .. } => "file name",
            AuthoringPrompt::NameFolder { .. } => "folder name",
            AuthoringPrompt::ConfigureNode { .. } => "node configuration",
            AuthoringPrompt::DescribeEdge { .. } => "edge",
        }
    }
}

/// Result of the generic node-configuration step.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfiguration {
    File {
        file_name: String,
        /// Inferred from the payload template or the extension when absent.
        file_type: Option<String>,
        description: Option<String>,
        content: Option<String>,
    },
    Folder {
        name: String,
    },
    Placeholder {
        label: String,
        description: Option<String>,
    },
}

// =============================================================================
// Hit testing
// =============================================================================

/// Folder whose drop zone contains `point`. Nested candidates resolve to the
/// smallest one.
pub fn folder_at(folders: &[FolderEntity], point: Point) -> Option<&FolderEntity> {
    folders
        .iter()
        .filter_map(|f| f.drop_zone().filter(|zone| zone.contains(point)).map(|zone| (f, zone)))
        .min_by(|(_, a), (_, b)| a.area().total_cmp(&b.area()))
        .map(|(f, _)| f)
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Default)]
pub struct InteractionController {
    state: InteractionState,
    selected: Option<NodeId>,
    selected_edges: BTreeSet<EdgeKey>,
    prompt: Option<AuthoringPrompt>,
    placeholders: Vec<PlaceholderNode>,
    size_overrides: HashMap<NodeId, (f64, f64)>,
    next_placeholder: u64,
}

impl InteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn selected(&self) -> Option<&NodeId> {
        self.selected.as_ref()
    }

    pub fn selected_edges(&self) -> &BTreeSet<EdgeKey> {
        &self.selected_edges
    }

    pub fn pending_prompt(&self) -> Option<&AuthoringPrompt> {
        self.prompt.as_ref()
    }

    pub fn placeholders(&self) -> &[PlaceholderNode] {
        &self.placeholders
    }

    pub fn size_override(&self, folder: &NodeId) -> Option<(f64, f64)> {
        self.size_overrides.get(folder).copied()
    }

    /// Id of the node under an active drag.
    pub fn dragging(&self) -> Option<&NodeId> {
        match &self.state {
            InteractionState::Dragging(session) => Some(session.target.id()),
            _ => None,
        }
    }

    /// Interaction-owned part of the render state.
    pub fn transient(&self) -> TransientState {
        let (hovered_folder, drag_preview) = match &self.state {
            InteractionState::Dragging(session) => (
                session.hovered_folder.clone(),
                Some((session.target.id().clone(), session.current)),
            ),
            _ => (None, None),
        };
        TransientState {
            selected: self.selected.clone(),
            selected_edges: self.selected_edges.clone(),
            hovered_folder,
            drag_preview,
            size_overrides: self.size_overrides.clone(),
            placeholders: self.placeholders.clone(),
            ..Default::default()
        }
    }

    fn require_idle(&self, action: &'static str) -> EngineResult<()> {
        match self.state {
            InteractionState::Idle => Ok(()),
            _ => Err(EngineError::InvalidState {
                state: self.state.name(),
                action,
            }),
        }
    }

    /// Abandon any gesture and open prompt.
    pub fn cancel(&mut self) {
        if let InteractionState::Resizing { folder, .. } = &self.state {
            self.size_overrides.remove(folder);
        }
        self.state = InteractionState::Idle;
        self.prompt = None;
    }

    /// Drop every reference to a node that no longer exists.
    pub fn forget(&mut self, id: &NodeId) {
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        self.selected_edges
            .retain(|key| &key.from != id && &key.to != id);
        self.placeholders.retain(|p| &p.id != id);
        self.size_overrides.remove(id);
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    /// Select a single node. Clears any edge selection.
    pub fn select(&mut self, id: NodeId) {
        self.selected = Some(id);
        self.selected_edges.clear();
    }

    /// Select an edge, adding to the edge selection when `additive`.
    pub fn select_edge(&mut self, key: EdgeKey, additive: bool) {
        if !additive {
            self.selected_edges.clear();
        }
        self.selected_edges.insert(key);
        self.selected = None;
    }

    /// Click on the empty canvas.
    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.selected_edges.clear();
    }

    /// `Delete` key: one deletion per selected edge that still exists.
    pub fn delete_selected_edges(&mut self, store: &CanvasStateStore) -> Vec<Mutation> {
        std::mem::take(&mut self.selected_edges)
            .into_iter()
            .filter_map(|key| store.edge(&key))
            .map(|edge| Mutation::DeleteEdge {
                from: edge.from.clone(),
                to: edge.to.clone(),
                relation: edge.relation.clone(),
            })
            .collect()
    }

    /// Remove a session-only node.
    pub fn remove_placeholder(&mut self, id: &NodeId) -> bool {
        let before = self.placeholders.len();
        self.forget(id);
        self.placeholders.len() != before
    }

    // -------------------------------------------------------------------------
    // Drag
    // -------------------------------------------------------------------------

    pub fn begin_drag(
        &mut self,
        target: DragTarget,
        pointer: Point,
        store: &CanvasStateStore,
    ) -> EngineResult<()> {
        self.require_idle("start a drag")?;
        let origin = match &target {
            DragTarget::File(id) => store.file(id).and_then(|_| store.position_of(id)),
            DragTarget::Folder(id) => store.folder(id).map(FolderEntity::position),
            DragTarget::Placeholder(id) => self
                .placeholders
                .iter()
                .find(|p| &p.id == id)
                .map(|p| p.position),
        }
        .ok_or_else(|| EngineError::UnknownNode(target.id().clone()))?;

        self.select(target.id().clone());
        debug!(node = %target.id(), state = "dragging", "drag started");
        self.state = InteractionState::Dragging(DragSession {
            target,
            pointer_offset: pointer - origin,
            origin,
            current: origin,
            hovered_folder: None,
        });
        Ok(())
    }

    /// Track the pointer. Returns the folder under a dragged file.
    pub fn drag_move(
        &mut self,
        pointer: Point,
        store: &CanvasStateStore,
    ) -> EngineResult<Option<NodeId>> {
        let InteractionState::Dragging(session) = &mut self.state else {
            return Err(EngineError::InvalidState {
                state: self.state.name(),
                action: "move a drag",
            });
        };
        session.current = pointer - session.pointer_offset;
        if let DragTarget::File(_) = session.target {
            session.hovered_folder =
                folder_at(store.folders(), file_center(session.current)).map(|f| f.id.clone());
        }
        Ok(session.hovered_folder.clone())
    }

    /// Finish a drag at `pointer`, returning the mutations that persist it.
    pub fn end_drag(
        &mut self,
        pointer: Point,
        store: &CanvasStateStore,
    ) -> EngineResult<Vec<Mutation>> {
        let session = match std::mem::take(&mut self.state) {
            InteractionState::Dragging(session) => session,
            other => {
                let state = other.name();
                self.state = other;
                return Err(EngineError::InvalidState {
                    state,
                    action: "end a drag",
                });
            }
        };
        let absolute = pointer - session.pointer_offset;

        let mutations = match &session.target {
            DragTarget::File(id) => {
                let previous = store.file(id).and_then(|f| f.parent_folder.clone());
                let hovered = folder_at(store.folders(), file_center(absolute)).map(|f| f.id.clone());
                let mut out = Vec::new();
                if absolute != session.origin {
                    out.push(Mutation::UpdatePosition {
                        id: id.clone(),
                        position: absolute,
                    });
                }
                if hovered != previous {
                    debug!(
                        file = %id,
                        from = ?previous,
                        to = ?hovered,
                        "containment changed"
                    );
                    out.push(Mutation::MoveToFolder {
                        id: id.clone(),
                        folder: hovered,
                    });
                }
                out
            }
            DragTarget::Folder(id) => {
                let mut out = Vec::new();
                let delta = absolute - session.origin;
                if delta != Point::ORIGIN {
                    out.push(Mutation::MoveFolder {
                        id: id.clone(),
                        position: absolute,
                    });
                    for file in store.files_in(id) {
                        if let Some(at) = store.position_of(&file.id) {
                            out.push(Mutation::UpdatePosition {
                                id: file.id.clone(),
                                position: at + delta,
                            });
                        }
                    }
                }
                if let Some((width, height)) = self.size_override(id) {
                    out.push(Mutation::ResizeFolder {
                        id: id.clone(),
                        width,
                        height,
                    });
                }
                out
            }
            DragTarget::Placeholder(id) => {
                if let Some(p) = self.placeholders.iter_mut().find(|p| &p.id == id) {
                    p.position = absolute;
                }
                Vec::new()
            }
        };
        debug!(node = %session.target.id(), mutations = mutations.len(), "drag finished");
        Ok(mutations)
    }

    // -------------------------------------------------------------------------
    // Connect
    // -------------------------------------------------------------------------

    pub fn begin_connect(&mut self, source: NodeId, store: &CanvasStateStore) -> EngineResult<()> {
        self.require_idle("start a connection")?;
        if !store.contains_node(&source) {
            return Err(EngineError::UnknownNode(source));
        }
        self.state = InteractionState::Connecting { source };
        Ok(())
    }

    /// Release a connection on `target`. On success the edge-authoring step
    /// opens; the gesture ends either way.
    pub fn complete_connect(
        &mut self,
        target: NodeId,
        store: &CanvasStateStore,
    ) -> EngineResult<AuthoringPrompt> {
        let source = match std::mem::take(&mut self.state) {
            InteractionState::Connecting { source } => source,
            other => {
                let state = other.name();
                self.state = other;
                return Err(EngineError::InvalidState {
                    state,
                    action: "complete a connection",
                });
            }
        };
        validate_edge(&source, &target, store)?;
        let prompt = AuthoringPrompt::DescribeEdge {
            from: source,
            to: target,
        };
        self.prompt = Some(prompt.clone());
        Ok(prompt)
    }

    /// Answer the edge-authoring step.
    pub fn describe_edge(
        &mut self,
        relation: RelationType,
        description: Option<String>,
        store: &CanvasStateStore,
    ) -> EngineResult<Mutation> {
        let Some(AuthoringPrompt::DescribeEdge { from, to }) = self.prompt.clone() else {
            return Err(InvalidAction::NoPrompt("edge").into());
        };
        self.prompt = None;
        validate_edge(&from, &to, store)?;
        Ok(Mutation::CreateEdge(EdgeEntity {
            from,
            to,
            relation,
            description: description.filter(|d| !d.trim().is_empty()),
        }))
    }

    // -------------------------------------------------------------------------
    // Resize
    // -------------------------------------------------------------------------

    pub fn begin_resize(&mut self, folder: NodeId, store: &CanvasStateStore) -> EngineResult<()> {
        self.require_idle("start a resize")?;
        let (width, height) = match self.size_override(&folder) {
            Some(size) => size,
            None => {
                let entity = store
                    .folder(&folder)
                    .ok_or_else(|| EngineError::UnknownNode(folder.clone()))?;
                (entity.width, entity.height)
            }
        };
        self.select(folder.clone());
        self.state = InteractionState::Resizing {
            folder,
            width,
            height,
        };
        Ok(())
    }

    /// Apply a resize tick locally. Returns the clamped size to persist.
    pub fn resize_tick(&mut self, width: f64, height: f64) -> EngineResult<(NodeId, f64, f64)> {
        let InteractionState::Resizing {
            folder,
            width: w,
            height: h,
        } = &mut self.state
        else {
            return Err(EngineError::InvalidState {
                state: self.state.name(),
                action: "resize",
            });
        };
        *w = width.max(MIN_FOLDER_WIDTH);
        *h = height.max(MIN_FOLDER_HEIGHT);
        let size = (folder.clone(), *w, *h);
        self.size_overrides.insert(size.0.clone(), (size.1, size.2));
        Ok(size)
    }

    pub fn end_resize(&mut self) -> EngineResult<(NodeId, f64, f64)> {
        match std::mem::take(&mut self.state) {
            InteractionState::Resizing {
                folder,
                width,
                height,
            } => Ok((folder, width, height)),
            other => {
                let state = other.name();
                self.state = other;
                Err(EngineError::InvalidState {
                    state,
                    action: "end a resize",
                })
            }
        }
    }

    /// Drop a local size once the store holds it. A newer tick keeps its
    /// override.
    pub fn settle_size(&mut self, folder: &NodeId, width: f64, height: f64) {
        if self.size_overrides.get(folder) == Some(&(width, height))
            && !matches!(&self.state, InteractionState::Resizing { folder: f, .. } if f == folder)
        {
            self.size_overrides.remove(folder);
        }
    }

    // -------------------------------------------------------------------------
    // Drop authoring
    // -------------------------------------------------------------------------

    /// A palette payload was dropped at `at`. Opens the matching prompt.
    pub fn drop_payload(&mut self, data: &TransferData, at: Point) -> EngineResult<AuthoringPrompt> {
        self.require_idle("drop")?;
        let payload = DragPayload::from_transfer(data).ok_or(InvalidAction::UnreadablePayload)?;
        let prompt = match payload.flow() {
            PayloadFlow::NameFile => AuthoringPrompt::NameFile {
                position: at,
                template: payload.template,
                category: payload.category_label,
            },
            PayloadFlow::NameFolder => AuthoringPrompt::NameFolder { position: at },
            PayloadFlow::Configure => AuthoringPrompt::ConfigureNode {
                position: at,
                payload,
            },
        };
        debug!(prompt = prompt.kind(), "authoring prompt opened");
        self.prompt = Some(prompt.clone());
        Ok(prompt)
    }

    pub fn dismiss_prompt(&mut self) {
        self.prompt = None;
    }

    /// Answer the file-naming step.
    pub fn name_file(&mut self, name: &str, store: &CanvasStateStore) -> EngineResult<Mutation> {
        let Some(AuthoringPrompt::NameFile {
            position, template, ..
        }) = self.prompt.clone()
        else {
            return Err(InvalidAction::NoPrompt("file name").into());
        };
        let name = required(name, "file name")?;
        self.prompt = None;

        let template = template.unwrap_or_default();
        Ok(create_file(
            store,
            position,
            name,
            Some(template.file_type).filter(|t| !t.is_empty()),
            template.description,
            template.content,
        ))
    }

    /// Answer the folder-naming step.
    pub fn name_folder(&mut self, name: &str) -> EngineResult<Mutation> {
        let Some(AuthoringPrompt::NameFolder { position }) = self.prompt.clone() else {
            return Err(InvalidAction::NoPrompt("folder name").into());
        };
        let name = required(name, "folder name")?;
        self.prompt = None;
        Ok(Mutation::CreateFolder(NewFolder::at(name, position.x, position.y)))
    }

    /// Answer the generic configuration step. A placeholder is added locally
    /// and yields no mutation.
    pub fn configure_node(
        &mut self,
        config: NodeConfiguration,
        store: &CanvasStateStore,
    ) -> EngineResult<Option<Mutation>> {
        let Some(AuthoringPrompt::ConfigureNode { position, payload }) = self.prompt.clone()
        else {
            return Err(InvalidAction::NoPrompt("node configuration").into());
        };
        let template = payload.template.clone().unwrap_or_default();

        let mutation = match config {
            NodeConfiguration::File {
                file_name,
                file_type,
                description,
                content,
            } => {
                let name = required(&file_name, "file name")?;
                let file_type = file_type
                    .or_else(|| Some(template.file_type.clone()))
                    .filter(|t| !t.is_empty());
                let description = description
                    .or_else(|| payload.description.clone())
                    .unwrap_or(template.description);
                Some(create_file(
                    store,
                    position,
                    name,
                    file_type,
                    description,
                    content.unwrap_or(template.content),
                ))
            }
            NodeConfiguration::Folder { name } => {
                let name = required(&name, "folder name")?;
                Some(Mutation::CreateFolder(NewFolder::at(
                    name, position.x, position.y,
                )))
            }
            NodeConfiguration::Placeholder { label, description } => {
                let label = required(&label, "label")?;
                self.next_placeholder += 1;
                let node = PlaceholderNode {
                    id: NodeId::new(format!("placeholder-{}", self.next_placeholder)),
                    label: label.to_string(),
                    description: description.or(payload.description),
                    category: payload.category_label,
                    position,
                };
                debug!(node = %node.id, "placeholder added");
                self.placeholders.push(node);
                None
            }
        };
        self.prompt = None;
        Ok(mutation)
    }
}

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str, InvalidAction> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InvalidAction::EmptyField(field));
    }
    Ok(value)
}

fn create_file(
    store: &CanvasStateStore,
    position: Point,
    name: &str,
    file_type: Option<String>,
    description: String,
    content: String,
) -> Mutation {
    let folder = folder_at(store.folders(), file_center(position)).map(|f| f.id.clone());
    Mutation::CreateFile {
        file: NewFile {
            file_path: name.to_string(),
            file_type: file_type.unwrap_or_else(|| file_type_for_path(name).to_string()),
            content,
            description,
        },
        position,
        folder,
    }
}

/// Local edge checks: both ends exist, no self-loop, no existing edge for the
/// pair.
pub(crate) fn validate_edge(
    from: &NodeId,
    to: &NodeId,
    store: &CanvasStateStore,
) -> EngineResult<()> {
    if from == to {
        return Err(InvalidAction::SelfLoop(from.clone()).into());
    }
    for id in [from, to] {
        if !store.contains_node(id) {
            return Err(EngineError::UnknownNode(id.clone()));
        }
    }
    if store.contains_edge(&EdgeKey::new(from.clone(), to.clone())) {
        return Err(InvalidAction::DuplicateEdge {
            from: from.clone(),
            to: to.clone(),
        }
        .into());
    }
    Ok(())
}
