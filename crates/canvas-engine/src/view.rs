//! Graph View Builder.
//!
//! [`build_graph`] turns the canonical entities plus session-only state into
//! renderable nodes and edges. Storage positions are absolute; a file inside a
//! folder is rendered relative to that folder's origin.

use std::collections::{BTreeSet, HashMap};

use canvas_core::{
    EdgeEntity, EdgeKey, FileEntity, FileStatus, FolderEntity, MetadataMap, MetadataRecord,
    NodeId, Point, RelationType, FOLDER_COLLAPSED_HEIGHT,
};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde::Serialize;

use crate::interaction::PlaceholderNode;

/// Session-only state folded into a render. Never persisted.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransientState {
    pub selected: Option<NodeId>,
    pub selected_edges: BTreeSet<EdgeKey>,
    pub running: BTreeSet<NodeId>,
    /// Run status overlay; wins over the status carried by the entity.
    pub statuses: HashMap<NodeId, FileStatus>,
    pub generating: BTreeSet<NodeId>,
    /// Folder under the file currently being dragged.
    pub hovered_folder: Option<NodeId>,
    /// Live absolute position of the node being dragged.
    pub drag_preview: Option<(NodeId, Point)>,
    /// Folder sizes being resized, as `(width, height)`.
    pub size_overrides: HashMap<NodeId, (f64, f64)>,
    pub placeholders: Vec<PlaceholderNode>,
}

/// What a node renders as.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RenderNodeKind {
    #[serde(rename_all = "camelCase")]
    File {
        label: String,
        file_path: Option<String>,
        file_type: Option<String>,
        status: FileStatus,
        is_modified: bool,
        description: String,
        category: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Folder {
        name: String,
        width: f64,
        height: f64,
        is_expanded: bool,
        file_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    Placeholder {
        label: String,
        description: Option<String>,
        category: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderNode {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: RenderNodeKind,
    /// Position in the parent's space: relative for contained files,
    /// absolute otherwise.
    pub position: Point,
    pub parent: Option<NodeId>,
    /// Contained in a collapsed folder.
    pub hidden: bool,
    pub selected: bool,
    pub hovered: bool,
    pub running: bool,
    pub generating: bool,
}

impl RenderNode {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, RenderNodeKind::File { .. })
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, RenderNodeKind::Folder { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEdge {
    /// `"{from}->{to}"`.
    pub id: String,
    pub from: NodeId,
    pub to: NodeId,
    pub relation: RelationType,
    /// Relation with separators replaced by spaces.
    pub label: String,
    pub description: Option<String>,
    pub selected: bool,
}

/// Nodes and edges ready for a renderer. Folders precede files so a parent
/// always comes before its children.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RenderGraph {
    pub nodes: Vec<RenderNode>,
    pub edges: Vec<RenderEdge>,
}

impl RenderGraph {
    pub fn node(&self, id: &NodeId) -> Option<&RenderNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Rendered position mapped back to canvas space.
    pub fn absolute_position(&self, id: &NodeId) -> Option<Point> {
        let node = self.node(id)?;
        match node.parent.as_ref().and_then(|p| self.node(p)) {
            Some(parent) => Some(node.position + parent.position),
            None => Some(node.position),
        }
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&RenderEdge> {
        self.edges
            .iter()
            .find(|e| e.from == key.from && e.to == key.to)
    }

    /// Convert to petgraph StableDiGraph for layout/analysis.
    /// Returns the graph and a mapping from NodeId to NodeIndex.
    pub fn to_petgraph(
        &self,
    ) -> (
        StableDiGraph<RenderNode, RelationType>,
        HashMap<NodeId, NodeIndex>,
    ) {
        let mut graph = StableDiGraph::new();
        let mut id_to_index = HashMap::new();

        for node in &self.nodes {
            let idx = graph.add_node(node.clone());
            id_to_index.insert(node.id.clone(), idx);
        }

        for edge in &self.edges {
            if let (Some(&from_idx), Some(&to_idx)) =
                (id_to_index.get(&edge.from), id_to_index.get(&edge.to))
            {
                graph.add_edge(from_idx, to_idx, edge.relation.clone());
            }
        }

        (graph, id_to_index)
    }
}

/// Derive the renderable graph. Pure: nothing passed in is modified.
pub fn build_graph(
    files: &[FileEntity],
    folders: &[FolderEntity],
    edges: &[EdgeEntity],
    metadata: &MetadataMap,
    transient: &TransientState,
) -> RenderGraph {
    let preview = |id: &NodeId| match &transient.drag_preview {
        Some((dragged, at)) if dragged == id => Some(*at),
        _ => None,
    };
    let is_selected = |id: &NodeId| transient.selected.as_ref() == Some(id);

    let mut nodes = Vec::with_capacity(folders.len() + files.len() + transient.placeholders.len());
    let mut origins: HashMap<&NodeId, (Point, bool)> = HashMap::with_capacity(folders.len());

    for folder in folders {
        let position = preview(&folder.id).unwrap_or_else(|| folder.position());
        let (width, stored_height) = transient
            .size_overrides
            .get(&folder.id)
            .copied()
            .unwrap_or((folder.width, folder.height));
        let height = if folder.is_expanded {
            stored_height
        } else {
            FOLDER_COLLAPSED_HEIGHT
        };
        let file_count = files
            .iter()
            .filter(|f| f.parent_folder.as_ref() == Some(&folder.id))
            .count();
        origins.insert(&folder.id, (position, folder.is_expanded));

        nodes.push(RenderNode {
            id: folder.id.clone(),
            kind: RenderNodeKind::Folder {
                name: folder.name.clone(),
                width,
                height,
                is_expanded: folder.is_expanded,
                file_count,
            },
            position,
            parent: None,
            hidden: false,
            selected: is_selected(&folder.id),
            hovered: transient.hovered_folder.as_ref() == Some(&folder.id),
            running: false,
            generating: false,
        });
    }

    for file in files {
        let record = metadata.get(&file.id);
        let absolute = preview(&file.id)
            .or_else(|| record.and_then(MetadataRecord::position))
            .unwrap_or_else(|| file.position());

        // A parent that no longer exists is ignored: the file renders at its
        // absolute position.
        let (position, parent, hidden) = match file
            .parent_folder
            .as_ref()
            .and_then(|p| origins.get(p).map(|o| (p, *o)))
        {
            Some((parent, (origin, expanded))) => {
                (absolute - origin, Some(parent.clone()), !expanded)
            }
            None => (absolute, None, false),
        };

        let running = transient.running.contains(&file.id);
        let status = if running {
            FileStatus::Running
        } else {
            transient
                .statuses
                .get(&file.id)
                .copied()
                .unwrap_or(file.status)
        };

        nodes.push(RenderNode {
            id: file.id.clone(),
            kind: RenderNodeKind::File {
                label: file.label.clone(),
                file_path: file.file_path.clone(),
                file_type: file.file_type.clone(),
                status,
                is_modified: file.is_modified,
                description: record.map(|r| r.description.clone()).unwrap_or_default(),
                category: file.category.clone(),
            },
            position,
            parent,
            hidden,
            selected: is_selected(&file.id),
            hovered: false,
            running,
            generating: transient.generating.contains(&file.id),
        });
    }

    for placeholder in &transient.placeholders {
        nodes.push(RenderNode {
            id: placeholder.id.clone(),
            kind: RenderNodeKind::Placeholder {
                label: placeholder.label.clone(),
                description: placeholder.description.clone(),
                category: placeholder.category.clone(),
            },
            position: preview(&placeholder.id).unwrap_or(placeholder.position),
            parent: None,
            hidden: false,
            selected: is_selected(&placeholder.id),
            hovered: false,
            running: false,
            generating: false,
        });
    }

    let edges = edges
        .iter()
        .map(|edge| {
            let key = edge.key();
            RenderEdge {
                id: key.to_string(),
                from: edge.from.clone(),
                to: edge.to.clone(),
                relation: edge.relation.clone(),
                label: edge.relation.label(),
                description: edge.description.clone(),
                selected: transient.selected_edges.contains(&key),
            }
        })
        .collect();

    RenderGraph { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::services_project;

    fn render(transient: &TransientState) -> RenderGraph {
        let p = services_project();
        build_graph(&p.files, &p.folders, &p.edges, &p.metadata, transient)
    }

    #[test]
    fn test_folders_precede_files() {
        let graph = render(&TransientState::default());
        let first_file = graph.nodes.iter().position(RenderNode::is_file).unwrap();
        assert!(graph.nodes[..first_file].iter().all(RenderNode::is_folder));
        assert_eq!(graph.nodes.len(), 4);
    }

    #[test]
    fn test_contained_file_renders_relative() {
        let graph = render(&TransientState::default());
        let api = graph.node(&"api.py".into()).unwrap();
        assert_eq!(api.position, Point::new(60.0, 100.0));
        assert_eq!(api.parent, Some(NodeId::from("folder_1")));
        assert_eq!(
            graph.absolute_position(&"api.py".into()),
            Some(Point::new(160.0, 200.0))
        );

        let main = graph.node(&"main.py".into()).unwrap();
        assert_eq!(main.position, Point::new(900.0, 600.0));
        assert_eq!(main.parent, None);
    }

    #[test]
    fn test_missing_parent_renders_absolute() {
        let mut p = services_project();
        p.folders.clear();
        let graph = build_graph(&p.files, &p.folders, &p.edges, &p.metadata, &Default::default());
        let api = graph.node(&"api.py".into()).unwrap();
        assert_eq!(api.position, Point::new(160.0, 200.0));
        assert_eq!(api.parent, None);
    }

    #[test]
    fn test_collapsed_folder_height_and_hidden_children() {
        let mut p = services_project();
        p.folders[0].is_expanded = false;
        let graph = build_graph(&p.files, &p.folders, &p.edges, &p.metadata, &Default::default());

        match &graph.node(&"folder_1".into()).unwrap().kind {
            RenderNodeKind::Folder { height, .. } => assert_eq!(*height, FOLDER_COLLAPSED_HEIGHT),
            other => panic!("expected folder, got {:?}", other),
        }
        assert_eq!(p.folders[0].height, 420.0);
        assert!(graph.node(&"api.py".into()).unwrap().hidden);
    }

    #[test]
    fn test_edge_id_and_label() {
        let graph = render(&TransientState::default());
        let edge = &graph.edges[0];
        assert_eq!(edge.id, "main.py->db.py");
        assert_eq!(edge.label, "depends on");
    }

    #[test]
    fn test_transient_flags() {
        let transient = TransientState {
            selected: Some("main.py".into()),
            running: ["db.py".into()].into_iter().collect(),
            generating: ["api.py".into()].into_iter().collect(),
            hovered_folder: Some("folder_1".into()),
            selected_edges: [EdgeKey::new("main.py", "db.py")].into_iter().collect(),
            ..Default::default()
        };
        let graph = render(&transient);

        assert!(graph.node(&"main.py".into()).unwrap().selected);
        assert!(!graph.node(&"db.py".into()).unwrap().selected);
        let db = graph.node(&"db.py".into()).unwrap();
        assert!(db.running);
        assert!(matches!(
            db.kind,
            RenderNodeKind::File {
                status: FileStatus::Running,
                ..
            }
        ));
        assert!(graph.node(&"api.py".into()).unwrap().generating);
        assert!(graph.node(&"folder_1".into()).unwrap().hovered);
        assert!(graph.edges[0].selected);
    }

    #[test]
    fn test_previews_override_store() {
        let transient = TransientState {
            drag_preview: Some(("folder_1".into(), Point::new(150.0, 130.0))),
            size_overrides: [("folder_1".into(), (700.0, 500.0))].into_iter().collect(),
            ..Default::default()
        };
        let graph = render(&transient);

        let folder = graph.node(&"folder_1".into()).unwrap();
        assert_eq!(folder.position, Point::new(150.0, 130.0));
        assert!(matches!(
            folder.kind,
            RenderNodeKind::Folder {
                width,
                height,
                ..
            } if width == 700.0 && height == 500.0
        ));
        // Children follow the previewed folder origin.
        assert_eq!(
            graph.node(&"api.py".into()).unwrap().position,
            Point::new(10.0, 70.0)
        );
    }

    #[test]
    fn test_placeholders_are_rendered() {
        let transient = TransientState {
            placeholders: vec![PlaceholderNode {
                id: "placeholder-1".into(),
                label: "Queue".into(),
                description: None,
                category: Some("Infra".into()),
                position: Point::new(5.0, 5.0),
            }],
            ..Default::default()
        };
        let graph = render(&transient);
        let node = graph.node(&"placeholder-1".into()).unwrap();
        assert!(matches!(node.kind, RenderNodeKind::Placeholder { .. }));
    }

    #[test]
    fn test_to_petgraph_skips_dangling_edges() {
        let mut p = services_project();
        p.edges.push(crate::test_fixtures::edge(
            "main.py",
            "gone.py",
            RelationType::Calls,
        ));
        let graph = build_graph(&p.files, &p.folders, &p.edges, &p.metadata, &Default::default());
        let (pg, index) = graph.to_petgraph();
        assert_eq!(pg.node_count(), 4);
        assert_eq!(pg.edge_count(), 1);
        assert!(index.contains_key(&NodeId::from("folder_1")));
    }
}
