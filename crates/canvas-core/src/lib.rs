//! Core domain types shared across the canvas workspace.
//!
//! Everything here is plain data: the entities mirrored from the remote project
//! store, the geometry constants the canvas lays them out with, and the payload
//! carried by drag-authoring gestures. No I/O happens in this crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

// =============================================================================
// Geometry
// =============================================================================

/// Height of the folder title band. Drops onto the band do not count as
/// dropping into the folder.
pub const FOLDER_HEADER_HEIGHT: f64 = 40.0;

/// Rendered height of a collapsed folder.
pub const FOLDER_COLLAPSED_HEIGHT: f64 = 60.0;

/// Width given to folders created without an explicit size.
pub const DEFAULT_FOLDER_WIDTH: f64 = 600.0;

/// Height given to folders created without an explicit size.
pub const DEFAULT_FOLDER_HEIGHT: f64 = 400.0;

/// Nominal footprint of a file node, used to find its center during drags.
pub const FILE_NODE_WIDTH: f64 = 180.0;
pub const FILE_NODE_HEIGHT: f64 = 64.0;

/// Category every folder is grouped under.
pub const DEFAULT_FOLDER_CATEGORY: &str = "Folders";

/// A point on the canvas.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Axis-aligned rectangle in canvas space.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Inclusive containment test.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Center of a file node whose top-left corner sits at `origin`.
pub fn file_center(origin: Point) -> Point {
    Point::new(
        origin.x + FILE_NODE_WIDTH / 2.0,
        origin.y + FILE_NODE_HEIGHT / 2.0,
    )
}

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier shared by files, folders and session-only placeholder nodes.
///
/// The remote store hands out string ids (file names for files, `folder_N` for
/// folders), so the id is kept opaque.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// Files and folders
// =============================================================================

/// Execution status of a file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
}

impl FileStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FileStatus::Idle => "idle",
            FileStatus::Running => "running",
            FileStatus::Success => "success",
            FileStatus::Failed => "failed",
        }
    }
}

/// A source file placed on the canvas.
///
/// `x`/`y` are absolute canvas coordinates. The metadata record for the same
/// id is the canonical position source; these fields are kept equal to it on
/// every write.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntity {
    pub id: NodeId,
    pub label: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status: FileStatus,
    #[serde(default)]
    pub is_modified: bool,
    /// Containing folder. Lookup only: the folder may have been deleted.
    #[serde(default)]
    pub parent_folder: Option<NodeId>,
    #[serde(default)]
    pub category: Option<String>,
}

impl FileEntity {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Language tag for a file name, from its extension.
pub fn file_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "py" => "python",
        "rs" => "rust",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" => "cpp",
        "md" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "html" => "html",
        "css" => "css",
        "sh" => "shell",
        _ => "text",
    }
}

fn default_expanded() -> bool {
    true
}

fn default_folder_category() -> String {
    DEFAULT_FOLDER_CATEGORY.to_string()
}

/// A folder: a resizable container that files can be dropped into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntity {
    pub id: NodeId,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_expanded")]
    pub is_expanded: bool,
    /// Cached list of contained file ids. Derived from the files'
    /// `parent_folder`; never treated as authoritative.
    #[serde(default)]
    pub contained_files: Vec<NodeId>,
    #[serde(default = "default_folder_category")]
    pub category: String,
}

impl FolderEntity {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Height the folder occupies on screen.
    pub fn visible_height(&self) -> f64 {
        if self.is_expanded {
            self.height
        } else {
            FOLDER_COLLAPSED_HEIGHT
        }
    }

    /// Region that accepts dropped files: the visible body below the header.
    pub fn drop_zone(&self) -> Option<Rect> {
        let body = self.visible_height() - FOLDER_HEADER_HEIGHT;
        if body <= 0.0 || self.width <= 0.0 {
            return None;
        }
        Some(Rect::new(
            self.x,
            self.y + FOLDER_HEADER_HEIGHT,
            self.width,
            body,
        ))
    }
}

// =============================================================================
// Edges
// =============================================================================

/// Relationship carried by an edge.
///
/// The remote store accepts free-form relation names, so anything outside the
/// known set decodes as [`RelationType::Other`]. Parsing user input with
/// [`FromStr`] only accepts the known set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationType {
    DependsOn,
    Uses,
    Imports,
    Calls,
    Extends,
    Implements,
    References,
    Contains,
    BelongsTo,
    Other(String),
}

impl RelationType {
    pub const ALL: [RelationType; 9] = [
        RelationType::DependsOn,
        RelationType::Uses,
        RelationType::Imports,
        RelationType::Calls,
        RelationType::Extends,
        RelationType::Implements,
        RelationType::References,
        RelationType::Contains,
        RelationType::BelongsTo,
    ];

    /// Wire name, e.g. `depends_on`.
    pub fn as_str(&self) -> &str {
        match self {
            RelationType::DependsOn => "depends_on",
            RelationType::Uses => "uses",
            RelationType::Imports => "imports",
            RelationType::Calls => "calls",
            RelationType::Extends => "extends",
            RelationType::Implements => "implements",
            RelationType::References => "references",
            RelationType::Contains => "contains",
            RelationType::BelongsTo => "belongs_to",
            RelationType::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, RelationType::Other(_))
    }

    /// Display label with separators replaced by spaces, e.g. `depends on`.
    pub fn label(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        RelationType::ALL
            .iter()
            .find(|r| r.as_str() == normalized)
            .cloned()
            .ok_or_else(|| format!("unknown relation type: {s}"))
    }
}

impl From<String> for RelationType {
    fn from(name: String) -> Self {
        name.parse().unwrap_or(RelationType::Other(name))
    }
}

impl From<RelationType> for String {
    fn from(relation: RelationType) -> Self {
        match relation {
            RelationType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Ordered endpoint pair identifying an edge. At most one edge exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: NodeId,
    pub to: NodeId,
}

impl EdgeKey {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeEntity {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(rename = "type")]
    pub relation: RelationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EdgeEntity {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.from.clone(), self.to.clone())
    }

    pub fn touches(&self, id: &NodeId) -> bool {
        &self.from == id || &self.to == id
    }
}

// =============================================================================
// Metadata cache
// =============================================================================

/// Position and description cache entry, keyed by entity id.
///
/// This is the canonical position source for rendering.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    /// Containing folder of a file. Stores that keep containment in the
    /// metadata cache rather than on the file entity report it here.
    #[serde(
        rename = "parentFolder",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_folder: Option<NodeId>,
    /// Fields this crate does not interpret, kept so records survive a
    /// round trip unchanged.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl MetadataRecord {
    pub fn position(&self) -> Option<Point> {
        match (self.x, self.y) {
            (Some(x), Some(y)) => Some(Point::new(x, y)),
            _ => None,
        }
    }

    pub fn set_position(&mut self, p: Point) {
        self.x = Some(p.x);
        self.y = Some(p.y);
    }
}

/// The full metadata cache of a project.
pub type MetadataMap = BTreeMap<NodeId, MetadataRecord>;

/// Everything the canvas mirrors from the remote store in one fetch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProjectSnapshot {
    pub files: Vec<FileEntity>,
    pub folders: Vec<FolderEntity>,
    pub edges: Vec<EdgeEntity>,
    pub metadata: MetadataMap,
}

// =============================================================================
// Drag-authoring payload
// =============================================================================

/// Preferred transfer-data key for authoring payloads.
pub const PAYLOAD_MIME_JSON: &str = "application/reactflow+json";

/// Fallback transfer-data key.
pub const PAYLOAD_MIME_PLAIN: &str = "text/plain";

/// Starter content offered by a palette entry.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    pub default_file_name: String,
    pub file_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
}

/// Payload carried by a palette drag onto the canvas.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragPayload {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_special: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub template: Option<NodeTemplate>,
    #[serde(default)]
    pub category_label: Option<String>,
}

/// Which placement flow a payload opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFlow {
    NameFile,
    NameFolder,
    Configure,
}

impl DragPayload {
    /// Decode a payload from drag transfer data, preferring the JSON key.
    ///
    /// A plain-text fallback that is not JSON is read as a bare token; the
    /// `file` and `folder` tokens are special.
    pub fn from_transfer(data: &TransferData) -> Option<Self> {
        if let Some(raw) = data.get(PAYLOAD_MIME_JSON) {
            if let Ok(payload) = serde_json::from_str::<DragPayload>(raw) {
                return Some(payload);
            }
        }
        let raw = data.get(PAYLOAD_MIME_PLAIN)?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(payload) = serde_json::from_str::<DragPayload>(raw) {
            return Some(payload);
        }
        let is_special = raw == "file" || raw == "folder";
        Some(Self {
            label: raw.to_string(),
            kind: raw.to_string(),
            is_special,
            ..Default::default()
        })
    }

    pub fn flow(&self) -> PayloadFlow {
        match (self.is_special, self.kind.as_str()) {
            (true, "file") => PayloadFlow::NameFile,
            (true, "folder") => PayloadFlow::NameFolder,
            _ => PayloadFlow::Configure,
        }
    }
}

/// Drag transfer data: string values keyed by MIME type.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransferData {
    entries: BTreeMap<String, String>,
}

impl TransferData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, mime: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(mime, value);
        self
    }

    pub fn set(&mut self, mime: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(mime.into(), value.into());
    }

    pub fn get(&self, mime: &str) -> Option<&str> {
        self.entries.get(mime).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(expanded: bool) -> FolderEntity {
        FolderEntity {
            id: NodeId::from("folder_1"),
            name: "Services".into(),
            x: 100.0,
            y: 100.0,
            width: 640.0,
            height: 420.0,
            is_expanded: expanded,
            contained_files: vec![],
            category: DEFAULT_FOLDER_CATEGORY.into(),
        }
    }

    #[test]
    fn test_drop_zone_excludes_header() {
        let zone = folder(true).drop_zone().unwrap();
        assert!(!zone.contains(Point::new(150.0, 120.0)));
        assert!(zone.contains(Point::new(150.0, 150.0)));
        assert!(zone.contains(Point::new(739.0, 519.0)));
        assert!(!zone.contains(Point::new(150.0, 530.0)));
    }

    #[test]
    fn test_collapsed_drop_zone_is_short() {
        let zone = folder(false).drop_zone().unwrap();
        assert_eq!(zone.height, FOLDER_COLLAPSED_HEIGHT - FOLDER_HEADER_HEIGHT);
        assert!(!zone.contains(Point::new(150.0, 300.0)));
    }

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(file_type_for_path("main.py"), "python");
        assert_eq!(file_type_for_path("web/App.TSX"), "typescript");
        assert_eq!(file_type_for_path("Makefile"), "text");
    }

    #[test]
    fn test_relation_label_and_parse() {
        assert_eq!(RelationType::DependsOn.label(), "depends on");
        assert_eq!(RelationType::BelongsTo.label(), "belongs to");
        assert_eq!(
            "depends on".parse::<RelationType>().unwrap(),
            RelationType::DependsOn
        );
        assert!("owns".parse::<RelationType>().is_err());
    }

    #[test]
    fn test_payload_prefers_json_key() {
        let json = r#"{"label":"Service","type":"python","isSpecial":false,"categoryLabel":"Backend"}"#;
        let data = TransferData::new()
            .with(PAYLOAD_MIME_JSON, json)
            .with(PAYLOAD_MIME_PLAIN, "folder");
        let payload = DragPayload::from_transfer(&data).unwrap();
        assert_eq!(payload.label, "Service");
        assert_eq!(payload.category_label.as_deref(), Some("Backend"));
        assert_eq!(payload.flow(), PayloadFlow::Configure);
    }

    #[test]
    fn test_payload_plain_fallback_token() {
        let data = TransferData::new().with(PAYLOAD_MIME_PLAIN, "folder");
        let payload = DragPayload::from_transfer(&data).unwrap();
        assert!(payload.is_special);
        assert_eq!(payload.flow(), PayloadFlow::NameFolder);

        assert!(DragPayload::from_transfer(&TransferData::new()).is_none());
    }

    #[test]
    fn test_metadata_keeps_unknown_fields() {
        let raw = r#"{"type":"file","description":"entry","x":10,"y":20,"owner":"ops"}"#;
        let record: MetadataRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.position(), Some(Point::new(10.0, 20.0)));
        assert_eq!(record.extra.get("owner"), Some(&serde_json::json!("ops")));
        assert_eq!(record.parent_folder, None);
    }

    #[test]
    fn test_metadata_reads_parent_folder() {
        let raw = r#"{"type":"file","x":160,"y":200,"parentFolder":"folder_1"}"#;
        let record: MetadataRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.parent_folder, Some(NodeId::from("folder_1")));
        assert!(!record.extra.contains_key("parentFolder"));

        let cleared: MetadataRecord =
            serde_json::from_str(r#"{"type":"file","parentFolder":null}"#).unwrap();
        assert_eq!(cleared.parent_folder, None);
    }

    #[test]
    fn test_unknown_relation_decodes_as_other() {
        let raw = r#"[{"from":"a","to":"b","type":"depends_on"},{"from":"b","to":"c","type":"renders"}]"#;
        let edges: Vec<EdgeEntity> = serde_json::from_str(raw).unwrap();
        assert_eq!(edges[0].relation, RelationType::DependsOn);
        assert_eq!(edges[1].relation, RelationType::Other("renders".into()));
        assert!(!edges[1].relation.is_known());
        assert_eq!(
            serde_json::to_value(&edges[1]).unwrap()["type"],
            serde_json::json!("renders")
        );
    }
}
