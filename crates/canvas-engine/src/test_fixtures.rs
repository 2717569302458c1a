//! Minimal test fixtures for engine testing.
//!
//! Provides in-memory project snapshots and a [`MockRemoteStore`] that
//! behaves like the project store without any network, recording every call
//! it receives.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use canvas_client::{
    ClientError, ClientResult, FolderPatch, NewFile, NewFolder, PushChannel, PushSender,
    RemoteStore, RunStatus, DEFAULT_CHANNEL_CAPACITY,
};
use canvas_core::{
    file_type_for_path, EdgeEntity, FileEntity, FileStatus, FolderEntity, MetadataMap,
    MetadataRecord, NodeId, Point, ProjectSnapshot, RelationType, DEFAULT_FOLDER_CATEGORY,
};

// ============================================================================
// Entity helpers
// ============================================================================

/// A file named `id` at an absolute position.
pub fn file(id: &str, x: f64, y: f64) -> FileEntity {
    FileEntity {
        id: NodeId::from(id),
        label: id.to_string(),
        x,
        y,
        file_path: Some(id.to_string()),
        file_type: Some(file_type_for_path(id).to_string()),
        content: Some(String::new()),
        status: FileStatus::Idle,
        is_modified: false,
        parent_folder: None,
        category: None,
    }
}

/// A folder at an absolute position with the given size.
pub fn folder(id: &str, name: &str, x: f64, y: f64, width: f64, height: f64) -> FolderEntity {
    FolderEntity {
        id: NodeId::from(id),
        name: name.to_string(),
        x,
        y,
        width,
        height,
        is_expanded: true,
        contained_files: Vec::new(),
        category: DEFAULT_FOLDER_CATEGORY.to_string(),
    }
}

pub fn edge(from: &str, to: &str, relation: RelationType) -> EdgeEntity {
    EdgeEntity {
        from: NodeId::from(from),
        to: NodeId::from(to),
        relation,
        description: None,
    }
}

fn positioned_record(kind: &str, description: &str, at: Point) -> MetadataRecord {
    let mut record = MetadataRecord {
        kind: kind.to_string(),
        description: description.to_string(),
        ..Default::default()
    };
    record.set_position(at);
    record
}

// ============================================================================
// Snapshot builder
// ============================================================================

/// Builder for project snapshots whose metadata agrees with the files.
#[derive(Default)]
pub struct SnapshotBuilder {
    snapshot: ProjectSnapshot,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level file and its metadata record.
    pub fn file(mut self, file: FileEntity) -> Self {
        let mut record = positioned_record("file", "", file.position());
        record.parent_folder = file.parent_folder.clone();
        self.snapshot.metadata.insert(file.id.clone(), record);
        self.snapshot.files.push(file);
        self
    }

    /// Add a file contained in `folder`. Its position stays absolute.
    pub fn file_in(self, mut file: FileEntity, folder: &str) -> Self {
        file.parent_folder = Some(NodeId::from(folder));
        self.file(file)
    }

    pub fn folder(mut self, folder: FolderEntity) -> Self {
        self.snapshot.folders.push(folder);
        self
    }

    pub fn edge(mut self, edge: EdgeEntity) -> Self {
        self.snapshot.edges.push(edge);
        self
    }

    pub fn build(mut self) -> ProjectSnapshot {
        for folder in self.snapshot.folders.iter_mut() {
            folder.contained_files = self
                .snapshot
                .files
                .iter()
                .filter(|f| f.parent_folder.as_ref() == Some(&folder.id))
                .map(|f| f.id.clone())
                .collect();
        }
        self.snapshot
    }
}

// ============================================================================
// Pre-built projects for common scenarios
// ============================================================================

/// An empty project.
pub fn empty_project() -> ProjectSnapshot {
    ProjectSnapshot::default()
}

/// A "Services" folder at (100, 100), 640x420, holding `api.py`, plus a
/// free-standing `main.py` and `db.py`.
///
/// ```text
/// [Services]            main.py --depends_on--> db.py
///    api.py
/// ```
pub fn services_project() -> ProjectSnapshot {
    SnapshotBuilder::new()
        .folder(folder("folder_1", "Services", 100.0, 100.0, 640.0, 420.0))
        .file_in(file("api.py", 160.0, 200.0), "folder_1")
        .file(file("main.py", 900.0, 600.0))
        .file(file("db.py", 1200.0, 600.0))
        .edge(edge("main.py", "db.py", RelationType::DependsOn))
        .build()
}

// ============================================================================
// Mock remote store
// ============================================================================

#[derive(Default)]
struct MockState {
    snapshot: ProjectSnapshot,
    calls: Vec<String>,
    failures: HashSet<String>,
    project_missing: bool,
    fetch_delay: Option<Duration>,
    metadata_containment: bool,
    running: HashSet<NodeId>,
    runs: HashMap<NodeId, PushSender>,
    next_folder: u32,
}

impl MockState {
    fn rederive(&mut self) {
        let files = &self.snapshot.files;
        for folder in self.snapshot.folders.iter_mut() {
            folder.contained_files = files
                .iter()
                .filter(|f| f.parent_folder.as_ref() == Some(&folder.id))
                .map(|f| f.id.clone())
                .collect();
        }
    }

    fn file_mut(&mut self, id: &NodeId) -> ClientResult<&mut FileEntity> {
        self.snapshot
            .files
            .iter_mut()
            .find(|f| &f.id == id)
            .ok_or_else(|| ClientError::not_found(format!("file {id}")))
    }
}

/// In-memory [`RemoteStore`] with call recording and failure injection.
pub struct MockRemoteStore {
    state: Mutex<MockState>,
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new(empty_project())
    }
}

impl MockRemoteStore {
    pub fn new(snapshot: ProjectSnapshot) -> Self {
        let next_folder = snapshot.folders.len() as u32;
        Self {
            state: Mutex::new(MockState {
                snapshot,
                next_folder,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and apply injected failures.
    fn enter(&self, op: &str, detail: String) -> ClientResult<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.calls.push(if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op} {detail}")
        });
        if state.project_missing {
            return Err(ClientError::not_found("project"));
        }
        if state.failures.remove(op) {
            return Err(ClientError::Status {
                resource: op.to_string(),
                status: 500,
                message: "injected failure".to_string(),
            });
        }
        Ok(state)
    }

    /// Every call received so far, e.g. `update_file_position main.py 200 200`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls other than the four collection reads.
    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("list_") && c != "get_metadata" && !c.starts_with("file_status"))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make the next call of `op` fail with a 500.
    pub fn fail_next(&self, op: &str) {
        self.lock().failures.insert(op.to_string());
    }

    /// Answer every call with 404 from now on.
    pub fn set_project_missing(&self, missing: bool) {
        self.lock().project_missing = missing;
    }

    /// Delay collection reads.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.lock().fetch_delay = delay;
    }

    /// Report containment only through `parentFolder` in the metadata
    /// records, leaving it off the listed file entities.
    pub fn set_containment_in_metadata(&self, enabled: bool) {
        self.lock().metadata_containment = enabled;
    }

    /// Current remote state.
    pub fn snapshot(&self) -> ProjectSnapshot {
        self.lock().snapshot.clone()
    }

    /// Edit the remote state directly, as another client would.
    pub fn edit<R>(&self, f: impl FnOnce(&mut ProjectSnapshot) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state.snapshot);
        state.rederive();
        result
    }

    /// Force what the status endpoint reports for a file.
    pub fn set_running(&self, id: &NodeId, running: bool) {
        let mut state = self.lock();
        if running {
            state.running.insert(id.clone());
        } else {
            state.running.remove(id);
        }
    }

    /// Producer side of the channel opened by the last `run_file` for `id`.
    pub fn run_sender(&self, id: &NodeId) -> Option<PushSender> {
        self.lock().runs.get(id).cloned()
    }

    async fn delay_fetch(&self) {
        let delay = self.lock().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn list_files(&self) -> ClientResult<Vec<FileEntity>> {
        self.delay_fetch().await;
        let state = self.enter("list_files", String::new())?;
        let mut files = state.snapshot.files.clone();
        if state.metadata_containment {
            for file in files.iter_mut() {
                file.parent_folder = None;
            }
        }
        Ok(files)
    }

    async fn list_folders(&self) -> ClientResult<Vec<FolderEntity>> {
        self.delay_fetch().await;
        Ok(self
            .enter("list_folders", String::new())?
            .snapshot
            .folders
            .clone())
    }

    async fn list_edges(&self) -> ClientResult<Vec<EdgeEntity>> {
        self.delay_fetch().await;
        Ok(self.enter("list_edges", String::new())?.snapshot.edges.clone())
    }

    async fn get_metadata(&self) -> ClientResult<MetadataMap> {
        self.delay_fetch().await;
        Ok(self
            .enter("get_metadata", String::new())?
            .snapshot
            .metadata
            .clone())
    }

    async fn create_file(&self, new: &NewFile) -> ClientResult<FileEntity> {
        let mut state = self.enter("create_file", new.file_path.clone())?;
        let id = NodeId::from(new.file_path.as_str());
        if state.snapshot.files.iter().any(|f| f.id == id) {
            return Err(ClientError::Status {
                resource: "files".into(),
                status: 400,
                message: "File already exists".into(),
            });
        }
        let created = FileEntity {
            id: id.clone(),
            label: new.file_path.clone(),
            x: 100.0,
            y: 100.0,
            file_path: Some(new.file_path.clone()),
            file_type: Some(new.file_type.clone()),
            content: Some(new.content.clone()),
            ..Default::default()
        };
        state.snapshot.metadata.insert(
            id,
            positioned_record("file", &new.description, created.position()),
        );
        state.snapshot.files.push(created.clone());
        Ok(created)
    }

    async fn update_file_position(&self, id: &NodeId, position: Point) -> ClientResult<()> {
        let mut state = self.enter(
            "update_file_position",
            format!("{id} {} {}", position.x, position.y),
        )?;
        let file = state.file_mut(id)?;
        file.x = position.x;
        file.y = position.y;
        state
            .snapshot
            .metadata
            .entry(id.clone())
            .or_insert_with(|| positioned_record("file", "", position))
            .set_position(position);
        Ok(())
    }

    async fn update_file_content(&self, id: &NodeId, content: &str) -> ClientResult<()> {
        let mut state = self.enter("update_file_content", id.to_string())?;
        let file = state.file_mut(id)?;
        file.content = Some(content.to_string());
        file.is_modified = true;
        Ok(())
    }

    async fn update_file_description(&self, id: &NodeId, description: &str) -> ClientResult<()> {
        let mut state = self.enter("update_file_description", id.to_string())?;
        state.file_mut(id)?;
        if let Some(record) = state.snapshot.metadata.get_mut(id) {
            record.description = description.to_string();
        }
        Ok(())
    }

    async fn move_file_to_folder(
        &self,
        id: &NodeId,
        folder: Option<&NodeId>,
    ) -> ClientResult<()> {
        let detail = format!("{id} {}", folder.map(NodeId::as_str).unwrap_or("-"));
        let mut state = self.enter("move_file_to_folder", detail)?;
        if let Some(folder) = folder {
            if !state.snapshot.folders.iter().any(|f| &f.id == folder) {
                return Err(ClientError::not_found(format!("folder {folder}")));
            }
        }
        state.file_mut(id)?.parent_folder = folder.cloned();
        if let Some(record) = state.snapshot.metadata.get_mut(id) {
            record.parent_folder = folder.cloned();
        }
        state.rederive();
        Ok(())
    }

    async fn delete_file(&self, id: &NodeId) -> ClientResult<()> {
        let mut state = self.enter("delete_file", id.to_string())?;
        state.file_mut(id)?;
        state.snapshot.files.retain(|f| &f.id != id);
        state.snapshot.metadata.remove(id);
        state.snapshot.edges.retain(|e| !e.touches(id));
        state.rederive();
        Ok(())
    }

    async fn generate_file(&self, id: &NodeId) -> ClientResult<()> {
        let mut state = self.enter("generate_file", id.to_string())?;
        let description = state
            .snapshot
            .metadata
            .get(id)
            .map(|r| r.description.clone())
            .unwrap_or_default();
        let file = state.file_mut(id)?;
        file.content = Some(format!("# {description}\n"));
        file.is_modified = true;
        Ok(())
    }

    async fn create_folder(&self, new: &NewFolder) -> ClientResult<FolderEntity> {
        let mut state = self.enter("create_folder", new.name.clone())?;
        state.next_folder += 1;
        let created = folder(
            &format!("folder_{}", state.next_folder),
            &new.name,
            new.x,
            new.y,
            new.width,
            new.height,
        );
        state.snapshot.folders.push(created.clone());
        Ok(created)
    }

    async fn update_folder(&self, id: &NodeId, patch: &FolderPatch) -> ClientResult<()> {
        let detail = serde_json::to_string(patch).unwrap_or_default();
        let mut state = self.enter("update_folder", format!("{id} {detail}"))?;
        let folder = state
            .snapshot
            .folders
            .iter_mut()
            .find(|f| &f.id == id)
            .ok_or_else(|| ClientError::not_found(format!("folder {id}")))?;
        if let Some(name) = &patch.name {
            folder.name = name.clone();
        }
        folder.x = patch.x.unwrap_or(folder.x);
        folder.y = patch.y.unwrap_or(folder.y);
        folder.width = patch.width.unwrap_or(folder.width);
        folder.height = patch.height.unwrap_or(folder.height);
        folder.is_expanded = patch.is_expanded.unwrap_or(folder.is_expanded);
        Ok(())
    }

    async fn delete_folder(&self, id: &NodeId) -> ClientResult<()> {
        let mut state = self.enter("delete_folder", id.to_string())?;
        if !state.snapshot.folders.iter().any(|f| &f.id == id) {
            return Err(ClientError::not_found(format!("folder {id}")));
        }
        for file in state.snapshot.files.iter_mut() {
            if file.parent_folder.as_ref() == Some(id) {
                file.parent_folder = None;
            }
        }
        for record in state.snapshot.metadata.values_mut() {
            if record.parent_folder.as_ref() == Some(id) {
                record.parent_folder = None;
            }
        }
        state.snapshot.folders.retain(|f| &f.id != id);
        state.snapshot.metadata.remove(id);
        Ok(())
    }

    async fn create_edge(&self, edge: &EdgeEntity) -> ClientResult<()> {
        let mut state = self.enter("create_edge", edge.key().to_string())?;
        if edge.from == edge.to
            || state
                .snapshot
                .edges
                .iter()
                .any(|e| e.from == edge.from && e.to == edge.to)
        {
            return Err(ClientError::Status {
                resource: "edges".into(),
                status: 400,
                message: "Edge already exists".into(),
            });
        }
        state.snapshot.edges.push(edge.clone());
        Ok(())
    }

    async fn delete_edge(
        &self,
        from: &NodeId,
        to: &NodeId,
        relation: &RelationType,
    ) -> ClientResult<()> {
        let mut state = self.enter("delete_edge", format!("{from}->{to} {relation}"))?;
        let before = state.snapshot.edges.len();
        state
            .snapshot
            .edges
            .retain(|e| !(&e.from == from && &e.to == to && &e.relation == relation));
        if state.snapshot.edges.len() == before {
            return Err(ClientError::not_found(format!("edge {from}->{to}")));
        }
        Ok(())
    }

    async fn run_file(&self, id: &NodeId) -> ClientResult<PushChannel> {
        let mut state = self.enter("run_file", id.to_string())?;
        state.file_mut(id)?;
        let (tx, channel) = PushChannel::pair(DEFAULT_CHANNEL_CAPACITY);
        state.runs.insert(id.clone(), tx);
        state.running.insert(id.clone());
        Ok(channel)
    }

    async fn stop_file(&self, id: &NodeId) -> ClientResult<()> {
        let mut state = self.enter("stop_file", id.to_string())?;
        state.running.remove(id);
        state.runs.remove(id);
        Ok(())
    }

    async fn file_status(&self, id: &NodeId) -> ClientResult<RunStatus> {
        let state = self.enter("file_status", id.to_string())?;
        Ok(RunStatus {
            running: state.running.contains(id),
        })
    }
}
