//! Canvas State Store: the local mirror of the remote project.
//!
//! Collections are held behind `Arc`s and only replaced when a refresh brings
//! a value that differs from the one already held, so consumers can skip
//! rebuilding views by comparing identities. Optimistic patches go through the
//! same copy-on-write path.
//!
//! The metadata record is the canonical position of a file. Every write keeps
//! the file entity's own `x`/`y` equal to it.

use std::collections::HashSet;
use std::sync::Arc;

use canvas_client::FolderPatch;
use canvas_core::{
    EdgeEntity, EdgeKey, FileEntity, FolderEntity, MetadataMap, MetadataRecord, NodeId, Point,
    ProjectSnapshot,
};

// =============================================================================
// Change notification
// =============================================================================

/// Which collections an update touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    /// Store revision after the change. Zero until committed.
    pub revision: u64,
    pub files: bool,
    pub folders: bool,
    pub edges: bool,
    pub metadata: bool,
}

impl StoreChange {
    pub fn is_empty(&self) -> bool {
        !(self.files || self.folders || self.edges || self.metadata)
    }

    /// Union of two uncommitted changes.
    pub fn merge(self, other: StoreChange) -> StoreChange {
        StoreChange {
            revision: self.revision.max(other.revision),
            files: self.files || other.files,
            folders: self.folders || other.folders,
            edges: self.edges || other.edges,
            metadata: self.metadata || other.metadata,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Local mirror of files, folders, edges and the metadata cache.
#[derive(Debug, Default)]
pub struct CanvasStateStore {
    files: Arc<Vec<FileEntity>>,
    folders: Arc<Vec<FolderEntity>>,
    edges: Arc<Vec<EdgeEntity>>,
    metadata: Arc<MetadataMap>,
    revision: u64,
    loaded: bool,
    /// Entities whose geometry is being edited locally. Refreshes keep the
    /// local position and size for these.
    dirty: HashSet<NodeId>,
}

impl CanvasStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a snapshot, as if it had been fetched once.
    pub fn from_snapshot(snapshot: ProjectSnapshot) -> Self {
        let mut store = Self::new();
        store.apply_snapshot(snapshot);
        store
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn files(&self) -> &Arc<Vec<FileEntity>> {
        &self.files
    }

    pub fn folders(&self) -> &Arc<Vec<FolderEntity>> {
        &self.folders
    }

    pub fn edges(&self) -> &Arc<Vec<EdgeEntity>> {
        &self.edges
    }

    pub fn metadata(&self) -> &Arc<MetadataMap> {
        &self.metadata
    }

    /// Number of effective changes applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether at least one snapshot has been applied.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn file(&self, id: &NodeId) -> Option<&FileEntity> {
        self.files.iter().find(|f| &f.id == id)
    }

    pub fn folder(&self, id: &NodeId) -> Option<&FolderEntity> {
        self.folders.iter().find(|f| &f.id == id)
    }

    /// Absolute position of a file or folder.
    pub fn position_of(&self, id: &NodeId) -> Option<Point> {
        if let Some(file) = self.file(id) {
            return Some(
                self.metadata
                    .get(id)
                    .and_then(MetadataRecord::position)
                    .unwrap_or_else(|| file.position()),
            );
        }
        self.folder(id).map(FolderEntity::position)
    }

    /// Files whose `parent_folder` names `folder`.
    pub fn files_in(&self, folder: &NodeId) -> Vec<&FileEntity> {
        self.files
            .iter()
            .filter(|f| f.parent_folder.as_ref() == Some(folder))
            .collect()
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&EdgeEntity> {
        self.edges
            .iter()
            .find(|e| e.from == key.from && e.to == key.to)
    }

    pub fn contains_edge(&self, key: &EdgeKey) -> bool {
        self.edge(key).is_some()
    }

    /// Whether `id` names a persisted file or folder.
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.file(id).is_some() || self.folder(id).is_some()
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            files: self.files.to_vec(),
            folders: self.folders.to_vec(),
            edges: self.edges.to_vec(),
            metadata: (*self.metadata).clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Locally dirty entities
    // -------------------------------------------------------------------------

    pub fn mark_dirty(&mut self, id: NodeId) {
        self.dirty.insert(id);
    }

    pub fn clear_dirty(&mut self, id: &NodeId) {
        self.dirty.remove(id);
    }

    pub fn is_dirty(&self, id: &NodeId) -> bool {
        self.dirty.contains(id)
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    /// Merge a freshly fetched snapshot.
    ///
    /// Each collection is swapped only if it differs from the one held.
    /// Returns `None` when nothing changed.
    pub fn apply_snapshot(&mut self, snapshot: ProjectSnapshot) -> Option<StoreChange> {
        let ProjectSnapshot {
            mut files,
            mut folders,
            edges,
            mut metadata,
        } = snapshot;

        self.keep_dirty_geometry(&mut files, &mut folders, &mut metadata);
        sync_file_positions(&mut files, &metadata);
        sync_file_parents(&mut files, &metadata);
        derive_contained_files(&files, &mut folders);

        let change = StoreChange {
            revision: 0,
            files: replace_if_changed(&mut self.files, files),
            folders: replace_if_changed(&mut self.folders, folders),
            edges: replace_if_changed(&mut self.edges, edges),
            metadata: replace_if_changed(&mut self.metadata, metadata),
        };
        self.loaded = true;
        self.commit(change)
    }

    fn keep_dirty_geometry(
        &self,
        files: &mut [FileEntity],
        folders: &mut [FolderEntity],
        metadata: &mut MetadataMap,
    ) {
        if self.dirty.is_empty() {
            return;
        }
        for file in files.iter_mut().filter(|f| self.dirty.contains(&f.id)) {
            if let Some(local) = self.position_of(&file.id) {
                file.x = local.x;
                file.y = local.y;
                metadata
                    .entry(file.id.clone())
                    .or_insert_with(|| file_record(""))
                    .set_position(local);
            }
        }
        for folder in folders.iter_mut().filter(|f| self.dirty.contains(&f.id)) {
            if let Some(local) = self.folder(&folder.id) {
                folder.x = local.x;
                folder.y = local.y;
                folder.width = local.width;
                folder.height = local.height;
            }
        }
    }

    /// Bump the revision for a non-empty change.
    pub fn commit(&mut self, mut change: StoreChange) -> Option<StoreChange> {
        if change.is_empty() {
            return None;
        }
        self.revision += 1;
        change.revision = self.revision;
        Some(change)
    }

    // -------------------------------------------------------------------------
    // Optimistic patches
    //
    // Each returns the uncommitted change; callers batch them and `commit`.
    // -------------------------------------------------------------------------

    /// Set a file's absolute position in both the entity and its metadata
    /// record.
    pub fn set_file_position(&mut self, id: &NodeId, position: Point) -> StoreChange {
        let mut change = StoreChange::default();
        let in_sync = match self.file(id) {
            Some(file) => {
                file.position() == position
                    && self.metadata.get(id).and_then(MetadataRecord::position) == Some(position)
            }
            None => return change,
        };
        if in_sync {
            return change;
        }
        if let Some(file) = Arc::make_mut(&mut self.files).iter_mut().find(|f| &f.id == id) {
            file.x = position.x;
            file.y = position.y;
            change.files = true;
        }
        Arc::make_mut(&mut self.metadata)
            .entry(id.clone())
            .or_insert_with(|| file_record(""))
            .set_position(position);
        change.metadata = true;
        change
    }

    /// Set or clear a file's containing folder, re-deriving folder caches.
    pub fn set_file_parent(&mut self, id: &NodeId, folder: Option<NodeId>) -> StoreChange {
        let mut change = StoreChange::default();
        match self.file(id) {
            Some(file) if file.parent_folder != folder => {}
            _ => return change,
        }
        if let Some(file) = Arc::make_mut(&mut self.files).iter_mut().find(|f| &f.id == id) {
            file.parent_folder = folder.clone();
            change.files = true;
        }
        let recorded = self.metadata.get(id).map(|r| r.parent_folder.as_ref());
        if recorded.is_some_and(|parent| parent != folder.as_ref()) {
            if let Some(record) = Arc::make_mut(&mut self.metadata).get_mut(id) {
                record.parent_folder = folder;
                change.metadata = true;
            }
        }
        change.folders = self.rederive_containment();
        change
    }

    /// Apply a partial folder update.
    pub fn update_folder(&mut self, id: &NodeId, patch: &FolderPatch) -> StoreChange {
        let mut change = StoreChange::default();
        let Some(current) = self.folder(id) else {
            return change;
        };
        let mut next = current.clone();
        if let Some(name) = &patch.name {
            next.name = name.clone();
        }
        next.x = patch.x.unwrap_or(next.x);
        next.y = patch.y.unwrap_or(next.y);
        next.width = patch.width.unwrap_or(next.width);
        next.height = patch.height.unwrap_or(next.height);
        next.is_expanded = patch.is_expanded.unwrap_or(next.is_expanded);
        if &next == current {
            return change;
        }

        let position = next.position();
        if let Some(slot) = Arc::make_mut(&mut self.folders).iter_mut().find(|f| &f.id == id) {
            *slot = next;
            change.folders = true;
        }
        if self
            .metadata
            .get(id)
            .is_some_and(|record| record.position().is_some_and(|p| p != position))
        {
            if let Some(record) = Arc::make_mut(&mut self.metadata).get_mut(id) {
                record.set_position(position);
                change.metadata = true;
            }
        }
        change
    }

    /// Replace a file's content and flag it modified.
    pub fn set_file_content(&mut self, id: &NodeId, content: &str) -> StoreChange {
        let mut change = StoreChange::default();
        match self.file(id) {
            Some(file) if file.content.as_deref() != Some(content) || !file.is_modified => {}
            _ => return change,
        }
        if let Some(file) = Arc::make_mut(&mut self.files).iter_mut().find(|f| &f.id == id) {
            file.content = Some(content.to_string());
            file.is_modified = true;
            change.files = true;
        }
        change
    }

    /// Set the description held in a node's metadata record.
    pub fn set_description(&mut self, id: &NodeId, description: &str) -> StoreChange {
        let mut change = StoreChange::default();
        if self.metadata.get(id).map(|r| r.description.as_str()) == Some(description) {
            return change;
        }
        let fallback = self.position_of(id);
        let record = Arc::make_mut(&mut self.metadata)
            .entry(id.clone())
            .or_insert_with(|| {
                let mut record = file_record("");
                if let Some(p) = fallback {
                    record.set_position(p);
                }
                record
            });
        record.description = description.to_string();
        change.metadata = true;
        change
    }

    /// Add an edge unless one already exists for its endpoints.
    pub fn insert_edge(&mut self, edge: EdgeEntity) -> StoreChange {
        let mut change = StoreChange::default();
        if self.contains_edge(&edge.key()) {
            return change;
        }
        Arc::make_mut(&mut self.edges).push(edge);
        change.edges = true;
        change
    }

    pub fn remove_edge(&mut self, key: &EdgeKey) -> StoreChange {
        let mut change = StoreChange::default();
        if !self.contains_edge(key) {
            return change;
        }
        Arc::make_mut(&mut self.edges).retain(|e| !(e.from == key.from && e.to == key.to));
        change.edges = true;
        change
    }

    /// Remove a file, its metadata record and every edge touching it.
    pub fn remove_file(&mut self, id: &NodeId) -> StoreChange {
        let mut change = StoreChange::default();
        if self.file(id).is_none() {
            return change;
        }
        Arc::make_mut(&mut self.files).retain(|f| &f.id != id);
        change.files = true;
        change = change.merge(self.forget_node(id));
        change.folders = self.rederive_containment() || change.folders;
        change
    }

    /// Remove a folder. With `cascade` its files go too; otherwise they are
    /// released at their current absolute position.
    pub fn remove_folder(&mut self, id: &NodeId, cascade: bool) -> StoreChange {
        let mut change = StoreChange::default();
        if self.folder(id).is_none() {
            return change;
        }
        let contained: Vec<NodeId> = self.files_in(id).into_iter().map(|f| f.id.clone()).collect();
        for file in &contained {
            let next = if cascade {
                self.remove_file(file)
            } else {
                self.set_file_parent(file, None)
            };
            change = change.merge(next);
        }
        Arc::make_mut(&mut self.folders).retain(|f| &f.id != id);
        change.folders = true;
        change.merge(self.forget_node(id))
    }

    fn forget_node(&mut self, id: &NodeId) -> StoreChange {
        let mut change = StoreChange::default();
        if self.metadata.contains_key(id) {
            Arc::make_mut(&mut self.metadata).remove(id);
            change.metadata = true;
        }
        if self.edges.iter().any(|e| e.touches(id)) {
            Arc::make_mut(&mut self.edges).retain(|e| !e.touches(id));
            change.edges = true;
        }
        change
    }

    fn rederive_containment(&mut self) -> bool {
        let mut folders = (*self.folders).clone();
        derive_contained_files(&self.files, &mut folders);
        replace_if_changed(&mut self.folders, folders)
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut Arc<T>, next: T) -> bool {
    if **slot == next {
        return false;
    }
    *slot = Arc::new(next);
    true
}

fn file_record(description: &str) -> MetadataRecord {
    MetadataRecord {
        kind: "file".to_string(),
        description: description.to_string(),
        ..Default::default()
    }
}

/// Copy canonical metadata positions onto the file entities.
fn sync_file_positions(files: &mut [FileEntity], metadata: &MetadataMap) {
    for file in files.iter_mut() {
        if let Some(p) = metadata.get(&file.id).and_then(MetadataRecord::position) {
            file.x = p.x;
            file.y = p.y;
        }
    }
}

/// Fill in file parents the store only reports through the metadata cache.
fn sync_file_parents(files: &mut [FileEntity], metadata: &MetadataMap) {
    for file in files.iter_mut().filter(|f| f.parent_folder.is_none()) {
        if let Some(parent) = metadata.get(&file.id).and_then(|r| r.parent_folder.clone()) {
            file.parent_folder = Some(parent);
        }
    }
}

/// Rebuild each folder's `contained_files` cache from the files' parents.
fn derive_contained_files(files: &[FileEntity], folders: &mut [FolderEntity]) {
    for folder in folders.iter_mut() {
        folder.contained_files = files
            .iter()
            .filter(|f| f.parent_folder.as_ref() == Some(&folder.id))
            .map(|f| f.id.clone())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{edge, file, folder, SnapshotBuilder};
    use canvas_core::RelationType;

    fn sample() -> ProjectSnapshot {
        SnapshotBuilder::new()
            .folder(folder("folder_1", "Services", 100.0, 100.0, 640.0, 420.0))
            .file_in(file("main.py", 200.0, 220.0), "folder_1")
            .file(file("db.py", 900.0, 100.0))
            .edge(edge("main.py", "db.py", RelationType::DependsOn))
            .build()
    }

    #[test]
    fn test_unchanged_snapshot_keeps_identity() {
        let mut store = CanvasStateStore::new();
        assert!(store.apply_snapshot(sample()).is_some());
        let files = store.files().clone();
        let folders = store.folders().clone();
        let edges = store.edges().clone();
        let metadata = store.metadata().clone();

        assert_eq!(store.apply_snapshot(sample()), None);
        assert!(Arc::ptr_eq(&files, store.files()));
        assert!(Arc::ptr_eq(&folders, store.folders()));
        assert!(Arc::ptr_eq(&edges, store.edges()));
        assert!(Arc::ptr_eq(&metadata, store.metadata()));
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_only_changed_collection_is_replaced() {
        let mut store = CanvasStateStore::from_snapshot(sample());
        let files = store.files().clone();
        let mut next = sample();
        next.edges.clear();

        let change = store.apply_snapshot(next).unwrap();
        assert!(change.edges);
        assert!(!change.files);
        assert!(Arc::ptr_eq(&files, store.files()));
        assert_eq!(change.revision, 2);
    }

    #[test]
    fn test_metadata_position_is_canonical() {
        let mut snapshot = sample();
        snapshot.files[1].x = 1.0;
        snapshot.files[1].y = 2.0;
        let store = CanvasStateStore::from_snapshot(snapshot);

        let db = store.file(&"db.py".into()).unwrap();
        assert_eq!(db.position(), Point::new(900.0, 100.0));
    }

    #[test]
    fn test_contained_files_are_derived() {
        let mut snapshot = sample();
        snapshot.folders[0].contained_files = vec!["stale.py".into()];
        let store = CanvasStateStore::from_snapshot(snapshot);
        assert_eq!(
            store.folder(&"folder_1".into()).unwrap().contained_files,
            vec![NodeId::from("main.py")]
        );
    }

    #[test]
    fn test_dirty_entity_keeps_local_position() {
        let mut store = CanvasStateStore::from_snapshot(sample());
        let id = NodeId::from("db.py");
        store.mark_dirty(id.clone());
        let change = store.set_file_position(&id, Point::new(50.0, 60.0));
        store.commit(change);

        assert_eq!(store.apply_snapshot(sample()), None);
        assert_eq!(store.position_of(&id), Some(Point::new(50.0, 60.0)));

        store.clear_dirty(&id);
        assert!(store.apply_snapshot(sample()).is_some());
        assert_eq!(store.position_of(&id), Some(Point::new(900.0, 100.0)));
    }

    #[test]
    fn test_set_file_position_updates_entity_and_metadata() {
        let mut store = CanvasStateStore::from_snapshot(sample());
        let id = NodeId::from("main.py");
        let change = store.set_file_position(&id, Point::new(10.0, 20.0));
        assert!(change.files && change.metadata);
        assert_eq!(store.file(&id).unwrap().position(), Point::new(10.0, 20.0));
        assert_eq!(
            store.metadata()[&id].position(),
            Some(Point::new(10.0, 20.0))
        );
        assert!(store.set_file_position(&id, Point::new(10.0, 20.0)).is_empty());
    }

    #[test]
    fn test_set_parent_rederives_cache() {
        let mut store = CanvasStateStore::from_snapshot(sample());
        let change = store.set_file_parent(&"db.py".into(), Some("folder_1".into()));
        assert!(change.files && change.folders);
        assert_eq!(
            store.folder(&"folder_1".into()).unwrap().contained_files,
            vec![NodeId::from("main.py"), NodeId::from("db.py")]
        );
    }

    /// Containment reported only through the metadata cache, with no
    /// `parentFolder` on the file entities.
    fn metadata_only_containment() -> ProjectSnapshot {
        let mut snapshot = SnapshotBuilder::new()
            .folder(folder("folder_1", "Services", 100.0, 100.0, 640.0, 420.0))
            .file_in(file("api.py", 160.0, 200.0), "folder_1")
            .file(file("db.py", 900.0, 100.0))
            .build();
        for file in snapshot.files.iter_mut() {
            file.parent_folder = None;
        }
        snapshot.folders[0].contained_files.clear();
        snapshot
    }

    #[test]
    fn test_parent_folder_read_from_metadata() {
        let store = CanvasStateStore::from_snapshot(metadata_only_containment());
        let api = NodeId::from("api.py");
        assert_eq!(
            store.file(&api).unwrap().parent_folder,
            Some(NodeId::from("folder_1"))
        );
        assert_eq!(store.folder(&"folder_1".into()).unwrap().contained_files, vec![api]);
        assert_eq!(store.file(&"db.py".into()).unwrap().parent_folder, None);
    }

    #[test]
    fn test_set_parent_patches_metadata_record() {
        let mut store = CanvasStateStore::from_snapshot(metadata_only_containment());
        let api = NodeId::from("api.py");

        let change = store.set_file_parent(&api, None);
        assert!(change.metadata);
        assert_eq!(store.metadata()[&api].parent_folder, None);

        let mut released = metadata_only_containment();
        released.metadata.get_mut(&api).unwrap().parent_folder = None;
        assert_eq!(store.apply_snapshot(released), None);
        assert_eq!(store.file(&api).unwrap().parent_folder, None);
    }

    #[test]
    fn test_remove_folder_cascade_and_release() {
        let mut store = CanvasStateStore::from_snapshot(sample());
        store.remove_folder(&"folder_1".into(), false);
        let main = store.file(&"main.py".into()).unwrap();
        assert_eq!(main.parent_folder, None);
        assert_eq!(main.position(), Point::new(200.0, 220.0));

        let mut store = CanvasStateStore::from_snapshot(sample());
        store.remove_folder(&"folder_1".into(), true);
        assert!(store.file(&"main.py".into()).is_none());
        assert!(store.edges().is_empty());
        assert!(store.folders().is_empty());
    }

    #[test]
    fn test_insert_edge_is_unique_per_pair() {
        let mut store = CanvasStateStore::from_snapshot(sample());
        let change = store.insert_edge(edge("main.py", "db.py", RelationType::Calls));
        assert!(change.is_empty());
        assert_eq!(store.edges().len(), 1);
    }

    #[test]
    fn test_content_patch_marks_modified() {
        let mut store = CanvasStateStore::from_snapshot(sample());
        let id = NodeId::from("main.py");
        assert!(store.set_file_content(&id, "print('hi')").files);
        let main = store.file(&id).unwrap();
        assert!(main.is_modified);
        assert_eq!(main.content.as_deref(), Some("print('hi')"));
    }
}
