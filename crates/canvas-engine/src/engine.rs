//! The canvas engine: ties the state store, interaction controller,
//! dispatcher and execution tracker to one project view.
//!
//! A host creates a [`CanvasEngine`], calls [`CanvasEngine::mount`] to start
//! the background polls and feeds user gestures through the async methods.
//! Everything the host needs to redraw arrives on the event bus returned by
//! [`CanvasEngine::subscribe`]; [`CanvasEngine::graph`] builds the current
//! render graph on demand.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use canvas_client::RemoteStore;
use canvas_core::{EdgeKey, FileStatus, NodeId, Point, RelationType, TransferData};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::dispatch::{DispatchOutcome, Mutation, MutationDispatcher};
use crate::error::{EngineError, EngineResult, InvalidAction};
use crate::events::{EngineEvent, NavigationTarget, NoticeLevel};
use crate::execution::ExecutionTracker;
use crate::interaction::{
    AuthoringPrompt, DragTarget, InteractionController, InteractionState, NodeConfiguration,
};
use crate::store::CanvasStateStore;
use crate::view::{build_graph, RenderGraph};

struct EngineInner {
    config: EngineConfig,
    client: Arc<dyn RemoteStore>,
    store: Arc<RwLock<CanvasStateStore>>,
    /// Locked only after the store lock, never across an await.
    controller: Mutex<InteractionController>,
    generating: Mutex<BTreeSet<NodeId>>,
    dispatcher: MutationDispatcher,
    tracker: ExecutionTracker,
    debouncer: Debouncer<NodeId>,
    events: broadcast::Sender<EngineEvent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a mounted (or mountable) canvas. Cheap to clone.
#[derive(Clone)]
pub struct CanvasEngine {
    inner: Arc<EngineInner>,
}

impl CanvasEngine {
    pub fn new(client: Arc<dyn RemoteStore>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let store = Arc::new(RwLock::new(CanvasStateStore::new()));
        let dispatcher = MutationDispatcher::new(client.clone(), store.clone(), events.clone());
        let tracker = ExecutionTracker::new(client.clone(), events.clone(), config.run_status_grace);
        let debouncer = Debouncer::new(config.resize_debounce);
        Self {
            inner: Arc::new(EngineInner {
                config,
                client,
                store,
                controller: Mutex::new(InteractionController::new()),
                generating: Mutex::new(BTreeSet::new()),
                dispatcher,
                tracker,
                debouncer,
                events,
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the store poll (first fetch immediately) and the run status
    /// poll. Mounting twice is a no-op.
    pub fn mount(&self) -> EngineResult<()> {
        self.inner.ensure_live()?;
        let mut tasks = lock(&self.inner.tasks);
        if !tasks.is_empty() {
            return Ok(());
        }
        let weak = Arc::downgrade(&self.inner);
        tasks.push(tokio::spawn(poll_loop(
            weak.clone(),
            self.inner.config.poll_interval,
            self.inner.shutdown.clone(),
        )));
        tasks.push(tokio::spawn(status_loop(
            weak,
            self.inner.config.status_poll_interval,
            self.inner.shutdown.clone(),
        )));
        info!(
            poll_ms = self.inner.config.poll_interval.as_millis() as u64,
            "canvas engine mounted"
        );
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        !self.inner.shutdown.is_cancelled() && !lock(&self.inner.tasks).is_empty()
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop both polls, drop pending writes and close every run channel.
    /// Results of requests still in flight are discarded.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    /// Fetch all four collections and apply them. Returns whether anything
    /// changed.
    pub async fn refresh(&self) -> EngineResult<bool> {
        self.inner.refresh().await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Build the render graph for the current store and interaction state.
    pub async fn graph(&self) -> RenderGraph {
        let store = self.inner.store.read().await;
        let mut transient = self.inner.controller().transient();
        transient.running = self.inner.tracker.running();
        transient.statuses = self.inner.tracker.statuses();
        transient.generating = lock(&self.inner.generating).clone();
        build_graph(
            store.files(),
            store.folders(),
            store.edges(),
            store.metadata(),
            &transient,
        )
    }

    /// Run `f` against the state store under its read lock.
    pub async fn read_store<R>(&self, f: impl FnOnce(&CanvasStateStore) -> R) -> R {
        let store = self.inner.store.read().await;
        f(&store)
    }

    pub fn interaction_state(&self) -> InteractionState {
        self.inner.controller().state().clone()
    }

    pub fn pending_prompt(&self) -> Option<AuthoringPrompt> {
        self.inner.controller().pending_prompt().cloned()
    }

    pub fn running(&self) -> BTreeSet<NodeId> {
        self.inner.tracker.running()
    }

    pub fn run_status(&self, file: &NodeId) -> Option<FileStatus> {
        self.inner.tracker.status(file)
    }

    pub fn is_generating(&self, file: &NodeId) -> bool {
        lock(&self.inner.generating).contains(file)
    }

    // =========================================================================
    // Selection
    // =========================================================================

    pub fn select(&self, id: NodeId) {
        self.inner.controller().select(id);
    }

    pub fn select_edge(&self, key: EdgeKey, additive: bool) {
        self.inner.controller().select_edge(key, additive);
    }

    /// A click on empty canvas: clears selection and abandons any gesture.
    pub fn click_canvas(&self) {
        let mut controller = self.inner.controller();
        controller.cancel();
        controller.clear_selection();
    }

    /// The delete key: removes every selected edge.
    pub async fn press_delete(&self) -> EngineResult<()> {
        self.inner.ensure_live()?;
        let mutations = {
            let store = self.inner.store.read().await;
            self.inner.controller().delete_selected_edges(&store)
        };
        self.inner.run_batch(mutations).await.map(drop)
    }

    // =========================================================================
    // Drag
    // =========================================================================

    pub async fn begin_drag(&self, target: DragTarget, pointer: Point) -> EngineResult<()> {
        self.inner.ensure_live()?;
        let mut store = self.inner.store.write().await;
        self.inner
            .controller()
            .begin_drag(target.clone(), pointer, &store)?;
        // Polls must not snap the node back mid-drag.
        if !matches!(target, DragTarget::Placeholder(_)) {
            store.mark_dirty(target.id().clone());
        }
        Ok(())
    }

    /// Track the pointer. Returns the folder a dragged file hovers.
    pub async fn drag_move(&self, pointer: Point) -> EngineResult<Option<NodeId>> {
        let store = self.inner.store.read().await;
        self.inner.controller().drag_move(pointer, &store)
    }

    pub async fn end_drag(&self, pointer: Point) -> EngineResult<()> {
        self.inner.ensure_live()?;
        let mutations = {
            let mut store = self.inner.store.write().await;
            let mut controller = self.inner.controller();
            let dragged = controller.dragging().cloned();
            let mutations = controller.end_drag(pointer, &store);
            // The dispatcher takes over the mark for the write itself.
            if let Some(id) = dragged {
                store.clear_dirty(&id);
            }
            mutations?
        };
        self.inner.run_batch(mutations).await.map(drop)
    }

    /// Programmatic drag of a file or folder so that its origin lands on
    /// `to`.
    pub async fn move_node(&self, id: &NodeId, to: Point) -> EngineResult<()> {
        let (target, origin) = {
            let store = self.inner.store.read().await;
            if store.file(id).is_some() {
                (DragTarget::File(id.clone()), store.position_of(id))
            } else if let Some(folder) = store.folder(id) {
                (DragTarget::Folder(id.clone()), Some(folder.position()))
            } else {
                (DragTarget::Placeholder(id.clone()), None)
            }
        };
        let origin = match origin {
            Some(origin) => origin,
            None => self
                .inner
                .controller()
                .placeholders()
                .iter()
                .find(|p| &p.id == id)
                .map(|p| p.position)
                .ok_or_else(|| EngineError::UnknownNode(id.clone()))?,
        };
        self.begin_drag(target, origin).await?;
        self.drag_move(to).await?;
        self.end_drag(to).await
    }

    // =========================================================================
    // Connect
    // =========================================================================

    pub async fn begin_connect(&self, source: NodeId) -> EngineResult<()> {
        self.inner.ensure_live()?;
        let store = self.inner.store.read().await;
        self.inner.controller().begin_connect(source, &store)
    }

    /// Release a connection on `target`. On success the edge-authoring
    /// prompt is published and returned.
    pub async fn complete_connect(&self, target: NodeId) -> EngineResult<AuthoringPrompt> {
        let prompt = {
            let store = self.inner.store.read().await;
            self.inner.controller().complete_connect(target, &store)
        };
        match prompt {
            Ok(prompt) => {
                let _ = self.inner.events.send(EngineEvent::Prompt(prompt.clone()));
                Ok(prompt)
            }
            Err(e) => {
                debug!(error = %e, "connection rejected");
                Err(e)
            }
        }
    }

    /// Answer the edge-authoring prompt and persist the edge.
    pub async fn describe_edge(
        &self,
        relation: RelationType,
        description: Option<String>,
    ) -> EngineResult<()> {
        self.inner.ensure_live()?;
        let mutation = {
            let store = self.inner.store.read().await;
            self.inner
                .controller()
                .describe_edge(relation, description, &store)?
        };
        self.inner.run_batch(vec![mutation]).await.map(drop)
    }

    /// Connect two nodes in one call.
    pub async fn connect(
        &self,
        from: NodeId,
        to: NodeId,
        relation: RelationType,
        description: Option<String>,
    ) -> EngineResult<()> {
        self.begin_connect(from).await?;
        self.complete_connect(to).await?;
        self.describe_edge(relation, description).await
    }

    // =========================================================================
    // Resize
    // =========================================================================

    pub async fn begin_resize(&self, folder: NodeId) -> EngineResult<()> {
        self.inner.ensure_live()?;
        let mut store = self.inner.store.write().await;
        self.inner
            .controller()
            .begin_resize(folder.clone(), &store)?;
        store.mark_dirty(folder);
        Ok(())
    }

    /// Apply a resize tick locally and schedule the debounced write.
    pub fn resize_tick(&self, width: f64, height: f64) -> EngineResult<()> {
        self.inner.ensure_live()?;
        let (folder, width, height) = self.inner.controller().resize_tick(width, height)?;
        let weak = Arc::downgrade(&self.inner);
        let key = folder.clone();
        self.inner.debouncer.schedule(key, async move {
            if let Some(inner) = weak.upgrade() {
                inner.persist_size(folder, width, height).await;
            }
        });
        Ok(())
    }

    pub async fn end_resize(&self) -> EngineResult<()> {
        let mut store = self.inner.store.write().await;
        let mut controller = self.inner.controller();
        let (folder, width, height) = controller.end_resize()?;
        // A pending write clears the mark when it lands.
        if !self.inner.debouncer.is_pending(&folder) {
            store.clear_dirty(&folder);
            controller.settle_size(&folder, width, height);
        }
        Ok(())
    }

    // =========================================================================
    // Drop authoring
    // =========================================================================

    /// A palette payload was dropped at `at`. Publishes and returns the
    /// authoring prompt it opens.
    pub fn drop_payload(&self, data: &TransferData, at: Point) -> EngineResult<AuthoringPrompt> {
        self.inner.ensure_live()?;
        let prompt = self.inner.controller().drop_payload(data, at)?;
        let _ = self.inner.events.send(EngineEvent::Prompt(prompt.clone()));
        Ok(prompt)
    }

    pub fn dismiss_prompt(&self) {
        self.inner.controller().dismiss_prompt();
    }

    /// Abandon the current gesture and any open prompt.
    pub fn cancel(&self) {
        self.inner.controller().cancel();
    }

    /// Answer the file-naming prompt. Returns the id of the created file.
    pub async fn name_file(&self, name: &str) -> EngineResult<Option<NodeId>> {
        self.inner.ensure_live()?;
        let mutation = {
            let store = self.inner.store.read().await;
            self.inner.controller().name_file(name, &store)?
        };
        let outcome = self.inner.run_batch(vec![mutation]).await?;
        Ok(outcome.created.into_iter().next())
    }

    /// Answer the folder-naming prompt. Returns the id of the created folder.
    pub async fn name_folder(&self, name: &str) -> EngineResult<Option<NodeId>> {
        self.inner.ensure_live()?;
        let mutation = self.inner.controller().name_folder(name)?;
        let outcome = self.inner.run_batch(vec![mutation]).await?;
        Ok(outcome.created.into_iter().next())
    }

    /// Answer the configuration prompt. Returns the id of whatever was
    /// created, placeholder included.
    pub async fn configure_node(&self, config: NodeConfiguration) -> EngineResult<Option<NodeId>> {
        self.inner.ensure_live()?;
        let (mutation, placeholder) = {
            let store = self.inner.store.read().await;
            let mut controller = self.inner.controller();
            let mutation = controller.configure_node(config, &store)?;
            let placeholder = match mutation {
                Some(_) => None,
                None => controller.placeholders().last().map(|p| p.id.clone()),
            };
            (mutation, placeholder)
        };
        match mutation {
            Some(mutation) => {
                let outcome = self.inner.run_batch(vec![mutation]).await?;
                Ok(outcome.created.into_iter().next())
            }
            None => Ok(placeholder),
        }
    }

    pub fn remove_placeholder(&self, id: &NodeId) -> bool {
        self.inner.controller().remove_placeholder(id)
    }

    // =========================================================================
    // Entity edits
    // =========================================================================

    pub async fn update_content(&self, id: &NodeId, content: impl Into<String>) -> EngineResult<()> {
        self.mutate(Mutation::UpdateContent {
            id: id.clone(),
            content: content.into(),
        })
        .await
    }

    pub async fn update_description(
        &self,
        id: &NodeId,
        description: impl Into<String>,
    ) -> EngineResult<()> {
        self.mutate(Mutation::UpdateDescription {
            id: id.clone(),
            description: description.into(),
        })
        .await
    }

    pub async fn rename_folder(&self, id: &NodeId, name: impl Into<String>) -> EngineResult<()> {
        self.mutate(Mutation::RenameFolder {
            id: id.clone(),
            name: name.into(),
        })
        .await
    }

    pub async fn set_folder_expanded(&self, id: &NodeId, expanded: bool) -> EngineResult<()> {
        self.mutate(Mutation::SetFolderExpanded {
            id: id.clone(),
            expanded,
        })
        .await
    }

    /// File a file into `folder`, or take it out with `None`. The absolute
    /// position is kept.
    pub async fn move_file(&self, id: &NodeId, folder: Option<NodeId>) -> EngineResult<()> {
        self.mutate(Mutation::MoveToFolder {
            id: id.clone(),
            folder,
        })
        .await
    }

    pub async fn delete_edge(&self, key: &EdgeKey, relation: RelationType) -> EngineResult<()> {
        self.mutate(Mutation::DeleteEdge {
            from: key.from.clone(),
            to: key.to.clone(),
            relation,
        })
        .await
    }

    pub async fn delete_file(&self, id: &NodeId) -> EngineResult<()> {
        if self.inner.tracker.is_running(id) {
            self.inner.tracker.stop(id).await;
        }
        self.mutate(Mutation::DeleteFile(id.clone())).await?;
        self.inner.controller().forget(id);
        self.inner.tracker.forget(id);
        Ok(())
    }

    /// Delete a folder. A folder that still contains files is only deleted
    /// with `confirmed`, and takes its files with it.
    pub async fn delete_folder(&self, id: &NodeId, confirmed: bool) -> EngineResult<()> {
        let contained: Vec<NodeId> = {
            let store = self.inner.store.read().await;
            if store.folder(id).is_none() {
                return Err(EngineError::UnknownNode(id.clone()));
            }
            store.files_in(id).iter().map(|f| f.id.clone()).collect()
        };
        if !contained.is_empty() && !confirmed {
            return Err(InvalidAction::CascadeNotConfirmed {
                folder: id.clone(),
                files: contained.len(),
            }
            .into());
        }
        self.mutate(Mutation::DeleteFolder {
            id: id.clone(),
            cascade: true,
        })
        .await?;
        let mut controller = self.inner.controller();
        controller.forget(id);
        for file in &contained {
            controller.forget(file);
            self.inner.tracker.forget(file);
        }
        Ok(())
    }

    /// Generate code for a file. The file is flagged as generating until the
    /// call returns.
    pub async fn generate(&self, id: &NodeId) -> EngineResult<()> {
        self.inner.ensure_live()?;
        if !lock(&self.inner.generating).insert(id.clone()) {
            return Ok(());
        }
        self.inner.publish_generating(id, true);
        let result = self.mutate(Mutation::GenerateFile(id.clone())).await;
        lock(&self.inner.generating).remove(id);
        self.inner.publish_generating(id, false);
        result
    }

    // =========================================================================
    // Runs
    // =========================================================================

    pub async fn start_run(&self, id: &NodeId) -> EngineResult<()> {
        self.inner.ensure_live()?;
        if self.inner.store.read().await.file(id).is_none() {
            return Err(EngineError::UnknownNode(id.clone()));
        }
        self.inner.tracker.start(id).await
    }

    pub async fn stop_run(&self, id: &NodeId) -> EngineResult<()> {
        self.inner.ensure_live()?;
        self.inner.tracker.stop(id).await;
        Ok(())
    }

    async fn mutate(&self, mutation: Mutation) -> EngineResult<()> {
        self.inner.ensure_live()?;
        self.inner.run_batch(vec![mutation]).await.map(drop)
    }
}

impl EngineInner {
    fn controller(&self) -> MutexGuard<'_, InteractionController> {
        lock(&self.controller)
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.shutdown.is_cancelled() {
            Err(EngineError::TornDown)
        } else {
            Ok(())
        }
    }

    fn teardown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.debouncer.cancel_all();
        self.tracker.close_all();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        info!("canvas engine torn down");
    }

    async fn refresh(&self) -> EngineResult<bool> {
        self.ensure_live()?;
        let fetched = self.client.fetch_snapshot().await;
        if self.shutdown.is_cancelled() {
            debug!("discarding fetch that finished after teardown");
            return Err(EngineError::TornDown);
        }

        match fetched {
            Ok(snapshot) => {
                let change = self.store.write().await.apply_snapshot(snapshot);
                match change {
                    Some(change) => {
                        debug!(revision = change.revision, "store refreshed");
                        let _ = self.events.send(EngineEvent::StoreChanged(change));
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            Err(e) if e.is_not_found() => {
                warn!("project no longer exists, leaving the canvas");
                let _ = self
                    .events
                    .send(EngineEvent::NavigateAway(NavigationTarget::Onboarding));
                self.teardown();
                Err(EngineError::ProjectNotFound)
            }
            Err(e) => {
                warn!(error = %e, "store refresh failed");
                let _ = self.events.send(EngineEvent::Notice {
                    level: NoticeLevel::Warning,
                    message: format!("Could not refresh the canvas: {e}"),
                });
                Err(e.into())
            }
        }
    }

    /// Dispatch a batch and reconcile. A remote failure re-fetches the store
    /// so the optimistic patch is replaced by remote truth.
    async fn run_batch(&self, mutations: Vec<Mutation>) -> EngineResult<DispatchOutcome> {
        if mutations.is_empty() {
            return Ok(DispatchOutcome::default());
        }
        match self.dispatcher.dispatch_all(mutations).await {
            Ok(outcome) => {
                if outcome.needs_refresh {
                    self.refresh_quietly().await;
                }
                Ok(outcome)
            }
            Err(e) if e.is_remote() => {
                self.refresh_quietly().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Refresh whose failure is already reported on the bus.
    async fn refresh_quietly(&self) {
        if let Err(e) = self.refresh().await {
            debug!(error = %e, "follow-up refresh failed");
        }
    }

    async fn persist_size(&self, folder: NodeId, width: f64, height: f64) {
        if self.shutdown.is_cancelled() {
            return;
        }
        {
            let mut store = self.store.write().await;
            let resizing = matches!(
                self.controller().state(),
                InteractionState::Resizing { folder: f, .. } if f == &folder
            );
            if !resizing {
                store.clear_dirty(&folder);
            }
        }
        let result = self
            .run_batch(vec![Mutation::ResizeFolder {
                id: folder.clone(),
                width,
                height,
            }])
            .await;
        if let Err(e) = result {
            debug!(folder = %folder, error = %e, "resize not persisted");
        }
        self.controller().settle_size(&folder, width, height);
    }

    fn publish_generating(&self, file: &NodeId, active: bool) {
        let _ = self.events.send(EngineEvent::Generating {
            file: file.clone(),
            active,
        });
    }
}

async fn poll_loop(
    inner: Weak<EngineInner>,
    period: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(EngineError::ProjectNotFound | EngineError::TornDown) = inner.refresh().await {
            break;
        }
    }
    debug!("store poll stopped");
}

async fn status_loop(
    inner: Weak<EngineInner>,
    period: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; the store is still empty then.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let files: Vec<NodeId> = {
            let store = inner.store.read().await;
            store.files().iter().map(|f| f.id.clone()).collect()
        };
        let answers = inner.tracker.fetch_statuses(&files).await;
        if shutdown.is_cancelled() {
            break;
        }
        inner.tracker.apply_statuses(answers);
    }
    debug!("status poll stopped");
}
