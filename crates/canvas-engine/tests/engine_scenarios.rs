//! End-to-end scenarios for the canvas engine against the in-memory store.
//!
//! Run with: `cargo test --package canvas-engine --test engine_scenarios`

use std::sync::Arc;
use std::time::Duration;

use canvas_client::{RunCompletion, RunEvent};
use canvas_core::{
    FileStatus, NodeId, Point, RelationType, TransferData, PAYLOAD_MIME_JSON, PAYLOAD_MIME_PLAIN,
};
use canvas_engine::test_fixtures::{
    edge, file, services_project, MockRemoteStore, SnapshotBuilder,
};
use canvas_engine::{
    AuthoringPrompt, CanvasEngine, CanvasStateStore, DragTarget, EngineConfig, EngineError,
    EngineEvent, InteractionState, InvalidAction, NavigationTarget, NodeConfiguration, RenderNodeKind,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;

fn engine_for(remote: &Arc<MockRemoteStore>) -> CanvasEngine {
    CanvasEngine::new(remote.clone(), EngineConfig::default())
}

async fn loaded(remote: &Arc<MockRemoteStore>) -> CanvasEngine {
    let engine = engine_for(remote);
    engine.refresh().await.unwrap();
    remote.clear_calls();
    engine
}

/// Wait for the first event matching `pred`.
async fn wait_for(
    rx: &mut broadcast::Receiver<EngineEvent>,
    pred: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event not received in time")
}

/// Every folder lists exactly the files that name it as parent.
fn assert_containment(store: &CanvasStateStore) {
    for folder in store.folders().iter() {
        let mut expected: Vec<NodeId> = store
            .files()
            .iter()
            .filter(|f| f.parent_folder.as_ref() == Some(&folder.id))
            .map(|f| f.id.clone())
            .collect();
        let mut actual = folder.contained_files.clone();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected, "containment of {}", folder.id);
    }
}

fn special(token: &str) -> TransferData {
    TransferData::new().with(PAYLOAD_MIME_PLAIN, token)
}

// =============================================================================
// Authoring and containment
// =============================================================================

#[tokio::test]
async fn test_create_folder_and_file_then_drag_inside() {
    let remote = Arc::new(MockRemoteStore::default());
    let engine = loaded(&remote).await;

    let prompt = engine
        .drop_payload(&special("folder"), Point::new(100.0, 100.0))
        .unwrap();
    assert_eq!(prompt.kind(), "folder name");
    let folder = engine.name_folder("Services").await.unwrap().unwrap();
    assert_eq!(folder, NodeId::from("folder_1"));

    engine
        .drop_payload(&special("file"), Point::new(900.0, 600.0))
        .unwrap();
    let main = engine.name_file("main.py").await.unwrap().unwrap();
    assert_eq!(main, NodeId::from("main.py"));

    engine
        .move_node(&main, Point::new(250.0, 250.0))
        .await
        .unwrap();

    let remote_file = remote
        .snapshot()
        .files
        .into_iter()
        .find(|f| f.id == main)
        .unwrap();
    assert_eq!(remote_file.parent_folder, Some(folder.clone()));

    let graph = engine.graph().await;
    let node = graph.node(&main).unwrap();
    assert_eq!(node.parent, Some(folder.clone()));
    assert_eq!(node.position, Point::new(150.0, 150.0));
    assert_eq!(graph.absolute_position(&main), Some(Point::new(250.0, 250.0)));

    engine.read_store(assert_containment).await;
}

#[tokio::test]
async fn test_drop_inside_folder_creates_contained_file() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;

    engine
        .drop_payload(&special("file"), Point::new(200.0, 300.0))
        .unwrap();
    let created = engine.name_file("worker.py").await.unwrap().unwrap();

    assert_eq!(
        remote.writes(),
        vec![
            "create_file worker.py",
            "update_file_position worker.py 200 300",
            "move_file_to_folder worker.py folder_1",
        ]
    );
    let graph = engine.graph().await;
    let node = graph.node(&created).unwrap();
    assert_eq!(node.parent, Some(NodeId::from("folder_1")));
    assert_eq!(node.position, Point::new(100.0, 200.0));
    engine.read_store(assert_containment).await;
}

#[tokio::test]
async fn test_drag_out_of_folder_releases_file() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let api = NodeId::from("api.py");

    engine
        .move_node(&api, Point::new(1000.0, 100.0))
        .await
        .unwrap();

    let graph = engine.graph().await;
    let node = graph.node(&api).unwrap();
    assert_eq!(node.parent, None);
    assert_eq!(node.position, Point::new(1000.0, 100.0));
    engine
        .read_store(|store| {
            assert_eq!(store.file(&api).unwrap().parent_folder, None);
            assert!(store.folder(&"folder_1".into()).unwrap().contained_files.is_empty());
            assert_containment(store);
        })
        .await;
}

#[tokio::test]
async fn test_folder_move_carries_its_files() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let folder = NodeId::from("folder_1");
    let api = NodeId::from("api.py");

    engine
        .move_node(&folder, Point::new(200.0, 200.0))
        .await
        .unwrap();

    let graph = engine.graph().await;
    assert_eq!(graph.node(&folder).unwrap().position, Point::new(200.0, 200.0));
    assert_eq!(graph.node(&api).unwrap().position, Point::new(60.0, 100.0));
    assert_eq!(graph.absolute_position(&api), Some(Point::new(260.0, 300.0)));

    let snapshot = remote.snapshot();
    assert_eq!(
        snapshot.metadata.get(&api).unwrap().position(),
        Some(Point::new(260.0, 300.0))
    );
}

#[tokio::test]
async fn test_configure_drop_adds_placeholder_without_writes() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let payload = serde_json::json!({
        "label": "Cache",
        "type": "service",
        "description": "Shared cache",
        "categoryLabel": "Infra",
    });
    let data = TransferData::new().with(PAYLOAD_MIME_JSON, payload.to_string());

    let prompt = engine.drop_payload(&data, Point::new(1500.0, 200.0)).unwrap();
    assert!(matches!(prompt, AuthoringPrompt::ConfigureNode { .. }));

    let id = engine
        .configure_node(NodeConfiguration::Placeholder {
            label: "Cache".into(),
            description: None,
        })
        .await
        .unwrap()
        .unwrap();

    assert!(remote.writes().is_empty());
    let graph = engine.graph().await;
    let node = graph.node(&id).unwrap();
    assert!(matches!(node.kind, RenderNodeKind::Placeholder { .. }));
    assert_eq!(node.position, Point::new(1500.0, 200.0));
}

#[tokio::test]
async fn test_containment_survives_metadata_only_store() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    remote.set_containment_in_metadata(true);
    let engine = loaded(&remote).await;
    let folder = NodeId::from("folder_1");
    let api = NodeId::from("api.py");
    let main = NodeId::from("main.py");

    let graph = engine.graph().await;
    let node = graph.node(&api).unwrap();
    assert_eq!(node.parent, Some(folder.clone()));
    assert_eq!(node.position, Point::new(60.0, 100.0));

    engine
        .move_node(&main, Point::new(250.0, 250.0))
        .await
        .unwrap();
    engine.refresh().await.unwrap();
    assert_eq!(
        remote.snapshot().metadata[&main].parent_folder,
        Some(folder.clone())
    );

    let graph = engine.graph().await;
    let node = graph.node(&main).unwrap();
    assert_eq!(node.parent, Some(folder.clone()));
    assert_eq!(node.position, Point::new(150.0, 150.0));

    engine
        .move_node(&api, Point::new(1000.0, 100.0))
        .await
        .unwrap();
    engine.refresh().await.unwrap();

    let graph = engine.graph().await;
    assert_eq!(graph.node(&api).unwrap().parent, None);
    assert_eq!(graph.node(&api).unwrap().position, Point::new(1000.0, 100.0));
    engine
        .read_store(|store| {
            assert_eq!(
                store.folder(&folder).unwrap().contained_files,
                vec![main.clone()]
            );
            assert_containment(store);
        })
        .await;
}

// =============================================================================
// Edges
// =============================================================================

#[tokio::test]
async fn test_self_loop_sends_nothing() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let main = NodeId::from("main.py");

    let err = engine
        .connect(main.clone(), main.clone(), RelationType::Calls, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Invalid(InvalidAction::SelfLoop(_))
    ));
    assert!(remote.writes().is_empty());
    assert_eq!(engine.interaction_state(), InteractionState::Idle);
    assert!(engine.pending_prompt().is_none());
}

#[tokio::test]
async fn test_connecting_twice_creates_one_edge() {
    let remote = Arc::new(MockRemoteStore::new(
        SnapshotBuilder::new()
            .file(file("main.py", 0.0, 0.0))
            .file(file("db.py", 400.0, 0.0))
            .build(),
    ));
    let engine = loaded(&remote).await;
    let (main, db) = (NodeId::from("main.py"), NodeId::from("db.py"));

    engine
        .connect(main.clone(), db.clone(), RelationType::Calls, Some("reads rows".into()))
        .await
        .unwrap();
    let err = engine
        .connect(main.clone(), db.clone(), RelationType::Calls, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Invalid(InvalidAction::DuplicateEdge { .. })
    ));
    assert_eq!(remote.writes(), vec!["create_edge main.py->db.py"]);
    assert_eq!(remote.snapshot().edges.len(), 1);

    let graph = engine.graph().await;
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.edges[0].description.as_deref(), Some("reads rows"));
}

#[tokio::test]
async fn test_delete_key_removes_selected_edges() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let key = edge("main.py", "db.py", RelationType::DependsOn).key();

    engine.select_edge(key.clone(), false);
    engine.press_delete().await.unwrap();

    assert_eq!(remote.writes(), vec!["delete_edge main.py->db.py depends_on"]);
    assert!(engine.graph().await.edge(&key).is_none());
}

// =============================================================================
// Deletes
// =============================================================================

#[tokio::test]
async fn test_folder_delete_requires_confirmation() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let folder = NodeId::from("folder_1");

    let err = engine.delete_folder(&folder, false).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Invalid(InvalidAction::CascadeNotConfirmed { files: 1, .. })
    ));
    assert!(remote.writes().is_empty());

    engine.delete_folder(&folder, true).await.unwrap();
    assert_eq!(
        remote.writes(),
        vec!["delete_file api.py", "delete_folder folder_1"]
    );
    engine
        .read_store(|store| {
            assert!(store.folder(&folder).is_none());
            assert!(store.file(&"api.py".into()).is_none());
        })
        .await;
}

#[tokio::test]
async fn test_failed_mutation_rolls_back_on_refresh() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let mut events = engine.subscribe();
    let main = NodeId::from("main.py");

    remote.fail_next("update_file_position");
    let err = engine
        .move_node(&main, Point::new(1000.0, 700.0))
        .await
        .unwrap_err();
    assert!(err.is_remote());

    let failed = wait_for(&mut events, |e| matches!(e, EngineEvent::MutationFailed { .. })).await;
    assert!(matches!(
        failed,
        EngineEvent::MutationFailed {
            mutation: "update-position",
            ..
        }
    ));
    engine
        .read_store(|store| {
            assert!(!store.is_dirty(&main));
            assert_eq!(store.position_of(&main), Some(Point::new(900.0, 600.0)));
        })
        .await;
}

// =============================================================================
// Store polling
// =============================================================================

#[tokio::test]
async fn test_unchanged_refresh_keeps_collection_identity() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;

    let (files, edges, revision) = engine
        .read_store(|s| (s.files().clone(), s.edges().clone(), s.revision()))
        .await;
    assert!(!engine.refresh().await.unwrap());

    engine
        .read_store(|s| {
            assert!(Arc::ptr_eq(&files, s.files()));
            assert!(Arc::ptr_eq(&edges, s.edges()));
            assert_eq!(s.revision(), revision);
        })
        .await;

    remote.edit(|snapshot| snapshot.edges.clear());
    assert!(engine.refresh().await.unwrap());
    engine
        .read_store(|s| {
            assert!(Arc::ptr_eq(&files, s.files()));
            assert!(!Arc::ptr_eq(&edges, s.edges()));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_project_navigates_away() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    remote.set_project_missing(true);
    let engine = engine_for(&remote);
    let mut events = engine.subscribe();

    engine.mount().unwrap();

    let event = wait_for(&mut events, |e| matches!(e, EngineEvent::NavigateAway(_))).await;
    assert_eq!(event, EngineEvent::NavigateAway(NavigationTarget::Onboarding));
    assert!(engine.is_torn_down());
    assert!(!engine.is_mounted());
    assert!(matches!(engine.refresh().await, Err(EngineError::TornDown)));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_discards_late_fetch() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    remote.set_fetch_delay(Some(Duration::from_secs(1)));
    let engine = engine_for(&remote);

    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.teardown();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(EngineError::TornDown)));
    engine.read_store(|s| assert!(!s.is_loaded())).await;
}

#[tokio::test]
async fn test_refresh_during_drag_keeps_local_position() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let db = NodeId::from("db.py");
    let main = NodeId::from("main.py");

    engine
        .begin_drag(DragTarget::File(db.clone()), Point::new(1200.0, 600.0))
        .await
        .unwrap();
    engine.drag_move(Point::new(1300.0, 700.0)).await.unwrap();

    remote.edit(|snapshot| {
        for id in [&db, &main] {
            let file = snapshot.files.iter_mut().find(|f| &f.id == id).unwrap();
            file.x = 5.0;
            file.y = 5.0;
            snapshot
                .metadata
                .get_mut(id)
                .unwrap()
                .set_position(Point::new(5.0, 5.0));
        }
    });
    assert!(engine.refresh().await.unwrap());

    engine
        .read_store(|store| {
            assert_eq!(store.position_of(&db), Some(Point::new(1200.0, 600.0)));
            assert_eq!(store.position_of(&main), Some(Point::new(5.0, 5.0)));
        })
        .await;
    assert_eq!(
        engine.graph().await.node(&db).unwrap().position,
        Point::new(1300.0, 700.0)
    );

    engine.end_drag(Point::new(1300.0, 700.0)).await.unwrap();
    assert_eq!(remote.writes(), vec!["update_file_position db.py 1300 700"]);
    engine
        .read_store(|store| {
            assert_eq!(store.position_of(&db), Some(Point::new(1300.0, 700.0)));
            assert!(!store.is_dirty(&db));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_mount_loads_and_picks_up_remote_edits() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = engine_for(&remote);
    let mut events = engine.subscribe();

    engine.mount().unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::StoreChanged(_))).await;
    assert_eq!(engine.graph().await.nodes.len(), 4);

    remote.edit(|snapshot| snapshot.files.push(file("cli.py", 0.0, 0.0)));
    wait_for(&mut events, |e| matches!(e, EngineEvent::StoreChanged(c) if c.files)).await;
    assert!(engine.graph().await.node(&"cli.py".into()).is_some());

    engine.teardown();
}

// =============================================================================
// Resize
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_resize_is_debounced_to_one_write() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let folder = NodeId::from("folder_1");

    engine.begin_resize(folder.clone()).await.unwrap();
    for (w, h) in [(700.0, 450.0), (720.0, 460.0), (740.0, 470.0)] {
        engine.resize_tick(w, h).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let graph = engine.graph().await;
    assert!(matches!(
        graph.node(&folder).unwrap().kind,
        RenderNodeKind::Folder { width, .. } if width == 740.0
    ));
    engine.end_resize().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let writes: Vec<String> = remote
        .writes()
        .into_iter()
        .filter(|c| c.starts_with("update_folder"))
        .collect();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].contains("740"));
    engine
        .read_store(|store| {
            let entity = store.folder(&folder).unwrap();
            assert_eq!((entity.width, entity.height), (740.0, 470.0));
            assert!(!store.is_dirty(&folder));
        })
        .await;
}

// =============================================================================
// Runs
// =============================================================================

#[tokio::test]
async fn test_run_completes_with_success_and_failure() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let mut events = engine.subscribe();
    let (main, db) = (NodeId::from("main.py"), NodeId::from("db.py"));

    engine.start_run(&main).await.unwrap();
    engine.start_run(&db).await.unwrap();
    assert!(engine.graph().await.node(&main).unwrap().running);

    let sender = remote.run_sender(&main).unwrap();
    sender.send(RunEvent::Output("ok\n".into())).await;
    sender
        .send(RunEvent::Completed(RunCompletion {
            success: true,
            return_code: Some(0),
        }))
        .await;
    let finished = wait_for(&mut events, |e| {
        matches!(e, EngineEvent::RunFinished { file, .. } if file == &main)
    })
    .await;
    assert_eq!(
        finished,
        EngineEvent::RunFinished {
            file: main.clone(),
            status: FileStatus::Success,
            return_code: Some(0),
        }
    );

    remote
        .run_sender(&db)
        .unwrap()
        .send(RunEvent::Completed(RunCompletion {
            success: false,
            return_code: Some(1),
        }))
        .await;
    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::RunFinished { file, .. } if file == &db)
    })
    .await;

    assert!(engine.running().is_empty());
    assert_eq!(engine.run_status(&main), Some(FileStatus::Success));
    assert_eq!(engine.run_status(&db), Some(FileStatus::Failed));
    let graph = engine.graph().await;
    assert!(matches!(
        graph.node(&db).unwrap().kind,
        RenderNodeKind::File { status: FileStatus::Failed, .. }
    ));
}

#[tokio::test]
async fn test_stop_and_teardown_close_channels() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let (main, db) = (NodeId::from("main.py"), NodeId::from("db.py"));

    engine.start_run(&main).await.unwrap();
    engine.start_run(&db).await.unwrap();
    let main_sender = remote.run_sender(&main).unwrap();
    let db_sender = remote.run_sender(&db).unwrap();

    engine.stop_run(&main).await.unwrap();
    assert!(main_sender.is_closed());
    assert_eq!(engine.run_status(&main), Some(FileStatus::Idle));

    engine.teardown();
    assert!(db_sender.is_closed());
    assert!(engine.running().is_empty());
    assert!(matches!(
        engine.start_run(&main).await,
        Err(EngineError::TornDown)
    ));
}

#[tokio::test]
async fn test_generate_flags_file_while_running() {
    let remote = Arc::new(MockRemoteStore::new(services_project()));
    let engine = loaded(&remote).await;
    let mut events = engine.subscribe();
    let main = NodeId::from("main.py");

    engine.update_description(&main, "Entry point").await.unwrap();
    engine.generate(&main).await.unwrap();

    let started = wait_for(&mut events, |e| matches!(e, EngineEvent::Generating { .. })).await;
    assert_eq!(
        started,
        EngineEvent::Generating {
            file: main.clone(),
            active: true
        }
    );
    let done = wait_for(&mut events, |e| matches!(e, EngineEvent::Generating { .. })).await;
    assert_eq!(
        done,
        EngineEvent::Generating {
            file: main.clone(),
            active: false
        }
    );
    assert!(!engine.is_generating(&main));
    engine
        .read_store(|store| {
            assert_eq!(
                store.file(&main).unwrap().content.as_deref(),
                Some("# Entry point\n")
            );
        })
        .await;
}
