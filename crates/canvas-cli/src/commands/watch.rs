//! `canvas watch`: mount the canvas and narrate what the engine sees.

use anyhow::Result;
use canvas_engine::{CanvasEngine, EngineEvent, NoticeLevel};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub async fn execute(engine: &CanvasEngine) -> Result<()> {
    let mut events = engine.subscribe();
    engine.mount()?;
    eprintln!(
        "Watching canvas (poll every {} ms, Ctrl-C to quit)",
        engine.config().poll_interval.as_millis()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(EngineEvent::NavigateAway(_)) => {
                    eprintln!("Project no longer exists");
                    break;
                }
                Ok(event) => {
                    if let Some(line) = describe(engine, &event).await {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event bus lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
        }
    }

    engine.teardown();
    Ok(())
}

async fn describe(engine: &CanvasEngine, event: &EngineEvent) -> Option<String> {
    Some(match event {
        EngineEvent::StoreChanged(change) => {
            let (files, folders, edges) = engine
                .read_store(|s| (s.files().len(), s.folders().len(), s.edges().len()))
                .await;
            let mut touched = Vec::new();
            for (flag, name) in [
                (change.files, "files"),
                (change.folders, "folders"),
                (change.edges, "edges"),
                (change.metadata, "metadata"),
            ] {
                if flag {
                    touched.push(name);
                }
            }
            format!(
                "[rev {}] {} changed: {} files, {} folders, {} edges",
                change.revision,
                touched.join("+"),
                files,
                folders,
                edges
            )
        }
        EngineEvent::Notice { level, message } => match level {
            NoticeLevel::Info => format!("note: {}", message),
            NoticeLevel::Warning => format!("warning: {}", message),
        },
        EngineEvent::MutationFailed { mutation, message } => {
            format!("{} failed: {}", mutation, message)
        }
        EngineEvent::RunOutput { file, output } => format!("[{}] {}", file, output.trim_end()),
        EngineEvent::RunFinished { file, status, .. } => {
            format!("{} finished: {}", file, status.label())
        }
        EngineEvent::Generating { file, active: true } => format!("generating {}", file),
        EngineEvent::Generating { file, active: false } => format!("generated {}", file),
        EngineEvent::Prompt(_) | EngineEvent::NavigateAway(_) => return None,
    })
}
