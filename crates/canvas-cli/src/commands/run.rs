//! `canvas run` and `canvas stop`.
//!
//! A run streams its output to stdout until the store reports completion.
//! Ctrl-C stops the run remotely before exiting.

use std::io::Write;

use anyhow::{Context, Result};
use canvas_core::{FileStatus, NodeId};
use canvas_engine::{CanvasEngine, EngineEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Run `file` and stream its output. Returns whether the run succeeded.
pub async fn execute(engine: &CanvasEngine, file: &NodeId) -> Result<bool> {
    engine.refresh().await.context("Failed to load project")?;
    let mut events = engine.subscribe();
    engine
        .start_run(file)
        .await
        .with_context(|| format!("Failed to start {}", file))?;
    // The status poll settles runs whose stream drops without a completion.
    engine.mount()?;
    eprintln!("▶ Running {} (Ctrl-C to stop)", file);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(EngineEvent::RunOutput { file: f, output }) if &f == file => {
                    stdout.write_all(output.as_bytes())?;
                    stdout.flush()?;
                }
                Ok(EngineEvent::RunFinished { file: f, status, return_code }) if &f == file => {
                    match return_code {
                        Some(code) => eprintln!("■ {} finished: {} (exit {})", file, status.label(), code),
                        None => eprintln!("■ {} finished: {}", file, status.label()),
                    }
                    return Ok(status == FileStatus::Success);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "output fell behind; some chunks were dropped");
                }
                Err(RecvError::Closed) => anyhow::bail!("engine stopped unexpectedly"),
            },
            _ = &mut ctrl_c => {
                engine.stop_run(file).await?;
                eprintln!("■ {} stopped", file);
                return Ok(false);
            }
        }
    }
}

/// Stop a run started elsewhere.
pub async fn stop(engine: &CanvasEngine, file: &NodeId) -> Result<()> {
    engine.stop_run(file).await?;
    println!("Stopped {}", file);
    Ok(())
}
