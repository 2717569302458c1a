//! Layout edits: `canvas connect` and `canvas move`.

use anyhow::{Context, Result};
use canvas_core::{NodeId, Point, RelationType};
use canvas_engine::CanvasEngine;

pub async fn connect(
    engine: &CanvasEngine,
    from: NodeId,
    to: NodeId,
    relation: RelationType,
    description: Option<String>,
) -> Result<()> {
    engine.refresh().await.context("Failed to load project")?;
    let label = relation.label();
    engine
        .connect(from.clone(), to.clone(), relation, description)
        .await
        .with_context(|| format!("Failed to connect {} to {}", from, to))?;
    println!("Connected {} -[{}]-> {}", from, label, to);
    Ok(())
}

pub async fn move_node(engine: &CanvasEngine, id: &NodeId, x: f64, y: f64) -> Result<()> {
    engine.refresh().await.context("Failed to load project")?;
    engine
        .move_node(id, Point::new(x, y))
        .await
        .with_context(|| format!("Failed to move {}", id))?;

    let parent = engine
        .read_store(|store| store.file(id).and_then(|f| f.parent_folder.clone()))
        .await;
    match parent {
        Some(folder) => println!("Moved {} to ({}, {}) inside {}", id, x, y, folder),
        None => println!("Moved {} to ({}, {})", id, x, y),
    }
    Ok(())
}
