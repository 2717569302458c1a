//! `canvas graph` and `canvas status`.

use std::path::Path;

use anyhow::{Context, Result};
use canvas_engine::{CanvasEngine, RenderGraph};

/// Load the project and print (or write) its render graph as JSON.
pub async fn execute(engine: &CanvasEngine, output: Option<&Path>, pretty: bool) -> Result<()> {
    engine.refresh().await.context("Failed to load project")?;
    let graph = engine.graph().await;
    let json = to_json(&graph, pretty)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Wrote {} nodes and {} edges to {}",
                graph.nodes.len(),
                graph.edges.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn to_json(graph: &RenderGraph, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(graph)?
    } else {
        serde_json::to_string(graph)?
    })
}

/// Print a short summary of the project.
pub async fn status(engine: &CanvasEngine) -> Result<()> {
    engine.refresh().await.context("Failed to load project")?;
    let summary = engine
        .read_store(|store| {
            let mut lines = vec![
                format!("Files:    {}", store.files().len()),
                format!("Folders:  {}", store.folders().len()),
                format!("Edges:    {}", store.edges().len()),
            ];
            for folder in store.folders().iter() {
                lines.push(String::new());
                lines.push(format!(
                    "{} ({}){}",
                    folder.name,
                    folder.id,
                    if folder.is_expanded { "" } else { " [collapsed]" }
                ));
                for file in store.files_in(&folder.id) {
                    lines.push(format!("   - {} [{}]", file.id, file.status.label()));
                }
            }
            let loose: Vec<String> = store
                .files()
                .iter()
                .filter(|f| f.parent_folder.is_none())
                .map(|f| format!("   - {} [{}]", f.id, f.status.label()))
                .collect();
            if !loose.is_empty() {
                lines.push(String::new());
                lines.push("(no folder)".to_string());
                lines.extend(loose);
            }
            lines
        })
        .await;

    for line in summary {
        println!("{}", line);
    }
    Ok(())
}
