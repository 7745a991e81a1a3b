//! pixelgraph - headless compositing demo
//!
//! Builds a small graph on the real GPU, lets the debounce timer fire, and
//! writes the export node's image next to the working directory (or to the
//! path given as the first argument).

use std::path::PathBuf;
use std::time::Instant;

use glam::Vec2;
use log::{info, warn};
use serde_json::json;

use pixelgraph::gpu::GpuContext;
use pixelgraph::nodes::kinds::ExportSettings;
use pixelgraph::{Edge, EngineConfig, ExecutionEngine, GpuConfig, Node, WgpuContext};

/// Solid colour and a blurred copy of it, blended and marked for export
fn create_demo_nodes() -> (Vec<Node>, Vec<Edge>) {
    let nodes = vec![
        Node::new("background", "solid_color")
            .at(Vec2::new(100.0, 100.0))
            .with_parameter("color", json!({ "r": 0.1, "g": 0.2, "b": 0.6, "a": 1.0 }))
            .with_parameter("width", 640)
            .with_parameter("height", 360),
        Node::new("accent", "solid_color")
            .at(Vec2::new(300.0, 100.0))
            .with_parameter("color", json!({ "r": 0.9, "g": 0.5, "b": 0.1, "a": 1.0 }))
            .with_parameter("width", 640)
            .with_parameter("height", 360),
        Node::new("soften", "gaussian_blur")
            .at(Vec2::new(300.0, 250.0))
            .with_parameter("radius", 8),
        Node::new("mix", "blend")
            .at(Vec2::new(200.0, 400.0))
            .with_parameter("mode", "screen")
            .with_parameter("opacity", 0.6),
        Node::new("preview", "preview_output").at(Vec2::new(100.0, 550.0)),
        Node::new("export", "image_export")
            .at(Vec2::new(300.0, 550.0))
            .with_parameter("format", "png")
            .with_parameter("fileName", "pixelgraph-demo"),
    ];
    let edges = vec![
        Edge::new("accent", "soften"),
        Edge::new("background", "mix").to_port("base"),
        Edge::new("soften", "mix").to_port("blend"),
        Edge::new("mix", "preview"),
        Edge::new("mix", "export"),
    ];
    (nodes, edges)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let gpu = WgpuContext::new_headless(&GpuConfig::default())?;
    let mut engine = ExecutionEngine::with_builtins(gpu, EngineConfig::default())?;
    engine.on_execute(|results| {
        for result in results {
            match &result.error {
                Some(error) => warn!("{} failed: {}", result.node_id, error),
                None => info!("{} ok", result.node_id),
            }
        }
    });

    let (nodes, edges) = create_demo_nodes();
    engine.set_graph(nodes, edges)?;

    // Drive the debounce timer the way an event loop would
    while let Some(deadline) = engine.next_deadline() {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        engine.poll();
    }

    let Some(export) = engine.graph().node("export") else {
        return Err("export node missing from the demo graph".into());
    };
    let settings = ExportSettings::from_parameters(&export.parameters);
    let texture = engine
        .get_node_result("export")
        .and_then(|outputs| outputs.get("image"))
        .and_then(|value| value.texture())
        .ok_or("export node produced no image")?;

    let bytes = engine.gpu_mut().export_image(texture, settings.format)?;
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(settings.file_name_with_extension()));
    std::fs::write(&path, bytes)?;
    info!("Wrote {}", path.display());

    let stats = engine.stats();
    info!(
        "{} nodes, {} cached outputs, {} batches",
        stats.total_nodes, stats.cached_outputs, stats.batches_run
    );
    engine.dispose();
    Ok(())
}
