//! Renders the overlay graph to `plot.png`.
//!
//! Nodes are laid out on a circle in the order given, clockwise from
//! the top; edges are straight lines. The bitmap backend is built
//! without a font stack, so nodes are identified by their position —
//! the client prints the matching legend to the console.

use {
    meshtalk_core::TopologyPlotter,
    plotters::prelude::*,
    std::{
        collections::HashMap,
        io,
        path::PathBuf,
    },
};

const SIZE: u32 = 800;
const RADIUS: f64 = 320.0;
const NODE_DOT: i32 = 9;

/// The plotters-backed renderer handed to the client.
pub struct PlotRenderer;

impl TopologyPlotter for PlotRenderer {
    fn plot(&self, nodes: &[String], edges: &[(String, String)]) -> io::Result<PathBuf> {
        let path = PathBuf::from("plot.png");
        render(nodes, edges, &path)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(path)
    }
}

fn render(
    nodes: &[String],
    edges: &[(String, String)],
    path: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (SIZE, SIZE)).into_drawing_area();
    root.fill(&WHITE)?;

    let center = (SIZE as f64 / 2.0, SIZE as f64 / 2.0);
    let count = nodes.len().max(1);
    let mut positions: HashMap<&str, (i32, i32)> = HashMap::new();
    for (index, node) in nodes.iter().enumerate() {
        let angle =
            index as f64 / count as f64 * std::f64::consts::TAU - std::f64::consts::FRAC_PI_2;
        let x = (center.0 + RADIUS * angle.cos()) as i32;
        let y = (center.1 + RADIUS * angle.sin()) as i32;
        positions.insert(node.as_str(), (x, y));
    }

    for (a, b) in edges {
        if let (Some(&from), Some(&to)) = (positions.get(a.as_str()), positions.get(b.as_str())) {
            root.draw(&PathElement::new(vec![from, to], BLACK.stroke_width(2)))?;
        }
    }
    for position in positions.values() {
        root.draw(&Circle::new(*position, NODE_DOT, BLUE.filled()))?;
        root.draw(&Circle::new(*position, NODE_DOT, BLACK.stroke_width(2)))?;
    }

    root.present()?;
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_writes_a_png() {
        let dir = std::env::temp_dir().join("meshtalk-plot-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("plot.png");
        let nodes = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let edges = vec![
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "c".to_string()),
        ];
        render(&nodes, &edges, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        // PNG magic
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
    }
}
