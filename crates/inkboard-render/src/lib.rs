//! Inkboard Render Library
//!
//! Deterministic export of board snapshots. The same layers and paint order
//! always produce the same bytes for a given format and options.

mod error;
mod format;
mod raster;
mod svg;

pub use error::{RenderError, RenderResult};
pub use format::{ExportFormat, ExportOptions, MAX_DIMENSION};
pub use raster::{RasterImage, rasterize, render_png};
pub use svg::render_svg;

use inkboard_core::BoardSnapshot;

/// Render a snapshot with default options.
pub fn render(snapshot: &BoardSnapshot, format: ExportFormat) -> RenderResult<Vec<u8>> {
    render_with(snapshot, format, &ExportOptions::default())
}

/// Render a snapshot. The snapshot is checked first so a malformed one is
/// reported instead of partially drawn.
pub fn render_with(
    snapshot: &BoardSnapshot,
    format: ExportFormat,
    options: &ExportOptions,
) -> RenderResult<Vec<u8>> {
    snapshot.validate()?;
    log::debug!("Exporting {} layers as {}", snapshot.len(), format);
    match format {
        ExportFormat::Svg => Ok(render_svg(snapshot, options)?.into_bytes()),
        ExportFormat::Png => render_png(snapshot, options),
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(snapshot)?),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use inkboard_core::shapes::{Ellipse, Rectangle};
    use inkboard_core::Layer;
    use kurbo::Point;

    /// Snapshot painting `layers` back to front.
    pub(crate) fn snapshot_of(layers: Vec<Layer>) -> BoardSnapshot {
        let mut snapshot = BoardSnapshot::default();
        for layer in layers {
            snapshot.layer_ids.push(layer.id());
            snapshot.layers.insert(layer.id(), layer);
        }
        snapshot
    }

    fn sample() -> BoardSnapshot {
        snapshot_of(vec![
            Rectangle::new(Point::new(0.0, 0.0), 80.0, 40.0).into(),
            Ellipse::circle(Point::new(60.0, 60.0), 20.0).into(),
        ])
    }

    #[test]
    fn test_every_format_is_deterministic() {
        let snapshot = sample();
        for format in [ExportFormat::Svg, ExportFormat::Png, ExportFormat::Json] {
            assert_eq!(
                render(&snapshot, format).unwrap(),
                render(&snapshot.clone(), format).unwrap(),
                "{format} output changed between runs"
            );
        }
    }

    #[test]
    fn test_json_is_the_snapshot() {
        let snapshot = sample();
        let bytes = render(&snapshot, ExportFormat::Json).unwrap();
        let back: BoardSnapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_malformed_snapshot_is_refused() {
        let mut snapshot = sample();
        snapshot.layer_ids.pop();
        assert!(matches!(
            render(&snapshot, ExportFormat::Svg),
            Err(RenderError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_render_leaves_snapshot_untouched() {
        let snapshot = sample();
        let before = snapshot.clone();
        render(&snapshot, ExportFormat::Png).unwrap();
        assert_eq!(snapshot, before);
    }
}
