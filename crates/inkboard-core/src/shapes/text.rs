//! Text layer.

use super::{Drawable, LayerId, LayerKind, LayerStyle};
use kurbo::{BezPath, Point, Rect, Shape as KurboShape};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Average glyph advance as a fraction of the font size.
pub const CHAR_WIDTH_FACTOR: f64 = 0.55;

/// Line height as a multiple of the font size.
pub const LINE_HEIGHT_FACTOR: f64 = 1.2;

/// A block of text anchored at its top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub(crate) id: LayerId,
    /// Position (top-left corner of the text box).
    pub position: Point,
    /// The text content.
    pub content: String,
    /// Font size in board units.
    pub font_size: f64,
    /// Rotation angle in radians (around center).
    #[serde(default)]
    pub rotation: f64,
    /// Style properties. Text is painted with the stroke color.
    pub style: LayerStyle,
}

impl Text {
    /// Default font size.
    pub const DEFAULT_FONT_SIZE: f64 = 20.0;

    /// Create a new text layer.
    pub fn new(position: Point, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            position,
            content: content.into(),
            font_size: Self::DEFAULT_FONT_SIZE,
            rotation: 0.0,
            style: LayerStyle::default(),
        }
    }

    /// Builder: use a specific id.
    pub fn with_id(mut self, id: LayerId) -> Self {
        self.id = id;
        self
    }

    /// Builder: set the font size.
    pub fn with_font_size(mut self, size: f64) -> Self {
        self.font_size = size;
        self
    }

    /// Lines of the content; empty content is one empty line.
    pub fn lines(&self) -> Vec<&str> {
        let mut lines: Vec<&str> = self.content.split('\n').collect();
        if lines.is_empty() {
            lines.push("");
        }
        lines
    }

    /// Line height in board units.
    pub fn line_height(&self) -> f64 {
        self.font_size * LINE_HEIGHT_FACTOR
    }

    /// Approximate width of one glyph.
    pub fn char_width(&self) -> f64 {
        self.font_size * CHAR_WIDTH_FACTOR
    }

    fn approximate_width(&self) -> f64 {
        let widest = self
            .lines()
            .iter()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0);
        widest as f64 * self.char_width()
    }

    fn approximate_height(&self) -> f64 {
        self.lines().len() as f64 * self.line_height()
    }
}

impl Drawable for Text {
    fn id(&self) -> LayerId {
        self.id
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Text
    }

    fn bounds(&self) -> Rect {
        Rect::new(
            self.position.x,
            self.position.y,
            self.position.x + self.approximate_width().max(20.0),
            self.position.y + self.approximate_height(),
        )
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        self.bounds().inflate(tolerance, tolerance).contains(point)
    }

    fn to_path(&self) -> BezPath {
        self.bounds().to_path(0.1)
    }

    fn style(&self) -> &LayerStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut LayerStyle {
        &mut self.style
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_multiline() {
        let text = Text::new(Point::new(0.0, 0.0), "abcd\nab").with_font_size(10.0);
        let bounds = text.bounds();
        assert!((bounds.width() - 22.0).abs() < 1e-9);
        assert!((bounds.height() - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_text_has_min_width() {
        let text = Text::new(Point::new(5.0, 5.0), "");
        assert_eq!(text.lines(), vec![""]);
        assert!((text.bounds().width() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_test() {
        let text = Text::new(Point::new(0.0, 0.0), "hello");
        assert!(text.hit_test(Point::new(10.0, 10.0), 0.0));
        assert!(!text.hit_test(Point::new(500.0, 10.0), 0.0));
    }
}
