//! Layer definitions for the shared board.
//!
//! A [`Layer`] is one drawable object. Every layer carries its own id and
//! [`LayerStyle`]; the kind-specific geometry lives in the variant structs.

mod ellipse;
mod image;
mod path;
mod rectangle;
mod text;

pub use ellipse::Ellipse;
pub use image::{Image, ImageFormat};
pub use path::Path;
pub use rectangle::Rectangle;
pub use text::Text;

use crate::error::ValidationError;
use kurbo::{Affine, BezPath, Point, Rect};
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for layers.
pub type LayerId = Uuid;

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    pub fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Multiply the alpha channel by `opacity` (clamped to 0..=1).
    pub fn with_opacity(self, opacity: f64) -> Self {
        let alpha = (self.a as f64 * opacity.clamp(0.0, 1.0)).round() as u8;
        Self { a: alpha, ..self }
    }

    /// `#rrggbb` hex form (alpha is not included).
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#')?;
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let expand = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
                Some(Self::new(expand(0)?, expand(1)?, expand(2)?, 255))
            }
            6 => Some(Self::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                255,
            )),
            8 => Some(Self::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                channel(&hex[6..8])?,
            )),
            _ => None,
        }
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Style properties shared by every layer kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    /// Stroke color.
    pub stroke_color: SerializableColor,
    /// Stroke width.
    pub stroke_width: f64,
    /// Fill color (None = no fill).
    pub fill_color: Option<SerializableColor>,
    /// Overall opacity (0.0 = fully transparent, 1.0 = fully opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_opacity() -> f64 {
    1.0
}

impl LayerStyle {
    /// Get the stroke color as a peniko Color.
    pub fn stroke(&self) -> Color {
        self.stroke_color.into()
    }

    /// Get the fill color as a peniko Color.
    pub fn fill(&self) -> Option<Color> {
        self.fill_color.map(|c| c.into())
    }

    /// Stroke color with the layer opacity folded into alpha.
    pub fn stroke_with_opacity(&self) -> SerializableColor {
        self.stroke_color.with_opacity(self.opacity)
    }

    /// Fill color with the layer opacity folded into alpha.
    pub fn fill_with_opacity(&self) -> Option<SerializableColor> {
        self.fill_color.map(|c| c.with_opacity(self.opacity))
    }

    /// Set the stroke color from a peniko Color.
    pub fn set_stroke(&mut self, color: Color) {
        self.stroke_color = color.into();
    }

    /// Set the fill color from a peniko Color.
    pub fn set_fill(&mut self, color: Option<Color>) {
        self.fill_color = color.map(|c| c.into());
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if !self.stroke_width.is_finite() || self.stroke_width < 0.0 {
            return Err(ValidationError::InvalidValue("stroke_width"));
        }
        if !self.opacity.is_finite() || !(0.0..=1.0).contains(&self.opacity) {
            return Err(ValidationError::InvalidValue("opacity"));
        }
        Ok(())
    }
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            stroke_color: SerializableColor::black(),
            stroke_width: 2.0,
            fill_color: None,
            opacity: 1.0,
        }
    }
}

/// The kind of a layer. Fixed for the lifetime of the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Rectangle,
    Ellipse,
    Path,
    Text,
    Image,
}

impl LayerKind {
    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Rectangle => "rectangle",
            LayerKind::Ellipse => "ellipse",
            LayerKind::Path => "path",
            LayerKind::Text => "text",
            LayerKind::Image => "image",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Distance from a point to a line segment (a→b).
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = kurbo::Vec2::new(b.x - a.x, b.y - a.y);
    let pv = kurbo::Vec2::new(point.x - a.x, point.y - a.y);
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    let proj = Point::new(a.x + t * seg.x, a.y + t * seg.y);
    ((point.x - proj.x).powi(2) + (point.y - proj.y).powi(2)).sqrt()
}

/// Minimum distance from a point to a polyline (sequence of connected segments).
pub fn point_to_polyline_dist(point: Point, points: &[Point]) -> f64 {
    points
        .windows(2)
        .map(|w| point_to_segment_dist(point, w[0], w[1]))
        .fold(f64::INFINITY, f64::min)
}

fn finite_point(p: Point) -> bool {
    p.x.is_finite() && p.y.is_finite()
}

/// Common behaviour of all layer kinds.
pub trait Drawable {
    /// Get the unique identifier.
    fn id(&self) -> LayerId;

    /// Get the kind of this layer.
    fn kind(&self) -> LayerKind;

    /// Get the unrotated bounding box in board coordinates.
    fn bounds(&self) -> Rect;

    /// Check if a point (in board coordinates) hits this layer.
    fn hit_test(&self, point: Point, tolerance: f64) -> bool;

    /// Get the outline path, without rotation applied.
    fn to_path(&self) -> BezPath;

    /// Get the style.
    fn style(&self) -> &LayerStyle;

    /// Get mutable style.
    fn style_mut(&mut self) -> &mut LayerStyle;
}

/// A drawable object on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layer {
    Rectangle(Rectangle),
    Ellipse(Ellipse),
    Path(Path),
    Text(Text),
    Image(Image),
}

impl Layer {
    fn drawable(&self) -> &dyn Drawable {
        match self {
            Layer::Rectangle(s) => s,
            Layer::Ellipse(s) => s,
            Layer::Path(s) => s,
            Layer::Text(s) => s,
            Layer::Image(s) => s,
        }
    }

    fn drawable_mut(&mut self) -> &mut dyn Drawable {
        match self {
            Layer::Rectangle(s) => s,
            Layer::Ellipse(s) => s,
            Layer::Path(s) => s,
            Layer::Text(s) => s,
            Layer::Image(s) => s,
        }
    }

    pub fn id(&self) -> LayerId {
        self.drawable().id()
    }

    pub fn kind(&self) -> LayerKind {
        self.drawable().kind()
    }

    pub fn bounds(&self) -> Rect {
        self.drawable().bounds()
    }

    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        self.drawable().hit_test(point, tolerance)
    }

    pub fn to_path(&self) -> BezPath {
        self.drawable().to_path()
    }

    pub fn style(&self) -> &LayerStyle {
        self.drawable().style()
    }

    pub fn style_mut(&mut self) -> &mut LayerStyle {
        self.drawable_mut().style_mut()
    }

    /// Get the rotation angle in radians (0 for kinds that don't rotate).
    pub fn rotation(&self) -> f64 {
        match self {
            Layer::Rectangle(r) => r.rotation,
            Layer::Ellipse(e) => e.rotation,
            Layer::Text(t) => t.rotation,
            Layer::Image(i) => i.rotation,
            Layer::Path(_) => 0.0,
        }
    }

    /// Transform from the layer's unrotated geometry to its on-board placement.
    pub fn placement(&self) -> Affine {
        let rotation = self.rotation();
        if rotation == 0.0 {
            Affine::IDENTITY
        } else {
            Affine::rotate_about(rotation, self.bounds().center())
        }
    }

    /// Return a copy of this layer carrying a different id.
    pub fn with_id(mut self, id: LayerId) -> Self {
        match &mut self {
            Layer::Rectangle(s) => s.id = id,
            Layer::Ellipse(s) => s.id = id,
            Layer::Path(s) => s.id = id,
            Layer::Text(s) => s.id = id,
            Layer::Image(s) => s.id = id,
        }
        self
    }

    /// Check that every numeric field is finite and in range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.style().validate()?;
        let rotation = self.rotation();
        if !rotation.is_finite() {
            return Err(ValidationError::InvalidValue("rotation"));
        }
        match self {
            Layer::Rectangle(r) => {
                if !finite_point(r.position) {
                    return Err(ValidationError::InvalidValue("position"));
                }
                if !(r.width.is_finite() && r.height.is_finite() && r.width >= 0.0 && r.height >= 0.0) {
                    return Err(ValidationError::InvalidValue("size"));
                }
                if !r.corner_radius.is_finite() || r.corner_radius < 0.0 {
                    return Err(ValidationError::InvalidValue("corner_radius"));
                }
            }
            Layer::Ellipse(e) => {
                if !finite_point(e.center) {
                    return Err(ValidationError::InvalidValue("position"));
                }
                if !(e.radius_x.is_finite() && e.radius_y.is_finite() && e.radius_x >= 0.0 && e.radius_y >= 0.0) {
                    return Err(ValidationError::InvalidValue("radii"));
                }
            }
            Layer::Path(p) => {
                if p.points.is_empty() {
                    return Err(ValidationError::InvalidValue("points"));
                }
                if !p.points.iter().copied().all(finite_point) {
                    return Err(ValidationError::InvalidValue("points"));
                }
            }
            Layer::Text(t) => {
                if !finite_point(t.position) {
                    return Err(ValidationError::InvalidValue("position"));
                }
                if !t.font_size.is_finite() || t.font_size <= 0.0 {
                    return Err(ValidationError::InvalidValue("font_size"));
                }
            }
            Layer::Image(i) => {
                if !finite_point(i.position) {
                    return Err(ValidationError::InvalidValue("position"));
                }
                if !(i.width.is_finite() && i.height.is_finite() && i.width >= 0.0 && i.height >= 0.0) {
                    return Err(ValidationError::InvalidValue("size"));
                }
            }
        }
        Ok(())
    }
}

impl From<Rectangle> for Layer {
    fn from(value: Rectangle) -> Self {
        Layer::Rectangle(value)
    }
}

impl From<Ellipse> for Layer {
    fn from(value: Ellipse) -> Self {
        Layer::Ellipse(value)
    }
}

impl From<Path> for Layer {
    fn from(value: Path) -> Self {
        Layer::Path(value)
    }
}

impl From<Text> for Layer {
    fn from(value: Text) -> Self {
        Layer::Text(value)
    }
}

impl From<Image> for Layer {
    fn from(value: Image) -> Self {
        Layer::Image(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let color = SerializableColor::from_hex("#ff8000").unwrap();
        assert_eq!(color, SerializableColor::new(255, 128, 0, 255));
        assert_eq!(color.to_hex(), "#ff8000");
        assert_eq!(SerializableColor::from_hex("#fff"), Some(SerializableColor::white()));
        assert_eq!(SerializableColor::from_hex("zzz"), None);
    }

    #[test]
    fn test_opacity_folds_into_alpha() {
        let style = LayerStyle {
            opacity: 0.5,
            ..LayerStyle::default()
        };
        assert_eq!(style.stroke_with_opacity().a, 128);
    }

    #[test]
    fn test_layer_serde_is_tagged_by_kind() {
        let layer: Layer = Rectangle::new(Point::new(1.0, 2.0), 3.0, 4.0).into();
        let json = serde_json::to_value(&layer).unwrap();
        assert_eq!(json["kind"], "rectangle");
        let back: Layer = serde_json::from_value(json).unwrap();
        assert_eq!(back, layer);
    }

    #[test]
    fn test_validate_rejects_nan() {
        let layer: Layer = Rectangle::new(Point::new(f64::NAN, 0.0), 3.0, 4.0).into();
        assert!(matches!(layer.validate(), Err(ValidationError::InvalidValue("position"))));

        let empty: Layer = Path::from_points(Vec::new()).into();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_with_id_replaces_id() {
        let id = Uuid::new_v4();
        let layer: Layer = Ellipse::circle(Point::ZERO, 5.0).into();
        assert_eq!(layer.with_id(id).id(), id);
    }
}
