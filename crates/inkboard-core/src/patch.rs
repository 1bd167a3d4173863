//! Field-group patches for `UpdateLayer`.
//!
//! An update names the field groups it changes. Concurrent updates to
//! different groups of the same layer both survive; updates to the same
//! group resolve to whichever was sequenced later.

use crate::error::ValidationError;
use crate::shapes::{Layer, LayerKind, SerializableColor};
use kurbo::{Point, Size};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One independently mergeable group of layer fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerField {
    Position,
    Size,
    Radii,
    CornerRadius,
    Rotation,
    Points,
    Content,
    FontSize,
    StrokeColor,
    FillColor,
    StrokeWidth,
    Opacity,
}

impl LayerField {
    /// Whether this group exists on layers of `kind`.
    pub fn applies_to(self, kind: LayerKind) -> bool {
        use LayerKind as K;
        match self {
            LayerField::StrokeColor
            | LayerField::FillColor
            | LayerField::StrokeWidth
            | LayerField::Opacity => true,
            LayerField::Position | LayerField::Rotation => {
                matches!(kind, K::Rectangle | K::Ellipse | K::Text | K::Image)
            }
            LayerField::Size => matches!(kind, K::Rectangle | K::Image),
            LayerField::Radii => kind == K::Ellipse,
            LayerField::CornerRadius => kind == K::Rectangle,
            LayerField::Points => kind == K::Path,
            LayerField::Content | LayerField::FontSize => kind == K::Text,
        }
    }
}

/// The value of one field group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Top-left corner, or the center for ellipses.
    Position(Point),
    Size(Size),
    Radii { x: f64, y: f64 },
    CornerRadius(f64),
    Rotation(f64),
    Points(Vec<Point>),
    Content(String),
    FontSize(f64),
    StrokeColor(SerializableColor),
    FillColor(Option<SerializableColor>),
    StrokeWidth(f64),
    Opacity(f64),
}

impl FieldValue {
    pub fn field(&self) -> LayerField {
        match self {
            FieldValue::Position(_) => LayerField::Position,
            FieldValue::Size(_) => LayerField::Size,
            FieldValue::Radii { .. } => LayerField::Radii,
            FieldValue::CornerRadius(_) => LayerField::CornerRadius,
            FieldValue::Rotation(_) => LayerField::Rotation,
            FieldValue::Points(_) => LayerField::Points,
            FieldValue::Content(_) => LayerField::Content,
            FieldValue::FontSize(_) => LayerField::FontSize,
            FieldValue::StrokeColor(_) => LayerField::StrokeColor,
            FieldValue::FillColor(_) => LayerField::FillColor,
            FieldValue::StrokeWidth(_) => LayerField::StrokeWidth,
            FieldValue::Opacity(_) => LayerField::Opacity,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let finite_point = |p: &Point| p.x.is_finite() && p.y.is_finite();
        let ok = match self {
            FieldValue::Position(p) => finite_point(p),
            FieldValue::Size(s) => {
                s.width.is_finite() && s.height.is_finite() && s.width >= 0.0 && s.height >= 0.0
            }
            FieldValue::Radii { x, y } => x.is_finite() && y.is_finite() && *x >= 0.0 && *y >= 0.0,
            FieldValue::CornerRadius(r) => r.is_finite() && *r >= 0.0,
            FieldValue::Rotation(r) => r.is_finite(),
            FieldValue::Points(points) => !points.is_empty() && points.iter().all(finite_point),
            FieldValue::Content(_) => true,
            FieldValue::FontSize(s) => s.is_finite() && *s > 0.0,
            FieldValue::StrokeColor(_) | FieldValue::FillColor(_) => true,
            FieldValue::StrokeWidth(w) => w.is_finite() && *w >= 0.0,
            FieldValue::Opacity(o) => o.is_finite() && (0.0..=1.0).contains(o),
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::InvalidValue(field_name(self.field())))
        }
    }
}

fn field_name(field: LayerField) -> &'static str {
    match field {
        LayerField::Position => "position",
        LayerField::Size => "size",
        LayerField::Radii => "radii",
        LayerField::CornerRadius => "corner_radius",
        LayerField::Rotation => "rotation",
        LayerField::Points => "points",
        LayerField::Content => "content",
        LayerField::FontSize => "font_size",
        LayerField::StrokeColor => "stroke_color",
        LayerField::FillColor => "fill_color",
        LayerField::StrokeWidth => "stroke_width",
        LayerField::Opacity => "opacity",
    }
}

/// A set of field values, at most one per group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<FieldValue>", into = "Vec<FieldValue>")]
pub struct LayerPatch {
    fields: BTreeMap<LayerField, FieldValue>,
}

impl LayerPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add or replace a field value.
    pub fn with(mut self, value: FieldValue) -> Self {
        self.set(value);
        self
    }

    pub fn set(&mut self, value: FieldValue) {
        self.fields.insert(value.field(), value);
    }

    pub fn get(&self, field: LayerField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Field groups in this patch, in stable order.
    pub fn fields(&self) -> impl Iterator<Item = LayerField> + '_ {
        self.fields.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.fields.values()
    }

    /// True when both patches name exactly the same groups.
    pub fn same_fields(&self, other: &LayerPatch) -> bool {
        self.fields.keys().eq(other.fields.keys())
    }

    /// Structural check of every value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.values().try_for_each(FieldValue::validate)
    }

    /// Check that every group exists on layers of `kind`.
    pub fn check_applicable(&self, kind: LayerKind) -> Result<(), ValidationError> {
        match self.fields().find(|field| !field.applies_to(kind)) {
            Some(field) => Err(ValidationError::FieldNotApplicable { field, kind }),
            None => Ok(()),
        }
    }
}

impl From<Vec<FieldValue>> for LayerPatch {
    fn from(values: Vec<FieldValue>) -> Self {
        let mut patch = LayerPatch::new();
        for value in values {
            patch.set(value);
        }
        patch
    }
}

impl From<LayerPatch> for Vec<FieldValue> {
    fn from(patch: LayerPatch) -> Self {
        patch.fields.into_values().collect()
    }
}

impl FromIterator<FieldValue> for LayerPatch {
    fn from_iter<I: IntoIterator<Item = FieldValue>>(iter: I) -> Self {
        let mut patch = LayerPatch::new();
        for value in iter {
            patch.set(value);
        }
        patch
    }
}

impl Layer {
    /// Read the current value of one field group, if it exists on this kind.
    pub fn field(&self, field: LayerField) -> Option<FieldValue> {
        let style = self.style();
        let value = match field {
            LayerField::StrokeColor => FieldValue::StrokeColor(style.stroke_color),
            LayerField::FillColor => FieldValue::FillColor(style.fill_color),
            LayerField::StrokeWidth => FieldValue::StrokeWidth(style.stroke_width),
            LayerField::Opacity => FieldValue::Opacity(style.opacity),
            LayerField::Rotation if field.applies_to(self.kind()) => {
                FieldValue::Rotation(self.rotation())
            }
            _ => match (self, field) {
                (Layer::Rectangle(r), LayerField::Position) => FieldValue::Position(r.position),
                (Layer::Rectangle(r), LayerField::Size) => {
                    FieldValue::Size(Size::new(r.width, r.height))
                }
                (Layer::Rectangle(r), LayerField::CornerRadius) => {
                    FieldValue::CornerRadius(r.corner_radius)
                }
                (Layer::Ellipse(e), LayerField::Position) => FieldValue::Position(e.center),
                (Layer::Ellipse(e), LayerField::Radii) => FieldValue::Radii {
                    x: e.radius_x,
                    y: e.radius_y,
                },
                (Layer::Path(p), LayerField::Points) => FieldValue::Points(p.points.clone()),
                (Layer::Text(t), LayerField::Position) => FieldValue::Position(t.position),
                (Layer::Text(t), LayerField::Content) => FieldValue::Content(t.content.clone()),
                (Layer::Text(t), LayerField::FontSize) => FieldValue::FontSize(t.font_size),
                (Layer::Image(i), LayerField::Position) => FieldValue::Position(i.position),
                (Layer::Image(i), LayerField::Size) => {
                    FieldValue::Size(Size::new(i.width, i.height))
                }
                _ => return None,
            },
        };
        Some(value)
    }

    /// Capture the current values of every group named in `patch`.
    /// Returns `None` if any group does not exist on this kind.
    pub fn capture(&self, patch: &LayerPatch) -> Option<LayerPatch> {
        patch.fields().map(|field| self.field(field)).collect()
    }

    /// Overwrite one field group. Returns false (and changes nothing) when
    /// the group does not exist on this kind.
    pub fn set_field(&mut self, value: &FieldValue) -> bool {
        if !value.field().applies_to(self.kind()) {
            return false;
        }
        match (self, value) {
            (layer, FieldValue::StrokeColor(c)) => layer.style_mut().stroke_color = *c,
            (layer, FieldValue::FillColor(c)) => layer.style_mut().fill_color = *c,
            (layer, FieldValue::StrokeWidth(w)) => layer.style_mut().stroke_width = *w,
            (layer, FieldValue::Opacity(o)) => layer.style_mut().opacity = *o,
            (Layer::Rectangle(r), FieldValue::Position(p)) => r.position = *p,
            (Layer::Rectangle(r), FieldValue::Size(s)) => {
                r.width = s.width;
                r.height = s.height;
            }
            (Layer::Rectangle(r), FieldValue::CornerRadius(c)) => r.corner_radius = *c,
            (Layer::Rectangle(r), FieldValue::Rotation(a)) => r.rotation = *a,
            (Layer::Ellipse(e), FieldValue::Position(p)) => e.center = *p,
            (Layer::Ellipse(e), FieldValue::Radii { x, y }) => {
                e.radius_x = *x;
                e.radius_y = *y;
            }
            (Layer::Ellipse(e), FieldValue::Rotation(a)) => e.rotation = *a,
            (Layer::Path(p), FieldValue::Points(points)) => p.points = points.clone(),
            (Layer::Text(t), FieldValue::Position(p)) => t.position = *p,
            (Layer::Text(t), FieldValue::Content(c)) => t.content = c.clone(),
            (Layer::Text(t), FieldValue::FontSize(s)) => t.font_size = *s,
            (Layer::Text(t), FieldValue::Rotation(a)) => t.rotation = *a,
            (Layer::Image(i), FieldValue::Position(p)) => i.position = *p,
            (Layer::Image(i), FieldValue::Size(s)) => {
                i.width = s.width;
                i.height = s.height;
            }
            (Layer::Image(i), FieldValue::Rotation(a)) => i.rotation = *a,
            _ => return false,
        }
        true
    }

    /// Apply every field of `patch`. All-or-nothing: if any group does not
    /// exist on this kind the layer is left untouched.
    pub fn apply_patch(&mut self, patch: &LayerPatch) -> bool {
        if patch.check_applicable(self.kind()).is_err() {
            return false;
        }
        for value in patch.values() {
            self.set_field(value);
        }
        true
    }
}
