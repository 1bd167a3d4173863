//! Export formats, options and the output frame.

use crate::error::{RenderError, RenderResult};
use inkboard_core::{BoardSnapshot, SerializableColor};
use kurbo::{Affine, Rect};
use std::fmt;
use std::str::FromStr;

/// Largest width or height, in pixels, a raster export may have.
pub const MAX_DIMENSION: u32 = 16_384;

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Svg,
    Png,
    Json,
}

impl ExportFormat {
    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Svg => "svg",
            ExportFormat::Png => "png",
            ExportFormat::Json => "json",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Svg => "image/svg+xml",
            ExportFormat::Png => "image/png",
            ExportFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(ExportFormat::Svg),
            "png" => Ok(ExportFormat::Png),
            "json" => Ok(ExportFormat::Json),
            _ => Err(RenderError::UnknownFormat(s.to_string())),
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Output resolution multiplier (1 = 1x, 2 = 2x).
    pub scale: f64,
    /// Margin around the content, in board units.
    pub padding: f64,
    /// Background color. Fully transparent skips the background.
    pub background: SerializableColor,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            padding: 16.0,
            background: SerializableColor::white(),
        }
    }
}

impl ExportOptions {
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_padding(mut self, padding: f64) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_background(mut self, background: SerializableColor) -> Self {
        self.background = background;
        self
    }

    fn validate(&self) -> RenderResult<()> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(RenderError::InvalidOptions("scale"));
        }
        if !self.padding.is_finite() || self.padding < 0.0 {
            return Err(RenderError::InvalidOptions("padding"));
        }
        Ok(())
    }
}

/// Region of the board being exported and the output size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Frame {
    /// Exported region, in board coordinates.
    pub bounds: Rect,
    pub scale: f64,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Content bounds plus padding. An empty board exports a padding-sized
    /// square around the origin.
    pub fn new(snapshot: &BoardSnapshot, options: &ExportOptions) -> RenderResult<Self> {
        options.validate()?;
        let content = snapshot.bounds().unwrap_or(Rect::ZERO);
        let bounds = content.inflate(options.padding, options.padding);

        let width = pixels(bounds.width() * options.scale);
        let height = pixels(bounds.height() * options.scale);
        if width > MAX_DIMENSION as u64 || height > MAX_DIMENSION as u64 {
            return Err(RenderError::TooLarge { width, height });
        }

        Ok(Self {
            bounds,
            scale: options.scale,
            width: width as u32,
            height: height as u32,
        })
    }

    /// Board coordinates to output pixels.
    pub fn view(&self) -> Affine {
        Affine::scale(self.scale) * Affine::translate((-self.bounds.x0, -self.bounds.y0))
    }
}

fn pixels(extent: f64) -> u64 {
    if extent.is_finite() {
        (extent.ceil() as u64).max(1)
    } else {
        u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_core::shapes::Rectangle;
    use inkboard_core::BoardDocument;
    use inkboard_core::Op;
    use kurbo::Point;

    fn single_rect_snapshot() -> BoardSnapshot {
        let mut doc = BoardDocument::new();
        let rect = Rectangle::new(Point::new(10.0, 20.0), 100.0, 50.0);
        doc.apply(&Op::insert(rect.into(), 0)).unwrap();
        doc.snapshot()
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("svg".parse::<ExportFormat>().unwrap(), ExportFormat::Svg);
        assert_eq!("PNG".parse::<ExportFormat>().unwrap(), ExportFormat::Png);
        assert_eq!(ExportFormat::Json.mime_type(), "application/json");
        assert!(matches!(
            "gif".parse::<ExportFormat>(),
            Err(RenderError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_frame_includes_padding() {
        let frame = Frame::new(&single_rect_snapshot(), &ExportOptions::default()).unwrap();
        assert_eq!(frame.bounds, Rect::new(-6.0, 4.0, 126.0, 86.0));
        assert_eq!((frame.width, frame.height), (132, 82));
        assert_eq!(frame.view() * Point::new(-6.0, 4.0), Point::ZERO);
    }

    #[test]
    fn test_frame_scales_output() {
        let options = ExportOptions::default().with_scale(2.0).with_padding(0.0);
        let frame = Frame::new(&single_rect_snapshot(), &options).unwrap();
        assert_eq!((frame.width, frame.height), (200, 100));
    }

    #[test]
    fn test_empty_board_frame() {
        let frame = Frame::new(&BoardSnapshot::default(), &ExportOptions::default()).unwrap();
        assert_eq!((frame.width, frame.height), (32, 32));
    }

    #[test]
    fn test_rejects_bad_options() {
        let snapshot = single_rect_snapshot();
        let bad_scale = ExportOptions::default().with_scale(0.0);
        assert!(matches!(
            Frame::new(&snapshot, &bad_scale),
            Err(RenderError::InvalidOptions("scale"))
        ));
        let huge = ExportOptions::default().with_scale(1_000.0);
        assert!(matches!(Frame::new(&snapshot, &huge), Err(RenderError::TooLarge { .. })));
    }
}
