//! Software rasterisation with tiny-skia and PNG encoding.

use crate::error::{RenderError, RenderResult};
use crate::format::{ExportOptions, Frame};
use inkboard_core::shapes::{Drawable, Image, Text};
use inkboard_core::{BoardSnapshot, Layer, LayerStyle, SerializableColor};
use kurbo::{Affine, BezPath, PathEl, Point, Rect, Shape};
use tiny_skia::{
    ColorU8, FillRule, FilterQuality, LineCap, LineJoin, Paint, Pixmap, PixmapPaint, Stroke,
    Transform,
};

/// Raw RGBA pixels of a rendered board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    /// RGBA pixel data (4 bytes per pixel, not premultiplied).
    pub rgba_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RasterImage {
    /// Color of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y * self.width + x) * 4) as usize;
        let px = self.rgba_data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Encode as an 8-bit RGBA PNG.
    pub fn encode_png(&self) -> RenderResult<Vec<u8>> {
        let mut png_data = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut png_data, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.rgba_data)?;
            writer.finish()?;
        }
        Ok(png_data)
    }
}

/// Render a snapshot into RGBA pixels.
pub fn rasterize(snapshot: &BoardSnapshot, options: &ExportOptions) -> RenderResult<RasterImage> {
    let frame = Frame::new(snapshot, options)?;
    let mut pixmap = Pixmap::new(frame.width, frame.height).ok_or(RenderError::TooLarge {
        width: frame.width as u64,
        height: frame.height as u64,
    })?;
    pixmap.fill(skia_color(options.background));

    let view = frame.view();
    for layer in snapshot.ordered() {
        let transform = view * layer.placement();
        match layer {
            Layer::Image(image) => draw_image(&mut pixmap, image, transform),
            Layer::Text(text) => draw_text(&mut pixmap, text, transform),
            Layer::Path(path) if path.points.len() == 1 => {
                let dot = kurbo::Circle::new(path.points[0], path.style.stroke_width / 2.0);
                fill(&mut pixmap, &dot.to_path(0.1), path.style.stroke_with_opacity(), transform);
            }
            _ => draw_outline(&mut pixmap, &layer.to_path(), layer.style(), transform),
        }
    }

    let mut rgba_data = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let c = pixel.demultiply();
        rgba_data.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    Ok(RasterImage {
        rgba_data,
        width: frame.width,
        height: frame.height,
    })
}

/// Render a snapshot as PNG bytes.
pub fn render_png(snapshot: &BoardSnapshot, options: &ExportOptions) -> RenderResult<Vec<u8>> {
    rasterize(snapshot, options)?.encode_png()
}

fn draw_outline(pixmap: &mut Pixmap, path: &BezPath, style: &LayerStyle, transform: Affine) {
    if let Some(color) = style.fill_with_opacity() {
        fill(pixmap, path, color, transform);
    }

    let color = style.stroke_with_opacity();
    if style.stroke_width <= 0.0 || color.a == 0 {
        return;
    }
    let Some(path) = skia_path(path) else {
        return;
    };
    let stroke = Stroke {
        width: style.stroke_width as f32,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(&path, &paint(color), &stroke, skia_transform(transform), None);
}

fn fill(pixmap: &mut Pixmap, path: &BezPath, color: SerializableColor, transform: Affine) {
    if color.a == 0 {
        return;
    }
    if let Some(path) = skia_path(path) {
        pixmap.fill_path(
            &path,
            &paint(color),
            FillRule::Winding,
            skia_transform(transform),
            None,
        );
    }
}

/// Text without a font engine: every visible glyph becomes a solid cell in
/// the text color, laid out on the same grid the layer's bounds use.
fn draw_text(pixmap: &mut Pixmap, text: &Text, transform: Affine) {
    let advance = text.char_width();
    let line_height = text.line_height();
    let cell_width = advance * 0.7;
    let cell_height = text.font_size * 0.7;

    let mut cells = BezPath::new();
    for (row, line) in text.lines().iter().enumerate() {
        let top = text.position.y + row as f64 * line_height + (line_height - cell_height) / 2.0;
        for (col, c) in line.chars().enumerate() {
            if c.is_whitespace() {
                continue;
            }
            let left = text.position.x + col as f64 * advance + (advance - cell_width) / 2.0;
            let cell = Rect::new(left, top, left + cell_width, top + cell_height);
            cells.extend(cell.path_elements(0.1));
        }
    }
    fill(pixmap, &cells, text.style.stroke_with_opacity(), transform);
}

fn draw_image(pixmap: &mut Pixmap, image: &Image, transform: Affine) {
    let Some(decoded) = decode_image(image) else {
        log::warn!("Image layer {} could not be decoded, drawing placeholder", image.id());
        draw_image_placeholder(pixmap, image, transform);
        return;
    };

    let bounds = image.as_rect();
    let scale_x = bounds.width() / decoded.width() as f64;
    let scale_y = bounds.height() / decoded.height() as f64;
    let image_transform = transform
        * Affine::translate((bounds.x0, bounds.y0))
        * Affine::scale_non_uniform(scale_x, scale_y);

    let paint = PixmapPaint {
        opacity: image.style.opacity as f32,
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    pixmap.draw_pixmap(0, 0, decoded.as_ref(), &paint, skia_transform(image_transform), None);

    draw_outline(
        pixmap,
        &bounds.to_path(0.1),
        &LayerStyle {
            fill_color: None,
            ..image.style.clone()
        },
        transform,
    );
}

fn decode_image(image: &Image) -> Option<Pixmap> {
    let bytes = image.data()?;
    let rgba = ::image::load_from_memory(&bytes).ok()?.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Some(pixmap)
}

fn draw_image_placeholder(pixmap: &mut Pixmap, image: &Image, transform: Affine) {
    let bounds = image.as_rect();
    let rect_path = bounds.to_path(0.1);
    fill(pixmap, &rect_path, SerializableColor::new(200, 200, 200, 255), transform);

    let mut cross = BezPath::new();
    cross.move_to(Point::new(bounds.x0, bounds.y0));
    cross.line_to(Point::new(bounds.x1, bounds.y1));
    cross.move_to(Point::new(bounds.x1, bounds.y0));
    cross.line_to(Point::new(bounds.x0, bounds.y1));
    let style = LayerStyle {
        stroke_color: SerializableColor::new(150, 150, 150, 255),
        stroke_width: 2.0,
        fill_color: None,
        opacity: 1.0,
    };
    draw_outline(pixmap, &cross, &style, transform);
    draw_outline(pixmap, &rect_path, &style, transform);
}

fn paint(color: SerializableColor) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, color.a);
    paint.anti_alias = true;
    paint
}

fn skia_color(color: SerializableColor) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(color.r, color.g, color.b, color.a)
}

fn skia_transform(affine: Affine) -> Transform {
    let [a, b, c, d, e, f] = affine.as_coeffs();
    Transform::from_row(a as f32, b as f32, c as f32, d as f32, e as f32, f as f32)
}

fn skia_path(path: &BezPath) -> Option<tiny_skia::Path> {
    let mut builder = tiny_skia::PathBuilder::new();
    for el in path.elements() {
        match *el {
            PathEl::MoveTo(p) => builder.move_to(p.x as f32, p.y as f32),
            PathEl::LineTo(p) => builder.line_to(p.x as f32, p.y as f32),
            PathEl::QuadTo(p1, p2) => {
                builder.quad_to(p1.x as f32, p1.y as f32, p2.x as f32, p2.y as f32)
            }
            PathEl::CurveTo(p1, p2, p3) => builder.cubic_to(
                p1.x as f32,
                p1.y as f32,
                p2.x as f32,
                p2.y as f32,
                p3.x as f32,
                p3.y as f32,
            ),
            PathEl::ClosePath => builder.close(),
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::snapshot_of;
    use inkboard_core::shapes::{ImageFormat, Path, Rectangle};

    const RED: SerializableColor = SerializableColor { r: 255, g: 0, b: 0, a: 255 };

    fn filled_rect(x: f64, y: f64, color: SerializableColor) -> Layer {
        let mut rect = Rectangle::new(Point::new(x, y), 40.0, 30.0);
        rect.style.fill_color = Some(color);
        rect.style.stroke_width = 0.0;
        rect.into()
    }

    fn tiny_png(rgba: [u8; 4]) -> Vec<u8> {
        RasterImage {
            rgba_data: rgba.repeat(4),
            width: 2,
            height: 2,
        }
        .encode_png()
        .unwrap()
    }

    #[test]
    fn test_png_signature() {
        let png = render_png(&snapshot_of(vec![filled_rect(0.0, 0.0, RED)]), &ExportOptions::default()).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn test_fill_lands_at_offset() {
        let raster = rasterize(&snapshot_of(vec![filled_rect(0.0, 0.0, RED)]), &ExportOptions::default()).unwrap();
        assert_eq!((raster.width, raster.height), (72, 62));
        // Board (20, 15) shifted by the 16 unit padding.
        assert_eq!(raster.pixel(36, 31), Some([255, 0, 0, 255]));
        assert_eq!(raster.pixel(2, 2), Some([255, 255, 255, 255]));
        assert_eq!(raster.pixel(72, 0), None);
    }

    #[test]
    fn test_paint_order_front_wins() {
        let blue = SerializableColor::new(0, 0, 255, 255);
        let back = filled_rect(0.0, 0.0, RED);
        let front = filled_rect(10.0, 10.0, blue);
        let raster = rasterize(&snapshot_of(vec![back, front]), &ExportOptions::default()).unwrap();
        // Board (25, 20) is covered by both.
        assert_eq!(raster.pixel(41, 36), Some([0, 0, 255, 255]));
        // Board (5, 5) only by the back one.
        assert_eq!(raster.pixel(21, 21), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_rasterize_is_deterministic() {
        let mut stroke = Path::from_points(vec![Point::new(0.0, 0.0), Point::new(30.0, 12.5), Point::new(60.0, 5.0)]);
        stroke.style.stroke_width = 3.0;
        let snapshot = snapshot_of(vec![
            filled_rect(5.0, 5.0, RED),
            stroke.into(),
            Text::new(Point::new(0.0, 40.0), "Hi there").into(),
        ]);
        let options = ExportOptions::default().with_scale(1.5);
        assert_eq!(
            render_png(&snapshot, &options).unwrap(),
            render_png(&snapshot, &options).unwrap()
        );
    }

    #[test]
    fn test_embedded_image_is_drawn() {
        let green = [0, 255, 0, 255];
        let image = Image::new(Point::new(0.0, 0.0), &tiny_png(green), 2, 2, ImageFormat::Png).with_size(20.0, 20.0);
        let raster = rasterize(&snapshot_of(vec![image.into()]), &ExportOptions::default()).unwrap();
        let [r, g, b, a] = raster.pixel(26, 26).unwrap();
        assert!(r < 5 && g > 250 && b < 5 && a > 250);
    }

    #[test]
    fn test_undecodable_image_gets_placeholder() {
        let image = Image::new(Point::new(0.0, 0.0), b"not an image", 2, 2, ImageFormat::Png).with_size(20.0, 20.0);
        let raster = rasterize(&snapshot_of(vec![image.into()]), &ExportOptions::default()).unwrap();
        assert_eq!(raster.pixel(26, 19), Some([200, 200, 200, 255]));
    }

    #[test]
    fn test_transparent_background() {
        let options = ExportOptions::default().with_background(SerializableColor::transparent());
        let raster = rasterize(&BoardSnapshot::default(), &options).unwrap();
        assert!(raster.rgba_data.iter().all(|&b| b == 0));
    }
}
