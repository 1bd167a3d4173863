//! SVG export.
//!
//! One top-level element per layer, emitted in paint order and tagged with
//! `data-layer-id`. Numbers go through [`num`] so identical snapshots give
//! byte-identical documents.

use crate::error::RenderResult;
use crate::format::{ExportOptions, Frame};
use inkboard_core::shapes::{Image, Text};
use inkboard_core::{BoardSnapshot, Layer, LayerId, LayerStyle, SerializableColor};
use kurbo::{BezPath, PathEl, Point};
use std::fmt::Write;

/// Render a snapshot as an SVG document.
pub fn render_svg(snapshot: &BoardSnapshot, options: &ExportOptions) -> RenderResult<String> {
    let frame = Frame::new(snapshot, options)?;
    let bounds = frame.bounds;
    let mut output = String::new();

    writeln!(output, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        output,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="{} {} {} {}">"#,
        num(bounds.width() * frame.scale),
        num(bounds.height() * frame.scale),
        num(bounds.x0),
        num(bounds.y0),
        num(bounds.width()),
        num(bounds.height()),
    )?;

    if options.background.a > 0 {
        writeln!(
            output,
            r#"  <rect x="{}" y="{}" width="{}" height="{}"{}/>"#,
            num(bounds.x0),
            num(bounds.y0),
            num(bounds.width()),
            num(bounds.height()),
            fill_attrs(Some(options.background)),
        )?;
    }

    for layer in snapshot.ordered() {
        write_layer(&mut output, layer)?;
    }

    writeln!(output, "</svg>")?;
    Ok(output)
}

fn write_layer(out: &mut String, layer: &Layer) -> std::fmt::Result {
    let id = layer.id();
    let transform = rotation_attr(layer);
    match layer {
        Layer::Rectangle(rect) => {
            let r = rect.as_rect();
            write!(
                out,
                r#"  <rect data-layer-id="{id}" x="{}" y="{}" width="{}" height="{}""#,
                num(r.x0),
                num(r.y0),
                num(r.width()),
                num(r.height()),
            )?;
            if rect.corner_radius > 0.0 {
                write!(out, r#" rx="{}""#, num(rect.corner_radius))?;
            }
            writeln!(out, "{}{transform}/>", shape_paint(&rect.style))
        }
        Layer::Ellipse(ellipse) => writeln!(
            out,
            r#"  <ellipse data-layer-id="{id}" cx="{}" cy="{}" rx="{}" ry="{}"{}{transform}/>"#,
            num(ellipse.center.x),
            num(ellipse.center.y),
            num(ellipse.radius_x),
            num(ellipse.radius_y),
            shape_paint(&ellipse.style),
        ),
        Layer::Path(path) => {
            let d = match path.points.as_slice() {
                // Zero-length segment so round caps still draw a dot.
                [only] => format!("M{} {} L{} {}", num(only.x), num(only.y), num(only.x), num(only.y)),
                _ => path_data(&layer.to_path()),
            };
            writeln!(
                out,
                r#"  <path data-layer-id="{id}" d="{d}"{} stroke-linecap="round" stroke-linejoin="round"{transform}/>"#,
                shape_paint(&path.style),
            )
        }
        Layer::Text(text) => write_text(out, id, text, &transform),
        Layer::Image(image) => write_image(out, id, image, &transform),
    }
}

fn write_text(out: &mut String, id: LayerId, text: &Text, transform: &str) -> std::fmt::Result {
    writeln!(
        out,
        r#"  <g data-layer-id="{id}"{} font-family="sans-serif" font-size="{}" xml:space="preserve"{transform}>"#,
        fill_attrs(Some(text.style.stroke_with_opacity())),
        num(text.font_size),
    )?;
    for (i, line) in text.lines().iter().enumerate() {
        let baseline = text.position.y + i as f64 * text.line_height() + text.font_size;
        writeln!(
            out,
            r#"    <text x="{}" y="{}">{}</text>"#,
            num(text.position.x),
            num(baseline),
            escape(line),
        )?;
    }
    writeln!(out, "  </g>")
}

fn write_image(out: &mut String, id: LayerId, image: &Image, transform: &str) -> std::fmt::Result {
    let r = image.as_rect();
    let geometry = format!(
        r#"x="{}" y="{}" width="{}" height="{}""#,
        num(r.x0),
        num(r.y0),
        num(r.width()),
        num(r.height()),
    );
    let opacity = if image.style.opacity < 1.0 {
        format!(r#" opacity="{}""#, num(image.style.opacity))
    } else {
        String::new()
    };
    let href = image.data_uri();

    if image.style.stroke_width <= 0.0 {
        return writeln!(
            out,
            r#"  <image data-layer-id="{id}" {geometry} preserveAspectRatio="none" href="{href}"{opacity}{transform}/>"#,
        );
    }

    writeln!(out, r#"  <g data-layer-id="{id}"{opacity}{transform}>"#)?;
    writeln!(out, r#"    <image {geometry} preserveAspectRatio="none" href="{href}"/>"#)?;
    writeln!(out, r#"    <rect {geometry} fill="none"{}/>"#, stroke_attrs(&image.style))?;
    writeln!(out, "  </g>")
}

fn rotation_attr(layer: &Layer) -> String {
    let rotation = layer.rotation();
    if rotation == 0.0 {
        return String::new();
    }
    let center = layer.bounds().center();
    format!(
        r#" transform="rotate({} {} {})""#,
        num(rotation.to_degrees()),
        num(center.x),
        num(center.y),
    )
}

fn shape_paint(style: &LayerStyle) -> String {
    format!("{}{}", fill_attrs(style.fill_with_opacity()), stroke_attrs(style))
}

fn fill_attrs(color: Option<SerializableColor>) -> String {
    match color {
        Some(color) if color.a > 0 => {
            let mut attrs = format!(r#" fill="{}""#, color.to_hex());
            if color.a < 255 {
                attrs.push_str(&format!(r#" fill-opacity="{}""#, num(color.a as f64 / 255.0)));
            }
            attrs
        }
        _ => r#" fill="none""#.to_string(),
    }
}

fn stroke_attrs(style: &LayerStyle) -> String {
    let color = style.stroke_with_opacity();
    if style.stroke_width <= 0.0 || color.a == 0 {
        return r#" stroke="none""#.to_string();
    }
    let mut attrs = format!(
        r#" stroke="{}" stroke-width="{}""#,
        color.to_hex(),
        num(style.stroke_width)
    );
    if color.a < 255 {
        attrs.push_str(&format!(r#" stroke-opacity="{}""#, num(color.a as f64 / 255.0)));
    }
    attrs
}

/// SVG path data with stable number formatting.
pub(crate) fn path_data(path: &BezPath) -> String {
    let pt = |p: Point| format!("{} {}", num(p.x), num(p.y));
    path.elements()
        .iter()
        .map(|el| match *el {
            PathEl::MoveTo(p) => format!("M{}", pt(p)),
            PathEl::LineTo(p) => format!("L{}", pt(p)),
            PathEl::QuadTo(p1, p2) => format!("Q{} {}", pt(p1), pt(p2)),
            PathEl::CurveTo(p1, p2, p3) => format!("C{} {} {}", pt(p1), pt(p2), pt(p3)),
            PathEl::ClosePath => "Z".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a number with at most three decimals and no trailing zeros.
pub(crate) fn num(value: f64) -> String {
    let mut s = format!("{value:.3}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s.remove(0);
    }
    s
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::snapshot_of;
    use inkboard_core::shapes::{Ellipse, ImageFormat, Path, Rectangle};

    #[test]
    fn test_num_formatting() {
        assert_eq!(num(1.0), "1");
        assert_eq!(num(1.5), "1.5");
        assert_eq!(num(1.23456), "1.235");
        assert_eq!(num(-0.0001), "0");
        assert_eq!(num(-2.5), "-2.5");
        assert_eq!(num(100.0), "100");
    }

    #[test]
    fn test_elements_follow_layer_order() {
        let back: Layer = Rectangle::new(Point::new(0.0, 0.0), 10.0, 10.0).into();
        let middle: Layer = Ellipse::circle(Point::new(20.0, 20.0), 5.0).into();
        let front: Layer = Path::from_points(vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0)]).into();
        let ids = [back.id(), middle.id(), front.id()];
        let snapshot = snapshot_of(vec![back, middle, front]);

        let svg = render_svg(&snapshot, &ExportOptions::default()).unwrap();
        let offsets: Vec<usize> = ids
            .iter()
            .map(|id| svg.find(&format!(r#"data-layer-id="{id}""#)).unwrap())
            .collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(svg.matches("data-layer-id").count(), 3);
    }

    #[test]
    fn test_output_is_deterministic() {
        let mut rect = Rectangle::new(Point::new(0.1, 0.2), 33.333333, 10.0);
        rect.rotation = 0.3;
        rect.style.fill_color = Some(SerializableColor::new(10, 20, 30, 128));
        let snapshot = snapshot_of(vec![
            rect.into(),
            Text::new(Point::new(5.0, 5.0), "hello\nworld").into(),
        ]);
        let first = render_svg(&snapshot, &ExportOptions::default()).unwrap();
        let second = render_svg(&snapshot.clone(), &ExportOptions::default()).unwrap();
        assert_eq!(first, second);
        assert!(first.contains(r#"width="33.333""#));
        assert!(first.contains(r#"fill-opacity="0.502""#));
    }

    #[test]
    fn test_rotation_about_center() {
        let mut rect = Rectangle::new(Point::new(0.0, 0.0), 20.0, 10.0);
        rect.rotation = std::f64::consts::FRAC_PI_2;
        let svg = render_svg(&snapshot_of(vec![rect.into()]), &ExportOptions::default()).unwrap();
        assert!(svg.contains(r#"transform="rotate(90 10 5)""#));
    }

    #[test]
    fn test_text_is_escaped_per_line() {
        let text = Text::new(Point::new(0.0, 0.0), "a < b\n\"c\" & d");
        let svg = render_svg(&snapshot_of(vec![text.into()]), &ExportOptions::default()).unwrap();
        assert!(svg.contains("<text x=\"0\" y=\"20\">a &lt; b</text>"));
        assert!(svg.contains("<text x=\"0\" y=\"44\">&quot;c&quot; &amp; d</text>"));
    }

    #[test]
    fn test_image_embeds_data_uri() {
        let image = Image::new(Point::new(0.0, 0.0), &[0x89, 0x50, 0x4E, 0x47], 4, 2, ImageFormat::Png);
        let svg = render_svg(&snapshot_of(vec![image.into()]), &ExportOptions::default()).unwrap();
        assert!(svg.contains(r#"href="data:image/png;base64,iVBORw==""#));
        assert!(svg.contains(r#"width="4" height="2""#));
    }

    #[test]
    fn test_single_point_path_draws_dot() {
        let dot = Path::from_points(vec![Point::new(3.0, 4.0)]);
        let svg = render_svg(&snapshot_of(vec![dot.into()]), &ExportOptions::default()).unwrap();
        assert!(svg.contains(r#"d="M3 4 L3 4""#));
    }

    #[test]
    fn test_empty_board_and_transparent_background() {
        let options = ExportOptions::default().with_background(SerializableColor::transparent());
        let svg = render_svg(&BoardSnapshot::default(), &options).unwrap();
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains(r#"viewBox="-16 -16 32 32""#));
        assert!(!svg.contains("<rect"));
        assert!(svg.trim_end().ends_with("</svg>"));
    }
}
