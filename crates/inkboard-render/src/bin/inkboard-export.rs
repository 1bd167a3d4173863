//! Export a saved board to SVG, PNG or JSON.

use std::io::{Read, Write};
use std::path::PathBuf;

use clap::Parser;
use inkboard_core::{BoardSnapshot, SerializableColor};
use inkboard_render::{ExportFormat, ExportOptions, render_with};

/// Render an Inkboard snapshot or checkpoint file
#[derive(Parser, Debug)]
#[command(name = "inkboard-export")]
#[command(version, about, long_about = None)]
struct Args {
    /// Snapshot or checkpoint JSON ("-" reads stdin)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file ("-" or omitted writes stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// svg, png or json. Defaults to the output extension, then svg.
    #[arg(short, long, value_parser = parse_format)]
    format: Option<ExportFormat>,

    /// Resolution multiplier
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// Margin around the content, in board units
    #[arg(long, default_value_t = 16.0)]
    padding: f64,

    /// Background color as #rgb, #rrggbb or #rrggbbaa
    #[arg(long, value_parser = parse_color)]
    background: Option<SerializableColor>,
}

fn parse_format(value: &str) -> Result<ExportFormat, String> {
    value.parse().map_err(|e: inkboard_render::RenderError| e.to_string())
}

fn parse_color(value: &str) -> Result<SerializableColor, String> {
    SerializableColor::from_hex(value).ok_or_else(|| format!("invalid color: {value}"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let text = if args.input.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&args.input)?
    };
    let snapshot = parse_snapshot(&text)?;

    let to_stdout = args.output.as_ref().is_none_or(|path| path.as_os_str() == "-");
    let format = match args.format {
        Some(format) => format,
        None => args
            .output
            .as_ref()
            .and_then(|path| path.extension())
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
            .unwrap_or(ExportFormat::Svg),
    };

    let mut options = ExportOptions::default()
        .with_scale(args.scale)
        .with_padding(args.padding);
    if let Some(background) = args.background {
        options = options.with_background(background);
    }

    let bytes = render_with(&snapshot, format, &options)?;
    log::info!("Rendered {} layers as {} ({} bytes)", snapshot.len(), format, bytes.len());

    match args.output {
        Some(path) if !to_stdout => std::fs::write(path, bytes)?,
        _ => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}

/// Accept a bare snapshot or a checkpoint wrapping one.
fn parse_snapshot(text: &str) -> serde_json::Result<BoardSnapshot> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    match value.get("snapshot") {
        Some(inner) => serde_json::from_value(inner.clone()),
        None => serde_json::from_value(value),
    }
}
