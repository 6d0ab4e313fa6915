// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tilemark command line: watermark one document and write the result.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tilemark_app::{ProcessOptions, ProcessedDocument, WatermarkService, progress_channel};
use tilemark_core::TilemarkConfig;
use tilemark_core::error::Result;
use tilemark_core::human_errors::humanize_error;
use tilemark_core::mark::{DensityMode, GridLayout, LayerStrategy, MarkSpec, Rgba};
use tilemark_core::types::InputFile;

#[derive(Parser, Debug)]
#[command(name = "tilemark", version, about = "Tile a semi-transparent mark across a document")]
struct Cli {
    /// Document to mark (PDF, image, DOCX, ODT, RTF, text...).
    input: PathBuf,

    /// Output path. Defaults to `<input>-marked.<ext>` next to the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Mark text.
    #[arg(long, required_unless_present = "image")]
    text: Option<String>,

    /// Image to use as the mark instead of text.
    #[arg(long, conflicts_with = "text")]
    image: Option<PathBuf>,

    /// 0.0 (invisible) to 1.0 (opaque).
    #[arg(long)]
    opacity: Option<f32>,

    /// Degrees, counter-clockwise.
    #[arg(long, allow_hyphen_values = true)]
    rotation: Option<f32>,

    /// Font size in points.
    #[arg(long)]
    size: Option<f32>,

    /// `#rgb`, `#rrggbb` or `#rrggbbaa`.
    #[arg(long)]
    color: Option<String>,

    #[arg(long)]
    spacing_x: Option<f32>,

    #[arg(long)]
    spacing_y: Option<f32>,

    /// Number of offset layers.
    #[arg(long)]
    layers: Option<u32>,

    /// sparse, normal or dense.
    #[arg(long)]
    density: Option<String>,

    /// Shift odd rows by half a column.
    #[arg(long, default_value_t = false)]
    stagger: bool,

    /// Keep marks this far from the page edges.
    #[arg(long)]
    margin: Option<f32>,

    /// overlay, background, alternating or mixed.
    #[arg(long)]
    strategy: Option<String>,

    /// Sign the output digest.
    #[arg(long, default_value_t = false)]
    stamp: bool,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the full result as JSON instead of a summary.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            let human = humanize_error(&err);
            eprintln!("{}\n  {}", human.message, human.suggestion);
            tracing::debug!(error = %err, "technical detail");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => TilemarkConfig::load(path)?,
        None => TilemarkConfig::default(),
    };
    if cli.stamp {
        config.merge.stamp_integrity = true;
    }
    let spec = build_spec(&cli)?;
    let options = build_options(&cli)?;
    let input = InputFile::read(&cli.input)?;

    let service = WatermarkService::start(config).await?;
    let (progress, mut events) = progress_channel(8);
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(step = event.current, of = event.total, "{}", event.message);
            if event.terminal {
                break;
            }
        }
    });

    let processed = service
        .process_document(input, spec, options, Some(progress))
        .await;
    let _ = reporter.await;

    if processed.success
        && let Some(handle) = processed.artifact
        && let Some(artifact) = service.artifact(handle)
    {
        let output = cli
            .output
            .clone()
            .unwrap_or_else(|| sibling(&cli.input, &artifact.name));
        std::fs::write(&output, &artifact.bytes)?;
        service.revoke(handle);
        report(&processed, Some(&output), cli.json)?;
    } else {
        report(&processed, None, cli.json)?;
    }
    service.shutdown();

    Ok(if processed.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_spec(cli: &Cli) -> Result<MarkSpec> {
    let mut spec = match (&cli.image, &cli.text) {
        (Some(path), _) => MarkSpec::image(std::fs::read(path)?),
        (None, Some(text)) => MarkSpec::text(text.clone()),
        (None, None) => MarkSpec::text(String::new()),
    };
    if let Some(opacity) = cli.opacity {
        spec = spec.with_opacity(opacity);
    }
    if let Some(rotation) = cli.rotation {
        spec = spec.with_rotation(rotation);
    }
    if let Some(size) = cli.size {
        spec = spec.with_size(size);
    }
    if let Some(color) = &cli.color {
        spec = spec.with_color(Rgba::parse_hex(color)?);
    }
    spec.validate()?;
    Ok(spec)
}

fn build_options(cli: &Cli) -> Result<ProcessOptions> {
    let defaults = GridLayout::default();
    let density = match &cli.density {
        Some(d) => d.parse::<DensityMode>()?,
        None => defaults.density,
    };
    let strategy = cli
        .strategy
        .as_deref()
        .map(str::parse::<LayerStrategy>)
        .transpose()?;
    Ok(ProcessOptions {
        grid: GridLayout {
            spacing_x: cli.spacing_x.unwrap_or(defaults.spacing_x),
            spacing_y: cli.spacing_y.unwrap_or(defaults.spacing_y),
            layers: cli.layers.unwrap_or(defaults.layers),
            density,
            stagger: cli.stagger,
            margin: cli.margin.unwrap_or(defaults.margin),
            ..defaults
        },
        strategy,
        stamp: cli.stamp.then_some(true),
    })
}

fn sibling(input: &Path, name: &str) -> PathBuf {
    input.parent().map_or_else(|| PathBuf::from(name), |dir| dir.join(name))
}

fn report(processed: &ProcessedDocument, output: Option<&Path>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(processed)?);
        return Ok(());
    }
    if let Some(output) = output {
        println!("wrote {}", output.display());
    }
    if let Some(method) = processed.method {
        println!(
            "  {:?} input via {:?}, {} page(s)",
            processed.file_format, method, processed.page_count
        );
    }
    if let Some(merge) = &processed.merge {
        println!(
            "  {} mark(s) drawn, {} substituted, {} bytes",
            merge.placements_drawn, merge.substitutions, merge.bytes
        );
    }
    if let Some(stamp) = &processed.stamp {
        println!("  {} {}", stamp.algorithm.name(), stamp.digest);
    }
    for warning in &processed.warnings {
        println!("  warning: {warning}");
    }
    for error in &processed.errors {
        eprintln!("  error: {error}");
    }
    println!("  took {} ms", processed.elapsed.as_millis());
    Ok(())
}
