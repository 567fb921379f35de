use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{EnvFilter, fmt};

use camoscope::raster::{self, BrushMode, BrushSettings};
use camoscope::{
    CamoscopeConfig, DetectionPipeline, InferenceBridge, PerformanceMetrics, Point, SubprocessBackend,
    ValidationEngine,
};

#[derive(Parser)]
#[command(name = "camoscope")]
#[command(about = "Camouflaged object detection workbench")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run images through the analysis engine and validate the results
    Detect {
        #[arg(value_name = "IMAGES", required = true)]
        images: Vec<PathBuf>,

        /// Ground-truth directory (overrides the configuration)
        #[arg(long, value_name = "DIR")]
        ground_truth: Option<PathBuf>,

        /// Save debug outputs to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,

        /// Export session metrics as JSON
        #[arg(long, value_name = "FILE")]
        metrics_json: Option<PathBuf>,

        /// Export the interaction log as CSV
        #[arg(long, value_name = "FILE")]
        metrics_csv: Option<PathBuf>,
    },
    /// Rasterize a polygon to a PNG mask
    Mask {
        /// Vertices as `x,y;x,y;x,y`
        #[arg(value_name = "POINTS", allow_hyphen_values = true)]
        points: String,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        #[arg(long, value_name = "PNG")]
        out: PathBuf,
    },
    /// Apply one brush stroke to a grayscale rank map
    Brush {
        #[arg(value_name = "RANK_PNG")]
        rank: PathBuf,

        #[arg(long)]
        x: f64,

        #[arg(long)]
        y: f64,

        /// Brush diameter in pixels
        #[arg(long, default_value_t = 20.0)]
        size: f64,

        #[arg(long, default_value_t = 0.5)]
        strength: f64,

        /// Lower values instead of raising them
        #[arg(long)]
        decrease: bool,

        #[arg(long, value_name = "PNG")]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => CamoscopeConfig::load(path)?,
        None => CamoscopeConfig::default(),
    }
    .apply_env();

    match args.command {
        Command::Detect {
            images,
            ground_truth,
            debug_out,
            metrics_json,
            metrics_csv,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(detect(
                config,
                args.verbose,
                images,
                ground_truth,
                debug_out,
                metrics_json,
                metrics_csv,
            ))
        }
        Command::Mask {
            points,
            width,
            height,
            out,
        } => {
            let points = parse_points(&points)?;
            let mask = raster::polygon_mask(&points, width, height)
                .ok_or_else(|| anyhow!("A polygon needs at least 3 finite points"))?;
            raster::export_mask_png(&mask, &out)?;
            println!(
                "Wrote {} ({} foreground pixels)",
                out.display(),
                raster::foreground_count(&mask)
            );
            Ok(())
        }
        Command::Brush {
            rank,
            x,
            y,
            size,
            strength,
            decrease,
            out,
        } => {
            let img = image::open(&rank)
                .with_context(|| format!("Failed to open rank map {}", rank.display()))?
                .to_luma8();
            let (width, height) = img.dimensions();

            let mode = if decrease { BrushMode::Decrease } else { BrushMode::Increase };
            let brush = BrushSettings::new(mode, size, strength);
            let data = brush
                .apply_stroke(img.as_raw(), width, height, Point::new(x, y))
                .into_inner();

            let edited = raster::mask_from_bytes(data, width, height)
                .ok_or_else(|| anyhow!("Brush output does not match the rank map size"))?;
            raster::export_mask_png(&edited, &out)?;
            println!("Wrote {}", out.display());
            Ok(())
        }
    }
}

async fn detect(
    config: CamoscopeConfig,
    verbose: bool,
    images: Vec<PathBuf>,
    ground_truth: Option<PathBuf>,
    debug_out: Option<PathBuf>,
    metrics_json: Option<PathBuf>,
    metrics_csv: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bridge = Arc::new(InferenceBridge::new(config.bridge, SubprocessBackend::new()));
    bridge.initialize().await?;

    let mut pipeline = DetectionPipeline::new(Arc::clone(&bridge)).with_verbose(verbose);
    if let Some(dir) = ground_truth.or(config.ground_truth_dir) {
        pipeline = pipeline.with_validation(ValidationEngine::new(dir));
    }
    if let Some(dir) = debug_out {
        pipeline = pipeline.with_debug(dir)?;
    }

    let mut metrics = PerformanceMetrics::new();
    metrics.start_session();

    let mut failures = 0;
    for image in &images {
        metrics.start_task(image);
        let started = Instant::now();
        let outcome = pipeline.process_image(image).await;
        metrics.log_model_run(started.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => {
                metrics.log_detection(&result);
                println!("=== {} ===", image.display());
                println!("{}", result.message.trim_end());
                if !result.parts.is_empty() {
                    println!("Parts: {}", result.parts_breakdown());
                }
            }
            Err(e) if e.is_per_image() => {
                failures += 1;
                eprintln!("{}: {}", image.display(), e);
            }
            Err(e) => return Err(e.into()),
        }
        metrics.end_task();
    }

    metrics.end_session();
    bridge.shutdown().await;

    if let Some(path) = metrics_json {
        metrics.export_json(path)?;
    }
    if let Some(path) = metrics_csv {
        metrics.export_csv(path)?;
    }

    if failures > 0 {
        bail!("{} of {} image(s) failed", failures, images.len());
    }
    Ok(())
}

fn parse_points(spec: &str) -> anyhow::Result<Vec<Point>> {
    spec.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| anyhow!("Expected `x,y`, got `{}`", pair))?;
            Ok(Point::new(x.trim().parse()?, y.trim().parse()?))
        })
        .collect()
}
