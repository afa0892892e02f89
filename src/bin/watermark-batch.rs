use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use batch_watermark_removal::{
    collect_images, is_supported_image, BatchOptions, BatchProcessor, DetectionCascade,
    DiffusionInpainter, FixedRegions, Region, RegionDetector, WatermarkEngine,
};

/// Where audit masks go when neither the config nor the command line says.
const DEFAULT_MASK_DIR: &str = "data/masks";

#[derive(Parser)]
#[command(
    name = "watermark-batch",
    about = "Remove watermarks from a batch of images with resumable progress",
    version,
    after_help = "Example: watermark-batch data/input -o data/output --region 20,20,180,60\n\n\
                  Completed images are recorded in the checkpoint file; re-running the same\n\
                  command skips them and retries only failures."
)]
struct Cli {
    /// Input image file or directory
    input: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = "data/output")]
    output: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Checkpoint file recording completed images
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Directory for per-image audit masks (default: data/masks)
    #[arg(long)]
    mask_dir: Option<PathBuf>,

    /// Do not write audit masks
    #[arg(long, conflicts_with = "mask_dir")]
    no_masks: bool,

    /// Known watermark region as x1,y1,x2,y2 (repeatable)
    #[arg(long = "region", value_name = "X1,Y1,X2,Y2")]
    regions: Vec<Region>,

    /// Padding in pixels around each detected region
    #[arg(long)]
    padding: Option<u32>,

    /// Detector confidence threshold (0.0-1.0)
    #[arg(short, long)]
    threshold: Option<f32>,

    /// JPEG output quality (1-100)
    #[arg(long)]
    quality: Option<u8>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let opts = match build_options(&cli) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if cli.regions.is_empty() {
        eprintln!("Error: no watermark detector available; pass at least one --region");
        process::exit(1);
    }
    let detector: Arc<dyn RegionDetector> = Arc::new(FixedRegions::new(cli.regions.clone()));

    let cascade = match DetectionCascade::new(Some(detector), None, opts.cascade.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Fatal: {e}");
            process::exit(1);
        }
    };
    let engine = WatermarkEngine::new(cascade, Arc::new(DiffusionInpainter::default()));

    let batch = match BatchProcessor::from_options(engine, &opts) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Fatal: {e}");
            process::exit(1);
        }
    };

    let items = if cli.input.is_dir() {
        match collect_images(&cli.input) {
            Ok(items) => items,
            Err(e) => {
                eprintln!("Error: cannot read {}: {e}", cli.input.display());
                process::exit(1);
            }
        }
    } else if cli.input.is_file() && is_supported_image(&cli.input) {
        vec![cli.input.clone()]
    } else if cli.input.exists() {
        Vec::new()
    } else {
        eprintln!("Error: Input path does not exist: {}", cli.input.display());
        process::exit(1);
    };

    if items.is_empty() {
        eprintln!("No images found to process.");
        return;
    }

    let stats = match batch.process_batch(&items, &cli.output) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Fatal: {e}");
            process::exit(1);
        }
    };

    if !cli.quiet {
        eprintln!();
        eprintln!("[Summary] {stats}");
    }

    if stats.failed > 0 {
        process::exit(1);
    }
}

fn build_options(cli: &Cli) -> batch_watermark_removal::Result<BatchOptions> {
    let mut opts = match &cli.config {
        Some(path) => BatchOptions::from_toml_file(path)?,
        None => BatchOptions {
            mask_dir: Some(PathBuf::from(DEFAULT_MASK_DIR)),
            ..BatchOptions::default()
        },
    };

    if let Some(workers) = cli.workers {
        opts.workers = workers;
    }
    if let Some(checkpoint) = &cli.checkpoint {
        opts.checkpoint.clone_from(checkpoint);
    }
    if cli.no_masks {
        opts.mask_dir = None;
    } else if let Some(dir) = &cli.mask_dir {
        opts.mask_dir = Some(dir.clone());
    }
    if let Some(padding) = cli.padding {
        opts.padding = padding;
    }
    if let Some(threshold) = cli.threshold {
        opts.cascade.confidence_threshold = threshold;
    }
    if let Some(quality) = cli.quality {
        opts.jpeg_quality = quality;
    }

    opts.validate()?;
    Ok(opts)
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
