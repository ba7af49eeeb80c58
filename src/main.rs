use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use regionswap::{
    ClassTable, DetectReport, Detector, DetectorConfig, EngineError, Geometry, ImageReplacer, OutcomeStatus,
    PrecomputedDetector, ReplaceConfig, ReplaceReport, YoloDetector,
};

#[derive(Parser)]
#[command(name = "regionswap")]
#[command(about = "Regionswap - replace detected objects with a substitute image", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Paste the substitute over every matching detection
    Replace {
        /// Image to modify
        #[arg(long)]
        original: PathBuf,

        /// Image pasted into each region
        #[arg(long)]
        substitute: PathBuf,

        /// Class label to replace
        #[arg(long)]
        target_class: Option<String>,

        /// Detections must score strictly above this
        #[arg(long)]
        threshold: Option<f32>,

        #[command(flatten)]
        source: DetectorArgs,
    },

    /// Draw detection outlines onto a copy of the image
    Detect {
        /// Input image path
        image: PathBuf,

        #[command(flatten)]
        source: DetectorArgs,
    },
}

#[derive(Args)]
struct DetectorArgs {
    /// YOLO ONNX model (oriented or axis-aligned head)
    #[arg(long, conflicts_with = "detections", required_unless_present = "detections")]
    model: Option<PathBuf>,

    /// JSON file with precomputed detections
    #[arg(long)]
    detections: Option<PathBuf>,

    /// Class names, one per line (defaults to model metadata, then DOTA v1)
    #[arg(long)]
    classes: Option<PathBuf>,

    /// Model family, sets the default input size
    #[arg(long, value_enum, default_value_t = ModelKind::Obb)]
    head: ModelKind,

    /// Network input size for the model
    #[arg(long)]
    input_size: Option<u32>,

    /// Output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JSON file with replacement settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum ModelKind {
    /// Oriented boxes, 1024 input
    Obb,
    /// Axis-aligned boxes, 640 input
    Detect,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    /// JSON output with full details
    Json,
    /// Plain text summary
    Text,
    /// TSV format: index\tclass\tconfidence\tstatus
    Tsv,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .init();
}

fn load_config(args: &DetectorArgs) -> Result<ReplaceConfig, EngineError> {
    let mut config = match &args.config {
        Some(path) => ReplaceConfig::from_json_file(path)?,
        None => ReplaceConfig::default(),
    };
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    Ok(config)
}

fn build_engine(
    args: &DetectorArgs,
    config: ReplaceConfig,
) -> Result<ImageReplacer<Box<dyn Detector>>, EngineError> {
    let classes = args.classes.as_deref().map(ClassTable::from_file).transpose()?;

    if let Some(path) = &args.detections {
        let detector: Box<dyn Detector> = Box::new(PrecomputedDetector::from_json_file(path)?);
        return Ok(ImageReplacer::new(detector, classes.unwrap_or_default(), config));
    }

    let model = args
        .model
        .clone()
        .ok_or_else(|| EngineError::DetectorUnavailable("no --model or --detections given".to_string()))?;
    let mut det_cfg = match args.head {
        ModelKind::Obb => DetectorConfig::yolo_obb(model),
        ModelKind::Detect => DetectorConfig::yolo_detect(model),
    };
    if let Some(size) = args.input_size {
        det_cfg.input_size = size;
    }

    let (detector, table) = match classes {
        Some(table) => (YoloDetector::new(det_cfg, table.len())?, table),
        None => YoloDetector::with_model_classes(det_cfg, ClassTable::dota_v1())?,
    };
    info!("loaded model with {} classes", table.len());
    Ok(ImageReplacer::new(Box::new(detector), table, config))
}

fn print_replace(report: &ReplaceReport, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            if let Some(path) = &report.output_path {
                println!("output: {}", path.display());
            }
            println!(
                "replacements: {} (replaced {}, skipped {})",
                report.replacements,
                report.replaced(),
                report.skipped()
            );
        }
        OutputFormat::Tsv => {
            for o in &report.outcomes {
                let status = match &o.status {
                    OutcomeStatus::Replaced { .. } => "replaced".to_string(),
                    OutcomeStatus::Skipped(reason) => format!("skipped:{}", serde_json::to_string(reason)?),
                };
                println!(
                    "{}\t{}\t{:.3}\t{}",
                    o.index,
                    o.class_name.as_deref().unwrap_or("?"),
                    o.confidence,
                    status
                );
            }
        }
    }
    Ok(())
}

fn print_detect(
    report: &DetectReport,
    classes: &ClassTable,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            println!("output: {}", report.output_path.display());
            for det in &report.detections {
                println!("{} {:.3}", classes.name(det.class_id).unwrap_or("?"), det.confidence);
            }
        }
        OutputFormat::Tsv => {
            for det in &report.detections {
                let coords = match &det.geometry {
                    Geometry::Quad(q) => q
                        .iter()
                        .map(|p| format!("{:.1},{:.1}", p.x, p.y))
                        .collect::<Vec<_>>()
                        .join(","),
                    Geometry::Axis(b) => format!("{},{},{},{}", b.x1, b.y1, b.x2, b.y2),
                };
                println!(
                    "{}\t{:.3}\t{}",
                    classes.name(det.class_id).unwrap_or("?"),
                    det.confidence,
                    coords
                );
            }
        }
    }
    Ok(())
}

fn run_replace(
    original: &Path,
    substitute: &Path,
    target_class: Option<String>,
    threshold: Option<f32>,
    args: &DetectorArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args)?;
    if let Some(target) = target_class {
        config.target_class = target;
    }
    if let Some(t) = threshold {
        config.confidence_threshold = t;
    }

    let engine = build_engine(args, config)?;
    let report = engine.replace_objects(original, substitute)?;
    print_replace(&report, args.format)
}

fn run_detect(image: &Path, args: &DetectorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args)?;
    let engine = build_engine(args, config)?;
    let report = engine.detect_and_annotate(image)?;
    print_detect(&report, engine.class_table(), args.format)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Replace {
            original,
            substitute,
            target_class,
            threshold,
            source,
        } => run_replace(&original, &substitute, target_class, threshold, &source),
        Command::Detect { image, source } => run_detect(&image, &source),
    }
}
