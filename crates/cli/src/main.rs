//! marksheet CLI - marks-card field extraction

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use marksheet_core::{DocumentRecord, PipelineConfig};
use marksheet_ocr::{process_batch, MarksCardPipeline, SidecarTokenSource, TokenSource};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "marksheet")]
#[command(version)]
#[command(about = "Extract student, subject and result fields from scanned marks cards", long_about = None)]
struct Cli {
    /// Marks-card images (PNG, JPG, BMP, TIFF)
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<PathBuf>,

    /// Output directory; with several images each gets its own subdirectory
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Minimum token confidence (0.0-1.0)
    #[arg(short, long, value_name = "THRESHOLD")]
    confidence: Option<f32>,

    /// Skip skew correction
    #[arg(long)]
    no_deskew: bool,

    /// Skip noise removal
    #[arg(long)]
    no_denoise: bool,

    /// Binarize with a global Otsu threshold instead of an adaptive one
    #[arg(long)]
    otsu: bool,

    /// Skip contrast enhancement
    #[arg(long)]
    no_contrast: bool,

    /// Only convert to grayscale before recognition
    #[arg(long)]
    no_preprocess: bool,

    /// Save each normalized image here for inspection
    #[arg(long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(long, value_name = "FILE", env = "MARKSHEET_CONFIG")]
    config: Option<PathBuf>,

    /// Read detections from this JSON file instead of running an OCR engine
    #[arg(long, value_name = "FILE")]
    tokens: Option<PathBuf>,

    /// Documents processed in parallel in batch mode
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Tesseract data directory (tesseract builds only)
    #[arg(long, value_name = "DIR", env = "TESSDATA_PREFIX")]
    tessdata: Option<String>,

    /// Tesseract language (tesseract builds only)
    #[arg(long, default_value = "eng")]
    lang: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    let pipeline = MarksCardPipeline::new(config);

    if let [image] = cli.images.as_slice() {
        let source = token_source(&cli)?;
        run_single(pipeline, image.clone(), source).await
    } else {
        run_batch(&cli, pipeline).await
    }
}

/// Config file (or defaults), then command-line overrides, then validation.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(c) = cli.confidence {
        config.confidence_threshold = c;
    }
    let p = &mut config.preprocess;
    if cli.no_preprocess {
        p.enabled = false;
    }
    if cli.no_deskew {
        p.do_deskew = false;
    }
    if cli.no_denoise {
        p.do_denoise = false;
    }
    if cli.otsu {
        p.use_adaptive_threshold = false;
    }
    if cli.no_contrast {
        p.enhance_contrast = false;
    }
    if let Some(dir) = &cli.temp_dir {
        p.save_dir = Some(dir.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Runs on the blocking pool, like each document in batch mode.
async fn run_single(
    pipeline: MarksCardPipeline,
    image: PathBuf,
    mut source: Box<dyn TokenSource>,
) -> Result<()> {
    let output_dir = pipeline.config().output_dir.clone();
    let (outcome, _) = tokio::task::spawn_blocking({
        let (image, output_dir) = (image.clone(), output_dir.clone());
        move || pipeline.process_to_dir(&image, &mut source, &output_dir)
    })
    .await
    .context("Processing task failed")?
    .with_context(|| format!("Failed to process {}", image.display()))?;

    print_summary(&outcome.record, &output_dir);
    if let Some(path) = &outcome.normalized_path {
        println!("Normalized image:  {}", path.display());
    }
    Ok(())
}

async fn run_batch(cli: &Cli, pipeline: MarksCardPipeline) -> Result<()> {
    let jobs = cli
        .jobs
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
        .clamp(1, cli.images.len());
    let sources = (0..jobs).map(|_| token_source(cli)).collect::<Result<Vec<_>>>()?;
    let output_root = pipeline.config().output_dir.clone();

    let outcomes = process_batch(Arc::new(pipeline), cli.images.clone(), &output_root, sources).await;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(done) => println!(
                "ok      {}  ({} tokens, {} subjects) -> {}",
                outcome.path.display(),
                done.record.raw_tokens().len(),
                done.record.subjects().len(),
                outcome.output_dir.display()
            ),
            Err(e) => {
                failed += 1;
                println!("failed  {}  {e}", outcome.path.display());
            }
        }
    }
    info!(total = outcomes.len(), failed, "Batch finished");

    if failed > 0 {
        bail!("{failed} of {} documents failed", outcomes.len());
    }
    Ok(())
}

/// One handle per call; batch mode calls this once per worker.
fn token_source(cli: &Cli) -> Result<Box<dyn TokenSource>> {
    if let Some(path) = &cli.tokens {
        return Ok(Box::new(SidecarTokenSource::Fixed(path.clone())));
    }

    #[cfg(feature = "tesseract")]
    let source: Box<dyn TokenSource> = Box::new(
        marksheet_ocr::TesseractTokenSource::new(cli.tessdata.as_deref(), &cli.lang)
            .context("Failed to start Tesseract")?,
    );

    #[cfg(not(feature = "tesseract"))]
    let source: Box<dyn TokenSource> = {
        if cli.tessdata.is_some() || cli.lang != "eng" {
            tracing::warn!("Built without the tesseract feature; --tessdata and --lang are ignored");
        }
        Box::new(SidecarTokenSource::BesideImage)
    };

    Ok(source)
}

fn print_summary(record: &DocumentRecord, output_dir: &Path) {
    let or_dash = |v: Option<&str>| v.unwrap_or("-").to_string();
    let student = record.student();

    println!("Tokens retained:   {}", record.raw_tokens().len());
    println!("Issuing authority: {}", or_dash(record.issuing_authority()));
    println!("Name:              {}", or_dash(student.name.as_deref()));
    println!("Roll number:       {}", or_dash(student.roll_number.as_deref()));
    println!("Subjects:          {}", record.subjects().len());
    println!("Result:            {}", or_dash(record.result()));
    println!("Output directory:  {}", output_dir.display());
}
