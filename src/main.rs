use clap::{Parser, ValueEnum};
use dewarp::{DewarpConfig, DewarpReport, Dewarper};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dewarp")]
#[command(about = "Dewarp - flatten photographs of curved book pages", long_about = None)]
struct Cli {
    /// Input image path
    input: PathBuf,

    /// Output image path (default: <input stem>_dewarped.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file; missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output zoom relative to the input image
    #[arg(long)]
    zoom: Option<f64>,

    /// Stated output DPI (reported only)
    #[arg(long)]
    dpi: Option<u32>,

    /// Debug image level: 0 none, 1 keypoints and output, 2 contours and spans, 3 masks
    #[arg(long)]
    debug: Option<u8>,

    /// Directory for debug images
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Print the run report
    #[arg(short, long, value_enum)]
    report: Option<ReportFormat>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum ReportFormat {
    /// JSON object with every report field
    Json,
    /// Human readable summary
    Text,
}

fn print_text_report(report: &DewarpReport) {
    println!("input:      {}x{}", report.input_width, report.input_height);
    println!("reduced:    {}x{}", report.reduced_width, report.reduced_height);
    println!("mode:       {}", report.mode);
    println!("contours:   {}", report.contours);
    println!("spans:      {}", report.spans);
    println!("points:     {}", report.points);
    if let (Some(initial), Some(last)) = (report.initial_objective, report.final_objective) {
        println!("objective:  {:.6} -> {:.6} ({} iterations)", initial, last, report.iterations);
    }
    if let Some((w, h)) = report.page_dims {
        println!("page dims:  {:.4} x {:.4}", w, h);
    }
    println!("output:     {}x{} @ {} dpi", report.output_width, report.output_height, report.dpi);
    println!("converged:  {}", report.converged);
    if report.fallback {
        println!("fallback:   no spans detected, input returned as grayscale");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => DewarpConfig::from_json_file(path)?,
        None => DewarpConfig::default(),
    };
    if let Some(zoom) = cli.zoom {
        config.output_zoom = zoom;
    }
    if let Some(dpi) = cli.dpi {
        config.output_dpi = dpi;
    }
    if let Some(level) = cli.debug {
        config.debug_level = level;
    }
    if let Some(dir) = cli.debug_dir {
        config.debug_dir = dir;
    }

    let dewarper = Dewarper::new(config)?;
    let result = dewarper.dewarp_path(&cli.input)?;

    let output_path = cli.output.unwrap_or_else(|| {
        let stem = cli
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string());
        cli.input.with_file_name(format!("{}_dewarped.png", stem))
    });
    result.image.save(&output_path)?;
    tracing::info!(path = %output_path.display(), "Wrote output");

    match cli.report {
        Some(ReportFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&result.report)?);
        }
        Some(ReportFormat::Text) => print_text_report(&result.report),
        None => {}
    }

    Ok(())
}
