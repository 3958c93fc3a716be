//! Command-line interface for building control images and scoring generated variations

use crate::io::configuration::PipelineConfig;
use crate::io::error::Result;
use crate::io::fetch::{GeneratedImage, HttpFetcher};
use crate::io::image::{control_output_path, read_image_bytes, read_markup, save_png};
use crate::io::progress::ScoringProgress;
use crate::pipeline::orchestrator::{BatchOutcome, PipelineOrchestrator, prepare_control};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sigilguard")]
#[command(
    author,
    version,
    about = "Build edge-map control images from sigils and score generated variations"
)]
/// Command-line arguments for the sigil pipeline
pub struct Cli {
    /// Operation to run
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file; omitted sections keep their defaults
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available operations
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the edge map used to condition the generator
    Control {
        /// Sigil markup file
        #[arg(value_name = "SVG")]
        svg: PathBuf,

        /// Output PNG, defaults to `<stem>_control.png` next to the input
        #[arg(short, long, value_name = "PNG")]
        output: Option<PathBuf>,

        /// Draw edges dark on a light background
        #[arg(short, long)]
        invert: bool,
    },

    /// Score generated images against the sigil, one JSON report per line
    Score {
        /// Sigil markup file
        #[arg(value_name = "SVG")]
        svg: PathBuf,

        /// Generated image files or http(s) URLs
        #[arg(value_name = "GENERATED", required = true)]
        generated: Vec<String>,
    },
}

impl Cli {
    /// Check if progress should be displayed
    pub const fn should_show_progress(&self) -> bool {
        !self.quiet
    }

    /// Configuration from `--config`, or the defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn load_config(&self) -> Result<PipelineConfig> {
        self.config
            .as_deref()
            .map_or_else(|| Ok(PipelineConfig::default()), PipelineConfig::from_json_file)
    }
}

/// Install the `RUST_LOG`-driven log subscriber, writing to stderr
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Interpret a command-line argument as a URL or a local file
///
/// # Errors
///
/// Returns `FileSystem` if a local file cannot be read
pub fn parse_generated(argument: &str) -> Result<GeneratedImage> {
    if argument.starts_with("http://") || argument.starts_with("https://") {
        Ok(GeneratedImage::Url(argument.to_string()))
    } else {
        read_image_bytes(Path::new(argument)).map(GeneratedImage::Bytes)
    }
}

/// Executes parsed command-line arguments
pub struct CommandRunner {
    cli: Cli,
}

impl CommandRunner {
    /// Wrap parsed arguments
    pub const fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the selected command
    ///
    /// # Errors
    ///
    /// Returns configuration, markup and rasterization errors, and I/O errors
    /// while reading inputs or writing outputs
    pub fn run(&self) -> Result<()> {
        let mut config = self.cli.load_config()?;
        match &self.cli.command {
            Command::Control {
                svg,
                output,
                invert,
            } => {
                config.edges.invert_output |= *invert;
                let output = output.clone().unwrap_or_else(|| control_output_path(svg));
                Self::write_control(svg, &output, &config)
            }
            Command::Score { svg, generated } => self.score(svg, generated, config),
        }
    }

    fn write_control(svg: &Path, output: &Path, config: &PipelineConfig) -> Result<()> {
        let markup = read_markup(svg)?;
        let control = prepare_control(&markup, config)?;
        save_png(control.edge_map().raster(), output)?;
        info!(
            input = %svg.display(),
            output = %output.display(),
            edge_pixels = control.edge_map().edge_pixel_count(),
            "wrote control image"
        );
        Ok(())
    }

    // Reports are the command's output, not diagnostics
    #[allow(clippy::print_stdout)]
    fn score(&self, svg: &Path, generated: &[String], config: PipelineConfig) -> Result<()> {
        let markup = read_markup(svg)?;
        // An unreadable file excludes its own variation, not the whole command
        let sources: Vec<Result<GeneratedImage>> = generated
            .iter()
            .map(String::as_str)
            .map(parse_generated)
            .collect();

        let min_passing = config.scoring.min_passing;
        let orchestrator = PipelineOrchestrator::new(config, Arc::new(HttpFetcher::default()))?;
        let control = orchestrator.prepare(&markup)?;

        let progress = ScoringProgress::new(sources.len(), self.cli.should_show_progress());
        let outcome =
            orchestrator.score_generated(&control, sources, &mut |index| progress.record(index));
        progress.finish(outcome.reports.len(), outcome.failures.len());

        for line in report_lines(&outcome, generated, min_passing) {
            println!("{line}");
        }
        Ok(())
    }
}

/// JSON lines describing a scoring outcome, ordered by index, then a summary
pub fn report_lines(outcome: &BatchOutcome, sources: &[String], min_passing: usize) -> Vec<String> {
    let source_of = |index: usize| sources.get(index).map_or("", String::as_str);

    let mut entries: Vec<(usize, serde_json::Value)> = outcome
        .reports
        .iter()
        .map(|v| {
            (
                v.index,
                json!({ "index": v.index, "source": source_of(v.index), "report": v.report }),
            )
        })
        .chain(outcome.failures.iter().map(|f| {
            (
                f.index,
                json!({ "index": f.index, "source": source_of(f.index), "error": f.error.to_string() }),
            )
        }))
        .collect();
    entries.sort_by_key(|(index, _)| *index);

    let summary = json!({
        "best_index": outcome.best_index,
        "passing_count": outcome.passing_count,
        "needs_regeneration": outcome.needs_regeneration(min_passing),
    });

    entries
        .into_iter()
        .map(|(_, value)| value.to_string())
        .chain(std::iter::once(summary.to_string()))
        .collect()
}
