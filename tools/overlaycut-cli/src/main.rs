//! Overlaycut CLI: export clips with captions, watermarks and trailer slides.
//!
//! Usage:
//!   overlaycut export <MANIFEST>     Render a manifest to a video file
//!   overlaycut validate <MANIFEST>   Report problems in a manifest
//!   overlaycut probe <MEDIA>         Show what ffprobe reports for a clip
//!   overlaycut check                 Check ffmpeg capabilities
//!   overlaycut init <MANIFEST>       Create a manifest for a clip

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use overlaycut_common::config::AppConfig;
use overlaycut_project_model::{BackendKind, Container, QualityPreset};

mod commands;

#[derive(Parser)]
#[command(
    name = "overlaycut",
    about = "Burn captions, watermarks and trailer slides into video clips",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a manifest to a video file
    Export {
        /// Path to the manifest JSON
        manifest: PathBuf,

        /// Output file path (defaults to export.<ext> next to the manifest)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Render backend: filter-graph or frame-capture
        #[arg(long)]
        backend: Option<BackendKind>,

        /// Quality preset: low, balanced or high
        #[arg(long)]
        quality: Option<QualityPreset>,

        /// Output container: mp4 or webm
        #[arg(long)]
        container: Option<Container>,
    },

    /// Report problems in a manifest without rendering
    Validate {
        /// Path to the manifest JSON
        manifest: PathBuf,
    },

    /// Probe a media file
    Probe {
        /// Path to the media file
        media: PathBuf,

        /// Print the probed source as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check ffmpeg capabilities for each backend and container
    Check,

    /// Create a manifest for a clip
    Init {
        /// Where to write the manifest
        manifest: PathBuf,

        /// Base clip to probe
        #[arg(short, long)]
        source: PathBuf,

        /// Add a caption shown for the first few seconds
        #[arg(long)]
        caption: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    overlaycut_common::logging::init_logging(&logging)
        .map_err(|e| anyhow::anyhow!("Failed to open log file: {e}"))?;

    match cli.command {
        Commands::Export {
            manifest,
            output,
            backend,
            quality,
            container,
        } => {
            commands::export::run(
                &config,
                manifest,
                output,
                commands::export::Overrides {
                    backend,
                    quality,
                    container,
                },
            )
            .await
        }
        Commands::Validate { manifest } => commands::validate::run(manifest),
        Commands::Probe { media, json } => commands::probe::run(&config, media, json).await,
        Commands::Check => commands::check::run(&config).await,
        Commands::Init {
            manifest,
            source,
            caption,
        } => commands::init::run(&config, manifest, source, caption).await,
    }
}
