//! Create a manifest for a clip.

use std::path::PathBuf;

use overlaycut_common::config::AppConfig;
use overlaycut_project_model::{Caption, ExportManifest, Overlay};
use overlaycut_render_engine::ffmpeg::{probe_media, FfmpegTools};

const INTRO_CAPTION_SECS: f64 = 3.0;

pub async fn run(
    config: &AppConfig,
    manifest_path: PathBuf,
    source: PathBuf,
    caption: Option<String>,
) -> anyhow::Result<()> {
    if manifest_path.exists() {
        anyhow::bail!("{} already exists", manifest_path.display());
    }

    // Manifest paths resolve against the manifest's directory, so store it absolute.
    let source = std::fs::canonicalize(&source).unwrap_or(source);
    let tools = FfmpegTools::from_config(&config.export);
    let source = probe_media(&tools, &source)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to probe source: {e}"))?;

    let mut manifest = ExportManifest::new(source);
    if let Some(text) = caption {
        let duration = INTRO_CAPTION_SECS.min(manifest.source.duration_secs);
        manifest
            .overlays
            .push(Overlay::Caption(Caption::new(text, 0.0, duration)));
    }
    manifest.quality = config.export.quality.parse().unwrap_or_default();

    manifest
        .save(&manifest_path)
        .map_err(|e| anyhow::anyhow!("Failed to write manifest: {e}"))?;

    println!("Manifest created: {}", manifest_path.display());
    println!("  Source: {}", manifest.source.path.display());
    println!(
        "  Resolution: {}x{}",
        manifest.source.width, manifest.source.height
    );
    println!("  Duration: {:.2}s", manifest.source.duration_secs);
    println!("  Overlays: {}", manifest.overlays.len());
    println!();
    println!("Add captions, watermarks and trailer slides to \"overlays\", then run:");
    println!("  overlaycut export {}", manifest_path.display());

    Ok(())
}
