//! Probe a media file with ffprobe.

use std::path::PathBuf;

use overlaycut_common::config::AppConfig;
use overlaycut_render_engine::ffmpeg::{probe_media, FfmpegTools};

pub async fn run(config: &AppConfig, path: PathBuf, json: bool) -> anyhow::Result<()> {
    let tools = FfmpegTools::from_config(&config.export);
    let source = probe_media(&tools, &path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to probe media: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&source)?);
        return Ok(());
    }

    println!("Media: {}", source.path.display());
    println!("  Resolution: {}x{}", source.width, source.height);
    println!("  Duration: {:.3}s", source.duration_secs);
    match source.fps {
        Some(fps) => println!("  Frame rate: {fps:.3} fps"),
        None => println!("  Frame rate: unknown"),
    }
    println!("  Audio: {}", if source.has_audio { "yes" } else { "no" });

    Ok(())
}
