//! Check which backends the local ffmpeg can drive.

use overlaycut_common::config::{config_file_path, AppConfig};
use overlaycut_project_model::{BackendKind, Container};
use overlaycut_render_engine::ffmpeg::FfmpegTools;
use overlaycut_render_engine::Capabilities;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Overlaycut System Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", config_file_path().display());

    let tools = FfmpegTools::from_config(&config.export);
    let caps = Capabilities::probe(&tools).await;

    let mark = |ok: bool| if ok { "[OK]" } else { "[MISSING]" };
    println!("{} ffmpeg: {}", mark(caps.ffmpeg), tools.ffmpeg.display());
    println!("{} ffprobe: {}", mark(caps.ffprobe), tools.ffprobe.display());
    println!(
        "     {} filters, {} encoders available",
        caps.filters.len(),
        caps.encoders.len()
    );

    println!();
    let mut usable = 0;
    for backend in [BackendKind::FilterGraph, BackendKind::FrameCapture] {
        for container in [Container::Mp4, Container::Webm] {
            match caps.check(backend, container) {
                Ok(()) => {
                    usable += 1;
                    println!("[OK] {backend} -> {container}");
                }
                Err(reason) => println!("[WARN] {backend} -> {container}: {reason}"),
            }
        }
    }

    println!();
    if usable > 0 {
        println!("{usable} backend/container combination(s) usable. Overlaycut is ready.");
    } else {
        println!("No backend can export here. Install ffmpeg with libx264 and aac.");
    }

    Ok(())
}
