//! Validate an export manifest.

use std::path::PathBuf;

use overlaycut_project_model::{CompositeTimeline, ExportManifest, OverlaySet};

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating manifest at: {}", path.display());

    let manifest = ExportManifest::load(&path)
        .map_err(|e| anyhow::anyhow!("Failed to load manifest: {e}"))?;
    let source = &manifest.source;
    let overlays = OverlaySet::from_overlays(&manifest.overlays);
    let timeline = CompositeTimeline::new(source.duration_secs, overlays.slide_durations());

    println!("  Version: {}", manifest.version);
    println!("  Source: {}", source.path.display());
    println!("  Resolution: {}x{}", source.width, source.height);
    println!(
        "  Duration: {:.2}s ({:.2}s with trailer)",
        source.duration_secs,
        timeline.total_duration()
    );
    println!("  Audio: {}", if source.has_audio { "yes" } else { "no" });
    println!("  Quality: {}", manifest.quality);
    println!(
        "  Overlays: {} caption(s), {} watermark(s), {} trailer slide(s)",
        overlays.captions.len(),
        overlays.watermarks.len(),
        overlays.slides.len()
    );

    let issues = manifest.validate(source);
    if issues.is_empty() {
        println!("\nManifest is valid.");
    } else {
        println!("\nValidation issues:");
        for issue in &issues {
            println!("  - {issue}");
        }
        println!(
            "\n{} issue(s) found. The export may differ from the manifest.",
            issues.len()
        );
    }

    Ok(())
}
