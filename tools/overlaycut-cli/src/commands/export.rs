//! Render a manifest to a video file.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use overlaycut_common::config::AppConfig;
use overlaycut_project_model::{BackendKind, Container, ExportManifest, QualityPreset};
use overlaycut_render_engine::{
    Capabilities, ExportProgress, ExportSettings, Exporter, ProgressCallback,
};

/// Command-line values that win over the manifest and the config file.
pub struct Overrides {
    pub backend: Option<BackendKind>,
    pub quality: Option<QualityPreset>,
    pub container: Option<Container>,
}

pub async fn run(
    config: &AppConfig,
    manifest_path: PathBuf,
    output: Option<PathBuf>,
    overrides: Overrides,
) -> anyhow::Result<()> {
    println!("Exporting manifest: {}", manifest_path.display());

    let manifest = ExportManifest::load(&manifest_path)
        .map_err(|e| anyhow::anyhow!("Failed to load manifest: {e}"))?;

    let defaults = &config.export;
    let backend = match overrides.backend.or(manifest.backend) {
        Some(backend) => backend,
        None => defaults.backend.parse().map_err(anyhow::Error::msg)?,
    };
    let quality = overrides.quality.unwrap_or(manifest.quality);

    let mut settings = ExportSettings::from_config(defaults)?;
    if let Some(container) = overrides.container.or(manifest.container) {
        settings = settings.with_container(container);
    }
    let container = settings.container;

    let output_path = output.unwrap_or_else(|| {
        manifest_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join(format!("export.{}", container.extension()))
    });

    let caps = Capabilities::probe(&settings.tools).await;
    let exporter = Exporter::from_capabilities(&caps, backend, settings)?;

    println!("  Source: {}", manifest.source.path.display());
    println!("  Output: {}", output_path.display());
    println!("  Backend: {}", exporter.backend_kind());
    println!("  Quality: {quality}");
    println!("  Overlays: {}", manifest.overlays.len());

    let progress_cb: ProgressCallback = Box::new(|p: &ExportProgress| {
        let eta = p
            .eta_secs
            .map(|s| format!(", ETA: {s:.0}s"))
            .unwrap_or_default();
        print!(
            "\r  Progress: {:5.1}% [{}] {}{eta}          ",
            p.percent,
            p.phase.as_str(),
            p.message,
        );
        let _ = std::io::stdout().flush();
    });

    let session = exporter.session(Some(progress_cb))?;
    let cancel = session.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; cancelling export");
            cancel.cancel();
        }
    });

    let result = exporter
        .run(session, &manifest.source, &manifest.overlays, quality)
        .await;
    interrupt.abort();
    println!();

    let output = result.map_err(|e| anyhow::anyhow!("Export failed: {e}"))?;
    output
        .artifact
        .write_to(&output_path)
        .await
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    for warning in &output.warnings {
        println!("  [WARN] {}: {}", warning.kind, warning.message);
    }
    println!(
        "Export complete: {} ({} bytes, {})",
        output_path.display(),
        output.artifact.len(),
        output.artifact.mime_type
    );

    Ok(())
}
