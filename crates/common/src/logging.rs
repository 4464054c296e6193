//! Tracing setup for the CLI and embedders.
//!
//! A bare level such as `debug` applies to the overlaycut crates only; ffmpeg
//! wrappers and other dependencies stay at `warn`. `RUST_LOG` replaces the
//! configured filter entirely.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Targets that a bare level is applied to.
pub const OVERLAYCUT_TARGETS: &[&str] = &[
    "overlaycut",
    "overlaycut_common",
    "overlaycut_project_model",
    "overlaycut_render_engine",
];

/// Expand the configured level into filter directives.
///
/// Anything that already looks like a directive list (`target=level` or
/// several comma-separated entries) is used as written.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim();
    if level.is_empty() {
        return filter_directives("info");
    }
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    let mut directives = vec!["warn".to_string()];
    directives.extend(OVERLAYCUT_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

fn make_writer(config: &LoggingConfig) -> std::io::Result<BoxMakeWriter> {
    match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(BoxMakeWriter::new(Mutex::new(file)))
        }
        None => Ok(BoxMakeWriter::new(std::io::stderr)),
    }
}

/// Install the global subscriber. Fails only if the log file can't be opened;
/// a subscriber that is already installed is left in place.
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.level)));
    let writer = make_writer(config)?;
    let ansi = config.file.is_none();

    let installed = if config.json {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .json()
            .with_current_span(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_ids(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_scopes_to_overlaycut_crates() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("overlaycut_render_engine=debug"));
        assert!(directives.contains("overlaycut=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_directive_lists_pass_through() {
        assert_eq!(filter_directives("overlaycut=trace"), "overlaycut=trace");
        assert_eq!(filter_directives("info,hyper=off"), "info,hyper=off");
    }

    #[test]
    fn test_empty_level_defaults_to_info() {
        assert!(filter_directives("  ").contains("overlaycut_common=info"));
    }

    #[test]
    fn test_log_file_is_created() {
        let dir = std::env::temp_dir().join(format!("overlaycut-log-{}", std::process::id()));
        let config = LoggingConfig {
            level: "info".into(),
            json: false,
            file: Some(dir.join("nested/export.log")),
        };
        assert!(make_writer(&config).is_ok());
        assert!(dir.join("nested/export.log").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
