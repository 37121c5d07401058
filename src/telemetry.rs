//! Tracing initialization: stderr layer, optional rolling file layer with
//! retention pruning.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};
use crate::paths;

const LOG_FILE_PREFIX: &str = "concord.log";

#[derive(Clone)]
pub struct TelemetryConfig {
    pub verbosity: u8,
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, logging: LoggingConfig) -> Self {
        Self { verbosity, logging }
    }
}

pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(config.verbosity).into())
        .with_env_var("LOG")
        .from_env_lossy();

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.logging.stdout {
        layers.push(build_stderr_layer(config.logging.stdout_format));
    }

    let mut file_setup_error = None;
    if config.logging.file.enabled {
        let dir = resolve_log_dir(&config.logging.file);
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                if let Err(err) = apply_retention(&dir, &config.logging.file, SystemTime::now()) {
                    file_setup_error = Some(format!("log retention failed: {err}"));
                }
                let (layer, guard) = build_file_layer(&config.logging.file, &dir);
                layers.push(layer);
                guards.push(guard);
            }
            Err(err) => {
                file_setup_error =
                    Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }

    layers.push(Box::new(filter));
    Registry::default().with(layers).init();

    if let Some(error) = file_setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guards: guards }
}

fn build_stderr_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Compact => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true),
        ),
    }
}

fn build_file_layer(
    config: &FileLoggingConfig,
    dir: &Path,
) -> (
    Box<dyn Layer<Registry> + Send + Sync>,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let rotation = match config.rotation {
        LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
        LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
    };
    let appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        ),
        LogFormat::Compact => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        ),
    };
    (layer, guard)
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::WARN,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}

fn resolve_log_dir(config: &FileLoggingConfig) -> PathBuf {
    config.dir.clone().unwrap_or_else(paths::log_dir)
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct RotatedLog {
    path: PathBuf,
    modified: SystemTime,
}

/// Delete rotated `concord.log.*` files that fall outside the configured
/// retention window. Runs once, before the appender opens today's file.
fn apply_retention(
    dir: &Path,
    config: &FileLoggingConfig,
    now: SystemTime,
) -> std::io::Result<usize> {
    if config.retention_max_age_days.is_none() && config.retention_max_files.is_none() {
        return Ok(0);
    }
    let cutoff = config
        .retention_max_age_days
        .and_then(|days| now.checked_sub(Duration::from_secs(days.saturating_mul(24 * 60 * 60))));
    let quota = config.retention_max_files.unwrap_or(usize::MAX);

    let mut logs = scan_rotated_logs(dir, now)?;
    logs.sort_by(|a, b| b.modified.cmp(&a.modified));

    let mut removed = 0usize;
    for path in select_expired(&logs, cutoff, quota) {
        if fs::remove_file(path).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::debug!(removed, dir = %dir.display(), "expired session logs removed");
    }
    Ok(removed)
}

fn scan_rotated_logs(dir: &Path, now: SystemTime) -> std::io::Result<Vec<RotatedLog>> {
    let mut logs = Vec::new();
    if !dir.is_dir() {
        return Ok(logs);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let named_like_log = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        if !named_like_log {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_file() {
            logs.push(RotatedLog {
                path: entry.path(),
                modified: meta.modified().unwrap_or(now),
            });
        }
    }
    Ok(logs)
}

/// `logs` must be sorted newest first. A file expires when it predates
/// `cutoff`, or when newer files already fill the `quota`.
fn select_expired(logs: &[RotatedLog], cutoff: Option<SystemTime>, quota: usize) -> Vec<&Path> {
    logs.iter()
        .enumerate()
        .filter(|(index, log)| {
            *index >= quota || cutoff.is_some_and(|cutoff| log.modified < cutoff)
        })
        .map(|(_, log)| log.path.as_path())
        .collect()
}
