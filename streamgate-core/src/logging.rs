use std::fs::{File, OpenOptions};
use std::sync::Arc;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};

/// Upstream HTTP plumbing logs every connection at debug; keep it quiet unless
/// a directive asks for it.
const QUIET_DEPENDENCIES: &[(&str, &str)] = &[
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("reqwest", "warn"),
    ("h2", "warn"),
];

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `logging.level` when set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };
    let registry = tracing_subscriber::registry().with(filter);
    let file = open_log_file(config.file_path.as_deref())?;

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .with_line_number(true);
            match file {
                Some(file) => registry.with(layer.with_writer(file)).try_init()?,
                None => registry.with(layer).try_init()?,
            }
        }
        LogFormat::Pretty => {
            let layer = fmt::layer().pretty().with_target(true).with_file(false);
            match file {
                Some(file) => registry
                    .with(layer.with_ansi(false).with_writer(file))
                    .try_init()?,
                None => registry.with(layer).try_init()?,
            }
        }
    }

    Ok(())
}

/// Build the filter for a configured level.
///
/// Accepts a bare level (`info`, `warning`) or a full directive list such as
/// `streamgate_api=debug,info`. Dependency defaults are appended so explicit
/// directives for those crates still take effect.
fn build_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let base = match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        known @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => known.to_string(),
        directives if directives.contains('=') => directives.to_string(),
        other => anyhow::bail!("Invalid log level: {other}"),
    };

    let mut directives = vec![base.clone()];
    for (target, quiet_level) in QUIET_DEPENDENCIES {
        let overridden = base
            .split(',')
            .filter_map(|d| d.split_once('='))
            .any(|(t, _)| t.trim() == *target);
        if !overridden {
            directives.push(format!("{target}={quiet_level}"));
        }
    }

    Ok(EnvFilter::try_new(directives.join(","))?)
}

fn open_log_file(path: Option<&str>) -> anyhow::Result<Option<Arc<File>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Some(Arc::new(file)))
}
