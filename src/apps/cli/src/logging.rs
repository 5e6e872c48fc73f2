//! Logging Configuration

use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

const LOG_LEVEL_ENV: &str = "POLISHER_LOG_LEVEL";

/// HTTP internals stay quiet below debug noise of our own crates.
const QUIET_DIRECTIVES: &[&str] = &["hyper=warn", "hyper_util=warn", "rustls=warn", "h2=warn"];

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: log::LevelFilter,
    pub is_debug: bool,
}

impl LogConfig {
    pub fn new(is_debug: bool) -> Self {
        Self {
            level: resolve_default_level(is_debug),
            is_debug,
        }
    }
}

fn fallback_level(is_debug: bool) -> log::LevelFilter {
    if is_debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    }
}

fn resolve_default_level(is_debug: bool) -> log::LevelFilter {
    match std::env::var(LOG_LEVEL_ENV) {
        Ok(val) => parse_log_level(&val).unwrap_or_else(|| {
            eprintln!(
                "Warning: Invalid {} '{}', falling back to default",
                LOG_LEVEL_ENV, val
            );
            fallback_level(is_debug)
        }),
        Err(_) => fallback_level(is_debug),
    }
}

pub fn parse_log_level(value: &str) -> Option<log::LevelFilter> {
    match value.trim().to_lowercase().as_str() {
        "trace" => Some(log::LevelFilter::Trace),
        "debug" => Some(log::LevelFilter::Debug),
        "info" => Some(log::LevelFilter::Info),
        "warn" => Some(log::LevelFilter::Warn),
        "error" => Some(log::LevelFilter::Error),
        "off" => Some(log::LevelFilter::Off),
        _ => None,
    }
}

pub fn level_to_str(level: log::LevelFilter) -> &'static str {
    match level {
        log::LevelFilter::Trace => "trace",
        log::LevelFilter::Debug => "debug",
        log::LevelFilter::Info => "info",
        log::LevelFilter::Warn => "warn",
        log::LevelFilter::Error => "error",
        log::LevelFilter::Off => "off",
    }
}

fn filter_directives(level: log::LevelFilter) -> String {
    let mut directives = vec![level_to_str(level)];
    if level >= log::LevelFilter::Debug {
        directives.extend_from_slice(QUIET_DIRECTIVES);
    }
    directives.join(",")
}

/// Install the stderr subscriber. Library crates log through `log`; the subscriber's log bridge
/// picks those records up.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(filter_directives(config.level))
        .unwrap_or_else(|_| EnvFilter::new(level_to_str(log::LevelFilter::Info)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(config.is_debug)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!(
        "Logging initialized: level={}, debug={}",
        level_to_str(config.level),
        config.is_debug
    );
    Ok(())
}
