//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging with optional file
//! output. Console output goes to stderr so command output on stdout stays
//! clean.

use crate::config::LoggingConfig;
use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is unset.
///
/// A bare level applies to this crate only; anything containing `=` or `,`
/// is used verbatim. `verbose` forces `parley=debug`.
///
/// # Examples
///
/// ```
/// use parley::config::LoggingConfig;
/// use parley::logging::filter_directive;
///
/// let config = LoggingConfig::default();
/// assert_eq!(filter_directive(&config, false), "parley=info");
/// assert_eq!(filter_directive(&config, true), "parley=debug");
/// ```
pub fn filter_directive(config: &LoggingConfig, verbose: bool) -> String {
    if verbose {
        return "parley=debug".to_string();
    }
    let level = config.level.trim();
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("parley={}", level)
    }
}

/// Initialize logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
///
/// Returns error if the filter is invalid, the log file cannot be opened,
/// or a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use parley::config::LoggingConfig;
/// use parley::logging::init_logging;
///
/// init_logging(&LoggingConfig::default(), false).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(config, verbose)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json {
        let console_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);

        if let Some(file_path) = &config.file {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(Arc::new(file));

            registry.with(console_layer).with(file_layer).try_init()?;
        } else {
            registry.with(console_layer).try_init()?;
        }
    } else {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr);

        if let Some(file_path) = &config.file {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(Arc::new(file));

            registry.with(console_layer).with(file_layer).try_init()?;
        } else {
            registry.with(console_layer).try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_scopes_bare_level() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(filter_directive(&config, false), "parley=warn");
    }

    #[test]
    fn test_filter_directive_keeps_full_directives() {
        let config = LoggingConfig {
            level: "parley=trace,reqwest=debug".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(filter_directive(&config, false), "parley=trace,reqwest=debug");
    }

    #[test]
    fn test_filter_directive_verbose_wins() {
        let config = LoggingConfig {
            level: "error".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(filter_directive(&config, true), "parley=debug");
    }
}
