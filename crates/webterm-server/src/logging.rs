//! Tracing setup.
//!
//! Every event the server emits uses a `webterm::<area>` target (`startup`,
//! `ws`, `session`, `pty`, `chat`). A preset picks the baseline level per
//! area, `--log area=level` adjusts single areas, and `RUST_LOG` replaces the
//! whole filter when set.

use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const TARGET_PREFIX: &str = "webterm::";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Lifecycle and connection events only.
    #[default]
    Production,
    Verbose,
    Debug,
    /// Includes per-request and per-chunk output.
    Trace,
    /// Warnings and errors only.
    Quiet,
}

impl LogPreset {
    /// Pick a preset from CLI flags. The quietest flag given wins, then the
    /// most detailed one.
    pub fn from_flags(verbose: bool, debug: bool, trace: bool, quiet: bool) -> Self {
        match (quiet, trace, debug, verbose) {
            (true, ..) => LogPreset::Quiet,
            (_, true, ..) => LogPreset::Trace,
            (_, _, true, _) => LogPreset::Debug,
            (_, _, _, true) => LogPreset::Verbose,
            _ => LogPreset::Production,
        }
    }

    fn directives(self) -> &'static [&'static str] {
        match self {
            LogPreset::Production => &[
                "webterm::startup=info",
                "webterm::ws=info",
                "webterm::session=info",
                "webterm::pty=info",
                "webterm::chat=warn",
                "tower_http=warn",
            ],
            LogPreset::Verbose => &["webterm=info", "tower_http=info"],
            LogPreset::Debug => &["webterm=debug", "tower_http=debug"],
            LogPreset::Trace => &["webterm=trace", "tower_http=trace"],
            LogPreset::Quiet => &["webterm=warn", "tower_http=error"],
        }
    }
}

/// Logging configuration built from CLI arguments.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Per-target levels, keyed by full target name.
    pub overrides: BTreeMap<String, Level>,
    pub format: LogFormat,
}

impl LogConfig {
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        // Each flag value may hold several comma separated "target=level" pairs.
        let overrides = log_overrides
            .iter()
            .flat_map(|arg| arg.split(','))
            .filter_map(|pair| {
                let (target, level) = pair.split_once('=')?;
                let level = Level::from_str(level.trim()).ok()?;
                Some((full_target(target.trim()), level))
            })
            .collect();

        Self {
            preset: LogPreset::from_flags(verbose, debug, trace, quiet),
            overrides,
            format,
        }
    }

    /// Filter directives for the preset followed by the overrides.
    pub fn directives(&self) -> Vec<String> {
        self.preset
            .directives()
            .iter()
            .map(|d| d.to_string())
            .chain(
                self.overrides
                    .iter()
                    .map(|(target, level)| format!("{}={}", target, level.as_str().to_ascii_lowercase())),
            )
            .collect()
    }

    /// `RUST_LOG` if set, else the preset with overrides applied.
    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }
        EnvFilter::try_new(self.directives().join(",")).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// `"pty"` becomes `"webterm::pty"`; full targets and `tower_http` pass through.
fn full_target(target: &str) -> String {
    if target.starts_with(TARGET_PREFIX) || target == "webterm" || target.starts_with("tower_http") {
        target.to_string()
    } else {
        format!("{}{}", TARGET_PREFIX, target)
    }
}

/// Install the global subscriber.
pub fn init(config: &LogConfig) {
    let filter = config.build_filter();
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_preset_priority() {
        assert_eq!(LogPreset::from_flags(true, true, true, true), LogPreset::Quiet);
        assert_eq!(LogPreset::from_flags(true, true, true, false), LogPreset::Trace);
        assert_eq!(LogPreset::from_flags(true, true, false, false), LogPreset::Debug);
        assert_eq!(LogPreset::from_flags(true, false, false, false), LogPreset::Verbose);
        assert_eq!(LogPreset::from_flags(false, false, false, false), LogPreset::Production);
    }

    #[test]
    fn test_overrides_are_normalized() {
        let config = LogConfig::from_cli(
            false,
            false,
            false,
            false,
            vec![
                "pty=debug".into(),
                "ws=trace, chat=INFO".into(),
                "webterm::session=warn".into(),
                "tower_http=trace".into(),
            ],
            LogFormat::Text,
        );

        assert_eq!(config.overrides.get("webterm::pty"), Some(&Level::DEBUG));
        assert_eq!(config.overrides.get("webterm::ws"), Some(&Level::TRACE));
        assert_eq!(config.overrides.get("webterm::chat"), Some(&Level::INFO));
        assert_eq!(config.overrides.get("webterm::session"), Some(&Level::WARN));
        assert_eq!(config.overrides.get("tower_http"), Some(&Level::TRACE));
    }

    #[test]
    fn test_bad_overrides_are_ignored() {
        let config = LogConfig::from_cli(
            false,
            false,
            false,
            false,
            vec!["pty=loud".into(), "no-equals-sign".into()],
            LogFormat::Json,
        );
        assert!(config.overrides.is_empty());
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_overrides_follow_preset_directives() {
        let config = LogConfig::from_cli(false, false, false, true, vec!["pty=debug".into()], LogFormat::Text);
        assert_eq!(
            config.directives(),
            vec!["webterm=warn", "tower_http=error", "webterm::pty=debug"]
        );
    }
}
