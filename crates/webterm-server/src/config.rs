//! Server configuration.

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use webterm_core::{CoordinatorOptions, Greeting, StaticRanks, TerminalOptions};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Program run inside the shared terminal.
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Exported to the program as `HOME` when set.
    #[serde(default)]
    pub home_dir: Option<PathBuf>,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_max_changes")]
    pub max_changes: usize,
    #[serde(default = "default_restart")]
    pub restart: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Message of the day, shown to every client after the greeting.
    #[serde(default)]
    pub motd: Vec<String>,
    #[serde(default)]
    pub default_rank: i64,
    /// Ranks by client name, e.g. `":guest-3fa9c" = 30`. Only names derived
    /// from a session token sent with hello stay the same across reconnects.
    #[serde(default)]
    pub ranks: HashMap<String, i64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./static")
}

fn default_command() -> String {
    "/bin/sh".to_string()
}

fn default_working_dir() -> PathBuf {
    std::env::current_dir()
        .ok()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_rows() -> u16 {
    30
}

fn default_cols() -> u16 {
    80
}

fn default_max_changes() -> usize {
    webterm_core::DEFAULT_MAX_CHANGES
}

fn default_restart() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            command: default_command(),
            args: Vec::new(),
            working_dir: default_working_dir(),
            home_dir: None,
            rows: default_rows(),
            cols: default_cols(),
            max_changes: default_max_changes(),
            restart: default_restart(),
            poll_interval_ms: default_poll_interval_ms(),
            motd: Vec::new(),
            default_rank: 0,
            ranks: HashMap::new(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from default location (config/default.toml) or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }
        Ok(Config::default())
    }

    /// The command line as shown to clients.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn terminal_options(&self) -> TerminalOptions {
        TerminalOptions {
            command: self.command.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            home_dir: self.home_dir.clone(),
            rows: self.rows,
            cols: self.cols,
            restart: self.restart,
        }
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            max_changes: self.max_changes,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            greeting: Greeting {
                command: self.command_line(),
                motd: self.motd.clone(),
            },
        }
    }

    pub fn ranks(&self) -> StaticRanks {
        StaticRanks::new(self.default_rank, self.ranks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5000);
        assert_eq!(config.command, "/bin/sh");
        assert_eq!((config.rows, config.cols), (30, 80));
        assert_eq!(config.max_changes, 1024);
        assert!(config.restart);
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.default_rank, 0);
        assert!(config.home_dir.is_none());
    }

    #[test]
    fn test_command_line_joins_args() {
        let config = Config {
            command: "/usr/bin/nethack".into(),
            args: vec!["-u".into(), "guest".into()],
            ..Config::default()
        };
        assert_eq!(config.command_line(), "/usr/bin/nethack -u guest");
        assert_eq!(config.coordinator_options().greeting.command, "/usr/bin/nethack -u guest");
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(include_str!("../../../config/webterm.example.toml")).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.motd.len(), 1);
        assert!(config.ranks.is_empty());
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        assert_eq!(config.coordinator_options().poll_interval, Duration::from_millis(1));
    }
}
