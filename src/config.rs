//! Daemon configuration: command line over config file over defaults

use crate::cli::DaemonOpts;
use crate::protocol::shell::{DEFAULT_MAX_LINE, DEFAULT_MAX_PENDING};
use crate::protocol::{DEFAULT_NICK, DEFAULT_ROOT, DEFAULT_SHELL_BIND, DEFAULT_TRANSFER_BIND};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of the optional TOML config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub shell_bind: Option<String>,
    pub transfer_bind: Option<String>,
    pub root: Option<PathBuf>,
    pub create_root: Option<bool>,
    pub nick: Option<String>,
    pub workers: Option<usize>,
    pub max_line: Option<usize>,
    pub max_pending: Option<usize>,
    pub audit_log: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("Failed to parse config {}", path.display()))
    }
}

/// Fully resolved daemon settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub shell_bind: String,
    pub transfer_bind: String,
    pub root: PathBuf,
    pub create_root: bool,
    pub nick: String,
    pub workers: usize,
    pub max_line: usize,
    pub max_pending: usize,
    pub audit_log: Option<PathBuf>,
    pub log_level: String,
}

impl DaemonConfig {
    pub fn resolve(opts: &DaemonOpts) -> Result<Self> {
        let file = match &opts.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(opts, file))
    }

    pub fn merge(opts: &DaemonOpts, file: FileConfig) -> Self {
        Self {
            shell_bind: opts
                .shell_bind
                .clone()
                .or(file.shell_bind)
                .unwrap_or_else(|| DEFAULT_SHELL_BIND.to_string()),
            transfer_bind: opts
                .transfer_bind
                .clone()
                .or(file.transfer_bind)
                .unwrap_or_else(|| DEFAULT_TRANSFER_BIND.to_string()),
            root: opts
                .root
                .clone()
                .or(file.root)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT)),
            create_root: opts.create_root || file.create_root.unwrap_or(false),
            nick: opts.nick.clone().or(file.nick).unwrap_or_else(default_nick),
            workers: opts.workers.or(file.workers).unwrap_or(0),
            max_line: opts.max_line.or(file.max_line).unwrap_or(DEFAULT_MAX_LINE),
            max_pending: opts
                .max_pending
                .or(file.max_pending)
                .unwrap_or(DEFAULT_MAX_PENDING),
            audit_log: opts.audit_log.clone().or(file.audit_log),
            log_level: opts
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
        }
    }
}

/// Login name of the daemon's user, like a shell would greet
pub fn default_nick() -> String {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_NICK.to_string())
}
