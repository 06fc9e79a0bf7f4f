//! Command-line options for burrowd and the burrow transfer client

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Daemon options. Unset values fall back to the config file, then defaults.
#[derive(Clone, Debug, Default, Parser)]
#[command(
    author,
    version,
    about = "burrowd - remote line shell and file transfer over one served directory"
)]
pub struct DaemonOpts {
    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Shell bind address (host:port) [default: 0.0.0.0:5678]
    #[arg(long)]
    pub shell_bind: Option<String>,

    /// Transfer bind address (host:port) [default: 0.0.0.0:5679]
    #[arg(long)]
    pub transfer_bind: Option<String>,

    /// Root directory to serve [default: server]
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Create the root directory if it does not exist
    #[arg(long)]
    pub create_root: bool,

    /// Nickname new shell sessions start with [default: $USER]
    #[arg(long)]
    pub nick: Option<String>,

    /// Filesystem worker threads (0 = auto)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Longest accepted command line in bytes
    #[arg(long)]
    pub max_line: Option<usize>,

    /// Commands a connection may queue before it is dropped
    #[arg(long)]
    pub max_pending: Option<usize>,

    /// Append an audit trail of client activity to this file
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Transfer client options
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "burrow - upload and download files from a burrowd")]
pub struct ClientOpts {
    /// Transfer service address (host:port)
    #[arg(long, default_value = "127.0.0.1:5679")]
    pub server: String,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// Upload a local file
    Upload {
        local: PathBuf,
        /// Name on the server (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Download a file from the server
    Download {
        name: String,
        /// Local destination (defaults to the file name in the current directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}
