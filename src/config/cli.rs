use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

use crate::application::maintenance::SweepScope;

use super::StorageBackend;

/// Command-line arguments for the newscache binary.
#[derive(Debug, Parser)]
#[command(
    name = "newscache",
    version,
    about = "Expiry-aware feed, article and translation cache service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "NEWSCACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the operations HTTP service.
    Serve(Box<ServeArgs>),
    /// Delete expired cache entries and exit.
    Sweep(SweepArgs),
    /// Print a JSON summary of the cache contents and exit.
    Status(StatusArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Which caches to sweep.
    #[arg(long, value_enum, default_value_t = SweepScope::All)]
    pub scope: SweepScope,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the blob storage backend.
    #[arg(long = "storage-backend", value_enum, value_name = "BACKEND")]
    pub backend: Option<StorageBackendArg>,

    /// Override the blob storage root directory.
    #[arg(long = "storage-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub root: Option<PathBuf>,

    /// Override the directory holding quota tables.
    #[arg(long = "storage-tables-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub tables_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    Local,
    Memory,
}

impl From<StorageBackendArg> for StorageBackend {
    fn from(value: StorageBackendArg) -> Self {
        match value {
            StorageBackendArg::Local => StorageBackend::Local,
            StorageBackendArg::Memory => StorageBackend::Memory,
        }
    }
}
