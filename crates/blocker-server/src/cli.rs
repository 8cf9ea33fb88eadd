//! Command-line flags. Flags override the configuration file.

use crate::config::ServerConfig;
use blocker_core::{CipherConfig, StorageConfig};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Storage backend selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// Local directory
    Disk,
    /// S3-compatible object store
    S3,
    /// CouchDB
    Couch,
}

/// Cipher backend selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CipherKind {
    /// Local key file
    Local,
    /// AWS KMS data keys
    AwsKms,
    /// Go-KMS data keys
    GoKms,
    /// OpenPGP key pair
    Pgp,
}

/// Server flags
#[derive(Debug, Parser)]
#[command(name = "blocker", version)]
#[command(about = "Content-addressed, deduplicating block store", long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, env = "BLOCKER_CONFIG", default_value = "/etc/blocker/blocker.toml")]
    pub config: PathBuf,

    /// Storage backend
    #[arg(short, long, value_enum)]
    pub storage: Option<StorageKind>,

    /// Cipher backend
    #[arg(long, value_enum)]
    pub cipher: Option<CipherKind>,

    /// Listen address
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Shared signing secret
    #[arg(long, env = "BLOCKER_SHARED_KEY", hide_env_values = true)]
    pub shared_key: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Apply flag overrides to a loaded configuration.
    ///
    /// Selecting a backend kind different from the file's resets that
    /// section to the kind's defaults; environment variables fill in the rest.
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(key) = &self.shared_key {
            config.shared_key = Some(key.clone());
        }
        if let Some(kind) = self.storage {
            if storage_kind(&config.blocker.storage) != kind {
                config.blocker.storage = default_storage(kind);
            }
        }
        if let Some(kind) = self.cipher {
            if cipher_kind(&config.blocker.cipher) != kind {
                config.blocker.cipher = default_cipher(kind);
            }
        }
    }
}

fn storage_kind(config: &StorageConfig) -> StorageKind {
    match config {
        StorageConfig::Disk { .. } => StorageKind::Disk,
        StorageConfig::S3 { .. } => StorageKind::S3,
        StorageConfig::Couch { .. } => StorageKind::Couch,
    }
}

fn cipher_kind(config: &CipherConfig) -> CipherKind {
    match config {
        CipherConfig::Local { .. } => CipherKind::Local,
        CipherConfig::AwsKms { .. } => CipherKind::AwsKms,
        CipherConfig::GoKms { .. } => CipherKind::GoKms,
        CipherConfig::Pgp { .. } => CipherKind::Pgp,
    }
}

// Backend sections deserialized from just their tag pick up every serde default.
fn default_storage(kind: StorageKind) -> StorageConfig {
    let tag = match kind {
        StorageKind::Disk => "disk",
        StorageKind::S3 => "s3",
        StorageKind::Couch => "couch",
    };
    serde_json::from_value(serde_json::json!({ "kind": tag })).unwrap_or_default()
}

fn default_cipher(kind: CipherKind) -> CipherConfig {
    let tag = match kind {
        CipherKind::Local => "local",
        CipherKind::AwsKms => "aws-kms",
        CipherKind::GoKms => "go-kms",
        CipherKind::Pgp => "pgp",
    };
    serde_json::from_value(serde_json::json!({ "kind": tag })).unwrap_or_default()
}
