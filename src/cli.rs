//! CLI argument parsing for dev_mkdb

use crate::config::{BuildConfig, DEFAULT_DB_PATH, DEFAULT_DEV_DIR, DEFAULT_TMP_PATH};
use crate::device::{DeviceId, DeviceKind};
use crate::hashdb::DEFAULT_BUCKET_SIZE;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for reports and lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

/// A `--lookup` query: file type plus major/minor numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupQuery {
    pub kind: DeviceKind,
    pub id: DeviceId,
}

/// Parse `KIND:MAJOR:MINOR`, e.g. `c:1:3` or `block:8:0`
pub fn parse_lookup(s: &str) -> Result<LookupQuery, String> {
    let mut parts = s.split(':');
    let (Some(kind), Some(major), Some(minor), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected KIND:MAJOR:MINOR, got '{s}'"));
    };

    let kind = DeviceKind::parse(kind)
        .ok_or_else(|| format!("unknown device kind '{kind}' (use c or b)"))?;
    let major: u64 = major
        .parse()
        .map_err(|_| format!("invalid major number '{major}'"))?;
    let minor: u64 = minor
        .parse()
        .map_err(|_| format!("invalid minor number '{minor}'"))?;

    Ok(LookupQuery {
        kind,
        id: DeviceId::from_parts(major, minor),
    })
}

#[derive(Parser, Debug)]
#[command(name = "dev_mkdb")]
#[command(version)]
#[command(
    about = "Build the device name database from a directory of device nodes",
    long_about = None
)]
pub struct Cli {
    /// Directory of device special files to index
    #[arg(long = "dev-dir", value_name = "DIR", default_value = DEFAULT_DEV_DIR)]
    pub dev_dir: PathBuf,

    /// Published database path
    #[arg(long = "db", value_name = "PATH", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Scratch file the database is built in (same filesystem as --db)
    #[arg(long = "tmp", value_name = "PATH", default_value = DEFAULT_TMP_PATH)]
    pub tmp_path: PathBuf,

    /// Hash bucket page size in bytes
    #[arg(long = "bucket-size", value_name = "BYTES", default_value_t = DEFAULT_BUCKET_SIZE)]
    pub bucket_size: u32,

    /// Look up a device name in the published database instead of building
    #[arg(
        long = "lookup",
        value_name = "KIND:MAJOR:MINOR",
        value_parser = parse_lookup,
        conflicts_with = "list"
    )]
    pub lookup: Option<LookupQuery>,

    /// List every record in the published database instead of building
    #[arg(long = "list")]
    pub list: bool,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug tracing output
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Build configuration described by the arguments
    pub fn build_config(&self) -> BuildConfig {
        BuildConfig::new()
            .with_dev_dir(&self.dev_dir)
            .with_db_path(&self.db_path)
            .with_tmp_path(&self.tmp_path)
            .with_bucket_size(self.bucket_size)
    }
}
