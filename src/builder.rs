//! Database builder
//!
//! Turns a sequence of [`DeviceEntry`] values into a hash database and
//! publishes it:
//!
//! ```text
//! Init ──► Scanning+Inserting ──► Flushed ──► Published
//!   │              │                 │
//!   └──────────────┴─────────────────┴──────► Failed
//! ```
//!
//! Everything is written to the scratch path first. The destination is only
//! touched by the final `rename(2)`, so a reader sees either the previous
//! database or the new one. Any failure ends the build; nothing is retried.

use crate::config::BuildConfig;
use crate::device::DeviceEntry;
use crate::hashdb::{DbError, HashDbWriter};
use crate::scanner::{DeviceScanner, ScanError, ScanStats};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Build state a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildPhase {
    Init,
    Inserting,
    Flushed,
    Published,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::Init => "init",
            BuildPhase::Inserting => "inserting",
            BuildPhase::Flushed => "flushed",
            BuildPhase::Published => "published",
        };
        f.write_str(name)
    }
}

/// Fatal build errors; each names the path and the operation that failed
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("{source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: ScanError,
    },

    #[error("{}: {}", .path.display(), .source)]
    Open {
        path: PathBuf,
        #[source]
        source: DbError,
    },

    #[error("dbput {}: {}", .path.display(), .source)]
    Insert {
        path: PathBuf,
        #[source]
        source: DbError,
    },

    #[error("flush {}: {}", .path.display(), .source)]
    Flush {
        path: PathBuf,
        #[source]
        source: DbError,
    },

    #[error("rename {} to {}: {}", .from.display(), .to.display(), .source)]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Last state the build reached before failing
    pub fn phase(&self) -> BuildPhase {
        match self {
            BuildError::Scan { .. } | BuildError::Open { .. } => BuildPhase::Init,
            BuildError::Insert { .. } | BuildError::Flush { .. } => BuildPhase::Inserting,
            BuildError::Rename { .. } => BuildPhase::Flushed,
        }
    }
}

/// Outcome of a successful build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Published database
    pub db_path: PathBuf,
    /// Entries inserted, duplicates included
    pub inserted: u64,
    /// Distinct keys in the database
    pub records: u64,
    /// Insertions that replaced an earlier name for the same key
    pub duplicates: u64,
    pub bucket_count: u32,
    /// Size of the published file
    pub bytes: u64,
    /// Directory scan counters, when the build scanned a directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanStats>,
}

/// Builds and publishes the device database
#[derive(Debug, Clone)]
pub struct DbBuilder {
    config: BuildConfig,
}

impl DbBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Scan the configured device directory and build from it
    pub fn run(&self) -> Result<BuildReport, BuildError> {
        let mut scanner =
            DeviceScanner::open(&self.config.dev_dir).map_err(|source| BuildError::Scan {
                path: self.config.dev_dir.clone(),
                source,
            })?;

        let mut report = self.build(&mut scanner)?;
        let stats = scanner.stats();
        info!(
            seen = stats.seen,
            devices = stats.devices,
            stat_failures = stats.stat_failures,
            invalid_names = stats.invalid_names,
            "scan complete"
        );
        report.scan = Some(stats);
        Ok(report)
    }

    /// Build from any entry sequence and publish the result
    pub fn build<I>(&self, entries: I) -> Result<BuildReport, BuildError>
    where
        I: IntoIterator<Item = DeviceEntry>,
    {
        let tmp = &self.config.tmp_path;
        let dest = &self.config.db_path;
        let chaos = &self.config.chaos;
        if !chaos.is_inert() {
            debug!(?chaos, "fault injection armed");
        }

        debug!(phase = %BuildPhase::Init, tmp = %tmp.display(), "opening build file");
        let mut writer =
            HashDbWriter::create(tmp, self.config.bucket_size).map_err(|source| BuildError::Open {
                path: tmp.clone(),
                source,
            })?;

        debug!(phase = %BuildPhase::Inserting, "inserting entries");
        let mut inserted: u64 = 0;
        for entry in entries {
            let insert_error = |source: DbError| BuildError::Insert {
                path: tmp.clone(),
                source,
            };
            if let Some(fault) = chaos.insert_fault(inserted as usize) {
                return Err(insert_error(DbError::Io(fault)));
            }

            let key = entry.key();
            writer
                .put(key.as_bytes(), &entry.record())
                .map_err(insert_error)?;
            inserted += 1;
        }

        let sealed = writer.close().map_err(|source| BuildError::Flush {
            path: tmp.clone(),
            source,
        })?;
        let stats = sealed.stats();
        debug!(phase = %BuildPhase::Flushed, records = stats.records, "build file flushed");

        let rename_error = |source: std::io::Error| BuildError::Rename {
            from: tmp.clone(),
            to: dest.clone(),
            source,
        };
        if let Some(fault) = chaos.publish_fault() {
            return Err(rename_error(fault));
        }
        sealed.rename_to(dest).map_err(rename_error)?;

        info!(
            phase = %BuildPhase::Published,
            db = %dest.display(),
            records = stats.records,
            duplicates = stats.superseded,
            "database published"
        );

        Ok(BuildReport {
            db_path: dest.clone(),
            inserted,
            records: stats.records,
            duplicates: stats.superseded,
            bucket_count: stats.bucket_count,
            bytes: stats.bytes,
            scan: None,
        })
    }
}
