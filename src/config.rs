// Build configuration
//
// Where the device directory is read from and where the database is built
// and published. Defaults match the traditional locations; tests point every
// path into a temporary directory.

use crate::chaos::ChaosConfig;
use crate::hashdb::{validate_bucket_size, DEFAULT_BUCKET_SIZE};
use anyhow::{bail, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default directory of device special files
pub const DEFAULT_DEV_DIR: &str = "/dev";

/// Default published database
pub const DEFAULT_DB_PATH: &str = "/var/run/dev.db";

/// Default scratch file the database is built in
pub const DEFAULT_TMP_PATH: &str = "/var/run/dev.tmp";

/// Configuration for a database build
///
/// # Example
/// ```
/// use dev_mkdb::config::BuildConfig;
///
/// let config = BuildConfig::default();
/// assert_eq!(config.db_path.to_str(), Some("/var/run/dev.db"));
/// assert_eq!(config.bucket_size, 8192);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct BuildConfig {
    /// Directory whose device entries are indexed
    pub dev_dir: PathBuf,

    /// Published database path
    pub db_path: PathBuf,

    /// Scratch path on the same filesystem as `db_path`
    ///
    /// The database is written and locked here, then renamed over
    /// `db_path`. A rename across filesystems fails, so both must share a
    /// volume.
    pub tmp_path: PathBuf,

    /// Hash bucket page size in bytes
    pub bucket_size: u32,

    /// Fault injection (inert unless configured)
    #[serde(skip)]
    pub chaos: ChaosConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dev_dir: PathBuf::from(DEFAULT_DEV_DIR),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            tmp_path: PathBuf::from(DEFAULT_TMP_PATH),
            bucket_size: DEFAULT_BUCKET_SIZE,
            chaos: ChaosConfig::default(),
        }
    }
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config that builds `<dir>/dev.tmp` and publishes `<dir>/dev.db`
    pub fn in_dir(dev_dir: impl Into<PathBuf>, state_dir: impl AsRef<Path>) -> Self {
        let state_dir = state_dir.as_ref();
        Self {
            dev_dir: dev_dir.into(),
            db_path: state_dir.join("dev.db"),
            tmp_path: state_dir.join("dev.tmp"),
            ..Self::default()
        }
    }

    pub fn with_dev_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dev_dir = dir.into();
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_tmp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmp_path = path.into();
        self
    }

    pub fn with_bucket_size(mut self, bucket_size: u32) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }

    /// Reject configurations that cannot produce a database
    pub fn validate(&self) -> Result<()> {
        if validate_bucket_size(self.bucket_size).is_err() {
            bail!(
                "Invalid bucket size: {} (must be a power of two between 256 and 65536)",
                self.bucket_size
            );
        }
        if self.tmp_path == self.db_path {
            bail!(
                "Temporary path and database path are both {}",
                self.db_path.display()
            );
        }
        if self.tmp_path.as_os_str().is_empty() || self.db_path.as_os_str().is_empty() {
            bail!("Database paths must not be empty");
        }
        Ok(())
    }
}
