//! Directory scanner
//!
//! Reads one directory and yields an entry for every character or block
//! special file in it. Entries are classified with `lstat`, so a symlink to
//! a device is a symlink, not a device.
//!
//! Two kinds of skip are kept apart:
//! - an entry whose status cannot be read is reported with a warning and
//!   counted in [`ScanStats::stat_failures`]
//! - an entry that is not a device (file, directory, link, socket, FIFO) is
//!   skipped without a word and counted in [`ScanStats::skipped`]
//!
//! A device whose name cannot be stored is warned about and counted in
//! [`ScanStats::invalid_names`].
//!
//! Only `..` is excluded by name. `.` goes through `lstat` like any other
//! entry; it is a directory, so it is skipped as a non-device.

use crate::device::{DeviceEntry, DeviceId, DeviceKind};
use nix::dir::{Dir, OwningIter};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::{lstat, Mode};
use serde::Serialize;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{trace, warn};

/// Errors that stop a scan before it starts
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("{}: {}", .path.display(), .source)]
    Open { path: PathBuf, source: Errno },
}

/// Per-scan counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Entries examined (excluding `..`)
    pub seen: u64,
    /// Device entries produced
    pub devices: u64,
    /// Non-device entries skipped silently
    pub skipped: u64,
    /// Entries whose status could not be read
    pub stat_failures: u64,
    /// Devices whose name cannot be stored (empty, too long, embedded NUL)
    pub invalid_names: u64,
    /// Errors reading the directory itself (ends the scan)
    pub read_errors: u64,
}

/// Lazy, single-pass sequence of device entries in one directory
pub struct DeviceScanner {
    root: PathBuf,
    entries: OwningIter,
    stats: ScanStats,
    finished: bool,
}

impl DeviceScanner {
    /// Open `dir` for scanning
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ScanError> {
        let root = dir.as_ref().to_path_buf();
        let handle = Dir::open(
            root.as_path(),
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|source| ScanError::Open {
            path: root.clone(),
            source,
        })?;

        trace!(dir = %root.display(), "opened device directory");
        Ok(Self {
            root,
            entries: handle.into_iter(),
            stats: ScanStats::default(),
            finished: false,
        })
    }

    /// Counters so far; final once the iterator is exhausted
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Examine one directory entry name
    fn classify(&mut self, name: &[u8]) -> Option<DeviceEntry> {
        self.stats.seen += 1;
        let path = self.root.join(OsStr::from_bytes(name));

        let st = match lstat(path.as_path()) {
            Ok(st) => st,
            Err(errno) => {
                warn!("{}: {}", String::from_utf8_lossy(name), errno);
                self.stats.stat_failures += 1;
                return None;
            }
        };

        self.entry_for_status(name, st.st_mode as u32, st.st_rdev as u64)
    }

    /// Turn a successfully read status into an entry, or skip it
    fn entry_for_status(&mut self, name: &[u8], mode: u32, rdev: u64) -> Option<DeviceEntry> {
        let Some(kind) = DeviceKind::from_mode(mode) else {
            self.stats.skipped += 1;
            return None;
        };

        match DeviceEntry::new(name, kind, DeviceId(rdev)) {
            Ok(entry) => {
                trace!(
                    name = %String::from_utf8_lossy(name),
                    %kind,
                    dev = %entry.device_id(),
                    "device"
                );
                self.stats.devices += 1;
                Some(entry)
            }
            Err(e) => {
                warn!("{}: {}", String::from_utf8_lossy(name), e);
                self.stats.invalid_names += 1;
                None
            }
        }
    }
}

impl Iterator for DeviceScanner {
    type Item = DeviceEntry;

    fn next(&mut self) -> Option<DeviceEntry> {
        while !self.finished {
            let entry = match self.entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(errno)) => {
                    warn!("{}: {}", self.root.display(), errno);
                    self.stats.read_errors += 1;
                    self.finished = true;
                    break;
                }
                None => {
                    self.finished = true;
                    break;
                }
            };

            let name = entry.file_name().to_bytes();
            if name == b".." {
                continue;
            }
            if let Some(device) = self.classify(name) {
                return Some(device);
            }
        }
        None
    }
}
