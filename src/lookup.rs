//! Device name lookups against a published database
//!
//! The reader side of the build: given a file type and device number, find
//! the name under `/dev`, the way `devname(3)` does.

use crate::device::{name_from_record, DatabaseKey, DeviceId, DeviceKind, EntryError};
use crate::hashdb::{DbError, HashDb};
use std::path::Path;
use thiserror::Error;

/// Errors from reading the device database
#[derive(Error, Debug)]
pub enum LookupError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("bad record: {0}")]
    Record(#[from] EntryError),
}

/// A decoded database record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub kind: DeviceKind,
    pub device_id: DeviceId,
    pub name: Vec<u8>,
}

impl DeviceRecord {
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Typed view of a device database
#[derive(Debug)]
pub struct DeviceDb {
    db: HashDb,
}

impl DeviceDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        Ok(Self {
            db: HashDb::open(path)?,
        })
    }

    /// Number of records
    pub fn len(&self) -> u64 {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Stored value for a key, terminator included
    pub fn lookup_raw(
        &self,
        kind: DeviceKind,
        id: DeviceId,
    ) -> Result<Option<&[u8]>, LookupError> {
        let key = DatabaseKey::new(kind, id);
        Ok(self.db.get(key.as_bytes())?)
    }

    /// Device name for `(kind, id)`
    pub fn lookup(&self, kind: DeviceKind, id: DeviceId) -> Result<Option<String>, LookupError> {
        match self.lookup_raw(kind, id)? {
            Some(record) => {
                let name = name_from_record(record)?;
                Ok(Some(String::from_utf8_lossy(name).into_owned()))
            }
            None => Ok(None),
        }
    }

    /// All records, sorted by kind then device number
    pub fn records(&self) -> Result<Vec<DeviceRecord>, LookupError> {
        let mut out = self
            .db
            .entries()?
            .into_iter()
            .map(|(key, value)| -> Result<DeviceRecord, LookupError> {
                let (kind, device_id) = DatabaseKey::decode(key)?;
                let name = name_from_record(value)?.to_vec();
                Ok(DeviceRecord {
                    kind,
                    device_id,
                    name,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by_key(|r| (r.kind.mode_bits(), r.device_id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashdb::{HashDbWriter, DEFAULT_BUCKET_SIZE};
    use tempfile::TempDir;

    #[test]
    fn test_lookup_raw_includes_terminator() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dev.db");
        let mut writer = HashDbWriter::create(&path, DEFAULT_BUCKET_SIZE).unwrap();
        let key = DatabaseKey::new(DeviceKind::Char, DeviceId(7));
        writer.put(key.as_bytes(), b"ttyX\0").unwrap();
        writer.close().unwrap();

        let db = DeviceDb::open(&path).unwrap();
        let raw = db.lookup_raw(DeviceKind::Char, DeviceId(7)).unwrap().unwrap();
        assert_eq!(raw, b"ttyX\0");
        assert_eq!(raw.len(), 5);
        assert_eq!(db.lookup(DeviceKind::Char, DeviceId(7)).unwrap().as_deref(), Some("ttyX"));
        assert_eq!(db.lookup(DeviceKind::Block, DeviceId(7)).unwrap(), None);
    }

    #[test]
    fn test_records_rejects_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreign.db");
        let mut writer = HashDbWriter::create(&path, DEFAULT_BUCKET_SIZE).unwrap();
        writer.put(b"not-a-device-key", b"x\0").unwrap();
        writer.close().unwrap();

        let db = DeviceDb::open(&path).unwrap();
        assert!(matches!(db.records(), Err(LookupError::Record(_))));
    }

    #[test]
    fn test_unterminated_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.db");
        let mut writer = HashDbWriter::create(&path, DEFAULT_BUCKET_SIZE).unwrap();
        let key = DatabaseKey::new(DeviceKind::Block, DeviceId(3));
        writer.put(key.as_bytes(), b"sda").unwrap();
        writer.close().unwrap();

        let db = DeviceDb::open(&path).unwrap();
        assert!(matches!(
            db.lookup(DeviceKind::Block, DeviceId(3)),
            Err(LookupError::Record(EntryError::MissingTerminator))
        ));
    }

    #[test]
    fn test_records_sorted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sorted.db");
        let mut writer = HashDbWriter::create(&path, DEFAULT_BUCKET_SIZE).unwrap();
        for (kind, dev, name) in [
            (DeviceKind::Block, 9u64, "b9"),
            (DeviceKind::Char, 5, "c5"),
            (DeviceKind::Char, 1, "c1"),
        ] {
            let key = DatabaseKey::new(kind, DeviceId(dev));
            writer.put(key.as_bytes(), format!("{name}\0").as_bytes()).unwrap();
        }
        writer.close().unwrap();

        let db = DeviceDb::open(&path).unwrap();
        let names: Vec<String> = db.records().unwrap().iter().map(|r| r.name_lossy()).collect();
        // S_IFCHR (0o020000) sorts before S_IFBLK (0o060000)
        assert_eq!(names, ["c1", "c5", "b9"]);
    }
}
