//! Device entries and the fixed-layout database key
//!
//! A key is the narrowed file type (`S_IFCHR` or `S_IFBLK`) followed by the
//! device number, laid out like the LP64 record
//!
//! ```text
//! offset  0        4        8                16
//!         +--------+--------+-----------------+
//!         | kind   | zero   | device id       |
//!         | u32    | pad    | u64             |
//!         +--------+--------+-----------------+
//! ```
//!
//! in native byte order. The hash table compares keys as raw bytes, so the
//! whole buffer is zeroed before any field is written.

use nix::sys::stat::{major, makedev, minor};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest file name a directory entry can carry (`MAXNAMLEN`)
pub const MAX_NAME_LEN: usize = 255;

/// Width of an encoded [`DatabaseKey`]
pub const KEY_LEN: usize = 16;

const KIND_OFFSET: usize = 0;
const PAD_OFFSET: usize = 4;
const DEV_OFFSET: usize = 8;

/// Errors raised while building or decoding device records
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EntryError {
    #[error("device name is empty")]
    EmptyName,

    #[error("device name is {0} bytes, longer than 255")]
    NameTooLong(usize),

    #[error("device name contains a NUL byte")]
    InteriorNul,

    #[error("key must be 16 bytes, got {0}")]
    KeyLength(usize),

    #[error("unknown file type tag {0:#o}")]
    UnknownKind(u32),

    #[error("non-zero padding in key")]
    DirtyPadding,

    #[error("stored name is not NUL terminated")]
    MissingTerminator,
}

/// The two file types that qualify for the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Character special file
    Char,
    /// Block special file
    Block,
}

impl DeviceKind {
    /// Classify an `st_mode` value; anything but a char/block device is `None`
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & libc::S_IFMT as u32 {
            m if m == libc::S_IFCHR as u32 => Some(DeviceKind::Char),
            m if m == libc::S_IFBLK as u32 => Some(DeviceKind::Block),
            _ => None,
        }
    }

    /// The narrowed file-type tag stored in the key
    pub fn mode_bits(self) -> u32 {
        match self {
            DeviceKind::Char => libc::S_IFCHR as u32,
            DeviceKind::Block => libc::S_IFBLK as u32,
        }
    }

    /// Parse a command-line spelling (`c`, `char`, `b`, `block`)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "c" | "char" | "chr" => Some(DeviceKind::Char),
            "b" | "block" | "blk" => Some(DeviceKind::Block),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Char => write!(f, "char"),
            DeviceKind::Block => write!(f, "block"),
        }
    }
}

/// Platform device number (`st_rdev`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Compose a device number from its major/minor parts
    pub fn from_parts(major_num: u64, minor_num: u64) -> Self {
        DeviceId(makedev(major_num, minor_num) as u64)
    }

    pub fn major(self) -> u64 {
        major(self.0 as libc::dev_t) as u64
    }

    pub fn minor(self) -> u64 {
        minor(self.0 as libc::dev_t) as u64
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

/// A qualifying directory entry produced by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    name: Vec<u8>,
    kind: DeviceKind,
    device_id: DeviceId,
}

impl DeviceEntry {
    /// Create an entry, rejecting names a directory could not hold
    pub fn new(
        name: impl Into<Vec<u8>>,
        kind: DeviceKind,
        device_id: DeviceId,
    ) -> Result<Self, EntryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(EntryError::EmptyName);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EntryError::NameTooLong(name.len()));
        }
        if name.contains(&0) {
            return Err(EntryError::InteriorNul);
        }
        Ok(Self {
            name,
            kind,
            device_id,
        })
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn key(&self) -> DatabaseKey {
        DatabaseKey::new(self.kind, self.device_id)
    }

    /// Stored value: the name plus its NUL terminator
    pub fn record(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.name.len() + 1);
        buf.extend_from_slice(&self.name);
        buf.push(0);
        buf
    }
}

/// Fixed-width binary key: `(kind, device id)` with zeroed padding
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatabaseKey([u8; KEY_LEN]);

impl DatabaseKey {
    pub fn new(kind: DeviceKind, device_id: DeviceId) -> Self {
        let mut buf = [0u8; KEY_LEN];
        buf[KIND_OFFSET..PAD_OFFSET].copy_from_slice(&kind.mode_bits().to_ne_bytes());
        buf[DEV_OFFSET..KEY_LEN].copy_from_slice(&device_id.0.to_ne_bytes());
        DatabaseKey(buf)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Parse a stored key back into its fields
    pub fn decode(bytes: &[u8]) -> Result<(DeviceKind, DeviceId), EntryError> {
        let buf: &[u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| EntryError::KeyLength(bytes.len()))?;

        if buf[PAD_OFFSET..DEV_OFFSET].iter().any(|&b| b != 0) {
            return Err(EntryError::DirtyPadding);
        }

        let mut tag = [0u8; 4];
        tag.copy_from_slice(&buf[KIND_OFFSET..PAD_OFFSET]);
        let tag = u32::from_ne_bytes(tag);
        let kind = DeviceKind::from_mode(tag)
            .filter(|k| k.mode_bits() == tag)
            .ok_or(EntryError::UnknownKind(tag))?;

        let mut dev = [0u8; 8];
        dev.copy_from_slice(&buf[DEV_OFFSET..KEY_LEN]);
        Ok((kind, DeviceId(u64::from_ne_bytes(dev))))
    }
}

impl fmt::Debug for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DatabaseKey::decode(&self.0) {
            Ok((kind, dev)) => write!(f, "DatabaseKey({kind}, {dev})"),
            Err(_) => write!(f, "DatabaseKey({:02x?})", self.0),
        }
    }
}

/// Strip the terminator from a stored value
pub fn name_from_record(record: &[u8]) -> Result<&[u8], EntryError> {
    match record.split_last() {
        Some((&0, name)) => Ok(name),
        _ => Err(EntryError::MissingTerminator),
    }
}
