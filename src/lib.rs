//! dev_mkdb - device name database builder
//!
//! Scans a directory of device special files and writes a hashed database
//! mapping `(file type, device number)` to the device's name, so programs
//! can turn an `st_rdev` into `/dev/<name>` without walking `/dev`.
//!
//! The database is built under a scratch name and renamed into place, so
//! readers always see a complete file.

pub mod builder;
pub mod chaos;
pub mod cli;
pub mod config;
pub mod device;
pub mod hashdb;
pub mod lookup;
pub mod scanner;
