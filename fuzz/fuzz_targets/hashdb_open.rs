#![no_main]

use dev_mkdb::device::{name_from_record, DatabaseKey};
use dev_mkdb::hashdb::HashDb;
use libfuzzer_sys::fuzz_target;
use std::io::Write;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a database file: open, walk and probe must not panic
    let Ok(mut file) = tempfile::NamedTempFile::new() else {
        return;
    };
    if file.write_all(data).is_err() {
        return;
    }
    let Ok(db) = HashDb::open(file.path()) else {
        return;
    };
    if let Ok(entries) = db.entries() {
        for (key, value) in entries {
            let _ = DatabaseKey::decode(key);
            let _ = name_from_record(value);
            let _ = db.get(key);
        }
    }
    let _ = db.get(&data[..data.len().min(16)]);
});
