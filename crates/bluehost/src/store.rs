//! Persistent paired-device records
//!
//! One line per paired device:
//! `AA:BB:CC:DD:EE:FF,"device name",linkKeyTypeHex,32-hex-digit-link-key`.
//! The table is rewritten in full on every link-key notification and on
//! unpair. Malformed lines are skipped with a log line so one bad entry
//! never loses the rest of the table.

use crate::hci::device::{BdAddr, LinkKey, LinkKeyType};
use log::warn;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur reading or writing the device store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read device store: {0}")]
    Read(std::io::Error),

    #[error("Failed to write device store: {0}")]
    Write(std::io::Error),
}

/// One persisted device record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDevice {
    pub addr: BdAddr,
    pub name: String,
    pub link_key: LinkKey,
}

/// Line-oriented key/value file of paired devices
#[derive(Debug)]
pub struct DeviceStore {
    path: PathBuf,
}

impl DeviceStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records; a missing file is an empty table
    pub fn load(&self) -> Result<Vec<StoredDevice>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Read(e)),
        };

        let mut records = Vec::new();
        for (line_number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(record) => records.push(record),
                None => warn!(
                    "skipping malformed device record at {}:{}",
                    self.path.display(),
                    line_number + 1
                ),
            }
        }
        Ok(records)
    }

    /// Rewrite the whole table
    pub fn save(&self, records: &[StoredDevice]) -> Result<(), StoreError> {
        let mut file = std::fs::File::create(&self.path).map_err(StoreError::Write)?;
        for record in records {
            writeln!(
                file,
                "{},\"{}\",{:02X},{}",
                record.addr,
                record.name,
                record.link_key.key_type.to_stored(),
                hex::encode_upper(record.link_key.key)
            )
            .map_err(StoreError::Write)?;
        }
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<StoredDevice> {
    // addr , "name" , typeHex , keyHex — the name is quoted and may
    // contain commas, so split around the quotes first
    let (addr_part, rest) = line.split_once(',')?;
    let rest = rest.strip_prefix('"')?;
    let (name, rest) = rest.split_once('"')?;
    let rest = rest.strip_prefix(',')?;
    let (type_part, key_part) = rest.split_once(',')?;

    let addr: BdAddr = addr_part.trim().parse().ok()?;
    let key_type = LinkKeyType::from_stored(u8::from_str_radix(type_part.trim(), 16).ok()?)?;

    let key_bytes = hex::decode(key_part.trim()).ok()?;
    let key: [u8; 16] = key_bytes.try_into().ok()?;

    Some(StoredDevice {
        addr,
        name: name.to_string(),
        link_key: LinkKey { key, key_type },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> DeviceStore {
        let mut path = std::env::temp_dir();
        path.push(format!("bluehost-store-test-{name}-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        DeviceStore::new(path)
    }

    #[test]
    fn test_missing_file_is_empty_table() {
        let store = temp_store("missing");
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let store = temp_store("roundtrip");
        let records = vec![
            StoredDevice {
                addr: "06:05:04:03:02:01".parse().unwrap(),
                name: "Test Device".to_string(),
                link_key: LinkKey {
                    key: [0xAB; 16],
                    key_type: LinkKeyType::Combination,
                },
            },
            StoredDevice {
                addr: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
                name: "Headset, Inc.".to_string(),
                link_key: LinkKey {
                    key: [0x01; 16],
                    key_type: LinkKeyType::UnauthenticatedP192,
                },
            },
        ];
        store.save(&records).unwrap();
        assert_eq!(store.load().unwrap(), records);
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn test_line_format() {
        let record = parse_line("06:05:04:03:02:01,\"My Device\",FF,000102030405060708090A0B0C0D0E0F")
            .unwrap();
        assert_eq!(record.addr.to_string(), "06:05:04:03:02:01");
        assert_eq!(record.name, "My Device");
        // The 0xFF sentinel maps back to the combination key type
        assert_eq!(record.link_key.key_type, LinkKeyType::Combination);
        assert_eq!(record.link_key.key[0], 0x00);
        assert_eq!(record.link_key.key[15], 0x0F);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let store = temp_store("malformed");
        std::fs::write(
            store.path(),
            "garbage\n06:05:04:03:02:01,\"ok\",04,000102030405060708090A0B0C0D0E0F\nAA:BB,\"bad addr\",04,00\n",
        )
        .unwrap();
        let records = store.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "ok");
        let _ = std::fs::remove_file(store.path());
    }
}
