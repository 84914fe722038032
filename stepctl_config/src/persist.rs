//! Checksummed tuning record on disk.
//!
//! The record is a small TOML document whose last field is a CRC-8 over the
//! binary encoding of the other fields. Anything that fails to parse or to
//! match its checksum is treated as absent, so callers fall back to defaults.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stepctl_traits::{BoxError, ParamStore, TuningRecord};

#[derive(Debug, Serialize, Deserialize)]
struct TuningFile {
    kp: f32,
    ki: f32,
    kd: f32,
    current: u8,
    hold_current: u8,
    invert_direction: bool,
    checksum: u8,
}

/// CRC-8, polynomial 0x07, init 0.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut current = byte;
        for _ in 0..8 {
            if ((crc >> 7) ^ (current >> 7)) != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
            current <<= 1;
        }
    }
    crc
}

fn payload(r: &TuningRecord) -> [u8; 15] {
    let mut out = [0u8; 15];
    out[0..4].copy_from_slice(&r.kp.to_le_bytes());
    out[4..8].copy_from_slice(&r.ki.to_le_bytes());
    out[8..12].copy_from_slice(&r.kd.to_le_bytes());
    out[12] = r.current;
    out[13] = r.hold_current;
    out[14] = u8::from(r.invert_direction);
    out
}

pub fn encode_record(r: &TuningRecord) -> Result<String, toml::ser::Error> {
    let file = TuningFile {
        kp: r.kp,
        ki: r.ki,
        kd: r.kd,
        current: r.current,
        hold_current: r.hold_current,
        invert_direction: r.invert_direction,
        checksum: crc8(&payload(r)),
    };
    toml::to_string(&file)
}

/// `None` for anything that is not a well-formed record with a matching checksum.
pub fn decode_record(bytes: &[u8]) -> Option<TuningRecord> {
    let text = std::str::from_utf8(bytes).ok()?;
    let file: TuningFile = toml::from_str(text).ok()?;
    let record = TuningRecord {
        kp: file.kp,
        ki: file.ki,
        kd: file.kd,
        current: file.current,
        hold_current: file.hold_current,
        invert_direction: file.invert_direction,
    };
    (crc8(&payload(&record)) == file.checksum).then_some(record)
}

/// Write to a sibling temp file, fsync, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// `ParamStore` backed by a single file.
#[derive(Debug, Clone)]
pub struct FileParamStore {
    path: PathBuf,
}

impl FileParamStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParamStore for FileParamStore {
    fn load(&mut self) -> Result<Option<TuningRecord>, BoxError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no tuning record stored");
                return Ok(None);
            }
            Err(e) => return Err(Box::new(e)),
        };
        let record = decode_record(&bytes);
        if record.is_none() {
            tracing::warn!(
                path = %self.path.display(),
                "tuning record corrupt or checksum mismatch; using defaults"
            );
        }
        Ok(record)
    }

    fn save(&mut self, record: &TuningRecord) -> Result<(), BoxError> {
        let text = encode_record(record)?;
        write_atomic(&self.path, text.as_bytes())?;
        tracing::info!(path = %self.path.display(), "tuning record saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc8_known_vectors() {
        assert_eq!(crc8(&[]), 0);
        // CRC-8/SMBUS check value
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn checksum_covers_every_field() {
        let base = TuningRecord::default();
        let mut flipped = base;
        flipped.invert_direction = true;
        assert_ne!(crc8(&payload(&base)), crc8(&payload(&flipped)));
    }

    #[test]
    fn garbage_decodes_to_none() {
        assert!(decode_record(b"\xff\xfe").is_none());
        assert!(decode_record(b"kp = 1.0").is_none());
    }
}
