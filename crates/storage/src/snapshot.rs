//! Checksummed snapshot files.
//!
//! Format: each entry is `[4-byte CRC32 LE][4-byte length LE][JSON payload]\n`.
//! A snapshot is always written in full to a sibling `.tmp` file and renamed
//! over the target, so readers see either the old or the new image. On load,
//! entries are replayed until the first truncated or corrupt one.

use crc32fast::Hasher;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace the file at `path` with the given entries.
pub fn write_snapshot<T: Serialize>(path: &Path, entries: &[T]) -> Result<(), SnapshotError> {
    let tmp = tmp_path(path);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for entry in entries {
            let payload = serde_json::to_vec(entry)?;
            let mut hasher = Hasher::new();
            hasher.update(&payload);
            let crc = hasher.finalize();

            writer.write_all(&crc.to_le_bytes())?;
            writer.write_all(&(payload.len() as u32).to_le_bytes())?;
            writer.write_all(&payload)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load every valid entry from `path`. A missing file is an empty snapshot.
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SnapshotError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(SnapshotError::Io(e)),
    };

    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();

    loop {
        let mut crc_buf = [0u8; 4];
        match reader.read_exact(&mut crc_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(SnapshotError::Io(e)),
        }
        let expected_crc = u32::from_le_bytes(crc_buf);

        macro_rules! read_or_break {
            ($buf:expr) => {
                match reader.read_exact($buf) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        tracing::warn!(
                            "snapshot {:?} truncated after {} entries; stopping load",
                            path,
                            entries.len()
                        );
                        break;
                    }
                    Err(e) => return Err(SnapshotError::Io(e)),
                }
            };
        }

        let mut len_buf = [0u8; 4];
        read_or_break!(&mut len_buf);
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        read_or_break!(&mut payload);

        let mut nl = [0u8; 1];
        read_or_break!(&mut nl);

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let actual_crc = hasher.finalize();
        if actual_crc != expected_crc {
            tracing::warn!(
                "snapshot {:?} CRC mismatch at entry {}: expected {:#010x}, got {:#010x}",
                path,
                entries.len(),
                expected_crc,
                actual_crc
            );
            break;
        }

        entries.push(serde_json::from_slice(&payload)?);
    }

    Ok(entries)
}
