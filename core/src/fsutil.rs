//! Filesystem helpers: atomic JSON writes and tolerant reads.
//!
//! Every write goes `write(tmp) → rename(tmp, final)` with a unique tmp
//! name, so concurrent readers only ever observe complete files. Readers
//! may momentarily see pre-rename state; callers tolerate that.

use std::path::Path;

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CoreError, Result};

/// Atomically write raw bytes to `path`, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let nonce: u32 = rand::rng().random();
    let file_name = path
        .file_name()
        .ok_or_else(|| CoreError::Internal(format!("no file name in {}", path.display())))?
        .to_string_lossy()
        .to_string();
    let tmp = path.with_file_name(format!(".{file_name}.{nonce:08x}.tmp"));
    std::fs::write(&tmp, data)?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Atomically write a value as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

/// Read and parse a JSON file; `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_str(&data)
        .map_err(|err| CoreError::Internal(format!("parse {}: {err}", path.display())))?;
    Ok(Some(value))
}

/// Read a JSON file, defaulting when absent.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    Ok(read_json(path)?.unwrap_or_default())
}

/// List `*.json` file stems in a directory, sorted. Missing directory is an
/// empty listing.
pub fn list_json_stems(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut stems = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "json")
            && let Some(stem) = path.file_stem()
        {
            let stem = stem.to_string_lossy();
            // Skip tmp leftovers from interrupted writes.
            if !stem.starts_with('.') {
                stems.push(stem.to_string());
            }
        }
    }
    stems.sort();
    Ok(stems)
}
