// crates/entitlement-gate-store-json/src/document.rs
// ============================================================================
// Module: JSON Document
// Description: Locked, atomic access to a single JSON document on disk.
// Purpose: Provide crash-safe writes and corruption quarantine for stores.
// Dependencies: entitlement-gate-core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`JsonDocument`] owns one file path. Reads treat a missing file as the
//! default value. A file that fails to parse is renamed to
//! `<file>.corrupt-<unix_ms>` and the default value is returned, so the bad
//! bytes stay on disk for manual recovery. Writes go to `<file>.tmp`, are
//! fsynced, and then renamed over the target.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use entitlement_gate_core::GateLog;
use entitlement_gate_core::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use serde_json::ser::PrettyFormatter;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum document size accepted on read.
pub const MAX_DOCUMENT_BYTES: u64 = 64 * 1024 * 1024;

/// Indentation used for written documents.
const INDENT: &[u8] = b"    ";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// JSON document store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JsonStoreError {
    /// Filesystem error.
    #[error("json store io error: {0}")]
    Io(String),
    /// Invalid store configuration.
    #[error("json store invalid config: {0}")]
    Invalid(String),
    /// Value could not be encoded.
    #[error("json store encode error: {0}")]
    Encode(String),
    /// Document exceeds [`MAX_DOCUMENT_BYTES`].
    #[error("json store document too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: u64,
        /// Actual file size in bytes.
        actual_bytes: u64,
    },
    /// The document lock was poisoned by a panicking writer.
    #[error("json store lock poisoned: {0}")]
    Poisoned(String),
}

impl From<JsonStoreError> for StoreError {
    fn from(error: JsonStoreError) -> Self {
        match error {
            JsonStoreError::Io(message) => Self::Io(message),
            JsonStoreError::Invalid(message) | JsonStoreError::Encode(message) => {
                Self::Invalid(message)
            }
            JsonStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "document exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
            JsonStoreError::Poisoned(message) => Self::Store(message),
        }
    }
}

// ============================================================================
// SECTION: Document
// ============================================================================

/// One JSON document guarded by an in-process mutex.
#[derive(Debug)]
pub struct JsonDocument {
    /// Target file.
    path: PathBuf,
    /// Serializes read-modify-write sequences.
    lock: Mutex<()>,
    /// Log handle for quarantine events.
    log: GateLog,
}

impl JsonDocument {
    /// Creates a document handle; the file is not touched.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, log: GateLog) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            log,
        }
    }

    /// Returns the document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document.
    ///
    /// # Errors
    ///
    /// Returns [`JsonStoreError`] when the file exists but cannot be read or
    /// quarantined, or when it exceeds [`MAX_DOCUMENT_BYTES`].
    pub fn read<T>(&self) -> Result<T, JsonStoreError>
    where
        T: DeserializeOwned + Default,
    {
        let _guard = self.guard()?;
        self.read_unlocked()
    }

    /// Replaces the document with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`JsonStoreError`] when encoding or the atomic write fails.
    pub fn write<T>(&self, value: &T) -> Result<(), JsonStoreError>
    where
        T: Serialize,
    {
        let _guard = self.guard()?;
        self.write_unlocked(value)
    }

    /// Loads, mutates, and rewrites the document under the lock.
    ///
    /// # Errors
    ///
    /// Returns [`JsonStoreError`] when the read or the write fails; on a failed
    /// write the mutation is lost.
    pub fn update<T, R, F>(&self, mutate: F) -> Result<R, JsonStoreError>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self.guard()?;
        let mut value: T = self.read_unlocked()?;
        let result = mutate(&mut value);
        self.write_unlocked(&value)?;
        Ok(result)
    }

    /// Acquires the document lock.
    fn guard(&self) -> Result<MutexGuard<'_, ()>, JsonStoreError> {
        self.lock
            .lock()
            .map_err(|_| JsonStoreError::Poisoned(self.path.display().to_string()))
    }

    /// Reads without taking the lock.
    fn read_unlocked<T>(&self) -> Result<T, JsonStoreError>
    where
        T: DeserializeOwned + Default,
    {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.log.warn(
                    "store_missing",
                    "document not found; starting empty",
                    &[("path", json!(self.path.display().to_string()))],
                );
                return Ok(T::default());
            }
            Err(err) => return Err(JsonStoreError::Io(err.to_string())),
        };
        if metadata.len() > MAX_DOCUMENT_BYTES {
            return Err(JsonStoreError::TooLarge {
                max_bytes: MAX_DOCUMENT_BYTES,
                actual_bytes: metadata.len(),
            });
        }
        let bytes = fs::read(&self.path).map_err(|err| JsonStoreError::Io(err.to_string()))?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            Err(err) => {
                let quarantine = self.quarantine()?;
                self.log.warn(
                    "store_corrupt_quarantined",
                    &err.to_string(),
                    &[
                        ("path", json!(self.path.display().to_string())),
                        ("quarantine", json!(quarantine.display().to_string())),
                    ],
                );
                Ok(T::default())
            }
        }
    }

    /// Writes without taking the lock.
    fn write_unlocked<T>(&self, value: &T) -> Result<(), JsonStoreError>
    where
        T: Serialize,
    {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| JsonStoreError::Io(err.to_string()))?;
        }
        let mut bytes = Vec::new();
        let formatter = PrettyFormatter::with_indent(INDENT);
        let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
        value.serialize(&mut serializer).map_err(|err| JsonStoreError::Encode(err.to_string()))?;
        let temp_path = sibling(&self.path, "tmp");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|err| JsonStoreError::Io(err.to_string()))?;
        file.write_all(&bytes).map_err(|err| JsonStoreError::Io(err.to_string()))?;
        file.sync_all().map_err(|err| JsonStoreError::Io(err.to_string()))?;
        fs::rename(&temp_path, &self.path).map_err(|err| JsonStoreError::Io(err.to_string()))?;
        Ok(())
    }

    /// Moves the current file aside and returns its new path.
    fn quarantine(&self) -> Result<PathBuf, JsonStoreError> {
        let target = sibling(&self.path, &format!("corrupt-{}", unix_millis()));
        fs::rename(&self.path, &target).map_err(|err| JsonStoreError::Io(err.to_string()))?;
        Ok(target)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns `<path>.<suffix>`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Returns the current unix time in milliseconds.
fn unix_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |duration| duration.as_millis())
}
