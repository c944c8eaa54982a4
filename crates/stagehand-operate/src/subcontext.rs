//! Typed, keyed checkpoint files under an operation's staging folder.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::SubcontextError;

/// A step's checkpoint payload, persisted under [`KEY`](Self::KEY).
///
/// Payloads should deny unknown fields so that a shape change is reported
/// instead of silently defaulted.
pub trait Subcontext: Serialize + DeserializeOwned + Send + 'static {
    /// Storage key. Must match `[A-Za-z0-9_-]+` and be unique per operation.
    const KEY: &'static str;
}

/// One JSON file per key in a checkpoint directory.
pub struct SubcontextStore {
    dir: PathBuf,
    claims: Mutex<HashMap<&'static str, (TypeId, &'static str)>>,
}

impl SubcontextStore {
    /// Store rooted at `dir`. Nothing is created until the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `value`, atomically replacing any previous payload.
    pub fn save<S: Subcontext>(&self, value: &S) -> Result<(), SubcontextError> {
        let path = self.claim::<S>()?;
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| SubcontextError::Encode {
            key: S::KEY.to_owned(),
            source,
        })?;
        let io_err = |source| SubcontextError::Io {
            key: S::KEY.to_owned(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let tmp = self.dir.join(format!("{}.json.tmp", S::KEY));
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        debug!(key = S::KEY, bytes = bytes.len(), "saved subcontext");
        Ok(())
    }

    /// Load the persisted payload into `value`.
    ///
    /// Returns `false` and leaves `value` untouched when nothing is persisted.
    pub fn load<S: Subcontext>(&self, value: &mut S) -> Result<bool, SubcontextError> {
        let path = self.claim::<S>()?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(SubcontextError::Io {
                    key: S::KEY.to_owned(),
                    source,
                });
            }
        };
        *value = serde_json::from_slice(&bytes).map_err(|source| SubcontextError::Shape {
            key: S::KEY.to_owned(),
            source,
        })?;
        debug!(key = S::KEY, "loaded subcontext");
        Ok(true)
    }

    /// Keys currently persisted, sorted.
    pub fn keys(&self) -> Result<Vec<String>, std::io::Error> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                keys.push(key.to_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Delete every checkpoint. Missing directories are fine.
    pub fn clear(&self) -> Result<(), std::io::Error> {
        match std::fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn claim<S: Subcontext>(&self) -> Result<PathBuf, SubcontextError> {
        validate_key(S::KEY)?;
        let mut claims = self.claims.lock();
        let (owner_id, owner) = *claims
            .entry(S::KEY)
            .or_insert((TypeId::of::<S>(), type_name::<S>()));
        if owner_id != TypeId::of::<S>() {
            return Err(SubcontextError::KeyClaimed {
                key: S::KEY.to_owned(),
                owner,
                claimant: type_name::<S>(),
            });
        }
        Ok(self.dir.join(format!("{}.json", S::KEY)))
    }
}

fn validate_key(key: &str) -> Result<(), SubcontextError> {
    let valid = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(SubcontextError::InvalidKey(key.to_owned()))
    }
}
