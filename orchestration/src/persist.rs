//! Small-state JSON persistence with atomic replace.
//!
//! The engine itself only persists feature flags and the participant
//! registry; both are small JSON files written via a temp file and rename so
//! readers never observe a partial write.

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

use crate::error::{CoreError, CoreResult};

/// Serialize `value` to `path`, replacing any existing file atomically.
pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CoreError::internal(format!("serialize {}: {e}", path.display())))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::internal(format!("mkdir {}: {e}", parent.display())))?;
        }
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)
        .map_err(|e| CoreError::internal(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| CoreError::internal(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

/// Load a JSON file, returning `None` when it does not exist yet.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> CoreResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CoreError::internal(format!("read {}: {e}", path.display())))?;
    let value = serde_json::from_str(&raw)
        .map_err(|e| CoreError::internal(format!("parse {}: {e}", path.display())))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let value = Sample { name: "alpha".into(), count: 3 };
        save_json_atomic(&path, &value).unwrap();

        let loaded: Option<Sample> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Sample> = load_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_replace_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        save_json_atomic(&path, &Sample { name: "a".into(), count: 1 }).unwrap();
        save_json_atomic(&path, &Sample { name: "b".into(), count: 2 }).unwrap();

        let loaded: Option<Sample> = load_json(&path).unwrap();
        assert_eq!(loaded.unwrap().name, "b");
        assert!(!path.with_extension("tmp").exists());
    }
}
