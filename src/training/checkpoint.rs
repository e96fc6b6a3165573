//! Checkpoint layout and restoration
//!
//! A checkpoint is a directory with one file per field. Restoration walks a
//! declarative field table: every field is attempted independently, and a
//! field that is missing or unreadable is logged and skipped rather than
//! failing the whole load.

use std::fs;
use std::path::{Path, PathBuf};

use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use crate::utils::error::{BdaError, Result};

/// Recorder used for model and optimizer fields
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Directory name of the checkpoint written at a new best accuracy
pub const BEST_CHECKPOINT: &str = "model_best";

/// Directory name of the checkpoint written at other evaluation iterations
pub const LATEST_CHECKPOINT: &str = "latest_model";

/// Contents of the `it` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub it: usize,
}

/// One named entry of a checkpoint and how to put it back into `S`
pub struct CheckpointField<S> {
    pub name: &'static str,
    /// Required fields are reported with `warn!` when they cannot be restored
    pub required: bool,
    pub load: fn(&mut S, &Path) -> Result<()>,
}

/// Which fields a restore brought back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub restored: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Restore every field of `fields` found in `dir` into `state`.
///
/// Only a missing checkpoint directory is an error.
pub fn restore<S>(state: &mut S, dir: &Path, fields: &[CheckpointField<S>]) -> Result<LoadReport> {
    if !dir.is_dir() {
        return Err(BdaError::PathNotFound(dir.to_path_buf()));
    }

    let mut report = LoadReport::default();
    for field in fields {
        match (field.load)(state, &dir.join(field.name)) {
            Ok(()) => report.restored.push(field.name),
            Err(e) => {
                if field.required {
                    warn!("Checkpoint field '{}' not restored from {:?}: {}", field.name, dir, e);
                } else {
                    info!("Optional checkpoint field '{}' not restored: {}", field.name, e);
                }
                report.skipped.push(field.name);
            }
        }
    }

    info!(
        "Restored {}/{} checkpoint fields from {:?}",
        report.restored.len(),
        fields.len(),
        dir
    );
    Ok(report)
}

/// `checkpoint_root/name`, created if needed
pub fn prepare_dir(checkpoint_root: &Path, name: &str) -> Result<PathBuf> {
    let dir = checkpoint_root.join(name);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Write a JSON field as `<path>.json`
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path.with_extension("json"), json)?;
    Ok(())
}

/// Read a JSON field written by [`write_json`]
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let path = path.with_extension("json");
    if !path.exists() {
        return Err(BdaError::PathNotFound(path));
    }
    let json = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct Toy {
        it: usize,
        label: String,
    }

    fn fields() -> Vec<CheckpointField<Toy>> {
        vec![
            CheckpointField {
                name: "it",
                required: true,
                load: |toy, path| {
                    toy.it = read_json::<IterationRecord>(path)?.it;
                    Ok(())
                },
            },
            CheckpointField {
                name: "label",
                required: false,
                load: |toy, path| {
                    toy.label = read_json(path)?;
                    Ok(())
                },
            },
        ]
    }

    #[test]
    fn test_restore_all_fields() {
        let root = TempDir::new().unwrap();
        let dir = prepare_dir(root.path(), LATEST_CHECKPOINT).unwrap();
        write_json(&dir.join("it"), &IterationRecord { it: 42 }).unwrap();
        write_json(&dir.join("label"), &"run-a").unwrap();

        let mut toy = Toy::default();
        let report = restore(&mut toy, &dir, &fields()).unwrap();

        assert!(report.is_complete());
        assert_eq!(toy.it, 42);
        assert_eq!(toy.label, "run-a");
    }

    #[test]
    fn test_missing_field_keeps_prior_value() {
        let root = TempDir::new().unwrap();
        let dir = prepare_dir(root.path(), BEST_CHECKPOINT).unwrap();
        write_json(&dir.join("label"), &"run-b").unwrap();

        let mut toy = Toy {
            it: 7,
            label: String::new(),
        };
        let report = restore(&mut toy, &dir, &fields()).unwrap();

        assert_eq!(report.skipped, vec!["it"]);
        assert_eq!(toy.it, 7);
        assert_eq!(toy.label, "run-b");
    }

    #[test]
    fn test_corrupt_field_is_skipped() {
        let root = TempDir::new().unwrap();
        let dir = prepare_dir(root.path(), LATEST_CHECKPOINT).unwrap();
        fs::write(dir.join("it.json"), "{ not json").unwrap();
        write_json(&dir.join("label"), &"run-c").unwrap();

        let mut toy = Toy::default();
        let report = restore(&mut toy, &dir, &fields()).unwrap();

        assert_eq!(report.restored, vec!["label"]);
        assert_eq!(report.skipped, vec!["it"]);
        assert_eq!(toy.it, 0);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let root = TempDir::new().unwrap();
        let mut toy = Toy::default();
        let err = restore(&mut toy, &root.path().join("nope"), &fields()).unwrap_err();
        assert!(matches!(err, BdaError::PathNotFound(_)));
    }
}
