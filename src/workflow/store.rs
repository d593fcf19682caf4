//! Crash-safe JSON persistence of workflow instances, one file per id.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::state::WorkflowState;
use crate::error::StoreError;

/// Directory-backed store of [`WorkflowState`] documents.
///
/// Ids are sanitized before use as file names: every character outside
/// `[A-Za-z0-9_-]` becomes `_`, so distinct raw ids can collide.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_id(id)))
    }

    /// The stored state, or `None` when absent or unreadable.
    pub fn load(&self, id: &str) -> Option<WorkflowState> {
        let path = self.path_for(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read workflow state");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse workflow state");
                None
            }
        }
    }

    /// Writes `<path>.tmp` then renames it over `<path>`, so a crash never
    /// leaves a half-written state behind.
    pub fn save(&self, id: &str, state: &WorkflowState) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            action: "create",
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(id);
        let tmp_path = tmp_path_for(&path);
        let body = serde_json::to_vec_pretty(state)?;

        let result = write_synced(&tmp_path, &body)
            .map_err(|source| StoreError::Io {
                action: "write",
                path: tmp_path.clone(),
                source,
            })
            .and_then(|()| {
                fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io {
                    action: "rename",
                    path: path.clone(),
                    source,
                })
            });

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    /// Removes the stored state. Deleting a missing id is not an error.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                action: "delete",
                path,
                source,
            }),
        }
    }

    /// Stored (sanitized) ids in lexical order; empty if the directory does
    /// not exist.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    action: "list",
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_synced(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(body)?;
    file.sync_all()
}
