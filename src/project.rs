use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::MendError;

/// The application checkout being repaired.
#[derive(Clone, Debug)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    /// Accepts `dir` only if it carries the root marker file (e.g. `manage.py`).
    pub fn locate(dir: &Path, root_marker: &str) -> Result<Self, MendError> {
        if !dir.join(root_marker).is_file() {
            return Err(MendError::MissingProjectRoot {
                marker: root_marker.to_owned(),
                dir: dir.display().to_string(),
            });
        }

        debug!("Project root: {}", dir.display());
        Ok(Project {
            root: dir.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Migration names found in `dir`, sorted: the stem of every `.py` file
    /// except dunder modules such as `__init__.py`.
    pub fn migration_files(dir: &Path) -> Result<Vec<String>, MendError> {
        if !dir.is_dir() {
            return Err(MendError::NotFound(format!(
                "migration directory '{}' does not exist",
                dir.display()
            )));
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with("__") {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort();

        Ok(names)
    }

    /// Migration names used for the on-disk orphan check. A missing directory
    /// is reported and yields `None`, which turns the check off.
    pub fn migration_file_set(dir: &Path) -> Result<Option<HashSet<String>>, MendError> {
        if !dir.is_dir() {
            warn!(
                "Migration directory '{}' not found, skipping the migration file check",
                dir.display()
            );
            return Ok(None);
        }

        Ok(Some(Self::migration_files(dir)?.into_iter().collect()))
    }
}
