//! Manifest directory loading.
//!
//! Copies eligible files into a unique scratch directory, preserving
//! modification times so the source-epoch timestamp survives the copy.
//! The scratch directory is removed on every exit path by the owned
//! [`tempfile::TempDir`] guard.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::ManifestError;

const ELIGIBLE_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

#[derive(Debug, Clone)]
struct FileWithModTime {
    path: PathBuf,
    mtime: SystemTime,
}

/// Recursive manifest directory loader.
pub struct ManifestLoader {
    from_path: PathBuf,
    scratch: Option<TempDir>,
    files: Vec<FileWithModTime>,
    rel_paths: BTreeMap<String, PathBuf>,
}

impl ManifestLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            from_path: path.into(),
            scratch: None,
            files: Vec::new(),
            rel_paths: BTreeMap::new(),
        }
    }

    /// Copy every eligible file into a fresh scratch directory.
    pub fn load(&mut self) -> Result<(), ManifestError> {
        let sources = eligible_files(&self.from_path)?;
        if sources.is_empty() {
            return Err(ManifestError::NoEligibleFiles(self.from_path.clone()));
        }

        let scratch = tempfile::Builder::new()
            .prefix("spindle-manifest-loader-")
            .tempdir()?;

        self.rel_paths.clear();
        for source in &sources {
            let relative = source
                .path
                .strip_prefix(&self.from_path)
                .unwrap_or(&source.path);
            let destination = scratch.path().join(relative);
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&source.path, &destination)?;
            filetime::set_file_mtime(&destination, FileTime::from_system_time(source.mtime))?;
            self.rel_paths
                .insert(slash_path(relative), source.path.clone());
        }

        self.files = eligible_files(scratch.path())?;
        self.scratch = Some(scratch);
        tracing::debug!(
            dir = %self.from_path.display(),
            files = self.files.len(),
            "loaded manifest directory"
        );
        Ok(())
    }

    /// Absolute paths inside the scratch directory, ordered by
    /// (mtime ascending, path ascending).
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// The scratch directory and the relative paths under it.
    pub fn rel_paths(&self) -> (PathBuf, Vec<String>) {
        let dir = self
            .scratch
            .as_ref()
            .map(|s| s.path().to_path_buf())
            .unwrap_or_default();
        (dir, self.rel_paths.keys().cloned().collect())
    }

    pub fn contains_rel_path(&self, path: &str) -> bool {
        self.rel_paths.contains_key(path)
    }

    /// The (path, mtime) of the most recently modified eligible file,
    /// used as the artefact's source-epoch timestamp. Ties break to the
    /// ascending-path-first file.
    pub fn most_recently_modified(&self) -> Option<(PathBuf, DateTime<Utc>)> {
        let max_mtime = self.files.iter().map(|f| f.mtime).max()?;
        self.files
            .iter()
            .find(|f| f.mtime == max_mtime)
            .map(|f| (f.path.clone(), DateTime::<Utc>::from(f.mtime)))
    }

    /// Remove the scratch directory. Dropping the loader has the same
    /// effect; this surfaces removal errors instead of swallowing them.
    pub fn cleanup(mut self) -> Result<(), ManifestError> {
        if let Some(scratch) = self.scratch.take() {
            scratch.close()?;
        }
        Ok(())
    }
}

fn is_eligible(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ELIGIBLE_EXTENSIONS.contains(&ext))
}

fn eligible_files(path: &Path) -> Result<Vec<FileWithModTime>, ManifestError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            ManifestError::Io(std::io::Error::other(format!(
                "failed to walk {}: {e}",
                path.display()
            )))
        })?;
        if !entry.file_type().is_file() || !is_eligible(entry.path()) {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| {
            ManifestError::Io(std::io::Error::other(format!(
                "failed to stat {}: {e}",
                entry.path().display()
            )))
        })?;
        files.push(FileWithModTime {
            path: entry.path().to_path_buf(),
            mtime: metadata.modified()?,
        });
    }
    files.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
