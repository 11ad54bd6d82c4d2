//! Working-tree filesystem view.
//!
//! All paths are relative to the checkout root and use `/` separators. A
//! leading `/` is accepted and ignored. Anything that would escape the root,
//! or touch git metadata, is rejected before the filesystem is consulted.

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::WorkTreeError;

/// Directory entry returned by [`WorkTree::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEntry {
    pub name: String,
    pub is_dir: bool,
}

/// File metadata returned by [`WorkTree::stat`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeMetadata {
    pub is_dir: bool,
    pub is_file: bool,
    pub len: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Borrowed view over a checkout.
#[derive(Debug)]
pub struct WorkTree<'a> {
    root: &'a Path,
}

impl<'a> WorkTree<'a> {
    pub(crate) fn new(root: &'a Path) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        self.root
    }

    /// Resolves a tree-relative path to an absolute one under the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, WorkTreeError> {
        Ok(self.root.join(normalize(relative)?))
    }

    /// Reads a whole file.
    pub fn open(&self, relative: &str) -> Result<Vec<u8>, WorkTreeError> {
        let path = self.resolve(relative)?;
        fs::read(&path).map_err(|e| WorkTreeError::io(path, relative, e))
    }

    pub fn read_to_string(&self, relative: &str) -> Result<String, WorkTreeError> {
        let path = self.resolve(relative)?;
        fs::read_to_string(&path).map_err(|e| WorkTreeError::io(path, relative, e))
    }

    /// Creates or truncates a file. Parent directories must already exist.
    pub fn create(&self, relative: &str, contents: &[u8]) -> Result<(), WorkTreeError> {
        let path = self.resolve(relative)?;
        if path == self.root {
            return Err(WorkTreeError::InvalidPath(relative.to_string()));
        }
        fs::write(&path, contents).map_err(|e| WorkTreeError::io(path, relative, e))
    }

    /// Removes a file, or an empty directory.
    pub fn remove(&self, relative: &str) -> Result<(), WorkTreeError> {
        let path = self.resolve(relative)?;
        if path == self.root {
            return Err(WorkTreeError::InvalidPath(relative.to_string()));
        }
        let meta =
            fs::symlink_metadata(&path).map_err(|e| WorkTreeError::io(path.clone(), relative, e))?;
        let result = if meta.is_dir() {
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| WorkTreeError::io(path, relative, e))
    }

    pub fn mkdir_all(&self, relative: &str) -> Result<(), WorkTreeError> {
        let path = self.resolve(relative)?;
        fs::create_dir_all(&path).map_err(|e| WorkTreeError::io(path, relative, e))
    }

    /// Lists a directory, sorted by name. The root listing hides `.git`.
    pub fn read_dir(&self, relative: &str) -> Result<Vec<TreeEntry>, WorkTreeError> {
        let path = self.resolve(relative)?;
        let reader = fs::read_dir(&path).map_err(|e| WorkTreeError::io(path.clone(), relative, e))?;

        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|e| WorkTreeError::io(path.clone(), relative, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if path == self.root && name == ".git" {
                continue;
            }
            let is_dir = entry
                .file_type()
                .map(|t| t.is_dir())
                .map_err(|e| WorkTreeError::io(entry.path(), relative, e))?;
            entries.push(TreeEntry { name, is_dir });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub fn stat(&self, relative: &str) -> Result<TreeMetadata, WorkTreeError> {
        let path = self.resolve(relative)?;
        let meta = fs::symlink_metadata(&path).map_err(|e| WorkTreeError::io(path, relative, e))?;
        Ok(TreeMetadata {
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            len: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    /// Whether something exists at the path. Symlinks count even if dangling.
    pub fn exists(&self, relative: &str) -> Result<bool, WorkTreeError> {
        let path = self.resolve(relative)?;
        match fs::symlink_metadata(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(WorkTreeError::io(path, relative, e)),
        }
    }
}

/// Normalizes a tree-relative path, rejecting escapes and git metadata.
///
/// Returns the empty path for the root itself.
pub fn normalize(relative: &str) -> Result<PathBuf, WorkTreeError> {
    if relative.contains('\0') {
        return Err(WorkTreeError::InvalidPath(relative.to_string()));
    }

    let trimmed = relative.trim_start_matches('/');
    let mut normalized = PathBuf::new();

    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => {
                if normalized.as_os_str().is_empty() && part == ".git" {
                    return Err(WorkTreeError::InvalidPath(relative.to_string()));
                }
                normalized.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WorkTreeError::PathTraversal(relative.to_string()));
            }
        }
    }

    Ok(normalized)
}

/// Converts a normalized path back to the `/`-separated form git uses.
pub fn to_tree_path(relative: &str) -> Result<String, WorkTreeError> {
    let normalized = normalize(relative)?;
    let parts: Vec<String> = normalized
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        return Err(WorkTreeError::InvalidPath(relative.to_string()));
    }
    Ok(parts.join("/"))
}
