//! Loading template sources by name.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::{Error, ErrorKind, Result};

/// A source of templates, resolved by name.
///
/// Names are `/` separated paths relative to the loader's root, for example
/// `partials/nav.html`.
pub trait Loader: Send + Sync {
    /// Returns the source of the template, or `None` if it does not exist.
    fn load(&self, name: &str) -> Result<Option<String>>;

    /// Returns a version stamp for the template, cached templates are reused
    /// as long as the stamp does not change.
    ///
    /// The default implementation returns `None` which disables caching.
    fn version(&self, _name: &str) -> Result<Option<SystemTime>> {
        Ok(None)
    }
}

/// Loads templates from a directory on the filesystem.
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    /// Construct a loader rooted at the given directory.
    ///
    /// If the path points at a file, its parent directory is used.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.is_file() {
            root.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            root
        };
        Self { root }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a template name to a path beneath the root.
    ///
    /// Returns `None` if the file does not exist.
    fn resolve(&self, name: &str) -> Result<Option<PathBuf>> {
        let invalid = |reason: &str| {
            Error::new(
                ErrorKind::InvalidTemplatePath,
                format!("invalid template path {name:?}: {reason}"),
            )
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        let relative = Path::new(name);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => return Err(invalid("`..` is not allowed")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("absolute paths are not allowed"))
                }
            }
        }

        let path = self.root.join(relative);
        let canonical = match path.canonicalize() {
            Ok(path) => path,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let root = self.root.canonicalize()?;
        if !canonical.starts_with(&root) {
            return Err(invalid("path escapes the template root"));
        }
        if !canonical.is_file() {
            return Ok(None);
        }
        Ok(Some(canonical))
    }
}

impl Loader for FileLoader {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let path = match self.resolve(name)? {
            Some(path) => path,
            None => {
                tracing::debug!(name, root = %self.root.display(), "template file not found");
                return Ok(None);
            }
        };
        tracing::debug!(name, path = %path.display(), "loading template file");
        let source = fs::read_to_string(&path).map_err(|err| {
            Error::new(
                ErrorKind::Io,
                format!("failed to read template {name:?}: {err}"),
            )
        })?;
        Ok(Some(source))
    }

    fn version(&self, name: &str) -> Result<Option<SystemTime>> {
        match self.resolve(name)? {
            Some(path) => Ok(fs::metadata(path)?.modified().ok()),
            None => Ok(None),
        }
    }
}
