//! Hierarchical path naming for the distributed filesystem.
//!
//! A [`Path`] is an immutable ordered list of non-empty components, none of
//! which may contain `/` or `:`. The empty list names the root. Paths are the
//! unit of naming in every remote interface, so they serialize and order
//! deterministically: the derived ordering is componentwise lexicographic
//! with shorter-is-smaller on ties, which places every ancestor before its
//! descendants.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by path construction and local-directory enumeration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    /// The path string or component violates the path grammar.
    #[error("invalid path: {0}")]
    InvalidArgument(String),
    /// The local directory to enumerate does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The local-directory walk failed partway.
    #[error("i/o failure while listing: {0}")]
    Io(String),
}

/// An immutable hierarchical name in the distributed filesystem.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Path {
    components: Vec<String>,
}

impl Path {
    /// The root path, with no components.
    pub fn root() -> Self {
        Path { components: Vec::new() }
    }

    /// Extends `parent` by a single component.
    pub fn new(parent: &Path, component: &str) -> Result<Path, PathError> {
        validate_component(component)?;
        let mut components = parent.components.clone();
        components.push(component.to_owned());
        Ok(Path { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// The path naming this path's parent directory.
    pub fn parent(&self) -> Result<Path, PathError> {
        if self.is_root() {
            return Err(PathError::InvalidArgument("root has no parent".into()));
        }
        Ok(Path { components: self.components[..self.components.len() - 1].to_vec() })
    }

    /// The final component.
    pub fn last(&self) -> Result<&str, PathError> {
        self.components
            .last()
            .map(String::as_str)
            .ok_or_else(|| PathError::InvalidArgument("root has no last component".into()))
    }

    /// True iff `other` is a prefix of this path, i.e. this path lies at or
    /// beneath `other` in the tree.
    pub fn is_subpath(&self, other: &Path) -> bool {
        other.components.len() <= self.components.len()
            && self.components[..other.components.len()] == other.components[..]
    }

    /// Iterates over the components from the root outward.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    /// Maps this path into a local filesystem path beneath `root`.
    pub fn to_local(&self, root: &std::path::Path) -> PathBuf {
        let mut local = root.to_path_buf();
        for component in &self.components {
            local.push(component);
        }
        local
    }

    /// Enumerates every regular file beneath the local directory `root` as a
    /// relative [`Path`].
    pub async fn list(root: &std::path::Path) -> Result<Vec<Path>, PathError> {
        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|_| PathError::NotFound(format!("{}", root.display())))?;
        if !metadata.is_dir() {
            return Err(PathError::InvalidArgument(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut found = Vec::new();
        let mut pending = vec![(root.to_path_buf(), Path::root())];
        while let Some((local, relative)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&local)
                .await
                .map_err(|err| PathError::Io(err.to_string()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| PathError::Io(err.to_string()))?
            {
                let name = entry.file_name();
                let name = name
                    .to_str()
                    .ok_or_else(|| PathError::Io("non-utf8 file name".into()))?;
                let child = Path::new(&relative, name)?;
                let file_type =
                    entry.file_type().await.map_err(|err| PathError::Io(err.to_string()))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), child));
                } else if file_type.is_file() {
                    found.push(child);
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

fn validate_component(component: &str) -> Result<(), PathError> {
    if component.is_empty() {
        return Err(PathError::InvalidArgument("empty component".into()));
    }
    if component.contains('/') || component.contains(':') {
        return Err(PathError::InvalidArgument(format!(
            "component {component:?} contains a separator or colon"
        )));
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with('/') {
            return Err(PathError::InvalidArgument(format!(
                "path {s:?} does not begin with /"
            )));
        }
        if s.contains(':') {
            return Err(PathError::InvalidArgument(format!("path {s:?} contains a colon")));
        }
        let components =
            s.split('/').filter(|segment| !segment.is_empty()).map(str::to_owned).collect();
        Ok(Path { components })
    }
}
