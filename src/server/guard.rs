//! Path confinement for client-supplied paths.
//!
//! Every path is resolved against a canonical root. `.` and `..` segments
//! are folded lexically and any escape above the root is denied before the
//! filesystem is touched. The surviving path is then canonicalized so that
//! symbolic links pointing outside the root are denied as well.

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("path {requested:?} escapes {root}")]
    Forbidden { root: PathBuf, requested: String },

    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("cannot resolve {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolves relative paths inside a fixed root directory.
#[derive(Debug, Clone)]
pub struct PathGuard {
    /// Canonicalized root.
    root: PathBuf,
}

impl PathGuard {
    /// Canonicalize `root` once; all checks compare against this form.
    pub fn new(root: &Path) -> Result<Self, GuardError> {
        let root = root.canonicalize().map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => GuardError::NotFound(root.to_path_buf()),
            _ => GuardError::Io {
                path: root.to_path_buf(),
                source,
            },
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `requested` to a canonical path equal to or below the root.
    ///
    /// Escapes are `Forbidden` whether or not the target exists. A confined
    /// path that does not exist is `NotFound`.
    pub fn resolve(&self, requested: impl AsRef<Path>) -> Result<PathBuf, GuardError> {
        let requested = requested.as_ref();
        let forbidden = || GuardError::Forbidden {
            root: self.root.clone(),
            requested: requested.to_string_lossy().into_owned(),
        };

        if requested.as_os_str().to_string_lossy().contains('\0') {
            return Err(forbidden());
        }
        let relative = normalize(requested).ok_or_else(forbidden)?;
        let candidate = self.root.join(&relative);

        match candidate.canonicalize() {
            Ok(canonical) if canonical.starts_with(&self.root) => Ok(canonical),
            Ok(_) => Err(forbidden()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(GuardError::Io {
                path: candidate,
                source: e,
            }),
            Err(_) => {
                // Dangling path: its deepest existing ancestor decides confinement
                if self.nearest_existing_ancestor_escapes(&candidate) {
                    Err(forbidden())
                } else {
                    Err(GuardError::NotFound(candidate))
                }
            }
        }
    }

    fn nearest_existing_ancestor_escapes(&self, candidate: &Path) -> bool {
        candidate
            .ancestors()
            .skip(1)
            .find_map(|ancestor| ancestor.canonicalize().ok())
            .map(|canonical| !canonical.starts_with(&self.root))
            .unwrap_or(true)
    }
}

/// Resolve `requested` inside `root` in one step.
pub fn resolve(root: &Path, requested: impl AsRef<Path>) -> Result<PathBuf, GuardError> {
    PathGuard::new(root)?.resolve(requested)
}

/// Fold `.` and `..` segments. `None` when the path is absolute or climbs
/// above its starting point.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}
