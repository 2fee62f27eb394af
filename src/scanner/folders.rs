//! Top-level folder index of the browsed tree.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::FolderConfig;

/// Folder names mapped to absolute paths, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderListing {
    pub folders: BTreeMap<String, PathBuf>,
    /// Set when the root could not be listed.
    pub warning: Option<String>,
}

impl FolderListing {
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.folders.get(name).map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.folders.keys().map(String::as_str)
    }
}

/// Lists the immediate subdirectories of the configured root.
#[derive(Debug, Clone)]
pub struct FolderIndex {
    root: PathBuf,
    include_root: bool,
    root_label: String,
    /// Directory names never offered as folders (the thumbnail sidecar).
    hidden: Vec<String>,
}

impl FolderIndex {
    pub fn new(root: PathBuf, config: &FolderConfig, sidecar_name: &str) -> Self {
        Self {
            root,
            include_root: config.include_root,
            root_label: config.root_label.clone(),
            hidden: vec![sidecar_name.to_string()],
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Label of the whole-tree entry, when it is enabled.
    pub fn root_label(&self) -> Option<&str> {
        self.include_root.then_some(self.root_label.as_str())
    }

    /// List folders. Never fails: a listing error yields what could be
    /// gathered plus a warning.
    pub fn list_folders(&self) -> FolderListing {
        let mut listing = FolderListing::default();

        match fs::read_dir(&self.root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !path.is_dir() {
                        continue;
                    }
                    let Ok(name) = entry.file_name().into_string() else {
                        continue;
                    };
                    if self.hidden.contains(&name) {
                        continue;
                    }
                    listing.folders.insert(name, path);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list folders in {:?}: {}", self.root, e);
                listing.warning = Some(format!("Cannot read {}: {}", self.root.display(), e));
            }
        }

        // Inserted last so the reserved label always maps to the root
        if let Some(label) = self.root_label() {
            listing.folders.insert(label.to_string(), self.root.clone());
        }

        listing
    }

    /// Resolve a selector to a folder, falling back to the root.
    ///
    /// Returns the selected name (empty for the fallback) and its path.
    pub fn select<'a>(
        &'a self,
        listing: &'a FolderListing,
        selector: Option<&str>,
    ) -> (String, &'a Path) {
        match selector.and_then(|name| listing.get(name).map(|path| (name, path))) {
            Some((name, path)) => (name.to_string(), path),
            None => (String::new(), self.root.as_path()),
        }
    }
}
