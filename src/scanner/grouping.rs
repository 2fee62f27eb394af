use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::notes::Note;
use super::thumbnails::ThumbnailCache;
use super::Role;
use crate::config::ScannerConfig;
use crate::server::guard::{GuardError, PathGuard};

/// Groups keyed by case-folded stem; iteration order is the display order.
pub type GroupMap = BTreeMap<String, AssetGroup>;

/// Size and creation time of a model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStat {
    Known {
        size_bytes: u64,
        created_at: DateTime<Local>,
    },
    Unknown,
}

impl FileStat {
    pub fn of(path: &Path) -> Self {
        let Ok(meta) = fs::metadata(path) else {
            return FileStat::Unknown;
        };
        match meta.created().or_else(|_| meta.modified()) {
            Ok(time) => FileStat::Known {
                size_bytes: meta.len(),
                created_at: time.into(),
            },
            Err(_) => FileStat::Unknown,
        }
    }

    pub fn size_bytes(&self) -> Option<u64> {
        match self {
            FileStat::Known { size_bytes, .. } => Some(*size_bytes),
            FileStat::Unknown => None,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Local>> {
        match self {
            FileStat::Known { created_at, .. } => Some(*created_at),
            FileStat::Unknown => None,
        }
    }

    /// Size in MiB with one decimal, e.g. `144.0MB`.
    pub fn size_display(&self) -> String {
        match self.size_bytes() {
            Some(bytes) => format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0)),
            None => "unknown".to_string(),
        }
    }

    /// Creation time at minute precision.
    pub fn created_display(&self) -> String {
        match self.created_at() {
            Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
            None => "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFile {
    pub file_name: String,
    /// Lowercased extension without the dot.
    pub extension: String,
    pub stat: FileStat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub file_name: String,
    /// Thumbnail path relative to the scanned directory, if already cached.
    pub thumbnail: Option<String>,
}

/// All files in one directory sharing a stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetGroup {
    /// Case-folded stem.
    pub stem: String,
    /// Stem as spelled by the model file, or by the first file seen.
    pub display_name: String,
    pub model: Option<ModelFile>,
    pub note: Option<Note>,
    pub image: Option<String>,
    pub video: Option<VideoFile>,
}

impl AssetGroup {
    fn new(stem: String, display_name: String) -> Self {
        Self {
            stem,
            display_name,
            model: None,
            note: None,
            image: None,
            video: None,
        }
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.video.as_ref()?.thumbnail.as_deref()
    }
}

/// Partitions a directory's files into groups by shared stem.
#[derive(Clone)]
pub struct AssetGrouper {
    config: ScannerConfig,
    thumbnails: Option<Arc<ThumbnailCache>>,
    /// Files resolving outside this guard's root are left out of every group.
    guard: Option<PathGuard>,
}

impl AssetGrouper {
    pub fn new(config: ScannerConfig, thumbnails: Arc<ThumbnailCache>) -> Self {
        Self {
            config,
            thumbnails: Some(thumbnails),
            guard: None,
        }
    }

    /// Grouper that records videos without looking up thumbnails.
    pub fn without_thumbnails(config: ScannerConfig) -> Self {
        Self {
            config,
            thumbnails: None,
            guard: None,
        }
    }

    /// Skip files whose link target lies outside `guard`'s root.
    ///
    /// Checked before any note is read or any video is handed to the
    /// thumbnail cache.
    pub fn confined_to(mut self, guard: PathGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Scan the immediate files of `directory`.
    ///
    /// A missing or unreadable directory yields an empty map. Subdirectories
    /// are never descended into.
    pub fn group_assets(&self, directory: &Path) -> GroupMap {
        let mut groups = GroupMap::new();

        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                if directory.exists() {
                    tracing::warn!("Failed to read directory {:?}: {}", directory, e);
                }
                return groups;
            }
        };

        let mut files: Vec<String> = entries
            .flatten()
            .filter_map(|entry| self.admit(directory, &entry))
            .collect();
        files.sort();

        for file_name in files {
            let path = directory.join(&file_name);
            let (Some(stem), Some(ext)) = (path.file_stem(), path.extension()) else {
                continue;
            };
            let stem = stem.to_string_lossy().into_owned();
            let ext = ext.to_string_lossy().to_lowercase();
            let Some(role) = Role::classify(&ext, &self.config) else {
                continue;
            };

            let group = groups
                .entry(stem.to_lowercase())
                .or_insert_with_key(|key| AssetGroup::new(key.clone(), stem.clone()));

            match role {
                Role::Model => {
                    group.display_name = stem;
                    group.model = Some(ModelFile {
                        stat: FileStat::of(&path),
                        file_name,
                        extension: ext,
                    });
                }
                Role::Note => {
                    group.note = Some(Note::read(
                        &path,
                        &file_name,
                        self.config.note_collapse_lines,
                    ));
                }
                Role::Image => {
                    group.image = Some(file_name);
                }
                Role::Video => {
                    let thumbnail = self.thumbnail_for(&path);
                    group.video = Some(VideoFile {
                        file_name,
                        thumbnail,
                    });
                }
            }
        }

        groups
    }

    /// Name of a directory entry that may be grouped.
    ///
    /// Directories, special files and links escaping the guard are refused.
    /// A dangling link is kept: its group is still shown and every read of
    /// it fails softly.
    fn admit(&self, directory: &Path, entry: &fs::DirEntry) -> Option<String> {
        let file_type = entry.file_type().ok()?;
        if file_type.is_dir() {
            return None;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::warn!("Skipping file with non UTF-8 name {:?} in {:?}", raw, directory);
                return None;
            }
        };
        let path = entry.path();

        match &self.guard {
            Some(guard) => {
                let relative = path.strip_prefix(guard.root()).unwrap_or(path.as_path());
                match guard.resolve(relative) {
                    Ok(resolved) => return resolved.is_file().then_some(name),
                    Err(GuardError::NotFound(_)) => {}
                    Err(e) => {
                        tracing::warn!("Skipping {:?}: {}", path, e);
                        return None;
                    }
                }
            }
            None if path.is_file() => return Some(name),
            None => {}
        }

        let dangling = file_type.is_symlink() && fs::metadata(&path).is_err();
        dangling.then_some(name)
    }

    fn thumbnail_for(&self, video: &Path) -> Option<String> {
        let cache = self.thumbnails.as_ref()?;
        cache.get_or_schedule(video)?;
        let relative = cache.relative_path(video)?;
        // Served through /file/, which takes forward slashes on every platform
        Some(relative.to_string_lossy().replace('\\', "/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThumbnailConfig;
    use crate::scanner::extract::{ExtractError, FrameExtractor};
    use crate::tasks::JobState;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    struct WriteJpeg;

    impl FrameExtractor for WriteJpeg {
        fn extract(&self, _video: &Path, destination: &Path) -> Result<(), ExtractError> {
            fs::write(destination, b"jpeg")?;
            Ok(())
        }
    }

    fn grouper() -> (AssetGrouper, Arc<ThumbnailCache>) {
        let cache = Arc::new(ThumbnailCache::with_extractor(
            &ThumbnailConfig::default(),
            Arc::new(WriteJpeg),
        ));
        (
            AssetGrouper::new(ScannerConfig::default(), cache.clone()),
            cache,
        )
    }

    #[test]
    fn test_model_note_and_image_share_group() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("foo.safetensors"), vec![0u8; 2048]).unwrap();
        fs::write(dir.path().join("foo.txt"), "hello").unwrap();
        fs::write(dir.path().join("foo.png"), b"png").unwrap();

        let (grouper, _) = grouper();
        let groups = grouper.group_assets(dir.path());

        assert_eq!(groups.len(), 1);
        let foo = &groups["foo"];
        let model = foo.model.as_ref().unwrap();
        assert_eq!(model.file_name, "foo.safetensors");
        assert_eq!(model.extension, "safetensors");
        assert_eq!(model.stat.size_bytes(), Some(2048));
        assert!(model.stat.created_at().is_some());
        assert_eq!(foo.note.as_ref().unwrap().display_text(), "hello");
        assert_eq!(foo.image.as_deref(), Some("foo.png"));
        assert!(foo.video.is_none());
        assert!(foo.thumbnail().is_none());
    }

    #[test]
    fn test_stems_fold_case() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Foo.PT"), b"weights").unwrap();
        fs::write(dir.path().join("foo.txt"), "note").unwrap();

        let (grouper, _) = grouper();
        let groups = grouper.group_assets(dir.path());

        assert_eq!(groups.len(), 1);
        let foo = &groups["foo"];
        assert_eq!(foo.display_name, "Foo");
        assert_eq!(foo.model.as_ref().unwrap().file_name, "Foo.PT");
        assert_eq!(foo.model.as_ref().unwrap().extension, "pt");
        assert_eq!(foo.note.as_ref().unwrap().display_text(), "note");
    }

    #[test]
    fn test_every_matching_file_lands_in_exactly_one_group() {
        let dir = tempdir().unwrap();
        let names = [
            "alpha.ckpt",
            "alpha.jpg",
            "Beta.pth",
            "beta.TXT",
            "gamma.webp",
            "delta.bin",
            "delta.mkv",
            "readme.md",
            "noext",
        ];
        for name in names {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.ckpt")).unwrap();

        let (grouper, _) = grouper();
        let groups = grouper.group_assets(dir.path());

        let mut seen: Vec<String> = Vec::new();
        for group in groups.values() {
            seen.extend(group.model.iter().map(|m| m.file_name.clone()));
            seen.extend(group.note.iter().map(|n| n.file_name.clone()));
            seen.extend(group.image.iter().cloned());
            seen.extend(group.video.iter().map(|v| v.file_name.clone()));
        }
        seen.sort();

        let mut expected = vec![
            "alpha.ckpt",
            "alpha.jpg",
            "Beta.pth",
            "beta.TXT",
            "gamma.webp",
            "delta.bin",
            "delta.mkv",
        ];
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(
            groups.keys().collect::<Vec<_>>(),
            vec!["alpha", "beta", "delta", "gamma"]
        );
    }

    #[test]
    fn test_model_less_group_has_no_stat() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("model.safetensors"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("orphan.png"), b"png").unwrap();

        let (grouper, _) = grouper();
        let groups = grouper.group_assets(dir.path());

        let orphan = &groups["orphan"];
        assert!(orphan.model.is_none());
        assert_eq!(orphan.image.as_deref(), Some("orphan.png"));
        assert_eq!(orphan.display_name, "orphan");
    }

    #[test]
    fn test_missing_and_empty_directories_are_empty() {
        let dir = tempdir().unwrap();
        let (grouper, _) = grouper();

        assert!(grouper.group_assets(&dir.path().join("missing")).is_empty());
        assert!(grouper.group_assets(dir.path()).is_empty());

        fs::write(dir.path().join("notes.md"), "no matching roles").unwrap();
        assert!(grouper.group_assets(dir.path()).is_empty());
    }

    #[test]
    fn test_video_thumbnail_appears_after_generation() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("bar.mp4");
        fs::write(&video, b"video").unwrap();

        let (grouper, cache) = grouper();
        let first = grouper.group_assets(dir.path());
        assert_eq!(first["bar"].video.as_ref().unwrap().file_name, "bar.mp4");
        assert_eq!(first["bar"].thumbnail(), None);

        assert_eq!(cache.wait_for(&video, Duration::from_secs(5)), JobState::Ready);

        let second = grouper.group_assets(dir.path());
        assert_eq!(second["bar"].thumbnail(), Some(".thumbnails/bar.jpg"));
        // The sidecar directory is not scanned as a group
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_without_thumbnails_never_schedules() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("clip.mp4"), b"video").unwrap();

        let grouper = AssetGrouper::without_thumbnails(ScannerConfig::default());
        let groups = grouper.group_assets(dir.path());

        assert_eq!(groups["clip"].thumbnail(), None);
        assert!(!dir.path().join(".thumbnails").exists());
    }

    /// Canonical root holding a `models` folder, guarded at the root.
    #[cfg(unix)]
    fn confined_fixture() -> (tempfile::TempDir, PathBuf, AssetGrouper, Arc<ThumbnailCache>) {
        let temp = tempdir().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("models")).unwrap();
        let root = root.canonicalize().unwrap();
        fs::write(temp.path().join("secret.txt"), "outside the tree").unwrap();
        fs::write(temp.path().join("secret.mp4"), b"outside video").unwrap();

        let (grouper, cache) = grouper();
        let grouper = grouper.confined_to(PathGuard::new(&root).unwrap());
        (temp, root, grouper, cache)
    }

    #[cfg(unix)]
    #[test]
    fn test_links_leaving_the_root_are_not_grouped() {
        use std::os::unix::fs::symlink;

        let (temp, root, grouper, cache) = confined_fixture();
        let models = root.join("models");
        fs::write(models.join("foo.safetensors"), b"weights").unwrap();
        symlink(temp.path().join("secret.txt"), models.join("foo.txt")).unwrap();
        symlink(temp.path().join("secret.mp4"), models.join("foo.mp4")).unwrap();

        let groups = grouper.group_assets(&models);

        let foo = &groups["foo"];
        assert!(foo.model.is_some());
        assert!(foo.note.is_none());
        assert!(foo.video.is_none());
        // Nothing was scheduled against the outside video
        assert_eq!(cache.pending_jobs(), 0);
        assert!(!models.join(".thumbnails").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_links_within_the_root_are_grouped() {
        use std::os::unix::fs::symlink;

        let (_temp, root, grouper, _cache) = confined_fixture();
        let models = root.join("models");
        fs::write(root.join("shared.txt"), "shared note").unwrap();
        fs::write(models.join("bar.pt"), b"weights").unwrap();
        symlink(root.join("shared.txt"), models.join("bar.txt")).unwrap();

        let groups = grouper.group_assets(&models);
        assert_eq!(groups["bar"].note.as_ref().unwrap().display_text(), "shared note");
    }

    #[cfg(unix)]
    #[test]
    fn test_stat_failure_degrades_to_unknown() {
        use std::os::unix::fs::symlink;

        let (_temp, root, grouper, _cache) = confined_fixture();
        let models = root.join("models");
        let ghost = models.join("ghost.safetensors");
        symlink(models.join("deleted.safetensors"), &ghost).unwrap();

        assert_eq!(FileStat::of(&ghost), FileStat::Unknown);

        let groups = grouper.group_assets(&models);
        let model = groups["ghost"].model.as_ref().unwrap();
        assert_eq!(model.file_name, "ghost.safetensors");
        assert_eq!(model.stat, FileStat::Unknown);
        assert_eq!(model.stat.size_display(), "unknown");
        assert_eq!(model.stat.created_display(), "unknown");

        // Same outcome without a guard
        let unguarded = AssetGrouper::without_thumbnails(ScannerConfig::default());
        let groups = unguarded.group_assets(&models);
        assert_eq!(groups["ghost"].model.as_ref().unwrap().stat, FileStat::Unknown);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_skipped_without_losing_others() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.safetensors")), b"x").unwrap();
        fs::write(dir.path().join("good.safetensors"), b"x").unwrap();

        let (grouper, _) = grouper();
        let groups = grouper.group_assets(dir.path());
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn test_size_and_time_display() {
        let stat = FileStat::Known {
            size_bytes: 151_000_000,
            created_at: Local::now(),
        };
        assert_eq!(stat.size_display(), "144.0MB");
        assert_eq!(stat.created_display().len(), "2024-01-01 00:00".len());

        assert_eq!(FileStat::Unknown.size_display(), "unknown");
        assert_eq!(FileStat::Unknown.created_display(), "unknown");
    }
}
