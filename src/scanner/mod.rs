pub mod extract;
pub mod folders;
pub mod grouping;
pub mod notes;
pub mod thumbnails;

use crate::config::ScannerConfig;

pub use extract::{ExtractError, FfmpegExtractor, FrameExtractor};
pub use folders::{FolderIndex, FolderListing};
pub use grouping::{AssetGroup, AssetGrouper, FileStat, GroupMap, ModelFile, VideoFile};
pub use notes::{Note, NoteBody, NoteError};
pub use thumbnails::ThumbnailCache;

/// What a file contributes to its group, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Model,
    Note,
    Image,
    Video,
}

impl Role {
    /// Classify a lowercased extension (without the dot).
    ///
    /// Lists are checked in order model, note, image, video, so an extension
    /// configured twice takes the first role.
    pub fn classify(ext: &str, config: &ScannerConfig) -> Option<Role> {
        let matches = |list: &[String]| {
            list.iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
        };

        if matches(&config.model_extensions) {
            Some(Role::Model)
        } else if matches(&config.note_extensions) {
            Some(Role::Note)
        } else if matches(&config.image_extensions) {
            Some(Role::Image)
        } else if matches(&config.video_extensions) {
            Some(Role::Video)
        } else {
            None
        }
    }
}
