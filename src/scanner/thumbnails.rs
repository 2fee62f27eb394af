use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ThumbnailConfig;
use crate::scanner::extract::{FfmpegExtractor, FrameExtractor};
use crate::tasks::{JobRegistry, JobState, JobTicket};

/// Image extension of generated thumbnails.
const THUMBNAIL_EXT: &str = "jpg";

/// A claimed thumbnail waiting for a worker.
struct QueuedJob {
    video: PathBuf,
    ticket: JobTicket,
}

/// Manages video thumbnail generation and caching.
///
/// Thumbnails live in a sidecar directory next to the video, named after the
/// video's stem. Lookups never wait for generation: a miss schedules a
/// background job and returns immediately. Jobs run on a fixed set of
/// worker threads; the workers exit once the cache is dropped.
pub struct ThumbnailCache {
    dir_name: String,
    invalidate_stale: bool,
    queue: Sender<QueuedJob>,
    jobs: JobRegistry,
}

impl ThumbnailCache {
    pub fn new(config: &ThumbnailConfig) -> Self {
        Self::with_extractor(config, Arc::new(FfmpegExtractor::new(config)))
    }

    pub fn with_extractor(config: &ThumbnailConfig, extractor: Arc<dyn FrameExtractor>) -> Self {
        let (queue, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        for index in 0..config.workers.max(1) {
            let extractor = extractor.clone();
            let receiver = receiver.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("thumbnail-{}", index))
                .spawn(move || run_worker(extractor.as_ref(), &receiver));
            if let Err(e) = spawned {
                tracing::warn!("Failed to start thumbnail worker {}: {}", index, e);
            }
        }

        Self {
            dir_name: config.dir_name.clone(),
            invalidate_stale: config.invalidate_stale,
            queue,
            jobs: JobRegistry::new(),
        }
    }

    /// Name of the sidecar directory.
    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    /// Thumbnail location relative to the video's directory.
    pub fn relative_path(&self, video: &Path) -> Option<PathBuf> {
        let stem = video.file_stem()?;
        let mut name = stem.to_os_string();
        name.push(".");
        name.push(THUMBNAIL_EXT);
        Some(Path::new(&self.dir_name).join(name))
    }

    /// Deterministic cache path for a video.
    pub fn cache_path(&self, video: &Path) -> Option<PathBuf> {
        let parent = video.parent()?;
        Some(parent.join(self.relative_path(video)?))
    }

    /// Get the cached thumbnail path if a usable one exists.
    pub fn get_cached_path(&self, video: &Path) -> Option<PathBuf> {
        let cache_path = self.cache_path(video)?;
        if self.is_fresh(video, &cache_path) {
            Some(cache_path)
        } else {
            None
        }
    }

    /// Return the cached thumbnail, or schedule its generation and return `None`.
    ///
    /// Never blocks on the extractor. A request for a video whose thumbnail is
    /// already being generated does not start a second job.
    pub fn get_or_schedule(&self, video: &Path) -> Option<PathBuf> {
        let cache_path = self.cache_path(video)?;
        if self.is_fresh(video, &cache_path) {
            return Some(cache_path);
        }

        let ticket = self.jobs.begin(&cache_path)?;

        // Another job may have completed between the check and the claim
        if self.is_fresh(video, &cache_path) {
            ticket.finish(JobState::Ready);
            return Some(cache_path);
        }

        if let Some(sidecar) = cache_path.parent() {
            if let Err(e) = fs::create_dir_all(sidecar) {
                tracing::warn!("Cannot create thumbnail directory {:?}: {}", sidecar, e);
                ticket.finish(JobState::Failed(e.to_string()));
                return None;
            }
        }

        self.enqueue(video.to_path_buf(), ticket);
        None
    }

    /// Current state of the thumbnail for `video`.
    pub fn status(&self, video: &Path) -> JobState {
        let Some(cache_path) = self.cache_path(video) else {
            return JobState::Absent;
        };
        if self.jobs.in_flight(&cache_path) {
            JobState::Generating
        } else if self.is_fresh(video, &cache_path) {
            JobState::Ready
        } else {
            JobState::Absent
        }
    }

    /// Wait up to `timeout` for an in-flight job on `video` to settle.
    ///
    /// With no job running, reports the state on disk.
    pub fn wait_for(&self, video: &Path, timeout: Duration) -> JobState {
        let Some(cache_path) = self.cache_path(video) else {
            return JobState::Absent;
        };
        match self.jobs.wait(&cache_path, timeout) {
            Some(state) => state,
            None => self.status(video),
        }
    }

    /// Number of generation jobs queued or running.
    pub fn pending_jobs(&self) -> usize {
        self.jobs.in_flight_count()
    }

    fn is_fresh(&self, video: &Path, cache_path: &Path) -> bool {
        let Ok(thumb_meta) = fs::metadata(cache_path) else {
            return false;
        };
        if !thumb_meta.is_file() {
            return false;
        }
        if !self.invalidate_stale {
            return true;
        }

        match (
            thumb_meta.modified(),
            fs::metadata(video).and_then(|m| m.modified()),
        ) {
            (Ok(thumb_time), Ok(video_time)) => thumb_time >= video_time,
            // Without both timestamps the cached file is the best we have
            _ => true,
        }
    }

    fn enqueue(&self, video: PathBuf, ticket: JobTicket) {
        if let Err(mpsc::SendError(job)) = self.queue.send(QueuedJob { video, ticket }) {
            // No worker is left to receive; dropping the ticket releases the key
            tracing::warn!("No thumbnail worker available for {:?}", job.video);
        }
    }
}

/// Take queued jobs until the cache hangs up.
fn run_worker(extractor: &dyn FrameExtractor, receiver: &Mutex<Receiver<QueuedJob>>) {
    loop {
        let next = receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recv();
        let Ok(QueuedJob { video, ticket }) = next else {
            break;
        };
        // A panicking extractor fails its job, not the worker
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| generate(extractor, &video, ticket)));
        if outcome.is_err() {
            tracing::warn!("Thumbnail job for {:?} panicked", video);
        }
    }
}

/// Run one extraction into a partial file and move it into place.
fn generate(extractor: &dyn FrameExtractor, video: &Path, ticket: JobTicket) {
    let destination = ticket.key().to_path_buf();
    let partial = partial_path(&destination);

    tracing::debug!("Thumbnail job {} started for {:?}", ticket.id(), video);

    let outcome = extractor
        .extract(video, &partial)
        .map_err(|e| e.to_string())
        .and_then(|()| fs::rename(&partial, &destination).map_err(|e| e.to_string()));

    match outcome {
        Ok(()) => {
            tracing::info!(
                "Generated thumbnail {:?} in {:.1?}",
                destination,
                ticket.elapsed()
            );
            ticket.finish(JobState::Ready);
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            tracing::warn!("Failed to generate thumbnail for {:?}: {}", video, e);
            ticket.finish(JobState::Failed(e));
        }
    }
}

/// Hidden sibling of `destination` that keeps the image extension.
fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".partial-{}", name))
}
