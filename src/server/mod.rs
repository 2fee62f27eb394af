//! HTTP boundary: folder listing pages and confined file serving.
//!
//! Routes:
//! - `GET /?dir=<folder>` renders the asset groups of a folder
//! - `GET /file/<name>?dir=<folder>` streams one file from that folder
//! - `GET /favicon.ico` answers `204 No Content`
//! - anything else is `404`

pub mod guard;
pub mod mime;
pub mod page;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Path as AxumPath, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::scanner::{AssetGrouper, FolderIndex, ThumbnailCache};

pub use guard::{GuardError, PathGuard};

/// Read buffer for streamed files.
const STREAM_CHUNK: usize = 1 << 18;

pub type SharedState = Arc<AppState>;

/// Immutable per-process state shared by all requests.
pub struct AppState {
    pub guard: PathGuard,
    pub folders: FolderIndex,
    pub grouper: AssetGrouper,
    pub thumbnails: Arc<ThumbnailCache>,
    pub collapse_lines: usize,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_thumbnails(config, Arc::new(ThumbnailCache::new(&config.thumbnails)))
    }

    /// Build state around an existing thumbnail cache.
    pub fn with_thumbnails(config: &Config, thumbnails: Arc<ThumbnailCache>) -> Result<Self> {
        let guard = PathGuard::new(&config.root)
            .with_context(|| format!("Cannot use root directory {}", config.root.display()))?;
        let folders = FolderIndex::new(
            guard.root().to_path_buf(),
            &config.folders,
            thumbnails.dir_name(),
        );
        let grouper = AssetGrouper::new(config.scanner.clone(), thumbnails.clone())
            .confined_to(guard.clone());

        Ok(Self {
            guard,
            folders,
            grouper,
            thumbnails,
            collapse_lines: config.scanner.note_collapse_lines,
        })
    }

    /// Render the listing page for `selector`, falling back to the root.
    pub fn listing_page(&self, selector: Option<&str>) -> maud::Markup {
        let listing = self.folders.list_folders();
        let (mut selected, mut directory) = self.folders.select(&listing, selector);

        // A listed folder may be a symlink that leads out of the tree
        if let Err(e) = self.guard.resolve(self.relative_to_root(directory)) {
            warn!("Refusing to list {:?}: {}", directory, e);
            selected = String::new();
            directory = self.folders.root();
        }

        let groups = self.grouper.group_assets(directory);
        debug!(
            "Listed {} groups in {:?}, {} thumbnail jobs pending",
            groups.len(),
            directory,
            self.thumbnails.pending_jobs()
        );
        page::render(&page::ListingPage {
            listing: &listing,
            selected: &selected,
            directory,
            groups: &groups,
            collapse_lines: self.collapse_lines,
        })
    }

    /// Resolve a `/file/` request to a readable file inside the tree.
    ///
    /// An empty selector means the root. A known folder name selects that
    /// folder. Any other selector is an untrusted sub-path of the root.
    /// Both the folder and `name` must pass the guard.
    pub fn locate_file(&self, selector: Option<&str>, name: &str) -> Result<PathBuf, GuardError> {
        let directory = self.resolve_directory(selector.unwrap_or_default())?;
        let file = PathGuard::new(&directory)?.resolve(name)?;
        if !file.is_file() {
            return Err(GuardError::NotFound(file));
        }
        Ok(file)
    }

    fn resolve_directory(&self, selector: &str) -> Result<PathBuf, GuardError> {
        if selector.is_empty() {
            return Ok(self.guard.root().to_path_buf());
        }
        let listing = self.folders.list_folders();
        match listing.get(selector) {
            Some(path) => self.guard.resolve(self.relative_to_root(path)),
            None => self.guard.resolve(selector),
        }
    }

    fn relative_to_root<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(self.folders.root()).unwrap_or(path)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DirQuery {
    pub dir: Option<String>,
}

impl DirQuery {
    /// An unparseable query string (e.g. `dir` given twice) selects nothing.
    fn or_default(query: Result<Query<DirQuery>, QueryRejection>) -> Self {
        match query {
            Ok(Query(query)) => query,
            Err(rejection) => {
                debug!("Ignoring folder selector: {}", rejection);
                DirQuery::default()
            }
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/file/{*name}", get(file_handler))
        .route("/favicon.ico", get(favicon_handler))
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until the process stops.
pub async fn serve(config: &Config) -> Result<()> {
    let state = Arc::new(AppState::new(config)?);
    let addr = config.listen_addr();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Serving {} on http://{}", state.guard.root().display(), listener.local_addr()?);

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;
    Ok(())
}

async fn index_handler(
    State(state): State<SharedState>,
    query: Result<Query<DirQuery>, QueryRejection>,
) -> Response {
    let query = DirQuery::or_default(query);
    let rendered =
        tokio::task::spawn_blocking(move || state.listing_page(query.dir.as_deref())).await;

    match rendered {
        Ok(markup) => markup.into_response(),
        Err(e) => {
            error!("Listing task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not build the listing.")
        }
    }
}

async fn file_handler(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
    query: Result<Query<DirQuery>, QueryRejection>,
) -> Response {
    let query = DirQuery::or_default(query);
    let located =
        tokio::task::spawn_blocking(move || state.locate_file(query.dir.as_deref(), &name)).await;

    match located {
        Ok(Ok(path)) => stream_file(path).await,
        Ok(Err(e)) => guard_error_response(e),
        Err(e) => {
            error!("File lookup task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not process path.")
        }
    }
}

async fn favicon_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found.")
}

async fn stream_file(path: PathBuf) -> Response {
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return error_response(StatusCode::NOT_FOUND, "File not found.");
        }
        Err(e) => {
            error!("Failed to open {}: {}", path.display(), e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not read file.");
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(mime::content_type(&path)),
    );
    if let Ok(meta) = file.metadata().await {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
    }

    let body = Body::from_stream(ReaderStream::with_capacity(file, STREAM_CHUNK));
    (StatusCode::OK, headers, body).into_response()
}

fn guard_error_response(e: GuardError) -> Response {
    match e {
        GuardError::Forbidden { .. } => {
            warn!("Path traversal attempt: {}", e);
            error_response(StatusCode::FORBIDDEN, "Access denied.")
        }
        GuardError::NotFound(_) => error_response(StatusCode::NOT_FOUND, "File not found."),
        GuardError::Io { .. } => {
            error!("{}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not process path.")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, page::error_page(&status.to_string(), message)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{ExtractError, FrameExtractor};
    use std::fs;
    use tempfile::TempDir;

    struct NoFrames;

    impl FrameExtractor for NoFrames {
        fn extract(&self, _video: &Path, _destination: &Path) -> Result<(), ExtractError> {
            Err(ExtractError::MissingOutput(PathBuf::new()))
        }
    }

    fn state() -> (TempDir, AppState) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("loras");
        fs::create_dir_all(root.join("sdxl")).unwrap();
        fs::write(root.join("foo.png"), b"png").unwrap();
        fs::write(root.join("sdxl/bar.png"), b"png").unwrap();
        fs::write(temp.path().join("passwd"), b"root:x:0:0").unwrap();

        let config = Config {
            root,
            ..Config::default()
        };
        let thumbnails = Arc::new(ThumbnailCache::with_extractor(
            &config.thumbnails,
            Arc::new(NoFrames),
        ));
        let state = AppState::with_thumbnails(&config, thumbnails).unwrap();
        (temp, state)
    }

    #[test]
    fn test_locate_file_in_root_and_folder() {
        let (_temp, state) = state();
        let root = state.guard.root().to_path_buf();

        assert_eq!(state.locate_file(None, "foo.png").unwrap(), root.join("foo.png"));
        assert_eq!(state.locate_file(Some(""), "foo.png").unwrap(), root.join("foo.png"));
        assert_eq!(state.locate_file(Some("All"), "foo.png").unwrap(), root.join("foo.png"));
        assert_eq!(
            state.locate_file(Some("sdxl"), "bar.png").unwrap(),
            root.join("sdxl/bar.png")
        );
    }

    #[test]
    fn test_locate_file_rejects_escapes() {
        let (_temp, state) = state();

        assert!(matches!(
            state.locate_file(Some("../.."), "passwd"),
            Err(GuardError::Forbidden { .. })
        ));
        assert!(matches!(
            state.locate_file(Some(".."), "passwd"),
            Err(GuardError::Forbidden { .. })
        ));
        assert!(matches!(
            state.locate_file(None, "../passwd"),
            Err(GuardError::Forbidden { .. })
        ));
        // Climbing out of a folder is judged against that folder
        assert!(matches!(
            state.locate_file(Some("sdxl"), "../foo.png"),
            Err(GuardError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_locate_file_missing() {
        let (_temp, state) = state();

        assert!(matches!(
            state.locate_file(None, "missing.png"),
            Err(GuardError::NotFound(_))
        ));
        assert!(matches!(
            state.locate_file(Some("nonexistent"), "foo.png"),
            Err(GuardError::NotFound(_))
        ));
        // Directories are not served
        assert!(matches!(
            state.locate_file(None, "sdxl"),
            Err(GuardError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_folder_outside_root_is_forbidden() {
        let (temp, state) = state();
        let outside = temp.path().join("elsewhere");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("leak.png"), b"png").unwrap();
        std::os::unix::fs::symlink(&outside, state.guard.root().join("escape")).unwrap();

        assert!(matches!(
            state.locate_file(Some("escape"), "leak.png"),
            Err(GuardError::Forbidden { .. })
        ));

        // The listing falls back to the root instead of reading the target
        let html = state.listing_page(Some("escape")).into_string();
        assert!(!html.contains("leak"));
    }

    #[test]
    fn test_listing_page_uses_selected_folder() {
        let (_temp, state) = state();

        let html = state.listing_page(Some("sdxl")).into_string();
        assert!(html.contains("/file/bar.png?dir=sdxl"));

        let fallback = state.listing_page(Some("no-such-folder")).into_string();
        assert!(fallback.contains(r#"src="/file/foo.png""#));
    }

    #[tokio::test]
    async fn test_stream_file_sets_headers() {
        let (_temp, state) = state();
        let path = state.locate_file(None, "foo.png").unwrap();

        let response = stream_file(path).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "3");
    }

    #[test]
    fn test_rejected_query_selects_nothing() {
        let uri: axum::http::Uri = "/?dir=a&dir=b".parse().unwrap();
        let rejected = Query::<DirQuery>::try_from_uri(&uri);
        assert!(rejected.is_err());
        assert_eq!(DirQuery::or_default(rejected).dir, None);

        let uri: axum::http::Uri = "/?dir=sdxl".parse().unwrap();
        let accepted = Query::<DirQuery>::try_from_uri(&uri);
        assert_eq!(DirQuery::or_default(accepted).dir.as_deref(), Some("sdxl"));
    }

    #[cfg(unix)]
    #[test]
    fn test_listing_hides_notes_linked_from_outside_root() {
        let (temp, state) = state();
        fs::write(temp.path().join("secret.txt"), "outside-the-tree").unwrap();
        fs::write(state.guard.root().join("foo.safetensors"), b"weights").unwrap();
        std::os::unix::fs::symlink(temp.path().join("secret.txt"), state.guard.root().join("foo.txt"))
            .unwrap();

        let html = state.listing_page(None).into_string();
        assert!(html.contains(r#"data-model-name="foo""#));
        assert!(!html.contains("outside-the-tree"));
        assert!(matches!(
            state.locate_file(None, "foo.txt"),
            Err(GuardError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_guard_errors_map_to_statuses() {
        let forbidden = GuardError::Forbidden {
            root: PathBuf::from("/m"),
            requested: "../x".to_string(),
        };
        assert_eq!(guard_error_response(forbidden).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            guard_error_response(GuardError::NotFound(PathBuf::from("/m/x"))).status(),
            StatusCode::NOT_FOUND
        );
    }
}
