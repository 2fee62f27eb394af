use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory tree that is browsed and served. Nothing outside it is readable.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub folders: FolderConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    12321
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Offer the root directory itself as a folder entry.
    #[serde(default = "default_include_root")]
    pub include_root: bool,

    /// Display name of the root entry.
    #[serde(default = "default_root_label")]
    pub root_label: String,
}

fn default_include_root() -> bool {
    true
}

fn default_root_label() -> String {
    "All".to_string()
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            include_root: default_include_root(),
            root_label: default_root_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_model_extensions")]
    pub model_extensions: Vec<String>,

    #[serde(default = "default_note_extensions")]
    pub note_extensions: Vec<String>,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,

    /// Notes with more lines than this are rendered collapsed.
    #[serde(default = "default_note_collapse_lines")]
    pub note_collapse_lines: usize,
}

fn default_model_extensions() -> Vec<String> {
    ["safetensors", "ckpt", "pt", "bin", "pth"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_note_extensions() -> Vec<String> {
    vec!["txt".to_string()]
}

fn default_image_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "webp", "bmp", "tiff", "gif"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_video_extensions() -> Vec<String> {
    vec!["mp4".to_string(), "mkv".to_string()]
}

fn default_note_collapse_lines() -> usize {
    3
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            model_extensions: default_model_extensions(),
            note_extensions: default_note_extensions(),
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
            note_collapse_lines: default_note_collapse_lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Name of the sidecar cache directory created next to each video.
    #[serde(default = "default_thumb_dir_name")]
    pub dir_name: String,

    #[serde(default = "default_thumb_size")]
    pub width: u32,

    #[serde(default = "default_thumb_size")]
    pub height: u32,

    /// Position of the extracted frame, in seconds from the start of the video.
    #[serde(default = "default_offset_secs")]
    pub offset_secs: f64,

    /// Extraction process is killed after this many seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Treat a thumbnail older than its video as missing.
    #[serde(default = "default_invalidate_stale")]
    pub invalidate_stale: bool,

    /// Extractions running at once; further misses wait in a queue.
    #[serde(default = "default_thumb_workers")]
    pub workers: usize,
}

fn default_thumb_dir_name() -> String {
    ".thumbnails".to_string()
}

fn default_thumb_size() -> u32 {
    120
}

fn default_offset_secs() -> f64 {
    1.0
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_invalidate_stale() -> bool {
    true
}

fn default_thumb_workers() -> usize {
    2
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            dir_name: default_thumb_dir_name(),
            width: default_thumb_size(),
            height: default_thumb_size(),
            offset_secs: default_offset_secs(),
            timeout_secs: default_timeout_secs(),
            ffmpeg: default_ffmpeg(),
            invalidate_stale: default_invalidate_stale(),
            workers: default_thumb_workers(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write logs to a daily rolling file here when journald is not available.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            server: ServerConfig::default(),
            folders: FolderConfig::default(),
            scanner: ScannerConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Check the inputs the server cannot run without.
    pub fn validate(&self) -> Result<()> {
        if !self.root.is_dir() {
            anyhow::bail!("Root directory does not exist: {}", self.root.display());
        }
        if self.thumbnails.dir_name.is_empty()
            || self.thumbnails.dir_name.contains(['/', '\\'])
        {
            anyhow::bail!(
                "thumbnails.dir_name must be a plain directory name, got {:?}",
                self.thumbnails.dir_name
            );
        }
        if self.thumbnails.workers == 0 {
            anyhow::bail!("thumbnails.workers must be at least 1");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind, self.server.port)
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("modelshelf")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MODELSHELF_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            root = "/srv/models"

            [thumbnails]
            width = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.root, PathBuf::from("/srv/models"));
        assert_eq!(config.thumbnails.width, 200);
        assert_eq!(config.thumbnails.height, 120);
        assert_eq!(config.thumbnails.dir_name, ".thumbnails");
        assert_eq!(config.thumbnails.workers, 2);
        assert_eq!(config.server.port, 12321);
        assert_eq!(config.scanner.note_collapse_lines, 3);
        assert!(config.folders.include_root);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.server.port = 8080;
        config.scanner.video_extensions.push("webm".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.server.port, 8080);
        assert!(loaded.scanner.video_extensions.contains(&"webm".to_string()));
    }

    #[test]
    fn test_validate_rejects_missing_root() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.root = dir.path().join("missing");
        assert!(config.validate().is_err());

        config.root = dir.path().to_path_buf();
        assert!(config.validate().is_ok());

        config.thumbnails.dir_name = "../cache".to_string();
        assert!(config.validate().is_err());

        config.thumbnails.dir_name = ".thumbnails".to_string();
        config.thumbnails.workers = 0;
        assert!(config.validate().is_err());
    }
}
