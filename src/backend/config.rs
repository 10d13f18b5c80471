use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DETECTION_THRESHOLD_BYTES: usize = 5 * 1024;
pub const DOWNLOAD_THRESHOLD_BYTES: usize = 5 * 1024;
pub const MAX_CONCURRENT_WORKERS: usize = 4;
pub const ITEMS_PER_PAGE: u32 = 12;
pub const REQUEST_TIMEOUT_SECONDS: u64 = 10;

const DEFAULT_BASE_URL: &str = "https://jjgirls.com/japanese";
const DEFAULT_NOT_FOUND_MARKER: &str = "404.Not.Found.svg";
const APP_DIR: &str = "gallery-tui";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub library_dir: PathBuf,
    pub not_found_marker: String,
    pub detection_threshold_bytes: usize,
    pub download_threshold_bytes: usize,
    pub max_concurrent_workers: usize,
    pub items_per_page: u32,
    pub request_timeout_secs: u64,
    /// Pages probed ahead of the confirmed frontier. 1 probes strictly in sequence.
    pub discovery_lookahead: usize,
    /// `None` keeps every decoded page for the life of the process.
    pub cache_capacity: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            library_dir: default_library_dir(),
            not_found_marker: DEFAULT_NOT_FOUND_MARKER.to_string(),
            detection_threshold_bytes: DETECTION_THRESHOLD_BYTES,
            download_threshold_bytes: DOWNLOAD_THRESHOLD_BYTES,
            max_concurrent_workers: MAX_CONCURRENT_WORKERS,
            items_per_page: ITEMS_PER_PAGE,
            request_timeout_secs: REQUEST_TIMEOUT_SECONDS,
            discovery_lookahead: 1,
            cache_capacity: None,
        }
    }
}

fn default_library_dir() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Gallery")
}

fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.json")
}

/// Directory for the log file; the terminal is owned by the UI.
pub fn log_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    pub fn load() -> Self {
        let path = get_config_path();

        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<Config>(&content) {
                    Ok(config) => return config.sanitized(),
                    Err(e) => log::warn!("Ignoring malformed config {}: {}", path.display(), e),
                },
                Err(e) => log::warn!("Cannot read config {}: {}", path.display(), e),
            }
        }

        Config::default()
    }

    /// Clamp values that would stall the engine.
    pub fn sanitized(mut self) -> Self {
        self.max_concurrent_workers = self.max_concurrent_workers.max(1);
        self.discovery_lookahead = self.discovery_lookahead.max(1);
        self.items_per_page = self.items_per_page.max(1);
        if let Some(capacity) = self.cache_capacity {
            self.cache_capacity = Some(capacity.max(1));
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.library_dir.join("thumbnail")
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.library_dir.join("history.db")
    }
}
