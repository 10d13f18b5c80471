//! Owns everything one running application shares between jobs: config,
//! HTTP client, control signals, image cache, history and the number of
//! pages detected per subject.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tokio::sync::RwLock;

use super::cache::{CachedImage, ImageCache, PageImages};
use super::config::Config;
use super::discovery::{self, PageFound};
use super::engine::{DownloadEngine, DownloadJob, DownloadReport, DownloadScope, ProgressSink};
use super::error::{DecodeError, JobError, SubjectError};
use super::fetcher::Fetcher;
use super::history::{ActorRecord, History, filter_records};
use super::imaging::{self, FULL_VIEW_BOUNDS};
use super::item;
use super::probe::PageProbe;
use super::signals::ControlSignals;
use super::subject::{ItemCoordinate, Subject};
use super::threshold::ThresholdGate;

/// Fire-and-forget user notification.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

pub struct Session {
    config: Config,
    fetcher: Fetcher,
    gate: ThresholdGate,
    signals: Arc<ControlSignals>,
    cache: ImageCache,
    history: Option<History>,
    detected: RwLock<HashMap<String, u32>>,
}

impl Session {
    pub fn new(config: Config) -> reqwest::Result<Self> {
        let config = config.sanitized();
        let fetcher = Fetcher::new(&config)?;

        Ok(Self {
            gate: ThresholdGate::from_config(&config),
            cache: ImageCache::new(config.cache_capacity),
            signals: Arc::new(ControlSignals::new()),
            history: None,
            detected: RwLock::new(HashMap::new()),
            fetcher,
            config,
        })
    }

    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn signals(&self) -> &Arc<ControlSignals> {
        &self.signals
    }

    pub fn subject(&self, input: &str) -> Result<Subject, SubjectError> {
        Subject::parse(input, &self.config.library_dir)
    }

    pub async fn pages_detected(&self, subject: &Subject) -> u32 {
        let detected = self.detected.read().await;
        detected.get(subject.slug()).copied().unwrap_or(0)
    }

    /// Discover how many pages the subject has. `on_found` sees each confirmed
    /// page as soon as it is known, in page order.
    pub async fn search<F>(&self, input: &str, on_found: F) -> Result<u32, SubjectError>
    where
        F: FnMut(PageFound),
    {
        let subject = self.subject(input)?;
        log::info!("Searching {:?} as {}", subject.raw_input(), subject.slug());
        self.detected
            .write()
            .await
            .insert(subject.slug().to_string(), 0);

        let probe = PageProbe::new(&self.fetcher, self.gate, &self.config.base_url);
        let highest =
            discovery::discover(&probe, &subject, self.config.discovery_lookahead, on_found).await;

        self.detected
            .write()
            .await
            .insert(subject.slug().to_string(), highest);

        if highest > 0 {
            if let Some(history) = &self.history {
                tokio::spawn(record_history(
                    history.clone(),
                    subject,
                    self.config.thumbnail_dir(),
                ));
            }
        }
        Ok(highest)
    }

    pub async fn download(
        &self,
        input: &str,
        scope: DownloadScope,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadReport, JobError> {
        let subject = self.subject(input)?;
        let pages_detected = self.pages_detected(&subject).await;
        let job = DownloadJob::new(subject, scope, pages_detected, self.config.items_per_page)?;

        let engine = DownloadEngine::new(
            self.fetcher.clone(),
            self.gate,
            Arc::clone(&self.signals),
            &self.config,
        );
        Ok(engine.run(&job, progress).await)
    }

    /// Runs a download and reports the result or the refusal through `notifier`.
    pub async fn download_and_notify(
        &self,
        input: &str,
        scope: DownloadScope,
        progress: &dyn ProgressSink,
        notifier: &dyn Notifier,
    ) -> Option<DownloadReport> {
        match self.download(input, scope, progress).await {
            Ok(report) => {
                let (title, message) = report.notice(scope);
                notifier.notify(&title, &message);
                Some(report)
            }
            Err(e) => {
                notifier.notify("Error", &e.to_string());
                None
            }
        }
    }

    /// Decoded images of one page, in item order. Missing items are fetched
    /// first; items that cannot be fetched or decoded are left out.
    pub async fn page_images(&self, input: &str, page: u32) -> Result<PageImages, SubjectError> {
        let subject = self.subject(input)?;
        let images = self
            .cache
            .get_or_load(subject.slug(), page, self.load_page(&subject, page))
            .await;
        Ok(images)
    }

    async fn load_page(&self, subject: &Subject, page: u32) -> Vec<CachedImage> {
        let slots = stream::iter(1..=self.config.items_per_page)
            .map(|item| {
                let coord = ItemCoordinate::new(page, item);
                async move { (coord, self.load_item(subject, coord).await) }
            })
            .buffered(self.config.max_concurrent_workers);

        slots
            .filter_map(|(coord, slot)| async move {
                match slot {
                    Ok(image) => Some(image),
                    Err(e) => {
                        log::warn!("Skipping image {} of {}: {}", coord, subject.slug(), e);
                        None
                    }
                }
            })
            .collect()
            .await
    }

    async fn load_item(
        &self,
        subject: &Subject,
        coord: ItemCoordinate,
    ) -> Result<CachedImage, DecodeError> {
        let path = subject.item_path(coord);

        if !item::exists(&path).await {
            let url = subject.item_url(&self.config.base_url, coord);
            item::download_item(&self.fetcher, self.gate, None, &url, &path).await?;
        }

        let decode_path = path.clone();
        let image = tokio::task::spawn_blocking(move || {
            imaging::load_displayable(&decode_path, FULL_VIEW_BOUNDS)
        })
        .await
        .map_err(|e| DecodeError::Task(e.to_string()))??;

        Ok(CachedImage { path, image })
    }

    /// Filtered, name-sorted history; empty when no history store is attached.
    pub async fn history(&self, filter: &str) -> Vec<ActorRecord> {
        let Some(history) = &self.history else {
            return Vec::new();
        };

        match history.lookup_all().await {
            Ok(records) => filter_records(records, filter),
            Err(e) => {
                log::error!("Cannot read history: {}", e);
                Vec::new()
            }
        }
    }
}

/// Writes the subject's thumbnail and upserts its history record. Runs
/// detached from the search; failures are only logged.
async fn record_history(history: History, subject: Subject, thumbnail_dir: PathBuf) {
    let preview = subject.item_path(Subject::probe_coordinate(1));
    if !item::exists(&preview).await {
        return;
    }

    let thumbnail = subject.thumbnail_path(&thumbnail_dir);
    let (source, dest) = (preview.clone(), thumbnail.clone());
    match tokio::task::spawn_blocking(move || imaging::write_thumbnail(&source, &dest)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Cannot write thumbnail {}: {}", thumbnail.display(), e),
        Err(e) => log::warn!("Thumbnail task failed: {}", e),
    }

    let record = ActorRecord {
        name: subject.display_name().to_string(),
        folder_path: path_string(subject.folder()),
        thumbnail_path: path_string(&thumbnail),
    };
    match history.lookup(&record.name).await {
        Ok(Some(_)) => log::info!("Updating history for {}", record.name),
        Ok(None) => log::info!("Adding {} to history", record.name),
        Err(e) => log::warn!("Cannot read history for {}: {}", record.name, e),
    }
    if let Err(e) = history.upsert(&record).await {
        log::error!("Cannot update history for {}: {}", record.name, e);
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
