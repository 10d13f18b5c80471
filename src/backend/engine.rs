//! Bounded worker pool that fetches and stores the items of a download job.
//!
//! The coordinator walks the job's coordinates in order. Before each unit it
//! checks the cancel flag and waits out a pause; items already on disk are
//! counted without a request; the rest go to at most `workers` concurrent
//! tasks. Per-item failures land in the report, never in an `Err`.

use std::ops::RangeInclusive;
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};

use super::config::Config;
use super::error::{ItemError, JobError};
use super::fetcher::Fetcher;
use super::item;
use super::signals::ControlSignals;
use super::subject::{ItemCoordinate, Subject};
use super::threshold::ThresholdGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadScope {
    Page(u32),
    All,
    Range { start: u32, end: u32 },
}

impl DownloadScope {
    pub fn pages(&self, pages_detected: u32) -> Result<RangeInclusive<u32>, JobError> {
        match *self {
            DownloadScope::Page(page) if page >= 1 => Ok(page..=page),
            DownloadScope::Page(page) => Err(JobError::InvalidRange {
                start: page,
                end: page,
            }),
            DownloadScope::All if pages_detected >= 1 => Ok(1..=pages_detected),
            DownloadScope::All => Err(JobError::NoPagesDetected),
            DownloadScope::Range { start, end } if start >= 1 && end >= start => Ok(start..=end),
            DownloadScope::Range { start, end } => Err(JobError::InvalidRange { start, end }),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DownloadScope::Page(page) => format!("Page {}", page),
            DownloadScope::All => "All pages".to_string(),
            DownloadScope::Range { start, end } => format!("Pages {}-{}", start, end),
        }
    }
}

/// Receives percent-complete updates, never decreasing within one run.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn report(&self, percent: f64) {
        self(percent)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub subject: Subject,
    pub coordinates: Vec<ItemCoordinate>,
}

impl DownloadJob {
    pub fn new(
        subject: Subject,
        scope: DownloadScope,
        pages_detected: u32,
        items_per_page: u32,
    ) -> Result<Self, JobError> {
        let coordinates = scope
            .pages(pages_detected)?
            .flat_map(|page| (1..=items_per_page).map(move |item| ItemCoordinate::new(page, item)))
            .collect();

        Ok(Self {
            subject,
            coordinates,
        })
    }
}

#[derive(Debug)]
pub struct ItemFailure {
    pub label: String,
    pub error: ItemError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Cancelled,
    CompletedWithErrors,
    CompletedClean,
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub total: usize,
    /// Items present on disk at the end, fetched or already there.
    pub completed: usize,
    pub skipped_existing: usize,
    pub errors: Vec<ItemFailure>,
    pub cancelled: bool,
}

impl DownloadReport {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        if self.cancelled {
            JobOutcome::Cancelled
        } else if self.errors.is_empty() {
            JobOutcome::CompletedClean
        } else {
            JobOutcome::CompletedWithErrors
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    /// `name (reason)` for each failed item.
    pub fn error_lines(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|f| format!("{} ({})", f.label, f.error))
            .collect()
    }

    /// Title and message for the completion notice.
    pub fn notice(&self, scope: DownloadScope) -> (String, String) {
        match self.outcome() {
            JobOutcome::Cancelled => (
                "Notice".to_string(),
                format!("{}: download cancelled", scope.describe()),
            ),
            JobOutcome::CompletedWithErrors => (
                "Warning".to_string(),
                format!("Download errors: {}", self.error_lines().join(", ")),
            ),
            JobOutcome::CompletedClean => (
                "Notice".to_string(),
                format!("{}: download complete", scope.describe()),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadEngine {
    fetcher: Fetcher,
    gate: ThresholdGate,
    signals: Arc<ControlSignals>,
    base_url: String,
    workers: usize,
}

impl DownloadEngine {
    pub fn new(
        fetcher: Fetcher,
        gate: ThresholdGate,
        signals: Arc<ControlSignals>,
        config: &Config,
    ) -> Self {
        Self {
            fetcher,
            gate,
            signals,
            base_url: config.base_url.clone(),
            workers: config.max_concurrent_workers.max(1),
        }
    }

    pub async fn run(&self, job: &DownloadJob, progress: &dyn ProgressSink) -> DownloadReport {
        let mut report = DownloadReport::new(job.coordinates.len());
        let mut in_flight: JoinSet<(String, Result<(), ItemError>)> = JoinSet::new();

        log::info!(
            "Starting download of {} item(s) for {} with {} worker(s)",
            report.total,
            job.subject.slug(),
            self.workers
        );

        for &coord in &job.coordinates {
            if self.signals.is_cancelled() || !self.signals.wait_while_paused().await {
                report.cancelled = true;
                break;
            }

            let path = job.subject.item_path(coord);
            if item::exists(&path).await {
                report.completed += 1;
                report.skipped_existing += 1;
                progress.report(report.percent());
                continue;
            }

            while in_flight.len() >= self.workers {
                if let Some(joined) = in_flight.join_next().await {
                    record(&mut report, joined);
                    progress.report(report.percent());
                }
            }

            let label = job.subject.file_name(coord);
            let url = job.subject.item_url(&self.base_url, coord);
            let fetcher = self.fetcher.clone();
            let gate = self.gate;
            let signals = Arc::clone(&self.signals);

            in_flight.spawn(async move {
                let result = item::download_item(&fetcher, gate, Some(&*signals), &url, &path).await;
                (label, result)
            });
        }

        // In-flight requests see the cancel flag themselves and return early.
        while let Some(joined) = in_flight.join_next().await {
            record(&mut report, joined);
            progress.report(report.percent());
        }

        log::info!(
            "Download for {} finished: {}/{} complete, {} skipped, {} error(s), cancelled={}",
            job.subject.slug(),
            report.completed,
            report.total,
            report.skipped_existing,
            report.errors.len(),
            report.cancelled
        );
        report
    }
}

fn record(report: &mut DownloadReport, joined: Result<(String, Result<(), ItemError>), JoinError>) {
    let (label, result) = match joined {
        Ok(done) => done,
        Err(e) => ("unknown item".to_string(), Err(ItemError::Network(e.to_string()))),
    };

    match result {
        Ok(()) => report.completed += 1,
        Err(ItemError::Cancelled) => {
            log::debug!("Discarded cancelled item {}", label);
            report.cancelled = true;
        }
        Err(error) => {
            log::warn!("Failed to download {}: {}", label, error);
            report.errors.push(ItemFailure { label, error });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::config_for;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SLUG: &str = "kaori-yamashita";

    fn setup(server: &MockServer, dir: &Path) -> (DownloadEngine, Subject, Arc<ControlSignals>) {
        let config = config_for(&server.uri(), dir);
        let signals = Arc::new(ControlSignals::new());
        let engine = DownloadEngine::new(
            Fetcher::new(&config).unwrap(),
            ThresholdGate::from_config(&config),
            Arc::clone(&signals),
            &config,
        );
        let subject = Subject::parse("Kaori Yamashita", dir).unwrap();
        (engine, subject, signals)
    }

    fn recorder() -> (Arc<Mutex<Vec<f64>>>, impl Fn(f64) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |p: f64| seen.lock().unwrap().push(p)
        };
        (seen, sink)
    }

    #[test]
    fn scope_preconditions() {
        assert_eq!(DownloadScope::All.pages(0), Err(JobError::NoPagesDetected));
        assert_eq!(DownloadScope::All.pages(3), Ok(1..=3));
        assert_eq!(DownloadScope::Page(2).pages(0), Ok(2..=2));
        assert_eq!(
            DownloadScope::Range { start: 3, end: 2 }.pages(9),
            Err(JobError::InvalidRange { start: 3, end: 2 })
        );
        assert_eq!(
            DownloadScope::Range { start: 0, end: 2 }.pages(9),
            Err(JobError::InvalidRange { start: 0, end: 2 })
        );
        assert_eq!(DownloadScope::Range { start: 2, end: 4 }.pages(0), Ok(2..=4));
    }

    #[test]
    fn job_expands_pages_into_items() {
        let subject = Subject::parse("Kaori Yamashita", Path::new("/lib")).unwrap();
        let job = DownloadJob::new(subject, DownloadScope::Range { start: 2, end: 3 }, 0, 12)
            .unwrap();

        assert_eq!(job.coordinates.len(), 24);
        assert_eq!(job.coordinates[0], ItemCoordinate::new(2, 1));
        assert_eq!(job.coordinates[23], ItemCoordinate::new(3, 12));
    }

    #[tokio::test]
    async fn fully_present_page_makes_no_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let (engine, subject, _) = setup(&server, dir.path());

        for item in 1..=12 {
            let path = subject.item_path(ItemCoordinate::new(1, item));
            item::save_bytes(&path, b"already here").await.unwrap();
        }

        let job = DownloadJob::new(subject, DownloadScope::Page(1), 0, 12).unwrap();
        let (seen, sink) = recorder();
        let report = engine.run(&job, &sink).await;

        assert_eq!(report.completed, 12);
        assert_eq!(report.skipped_existing, 12);
        assert!(report.errors.is_empty());
        assert_eq!(report.outcome(), JobOutcome::CompletedClean);
        assert_eq!(seen.lock().unwrap().last().copied(), Some(100.0));
    }

    #[tokio::test]
    async fn cancel_before_dispatch_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 9000]))
            .expect(0)
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let (engine, subject, signals) = setup(&server, dir.path());
        signals.cancel();

        let folder = subject.folder().to_path_buf();
        let job = DownloadJob::new(subject, DownloadScope::Range { start: 1, end: 2 }, 0, 12)
            .unwrap();
        let report = engine.run(&job, &|_: f64| {}).await;

        assert_eq!(report.outcome(), JobOutcome::Cancelled);
        assert_eq!(report.completed, 0);
        assert!(report.errors.is_empty());
        assert!(!folder.exists());
    }

    #[tokio::test]
    async fn cancel_during_final_items_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 6000])
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let (engine, subject, signals) = setup(&server, dir.path());

        // Only the last four items are missing, so every unit is scheduled
        // before the cancel arrives.
        for item in 1..=8 {
            let path = subject.item_path(ItemCoordinate::new(1, item));
            item::save_bytes(&path, &[0u8; 6000]).await.unwrap();
        }

        let job = DownloadJob::new(subject, DownloadScope::Page(1), 0, 12).unwrap();
        let run = tokio::spawn(async move { engine.run(&job, &|_: f64| {}).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        signals.cancel();
        let report = run.await.unwrap();

        assert_eq!(report.outcome(), JobOutcome::Cancelled);
        assert_eq!(report.completed, 8);
        assert!(report.errors.is_empty());
        assert_eq!(
            report.notice(DownloadScope::Page(1)),
            ("Notice".to_string(), "Page 1: download cancelled".to_string())
        );
    }

    #[tokio::test]
    async fn at_most_four_requests_in_flight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 6000])
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let (engine, subject, _) = setup(&server, dir.path());

        let job = DownloadJob::new(subject, DownloadScope::Page(1), 0, 12).unwrap();
        let started = Instant::now();
        let run = tokio::spawn(async move { engine.run(&job, &|_: f64| {}).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 4);

        let report = run.await.unwrap();
        assert_eq!(report.completed, 12);
        // Twelve delayed items through four workers take three rounds.
        assert!(started.elapsed() >= Duration::from_millis(850));
    }

    #[tokio::test]
    async fn threshold_boundary_per_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/{SLUG}/1/{SLUG}-1.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 5119]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/{SLUG}/1/{SLUG}-2.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 5120]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(format!(r"^/{SLUG}/1/{SLUG}-([3-9]|1[0-2])\.jpg$")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 7000]))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let (engine, subject, _) = setup(&server, dir.path());

        let rejected = subject.item_path(ItemCoordinate::new(1, 1));
        let accepted = subject.item_path(ItemCoordinate::new(1, 2));
        let job = DownloadJob::new(subject, DownloadScope::Page(1), 0, 12).unwrap();
        let report = engine.run(&job, &|_: f64| {}).await;

        assert_eq!(report.outcome(), JobOutcome::CompletedWithErrors);
        assert_eq!(report.completed, 11);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].label, "Kaori Yamashita-1-1.jpg");
        assert!(matches!(
            report.errors[0].error,
            ItemError::SizeRejected {
                len: 5119,
                threshold: 5120
            }
        ));
        assert!(!rejected.exists());
        assert_eq!(std::fs::read(accepted).unwrap().len(), 5120);
    }

    #[tokio::test]
    async fn rerun_fetches_only_missing_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(format!(r"^/{SLUG}/[12]/{SLUG}-\d+\.jpg$")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 6000]))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let (engine, subject, _) = setup(&server, dir.path());

        // An interrupted earlier run left page 1 complete.
        for item in 1..=12 {
            let path = subject.item_path(ItemCoordinate::new(1, item));
            item::save_bytes(&path, &[0u8; 6000]).await.unwrap();
        }

        let job = DownloadJob::new(subject, DownloadScope::All, 2, 12).unwrap();
        let (seen, sink) = recorder();
        let report = engine.run(&job, &sink).await;

        assert_eq!(report.total, 24);
        assert_eq!(report.completed, 24);
        assert_eq!(report.skipped_existing, 12);
        assert_eq!(report.outcome(), JobOutcome::CompletedClean);
        assert_eq!(server.received_requests().await.unwrap().len(), 12);

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
    }

    #[tokio::test]
    async fn network_failures_are_collected_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let (engine, subject, _) = setup(&server, dir.path());

        let job = DownloadJob::new(subject, DownloadScope::Page(1), 0, 12).unwrap();
        let report = engine.run(&job, &|_: f64| {}).await;

        assert_eq!(report.outcome(), JobOutcome::CompletedWithErrors);
        assert_eq!(report.completed, 0);
        assert_eq!(report.errors.len(), 12);
        assert!(
            report
                .errors
                .iter()
                .all(|f| matches!(f.error, ItemError::Network(_)))
        );
        let (title, message) = report.notice(DownloadScope::Page(1));
        assert_eq!(title, "Warning");
        assert!(message.contains("Kaori Yamashita-1-12.jpg"));
    }

    #[tokio::test]
    async fn pause_holds_scheduling_until_resume() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 6000]))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let (engine, subject, signals) = setup(&server, dir.path());
        signals.pause();

        let job = DownloadJob::new(subject, DownloadScope::Page(1), 0, 12).unwrap();
        let run = tokio::spawn(async move { engine.run(&job, &|_: f64| {}).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!run.is_finished());
        assert!(server.received_requests().await.unwrap().is_empty());

        signals.resume();
        let report = run.await.unwrap();
        assert_eq!(report.completed, 12);
        assert_eq!(report.outcome(), JobOutcome::CompletedClean);
    }
}
