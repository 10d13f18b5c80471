use std::path::PathBuf;

use super::fetcher::Fetcher;
use super::item;
use super::subject::Subject;
use super::threshold::{ThresholdGate, ThresholdKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found(PathBuf),
    Absent,
}

/// Tests whether a page exists by fetching its first item. A confirmed page
/// leaves that item on disk, so the next probe of it is local only.
#[derive(Debug, Clone, Copy)]
pub struct PageProbe<'a> {
    fetcher: &'a Fetcher,
    gate: ThresholdGate,
    base_url: &'a str,
}

impl<'a> PageProbe<'a> {
    pub fn new(fetcher: &'a Fetcher, gate: ThresholdGate, base_url: &'a str) -> Self {
        Self {
            fetcher,
            gate,
            base_url,
        }
    }

    pub async fn probe(&self, subject: &Subject, page: u32) -> ProbeOutcome {
        let coord = Subject::probe_coordinate(page);
        let local = subject.item_path(coord);

        if item::exists(&local).await {
            return ProbeOutcome::Found(local);
        }

        let url = subject.item_url(self.base_url, coord);
        let bytes = match self.fetcher.fetch(&url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::debug!("Page {} of {} absent: {}", page, subject.slug(), e);
                return ProbeOutcome::Absent;
            }
        };

        if !self.gate.accepts(bytes.len(), ThresholdKind::Detection) {
            log::debug!(
                "Page {} of {} absent: {} bytes below detection threshold",
                page,
                subject.slug(),
                bytes.len()
            );
            return ProbeOutcome::Absent;
        }

        match item::save_bytes(&local, &bytes).await {
            Ok(()) => ProbeOutcome::Found(local),
            Err(e) => {
                log::error!("Error saving image {}: {}", local.display(), e);
                ProbeOutcome::Absent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::config_for;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn existing_first_item_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = config_for(&server.uri(), dir.path());
        let fetcher = Fetcher::new(&config).unwrap();
        let subject = Subject::parse("Kaori Yamashita", dir.path()).unwrap();
        let local = subject.item_path(Subject::probe_coordinate(2));
        item::save_bytes(&local, b"cached").await.unwrap();

        let probe = PageProbe::new(&fetcher, ThresholdGate::default(), &config.base_url);
        assert_eq!(probe.probe(&subject, 2).await, ProbeOutcome::Found(local));
    }

    #[tokio::test]
    async fn large_response_is_persisted_small_one_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kaori-yamashita/1/kaori-yamashita-1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 6000]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/kaori-yamashita/2/kaori-yamashita-1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 5119]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = config_for(&server.uri(), dir.path());
        let fetcher = Fetcher::new(&config).unwrap();
        let subject = Subject::parse("Kaori Yamashita", dir.path()).unwrap();
        let probe = PageProbe::new(&fetcher, ThresholdGate::default(), &config.base_url);

        let first = subject.item_path(Subject::probe_coordinate(1));
        assert_eq!(probe.probe(&subject, 1).await, ProbeOutcome::Found(first.clone()));
        assert_eq!(std::fs::read(&first).unwrap().len(), 6000);

        assert_eq!(probe.probe(&subject, 2).await, ProbeOutcome::Absent);
        assert!(!subject.item_path(Subject::probe_coordinate(2)).exists());
    }
}
