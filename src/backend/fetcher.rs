use futures::StreamExt;

use super::config::Config;
use super::error::FetchError;
use super::signals::ControlSignals;

const USER_AGENT: &str = "Mozilla/5.0";

/// One GET per call, no retries. Failures are values, never panics.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    not_found_marker: String,
}

impl Fetcher {
    pub fn new(config: &Config) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            not_found_marker: config.not_found_marker.clone(),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        // A redirect to the placeholder means "no such item" whatever the status.
        if !self.not_found_marker.is_empty()
            && response.url().as_str().contains(&self.not_found_marker)
        {
            log::debug!("{} resolved to not-found placeholder", url);
            return Err(FetchError::NotFound);
        }

        let response = response
            .error_for_status()
            .map_err(|e| network_error(url, e))?;

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| network_error(url, e))?;
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    /// Like [`Fetcher::fetch`], but abandons the request once `signals` is cancelled.
    pub async fn fetch_cancellable(
        &self,
        url: &str,
        signals: &ControlSignals,
    ) -> Result<Vec<u8>, FetchError> {
        tokio::select! {
            biased;
            _ = signals.cancelled() => Err(FetchError::Cancelled),
            result = self.fetch(url) => result,
        }
    }
}

fn network_error(url: &str, e: reqwest::Error) -> FetchError {
    log::error!("Error fetching {}: {}", url, e);
    FetchError::Network(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> Fetcher {
        Fetcher::new(&Config::default()).unwrap()
    }

    #[tokio::test]
    async fn returns_body_and_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jpg"))
            .and(header("user-agent", "Mozilla/5.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64]))
            .expect(1)
            .mount(&server)
            .await;

        let body = fetcher()
            .fetch(&format!("{}/a.jpg", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, vec![7u8; 64]);
    }

    #[tokio::test]
    async fn redirect_to_placeholder_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/img/404.Not.Found.svg"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/404.Not.Found.svg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 10_000]))
            .mount(&server)
            .await;

        let result = fetcher()
            .fetch(&format!("{}/missing.jpg", server.uri()))
            .await;
        assert_eq!(result, Err(FetchError::NotFound));
    }

    #[tokio::test]
    async fn error_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = fetcher().fetch(&format!("{}/x.jpg", server.uri())).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }

    #[tokio::test]
    async fn cancel_abandons_slow_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 16])
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let signals = ControlSignals::new();
        let fetcher = fetcher();
        let url = format!("{}/slow.jpg", server.uri());

        let (result, _) = tokio::join!(fetcher.fetch_cancellable(&url, &signals), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            signals.cancel();
        });
        assert_eq!(result, Err(FetchError::Cancelled));
    }
}
