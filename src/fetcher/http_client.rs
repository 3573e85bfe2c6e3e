use super::FetchError;
use crate::config::FetchConfig;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

pub struct HttpClient {
    inner: reqwest::Client,
    request_delay_ms: u64,
    jitter_ms: u64,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Yahoo hands out a consent cookie on first contact
            .cookie_store(true)
            .build()?;

        Ok(Self {
            inner,
            request_delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
        })
    }

    /// Single GET decoded as JSON. A failure is final; nothing is retried.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let resp = self.get(&url).await?;
        resp.json::<T>()
            .await
            .map_err(|e| FetchError::Format(format!("{}: {}", url, e)))
    }

    /// Single GET returning the raw body, for pages that are not UTF-8.
    pub async fn get_bytes(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        let resp = self.get(&url).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        self.polite_delay().await;
        debug!("GET {}", url);

        let resp = self.inner.get(url.clone()).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        if self.request_delay_ms == 0 && self.jitter_ms == 0 {
            return;
        }
        let jitter = rand::random_range(0..=self.jitter_ms);
        sleep(Duration::from_millis(self.request_delay_ms + jitter)).await;
    }
}
