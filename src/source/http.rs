use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, instrument};

use crate::error::SyncError;
use crate::model::ApiShow;
use crate::source::{parse_envelope, truncate_for_log, ShowSource};

/// Live upstream endpoint serving the all-shows envelope.
#[derive(Debug, Clone)]
pub struct HttpSource {
    url: String,
    http: Client,
}

impl HttpSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let http = Client::builder()
            .user_agent(concat!("showtime-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::SourceUnavailable(format!("http client setup failed: {e}")))?;
        Ok(Self {
            url: url.trim().to_string(),
            http,
        })
    }
}

#[async_trait]
impl ShowSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<ApiShow>, SyncError> {
        let resp = self
            .http
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SyncError::SourceUnavailable(format!("GET {} failed: {e}", self.url)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::SourceUnavailable(format!(
                "GET {} returned {status}: {}",
                self.url,
                truncate_for_log(&body, 500)
            )));
        }

        let body = resp.bytes().await.map_err(|e| {
            SyncError::SourceUnavailable(format!("reading body of {} failed: {e}", self.url))
        })?;
        let shows = parse_envelope(&body)?;
        info!(count = shows.len(), "received shows from api");
        Ok(shows)
    }
}
