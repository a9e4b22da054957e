//! HTTP file access against the container operations API.

use clouseau_core::{ClouseauError, FileAccess, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

const CAT_ENDPOINT: &str = "/api/container/ops/cat";

/// Fetches file contents with `GET {api_base}/api/container/ops/cat?path=...`.
#[derive(Debug, Clone)]
pub struct HttpFileAccess {
    api_base: String,
    http_client: reqwest::Client,
}

impl HttpFileAccess {
    pub fn new(api_base: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("clouseau-client/0.1")
            .build()
            .unwrap_or_default();

        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.api_base, CAT_ENDPOINT)
    }
}

impl FileAccess for HttpFileAccess {
    fn read_file(&self, path: String) -> BoxFuture<'static, Result<String>> {
        let request = self.http_client.get(self.endpoint()).query(&[("path", path.as_str())]);
        Box::pin(async move {
            debug!(target: "clouseau::session", "Fetching {}", path);
            let response = request
                .send()
                .await
                .map_err(|e| ClouseauError::FileAccess(format!("{}: {}", path, e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ClouseauError::FileAccess(format!("{}: HTTP {}", path, status)));
            }
            response
                .text()
                .await
                .map_err(|e| ClouseauError::FileAccess(format!("{}: {}", path, e)))
        })
    }
}
