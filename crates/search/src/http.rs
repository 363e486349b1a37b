//! REST implementation of [`SearchApi`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::api::SearchApi;
use crate::error::SearchError;
use crate::types::{PageRequest, SearchRequest, SnapshotState, SnapshotStatus};
use wflink_metadata::SearchConfig;
use wflink_middleware::TokenProvider;

#[derive(Deserialize)]
struct StatusBody {
    status: SnapshotStatus,
}

/// Result pages come back either bare or wrapped
#[derive(Deserialize)]
#[serde(untagged)]
enum PageBody {
    Items(Vec<Value>),
    Wrapped { items: Vec<Value> },
}

/// Snapshot search over the platform's REST API.
///
/// Every call carries a bearer token. A 401 invalidates the token and the
/// call is retried up to `max_auth_attempts` times in total.
pub struct HttpSearchApi {
    http: Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
    max_auth_attempts: u32,
    timeout: Duration,
}

impl HttpSearchApi {
    pub fn new(
        base_url: &str,
        tokens: Arc<dyn TokenProvider>,
        config: &SearchConfig,
    ) -> Result<Self, SearchError> {
        let base_url = Url::parse(base_url).map_err(|e| SearchError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(SearchError::InvalidUrl(base_url.to_string()));
        }
        let timeout = config.request_timeout();
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            tokens,
            max_auth_attempts: config.max_auth_attempts.max(1),
            timeout,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SearchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SearchError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute<F>(&self, what: &str, build: F) -> Result<Response, SearchError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let token = self.tokens.token().await?;
            let mut request = build(&self.http);
            if !token.is_empty() {
                request = request.bearer_auth(token);
            }

            let resp = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    SearchError::Request(format!(
                        "{} timed out after {}ms",
                        what,
                        self.timeout.as_millis()
                    ))
                } else {
                    SearchError::Request(e.to_string())
                }
            })?;

            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate();
                if attempt >= self.max_auth_attempts {
                    warn!(what, attempts = attempt, "Unauthorized, giving up");
                    return Err(SearchError::Unauthorized { attempts: attempt });
                }
                warn!(what, attempt, "Unauthorized, retrying with a fresh token");
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                debug!(what, "Not found");
                return Err(SearchError::NotFound(what.to_string()));
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(SearchError::Http {
                    status: status.as_u16(),
                    body,
                });
            }
            return Ok(resp);
        }
    }
}

async fn json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, SearchError> {
    resp.json()
        .await
        .map_err(|e| SearchError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl SearchApi for HttpSearchApi {
    async fn submit(&self, request: &SearchRequest) -> Result<SnapshotState, SearchError> {
        let version = request.version.to_string();
        let mut url = self.url(&["search", "snapshot", &request.model, &version])?;
        if request.in_memory {
            url.query_pairs_mut().append_pair("inMemory", "true");
        }
        debug!(url = %url, model = %request.model, version = request.version, "Submitting search");

        let what = format!("model {}/{}", request.model, request.version);
        let resp = self
            .execute(&what, |http| http.post(url.clone()).json(&request.condition))
            .await?;
        json(resp).await
    }

    async fn status(&self, snapshot_id: &str) -> Result<SnapshotStatus, SearchError> {
        let url = self.url(&["search", "snapshot", snapshot_id, "status"])?;
        let what = format!("snapshot {}", snapshot_id);
        let resp = self.execute(&what, |http| http.get(url.clone())).await?;
        let body: StatusBody = json(resp).await?;
        Ok(body.status)
    }

    async fn fetch(&self, snapshot_id: &str, page: PageRequest) -> Result<Vec<Value>, SearchError> {
        let mut url = self.url(&["search", "snapshot", snapshot_id])?;
        url.query_pairs_mut()
            .append_pair("pageSize", &page.page_size.to_string())
            .append_pair("pageNumber", &page.page_number.to_string());

        let what = format!("snapshot {}", snapshot_id);
        let resp = self.execute(&what, |http| http.get(url.clone())).await?;
        match json(resp).await? {
            PageBody::Items(items) | PageBody::Wrapped { items } => Ok(items),
        }
    }
}
