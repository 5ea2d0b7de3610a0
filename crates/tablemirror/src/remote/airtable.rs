//! Records API client.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use url::Url;

use super::errors::{RemoteError, Result, classify_error_response, short_error_message};
use super::rate_limit::ApiRateLimiter;
use super::types::{FetchRequest, Record, RecordPage, RecordSource};
use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpRequest, HttpTransport};
use crate::retry::{RetryConfig, with_retry};
use crate::sync::{DEFAULT_PAGE_SIZE, ProgressCallback, SyncProgress, emit};

/// Default API host.
pub const AIRTABLE_API_URL: &str = "https://api.airtable.com";

/// Request timeout for record pages.
const PAGE_TIMEOUT: StdDuration = StdDuration::from_secs(60);

/// Client for the list-records endpoint of one base.
#[derive(Clone)]
pub struct AirtableClient {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    base_id: String,
    token: String,
    rate_limiter: Option<ApiRateLimiter>,
    retry: RetryConfig,
}

impl AirtableClient {
    /// Create a client backed by reqwest.
    pub fn new(
        api_url: &str,
        base_id: &str,
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
    ) -> Result<Self> {
        let transport = ReqwestTransport::with_timeout(PAGE_TIMEOUT)
            .map_err(|e| RemoteError::Config(e.to_string()))?;

        Ok(Self::new_with_transport(
            api_url,
            base_id,
            token,
            rate_limiter,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(
        api_url: &str,
        base_id: &str,
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            api_url: api_url.trim_end_matches('/').to_string(),
            base_id: base_id.to_string(),
            token: token.to_string(),
            rate_limiter,
            retry: RetryConfig::default(),
        }
    }

    /// Override the backoff used when rate limited.
    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base identifier.
    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(ref limiter) = self.rate_limiter {
            limiter.wait().await;
        }
    }

    /// Build the URL for one page of a list-records call.
    pub(crate) fn page_url(
        &self,
        table_id: &str,
        view_id: &str,
        filter: Option<&str>,
        offset: Option<&str>,
    ) -> Result<String> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| RemoteError::Config(format!("invalid API URL {}: {}", self.api_url, e)))?;

        url.path_segments_mut()
            .map_err(|_| RemoteError::Config(format!("API URL cannot be a base: {}", self.api_url)))?
            .pop_if_empty()
            .extend(["v0", self.base_id.as_str(), table_id]);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("pageSize", &DEFAULT_PAGE_SIZE.to_string());
            if !view_id.is_empty() {
                query.append_pair("view", view_id);
            }
            if let Some(formula) = filter {
                query.append_pair("filterByFormula", formula);
            }
            if let Some(offset) = offset {
                query.append_pair("offset", offset);
            }
        }

        Ok(url.into())
    }

    async fn get_page(&self, url: &str) -> Result<RecordPage> {
        self.wait_for_rate_limit().await;

        let request = HttpRequest::get(url)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.token));

        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(classify_error_response(
                response.status,
                &response.body_text(),
            ));
        }

        Ok(serde_json::from_slice(&response.body)?)
    }
}

#[async_trait]
impl RecordSource for AirtableClient {
    async fn fetch_all(
        &self,
        request: FetchRequest<'_>,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Vec<Record>> {
        emit(
            on_progress,
            SyncProgress::FetchingRecords {
                dataset: request.dataset.to_string(),
                filtered: request.filter.is_some(),
            },
        );

        let mut records: Vec<Record> = Vec::new();
        let mut offset: Option<String> = None;
        let mut page = 0u32;

        loop {
            page += 1;
            let url = self.page_url(
                request.table_id,
                request.view_id,
                request.filter,
                offset.as_deref(),
            )?;

            let chunk = with_retry(
                || self.get_page(&url),
                &self.retry,
                RemoteError::is_rate_limited,
                short_error_message,
                request.dataset,
                on_progress,
                |retry_after_ms, attempt| SyncProgress::RateLimitBackoff {
                    dataset: request.dataset.to_string(),
                    retry_after_ms,
                    attempt,
                },
            )
            .await?;

            let count = chunk.records.len();
            records.extend(chunk.records);
            tracing::debug!(
                dataset = %request.dataset,
                page,
                count,
                total_so_far = records.len(),
                "Fetched page"
            );
            emit(
                on_progress,
                SyncProgress::FetchedPage {
                    dataset: request.dataset.to_string(),
                    page,
                    count,
                    total_so_far: records.len(),
                },
            );

            match chunk.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        emit(
            on_progress,
            SyncProgress::FetchComplete {
                dataset: request.dataset.to_string(),
                total: records.len(),
            },
        );

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{MockTransport, header_get};
    use serde_json::json;

    fn client(transport: &MockTransport) -> AirtableClient {
        AirtableClient::new_with_transport(
            "https://api.example.com/",
            "appBase",
            "secret",
            None,
            Arc::new(transport.clone()),
        )
        .with_retry_config(
            RetryConfig::new(StdDuration::from_millis(1), StdDuration::from_millis(2), 3)
                .with_jitter(false),
        )
    }

    fn request<'a>(filter: Option<&'a str>) -> FetchRequest<'a> {
        FetchRequest {
            dataset: "events",
            table_id: "tblEvents",
            view_id: "viwGrid",
            filter,
        }
    }

    #[test]
    fn test_page_url_encodes_filter_and_offset() {
        let transport = MockTransport::new();
        let client = client(&transport);

        let url = client
            .page_url("tblEvents", "viwGrid", Some("{Published}"), Some("itr/1"))
            .unwrap();

        assert!(url.starts_with("https://api.example.com/v0/appBase/tblEvents?"));
        assert!(url.contains("pageSize=100"));
        assert!(url.contains("view=viwGrid"));
        assert!(url.contains("filterByFormula=%7BPublished%7D"));
        assert!(url.contains("offset=itr%2F1"));
    }

    #[test]
    fn test_page_url_escapes_table_names() {
        let transport = MockTransport::new();
        let client = client(&transport);

        let url = client.page_url("My Table", "", None, None).unwrap();
        assert!(url.contains("/v0/appBase/My%20Table?"));
        assert!(!url.contains("view="));
    }

    #[tokio::test]
    async fn test_fetch_all_follows_offsets() {
        let transport = MockTransport::new();
        let client = client(&transport);

        let first = client.page_url("tblEvents", "viwGrid", None, None).unwrap();
        let second = client
            .page_url("tblEvents", "viwGrid", None, Some("itr2"))
            .unwrap();

        transport.push(
            &first,
            200,
            json!({"records": [{"id": "rec1", "fields": {"Name": "A"}}], "offset": "itr2"})
                .to_string(),
        );
        transport.push(
            &second,
            200,
            json!({"records": [{"id": "rec2", "fields": {"Name": "B"}}]}).to_string(),
        );

        let records = client.fetch_all(request(None), None).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rec1", "rec2"]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            header_get(&requests[0].headers, "authorization"),
            Some("Bearer secret")
        );
    }

    #[tokio::test]
    async fn test_fetch_all_reports_unknown_field() {
        let transport = MockTransport::new();
        let client = client(&transport);

        let url = client
            .page_url("tblEvents", "viwGrid", Some("{Gone}"), None)
            .unwrap();
        transport.push(
            &url,
            422,
            r#"{"error":{"type":"INVALID_FILTER_BY_FORMULA","message":"Unknown field names: gone"}}"#,
        );

        let err = client
            .fetch_all(request(Some("{Gone}")), None)
            .await
            .expect_err("filter should be rejected");
        assert!(err.is_unknown_field());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_retries_rate_limits() {
        let transport = MockTransport::new();
        let client = client(&transport);

        let url = client.page_url("tblEvents", "viwGrid", None, None).unwrap();
        transport.push(&url, 429, r#"{"errors":[{"error":"RATE_LIMIT_REACHED"}]}"#);
        transport.push(
            &url,
            200,
            json!({"records": [{"id": "rec1", "fields": {}}]}).to_string(),
        );

        let records = client.fetch_all(request(None), None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(transport.request_count(&url), 2);
    }

    #[tokio::test]
    async fn test_fetch_all_server_error_is_fatal() {
        let transport = MockTransport::new();
        let client = client(&transport);

        let url = client.page_url("tblEvents", "viwGrid", None, None).unwrap();
        transport.push(&url, 500, "internal");

        let err = client
            .fetch_all(request(None), None)
            .await
            .expect_err("500 should fail");
        assert!(matches!(err, RemoteError::Api { status: 500, .. }));
        assert_eq!(transport.request_count(&url), 1);
    }
}
