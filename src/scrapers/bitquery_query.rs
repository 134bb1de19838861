//! Bitquery GraphQL batch query client
//!
//! Authoritative source for the reconciliation. Pages through DEXTrades in a
//! block-time window with `limit`/`offset`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::audit::fetcher::{QueryPage, QueryPageSource};
use crate::models::{format_block_time, RecordSource, Window};
use crate::scrapers::dex_trades::{parse_trades, DEX_TRADES_RANGE_QUERY};

pub const BITQUERY_HTTP_URL: &str = "https://streaming.bitquery.io/graphql";

/// Connection-level retry applied inside the client, never by the fetcher.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: `base_delay * attempt` (attempt is 1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[derive(Debug, Clone, Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Value>,
}

#[derive(Clone)]
pub struct BitqueryQueryClient {
    client: Client,
    url: String,
    token: String,
    retry: RetryPolicy,
}

impl BitqueryQueryClient {
    pub fn new(url: &str, token: &str, request_timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", token)
                        .parse()
                        .context("Invalid Bitquery token")?,
                );
                headers
            })
            .build()
            .context("Failed to build BitqueryQueryClient")?;

        Ok(Self {
            client,
            url: url.to_string(),
            token: token.to_string(),
            retry,
        })
    }

    async fn post_once(&self, variables: &Value) -> Result<Value, RequestFailure> {
        let body = GraphqlRequest {
            query: DEX_TRADES_RANGE_QUERY,
            variables: variables.clone(),
        };

        let resp = self
            .client
            .post(&self.url)
            .query(&[("token", self.token.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(RequestFailure::from_reqwest)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RequestFailure::Fatal(anyhow!(
                "POST graphql {}: check BITQUERY_TOKEN",
                status
            )));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RequestFailure::Fatal(anyhow!("POST graphql {}: {}", status, text)));
        }

        let parsed: GraphqlResponse = resp.json().await.map_err(RequestFailure::from_reqwest)?;
        if let Some(errors) = parsed.errors.filter(|e| !e.is_null()) {
            return Err(RequestFailure::Fatal(anyhow!("GraphQL errors: {}", errors)));
        }

        Ok(parsed.data.unwrap_or(Value::Null))
    }
}

/// Splits failures into ones worth another attempt and ones that are final.
enum RequestFailure {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl RequestFailure {
    fn from_reqwest(e: reqwest::Error) -> Self {
        // A dropped chunked body surfaces as a body/decode error on large pages
        if e.is_connect() || e.is_timeout() || e.is_body() || e.is_decode() || e.is_request() {
            Self::Retryable(e.into())
        } else {
            Self::Fatal(e.into())
        }
    }
}

#[async_trait]
impl QueryPageSource for BitqueryQueryClient {
    async fn fetch_page(&self, window: &Window, limit: usize, offset: u64) -> Result<QueryPage> {
        let variables = serde_json::json!({
            "since": format_block_time(&window.start()),
            "till": format_block_time(&window.end()),
            "limit": limit,
            "offset": offset,
        });

        let mut attempt = 1;
        let data = loop {
            match self.post_once(&variables).await {
                Ok(data) => break data,
                Err(RequestFailure::Fatal(e)) => return Err(e),
                Err(RequestFailure::Retryable(e)) if attempt < self.retry.max_attempts => {
                    let wait = self.retry.delay_for(attempt);
                    warn!(
                        "Query offset {}: connection error ({}), retrying in {:?} ({}/{})",
                        offset, e, wait, attempt, self.retry.max_attempts
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(RequestFailure::Retryable(e)) => {
                    return Err(e.context(format!(
                        "giving up after {} attempts",
                        self.retry.max_attempts
                    )))
                }
            }
        };

        Ok(parse_trades(&data, RecordSource::Query))
    }
}
