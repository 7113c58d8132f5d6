//! Bulk indexing into Elasticsearch over its HTTP API.
//!
//! Documents are upserted by id with full-replace semantics, so re-sending
//! the same document set is idempotent; the retry wrapper can safely replay
//! an entire bulk request after a connection loss. Per-document rejections
//! are counted and logged but never abort the batch.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{error, info};

use crate::config::ElasticConfig;
use crate::error::SyncError;
use crate::model::Filmwork;

/// Outcome of one bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Write side of the pipeline.
#[async_trait]
pub trait DocumentSink {
    /// Upsert every document by id in a single bulk request. Partial
    /// per-document failures are reported, not raised.
    async fn bulk_upsert(&self, films: &[Filmwork]) -> Result<WriteReport, SyncError>;
}

/// Elasticsearch-backed [`DocumentSink`].
pub struct ElasticSink {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    index: BulkItemStatus,
}

#[derive(Debug, Deserialize)]
struct BulkItemStatus {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<serde_json::Value>,
}

impl ElasticSink {
    /// Connect and wait for the cluster to be at least yellow.
    pub async fn connect(config: &ElasticConfig) -> Result<Self, SyncError> {
        let sink = Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
        };
        let url = format!(
            "{}/_cluster/health?wait_for_status=yellow&timeout=30s",
            sink.base_url
        );
        let response = sink.client.get(&url).send().await?;
        check_status(response).await?;
        info!(url = %sink.base_url, "connected to elasticsearch");
        Ok(sink)
    }

    /// Create the target index from the schema blob if it does not exist.
    ///
    /// The blob is the externally supplied settings+mappings document,
    /// passed through opaquely.
    pub async fn ensure_index(&self, schema: &serde_json::Value) -> Result<(), SyncError> {
        let url = format!("{}/{}", self.base_url, self.index);
        let response = self.client.head(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            info!(index = %self.index, "index missing, creating from schema");
            let response = self.client.put(&url).json(schema).send().await?;
            check_status(response).await?;
        } else {
            check_status(response).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentSink for ElasticSink {
    async fn bulk_upsert(&self, films: &[Filmwork]) -> Result<WriteReport, SyncError> {
        if films.is_empty() {
            return Ok(WriteReport::default());
        }

        let body = bulk_body(&self.index, films)?;
        let url = format!("{}/_bulk", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let bulk: BulkResponse = response.json().await?;

        let report = summarize(&bulk);
        if report.succeeded > 0 {
            info!(updated = report.succeeded, "filmworks updated in elasticsearch");
        }
        Ok(report)
    }
}

/// Map a non-success reply into the error taxonomy.
///
/// Auth rejections get their own fatal variant so the retry wrapper never
/// hammers a misconfigured cluster forever.
async fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SyncError::Unauthorized { status });
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::ElasticStatus { status, body })
}

/// Build the NDJSON `_bulk` body: one action line and one document per film.
fn bulk_body(index: &str, films: &[Filmwork]) -> Result<String, SyncError> {
    let mut body = String::new();
    for film in films {
        let action = serde_json::json!({ "index": { "_index": index, "_id": film.id } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&serde_json::to_string(film)?);
        body.push('\n');
    }
    Ok(body)
}

/// Count per-item outcomes, logging each rejected document.
fn summarize(bulk: &BulkResponse) -> WriteReport {
    let mut report = WriteReport::default();
    for item in &bulk.items {
        if item.index.error.is_some() || item.index.status >= 400 {
            report.failed += 1;
            error!(
                id = item.index.id.as_deref().unwrap_or("?"),
                status = item.index.status,
                error = %item.index.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                "document rejected by elasticsearch"
            );
        } else {
            report.succeeded += 1;
        }
    }
    if bulk.errors && report.failed == 0 {
        // errors=true with no itemized failure should not happen; surface it.
        error!("bulk response flagged errors without itemized failures");
    }
    report
}
