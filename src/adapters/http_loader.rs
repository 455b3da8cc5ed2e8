//! HTTP Loader Adapter
//!
//! Implements the `Loader` port against the source of truth's REST API:
//!
//! ```text
//! GET {base}/{kind}s/{id}                     -> record object, 404 when absent
//! GET {base}/{kind}s?criteria=...&limit=N     -> {"ids": [...]}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::duration_str;
use crate::domain::{EntityKind, Loader, QueryCriteria, Record};
use crate::error::{Error, Result};

/// HTTP loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpLoaderConfig {
    /// Base URL of the metadata API
    pub base_url: String,
    /// Per-request timeout
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for HttpLoaderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<String>,
}

/// Query-string parameters for a criteria value.
fn criteria_params(criteria: &QueryCriteria) -> Vec<(&'static str, String)> {
    let mut params = vec![("criteria", criteria.name().to_string())];
    match criteria {
        QueryCriteria::MostViewed { window_hours }
        | QueryCriteria::HighestEngagement { window_hours }
        | QueryCriteria::MostRecent { window_hours } => {
            params.push(("window_hours", window_hours.to_string()));
        }
        QueryCriteria::BestLikeRatio { min_views } => {
            params.push(("min_views", min_views.to_string()));
        }
        QueryCriteria::ByTags { tags, page } => {
            params.push(("tags", tags.join(",")));
            params.push(("page", page.to_string()));
        }
        QueryCriteria::ByChannel { channel_id, page } => {
            params.push(("channel_id", channel_id.clone()));
            params.push(("page", page.to_string()));
        }
        QueryCriteria::MostUsedTags => {}
    }
    params
}

/// `Loader` backed by a REST API
#[derive(Clone)]
pub struct HttpLoader {
    client: Client,
    base_url: String,
}

impl HttpLoader {
    pub fn new(config: HttpLoaderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}s", self.base_url, kind.as_str())
    }

    fn record_url(&self, kind: EntityKind, id: &str) -> String {
        format!("{}/{}", self.collection_url(kind), urlencoding::encode(id))
    }
}

impl std::fmt::Debug for HttpLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLoader")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl Loader for HttpLoader {
    #[instrument(skip(self))]
    async fn fetch(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        let response = self.client.get(self.record_url(kind, id)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let record = response.json::<Record>().await?;
                Ok(Some(record))
            }
            status => Err(Error::loader(
                kind,
                id,
                format!("fetch failed with status: {}", status),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn query(
        &self,
        kind: EntityKind,
        criteria: &QueryCriteria,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut params = criteria_params(criteria);
        params.push(("limit", limit.to_string()));

        debug!(kind = %kind, criteria = criteria.name(), limit, "Querying source");
        let response = self
            .client
            .get(self.collection_url(kind))
            .query(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::loader(
                kind,
                criteria.name(),
                format!("query failed with status: {}", response.status()),
            ));
        }

        let mut body = response.json::<QueryResponse>().await?;
        body.ids.truncate(limit);
        Ok(body.ids)
    }
}
