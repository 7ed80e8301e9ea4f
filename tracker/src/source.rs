//! Fetching element sets from the external provider

use crate::{
    config::{SourceConfig, DEFAULT_SOURCE_URL},
    error::Error,
};
use async_trait::async_trait;
use elset_protocol::{parse_element_set, snippet, SNIPPET_LEN};
use elset_types::prelude::*;
use ratelimit::Ratelimiter;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Something that can produce the current element set text for an object
#[async_trait]
pub trait SourceAdapter: Send + Sync + 'static {
    /// One attempt, no retries and no caching
    async fn fetch_raw(&self, object_id: CatalogId) -> Result<RawElementSet, Error>;

    /// Catalog text for a whole named group, e.g. `visual`
    async fn fetch_group(&self, group: &str) -> Result<String, Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Invalid source URL")]
    Url(#[from] url::ParseError),

    #[error("Failed to build the HTTP client")]
    Client(#[from] reqwest::Error),

    #[error("Invalid request pacing")]
    RateLimit(#[from] ratelimit::Error),
}

/// CelesTrak's GP query endpoint, `?CATNR=<id>&FORMAT=TLE` or
/// `?GROUP=<name>&FORMAT=TLE`
pub struct CelestrakAdapter {
    client: reqwest::Client,
    base: Url,
    limiter: Option<Ratelimiter>,
}

impl CelestrakAdapter {
    pub fn new(cfg: &SourceConfig) -> Result<Self, SourceError> {
        let base = match &cfg.url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_SOURCE_URL)?,
        };
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(cfg.user_agent.as_str())
            .build()?;
        let limiter = match cfg.requests_per_second {
            Some(rps) => Some(
                Ratelimiter::builder(rps, Duration::from_secs(1))
                    .max_tokens(rps)
                    .initial_available(rps)
                    .build()?,
            ),
            None => None,
        };
        Ok(CelestrakAdapter {
            client,
            base,
            limiter,
        })
    }

    pub fn request_url(&self, object_id: CatalogId) -> Url {
        self.query("CATNR", &object_id.to_string())
    }

    pub fn group_url(&self, group: &str) -> Url {
        self.query("GROUP", group)
    }

    fn query(&self, key: &str, value: &str) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair(key, value)
            .append_pair("FORMAT", "TLE");
        url
    }

    /// Body of a successful GET, or the transport/status failure text
    async fn get_text(&self, url: Url) -> Result<String, String> {
        self.pace().await;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(format!("HTTP {status}: {}", snippet(&body, SNIPPET_LEN)))
        }
    }

    async fn pace(&self) {
        if let Some(limiter) = &self.limiter {
            while let Err(wait) = limiter.try_wait() {
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for CelestrakAdapter {
    async fn fetch_raw(&self, object_id: CatalogId) -> Result<RawElementSet, Error> {
        let url = self.request_url(object_id);
        debug!(object_id, %url, "Fetching element set");
        let body = self.get_text(url).await.map_err(|reason| {
            warn!(object_id, %reason, "Element set request failed");
            Error::SourceUnavailable { object_id, reason }
        })?;

        let raw = parse_element_set(&body)?;
        if raw.catalog_number() != Some(object_id) {
            warn!(
                object_id,
                returned = ?raw.catalog_number(),
                "Provider returned an element set for a different object"
            );
            return Err(Error::InvalidFormat(format!(
                "expected object {object_id}, got '{}'",
                snippet(&raw.line1, SNIPPET_LEN)
            )));
        }
        Ok(raw)
    }

    async fn fetch_group(&self, group: &str) -> Result<String, Error> {
        let url = self.group_url(group);
        debug!(group, %url, "Fetching element set group");
        self.get_text(url).await.map_err(|reason| {
            warn!(group, %reason, "Group request failed");
            Error::GroupUnavailable {
                group: group.to_owned(),
                reason,
            }
        })
    }
}
