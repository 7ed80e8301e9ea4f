use crate::{time::UtcTimestamp, CatalogId};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Where the element set handed to a caller came from
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// Served from the store within the freshness window
    #[display(fmt = "store")]
    Store,
    /// Served from the store past the freshness window
    #[display(fmt = "store-stale")]
    StoreStale,
    /// Fetched from the external provider for this request
    #[display(fmt = "fetched")]
    Fetched,
}

/// The latest known element set for one object
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSet {
    pub object_id: CatalogId,
    pub display_name: Option<String>,
    pub line1: String,
    pub line2: String,
    /// Reference instant encoded in line 1
    pub epoch: UtcTimestamp,
    pub fetched_at: UtcTimestamp,
    pub updated_at: UtcTimestamp,
    pub source: Source,
}

impl ElementSet {
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn is_stale(&self) -> bool {
        self.source == Source::StoreStale
    }

    /// Display name, or a placeholder derived from the catalog number
    pub fn name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| format!("NORAD {}", self.object_id))
    }

    pub fn history_entry(&self) -> ElementSetHistory {
        ElementSetHistory {
            object_id: self.object_id,
            display_name: self.display_name.clone(),
            line1: self.line1.clone(),
            line2: self.line2.clone(),
            epoch: self.epoch,
            fetched_at: self.fetched_at,
        }
    }
}

/// One row of the append-only fetch log
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSetHistory {
    pub object_id: CatalogId,
    pub display_name: Option<String>,
    pub line1: String,
    pub line2: String,
    pub epoch: UtcTimestamp,
    pub fetched_at: UtcTimestamp,
}
