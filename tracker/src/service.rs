//! The once-constructed entry point: owns the store, coordinator and
//! scheduler, and turns caller input into serializable responses.

use crate::{
    clock::{Clock, SystemClock},
    config::{Config, ConfigError, StoreBackendKind},
    coordinator::FreshnessCoordinator,
    error::{parse_object_id, Error, ErrorKind},
    propagator::propagate_one,
    scheduler::{BatchOptions, BatchScheduler, Simulation, SimulationRequest},
    source::{CelestrakAdapter, SourceAdapter, SourceError},
    store::{EphemerisStore, FileBackend, MemoryBackend, StoreBackend, StoreError},
};
use chrono::{SubsecRound, TimeDelta};
use elset_protocol::{parse_catalog, scan_catalog, snippet, SNIPPET_LEN};
use elset_types::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Original service defaults
const DEFAULT_SIMULATION_DURATION_SEC: i64 = 600;
const DEFAULT_SIMULATION_STEP_SEC: i64 = 1;
const DEFAULT_BATCH_DURATION_SEC: i64 = 84_000;
const DEFAULT_BATCH_STEP_SEC: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Clone)]
pub struct Tracker {
    config: Config,
    scheduler: BatchScheduler,
}

impl Tracker {
    pub fn new(config: Config) -> Result<Self, SetupError> {
        let backend: Arc<dyn StoreBackend> = match config.store.backend {
            StoreBackendKind::File => Arc::new(FileBackend::open(&config.store.path)?),
            StoreBackendKind::Memory => Arc::new(MemoryBackend::default()),
        };
        let source = Arc::new(CelestrakAdapter::new(&config.source)?);
        Ok(Self::with_parts(config, backend, source, Arc::new(SystemClock)))
    }

    /// Build from explicit collaborators
    pub fn with_parts(
        config: Config,
        backend: Arc<dyn StoreBackend>,
        source: Arc<dyn SourceAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = EphemerisStore::new(backend, clock);
        let coordinator =
            FreshnessCoordinator::new(store, source, config.freshness.fetch_timeout);
        let scheduler =
            BatchScheduler::new(coordinator, config.batch.concurrency, config.batch.max_steps);
        Tracker { config, scheduler }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &EphemerisStore {
        self.coordinator().store()
    }

    fn coordinator(&self) -> &FreshnessCoordinator {
        self.scheduler.coordinator()
    }

    fn now_utc(&self) -> UtcTimestamp {
        self.store().clock().now()
    }

    fn summary(&self, set: &ElementSet) -> ObjectSummary {
        let epoch_limit = TimeDelta::days(i64::from(self.config.freshness.epoch_stale_after_days));
        ObjectSummary {
            object_id: set.object_id,
            name: set.name(),
            epoch: set.epoch,
            stale: set.is_stale() || self.now_utc() - set.epoch > epoch_limit,
            source: set.source,
        }
    }

    pub async fn lookup(&self, q: &LookupQuery) -> Result<LookupResponse, Error> {
        let object_id = parse_object_id(&q.object_id)?;
        let set = self
            .coordinator()
            .resolve(object_id, self.max_age(q.max_age_hours), q.allow_fetch)
            .await?;
        Ok(self.lookup_response(&set))
    }

    fn lookup_response(&self, set: &ElementSet) -> LookupResponse {
        LookupResponse {
            summary: self.summary(set),
            line1: set.line1.clone(),
            line2: set.line2.clone(),
        }
    }

    /// Position at the current whole second
    pub async fn now(&self, q: &LookupQuery) -> Result<PositionResponse, Error> {
        let object_id = parse_object_id(&q.object_id)?;
        let set = self
            .coordinator()
            .resolve(object_id, self.max_age(q.max_age_hours), q.allow_fetch)
            .await?;
        let point = propagate_one(&set, self.now_utc().trunc_subsecs(0))?;
        Ok(PositionResponse {
            summary: self.summary(&set),
            point,
        })
    }

    pub async fn simulate(&self, q: &SimulationQuery) -> Result<SimulationResponse, Error> {
        let req = SimulationRequest {
            object_id: parse_object_id(&q.object_id)?,
            start_time: parse_start_time(q.start_time.as_deref())?,
            duration_sec: q.duration_sec,
            step_sec: q.step_sec,
        };
        let sim = self
            .scheduler
            .simulate(&req, self.max_age(q.max_age_hours), q.allow_fetch)
            .await?;
        Ok(self.simulation_response(sim))
    }

    fn simulation_response(&self, sim: Simulation) -> SimulationResponse {
        SimulationResponse {
            summary: self.summary(&sim.elset),
            meta: SimulationMeta {
                start_time: sim.start_time,
                duration_sec: sim.duration_sec,
                step_sec: sim.step_sec,
                point_count: sim.series.produced,
                requested_count: sim.series.requested,
            },
            points: sim.series.points,
        }
    }

    pub async fn batch(&self, q: &BatchQuery) -> Result<BatchResponse, Error> {
        if q.object_ids.is_empty() {
            return Err(Error::InvalidRequest("objectIds must not be empty".to_owned()));
        }
        let object_ids = q
            .object_ids
            .iter()
            .map(|s| parse_object_id(s))
            .collect::<Result<Vec<_>, _>>()?;
        let opts = BatchOptions {
            allow_fetch: q.allow_fetch.unwrap_or(self.config.batch.allow_fetch),
            max_age_hours: self.max_age(q.max_age_hours),
            start_time: parse_start_time(q.start_time.as_deref())?,
            deadline: self.config.batch.deadline,
        };
        let result = self
            .scheduler
            .run_batch(&object_ids, q.duration_sec, q.step_sec, &opts)
            .await?;

        let results = result
            .entries
            .into_iter()
            .map(|e| match e.outcome {
                Ok(sim) => BatchResultEntry::Simulation(self.simulation_response(sim)),
                Err(err) => BatchResultEntry::Failure {
                    object_id: e.object_id,
                    error: ErrorBody::from(&err),
                },
            })
            .collect::<Vec<_>>();
        Ok(BatchResponse {
            count: results.len(),
            requested: result.requested,
            succeeded: result.succeeded,
            failed: result.failed,
            results,
        })
    }

    /// Fetch now, whatever the age of the stored value
    pub async fn refresh(&self, object_id: &str) -> Result<LookupResponse, Error> {
        let object_id = parse_object_id(object_id)?;
        let set = self.coordinator().refresh(object_id).await?;
        Ok(self.lookup_response(&set))
    }

    /// Seed the store from a catalog file
    pub async fn import(&self, text: &str) -> Result<ImportResponse, Error> {
        let records = parse_catalog(text)?;
        let (imported, failures) = self.store_records(records).await?;
        info!(
            imported = imported.len(),
            failed = failures.len(),
            "Imported catalog"
        );
        Ok(ImportResponse { imported, failures })
    }

    /// Seed the store from one of the provider's named groups, e.g. `visual`.
    ///
    /// Lines that do not form a record are skipped and reported.
    pub async fn seed_group(&self, group: &str) -> Result<SeedResponse, Error> {
        let group = group.trim();
        let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
        if group.is_empty() || !group.chars().all(valid) {
            return Err(Error::InvalidRequest(format!(
                "group must be a provider group name like 'visual', got '{}'",
                snippet(group, 32)
            )));
        }
        let text = self.coordinator().fetch_group(group).await?;
        let scan = scan_catalog(&text);
        if !scan.skipped.is_empty() {
            warn!(group, skipped = scan.skipped.len(), "Skipped unrecognized lines");
        }
        let (imported, failures) = self.store_records(scan.records).await?;
        info!(
            group,
            imported = imported.len(),
            failed = failures.len(),
            "Seeded group"
        );
        Ok(SeedResponse {
            group: group.to_owned(),
            imported,
            failures,
            skipped: scan.skipped,
        })
    }

    /// `put` every record; a storage failure stops the run
    async fn store_records(
        &self,
        records: Vec<RawElementSet>,
    ) -> Result<(Vec<CatalogId>, Vec<ImportFailure>), Error> {
        let mut imported = Vec::new();
        let mut failures = Vec::new();
        for (index, raw) in records.into_iter().enumerate() {
            let Some(object_id) = raw.catalog_number().filter(|id| *id != 0) else {
                warn!(index, line1 = %raw.line1, "Skipping record without a catalog number");
                failures.push(ImportFailure {
                    index,
                    object_id: None,
                    error: ErrorBody::from(&Error::InvalidFormat(format!(
                        "no catalog number in '{}'",
                        snippet(&raw.line1, SNIPPET_LEN)
                    ))),
                });
                continue;
            };
            match self.store().put_raw(object_id, raw).await {
                Ok(_) => imported.push(object_id),
                Err(e) if e.kind() == ErrorKind::StorageFailure => return Err(e),
                Err(e) => failures.push(ImportFailure {
                    index,
                    object_id: Some(object_id),
                    error: ErrorBody::from(&e),
                }),
            }
        }
        Ok((imported, failures))
    }

    fn max_age(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.config.freshness.max_age_hours)
    }
}

fn parse_start_time(s: Option<&str>) -> Result<Option<UtcTimestamp>, Error> {
    s.map(|s| {
        s.parse::<UtcTimestamp>().map_err(|e| {
            Error::InvalidRequest(format!(
                "startTime must be an ISO-8601 UTC timestamp, got '{}': {e}",
                snippet(s, 40)
            ))
        })
    })
    .transpose()
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupQuery {
    pub object_id: String,
    #[serde(default)]
    pub max_age_hours: Option<u32>,
    #[serde(default = "yes")]
    pub allow_fetch: bool,
}

impl LookupQuery {
    pub fn new<S: Into<String>>(object_id: S) -> Self {
        LookupQuery {
            object_id: object_id.into(),
            max_age_hours: None,
            allow_fetch: true,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationQuery {
    pub object_id: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default = "default_simulation_duration")]
    pub duration_sec: i64,
    #[serde(default = "default_simulation_step")]
    pub step_sec: i64,
    #[serde(default)]
    pub max_age_hours: Option<u32>,
    #[serde(default = "yes")]
    pub allow_fetch: bool,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchQuery {
    pub object_ids: Vec<String>,
    #[serde(default = "default_batch_duration")]
    pub duration_sec: i64,
    #[serde(default = "default_batch_step")]
    pub step_sec: i64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub max_age_hours: Option<u32>,
    /// Falls back to `batch.allow-fetch` from the config
    #[serde(default)]
    pub allow_fetch: Option<bool>,
}

fn yes() -> bool {
    true
}

fn default_simulation_duration() -> i64 {
    DEFAULT_SIMULATION_DURATION_SEC
}

fn default_simulation_step() -> i64 {
    DEFAULT_SIMULATION_STEP_SEC
}

fn default_batch_duration() -> i64 {
    DEFAULT_BATCH_DURATION_SEC
}

fn default_batch_step() -> i64 {
    DEFAULT_BATCH_STEP_SEC
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub object_id: CatalogId,
    pub name: String,
    pub epoch: UtcTimestamp,
    pub stale: bool,
    pub source: Source,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct LookupResponse {
    #[serde(flatten)]
    pub summary: ObjectSummary,
    pub line1: String,
    pub line2: String,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct PositionResponse {
    #[serde(flatten)]
    pub summary: ObjectSummary,
    pub point: PropagatedPoint,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationMeta {
    pub start_time: UtcTimestamp,
    pub duration_sec: i64,
    pub step_sec: i64,
    pub point_count: u64,
    pub requested_count: u64,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct SimulationResponse {
    #[serde(flatten)]
    pub summary: ObjectSummary,
    pub meta: SimulationMeta,
    pub points: Vec<PropagatedPoint>,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        ErrorBody {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(untagged)]
pub enum BatchResultEntry {
    Simulation(SimulationResponse),
    #[serde(rename_all = "camelCase")]
    Failure {
        object_id: CatalogId,
        error: ErrorBody,
    },
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct BatchResponse {
    pub count: usize,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchResultEntry>,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFailure {
    /// Position of the record in the file
    pub index: usize,
    pub object_id: Option<CatalogId>,
    pub error: ErrorBody,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct ImportResponse {
    pub imported: Vec<CatalogId>,
    pub failures: Vec<ImportFailure>,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct SeedResponse {
    pub group: String,
    pub imported: Vec<CatalogId>,
    pub failures: Vec<ImportFailure>,
    /// Excerpts of the lines that were not part of any record
    pub skipped: Vec<String>,
}
