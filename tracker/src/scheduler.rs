//! Stepped simulations for one object or a fleet, under a concurrency cap

use crate::{
    coordinator::FreshnessCoordinator,
    error::Error,
    propagator::{step_time, Orbit, Series},
};
use chrono::SubsecRound;
use elset_types::prelude::*;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::Semaphore, task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_AGE_HOURS: u32 = 12;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SimulationRequest {
    pub object_id: CatalogId,
    /// Defaults to now, truncated to whole seconds
    pub start_time: Option<UtcTimestamp>,
    pub duration_sec: i64,
    pub step_sec: i64,
}

/// Number of steps after the start point, `floor(duration / step)`.
///
/// Rejects the request before any work happens.
pub fn step_count(duration_sec: i64, step_sec: i64, max_steps: u64) -> Result<u64, Error> {
    if duration_sec <= 0 || step_sec <= 0 {
        return Err(Error::InvalidStepConfig {
            duration_sec,
            step_sec,
            reason: "both must be positive",
        });
    }
    let steps = (duration_sec / step_sec) as u64;
    if steps > max_steps {
        return Err(Error::TooManySteps { steps, max_steps });
    }
    Ok(steps)
}

/// Time of the last step, when it is representable
pub fn window_end(
    start: UtcTimestamp,
    steps: u64,
    duration_sec: i64,
    step_sec: i64,
) -> Result<UtcTimestamp, Error> {
    step_time(start, steps, step_sec).ok_or(Error::InvalidStepConfig {
        duration_sec,
        step_sec,
        reason: "the window ends outside the supported time range",
    })
}

/// The outcome of one stepped simulation
#[derive(Clone, PartialEq, Debug)]
pub struct Simulation {
    pub elset: ElementSet,
    pub start_time: UtcTimestamp,
    pub duration_sec: i64,
    pub step_sec: i64,
    pub series: Series,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BatchOptions {
    pub allow_fetch: bool,
    pub max_age_hours: u32,
    /// Shared by every object; defaults to now
    pub start_time: Option<UtcTimestamp>,
    /// Work still running when this expires is abandoned
    pub deadline: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            allow_fetch: false,
            max_age_hours: DEFAULT_MAX_AGE_HOURS,
            start_time: None,
            deadline: None,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct BatchEntry {
    pub object_id: CatalogId,
    pub outcome: Result<Simulation, Error>,
}

/// Per-object outcomes, in the order the objects were requested
#[derive(Clone, PartialEq, Debug)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchResult {
    fn new(entries: Vec<BatchEntry>) -> Self {
        let succeeded = entries.iter().filter(|e| e.outcome.is_ok()).count();
        BatchResult {
            requested: entries.len(),
            succeeded,
            failed: entries.len() - succeeded,
            entries,
        }
    }
}

#[derive(Clone)]
pub struct BatchScheduler {
    coordinator: FreshnessCoordinator,
    concurrency: usize,
    max_steps: u64,
}

impl BatchScheduler {
    pub fn new(coordinator: FreshnessCoordinator, concurrency: usize, max_steps: u64) -> Self {
        BatchScheduler {
            coordinator,
            concurrency: concurrency.max(1),
            max_steps,
        }
    }

    pub fn coordinator(&self) -> &FreshnessCoordinator {
        &self.coordinator
    }

    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    fn default_start(&self) -> UtcTimestamp {
        self.coordinator.store().clock().now().trunc_subsecs(0)
    }

    pub async fn simulate(
        &self,
        req: &SimulationRequest,
        max_age_hours: u32,
        allow_fetch: bool,
    ) -> Result<Simulation, Error> {
        let steps = step_count(req.duration_sec, req.step_sec, self.max_steps)?;
        let start = req.start_time.unwrap_or_else(|| self.default_start());
        window_end(start, steps, req.duration_sec, req.step_sec)?;
        simulate_one(
            &self.coordinator,
            req.object_id,
            start,
            steps,
            req.duration_sec,
            req.step_sec,
            max_age_hours,
            allow_fetch,
        )
        .await
    }

    pub async fn run_batch(
        &self,
        object_ids: &[CatalogId],
        duration_sec: i64,
        step_sec: i64,
        opts: &BatchOptions,
    ) -> Result<BatchResult, Error> {
        let steps = step_count(duration_sec, step_sec, self.max_steps)?;
        let start = opts.start_time.unwrap_or_else(|| self.default_start());
        window_end(start, steps, duration_sec, step_sec)?;
        let deadline = opts.deadline.map(|d| Instant::now() + d);
        info!(
            objects = object_ids.len(),
            steps,
            concurrency = self.concurrency,
            allow_fetch = opts.allow_fetch,
            "Starting batch"
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (idx, &object_id) in object_ids.iter().enumerate() {
            let permits = permits.clone();
            let coordinator = self.coordinator.clone();
            let (max_age_hours, allow_fetch) = (opts.max_age_hours, opts.allow_fetch);
            tasks.spawn(async move {
                let work = async {
                    match permits.acquire_owned().await {
                        Ok(_permit) => {
                            simulate_one(
                                &coordinator,
                                object_id,
                                start,
                                steps,
                                duration_sec,
                                step_sec,
                                max_age_hours,
                                allow_fetch,
                            )
                            .await
                        }
                        Err(_) => Err(Error::Abandoned(object_id)),
                    }
                };
                (idx, catch_worker_panic(object_id, work).await)
            });
        }

        let mut slots: Vec<Option<Result<Simulation, Error>>> = vec![None; object_ids.len()];
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((idx, outcome)) => slots[idx] = Some(outcome),
                    Err(e) => warn!(error = %e, "Batch worker failed"),
                }
            }
        };
        match deadline {
            Some(at) => {
                if tokio::time::timeout_at(at, collect).await.is_err() {
                    warn!(
                        unfinished = tasks.len(),
                        "Batch deadline expired, abandoning unfinished work"
                    );
                    tasks.abort_all();
                }
            }
            None => collect.await,
        }

        let entries = object_ids
            .iter()
            .zip(slots)
            .map(|(&object_id, slot)| BatchEntry {
                object_id,
                outcome: slot.unwrap_or(Err(Error::Abandoned(object_id))),
            })
            .collect();
        let result = BatchResult::new(entries);
        info!(
            requested = result.requested,
            succeeded = result.succeeded,
            failed = result.failed,
            "Finished batch"
        );
        Ok(result)
    }
}

/// A panicking worker becomes a failed entry for its own object
async fn catch_worker_panic<F>(object_id: CatalogId, work: F) -> Result<Simulation, Error>
where
    F: Future<Output = Result<Simulation, Error>>,
{
    AssertUnwindSafe(work).catch_unwind().await.unwrap_or_else(|panic| {
        let reason = panic_reason(panic.as_ref());
        warn!(object_id, %reason, "Batch worker panicked");
        Err(Error::WorkerFailure { object_id, reason })
    })
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_owned()
    }
}

#[allow(clippy::too_many_arguments)]
async fn simulate_one(
    coordinator: &FreshnessCoordinator,
    object_id: CatalogId,
    start: UtcTimestamp,
    steps: u64,
    duration_sec: i64,
    step_sec: i64,
    max_age_hours: u32,
    allow_fetch: bool,
) -> Result<Simulation, Error> {
    let elset = coordinator
        .resolve(object_id, max_age_hours, allow_fetch)
        .await?;
    let series = Orbit::new(&elset)?.series(start, steps, step_sec);
    if series.produced == 0 {
        return Err(Error::PropagationFailure {
            object_id,
            reason: format!("no valid position in {} steps", series.requested),
        });
    }
    debug!(
        object_id,
        source = %elset.source,
        produced = series.produced,
        "Simulated"
    );
    Ok(Simulation {
        elset,
        start_time: start,
        duration_sec,
        step_sec,
        series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        error::ErrorKind,
        store::{EphemerisStore, MemoryBackend, StoreBackend},
        testing::{geo1, geo2, iss_2023, renumbered, ScriptedAdapter},
    };

    const T0: &str = "2023-07-09T12:00:00Z";

    struct Fixture {
        backend: Arc<MemoryBackend>,
        source: Arc<ScriptedAdapter>,
        scheduler: BatchScheduler,
    }

    fn fixture(source: ScriptedAdapter, concurrency: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0.parse().unwrap()));
        let backend = Arc::new(MemoryBackend::default());
        let store = EphemerisStore::new(backend.clone(), clock);
        let source = Arc::new(source);
        let coordinator =
            FreshnessCoordinator::new(store, source.clone(), Duration::from_secs(5));
        Fixture {
            backend,
            source,
            scheduler: BatchScheduler::new(coordinator, concurrency, 100_000),
        }
    }

    async fn seed(f: &Fixture, raws: &[RawElementSet]) {
        for raw in raws {
            f.scheduler
                .coordinator()
                .store()
                .put_raw(raw.catalog_number().unwrap(), raw.clone())
                .await
                .unwrap();
        }
    }

    fn ids(r: &BatchResult) -> Vec<CatalogId> {
        r.entries.iter().map(|e| e.object_id).collect()
    }

    #[test]
    fn guardrails() {
        assert_eq!(step_count(600, 60, 100_000), Ok(10));
        assert_eq!(step_count(59, 60, 100_000), Ok(0));
        assert_eq!(step_count(100_000, 1, 100_000), Ok(100_000));
        assert_eq!(
            step_count(600_000, 1, 100_000),
            Err(Error::TooManySteps {
                steps: 600_000,
                max_steps: 100_000
            })
        );
        assert_eq!(
            step_count(0, 60, 100_000).unwrap_err().kind(),
            ErrorKind::InvalidStepConfig
        );
        assert_eq!(
            step_count(i64::MAX, i64::MAX, 100_000),
            Ok(1)
        );
        assert_eq!(
            step_count(600, -1, 100_000).unwrap_err().kind(),
            ErrorKind::InvalidStepConfig
        );
    }

    #[test]
    fn window_must_be_representable() {
        let start: UtcTimestamp = T0.parse().unwrap();
        assert_eq!(
            window_end(start, 10, 600, 60),
            Ok("2023-07-09T12:10:00Z".parse().unwrap())
        );
        let err = window_end(start, 1, 10_i64.pow(13), 10_i64.pow(13)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStepConfig);
        assert!(window_end(start, 1, i64::MAX, i64::MAX).is_err());
    }

    #[tokio::test]
    async fn huge_steps_are_rejected() {
        let f = fixture(ScriptedAdapter::default().with(geo1()), 4);
        seed(&f, &[geo1()]).await;
        let req = SimulationRequest {
            object_id: 37481,
            start_time: None,
            duration_sec: 10_i64.pow(16),
            step_sec: 10_i64.pow(16),
        };
        let err = f.scheduler.simulate(&req, 12, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStepConfig);

        let opts = BatchOptions {
            allow_fetch: true,
            ..Default::default()
        };
        let err = f
            .scheduler
            .run_batch(&[37481], 10_i64.pow(13), 10_i64.pow(13), &opts)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStepConfig);
        assert_eq!(f.source.total_calls(), 0);
    }

    async fn exploding_worker() -> Result<Simulation, Error> {
        panic!("step table corrupted")
    }

    #[tokio::test]
    async fn worker_panic_is_its_own_failure() {
        let outcome = catch_worker_panic(37481, exploding_worker()).await;
        let err = outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkerFailure);
        assert!(err.to_string().contains("step table corrupted"), "{err}");

        let outcome = catch_worker_panic(37481, async {
            Err(Error::NotFoundInStore(37481))
        })
        .await;
        assert_eq!(outcome.unwrap_err(), Error::NotFoundInStore(37481));
    }

    #[tokio::test]
    async fn concurrency_limit_holds() {
        let source = (1..=10).fold(
            ScriptedAdapter::default().with_delay(Duration::from_millis(50)),
            |source, i| source.with(renumbered(&geo1(), 40_000 + i)),
        );
        let f = fixture(source, 2);
        let ids: Vec<CatalogId> = (1..=10).map(|i| 40_000 + i).collect();
        let opts = BatchOptions {
            allow_fetch: true,
            ..Default::default()
        };
        let r = f.scheduler.run_batch(&ids, 120, 60, &opts).await.unwrap();
        assert_eq!(r.succeeded, 10);
        assert_eq!(f.source.total_calls(), 10);
        assert!(f.source.max_in_flight() <= 2, "{}", f.source.max_in_flight());
        assert!(f.source.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn single_simulation() {
        let f = fixture(ScriptedAdapter::default(), 4);
        seed(&f, &[geo1()]).await;
        let sim = f
            .scheduler
            .simulate(
                &SimulationRequest {
                    object_id: 37481,
                    start_time: None,
                    duration_sec: 3600,
                    step_sec: 600,
                },
                12,
                false,
            )
            .await
            .unwrap();
        assert_eq!(sim.start_time, T0.parse::<UtcTimestamp>().unwrap());
        assert_eq!(sim.series.requested, 7);
        assert_eq!(sim.series.points.len(), 7);
        assert_eq!(sim.elset.source, Source::Store);
        for p in &sim.series.points {
            // geostationary, so roughly 35786 km up and near the equator
            assert!((35_000.0..36_500.0).contains(&p.alt), "{p:?}");
            assert!(p.lat.abs() < 5.0, "{p:?}");
        }
    }

    #[tokio::test]
    async fn order_preserved_with_slow_middle() {
        let source = ScriptedAdapter::default()
            .with(iss_2023())
            .with(geo1())
            .with(geo2())
            .with_delay_for(37481, Duration::from_millis(200));
        let f = fixture(source, 4);
        let opts = BatchOptions {
            allow_fetch: true,
            ..Default::default()
        };
        let r = f
            .scheduler
            .run_batch(&[25544, 37481, 39120], 600, 60, &opts)
            .await
            .unwrap();
        assert_eq!(ids(&r), vec![25544, 37481, 39120]);
        assert_eq!(r.succeeded, 3);
        for e in &r.entries {
            let sim = e.outcome.as_ref().unwrap();
            assert_eq!(sim.elset.object_id, e.object_id);
            assert_eq!(sim.elset.source, Source::Fetched);
        }
    }

    #[tokio::test]
    async fn partial_failure() {
        let f = fixture(ScriptedAdapter::default().with(geo2()), 4);
        seed(&f, &[iss_2023(), geo1()]).await;
        let r = f
            .scheduler
            .run_batch(&[25544, 39120, 37481], 600, 60, &BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(r.requested, 3);
        assert_eq!(r.entries.len(), 3);
        assert_eq!(r.succeeded, 2);
        assert_eq!(r.failed, 1);
        assert_eq!(ids(&r), vec![25544, 39120, 37481]);
        assert_eq!(
            r.entries[1].outcome.as_ref().unwrap_err(),
            &Error::NotFoundInStore(39120)
        );
        // fetch is off by default
        assert_eq!(f.source.total_calls(), 0);
    }

    #[tokio::test]
    async fn too_many_steps_touches_nothing() {
        let f = fixture(ScriptedAdapter::default().with(iss_2023()), 4);
        let opts = BatchOptions {
            allow_fetch: true,
            ..Default::default()
        };
        let err = f
            .scheduler
            .run_batch(&[25544, 37481], 600_000, 1, &opts)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooManySteps);
        assert_eq!(f.source.total_calls(), 0);
        assert!(f.backend.list().unwrap().is_empty());
        assert!(f.backend.history(25544).unwrap().is_empty());
    }

    #[tokio::test]
    async fn deadline_keeps_completed_entries() {
        let source = ScriptedAdapter::default()
            .with(iss_2023())
            .with(geo1())
            .with_delay_for(37481, Duration::from_secs(10));
        let f = fixture(source, 4);
        let opts = BatchOptions {
            allow_fetch: true,
            deadline: Some(Duration::from_millis(300)),
            ..Default::default()
        };
        let r = f
            .scheduler
            .run_batch(&[25544, 37481], 600, 60, &opts)
            .await
            .unwrap();
        assert_eq!(ids(&r), vec![25544, 37481]);
        assert!(r.entries[0].outcome.is_ok());
        assert_eq!(
            r.entries[1].outcome.as_ref().unwrap_err(),
            &Error::Abandoned(37481)
        );
        assert_eq!((r.succeeded, r.failed), (1, 1));
    }

    #[tokio::test]
    async fn concurrency_of_one_still_completes() {
        let f = fixture(ScriptedAdapter::default(), 1);
        seed(&f, &[iss_2023(), geo1(), geo2()]).await;
        let r = f
            .scheduler
            .run_batch(&[39120, 25544, 39120, 37481], 120, 60, &BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(ids(&r), vec![39120, 25544, 39120, 37481]);
        assert_eq!(r.succeeded, 4);
        for e in &r.entries {
            assert_eq!(e.outcome.as_ref().unwrap().series.points.len(), 3);
        }
    }

    #[tokio::test]
    async fn empty_batch() {
        let f = fixture(ScriptedAdapter::default(), 4);
        let r = f
            .scheduler
            .run_batch(&[], 600, 60, &BatchOptions::default())
            .await
            .unwrap();
        assert_eq!((r.requested, r.succeeded, r.failed), (0, 0, 0));
    }
}
