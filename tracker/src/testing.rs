//! Fakes and fixtures shared by the unit tests

use crate::{error::Error, source::SourceAdapter};
use async_trait::async_trait;
use elset_types::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Mutex;
use std::time::Duration;

pub fn iss() -> RawElementSet {
    RawElementSet {
        display_name: Some("ISS (ZARYA)".into()),
        line1: "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927".into(),
        line2: "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537".into(),
    }
}

/// Same orbit as [`iss`], with an epoch close to the GEO fixtures
pub fn iss_2023() -> RawElementSet {
    RawElementSet {
        line1: "1 25544U 98067A   23190.40000000 -.00002182  00000-0 -11606-4 0  2928".into(),
        ..iss()
    }
}

pub fn geo1() -> RawElementSet {
    RawElementSet {
        display_name: Some("GEO1".into()),
        line1: "1 37481U 11019A   23190.45078927 -.00000009  00000-0  00000+0 0  9991".into(),
        line2: "2 37481   2.3847  40.6385 0001640  70.7486  43.7146  1.00272292 44578".into(),
    }
}

pub fn geo2() -> RawElementSet {
    RawElementSet {
        display_name: None,
        line1: "1 39120U 13011A   23190.50177227 -.00000262  00000-0  00000+0 0  9997".into(),
        line2: "2 39120   2.3950  38.7964 0001772  68.0002 323.0070  1.00271163 37822".into(),
    }
}

/// Copy of `raw` under another catalog number, checksums recomputed
pub fn renumbered(raw: &RawElementSet, object_id: CatalogId) -> RawElementSet {
    let number = format!("{object_id:05}");
    let renumber = |line: &str| {
        let body = format!("{}{}{}", &line[..2], number, &line[7..68]);
        format!("{body}{}", checksum(&body))
    };
    RawElementSet {
        display_name: raw.display_name.clone(),
        line1: renumber(&raw.line1),
        line2: renumber(&raw.line2),
    }
}

fn checksum(line: &str) -> u32 {
    line.chars()
        .map(|c| match c {
            '-' => 1,
            c => c.to_digit(10).unwrap_or(0),
        })
        .sum::<u32>()
        % 10
}

/// Answers from a fixed script and counts the calls per object.
/// Objects without a script are unavailable.
#[derive(Default)]
pub struct ScriptedAdapter {
    answers: HashMap<CatalogId, Result<RawElementSet, Error>>,
    delays: HashMap<CatalogId, Duration>,
    delay: Duration,
    groups: HashMap<String, String>,
    calls: Mutex<HashMap<CatalogId, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn with(mut self, raw: RawElementSet) -> Self {
        let id = raw.catalog_number().unwrap();
        self.answers.insert(id, Ok(raw));
        self
    }

    pub fn with_error(mut self, object_id: CatalogId, e: Error) -> Self {
        self.answers.insert(object_id, Err(e));
        self
    }

    /// Applies to every object without its own delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_delay_for(mut self, object_id: CatalogId, delay: Duration) -> Self {
        self.delays.insert(object_id, delay);
        self
    }

    /// Catalog text served for `group`
    pub fn with_group(mut self, group: &str, text: &str) -> Self {
        self.groups.insert(group.to_owned(), text.to_owned());
        self
    }

    /// Most fetches ever running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(SeqCst)
    }

    pub fn calls(&self, object_id: CatalogId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&object_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    async fn fetch_raw(&self, object_id: CatalogId) -> Result<RawElementSet, Error> {
        *self.calls.lock().unwrap().entry(object_id).or_default() += 1;
        let running = self.in_flight.fetch_add(1, SeqCst) + 1;
        self.max_in_flight.fetch_max(running, SeqCst);
        let delay = self.delays.get(&object_id).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, SeqCst);
        self.answers
            .get(&object_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(Error::SourceUnavailable {
                    object_id,
                    reason: "HTTP 404".into(),
                })
            })
    }

    async fn fetch_group(&self, group: &str) -> Result<String, Error> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.groups
            .get(group)
            .cloned()
            .ok_or_else(|| Error::GroupUnavailable {
                group: group.to_owned(),
                reason: "HTTP 404".into(),
            })
    }
}
