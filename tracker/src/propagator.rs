//! SGP4/SDP4 propagation of element sets to geodetic positions
//!
//! Everything here is pure CPU work: no I/O and no shared state. The SGP4
//! output is in the TEME frame; it is rotated into the Earth-fixed frame by
//! Greenwich mean sidereal time and converted to WGS-84 latitude, longitude
//! and altitude.

use crate::error::Error;
use chrono::{TimeDelta, TimeZone, Utc};
use elset_protocol::{parse_epoch_fields, snippet, EPOCH_CENTURY_PIVOT, SNIPPET_LEN};
use elset_types::prelude::*;
use na::{Rotation3, Vector3};
use nav_types::{ECEF, WGS84};
use std::f64::consts::TAU;
use tracing::debug;

const MICROS_PER_DAY: f64 = 86_400_000_000.0;
const MICROS_PER_MINUTE: f64 = 60_000_000.0;
const UNIX_EPOCH_JULIAN_DATE: f64 = 2_440_587.5;
const J2000_JULIAN_DATE: f64 = 2_451_545.0;

/// Reference epoch encoded in columns 19-32 of line 1.
///
/// Two-digit years below 57 are in the 2000s, the rest in the 1900s. Day 1.0
/// is January 1 00:00:00 UTC. The result is resolved to microseconds.
pub fn epoch_of(line1: &str) -> Result<UtcTimestamp, Error> {
    let fields = parse_epoch_fields(line1)?;
    let century = if fields.two_digit_year < EPOCH_CENTURY_PIVOT {
        2000
    } else {
        1900
    };
    let year = century + fields.two_digit_year as i32;
    let jan1 = Utc
        .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| Error::InvalidFormat(format!("epoch year {year} out of range")))?;
    let micros = (fields.day_fraction * MICROS_PER_DAY).round() as i64;
    Ok(jan1
        + TimeDelta::days(i64::from(fields.day_of_year) - 1)
        + TimeDelta::microseconds(micros))
}

/// Greenwich mean sidereal time [rad], IAU-82 model, UT1 taken as UTC
pub fn gmst(t: UtcTimestamp) -> f64 {
    let jd = t.timestamp_micros() as f64 / MICROS_PER_DAY + UNIX_EPOCH_JULIAN_DATE;
    let tut1 = (jd - J2000_JULIAN_DATE) / 36_525.0;
    let seconds = -6.2e-6 * tut1.powi(3)
        + 0.093104 * tut1.powi(2)
        + (876_600.0 * 3600.0 + 8_640_184.812866) * tut1
        + 67_310.54841;
    // 240 seconds of time per degree
    (seconds.to_radians() / 240.0).rem_euclid(TAU)
}

/// Map any longitude [deg] into (-180, 180]
pub fn normalize_longitude(lon: f64) -> f64 {
    let l = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if l <= -180.0 {
        l + 360.0
    } else {
        l
    }
}

/// `start + i * step_sec`, or `None` past the representable time range
pub fn step_time(start: UtcTimestamp, i: u64, step_sec: i64) -> Option<UtcTimestamp> {
    i64::try_from(i)
        .ok()
        .and_then(|i| i.checked_mul(step_sec))
        .and_then(TimeDelta::try_seconds)
        .and_then(|offset| start.checked_add_signed(offset))
}

/// An element set with its orbital model initialised, ready to propagate
pub struct Orbit {
    object_id: CatalogId,
    epoch: UtcTimestamp,
    constants: sgp4::Constants,
}

impl Orbit {
    pub fn new(set: &ElementSet) -> Result<Self, Error> {
        let elements = sgp4::Elements::from_tle(
            set.display_name.clone(),
            set.line1.as_bytes(),
            set.line2.as_bytes(),
        )
        .map_err(|e| {
            Error::InvalidFormat(format!(
                "object {} '{}': {e}",
                set.object_id,
                snippet(&set.line1, SNIPPET_LEN)
            ))
        })?;
        let constants =
            sgp4::Constants::from_elements(&elements).map_err(|e| Error::PropagationFailure {
                object_id: set.object_id,
                reason: e.to_string(),
            })?;
        Ok(Orbit {
            object_id: set.object_id,
            epoch: epoch_of(&set.line1)?,
            constants,
        })
    }

    pub fn epoch(&self) -> UtcTimestamp {
        self.epoch
    }

    pub fn position_at(&self, t: UtcTimestamp) -> Result<PropagatedPoint, Error> {
        let failure = |reason: String| Error::PropagationFailure {
            object_id: self.object_id,
            reason,
        };
        let minutes = (t - self.epoch)
            .num_microseconds()
            .map(|us| us as f64 / MICROS_PER_MINUTE)
            .ok_or_else(|| failure(format!("{t} is too far from the epoch")))?;
        let prediction = self
            .constants
            .propagate(sgp4::MinutesSinceEpoch(minutes))
            .map_err(|e| failure(e.to_string()))?;

        let teme_km = Vector3::from(prediction.position);
        let fixed_m = Rotation3::from_axis_angle(&Vector3::z_axis(), -gmst(t)) * teme_km * 1000.0;
        let pos = WGS84::from(ECEF::new(fixed_m.x, fixed_m.y, fixed_m.z));

        let point = PropagatedPoint {
            timestamp: t.timestamp(),
            lat: pos.latitude_degrees(),
            lon: normalize_longitude(pos.longitude_degrees()),
            alt: pos.altitude() / 1000.0,
        };
        if point.lat.is_finite() && point.lon.is_finite() && point.alt.is_finite() {
            Ok(point)
        } else {
            Err(failure(format!("non-finite position at {t}")))
        }
    }

    /// Positions at `start + i * step_sec` for `i` in `0..=step_count`,
    /// skipping the steps where the model has no valid position
    pub fn series(&self, start: UtcTimestamp, step_count: u64, step_sec: i64) -> Series {
        let requested = step_count + 1;
        let mut points = Vec::with_capacity(requested as usize);
        let mut first_failure = None;
        for i in 0..=step_count {
            let Some(t) = step_time(start, i, step_sec) else {
                first_failure.get_or_insert(Error::PropagationFailure {
                    object_id: self.object_id,
                    reason: format!("step {i} is outside the supported time range"),
                });
                break;
            };
            match self.position_at(t) {
                Ok(p) => points.push(p),
                Err(e) => {
                    first_failure.get_or_insert(e);
                }
            }
        }
        let produced = points.len() as u64;
        if let Some(e) = first_failure {
            debug!(
                object_id = self.object_id,
                requested,
                produced,
                first_error = %e,
                "Skipped steps without a valid position"
            );
        }
        Series {
            points,
            requested,
            produced,
        }
    }
}

/// Result of propagating over a stepped window
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub points: Vec<PropagatedPoint>,
    pub requested: u64,
    pub produced: u64,
}

pub fn propagate_one(set: &ElementSet, t: UtcTimestamp) -> Result<PropagatedPoint, Error> {
    Orbit::new(set)?.position_at(t)
}

pub fn propagate_series(
    set: &ElementSet,
    start: UtcTimestamp,
    step_count: u64,
    step_sec: i64,
) -> Result<Series, Error> {
    Ok(Orbit::new(set)?.series(start, step_count, step_sec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const ISS_L1: &str = "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    const ISS_L2: &str = "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

    fn utc(s: &str) -> UtcTimestamp {
        s.parse().unwrap()
    }

    fn iss() -> ElementSet {
        let epoch = epoch_of(ISS_L1).unwrap();
        ElementSet {
            object_id: 25544,
            display_name: Some("ISS (ZARYA)".into()),
            line1: ISS_L1.into(),
            line2: ISS_L2.into(),
            epoch,
            fetched_at: epoch,
            updated_at: epoch,
            source: Source::Fetched,
        }
    }

    #[test]
    fn reference_epochs() {
        assert_eq!(epoch_of(ISS_L1).unwrap(), utc("2008-09-20T12:25:40.104192Z"));
        assert_eq!(
            epoch_of("1 37481U 11019A   23190.45078927 -.00000009  00000-0  00000+0 0  9991")
                .unwrap(),
            utc("2023-07-09T10:49:08.192928Z")
        );
        assert_eq!(
            epoch_of("1 39120U 13011A   23190.50177227 -.00000262  00000-0  00000+0 0  9997")
                .unwrap(),
            utc("2023-07-09T12:02:33.124128Z")
        );
        assert_eq!(
            epoch_of("1 00005U 58002B   00179.78495062  .00000023  00000-0  28098-4 0  4753")
                .unwrap(),
            utc("2000-06-27T18:50:19.733568Z")
        );
    }

    #[test]
    fn century_pivot() {
        let line = |yy: &str| format!("1 00005U 58002B   {yy}001.00000000  .00000023  00000-0  28098-4 0  4753");
        assert_eq!(epoch_of(&line("56")).unwrap(), utc("2056-01-01T00:00:00Z"));
        assert_eq!(epoch_of(&line("57")).unwrap(), utc("1957-01-01T00:00:00Z"));
        assert_eq!(epoch_of(&line("99")).unwrap(), utc("1999-01-01T00:00:00Z"));
        assert_eq!(epoch_of(&line("00")).unwrap(), utc("2000-01-01T00:00:00Z"));
    }

    #[test]
    fn epoch_is_deterministic() {
        let a = epoch_of(ISS_L1).unwrap();
        for _ in 0..100 {
            assert_eq!(epoch_of(ISS_L1).unwrap(), a);
        }
    }

    #[test]
    fn epoch_of_garbage() {
        assert!(matches!(epoch_of("garbage"), Err(Error::InvalidFormat(_))));
        assert!(matches!(epoch_of(""), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn gmst_reference() {
        // Vallado, example 3-5
        let theta = gmst(utc("1992-08-20T12:14:00Z"));
        assert_abs_diff_eq!(theta.to_degrees(), 152.578787886, epsilon = 1e-6);
        assert_abs_diff_eq!(gmst(utc("2000-01-01T12:00:00Z")).to_degrees(), 280.46061837, epsilon = 1e-6);
    }

    #[test]
    fn longitude_normalization() {
        assert_abs_diff_eq!(normalize_longitude(0.0), 0.0);
        assert_abs_diff_eq!(normalize_longitude(180.0), 180.0);
        assert_abs_diff_eq!(normalize_longitude(-180.0), 180.0);
        assert_abs_diff_eq!(normalize_longitude(190.0), -170.0);
        assert_abs_diff_eq!(normalize_longitude(-190.0), 170.0);
        assert_abs_diff_eq!(normalize_longitude(540.0), 180.0);
    }

    #[test]
    fn iss_position_at_epoch() {
        let set = iss();
        let p = propagate_one(&set, set.epoch).unwrap();
        assert_eq!(p.timestamp, set.epoch.timestamp());
        assert!(p.lat.abs() <= 52.0, "{p:?}");
        assert!(p.lon > -180.0 && p.lon <= 180.0, "{p:?}");
        assert!((300.0..450.0).contains(&p.alt), "{p:?}");
    }

    #[test]
    fn iss_series() {
        let set = iss();
        let start = utc("2008-09-20T13:00:00Z");
        let series = propagate_series(&set, start, 10, 60).unwrap();
        assert_eq!(series.requested, 11);
        assert_eq!(series.produced, 11);
        assert_eq!(series.points.len(), 11);
        for (i, p) in series.points.iter().enumerate() {
            assert_eq!(p.timestamp, start.timestamp() + 60 * i as i64);
            assert!(p.lat.abs() <= 52.0);
            assert!((300.0..450.0).contains(&p.alt));
        }
        // the ground track moves every minute
        assert_ne!(series.points[0].lat, series.points[1].lat);
    }

    #[test]
    fn single_step_series() {
        let set = iss();
        let series = propagate_series(&set, set.epoch, 0, 60).unwrap();
        assert_eq!(series.requested, 1);
        assert_eq!(series.points.len(), 1);
    }

    #[test]
    fn series_stops_at_the_end_of_time() {
        let set = iss();
        let series = propagate_series(&set, set.epoch, 3, 10_i64.pow(13)).unwrap();
        assert_eq!(series.requested, 4);
        assert_eq!(series.produced, 1);
        assert_eq!(step_time(set.epoch, 1, 10_i64.pow(13)), None);
        assert_eq!(step_time(set.epoch, 2, i64::MAX), None);
        assert_eq!(
            step_time(utc("2024-01-01T00:00:00Z"), 3, 60),
            Some(utc("2024-01-01T00:03:00Z"))
        );
    }

    #[test]
    fn same_input_same_point() {
        let set = iss();
        let t = utc("2008-09-21T00:00:00Z");
        assert_eq!(propagate_one(&set, t).unwrap(), propagate_one(&set, t).unwrap());
    }

    #[test]
    fn malformed_lines() {
        let set = ElementSet {
            line2: "2 25544  garbage".into(),
            ..iss()
        };
        assert!(matches!(
            propagate_one(&set, set.epoch),
            Err(Error::InvalidFormat(_))
        ));
    }
}
