//! Pit-event detection and the one-row-per-lap summary built on top of it.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::data::{Sample, TyreTemps};

pub const PRACTICE_SESSION_NAMES: [&str; 7] =
    ["Practice 1", "Practice 2", "Practice 3", "Practice", "FP1", "FP2", "FP3"];

/// Label given to race laps borrowed for fitting when no practice data exists.
pub const RACE_SAMPLE_SESSION: &str = "RaceSample";
pub const DEFAULT_RACE_SAMPLE_LAPS: usize = 12;

/// A pit heuristic compares a sample with the one immediately before it.
struct PitHeuristic {
    name: &'static str,
    fires: fn(prev: &Sample, cur: &Sample) -> bool,
}

// used when the export carries tyre age
const TYRE_AGE_HEURISTICS: [PitHeuristic; 3] = [
    PitHeuristic { name: "reset_to_zero", fires: reset_to_zero },
    // also fires on sensor glitches where age dips without a stop; kept as is
    PitHeuristic { name: "age_drop", fires: age_drop },
    PitHeuristic { name: "fresh_compound_change", fires: fresh_compound_change },
];

// fallback when there is no tyre age at all
const COMPOUND_ONLY_HEURISTICS: [PitHeuristic; 1] =
    [PitHeuristic { name: "compound_change", fires: compound_changed }];

fn on_racing_lap(s: &Sample) -> bool {
    s.lap.map_or(false, |l| l > 0)
}

fn reset_to_zero(prev: &Sample, cur: &Sample) -> bool {
    matches!((prev.tire_age, cur.tire_age), (Some(p), Some(0)) if p > 0) && on_racing_lap(cur)
}

fn age_drop(prev: &Sample, cur: &Sample) -> bool {
    let dropped = matches!((prev.tire_age, cur.tire_age), (Some(p), Some(c)) if p >= 2 && c < p);
    dropped && on_racing_lap(cur)
}

fn compound_changed(prev: &Sample, cur: &Sample) -> bool {
    prev.compound != cur.compound
}

fn fresh_compound_change(prev: &Sample, cur: &Sample) -> bool {
    compound_changed(prev, cur) && cur.tire_age.map_or(false, |a| a <= 1)
}

fn status_signals_pit(s: &Sample) -> bool {
    s.pit_status.as_deref().map_or(false, |text| {
        let text = text.to_lowercase();
        text.contains("pit") || text.contains("stop")
    })
}

/// Flags samples that look like the start of a pit stop. The returned vector
/// lines up index-for-index with `samples`, which must be in timestamp order.
pub fn detect_pit_events(samples: &[Sample]) -> Vec<bool> {
    if !samples.iter().any(|s| s.lap.is_some()) {
        if !samples.is_empty() {
            tracing::warn!("no lap numbers in session, pit detection disabled");
        }
        return vec![false; samples.len()];
    }

    let heuristics: &[PitHeuristic] = if samples.iter().any(|s| s.tire_age.is_some()) {
        &TYRE_AGE_HEURISTICS
    } else {
        &COMPOUND_ONLY_HEURISTICS
    };

    samples
        .iter()
        .enumerate()
        .map(|(i, cur)| {
            let fired = i
                .checked_sub(1)
                .and_then(|p| heuristics.iter().find(|h| (h.fires)(&samples[p], cur)));
            if let Some(h) = fired {
                tracing::debug!(heuristic = h.name, lap = ?cur.lap, "pit event");
            }
            fired.is_some() || status_signals_pit(cur)
        })
        .collect()
}

/// One completed lap, taken from the last sample recorded for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LapRecord {
    pub lap: u32,
    pub lap_time_s: Option<f64>,
    pub compound: Option<String>,
    pub tire_age: Option<u32>,
    pub track_temp: Option<f64>,
    pub air_temp: Option<f64>,
    pub tyre_temps: TyreTemps,
    pub fuel: Option<f64>,
    pub pit_stop: bool,
    pub weather: Option<String>,
    pub safety_car: Option<bool>,
    pub rain: Option<bool>,
    pub session: Option<String>,
}

impl LapRecord {
    fn from_sample(sample: &Sample, lap: u32, pit_stop: bool) -> Self {
        LapRecord {
            lap,
            lap_time_s: sample.last_lap_time.as_ref().and_then(|v| v.to_seconds()),
            compound: sample.compound.clone(),
            tire_age: sample.tire_age,
            track_temp: sample.track_temp,
            air_temp: sample.air_temp,
            tyre_temps: sample.tyre_temps,
            fuel: sample.fuel,
            pit_stop,
            weather: sample.weather.clone(),
            safety_car: sample.safety_car,
            rain: sample.rain,
            session: None,
        }
    }

    /// Usable as a regression target: present and positive.
    pub fn has_valid_time(&self) -> bool {
        self.lap_time_s.map_or(false, |t| t > 0.0)
    }
}

/// Collapses samples into one record per lap number, ordered by lap.
///
/// `pit_flags` comes from [`detect_pit_events`]; a lap is marked as a pit lap
/// when any of its samples was flagged, so the out-lap itself carries the flag.
pub fn build_lap_summary(samples: &[Sample], pit_flags: &[bool]) -> Vec<LapRecord> {
    if !samples.iter().any(|s| s.lap.is_some()) {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.sort_by_key(|&i| samples[i].timestamp);

    // lap -> (index of the latest sample, any sample flagged)
    let mut per_lap: BTreeMap<u32, (usize, bool)> = BTreeMap::new();
    for i in order {
        let Some(lap) = samples[i].lap else { continue };
        let flagged = pit_flags.get(i).copied().unwrap_or(false);
        let entry = per_lap.entry(lap).or_insert((i, false));
        entry.0 = i;
        entry.1 |= flagged;
    }

    per_lap
        .into_iter()
        .map(|(lap, (i, pit))| LapRecord::from_sample(&samples[i], lap, pit))
        .collect()
}

/// Pit detection followed by lap summarisation.
pub fn summarize_session(samples: &[Sample]) -> Vec<LapRecord> {
    let flags = detect_pit_events(samples);
    build_lap_summary(samples, &flags)
}

pub fn is_practice_session(name: &str) -> bool {
    PRACTICE_SESSION_NAMES.contains(&name) || name.starts_with("Practice")
}

/// Concatenates per-session lap summaries into the practice set used for
/// fitting. Each row is labelled with its session; rows without a usable lap
/// time are dropped.
pub fn collect_practice_laps<I>(sessions: I) -> Vec<LapRecord>
where
    I: IntoIterator<Item = (String, Vec<LapRecord>)>,
{
    sessions
        .into_iter()
        .flat_map(|(session, laps)| {
            laps.into_iter().map(move |mut lap| {
                lap.session = Some(session.clone());
                lap
            })
        })
        .filter(LapRecord::has_valid_time)
        .collect()
}

/// Earliest timed race laps, for drivers that skipped practice.
pub fn fallback_race_sample(race_laps: &[LapRecord], max_laps: usize) -> Vec<LapRecord> {
    let mut timed: Vec<LapRecord> =
        race_laps.iter().filter(|l| l.has_valid_time()).cloned().collect();
    timed.sort_by_key(|l| l.lap);
    timed.truncate(max_laps);
    for lap in &mut timed {
        lap.session = Some(RACE_SAMPLE_SESSION.to_string());
    }
    timed
}
