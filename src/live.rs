use serde::Serialize;

use crate::data::Sample;
use crate::model::{FuelRun, ModelSet};

pub const DEFAULT_LIVE_WINDOW: u32 = 12;

/// Snapshot of the car on track at the moment of the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceState {
    pub current_lap: u32,
    pub compound: String,
    pub tire_age: u32,
    pub fuel: f64,
}

impl RaceState {
    /// Latest sample that has both a lap number and a compound. Samples are
    /// expected in timestamp order, as returned by the CSV loader.
    pub fn from_samples(samples: &[Sample]) -> Option<RaceState> {
        let latest = samples.iter().rev().find(|s| s.lap.is_some() && s.compound.is_some())?;
        Some(RaceState {
            current_lap: latest.lap?,
            compound: latest.compound.clone()?,
            tire_age: latest.tire_age.unwrap_or(0),
            fuel: latest.fuel.unwrap_or(0.0),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveOptions {
    pub total_race_laps: u32,
    pub pit_loss: f64,
    pub window: u32,
    pub use_fuel: bool,
    pub cons_per_lap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveRecommendation {
    pub pit_on_lap: u32,
    pub continue_laps: u32,
    pub new_compound: String,
    pub projected_total_remaining: f64,
}

/// Best pit lap within the next `window` laps.
///
/// Each candidate keeps the current tyres for `n` laps, pays the pit loss,
/// then runs the rest of the race on whichever compound finishes fastest.
/// Candidates where a fuel-aware model would run dry are skipped; `None`
/// when nothing is feasible, the race is over, or the current compound has
/// no model.
pub fn live_pit_recommendation(
    state: &RaceState,
    models: &ModelSet,
    opts: &LiveOptions,
) -> Option<LiveRecommendation> {
    let current = models.get(&state.compound)?;
    let remaining = opts.total_race_laps.checked_sub(state.current_lap).filter(|r| *r > 0)?;
    let fuel = opts.use_fuel.then(|| FuelRun { start: state.fuel, per_lap: opts.cons_per_lap });

    let mut best: Option<LiveRecommendation> = None;
    for n in 1..=opts.window.min(remaining) {
        let Some(continue_time) = current.predict_stint(state.tire_age, n, fuel) else {
            continue;
        };
        let laps_after = remaining - n;
        let tail_fuel = fuel.map(|run| run.after(n));

        // alphabetical order, first minimum wins
        let mut tail: Option<(&str, f64)> = None;
        for (name, model) in models {
            if let Some(t) = model.predict_stint(0, laps_after, tail_fuel) {
                if tail.map_or(true, |(_, best_t)| t < best_t) {
                    tail = Some((name.as_str(), t));
                }
            }
        }
        let Some((compound, tail_time)) = tail else {
            continue;
        };

        let total = continue_time + opts.pit_loss + tail_time;
        if best.as_ref().map_or(true, |b| total < b.projected_total_remaining) {
            best = Some(LiveRecommendation {
                pit_on_lap: state.current_lap + n,
                continue_laps: n,
                new_compound: compound.to_string(),
                projected_total_remaining: total,
            });
        }
    }

    match &best {
        Some(rec) => tracing::debug!(
            pit_on_lap = rec.pit_on_lap,
            compound = %rec.new_compound,
            "live recommendation"
        ),
        None => tracing::debug!(lap = state.current_lap, "no feasible pit window"),
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DegradationModel;
    use approx::assert_relative_eq;

    fn state(lap: u32, compound: &str, age: u32, fuel: f64) -> RaceState {
        RaceState { current_lap: lap, compound: compound.into(), tire_age: age, fuel }
    }

    fn opts(total: u32, window: u32) -> LiveOptions {
        LiveOptions {
            total_race_laps: total,
            pit_loss: 20.0,
            window,
            use_fuel: false,
            cons_per_lap: 0.0,
        }
    }

    fn models() -> ModelSet {
        let mut m = ModelSet::new();
        m.insert("SOFT".into(), DegradationModel::NonFuel { intercept: 90.0, age_slope: 0.8 });
        m.insert("HARD".into(), DegradationModel::NonFuel { intercept: 91.0, age_slope: 0.1 });
        m
    }

    #[test]
    fn worn_tyres_pit_immediately() {
        let rec =
            live_pit_recommendation(&state(10, "SOFT", 20, 0.0), &models(), &opts(50, 12)).unwrap();
        assert_eq!(rec.continue_laps, 1);
        assert_eq!(rec.pit_on_lap, 11);
        assert_eq!(rec.new_compound, "HARD");
        // 1 lap at age 20 on SOFT, pit, 39 laps on fresh HARD
        let expected = 106.0 + 20.0 + (39.0 * 91.0 + 0.1 * 38.0 * 39.0 / 2.0);
        assert_relative_eq!(rec.projected_total_remaining, expected, epsilon = 1e-9);
    }

    #[test]
    fn fresh_tyres_stay_out_to_end_of_window() {
        let mut m = ModelSet::new();
        m.insert("MEDIUM".into(), DegradationModel::NonFuel { intercept: 90.0, age_slope: 0.0 });
        m.insert("SOFT".into(), DegradationModel::NonFuel { intercept: 89.0, age_slope: 0.0 });
        let rec = live_pit_recommendation(&state(0, "SOFT", 0, 0.0), &m, &opts(30, 5)).unwrap();
        // flat SOFT is the fastest everywhere, so every candidate costs the same; earliest wins
        assert_eq!(rec.continue_laps, 1);
        assert_eq!(rec.new_compound, "SOFT");
    }

    #[test]
    fn window_is_clipped_to_remaining_laps() {
        let rec =
            live_pit_recommendation(&state(48, "HARD", 2, 0.0), &models(), &opts(50, 12)).unwrap();
        assert!(rec.continue_laps <= 2);
        assert!(rec.pit_on_lap <= 50);
    }

    #[test]
    fn last_lap_pit_has_zero_tail() {
        let mut m = ModelSet::new();
        m.insert("HARD".into(), DegradationModel::NonFuel { intercept: 91.0, age_slope: 0.0 });
        let rec = live_pit_recommendation(&state(49, "HARD", 5, 0.0), &m, &opts(50, 12)).unwrap();
        assert_eq!(rec.continue_laps, 1);
        assert_relative_eq!(rec.projected_total_remaining, 111.0);
    }

    #[test]
    fn absent_when_nothing_to_decide() {
        let m = models();
        assert!(live_pit_recommendation(&state(10, "WET", 3, 0.0), &m, &opts(50, 12)).is_none());
        assert!(live_pit_recommendation(&state(50, "SOFT", 3, 0.0), &m, &opts(50, 12)).is_none());
        assert!(live_pit_recommendation(&state(60, "SOFT", 3, 0.0), &m, &opts(50, 12)).is_none());
        assert!(live_pit_recommendation(&state(10, "SOFT", 3, 0.0), &m, &opts(50, 0)).is_none());
    }

    #[test]
    fn empty_tank_means_no_recommendation() {
        let mut m = ModelSet::new();
        m.insert(
            "SOFT".into(),
            DegradationModel::FuelAware { intercept: 90.0, age_slope: 0.5, fuel_slope: 0.03 },
        );
        let options = LiveOptions { use_fuel: true, cons_per_lap: 2.0, ..opts(50, 12) };
        // tail to the flag always needs more fuel than is left
        assert!(live_pit_recommendation(&state(10, "SOFT", 3, 5.0), &m, &options).is_none());
    }

    #[test]
    fn fuel_limits_how_long_we_stay_out() {
        let mut m = ModelSet::new();
        m.insert(
            "SOFT".into(),
            DegradationModel::FuelAware { intercept: 90.0, age_slope: 0.0, fuel_slope: -0.1 },
        );
        m.insert("HARD".into(), DegradationModel::NonFuel { intercept: 95.0, age_slope: 0.0 });
        let options = LiveOptions { use_fuel: true, cons_per_lap: 1.0, ..opts(20, 12) };
        // 3.0 of fuel covers laps at levels 3, 2, 1, 0; a fourth lap would start below zero
        let rec = live_pit_recommendation(&state(0, "SOFT", 0, 3.0), &m, &options).unwrap();
        assert!(rec.continue_laps <= 4);
        assert_eq!(rec.new_compound, "HARD");
    }

    #[test]
    fn state_from_latest_sample() {
        let samples = vec![
            Sample {
                lap: Some(3),
                compound: Some("SOFT".into()),
                tire_age: Some(3),
                fuel: Some(90.0),
                ..Default::default()
            },
            Sample { lap: Some(4), compound: Some("SOFT".into()), ..Default::default() },
            Sample { lap: None, compound: Some("SOFT".into()), ..Default::default() },
        ];
        let s = RaceState::from_samples(&samples).unwrap();
        assert_eq!(s, state(4, "SOFT", 0, 0.0));
        assert!(RaceState::from_samples(&[]).is_none());
    }
}
