use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use crate::laps::LapRecord;
use crate::model::{max_stint_length, DegradationModel, FuelRun, ModelSet};

pub const DEFAULT_MAX_STOPS: u32 = 2;
pub const DEFAULT_MIN_STINT: u32 = 5;
pub const DEFAULT_TOP_K_PLANS: usize = 3;
pub const DEFAULT_PIT_LOSS_SECONDS: f64 = 20.0;
pub const DEFAULT_START_FUEL: f64 = 0.0;
pub const DEFAULT_CONS_PER_LAP: f64 = 0.0;

// short sprints are exempt from the two-compound rule
const TWO_COMPOUND_MIN_RACE_LAPS: u32 = 15;
// compounds-used set is a bitmask
const MAX_COMPOUNDS: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConstraints {
    pub pit_loss: f64,
    pub max_stops: u32,
    pub min_stint: u32,
    pub require_two_compounds: bool,
    pub top_k: usize,
    pub use_fuel: bool,
    pub start_fuel: f64,
    pub cons_per_lap: f64,
}

impl Default for PlanConstraints {
    fn default() -> Self {
        PlanConstraints {
            pit_loss: DEFAULT_PIT_LOSS_SECONDS,
            max_stops: DEFAULT_MAX_STOPS,
            min_stint: DEFAULT_MIN_STINT,
            require_two_compounds: true,
            top_k: DEFAULT_TOP_K_PLANS,
            use_fuel: false,
            start_fuel: DEFAULT_START_FUEL,
            cons_per_lap: DEFAULT_CONS_PER_LAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStint {
    pub compound: String,
    pub laps: u32,
    pub predicted_time: f64,
}

/// A complete race strategy. Stint lengths always add up to the race distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub stints: Vec<PlannedStint>,
    pub total_time: f64,
    pub stops: usize,
}

impl Plan {
    pub fn total_laps(&self) -> u32 {
        self.stints.iter().map(|s| s.laps).sum()
    }

    pub fn compounds_used(&self) -> usize {
        let mut names: Vec<&str> = self.stints.iter().map(|s| s.compound.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    /// e.g. `SOFT 18 > HARD 39`
    pub fn label(&self) -> String {
        let parts: Vec<String> =
            self.stints.iter().map(|s| format!("{} {}", s.compound, s.laps)).collect();
        parts.join(" > ")
    }
}

#[derive(Clone, Copy)]
struct Candidate<'a> {
    name: &'a str,
    model: DegradationModel,
    max_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SearchKey {
    remaining: u32,
    stops: u32,
    last: Option<usize>,
    fuel_milli: i64,
    used: u64,
}

#[derive(Debug, Clone, Copy)]
struct Leg {
    compound: usize,
    laps: u32,
    time: f64,
}

/// Best way to finish the race from some search state. `cost` covers the
/// stints in `legs` and the pit stops that precede them.
#[derive(Debug, Clone)]
struct Tail {
    legs: Vec<Leg>,
    cost: f64,
}

impl Tail {
    fn finish() -> Self {
        Tail { legs: Vec::new(), cost: 0.0 }
    }

    fn after(&self, leg: Leg, pit_loss: f64) -> Self {
        let mut legs = Vec::with_capacity(self.legs.len() + 1);
        legs.push(leg);
        legs.extend_from_slice(&self.legs);
        Tail { legs, cost: leg.time + pit_loss + self.cost }
    }
}

// faster first; equal times fall back to the stint sequence, compounds
// compared by name then laps
fn rank(a: &Tail, b: &Tail) -> Ordering {
    a.cost.total_cmp(&b.cost).then_with(|| {
        let key = |t: &Tail| t.legs.iter().map(|l| (l.compound, l.laps)).collect::<Vec<_>>();
        key(a).cmp(&key(b))
    })
}

/// Top-k search over stint sequences. The memo is owned by one call to
/// [`enumerate_plans`] and dropped with it.
struct PlanSearch<'a> {
    race_laps: u32,
    candidates: Vec<Candidate<'a>>,
    constraints: &'a PlanConstraints,
    memo: HashMap<SearchKey, Rc<Vec<Tail>>>,
}

impl<'a> PlanSearch<'a> {
    fn min_stint(&self) -> u32 {
        self.constraints.min_stint.max(1)
    }

    // fuel burns every lap whatever the model, so it only depends on distance covered
    fn fuel_at(&self, remaining: u32) -> f64 {
        let done = (self.race_laps - remaining) as f64;
        self.constraints.start_fuel - self.constraints.cons_per_lap * done
    }

    fn fuel_key(&self, remaining: u32) -> i64 {
        if self.constraints.use_fuel {
            (self.fuel_at(remaining) * 1000.0).round() as i64
        } else {
            0
        }
    }

    fn fuel_run(&self, remaining: u32) -> Option<FuelRun> {
        let per_lap = self.constraints.cons_per_lap;
        self.constraints.use_fuel.then(|| FuelRun { start: self.fuel_at(remaining), per_lap })
    }

    fn violates_compound_rule(&self, used: u64) -> bool {
        self.constraints.require_two_compounds
            && self.race_laps > TWO_COMPOUND_MIN_RACE_LAPS
            && used.count_ones() < 2
    }

    fn stint_lengths(&self, max_len: u32, remaining: u32) -> std::ops::RangeInclusive<u32> {
        let lo = self.min_stint();
        if remaining < lo {
            // only reachable at the root: a race shorter than the minimum stint
            return if remaining <= max_len { remaining..=remaining } else { 1..=0 };
        }
        lo..=max_len.min(remaining)
    }

    fn solve(&mut self, key: SearchKey) -> Rc<Vec<Tail>> {
        if let Some(hit) = self.memo.get(&key) {
            return Rc::clone(hit);
        }
        tracing::trace!(
            remaining = key.remaining,
            stops = key.stops,
            fuel_milli = key.fuel_milli,
            "expanding state"
        );
        let tails = Rc::new(self.expand(key));
        self.memo.insert(key, Rc::clone(&tails));
        tails
    }

    fn expand(&mut self, key: SearchKey) -> Vec<Tail> {
        if key.remaining == 0 {
            if self.violates_compound_rule(key.used) {
                return Vec::new();
            }
            return vec![Tail::finish()];
        }
        let stints_so_far = key.last.map_or(0, |_| key.stops + 1);
        if stints_so_far > self.constraints.max_stops {
            return Vec::new();
        }

        let pit_loss = if key.last.is_some() { self.constraints.pit_loss } else { 0.0 };
        let fuel = self.fuel_run(key.remaining);
        let min_stint = self.min_stint();
        let mut found = Vec::new();

        for idx in 0..self.candidates.len() {
            let cand = self.candidates[idx];
            for laps in self.stint_lengths(cand.max_len, key.remaining) {
                let rest = key.remaining - laps;
                if rest != 0 && rest < min_stint {
                    continue;
                }
                let Some(time) = cand.model.predict_stint(0, laps, fuel) else {
                    continue;
                };
                let child = SearchKey {
                    remaining: rest,
                    stops: if key.last.is_some() { key.stops + 1 } else { 0 },
                    last: Some(idx),
                    fuel_milli: self.fuel_key(rest),
                    used: key.used | (1u64 << idx),
                };
                let leg = Leg { compound: idx, laps, time };
                found.extend(self.solve(child).iter().map(|tail| tail.after(leg, pit_loss)));
            }
        }

        found.sort_by(rank);
        found.truncate(self.constraints.top_k);
        found
    }
}

/// Ranks the `top_k` fastest strategies for a race of `race_laps` laps.
///
/// Only compounds with a fitted model take part. Stint lengths are capped per
/// compound by [`max_stint_length`]; every stint is at least `min_stint` laps
/// unless the whole race is shorter than that. With `use_fuel`, stints on a
/// fuel-aware model that would run the tank below zero are discarded. The
/// tank drains by `cons_per_lap` on every lap, including laps on compounds
/// whose model has no fuel term, so fuel at any point depends only on the
/// distance covered. An empty result means no sequence satisfies the
/// constraints.
pub fn enumerate_plans(
    race_laps: u32,
    compounds: &[String],
    models: &ModelSet,
    practice_laps: &[LapRecord],
    constraints: &PlanConstraints,
) -> Vec<Plan> {
    if race_laps == 0 || constraints.top_k == 0 {
        return Vec::new();
    }

    let mut names: Vec<&str> = compounds.iter().map(String::as_str).collect();
    names.sort_unstable();
    names.dedup();
    let mut candidates: Vec<Candidate> = names
        .into_iter()
        .filter_map(|name| match models.get(name) {
            Some(model) => {
                let max_len = max_stint_length(practice_laps, name);
                Some(Candidate { name, model: *model, max_len })
            }
            None => {
                tracing::debug!(compound = name, "no model, compound left out of planning");
                None
            }
        })
        .collect();
    if candidates.len() > MAX_COMPOUNDS {
        tracing::warn!(
            compounds = candidates.len(),
            "too many compounds, planning with the first {MAX_COMPOUNDS}"
        );
        candidates.truncate(MAX_COMPOUNDS);
    }

    let mut search = PlanSearch { race_laps, candidates, constraints, memo: HashMap::new() };
    let root = SearchKey {
        remaining: race_laps,
        stops: 0,
        last: None,
        fuel_milli: search.fuel_key(race_laps),
        used: 0,
    };
    let tails = search.solve(root);
    tracing::debug!(states = search.memo.len(), plans = tails.len(), "strategy search finished");

    tails
        .iter()
        .map(|tail| Plan {
            stints: tail
                .legs
                .iter()
                .map(|leg| PlannedStint {
                    compound: search.candidates[leg.compound].name.to_string(),
                    laps: leg.laps,
                    predicted_time: leg.time,
                })
                .collect(),
            total_time: tail.cost,
            stops: tail.legs.len().saturating_sub(1),
        })
        .collect()
}
