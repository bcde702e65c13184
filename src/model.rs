use linfa::prelude::SingleTargetRegression;
use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::laps::LapRecord;

const MIN_FIT_ROWS: usize = 5;
const MIN_DISTINCT_AGES: usize = 2;
const OUTLIER_Z: f64 = 3.0;
const FUEL_MIN_SAMPLES: usize = 5;
const FUEL_MIN_STD: f64 = 0.5;
// practice rarely runs a set to the end of its life
const STINT_HEADROOM_LAPS: u32 = 2;

pub const SAFETY_CAR_TIME_MULTIPLIER: f64 = 1.5;
pub const RAIN_TIME_MULTIPLIER: f64 = 1.3;
pub const MIN_MODEL_R2: f64 = 0.5;
pub const MAX_MODEL_MAE: f64 = 5.0;

/// Linear lap-time model for one compound: `intercept + age_slope * age`, plus
/// `fuel_slope * fuel` when the practice data had a usable fuel signal.
///
/// Serialized as a bare array of 2 or 3 coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub enum DegradationModel {
    NonFuel { intercept: f64, age_slope: f64 },
    FuelAware { intercept: f64, age_slope: f64, fuel_slope: f64 },
}

/// Fitted models keyed by compound name.
pub type ModelSet = BTreeMap<String, DegradationModel>;

/// Fuel level at the start of a run and how much each lap burns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuelRun {
    pub start: f64,
    pub per_lap: f64,
}

impl FuelRun {
    /// Fuel at the start of lap `i` (0-based) of the run.
    pub fn level_at(&self, i: u32) -> f64 {
        self.start - self.per_lap * i as f64
    }

    pub fn after(&self, laps: u32) -> FuelRun {
        FuelRun { start: self.level_at(laps), per_lap: self.per_lap }
    }

    /// The trajectory is linear, so checking both ends covers every lap.
    fn stays_non_negative(&self, laps: u32) -> bool {
        laps == 0 || (self.level_at(0) >= 0.0 && self.level_at(laps - 1) >= 0.0)
    }
}

impl DegradationModel {
    pub fn intercept(&self) -> f64 {
        match *self {
            DegradationModel::NonFuel { intercept, .. }
            | DegradationModel::FuelAware { intercept, .. } => intercept,
        }
    }

    pub fn age_slope(&self) -> f64 {
        match *self {
            DegradationModel::NonFuel { age_slope, .. }
            | DegradationModel::FuelAware { age_slope, .. } => age_slope,
        }
    }

    pub fn fuel_slope(&self) -> Option<f64> {
        match *self {
            DegradationModel::NonFuel { .. } => None,
            DegradationModel::FuelAware { fuel_slope, .. } => Some(fuel_slope),
        }
    }

    pub fn is_fuel_aware(&self) -> bool {
        self.fuel_slope().is_some()
    }

    /// Predicted time of a single lap. The fuel term only applies to a
    /// fuel-aware model given a fuel level.
    pub fn predict_lap(&self, age: f64, fuel: Option<f64>) -> f64 {
        match (*self, fuel) {
            (DegradationModel::FuelAware { intercept, age_slope, fuel_slope }, Some(f)) => {
                intercept + age_slope * age + fuel_slope * f
            }
            _ => self.intercept() + self.age_slope() * age,
        }
    }

    /// Predicted time for `laps` consecutive laps starting at tyre age
    /// `start_age`. With a fuel-aware model and a fuel run, returns `None`
    /// when the tank would go negative during the stint.
    pub fn predict_stint(&self, start_age: u32, laps: u32, fuel: Option<FuelRun>) -> Option<f64> {
        if laps == 0 {
            return Some(0.0);
        }
        let age0 = start_age as f64;
        match (*self, fuel) {
            (DegradationModel::FuelAware { intercept, age_slope, fuel_slope }, Some(run)) => {
                if !run.stays_non_negative(laps) {
                    return None;
                }
                // age rises and fuel falls by one step per lap, so the per-lap
                // sum is still an arithmetic series
                let first_lap = intercept + age_slope * age0 + fuel_slope * run.start;
                let per_lap_change = age_slope - fuel_slope * run.per_lap;
                Some(stint_time(first_lap, per_lap_change, laps as i64))
            }
            (model, _) => {
                let first_lap = model.intercept() + model.age_slope() * age0;
                Some(stint_time(first_lap, model.age_slope(), laps as i64))
            }
        }
    }
}

impl TryFrom<Vec<f64>> for DegradationModel {
    type Error = String;

    fn try_from(coeffs: Vec<f64>) -> Result<Self, Self::Error> {
        match coeffs[..] {
            [intercept, age_slope] => Ok(DegradationModel::NonFuel { intercept, age_slope }),
            [intercept, age_slope, fuel_slope] => {
                Ok(DegradationModel::FuelAware { intercept, age_slope, fuel_slope })
            }
            _ => Err(format!("expected 2 or 3 model coefficients, got {}", coeffs.len())),
        }
    }
}

impl From<DegradationModel> for Vec<f64> {
    fn from(model: DegradationModel) -> Self {
        match model {
            DegradationModel::NonFuel { intercept, age_slope } => vec![intercept, age_slope],
            DegradationModel::FuelAware { intercept, age_slope, fuel_slope } => {
                vec![intercept, age_slope, fuel_slope]
            }
        }
    }
}

/// Sum of `intercept + slope * i` for `i` in `0..laps`.
pub fn stint_time(intercept: f64, slope: f64, laps: i64) -> f64 {
    if laps <= 0 {
        return 0.0;
    }
    let n = laps as f64;
    n * intercept + slope * (n - 1.0) * n / 2.0
}

pub fn adjust_lap_time_for_conditions(base_time: f64, safety_car: bool, rain: bool) -> f64 {
    let sc = if safety_car { SAFETY_CAR_TIME_MULTIPLIER } else { 1.0 };
    let wet = if rain { RAIN_TIME_MULTIPLIER } else { 1.0 };
    base_time * sc * wet
}

fn conventional_stint_limit(compound: &str) -> u32 {
    let c = compound.to_lowercase();
    if c.starts_with("soft") {
        18
    } else if c.starts_with("medium") {
        28
    } else if c.starts_with("hard") {
        40
    } else {
        25
    }
}

/// Longest stint the planner will consider on `compound`: the oldest tyre seen
/// in practice plus a little headroom, or a conventional limit when the
/// compound was never run.
pub fn max_stint_length(practice_laps: &[LapRecord], compound: &str) -> u32 {
    practice_laps
        .iter()
        .filter(|r| r.compound.as_deref() == Some(compound))
        .filter_map(|r| r.tire_age)
        .max()
        .map(|age| age + STINT_HEADROOM_LAPS)
        .unwrap_or_else(|| conventional_stint_limit(compound))
}

// fuel only enters the regression when it actually varies across practice
fn fuel_is_usable(practice_laps: &[LapRecord]) -> bool {
    let fuel: Array1<f64> =
        practice_laps.iter().filter_map(|r| r.fuel).filter(|f| f.is_finite()).collect();
    fuel.len() >= FUEL_MIN_SAMPLES && fuel.std(1.0) > FUEL_MIN_STD
}

fn distinct_ages(rows: &[&LapRecord]) -> usize {
    rows.iter().filter_map(|r| r.tire_age).collect::<BTreeSet<_>>().len()
}

fn enough_rows(rows: &[&LapRecord]) -> bool {
    rows.len() >= MIN_FIT_ROWS && distinct_ages(rows) >= MIN_DISTINCT_AGES
}

struct FitPoint {
    age: f64,
    lap_time: f64,
    fuel: Option<f64>,
}

// minimum-norm least squares, same answer for full-rank and degenerate designs
fn least_squares(design: DMatrix<f64>, target: DVector<f64>) -> Option<DVector<f64>> {
    let scale = design.nrows().max(design.ncols()) as f64;
    let svd = design.svd(true, true);
    let eps = f64::EPSILON * scale * svd.singular_values.max();
    svd.solve(&target, eps).ok()
}

fn fit_compound(compound: &str, rows: &[&LapRecord], fuel_aware: bool) -> Option<DegradationModel> {
    if !enough_rows(rows) {
        tracing::debug!(compound, rows = rows.len(), "too little practice data");
        return None;
    }

    let clean: Vec<&LapRecord> = rows
        .iter()
        .copied()
        .filter(|r| !r.safety_car.unwrap_or(false) && !r.rain.unwrap_or(false))
        .collect();
    if !enough_rows(&clean) {
        tracing::debug!(compound, rows = clean.len(), "too little green-flag dry data");
        return None;
    }

    let points: Vec<FitPoint> = clean
        .iter()
        .filter_map(|r| {
            let fuel = if fuel_aware { Some(r.fuel.filter(|f| f.is_finite())?) } else { None };
            Some(FitPoint {
                age: r.tire_age? as f64,
                lap_time: r.lap_time_s.filter(|t| t.is_finite())?,
                fuel,
            })
        })
        .collect();
    if points.len() < MIN_FIT_ROWS {
        return None;
    }

    let times: Array1<f64> = points.iter().map(|p| p.lap_time).collect();
    let mean = times.mean()?;
    let std = match times.std(0.0) {
        s if s == 0.0 => 1.0,
        s => s,
    };
    let kept: Vec<&FitPoint> =
        points.iter().filter(|p| ((p.lap_time - mean) / std).abs() < OUTLIER_Z).collect();
    if kept.len() < MIN_FIT_ROWS {
        tracing::debug!(compound, kept = kept.len(), "too few rows left after outlier rejection");
        return None;
    }

    let cols = if fuel_aware { 3 } else { 2 };
    let design = DMatrix::from_fn(kept.len(), cols, |r, c| match c {
        0 => 1.0,
        1 => kept[r].age,
        _ => kept[r].fuel.unwrap_or_default(),
    });
    let target = DVector::from_iterator(kept.len(), kept.iter().map(|p| p.lap_time));
    let coef = least_squares(design, target)?;
    if coef.iter().any(|c| !c.is_finite()) {
        return None;
    }

    DegradationModel::try_from(coef.iter().copied().collect::<Vec<f64>>()).ok()
}

/// Fits one model per compound from aggregated practice laps. Compounds with
/// too little data are left out of the result.
pub fn fit_degradation_model(practice_laps: &[LapRecord]) -> ModelSet {
    let fuel_aware = fuel_is_usable(practice_laps);

    let mut by_compound: BTreeMap<&str, Vec<&LapRecord>> = BTreeMap::new();
    for row in practice_laps {
        if let Some(compound) = row.compound.as_deref() {
            by_compound.entry(compound).or_default().push(row);
        }
    }

    let models: ModelSet = by_compound
        .into_iter()
        .filter_map(|(compound, rows)| {
            fit_compound(compound, &rows, fuel_aware).map(|m| (compound.to_string(), m))
        })
        .collect();
    tracing::info!(
        compounds = models.len(),
        fuel_aware,
        rows = practice_laps.len(),
        "fitted degradation models"
    );
    models
}

/// Goodness of fit of a model against the laps it was fitted on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelQuality {
    pub r2: f64,
    pub mae: f64,
    pub samples: usize,
}

impl ModelQuality {
    pub fn is_acceptable(&self) -> bool {
        self.r2 >= MIN_MODEL_R2 && self.mae <= MAX_MODEL_MAE
    }
}

/// Scores `model` on the practice rows of `compound`. Fuel-aware models only
/// use rows that carry a fuel reading.
pub fn evaluate_model(
    model: &DegradationModel,
    practice_laps: &[LapRecord],
    compound: &str,
) -> Option<ModelQuality> {
    let (predicted, observed): (Vec<f64>, Vec<f64>) = practice_laps
        .iter()
        .filter(|r| r.compound.as_deref() == Some(compound))
        .filter_map(|r| {
            let age = r.tire_age? as f64;
            let time = r.lap_time_s?;
            let fuel = if model.is_fuel_aware() { Some(r.fuel?) } else { None };
            Some((model.predict_lap(age, fuel), time))
        })
        .unzip();
    if predicted.len() < 2 {
        return None;
    }

    let samples = predicted.len();
    let predicted = Array1::from_vec(predicted);
    let observed = Array1::from_vec(observed);
    Some(ModelQuality {
        r2: predicted.r2(&observed).ok()?,
        mae: predicted.mean_absolute_error(&observed).ok()?,
        samples,
    })
}
