use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::laps::LapRecord;

const UNKNOWN_COMPOUND: &str = "unknown";

// compliance heuristics, not the actual sporting regulations
const TWO_COMPOUND_MIN_LAPS: usize = 10;
const LONG_STINT_SHARE: f64 = 0.7;
const LONG_STINT_MIN_LAPS: usize = 15;
const PIT_STOP_MIN_LAPS: usize = 20;

/// A contiguous run of laps on one set of tyres. Averages skip missing values
/// and are `None` when the stint has none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stint {
    pub stint_number: usize,
    pub start_lap: u32,
    pub end_lap: u32,
    pub compound: String,
    pub total_laps: usize,
    pub avg_lap_time: Option<f64>,
    pub avg_track_temp: Option<f64>,
    pub avg_air_temp: Option<f64>,
    pub avg_fl_temp: Option<f64>,
    pub avg_fr_temp: Option<f64>,
    pub avg_rl_temp: Option<f64>,
    pub avg_rr_temp: Option<f64>,
}

fn mean_of<I: IntoIterator<Item = Option<f64>>>(values: I) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .flatten()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn aggregate_stint(rows: &[&LapRecord], stint_number: usize) -> Stint {
    let laps: BTreeSet<u32> = rows.iter().map(|r| r.lap).collect();
    Stint {
        stint_number,
        start_lap: laps.first().copied().unwrap_or_default(),
        end_lap: laps.last().copied().unwrap_or_default(),
        compound: rows
            .iter()
            .find_map(|r| r.compound.clone())
            .unwrap_or_else(|| UNKNOWN_COMPOUND.to_string()),
        total_laps: laps.len(),
        avg_lap_time: mean_of(rows.iter().map(|r| r.lap_time_s)),
        avg_track_temp: mean_of(rows.iter().map(|r| r.track_temp)),
        avg_air_temp: mean_of(rows.iter().map(|r| r.air_temp)),
        avg_fl_temp: mean_of(rows.iter().map(|r| r.tyre_temps.fl)),
        avg_fr_temp: mean_of(rows.iter().map(|r| r.tyre_temps.fr)),
        avg_rl_temp: mean_of(rows.iter().map(|r| r.tyre_temps.rl)),
        avg_rr_temp: mean_of(rows.iter().map(|r| r.tyre_temps.rr)),
    }
}

// the lap carrying the pit flag (the out-lap) opens the new stint
fn opens_new_stint(prev: &LapRecord, cur: &LapRecord) -> bool {
    let age_reset = cur.tire_age == Some(0) && prev.tire_age.map_or(false, |a| a > 0);
    cur.pit_stop || age_reset
}

/// Splits a lap summary into stints. Gaps in lap numbering do not by
/// themselves start a new stint.
pub fn build_stints(lap_summary: &[LapRecord]) -> Vec<Stint> {
    let mut ordered: Vec<&LapRecord> = lap_summary.iter().collect();
    ordered.sort_by_key(|r| r.lap);

    let mut groups: Vec<Vec<&LapRecord>> = Vec::new();
    for (i, &row) in ordered.iter().enumerate() {
        match groups.last_mut() {
            Some(current) if !opens_new_stint(ordered[i - 1], row) => current.push(row),
            _ => groups.push(vec![row]),
        }
    }

    groups
        .iter()
        .enumerate()
        .map(|(i, rows)| aggregate_stint(rows, i + 1))
        .collect()
}

/// Average stint length observed per compound.
pub fn mean_stint_lengths(stints: &[Stint]) -> BTreeMap<String, f64> {
    let mut per_compound: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for s in stints {
        per_compound.entry(s.compound.clone()).or_default().push(s.total_laps);
    }
    per_compound
        .into_iter()
        .map(|(c, lens)| (c, lens.iter().sum::<usize>() as f64 / lens.len() as f64))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceReport {
    pub used_two_compounds: bool,
    pub max_stint_ok: bool,
    pub pit_stop_required: bool,
    pub notes: Vec<String>,
}

impl Default for ComplianceReport {
    fn default() -> Self {
        ComplianceReport {
            used_two_compounds: true,
            max_stint_ok: true,
            pit_stop_required: true,
            notes: Vec::new(),
        }
    }
}

/// Rough tyre-rule checks over a finished (or in-progress) race. Conditions
/// count as dry unless some weather text mentions rain or wet.
pub fn fia_compliance_check<S: AsRef<str>>(stints: &[Stint], weather: &[S]) -> ComplianceReport {
    let mut report = ComplianceReport::default();
    if stints.is_empty() {
        report.notes.push("No stints detected.".to_string());
        return report;
    }

    let compounds: BTreeSet<&str> = stints.iter().map(|s| s.compound.as_str()).collect();
    let total_laps: usize = stints.iter().map(|s| s.total_laps).sum();
    let is_dry = !weather.iter().any(|w| {
        let w = w.as_ref().to_lowercase();
        w.contains("rain") || w.contains("wet")
    });

    if is_dry && compounds.len() < 2 && total_laps >= TWO_COMPOUND_MIN_LAPS {
        report.used_two_compounds = false;
        report.notes.push("Fewer than two compounds used in dry conditions.".to_string());
    }

    let max_allowed = total_laps as f64 * LONG_STINT_SHARE;
    let too_long = stints.iter().any(|s| s.total_laps as f64 > max_allowed);
    if total_laps >= LONG_STINT_MIN_LAPS && too_long {
        report.max_stint_ok = false;
        report.notes.push("A stint exceeds 70% of the race distance.".to_string());
    }

    if stints.len() < 2 && total_laps > PIT_STOP_MIN_LAPS {
        report.pit_stop_required = false;
        report.notes.push("Long race completed without a pit stop.".to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lap(n: u32, compound: &str, age: u32, pit: bool) -> LapRecord {
        LapRecord {
            lap: n,
            lap_time_s: Some(90.0 + age as f64 * 0.1),
            compound: Some(compound.to_string()),
            tire_age: Some(age),
            pit_stop: pit,
            ..Default::default()
        }
    }

    #[test]
    fn pit_lap_opens_second_stint() {
        let laps: Vec<LapRecord> = (1..=10)
            .map(|n| if n < 6 { lap(n, "SOFT", n, false) } else { lap(n, "MEDIUM", n - 6, n == 6) })
            .collect();
        let stints = build_stints(&laps);
        assert_eq!(stints.len(), 2);
        assert_eq!((stints[0].start_lap, stints[0].end_lap), (1, 5));
        assert_eq!((stints[1].start_lap, stints[1].end_lap), (6, 10));
        assert_eq!(stints[1].compound, "MEDIUM");
        assert_eq!(stints[1].stint_number, 2);
    }

    #[test]
    fn age_reset_without_flag_still_splits() {
        let laps =
            vec![lap(1, "HARD", 3, false), lap(2, "HARD", 4, false), lap(3, "HARD", 0, false)];
        let stints = build_stints(&laps);
        assert_eq!(stints.len(), 2);
        assert_eq!(stints[1].start_lap, 3);
    }

    #[test]
    fn lap_gap_does_not_split() {
        let laps =
            vec![lap(1, "SOFT", 1, false), lap(2, "SOFT", 2, false), lap(7, "SOFT", 7, false)];
        let stints = build_stints(&laps);
        assert_eq!(stints.len(), 1);
        assert_eq!(stints[0].total_laps, 3);
        assert_eq!(stints[0].end_lap, 7);
    }

    #[test]
    fn first_row_pit_flag_does_not_emit_empty_stint() {
        let laps = vec![lap(1, "SOFT", 0, true), lap(2, "SOFT", 1, false)];
        let stints = build_stints(&laps);
        assert_eq!(stints.len(), 1);
        assert_eq!(stints[0].stint_number, 1);
    }

    #[test]
    fn missing_times_give_no_average() {
        let mut laps = vec![lap(1, "SOFT", 1, false), lap(2, "SOFT", 2, false)];
        for l in &mut laps {
            l.lap_time_s = None;
        }
        laps[0].track_temp = Some(30.0);
        let stints = build_stints(&laps);
        assert_eq!(stints[0].avg_lap_time, None);
        assert_eq!(stints[0].avg_track_temp, Some(30.0));
        assert!(build_stints(&[]).is_empty());
    }

    #[test]
    fn mean_lengths_by_compound() {
        let laps: Vec<LapRecord> = (1..=12)
            .map(|n| match n {
                1..=4 => lap(n, "MEDIUM", n, false),
                5..=10 => lap(n, "HARD", n - 5, n == 5),
                _ => lap(n, "MEDIUM", n - 11, n == 11),
            })
            .collect();
        let means = mean_stint_lengths(&build_stints(&laps));
        assert_eq!(means["MEDIUM"], 3.0);
        assert_eq!(means["HARD"], 6.0);
    }

    fn stint(n: usize, compound: &str, laps: usize) -> Stint {
        Stint {
            stint_number: n,
            start_lap: 1,
            end_lap: laps as u32,
            compound: compound.to_string(),
            total_laps: laps,
            avg_lap_time: None,
            avg_track_temp: None,
            avg_air_temp: None,
            avg_fl_temp: None,
            avg_fr_temp: None,
            avg_rl_temp: None,
            avg_rr_temp: None,
        }
    }

    #[test]
    fn dry_single_compound_race_is_flagged() {
        let report = fia_compliance_check(&[stint(1, "SOFT", 20)], &["Dry", "Sunny"]);
        assert!(!report.used_two_compounds);
        assert!(!report.max_stint_ok);
        assert!(report.pit_stop_required);
        assert!(report.notes.iter().any(|n| n.contains("two compounds")));
    }

    #[test]
    fn thresholds_are_inclusive_where_they_should_be() {
        let dry = ["Dry"];
        // one lap short of the two-compound rule
        let report = fia_compliance_check(&[stint(1, "SOFT", 9)], &dry);
        assert!(report.used_two_compounds);
        assert!(report.notes.is_empty());

        // one lap short of the long-stint rule
        let report = fia_compliance_check(&[stint(1, "HARD", 14)], &dry);
        assert!(report.max_stint_ok);
        assert!(!report.used_two_compounds);

        // exactly 70% of 20 laps is allowed
        let report = fia_compliance_check(&[stint(1, "MEDIUM", 14), stint(2, "HARD", 6)], &dry);
        assert!(report.max_stint_ok);
        assert_eq!(report, ComplianceReport::default());
    }

    #[test]
    fn wet_race_is_exempt_from_compound_rule() {
        let report = fia_compliance_check(&[stint(1, "INTER", 12)], &["Light Rain"]);
        assert!(report.used_two_compounds);
    }

    #[test]
    fn long_race_without_stop() {
        let report = fia_compliance_check(&[stint(1, "HARD", 30)], &[] as &[&str]);
        assert!(!report.pit_stop_required);
        let ok =
            fia_compliance_check(&[stint(1, "HARD", 15), stint(2, "MEDIUM", 15)], &[] as &[&str]);
        assert_eq!(ok, ComplianceReport::default());
    }

    #[test]
    fn no_stints_is_informational() {
        let report = fia_compliance_check(&[], &[] as &[&str]);
        assert!(report.used_two_compounds && report.max_stint_ok && report.pit_stop_required);
        assert_eq!(report.notes.len(), 1);
    }

    proptest! {
        #[test]
        fn stints_partition_the_summary(
            rows in proptest::collection::vec((1u32..4, any::<bool>(), 0u32..6, 0u8..3), 0..60)
        ) {
            let compounds = ["SOFT", "MEDIUM", "HARD"];
            let mut lap_no = 0;
            let laps: Vec<LapRecord> = rows
                .iter()
                .map(|(gap, pit, age, c)| {
                    lap_no += gap;
                    lap(lap_no, compounds[*c as usize], *age, *pit)
                })
                .collect();
            let stints = build_stints(&laps);
            prop_assert_eq!(stints.iter().map(|s| s.total_laps).sum::<usize>(), laps.len());
            for (i, s) in stints.iter().enumerate() {
                prop_assert_eq!(s.stint_number, i + 1);
                prop_assert!(s.start_lap <= s.end_lap);
                if i > 0 {
                    prop_assert!(stints[i - 1].end_lap < s.start_lap);
                }
            }
        }
    }
}
