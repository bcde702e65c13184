use chrono::{DateTime, NaiveDateTime};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

use crate::error::Result;

// column names as they come out of the game exporter. everything is read as text
// first so a corrupted cell only blanks that one field instead of failing the row.
#[derive(Debug, Default, Deserialize)]
struct RawSample {
    #[serde(default)] timestamp: Option<String>,
    #[serde(default, rename = "currentLap")] lap: Option<String>,
    #[serde(default, rename = "lastLapTime")] last_lap_time: Option<String>,
    #[serde(default)] compound: Option<String>,
    #[serde(default)] tire_age: Option<String>,
    #[serde(default)] fuel: Option<String>,
    #[serde(default, rename = "flTemp")] fl_temp: Option<String>,
    #[serde(default, rename = "frTemp")] fr_temp: Option<String>,
    #[serde(default, rename = "rlTemp")] rl_temp: Option<String>,
    #[serde(default, rename = "rrTemp")] rr_temp: Option<String>,
    #[serde(default, rename = "trackTemp")] track_temp: Option<String>,
    #[serde(default, rename = "airTemp")] air_temp: Option<String>,
    #[serde(default)] weather: Option<String>,
    #[serde(default, rename = "pitstopStatus", alias = "pitStopStatus", alias = "pit_status")]
    pit_status: Option<String>,
    #[serde(default)] safety_car: Option<String>,
    #[serde(default)] rain: Option<String>,
}

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// "Last completed lap" as exported: either plain seconds or `M:SS.sss` text.
#[derive(Debug, Clone, PartialEq)]
pub enum LapTimeValue {
    Seconds(f64),
    Text(String),
}

impl LapTimeValue {
    /// Seconds for this value, or `None` when it cannot be interpreted.
    pub fn to_seconds(&self) -> Option<f64> {
        match self {
            LapTimeValue::Seconds(v) if v.is_nan() => None,
            LapTimeValue::Seconds(v) => Some(*v),
            LapTimeValue::Text(s) => parse_lap_time_text(s),
        }
    }
}

impl From<f64> for LapTimeValue {
    fn from(v: f64) -> Self {
        LapTimeValue::Seconds(v)
    }
}

impl From<&str> for LapTimeValue {
    fn from(s: &str) -> Self {
        LapTimeValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TyreTemps {
    pub fl: Option<f64>,
    pub fr: Option<f64>,
    pub rl: Option<f64>,
    pub rr: Option<f64>,
}

/// One telemetry reading for a single driver in a single session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub timestamp: Option<NaiveDateTime>,
    pub lap: Option<u32>,
    pub compound: Option<String>,
    pub tire_age: Option<u32>,
    pub last_lap_time: Option<LapTimeValue>,
    pub fuel: Option<f64>,
    pub tyre_temps: TyreTemps,
    pub track_temp: Option<f64>,
    pub air_temp: Option<f64>,
    pub pit_status: Option<String>,
    pub weather: Option<String>,
    pub safety_car: Option<bool>,
    pub rain: Option<bool>,
}

impl From<RawSample> for Sample {
    fn from(raw: RawSample) -> Self {
        Sample {
            timestamp: raw.timestamp.as_deref().and_then(parse_timestamp),
            lap: raw.lap.as_deref().and_then(parse_count),
            compound: non_empty(raw.compound).map(|c| c.to_uppercase()),
            tire_age: raw.tire_age.as_deref().and_then(parse_count),
            last_lap_time: non_empty(raw.last_lap_time).map(|s| match s.parse::<f64>() {
                Ok(v) => LapTimeValue::Seconds(v),
                Err(_) => LapTimeValue::Text(s),
            }),
            fuel: raw.fuel.as_deref().and_then(parse_number),
            tyre_temps: TyreTemps {
                fl: raw.fl_temp.as_deref().and_then(parse_number),
                fr: raw.fr_temp.as_deref().and_then(parse_number),
                rl: raw.rl_temp.as_deref().and_then(parse_number),
                rr: raw.rr_temp.as_deref().and_then(parse_number),
            },
            track_temp: raw.track_temp.as_deref().and_then(parse_number),
            air_temp: raw.air_temp.as_deref().and_then(parse_number),
            pit_status: non_empty(raw.pit_status),
            weather: non_empty(raw.weather),
            safety_car: raw.safety_car.as_deref().and_then(parse_flag),
            rain: raw.rain.as_deref().and_then(parse_flag),
        }
    }
}

/// Reads an exported session CSV and returns its samples in timestamp order.
pub fn load_session_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Sample>> {
    let file = std::fs::File::open(path.as_ref())?;
    let samples = read_session(file)?;
    tracing::debug!(path = %path.as_ref().display(), samples = samples.len(), "loaded session csv");
    Ok(samples)
}

pub fn read_session<R: Read>(reader: R) -> Result<Vec<Sample>> {
    let mut reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);
    let mut samples = Vec::new();
    for res in reader.deserialize() {
        let raw: RawSample = res?;
        samples.push(Sample::from(raw));
    }
    // stable, so rows without a timestamp keep their file order
    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

/// Parses `M:SS.sss` or `SS.sss` text into seconds. Anything else is `None`.
pub fn parse_lap_time_text(text: &str) -> Option<f64> {
    let s = text.trim();
    let (minutes, seconds) = match s.split_once(':') {
        Some((m, sec)) => {
            if m.is_empty() || !m.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (m.parse::<u64>().ok()?, sec)
        }
        None => (0, s),
    };
    if !is_plain_decimal(seconds) {
        return None;
    }
    let secs: f64 = seconds.parse().ok()?;
    Some(minutes as f64 * 60.0 + secs)
}

// digits, optionally followed by a dot and more digits
fn is_plain_decimal(s: &str) -> bool {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (s, None),
    };
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    digits(whole) && frac.map_or(true, digits)
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

// lap numbers and tyre ages are sometimes exported as "3.0"
fn parse_count(raw: &str) -> Option<u32> {
    parse_number(raw).filter(|v| *v >= 0.0 && *v <= u32::MAX as f64).map(|v| v.round() as u32)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" | "y" => Some(true),
        "0" | "0.0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }
    // epoch seconds
    let secs = parse_number(s)?;
    DateTime::from_timestamp(secs.floor() as i64, ((secs - secs.floor()) * 1e9) as u32)
        .map(|dt| dt.naive_utc())
}
