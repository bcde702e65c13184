//! Tyre strategy engine: lap and stint extraction from exported telemetry,
//! per-compound degradation fitting, pre-race plan search and a live pit
//! window recommendation.

pub mod config;
pub mod data;
pub mod error;
pub mod laps;
pub mod live;
pub mod model;
pub mod persist;
pub mod stints;
pub mod strategy;

pub use config::StrategyConfig;
pub use data::{load_session_csv, read_session, LapTimeValue, Sample};
pub use error::{Result, StrategyError};
pub use laps::{
    build_lap_summary, collect_practice_laps, detect_pit_events, summarize_session, LapRecord,
};
pub use live::{live_pit_recommendation, LiveOptions, LiveRecommendation, RaceState};
pub use model::{fit_degradation_model, stint_time, DegradationModel, ModelSet};
pub use persist::{load_model_record, save_model_record, ModelRecord};
pub use stints::{build_stints, fia_compliance_check, ComplianceReport, Stint};
pub use strategy::{enumerate_plans, Plan, PlanConstraints, PlannedStint};
