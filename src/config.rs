use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StrategyError};
use crate::live::{LiveOptions, DEFAULT_LIVE_WINDOW};
use crate::strategy::PlanConstraints;

pub const DEFAULT_CONFIG_PATH: &str = "strategy.json";
pub const CONFIG_ENV_VAR: &str = "STRATEGY_CONFIG";

/// A telemetry export for one practice session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeSource {
    pub session: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub window: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig { window: DEFAULT_LIVE_WINDOW }
    }
}

/// Everything the CLI needs for one driver at one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub track: String,
    pub driver: String,
    pub race_laps: u32,
    #[serde(default)]
    pub practice_sessions: Vec<PracticeSource>,
    #[serde(default)]
    pub race_session: Option<PathBuf>,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub planner: PlanConstraints,
    #[serde(default)]
    pub live: LiveConfig,
}

impl StrategyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: StrategyConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.race_laps == 0 {
            return Err(StrategyError::InvalidConfig("race_laps must be positive".into()));
        }
        if !(self.planner.pit_loss >= 0.0) {
            return Err(StrategyError::InvalidConfig(format!(
                "pit_loss must be >= 0, got {}",
                self.planner.pit_loss
            )));
        }
        if !(self.planner.cons_per_lap >= 0.0) {
            return Err(StrategyError::InvalidConfig(format!(
                "cons_per_lap must be >= 0, got {}",
                self.planner.cons_per_lap
            )));
        }
        if self.planner.top_k == 0 {
            return Err(StrategyError::InvalidConfig("top_k must be at least 1".into()));
        }
        Ok(())
    }

    pub fn live_options(&self) -> LiveOptions {
        LiveOptions {
            total_race_laps: self.race_laps,
            pit_loss: self.planner.pit_loss,
            window: self.live.window,
            use_fuel: self.planner.use_fuel,
            cons_per_lap: self.planner.cons_per_lap,
        }
    }
}

/// CLI argument, then `STRATEGY_CONFIG`, then `strategy.json`.
pub fn resolve_config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
