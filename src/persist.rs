use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Result;
use crate::laps::LapRecord;
use crate::model::ModelSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub track: String,
    pub driver: String,
    #[serde(default)]
    pub sessions_included: Vec<String>,
    #[serde(default)]
    pub fuel_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<NaiveDateTime>,
}

/// Fitted models for one driver at one track, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub metadata: ModelMetadata,
    pub models: ModelSet,
}

impl ModelRecord {
    pub fn new(track: &str, driver: &str, models: ModelSet, practice_laps: &[LapRecord]) -> Self {
        let sessions: BTreeSet<String> =
            practice_laps.iter().filter_map(|l| l.session.clone()).collect();
        let fuel_used = models.values().any(|m| m.is_fuel_aware());
        ModelRecord {
            metadata: ModelMetadata {
                track: track.to_string(),
                driver: driver.to_string(),
                sessions_included: sessions.into_iter().collect(),
                fuel_used,
                saved_at: Some(chrono::Local::now().naive_local()),
            },
            models,
        }
    }
}

pub fn save_model_record<P: AsRef<Path>>(record: &ModelRecord, path: P) -> Result<()> {
    if let Some(dir) = path.as_ref().parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(path.as_ref(), json)?;
    tracing::info!(
        path = %path.as_ref().display(),
        compounds = record.models.len(),
        "saved model record"
    );
    Ok(())
}

pub fn load_model_record<P: AsRef<Path>>(path: P) -> Result<ModelRecord> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let record: ModelRecord = serde_json::from_str(&text)?;
    Ok(record)
}
