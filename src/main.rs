use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use stint_planner::config::{resolve_config_path, StrategyConfig};
use stint_planner::data::load_session_csv;
use stint_planner::laps::{
    collect_practice_laps, fallback_race_sample, is_practice_session, summarize_session, LapRecord,
    DEFAULT_RACE_SAMPLE_LAPS,
};
use stint_planner::live::{live_pit_recommendation, RaceState};
use stint_planner::model::{evaluate_model, fit_degradation_model, ModelSet};
use stint_planner::persist::{load_model_record, save_model_record, ModelRecord};
use stint_planner::stints::{build_stints, fia_compliance_check, mean_stint_lengths};
use stint_planner::strategy::enumerate_plans;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = resolve_config_path(std::env::args().nth(1));
    let config = StrategyConfig::load(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    println!("Strategy for {} at {} ({} laps)", config.driver, config.track, config.race_laps);

    // practice sessions, skipping the ones we can't read
    let mut sessions = Vec::new();
    for source in &config.practice_sessions {
        if !is_practice_session(&source.session) {
            tracing::warn!(session = %source.session, "session name does not look like practice");
        }
        match load_session_csv(&source.path) {
            Ok(samples) => sessions.push((source.session.clone(), summarize_session(&samples))),
            Err(e) => tracing::warn!(
                path = %source.path.display(),
                error = %e,
                "skipping unreadable practice file"
            ),
        }
    }
    let mut practice = collect_practice_laps(sessions);

    let race_samples = match &config.race_session {
        Some(path) => load_session_csv(path)
            .with_context(|| format!("loading race session {}", path.display()))?,
        None => Vec::new(),
    };
    let race_laps = summarize_session(&race_samples);

    if practice.is_empty() {
        practice = fallback_race_sample(&race_laps, DEFAULT_RACE_SAMPLE_LAPS);
        if !practice.is_empty() {
            tracing::warn!(
                laps = practice.len(),
                "no practice data, fitting on the opening race laps"
            );
        }
    }

    let models = obtain_models(&config, &practice)?;
    if models.is_empty() {
        bail!("not enough data to fit any compound");
    }
    report_models(&models, &practice);

    // pre-race plans
    let compounds: Vec<String> = models.keys().cloned().collect();
    let plans = enumerate_plans(config.race_laps, &compounds, &models, &practice, &config.planner);
    println!("\nTop strategies:");
    if plans.is_empty() {
        println!("  no strategy satisfies the constraints");
    }
    for (rank, plan) in plans.iter().enumerate() {
        println!(
            "  {}. {} | {} stop(s) | {:.1}s",
            rank + 1,
            plan.label(),
            plan.stops,
            plan.total_time
        );
    }

    if !race_laps.is_empty() {
        report_race(&config, &race_laps, &models);
    }
    if let Some(state) = RaceState::from_samples(&race_samples) {
        println!(
            "\nLive: lap {} on {} (age {})",
            state.current_lap, state.compound, state.tire_age
        );
        match live_pit_recommendation(&state, &models, &config.live_options()) {
            Some(rec) => println!(
                "  box on lap {} (in {}) for {}, projected {:.1}s to the flag",
                rec.pit_on_lap, rec.continue_laps, rec.new_compound, rec.projected_total_remaining
            ),
            None => println!("  no pit recommendation"),
        }
    }

    Ok(())
}

// a saved record wins over fitting; a fresh fit is written back when a path is configured
fn obtain_models(config: &StrategyConfig, practice: &[LapRecord]) -> Result<ModelSet> {
    if let Some(path) = &config.model_path {
        if path.exists() {
            let record = load_model_record(path)
                .with_context(|| format!("loading models {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                fuel_used = record.metadata.fuel_used,
                "using saved models"
            );
            return Ok(record.models);
        }
    }

    let models = fit_degradation_model(practice);
    if let Some(path) = &config.model_path {
        if !models.is_empty() {
            let record = ModelRecord::new(&config.track, &config.driver, models.clone(), practice);
            save_model_record(&record, path)
                .with_context(|| format!("saving models {}", path.display()))?;
        }
    }
    Ok(models)
}

fn report_models(models: &ModelSet, practice: &[LapRecord]) {
    println!("\nDegradation models:");
    for (compound, model) in models {
        let fuel =
            model.fuel_slope().map(|f| format!(", fuel {:+.4}s/unit", f)).unwrap_or_default();
        println!(
            "  {}: {:.3}s + {:+.3}s/lap{}",
            compound,
            model.intercept(),
            model.age_slope(),
            fuel
        );
        if let Some(quality) = evaluate_model(model, practice, compound) {
            println!(
                "    r2 {:.3}, mae {:.3}s over {} laps",
                quality.r2, quality.mae, quality.samples
            );
            if !quality.is_acceptable() {
                tracing::warn!(
                    compound = %compound,
                    r2 = quality.r2,
                    mae = quality.mae,
                    "poor model fit"
                );
            }
        }
    }
}

fn report_race(config: &StrategyConfig, race_laps: &[LapRecord], models: &ModelSet) {
    let stints = build_stints(race_laps);
    println!("\nRace stints:");
    for s in &stints {
        let pace = s.avg_lap_time.map(|t| format!("{:.3}s", t)).unwrap_or_else(|| "n/a".into());
        println!(
            "  #{} {} laps {}-{} ({} laps, avg {})",
            s.stint_number, s.compound, s.start_lap, s.end_lap, s.total_laps, pace
        );
    }
    for (compound, avg) in mean_stint_lengths(&stints) {
        let note = if models.contains_key(&compound) { "" } else { " (no model)" };
        println!("  avg {} stint: {:.1} laps{}", compound, avg, note);
    }

    let weather: Vec<&str> = race_laps.iter().filter_map(|l| l.weather.as_deref()).collect();
    let report = fia_compliance_check(&stints, &weather);
    println!(
        "Compliance: two compounds {}, stint length {}, pit stop {}",
        report.used_two_compounds, report.max_stint_ok, report.pit_stop_required
    );
    for note in &report.notes {
        println!("  - {}", note);
    }
    tracing::debug!(track = %config.track, stints = stints.len(), "race report done");
}
