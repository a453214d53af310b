use std::path::Path;

use anyhow::{Context, Result};

use super::load_experiment;
use crate::cli::output::TableFormatter;

/// Handle the validate command
pub fn execute(path: &Path, json: bool) -> Result<()> {
    let experiment = load_experiment(path)?;
    experiment
        .validate()
        .with_context(|| format!("Experiment '{}' is invalid", experiment.name))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "success": true,
                "experiment": experiment.name,
                "parameters": experiment.parameters.len(),
                "metrics": experiment.metrics.len(),
                "patches": experiment.patches.len(),
            }))?
        );
    } else {
        println!("Experiment '{}' is valid.", experiment.name);
        println!("{}", TableFormatter::new().format_experiment(&experiment));
    }
    Ok(())
}
