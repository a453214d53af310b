use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use super::{load_config, load_experiment, parse_assignments};
use crate::adapters::memory::MemoryCluster;
use crate::cli::output::TableFormatter;
use crate::domain::models::{ClusterObject, PatchOperation, Trial};
use crate::services::{PatchResolver, RetryPolicy, TrialFactory};

/// Resolve the patch operations for an assignment against a seeded
/// in-memory cluster. Nothing is applied.
pub async fn resolve_operations(
    experiment_path: &Path,
    assignments: &[String],
    objects: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<Trial> {
    let config = load_config(config_path)?;
    let experiment = load_experiment(experiment_path)?;
    experiment
        .validate()
        .with_context(|| format!("Experiment '{}' is invalid", experiment.name))?;

    let assignments = parse_assignments(assignments)?;
    let mut trial = TrialFactory::stamp(&experiment, assignments).context("Invalid assignments")?;

    let seeded: Vec<ClusterObject> = match objects {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read objects file {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse objects file {}", path.display()))?
        }
        None => Vec::new(),
    };
    let cluster = Arc::new(MemoryCluster::with_objects(seeded).await);

    let resolver = PatchResolver::new(
        cluster,
        RetryPolicy::from_config(&config.retry),
        config.patches.max_attempts,
    );
    resolver
        .resolve(&experiment, &mut trial, &CancellationToken::new())
        .await
        .map_err(|failure| anyhow::anyhow!("{}: {}", failure.reason(), failure.message()))?;

    Ok(trial)
}

/// Handle the render command
pub async fn execute(
    experiment_path: &Path,
    assignments: &[String],
    objects: Option<&Path>,
    config_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let trial = resolve_operations(experiment_path, assignments, objects, config_path).await?;
    let operations: &[PatchOperation] = &trial.spec.patch_operations;

    if json {
        println!("{}", serde_json::to_string_pretty(operations)?);
    } else if operations.is_empty() {
        println!("No patch operations for {}.", trial.status.assignments);
    } else {
        let formatter = TableFormatter::new();
        println!("{}", formatter.format_assignments(&trial.spec.assignments));
        println!("{}", formatter.format_patch_operations(operations));
    }
    Ok(())
}
