use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{load_config, load_experiment};
use crate::cli::output::TableFormatter;
use crate::domain::ports::SuggestionClient;
use crate::infrastructure::http::HttpSuggestionClient;

/// Handle the suggest command
///
/// Ctrl-C cancels the outstanding request.
pub async fn execute(experiment_path: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let experiment = load_experiment(experiment_path)?;

    let base_url = config
        .suggestion
        .base_url
        .clone()
        .context("No suggestion service configured (set suggestion.base_url or TRIALCTL_SUGGESTION__BASE_URL)")?;
    let client = HttpSuggestionClient::new(base_url, Duration::from_secs(config.suggestion.timeout_secs))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling suggestion request");
            on_interrupt.cancel();
        }
    });

    let result = client.next_assignments(&experiment, &cancel).await;
    interrupt.abort();
    let assignments = result.context("Failed to obtain a suggestion")?;
    experiment
        .validate_assignments(&assignments)
        .context("Suggestion service returned an invalid assignment")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assignments)?);
    } else {
        println!("Suggested assignment for '{}':", experiment.name);
        println!("{}", TableFormatter::new().format_assignments(&assignments));
    }
    Ok(())
}
