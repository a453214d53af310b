//! CLI command handlers

pub mod render;
pub mod suggest;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::models::{Assignment, Config, Experiment};
use crate::infrastructure::config::ConfigLoader;

/// Read an experiment definition from a YAML (or JSON) file.
pub fn load_experiment(path: &Path) -> Result<Experiment> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read experiment file {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse experiment file {}", path.display()))
}

/// Load configuration from an explicit file, or the default hierarchy.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Parse `name=value` assignment arguments.
pub fn parse_assignments(args: &[String]) -> Result<Vec<Assignment>> {
    args.iter()
        .map(|arg| {
            let (name, value) = arg
                .split_once('=')
                .with_context(|| format!("Assignment '{arg}' must be in the form name=value"))?;
            let value = value
                .trim()
                .parse::<i64>()
                .with_context(|| format!("Assignment '{arg}' must have an integer value"))?;
            Ok(Assignment::new(name.trim(), value))
        })
        .collect()
}
