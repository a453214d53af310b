//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "trialctl")]
#[command(about = "trialctl - trial lifecycle controller for optimization experiments", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .trialctl/config.yaml plus environment)
    #[arg(short, long, global = true, env = "TRIALCTL_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check an experiment definition
    Validate {
        /// Experiment YAML file
        experiment: PathBuf,
    },

    /// Resolve the patch operations a trial assignment produces
    Render {
        /// Experiment YAML file
        experiment: PathBuf,

        /// Parameter assignment as name=value (repeatable)
        #[arg(short, long = "assign", value_name = "NAME=VALUE")]
        assignments: Vec<String>,

        /// YAML list of cluster objects to resolve patch targets against
        #[arg(short, long)]
        objects: Option<PathBuf>,
    },

    /// Ask the suggestion service for one assignment set
    Suggest {
        /// Experiment YAML file
        experiment: PathBuf,
    },
}
