use async_trait::async_trait;

use crate::domain::ports::errors::SetupError;

/// A setup task with its Helm values already evaluated for one trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRelease {
    /// Release name, unique per trial and task
    pub release: String,
    pub task: String,
    pub namespace: String,
    pub image: String,
    pub chart: String,
    /// `(name, value, force_string)` in declaration order
    pub values: Vec<(String, String, bool)>,
}

/// What a setup step actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// State was changed
    Applied,
    /// Desired state already held, nothing changed
    Unchanged,
}

/// Port for installing and removing setup task state
#[async_trait]
pub trait SetupRunner: Send + Sync {
    /// Install the release; already-installed is `Unchanged`
    async fn create(&self, release: &SetupRelease) -> Result<SetupOutcome, SetupError>;

    /// Remove the release; already-absent is `Unchanged`
    async fn delete(&self, release: &SetupRelease) -> Result<SetupOutcome, SetupError>;
}
