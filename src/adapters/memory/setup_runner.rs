//! In-memory setup runner tracking installed releases.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::ports::{SetupError, SetupOutcome, SetupRelease, SetupRunner};

/// Which setup step an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupStep {
    Create,
    Delete,
}

#[derive(Default)]
pub struct MemorySetupRunner {
    installed: RwLock<BTreeMap<String, SetupRelease>>,
    failing: RwLock<HashSet<(String, SetupStep)>>,
    history: RwLock<Vec<(SetupStep, String)>>,
}

impl MemorySetupRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `step` of `task` fail until cleared.
    pub async fn fail_task(&self, task: &str, step: SetupStep) {
        self.failing.write().await.insert((task.to_string(), step));
    }

    pub async fn installed(&self) -> Vec<String> {
        self.installed.read().await.keys().cloned().collect()
    }

    pub async fn release(&self, release: &str) -> Option<SetupRelease> {
        self.installed.read().await.get(release).cloned()
    }

    /// Steps performed, in call order.
    pub async fn history(&self) -> Vec<(SetupStep, String)> {
        self.history.read().await.clone()
    }

    async fn check(&self, release: &SetupRelease, step: SetupStep) -> Result<(), SetupError> {
        self.history
            .write()
            .await
            .push((step, release.release.clone()));
        if self
            .failing
            .read()
            .await
            .contains(&(release.task.clone(), step))
        {
            return Err(SetupError::Failed {
                task: release.task.clone(),
                message: format!("injected {step:?} failure"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SetupRunner for MemorySetupRunner {
    async fn create(&self, release: &SetupRelease) -> Result<SetupOutcome, SetupError> {
        self.check(release, SetupStep::Create).await?;
        let mut installed = self.installed.write().await;
        if installed.get(&release.release) == Some(release) {
            return Ok(SetupOutcome::Unchanged);
        }
        installed.insert(release.release.clone(), release.clone());
        Ok(SetupOutcome::Applied)
    }

    async fn delete(&self, release: &SetupRelease) -> Result<SetupOutcome, SetupError> {
        self.check(release, SetupStep::Delete).await?;
        Ok(match self.installed.write().await.remove(&release.release) {
            Some(_) => SetupOutcome::Applied,
            None => SetupOutcome::Unchanged,
        })
    }
}
