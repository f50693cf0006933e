//! Placeholder for a bound service whose binding cannot be used

use async_trait::async_trait;
use smoketest_core::{aggregate, Probe, TestResult};

/// Label of the leaf reporting the broken binding
pub const READ_BINDING: &str = "Read service binding";

/// Reports a present but unusable binding as a failed probe instead of
/// silently skipping it
pub struct MisconfiguredProbe {
    key: String,
    name: String,
    step: String,
    error: String,
}

impl MisconfiguredProbe {
    pub fn new(key: impl Into<String>, name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            step: READ_BINDING.to_string(),
            error: error.to_string(),
        }
    }

    /// Report the error under `label` instead of [`READ_BINDING`]
    pub fn with_step(mut self, label: impl Into<String>) -> Self {
        self.step = label.into();
        self
    }
}

#[async_trait]
impl Probe for MisconfiguredProbe {
    fn key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> TestResult {
        aggregate(
            self.key.clone(),
            self.name.clone(),
            vec![TestResult::failed(self.step.clone(), self.error.clone())],
        )
    }
}
