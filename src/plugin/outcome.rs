use crate::error::PluginError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginFailure {
    pub plugin: String,
    pub error: PluginError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every relevant plugin succeeded (or none was relevant).
    Success,
    Partial,
    /// Every relevant plugin failed.
    Failed,
}

/// Merged result of running one operation across plugins.
#[derive(Debug)]
pub struct Aggregate<T> {
    pub value: T,
    /// Plugins that ran and did not answer `NotSupported`.
    pub relevant: usize,
    pub failures: Vec<PluginFailure>,
}

impl<T> Aggregate<T> {
    pub fn new(value: T, relevant: usize, failures: Vec<PluginFailure>) -> Self {
        Self {
            value,
            relevant,
            failures,
        }
    }

    pub fn outcome(&self) -> Outcome {
        if self.failures.is_empty() {
            Outcome::Success
        } else if self.failures.len() >= self.relevant {
            Outcome::Failed
        } else {
            Outcome::Partial
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == Outcome::Success
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Aggregate<U> {
        Aggregate {
            value: f(self.value),
            relevant: self.relevant,
            failures: self.failures,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
