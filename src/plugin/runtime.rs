use std::fmt;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use crate::cancel::Cancellable;
use crate::error::PluginError;
use crate::model::cache::AppCache;
use crate::plugin::api::{Plugin, PluginContext};
use crate::plugin::capability::{Capability, CapabilitySet};
use crate::plugin::manifest::{PluginId, PluginManifest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginStatus {
    /// Built, setup not run yet.
    Discovered,
    Ready,
    /// Setup failed; excluded from every dispatch.
    Failed(String),
    ShutDown,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginStatus::Discovered => f.write_str("discovered"),
            PluginStatus::Ready => f.write_str("ready"),
            PluginStatus::Failed(err) => write!(f, "failed: {err}"),
            PluginStatus::ShutDown => f.write_str("shut down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RuntimeState {
    status: PluginStatus,
    enabled: bool,
}

/// One loaded plugin plus its lifecycle bookkeeping.
pub struct PluginRuntime {
    pub id: PluginId,
    pub manifest: PluginManifest,
    plugin: Box<dyn Plugin>,
    capabilities: CapabilitySet,
    state: RwLock<RuntimeState>,
}

impl PluginRuntime {
    pub fn new(manifest: PluginManifest, plugin: Box<dyn Plugin>) -> Self {
        let capabilities = manifest
            .disabled_capabilities
            .iter()
            .fold(plugin.capabilities(), |set, cap| set.without(*cap));

        for cap in capabilities.unpaired_repo_actions() {
            tracing::warn!(
                plugin = %manifest.name,
                "implements {cap} without {}",
                cap.repo_pair().map(|p| p.name()).unwrap_or_default()
            );
        }

        Self {
            id: manifest.id(),
            state: RwLock::new(RuntimeState {
                status: PluginStatus::Discovered,
                enabled: manifest.enabled,
            }),
            manifest,
            plugin,
            capabilities,
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn display_name(&self) -> String {
        match self.manifest.description.as_ref() {
            Some(description) => format!("{} ({description})", self.manifest.name),
            None => self.manifest.name.clone(),
        }
    }

    pub fn priority(&self) -> i32 {
        self.manifest.priority
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn status(&self) -> PluginStatus {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
            .clone()
    }

    fn set_status(&self, status: PluginStatus) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .status = status;
    }

    pub fn is_enabled(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled = enabled;
    }

    /// Ready, enabled and implementing `cap`.
    pub fn supports(&self, cap: Capability) -> bool {
        self.capabilities.contains(cap)
            && self.is_enabled()
            && matches!(self.status(), PluginStatus::Ready)
    }

    pub fn context<'a>(
        &'a self,
        cache: &'a AppCache,
        cancellable: &'a Cancellable,
        cache_dir: &'a Path,
    ) -> PluginContext<'a> {
        PluginContext::new(self.name(), cache, cancellable, cache_dir)
    }

    /// Run setup once. Disabled plugins are skipped and stay `Discovered`.
    pub fn setup(&self, ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        if !self.is_enabled() || self.status() != PluginStatus::Discovered {
            return Ok(());
        }

        match self.plugin.setup(ctx) {
            Ok(()) => {
                self.set_status(PluginStatus::Ready);
                tracing::debug!(plugin = %self.name(), "setup complete");
                Ok(())
            }
            // Left `Discovered` so a later setup retries.
            Err(PluginError::Cancelled) => Err(PluginError::Cancelled),
            Err(err) => {
                self.mark_failed(err.to_string());
                Err(err)
            }
        }
    }

    pub(crate) fn mark_failed(&self, reason: String) {
        self.set_status(PluginStatus::Failed(reason));
    }

    pub fn shutdown(&self) {
        if self.status() == PluginStatus::ShutDown {
            return;
        }
        if self.status() == PluginStatus::Ready {
            self.plugin.shutdown();
        }
        self.set_status(PluginStatus::ShutDown);
    }
}

impl fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
