use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::error::PluginError;
use crate::model::app::App;
use crate::plugin::capability::Capability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Host-level record of something a plugin reported, kept after the call
/// that produced it has returned.
#[derive(Debug, Clone)]
pub struct HostEvent {
    pub id: u64,
    pub severity: Severity,
    pub plugin: Option<String>,
    pub operation: Option<Capability>,
    pub app: Option<Arc<App>>,
    pub error: Option<PluginError>,
    pub message: String,
    pub timestamp: SystemTime,
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.severity)?;
        if let Some(plugin) = &self.plugin {
            write!(f, " {plugin}")?;
        }
        if let Some(operation) = self.operation {
            write!(f, " {operation}")?;
        }
        if let Some(app) = &self.app {
            write!(f, " {}", app.id())?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug)]
pub struct EventLog {
    events: Mutex<Vec<HostEvent>>,
    next_id: AtomicU64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Builder for one event; finish with [`EventLog::push`].
#[derive(Debug, Clone)]
pub struct EventDraft {
    severity: Severity,
    message: String,
    plugin: Option<String>,
    operation: Option<Capability>,
    app: Option<Arc<App>>,
    error: Option<PluginError>,
}

impl EventDraft {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            plugin: None,
            operation: None,
            app: None,
            error: None,
        }
    }

    /// Draft for a plugin failure; the message is the error text.
    pub fn failure(plugin: &str, operation: Capability, error: PluginError) -> Self {
        Self {
            severity: Severity::Error,
            message: error.to_string(),
            plugin: Some(plugin.to_string()),
            operation: Some(operation),
            app: None,
            error: Some(error),
        }
    }

    pub fn plugin(mut self, plugin: &str) -> Self {
        self.plugin = Some(plugin.to_string());
        self
    }

    pub fn operation(mut self, operation: Capability) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn app(mut self, app: &Arc<App>) -> Self {
        self.app = Some(Arc::clone(app));
        self
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> MutexGuard<'_, Vec<HostEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event. Cancellation is not an error and is dropped here.
    pub fn push(&self, draft: EventDraft) -> Option<u64> {
        if draft.error.as_ref().is_some_and(PluginError::is_cancelled) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let event = HostEvent {
            id,
            severity: draft.severity,
            plugin: draft.plugin,
            operation: draft.operation,
            app: draft.app,
            error: draft.error,
            message: draft.message,
            timestamp: SystemTime::now(),
        };

        match event.severity {
            Severity::Error | Severity::Warning => tracing::warn!("{event}"),
            Severity::Info => tracing::info!("{event}"),
        }

        self.events().push(event);
        Some(id)
    }

    pub fn snapshot(&self) -> Vec<HostEvent> {
        self.events().clone()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events()
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    pub fn for_app(&self, app: &Arc<App>) -> Vec<HostEvent> {
        self.events()
            .iter()
            .filter(|e| e.app.as_ref().is_some_and(|a| Arc::ptr_eq(a, app)))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events().clear();
    }
}
