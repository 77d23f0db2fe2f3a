use std::io;

use thiserror::Error;

use crate::model::app::AppState;
use crate::model::app_id::{AppId, AppIdError};
use crate::plugin::capability::Capability;

/// Structured failure reported by a plugin for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The operation does not apply to this plugin. Never surfaced.
    #[error("operation not supported")]
    NotSupported,
    #[error("operation was cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("no network connection")]
    NoNetwork,
    #[error("not enough disk space")]
    NoSpace,
    #[error("authentication required: {0}")]
    AuthRequired(String),
    #[error("{id} cannot be acted on while {state}")]
    InvalidState { id: String, state: AppState },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out")]
    TimedOut,
    #[error("i/o error: {0}")]
    Io(String),
}

impl PluginError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported)
    }
}

impl From<io::Error> for PluginError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for PluginError {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Failure of a host-level request.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("plugin {plugin}: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PluginError,
    },
    #[error("request was cancelled")]
    Cancelled,
    #[error("{0} timed out")]
    TimedOut(Capability),
    #[error("no plugin claimed {operation}")]
    Unclaimed { operation: Capability },
    #[error("{operation} claimed by more than one plugin: {}", plugins.join(", "))]
    ConflictingClaim {
        operation: Capability,
        plugins: Vec<String>,
    },
    #[error("no plugin manages {0}")]
    NotManaged(AppId),
    #[error("{id} cannot be acted on while {state}")]
    InvalidState { id: AppId, state: AppState },
    #[error(transparent)]
    InvalidId(#[from] AppIdError),
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),
}

impl HostError {
    pub fn plugin(plugin: impl Into<String>, source: PluginError) -> Self {
        if source.is_cancelled() {
            return Self::Cancelled;
        }
        Self::Plugin {
            plugin: plugin.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type HostResult<T> = Result<T, HostError>;
