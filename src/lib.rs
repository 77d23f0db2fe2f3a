//! Plugin host for a software center.
//!
//! Package backends are [`Plugin`]s. The [`PluginManager`] loads them from
//! configuration, fans list queries out to all of them, merges the answers
//! into one deduplicated [`AppList`] of shared [`App`] records, and routes
//! per-app actions to the plugin that manages each record.

pub mod backends;
pub mod cancel;
pub mod error;
pub mod model;
pub mod plugin;

pub use cancel::{Cancellable, Watchdog};
pub use error::{HostError, HostResult, PluginError, PluginResult};
pub use model::{App, AppId, AppList, AppState, HostConfig, Quirks};
pub use plugin::{Capability, Plugin, PluginManager};
