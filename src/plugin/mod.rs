pub mod api;
pub mod capability;
pub mod events;
pub mod locks;
pub mod manager;
pub mod manifest;
pub mod outcome;
pub mod registry;
pub mod runtime;

pub use api::{Plugin, PluginContext};
pub use capability::{Capability, CapabilitySet};
pub use events::{EventLog, HostEvent, Severity};
pub use locks::{ActionGuard, ActionLocks};
pub use manager::{PluginInfo, PluginKey, PluginManager};
pub use manifest::{PluginId, PluginManifest};
pub use outcome::{Aggregate, Outcome, PluginFailure};
pub use registry::{PluginKind, PluginRegistry};
pub use runtime::{PluginRuntime, PluginStatus};
