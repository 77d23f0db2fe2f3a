//! Plugins compiled into the host.

pub mod appstream;
pub mod bundle;

use crate::plugin::registry::PluginRegistry;

pub use appstream::AppStream;
pub use bundle::Bundle;

/// Registry with every built-in plugin kind.
pub fn builtin_registry() -> PluginRegistry {
    PluginRegistry::new()
        .with("appstream", AppStream::build)
        .with("bundle", Bundle::build)
}
