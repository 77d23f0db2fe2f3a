use std::fmt;

use crate::plugin::api::Plugin;
use crate::plugin::manifest::PluginManifest;

pub type PluginBuilder = fn(&PluginManifest) -> Box<dyn Plugin>;

/// A compiled-in plugin implementation the host can instantiate by name.
#[derive(Clone, Copy)]
pub struct PluginKind {
    pub name: &'static str,
    pub build: PluginBuilder,
}

impl fmt::Debug for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginKind")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Table of plugin kinds known at build time.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    kinds: Vec<PluginKind>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations under the same name replace earlier ones.
    pub fn register(&mut self, name: &'static str, build: PluginBuilder) -> &mut Self {
        self.kinds.retain(|kind| kind.name != name);
        self.kinds.push(PluginKind { name, build });
        self
    }

    pub fn with(mut self, name: &'static str, build: PluginBuilder) -> Self {
        self.register(name, build);
        self
    }

    pub fn find(&self, name: &str) -> Option<&PluginKind> {
        self.kinds.iter().find(|kind| kind.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.kinds.iter().map(|kind| kind.name).collect()
    }

    pub fn build(&self, manifest: &PluginManifest) -> Option<Box<dyn Plugin>> {
        self.find(manifest.kind()).map(|kind| (kind.build)(manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::capability::{Capability, CapabilitySet};

    struct Nothing;

    impl Plugin for Nothing {
        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::EMPTY
        }
    }

    struct Searcher;

    impl Plugin for Searcher {
        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::of(&[Capability::Search])
        }
    }

    #[test]
    fn build_by_manifest_kind() {
        let registry = PluginRegistry::new()
            .with("nothing", |_| Box::new(Nothing))
            .with("searcher", |_| Box::new(Searcher));

        let plugin = registry
            .build(&PluginManifest::new("my-search", "searcher"))
            .expect("registered kind");
        assert!(plugin.capabilities().contains(Capability::Search));
        assert!(registry.build(&PluginManifest::new("x", "missing")).is_none());
    }

    #[test]
    fn re_registering_replaces() {
        let mut registry = PluginRegistry::new();
        registry.register("k", |_| Box::new(Nothing));
        registry.register("k", |_| Box::new(Searcher));
        assert_eq!(registry.names(), vec!["k"]);
        let plugin = registry
            .build(&PluginManifest::new("k", "k"))
            .expect("kind");
        assert!(!plugin.capabilities().is_empty());
    }
}
