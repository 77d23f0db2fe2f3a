use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::plugin::capability::Capability;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(pub String);

impl PluginId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Declares one plugin instance: which compiled-in kind to build, under what
/// name, and its settings. Read from the config file's `[[plugins.entries]]`
/// or from `*.toml` files in the plugin locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    /// Registered plugin kind; defaults to `name`.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower runs first where order matters (adoption).
    #[serde(default)]
    pub priority: i32,
    /// Capabilities masked out even if the implementation provides them.
    #[serde(default)]
    pub disabled_capabilities: Vec<Capability>,
    #[serde(default)]
    pub settings: toml::Table,
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind.into()),
            description: None,
            author: None,
            enabled: true,
            priority: 0,
            disabled_capabilities: Vec::new(),
            settings: toml::Table::new(),
            source: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_setting(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }

    pub fn id(&self) -> PluginId {
        PluginId::new(&self.name)
    }

    pub fn read(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?;

        let mut manifest = toml::from_str::<PluginManifest>(&raw)
            .map_err(|err| format!("{}: {err}", path.display()))?;
        manifest.source = Some(path.to_path_buf());
        Ok(manifest)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(toml::Value::as_str)
    }

    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.settings
            .get(key)
            .and_then(toml::Value::as_integer)
            .and_then(|v| u64::try_from(v).ok())
    }

    pub fn setting_list(&self, key: &str) -> Vec<String> {
        self.settings
            .get(key)
            .and_then(toml::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_defaults_and_settings() {
        let manifest: PluginManifest = toml::from_str(
            r#"
            name = "bundle-user"
            kind = "bundle"
            disabled_capabilities = ["launch"]

            [settings]
            step_delay_ms = 5
            roots = ["/a", "/b"]
            "#,
        )
        .expect("parse");

        assert!(manifest.enabled);
        assert_eq!(manifest.priority, 0);
        assert_eq!(manifest.kind(), "bundle");
        assert_eq!(manifest.disabled_capabilities, vec![Capability::Launch]);
        assert_eq!(manifest.setting_u64("step_delay_ms"), Some(5));
        assert_eq!(manifest.setting_list("roots"), vec!["/a", "/b"]);
        assert_eq!(manifest.setting_str("missing"), None);
    }

    #[test]
    fn kind_defaults_to_name() {
        let manifest: PluginManifest = toml::from_str(r#"name = "appstream""#).expect("parse");
        assert_eq!(manifest.kind(), "appstream");
    }

    #[test]
    fn read_reports_path_on_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        fs::write(&path, "name = ").expect("write");
        let err = PluginManifest::read(&path).expect_err("invalid toml");
        assert!(err.contains("broken.toml"));
    }
}
