use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::plugin::manifest::PluginManifest;

const DEFAULTS: &str = include_str!("../../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default)]
    pub dispatch_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            dispatch_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub locations: Vec<PathBuf>,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub blocklist: Vec<String>,
    #[serde(default)]
    pub entries: Vec<PluginManifest>,
}

impl HostConfig {
    /// Load configuration with layering: defaults → user config.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_toml(DEFAULTS)?;

        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "swcenter") {
            let config_path = proj_dirs.config_dir().join("config.toml");
            if config_path.exists() {
                let user_str = fs::read_to_string(&config_path)
                    .with_context(|| format!("reading {}", config_path.display()))?;
                config = Self::from_toml(&user_str)
                    .with_context(|| format!("parsing {}", config_path.display()))?;
            }

            let user_plugins = proj_dirs.config_dir().join("plugins");
            if !config.plugins.locations.contains(&user_plugins) {
                config.plugins.locations.push(user_plugins);
            }
        }

        config.expand_paths()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Built-in defaults without consulting the user's config directory.
    pub fn defaults() -> Result<Self> {
        let mut config = Self::from_toml(DEFAULTS)?;
        config.expand_paths()?;
        Ok(config)
    }

    /// Empty configuration rooted at `cache_dir`, no plugin entries.
    pub fn isolated(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            general: GeneralConfig {
                cache_dir: cache_dir.as_ref().to_string_lossy().into_owned(),
                dispatch_timeout_secs: 0,
            },
            plugins: PluginsConfig::default(),
        }
    }

    fn expand_paths(&mut self) -> Result<()> {
        if self.general.cache_dir.starts_with('~') {
            let home = dirs_home().ok_or_else(|| anyhow!("cannot determine home directory"))?;
            self.general.cache_dir =
                self.general
                    .cache_dir
                    .replacen('~', &home.to_string_lossy(), 1);
        }

        for location in &mut self.plugins.locations {
            *location = expand_tilde(location);
        }

        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.general.cache_dir)
    }

    /// Per-file location inside the cache root; parent directories are created.
    pub fn cache_file_path(&self, file_name: &str) -> std::io::Result<PathBuf> {
        let path = self.cache_dir().join(file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        (self.general.dispatch_timeout_secs > 0)
            .then(|| Duration::from_secs(self.general.dispatch_timeout_secs))
    }

    /// Whether the allow/block lists let `name` load.
    pub fn plugin_allowed(&self, name: &str) -> bool {
        if self.plugins.blocklist.iter().any(|n| n == name) {
            return false;
        }
        self.plugins.allowlist.is_empty() || self.plugins.allowlist.iter().any(|n| n == name)
    }
}

fn default_cache_dir() -> String {
    directories::ProjectDirs::from("", "", "swcenter")
        .map(|d| d.cache_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| ".swcenter-cache".to_string())
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if !text.starts_with('~') {
        return path.to_path_buf();
    }

    if let Some(home) = dirs_home() {
        return PathBuf::from(text.replacen('~', &home.to_string_lossy(), 1));
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let config = HostConfig::from_toml(DEFAULTS).expect("defaults parse");
        let names: Vec<&str> = config
            .plugins
            .entries
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["appstream", "bundle"]);
        assert_eq!(config.dispatch_timeout(), None);
    }

    #[test]
    fn allow_and_block_lists() {
        let mut config = HostConfig::isolated("/tmp/swcenter-test");
        assert!(config.plugin_allowed("anything"));

        config.plugins.allowlist = vec!["appstream".into(), "bundle".into()];
        config.plugins.blocklist = vec!["bundle".into()];
        assert!(config.plugin_allowed("appstream"));
        assert!(!config.plugin_allowed("bundle"));
        assert!(!config.plugin_allowed("other"));
    }

    #[test]
    fn partial_user_config_fills_defaults() {
        let config = HostConfig::from_toml(
            r#"
            [general]
            dispatch_timeout_secs = 30
            "#,
        )
        .expect("parse");
        assert_eq!(config.dispatch_timeout(), Some(Duration::from_secs(30)));
        assert!(config.plugins.entries.is_empty());
    }

    #[test]
    fn cache_file_path_creates_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HostConfig::isolated(dir.path());
        let path = config
            .cache_file_path("appstream/external.toml")
            .expect("cache path");
        assert!(path.parent().expect("parent").is_dir());
        assert!(path.starts_with(dir.path()));
    }
}
