//! Shared fixtures for host integration tests.
//!
//! `scripted` is a plugin kind whose behaviour comes entirely from manifest
//! settings, so each test can describe its plugins declaratively. Calls are
//! counted per `tag:name` in a process-wide table.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use swcenter::backends::builtin_registry;
use swcenter::model::app::{App, AppState, Quirks};
use swcenter::model::app_id::AppId;
use swcenter::model::app_list::AppList;
use swcenter::plugin::api::{Plugin, PluginContext};
use swcenter::plugin::capability::{Capability, CapabilitySet};
use swcenter::plugin::manifest::PluginManifest;
use swcenter::plugin::registry::PluginRegistry;
use swcenter::{Cancellable, HostConfig, PluginError, PluginManager, PluginResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub setup: usize,
    pub adopt: usize,
    pub list: usize,
    pub install: usize,
    pub batch: usize,
    /// Most actions this plugin had in flight at once.
    pub peak: usize,
}

static CALLS: LazyLock<Mutex<HashMap<String, Calls>>> = LazyLock::new(Default::default);

fn bump(key: &str, update: impl FnOnce(&mut Calls)) {
    let mut calls = CALLS.lock().unwrap_or_else(|e| e.into_inner());
    update(calls.entry(key.to_string()).or_default());
}

pub fn calls(tag: &str, plugin: &str) -> Calls {
    let calls = CALLS.lock().unwrap_or_else(|e| e.into_inner());
    calls.get(&format!("{tag}:{plugin}")).copied().unwrap_or_default()
}

pub struct Scripted {
    key: String,
    caps: CapabilitySet,
    ids: Vec<String>,
    claim: Option<String>,
    fail_setup: bool,
    fail_list: bool,
    file_ext: Option<String>,
    install: String,
    delay: Duration,
    active: AtomicUsize,
}

impl Scripted {
    pub fn build(manifest: &PluginManifest) -> Box<dyn Plugin> {
        let flag = |key: &str| {
            manifest
                .settings
                .get(key)
                .and_then(toml::Value::as_bool)
                .unwrap_or(false)
        };
        let caps = manifest
            .setting_list("caps")
            .iter()
            .filter_map(|name| Capability::ALL.into_iter().find(|c| c.name() == name))
            .collect();

        Box::new(Self {
            key: format!(
                "{}:{}",
                manifest.setting_str("tag").unwrap_or_default(),
                manifest.name
            ),
            caps,
            ids: manifest.setting_list("ids"),
            claim: manifest.setting_str("claim").map(str::to_string),
            fail_setup: flag("fail_setup"),
            fail_list: flag("fail_list"),
            file_ext: manifest.setting_str("file_ext").map(str::to_string),
            install: manifest.setting_str("install").unwrap_or("ok").to_string(),
            delay: Duration::from_millis(manifest.setting_u64("delay_ms").unwrap_or(0)),
            active: AtomicUsize::new(0),
        })
    }

    /// Run `action` while counted as in flight.
    fn in_flight<T>(&self, action: impl FnOnce() -> T) -> T {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        bump(&self.key, |c| c.peak = c.peak.max(now));
        let result = action();
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn install_steps(&self, ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
        match self.install.as_str() {
            "fail" => {
                app.set_state(AppState::Installing);
                Err(PluginError::Download("mirror unreachable".to_string()))
            }
            "wrong-state" => Ok(()),
            _ => {
                app.set_state(AppState::Installing);
                for percent in [25, 50, 75, 100] {
                    if let Err(err) = ctx.pause(self.delay) {
                        app.restore_state();
                        return Err(err);
                    }
                    app.set_progress(percent);
                }
                app.set_state(AppState::Installed);
                Ok(())
            }
        }
    }

    fn fill(&self, ctx: &PluginContext<'_>, list: &AppList) -> PluginResult<()> {
        bump(&self.key, |c| c.list += 1);
        if self.fail_list {
            return Err(PluginError::NoNetwork);
        }
        for id in &self.ids {
            ctx.pause(self.delay)?;
            let id = AppId::parse(id).map_err(|e| PluginError::failed(e.to_string()))?;
            list.add(ctx.app_create(&id, Quirks::NONE));
        }
        Ok(())
    }
}

impl Plugin for Scripted {
    fn capabilities(&self) -> CapabilitySet {
        self.caps
    }

    fn setup(&self, _ctx: &PluginContext<'_>) -> PluginResult<()> {
        bump(&self.key, |c| c.setup += 1);
        if self.fail_setup {
            return Err(PluginError::failed("backend unavailable"));
        }
        Ok(())
    }

    fn adopt_app(&self, ctx: &PluginContext<'_>, app: &Arc<App>) {
        bump(&self.key, |c| c.adopt += 1);
        if self.claim.as_deref() == Some(app.id().bundle_kind()) {
            app.claim(ctx.plugin_name());
        }
    }

    fn search(
        &self,
        ctx: &PluginContext<'_>,
        _terms: &[String],
        list: &AppList,
    ) -> PluginResult<()> {
        self.fill(ctx, list)
    }

    fn list_popular(&self, ctx: &PluginContext<'_>, list: &AppList) -> PluginResult<()> {
        self.fill(ctx, list)
    }

    fn install(&self, ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
        bump(&self.key, |c| c.install += 1);
        self.in_flight(|| self.install_steps(ctx, app))
    }

    fn update_batch(&self, ctx: &PluginContext<'_>, apps: &AppList) -> PluginResult<()> {
        bump(&self.key, |c| c.batch += 1);
        self.in_flight(|| {
            for app in apps.snapshot() {
                ctx.pause(self.delay)?;
                app.add_quirk(Quirks::NEEDS_REBOOT);
            }
            Ok(())
        })
    }

    fn file_to_app(
        &self,
        ctx: &PluginContext<'_>,
        file: &Path,
        list: &AppList,
    ) -> PluginResult<()> {
        let ext = file.extension().and_then(|e| e.to_str());
        if ext.is_none() || ext != self.file_ext.as_deref() {
            return Err(PluginError::NotSupported);
        }
        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed");
        let id = AppId::from_parts("scripted", ctx.plugin_name(), stem, "stable");
        list.add(ctx.app_create(&id, Quirks::NONE));
        Ok(())
    }
}

pub fn registry() -> PluginRegistry {
    builtin_registry().with("scripted", Scripted::build)
}

/// Manifest for a scripted plugin; `caps` are capability names.
pub fn scripted(tag: &str, name: &str, caps: &[&str]) -> PluginManifest {
    PluginManifest::new(name, "scripted")
        .with_setting("tag", tag)
        .with_setting("caps", caps.to_vec())
}

pub fn host(cache_root: &Path, manifests: Vec<PluginManifest>) -> PluginManager {
    let mut config = HostConfig::isolated(cache_root);
    config.plugins.entries = manifests;
    PluginManager::new(config, registry())
}

pub fn ready_host(cache_root: &Path, manifests: Vec<PluginManifest>) -> PluginManager {
    let manager = host(cache_root, manifests);
    manager.setup(&Cancellable::new()).expect("setup");
    manager
}

pub fn ids(list: &AppList) -> Vec<String> {
    let mut ids: Vec<String> = list.snapshot().iter().map(|a| a.id().to_string()).collect();
    ids.sort();
    ids
}
