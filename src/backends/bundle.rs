//! Simulated package backend for self-contained `.bundle` packages.
//!
//! Installed bundles, repositories, pending updates and history live in
//! `state.toml` under the plugin's cache directory. Actions advance the
//! record's progress in steps, pausing `step_delay_ms` between steps and
//! stopping at the first cancelled pause.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::model::app::{App, AppKind, AppState, Quirks};
use crate::model::app_id::{AppId, WILDCARD};
use crate::model::app_list::AppList;
use crate::plugin::api::{Plugin, PluginContext};
use crate::plugin::capability::{Capability, CapabilitySet};
use crate::plugin::manifest::PluginManifest;

pub const BUNDLE_KIND: &str = "bundle";

const STATE_FILE: &str = "state.toml";
const STEPS: u32 = 4;
const DEFAULT_ORIGIN: &str = "local";
const DEFAULT_BRANCH: &str = "stable";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Installed {
    name: String,
    version: String,
    #[serde(default)]
    exec: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    update_version: Option<String>,
    /// Pending update can be applied without a reboot.
    #[serde(default)]
    live_update: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Repo {
    #[serde(default)]
    url: Option<String>,
    enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HistoryEntry {
    id: String,
    version: String,
    timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Upgrade {
    version: String,
    #[serde(default)]
    triggered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct State {
    /// Keyed by the full app id.
    #[serde(default)]
    installed: BTreeMap<String, Installed>,
    #[serde(default)]
    repos: BTreeMap<String, Repo>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(default)]
    downloaded: Vec<String>,
    #[serde(default)]
    scheduled: Vec<String>,
    #[serde(default)]
    upgrade: Option<Upgrade>,
}

impl State {
    fn initial() -> Self {
        let mut state = Self::default();
        state.repos.insert(
            DEFAULT_ORIGIN.to_string(),
            Repo {
                url: None,
                enabled: true,
            },
        );
        state
    }
}

/// Contents of a `.bundle` file.
#[derive(Debug, Deserialize)]
struct BundleFile {
    id: String,
    name: String,
    version: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default = "default_origin")]
    origin: String,
    #[serde(default = "default_branch")]
    branch: String,
    #[serde(default)]
    exec: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    size: Option<u64>,
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

static BUNDLE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bundle://(?P<id>[A-Za-z0-9_.\-]+)(?:/(?P<branch>[A-Za-z0-9_.\-]+))?/?$")
        .expect("valid regex")
});

fn repo_id(name: &str) -> AppId {
    AppId::from_parts(BUNDLE_KIND, name, &format!("{name}.repo"), DEFAULT_BRANCH)
}

pub struct Bundle {
    step_delay: Duration,
    state: Mutex<State>,
    state_path: OnceLock<PathBuf>,
}

impl Bundle {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            state: Mutex::new(State::initial()),
            state_path: OnceLock::new(),
        }
    }

    pub fn build(manifest: &PluginManifest) -> Box<dyn Plugin> {
        let delay = manifest.setting_u64("step_delay_ms").unwrap_or(50);
        Box::new(Self::new(Duration::from_millis(delay)))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, state: &State) -> PluginResult<()> {
        let Some(path) = self.state_path.get() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string(state).map_err(|err| PluginError::failed(err.to_string()))?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Apply `change` to the persisted state and write it back.
    fn update<T>(&self, change: impl FnOnce(&mut State) -> PluginResult<T>) -> PluginResult<T> {
        let mut state = self.state();
        let value = change(&mut state)?;
        self.save(&state)?;
        Ok(value)
    }

    /// Advance `app` through the work steps. On cancellation the record goes
    /// back to its pre-action state.
    fn run_steps(&self, ctx: &PluginContext<'_>, app: &App) -> PluginResult<()> {
        for step in 1..=STEPS {
            if let Err(err) = ctx.pause(self.step_delay) {
                app.restore_state();
                return Err(err);
            }
            app.set_progress(step * 100 / STEPS);
        }
        Ok(())
    }

    /// Published state for an installed bundle.
    fn installed_state(entry: &Installed) -> AppState {
        match (&entry.update_version, entry.live_update) {
            (Some(_), true) => AppState::UpdatableLive,
            (Some(_), false) => AppState::Updatable,
            (None, _) => AppState::Installed,
        }
    }

    fn record(
        &self,
        ctx: &PluginContext<'_>,
        id: &str,
        entry: &Installed,
    ) -> PluginResult<Arc<App>> {
        let id = AppId::parse(id).map_err(|err| PluginError::InvalidFormat(err.to_string()))?;
        let app = ctx.app_create(&id, Quirks::NONE);
        app.claim(ctx.plugin_name());
        if app.name().is_none() {
            app.set_name(entry.name.clone());
        }
        app.set_version(entry.version.clone());
        app.set_update_version(entry.update_version.clone());
        if let Some(exec) = &entry.exec {
            app.set_launchable(exec.clone());
        }
        if !app.state().is_transitional() {
            app.set_state(Self::installed_state(entry));
        }
        Ok(app)
    }

    fn installed_entry(&self, app: &App) -> Option<Installed> {
        self.state().installed.get(&app.id().to_string()).cloned()
    }

    fn require_installed(&self, app: &App) -> PluginResult<Installed> {
        self.installed_entry(app).ok_or_else(|| PluginError::InvalidState {
            id: app.id().to_string(),
            state: app.state(),
        })
    }

    fn check_repo_enabled(&self, app: &App) -> PluginResult<()> {
        let origin = app.id().origin();
        match self.state().repos.get(origin) {
            Some(repo) if !repo.enabled => {
                Err(PluginError::failed(format!("repository {origin} is disabled")))
            }
            _ => Ok(()),
        }
    }

    fn read_bundle_file(path: &Path) -> PluginResult<BundleFile> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|err| PluginError::InvalidFormat(format!("{}: {err}", path.display())))
    }

    fn set_repo_enabled(&self, repo: &Arc<App>, enabled: bool) -> PluginResult<()> {
        let name = repo.id().origin().to_string();
        self.update(|state| {
            let entry = state
                .repos
                .get_mut(&name)
                .ok_or_else(|| PluginError::NotFound(format!("repository {name}")))?;
            entry.enabled = enabled;
            Ok(())
        })?;
        repo.set_state(if enabled {
            AppState::Installed
        } else {
            AppState::Available
        });
        Ok(())
    }
}

impl Plugin for Bundle {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[
            Capability::AdoptApp,
            Capability::SearchFiles,
            Capability::ListUpdates,
            Capability::ListSources,
            Capability::ListHistoricalUpdates,
            Capability::Launch,
            Capability::CancelUpdate,
            Capability::Install,
            Capability::Remove,
            Capability::UpdateLive,
            Capability::Download,
            Capability::DownloadUpgrade,
            Capability::TriggerUpgrade,
            Capability::FileToApp,
            Capability::UrlToApp,
            Capability::UpdateBatch,
            Capability::InstallRepo,
            Capability::RemoveRepo,
            Capability::EnableRepo,
            Capability::DisableRepo,
        ])
    }

    fn setup(&self, ctx: &PluginContext<'_>) -> PluginResult<()> {
        let path = ctx.cache_dir().join(STATE_FILE);
        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let loaded: State = toml::from_str(&raw)?;
            tracing::debug!(installed = loaded.installed.len(), "bundle state loaded");
            *self.state() = loaded;
        }
        // Already set if setup runs twice on one instance; the path is the same.
        let _ = self.state_path.set(path);
        Ok(())
    }

    fn adopt_app(&self, ctx: &PluginContext<'_>, app: &Arc<App>) {
        if app.id().bundle_kind() != BUNDLE_KIND {
            return;
        }
        if !app.claim(ctx.plugin_name()) {
            return;
        }
        if let Some(entry) = self.installed_entry(app) {
            if !app.state().is_transitional() {
                app.set_state(Self::installed_state(&entry));
            }
            app.set_update_version(entry.update_version);
        }
    }

    fn search_files(
        &self,
        ctx: &PluginContext<'_>,
        paths: &[PathBuf],
        list: &AppList,
    ) -> PluginResult<()> {
        let installed = self.state().installed.clone();
        for (id, entry) in &installed {
            let owns = paths
                .iter()
                .any(|path| entry.files.iter().any(|f| Path::new(f) == path));
            if owns {
                list.add(self.record(ctx, id, entry)?);
            }
        }
        Ok(())
    }

    fn list_updates(&self, ctx: &PluginContext<'_>, list: &AppList) -> PluginResult<()> {
        let installed = self.state().installed.clone();
        for (id, entry) in installed.iter().filter(|(_, e)| e.update_version.is_some()) {
            ctx.check_cancelled()?;
            list.add(self.record(ctx, id, entry)?);
        }
        Ok(())
    }

    fn list_sources(&self, ctx: &PluginContext<'_>, list: &AppList) -> PluginResult<()> {
        let repos = self.state().repos.clone();
        for (name, repo) in &repos {
            let app = ctx.app_create(&repo_id(name), Quirks::NONE);
            app.claim(ctx.plugin_name());
            app.set_kind(AppKind::Repository);
            app.set_name(name.clone());
            if let Some(url) = &repo.url {
                app.set_summary(url.clone());
            }
            if !app.state().is_transitional() {
                app.set_state(if repo.enabled {
                    AppState::Installed
                } else {
                    AppState::Available
                });
            }
            list.add(app);
        }
        Ok(())
    }

    fn list_historical_updates(&self, ctx: &PluginContext<'_>, list: &AppList) -> PluginResult<()> {
        let history = self.state().history.clone();
        for entry in history.iter().rev() {
            let id = AppId::parse(&entry.id)
                .map_err(|e| PluginError::InvalidFormat(e.to_string()))?;
            let app = ctx.app_create(&id, Quirks::NONE);
            app.claim(ctx.plugin_name());
            app.set_release_timestamp(entry.timestamp);
            if app.version().is_none() {
                app.set_version(entry.version.clone());
            }
            list.add(app);
        }
        Ok(())
    }

    fn launch(&self, _ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
        let entry = self.require_installed(app)?;
        let exec = entry
            .exec
            .ok_or_else(|| PluginError::NotFound(format!("no launchable for {}", app.id())))?;
        tracing::info!(app = %app.id(), exec = %exec, "launching");
        Ok(())
    }

    fn cancel_update(&self, _ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
        let id = app.id().to_string();
        self.update(|state| {
            state.scheduled.retain(|scheduled| *scheduled != id);
            Ok(())
        })?;
        app.remove_quirk(Quirks::NEEDS_REBOOT);
        Ok(())
    }

    fn install(&self, ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
        self.check_repo_enabled(app)?;

        let local = app.local_file().map(|path| Self::read_bundle_file(&path)).transpose()?;

        app.set_state(AppState::Installing);
        self.run_steps(ctx, app)?;

        let entry = Installed {
            name: app.display_name(),
            version: local
                .as_ref()
                .map(|file| file.version.clone())
                .or_else(|| app.version())
                .unwrap_or_else(|| "1.0".to_string()),
            exec: local
                .as_ref()
                .and_then(|file| file.exec.clone())
                .or_else(|| app.launchable()),
            files: local.map(|file| file.files).unwrap_or_default(),
            update_version: None,
            live_update: false,
        };
        let version = entry.version.clone();
        let id = app.id().to_string();
        self.update(|state| {
            state.installed.insert(id, entry);
            Ok(())
        })?;

        app.set_version(version);
        app.set_state(AppState::Installed);
        Ok(())
    }

    fn remove(&self, ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
        self.require_installed(app)?;

        app.set_state(AppState::Removing);
        self.run_steps(ctx, app)?;

        let id = app.id().to_string();
        self.update(|state| {
            state.installed.remove(&id);
            state.scheduled.retain(|scheduled| *scheduled != id);
            Ok(())
        })?;

        app.set_update_version(None);
        app.set_state(if app.local_file().is_some() {
            AppState::AvailableLocal
        } else {
            AppState::Available
        });
        Ok(())
    }

    fn update_live(&self, ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
        let entry = self.require_installed(app)?;
        let Some(version) = entry.update_version.clone() else {
            return Err(PluginError::InvalidState {
                id: app.id().to_string(),
                state: app.state(),
            });
        };

        app.set_state(AppState::Installing);
        self.run_steps(ctx, app)?;

        let id = app.id().to_string();
        let updated = version.clone();
        self.update(|state| {
            if let Some(installed) = state.installed.get_mut(&id) {
                installed.version = updated.clone();
                installed.update_version = None;
                installed.live_update = false;
            }
            state.history.push(HistoryEntry {
                id: id.clone(),
                version: updated,
                timestamp: now_secs(),
            });
            Ok(())
        })?;

        app.set_version(version);
        app.set_update_version(None);
        app.set_state(AppState::Installed);
        Ok(())
    }

    fn download(&self, ctx: &PluginContext<'_>, apps: &AppList) -> PluginResult<()> {
        for app in apps.snapshot() {
            let id = app.id().to_string();
            if self.state().downloaded.contains(&id) {
                continue;
            }
            for step in 1..=STEPS {
                ctx.pause(self.step_delay)?;
                app.set_progress(step * 100 / STEPS);
            }
            self.update(|state| {
                state.downloaded.push(id);
                Ok(())
            })?;
        }
        Ok(())
    }

    fn download_upgrade(&self, ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
        if app.kind() != AppKind::OsUpgrade {
            return Err(PluginError::NotSupported);
        }
        let version = app
            .version()
            .unwrap_or_else(|| app.id().component_id().to_string());

        for step in 1..=STEPS {
            ctx.pause(self.step_delay)?;
            app.set_progress(step * 100 / STEPS);
        }

        self.update(|state| {
            state.upgrade = Some(Upgrade {
                version,
                triggered: false,
            });
            Ok(())
        })
    }

    fn trigger_upgrade(&self, _ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
        self.update(|state| match state.upgrade.as_mut() {
            Some(upgrade) => {
                upgrade.triggered = true;
                Ok(())
            }
            None => Err(PluginError::InvalidState {
                id: app.id().to_string(),
                state: app.state(),
            }),
        })?;
        app.add_quirk(Quirks::NEEDS_REBOOT);
        Ok(())
    }

    fn file_to_app(
        &self,
        ctx: &PluginContext<'_>,
        file: &Path,
        list: &AppList,
    ) -> PluginResult<()> {
        if file.extension().is_none_or(|ext| ext != "bundle") {
            return Err(PluginError::NotSupported);
        }
        let bundle = Self::read_bundle_file(file)?;
        let id = AppId::from_parts(BUNDLE_KIND, &bundle.origin, &bundle.id, &bundle.branch);

        let app = ctx.app_create(&id, Quirks::NONE);
        app.claim(ctx.plugin_name());
        app.set_name(bundle.name);
        app.set_version(bundle.version);
        app.set_local_file(file);
        if let Some(summary) = bundle.summary {
            app.set_summary(summary);
        }
        if let Some(size) = bundle.size {
            app.set_size_bytes(size);
        }
        if let Some(exec) = bundle.exec {
            app.set_launchable(exec);
        }
        match self.installed_entry(&app) {
            Some(entry) => app.set_state(Self::installed_state(&entry)),
            None => app.set_state(AppState::AvailableLocal),
        };
        list.add(app);
        Ok(())
    }

    fn url_to_app(&self, ctx: &PluginContext<'_>, url: &str, list: &AppList) -> PluginResult<()> {
        let Some(captures) = BUNDLE_URL.captures(url) else {
            return Err(PluginError::NotSupported);
        };
        let component = &captures["id"];
        let branch = captures.name("branch").map_or(WILDCARD, |m| m.as_str());

        let pattern = AppId::from_parts(BUNDLE_KIND, WILDCARD, component, branch);
        let app = match ctx.cached_apps(&pattern).into_iter().find(|a| !a.is_wildcard()) {
            Some(app) => app,
            None => {
                let branch = if branch == WILDCARD { DEFAULT_BRANCH } else { branch };
                let id = AppId::from_parts(BUNDLE_KIND, DEFAULT_ORIGIN, component, branch);
                ctx.app_create(&id, Quirks::NONE)
            }
        };
        app.claim(ctx.plugin_name());
        if let Some(entry) = self.installed_entry(&app) {
            app.set_state(Self::installed_state(&entry));
        } else if app.state() == AppState::Unknown {
            app.set_state(AppState::Available);
        }
        list.add(app);
        Ok(())
    }

    fn update_batch(&self, ctx: &PluginContext<'_>, apps: &AppList) -> PluginResult<()> {
        for app in apps.snapshot() {
            ctx.check_cancelled()?;
            self.require_installed(&app)?;
            let id = app.id().to_string();
            self.update(|state| {
                if !state.scheduled.contains(&id) {
                    state.scheduled.push(id);
                }
                Ok(())
            })?;
            app.add_quirk(Quirks::NEEDS_REBOOT);
        }
        Ok(())
    }

    fn install_repo(&self, ctx: &PluginContext<'_>, repo: &Arc<App>) -> PluginResult<()> {
        let name = repo.id().origin().to_string();
        let url = repo.summary();
        repo.set_state(AppState::Installing);
        self.run_steps(ctx, repo)?;
        self.update(|state| {
            state.repos.insert(name, Repo { url, enabled: true });
            Ok(())
        })?;
        repo.set_kind(AppKind::Repository);
        repo.set_state(AppState::Installed);
        Ok(())
    }

    fn remove_repo(&self, _ctx: &PluginContext<'_>, repo: &Arc<App>) -> PluginResult<()> {
        let name = repo.id().origin().to_string();
        self.update(|state| {
            state
                .repos
                .remove(&name)
                .map(|_| ())
                .ok_or_else(|| PluginError::NotFound(format!("repository {name}")))
        })?;
        repo.set_state(AppState::Available);
        Ok(())
    }

    fn enable_repo(&self, _ctx: &PluginContext<'_>, repo: &Arc<App>) -> PluginResult<()> {
        self.set_repo_enabled(repo, true)
    }

    fn disable_repo(&self, _ctx: &PluginContext<'_>, repo: &Arc<App>) -> PluginResult<()> {
        self.set_repo_enabled(repo, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::Cancellable;
    use crate::model::cache::AppCache;

    struct Fixture {
        dir: tempfile::TempDir,
        plugin: Bundle,
        cache: AppCache,
        token: Cancellable,
    }

    impl Fixture {
        fn ctx(&self) -> PluginContext<'_> {
            PluginContext::new("bundle", &self.cache, &self.token, self.dir.path())
        }

        fn app(&self, id: &str) -> Arc<App> {
            let app = self.cache.create(&AppId::parse(id).expect("id"), Quirks::NONE);
            self.plugin.adopt_app(&self.ctx(), &app);
            app
        }
    }

    fn fixture() -> Fixture {
        let fixture = Fixture {
            dir: tempfile::tempdir().expect("tempdir"),
            plugin: Bundle::new(Duration::ZERO),
            cache: AppCache::new(),
            token: Cancellable::new(),
        };
        fixture.plugin.setup(&fixture.ctx()).expect("setup");
        fixture
    }

    #[test]
    fn adopts_only_bundles() {
        let fx = fixture();
        let bundle = fx.app("bundle/local/org.example.Tool/stable");
        let package = fx.app("package/fedora/org.example.Tool/stable");
        assert_eq!(bundle.management_plugin().as_deref(), Some("bundle"));
        assert!(!package.is_claimed());
    }

    #[test]
    fn install_then_remove_persists() {
        let fx = fixture();
        let app = fx.app("bundle/local/org.example.Tool/stable");
        let changes = app.subscribe();

        fx.plugin.install(&fx.ctx(), &app).expect("install");
        assert_eq!(app.state(), AppState::Installed);
        assert!(changes.try_iter().count() >= STEPS as usize);

        let raw = fs::read_to_string(fx.dir.path().join("bundle").join(STATE_FILE)).expect("state");
        assert!(raw.contains("org.example.Tool"));

        fx.plugin.remove(&fx.ctx(), &app).expect("remove");
        assert_eq!(app.state(), AppState::Available);
        assert!(fx.plugin.installed_entry(&app).is_none());
    }

    #[test]
    fn cancelled_install_restores_state() {
        let fx = fixture();
        let app = fx.app("bundle/local/org.example.Tool/stable");
        app.set_state(AppState::Available);
        fx.token.cancel();

        let err = fx.plugin.install(&fx.ctx(), &app).expect_err("cancelled");
        assert!(err.is_cancelled());
        assert_eq!(app.state(), AppState::Available);
        assert!(fx.plugin.installed_entry(&app).is_none());
    }

    #[test]
    fn disabled_repo_blocks_install() {
        let fx = fixture();
        let list = AppList::new();
        fx.plugin.list_sources(&fx.ctx(), &list).expect("sources");
        let repo = list.get(0).expect("local repo");
        assert_eq!(repo.kind(), AppKind::Repository);
        assert_eq!(repo.state(), AppState::Installed);

        fx.plugin.disable_repo(&fx.ctx(), &repo).expect("disable");
        assert_eq!(repo.state(), AppState::Available);

        let app = fx.app("bundle/local/org.example.Tool/stable");
        assert!(matches!(fx.plugin.install(&fx.ctx(), &app), Err(PluginError::Failed(_))));
    }

    #[test]
    fn bundle_files_become_local_apps() {
        let fx = fixture();
        let path = fx.dir.path().join("tool.bundle");
        fs::write(
            &path,
            "id = \"org.example.Tool\"\nname = \"Tool\"\nversion = \"2.0\"\nexec = \"tool\"\nfiles = [\"/opt/tool/bin/tool\"]\n",
        )
        .expect("write");

        let list = AppList::new();
        fx.plugin.file_to_app(&fx.ctx(), &path, &list).expect("file");
        let app = list.get(0).expect("app");
        assert_eq!(app.state(), AppState::AvailableLocal);
        assert_eq!(app.id().to_string(), "bundle/local/org.example.Tool/stable");

        fx.plugin.install(&fx.ctx(), &app).expect("install");
        assert_eq!(app.version().as_deref(), Some("2.0"));

        let owners = AppList::new();
        fx.plugin
            .search_files(&fx.ctx(), &[PathBuf::from("/opt/tool/bin/tool")], &owners)
            .expect("search files");
        assert!(Arc::ptr_eq(&owners.get(0).expect("owner"), &app));

        let other = AppList::new();
        assert!(matches!(
            fx.plugin.file_to_app(&fx.ctx(), Path::new("notes.txt"), &other),
            Err(PluginError::NotSupported)
        ));
    }

    #[test]
    fn urls_resolve_to_cached_records() {
        let fx = fixture();
        let known = fx.app("bundle/flathub/org.example.Tool/stable");

        let list = AppList::new();
        fx.plugin
            .url_to_app(&fx.ctx(), "bundle://org.example.Tool", &list)
            .expect("url");
        assert!(Arc::ptr_eq(&list.get(0).expect("app"), &known));

        let empty = AppList::new();
        assert!(matches!(
            fx.plugin.url_to_app(&fx.ctx(), "https://example.org", &empty),
            Err(PluginError::NotSupported)
        ));
    }

    #[test]
    fn live_update_records_history() {
        let fx = fixture();
        let app = fx.app("bundle/local/org.example.Tool/stable");
        fx.plugin.install(&fx.ctx(), &app).expect("install");
        fx.plugin
            .update(|state| {
                let entry = state.installed.values_mut().next().expect("installed");
                entry.update_version = Some("1.1".to_string());
                entry.live_update = true;
                Ok(())
            })
            .expect("stage update");

        let updates = AppList::new();
        fx.plugin.list_updates(&fx.ctx(), &updates).expect("updates");
        assert_eq!(updates.len(), 1);
        assert_eq!(app.state(), AppState::UpdatableLive);

        fx.plugin.update_live(&fx.ctx(), &app).expect("update");
        assert_eq!(app.state(), AppState::Installed);
        assert_eq!(app.version().as_deref(), Some("1.1"));

        let history = AppList::new();
        fx.plugin.list_historical_updates(&fx.ctx(), &history).expect("history");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn upgrade_must_be_downloaded_before_trigger() {
        let fx = fixture();
        let upgrade = fx.app("bundle/local/os.release/40");
        upgrade.set_kind(AppKind::OsUpgrade);

        assert!(fx.plugin.trigger_upgrade(&fx.ctx(), &upgrade).is_err());
        fx.plugin.download_upgrade(&fx.ctx(), &upgrade).expect("download");
        fx.plugin.trigger_upgrade(&fx.ctx(), &upgrade).expect("trigger");
        assert!(upgrade.has_quirk(Quirks::NEEDS_REBOOT));
    }
}
