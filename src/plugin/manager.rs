use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use ignore::WalkBuilder;
use slotmap::{SlotMap, new_key_type};

use crate::cancel::{Cancellable, Watchdog};
use crate::error::{HostError, HostResult, PluginError, PluginResult};
use crate::model::app::{App, AppState, Quirks};
use crate::model::app_id::AppId;
use crate::model::app_list::{AppList, DedupOptions};
use crate::model::cache::AppCache;
use crate::model::category::{Category, CategoryList};
use crate::model::config::HostConfig;
use crate::plugin::api::{Plugin, PluginContext};
use crate::plugin::capability::{Capability, CapabilitySet};
use crate::plugin::events::{EventDraft, EventLog, HostEvent, Severity};
use crate::plugin::locks::ActionLocks;
use crate::plugin::manifest::PluginManifest;
use crate::plugin::outcome::{Aggregate, PluginFailure};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::runtime::{PluginRuntime, PluginStatus};

new_key_type! {
    pub struct PluginKey;
}

type Runtimes = SlotMap<PluginKey, PluginRuntime>;

/// Snapshot of one loaded plugin for status displays.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub key: PluginKey,
    pub name: String,
    pub kind: String,
    pub display_name: String,
    pub priority: i32,
    pub enabled: bool,
    pub status: PluginStatus,
    pub capabilities: CapabilitySet,
    pub source: Option<PathBuf>,
}

/// The plugin host: owns every loaded plugin, the app cache and the event
/// log, and routes requests to plugins.
///
/// List operations fan out to every supporting plugin concurrently and
/// merge into one deduplicated [`AppList`]. Per-app actions go to the single
/// plugin managing the record.
pub struct PluginManager {
    config: HostConfig,
    registry: PluginRegistry,
    runtimes: RwLock<Runtimes>,
    cache: AppCache,
    events: EventLog,
    action_locks: ActionLocks,
}

impl PluginManager {
    /// Discover plugins from the configuration. Nothing runs until
    /// [`PluginManager::setup`].
    pub fn new(config: HostConfig, registry: PluginRegistry) -> Self {
        let manager = Self {
            config,
            registry,
            runtimes: RwLock::new(SlotMap::with_key()),
            cache: AppCache::new(),
            events: EventLog::new(),
            action_locks: ActionLocks::new(),
        };
        let discovered = manager.discover();
        *manager.runtimes_mut() = discovered;
        manager
    }

    fn runtimes(&self) -> RwLockReadGuard<'_, Runtimes> {
        self.runtimes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn runtimes_mut(&self) -> RwLockWriteGuard<'_, Runtimes> {
        self.runtimes.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn discover(&self) -> Runtimes {
        let mut runtimes = Runtimes::with_key();
        let mut seen = HashSet::new();

        let manifests = self
            .config
            .plugins
            .entries
            .iter()
            .cloned()
            .map(Ok)
            .chain(self.scan_locations());

        for manifest in manifests {
            let manifest = match manifest {
                Ok(manifest) => manifest,
                Err(err) => {
                    self.events.push(EventDraft::new(
                        Severity::Warning,
                        format!("invalid plugin manifest: {err}"),
                    ));
                    continue;
                }
            };

            if !self.config.plugin_allowed(&manifest.name) {
                tracing::debug!(plugin = %manifest.name, "excluded by allow/block list");
                continue;
            }

            if !seen.insert(manifest.name.clone()) {
                self.events.push(
                    EventDraft::new(Severity::Warning, "duplicate plugin name, ignored")
                        .plugin(&manifest.name),
                );
                continue;
            }

            let Some(plugin) = self.registry.build(&manifest) else {
                self.events.push(
                    EventDraft::new(
                        Severity::Warning,
                        format!("unknown plugin kind {}", manifest.kind()),
                    )
                    .plugin(&manifest.name),
                );
                continue;
            };

            runtimes.insert(PluginRuntime::new(manifest, plugin));
        }

        tracing::info!(count = runtimes.len(), "plugins discovered");
        runtimes
    }

    fn scan_locations(&self) -> Vec<Result<PluginManifest, String>> {
        let mut manifests = Vec::new();

        for location in self.config.plugins.locations.iter().filter(|d| d.is_dir()) {
            let mut paths: Vec<PathBuf> = WalkBuilder::new(location)
                .max_depth(Some(2))
                .hidden(false)
                .build()
                .flatten()
                .map(|entry| entry.into_path())
                .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "toml"))
                .collect();
            paths.sort();
            manifests.extend(paths.iter().map(|path| PluginManifest::read(path)));
        }

        manifests
    }

    /// Run setup on every discovered, enabled plugin concurrently. Returns the
    /// number of plugins ready afterwards.
    pub fn setup(&self, cancellable: &Cancellable) -> HostResult<usize> {
        cancellable.check().map_err(|_| HostError::Cancelled)?;

        let runtimes = self.runtimes();
        let cache_dir = self.config.cache_dir();
        let jobs: Vec<(&PluginRuntime, &PluginRuntime)> =
            runtimes.values().map(|rt| (rt, rt)).collect();
        let results = self.run_jobs(cancellable, &jobs, |_, ctx, runtime| runtime.setup(ctx));

        for (name, result) in results {
            match result {
                Ok(()) | Err(PluginError::Cancelled) => {}
                Err(err) => {
                    // A panicking setup never reached its own status update.
                    if let Some(runtime) = runtimes.values().find(|rt| rt.name() == name) {
                        if runtime.status() == PluginStatus::Discovered {
                            runtime.mark_failed(err.to_string());
                        }
                    }
                    self.events.push(
                        EventDraft::new(Severity::Warning, format!("setup failed: {err}"))
                            .plugin(&name),
                    );
                }
            }
        }

        if cancellable.is_cancelled() {
            return Err(HostError::Cancelled);
        }

        let ready = runtimes
            .values()
            .filter(|rt| rt.status() == PluginStatus::Ready)
            .count();
        tracing::info!(ready, cache = %cache_dir.display(), "plugin setup finished");
        Ok(ready)
    }

    /// Shut everything down, invalidate the app cache, rediscover and set up
    /// again. Records handed out earlier stay valid but are no longer cached.
    pub fn setup_again(&self, cancellable: &Cancellable) -> HostResult<usize> {
        {
            let mut runtimes = self.runtimes_mut();
            for runtime in runtimes.values() {
                runtime.shutdown();
            }
            self.cache.clear();
            *runtimes = self.discover();
        }
        self.setup(cancellable)
    }

    /// Shut down every plugin. Safe to call more than once.
    pub fn shutdown(&self) {
        for runtime in self.runtimes().values() {
            runtime.shutdown();
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn cache(&self) -> &AppCache {
        &self.cache
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.snapshot()
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        let runtimes = self.runtimes();
        let mut infos: Vec<PluginInfo> = runtimes
            .iter()
            .map(|(key, runtime)| PluginInfo {
                key,
                name: runtime.name().to_string(),
                kind: runtime.manifest.kind().to_string(),
                display_name: runtime.display_name(),
                priority: runtime.priority(),
                enabled: runtime.is_enabled(),
                status: runtime.status(),
                capabilities: runtime.capabilities(),
                source: runtime.manifest.source.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        infos
    }

    pub fn find_plugin(&self, name: &str) -> Option<PluginInfo> {
        self.plugins().into_iter().find(|info| info.name == name)
    }

    /// Enable or disable a plugin at runtime. Disabled plugins are skipped by
    /// every dispatch. Enabling a plugin that never ran setup sets it up now;
    /// a setup failure is recorded and returned.
    pub fn set_plugin_enabled(&self, name: &str, enabled: bool) -> HostResult<()> {
        let runtimes = self.runtimes();
        let runtime = runtimes
            .values()
            .find(|rt| rt.name() == name)
            .ok_or_else(|| HostError::UnknownPlugin(name.to_string()))?;
        runtime.set_enabled(enabled);
        tracing::info!(plugin = name, enabled, "plugin toggled");

        if !enabled || runtime.status() != PluginStatus::Discovered {
            return Ok(());
        }
        let cancellable = Cancellable::new();
        let cache_dir = self.config.cache_dir();
        let ctx = runtime.context(&self.cache, &cancellable, &cache_dir);
        runtime.setup(&ctx).map_err(|err| {
            self.events.push(
                EventDraft::new(Severity::Warning, format!("setup failed: {err}")).plugin(name),
            );
            HostError::plugin(name, err)
        })
    }

    pub fn plugin_count(&self) -> usize {
        self.runtimes().len()
    }

    pub fn error_count(&self) -> usize {
        self.runtimes()
            .values()
            .filter(|rt| matches!(rt.status(), PluginStatus::Failed(_)))
            .count()
    }

    pub fn summary_notification(&self) -> String {
        let ready = self
            .runtimes()
            .values()
            .filter(|rt| rt.status() == PluginStatus::Ready)
            .count();
        format!(
            "plugins: {ready} ready, {} failed, {} total",
            self.error_count(),
            self.plugin_count()
        )
    }

    /// Fetch or create the cached record for `id`. A single segment is
    /// shorthand for a component id with every other segment wildcarded.
    pub fn app_create(&self, id: &str) -> HostResult<Arc<App>> {
        self.app_create_with_quirks(id, Quirks::NONE)
    }

    pub fn app_create_with_quirks(&self, id: &str, quirks: Quirks) -> HostResult<Arc<App>> {
        let id = AppId::parse(id)?;
        Ok(self.cache.create(&id, quirks))
    }

    pub fn search(&self, query: &str, cancellable: &Cancellable) -> HostResult<Aggregate<AppList>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Aggregate::new(AppList::new(), 0, Vec::new()));
        }
        self.dispatch_list(Capability::Search, cancellable, |plugin, ctx, list| {
            plugin.search(ctx, &terms, list)
        })
    }

    pub fn search_files(
        &self,
        paths: &[PathBuf],
        cancellable: &Cancellable,
    ) -> HostResult<Aggregate<AppList>> {
        self.dispatch_list(Capability::SearchFiles, cancellable, |plugin, ctx, list| {
            plugin.search_files(ctx, paths, list)
        })
    }

    pub fn search_provides(
        &self,
        tags: &[String],
        cancellable: &Cancellable,
    ) -> HostResult<Aggregate<AppList>> {
        self.dispatch_list(Capability::SearchProvides, cancellable, |plugin, ctx, list| {
            plugin.search_provides(ctx, tags, list)
        })
    }

    /// Other records for the same software as `app`, never `app` itself.
    pub fn find_alternates(
        &self,
        app: &Arc<App>,
        cancellable: &Cancellable,
    ) -> HostResult<Aggregate<AppList>> {
        let aggregate = self.dispatch_list(
            Capability::FindAlternates,
            cancellable,
            |plugin, ctx, list| plugin.find_alternates(ctx, app, list),
        )?;
        aggregate.value.retain(|candidate| !Arc::ptr_eq(candidate, app));
        Ok(aggregate)
    }

    pub fn list_updates(&self, cancellable: &Cancellable) -> HostResult<Aggregate<AppList>> {
        self.dispatch_list(Capability::ListUpdates, cancellable, |plugin, ctx, list| {
            plugin.list_updates(ctx, list)
        })
    }

    pub fn list_sources(&self, cancellable: &Cancellable) -> HostResult<Aggregate<AppList>> {
        self.dispatch_list(Capability::ListSources, cancellable, |plugin, ctx, list| {
            plugin.list_sources(ctx, list)
        })
    }

    pub fn list_historical_updates(
        &self,
        cancellable: &Cancellable,
    ) -> HostResult<Aggregate<AppList>> {
        self.dispatch_list(
            Capability::ListHistoricalUpdates,
            cancellable,
            |plugin, ctx, list| plugin.list_historical_updates(ctx, list),
        )
    }

    pub fn list_recent(
        &self,
        age: Duration,
        cancellable: &Cancellable,
    ) -> HostResult<Aggregate<AppList>> {
        self.dispatch_list(Capability::ListRecent, cancellable, |plugin, ctx, list| {
            plugin.list_recent(ctx, age, list)
        })
    }

    pub fn list_popular(&self, cancellable: &Cancellable) -> HostResult<Aggregate<AppList>> {
        self.dispatch_list(Capability::ListPopular, cancellable, |plugin, ctx, list| {
            plugin.list_popular(ctx, list)
        })
    }

    pub fn list_featured(&self, cancellable: &Cancellable) -> HostResult<Aggregate<AppList>> {
        self.dispatch_list(Capability::ListFeatured, cancellable, |plugin, ctx, list| {
            plugin.list_featured(ctx, list)
        })
    }

    pub fn list_langpacks(
        &self,
        locale: &str,
        cancellable: &Cancellable,
    ) -> HostResult<Aggregate<AppList>> {
        self.dispatch_list(Capability::ListLangpacks, cancellable, |plugin, ctx, list| {
            plugin.list_langpacks(ctx, locale, list)
        })
    }

    /// Category tree merged from every plugin, roots merged by id.
    pub fn list_categories(
        &self,
        cancellable: &Cancellable,
    ) -> HostResult<Aggregate<Vec<Category>>> {
        let categories = CategoryList::new();
        let (relevant, failures) =
            self.fan_out(Capability::ListCategories, cancellable, |plugin, ctx| {
                plugin.list_categories(ctx, &categories)
            })?;
        Ok(Aggregate::new(categories.into_vec(), relevant, failures))
    }

    /// Apps in `category`. The first successful listing is stored on the
    /// category and returned by later calls without dispatching again.
    pub fn list_category_apps(
        &self,
        category: &Category,
        cancellable: &Cancellable,
    ) -> HostResult<Aggregate<Arc<AppList>>> {
        if let Some(apps) = category.apps() {
            return Ok(Aggregate::new(apps, 0, Vec::new()));
        }
        let aggregate = self.dispatch_list(
            Capability::ListCategoryApps,
            cancellable,
            |plugin, ctx, list| plugin.list_category_apps(ctx, category, list),
        )?;
        Ok(aggregate.map(|list| category.populate(list)))
    }

    pub fn file_to_app(&self, file: &Path, cancellable: &Cancellable) -> HostResult<Arc<App>> {
        self.dispatch_exclusive(Capability::FileToApp, cancellable, |plugin, ctx, list| {
            plugin.file_to_app(ctx, file, list)
        })
    }

    pub fn url_to_app(&self, url: &str, cancellable: &Cancellable) -> HostResult<Arc<App>> {
        self.dispatch_exclusive(Capability::UrlToApp, cancellable, |plugin, ctx, list| {
            plugin.url_to_app(ctx, url, list)
        })
    }

    pub fn install(&self, app: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(Capability::Install, app, cancellable, |plugin, ctx, app| {
            plugin.install(ctx, app)
        })
    }

    pub fn remove(&self, app: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(Capability::Remove, app, cancellable, |plugin, ctx, app| {
            plugin.remove(ctx, app)
        })
    }

    pub fn update_live(&self, app: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(Capability::UpdateLive, app, cancellable, |plugin, ctx, app| {
            plugin.update_live(ctx, app)
        })
    }

    pub fn launch(&self, app: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(Capability::Launch, app, cancellable, |plugin, ctx, app| {
            plugin.launch(ctx, app)
        })
    }

    pub fn cancel_update(&self, app: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(Capability::CancelUpdate, app, cancellable, |plugin, ctx, app| {
            plugin.cancel_update(ctx, app)
        })
    }

    pub fn download_upgrade(&self, app: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(
            Capability::DownloadUpgrade,
            app,
            cancellable,
            |plugin, ctx, app| plugin.download_upgrade(ctx, app),
        )
    }

    pub fn trigger_upgrade(&self, app: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(
            Capability::TriggerUpgrade,
            app,
            cancellable,
            |plugin, ctx, app| plugin.trigger_upgrade(ctx, app),
        )
    }

    pub fn install_repo(&self, repo: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(Capability::InstallRepo, repo, cancellable, |plugin, ctx, repo| {
            plugin.install_repo(ctx, repo)
        })
    }

    pub fn remove_repo(&self, repo: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(Capability::RemoveRepo, repo, cancellable, |plugin, ctx, repo| {
            plugin.remove_repo(ctx, repo)
        })
    }

    pub fn enable_repo(&self, repo: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(Capability::EnableRepo, repo, cancellable, |plugin, ctx, repo| {
            plugin.enable_repo(ctx, repo)
        })
    }

    pub fn disable_repo(&self, repo: &Arc<App>, cancellable: &Cancellable) -> HostResult<()> {
        self.dispatch_action(Capability::DisableRepo, repo, cancellable, |plugin, ctx, repo| {
            plugin.disable_repo(ctx, repo)
        })
    }

    /// Download `apps`, grouped by managing plugin.
    pub fn download(&self, apps: &AppList, cancellable: &Cancellable) -> HostResult<Aggregate<()>> {
        self.dispatch_batch(Capability::Download, apps, cancellable, |plugin, ctx, group| {
            plugin.download(ctx, group)
        })
    }

    /// Update `apps`, grouped by managing plugin.
    pub fn update(&self, apps: &AppList, cancellable: &Cancellable) -> HostResult<Aggregate<()>> {
        self.dispatch_batch(Capability::UpdateBatch, apps, cancellable, |plugin, ctx, group| {
            plugin.update_batch(ctx, group)
        })
    }

    /// Plugins able to run `op`, lowest priority value first.
    fn select(runtimes: &Runtimes, op: Capability) -> Vec<(PluginKey, &PluginRuntime)> {
        let mut selected: Vec<_> = runtimes.iter().filter(|(_, rt)| rt.supports(op)).collect();
        selected.sort_by(|(_, a), (_, b)| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        selected
    }

    fn guarded<T>(&self, cancellable: &Cancellable, run: impl FnOnce() -> T) -> (T, bool) {
        let watchdog = self
            .config
            .dispatch_timeout()
            .map(|timeout| Watchdog::start(cancellable, timeout));
        let value = run();
        let fired = watchdog.as_ref().is_some_and(Watchdog::finish);
        (value, fired)
    }

    /// Run one call per job, each on its own scoped thread, and collect the
    /// results in job order. A panicking plugin counts as a failure.
    fn run_jobs<J, F>(
        &self,
        cancellable: &Cancellable,
        jobs: &[(&PluginRuntime, J)],
        call: F,
    ) -> Vec<(String, PluginResult<()>)>
    where
        J: Sync,
        F: Fn(&dyn Plugin, &PluginContext<'_>, &J) -> PluginResult<()> + Sync,
    {
        let cache_dir = self.config.cache_dir();

        thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|(runtime, job)| {
                    let call = &call;
                    let cache_dir = cache_dir.as_path();
                    let handle = scope.spawn(move || {
                        let ctx = runtime.context(&self.cache, cancellable, cache_dir);
                        call(runtime.plugin(), &ctx, job)
                    });
                    (runtime.name().to_string(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        tracing::error!(plugin = %name, "plugin panicked");
                        Err(PluginError::failed("plugin panicked"))
                    });
                    (name, result)
                })
                .collect()
        })
    }

    /// Turn per-plugin results into a relevant count plus failures, recording
    /// an event for each failure.
    fn collect(
        &self,
        op: Capability,
        results: Vec<(String, PluginResult<()>)>,
        cancellable: &Cancellable,
        timed_out: bool,
    ) -> HostResult<(usize, Vec<PluginFailure>)> {
        if timed_out {
            self.events.push(EventDraft::new(Severity::Warning, "timed out").operation(op));
            return Err(HostError::TimedOut(op));
        }
        let plugin_cancelled = results
            .iter()
            .any(|(_, result)| matches!(result, Err(err) if err.is_cancelled()));
        if cancellable.is_cancelled() || plugin_cancelled {
            return Err(HostError::Cancelled);
        }

        let mut relevant = 0;
        let mut failures = Vec::new();
        for (plugin, result) in results {
            match result {
                Ok(()) => relevant += 1,
                Err(PluginError::NotSupported) => {}
                Err(error) => {
                    relevant += 1;
                    self.events.push(EventDraft::failure(&plugin, op, error.clone()));
                    failures.push(PluginFailure { plugin, error });
                }
            }
        }
        Ok((relevant, failures))
    }

    fn fan_out<F>(
        &self,
        op: Capability,
        cancellable: &Cancellable,
        call: F,
    ) -> HostResult<(usize, Vec<PluginFailure>)>
    where
        F: Fn(&dyn Plugin, &PluginContext<'_>) -> PluginResult<()> + Sync,
    {
        cancellable.check().map_err(|_| HostError::Cancelled)?;

        let runtimes = self.runtimes();
        let jobs: Vec<(&PluginRuntime, ())> = Self::select(&runtimes, op)
            .into_iter()
            .map(|(_, rt)| (rt, ()))
            .collect();
        tracing::debug!(operation = %op, plugins = jobs.len(), "dispatching");

        let (results, timed_out) = self.guarded(cancellable, || {
            self.run_jobs(cancellable, &jobs, |plugin, ctx, _: &()| call(plugin, ctx))
        });
        self.collect(op, results, cancellable, timed_out)
    }

    fn dispatch_list<F>(
        &self,
        op: Capability,
        cancellable: &Cancellable,
        call: F,
    ) -> HostResult<Aggregate<AppList>>
    where
        F: Fn(&dyn Plugin, &PluginContext<'_>, &AppList) -> PluginResult<()> + Sync,
    {
        cancellable.check().map_err(|_| HostError::Cancelled)?;

        // Each plugin appends into its own list; the lists are merged in
        // priority order once every plugin has returned.
        let list = AppList::new();
        let (relevant, failures) = {
            let runtimes = self.runtimes();
            let jobs: Vec<(&PluginRuntime, AppList)> = Self::select(&runtimes, op)
                .into_iter()
                .map(|(_, rt)| (rt, AppList::new()))
                .collect();
            tracing::debug!(operation = %op, plugins = jobs.len(), "dispatching");

            let (results, timed_out) =
                self.guarded(cancellable, || self.run_jobs(cancellable, &jobs, &call));
            let counted = self.collect(op, results, cancellable, timed_out)?;
            for (_, produced) in &jobs {
                list.add_list(produced);
            }
            counted
        };
        self.finish_list(&list, cancellable);
        Ok(Aggregate::new(list, relevant, failures))
    }

    /// Canonicalize through the cache, dedup, then offer unclaimed records
    /// for adoption.
    fn finish_list(&self, list: &AppList, cancellable: &Cancellable) {
        for (index, app) in list.snapshot().into_iter().enumerate() {
            let canonical = self.cache.intern(Arc::clone(&app));
            if !Arc::ptr_eq(&canonical, &app) {
                list.replace(index, canonical);
            }
        }
        list.dedup(DedupOptions::default());

        let runtimes = self.runtimes();
        self.adopt(&runtimes, &list.snapshot(), cancellable);
    }

    /// Offer each unclaimed record to adopting plugins in priority order
    /// until one claims it.
    fn adopt(&self, runtimes: &Runtimes, apps: &[Arc<App>], cancellable: &Cancellable) {
        let adopters = Self::select(runtimes, Capability::AdoptApp);
        if adopters.is_empty() {
            return;
        }
        let cache_dir = self.config.cache_dir();

        for app in apps.iter().filter(|app| !app.is_claimed()) {
            for (_, runtime) in &adopters {
                let ctx = runtime.context(&self.cache, cancellable, &cache_dir);
                runtime.plugin().adopt_app(&ctx, app);
                if let Some(owner) = app.management_plugin() {
                    tracing::debug!(app = %app.id(), plugin = %owner, "adopted");
                    break;
                }
            }
        }
    }

    fn managing_plugin<'r>(
        &self,
        runtimes: &'r Runtimes,
        op: Capability,
        app: &Arc<App>,
        cancellable: &Cancellable,
    ) -> HostResult<(PluginKey, &'r PluginRuntime)> {
        if !app.is_claimed() {
            self.adopt(runtimes, std::slice::from_ref(app), cancellable);
        }

        match app.management_plugin() {
            Some(owner) => {
                let (key, runtime) = runtimes
                    .iter()
                    .find(|(_, rt)| rt.name() == owner)
                    .ok_or_else(|| HostError::NotManaged(app.id().clone()))?;
                if !runtime.supports(op) {
                    return Err(HostError::plugin(owner, PluginError::NotSupported));
                }
                Ok((key, runtime))
            }
            None => match Self::select(runtimes, op).as_slice() {
                [only] => Ok(*only),
                _ => Err(HostError::NotManaged(app.id().clone())),
            },
        }
    }

    fn dispatch_action<F>(
        &self,
        op: Capability,
        app: &Arc<App>,
        cancellable: &Cancellable,
        call: F,
    ) -> HostResult<()>
    where
        F: FnOnce(&dyn Plugin, &PluginContext<'_>, &Arc<App>) -> PluginResult<()>,
    {
        cancellable.check().map_err(|_| HostError::Cancelled)?;
        // Same order as batches: runtimes first, then the identity.
        let runtimes = self.runtimes();
        let _serialized = self.action_locks.lock(app.id());
        cancellable.check().map_err(|_| HostError::Cancelled)?;

        let (_, runtime) = self.managing_plugin(&runtimes, op, app, cancellable)?;
        check_pre_state(op, app)?;

        let before = app.state();
        let cache_dir = self.config.cache_dir();
        let ctx = runtime.context(&self.cache, cancellable, &cache_dir);
        tracing::info!(plugin = %runtime.name(), app = %app.id(), "{op}");

        let (result, timed_out) = self.guarded(cancellable, || call(runtime.plugin(), &ctx, app));

        match result {
            Ok(()) => {
                self.verify_post_state(op, runtime.name(), app);
                Ok(())
            }
            Err(err) => {
                app.reset_state(before);
                if timed_out {
                    self.events.push(
                        EventDraft::new(Severity::Warning, "timed out")
                            .plugin(runtime.name())
                            .operation(op)
                            .app(app),
                    );
                    return Err(HostError::TimedOut(op));
                }
                if !err.is_not_supported() && !err.is_cancelled() {
                    self.events
                        .push(EventDraft::failure(runtime.name(), op, err.clone()).app(app));
                }
                Err(HostError::plugin(runtime.name(), err))
            }
        }
    }

    fn verify_post_state(&self, op: Capability, plugin: &str, app: &Arc<App>) {
        let expected = expected_post_states(op);
        let state = app.state();
        if expected.is_empty() || expected.contains(&state) {
            return;
        }
        self.events.push(
            EventDraft::new(Severity::Warning, format!("left the record {state} after {op}"))
                .plugin(plugin)
                .operation(op)
                .app(app),
        );
    }

    fn dispatch_batch<F>(
        &self,
        op: Capability,
        apps: &AppList,
        cancellable: &Cancellable,
        call: F,
    ) -> HostResult<Aggregate<()>>
    where
        F: Fn(&dyn Plugin, &PluginContext<'_>, &AppList) -> PluginResult<()> + Sync,
    {
        cancellable.check().map_err(|_| HostError::Cancelled)?;

        let runtimes = self.runtimes();
        let mut slots: HashMap<PluginKey, usize> = HashMap::new();
        let mut jobs: Vec<(&PluginRuntime, AppList)> = Vec::new();

        for app in apps.snapshot() {
            match self.managing_plugin(&runtimes, op, &app, cancellable) {
                Ok((key, runtime)) => {
                    let slot = *slots.entry(key).or_insert_with(|| {
                        jobs.push((runtime, AppList::new()));
                        jobs.len() - 1
                    });
                    jobs[slot].1.add(app);
                }
                Err(err) => {
                    self.events.push(
                        EventDraft::new(Severity::Warning, err.to_string())
                            .operation(op)
                            .app(&app),
                    );
                }
            }
        }

        let ids: Vec<AppId> = jobs
            .iter()
            .flat_map(|(_, group)| group.snapshot())
            .map(|app| app.id().clone())
            .collect();
        let _serialized = self.action_locks.lock_all(&ids);
        cancellable.check().map_err(|_| HostError::Cancelled)?;

        let (results, timed_out) =
            self.guarded(cancellable, || self.run_jobs(cancellable, &jobs, &call));
        let (relevant, failures) = self.collect(op, results, cancellable, timed_out)?;
        Ok(Aggregate::new((), relevant, failures))
    }

    fn dispatch_exclusive<F>(
        &self,
        op: Capability,
        cancellable: &Cancellable,
        call: F,
    ) -> HostResult<Arc<App>>
    where
        F: Fn(&dyn Plugin, &PluginContext<'_>, &AppList) -> PluginResult<()> + Sync,
    {
        cancellable.check().map_err(|_| HostError::Cancelled)?;

        let (produced, failures) = {
            let runtimes = self.runtimes();
            let jobs: Vec<(&PluginRuntime, AppList)> = Self::select(&runtimes, op)
                .into_iter()
                .map(|(_, rt)| (rt, AppList::new()))
                .collect();

            let (results, timed_out) =
                self.guarded(cancellable, || self.run_jobs(cancellable, &jobs, &call));
            let (_, failures) = self.collect(op, results, cancellable, timed_out)?;

            let produced: Vec<(String, Vec<Arc<App>>)> = jobs
                .iter()
                .filter(|(_, list)| !list.is_empty())
                .map(|(rt, list)| (rt.name().to_string(), list.snapshot()))
                .collect();
            (produced, failures)
        };

        match produced.as_slice() {
            [] => match failures.into_iter().next() {
                Some(failure) => Err(HostError::plugin(failure.plugin, failure.error)),
                None => Err(HostError::Unclaimed { operation: op }),
            },
            [(plugin, apps)] => {
                if apps.len() > 1 {
                    tracing::debug!(
                        plugin = %plugin,
                        count = apps.len(),
                        "{op} produced several apps, using the first"
                    );
                }
                let app = self.cache.intern(Arc::clone(&apps[0]));
                let runtimes = self.runtimes();
                self.adopt(&runtimes, std::slice::from_ref(&app), cancellable);
                Ok(app)
            }
            _ => {
                let plugins: Vec<String> = produced.iter().map(|(name, _)| name.clone()).collect();
                self.events.push(
                    EventDraft::new(
                        Severity::Warning,
                        format!("claimed by {}", plugins.join(", ")),
                    )
                    .operation(op),
                );
                Err(HostError::ConflictingClaim {
                    operation: op,
                    plugins,
                })
            }
        }
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Lowercased whitespace-separated search terms.
pub fn tokenize(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

fn check_pre_state(op: Capability, app: &Arc<App>) -> HostResult<()> {
    let state = app.state();
    let allowed = match op {
        Capability::Install => !state.is_installed()
            && !matches!(
                state,
                AppState::Installing | AppState::Removing | AppState::Unavailable
            ),
        Capability::Remove | Capability::UpdateLive => state.is_installed(),
        _ => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(HostError::InvalidState {
            id: app.id().clone(),
            state,
        })
    }
}

fn expected_post_states(op: Capability) -> &'static [AppState] {
    match op {
        Capability::Install => &[AppState::Installed],
        Capability::Remove => &[AppState::Available, AppState::AvailableLocal, AppState::Unknown],
        Capability::UpdateLive => &[AppState::Installed, AppState::Unknown],
        Capability::InstallRepo => &[AppState::Installed, AppState::Available],
        Capability::EnableRepo => &[AppState::Installed],
        Capability::RemoveRepo | Capability::DisableRepo => {
            &[AppState::Available, AppState::Unknown]
        }
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::app_id::AppId;

    struct Lister {
        ids: Vec<&'static str>,
        adopts: Option<&'static str>,
        adoptions: Arc<AtomicUsize>,
    }

    impl Plugin for Lister {
        fn capabilities(&self) -> CapabilitySet {
            let set = CapabilitySet::of(&[Capability::ListPopular, Capability::Install]);
            if self.adopts.is_some() {
                set.with(Capability::AdoptApp)
            } else {
                set
            }
        }

        fn adopt_app(&self, ctx: &PluginContext<'_>, app: &Arc<App>) {
            if let Some(kind) = self.adopts {
                if app.id().bundle_kind() == kind {
                    self.adoptions.fetch_add(1, Ordering::SeqCst);
                    app.claim(ctx.plugin_name());
                }
            }
        }

        fn list_popular(&self, ctx: &PluginContext<'_>, list: &AppList) -> PluginResult<()> {
            for id in &self.ids {
                let id = AppId::parse(id).map_err(|e| PluginError::failed(e.to_string()))?;
                list.add(ctx.app_create(&id, Quirks::NONE));
            }
            Ok(())
        }

        fn install(&self, _ctx: &PluginContext<'_>, app: &Arc<App>) -> PluginResult<()> {
            app.set_state(AppState::Installing);
            app.set_state(AppState::Installed);
            Ok(())
        }
    }

    fn manager(adoptions: &Arc<AtomicUsize>) -> PluginManager {
        fn first(_: &PluginManifest) -> Box<dyn Plugin> {
            Box::new(Lister {
                ids: vec!["bundle/local/org.a.A/stable", "bundle/local/org.b.B/stable"],
                adopts: None,
                adoptions: Arc::new(AtomicUsize::new(0)),
            })
        }
        let registry = PluginRegistry::new().with("first", first);

        let mut config = HostConfig::isolated(std::env::temp_dir().join("swcenter-manager-test"));
        config.plugins.entries = vec![
            PluginManifest::new("first", "first"),
            PluginManifest::new("ghost", "missing"),
        ];
        let manager = PluginManager::new(config, registry);

        let adoptions = Arc::clone(adoptions);
        let owner = PluginRuntime::new(
            PluginManifest::new("owner", "owner").with_priority(5),
            Box::new(Lister {
                ids: vec!["bundle/local/org.a.A/stable"],
                adopts: Some("bundle"),
                adoptions,
            }),
        );
        manager.runtimes_mut().insert(owner);
        manager
    }

    #[test]
    fn unknown_kind_is_reported() {
        let adoptions = Arc::new(AtomicUsize::new(0));
        let manager = manager(&adoptions);
        assert_eq!(manager.plugin_count(), 2);
        assert_eq!(manager.event_log().count(Severity::Warning), 1);
    }

    #[test]
    fn lists_merge_and_adopt_once() {
        let adoptions = Arc::new(AtomicUsize::new(0));
        let manager = manager(&adoptions);
        manager.setup(&Cancellable::new()).expect("setup");

        let token = Cancellable::new();
        let popular = manager.list_popular(&token).expect("popular").into_value();
        assert_eq!(popular.len(), 2);
        assert_eq!(adoptions.load(Ordering::SeqCst), 2);

        let again = manager.list_popular(&token).expect("popular").into_value();
        assert_eq!(again.len(), 2);
        assert_eq!(adoptions.load(Ordering::SeqCst), 2);
        for app in again.snapshot() {
            assert_eq!(app.management_plugin().as_deref(), Some("owner"));
        }
    }

    #[test]
    fn install_goes_to_the_owner() {
        let adoptions = Arc::new(AtomicUsize::new(0));
        let manager = manager(&adoptions);
        manager.setup(&Cancellable::new()).expect("setup");

        let app = manager.app_create("bundle/local/org.c.C/stable").expect("app");
        manager.install(&app, &Cancellable::new()).expect("install");
        assert_eq!(app.state(), AppState::Installed);
        assert_eq!(app.management_plugin().as_deref(), Some("owner"));

        let err = manager.install(&app, &Cancellable::new()).expect_err("already installed");
        assert!(matches!(err, HostError::InvalidState { .. }));
    }

    #[test]
    fn tokenize_lowercases_terms() {
        assert_eq!(tokenize("  Text  EDITOR "), vec!["text", "editor"]);
        assert!(tokenize("   ").is_empty());
    }
}
