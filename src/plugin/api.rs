//! The contract between the host and a plugin.
//!
//! Every operation is optional. A plugin advertises what it implements through
//! [`Plugin::capabilities`]; the host never calls an operation outside that
//! set, and the default bodies answer `NotSupported`, which the host treats as
//! "not relevant" rather than an error.
//!
//! List operations append to a shared [`AppList`] and may run concurrently with
//! other plugins appending to the same list. Per-app actions must keep the
//! record's progress current for anything slower than a few tens of
//! milliseconds, check the cancellation token between steps, and leave the
//! documented post-state on success.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::Cancellable;
use crate::error::{PluginError, PluginResult};
use crate::model::app::{App, Quirks};
use crate::model::app_id::AppId;
use crate::model::app_list::AppList;
use crate::model::cache::AppCache;
use crate::model::category::{Category, CategoryList};
use crate::plugin::capability::CapabilitySet;

/// Per-call view of the host handed to a plugin.
#[derive(Debug, Clone, Copy)]
pub struct PluginContext<'a> {
    name: &'a str,
    cache: &'a AppCache,
    cancellable: &'a Cancellable,
    cache_dir: &'a Path,
}

impl<'a> PluginContext<'a> {
    pub fn new(
        name: &'a str,
        cache: &'a AppCache,
        cancellable: &'a Cancellable,
        cache_dir: &'a Path,
    ) -> Self {
        Self {
            name,
            cache,
            cancellable,
            cache_dir,
        }
    }

    pub fn plugin_name(&self) -> &str {
        self.name
    }

    pub fn cancellable(&self) -> &Cancellable {
        self.cancellable
    }

    pub fn check_cancelled(&self) -> PluginResult<()> {
        self.cancellable.check()
    }

    /// Cancellable sleep used between simulated work steps.
    pub fn pause(&self, duration: Duration) -> PluginResult<()> {
        self.cancellable.sleep(duration)
    }

    /// Create or fetch a record through the host cache.
    pub fn app_create(&self, id: &AppId, quirks: Quirks) -> Arc<App> {
        self.cache.create(id, quirks)
    }

    pub fn cached_apps(&self, pattern: &AppId) -> Vec<Arc<App>> {
        self.cache.lookup(pattern)
    }

    /// Private directory for this plugin under the host cache root.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.join(self.name)
    }
}

pub trait Plugin: Send + Sync {
    /// Operations this plugin implements. Read once when the plugin loads.
    fn capabilities(&self) -> CapabilitySet;

    /// Failable initialization; an error disables the plugin.
    fn setup(&self, _ctx: &PluginContext<'_>) -> PluginResult<()> {
        Ok(())
    }

    fn shutdown(&self) {}

    /// Offered only for unclaimed records. Call [`App::claim`] to manage it.
    fn adopt_app(&self, _ctx: &PluginContext<'_>, _app: &Arc<App>) {}

    fn search(
        &self,
        _ctx: &PluginContext<'_>,
        _terms: &[String],
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn search_files(
        &self,
        _ctx: &PluginContext<'_>,
        _paths: &[PathBuf],
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn search_provides(
        &self,
        _ctx: &PluginContext<'_>,
        _tags: &[String],
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn find_alternates(
        &self,
        _ctx: &PluginContext<'_>,
        _app: &Arc<App>,
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn list_updates(&self, _ctx: &PluginContext<'_>, _list: &AppList) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn list_sources(&self, _ctx: &PluginContext<'_>, _list: &AppList) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn list_historical_updates(
        &self,
        _ctx: &PluginContext<'_>,
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn list_categories(
        &self,
        _ctx: &PluginContext<'_>,
        _categories: &CategoryList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn list_category_apps(
        &self,
        _ctx: &PluginContext<'_>,
        _category: &Category,
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// Apps with an upstream release newer than `age` ago.
    fn list_recent(
        &self,
        _ctx: &PluginContext<'_>,
        _age: Duration,
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn list_popular(&self, _ctx: &PluginContext<'_>, _list: &AppList) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn list_featured(&self, _ctx: &PluginContext<'_>, _list: &AppList) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// `locale` is a language code or locale, e.g. `ja` or `ja_JP`.
    fn list_langpacks(
        &self,
        _ctx: &PluginContext<'_>,
        _locale: &str,
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    fn launch(&self, _ctx: &PluginContext<'_>, _app: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// Cancel a scheduled offline update of `app`.
    fn cancel_update(&self, _ctx: &PluginContext<'_>, _app: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// On success `app` must be `Installed`.
    fn install(&self, _ctx: &PluginContext<'_>, _app: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// On success `app` must be `Available` or `Unknown`.
    fn remove(&self, _ctx: &PluginContext<'_>, _app: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// On success `app` must be `Installed` or `Unknown`.
    fn update_live(&self, _ctx: &PluginContext<'_>, _app: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// Fetch everything needed to install or update `apps` later. Already
    /// downloaded apps are not an error.
    fn download(&self, _ctx: &PluginContext<'_>, _apps: &AppList) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// Start downloading a distribution upgrade in the background.
    fn download_upgrade(&self, _ctx: &PluginContext<'_>, _app: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// Schedule the downloaded upgrade to install on next boot.
    fn trigger_upgrade(&self, _ctx: &PluginContext<'_>, _app: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// At most one plugin is expected to recognize a given file.
    fn file_to_app(
        &self,
        _ctx: &PluginContext<'_>,
        _file: &Path,
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// At most one plugin is expected to recognize a given URL scheme.
    fn url_to_app(
        &self,
        _ctx: &PluginContext<'_>,
        _url: &str,
        _list: &AppList,
    ) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// Update several apps, typically scheduling an offline update.
    fn update_batch(&self, _ctx: &PluginContext<'_>, _apps: &AppList) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// On success the repo must be `Installed` or `Available`.
    fn install_repo(&self, _ctx: &PluginContext<'_>, _repo: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// On success the repo must be `Available` or `Unknown`.
    fn remove_repo(&self, _ctx: &PluginContext<'_>, _repo: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// On success the repo must be `Installed`.
    fn enable_repo(&self, _ctx: &PluginContext<'_>, _repo: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }

    /// On success the repo must be `Available`.
    fn disable_repo(&self, _ctx: &PluginContext<'_>, _repo: &Arc<App>) -> PluginResult<()> {
        Err(PluginError::NotSupported)
    }
}
