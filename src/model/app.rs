use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Deserialize;

use crate::model::app_id::{AppId, WILDCARD};

/// Lifecycle state of an app record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppState {
    #[default]
    Unknown,
    Available,
    AvailableLocal,
    QueuedForInstall,
    Installing,
    Installed,
    Updatable,
    UpdatableLive,
    Removing,
    Unavailable,
}

impl AppState {
    pub fn label(&self) -> &'static str {
        match self {
            AppState::Unknown => "unknown",
            AppState::Available => "available",
            AppState::AvailableLocal => "available-local",
            AppState::QueuedForInstall => "queued-for-install",
            AppState::Installing => "installing",
            AppState::Installed => "installed",
            AppState::Updatable => "updatable",
            AppState::UpdatableLive => "updatable-live",
            AppState::Removing => "removing",
            AppState::Unavailable => "unavailable",
        }
    }

    /// States that remember where to go back to if the action fails.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            AppState::QueuedForInstall | AppState::Installing | AppState::Removing
        )
    }

    pub fn is_installed(&self) -> bool {
        matches!(
            self,
            AppState::Installed | AppState::Updatable | AppState::UpdatableLive
        )
    }

    pub fn can_transition_to(&self, next: AppState) -> bool {
        use AppState::*;

        if *self == next || *self == Unknown || next == Unknown {
            return true;
        }

        match self {
            Available => matches!(next, QueuedForInstall | Installing | Installed | Unavailable),
            AvailableLocal => matches!(next, QueuedForInstall | Installing | Installed),
            QueuedForInstall => matches!(next, Installing | Available | AvailableLocal),
            Installing => matches!(next, Installed | Available | AvailableLocal | Updatable),
            Installed => matches!(
                next,
                Removing | Updatable | UpdatableLive | Installing | Available
            ),
            Updatable | UpdatableLive => matches!(
                next,
                Installing | Removing | Installed | Updatable | UpdatableLive
            ),
            Removing => matches!(next, Available | AvailableLocal | Installed | Unavailable),
            Unavailable => matches!(next, Available | Installed),
            Unknown => true,
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    #[default]
    Generic,
    Desktop,
    Runtime,
    Addon,
    Repository,
    OsUpgrade,
    Localization,
}

/// Independent boolean flags modifying matching and display semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Quirks(u32);

impl Quirks {
    pub const NONE: Quirks = Quirks(0);
    /// Matches any identity with the same component id; never merged with
    /// concretely created records.
    pub const MATCH_ANY_PREFIX: Quirks = Quirks(1 << 0);
    pub const IS_PROXY: Quirks = Quirks(1 << 1);
    pub const PROVENANCE: Quirks = Quirks(1 << 2);
    pub const COMPULSORY: Quirks = Quirks(1 << 3);
    pub const NEEDS_REBOOT: Quirks = Quirks(1 << 4);
    pub const LOCAL_HAS_REPOSITORY: Quirks = Quirks(1 << 5);
    pub const IS_INSTALLED_BY_USER: Quirks = Quirks(1 << 6);

    pub fn contains(self, other: Quirks) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Quirks) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Quirks) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Quirks {
    type Output = Quirks;

    fn bitor(self, rhs: Quirks) -> Quirks {
        Quirks(self.0 | rhs.0)
    }
}

impl BitOrAssign for Quirks {
    fn bitor_assign(&mut self, rhs: Quirks) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Progress {
    #[default]
    Unknown,
    Percent(u8),
}

impl Progress {
    /// Anything above 100 means "indeterminate".
    pub fn from_percent(value: u32) -> Self {
        match u8::try_from(value) {
            Ok(pct) if pct <= 100 => Progress::Percent(pct),
            _ => Progress::Unknown,
        }
    }
}

/// Notification delivered to subscribers of an app record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppChange {
    State(AppState),
    Progress(Progress),
    Quirks(Quirks),
    Claimed(Option<String>),
}

#[derive(Debug, Default)]
struct AppData {
    kind: AppKind,
    state: AppState,
    state_recover: Option<AppState>,
    progress: Progress,
    quirks: Quirks,
    management_plugin: Option<String>,
    name: Option<String>,
    summary: Option<String>,
    version: Option<String>,
    update_version: Option<String>,
    origin: Option<String>,
    branch: Option<String>,
    local_file: Option<PathBuf>,
    launchable: Option<String>,
    provides: Vec<String>,
    categories: Vec<String>,
    keywords: Vec<String>,
    languages: Vec<String>,
    release_timestamp: Option<u64>,
    size_bytes: Option<u64>,
}

/// Canonical mutable record for one installable item.
///
/// Records are shared as `Arc<App>`; "the same app" means `Arc::ptr_eq`.
/// The identity is fixed at construction and has no setter.
#[derive(Debug)]
pub struct App {
    id: AppId,
    data: RwLock<AppData>,
    watchers: Mutex<Vec<Sender<AppChange>>>,
}

impl App {
    pub fn new(id: AppId) -> Self {
        let branch = (id.branch() != WILDCARD).then(|| id.branch().to_string());
        let origin = (id.origin() != WILDCARD).then(|| id.origin().to_string());
        Self {
            id,
            data: RwLock::new(AppData {
                branch,
                origin,
                ..AppData::default()
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_quirks(id: AppId, quirks: Quirks) -> Self {
        let app = Self::new(id);
        app.write().quirks = quirks;
        app
    }

    pub fn shared(id: AppId) -> Arc<Self> {
        Arc::new(Self::new(id))
    }

    pub fn id(&self) -> &AppId {
        &self.id
    }

    fn read(&self) -> RwLockReadGuard<'_, AppData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, change: AppChange) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Receive state, progress, quirk and claim changes. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<AppChange> {
        let (tx, rx) = mpsc::channel();
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn kind(&self) -> AppKind {
        self.read().kind
    }

    pub fn set_kind(&self, kind: AppKind) {
        self.write().kind = kind;
    }

    pub fn state(&self) -> AppState {
        self.read().state
    }

    /// Validated transition. Returns `false` (and leaves the state alone) if
    /// the move is not allowed from the current state.
    pub fn set_state(&self, next: AppState) -> bool {
        {
            let mut data = self.write();
            let current = data.state;
            if current == next {
                return true;
            }
            if !current.can_transition_to(next) {
                tracing::warn!(
                    app = %self.id,
                    "refusing state change {current} -> {next}"
                );
                return false;
            }
            if next.is_transitional() && !current.is_transitional() {
                data.state_recover = Some(current);
            } else if !next.is_transitional() {
                data.state_recover = None;
            }
            data.state = next;
            if next != AppState::Installing && next != AppState::Removing {
                data.progress = Progress::Unknown;
            }
        }
        self.notify(AppChange::State(next));
        true
    }

    /// Go back to the state before the last transitional state, if any.
    pub fn restore_state(&self) {
        let restored = {
            let mut data = self.write();
            let Some(previous) = data.state_recover.take() else {
                return;
            };
            data.state = previous;
            data.progress = Progress::Unknown;
            previous
        };
        self.notify(AppChange::State(restored));
    }

    /// Unvalidated rollback used by the host after a failed action.
    pub(crate) fn reset_state(&self, state: AppState) {
        {
            let mut data = self.write();
            if data.state == state {
                return;
            }
            data.state = state;
            data.state_recover = None;
            data.progress = Progress::Unknown;
        }
        self.notify(AppChange::State(state));
    }

    pub fn progress(&self) -> Progress {
        self.read().progress
    }

    pub fn set_progress(&self, percent: u32) {
        let progress = Progress::from_percent(percent);
        {
            let mut data = self.write();
            if data.progress == progress {
                return;
            }
            data.progress = progress;
        }
        self.notify(AppChange::Progress(progress));
    }

    pub fn quirks(&self) -> Quirks {
        self.read().quirks
    }

    pub fn has_quirk(&self, quirk: Quirks) -> bool {
        self.read().quirks.contains(quirk)
    }

    pub fn add_quirk(&self, quirk: Quirks) {
        let quirks = {
            let mut data = self.write();
            data.quirks.insert(quirk);
            data.quirks
        };
        self.notify(AppChange::Quirks(quirks));
    }

    pub fn remove_quirk(&self, quirk: Quirks) {
        let quirks = {
            let mut data = self.write();
            data.quirks.remove(quirk);
            data.quirks
        };
        self.notify(AppChange::Quirks(quirks));
    }

    pub fn is_wildcard(&self) -> bool {
        self.has_quirk(Quirks::MATCH_ANY_PREFIX)
    }

    pub fn management_plugin(&self) -> Option<String> {
        self.read().management_plugin.clone()
    }

    pub fn is_claimed(&self) -> bool {
        self.read().management_plugin.is_some()
    }

    /// Claim management of this record. Succeeds if unclaimed or already
    /// claimed by `plugin`; refuses to steal a claim.
    pub fn claim(&self, plugin: &str) -> bool {
        {
            let mut data = self.write();
            match data.management_plugin.as_deref() {
                Some(owner) => return owner == plugin,
                None => data.management_plugin = Some(plugin.to_string()),
            }
        }
        self.notify(AppChange::Claimed(Some(plugin.to_string())));
        true
    }

    pub fn release_claim(&self) {
        if self.write().management_plugin.take().is_some() {
            self.notify(AppChange::Claimed(None));
        }
    }

    pub fn local_file(&self) -> Option<PathBuf> {
        self.read().local_file.clone()
    }

    pub fn set_local_file(&self, path: impl AsRef<Path>) {
        self.write().local_file = Some(path.as_ref().to_path_buf());
    }

    pub fn name(&self) -> Option<String> {
        self.read().name.clone()
    }

    /// Name if known, otherwise the component id.
    pub fn display_name(&self) -> String {
        self.name()
            .unwrap_or_else(|| self.id.component_id().to_string())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.write().name = Some(name.into());
    }

    pub fn summary(&self) -> Option<String> {
        self.read().summary.clone()
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        self.write().summary = Some(summary.into());
    }

    pub fn version(&self) -> Option<String> {
        self.read().version.clone()
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.write().version = Some(version.into());
    }

    pub fn update_version(&self) -> Option<String> {
        self.read().update_version.clone()
    }

    pub fn set_update_version(&self, version: Option<String>) {
        self.write().update_version = version;
    }

    pub fn origin(&self) -> Option<String> {
        self.read().origin.clone()
    }

    pub fn set_origin(&self, origin: impl Into<String>) {
        self.write().origin = Some(origin.into());
    }

    pub fn branch(&self) -> Option<String> {
        self.read().branch.clone()
    }

    pub fn set_branch(&self, branch: impl Into<String>) {
        self.write().branch = Some(branch.into());
    }

    pub fn launchable(&self) -> Option<String> {
        self.read().launchable.clone()
    }

    pub fn set_launchable(&self, exec: impl Into<String>) {
        self.write().launchable = Some(exec.into());
    }

    pub fn provides(&self) -> Vec<String> {
        self.read().provides.clone()
    }

    pub fn set_provides(&self, provides: Vec<String>) {
        self.write().provides = provides;
    }

    pub fn categories(&self) -> Vec<String> {
        self.read().categories.clone()
    }

    pub fn set_categories(&self, categories: Vec<String>) {
        self.write().categories = categories;
    }

    pub fn has_category(&self, group: &str) -> bool {
        self.read().categories.iter().any(|c| c == group)
    }

    pub fn keywords(&self) -> Vec<String> {
        self.read().keywords.clone()
    }

    pub fn set_keywords(&self, keywords: Vec<String>) {
        self.write().keywords = keywords;
    }

    pub fn languages(&self) -> Vec<String> {
        self.read().languages.clone()
    }

    pub fn set_languages(&self, languages: Vec<String>) {
        self.write().languages = languages;
    }

    pub fn release_timestamp(&self) -> Option<u64> {
        self.read().release_timestamp
    }

    pub fn set_release_timestamp(&self, timestamp: u64) {
        self.write().release_timestamp = Some(timestamp);
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.read().size_bytes
    }

    pub fn set_size_bytes(&self, size: u64) {
        self.write().size_bytes = Some(size);
    }
}
