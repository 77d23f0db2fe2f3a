use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::model::app::{App, Quirks};
use crate::model::app_id::AppId;

/// Process-wide identity → record cache owned by the plugin host.
///
/// One identity may map to two records at once: a wildcard-flagged one
/// (`MATCH_ANY_PREFIX`) and a concrete one. A concrete request never returns
/// the wildcard-flagged record.
#[derive(Debug, Default)]
pub struct AppCache {
    entries: Mutex<HashMap<AppId, Vec<Arc<App>>>>,
}

impl AppCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<AppId, Vec<Arc<App>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached record for `id` or create and cache one.
    ///
    /// With `MATCH_ANY_PREFIX` in `quirks` the wildcard-flagged record is
    /// wanted. Without it a non-flagged record is preferred; a flagged one is
    /// only handed out when `id` itself contains wildcard segments.
    pub fn create(&self, id: &AppId, quirks: Quirks) -> Arc<App> {
        let wants_wildcard = quirks.contains(Quirks::MATCH_ANY_PREFIX);
        let mut entries = self.entries();
        let slot = entries.entry(id.clone()).or_default();

        let concrete = slot.iter().find(|a| !a.is_wildcard());
        let flagged = slot.iter().find(|a| a.is_wildcard());

        let hit = if wants_wildcard {
            flagged
        } else {
            concrete.or(flagged.filter(|_| !id.is_concrete()))
        };

        if let Some(app) = hit {
            tracing::trace!(app = %id, "app cache hit");
            return Arc::clone(app);
        }

        let app = Arc::new(App::with_quirks(id.clone(), quirks));
        if !wants_wildcard && flagged.is_some() {
            tracing::debug!(
                app = %id,
                "cached record is wildcard-flagged, creating a concrete one alongside"
            );
        }
        slot.push(Arc::clone(&app));
        app
    }

    /// Canonicalize a record produced by a plugin. Returns the cached record
    /// of the same kind (flagged or not) if one exists, otherwise caches `app`.
    pub fn intern(&self, app: Arc<App>) -> Arc<App> {
        let mut entries = self.entries();
        let slot = entries.entry(app.id().clone()).or_default();
        let flagged = app.is_wildcard();

        if let Some(existing) = slot.iter().find(|a| a.is_wildcard() == flagged) {
            return Arc::clone(existing);
        }

        slot.push(Arc::clone(&app));
        app
    }

    /// Every cached record whose identity matches `pattern`.
    pub fn lookup(&self, pattern: &AppId) -> Vec<Arc<App>> {
        self.entries()
            .iter()
            .filter(|(id, _)| id.matches(pattern))
            .flat_map(|(_, apps)| apps.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached record. Holders keep their `Arc`s, but later lookups
    /// never return them.
    pub fn clear(&self) {
        let dropped = {
            let mut entries = self.entries();
            std::mem::take(&mut *entries)
        };
        tracing::debug!(identities = dropped.len(), "app cache cleared");
    }
}
