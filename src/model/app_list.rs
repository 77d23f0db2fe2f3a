use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::model::app::{App, Quirks};
use crate::model::app_id::AppId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupOptions {
    /// OR the quirks of dropped duplicates into the record that is kept.
    pub merge_quirks: bool,
}

/// Ordered collection of shared app records.
///
/// Appends never deduplicate and may come from several threads at once;
/// call [`AppList::dedup`] once every producer is done.
#[derive(Default)]
pub struct AppList {
    apps: Mutex<Vec<Arc<App>>>,
}

impl AppList {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, Vec<Arc<App>>> {
        self.apps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, app: Arc<App>) {
        self.items().push(app);
    }

    pub fn add_list(&self, other: &AppList) {
        let incoming = other.snapshot();
        self.items().extend(incoming);
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<App>> {
        self.items().get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<App>> {
        self.items().clone()
    }

    pub fn contains(&self, app: &Arc<App>) -> bool {
        self.items().iter().any(|a| Arc::ptr_eq(a, app))
    }

    /// First record whose identity text is exactly `id`.
    pub fn lookup(&self, id: &AppId) -> Option<Arc<App>> {
        self.items().iter().find(|a| a.id() == id).cloned()
    }

    /// Every record whose identity matches `pattern`, wildcards honored on
    /// both sides.
    pub fn lookup_matching(&self, pattern: &AppId) -> Vec<Arc<App>> {
        self.items()
            .iter()
            .filter(|a| a.id().matches(pattern))
            .cloned()
            .collect()
    }

    pub fn retain(&self, mut keep: impl FnMut(&Arc<App>) -> bool) {
        self.items().retain(|a| keep(a));
    }

    pub fn replace(&self, index: usize, app: Arc<App>) {
        if let Some(slot) = self.items().get_mut(index) {
            *slot = app;
        }
    }

    pub fn sort_by_name(&self) {
        self.items()
            .sort_by_cached_key(|a| a.display_name().to_lowercase());
    }

    pub fn clear(&self) {
        self.items().clear();
    }

    /// Collapse records sharing a concrete identity, keeping the first one
    /// inserted. Records carrying `MATCH_ANY_PREFIX` are never collapsed, and
    /// the same `Arc` appended twice is kept once.
    pub fn dedup(&self, options: DedupOptions) {
        let mut items = self.items();
        let mut first_by_id: HashMap<AppId, usize> = HashMap::new();
        let mut seen_ptrs: HashSet<*const App> = HashSet::new();
        let mut kept: Vec<Arc<App>> = Vec::with_capacity(items.len());

        for app in items.drain(..) {
            if !seen_ptrs.insert(Arc::as_ptr(&app)) {
                continue;
            }

            if app.is_wildcard() || !app.id().is_concrete() {
                kept.push(app);
                continue;
            }

            match first_by_id.get(app.id()) {
                Some(&index) => {
                    if options.merge_quirks {
                        let dropped = app.quirks();
                        if dropped != Quirks::NONE {
                            kept[index].add_quirk(dropped);
                        }
                    }
                    tracing::trace!(app = %app.id(), "dropping duplicate");
                }
                None => {
                    first_by_id.insert(app.id().clone(), kept.len());
                    kept.push(app);
                }
            }
        }

        debug_assert!(
            {
                let mut seen = HashSet::new();
                kept.iter()
                    .filter(|a| !a.is_wildcard() && a.id().is_concrete())
                    .all(|a| seen.insert(a.id().clone()))
            },
            "dedup left concrete duplicates behind"
        );

        *items = kept;
    }
}

impl fmt::Debug for AppList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.items().iter().map(|a| a.id().to_string()))
            .finish()
    }
}

impl From<Vec<Arc<App>>> for AppList {
    fn from(apps: Vec<Arc<App>>) -> Self {
        Self {
            apps: Mutex::new(apps),
        }
    }
}

impl FromIterator<Arc<App>> for AppList {
    fn from_iter<I: IntoIterator<Item = Arc<App>>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn app(raw: &str) -> Arc<App> {
        App::shared(AppId::parse(raw).expect("valid id"))
    }

    #[test]
    fn append_keeps_order_and_duplicates_until_dedup() {
        let list = AppList::new();
        let a = app("flatpak/flathub/org.a.A/stable");
        let b = app("flatpak/flathub/org.b.B/stable");
        let a2 = app("flatpak/flathub/org.a.A/stable");
        list.add(a.clone());
        list.add(b.clone());
        list.add(a2);
        assert_eq!(list.len(), 3);

        list.dedup(DedupOptions::default());

        let items = list.snapshot();
        assert_eq!(items.len(), 2);
        assert!(Arc::ptr_eq(&items[0], &a));
        assert!(Arc::ptr_eq(&items[1], &b));
    }

    #[test]
    fn same_arc_twice_collapses() {
        let list = AppList::new();
        let pattern = App::shared(AppId::parse("org.a.A").expect("id"));
        list.add(pattern.clone());
        list.add(pattern.clone());
        list.dedup(DedupOptions::default());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn wildcard_flagged_records_survive_dedup() {
        let list = AppList::new();
        let concrete = app("flatpak/flathub/org.a.A/stable");
        let flagged = Arc::new(App::with_quirks(
            AppId::parse("flatpak/flathub/org.a.A/stable").expect("id"),
            Quirks::MATCH_ANY_PREFIX,
        ));
        list.add(flagged.clone());
        list.add(concrete.clone());
        list.dedup(DedupOptions::default());

        assert_eq!(list.len(), 2);
        assert!(list.contains(&flagged));
        assert!(list.contains(&concrete));
        assert!(!concrete.is_wildcard());
    }

    #[test]
    fn merge_quirks_only_when_requested() {
        let first = app("flatpak/flathub/org.a.A/stable");
        let second = Arc::new(App::with_quirks(
            AppId::parse("flatpak/flathub/org.a.A/stable").expect("id"),
            Quirks::PROVENANCE,
        ));

        let list: AppList = vec![first.clone(), second.clone()].into();
        list.dedup(DedupOptions::default());
        assert!(!first.has_quirk(Quirks::PROVENANCE));

        let list: AppList = vec![first.clone(), second].into();
        list.dedup(DedupOptions { merge_quirks: true });
        assert_eq!(list.len(), 1);
        assert!(first.has_quirk(Quirks::PROVENANCE));
    }

    #[test]
    fn lookup_exact_and_wildcard_aware() {
        let list = AppList::new();
        list.add(app("flatpak/flathub/org.a.A/stable"));
        list.add(app("bundle/local/org.a.A/stable"));
        list.add(app("flatpak/flathub/org.b.B/stable"));

        let exact = AppId::parse("bundle/local/org.a.A/stable").expect("id");
        assert_eq!(
            list.lookup(&exact).map(|a| a.id().origin().to_string()),
            Some("local".to_string())
        );

        let pattern = AppId::parse("org.a.A").expect("pattern");
        assert_eq!(list.lookup_matching(&pattern).len(), 2);
        assert!(list.lookup(&pattern).is_none());
    }

    #[test]
    fn add_list_appends_then_sort_by_name() {
        let first = AppList::new();
        let zebra = app("flatpak/flathub/org.z.Zebra/stable");
        zebra.set_name("Zebra");
        first.add(zebra.clone());

        let second = AppList::new();
        let apple = app("flatpak/flathub/org.a.Apple/stable");
        apple.set_name("apple");
        second.add(apple.clone());

        first.add_list(&second);
        assert!(Arc::ptr_eq(&first.snapshot()[1], &apple));
        assert_eq!(second.len(), 1);

        first.sort_by_name();
        let sorted = first.snapshot();
        assert!(Arc::ptr_eq(&sorted[0], &apple));
        assert!(Arc::ptr_eq(&sorted[1], &zebra));
    }

    #[test]
    fn concurrent_appends_then_dedup_have_no_duplicates() {
        let list = AppList::new();
        let producers = 8;
        let per_producer = 50;

        thread::scope(|scope| {
            for producer in 0..producers {
                let list = &list;
                scope.spawn(move || {
                    for n in 0..per_producer {
                        // Every producer overlaps on half of its ids.
                        let id = if n % 2 == 0 {
                            format!("flatpak/flathub/org.shared.App{n}/stable")
                        } else {
                            format!("flatpak/flathub/org.p{producer}.App{n}/stable")
                        };
                        list.add(app(&id));
                    }
                });
            }
        });

        assert_eq!(list.len(), producers * per_producer);
        list.dedup(DedupOptions::default());

        let ids: Vec<String> = list.snapshot().iter().map(|a| a.id().to_string()).collect();
        let unique: std::collections::HashSet<&String> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
        assert_eq!(ids.len(), per_producer / 2 + producers * per_producer / 2);
    }
}
