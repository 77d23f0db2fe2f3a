//! Application metadata read from catalog files.
//!
//! A catalog is a TOML file with a default `origin` and `[[component]]`
//! tables. Catalogs are read from the configured `catalog_dirs` and from the
//! plugin's private cache directory during setup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use ignore::WalkBuilder;
use serde::Deserialize;

use crate::error::{PluginError, PluginResult};
use crate::model::app::{App, AppKind, AppState, Quirks};
use crate::model::app_id::AppId;
use crate::model::app_list::AppList;
use crate::model::category::{Category, CategoryList};
use crate::plugin::api::{Plugin, PluginContext};
use crate::plugin::capability::{Capability, CapabilitySet};
use crate::plugin::manifest::PluginManifest;

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default = "default_origin")]
    origin: String,
    #[serde(default, rename = "component")]
    components: Vec<Component>,
}

#[derive(Debug, Clone, Deserialize)]
struct Component {
    id: String,
    name: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    kind: AppKind,
    #[serde(default = "default_bundle")]
    bundle: String,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default = "default_branch")]
    branch: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    provides: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    popular: bool,
    #[serde(default)]
    featured: bool,
    #[serde(default)]
    release_timestamp: Option<u64>,
}

fn default_origin() -> String {
    "catalog".to_string()
}

fn default_bundle() -> String {
    "package".to_string()
}

fn default_branch() -> String {
    "stable".to_string()
}

impl Component {
    fn app_id(&self, origin: &str) -> AppId {
        AppId::from_parts(
            &self.bundle,
            self.origin.as_deref().unwrap_or(origin),
            &self.id,
            &self.branch,
        )
    }

    fn search_text(&self) -> String {
        let mut text = format!("{} {}", self.name, self.id);
        if let Some(summary) = &self.summary {
            text.push(' ');
            text.push_str(summary);
        }
        for keyword in &self.keywords {
            text.push(' ');
            text.push_str(keyword);
        }
        text.to_lowercase()
    }
}

/// Components loaded from one catalog file, with the catalog's origin applied.
#[derive(Debug, Clone)]
struct Entry {
    id: AppId,
    component: Component,
}

pub struct AppStream {
    catalog_dirs: Vec<PathBuf>,
    entries: RwLock<Vec<Entry>>,
}

impl AppStream {
    pub fn new(catalog_dirs: Vec<PathBuf>) -> Self {
        Self {
            catalog_dirs,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn build(manifest: &PluginManifest) -> Box<dyn Plugin> {
        let dirs = manifest
            .setting_list("catalog_dirs")
            .into_iter()
            .map(PathBuf::from)
            .collect();
        Box::new(Self::new(dirs))
    }

    fn entries(&self) -> Vec<Entry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached record for `entry`, with metadata filled in the first time.
    fn app_for(&self, ctx: &PluginContext<'_>, entry: &Entry) -> Arc<App> {
        let app = ctx.app_create(&entry.id, Quirks::NONE);
        if app.name().is_none() {
            let component = &entry.component;
            app.set_name(component.name.clone());
            app.set_kind(component.kind);
            if let Some(summary) = &component.summary {
                app.set_summary(summary.clone());
            }
            if let Some(version) = &component.version {
                app.set_version(version.clone());
            }
            if let Some(timestamp) = component.release_timestamp {
                app.set_release_timestamp(timestamp);
            }
            app.set_categories(component.categories.clone());
            app.set_provides(component.provides.clone());
            app.set_keywords(component.keywords.clone());
            app.set_languages(component.languages.clone());
        }
        if app.state() == AppState::Unknown {
            app.set_state(AppState::Available);
        }
        app
    }

    fn add_matching(
        &self,
        ctx: &PluginContext<'_>,
        list: &AppList,
        mut keep: impl FnMut(&Component) -> bool,
    ) -> PluginResult<()> {
        for entry in self.entries() {
            ctx.check_cancelled()?;
            if keep(&entry.component) {
                list.add(self.app_for(ctx, &entry));
            }
        }
        Ok(())
    }
}

fn read_catalog(path: &Path) -> PluginResult<Vec<Entry>> {
    let raw = fs::read_to_string(path)?;
    let catalog: Catalog = toml::from_str(&raw)
        .map_err(|err| PluginError::InvalidFormat(format!("{}: {err}", path.display())))?;
    Ok(catalog
        .components
        .into_iter()
        .map(|component| Entry {
            id: component.app_id(&catalog.origin),
            component,
        })
        .collect())
}

fn catalog_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkBuilder::new(dir)
        .max_depth(Some(1))
        .build()
        .flatten()
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "toml"))
        .collect();
    files.sort();
    files
}

fn category_tree() -> Vec<Category> {
    vec![
        Category::new("create", "Create")
            .with_icon("applications-graphics")
            .with_child(Category::new("graphics", "Graphics").with_groups(&["Graphics"]))
            .with_child(Category::new("audio-video", "Audio & Video").with_groups(&["AudioVideo"]))
            .with_child(Category::new("music", "Music").with_groups(&["AudioVideo::Audio"])),
        Category::new("work", "Work")
            .with_icon("applications-office")
            .with_child(Category::new("office", "Office").with_groups(&["Office"]))
            .with_child(Category::new("science", "Science").with_groups(&["Science", "Education"])),
        Category::new("play", "Play")
            .with_icon("applications-games")
            .with_child(Category::new("games", "Games").with_groups(&["Game"])),
        Category::new("develop", "Develop")
            .with_icon("applications-engineering")
            .with_groups(&["Development"]),
        Category::new("utilities", "Utilities")
            .with_icon("applications-utilities")
            .with_groups(&["Utility", "System"]),
    ]
}

/// `ja_JP.UTF-8` and `ja` both match a pack for `ja`.
fn locale_matches(locale: &str, language: &str) -> bool {
    let base = locale.split(['_', '.', '@']).next().unwrap_or(locale);
    language == locale || language == base
}

impl Plugin for AppStream {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[
            Capability::Search,
            Capability::SearchProvides,
            Capability::FindAlternates,
            Capability::ListCategories,
            Capability::ListCategoryApps,
            Capability::ListRecent,
            Capability::ListPopular,
            Capability::ListFeatured,
            Capability::ListLangpacks,
        ])
    }

    fn setup(&self, ctx: &PluginContext<'_>) -> PluginResult<()> {
        let mut dirs = self.catalog_dirs.clone();
        dirs.push(ctx.cache_dir());

        let mut loaded = Vec::new();
        for dir in dirs.iter().filter(|d| d.is_dir()) {
            for path in catalog_files(dir) {
                ctx.check_cancelled()?;
                let entries = read_catalog(&path)?;
                tracing::debug!(
                    catalog = %path.display(),
                    components = entries.len(),
                    "catalog loaded"
                );
                loaded.extend(entries);
            }
        }

        tracing::info!(components = loaded.len(), "appstream catalogs loaded");
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        Ok(())
    }

    fn search(
        &self,
        ctx: &PluginContext<'_>,
        terms: &[String],
        list: &AppList,
    ) -> PluginResult<()> {
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, Entry)> = self
            .entries()
            .into_iter()
            .filter_map(|entry| {
                let text = entry.component.search_text();
                terms
                    .iter()
                    .map(|term| matcher.fuzzy_match(&text, term))
                    .sum::<Option<i64>>()
                    .map(|score| (score, entry))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, entry) in scored {
            ctx.check_cancelled()?;
            list.add(self.app_for(ctx, &entry));
        }
        Ok(())
    }

    fn search_provides(
        &self,
        ctx: &PluginContext<'_>,
        tags: &[String],
        list: &AppList,
    ) -> PluginResult<()> {
        self.add_matching(ctx, list, |c| c.provides.iter().any(|p| tags.contains(p)))
    }

    fn find_alternates(
        &self,
        ctx: &PluginContext<'_>,
        app: &Arc<App>,
        list: &AppList,
    ) -> PluginResult<()> {
        let wanted = app.id().component_id();
        for entry in self.entries() {
            if entry.component.id == wanted && entry.id != *app.id() {
                list.add(self.app_for(ctx, &entry));
            }
        }
        Ok(())
    }

    fn list_categories(
        &self,
        _ctx: &PluginContext<'_>,
        categories: &CategoryList,
    ) -> PluginResult<()> {
        for category in category_tree() {
            categories.add(category);
        }
        Ok(())
    }

    fn list_category_apps(
        &self,
        ctx: &PluginContext<'_>,
        category: &Category,
        list: &AppList,
    ) -> PluginResult<()> {
        self.add_matching(ctx, list, |c| category.matches_groups(&c.categories))
    }

    fn list_recent(
        &self,
        ctx: &PluginContext<'_>,
        age: Duration,
        list: &AppList,
    ) -> PluginResult<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let cutoff = now.saturating_sub(age.as_secs());
        self.add_matching(ctx, list, |c| c.release_timestamp.is_some_and(|t| t >= cutoff))
    }

    fn list_popular(&self, ctx: &PluginContext<'_>, list: &AppList) -> PluginResult<()> {
        self.add_matching(ctx, list, |c| c.popular)
    }

    fn list_featured(&self, ctx: &PluginContext<'_>, list: &AppList) -> PluginResult<()> {
        self.add_matching(ctx, list, |c| c.featured)
    }

    fn list_langpacks(
        &self,
        ctx: &PluginContext<'_>,
        locale: &str,
        list: &AppList,
    ) -> PluginResult<()> {
        self.add_matching(ctx, list, |c| {
            c.kind == AppKind::Localization && c.languages.iter().any(|l| locale_matches(locale, l))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::Cancellable;
    use crate::model::cache::AppCache;

    const CATALOG: &str = r#"
origin = "fedora"

[[component]]
id = "org.gnome.Maps"
name = "Maps"
summary = "Find places around the world"
kind = "desktop"
categories = ["Utility"]
keywords = ["map", "navigation"]
popular = true
release_timestamp = 4102444800

[[component]]
id = "org.gnome.Maps"
name = "Maps"
bundle = "bundle"
origin = "flathub"

[[component]]
id = "org.example.Editor"
name = "Text Editor"
summary = "Edit plain text files"
kind = "desktop"
categories = ["Development"]
provides = ["mimetype:text/plain"]
featured = true

[[component]]
id = "org.example.Lang.ja"
name = "Japanese language pack"
kind = "localization"
languages = ["ja"]
"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        plugin: AppStream,
        cache: AppCache,
        token: Cancellable,
        cache_root: PathBuf,
    }

    impl Fixture {
        fn ctx(&self) -> PluginContext<'_> {
            PluginContext::new("appstream", &self.cache, &self.token, &self.cache_root)
        }
    }

    fn fixture(catalog: &str) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalogs = dir.path().join("catalogs");
        fs::create_dir_all(&catalogs).expect("mkdir");
        fs::write(catalogs.join("main.toml"), catalog).expect("write");
        let fixture = Fixture {
            plugin: AppStream::new(vec![catalogs]),
            cache: AppCache::new(),
            token: Cancellable::new(),
            cache_root: dir.path().join("cache"),
            _dir: dir,
        };
        fixture.plugin.setup(&fixture.ctx()).expect("setup");
        fixture
    }

    #[test]
    fn search_scores_all_terms() {
        let fx = fixture(CATALOG);
        let list = AppList::new();
        fx.plugin
            .search(&fx.ctx(), &["text".to_string(), "edit".to_string()], &list)
            .expect("search");
        assert_eq!(list.len(), 1);
        let app = list.get(0).expect("app");
        assert_eq!(app.id().to_string(), "package/fedora/org.example.Editor/stable");
        assert_eq!(app.state(), AppState::Available);
        assert_eq!(app.summary().as_deref(), Some("Edit plain text files"));
    }

    #[test]
    fn records_come_from_the_cache() {
        let fx = fixture(CATALOG);
        let first = AppList::new();
        let second = AppList::new();
        fx.plugin.list_popular(&fx.ctx(), &first).expect("popular");
        fx.plugin.list_recent(&fx.ctx(), Duration::from_secs(60), &second).expect("recent");
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(Arc::ptr_eq(&first.get(0).expect("a"), &second.get(0).expect("b")));
    }

    #[test]
    fn alternates_share_the_component_id() {
        let fx = fixture(CATALOG);
        let popular = AppList::new();
        fx.plugin.list_popular(&fx.ctx(), &popular).expect("popular");
        let maps = popular.get(0).expect("maps");

        let list = AppList::new();
        fx.plugin.find_alternates(&fx.ctx(), &maps, &list).expect("alternates");
        assert_eq!(list.len(), 1);
        assert_eq!(
            list.get(0).expect("alt").id().to_string(),
            "bundle/flathub/org.gnome.Maps/stable"
        );
    }

    #[test]
    fn category_apps_follow_groups() {
        let fx = fixture(CATALOG);
        let categories = CategoryList::new();
        fx.plugin.list_categories(&fx.ctx(), &categories).expect("categories");
        let roots = categories.into_vec();
        let develop = roots.iter().find(|c| c.id == "develop").expect("develop");

        let list = AppList::new();
        fx.plugin.list_category_apps(&fx.ctx(), develop, &list).expect("apps");
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0).expect("app").display_name(), "Text Editor");
    }

    #[test]
    fn langpacks_match_language_part() {
        let fx = fixture(CATALOG);
        let list = AppList::new();
        fx.plugin.list_langpacks(&fx.ctx(), "ja_JP.UTF-8", &list).expect("langpacks");
        assert_eq!(list.len(), 1);
        fx.plugin.list_langpacks(&fx.ctx(), "de", &list).expect("langpacks");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn malformed_catalog_fails_setup() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("bad.toml"), "[[component]]\nname = 3\n").expect("write");
        let plugin = AppStream::new(vec![dir.path().to_path_buf()]);
        let cache = AppCache::new();
        let token = Cancellable::new();
        let ctx = PluginContext::new("appstream", &cache, &token, dir.path());
        assert!(matches!(plugin.setup(&ctx), Err(PluginError::InvalidFormat(_))));
    }

    #[test]
    fn concrete_lookup_does_not_reuse_wildcard_record() {
        let fx = fixture(CATALOG);
        let wildcard = fx
            .cache
            .create(
                &AppId::parse("package/fedora/org.example.Editor/stable").expect("id"),
                Quirks::MATCH_ANY_PREFIX,
            );

        let list = AppList::new();
        fx.plugin.list_featured(&fx.ctx(), &list).expect("featured");
        let concrete = list.get(0).expect("editor");
        assert!(!Arc::ptr_eq(&wildcard, &concrete));
        assert!(!concrete.is_wildcard());
    }
}
