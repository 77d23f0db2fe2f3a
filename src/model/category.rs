use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::model::app_list::AppList;

/// Node of the catalog browsing tree.
#[derive(Debug, Clone)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    /// Desktop groups this category matches, e.g. `AudioVideo::Music`.
    pub desktop_groups: Vec<String>,
    pub children: Vec<Category>,
    apps: Arc<OnceLock<Arc<AppList>>>,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
            desktop_groups: Vec::new(),
            children: Vec::new(),
            apps: Arc::new(OnceLock::new()),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.desktop_groups = groups.iter().map(|g| (*g).to_string()).collect();
        self
    }

    pub fn with_child(mut self, child: Category) -> Self {
        self.children.push(child);
        self
    }

    pub fn find(&self, id: &str) -> Option<&Category> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Own groups plus every descendant's.
    pub fn all_groups(&self) -> Vec<String> {
        let mut groups = self.desktop_groups.clone();
        for child in &self.children {
            groups.extend(child.all_groups());
        }
        groups
    }

    /// True if any of `app_groups` falls under this category. A group such as
    /// `AudioVideo::Music` requires both `AudioVideo` and `Music`.
    pub fn matches_groups(&self, app_groups: &[String]) -> bool {
        self.all_groups().iter().any(|group| {
            group
                .split("::")
                .all(|part| app_groups.iter().any(|g| g == part))
        })
    }

    /// Apps populated for this category, if a listing already ran.
    pub fn apps(&self) -> Option<Arc<AppList>> {
        self.apps.get().cloned()
    }

    /// Stores `apps` unless another caller populated the category first;
    /// returns whichever list is stored.
    pub(crate) fn populate(&self, apps: AppList) -> Arc<AppList> {
        Arc::clone(self.apps.get_or_init(|| Arc::new(apps)))
    }

    /// Merge `other` into `self`: fill missing metadata, union groups and
    /// merge children by id.
    pub fn merge(&mut self, other: Category) {
        if self.icon.is_none() {
            self.icon = other.icon;
        }
        for group in other.desktop_groups {
            if !self.desktop_groups.contains(&group) {
                self.desktop_groups.push(group);
            }
        }
        for child in other.children {
            match self.children.iter_mut().find(|c| c.id == child.id) {
                Some(existing) => existing.merge(child),
                None => self.children.push(child),
            }
        }
    }
}

/// Shared output for category listings; plugins append concurrently.
#[derive(Debug, Default)]
pub struct CategoryList {
    roots: Mutex<Vec<Category>>,
}

impl CategoryList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root category, merging into an existing root with the same id.
    pub fn add(&self, category: Category) {
        let mut roots = self.roots.lock().unwrap_or_else(PoisonError::into_inner);
        match roots.iter_mut().find(|c| c.id == category.id) {
            Some(existing) => existing.merge(category),
            None => roots.push(category),
        }
    }

    pub fn len(&self) -> usize {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<Category> {
        self.roots.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
