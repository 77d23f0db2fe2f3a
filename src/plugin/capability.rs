use std::fmt;

use serde::Deserialize;

/// One optional operation of the plugin contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    AdoptApp,
    Search,
    SearchFiles,
    SearchProvides,
    FindAlternates,
    ListUpdates,
    ListSources,
    ListHistoricalUpdates,
    ListCategories,
    ListCategoryApps,
    ListRecent,
    ListPopular,
    ListFeatured,
    Launch,
    CancelUpdate,
    Install,
    Remove,
    UpdateLive,
    Download,
    DownloadUpgrade,
    TriggerUpgrade,
    FileToApp,
    UrlToApp,
    UpdateBatch,
    ListLangpacks,
    InstallRepo,
    RemoveRepo,
    EnableRepo,
    DisableRepo,
}

impl Capability {
    pub const ALL: [Capability; 29] = [
        Capability::AdoptApp,
        Capability::Search,
        Capability::SearchFiles,
        Capability::SearchProvides,
        Capability::FindAlternates,
        Capability::ListUpdates,
        Capability::ListSources,
        Capability::ListHistoricalUpdates,
        Capability::ListCategories,
        Capability::ListCategoryApps,
        Capability::ListRecent,
        Capability::ListPopular,
        Capability::ListFeatured,
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
        Capability::ListLangpacks,
        Capability::InstallRepo,
        Capability::RemoveRepo,
        Capability::EnableRepo,
        Capability::DisableRepo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::AdoptApp => "adopt-app",
            Capability::Search => "search",
            Capability::SearchFiles => "search-files",
            Capability::SearchProvides => "search-provides",
            Capability::FindAlternates => "find-alternates",
            Capability::ListUpdates => "list-updates",
            Capability::ListSources => "list-sources",
            Capability::ListHistoricalUpdates => "list-historical-updates",
            Capability::ListCategories => "list-categories",
            Capability::ListCategoryApps => "list-category-apps",
            Capability::ListRecent => "list-recent",
            Capability::ListPopular => "list-popular",
            Capability::ListFeatured => "list-featured",
            Capability::Launch => "launch",
            Capability::CancelUpdate => "cancel-update",
            Capability::Install => "install",
            Capability::Remove => "remove",
            Capability::UpdateLive => "update-live",
            Capability::Download => "download",
            Capability::DownloadUpgrade => "download-upgrade",
            Capability::TriggerUpgrade => "trigger-upgrade",
            Capability::FileToApp => "file-to-app",
            Capability::UrlToApp => "url-to-app",
            Capability::UpdateBatch => "update-batch",
            Capability::ListLangpacks => "list-langpacks",
            Capability::InstallRepo => "install-repo",
            Capability::RemoveRepo => "remove-repo",
            Capability::EnableRepo => "enable-repo",
            Capability::DisableRepo => "disable-repo",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// The other half of a repo lifecycle pair.
    pub fn repo_pair(&self) -> Option<Capability> {
        match self {
            Capability::InstallRepo => Some(Capability::RemoveRepo),
            Capability::RemoveRepo => Some(Capability::InstallRepo),
            Capability::EnableRepo => Some(Capability::DisableRepo),
            Capability::DisableRepo => Some(Capability::EnableRepo),
            _ => None,
        }
    }

    /// Operations that expect exactly one plugin to produce the result.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Capability::FileToApp | Capability::UrlToApp)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitmask of the capabilities a plugin implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    pub fn of(caps: &[Capability]) -> Self {
        caps.iter().fold(Self::EMPTY, |set, cap| set.with(*cap))
    }

    pub fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    pub fn without(self, cap: Capability) -> Self {
        Self(self.0 & !cap.bit())
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|cap| self.contains(*cap))
    }

    /// Repo lifecycle capabilities present without their pair.
    pub fn unpaired_repo_actions(&self) -> Vec<Capability> {
        self.iter()
            .filter(|cap| {
                cap.repo_pair()
                    .is_some_and(|pair| !self.contains(pair))
            })
            .collect()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, |set, cap| set.with(cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_capability_has_a_distinct_bit() {
        let all: CapabilitySet = Capability::ALL.into_iter().collect();
        assert_eq!(all.iter().count(), Capability::ALL.len());
    }

    #[test]
    fn set_operations() {
        let set = CapabilitySet::of(&[Capability::Search, Capability::Install]);
        assert!(set.contains(Capability::Search));
        assert!(!set.contains(Capability::Remove));
        assert!(!set.without(Capability::Search).contains(Capability::Search));
        assert!(CapabilitySet::EMPTY.is_empty());
    }

    #[test]
    fn detects_unpaired_repo_actions() {
        let set = CapabilitySet::of(&[
            Capability::InstallRepo,
            Capability::RemoveRepo,
            Capability::EnableRepo,
        ]);
        assert_eq!(set.unpaired_repo_actions(), vec![Capability::EnableRepo]);
    }

    #[test]
    fn names_deserialize_from_manifests() {
        #[derive(Deserialize)]
        struct Wrapper {
            caps: Vec<Capability>,
        }
        let parsed: Wrapper =
            toml::from_str(r#"caps = ["url-to-app", "list-historical-updates"]"#).expect("parse");
        assert_eq!(
            parsed.caps,
            vec![Capability::UrlToApp, Capability::ListHistoricalUpdates]
        );
        assert_eq!(Capability::UrlToApp.to_string(), "url-to-app");
    }
}
