// src/universe/mod.rs

//! In-memory package universe merged from all loaded repositories
//!
//! Each loaded repository contributes one immutable [`RepoSlice`] holding
//! its package records, module streams and advisories together with lookup
//! indexes. Reloading a repository swaps its whole slice under a write lock,
//! so a [`UniverseSnapshot`] taken before or after the swap never sees a
//! partially replaced repository.

use crate::advisory::Advisory;
use crate::module::ModuleStream;
use crate::version::{Capability, RpmVersion};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Repository id used for packages reported by the installed-package database
pub const SYSTEM_REPO: &str = "@System";

/// Check if a package architecture is compatible with the system
pub fn arch_compatible(pkg_arch: &str, system_arch: &str) -> bool {
    pkg_arch == system_arch || pkg_arch == "noarch" || system_arch == "noarch"
}

/// Identity of one package version from one repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub evr: RpmVersion,
    pub arch: String,
    pub repo: String,
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}@{}", self.name, self.evr, self.arch, self.repo)
    }
}

/// A parsed `name-[epoch:]version-release.arch` string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nevra {
    pub name: String,
    pub evr: RpmVersion,
    pub arch: String,
}

impl Nevra {
    /// Parse a NEVRA such as `nodejs-1:18.19.0-1.module_f39.x86_64`
    pub fn parse(s: &str) -> Option<Self> {
        let (rest, arch) = s.rsplit_once('.')?;
        let (rest, release) = rest.rsplit_once('-')?;
        let (name, version) = rest.rsplit_once('-')?;
        if name.is_empty() || arch.is_empty() {
            return None;
        }
        let evr = RpmVersion::parse(&format!("{version}-{release}")).ok()?;
        Some(Self {
            name: name.to_string(),
            evr,
            arch: arch.to_string(),
        })
    }

    pub fn matches(&self, record: &PackageRecord) -> bool {
        self.name == record.name && self.arch == record.arch && self.evr == record.evr
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}-{}.{}",
            self.name,
            self.evr.epoch,
            self.evr.version,
            self.evr.release.as_deref().unwrap_or("0"),
            self.arch
        )
    }
}

/// One resolvable package version from one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub evr: RpmVersion,
    pub arch: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub provides: Vec<Capability>,
    #[serde(default)]
    pub requires: Vec<Capability>,
    #[serde(default)]
    pub conflicts: Vec<Capability>,
    #[serde(default)]
    pub obsoletes: Vec<Capability>,
    #[serde(default)]
    pub files: Vec<String>,
    /// Path of the payload relative to the repository base
    #[serde(default)]
    pub location: Option<String>,
    /// SHA-256 of the payload
    #[serde(default)]
    pub checksum: Option<String>,
    /// Id of the repository the record came from
    #[serde(default)]
    pub repo: String,
}

impl PackageRecord {
    /// Create a bare record with no relations
    pub fn new(name: impl Into<String>, evr: RpmVersion, arch: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            evr,
            arch: arch.into(),
            summary: String::new(),
            provides: Vec::new(),
            requires: Vec::new(),
            conflicts: Vec::new(),
            obsoletes: Vec::new(),
            files: Vec::new(),
            location: None,
            checksum: None,
            repo: repo.into(),
        }
    }

    pub fn id(&self) -> PackageId {
        PackageId {
            name: self.name.clone(),
            evr: self.evr.clone(),
            arch: self.arch.clone(),
            repo: self.repo.clone(),
        }
    }

    pub fn nevra(&self) -> Nevra {
        Nevra {
            name: self.name.clone(),
            evr: self.evr.clone(),
            arch: self.arch.clone(),
        }
    }

    /// The implicit `name = evr` provide every package carries
    pub fn self_provide(&self) -> Capability {
        Capability::exact(self.name.clone(), self.evr.clone())
    }

    /// Check whether this package satisfies a capability
    ///
    /// Considers explicit provides, the implicit self provide and, for
    /// path capabilities, the file list.
    pub fn provides_capability(&self, cap: &Capability) -> bool {
        if cap.is_file() && self.files.iter().any(|f| f == &cap.name) {
            return true;
        }
        if cap.is_satisfied_by(&self.self_provide()) {
            return true;
        }
        self.provides.iter().any(|p| cap.is_satisfied_by(p))
    }

    /// Check whether any of this package's conflicts matches `other`
    pub fn conflicts_with(&self, other: &PackageRecord) -> Option<&Capability> {
        self.conflicts.iter().find(|c| other.provides_capability(c))
    }

    /// Check whether this package obsoletes `other`
    ///
    /// Obsoletes match package names, not provides.
    pub fn obsoletes_package(&self, other: &PackageRecord) -> Option<&Capability> {
        if self.name == other.name {
            return None;
        }
        self.obsoletes
            .iter()
            .find(|o| o.is_satisfied_by(&other.self_provide()))
    }

    pub fn is_installed(&self) -> bool {
        self.repo == SYSTEM_REPO
    }
}

impl fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.evr, self.arch)
    }
}

/// Everything one repository's metadata contributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoContent {
    pub packages: Vec<PackageRecord>,
    #[serde(default)]
    pub modules: Vec<ModuleStream>,
    #[serde(default)]
    pub advisories: Vec<Advisory>,
}

/// Indexed, immutable content of one loaded repository
#[derive(Debug)]
pub struct RepoSlice {
    repo: String,
    priority: i32,
    content: RepoContent,
    by_name: HashMap<String, Vec<usize>>,
    by_provide: HashMap<String, Vec<usize>>,
    by_file: HashMap<String, Vec<usize>>,
}

impl RepoSlice {
    pub fn new(repo: impl Into<String>, priority: i32, content: RepoContent) -> Self {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_provide: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_file: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, pkg) in content.packages.iter().enumerate() {
            by_name.entry(pkg.name.clone()).or_default().push(idx);
            by_provide.entry(pkg.name.clone()).or_default().push(idx);
            for provide in &pkg.provides {
                let entry = by_provide.entry(provide.name.clone()).or_default();
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
            for file in &pkg.files {
                by_file.entry(file.clone()).or_default().push(idx);
            }
        }

        Self {
            repo: repo.into(),
            priority,
            content,
            by_name,
            by_provide,
            by_file,
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Lower values are preferred
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn content(&self) -> &RepoContent {
        &self.content
    }

    pub fn packages(&self) -> &[PackageRecord] {
        &self.content.packages
    }

    fn indexed(&self, index: &HashMap<String, Vec<usize>>, key: &str) -> Vec<&PackageRecord> {
        index
            .get(key)
            .map(|ids| ids.iter().map(|idx| &self.content.packages[*idx]).collect())
            .unwrap_or_default()
    }
}

/// Queryable index over all loaded repositories
#[derive(Debug, Default)]
pub struct PackageUniverse {
    repos: RwLock<BTreeMap<String, Arc<RepoSlice>>>,
}

impl PackageUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository's content, replacing any previous content
    /// for the same repository in one step
    pub fn register(&self, slice: RepoSlice) {
        let repo = slice.repo.clone();
        self.repos.write().insert(repo, Arc::new(slice));
    }

    /// Drop a repository's content
    pub fn unregister(&self, repo: &str) -> bool {
        self.repos.write().remove(repo).is_some()
    }

    pub fn contains(&self, repo: &str) -> bool {
        self.repos.read().contains_key(repo)
    }

    /// Ids of all loaded repositories, sorted
    pub fn repositories(&self) -> Vec<String> {
        self.repos.read().keys().cloned().collect()
    }

    /// Take an immutable view of the current content
    pub fn snapshot(&self) -> UniverseSnapshot {
        UniverseSnapshot {
            repos: self.repos.read().values().cloned().collect(),
        }
    }
}

/// Immutable view of the universe at one point in time
///
/// All package queries run against a snapshot. Iteration is restartable:
/// calling [`iter`](Self::iter) again yields the same records.
#[derive(Debug, Clone, Default)]
pub struct UniverseSnapshot {
    repos: Vec<Arc<RepoSlice>>,
}

impl UniverseSnapshot {
    /// Build a snapshot directly from slices
    pub fn from_slices(slices: Vec<RepoSlice>) -> Self {
        let mut repos: Vec<Arc<RepoSlice>> = slices.into_iter().map(Arc::new).collect();
        repos.sort_by(|a, b| a.repo.cmp(&b.repo));
        Self { repos }
    }

    pub fn slices(&self) -> &[Arc<RepoSlice>] {
        &self.repos
    }

    /// Lazily iterate every package record
    pub fn iter(&self) -> impl Iterator<Item = &PackageRecord> {
        self.repos.iter().flat_map(|r| r.packages().iter())
    }

    pub fn len(&self) -> usize {
        self.repos.iter().map(|r| r.packages().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records with this exact name, in no particular order
    pub fn find_by_name(&self, name: &str) -> Vec<&PackageRecord> {
        self.repos
            .iter()
            .flat_map(|r| r.indexed(&r.by_name, name))
            .collect()
    }

    /// All records providing the capability
    ///
    /// Uses the same matching as requirement satisfaction: name plus
    /// optional version range. Path capabilities also match file lists.
    pub fn find_by_provide(&self, cap: &Capability) -> Vec<&PackageRecord> {
        let mut found: Vec<&PackageRecord> = Vec::new();
        for repo in &self.repos {
            for pkg in repo.indexed(&repo.by_provide, &cap.name) {
                if pkg.provides_capability(cap) {
                    found.push(pkg);
                }
            }
            if cap.is_file() {
                for pkg in repo.indexed(&repo.by_file, &cap.name) {
                    if !found.iter().any(|p| std::ptr::eq(*p, pkg)) {
                        found.push(pkg);
                    }
                }
            }
        }
        found
    }

    /// All records shipping this file
    pub fn find_by_file(&self, path: &str) -> Vec<&PackageRecord> {
        self.repos
            .iter()
            .flat_map(|r| r.indexed(&r.by_file, path))
            .collect()
    }

    /// Newest record of a name for an architecture
    ///
    /// Ties between repositories go to the better (lower) priority, then the
    /// repository id.
    pub fn latest(&self, name: &str, arch: &str) -> Option<&PackageRecord> {
        self.find_by_name(name)
            .into_iter()
            .filter(|p| arch_compatible(&p.arch, arch))
            .max_by(|a, b| {
                a.evr
                    .cmp(&b.evr)
                    .then_with(|| self.priority(&b.repo).cmp(&self.priority(&a.repo)))
                    .then_with(|| b.repo.cmp(&a.repo))
            })
    }

    /// Priority of a loaded repository; unknown repositories sort last
    pub fn priority(&self, repo: &str) -> i32 {
        self.repos
            .iter()
            .find(|r| r.repo == repo)
            .map(|r| r.priority)
            .unwrap_or(i32::MAX)
    }

    /// All module streams across repositories
    pub fn module_streams(&self) -> impl Iterator<Item = &ModuleStream> {
        self.repos.iter().flat_map(|r| r.content.modules.iter())
    }

    /// All advisories across repositories
    pub fn advisories(&self) -> impl Iterator<Item = &Advisory> {
        self.repos.iter().flat_map(|r| r.content.advisories.iter())
    }
}
