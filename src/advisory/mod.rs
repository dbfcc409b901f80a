// src/advisory/mod.rs

//! Security and bugfix advisories
//!
//! Advisories are loaded with repository metadata and are read-only
//! afterwards. Listing always returns them ordered by id.

use crate::options::Scope;
use crate::universe::{PackageRecord, UniverseSnapshot, arch_compatible};
use crate::version::RpmVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Kind of advisory
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AdvisoryKind {
    Security,
    Bugfix,
    Enhancement,
    Newpackage,
}

/// A package version fixed by an advisory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryPackage {
    pub name: String,
    pub evr: RpmVersion,
    #[serde(default = "noarch")]
    pub arch: String,
}

fn noarch() -> String {
    "noarch".to_string()
}

impl fmt::Display for AdvisoryPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.evr, self.arch)
    }
}

/// External reference (CVE, bug tracker entry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub kind: AdvisoryKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub issued: Option<DateTime<Utc>>,
    #[serde(default)]
    pub packages: Vec<AdvisoryPackage>,
    #[serde(default)]
    pub references: Vec<AdvisoryReference>,
}

impl Advisory {
    /// Whether the advisory names a package with this name
    pub fn touches(&self, name: &str) -> bool {
        self.packages.iter().any(|p| p.name == name)
    }

    /// Whether the advisory ships a fix newer than an installed package
    pub fn updates(&self, installed: &PackageRecord) -> bool {
        self.packages.iter().any(|p| {
            p.name == installed.name
                && arch_compatible(&p.arch, &installed.arch)
                && p.evr > installed.evr
        })
    }
}

/// Filter for advisory listings
#[derive(Debug, Clone, Default)]
pub struct AdvisoryQuery {
    /// Empty means every kind
    pub kinds: Vec<AdvisoryKind>,
    pub scope: Scope,
}

impl AdvisoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: AdvisoryKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Run the query against a snapshot and the installed package list
    ///
    /// Duplicate ids shipped by several repositories are reported once.
    pub fn run<'a>(&self, snapshot: &'a UniverseSnapshot, installed: &[PackageRecord]) -> Vec<&'a Advisory> {
        let mut by_name: HashMap<&str, Vec<&PackageRecord>> = HashMap::new();
        for pkg in installed {
            by_name.entry(pkg.name.as_str()).or_default().push(pkg);
        }

        let mut found: Vec<&Advisory> = snapshot
            .advisories()
            .filter(|a| self.kinds.is_empty() || self.kinds.contains(&a.kind))
            .filter(|a| match self.scope {
                Scope::All => true,
                Scope::Installed => a.packages.iter().any(|p| by_name.contains_key(p.name.as_str())),
                Scope::Available => a.packages.iter().any(|p| {
                    by_name
                        .get(p.name.as_str())
                        .is_some_and(|pkgs| pkgs.iter().any(|i| a.updates(i)))
                }),
            })
            .collect();

        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.dedup_by(|a, b| a.id == b.id);
        found
    }
}
