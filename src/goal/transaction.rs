// src/goal/transaction.rs

//! Resolved transactions and their ordering

use crate::module::ModuleChange;
use crate::universe::{PackageId, PackageRecord};
use std::collections::BTreeSet;
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::warn;

/// What happens to a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Install,
    Erase,
    Upgrade,
    Downgrade,
    Reinstall,
    Obsoleted,
}

impl Action {
    /// Whether the package ends up on the system
    pub fn is_install(self) -> bool {
        matches!(
            self,
            Action::Install | Action::Upgrade | Action::Downgrade | Action::Reinstall
        )
    }
}

/// Why a package is part of the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Reason {
    UserRequested,
    Dependency,
    Obsoletes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPackage {
    pub package: PackageId,
    pub action: Action,
    pub reason: Reason,
    /// The installed version this one replaces
    pub replaces: Option<PackageId>,
    /// The package obsoleting this one
    pub obsoleted_by: Option<PackageId>,
    /// Position in execution order
    pub order: usize,
}

impl fmt::Display for TransactionPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {} ({})", self.action.as_ref(), self.package, self.reason)?;
        if let Some(old) = &self.replaces {
            write!(f, " replacing {old}")?;
        }
        if let Some(by) = &self.obsoleted_by {
            write!(f, " obsoleted by {by}")?;
        }
        Ok(())
    }
}

/// The outcome of a successful resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    /// Packages in execution order
    pub packages: Vec<TransactionPackage>,
    /// Module state changes to commit along with the packages
    pub module_changes: Vec<ModuleChange>,
    /// Non-fatal issues found during resolution
    pub warnings: Vec<String>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.module_changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn installs(&self) -> impl Iterator<Item = &TransactionPackage> {
        self.packages.iter().filter(|p| p.action.is_install())
    }

    pub fn erasures(&self) -> impl Iterator<Item = &TransactionPackage> {
        self.packages.iter().filter(|p| !p.action.is_install())
    }

    /// Find the entry for a package name
    pub fn find(&self, name: &str) -> Option<&TransactionPackage> {
        self.packages.iter().find(|p| p.package.name == name)
    }

    /// Position of a package name in execution order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.find(name).map(|p| p.order)
    }
}

/// Order one phase of a transaction
///
/// With `dependents_first` unset, a package comes after every package in
/// the phase it requires (installs). With it set, a package comes before the
/// packages it requires (erasures). Ties go to the lowest `keys` entry. A
/// cycle is broken at its lowest key with a warning.
pub(crate) fn order_phase(
    records: &[&PackageRecord],
    keys: &[(usize, String)],
    dependents_first: bool,
) -> (Vec<usize>, Vec<String>) {
    let n = records.len();
    let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    let mut in_degree: Vec<usize> = vec![0; n];

    // Edge from -> to: `from` must be placed before `to`
    for (a, record) in records.iter().enumerate() {
        for req in &record.requires {
            for (b, other) in records.iter().enumerate() {
                if a == b || !other.provides_capability(req) {
                    continue;
                }
                let (from, to) = if dependents_first { (a, b) } else { (b, a) };
                if edges[from].insert(to) {
                    in_degree[to] += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<(&(usize, String), usize)> = (0..n)
        .filter(|i| in_degree[*i] == 0)
        .map(|i| (&keys[i], i))
        .collect();
    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut warnings = Vec::new();

    while order.len() < n {
        let next = match ready.pop_first() {
            Some((_, i)) => i,
            None => {
                let Some(i) = (0..n).filter(|i| !placed[*i]).min_by_key(|i| (&keys[*i], *i)) else {
                    break;
                };
                let message = format!("Dependency cycle broken at {}", records[i]);
                warn!("{}", message);
                warnings.push(message);
                i
            }
        };
        if placed[next] {
            continue;
        }
        placed[next] = true;
        order.push(next);

        for &to in &edges[next] {
            in_degree[to] = in_degree[to].saturating_sub(1);
            if in_degree[to] == 0 && !placed[to] {
                ready.insert((&keys[to], to));
            }
        }
    }

    (order, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{Capability, RpmVersion};

    fn pkg(name: &str, requires: &[&str]) -> PackageRecord {
        let mut p = PackageRecord::new(name, RpmVersion::parse("1-1").unwrap(), "x86_64", "fedora");
        p.requires = requires.iter().map(|r| Capability::named(*r)).collect();
        p
    }

    fn keys(records: &[&PackageRecord]) -> Vec<(usize, String)> {
        records
            .iter()
            .map(|r| (usize::MAX, r.name.clone()))
            .collect()
    }

    #[test]
    fn test_dependencies_first() {
        let a = pkg("A", &["B"]);
        let b = pkg("B", &["C"]);
        let c = pkg("C", &[]);
        let records = vec![&a, &b, &c];
        let (order, warnings) = order_phase(&records, &keys(&records), false);
        assert_eq!(order, vec![2, 1, 0]);
        assert!(warnings.is_empty());

        let (order, _) = order_phase(&records, &keys(&records), true);
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_ties_follow_keys() {
        let x = pkg("x", &[]);
        let y = pkg("y", &[]);
        let records = vec![&x, &y];
        let keys = vec![(1, "x".to_string()), (0, "y".to_string())];
        let (order, _) = order_phase(&records, &keys, false);
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn test_cycle_is_broken_with_warning() {
        let a = pkg("a", &["b"]);
        let b = pkg("b", &["a"]);
        let records = vec![&a, &b];
        let (order, warnings) = order_phase(&records, &keys(&records), false);
        assert_eq!(order.len(), 2);
        assert_eq!(order[0], 0);
        assert_eq!(warnings.len(), 1);
    }
}
