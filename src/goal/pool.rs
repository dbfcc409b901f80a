// src/goal/pool.rs

//! Package pool for one resolution pass
//!
//! The pool numbers every package the solver may consider: installed
//! packages first, then the eligible records of the snapshot. Ids are
//! plain indexes, valid only for the pool that issued them.

use crate::universe::PackageRecord;
use crate::version::Capability;
use std::cmp::Ordering;
use std::collections::HashMap;

pub type PkgId = usize;

#[derive(Debug, Default)]
pub struct Pool<'a> {
    packages: Vec<&'a PackageRecord>,
    priorities: Vec<i32>,
    by_name: HashMap<&'a str, Vec<PkgId>>,
    by_provide: HashMap<&'a str, Vec<PkgId>>,
    by_file: HashMap<&'a str, Vec<PkgId>>,
    arch: String,
}

impl<'a> Pool<'a> {
    pub fn new(arch: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, record: &'a PackageRecord, priority: i32) -> PkgId {
        let id = self.packages.len();
        self.packages.push(record);
        self.priorities.push(priority);
        self.by_name.entry(record.name.as_str()).or_default().push(id);
        self.by_provide.entry(record.name.as_str()).or_default().push(id);
        for provide in &record.provides {
            let entry = self.by_provide.entry(provide.name.as_str()).or_default();
            if entry.last() != Some(&id) {
                entry.push(id);
            }
        }
        for file in &record.files {
            self.by_file.entry(file.as_str()).or_default().push(id);
        }
        id
    }

    pub fn get(&self, id: PkgId) -> &'a PackageRecord {
        self.packages[id]
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn ids(&self) -> std::ops::Range<PkgId> {
        0..self.packages.len()
    }

    pub fn installed(&self) -> Vec<PkgId> {
        self.ids().filter(|id| self.get(*id).is_installed()).collect()
    }

    pub fn by_name(&self, name: &str) -> &[PkgId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = &&'a str> {
        self.by_name.keys()
    }

    pub fn by_file(&self, path: &str) -> &[PkgId] {
        self.by_file.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Packages satisfying a capability, in id order
    pub fn providers(&self, cap: &Capability) -> Vec<PkgId> {
        let mut found: Vec<PkgId> = self
            .by_provide
            .get(cap.name.as_str())
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| self.get(*id).provides_capability(cap))
                    .collect()
            })
            .unwrap_or_default();
        if cap.is_file() {
            found.extend(self.by_file(&cap.name));
            found.sort_unstable();
            found.dedup();
        }
        found
    }

    /// Other versions of an installed package: same name, same arch
    pub fn alternatives(&self, id: PkgId) -> Vec<PkgId> {
        let pkg = self.get(id);
        let mut alts: Vec<PkgId> = self
            .by_name(&pkg.name)
            .iter()
            .copied()
            .filter(|other| *other != id)
            .filter(|other| {
                let o = self.get(*other);
                !o.is_installed() && o.arch == pkg.arch
            })
            .collect();
        self.prefer(&mut alts, None);
        alts
    }

    /// Whether two packages occupy the same install slot
    pub fn same_slot(&self, a: PkgId, b: PkgId) -> bool {
        let (a, b) = (self.get(a), self.get(b));
        a.name == b.name && a.arch == b.arch
    }

    /// Sort candidates best first
    ///
    /// Installed packages come first, then (for requirements) packages named
    /// like the capability, then newer versions, better repository priority,
    /// the system architecture over `noarch`, and finally name and repository
    /// for a stable order.
    pub fn prefer(&self, ids: &mut [PkgId], capability: Option<&str>) {
        ids.sort_by(|a, b| self.compare_preference(*a, *b, capability));
    }

    fn compare_preference(&self, a: PkgId, b: PkgId, capability: Option<&str>) -> Ordering {
        let (pa, pb) = (self.get(a), self.get(b));
        pb.is_installed()
            .cmp(&pa.is_installed())
            .then_with(|| match capability {
                Some(cap) => (pb.name == cap).cmp(&(pa.name == cap)),
                None => Ordering::Equal,
            })
            .then_with(|| pa.name.cmp(&pb.name))
            .then_with(|| pb.evr.cmp(&pa.evr))
            .then_with(|| self.priorities[a].cmp(&self.priorities[b]))
            .then_with(|| (pb.arch == self.arch).cmp(&(pa.arch == self.arch)))
            .then_with(|| pa.repo.cmp(&pb.repo))
            .then_with(|| a.cmp(&b))
    }
}
