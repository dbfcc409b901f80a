// src/goal/mod.rs

//! Goal resolution
//!
//! A [`Goal`] is an ordered list of jobs (install, remove, upgrade, module
//! enable and disable). [`GoalEngine::resolve`] turns it into a
//! [`Transaction`] against one universe snapshot, one module state and the
//! installed set, or explains why it cannot.
//!
//! Resolution runs in phases:
//! 1. Module jobs update a working copy of the module state
//! 2. The package pool is built from eligible packages under that state
//! 3. Package jobs become solver rules
//! 4. The solver picks packages; on failure, a minimal set of conflicting
//!    jobs is computed, non-strict jobs in it are dropped and the solve is
//!    retried
//! 5. The selection is turned into an ordered transaction

pub mod pool;
mod problem;
mod solver;
mod transaction;

pub use pool::{PkgId, Pool};
pub use problem::Problem;
pub use solver::{BacktrackingSolver, DEFAULT_MAX_STEPS, JobRule, Rule, SolveError, Solver};
pub use transaction::{Action, Reason, Transaction, TransactionPackage};

use crate::error::{GoalError, ModuleError};
use crate::installed::InstalledDb;
use crate::module::{ModuleIndex, ModuleSpec};
use crate::universe::{Nevra, PackageRecord, UniverseSnapshot, arch_compatible};
use crate::version::Capability;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kind of a goal job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum JobKind {
    Install,
    Remove,
    Upgrade,
    ModuleEnable,
    ModuleDisable,
}

impl JobKind {
    pub fn is_module(self) -> bool {
        matches!(self, JobKind::ModuleEnable | JobKind::ModuleDisable)
    }
}

/// One request in a goal
///
/// Package targets may be a name, a capability (`libfoo >= 2`), a file path,
/// a NEVRA or a glob over names (`*` with upgrade means everything
/// installed). Module targets are `name[:stream]` specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalJob {
    pub kind: JobKind,
    pub target: String,
    /// Strict jobs fail the goal; lenient ones are dropped with a warning
    pub strict: bool,
}

impl GoalJob {
    pub fn new(kind: JobKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            strict: true,
        }
    }

    pub fn install(target: impl Into<String>) -> Self {
        Self::new(JobKind::Install, target)
    }

    pub fn remove(target: impl Into<String>) -> Self {
        Self::new(JobKind::Remove, target)
    }

    pub fn upgrade(target: impl Into<String>) -> Self {
        Self::new(JobKind::Upgrade, target)
    }

    pub fn module_enable(spec: impl Into<String>) -> Self {
        Self::new(JobKind::ModuleEnable, spec)
    }

    pub fn module_disable(spec: impl Into<String>) -> Self {
        Self::new(JobKind::ModuleDisable, spec)
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

impl fmt::Display for GoalJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target)
    }
}

/// Lifecycle of a goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum GoalState {
    Built,
    Resolving,
    Resolved,
    Unresolvable,
}

/// An ordered set of jobs, resolved at most once
#[derive(Debug, Clone)]
pub struct Goal {
    jobs: Vec<GoalJob>,
    state: GoalState,
}

impl Default for Goal {
    fn default() -> Self {
        Self::new()
    }
}

impl Goal {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            state: GoalState::Built,
        }
    }

    pub fn from_jobs(jobs: impl IntoIterator<Item = GoalJob>) -> Self {
        Self {
            jobs: jobs.into_iter().collect(),
            state: GoalState::Built,
        }
    }

    /// Append a job; only possible before resolution
    pub fn push(&mut self, job: GoalJob) -> Result<(), GoalError> {
        if self.state != GoalState::Built {
            return Err(GoalError::AlreadyResolved);
        }
        self.jobs.push(job);
        Ok(())
    }

    pub fn jobs(&self) -> &[GoalJob] {
        &self.jobs
    }

    pub fn state(&self) -> GoalState {
        self.state
    }
}

/// Resolves goals against a snapshot, a module state and the installed set
pub struct GoalEngine<'a> {
    snapshot: &'a UniverseSnapshot,
    modules: &'a ModuleIndex,
    installed: &'a dyn InstalledDb,
    arch: String,
    solver: Box<dyn Solver>,
}

impl<'a> GoalEngine<'a> {
    pub fn new(
        snapshot: &'a UniverseSnapshot,
        modules: &'a ModuleIndex,
        installed: &'a dyn InstalledDb,
    ) -> Self {
        Self {
            snapshot,
            modules,
            installed,
            arch: std::env::consts::ARCH.to_string(),
            solver: Box::new(BacktrackingSolver::new()),
        }
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_solver(mut self, solver: impl Solver + 'static) -> Self {
        self.solver = Box::new(solver);
        self
    }

    /// Resolve a goal into a transaction
    ///
    /// A goal is consumed by its first resolution: later calls fail with
    /// [`GoalError::AlreadyResolved`]. Module state changes are returned in
    /// the transaction; commit them with [`ModuleIndex::apply`].
    pub fn resolve(
        &self,
        goal: &mut Goal,
        cancel: &CancellationToken,
    ) -> Result<Transaction, GoalError> {
        if goal.state != GoalState::Built {
            return Err(GoalError::AlreadyResolved);
        }
        goal.state = GoalState::Resolving;
        info!("Resolving goal with {} jobs", goal.jobs.len());

        let result = self.run(&goal.jobs, cancel);
        goal.state = match &result {
            Ok(_) => GoalState::Resolved,
            Err(_) => GoalState::Unresolvable,
        };
        result
    }

    fn run(&self, jobs: &[GoalJob], cancel: &CancellationToken) -> Result<Transaction, GoalError> {
        let mut warnings = Vec::new();
        check_cancel(cancel)?;

        let installed = self.installed.installed()?;

        // Phase 1: module jobs, on a working copy
        let mut modules = self.modules.clone();
        let mut module_jobs: HashMap<String, usize> = HashMap::new();
        for (idx, job) in jobs.iter().enumerate().filter(|(_, j)| j.kind.is_module()) {
            let before = modules.clone();
            match apply_module_job(&mut modules, job) {
                Ok(()) => {
                    for change in before.diff(&modules) {
                        module_jobs.entry(change.module).or_insert(idx);
                    }
                }
                Err(GoalError::Module(e @ ModuleError::StreamConflict { .. })) => {
                    return Err(e.into());
                }
                Err(e) if job.strict => return Err(e),
                Err(e) => skip(&mut warnings, format!("Skipping {job}: {e}")),
            }
        }
        let module_changes = self.modules.diff(&modules);
        check_cancel(cancel)?;

        // Phase 2: the pool of eligible packages
        let mut pool = Pool::new(self.arch.as_str());
        for record in &installed {
            pool.add(record, 0);
        }
        for slice in self.snapshot.slices() {
            for record in slice.packages() {
                if arch_compatible(&record.arch, &self.arch) && modules.is_package_eligible(record) {
                    pool.add(record, slice.priority());
                }
            }
        }
        debug!("Pool holds {} packages", pool.len());

        // Phase 3: jobs to rules
        let mut rules: Vec<JobRule> = Vec::new();
        let mut requested: HashMap<PkgId, usize> = HashMap::new();
        let mut erased: BTreeMap<PkgId, (usize, bool)> = BTreeMap::new();

        for (idx, job) in jobs.iter().enumerate() {
            let matched = match_target(&pool, &job.target);
            match job.kind {
                JobKind::ModuleEnable | JobKind::ModuleDisable => {}
                JobKind::Install => {
                    if matched.is_empty() {
                        let hint = self.filtered_hint(&modules, &job.target);
                        no_match(job, hint, &mut warnings)?;
                        continue;
                    }
                    let mut candidates = matched;
                    pool.prefer(&mut candidates, None);
                    for id in &candidates {
                        requested.entry(*id).or_insert(idx);
                    }
                    rules.push(JobRule {
                        job: idx,
                        description: job.to_string(),
                        rule: Rule::Require(candidates),
                    });
                }
                JobKind::Upgrade => {
                    let targets: Vec<PkgId> = matched
                        .iter()
                        .copied()
                        .filter(|id| pool.get(*id).is_installed())
                        .collect();
                    if targets.is_empty() {
                        if is_glob(&job.target) {
                            debug!("Nothing installed matches {}", job.target);
                        } else {
                            let hint = (!matched.is_empty())
                                .then(|| "package is not installed".to_string())
                                .or_else(|| self.filtered_hint(&modules, &job.target));
                            no_match(job, hint, &mut warnings)?;
                        }
                        continue;
                    }
                    for target in targets {
                        let candidates = upgrade_candidates(&pool, target);
                        if candidates.is_empty() {
                            debug!("{} is already the newest version", pool.get(target));
                            continue;
                        }
                        for id in &candidates {
                            requested.entry(*id).or_insert(idx);
                        }
                        rules.push(JobRule {
                            job: idx,
                            description: format!("upgrade {}", pool.get(target)),
                            rule: Rule::Require(candidates),
                        });
                    }
                }
                JobKind::Remove => {
                    let targets: Vec<PkgId> = matched
                        .iter()
                        .copied()
                        .filter(|id| pool.get(*id).is_installed())
                        .collect();
                    if targets.is_empty() {
                        let hint = (!matched.is_empty()).then(|| "package is not installed".to_string());
                        no_match(job, hint, &mut warnings)?;
                        continue;
                    }
                    let dependents = erase_closure(&pool, &targets);
                    for id in &targets {
                        erased.entry(*id).or_insert((idx, true));
                    }
                    for id in &dependents {
                        erased.entry(*id).or_insert((idx, false));
                    }
                    let mut forbidden = targets;
                    forbidden.extend(dependents);
                    rules.push(JobRule {
                        job: idx,
                        description: job.to_string(),
                        rule: Rule::Forbid(forbidden),
                    });
                }
            }
        }

        // Installed artifacts of a stream that was switched away follow the new stream
        for id in pool.installed() {
            let record = pool.get(id);
            let old = self.modules.streams_of(record);
            if old.is_empty() || old.iter().any(|s| modules.is_active(s)) {
                continue;
            }
            let Some(job) = old.iter().find_map(|s| module_jobs.get(&s.name)).copied() else {
                continue;
            };
            let candidates: Vec<PkgId> = pool
                .alternatives(id)
                .into_iter()
                .filter(|c| modules.streams_of(pool.get(*c)).iter().any(|s| modules.is_active(s)))
                .collect();
            if candidates.is_empty() {
                continue;
            }
            rules.push(JobRule {
                job,
                description: format!("switch {record} to the enabled stream"),
                rule: Rule::Require(candidates),
            });
        }
        check_cancel(cancel)?;

        // Phase 4: solve, dropping lenient jobs that take part in a conflict
        let mut active = vec![true; jobs.len()];
        let selection = loop {
            let current = active_rules(&rules, &active);
            match self.solver.solve(&pool, &current, cancel) {
                Ok(selection) => break selection,
                Err(SolveError::Cancelled) => return Err(GoalError::Cancelled),
                Err(SolveError::Unsatisfiable(_)) => {
                    let (core, problems) = self.minimal_core(&pool, &rules, &active, cancel)?;
                    let lenient: Vec<usize> = core.iter().copied().filter(|j| !jobs[*j].strict).collect();
                    if lenient.is_empty() {
                        for problem in &problems {
                            warn!("Problem: {}", problem);
                        }
                        return Err(GoalError::Unresolvable(problems));
                    }
                    for j in lenient {
                        active[j] = false;
                        skip(&mut warnings, format!("Skipping {}: it conflicts with other jobs", jobs[j]));
                    }
                }
            }
        };
        check_cancel(cancel)?;

        // Phase 5: the transaction
        let mut transaction = build_transaction(&pool, &selection, &requested, &erased);
        transaction.module_changes = module_changes;
        warnings.append(&mut transaction.warnings);
        transaction.warnings = warnings;
        info!("Resolved goal into {} package actions", transaction.len());
        Ok(transaction)
    }

    /// Smallest set of active jobs that is still unsatisfiable
    ///
    /// Deletion based: a job stays in the core only if the rest solves
    /// without it. The problems returned come from solving the core alone.
    fn minimal_core(
        &self,
        pool: &Pool<'_>,
        rules: &[JobRule],
        active: &[bool],
        cancel: &CancellationToken,
    ) -> Result<(Vec<usize>, Vec<Problem>), GoalError> {
        let mut core: BTreeSet<usize> = rules.iter().map(|r| r.job).filter(|j| active[*j]).collect();
        let candidates: Vec<usize> = core.iter().copied().collect();

        for job in candidates {
            let mut trial = vec![false; active.len()];
            for j in core.iter().filter(|j| **j != job) {
                trial[*j] = true;
            }
            match self.solver.solve(pool, &active_rules(rules, &trial), cancel) {
                Ok(_) => {}
                Err(SolveError::Unsatisfiable(_)) => {
                    core.remove(&job);
                }
                Err(SolveError::Cancelled) => return Err(GoalError::Cancelled),
            }
        }

        let mut mask = vec![false; active.len()];
        for j in &core {
            mask[*j] = true;
        }
        let problems = match self.solver.solve(pool, &active_rules(rules, &mask), cancel) {
            Err(SolveError::Unsatisfiable(problems)) => problems,
            Err(SolveError::Cancelled) => return Err(GoalError::Cancelled),
            Ok(_) => Vec::new(),
        };
        debug!("Conflicting job core: {:?}", core);
        Ok((core.into_iter().collect(), problems))
    }

    /// Why a target exists in the universe but not in the pool
    fn filtered_hint(&self, modules: &ModuleIndex, target: &str) -> Option<String> {
        let named = self.snapshot.find_by_name(target);
        if named.is_empty() {
            return None;
        }
        let compatible: Vec<&PackageRecord> = named
            .into_iter()
            .filter(|r| arch_compatible(&r.arch, &self.arch))
            .collect();
        if compatible.is_empty() {
            return Some(format!("no package for architecture {}", self.arch));
        }
        if compatible.iter().all(|r| !modules.is_package_eligible(r)) {
            return Some("all matches were filtered out by modular filtering".to_string());
        }
        None
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), GoalError> {
    if cancel.is_cancelled() {
        return Err(GoalError::Cancelled);
    }
    Ok(())
}

fn skip(warnings: &mut Vec<String>, message: String) {
    warn!("{}", message);
    warnings.push(message);
}

fn no_match(job: &GoalJob, hint: Option<String>, warnings: &mut Vec<String>) -> Result<(), GoalError> {
    if job.strict {
        return Err(GoalError::NoMatch {
            target: job.target.clone(),
            hint,
        });
    }
    let message = match hint {
        Some(hint) => format!("No match for argument: {} ({hint})", job.target),
        None => format!("No match for argument: {}", job.target),
    };
    skip(warnings, message);
    Ok(())
}

fn apply_module_job(modules: &mut ModuleIndex, job: &GoalJob) -> Result<(), GoalError> {
    let spec = ModuleSpec::parse(&job.target)?;
    if !modules.contains_module(&spec.name) {
        return Err(ModuleError::UnknownModule(spec.name).into());
    }
    match job.kind {
        JobKind::ModuleEnable => {
            let stream = match spec.stream {
                Some(stream) => stream,
                None => {
                    let streams = modules.module_streams(&spec.name);
                    let distinct: BTreeSet<&str> = streams.iter().map(|s| s.stream.as_str()).collect();
                    let only = match distinct.len() {
                        1 => distinct.first().map(|s| s.to_string()),
                        _ => None,
                    };
                    modules
                        .enabled_stream(&spec.name)
                        .map(str::to_string)
                        .or_else(|| modules.default_stream(&spec.name))
                        .or(only)
                        .ok_or_else(|| GoalError::NoMatch {
                            target: job.target.clone(),
                            hint: Some("module has no default stream, specify one".to_string()),
                        })?
                }
            };
            modules.enable(&spec.name, &stream)?;
        }
        JobKind::ModuleDisable => modules.disable(&spec.name)?,
        _ => {}
    }
    Ok(())
}

fn is_glob(target: &str) -> bool {
    target.contains(['*', '?', '['])
}

/// Pool packages a job target refers to
fn match_target(pool: &Pool<'_>, target: &str) -> Vec<PkgId> {
    let target = target.trim();
    if is_glob(target) {
        let Ok(pattern) = glob::Pattern::new(target) else {
            return Vec::new();
        };
        let paths = target.starts_with('/');
        return pool
            .ids()
            .filter(|id| {
                let record = pool.get(*id);
                if paths {
                    record.files.iter().any(|f| pattern.matches(f))
                } else {
                    pattern.matches(&record.name)
                }
            })
            .collect();
    }
    if target.starts_with('/') {
        return pool.providers(&Capability::named(target));
    }

    let named = pool.by_name(target);
    if !named.is_empty() {
        return named.to_vec();
    }
    if let Ok(cap) = Capability::parse(target) {
        let providers = pool.providers(&cap);
        if !providers.is_empty() {
            return providers;
        }
    }
    match Nevra::parse(target) {
        Some(nevra) => pool.ids().filter(|id| nevra.matches(pool.get(*id))).collect(),
        None => Vec::new(),
    }
}

/// Newer versions of an installed package, then packages obsoleting it
fn upgrade_candidates(pool: &Pool<'_>, installed: PkgId) -> Vec<PkgId> {
    let current = pool.get(installed);
    let mut candidates: Vec<PkgId> = pool
        .alternatives(installed)
        .into_iter()
        .filter(|c| pool.get(*c).evr > current.evr)
        .collect();
    let mut obsoleters: Vec<PkgId> = pool
        .ids()
        .filter(|c| {
            let record = pool.get(*c);
            !record.is_installed() && record.obsoletes_package(current).is_some()
        })
        .collect();
    pool.prefer(&mut obsoleters, None);
    candidates.extend(obsoleters);
    candidates
}

/// Installed packages left with an unprovided requirement once `targets` go
fn erase_closure(pool: &Pool<'_>, targets: &[PkgId]) -> Vec<PkgId> {
    let installed = pool.installed();
    let mut removed: BTreeSet<PkgId> = targets.iter().copied().collect();

    loop {
        let mut added = false;
        for &id in &installed {
            if removed.contains(&id) {
                continue;
            }
            let record = pool.get(id);
            let broken = record.requires.iter().any(|req| {
                if record.provides_capability(req) {
                    return false;
                }
                let providers: Vec<PkgId> = installed
                    .iter()
                    .copied()
                    .filter(|p| *p != id && pool.get(*p).provides_capability(req))
                    .collect();
                !providers.is_empty() && providers.iter().all(|p| removed.contains(p))
            });
            if broken {
                debug!("{} would lose a requirement and is removed too", record);
                removed.insert(id);
                added = true;
            }
        }
        if !added {
            break;
        }
    }

    removed.into_iter().filter(|id| !targets.contains(id)).collect()
}

fn active_rules(rules: &[JobRule], active: &[bool]) -> Vec<JobRule> {
    rules.iter().filter(|r| active[r.job]).cloned().collect()
}

fn build_transaction(
    pool: &Pool<'_>,
    selection: &BTreeSet<PkgId>,
    requested: &HashMap<PkgId, usize>,
    erased: &BTreeMap<PkgId, (usize, bool)>,
) -> Transaction {
    let installed = pool.installed();
    let mut installs: Vec<(TransactionPackage, &PackageRecord, (usize, String))> = Vec::new();
    let mut erasures: Vec<(TransactionPackage, &PackageRecord, (usize, String))> = Vec::new();

    for &id in selection {
        let record = pool.get(id);
        if record.is_installed() {
            continue;
        }
        let replaced = installed
            .iter()
            .copied()
            .find(|i| !selection.contains(i) && pool.same_slot(*i, id));
        let action = match replaced {
            None => Action::Install,
            Some(old) => match record.evr.cmp(&pool.get(old).evr) {
                Ordering::Greater => Action::Upgrade,
                Ordering::Less => Action::Downgrade,
                Ordering::Equal => Action::Reinstall,
            },
        };
        let job = requested.get(&id).copied();
        let entry = TransactionPackage {
            package: record.id(),
            action,
            reason: if job.is_some() {
                Reason::UserRequested
            } else {
                Reason::Dependency
            },
            replaces: replaced.map(|old| pool.get(old).id()),
            obsoleted_by: None,
            order: 0,
        };
        installs.push((entry, record, (job.unwrap_or(usize::MAX), record.name.clone())));
    }

    for &id in &installed {
        if selection.contains(&id) || selection.iter().any(|s| pool.same_slot(*s, id)) {
            continue;
        }
        let record = pool.get(id);
        let obsoleter = selection
            .iter()
            .copied()
            .find(|s| pool.get(*s).obsoletes_package(record).is_some());
        let entry = match obsoleter {
            Some(by) => TransactionPackage {
                package: record.id(),
                action: Action::Obsoleted,
                reason: Reason::Obsoletes,
                replaces: None,
                obsoleted_by: Some(pool.get(by).id()),
                order: 0,
            },
            None => TransactionPackage {
                package: record.id(),
                action: Action::Erase,
                reason: match erased.get(&id) {
                    Some((_, true)) => Reason::UserRequested,
                    _ => Reason::Dependency,
                },
                replaces: None,
                obsoleted_by: None,
                order: 0,
            },
        };
        let job = erased.get(&id).map(|(job, _)| *job).unwrap_or(usize::MAX);
        erasures.push((entry, record, (job, record.name.clone())));
    }

    let mut tx = Transaction::default();
    for (phase, dependents_first) in [(installs, false), (erasures, true)] {
        let records: Vec<&PackageRecord> = phase.iter().map(|(_, r, _)| *r).collect();
        let keys: Vec<(usize, String)> = phase.iter().map(|(_, _, k)| k.clone()).collect();
        let (order, mut warnings) = transaction::order_phase(&records, &keys, dependents_first);
        let mut entries: Vec<Option<TransactionPackage>> = phase.into_iter().map(|(e, _, _)| Some(e)).collect();
        for idx in order {
            if let Some(mut entry) = entries[idx].take() {
                entry.order = tx.packages.len();
                tx.packages.push(entry);
            }
        }
        tx.warnings.append(&mut warnings);
    }
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installed::InstalledSet;
    use crate::universe::{RepoContent, RepoSlice};
    use crate::version::RpmVersion;

    fn pkg(name: &str, evr: &str) -> PackageRecord {
        PackageRecord::new(name, RpmVersion::parse(evr).unwrap(), "x86_64", "fedora")
    }

    fn snapshot(packages: Vec<PackageRecord>) -> UniverseSnapshot {
        UniverseSnapshot::from_slices(vec![RepoSlice::new(
            "fedora",
            99,
            RepoContent {
                packages,
                ..Default::default()
            },
        )])
    }

    #[test]
    fn test_goal_is_consumed_once() {
        let snap = snapshot(vec![pkg("A", "1-1")]);
        let modules = ModuleIndex::from_snapshot(snap.clone());
        let installed = InstalledSet::new();
        let engine = GoalEngine::new(&snap, &modules, &installed).with_arch("x86_64");

        let mut goal = Goal::from_jobs([GoalJob::install("A")]);
        let tx = engine.resolve(&mut goal, &CancellationToken::new()).unwrap();
        assert_eq!(tx.len(), 1);
        assert_eq!(goal.state(), GoalState::Resolved);

        let err = engine.resolve(&mut goal, &CancellationToken::new()).unwrap_err();
        assert_eq!(err, GoalError::AlreadyResolved);
        assert!(goal.push(GoalJob::install("B")).is_err());
    }

    #[test]
    fn test_upgrade_all() {
        let snap = snapshot(vec![pkg("A", "2-1"), pkg("B", "1-1")]);
        let modules = ModuleIndex::from_snapshot(snap.clone());
        let installed = InstalledSet::from_records([pkg("A", "1-1"), pkg("B", "1-1")]);
        let engine = GoalEngine::new(&snap, &modules, &installed).with_arch("x86_64");

        let mut goal = Goal::from_jobs([GoalJob::upgrade("*")]);
        let tx = engine.resolve(&mut goal, &CancellationToken::new()).unwrap();
        assert_eq!(tx.len(), 1);
        let a = tx.find("A").unwrap();
        assert_eq!(a.action, Action::Upgrade);
        assert_eq!(a.reason, Reason::UserRequested);
        assert_eq!(a.replaces.as_ref().unwrap().evr.to_string(), "1-1");
    }

    #[test]
    fn test_lenient_no_match_is_a_warning() {
        let snap = snapshot(vec![pkg("A", "1-1")]);
        let modules = ModuleIndex::from_snapshot(snap.clone());
        let installed = InstalledSet::new();
        let engine = GoalEngine::new(&snap, &modules, &installed).with_arch("x86_64");

        let mut goal = Goal::from_jobs([
            GoalJob::install("A"),
            GoalJob::install("missing").with_strict(false),
        ]);
        let tx = engine.resolve(&mut goal, &CancellationToken::new()).unwrap();
        assert_eq!(tx.len(), 1);
        assert_eq!(tx.warnings, vec!["No match for argument: missing"]);

        let mut goal = Goal::from_jobs([GoalJob::install("missing")]);
        let err = engine.resolve(&mut goal, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, GoalError::NoMatch { ref target, .. } if target == "missing"));
        assert_eq!(goal.state(), GoalState::Unresolvable);
    }

    #[test]
    fn test_remove_takes_dependents() {
        let lib = pkg("libfoo", "1-1");
        let mut app = pkg("app", "1-1");
        app.requires.push(Capability::named("libfoo"));
        let snap = snapshot(Vec::new());
        let modules = ModuleIndex::from_snapshot(snap.clone());
        let installed = InstalledSet::from_records([lib, app]);
        let engine = GoalEngine::new(&snap, &modules, &installed).with_arch("x86_64");

        let mut goal = Goal::from_jobs([GoalJob::remove("libfoo")]);
        let tx = engine.resolve(&mut goal, &CancellationToken::new()).unwrap();
        assert_eq!(tx.len(), 2);
        assert_eq!(tx.find("libfoo").unwrap().reason, Reason::UserRequested);
        assert_eq!(tx.find("app").unwrap().reason, Reason::Dependency);
        // Dependents go first
        assert!(tx.position("app").unwrap() < tx.position("libfoo").unwrap());
    }

    #[test]
    fn test_cancelled_before_start() {
        let snap = snapshot(vec![pkg("A", "1-1")]);
        let modules = ModuleIndex::from_snapshot(snap.clone());
        let installed = InstalledSet::new();
        let engine = GoalEngine::new(&snap, &modules, &installed).with_arch("x86_64");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut goal = Goal::from_jobs([GoalJob::install("A")]);
        assert_eq!(engine.resolve(&mut goal, &cancel).unwrap_err(), GoalError::Cancelled);
    }
}
