// src/goal/solver.rs

//! Dependency solver
//!
//! The solver picks a set of packages from a [`Pool`] such that every job
//! rule holds, every requirement of a picked package is provided by another
//! picked package, no two picked packages conflict, at most one version of a
//! package is picked, and every installed package is either kept, replaced by
//! another version, obsoleted, or explicitly forbidden.
//!
//! [`BacktrackingSolver`] works through these obligations depth first,
//! trying candidates best first, and is fully deterministic for a given pool.
//!
//! Each search frame collects the reasons its candidates were rejected. The
//! reasons reach the caller only when every candidate of the frame has
//! failed, so a failed solve reports the rejections along the branches that
//! were exhausted. That can still name rules from several branches; the goal
//! engine narrows it down by solving the minimal conflicting job set alone.

use super::pool::{PkgId, Pool};
use super::problem::Problem;
use crate::version::Capability;
use std::collections::{BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Steps after which the backtracking search gives up
pub const DEFAULT_MAX_STEPS: usize = 1_000_000;

/// One constraint contributed by a job
#[derive(Debug, Clone)]
pub enum Rule {
    /// At least one of these packages must be picked
    Require(Vec<PkgId>),
    /// None of these packages may be picked
    Forbid(Vec<PkgId>),
}

/// A rule tagged with the job it came from
#[derive(Debug, Clone)]
pub struct JobRule {
    pub job: usize,
    pub description: String,
    pub rule: Rule,
}

/// Why a solve failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveError {
    /// Rejections from every exhausted branch, sorted
    Unsatisfiable(Vec<Problem>),
    Cancelled,
}

/// Strategy seam for dependency solving
pub trait Solver: Send + Sync {
    /// Pick packages satisfying `rules`, or explain why that is impossible
    fn solve(
        &self,
        pool: &Pool<'_>,
        rules: &[JobRule],
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<PkgId>, SolveError>;
}

/// Deterministic depth-first solver
#[derive(Debug, Clone)]
pub struct BacktrackingSolver {
    max_steps: usize,
}

impl Default for BacktrackingSolver {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl BacktrackingSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

impl Solver for BacktrackingSolver {
    fn solve(
        &self,
        pool: &Pool<'_>,
        rules: &[JobRule],
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<PkgId>, SolveError> {
        Search::new(pool, rules, cancel, self.max_steps).run()
    }
}

#[derive(Debug, Clone)]
enum Obligation {
    Job {
        description: String,
        candidates: Vec<PkgId>,
    },
    Requires {
        package: PkgId,
        capability: Capability,
        candidates: Vec<PkgId>,
    },
    Keep {
        package: PkgId,
        candidates: Vec<PkgId>,
    },
}

impl Obligation {
    fn candidates(&self) -> &[PkgId] {
        match self {
            Obligation::Job { candidates, .. }
            | Obligation::Requires { candidates, .. }
            | Obligation::Keep { candidates, .. } => candidates,
        }
    }
}

struct Frame {
    pos: usize,
    candidates: Vec<PkgId>,
    next: usize,
    mark: usize,
    chosen: Option<PkgId>,
    /// Rejections seen here and in exhausted child frames
    problems: BTreeSet<Problem>,
}

struct Search<'s, 'a> {
    pool: &'s Pool<'a>,
    cancel: &'s CancellationToken,
    selected: Vec<bool>,
    forbidden: Vec<bool>,
    picked: Vec<PkgId>,
    slots: HashMap<(&'a str, &'a str), PkgId>,
    agenda: Vec<Obligation>,
    /// Rejections committed by exhausted root frames
    problems: BTreeSet<Problem>,
    steps: usize,
    max_steps: usize,
}

impl<'s, 'a> Search<'s, 'a> {
    fn new(
        pool: &'s Pool<'a>,
        rules: &[JobRule],
        cancel: &'s CancellationToken,
        max_steps: usize,
    ) -> Self {
        let mut forbidden = vec![false; pool.len()];
        let mut agenda = Vec::new();

        for rule in rules {
            match &rule.rule {
                Rule::Forbid(targets) => {
                    for id in targets {
                        forbidden[*id] = true;
                    }
                }
                Rule::Require(candidates) => agenda.push(Obligation::Job {
                    description: rule.description.clone(),
                    candidates: candidates.clone(),
                }),
            }
        }

        // Installed packages are visited after the jobs so that a job may
        // replace or obsolete them first
        for id in pool.installed() {
            if forbidden[id] {
                continue;
            }
            let mut candidates = vec![id];
            candidates.extend(pool.alternatives(id));
            agenda.push(Obligation::Keep {
                package: id,
                candidates,
            });
        }

        Self {
            pool,
            cancel,
            selected: vec![false; pool.len()],
            forbidden,
            picked: Vec::new(),
            slots: HashMap::new(),
            agenda,
            problems: BTreeSet::new(),
            steps: 0,
            max_steps,
        }
    }

    fn run(mut self) -> Result<BTreeSet<PkgId>, SolveError> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut pos = 0;

        loop {
            while pos < self.agenda.len() && self.satisfied(&self.agenda[pos]) {
                pos += 1;
            }
            if pos == self.agenda.len() {
                debug!(
                    "Solved with {} packages after {} steps",
                    self.picked.len(),
                    self.steps
                );
                return Ok(self.picked.iter().copied().collect());
            }

            let mut problems = BTreeSet::new();
            if self.agenda[pos].candidates().is_empty() {
                problems.insert(self.unsatisfiable(&self.agenda[pos]));
            }
            stack.push(Frame {
                pos,
                candidates: self.agenda[pos].candidates().to_vec(),
                next: 0,
                mark: self.agenda.len(),
                chosen: None,
                problems,
            });

            // Pick the next viable candidate, backtracking through exhausted frames
            pos = loop {
                self.tick()?;
                let Some(frame) = stack.last_mut() else {
                    return Err(SolveError::Unsatisfiable(self.problems.into_iter().collect()));
                };
                if let Some(chosen) = frame.chosen.take() {
                    self.unselect(chosen);
                    self.agenda.truncate(frame.mark);
                }

                let mut next = None;
                while frame.next < frame.candidates.len() {
                    let candidate = frame.candidates[frame.next];
                    frame.next += 1;
                    match self.blocker(candidate) {
                        Some(problem) => {
                            trace!("Candidate {} blocked: {}", self.pool.get(candidate), problem);
                            frame.problems.insert(problem);
                        }
                        None => {
                            next = Some(candidate);
                            break;
                        }
                    }
                }

                match next {
                    Some(candidate) => {
                        frame.chosen = Some(candidate);
                        let resume = frame.pos + 1;
                        self.select(candidate);
                        break resume;
                    }
                    None => {
                        let failed = frame.pos;
                        let mut reasons = std::mem::take(&mut frame.problems);
                        stack.pop();
                        reasons.extend(self.exhausted(&self.agenda[failed]));
                        match stack.last_mut() {
                            Some(parent) => parent.problems.append(&mut reasons),
                            None => self.problems.append(&mut reasons),
                        }
                    }
                }
            };
        }
    }

    fn tick(&mut self) -> Result<(), SolveError> {
        self.steps += 1;
        if self.steps % 256 == 0 && self.cancel.is_cancelled() {
            return Err(SolveError::Cancelled);
        }
        if self.steps > self.max_steps {
            self.problems.insert(Problem::SearchLimit {
                steps: self.max_steps,
            });
            return Err(SolveError::Unsatisfiable(
                std::mem::take(&mut self.problems).into_iter().collect(),
            ));
        }
        Ok(())
    }

    fn satisfied(&self, obligation: &Obligation) -> bool {
        match obligation {
            Obligation::Job { candidates, .. } | Obligation::Requires { candidates, .. } => {
                candidates.iter().any(|c| self.selected[*c])
            }
            Obligation::Keep { package, .. } => {
                let pkg = self.pool.get(*package);
                self.selected[*package]
                    || self.slots.contains_key(&(pkg.name.as_str(), pkg.arch.as_str()))
                    || self
                        .picked
                        .iter()
                        .any(|p| self.pool.get(*p).obsoletes_package(pkg).is_some())
            }
        }
    }

    /// The rule that stops `candidate` from joining the current selection
    fn blocker(&self, candidate: PkgId) -> Option<Problem> {
        let pool = self.pool;
        let pkg = pool.get(candidate);

        if self.forbidden[candidate] {
            return Some(Problem::Erased {
                package: pkg.to_string(),
            });
        }
        if let Some(&other) = self.slots.get(&(pkg.name.as_str(), pkg.arch.as_str())) {
            return Some(Problem::OnlyOneVersion {
                selected: pool.get(other).to_string(),
                candidate: pkg.to_string(),
            });
        }

        for &id in &self.picked {
            let other = pool.get(id);
            if let Some(cap) = pkg.conflicts_with(other) {
                return Some(Problem::Conflict {
                    package: pkg.to_string(),
                    capability: cap.to_string(),
                    with: other.to_string(),
                });
            }
            if let Some(cap) = other.conflicts_with(pkg) {
                return Some(Problem::Conflict {
                    package: other.to_string(),
                    capability: cap.to_string(),
                    with: pkg.to_string(),
                });
            }
            if pkg.obsoletes_package(other).is_some() {
                return Some(Problem::Obsoletes {
                    package: pkg.to_string(),
                    obsoleted: other.to_string(),
                });
            }
            if other.obsoletes_package(pkg).is_some() {
                return Some(Problem::Obsoletes {
                    package: other.to_string(),
                    obsoleted: pkg.to_string(),
                });
            }
        }
        None
    }

    fn select(&mut self, id: PkgId) {
        let pkg = self.pool.get(id);
        self.selected[id] = true;
        self.picked.push(id);
        self.slots.insert((pkg.name.as_str(), pkg.arch.as_str()), id);
        let requirements = self.requirements(id);
        self.agenda.extend(requirements);
    }

    fn unselect(&mut self, id: PkgId) {
        let pkg = self.pool.get(id);
        self.selected[id] = false;
        if self.picked.last() == Some(&id) {
            self.picked.pop();
        } else {
            self.picked.retain(|p| *p != id);
        }
        self.slots.remove(&(pkg.name.as_str(), pkg.arch.as_str()));
    }

    fn requirements(&self, id: PkgId) -> Vec<Obligation> {
        let pkg = self.pool.get(id);
        let mut obligations = Vec::new();
        for req in &pkg.requires {
            if req.name.starts_with("rpmlib(") || pkg.provides_capability(req) {
                continue;
            }
            let mut candidates = self.pool.providers(req);
            if candidates.is_empty() && pkg.is_installed() {
                debug!("Ignoring unprovided requirement {} of installed {}", req, pkg);
                continue;
            }
            self.pool.prefer(&mut candidates, Some(&req.name));
            obligations.push(Obligation::Requires {
                package: id,
                capability: req.clone(),
                candidates,
            });
        }
        obligations
    }

    fn unsatisfiable(&self, obligation: &Obligation) -> Problem {
        match obligation {
            Obligation::Requires {
                package,
                capability,
                ..
            } => Problem::NothingProvides {
                requirement: capability.to_string(),
                required_by: self.pool.get(*package).to_string(),
            },
            Obligation::Job { description, .. } => Problem::Job {
                job: description.clone(),
            },
            Obligation::Keep { package, .. } => Problem::KeepInstalled {
                package: self.pool.get(*package).to_string(),
            },
        }
    }

    fn exhausted(&self, obligation: &Obligation) -> Option<Problem> {
        match obligation {
            // The blockers recorded for each provider already explain it
            Obligation::Requires { .. } => None,
            other => Some(self.unsatisfiable(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::{PackageRecord, SYSTEM_REPO};
    use crate::version::RpmVersion;

    fn pkg(name: &str, evr: &str, repo: &str) -> PackageRecord {
        PackageRecord::new(name, RpmVersion::parse(evr).unwrap(), "x86_64", repo)
    }

    fn require(job: usize, candidates: Vec<PkgId>) -> JobRule {
        JobRule {
            job,
            description: format!("job {job}"),
            rule: Rule::Require(candidates),
        }
    }

    #[test]
    fn test_requirements_pulled_in() {
        let mut a = pkg("A", "1-1", "fedora");
        a.requires.push(Capability::named("libfoo"));
        let mut b = pkg("B", "1-1", "fedora");
        b.provides.push(Capability::named("libfoo"));

        let mut pool = Pool::new("x86_64");
        let ia = pool.add(&a, 99);
        let ib = pool.add(&b, 99);

        let solved = BacktrackingSolver::new()
            .solve(&pool, &[require(0, vec![ia])], &CancellationToken::new())
            .unwrap();
        assert_eq!(solved, BTreeSet::from([ia, ib]));
    }

    #[test]
    fn test_backtracks_past_conflicting_provider() {
        let mut app = pkg("app", "1-1", "fedora");
        app.requires.push(Capability::named("mta"));
        let mut exim = pkg("exim", "4-1", "fedora");
        exim.provides.push(Capability::named("mta"));
        exim.conflicts.push(Capability::named("tool"));
        let mut postfix = pkg("postfix", "3-1", "fedora");
        postfix.provides.push(Capability::named("mta"));
        let tool = pkg("tool", "1-1", SYSTEM_REPO);

        let mut pool = Pool::new("x86_64");
        let it = pool.add(&tool, 0);
        let ia = pool.add(&app, 99);
        let _ie = pool.add(&exim, 99);
        let ip = pool.add(&postfix, 99);

        let solved = BacktrackingSolver::new()
            .solve(&pool, &[require(0, vec![ia])], &CancellationToken::new())
            .unwrap();
        assert_eq!(solved, BTreeSet::from([it, ia, ip]));
    }

    #[test]
    fn test_conflict_with_installed_is_reported() {
        let mut c = pkg("C", "1-1", "fedora");
        c.conflicts.push(Capability::named("D"));
        let d = pkg("D", "1-1", SYSTEM_REPO);

        let mut pool = Pool::new("x86_64");
        let _id = pool.add(&d, 0);
        let ic = pool.add(&c, 99);

        let err = BacktrackingSolver::new()
            .solve(&pool, &[require(0, vec![ic])], &CancellationToken::new())
            .unwrap_err();
        let SolveError::Unsatisfiable(problems) = err else {
            panic!("expected unsatisfiable");
        };
        assert!(problems.contains(&Problem::Conflict {
            package: "C-1-1.x86_64".to_string(),
            capability: "D".to_string(),
            with: "D-1-1.x86_64".to_string(),
        }));
        assert!(problems.contains(&Problem::Job {
            job: "job 0".to_string()
        }));
    }

    #[test]
    fn test_nothing_provides() {
        let mut a = pkg("A", "1-1", "fedora");
        a.requires.push(Capability::parse("libmissing >= 2").unwrap());
        let mut pool = Pool::new("x86_64");
        let ia = pool.add(&a, 99);

        let err = BacktrackingSolver::new()
            .solve(&pool, &[require(0, vec![ia])], &CancellationToken::new())
            .unwrap_err();
        assert_eq!(
            err,
            SolveError::Unsatisfiable(vec![
                Problem::NothingProvides {
                    requirement: "libmissing >= 2".to_string(),
                    required_by: "A-1-1.x86_64".to_string(),
                },
                Problem::Job {
                    job: "job 0".to_string()
                },
            ])
        );
    }

    #[test]
    fn test_rejections_of_open_frames_are_not_reported() {
        let x1 = pkg("X", "2-1", "fedora");
        let mut x2 = pkg("X", "1-1", "fedora");
        x2.requires.push(Capability::named("libz"));
        let mut z = pkg("zlib", "1-1", "fedora");
        z.provides.push(Capability::named("libz"));

        let mut pool = Pool::new("x86_64");
        let ix1 = pool.add(&x1, 99);
        let ix2 = pool.add(&x2, 99);
        let _iz = pool.add(&z, 99);
        let rules = [
            JobRule {
                job: 0,
                description: "remove X-2-1".to_string(),
                rule: Rule::Forbid(vec![ix1]),
            },
            require(1, vec![ix1, ix2]),
        ];

        // X-2-1 is rejected, X-1-1 is still being explored when the limit hits
        let err = BacktrackingSolver::new()
            .with_max_steps(1)
            .solve(&pool, &rules, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(
            err,
            SolveError::Unsatisfiable(vec![Problem::SearchLimit { steps: 1 }])
        );
    }

    #[test]
    fn test_forbid_and_obsolete() {
        let old = pkg("oldtool", "1-1", SYSTEM_REPO);
        let mut new = pkg("newtool", "2-1", "fedora");
        new.obsoletes.push(Capability::named("oldtool"));
        let keep = pkg("keep", "1-1", SYSTEM_REPO);

        let mut pool = Pool::new("x86_64");
        let _io = pool.add(&old, 0);
        let ik = pool.add(&keep, 0);
        let inew = pool.add(&new, 99);

        let solved = BacktrackingSolver::new()
            .solve(&pool, &[require(0, vec![inew])], &CancellationToken::new())
            .unwrap();
        assert_eq!(solved, BTreeSet::from([ik, inew]));

        let forbid = JobRule {
            job: 0,
            description: "remove keep".to_string(),
            rule: Rule::Forbid(vec![ik]),
        };
        let solved = BacktrackingSolver::new()
            .solve(&pool, &[forbid], &CancellationToken::new())
            .unwrap();
        assert!(!solved.contains(&ik));
    }
}
