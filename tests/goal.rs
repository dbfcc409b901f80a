// tests/goal.rs

//! Goal resolution tests: dependency ordering, conflicts, obsoletes,
//! lenient jobs, module stream switches and match hints.

mod common;

use common::{Pkg, module_stream, snapshot};
use pkgcore::module::{ModuleChange, ModuleState};
use pkgcore::{
    Action, Goal, GoalEngine, GoalError, GoalJob, GoalState, InstalledSet, ModuleError, ModuleIndex, Problem,
    Reason, UniverseSnapshot,
};
use tokio_util::sync::CancellationToken;

fn resolve(
    snap: &UniverseSnapshot,
    installed: &InstalledSet,
    jobs: Vec<GoalJob>,
) -> (Goal, Result<pkgcore::Transaction, GoalError>) {
    let modules = ModuleIndex::from_snapshot(snap.clone());
    let engine = GoalEngine::new(snap, &modules, installed).with_arch("x86_64");
    let mut goal = Goal::from_jobs(jobs);
    let result = engine.resolve(&mut goal, &CancellationToken::new());
    (goal, result)
}

#[test]
fn test_dependency_installed_first() {
    let snap = snapshot(
        "fedora",
        vec![
            Pkg::new("A", "1-1").requires("libfoo").build(),
            Pkg::new("B", "1-1").provides("libfoo").build(),
        ],
        Vec::new(),
    );
    let (goal, result) = resolve(&snap, &InstalledSet::new(), vec![GoalJob::install("A")]);
    let tx = result.unwrap();

    assert_eq!(goal.state(), GoalState::Resolved);
    assert_eq!(tx.len(), 2);
    assert_eq!(tx.position("B"), Some(0));
    assert_eq!(tx.position("A"), Some(1));
    assert_eq!(tx.find("A").unwrap().reason, Reason::UserRequested);
    assert_eq!(tx.find("B").unwrap().reason, Reason::Dependency);
    assert!(tx.installs().all(|p| p.action == Action::Install));
}

#[test]
fn test_conflict_with_installed_package() {
    let snap = snapshot("fedora", vec![Pkg::new("C", "1-1").conflicts("D").build()], Vec::new());
    let installed = InstalledSet::from_records([Pkg::new("D", "1-1").build()]);
    let modules = ModuleIndex::from_snapshot(snap.clone());
    let engine = GoalEngine::new(&snap, &modules, &installed).with_arch("x86_64");

    let mut goal = Goal::from_jobs([GoalJob::install("C")]);
    let err = engine.resolve(&mut goal, &CancellationToken::new()).unwrap_err();
    let GoalError::Unresolvable(problems) = err else {
        panic!("expected an unresolvable goal");
    };
    assert!(problems.contains(&Problem::Conflict {
        package: "C-1-1.x86_64".to_string(),
        capability: "D".to_string(),
        with: "D-1-1.x86_64".to_string(),
    }));
    assert!(problems.contains(&Problem::Job {
        job: "install C".to_string()
    }));
    assert_eq!(goal.state(), GoalState::Unresolvable);

    // A failed goal is still consumed
    assert_eq!(
        engine.resolve(&mut goal, &CancellationToken::new()).unwrap_err(),
        GoalError::AlreadyResolved
    );
}

#[test]
fn test_lenient_job_dropped_from_conflict() {
    let snap = snapshot(
        "fedora",
        vec![
            Pkg::new("X", "1-1").conflicts("Y").build(),
            Pkg::new("Y", "1-1").build(),
        ],
        Vec::new(),
    );
    let jobs = vec![GoalJob::install("Y"), GoalJob::install("X").with_strict(false)];
    let (_, result) = resolve(&snap, &InstalledSet::new(), jobs);
    let tx = result.unwrap();

    assert_eq!(tx.len(), 1);
    assert!(tx.find("Y").is_some());
    assert_eq!(tx.warnings, vec!["Skipping install X: it conflicts with other jobs"]);

    // Both strict: nothing is dropped
    let jobs = vec![GoalJob::install("Y"), GoalJob::install("X")];
    let (_, result) = resolve(&snap, &InstalledSet::new(), jobs);
    assert!(matches!(result, Err(GoalError::Unresolvable(_))));
}

#[test]
fn test_obsoleted_package_leaves_after_install() {
    let snap = snapshot(
        "fedora",
        vec![Pkg::new("newtool", "2-1").obsoletes("oldtool < 2").build()],
        Vec::new(),
    );
    let installed = InstalledSet::from_records([Pkg::new("oldtool", "1-1").build()]);
    let (_, result) = resolve(&snap, &installed, vec![GoalJob::install("newtool")]);
    let tx = result.unwrap();

    assert_eq!(tx.len(), 2);
    let old = tx.find("oldtool").unwrap();
    assert_eq!(old.action, Action::Obsoleted);
    assert_eq!(old.reason, Reason::Obsoletes);
    assert_eq!(old.obsoleted_by.as_ref().unwrap().name, "newtool");
    assert!(tx.position("newtool").unwrap() < tx.position("oldtool").unwrap());
    assert_eq!(tx.erasures().count(), 1);
}

#[test]
fn test_install_older_version_is_a_downgrade() {
    let snap = snapshot(
        "fedora",
        vec![Pkg::new("A", "1-1").build(), Pkg::new("A", "2-1").build()],
        Vec::new(),
    );
    let installed = InstalledSet::from_records([Pkg::new("A", "2-1").build()]);
    let (_, result) = resolve(&snap, &installed, vec![GoalJob::install("A-1-1.x86_64")]);
    let tx = result.unwrap();

    assert_eq!(tx.len(), 1);
    let a = tx.find("A").unwrap();
    assert_eq!(a.action, Action::Downgrade);
    assert_eq!(a.replaces.as_ref().unwrap().evr.to_string(), "2-1");
}

#[test]
fn test_install_by_file_path() {
    let snap = snapshot(
        "fedora",
        vec![Pkg::new("python3", "3.12.1-1").file("/usr/bin/python3").build()],
        Vec::new(),
    );
    let (_, result) = resolve(&snap, &InstalledSet::new(), vec![GoalJob::install("/usr/bin/python3")]);
    let tx = result.unwrap();
    assert_eq!(tx.find("python3").unwrap().action, Action::Install);
}

#[test]
fn test_upgrade_of_missing_package() {
    let snap = snapshot("fedora", vec![Pkg::new("A", "2-1").build()], Vec::new());
    let (_, result) = resolve(&snap, &InstalledSet::new(), vec![GoalJob::upgrade("A")]);
    assert_eq!(
        result.unwrap_err(),
        GoalError::NoMatch {
            target: "A".to_string(),
            hint: Some("package is not installed".to_string()),
        }
    );
}

#[test]
fn test_no_match_hints() {
    let snap = snapshot(
        "fedora",
        vec![
            Pkg::new("winapp", "1-1").arch("aarch64").build(),
            Pkg::new("nodejs-devel", "20.0-1").build(),
        ],
        vec![
            module_stream("nodejs", "18", true, &[]),
            module_stream("nodejs", "20", false, &["nodejs-devel-20.0-1.x86_64"]),
        ],
    );

    let (_, result) = resolve(&snap, &InstalledSet::new(), vec![GoalJob::install("winapp")]);
    assert_eq!(
        result.unwrap_err(),
        GoalError::NoMatch {
            target: "winapp".to_string(),
            hint: Some("no package for architecture x86_64".to_string()),
        }
    );

    let (_, result) = resolve(&snap, &InstalledSet::new(), vec![GoalJob::install("nodejs-devel")]);
    assert_eq!(
        result.unwrap_err(),
        GoalError::NoMatch {
            target: "nodejs-devel".to_string(),
            hint: Some("all matches were filtered out by modular filtering".to_string()),
        }
    );

    // Enabling the stream in the same goal makes it visible
    let jobs = vec![GoalJob::module_enable("nodejs:20"), GoalJob::install("nodejs-devel")];
    let (_, result) = resolve(&snap, &InstalledSet::new(), jobs);
    assert!(result.unwrap().find("nodejs-devel").is_some());
}

#[test]
fn test_module_switch_replaces_installed_artifacts() {
    let snap = snapshot(
        "fedora-modular",
        vec![
            Pkg::new("nodejs", "18.0-1").repo("fedora-modular").build(),
            Pkg::new("nodejs", "20.0-1").repo("fedora-modular").build(),
        ],
        vec![
            module_stream("nodejs", "18", true, &["nodejs-18.0-1.x86_64"]),
            module_stream("nodejs", "20", false, &["nodejs-20.0-1.x86_64"]),
        ],
    );
    let installed = InstalledSet::from_records([Pkg::new("nodejs", "18.0-1").build()]);
    let mut modules = ModuleIndex::from_snapshot(snap.clone());

    let tx = {
        let engine = GoalEngine::new(&snap, &modules, &installed).with_arch("x86_64");
        let mut goal = Goal::from_jobs([GoalJob::module_enable("nodejs:20")]);
        engine.resolve(&mut goal, &CancellationToken::new()).unwrap()
    };

    assert_eq!(
        tx.module_changes,
        vec![ModuleChange {
            module: "nodejs".to_string(),
            from: ModuleState::Default,
            to: ModuleState::Enabled("20".to_string()),
        }]
    );
    assert_eq!(tx.len(), 1);
    let nodejs = tx.find("nodejs").unwrap();
    assert_eq!(nodejs.action, Action::Upgrade);
    assert_eq!(nodejs.package.evr.to_string(), "20.0-1");

    // Nothing is committed until the caller applies the changes
    assert_eq!(modules.enabled_stream("nodejs"), None);
    modules.apply(&tx.module_changes);
    assert_eq!(modules.enabled_stream("nodejs"), Some("20"));
}

#[test]
fn test_stream_conflict_is_fatal_for_lenient_jobs() {
    let snap = snapshot(
        "fedora-modular",
        Vec::new(),
        vec![
            module_stream("nodejs", "18", true, &[]),
            module_stream("nodejs", "20", false, &[]),
        ],
    );
    let jobs = vec![
        GoalJob::module_enable("nodejs:20"),
        GoalJob::module_enable("nodejs:18").with_strict(false),
    ];
    let (goal, result) = resolve(&snap, &InstalledSet::new(), jobs);
    assert!(matches!(
        result,
        Err(GoalError::Module(ModuleError::StreamConflict { ref module, .. })) if module == "nodejs"
    ));
    assert_eq!(goal.state(), GoalState::Unresolvable);
}

#[test]
fn test_unknown_module_is_skipped_when_lenient() {
    let snap = snapshot("fedora", vec![Pkg::new("A", "1-1").build()], Vec::new());
    let jobs = vec![
        GoalJob::module_enable("nosuchmodule:1").with_strict(false),
        GoalJob::install("A"),
    ];
    let (_, result) = resolve(&snap, &InstalledSet::new(), jobs);
    let tx = result.unwrap();
    assert_eq!(tx.len(), 1);
    assert!(tx.module_changes.is_empty());
    assert_eq!(tx.warnings.len(), 1);
}
