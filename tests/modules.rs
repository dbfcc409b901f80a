// tests/modules.rs

//! Module streams loaded from synchronized metadata.

mod common;

use common::{FEDORA, Fixture, Pkg, index_url, metadata, module_stream, repo};
use pkgcore::repository::MemoryFetcher;
use pkgcore::{Diagnostics, ModuleError, ModuleIndex, ModuleState, PackageUniverse};
use tokio_util::sync::CancellationToken;

async fn load_modular(f: &Fixture) -> PackageUniverse {
    let mut postgresql_16 = module_stream("postgresql", "16", false, &["postgresql-16.1-1.x86_64"]);
    postgresql_16.requires.push("platform:f39".to_string());
    let data = metadata(
        vec![
            Pkg::new("postgresql", "15.4-1").build(),
            Pkg::new("postgresql", "16.1-1").build(),
            Pkg::new("psql-tools", "1.0-1").build(),
        ],
        vec![
            module_stream("postgresql", "15", true, &["postgresql-15.4-1.x86_64"]),
            postgresql_16,
            module_stream("platform", "f39", true, &[]),
        ],
    );
    f.fetcher.insert(&index_url(FEDORA), data);

    let handle = f
        .cache
        .configure(repo("fedora-modular", FEDORA).with_gpgcheck(false))
        .unwrap();
    f.cache
        .sync(handle, &CancellationToken::new(), &mut Diagnostics::new())
        .await
        .unwrap();
    let universe = PackageUniverse::new();
    f.cache.load(handle, &universe).unwrap();
    universe
}

#[tokio::test]
async fn test_streams_come_from_loaded_metadata() {
    let f = Fixture::new(MemoryFetcher::new());
    let universe = load_modular(&f).await;
    let index = ModuleIndex::from_snapshot(universe.snapshot());

    assert_eq!(index.module_names(), vec!["platform", "postgresql"]);
    let streams = index.resolve_spec("postgresql:1*").unwrap();
    assert_eq!(streams.len(), 2);
    assert!(streams.iter().all(|s| s.repo == "fedora-modular"));
    assert_eq!(index.default_stream("postgresql").as_deref(), Some("15"));
    assert!(matches!(
        index.resolve_spec("postgresql:1:2:3:4:5"),
        Err(ModuleError::InvalidSpec(_))
    ));
}

#[tokio::test]
async fn test_filtering_follows_enabled_stream() {
    let f = Fixture::new(MemoryFetcher::new());
    let universe = load_modular(&f).await;
    let snapshot = universe.snapshot();
    let mut index = ModuleIndex::from_snapshot(snapshot.clone());

    let eligible = |index: &ModuleIndex| -> Vec<String> {
        snapshot
            .iter()
            .filter(|p| index.is_package_eligible(p))
            .map(|p| p.to_string())
            .collect()
    };

    assert_eq!(
        eligible(&index),
        vec!["postgresql-15.4-1.x86_64", "psql-tools-1.0-1.x86_64"]
    );

    index.enable("postgresql", "16").unwrap();
    assert_eq!(index.state("platform"), ModuleState::Enabled("f39".to_string()));
    assert_eq!(
        eligible(&index),
        vec!["postgresql-16.1-1.x86_64", "psql-tools-1.0-1.x86_64"]
    );

    index.disable("postgresql").unwrap();
    assert_eq!(eligible(&index), vec!["psql-tools-1.0-1.x86_64"]);
}

#[tokio::test]
async fn test_refresh_keeps_module_state() {
    let f = Fixture::new(MemoryFetcher::new());
    let universe = load_modular(&f).await;
    let mut index = ModuleIndex::from_snapshot(universe.snapshot());
    index.enable("postgresql", "16").unwrap();

    index.refresh(universe.snapshot());
    assert_eq!(index.enabled_stream("postgresql"), Some("16"));
    assert!(matches!(
        index.enable("postgresql", "15"),
        Err(ModuleError::StreamConflict { .. })
    ));
}
