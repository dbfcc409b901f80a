// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pkgcore::advisory::{AdvisoryKind, AdvisoryQuery};
use pkgcore::goal::{Goal, GoalEngine, GoalJob, JobKind};
use pkgcore::installed::{InstalledDb, InstalledSet, SqliteInstalledDb};
use pkgcore::module::{ModuleIndex, ModuleState};
use pkgcore::options::Scope;
use pkgcore::repository::{HttpFetcher, RepoHandle, RepositoryCache, repo_options};
use pkgcore::{CoreConfig, Diagnostics, PackageUniverse};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pkgcore")]
#[command(author, version, about = "Repository sync and dependency resolution core", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "/etc/pkgcore/pkgcore.toml")]
    config: PathBuf,

    /// Override a repository option (repo.option=value)
    #[arg(long = "setopt", value_name = "REPO.OPTION=VALUE")]
    setopt: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize repository metadata
    RepoSync {
        /// Refetch even when the cache is fresh
        #[arg(long)]
        refresh: bool,
    },
    /// Show configured repositories and their options
    RepoList,
    /// List module streams
    ModuleList {
        /// Module spec filter (name[:stream])
        pattern: Option<String>,
    },
    /// Show details of module streams
    ModuleInfo {
        /// Module spec (name[:stream[:version[:context[:arch]]]])
        spec: String,
    },
    /// List advisories
    AdvisoryList {
        /// Only advisories of these kinds (security, bugfix, enhancement, newpackage)
        #[arg(long = "type", value_name = "KIND")]
        kinds: Vec<AdvisoryKind>,
        /// Only advisories with updates for installed packages
        #[arg(long)]
        available: bool,
        /// Only advisories touching installed packages
        #[arg(long)]
        installed: bool,
    },
    /// Resolve a goal and print the transaction
    Resolve {
        #[arg(long, value_name = "TARGET")]
        install: Vec<String>,
        #[arg(long, value_name = "TARGET")]
        remove: Vec<String>,
        #[arg(long, value_name = "TARGET")]
        upgrade: Vec<String>,
        /// Enable a module stream (name:stream)
        #[arg(long, value_name = "MODULE")]
        enable: Vec<String>,
        /// Disable a module
        #[arg(long, value_name = "MODULE")]
        disable: Vec<String>,
        /// Drop jobs that match nothing or conflict instead of failing
        #[arg(long)]
        skip_broken: bool,
    },
}

struct Session {
    config: CoreConfig,
    cache: RepositoryCache,
    handles: Vec<RepoHandle>,
    universe: PackageUniverse,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let mut config = CoreConfig::load(&cli.config)?;
        for assignment in &cli.setopt {
            config.set_option(assignment)?;
        }

        let mut diagnostics = Diagnostics::new();
        let trust = config
            .open_trust(&mut diagnostics)
            .context("Failed to open the keyring")?;
        info!("Trust store holds {} keys", trust.len());
        let fetcher = HttpFetcher::new().context("Failed to create HTTP client")?;
        let (cache, handles) = config.build_cache(Arc::new(trust), Arc::new(fetcher))?;

        Ok(Self {
            config,
            cache,
            handles,
            universe: PackageUniverse::new(),
        })
    }

    /// Sync every repository (cheap when the cache is fresh) and load them
    async fn load(&self, cancel: &CancellationToken) -> Result<()> {
        for outcome in self.cache.sync_all(cancel).await {
            if let Err(e) = outcome.result {
                warn!("{}: {}", outcome.repo, e);
            }
        }
        let mut diagnostics = Diagnostics::new();
        let loaded = self.cache.load_all(&self.universe, &mut diagnostics)?;
        info!("Loaded {} repositories", loaded);
        Ok(())
    }

    fn installed(&self) -> Result<Box<dyn InstalledDb>> {
        let db: Box<dyn InstalledDb> = match &self.config.installed_db {
            Some(path) => Box::new(SqliteInstalledDb::open(path)?),
            None => Box::new(InstalledSet::new()),
        };
        Ok(db)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let session = Session::open(&cli)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::RepoSync { refresh } => {
            if refresh {
                for handle in &session.handles {
                    session.cache.mark_stale(*handle);
                }
            }
            let mut failed = 0;
            for outcome in session.cache.sync_all(&cancel).await {
                for entry in outcome.diagnostics.warnings() {
                    println!("  warning: {}", entry.message);
                }
                match outcome.result {
                    Ok(state) => println!("{}: {}", outcome.repo, state),
                    Err(e) => {
                        failed += 1;
                        println!("{}: failed: {}", outcome.repo, e);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} repositories failed to sync", failed);
            }
            Ok(())
        }
        Commands::RepoList => {
            for repo in &session.config.repos {
                println!("{} ({})", repo.id, if repo.enabled { "enabled" } else { "disabled" });
                for spec in repo_options() {
                    if let Some(value) = repo.option(spec.name) {
                        println!("  {:<16} {}", spec.name, value);
                    }
                }
            }
            Ok(())
        }
        Commands::ModuleList { pattern } => {
            session.load(&cancel).await?;
            let index = ModuleIndex::from_snapshot(session.universe.snapshot());
            let streams = match pattern {
                Some(p) => index.resolve_spec(&p)?,
                None => index.streams(),
            };
            for stream in streams {
                let marker = match index.state(&stream.name) {
                    ModuleState::Enabled(s) if s == stream.stream => " [e]",
                    ModuleState::Disabled => " [x]",
                    _ if stream.default => " [d]",
                    _ => "",
                };
                println!(
                    "{:<20} {:<12}{:<5} {}",
                    stream.name, stream.stream, marker, stream.summary
                );
            }
            Ok(())
        }
        Commands::ModuleInfo { spec } => {
            session.load(&cancel).await?;
            let index = ModuleIndex::from_snapshot(session.universe.snapshot());
            for stream in index.resolve_spec(&spec)? {
                println!("Name      : {}", stream.name);
                println!("Stream    : {}", stream.stream);
                println!("Version   : {}", stream.version);
                println!("Context   : {}", stream.context);
                println!("Arch      : {}", stream.arch);
                println!("Repo      : {}", stream.repo);
                println!("Summary   : {}", stream.summary);
                println!("Requires  : {}", stream.requires.join(", "));
                println!("Artifacts : {}", stream.packages.join(", "));
                println!();
            }
            Ok(())
        }
        Commands::AdvisoryList {
            kinds,
            available,
            installed,
        } => {
            session.load(&cancel).await?;
            let snapshot = session.universe.snapshot();
            let packages = session.installed()?.installed()?;
            let query = kinds
                .into_iter()
                .fold(AdvisoryQuery::new(), |q, kind| q.kind(kind))
                .scope(Scope::from_flags(available, installed));
            for advisory in query.run(&snapshot, &packages) {
                println!(
                    "{:<20} {:<12} {:<10} {}",
                    advisory.id,
                    advisory.kind,
                    advisory.severity.as_deref().unwrap_or("-"),
                    advisory.title
                );
            }
            Ok(())
        }
        Commands::Resolve {
            install,
            remove,
            upgrade,
            enable,
            disable,
            skip_broken,
        } => {
            session.load(&cancel).await?;
            let snapshot = session.universe.snapshot();
            let modules = ModuleIndex::from_snapshot(snapshot.clone());
            let installed = session.installed()?;

            let jobs = [
                (JobKind::ModuleEnable, enable),
                (JobKind::ModuleDisable, disable),
                (JobKind::Install, install),
                (JobKind::Remove, remove),
                (JobKind::Upgrade, upgrade),
            ];
            let mut goal = Goal::new();
            for (kind, targets) in jobs {
                for target in targets {
                    goal.push(GoalJob::new(kind, target).with_strict(!skip_broken))?;
                }
            }

            let engine = GoalEngine::new(&snapshot, &modules, installed.as_ref())
                .with_arch(session.config.arch.as_str());
            let transaction = engine.resolve(&mut goal, &cancel)?;

            for change in &transaction.module_changes {
                println!("module {}", change);
            }
            for package in &transaction.packages {
                println!("{}", package);
            }
            for warning in &transaction.warnings {
                println!("warning: {}", warning);
            }
            if transaction.is_empty() {
                println!("Nothing to do.");
            }
            Ok(())
        }
    }
}
