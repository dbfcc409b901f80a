// src/lib.rs

//! pkgcore: resolution core of a system package manager
//!
//! Verifies repository metadata against trusted OpenPGP keys, keeps a
//! metadata cache per repository, exposes the loaded packages as an
//! immutable universe snapshot, and resolves goals (install, remove,
//! upgrade, module stream changes) into ordered transactions.
//!
//! # Architecture
//!
//! - Trust: `TrustStore` holds public keys and checks detached signatures
//! - Repositories: `RepositoryCache` owns configured repositories behind
//!   generational handles and syncs them concurrently
//! - Universe: `PackageUniverse` holds one slice per loaded repository;
//!   readers work on `UniverseSnapshot`s
//! - Modules: `ModuleIndex` tracks stream state and filters packages
//! - Goals: `GoalEngine` turns a `Goal` into a `Transaction`
//!
//! Everything that can fail returns a `Result`; diagnostics that are not
//! errors are collected in a `Diagnostics` value passed by the caller.

pub mod advisory;
pub mod config;
pub mod diagnostics;
mod error;
pub mod goal;
pub mod installed;
pub mod module;
pub mod options;
pub mod repository;
pub mod trust;
pub mod universe;
pub mod version;

pub use advisory::{Advisory, AdvisoryKind, AdvisoryQuery};
pub use config::CoreConfig;
pub use diagnostics::Diagnostics;
pub use error::{
    ConfigError, Error, GoalError, LoadError, LocatorError, MetadataError, ModuleError, Result, SyncError,
    TrustError, VersionError,
};
pub use goal::{
    Action, Goal, GoalEngine, GoalJob, GoalState, JobKind, Problem, Reason, Transaction,
    TransactionPackage,
};
pub use installed::{InstalledDb, InstalledSet, SqliteInstalledDb};
pub use module::{ModuleChange, ModuleIndex, ModuleSpec, ModuleState, ModuleStream};
pub use options::{OptionKind, OptionSpec, OptionValue, Scope};
pub use repository::{RepoConfig, RepoHandle, RepositoryCache, RepositoryState, StaleFallback};
pub use trust::{PublicKey, TrustStore};
pub use universe::{PackageId, PackageRecord, PackageUniverse, UniverseSnapshot};
pub use version::{Capability, RpmVersion};
