// src/repository/mod.rs

//! Repository configuration and metadata synchronization
//!
//! This module provides functionality for:
//! - Validating repository configuration records
//! - Resolving baseurl, mirrorlist and metalink locators into mirrors
//! - Fetching, verifying and caching repository metadata
//! - Loading cached metadata into the package universe

mod cache;
mod config;
mod disk;
mod fetch;
mod locator;
mod metadata;

pub use cache::{
    DEFAULT_METADATA_EXPIRE, RepoHandle, RepositoryCache, RepositoryState, StaleFallback, SyncOutcome,
};
pub use config::{DEFAULT_PRIORITY, RepoConfig, join_locator, parse_locator, repo_options};
pub use disk::{CacheInfo, RepoCacheDir};
pub use fetch::{FetchError, HttpFetcher, MemoryFetcher, MetadataFetcher};
pub use locator::{parse_metalink, parse_mirrorlist, resolve_mirrors};
pub use metadata::{REPOMD_PATH, REPOMD_SIG_PATH, RepositoryMetadata, SolvCache, checksum};
