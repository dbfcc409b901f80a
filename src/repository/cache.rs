// src/repository/cache.rs

//! Repository arena and metadata state machine
//!
//! The [`RepositoryCache`] owns every configured repository. Callers hold a
//! [`RepoHandle`] (slot index plus generation); removing a repository bumps
//! the slot generation so old handles fail with `StaleHandle` instead of
//! reaching a reused slot.
//!
//! Per repository the metadata moves through
//! `Unloaded -> Fetching -> {Cached, Failed}`, `Cached -> Loaded`, with
//! `Failed -> Fetching` on retry and `Cached/Loaded -> Fetching` on refresh.
//! Concurrent syncs of the same repository share one in-flight fetch.

use super::config::{RepoConfig, join_locator, parse_locator};
use super::disk::{CachedMetadata, RepoCacheDir};
use super::fetch::{FetchError, MetadataFetcher};
use super::locator::resolve_mirrors;
use super::metadata::{REPOMD_PATH, REPOMD_SIG_PATH, RepositoryMetadata, SolvCache};
use crate::diagnostics::Diagnostics;
use crate::error::{ConfigError, LoadError, SyncError};
use crate::trust::{KeyImport, TrustStore};
use crate::universe::{PackageUniverse, RepoContent, RepoSlice};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum_macros::{AsRefStr, Display};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default freshness window for cached metadata (48 hours)
pub const DEFAULT_METADATA_EXPIRE: u64 = 48 * 3600;

/// Lifecycle of one repository's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RepositoryState {
    Unloaded,
    Fetching,
    Cached,
    Loaded,
    Failed,
}

impl RepositoryState {
    pub fn can_transition_to(self, next: RepositoryState) -> bool {
        use RepositoryState::*;
        matches!(
            (self, next),
            (Unloaded, Fetching)
                | (Fetching, Cached)
                | (Fetching, Failed)
                | (Cached, Loaded)
                | (Cached, Fetching)
                | (Cached, Failed)
                | (Loaded, Fetching)
                | (Failed, Fetching)
        )
    }
}

/// What sync does when fresh metadata cannot be accepted
///
/// Fallback only ever uses a cached copy that is intact and, for
/// repositories with `gpgcheck`, was verified when it was written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StaleFallback {
    /// Always fail
    Never,
    /// Use the stale cache when the new metadata does not verify
    #[default]
    OnUntrusted,
    /// Also use the stale cache when no mirror could be reached
    Always,
}

/// Handle to a repository owned by a [`RepositoryCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoHandle {
    index: u32,
    generation: u64,
}

impl fmt::Display for RepoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Result of one repository in [`RepositoryCache::sync_all`]
#[derive(Debug)]
pub struct SyncOutcome {
    pub handle: RepoHandle,
    pub repo: String,
    pub result: Result<RepositoryState, SyncError>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug)]
struct RepoEntry {
    config: Arc<RepoConfig>,
    state: RepositoryState,
    /// Set by `mark_stale`: the next sync refetches even if fresh
    refresh: bool,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    entry: Option<RepoEntry>,
}

type SyncResult = Result<RepositoryState, SyncError>;

/// Owner of all configured repositories and their metadata state
pub struct RepositoryCache {
    cache_dir: PathBuf,
    trust: Arc<TrustStore>,
    fetcher: Arc<dyn MetadataFetcher>,
    metadata_expire: u64,
    fallback: StaleFallback,
    slots: RwLock<Vec<Slot>>,
    /// In-flight syncs (repo id -> result broadcast)
    inflight: DashMap<String, broadcast::Sender<SyncResult>>,
}

impl fmt::Debug for RepositoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryCache")
            .field("cache_dir", &self.cache_dir)
            .field("metadata_expire", &self.metadata_expire)
            .field("fallback", &self.fallback)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight entry when the leading sync ends, and marks the
/// repository `Failed` if the sync future was dropped before finishing
struct InflightGuard<'a> {
    cache: &'a RepositoryCache,
    handle: RepoHandle,
    repo: String,
    finished: bool,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.set_state(self.handle, RepositoryState::Failed);
        }
        self.cache.inflight.remove(&self.repo);
    }
}

impl RepositoryCache {
    pub fn new(cache_dir: impl Into<PathBuf>, trust: Arc<TrustStore>, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            trust,
            fetcher,
            metadata_expire: DEFAULT_METADATA_EXPIRE,
            fallback: StaleFallback::default(),
            slots: RwLock::new(Vec::new()),
            inflight: DashMap::new(),
        }
    }

    /// Default freshness window in seconds; repositories may override it
    pub fn with_metadata_expire(mut self, seconds: u64) -> Self {
        self.metadata_expire = seconds;
        self
    }

    pub fn with_stale_fallback(mut self, fallback: StaleFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn trust(&self) -> &Arc<TrustStore> {
        &self.trust
    }

    /// Add a repository
    ///
    /// The record is validated before anything else happens; a repository
    /// without a locator is rejected with [`ConfigError::NoLocator`].
    pub fn configure(&self, config: RepoConfig) -> Result<RepoHandle, ConfigError> {
        config.validate()?;

        let mut slots = self.slots.write();
        let duplicate = slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .any(|e| e.config.id == config.id);
        if duplicate {
            return Err(ConfigError::DuplicateId(config.id));
        }

        let index = match slots.iter().position(|s| s.entry.is_none()) {
            Some(index) => index,
            None => {
                slots.push(Slot::default());
                slots.len() - 1
            }
        };

        debug!("Configured repository {} in slot {}", config.id, index);
        let slot = &mut slots[index];
        slot.entry = Some(RepoEntry {
            config: Arc::new(config),
            state: RepositoryState::Unloaded,
            refresh: false,
        });

        Ok(RepoHandle {
            index: index as u32,
            generation: slot.generation,
        })
    }

    /// Remove a repository and drop its records from the universe
    pub fn remove(&self, handle: RepoHandle, universe: &PackageUniverse) -> Result<Arc<RepoConfig>, SyncError> {
        let entry = {
            let mut slots = self.slots.write();
            let slot = slots
                .get_mut(handle.index as usize)
                .filter(|s| s.generation == handle.generation && s.entry.is_some())
                .ok_or_else(|| SyncError::StaleHandle(handle.to_string()))?;
            slot.generation += 1;
            slot.entry.take()
        };

        let config = entry
            .map(|e| e.config)
            .ok_or_else(|| SyncError::StaleHandle(handle.to_string()))?;
        universe.unregister(&config.id);
        info!("Removed repository {}", config.id);
        Ok(config)
    }

    fn with_entry<R>(&self, handle: RepoHandle, f: impl FnOnce(&RepoEntry) -> R) -> Option<R> {
        let slots = self.slots.read();
        slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_ref())
            .map(f)
    }

    fn with_entry_mut<R>(&self, handle: RepoHandle, f: impl FnOnce(&mut RepoEntry) -> R) -> Option<R> {
        let mut slots = self.slots.write();
        slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_mut())
            .map(f)
    }

    /// Move a repository to a new state; invalid transitions are refused
    fn set_state(&self, handle: RepoHandle, next: RepositoryState) -> bool {
        self.with_entry_mut(handle, |entry| {
            if entry.state == next {
                return true;
            }
            if !entry.state.can_transition_to(next) {
                warn!(
                    "Refusing state change {} -> {} for {}",
                    entry.state, next, entry.config.id
                );
                return false;
            }
            debug!("Repository {}: {} -> {}", entry.config.id, entry.state, next);
            entry.state = next;
            true
        })
        .unwrap_or(false)
    }

    pub fn state(&self, handle: RepoHandle) -> Option<RepositoryState> {
        self.with_entry(handle, |e| e.state)
    }

    pub fn repository(&self, handle: RepoHandle) -> Option<Arc<RepoConfig>> {
        self.with_entry(handle, |e| Arc::clone(&e.config))
    }

    pub fn handle_for(&self, id: &str) -> Option<RepoHandle> {
        self.handles()
            .into_iter()
            .find(|h| self.with_entry(*h, |e| e.config.id == id).unwrap_or(false))
    }

    /// Handles of all configured repositories, in slot order
    pub fn handles(&self) -> Vec<RepoHandle> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.entry.is_some())
            .map(|(index, s)| RepoHandle {
                index: index as u32,
                generation: s.generation,
            })
            .collect()
    }

    /// Force the next sync to refetch even if the cache is fresh
    pub fn mark_stale(&self, handle: RepoHandle) -> bool {
        self.with_entry_mut(handle, |e| e.refresh = true).is_some()
    }

    /// Synchronize one repository's metadata
    ///
    /// A fresh, intact cache moves the repository straight to `Cached`
    /// without network access. Concurrent calls for the same repository
    /// wait for the one in flight and share its result. On cancellation the
    /// repository is left `Failed`.
    pub async fn sync(
        &self,
        handle: RepoHandle,
        cancel: &CancellationToken,
        diagnostics: &mut Diagnostics,
    ) -> Result<RepositoryState, SyncError> {
        let config = self
            .repository(handle)
            .ok_or_else(|| SyncError::StaleHandle(handle.to_string()))?;
        let repo = config.id.clone();

        let waiter = match self.inflight.entry(repo.clone()) {
            Entry::Occupied(e) => Some(e.get().subscribe()),
            Entry::Vacant(v) => {
                let (tx, _rx) = broadcast::channel(1);
                v.insert(tx);
                None
            }
        };

        if let Some(mut rx) = waiter {
            diagnostics.debug(format!("Waiting for in-flight sync of {repo}"));
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SyncError::Cancelled(repo)),
                received = rx.recv() => received.unwrap_or(Err(SyncError::Cancelled(repo))),
            };
        }

        let mut guard = InflightGuard {
            cache: self,
            handle,
            repo: repo.clone(),
            finished: false,
        };

        let result = if self.set_state(handle, RepositoryState::Fetching) {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.sync_inner(handle, &config, diagnostics) => Some(r),
            };
            outcome.unwrap_or_else(|| {
                diagnostics.warn(format!("Sync of {repo} cancelled"));
                Err(SyncError::Cancelled(repo.clone()))
            })
        } else {
            Err(SyncError::StaleHandle(handle.to_string()))
        };

        match &result {
            Ok(state) => {
                self.set_state(handle, *state);
            }
            Err(e) => {
                debug!("Sync of {} failed: {}", repo, e);
                self.set_state(handle, RepositoryState::Failed);
            }
        }
        guard.finished = true;

        if let Some((_, tx)) = self.inflight.remove(&repo) {
            let _ = tx.send(result.clone());
        }
        drop(guard);

        result
    }

    async fn sync_inner(
        &self,
        handle: RepoHandle,
        config: &RepoConfig,
        diagnostics: &mut Diagnostics,
    ) -> Result<RepositoryState, SyncError> {
        let dir = RepoCacheDir::new(&self.cache_dir, &config.id);
        let cached = match dir.read() {
            Ok(cached) => cached,
            Err(e) => {
                diagnostics.warn(format!("{}: unreadable cache: {e}", config.id));
                None
            }
        };
        let usable: Option<CachedMetadata> = cached.filter(|c| !config.gpgcheck || c.info.trusted);

        let expire = config.metadata_expire.unwrap_or(self.metadata_expire);
        let refresh = self.with_entry(handle, |e| e.refresh).unwrap_or(false);
        let fresh = usable
            .as_ref()
            .is_some_and(|c| c.info.is_fresh(expire, Utc::now()));
        if fresh && !refresh {
            debug!("Cache for {} is fresh, skipping fetch", config.id);
            return Ok(RepositoryState::Cached);
        }

        match self.fetch_verified(config, diagnostics).await {
            Ok((data, signature, trusted)) => {
                dir.store(&data, signature.as_deref(), trusted)
                    .map_err(|e| SyncError::Io(format!("Failed to write cache for {}: {e}", config.id)))?;
                self.with_entry_mut(handle, |e| e.refresh = false);
                info!("Synchronized metadata for {}", config.id);
                Ok(RepositoryState::Cached)
            }
            Err(e) => {
                let allowed = match &e {
                    SyncError::UntrustedMetadata { .. } => self.fallback != StaleFallback::Never,
                    SyncError::Fetch { .. } => self.fallback == StaleFallback::Always,
                    _ => false,
                };
                match usable {
                    Some(cached) if allowed => {
                        diagnostics.warn(format!(
                            "{}: {e}; using cached metadata from {}",
                            config.id, cached.info.synced_at
                        ));
                        Ok(RepositoryState::Cached)
                    }
                    _ => Err(e),
                }
            }
        }
    }

    /// Fetch metadata from the first mirror that serves it and verify it
    ///
    /// Returns the metadata, its signature and whether it verified.
    async fn fetch_verified(
        &self,
        config: &RepoConfig,
        diagnostics: &mut Diagnostics,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>, bool), SyncError> {
        if config.gpgcheck {
            self.import_keys(config, diagnostics).await;
        }

        let mirrors = resolve_mirrors(config, self.fetcher.as_ref(), diagnostics).await;
        let fetch_error = |reason: String| SyncError::Fetch {
            repo: config.id.clone(),
            reason,
        };
        if mirrors.is_empty() {
            return Err(fetch_error("no usable mirror".to_string()));
        }

        let mut last_error = String::new();
        for mirror in &mirrors {
            let (Ok(index_url), Ok(sig_url)) = (
                join_locator(mirror.as_str(), REPOMD_PATH),
                join_locator(mirror.as_str(), REPOMD_SIG_PATH),
            ) else {
                continue;
            };

            let data = match self.fetcher.fetch(&index_url).await {
                Ok(data) => data,
                Err(e) => {
                    diagnostics.warn(format!("{}: {e}", config.id));
                    last_error = e.to_string();
                    continue;
                }
            };
            if let Err(e) = RepositoryMetadata::parse(&data) {
                diagnostics.warn(format!("{}: {index_url}: {e}", config.id));
                last_error = e.to_string();
                continue;
            }

            let signature = match self.fetcher.fetch(&sig_url).await {
                Ok(sig) => Some(sig),
                Err(FetchError::NotFound(_)) => None,
                Err(e) => {
                    diagnostics.warn(format!("{}: {e}", config.id));
                    None
                }
            };

            if !config.gpgcheck {
                return Ok((data, signature, false));
            }
            return match self.trust.verify(&data, signature.as_deref(), diagnostics) {
                Ok(fingerprint) => {
                    debug!("Metadata for {} signed by {}", config.id, fingerprint);
                    Ok((data, signature, true))
                }
                Err(e) => Err(SyncError::UntrustedMetadata {
                    repo: config.id.clone(),
                    reason: e.to_string(),
                }),
            };
        }

        Err(fetch_error(last_error))
    }

    async fn import_keys(&self, config: &RepoConfig, diagnostics: &mut Diagnostics) {
        for locator in &config.gpgkey {
            let url = match parse_locator(locator) {
                Ok(url) => url,
                Err(e) => {
                    diagnostics.warn(format!("{}: bad gpgkey '{locator}': {e}", config.id));
                    continue;
                }
            };
            let data = match self.fetcher.fetch(&url).await {
                Ok(data) => data,
                Err(e) => {
                    diagnostics.warn(format!("{}: cannot fetch key: {e}", config.id));
                    continue;
                }
            };
            match self.trust.add_key(&data) {
                Ok(KeyImport::Added(fp)) => info!("Imported key {} for {}", fp, config.id),
                Ok(KeyImport::AlreadyPresent(_)) => {}
                Err(e) => diagnostics.warn(format!("{}: {locator}: {e}", config.id)),
            }
        }
    }

    /// Sync every enabled repository concurrently
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Vec<SyncOutcome> {
        let handles: Vec<(RepoHandle, Arc<RepoConfig>)> = self
            .handles()
            .into_iter()
            .filter_map(|h| self.repository(h).map(|c| (h, c)))
            .filter(|(_, c)| c.enabled)
            .collect();

        let syncs = handles.into_iter().map(|(handle, config)| async move {
            let mut diagnostics = Diagnostics::new();
            let result = self.sync(handle, cancel, &mut diagnostics).await;
            SyncOutcome {
                handle,
                repo: config.id.clone(),
                result,
                diagnostics,
            }
        });

        futures::future::join_all(syncs).await
    }

    /// Load cached metadata into the universe
    ///
    /// Loading an already loaded repository is a no-op. Malformed metadata
    /// marks the repository `Failed`; a re-sync recovers it. Content left in
    /// the universe by an earlier load of a repository that is no longer
    /// cached is dropped.
    pub fn load(&self, handle: RepoHandle, universe: &PackageUniverse) -> Result<(), LoadError> {
        let (config, state) = self
            .with_entry(handle, |e| (Arc::clone(&e.config), e.state))
            .ok_or_else(|| LoadError::StaleHandle(handle.to_string()))?;

        match state {
            RepositoryState::Loaded => {
                debug!("Repository {} is already loaded", config.id);
                return Ok(());
            }
            RepositoryState::Cached => {}
            RepositoryState::Failed | RepositoryState::Unloaded => {
                if universe.unregister(&config.id) {
                    info!("Dropped content of unavailable repository {}", config.id);
                }
                return Err(LoadError::NotCached(config.id.clone()));
            }
            RepositoryState::Fetching => return Err(LoadError::NotCached(config.id.clone())),
        }

        match self.read_content(&config) {
            Ok(content) => {
                let packages = content.packages.len();
                universe.register(RepoSlice::new(config.id.clone(), config.priority, content));
                self.set_state(handle, RepositoryState::Loaded);
                info!("Loaded {} packages from {}", packages, config.id);
                Ok(())
            }
            Err(e) => {
                self.set_state(handle, RepositoryState::Failed);
                universe.unregister(&config.id);
                Err(e)
            }
        }
    }

    fn read_content(&self, config: &RepoConfig) -> Result<RepoContent, LoadError> {
        let dir = RepoCacheDir::new(&self.cache_dir, &config.id);
        let cached = dir
            .read()
            .map_err(|e| LoadError::Io(format!("Failed to read cache for {}: {e}", config.id)))?
            .ok_or_else(|| LoadError::Malformed {
                repo: config.id.clone(),
                reason: "cached metadata is missing or does not match its checksum".to_string(),
            })?;

        if let Some(solv) = dir.read_solv(&cached.info.checksum) {
            debug!("Using derived cache for {}", config.id);
            return Ok(solv.content);
        }

        let content = RepositoryMetadata::parse(&cached.data)
            .map_err(|source| LoadError::Metadata {
                repo: config.id.clone(),
                source,
            })?
            .into_content(&config.id);

        let solv = SolvCache {
            checksum: cached.info.checksum,
            content,
        };
        if let Err(e) = dir.write_solv(&solv) {
            debug!("Could not write derived cache for {}: {}", config.id, e);
        }
        Ok(solv.content)
    }

    /// Load every `Cached` repository, skipping unavailable ones with a warning
    ///
    /// A repository that is `Failed` or `Unloaded` has any earlier content
    /// dropped from the universe. If such a repository has
    /// `skip_if_unavailable` unset, the remaining repositories are still
    /// processed and the first required one is reported as an error.
    /// Returns the number of repositories loaded by this call.
    pub fn load_all(&self, universe: &PackageUniverse, diagnostics: &mut Diagnostics) -> Result<usize, LoadError> {
        let mut loaded = 0;
        let mut required: Option<LoadError> = None;
        for handle in self.handles() {
            let Some((id, state, enabled, skip)) = self.with_entry(handle, |e| {
                (
                    e.config.id.clone(),
                    e.state,
                    e.config.enabled,
                    e.config.skip_if_unavailable,
                )
            }) else {
                continue;
            };
            if !enabled {
                continue;
            }

            let unavailable = match state {
                RepositoryState::Cached => match self.load(handle, universe) {
                    Ok(()) => {
                        loaded += 1;
                        None
                    }
                    Err(e) => Some(e.to_string()),
                },
                RepositoryState::Failed => Some("failed".to_string()),
                RepositoryState::Unloaded => Some("not synced".to_string()),
                RepositoryState::Fetching | RepositoryState::Loaded => None,
            };
            let Some(reason) = unavailable else {
                continue;
            };

            universe.unregister(&id);
            if skip {
                diagnostics.warn(format!("Skipping repository {id}: {reason}"));
            } else {
                diagnostics.warn(format!("Required repository {id} is unavailable: {reason}"));
                required.get_or_insert(LoadError::RequiredUnavailable { repo: id, reason });
            }
        }

        match required {
            Some(e) => Err(e),
            None => Ok(loaded),
        }
    }
}
