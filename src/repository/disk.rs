// src/repository/disk.rs

//! On-disk metadata cache
//!
//! Layout under `<cache_dir>/<repo id>/`:
//!
//! - `repomd.json`: the metadata index as fetched
//! - `repomd.json.asc`: its detached signature, when the repository has one
//! - `cache.json`: sync timestamp, metadata checksum and trust flag
//! - `packages.solv`: CBOR derived cache keyed by the metadata checksum
//!
//! Every file is written to a temp file in the same directory and renamed
//! into place, so a crash never leaves a half-written cache.

use super::metadata::{SolvCache, checksum};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const REPOMD_FILE: &str = "repomd.json";
const SIGNATURE_FILE: &str = "repomd.json.asc";
const INFO_FILE: &str = "cache.json";
const SOLV_FILE: &str = "packages.solv";

/// Freshness record written after every successful sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub synced_at: DateTime<Utc>,
    /// SHA-256 of `repomd.json`
    pub checksum: String,
    /// Whether the metadata signature verified when it was written
    #[serde(default)]
    pub trusted: bool,
}

impl CacheInfo {
    pub fn is_fresh(&self, expire_secs: u64, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.synced_at).num_seconds();
        age < i64::try_from(expire_secs).unwrap_or(i64::MAX)
    }
}

/// An intact cached copy of one repository's metadata
#[derive(Debug, Clone)]
pub struct CachedMetadata {
    pub info: CacheInfo,
    pub data: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

/// Cache directory of one repository
#[derive(Debug, Clone)]
pub struct RepoCacheDir {
    root: PathBuf,
}

impl RepoCacheDir {
    pub fn new(cache_dir: &Path, repo: &str) -> Self {
        Self {
            root: cache_dir.join(repo),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(name)).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_optional(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.root.join(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store freshly synced metadata
    ///
    /// `cache.json` is written last: until it lands, the previous record
    /// no longer matches the new `repomd.json` and the cache reads as absent.
    pub fn store(&self, data: &[u8], signature: Option<&[u8]>, trusted: bool) -> io::Result<CacheInfo> {
        self.write_atomic(REPOMD_FILE, data)?;
        match signature {
            Some(sig) => self.write_atomic(SIGNATURE_FILE, sig)?,
            None => match fs::remove_file(self.root.join(SIGNATURE_FILE)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            },
        }

        let info = CacheInfo {
            synced_at: Utc::now(),
            checksum: checksum(data),
            trusted,
        };
        let json = serde_json::to_vec_pretty(&info).map_err(io::Error::other)?;
        self.write_atomic(INFO_FILE, &json)?;
        Ok(info)
    }

    /// Read the cache record, if present and parseable
    pub fn info(&self) -> Option<CacheInfo> {
        let data = self.read_optional(INFO_FILE).ok().flatten()?;
        serde_json::from_slice(&data).ok()
    }

    /// Read the cached metadata if it is present and intact
    ///
    /// A cache whose checksum does not match its record is treated as
    /// absent.
    pub fn read(&self) -> io::Result<Option<CachedMetadata>> {
        let Some(info) = self.info() else {
            return Ok(None);
        };
        let Some(data) = self.read_optional(REPOMD_FILE)? else {
            return Ok(None);
        };
        if checksum(&data) != info.checksum {
            debug!("Cached metadata in {} does not match its checksum", self.root.display());
            return Ok(None);
        }
        let signature = self.read_optional(SIGNATURE_FILE)?;
        Ok(Some(CachedMetadata {
            info,
            data,
            signature,
        }))
    }

    /// Read the derived cache if it was built from metadata with `checksum`
    pub fn read_solv(&self, checksum: &str) -> Option<SolvCache> {
        let data = self.read_optional(SOLV_FILE).ok().flatten()?;
        match SolvCache::from_cbor(&data) {
            Ok(solv) if solv.checksum == checksum => Some(solv),
            Ok(_) => None,
            Err(e) => {
                debug!("Ignoring unreadable {}: {}", SOLV_FILE, e);
                None
            }
        }
    }

    pub fn write_solv(&self, solv: &SolvCache) -> io::Result<()> {
        let data = solv.to_cbor().map_err(io::Error::other)?;
        self.write_atomic(SOLV_FILE, &data)
    }
}
