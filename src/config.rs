// src/config.rs

//! Core configuration
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! cache_dir = "/var/cache/pkgcore"
//! keyring_dir = "/etc/pkgcore/keys"
//! arch = "x86_64"
//! metadata_expire = 172800
//! stale_fallback = "on_untrusted"
//!
//! [[repo]]
//! id = "fedora"
//! metalink = "https://mirrors.example.org/metalink?repo=fedora-39&arch=x86_64"
//! gpgkey = ["/etc/pki/rpm-gpg/RPM-GPG-KEY-fedora-39"]
//! ```

use crate::diagnostics::Diagnostics;
use crate::error::{ConfigError, TrustError};
use crate::repository::{
    DEFAULT_METADATA_EXPIRE, MetadataFetcher, RepoConfig, RepoHandle, RepositoryCache, StaleFallback,
};
use crate::trust::TrustStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Default location of the metadata cache
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/pkgcore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub cache_dir: PathBuf,
    /// Directory of trusted keys; also receives imported `gpgkey`s
    pub keyring_dir: Option<PathBuf>,
    /// SQLite database of installed packages
    pub installed_db: Option<PathBuf>,
    pub arch: String,
    /// Seconds before cached metadata is refetched
    pub metadata_expire: u64,
    pub stale_fallback: StaleFallback,
    #[serde(rename = "repo")]
    pub repos: Vec<RepoConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            keyring_dir: None,
            installed_db: None,
            arch: std::env::consts::ARCH.to_string(),
            metadata_expire: DEFAULT_METADATA_EXPIRE,
            stale_fallback: StaleFallback::default(),
            repos: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {} with {} repositories", path.display(), config.repos.len());
        Ok(config)
    }

    /// Parse and validate a configuration string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every repository record; no I/O happens here
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for repo in &self.repos {
            repo.validate()?;
            if !seen.insert(repo.id.as_str()) {
                return Err(ConfigError::DuplicateId(repo.id.clone()));
            }
        }
        Ok(())
    }

    pub fn enabled_repos(&self) -> impl Iterator<Item = &RepoConfig> {
        self.repos.iter().filter(|r| r.enabled)
    }

    pub fn repo_mut(&mut self, id: &str) -> Option<&mut RepoConfig> {
        self.repos.iter_mut().find(|r| r.id == id)
    }

    /// Apply a `repo.option=value` override
    pub fn set_option(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| ConfigError::Parse(format!("expected key=value, got '{assignment}'")))?;
        let (repo, option) = key
            .trim()
            .split_once('.')
            .ok_or_else(|| ConfigError::Parse(format!("expected repo.option, got '{key}'")))?;
        let record = self
            .repo_mut(repo)
            .ok_or_else(|| ConfigError::Parse(format!("unknown repository '{repo}'")))?;
        record.set_option(option, value.trim())?;
        record.validate()
    }

    /// Open the trust store, importing the keyring directory if one is set
    pub fn open_trust(&self, diagnostics: &mut Diagnostics) -> Result<TrustStore, TrustError> {
        match &self.keyring_dir {
            Some(dir) => TrustStore::with_keyring_dir(dir.clone(), diagnostics),
            None => Ok(TrustStore::new()),
        }
    }

    /// Build a repository cache holding every enabled repository
    pub fn build_cache(
        &self,
        trust: Arc<TrustStore>,
        fetcher: Arc<dyn MetadataFetcher>,
    ) -> Result<(RepositoryCache, Vec<RepoHandle>), ConfigError> {
        let cache = RepositoryCache::new(&self.cache_dir, trust, fetcher)
            .with_metadata_expire(self.metadata_expire)
            .with_stale_fallback(self.stale_fallback);
        let mut handles = Vec::new();
        for repo in self.enabled_repos() {
            handles.push(cache.configure(repo.clone())?);
        }
        debug!("Configured {} repositories", handles.len());
        Ok((cache, handles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
cache_dir = "/tmp/pkgcore-cache"
arch = "x86_64"
stale_fallback = "never"

[[repo]]
id = "fedora"
metalink = "https://mirrors.example.org/metalink?repo=fedora-39&arch=x86_64"
gpgkey = ["/etc/pki/rpm-gpg/RPM-GPG-KEY-fedora-39"]

[[repo]]
id = "updates-testing"
baseurl = ["https://mirror.example.org/updates/testing/39/"]
enabled = false
priority = 50
"#;

    #[test]
    fn test_parse_sample() {
        let config = CoreConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/pkgcore-cache"));
        assert_eq!(config.metadata_expire, 172800);
        assert_eq!(config.stale_fallback, StaleFallback::Never);
        assert_eq!(config.repos.len(), 2);
        assert!(config.repos[0].gpgcheck);
        assert_eq!(config.repos[1].priority, 50);
        assert_eq!(config.enabled_repos().count(), 1);
    }

    #[test]
    fn test_repo_without_locator_is_rejected() {
        let err = CoreConfig::from_toml_str("[[repo]]\nid = \"bare\"\n").unwrap_err();
        assert_eq!(err, ConfigError::NoLocator("bare".to_string()));
    }

    #[test]
    fn test_duplicate_ids() {
        let content = r#"
[[repo]]
id = "a"
baseurl = ["/srv/a"]

[[repo]]
id = "a"
baseurl = ["/srv/b"]
"#;
        assert_eq!(
            CoreConfig::from_toml_str(content).unwrap_err(),
            ConfigError::DuplicateId("a".to_string())
        );
    }

    #[test]
    fn test_set_option_override() {
        let mut config = CoreConfig::from_toml_str(SAMPLE).unwrap();
        config.set_option("updates-testing.enabled=1").unwrap();
        assert_eq!(config.enabled_repos().count(), 2);
        assert!(config.set_option("missing.enabled=1").is_err());
        assert!(config.set_option("no-equals-sign").is_err());
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            CoreConfig::from_toml_str("cache_dir = ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
