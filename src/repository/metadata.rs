// src/repository/metadata.rs

//! Repository metadata data structures
//!
//! Remote metadata is a single JSON index, `repodata/repomd.json`, holding
//! package records, module streams and advisories. A CBOR copy of the
//! parsed content (`packages.solv`) is kept alongside the cache so repeated
//! loads of an unchanged repository skip JSON parsing.

use crate::advisory::Advisory;
use crate::error::MetadataError;
use crate::module::ModuleStream;
use crate::universe::{PackageRecord, RepoContent};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Path of the metadata index relative to a mirror root
pub const REPOMD_PATH: &str = "repodata/repomd.json";

/// Path of the detached signature relative to a mirror root
pub const REPOMD_SIG_PATH: &str = "repodata/repomd.json.asc";

/// Repository metadata format (JSON index)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    /// Publisher-chosen revision string
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
    #[serde(default)]
    pub modules: Vec<ModuleStream>,
    #[serde(default)]
    pub advisories: Vec<Advisory>,
}

impl RepositoryMetadata {
    /// Parse and sanity-check a metadata index
    pub fn parse(data: &[u8]) -> Result<Self, MetadataError> {
        let metadata: RepositoryMetadata = serde_json::from_slice(data)?;

        for pkg in &metadata.packages {
            if pkg.name.is_empty() || pkg.arch.is_empty() {
                return Err(MetadataError::InvalidPackage(pkg.to_string()));
            }
        }
        for stream in &metadata.modules {
            if stream.name.is_empty() || stream.stream.is_empty() {
                return Err(MetadataError::InvalidModule(stream.full_name()));
            }
        }
        if metadata.advisories.iter().any(|a| a.id.is_empty()) {
            return Err(MetadataError::AdvisoryWithoutId);
        }

        Ok(metadata)
    }

    /// Convert into universe content owned by `repo`
    pub fn into_content(self, repo: &str) -> RepoContent {
        let mut packages = self.packages;
        for pkg in &mut packages {
            pkg.repo = repo.to_string();
        }
        let mut modules = self.modules;
        for stream in &mut modules {
            stream.repo = repo.to_string();
        }
        RepoContent {
            packages,
            modules,
            advisories: self.advisories,
        }
    }
}

/// SHA-256 of metadata bytes, hex encoded
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Solver-ready derived cache, keyed by the metadata checksum
#[derive(Debug, Serialize, Deserialize)]
pub struct SolvCache {
    pub checksum: String,
    pub content: RepoContent,
}

impl SolvCache {
    pub fn to_cbor(&self) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(buf)
    }

    pub fn from_cbor(data: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
        ciborium::from_reader(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "revision": "1700000000",
        "packages": [
            {
                "name": "A",
                "evr": "1.0-1",
                "arch": "noarch",
                "requires": ["libfoo >= 1.0"]
            },
            {
                "name": "B",
                "evr": "2.0-1",
                "arch": "x86_64",
                "provides": ["libfoo = 2.0"],
                "files": ["/usr/lib64/libfoo.so.2"]
            }
        ],
        "modules": [
            {"name": "testmodule", "stream": "8.0", "version": 1, "default": true}
        ],
        "advisories": [
            {"id": "FEDORA-2024-1", "kind": "security", "packages": [{"name": "B", "evr": "2.0-1"}]}
        ]
    }"#;

    #[test]
    fn test_parse_and_convert() {
        let metadata = RepositoryMetadata::parse(INDEX.as_bytes()).unwrap();
        assert_eq!(metadata.packages.len(), 2);
        let content = metadata.into_content("fedora");
        assert!(content.packages.iter().all(|p| p.repo == "fedora"));
        assert_eq!(content.modules[0].repo, "fedora");
        assert_eq!(content.modules[0].arch, "noarch");
        assert_eq!(content.advisories[0].packages[0].arch, "noarch");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            RepositoryMetadata::parse(b"not json"),
            Err(MetadataError::Json(_))
        ));
        assert!(matches!(
            RepositoryMetadata::parse(br#"{"packages": [{"name": "", "evr": "1", "arch": "x"}]}"#),
            Err(MetadataError::InvalidPackage(_))
        ));
        assert!(RepositoryMetadata::parse(br#"{"packages": [{"name": "a", "evr": ":", "arch": "x"}]}"#).is_err());
    }

    #[test]
    fn test_solv_cache_round_trip() {
        let content = RepositoryMetadata::parse(INDEX.as_bytes())
            .unwrap()
            .into_content("fedora");
        let cache = SolvCache {
            checksum: checksum(INDEX.as_bytes()),
            content: content.clone(),
        };
        let decoded = SolvCache::from_cbor(&cache.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded.content, content);
        assert_eq!(decoded.checksum.len(), 64);
    }
}
