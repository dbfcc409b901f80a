// tests/common/mod.rs

//! Shared helpers for integration tests: throwaway signers, package and
//! metadata builders, and a repository cache backed by an in-memory fetcher.

#![allow(dead_code)]

use pkgcore::module::ModuleStream;
use pkgcore::repository::{MemoryFetcher, REPOMD_PATH, REPOMD_SIG_PATH, RepositoryMetadata};
use pkgcore::universe::{RepoContent, RepoSlice};
use pkgcore::{Capability, PackageRecord, RepoConfig, RepositoryCache, RpmVersion, TrustStore, UniverseSnapshot};
use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::cert::CertBuilder;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::SerializeInto;
use openpgp::serialize::stream::{Message, Signer};
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

pub const FEDORA: &str = "https://mirror.example.org/fedora/";
pub const UPDATES: &str = "https://mirror.example.org/updates/";

pub fn index_url(base: &str) -> String {
    format!("{base}{REPOMD_PATH}")
}

pub fn sig_url(base: &str) -> String {
    format!("{base}{REPOMD_SIG_PATH}")
}

/// Generate a signing certificate
pub fn signer(name: &str) -> Cert {
    let (cert, _revocation) = CertBuilder::new()
        .add_userid(format!("{name} <{name}@example.org>"))
        .add_signing_subkey()
        .generate()
        .unwrap();
    cert
}

/// The armored public half of a certificate
pub fn public_key(cert: &Cert) -> Vec<u8> {
    cert.armored().to_vec().unwrap()
}

/// Detached signature over `data`
pub fn sign(cert: &Cert, data: &[u8]) -> Vec<u8> {
    let policy = StandardPolicy::new();
    let keypair = cert
        .keys()
        .unencrypted_secret()
        .with_policy(&policy, None)
        .alive()
        .revoked(false)
        .for_signing()
        .next()
        .unwrap()
        .key()
        .clone()
        .into_keypair()
        .unwrap();

    let mut sink = Vec::new();
    {
        let message = Message::new(&mut sink);
        let mut signer = Signer::new(message, keypair).detached().build().unwrap();
        signer.write_all(data).unwrap();
        signer.finalize().unwrap();
    }
    sink
}

/// Builder for package records
pub struct Pkg(PackageRecord);

impl Pkg {
    pub fn new(name: &str, evr: &str) -> Self {
        Pkg(PackageRecord::new(name, RpmVersion::parse(evr).unwrap(), "x86_64", "fedora"))
    }

    pub fn arch(mut self, arch: &str) -> Self {
        self.0.arch = arch.to_string();
        self
    }

    pub fn repo(mut self, repo: &str) -> Self {
        self.0.repo = repo.to_string();
        self
    }

    pub fn requires(mut self, cap: &str) -> Self {
        self.0.requires.push(Capability::parse(cap).unwrap());
        self
    }

    pub fn provides(mut self, cap: &str) -> Self {
        self.0.provides.push(Capability::parse(cap).unwrap());
        self
    }

    pub fn conflicts(mut self, cap: &str) -> Self {
        self.0.conflicts.push(Capability::parse(cap).unwrap());
        self
    }

    pub fn obsoletes(mut self, cap: &str) -> Self {
        self.0.obsoletes.push(Capability::parse(cap).unwrap());
        self
    }

    pub fn file(mut self, path: &str) -> Self {
        self.0.files.push(path.to_string());
        self
    }

    pub fn build(self) -> PackageRecord {
        self.0
    }
}

/// A module stream shipping the given artifact NEVRAs
pub fn module_stream(name: &str, stream: &str, default: bool, packages: &[&str]) -> ModuleStream {
    ModuleStream {
        name: name.to_string(),
        stream: stream.to_string(),
        version: 1,
        context: "6c81f848".to_string(),
        arch: "x86_64".to_string(),
        summary: format!("{name} {stream}"),
        requires: Vec::new(),
        packages: packages.iter().map(|p| p.to_string()).collect(),
        default,
        repo: String::new(),
    }
}

/// Serialized metadata index
pub fn metadata(packages: Vec<PackageRecord>, modules: Vec<ModuleStream>) -> Vec<u8> {
    let metadata = RepositoryMetadata {
        revision: Some("1".to_string()),
        packages,
        modules,
        advisories: Vec::new(),
    };
    serde_json::to_vec_pretty(&metadata).unwrap()
}

/// A snapshot holding one repository
pub fn snapshot(repo: &str, packages: Vec<PackageRecord>, modules: Vec<ModuleStream>) -> UniverseSnapshot {
    UniverseSnapshot::from_slices(vec![RepoSlice::new(
        repo,
        99,
        RepoContent {
            packages,
            modules,
            advisories: Vec::new(),
        },
    )])
}

/// A repository cache in a temporary directory
pub struct Fixture {
    pub tmp: TempDir,
    pub fetcher: Arc<MemoryFetcher>,
    pub trust: Arc<TrustStore>,
    pub cache: RepositoryCache,
}

impl Fixture {
    pub fn new(fetcher: MemoryFetcher) -> Self {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(fetcher);
        let trust = Arc::new(TrustStore::new());
        let cache = RepositoryCache::new(tmp.path().join("cache"), Arc::clone(&trust), fetcher.clone());
        Fixture {
            tmp,
            fetcher,
            trust,
            cache,
        }
    }

    /// Publish signed metadata at `base`
    pub fn publish(&self, base: &str, cert: &Cert, data: &[u8]) {
        self.fetcher.insert(&index_url(base), data.to_vec());
        self.fetcher.insert(&sig_url(base), sign(cert, data));
    }
}

pub fn repo(id: &str, base: &str) -> RepoConfig {
    RepoConfig::new(id).with_baseurl(base)
}
