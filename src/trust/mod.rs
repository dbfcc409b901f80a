// src/trust/mod.rs

//! OpenPGP trust store for metadata and package signatures
//!
//! The trust store holds the set of accepted signing certificates, keyed by
//! primary key fingerprint, and verifies detached signatures against them
//! using the sequoia-openpgp library (pure Rust implementation).
//!
//! The store is append-only: adding a certificate that is already present is
//! a successful no-op, because repositories commonly ship overlapping keys.
//! Readers verify against a snapshot of the held keys, so a concurrent
//! `add_key` is either fully visible to a `verify` call or not at all.

use crate::diagnostics::Diagnostics;
use crate::error::TrustError;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::SerializeInto;
use openpgp::{Cert, Packet, PacketPile};
use parking_lot::RwLock;
use sequoia_openpgp as openpgp;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
pub(crate) mod test_support;

/// A signer's public certificate
#[derive(Debug, Clone)]
pub struct PublicKey {
    /// Short key id of the primary key (hex)
    pub key_id: String,
    /// Fingerprint of the primary key (upper-case hex)
    pub fingerprint: String,
    /// ASCII-armored public certificate
    raw: Vec<u8>,
    cert: Cert,
}

impl PublicKey {
    /// Parse an armored or binary OpenPGP certificate
    ///
    /// Secret key material, if any, is discarded.
    pub fn parse(data: &[u8]) -> Result<Self, TrustError> {
        let cert = Cert::from_bytes(data)
            .map_err(|e| TrustError::MalformedKey(format!("failed to parse public key: {e}")))?
            .strip_secret_key_material();

        let raw = cert
            .armored()
            .to_vec()
            .map_err(|e| TrustError::MalformedKey(format!("failed to serialize key: {e}")))?;

        Ok(Self {
            key_id: cert.keyid().to_hex(),
            fingerprint: cert.fingerprint().to_hex(),
            raw,
            cert,
        })
    }

    /// The armored public certificate
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// User ids bound to the certificate
    pub fn user_ids(&self) -> Vec<String> {
        self.cert
            .userids()
            .map(|u| String::from_utf8_lossy(u.userid().value()).into_owned())
            .collect()
    }
}

/// Outcome of adding a key to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyImport {
    /// The key was new and is now trusted
    Added(String),
    /// A key with the same fingerprint was already trusted
    AlreadyPresent(String),
}

impl KeyImport {
    pub fn fingerprint(&self) -> &str {
        match self {
            KeyImport::Added(fp) | KeyImport::AlreadyPresent(fp) => fp,
        }
    }
}

/// Append-only set of trusted signing certificates
#[derive(Debug, Default)]
pub struct TrustStore {
    keys: RwLock<BTreeMap<String, Arc<PublicKey>>>,
    /// When set, newly added keys are written here as `<fingerprint>.asc`
    keyring_dir: Option<PathBuf>,
}

impl TrustStore {
    /// Create an empty in-memory trust store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a persistent trust store backed by a keyring directory
    ///
    /// Existing keys in the directory are imported; keys added later are
    /// written back to it.
    pub fn with_keyring_dir(keyring_dir: PathBuf, diagnostics: &mut Diagnostics) -> Result<Self, TrustError> {
        if !keyring_dir.exists() {
            fs::create_dir_all(&keyring_dir)
                .map_err(|e| TrustError::Io(format!("Failed to create keyring directory: {e}")))?;
        }

        let mut store = Self::new();
        let count = store.import_directory(&keyring_dir, diagnostics)?;
        debug!("Loaded {} keys from {}", count, keyring_dir.display());
        store.keyring_dir = Some(keyring_dir);
        Ok(store)
    }

    /// Add a public key
    ///
    /// Adding a key whose fingerprint is already present succeeds and
    /// reports [`KeyImport::AlreadyPresent`].
    pub fn add_key(&self, raw_key: &[u8]) -> Result<KeyImport, TrustError> {
        let key = PublicKey::parse(raw_key)?;
        let fingerprint = key.fingerprint.clone();

        let mut keys = self.keys.write();
        if keys.contains_key(&fingerprint) {
            debug!("Key {} is already present", fingerprint);
            return Ok(KeyImport::AlreadyPresent(fingerprint));
        }

        if let Some(dir) = &self.keyring_dir {
            persist_key(dir, &key)?;
        }

        keys.insert(fingerprint.clone(), Arc::new(key));
        drop(keys);

        info!("Added public key {}", fingerprint);
        Ok(KeyImport::Added(fingerprint))
    }

    /// Import every regular file in a directory as a public key
    ///
    /// Symlinks and directories are ignored. A file that fails to import is
    /// reported as a warning and does not stop the scan. A missing directory
    /// means no keys are available. Returns the number of newly added keys.
    pub fn import_directory(&self, dir: &Path, diagnostics: &mut Diagnostics) -> Result<usize, TrustError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                diagnostics.debug(format!("Key directory {} does not exist", dir.display()));
                return Ok(0);
            }
            Err(e) => {
                diagnostics.warn(format!("Failed to read key directory {}: {e}", dir.display()));
                return Ok(0);
            }
        };

        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();

        let mut added = 0;
        for path in paths {
            // symlink_metadata does not follow links, so links report as such
            let is_regular = fs::symlink_metadata(&path)
                .map(|m| m.file_type().is_file())
                .unwrap_or(false);
            if !is_regular {
                debug!("Skipping non-regular file {}", path.display());
                continue;
            }

            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    diagnostics.warn(format!("Failed to read {}: {e}", path.display()));
                    continue;
                }
            };

            match self.add_key(&data) {
                Ok(KeyImport::Added(_)) => added += 1,
                Ok(KeyImport::AlreadyPresent(_)) => {
                    diagnostics.debug(format!("{} is already present", path.display()));
                }
                Err(e) => diagnostics.warn(format!("{}: {e}", path.display())),
            }
        }

        Ok(added)
    }

    /// Verify a detached signature over a payload
    ///
    /// Returns the fingerprint of the certificate whose key made the
    /// signature. A missing signature yields [`TrustError::Unsigned`]; a
    /// signature that does not parse or matches no held key yields
    /// [`TrustError::SignatureInvalid`].
    pub fn verify(
        &self,
        payload: &[u8],
        signature: Option<&[u8]>,
        diagnostics: &mut Diagnostics,
    ) -> Result<String, TrustError> {
        let Some(signature) = signature else {
            diagnostics.warn("payload is not signed");
            return Err(TrustError::Unsigned("no signature supplied".to_string()));
        };

        let pile = PacketPile::from_bytes(signature).map_err(|e| {
            diagnostics.warn(format!("failed to parse signature: {e}"));
            TrustError::SignatureInvalid(format!("failed to parse signature: {e}"))
        })?;

        let mut signatures: Vec<_> = pile
            .descendants()
            .filter_map(|packet| match packet {
                Packet::Signature(sig) => Some(sig.clone()),
                _ => None,
            })
            .collect();

        if signatures.is_empty() {
            diagnostics.warn("signature data contains no signature packets");
            return Err(TrustError::SignatureInvalid(
                "no signature packets found".to_string(),
            ));
        }

        // Verify against a snapshot so the lock is not held during crypto
        let keys: Vec<Arc<PublicKey>> = self.keys.read().values().cloned().collect();
        let policy = StandardPolicy::new();

        for key in &keys {
            for ka in key.cert.keys().with_policy(&policy, None) {
                if !ka.for_signing() {
                    continue;
                }
                for sig in signatures.iter_mut() {
                    if sig.verify_message(ka.key(), payload).is_ok() {
                        diagnostics.debug(format!("signature made by {}", key.fingerprint));
                        return Ok(key.fingerprint.clone());
                    }
                }
            }
        }

        diagnostics.warn(format!(
            "signature does not match any of {} trusted keys",
            keys.len()
        ));
        Err(TrustError::SignatureInvalid(
            "no valid signature from a trusted key".to_string(),
        ))
    }

    /// Verify a package payload file against a detached signature
    ///
    /// Failure is final for the package; there is no override.
    pub fn verify_package(
        &self,
        path: &Path,
        signature: Option<&[u8]>,
        diagnostics: &mut Diagnostics,
    ) -> Result<String, TrustError> {
        let payload = {
            let mut file = File::open(path)
                .map_err(|e| TrustError::Io(format!("failed to open {}: {e}", path.display())))?;
            let mut payload = Vec::new();
            file.read_to_end(&mut payload)
                .map_err(|e| TrustError::Io(format!("failed to read {}: {e}", path.display())))?;
            payload
        };

        match self.verify(&payload, signature, diagnostics) {
            Ok(fingerprint) => {
                info!("Verified {} (signer {})", path.display(), fingerprint);
                Ok(fingerprint)
            }
            Err(TrustError::Unsigned(_)) => Err(TrustError::Unsigned(format!(
                "package not signed: {}",
                path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
            ))),
            Err(TrustError::SignatureInvalid(reason)) => Err(TrustError::SignatureInvalid(
                format!("{} could not be verified: {reason}", path.display()),
            )),
            Err(e) => Err(e),
        }
    }

    /// Whether a certificate with this fingerprint is trusted
    pub fn has_signer(&self, fingerprint: &str) -> bool {
        self.keys.read().contains_key(&normalize_fingerprint(fingerprint))
    }

    /// All held keys, ordered by fingerprint
    pub fn keys(&self) -> Vec<Arc<PublicKey>> {
        self.keys.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

/// Upper-case hex without spaces, the form fingerprints are stored in
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

fn persist_key(dir: &Path, key: &PublicKey) -> Result<(), TrustError> {
    let target = dir.join(format!("{}.asc", key.fingerprint));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| TrustError::Io(format!("Failed to write key: {e}")))?;
    tmp.write_all(key.raw())
        .map_err(|e| TrustError::Io(format!("Failed to write key: {e}")))?;
    tmp.persist(&target)
        .map_err(|e| TrustError::Io(format!("Failed to write key: {e}")))?;
    Ok(())
}
