// src/error.rs

//! Error types for the resolution core
//!
//! Each subsystem has its own error enum so callers can match on the
//! failure class that matters to them. The crate-level [`Error`] wraps all
//! of them for callers that only need to propagate.

use thiserror::Error;

/// Errors raised by the trust store
#[derive(Error, Debug)]
pub enum TrustError {
    /// The key data could not be parsed as an OpenPGP public key
    #[error("Malformed public key: {0}")]
    MalformedKey(String),

    /// The signature did not parse or matched none of the held keys
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// A signature was required but none was supplied
    #[error("Unsigned: {0}")]
    Unsigned(String),

    /// I/O error while reading keys or payloads
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors raised while validating a repository configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// None of baseurl, mirrorlist or metalink is set
    #[error("Repository '{0}' has no baseurl, mirrorlist or metalink")]
    NoLocator(String),

    /// A locator is set but is not a usable URL or path
    #[error("Repository '{repo}' has invalid locator '{locator}': {source}")]
    InvalidLocator {
        repo: String,
        locator: String,
        #[source]
        source: LocatorError,
    },

    /// A repository with this id is already configured
    #[error("Repository '{0}' is already configured")]
    DuplicateId(String),

    /// Repository ids must be non-empty and path-safe
    #[error("Invalid repository id '{0}'")]
    InvalidId(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors raised while parsing locators and mirror documents
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("empty locator")]
    Empty,

    /// A path locator that is not absolute
    #[error("'{0}' is not an absolute path")]
    NotAbsolute(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    /// A metalink document is not well-formed XML
    #[error("XML error at position {position}: {reason}")]
    Xml { position: u64, reason: String },

    /// A mirrorlist or metalink could not be downloaded
    #[error("failed to fetch {locator}: {reason}")]
    Fetch { locator: String, reason: String },

    #[error("{0} is not UTF-8")]
    NotUtf8(String),
}

/// Errors raised while parsing a repository metadata index
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to parse metadata JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("package record without name or arch: {0}")]
    InvalidPackage(String),

    #[error("module stream without name: {0}")]
    InvalidModule(String),

    #[error("advisory without id")]
    AdvisoryWithoutId,
}

/// Errors raised while synchronizing repository metadata
///
/// Cloneable so that one in-flight sync can hand its outcome to every
/// caller that coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No repository is registered under this handle or id
    #[error("Unknown repository: {0}")]
    UnknownRepository(String),

    /// The handle refers to a slot that has since been reused
    #[error("Stale repository handle for '{0}'")]
    StaleHandle(String),

    /// Metadata could not be downloaded from any mirror
    #[error("Failed to fetch metadata for '{repo}': {reason}")]
    Fetch { repo: String, reason: String },

    /// Metadata signature did not verify
    #[error("Untrusted metadata for '{repo}': {reason}")]
    UntrustedMetadata { repo: String, reason: String },

    /// The sync was cancelled; the repository is left `Failed`
    #[error("Sync of '{0}' was cancelled")]
    Cancelled(String),

    /// Cache directory could not be written
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors raised while loading cached metadata into the universe
#[derive(Error, Debug)]
pub enum LoadError {
    /// The repository has no cached metadata to load
    #[error("Repository '{0}' has no cached metadata; sync it first")]
    NotCached(String),

    /// The cached metadata is missing or corrupt; a re-sync is required
    #[error("Malformed metadata for '{repo}': {reason}")]
    Malformed { repo: String, reason: String },

    /// The cached metadata index does not parse
    #[error("Invalid metadata for '{repo}': {source}")]
    Metadata {
        repo: String,
        #[source]
        source: MetadataError,
    },

    /// A repository that may not be skipped is unavailable
    #[error("Repository '{repo}' is required but unavailable: {reason}")]
    RequiredUnavailable { repo: String, reason: String },

    /// The handle refers to a slot that has since been reused
    #[error("Stale repository handle for '{0}'")]
    StaleHandle(String),

    /// Cache files could not be read
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors raised by module stream state changes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// A different stream of the same module is already enabled
    #[error("Cannot enable {module}:{requested}, stream {enabled} is already enabled")]
    StreamConflict {
        module: String,
        enabled: String,
        requested: String,
    },

    /// No module with this name is known
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// The module exists but has no such stream
    #[error("Unknown stream {stream} for module {module}")]
    UnknownStream { module: String, stream: String },

    /// The module spec could not be parsed
    #[error("Invalid module spec: {0}")]
    InvalidSpec(String),
}

/// Errors raised by goal resolution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GoalError {
    /// `resolve` was called on a goal that was already consumed
    #[error("Goal has already been resolved")]
    AlreadyResolved,

    /// A strict job matched no candidate
    #[error("No match for argument: {target}{}", format_hint(.hint))]
    NoMatch {
        target: String,
        hint: Option<String>,
    },

    /// The jobs cannot be satisfied together
    #[error("Goal is unresolvable:\n{}", format_problems(.0))]
    Unresolvable(Vec<crate::goal::Problem>),

    /// Resolution was cancelled; no transaction is produced
    #[error("Resolution was cancelled")]
    Cancelled,

    /// A module job failed
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    /// The installed-package database could not be queried
    #[error("Installed package database error: {0}")]
    InstalledDb(String),
}

fn format_hint(hint: &Option<String>) -> String {
    hint.as_ref().map(|h| format!(" ({h})")).unwrap_or_default()
}

fn format_problems(problems: &[crate::goal::Problem]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors raised while parsing versions and capabilities
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The epoch is not a number
    #[error("Invalid epoch in version '{0}'")]
    InvalidEpoch(String),

    /// The version component is empty
    #[error("Empty version component in '{0}'")]
    EmptyVersion(String),

    /// A capability expression could not be parsed
    #[error("Invalid capability '{0}'")]
    InvalidCapability(String),
}

/// Crate-level error wrapping every subsystem error
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Goal(#[from] GoalError),

    #[error(transparent)]
    Version(#[from] VersionError),
}

pub type Result<T> = std::result::Result<T, Error>;
