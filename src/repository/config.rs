// src/repository/config.rs

//! Repository configuration records
//!
//! A record is validated before any network or filesystem access: a
//! repository must have at least one of baseurl, mirrorlist or metalink,
//! and every locator must be a usable URL or absolute path.

use crate::error::{ConfigError, LocatorError};
use crate::options::{OptionSpec, OptionValue};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default repository priority (lower is preferred)
pub const DEFAULT_PRIORITY: i32 = 99;

/// One configured package source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub id: String,
    pub name: Option<String>,
    pub baseurl: Vec<String>,
    pub mirrorlist: Option<String>,
    pub metalink: Option<String>,
    /// Require a valid signature on the repository metadata
    pub gpgcheck: bool,
    /// Key locators imported before verification
    pub gpgkey: Vec<String>,
    pub enabled: bool,
    pub priority: i32,
    /// Per-repository override of the cache freshness window, in seconds
    pub metadata_expire: Option<u64>,
    /// When false the repository is required: loading fails if it is unavailable
    pub skip_if_unavailable: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: None,
            baseurl: Vec::new(),
            mirrorlist: None,
            metalink: None,
            gpgcheck: true,
            gpgkey: Vec::new(),
            enabled: true,
            priority: DEFAULT_PRIORITY,
            metadata_expire: None,
            skip_if_unavailable: true,
        }
    }
}

impl RepoConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_baseurl(mut self, url: impl Into<String>) -> Self {
        self.baseurl.push(url.into());
        self
    }

    pub fn with_mirrorlist(mut self, url: impl Into<String>) -> Self {
        self.mirrorlist = Some(url.into());
        self
    }

    pub fn with_metalink(mut self, url: impl Into<String>) -> Self {
        self.metalink = Some(url.into());
        self
    }

    pub fn with_gpgcheck(mut self, gpgcheck: bool) -> Self {
        self.gpgcheck = gpgcheck;
        self
    }

    pub fn with_gpgkey(mut self, locator: impl Into<String>) -> Self {
        self.gpgkey.push(locator.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata_expire(mut self, seconds: u64) -> Self {
        self.metadata_expire = Some(seconds);
        self
    }

    pub fn with_skip_if_unavailable(mut self, skip: bool) -> Self {
        self.skip_if_unavailable = skip;
        self
    }

    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn has_locator(&self) -> bool {
        !self.baseurl.is_empty() || self.mirrorlist.is_some() || self.metalink.is_some()
    }

    /// Validate the record without touching the network or filesystem
    pub fn validate(&self) -> Result<(), ConfigError> {
        let id_ok = !self.id.is_empty()
            && !self.id.starts_with('.')
            && self
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
        if !id_ok {
            return Err(ConfigError::InvalidId(self.id.clone()));
        }

        if !self.has_locator() {
            return Err(ConfigError::NoLocator(self.id.clone()));
        }

        let locators = self
            .baseurl
            .iter()
            .chain(self.mirrorlist.iter())
            .chain(self.metalink.iter())
            .chain(self.gpgkey.iter());
        for locator in locators {
            parse_locator(locator).map_err(|source| ConfigError::InvalidLocator {
                repo: self.id.clone(),
                locator: locator.clone(),
                source,
            })?;
        }

        Ok(())
    }

    /// Current value of a named option
    pub fn option(&self, name: &str) -> Option<OptionValue> {
        let value = match name {
            "name" => OptionValue::String(self.display_name().to_string()),
            "baseurl" => OptionValue::StringList(self.baseurl.clone()),
            "mirrorlist" => OptionValue::String(self.mirrorlist.clone().unwrap_or_default()),
            "metalink" => OptionValue::String(self.metalink.clone().unwrap_or_default()),
            "gpgcheck" => OptionValue::Bool(self.gpgcheck),
            "gpgkey" => OptionValue::StringList(self.gpgkey.clone()),
            "enabled" => OptionValue::Bool(self.enabled),
            "priority" => OptionValue::String(self.priority.to_string()),
            "metadata_expire" => OptionValue::String(
                self.metadata_expire
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            ),
            "skip_if_unavailable" => OptionValue::Bool(self.skip_if_unavailable),
            _ => return None,
        };
        Some(value)
    }

    /// Set a named option from its textual form, like `--setopt`
    pub fn set_option(&mut self, name: &str, raw: &str) -> Result<(), ConfigError> {
        let id = self.id.clone();
        let invalid = || ConfigError::Parse(format!("invalid value '{raw}' for {id}.{name}"));
        let spec = repo_options()
            .into_iter()
            .find(|o| o.name == name)
            .ok_or_else(|| ConfigError::Parse(format!("unknown repository option '{name}'")))?;
        let value = OptionValue::parse(spec.kind(), raw).ok_or_else(invalid)?;

        match (name, value) {
            ("name", OptionValue::String(v)) => self.name = Some(v),
            ("baseurl", OptionValue::StringList(v)) => self.baseurl = v,
            ("mirrorlist", OptionValue::String(v)) => self.mirrorlist = (!v.is_empty()).then_some(v),
            ("metalink", OptionValue::String(v)) => self.metalink = (!v.is_empty()).then_some(v),
            ("gpgcheck", OptionValue::Bool(v)) => self.gpgcheck = v,
            ("gpgkey", OptionValue::StringList(v)) => self.gpgkey = v,
            ("enabled", OptionValue::Bool(v)) => self.enabled = v,
            ("skip_if_unavailable", OptionValue::Bool(v)) => self.skip_if_unavailable = v,
            ("priority", OptionValue::String(v)) => {
                self.priority = v.trim().parse().map_err(|_| invalid())?;
            }
            ("metadata_expire", OptionValue::String(v)) => {
                self.metadata_expire = match v.trim() {
                    "" | "never" => None,
                    secs => Some(secs.parse().map_err(|_| invalid())?),
                };
            }
            _ => return Err(invalid()),
        }
        Ok(())
    }
}

/// Options a repository record understands
pub fn repo_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::new("name", "human readable repository name", OptionValue::String(String::new())),
        OptionSpec::new("baseurl", "base locators of the repository", OptionValue::StringList(Vec::new())),
        OptionSpec::new("mirrorlist", "locator of a mirror list", OptionValue::String(String::new())),
        OptionSpec::new("metalink", "locator of a metalink document", OptionValue::String(String::new())),
        OptionSpec::new("gpgcheck", "require signed metadata", OptionValue::Bool(true)),
        OptionSpec::new("gpgkey", "key locators imported before verification", OptionValue::StringList(Vec::new())),
        OptionSpec::new("enabled", "include the repository in sync and resolution", OptionValue::Bool(true)),
        OptionSpec::new("priority", "repository priority, lower wins", OptionValue::String(DEFAULT_PRIORITY.to_string())),
        OptionSpec::new("metadata_expire", "seconds before cached metadata expires", OptionValue::String(String::new())),
        OptionSpec::new(
            "skip_if_unavailable",
            "continue without the repository when it cannot be synced or loaded",
            OptionValue::Bool(true),
        ),
    ]
}

/// Parse a locator into a URL; absolute paths become `file://` URLs
pub fn parse_locator(locator: &str) -> Result<Url, LocatorError> {
    let locator = locator.trim();
    if locator.is_empty() {
        return Err(LocatorError::Empty);
    }
    if locator.starts_with('/') {
        return Url::from_file_path(locator).map_err(|_| LocatorError::NotAbsolute(locator.to_string()));
    }

    let url = Url::parse(locator)?;
    match url.scheme() {
        "http" | "https" | "ftp" | "file" => Ok(url),
        other => Err(LocatorError::UnsupportedScheme(other.to_string())),
    }
}

/// Join a relative path onto a base locator
pub fn join_locator(base: &str, relative: &str) -> Result<Url, LocatorError> {
    let mut base = parse_locator(base)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(relative)?)
}
