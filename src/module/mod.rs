// src/module/mod.rs

//! Module streams and their enablement state
//!
//! A module stream is a named, versioned bundle of packages representing
//! one selectable variant of a logical module (e.g. `nodejs:18` vs
//! `nodejs:20`). The [`ModuleIndex`] is a view over the module streams of a
//! [`UniverseSnapshot`]; it never copies stream definitions out of the
//! repositories that shipped them.
//!
//! At most one stream per module may be enabled. Enabling a different
//! stream is an explicit `switch`, never an implicit choice.

use crate::error::ModuleError;
use crate::universe::{Nevra, PackageRecord, UniverseSnapshot};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use tracing::{debug, info};

fn default_arch() -> String {
    "noarch".to_string()
}

/// A module stream definition as shipped in repository metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStream {
    pub name: String,
    pub stream: String,
    pub version: u64,
    #[serde(default)]
    pub context: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default)]
    pub summary: String,
    /// Required module streams as `name:stream` (empty stream means any)
    #[serde(default)]
    pub requires: Vec<String>,
    /// Artifact NEVRAs belonging to this stream
    #[serde(default)]
    pub packages: Vec<String>,
    /// Whether this is the module's default stream
    #[serde(default)]
    pub default: bool,
    /// Repository that shipped the definition
    #[serde(default)]
    pub repo: String,
}

impl ModuleStream {
    /// `name:stream:version:context:arch`
    pub fn full_name(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.name, self.stream, self.version, self.context, self.arch
        )
    }

    /// Parsed `(module, stream)` pairs from `requires`
    pub fn required_streams(&self) -> Vec<(String, Option<String>)> {
        self.requires
            .iter()
            .map(|r| match r.split_once(':') {
                Some((m, s)) if !s.is_empty() => (m.to_string(), Some(s.to_string())),
                Some((m, _)) => (m.to_string(), None),
                None => (r.clone(), None),
            })
            .collect()
    }
}

/// Enablement state of one module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ModuleState {
    /// Untouched: the default stream, if any, is active
    #[default]
    Default,
    /// Exactly this stream is active
    Enabled(String),
    /// No stream of the module is active
    Disabled,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::Default => write!(f, "default"),
            ModuleState::Enabled(stream) => write!(f, "enabled ({stream})"),
            ModuleState::Disabled => write!(f, "disabled"),
        }
    }
}

/// A state change of one module, produced by goal resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleChange {
    pub module: String,
    pub from: ModuleState,
    pub to: ModuleState,
}

impl fmt::Display for ModuleChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.module, self.from, self.to)
    }
}

/// A `name[:stream[:version[:context[:arch]]]]` pattern
///
/// Missing fields are wildcards; present fields may use glob syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    pub stream: Option<String>,
    pub version: Option<String>,
    pub context: Option<String>,
    pub arch: Option<String>,
}

impl ModuleSpec {
    pub fn parse(spec: &str) -> Result<Self, ModuleError> {
        let spec = spec.trim();
        // A trailing /profile selects an install profile, which does not
        // narrow the stream match
        let spec = spec.split_once('/').map(|(s, _)| s).unwrap_or(spec);

        let fields: Vec<&str> = spec.split(':').collect();
        if fields.len() > 5 || fields[0].is_empty() {
            return Err(ModuleError::InvalidSpec(spec.to_string()));
        }

        for field in &fields {
            Pattern::new(field).map_err(|_| ModuleError::InvalidSpec(spec.to_string()))?;
        }

        let field = |i: usize| {
            fields
                .get(i)
                .filter(|f| !f.is_empty())
                .map(|f| f.to_string())
        };

        Ok(Self {
            name: fields[0].to_string(),
            stream: field(1),
            version: field(2),
            context: field(3),
            arch: field(4),
        })
    }

    fn field_matches(pattern: &Option<String>, value: &str) -> bool {
        match pattern {
            None => true,
            Some(p) => Pattern::new(p).map(|p| p.matches(value)).unwrap_or(false),
        }
    }

    fn name_matches(&self, name: &str) -> bool {
        Self::field_matches(&Some(self.name.clone()), name)
    }

    pub fn matches(&self, stream: &ModuleStream) -> bool {
        self.name_matches(&stream.name)
            && Self::field_matches(&self.stream, &stream.stream)
            && Self::field_matches(&self.version, &stream.version.to_string())
            && Self::field_matches(&self.context, &stream.context)
            && Self::field_matches(&self.arch, &stream.arch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamRef {
    slice: usize,
    idx: usize,
}

/// View over the module streams of a universe snapshot, plus state
#[derive(Debug, Clone, Default)]
pub struct ModuleIndex {
    snapshot: UniverseSnapshot,
    entries: Vec<StreamRef>,
    /// Module name -> positions in `entries`, sorted
    by_module: BTreeMap<String, Vec<usize>>,
    /// Package name -> (entry position, artifact NEVRA)
    artifacts: HashMap<String, Vec<(usize, Nevra)>>,
    states: BTreeMap<String, ModuleState>,
}

impl ModuleIndex {
    /// Build the index from the module streams of a snapshot
    pub fn from_snapshot(snapshot: UniverseSnapshot) -> Self {
        let mut index = Self {
            snapshot,
            ..Default::default()
        };
        index.reindex();
        index
    }

    /// Point the index at a newer snapshot, keeping module states
    pub fn refresh(&mut self, snapshot: UniverseSnapshot) {
        self.snapshot = snapshot;
        self.reindex();
    }

    fn reindex(&mut self) {
        self.entries.clear();
        self.by_module.clear();
        self.artifacts.clear();

        for (slice_idx, slice) in self.snapshot.slices().iter().enumerate() {
            for (idx, _) in slice.content().modules.iter().enumerate() {
                self.entries.push(StreamRef {
                    slice: slice_idx,
                    idx,
                });
            }
        }

        let snapshot = self.snapshot.clone();
        let stream_at = |r: &StreamRef| &snapshot.slices()[r.slice].content().modules[r.idx];
        self.entries.sort_by(|a, b| {
            let (a, b) = (stream_at(a), stream_at(b));
            (&a.name, &a.stream, a.version, &a.context, &a.arch, &a.repo)
                .cmp(&(&b.name, &b.stream, b.version, &b.context, &b.arch, &b.repo))
        });

        for (pos, entry) in self.entries.iter().enumerate() {
            let stream = stream_at(entry);
            self.by_module.entry(stream.name.clone()).or_default().push(pos);
            for artifact in &stream.packages {
                match Nevra::parse(artifact) {
                    Some(nevra) => self
                        .artifacts
                        .entry(nevra.name.clone())
                        .or_default()
                        .push((pos, nevra)),
                    None => debug!("Ignoring malformed artifact {} in {}", artifact, stream.full_name()),
                }
            }
        }
    }

    fn stream(&self, pos: usize) -> &ModuleStream {
        let r = self.entries[pos];
        &self.snapshot.slices()[r.slice].content().modules[r.idx]
    }

    /// Every stream, ordered by name, stream, version, context and arch
    pub fn streams(&self) -> Vec<&ModuleStream> {
        (0..self.entries.len()).map(|pos| self.stream(pos)).collect()
    }

    /// Names of all known modules, sorted
    pub fn module_names(&self) -> Vec<&str> {
        self.by_module.keys().map(String::as_str).collect()
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.by_module.contains_key(module)
    }

    /// All streams of one module
    pub fn module_streams(&self, module: &str) -> Vec<&ModuleStream> {
        self.by_module
            .get(module)
            .map(|positions| positions.iter().map(|p| self.stream(*p)).collect())
            .unwrap_or_default()
    }

    /// Resolve a module spec to matching streams
    ///
    /// When the spec names no stream and the module has an enabled stream,
    /// only that stream is reported.
    pub fn resolve_spec(&self, pattern: &str) -> Result<Vec<&ModuleStream>, ModuleError> {
        let spec = ModuleSpec::parse(pattern)?;

        let mut matches = Vec::new();
        for (module, positions) in &self.by_module {
            if !spec.name_matches(module) {
                continue;
            }
            let enabled = match (&spec.stream, self.state(module)) {
                (None, ModuleState::Enabled(stream)) => Some(stream),
                _ => None,
            };
            for pos in positions {
                let stream = self.stream(*pos);
                if !spec.matches(stream) {
                    continue;
                }
                if enabled.as_ref().is_some_and(|e| e != &stream.stream) {
                    continue;
                }
                matches.push(stream);
            }
        }
        Ok(matches)
    }

    /// Current state of a module
    pub fn state(&self, module: &str) -> ModuleState {
        self.states.get(module).cloned().unwrap_or_default()
    }

    pub fn enabled_stream(&self, module: &str) -> Option<&str> {
        match self.states.get(module) {
            Some(ModuleState::Enabled(stream)) => Some(stream),
            _ => None,
        }
    }

    /// The stream used when a module is referenced without one
    pub fn default_stream(&self, module: &str) -> Option<String> {
        self.module_streams(module)
            .into_iter()
            .find(|s| s.default)
            .map(|s| s.stream.clone())
    }

    /// The stream a bare module reference resolves to: enabled, else default
    pub fn active_stream(&self, module: &str) -> Option<String> {
        match self.state(module) {
            ModuleState::Enabled(stream) => Some(stream),
            ModuleState::Disabled => None,
            ModuleState::Default => self.default_stream(module),
        }
    }

    fn check_known(&self, module: &str, stream: &str) -> Result<(), ModuleError> {
        let streams = self.module_streams(module);
        if streams.is_empty() {
            return Err(ModuleError::UnknownModule(module.to_string()));
        }
        if !streams.iter().any(|s| s.stream == stream) {
            return Err(ModuleError::UnknownStream {
                module: module.to_string(),
                stream: stream.to_string(),
            });
        }
        Ok(())
    }

    /// Enable a stream, together with the module streams it requires
    ///
    /// Fails with [`ModuleError::StreamConflict`] if a different stream of
    /// this or a required module is enabled. Nothing changes on failure.
    pub fn enable(&mut self, module: &str, stream: &str) -> Result<(), ModuleError> {
        self.check_known(module, stream)?;

        let mut plan: BTreeMap<String, String> = BTreeMap::new();
        let mut queue = VecDeque::from([(module.to_string(), stream.to_string())]);
        let mut seen = BTreeSet::new();

        while let Some((m, s)) = queue.pop_front() {
            if !seen.insert((m.clone(), s.clone())) {
                continue;
            }

            let current = self.enabled_stream(&m).map(str::to_string);
            let planned = plan.get(&m).cloned();
            if let Some(other) = current.or(planned).filter(|other| other != &s) {
                return Err(ModuleError::StreamConflict {
                    module: m,
                    enabled: other,
                    requested: s,
                });
            }
            if self.enabled_stream(&m) != Some(s.as_str()) {
                plan.insert(m.clone(), s.clone());
            }

            // Requirements of the newest build of the stream
            let Some(newest) = self
                .module_streams(&m)
                .into_iter()
                .filter(|x| x.stream == s)
                .max_by_key(|x| x.version)
            else {
                continue;
            };

            for (req_module, req_stream) in newest.required_streams() {
                if !self.contains_module(&req_module) {
                    debug!("{}:{} requires unknown module {}, skipping", m, s, req_module);
                    continue;
                }
                let target = req_stream
                    .or_else(|| self.enabled_stream(&req_module).map(str::to_string))
                    .or_else(|| plan.get(&req_module).cloned())
                    .or_else(|| self.default_stream(&req_module));
                match target {
                    Some(t) => {
                        self.check_known(&req_module, &t)?;
                        queue.push_back((req_module, t));
                    }
                    None => debug!("No stream to enable for required module {}", req_module),
                }
            }
        }

        for (m, s) in plan {
            info!("Enabling module stream {}:{}", m, s);
            self.states.insert(m, ModuleState::Enabled(s));
        }
        Ok(())
    }

    /// Disable a module: none of its streams is active afterwards
    pub fn disable(&mut self, module: &str) -> Result<(), ModuleError> {
        if !self.contains_module(module) {
            return Err(ModuleError::UnknownModule(module.to_string()));
        }
        info!("Disabling module {}", module);
        self.states.insert(module.to_string(), ModuleState::Disabled);
        Ok(())
    }

    /// Return a module to its untouched state
    pub fn reset(&mut self, module: &str) -> Result<(), ModuleError> {
        if !self.contains_module(module) {
            return Err(ModuleError::UnknownModule(module.to_string()));
        }
        self.states.remove(module);
        Ok(())
    }

    /// Disable the current stream and enable another, as one step
    pub fn switch(&mut self, module: &str, stream: &str) -> Result<(), ModuleError> {
        self.check_known(module, stream)?;
        let saved = self.states.clone();
        self.states.remove(module);
        if let Err(e) = self.enable(module, stream) {
            self.states = saved;
            return Err(e);
        }
        Ok(())
    }

    /// Whether a stream is currently active
    pub fn is_active(&self, stream: &ModuleStream) -> bool {
        match self.state(&stream.name) {
            ModuleState::Enabled(s) => s == stream.stream,
            ModuleState::Disabled => false,
            ModuleState::Default => stream.default,
        }
    }

    /// Module streams a package is an artifact of
    pub fn streams_of(&self, record: &PackageRecord) -> Vec<&ModuleStream> {
        self.artifacts
            .get(&record.name)
            .map(|arts| {
                arts.iter()
                    .filter(|(_, nevra)| nevra.matches(record))
                    .map(|(pos, _)| self.stream(*pos))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Modular filtering
    ///
    /// A modular package is eligible only while one of its streams is
    /// active. A non-modular package is hidden when an active stream ships
    /// a package of the same name.
    pub fn is_package_eligible(&self, record: &PackageRecord) -> bool {
        if record.is_installed() {
            return true;
        }
        let Some(arts) = self.artifacts.get(&record.name) else {
            return true;
        };

        let own: Vec<&ModuleStream> = self.streams_of(record);
        if !own.is_empty() {
            return own.iter().any(|s| self.is_active(s));
        }

        !arts.iter().any(|(pos, _)| self.is_active(self.stream(*pos)))
    }

    /// State changes that turn `self` into `other`
    pub fn diff(&self, other: &ModuleIndex) -> Vec<ModuleChange> {
        let modules: BTreeSet<&String> = self.states.keys().chain(other.states.keys()).collect();
        modules
            .into_iter()
            .filter_map(|m| {
                let from = self.state(m);
                let to = other.state(m);
                (from != to).then(|| ModuleChange {
                    module: m.clone(),
                    from,
                    to,
                })
            })
            .collect()
    }

    /// Commit state changes computed by goal resolution
    pub fn apply(&mut self, changes: &[ModuleChange]) {
        for change in changes {
            match &change.to {
                ModuleState::Default => {
                    self.states.remove(&change.module);
                }
                state => {
                    self.states.insert(change.module.clone(), state.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::{RepoContent, RepoSlice};
    use crate::version::RpmVersion;

    fn stream(name: &str, stream: &str, version: u64, default: bool, packages: &[&str]) -> ModuleStream {
        ModuleStream {
            name: name.to_string(),
            stream: stream.to_string(),
            version,
            context: "abcd1234".to_string(),
            arch: "x86_64".to_string(),
            summary: String::new(),
            requires: Vec::new(),
            packages: packages.iter().map(|p| p.to_string()).collect(),
            default,
            repo: "modular".to_string(),
        }
    }

    fn index(modules: Vec<ModuleStream>, packages: Vec<PackageRecord>) -> ModuleIndex {
        let slice = RepoSlice::new(
            "modular",
            99,
            RepoContent {
                packages,
                modules,
                advisories: Vec::new(),
            },
        );
        ModuleIndex::from_snapshot(UniverseSnapshot::from_slices(vec![slice]))
    }

    fn testmodule() -> ModuleIndex {
        index(
            vec![
                stream("testmodule", "8.0", 1, true, &[]),
                stream("testmodule", "9.0", 1, false, &[]),
                stream("testmodule", "9.0", 2, false, &[]),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn test_parse_spec() {
        let spec = ModuleSpec::parse("nodejs:18::abcd/common").unwrap();
        assert_eq!(spec.name, "nodejs");
        assert_eq!(spec.stream.as_deref(), Some("18"));
        assert_eq!(spec.version, None);
        assert_eq!(spec.context.as_deref(), Some("abcd"));
        assert!(ModuleSpec::parse(":18").is_err());
        assert!(ModuleSpec::parse("a:b:c:d:e:f").is_err());
    }

    #[test]
    fn test_resolve_spec_wildcards() {
        let idx = testmodule();
        assert_eq!(idx.resolve_spec("testmodule").unwrap().len(), 3);
        assert_eq!(idx.resolve_spec("testmodule:9.0").unwrap().len(), 2);
        assert_eq!(idx.resolve_spec("testmodule:9.0:2").unwrap().len(), 1);
        assert_eq!(idx.resolve_spec("test*").unwrap().len(), 3);
        assert!(idx.resolve_spec("other").unwrap().is_empty());
    }

    #[test]
    fn test_enable_conflict_then_switch() {
        let mut idx = testmodule();
        idx.enable("testmodule", "9.0").unwrap();

        let err = idx.enable("testmodule", "8.0").unwrap_err();
        assert!(matches!(err, ModuleError::StreamConflict { .. }));
        assert_eq!(idx.enabled_stream("testmodule"), Some("9.0"));

        idx.disable("testmodule").unwrap();
        idx.enable("testmodule", "8.0").unwrap();
        let streams: Vec<_> = idx
            .resolve_spec("testmodule")
            .unwrap()
            .into_iter()
            .map(|s| s.stream.clone())
            .collect();
        assert_eq!(streams, vec!["8.0"]);
    }

    #[test]
    fn test_switch_is_atomic() {
        let mut idx = testmodule();
        idx.enable("testmodule", "8.0").unwrap();
        idx.switch("testmodule", "9.0").unwrap();
        assert_eq!(idx.enabled_stream("testmodule"), Some("9.0"));

        let err = idx.switch("testmodule", "10.0").unwrap_err();
        assert!(matches!(err, ModuleError::UnknownStream { .. }));
        assert_eq!(idx.enabled_stream("testmodule"), Some("9.0"));
    }

    #[test]
    fn test_enable_pulls_required_streams() {
        let mut app = stream("app", "1", 1, false, &[]);
        app.requires.push("runtime:2".to_string());
        app.requires.push("platform:f39".to_string());
        let mut idx = index(
            vec![
                app,
                stream("runtime", "1", 1, true, &[]),
                stream("runtime", "2", 1, false, &[]),
            ],
            Vec::new(),
        );

        idx.enable("app", "1").unwrap();
        assert_eq!(idx.enabled_stream("runtime"), Some("2"));

        idx.reset("app").unwrap();
        idx.switch("runtime", "1").unwrap();
        let err = idx.enable("app", "1").unwrap_err();
        assert!(matches!(err, ModuleError::StreamConflict { .. }));
        assert_eq!(idx.state("app"), ModuleState::Default);
    }

    #[test]
    fn test_default_stream() {
        let idx = testmodule();
        assert_eq!(idx.default_stream("testmodule").as_deref(), Some("8.0"));
        assert_eq!(idx.active_stream("testmodule").as_deref(), Some("8.0"));
        assert_eq!(idx.default_stream("missing"), None);
    }

    #[test]
    fn test_modular_filtering() {
        let pkg = |evr: &str, repo: &str| {
            PackageRecord::new("nodejs", RpmVersion::parse(evr).unwrap(), "x86_64", repo)
        };
        let mut idx = index(
            vec![
                stream("nodejs", "18", 1, true, &["nodejs-1:18.19.0-1.module.x86_64"]),
                stream("nodejs", "20", 1, false, &["nodejs-1:20.10.0-1.module.x86_64"]),
            ],
            Vec::new(),
        );
        let v18 = pkg("1:18.19.0-1.module", "modular");
        let v20 = pkg("1:20.10.0-1.module", "modular");
        let plain = pkg("16.0-1", "fedora");

        // Default stream active
        assert!(idx.is_package_eligible(&v18));
        assert!(!idx.is_package_eligible(&v20));
        assert!(!idx.is_package_eligible(&plain));

        idx.switch("nodejs", "20").unwrap();
        assert!(!idx.is_package_eligible(&v18));
        assert!(idx.is_package_eligible(&v20));

        idx.disable("nodejs").unwrap();
        assert!(idx.is_package_eligible(&plain));
        assert!(!idx.is_package_eligible(&v20));
    }

    #[test]
    fn test_diff_and_apply() {
        let base = testmodule();
        let mut changed = base.clone();
        changed.enable("testmodule", "9.0").unwrap();

        let changes = base.diff(&changed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, ModuleState::Enabled("9.0".to_string()));

        let mut target = base.clone();
        target.apply(&changes);
        assert_eq!(target.enabled_stream("testmodule"), Some("9.0"));
    }
}
