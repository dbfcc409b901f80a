// src/version/mod.rs

//! Version handling and capability matching for package relations
//!
//! This module provides RPM-style epoch:version-release parsing and
//! ordering, version constraints, and capability expressions
//! (`name [op evr]`) as used by provides, requires, conflicts and obsoletes.

use crate::error::VersionError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Compare two version or release strings segment by segment
///
/// Strings are split into runs of digits and runs of letters; any other
/// character only separates segments. Numeric segments compare numerically,
/// alphabetic segments lexically, and a numeric segment is newer than an
/// alphabetic one. A `~` sorts before everything, including the end of the
/// string. When one string runs out, a leftover numeric segment makes the
/// other side newer, a leftover alphabetic segment makes it older.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    loop {
        one = trim_separators(one);
        two = trim_separators(two);

        match (one.first() == Some(&b'~'), two.first() == Some(&b'~')) {
            (true, true) => {
                one = &one[1..];
                two = &two[1..];
                continue;
            }
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let (seg1, rest1) = split_segment(one, numeric);
        let (seg2, rest2) = split_segment(two, numeric);

        // Segments of different types: numeric is newer
        if seg2.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            compare_numeric(seg1, seg2)
        } else {
            seg1.cmp(seg2)
        };
        if ord != Ordering::Equal {
            return ord;
        }

        one = rest1;
        two = rest2;
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (false, true) => leftover_order(one),
        (true, false) => leftover_order(two).reverse(),
        (false, false) => Ordering::Equal,
    }
}

fn trim_separators(s: &[u8]) -> &[u8] {
    let skip = s
        .iter()
        .take_while(|c| !c.is_ascii_alphanumeric() && **c != b'~')
        .count();
    &s[skip..]
}

fn split_segment(s: &[u8], numeric: bool) -> (&[u8], &[u8]) {
    let len = s
        .iter()
        .take_while(|c| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        })
        .count();
    s.split_at(len)
}

fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let zeros = s.iter().take_while(|c| **c == b'0').count();
    &s[zeros..]
}

/// Ordering of the side that still has a segment left over
fn leftover_order(rest: &[u8]) -> Ordering {
    if rest[0].is_ascii_digit() {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

/// Feed the segments `rpmvercmp` compares into a hasher
///
/// Strings that compare equal produce the same sequence.
fn hash_segments<H: Hasher>(s: &str, state: &mut H) {
    let mut rest = s.as_bytes();
    loop {
        rest = trim_separators(rest);
        match rest.first() {
            None => break,
            Some(b'~') => {
                state.write_u8(b'~');
                rest = &rest[1..];
            }
            Some(c) => {
                let numeric = c.is_ascii_digit();
                let (seg, tail) = split_segment(rest, numeric);
                let seg = if numeric { strip_leading_zeros(seg) } else { seg };
                state.write_u8(if numeric { b'0' } else { b'a' });
                state.write_usize(seg.len());
                state.write(seg);
                rest = tail;
            }
        }
    }
    state.write_u8(b'$');
}

/// A parsed RPM version with epoch, version, and release components
///
/// Equality and hashing follow [`compare`](Self::compare): `1.05` equals
/// `1.5`, and `1_0` equals `1.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl RpmVersion {
    /// Parse an RPM version string
    ///
    /// Format: [epoch:]version[-release]
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1.2.3-4.el8" → epoch=0, version="1.2.3", release=Some("4.el8")
    /// - "1:2.3.4-5.el8" → epoch=1, version="2.3.4", release=Some("5.el8")
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let (epoch_str, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0 // Empty epoch (e.g., ":1.0.0") defaults to 0
        } else {
            epoch_str
                .parse::<u64>()
                .map_err(|_| VersionError::InvalidEpoch(s.to_string()))?
        };

        // The release is everything after the last dash
        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) if !r.is_empty() => (v.to_string(), Some(r.to_string())),
            Some((v, _)) => (v.to_string(), None),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(VersionError::EmptyVersion(s.to_string()));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Build a version from already separated components
    pub fn new(epoch: u64, version: impl Into<String>, release: Option<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release,
        }
    }

    /// Compare two RPM versions
    ///
    /// Epoch first, then version, then release. A missing release sorts
    /// before any release.
    pub fn compare(&self, other: &RpmVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => rpmvercmp(a, b),
                (a, b) => a.is_some().cmp(&b.is_some()),
            })
    }

    /// Compare for constraint matching
    ///
    /// Like [`compare`](Self::compare), but when either side has no release
    /// the releases are not compared, so `>= 1.0` matches `1.0-5`.
    pub fn compare_loose(&self, other: &RpmVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => rpmvercmp(a, b),
                _ => Ordering::Equal,
            })
    }
}

impl fmt::Display for RpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl PartialEq for RpmVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for RpmVersion {}

impl Hash for RpmVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        hash_segments(&self.version, state);
        match &self.release {
            Some(release) => {
                state.write_u8(1);
                hash_segments(release, state);
            }
            None => state.write_u8(0),
        }
    }
}

impl Ord for RpmVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for RpmVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for RpmVersion {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RpmVersion> for String {
    fn from(v: RpmVersion) -> Self {
        v.to_string()
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    /// Exact version match
    Exact(RpmVersion),
    /// Greater than
    GreaterThan(RpmVersion),
    /// Greater than or equal
    GreaterOrEqual(RpmVersion),
    /// Less than
    LessThan(RpmVersion),
    /// Less than or equal
    LessOrEqual(RpmVersion),
    /// Not equal
    NotEqual(RpmVersion),
    /// Both constraints must be satisfied (for ranges like ">= 1.0, < 2.0")
    And(Box<VersionConstraint>, Box<VersionConstraint>),
}

impl VersionConstraint {
    /// Parse a version constraint string
    ///
    /// Examples:
    /// - ">= 1.2.3" → GreaterOrEqual(1.2.3)
    /// - "< 2.0.0" → LessThan(2.0.0)
    /// - "= 1.5.0" → Exact(1.5.0)
    /// - "> 1.0" → GreaterThan(1.0)
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        // Compound constraints (e.g., ">= 1.0, < 2.0")
        if let Some((left, right)) = s.split_once(',') {
            let left = Self::parse(left)?;
            let right = Self::parse(right)?;
            return Ok(VersionConstraint::And(Box::new(left), Box::new(right)));
        }

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(RpmVersion::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionConstraint::LessOrEqual(RpmVersion::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix("!=") {
            Ok(VersionConstraint::NotEqual(RpmVersion::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionConstraint::GreaterThan(RpmVersion::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionConstraint::LessThan(RpmVersion::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix("==") {
            Ok(VersionConstraint::Exact(RpmVersion::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionConstraint::Exact(RpmVersion::parse(rest.trim())?))
        } else {
            // No operator means exact match
            Ok(VersionConstraint::Exact(RpmVersion::parse(s)?))
        }
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &RpmVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version.compare_loose(v) == Ordering::Equal,
            VersionConstraint::GreaterThan(v) => version.compare_loose(v) == Ordering::Greater,
            VersionConstraint::GreaterOrEqual(v) => version.compare_loose(v) != Ordering::Less,
            VersionConstraint::LessThan(v) => version.compare_loose(v) == Ordering::Less,
            VersionConstraint::LessOrEqual(v) => version.compare_loose(v) != Ordering::Greater,
            VersionConstraint::NotEqual(v) => version.compare_loose(v) != Ordering::Equal,
            VersionConstraint::And(left, right) => {
                left.satisfies(version) && right.satisfies(version)
            }
        }
    }

    /// Check whether some version could satisfy both constraints
    pub fn overlaps(&self, other: &VersionConstraint) -> bool {
        use VersionConstraint::*;

        match (self, other) {
            (Any, _) | (_, Any) => true,
            (Exact(v), c) | (c, Exact(v)) => c.satisfies(v),
            (And(l, r), c) | (c, And(l, r)) => l.overlaps(c) && r.overlaps(c),
            (NotEqual(_), _) | (_, NotEqual(_)) => true,
            (GreaterThan(_) | GreaterOrEqual(_), GreaterThan(_) | GreaterOrEqual(_)) => true,
            (LessThan(_) | LessOrEqual(_), LessThan(_) | LessOrEqual(_)) => true,
            (lower @ (GreaterThan(_) | GreaterOrEqual(_)), upper)
            | (upper, lower @ (GreaterThan(_) | GreaterOrEqual(_))) => {
                let (lo, lo_incl) = match lower {
                    GreaterThan(v) => (v, false),
                    GreaterOrEqual(v) => (v, true),
                    _ => return true,
                };
                let (hi, hi_incl) = match upper {
                    LessThan(v) => (v, false),
                    LessOrEqual(v) => (v, true),
                    _ => return true,
                };
                match lo.compare_loose(hi) {
                    Ordering::Less => true,
                    Ordering::Equal => lo_incl && hi_incl,
                    Ordering::Greater => false,
                }
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "= {}", v),
            VersionConstraint::GreaterThan(v) => write!(f, "> {}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">= {}", v),
            VersionConstraint::LessThan(v) => write!(f, "< {}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<= {}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!= {}", v),
            VersionConstraint::And(left, right) => write!(f, "{}, {}", left, right),
        }
    }
}

/// A named capability with an optional version range
///
/// Used for provides, requires, conflicts and obsoletes alike, e.g.
/// `libfoo`, `libfoo >= 1.2`, `webserver`, `/usr/bin/python3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl Capability {
    /// Parse `name [op evr]`
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        let (name, rest) = match s.find(|c: char| c.is_whitespace() || "<>=!".contains(c)) {
            Some(pos) => (&s[..pos], s[pos..].trim()),
            None => (s, ""),
        };

        if name.is_empty() {
            return Err(VersionError::InvalidCapability(s.to_string()));
        }

        let constraint = if rest.is_empty() {
            VersionConstraint::Any
        } else {
            if !rest.starts_with(['<', '>', '=', '!']) {
                return Err(VersionError::InvalidCapability(s.to_string()));
            }
            VersionConstraint::parse(rest)
                .map_err(|_| VersionError::InvalidCapability(s.to_string()))?
        };

        Ok(Self {
            name: name.to_string(),
            constraint,
        })
    }

    /// An unversioned capability
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: VersionConstraint::Any,
        }
    }

    /// A capability pinned to one exact version
    pub fn exact(name: impl Into<String>, version: RpmVersion) -> Self {
        Self {
            name: name.into(),
            constraint: VersionConstraint::Exact(version),
        }
    }

    /// Whether this capability names a file path
    pub fn is_file(&self) -> bool {
        self.name.starts_with('/')
    }

    /// Check whether a provided capability satisfies this requirement
    pub fn is_satisfied_by(&self, provide: &Capability) -> bool {
        self.name == provide.name && self.constraint.overlaps(&provide.constraint)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.constraint {
            VersionConstraint::Any => write!(f, "{}", self.name),
            ref c => write!(f, "{} {}", self.name, c),
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Capability {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Capability> for String {
    fn from(c: Capability) -> Self {
        c.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_version_parse_simple() {
        let v = RpmVersion::parse("1.2.3").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.2.3");
        assert_eq!(v.release, None);
    }

    #[test]
    fn test_rpm_version_parse_full() {
        let v = RpmVersion::parse("1:2.3.4-5.el8").unwrap();
        assert_eq!(v.epoch, 1);
        assert_eq!(v.version, "2.3.4");
        assert_eq!(v.release, Some("5.el8".to_string()));
    }

    #[test]
    fn test_rpm_version_parse_empty_epoch() {
        // Some packages have versions like ":1.02.208-2.fc43" with empty epoch
        let v = RpmVersion::parse(":1.02.208-2.fc43").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.02.208");
        assert_eq!(v.release, Some("2.fc43".to_string()));
    }

    #[test]
    fn test_rpm_version_parse_rejects_bad_epoch() {
        assert!(RpmVersion::parse("x:1.0").is_err());
        assert!(RpmVersion::parse("1:-2").is_err());
    }

    #[test]
    fn test_rpm_version_compare_epochs() {
        let v1 = RpmVersion::parse("1:1.0.0").unwrap();
        let v2 = RpmVersion::parse("0:2.0.0").unwrap();
        assert!(v1 > v2); // Higher epoch wins even with lower version
    }

    #[test]
    fn test_release_segments_order() {
        let a = RpmVersion::new(0, "1.0", Some("1.2.10".into()));
        let b = RpmVersion::new(0, "1.0", Some("1.2.9".into()));
        let c = RpmVersion::new(0, "1.0", Some("1.2.9a".into()));
        assert!(a > b);
        assert!(b > c);
        assert!(a > c);
    }

    #[test]
    fn test_rpmvercmp_rules() {
        assert_eq!(rpmvercmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(rpmvercmp("1.0010", "1.9"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.05", "1.5"), Ordering::Equal);
        assert_eq!(rpmvercmp("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(rpmvercmp("2.0", "2a"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0~rc1", "1.0~rc2"), Ordering::Less);
        assert_eq!(rpmvercmp("1_0", "1.0"), Ordering::Equal);
    }

    #[test]
    fn test_equality_matches_ordering() {
        use std::collections::HashSet;

        let a = RpmVersion::parse("1.05-1.fc39").unwrap();
        let b = RpmVersion::parse("1.5-1_fc39").unwrap();
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a, b);
        assert_eq!(HashSet::from([a.clone(), b]).len(), 1);

        assert_ne!(a, RpmVersion::parse("1.5").unwrap());
        assert_ne!(
            RpmVersion::parse("1.0~rc1").unwrap(),
            RpmVersion::parse("1.0rc1").unwrap()
        );
    }

    #[test]
    fn test_version_constraint_ignores_missing_release() {
        let c = VersionConstraint::parse(">= 1.2").unwrap();
        assert!(c.satisfies(&RpmVersion::parse("1.2-7.fc40").unwrap()));

        let c = VersionConstraint::parse("= 1.2-3").unwrap();
        assert!(!c.satisfies(&RpmVersion::parse("1.2-4").unwrap()));
    }

    #[test]
    fn test_version_constraint_and() {
        let c = VersionConstraint::parse(">= 1.0.0, < 2.0.0").unwrap();
        assert!(c.satisfies(&RpmVersion::parse("1.5.0").unwrap()));
        assert!(!c.satisfies(&RpmVersion::parse("2.0.0").unwrap()));
        assert!(!c.satisfies(&RpmVersion::parse("0.9.0").unwrap()));
    }

    #[test]
    fn test_constraint_overlaps() {
        let ge = VersionConstraint::parse(">= 2.0").unwrap();
        let lt = VersionConstraint::parse("< 2.0").unwrap();
        let le = VersionConstraint::parse("<= 2.0").unwrap();
        assert!(!ge.overlaps(&lt));
        assert!(ge.overlaps(&le));
        assert!(lt.overlaps(&VersionConstraint::parse("< 1.0").unwrap()));
    }

    #[test]
    fn test_capability_parse_and_display() {
        let c = Capability::parse("libfoo >= 1.2").unwrap();
        assert_eq!(c.name, "libfoo");
        assert_eq!(c.to_string(), "libfoo >= 1.2");

        let c = Capability::parse("perl(Cwd)").unwrap();
        assert_eq!(c.constraint, VersionConstraint::Any);

        let c = Capability::parse("foo>=3").unwrap();
        assert_eq!(c.name, "foo");
        assert!(Capability::parse("foo bar").is_err());
        assert!(Capability::parse("").is_err());
    }

    #[test]
    fn test_capability_satisfaction() {
        let req = Capability::parse("libfoo >= 1.0").unwrap();
        assert!(req.is_satisfied_by(&Capability::parse("libfoo = 1.5-2").unwrap()));
        assert!(req.is_satisfied_by(&Capability::named("libfoo")));
        assert!(!req.is_satisfied_by(&Capability::parse("libfoo = 0.9").unwrap()));
        assert!(!req.is_satisfied_by(&Capability::named("libbar")));
    }

    #[test]
    fn test_capability_serde_as_string() {
        let c: Capability = serde_json::from_str("\"webserver\"").unwrap();
        assert_eq!(c, Capability::named("webserver"));
        let v: RpmVersion = serde_json::from_str("\"2:1.0-1\"").unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"2:1.0-1\"");
    }
}
