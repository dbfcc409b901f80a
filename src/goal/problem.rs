// src/goal/problem.rs

//! Problem types for goal resolution
//!
//! Defines the rules a goal can break. An unresolvable goal always carries
//! at least one of these, never a bare failure.

use std::fmt;

/// A rule the solver could not satisfy
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Problem {
    /// A package carries a conflict matching another selected package
    Conflict {
        package: String,
        capability: String,
        with: String,
    },
    /// No package provides a requirement
    NothingProvides {
        requirement: String,
        required_by: String,
    },
    /// A package obsoletes another selected package
    Obsoletes { package: String, obsoleted: String },
    /// Two versions of one package cannot be selected together
    OnlyOneVersion { selected: String, candidate: String },
    /// A package is needed but is being removed
    Erased { package: String },
    /// An installed package can be neither kept nor replaced
    KeepInstalled { package: String },
    /// None of a job's candidates can be installed
    Job { job: String },
    /// The search gave up
    SearchLimit { steps: usize },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::Conflict {
                package,
                capability,
                with,
            } => write!(f, "package {package} conflicts with {capability} provided by {with}"),
            Problem::NothingProvides {
                requirement,
                required_by,
            } => write!(f, "nothing provides {requirement} needed by {required_by}"),
            Problem::Obsoletes { package, obsoleted } => {
                write!(f, "package {package} obsoletes {obsoleted}")
            }
            Problem::OnlyOneVersion {
                selected,
                candidate,
            } => write!(f, "cannot install both {selected} and {candidate}"),
            Problem::Erased { package } => write!(f, "package {package} is to be removed"),
            Problem::KeepInstalled { package } => {
                write!(f, "installed package {package} cannot be kept or replaced")
            }
            Problem::Job { job } => write!(f, "conflicting request: {job}"),
            Problem::SearchLimit { steps } => {
                write!(f, "dependency search gave up after {steps} steps")
            }
        }
    }
}
