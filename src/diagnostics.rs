// src/diagnostics.rs

//! Per-call diagnostic collection
//!
//! Operations that can partially fail (directory key imports, signature
//! checks, repository syncs) record what went wrong into a [`Diagnostics`]
//! value owned by the caller, instead of a process-wide log callback.
//! Every entry is also forwarded to `tracing`.

use std::fmt;
use tracing::{debug, warn};

/// Severity of a diagnostic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Warning,
}

/// One recorded diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Level::Debug => write!(f, "debug: {}", self.message),
            Level::Warning => write!(f, "warning: {}", self.message),
        }
    }
}

/// Collector passed explicitly into fallible operations
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("{}", message);
        self.entries.push(Diagnostic {
            level: Level::Debug,
            message,
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.entries.push(Diagnostic {
            level: Level::Warning,
            message,
        });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.level == Level::Warning)
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    /// Join all messages into one line, oldest first
    pub fn joined(&self) -> String {
        self.entries
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join(": ")
    }

    /// Move every entry of `other` into this collector
    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_in_order() {
        let mut diag = Diagnostics::new();
        diag.debug("opened keyring");
        diag.warn("key rejected");
        assert_eq!(diag.entries().len(), 2);
        assert!(diag.has_warnings());
        assert_eq!(diag.warnings().count(), 1);
        assert_eq!(diag.joined(), "opened keyring: key rejected");
    }
}
