// src/installed.rs

//! Installed-package state
//!
//! Goal resolution asks an [`InstalledDb`] which packages are on the
//! system. The core only ever reads it. Installed packages are reported as
//! [`PackageRecord`]s from the `@System` repository.

use crate::error::GoalError;
use crate::universe::{PackageRecord, SYSTEM_REPO};
use crate::version::{Capability, RpmVersion};
use rusqlite::{Connection, OpenFlags, params};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Read access to the installed-package database
pub trait InstalledDb {
    /// Every installed package
    fn installed(&self) -> Result<Vec<PackageRecord>, GoalError>;

    /// Whether a package is installed, optionally at an exact version
    fn is_installed(&self, name: &str, evr: Option<&RpmVersion>) -> Result<bool, GoalError> {
        Ok(self
            .installed()?
            .iter()
            .any(|p| p.name == name && evr.is_none_or(|v| &p.evr == v)))
    }
}

/// In-memory installed set
#[derive(Debug, Clone, Default)]
pub struct InstalledSet {
    packages: Vec<PackageRecord>,
}

impl InstalledSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = PackageRecord>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.insert(record);
        }
        set
    }

    /// Add a package; its origin is rewritten to `@System`
    pub fn insert(&mut self, mut record: PackageRecord) {
        record.repo = SYSTEM_REPO.to_string();
        self.packages.push(record);
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl InstalledDb for InstalledSet {
    fn installed(&self) -> Result<Vec<PackageRecord>, GoalError> {
        Ok(self.packages.clone())
    }
}

/// Schema of the SQLite installed-package database
///
/// Relation kinds are `provides`, `requires`, `conflicts` and `obsoletes`;
/// each relation row holds one capability string.
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS packages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        evr TEXT NOT NULL,
        arch TEXT NOT NULL,
        summary TEXT,
        UNIQUE(name, evr, arch)
    );

    CREATE TABLE IF NOT EXISTS relations (
        package_id INTEGER NOT NULL,
        kind TEXT NOT NULL CHECK(kind IN ('provides', 'requires', 'conflicts', 'obsoletes')),
        capability TEXT NOT NULL,
        FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS files (
        package_id INTEGER NOT NULL,
        path TEXT NOT NULL,
        FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_packages_name ON packages(name);
    CREATE INDEX IF NOT EXISTS idx_relations_package ON relations(package_id);
    CREATE INDEX IF NOT EXISTS idx_files_package ON files(package_id);
";

/// Installed-package database stored in SQLite, opened read-only
pub struct SqliteInstalledDb {
    conn: Connection,
}

fn db_error(e: rusqlite::Error) -> GoalError {
    GoalError::InstalledDb(e.to_string())
}

impl SqliteInstalledDb {
    pub fn open(path: &Path) -> Result<Self, GoalError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| GoalError::InstalledDb(format!("Failed to open {}: {e}", path.display())))?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

impl InstalledDb for SqliteInstalledDb {
    fn installed(&self) -> Result<Vec<PackageRecord>, GoalError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, evr, arch, summary FROM packages ORDER BY name, id")
            .map_err(db_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(db_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_error)?;

        let mut records: Vec<PackageRecord> = Vec::with_capacity(rows.len());
        let mut by_id: HashMap<i64, usize> = HashMap::new();
        for (id, name, evr, arch, summary) in rows {
            let evr = RpmVersion::parse(&evr)
                .map_err(|e| GoalError::InstalledDb(format!("package {name}: {e}")))?;
            let mut record = PackageRecord::new(name, evr, arch, SYSTEM_REPO);
            record.summary = summary.unwrap_or_default();
            by_id.insert(id, records.len());
            records.push(record);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT package_id, kind, capability FROM relations ORDER BY rowid")
            .map_err(db_error)?;
        let relations = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_error)?;

        for (package_id, kind, capability) in relations {
            let Some(&idx) = by_id.get(&package_id) else {
                debug!("Ignoring relation of unknown package {}", package_id);
                continue;
            };
            let cap = Capability::parse(&capability)
                .map_err(|e| GoalError::InstalledDb(e.to_string()))?;
            let record = &mut records[idx];
            match kind.as_str() {
                "provides" => record.provides.push(cap),
                "requires" => record.requires.push(cap),
                "conflicts" => record.conflicts.push(cap),
                "obsoletes" => record.obsoletes.push(cap),
                other => debug!("Ignoring relation kind {}", other),
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT package_id, path FROM files ORDER BY rowid")
            .map_err(db_error)?;
        let files = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .map_err(db_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_error)?;
        for (package_id, path) in files {
            if let Some(&idx) = by_id.get(&package_id) {
                records[idx].files.push(path);
            }
        }

        Ok(records)
    }

    fn is_installed(&self, name: &str, evr: Option<&RpmVersion>) -> Result<bool, GoalError> {
        let mut stmt = self
            .conn
            .prepare("SELECT evr FROM packages WHERE name = ?1")
            .map_err(db_error)?;
        let versions = stmt
            .query_map(params![name], |row| row.get::<_, String>(0))
            .map_err(db_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_error)?;

        Ok(match evr {
            None => !versions.is_empty(),
            Some(wanted) => versions
                .iter()
                .filter_map(|v| RpmVersion::parse(v).ok())
                .any(|v| &v == wanted),
        })
    }
}
