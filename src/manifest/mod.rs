mod agency;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MendError;

use agency::AGENCY_MANIFEST;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub sql: String,
}

/// The physical object a migration produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaTarget {
    Table {
        name: String,
        create_sql: String,
        /// Columns the finished table carries. Empty means existence alone matches.
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        indexes: Vec<IndexDef>,
    },
    Column {
        table: String,
        column: String,
        definition: String,
    },
}

impl SchemaTarget {
    /// Short human description, e.g. `table agency_cost` or `column agency_userprofile.is_pm`.
    pub fn describe(&self) -> String {
        match self {
            SchemaTarget::Table { name, .. } => format!("table {}", name),
            SchemaTarget::Column { table, column, .. } => format!("column {}.{}", table, column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDef {
    pub name: String,
    pub target: SchemaTarget,
    /// Data statements run right after the schema change itself executes
    #[serde(default)]
    pub backfill: Vec<String>,
}

/// The declared migrations of one app plus the ledger names known to be stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub app: String,
    /// Substring patterns naming ledger rows that no longer have a definition
    #[serde(default)]
    pub retired: Vec<String>,
    #[serde(default)]
    pub migrations: Vec<MigrationDef>,
}

impl Manifest {
    pub fn builtin() -> Result<Self, MendError> {
        Self::parse(AGENCY_MANIFEST)
    }

    /// Load from a file, or the built-in agency manifest when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, MendError> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    MendError::Error(format!(
                        "Failed to read manifest {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::parse(&text)
            }
            None => Self::builtin(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, MendError> {
        let manifest: Manifest = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), MendError> {
        if self.app.trim().is_empty() {
            return Err(MendError::Error("Manifest app label is empty".into()));
        }

        let mut seen = HashSet::new();
        for def in &self.migrations {
            if def.name.trim().is_empty() {
                return Err(MendError::Error("Manifest contains a migration with no name".into()));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(MendError::Error(format!(
                    "Manifest declares migration '{}' more than once",
                    def.name
                )));
            }
            if self.is_retired(&def.name) {
                return Err(MendError::Error(format!(
                    "Migration '{}' is both declared and retired",
                    def.name
                )));
            }
        }

        Ok(())
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.migrations.iter().any(|def| def.name == name)
    }

    pub fn is_retired(&self, name: &str) -> bool {
        self.retired
            .iter()
            .any(|pattern| !pattern.is_empty() && name.contains(pattern.as_str()))
    }

    #[cfg(test)]
    pub fn find(&self, name: &str) -> Option<&MigrationDef> {
        self.migrations.iter().find(|def| def.name == name)
    }
}
