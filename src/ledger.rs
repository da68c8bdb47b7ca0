use chrono::Utc;
use log::info;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::database::Database;
use crate::error::MendError;

/// One row of the migration ledger. Identity is `(app, name)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerRecord {
    id: i64,
    app: String,
    name: String,
    applied: String,
}

impl LedgerRecord {
    #[cfg(test)]
    pub fn new(id: i64, app: &str, name: &str, applied: &str) -> Self {
        LedgerRecord {
            id,
            app: app.to_owned(),
            name: name.to_owned(),
            applied: applied.to_owned(),
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LedgerRecord {
            id: row.get(0)?,
            app: row.get(1)?,
            name: row.get(2)?,
            applied: row.get(3)?,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn applied(&self) -> &str {
        &self.applied
    }
}

/// Access to the ledger table kept by the application's migration framework.
///
/// The table is owned by the framework and is never created here. Columns are
/// expected to be `(id, app, name, applied)`.
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(table: &str) -> Self {
        Ledger {
            table: table.to_owned(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn ensure_exists(&self, db: &Database) -> Result<(), MendError> {
        if Catalog::table_exists(db, &self.table)? {
            Ok(())
        } else {
            Err(MendError::NotFound(format!(
                "ledger table '{}' does not exist",
                self.table
            )))
        }
    }

    fn quoted(&self) -> String {
        Database::quote_ident(&self.table)
    }

    pub fn records_for_app(&self, db: &Database, app: &str) -> Result<Vec<LedgerRecord>, MendError> {
        self.ensure_exists(db)?;

        let sql = format!(
            "SELECT id, app, name, CAST(applied AS TEXT) FROM {} WHERE app = ? ORDER BY id ASC",
            self.quoted()
        );
        let mut stmt = db.conn().prepare(&sql)?;
        let rows = stmt.query_map([app], LedgerRecord::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        Ok(records)
    }

    pub fn find(&self, db: &Database, app: &str, name: &str) -> Result<Option<LedgerRecord>, MendError> {
        self.ensure_exists(db)?;

        let sql = format!(
            "SELECT id, app, name, CAST(applied AS TEXT) FROM {} WHERE app = ? AND name = ? ORDER BY id ASC LIMIT 1",
            self.quoted()
        );

        db.conn()
            .query_row(&sql, params![app, name], LedgerRecord::from_row)
            .optional()
            .map_err(MendError::DatabaseError)
    }

    /// Records of `app` whose name contains `pattern`.
    pub fn find_matching(
        &self,
        db: &Database,
        app: &str,
        pattern: &str,
    ) -> Result<Vec<LedgerRecord>, MendError> {
        Ok(self
            .records_for_app(db, app)?
            .into_iter()
            .filter(|record| record.name.contains(pattern))
            .collect())
    }

    pub fn contains(&self, db: &Database, app: &str, name: &str) -> Result<bool, MendError> {
        Ok(self.find(db, app, name)?.is_some())
    }

    /// Record `(app, name)` as applied without touching the schema.
    ///
    /// Returns false when the pair was already recorded; a second row with the
    /// same identity is never written.
    pub fn mark_applied(&self, db: &Database, app: &str, name: &str) -> Result<bool, MendError> {
        if self.contains(db, app, name)? {
            return Ok(false);
        }

        let applied = Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        let sql = format!(
            "INSERT INTO {} (app, name, applied) VALUES (?, ?, ?)",
            self.quoted()
        );
        db.conn().execute(&sql, params![app, name, applied])?;

        info!("Ledger: recorded {}.{} as applied", app, name);
        Ok(true)
    }

    /// Delete one ledger row by id. The schema is not touched.
    pub fn delete(&self, db: &Database, id: i64) -> Result<bool, MendError> {
        self.ensure_exists(db)?;

        let sql = format!("DELETE FROM {} WHERE id = ?", self.quoted());
        let deleted = db.conn().execute(&sql, [id])?;

        if deleted > 0 {
            info!("Ledger: deleted record id={}", id);
        }
        Ok(deleted > 0)
    }
}
