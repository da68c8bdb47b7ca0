use rusqlite::OptionalExtension;

use crate::database::Database;
use crate::error::MendError;

/// Read-only queries against SQLite's own metadata.
pub struct Catalog;

impl Catalog {
    /// User tables in name order. SQLite's internal `sqlite_*` tables are skipped.
    pub fn tables(db: &Database) -> Result<Vec<String>, MendError> {
        let mut stmt = db.conn().prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name ASC",
        )?;

        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut tables = Vec::new();
        for row in rows {
            tables.push(row?);
        }

        Ok(tables)
    }

    /// SQLite resolves identifiers without regard to ASCII case, so lookups do too.
    pub fn table_exists(db: &Database, table: &str) -> Result<bool, MendError> {
        let found: Option<i64> = db
            .conn()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ? COLLATE NOCASE",
                [table],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.is_some())
    }

    /// Column names in declaration order. Empty when the table does not exist.
    pub fn columns(db: &Database, table: &str) -> Result<Vec<String>, MendError> {
        let mut stmt = db
            .conn()
            .prepare("SELECT name FROM pragma_table_info(?) ORDER BY cid ASC")?;

        let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }

        Ok(columns)
    }

    pub fn column_exists(db: &Database, table: &str, column: &str) -> Result<bool, MendError> {
        Ok(Self::columns(db, table)?.iter().any(|c| c.eq_ignore_ascii_case(column)))
    }

    /// Explicitly created indexes on a table. Indexes SQLite creates for
    /// UNIQUE and PRIMARY KEY constraints are left out since they cannot be
    /// dropped on their own.
    pub fn indexes(db: &Database, table: &str) -> Result<Vec<String>, MendError> {
        let mut stmt = db.conn().prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ? COLLATE NOCASE AND name NOT LIKE 'sqlite_autoindex_%'
             ORDER BY name ASC",
        )?;

        let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;

        let mut indexes = Vec::new();
        for row in rows {
            indexes.push(row?);
        }

        Ok(indexes)
    }

    pub fn index_exists(db: &Database, index: &str) -> Result<bool, MendError> {
        let found: Option<i64> = db
            .conn()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ? COLLATE NOCASE",
                [index],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.is_some())
    }
}
