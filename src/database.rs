use std::path::Path;

use log::{debug, info};
use rusqlite::Connection;

use crate::error::MendError;

/// Connection to the application database being repaired.
///
/// The database and every table in it are owned by the application; this type
/// never creates schema on open.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn connect(db_path: &Path) -> Result<Self, MendError> {
        // Opening a missing file would silently create an empty database
        if !db_path.is_file() {
            return Err(MendError::NotFound(format!(
                "database file '{}' does not exist",
                db_path.display()
            )));
        }

        let conn = Connection::open(db_path)?;
        info!("Database opened at: {}", db_path.display());

        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, MendError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run one statement outside any explicit transaction.
    pub fn execute(&self, sql: &str) -> Result<usize, MendError> {
        debug!("Executing: {}", sql.trim());
        Ok(self.conn.execute(sql, [])?)
    }

    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}
