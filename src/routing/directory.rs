//! Persisted route directory (`wtf_routes`) for introspection
//!
//! Dispatch never reads this table; it mirrors the published route table so
//! SQL consoles and admin tooling can query it.

use rusqlite::params;

use super::table::RouteEntry;
use crate::db::Database;
use crate::error::Result;

/// Sink receiving route registrations on every rebuild
pub trait RouteDirectory: Send + Sync {
    fn clear_routes(&self) -> Result<()>;

    fn insert_route(&self, method: &str, pattern: &str, source_file: &str) -> Result<()>;

    /// Replace the whole directory with `entries`
    fn replace_all(&self, entries: &[RouteEntry]) -> Result<()> {
        self.clear_routes()?;
        for entry in entries {
            self.insert_route(entry.method.as_str(), &entry.pattern, &entry.file)?;
        }
        Ok(())
    }
}

/// `wtf_routes` table in the application database
pub struct SqliteRouteDirectory {
    db: Database,
}

const CREATE_ROUTES_TABLE: &str = "CREATE TABLE IF NOT EXISTS wtf_routes (
    path TEXT NOT NULL,
    method TEXT NOT NULL,
    file TEXT NOT NULL
)";

impl SqliteRouteDirectory {
    pub fn new(db: Database) -> Result<Self> {
        db.with_connection(|conn| {
            conn.execute_batch(CREATE_ROUTES_TABLE)?;
            Ok(())
        })?;
        Ok(Self { db })
    }

    /// Rows currently stored, as `(method, path, file)`
    pub fn list(&self) -> Result<Vec<(String, String, String)>> {
        self.db.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT method, path, file FROM wtf_routes ORDER BY rowid")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

impl RouteDirectory for SqliteRouteDirectory {
    fn clear_routes(&self) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute("DELETE FROM wtf_routes", [])?;
            Ok(())
        })
    }

    fn insert_route(&self, method: &str, pattern: &str, source_file: &str) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO wtf_routes (path, method, file) VALUES (?1, ?2, ?3)",
                params![pattern, method, source_file],
            )?;
            Ok(())
        })
    }

    fn replace_all(&self, entries: &[RouteEntry]) -> Result<()> {
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM wtf_routes", [])?;
            {
                let mut insert = tx
                    .prepare_cached("INSERT INTO wtf_routes (path, method, file) VALUES (?1, ?2, ?3)")?;
                for entry in entries {
                    insert.execute(params![entry.pattern, entry.method.as_str(), entry.file])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}
