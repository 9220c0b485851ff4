//! SQLite access: connection opening, pooling and cancellation
//!
//! Each request borrows one pooled [`Connection`] for the lifetime of its
//! transaction. Transient request relations are `TEMP` tables, so they are
//! private to that connection and invisible to concurrent requests.

mod extensions;
mod pool;

pub use extensions::{AbortFunction, Extension, ExtensionSet};
pub use pool::{Pool, Pooled};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::error::{Result, WtfError};

/// Number of SQLite VM steps between cancellation checks
const PROGRESS_INTERVAL: i32 = 1_000;

/// Shared handle to the pooled database
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<Connection>>,
    config: DatabaseConfig,
}

impl Database {
    /// Open the pool; the first connection is created eagerly so a bad path
    /// fails at startup rather than on the first request.
    pub fn open(config: DatabaseConfig, extensions: ExtensionSet) -> Result<Self> {
        let factory_config = config.clone();
        let pool = Pool::new(config.pool_size, move || {
            open_connection(&factory_config, &extensions)
        });
        let db = Self { pool, config };
        drop(db.acquire(&CancelFlag::new())?);
        debug!(
            path = %db.config.path.display(),
            pool_size = db.config.pool_size,
            "Opened database"
        );
        Ok(db)
    }

    /// Borrow a connection, giving up when `cancel` fires
    pub fn acquire(&self, cancel: &CancelFlag) -> Result<Pooled<Connection>> {
        self.pool
            .acquire(self.config.acquire_timeout, || cancel.is_cancelled())
    }

    /// Run `f` on a borrowed connection outside any request
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.acquire(&CancelFlag::new())?;
        f(&mut conn)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}

/// Open and configure a single connection
pub fn open_connection(config: &DatabaseConfig, extensions: &ExtensionSet) -> Result<Connection> {
    let conn = if config.is_memory() {
        Connection::open_in_memory()
    } else {
        Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }
    .map_err(|e| {
        WtfError::server(
            "open database",
            format!("{}: {}", config.path.display(), e),
        )
    })?;

    conn.busy_timeout(config.busy_timeout)?;
    if !config.is_memory() {
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!(error = %e, "Could not enable WAL journal mode");
        }
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    extensions.register_all(&conn)?;
    Ok(conn)
}

/// Cancellation signal shared between a request future and its blocking work
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Interrupt statements running on `conn` once this flag is set
    pub fn attach(&self, conn: &Connection) {
        let flag = Arc::clone(&self.0);
        conn.progress_handler(
            PROGRESS_INTERVAL,
            Some(move || flag.load(Ordering::SeqCst)),
        );
    }

    pub fn detach(conn: &Connection) {
        conn.progress_handler(0, None::<fn() -> bool>);
    }
}

/// Sets its flag when dropped unless disarmed.
///
/// Held by the request future: if the client disconnects the future is dropped
/// and the blocking worker sees the cancellation.
pub struct CancelOnDrop {
    flag: CancelFlag,
    armed: bool,
}

impl CancelOnDrop {
    pub fn new(flag: CancelFlag) -> Self {
        Self { flag, armed: true }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file_config(dir: &tempfile::TempDir) -> DatabaseConfig {
        DatabaseConfig::new(dir.path().join("test.db"))
    }

    #[test]
    fn test_open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);
        let db = Database::open(config.clone(), ExtensionSet::builtin()).unwrap();
        assert!(config.path.exists());
        let one: i64 = db
            .with_connection(|conn| Ok(conn.query_row("SELECT 1", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_open_rejects_unreachable_path() {
        let config = DatabaseConfig::new(PathBuf::from("/nonexistent/dir/wtf.db"));
        assert!(Database::open(config, ExtensionSet::builtin()).is_err());
    }

    #[test]
    fn test_connections_have_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(file_config(&dir), ExtensionSet::builtin()).unwrap();
        let result = db.with_connection(|conn| {
            Ok(conn.query_row("SELECT wtf_abort(418)", [], |r| r.get::<_, Option<i64>>(0))?)
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_cancel_flag_interrupts_statement() {
        let conn = Connection::open_in_memory().unwrap();
        let flag = CancelFlag::new();
        flag.attach(&conn);
        flag.cancel();
        let err = conn
            .query_row(
                "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 10000000) \
                 SELECT count(*) FROM n",
                [],
                |r| r.get::<_, i64>(0),
            )
            .unwrap_err();
        assert!(matches!(WtfError::statement(0, err), WtfError::Cancelled));
        CancelFlag::detach(&conn);
        let one: i64 = conn.query_row("SELECT 1", [], |r| r.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_cancel_on_drop_sets_flag_unless_disarmed() {
        let flag = CancelFlag::new();
        drop(CancelOnDrop::new(flag.clone()));
        assert!(flag.is_cancelled());

        let other = CancelFlag::new();
        CancelOnDrop::new(other.clone()).disarm();
        assert!(!other.is_cancelled());
    }
}
