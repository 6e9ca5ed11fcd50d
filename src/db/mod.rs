//! Database layer for the task placement engine.
//!
//! Every mutating operation runs inside one `BEGIN IMMEDIATE` transaction:
//! the write lock is taken before the first read, so range shifts and
//! reachability checks see a snapshot no concurrent writer can invalidate.

pub mod bulk;
pub mod deps;
pub mod hierarchy;
pub mod ledger;
pub mod lifecycle;
pub mod placements;
pub mod projects;
pub mod sections;
pub mod tasks;

use crate::config::{Config, GraphConfig};
use crate::context::{OpenDirectory, UserDirectory};
use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    graph: GraphConfig,
    users: Arc<dyn UserDirectory>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        Self::open_with(path, &Config::default())
    }

    /// Open the database described by `config`.
    pub fn from_config(config: &Config) -> EngineResult<Self> {
        Self::open_with(&config.store.db_path, config)
    }

    fn open_with<P: AsRef<Path>>(path: P, config: &Config) -> EngineResult<Self> {
        let conn = Connection::open(path)?;

        // WAL lets readers proceed while one writer holds the lock
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;",
        )?;
        conn.busy_timeout(Duration::from_millis(config.store.busy_timeout_ms))?;

        Self::init(conn, config.graph)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Self::init(conn, GraphConfig::default())
    }

    fn init(conn: Connection, graph: GraphConfig) -> EngineResult<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            graph,
            users: Arc::new(OpenDirectory),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Replace the graph traversal limits.
    pub fn with_graph_limits(mut self, graph: GraphConfig) -> Self {
        self.graph = graph;
        self
    }

    /// Wire in the external user directory.
    pub fn with_user_directory(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = users;
        self
    }

    pub fn graph_limits(&self) -> GraphConfig {
        self.graph
    }

    pub(crate) fn users(&self) -> &dyn UserDirectory {
        self.users.as_ref()
    }

    /// Run database migrations.
    fn run_migrations(&self) -> EngineResult<()> {
        let mut conn = self.lock()?;
        embedded::migrations::runner().run(&mut *conn)?;
        Ok(())
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::internal("database connection lock poisoned"))
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> EngineResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Connection) -> EngineResult<T>,
    {
        let mut conn = self.lock()?;
        f(&mut conn)
    }

    /// Run `f` inside one immediate transaction.
    ///
    /// Commits when `f` returns `Ok`; any error drops the transaction, which
    /// rolls every write back.
    pub fn write_tx<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> EngineResult<T>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a TEXT column holding one of the closed enumerations.
pub(crate) fn parse_column<T>(raw: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Fresh time-ordered identifier.
pub(crate) fn new_id() -> String {
    Uuid::now_v7().to_string()
}
