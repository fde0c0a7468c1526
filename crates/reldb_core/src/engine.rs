//! Engine: the store handle shared by connections.

use crate::config::Config;
use crate::connection::{Connection, TransactionScope};
use crate::error::{CoreError, CoreResult};
use crate::params::Execute;
use crate::transaction::TransactionManager;
use crate::types::SequenceNumber;
use parking_lot::RwLock;
use std::sync::Arc;

/// The main store handle.
///
/// An `Engine` owns one in-memory relational store and hands out
/// [`Connection`]s to it. Cloning an engine is cheap and every clone
/// refers to the same store. There is no process-wide default engine;
/// callers create one and pass it where it is needed.
///
/// # Example
///
/// ```
/// use reldb_core::{params, Config, Engine};
///
/// let engine = Engine::create("sqlite+pysqlite:///:memory:", Config::new().echo(true))?;
///
/// engine.transaction(|conn| {
///     conn.execute("CREATE TABLE some_table (x int, y int)", ())?;
///     conn.execute(
///         "INSERT INTO some_table (x, y) VALUES (:x, :y)",
///         vec![params! { "x" => 1, "y" => 1 }, params! { "x" => 2, "y" => 4 }],
///     )?;
///     Ok::<_, reldb_core::CoreError>(())
/// })?;
///
/// let mut conn = engine.connect()?;
/// let rows = conn.execute("SELECT x, y FROM some_table", ())?.all();
/// assert_eq!(rows.len(), 2);
/// # Ok::<(), reldb_core::CoreError>(())
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    url: String,
    config: Config,
    txn_manager: TransactionManager,
    is_open: RwLock<bool>,
}

/// Checks that `url` addresses an in-memory store.
///
/// Accepted: `memory://`, and `reldb`/`sqlite` URLs (optionally with a
/// `+driver` suffix) whose path is empty or `/:memory:`.
fn check_url(url: &str) -> CoreResult<()> {
    let Some((scheme, path)) = url.split_once("://") else {
        return Err(CoreError::connection(format!(
            "could not parse connection URL {url:?}"
        )));
    };
    let dialect = scheme.split('+').next().unwrap_or(scheme);
    let in_memory = match dialect {
        "memory" => path.is_empty() || path == "/",
        "reldb" | "sqlite" => path.is_empty() || path == "/:memory:",
        _ => {
            return Err(CoreError::connection(format!(
                "no store available for scheme {scheme:?}"
            )))
        }
    };
    if in_memory {
        Ok(())
    } else {
        Err(CoreError::connection(format!(
            "store at {url} is unreachable: only in-memory stores are supported"
        )))
    }
}

impl Engine {
    /// Creates an engine for the store addressed by `url`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the URL is malformed or does not
    /// address an in-memory store.
    pub fn create(url: &str, config: Config) -> CoreResult<Self> {
        check_url(url)?;
        tracing::debug!("creating engine for {}", url);
        Ok(Self::with_url(url, config))
    }

    /// Creates an engine over a fresh in-memory store with default
    /// configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_url("memory://", Config::default())
    }

    /// Creates an engine over a fresh in-memory store.
    #[must_use]
    pub fn in_memory_with_config(config: Config) -> Self {
        Self::with_url("memory://", config)
    }

    fn with_url(url: &str, config: Config) -> Self {
        let txn_manager = TransactionManager::new(config.enforce_foreign_keys);
        Self {
            inner: Arc::new(EngineInner {
                url: url.to_string(),
                config,
                txn_manager,
                is_open: RwLock::new(true),
            }),
        }
    }

    /// Opens a connection. No transaction is started until the first
    /// statement or an explicit [`Connection::begin`].
    pub fn connect(&self) -> CoreResult<Connection> {
        self.ensure_open()?;
        Ok(Connection::new(self.clone()))
    }

    /// Opens a connection with a transaction already begun.
    ///
    /// The returned scope rolls back when dropped unless
    /// [`TransactionScope::commit`] is called.
    pub fn begin(&self) -> CoreResult<TransactionScope> {
        let mut conn = self.connect()?;
        conn.begin()?;
        Ok(TransactionScope::new(conn))
    }

    /// Runs `f` in a new transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it
    /// returns `Err`. A commit failure is returned and leaves nothing
    /// applied.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E>,
        E: From<CoreError>,
    {
        let mut conn = self.connect()?;
        conn.begin()?;
        match f(&mut conn) {
            Ok(value) => {
                conn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = conn.rollback() {
                    tracing::warn!("rollback after failed transaction also failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    /// Closes the store. Every later use of this engine or its connections
    /// fails with a connection error.
    pub fn dispose(&self) {
        let mut is_open = self.inner.is_open.write();
        if *is_open {
            tracing::debug!("disposing engine for {}", self.inner.url);
            *is_open = false;
        }
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.inner.is_open.read()
    }

    /// The URL the engine was created with.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Names of the committed tables, sorted.
    pub fn table_names(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.inner.txn_manager.snapshot().table_names())
    }

    /// Returns true if a committed table of that name exists.
    pub fn has_table(&self, name: &str) -> CoreResult<bool> {
        self.ensure_open()?;
        Ok(self.inner.txn_manager.snapshot().contains(name))
    }

    /// Returns the sequence number of the latest commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.inner.txn_manager.committed_seq()
    }

    pub(crate) fn txn_manager(&self) -> &TransactionManager {
        &self.inner.txn_manager
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if *self.inner.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::StoreClosed)
        }
    }

    /// Logs a statement and its parameters.
    pub(crate) fn log_statement(&self, sql: &str, params: &Execute) {
        let params = if self.inner.config.hide_parameters {
            "[parameters hidden]".to_string()
        } else {
            params.to_string()
        };
        if self.inner.config.echo {
            tracing::info!("{}", sql);
            tracing::info!("{}", params);
        } else {
            tracing::debug!("{} {}", sql, params);
        }
    }

    /// Logs a transaction boundary such as `BEGIN (implicit)`.
    pub(crate) fn log_event(&self, event: &str) {
        if self.inner.config.echo {
            tracing::info!("{}", event);
        } else {
            tracing::debug!("{}", event);
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("url", &self.inner.url)
            .field("config", &self.inner.config)
            .field("is_open", &self.is_open())
            .field("txn_manager", &self.inner.txn_manager)
            .finish()
    }
}
