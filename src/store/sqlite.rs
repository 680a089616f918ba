//! Read-only SQLite store with a small connection pool
//!
//! The store only runs `QueryPlan`s: a template with positional placeholders
//! plus its bound parameters. There is no entry point taking raw SQL text.

use crate::error::{ExecutionError, StoreError};
use crate::plan::QueryPlan;
use crate::store::value::{Row, Scalar};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Columns and rows returned by one statement
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub elapsed: Duration,
}

/// Tabular store handle shared by all pipeline runs
pub struct TabularStore {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
}

impl TabularStore {
    /// Open the database read-only; fails if the file does not exist
    pub fn open_read_only(path: impl AsRef<Path>, pool_size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let first = open_connection(&path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;

        tracing::debug!(path = %path.display(), pool_size, "opened read-only store");

        Ok(Self {
            path,
            idle: Mutex::new(vec![first]),
            max_idle: pool_size.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of idle pooled connections
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Execute one plan on a blocking worker, bounded by `timeout`
    ///
    /// On timeout the running statement is interrupted and its connection is
    /// dropped instead of being returned to the pool.
    pub async fn execute(&self, plan: &QueryPlan, timeout: Duration) -> Result<RowSet, ExecutionError> {
        ensure_read_statement(plan.sql_template())?;

        let conn = self.checkout()?;
        let interrupt = conn.get_interrupt_handle();
        let sql = plan.sql_template().to_string();
        let params = plan.bound_parameters().to_vec();

        let worker = tokio::task::spawn_blocking(move || {
            let result = run_statement(&conn, &sql, &params);
            (conn, result)
        });

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok((conn, result))) => {
                self.checkin(conn);
                result
            }
            Ok(Err(join_err)) => Err(ExecutionError::store(format!(
                "query worker failed: {join_err}"
            ))),
            Err(_) => {
                interrupt.interrupt();
                tracing::warn!(plan_id = plan.plan_id(), ?timeout, "plan timed out, statement interrupted");
                Err(ExecutionError::timeout(timeout))
            }
        }
    }

    fn checkout(&self) -> Result<Connection, ExecutionError> {
        if let Some(conn) = self.idle.lock().ok().and_then(|mut idle| idle.pop()) {
            return Ok(conn);
        }
        open_connection(&self.path).map_err(ExecutionError::from)
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(conn);
            }
        }
    }
}

fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )
}

fn ensure_read_statement(sql: &str) -> Result<(), ExecutionError> {
    let head = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    if head == "SELECT" || head == "WITH" {
        Ok(())
    } else {
        Err(ExecutionError::rejected(format!(
            "only SELECT/WITH statements may run, got '{head}'"
        )))
    }
}

fn run_statement(conn: &Connection, sql: &str, params: &[Scalar]) -> Result<RowSet, ExecutionError> {
    let started = Instant::now();
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(ExecutionError::rejected("statement would modify the database"));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            record.push(name.clone(), Scalar::from_value_ref(row.get_ref(idx)?));
        }
        out.push(record);
    }

    Ok(RowSet {
        columns,
        rows: out,
        elapsed: started.elapsed(),
    })
}
