//! SQL Gateway: a single Tokio task owning the one writable connection,
//! fed by an `mpsc` channel cloned into every caller.

use rusqlite::Connection;
use serde_json::Value;
use shared::api::{SqlRequest, SqlResponse};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// One request submitted to the Gateway. Every non-raw-SQL operation the
/// rest of the daemon needs (claim, enqueue, transition, ...) is modeled
/// as a variant here rather than forcing every caller through the generic
/// SQL passthrough, which exists only for `POST /api/central/sql` and ad
/// hoc inspection.
pub enum GatewayRequest {
    Sql {
        request: SqlRequest,
        reply: oneshot::Sender<shared::Result<SqlResponse>>,
    },
    WithConnection(Box<dyn FnOnce(&mut Connection) + Send>),
}

/// Cheaply-cloneable handle callers use to submit work to the Gateway.
/// Cancelling a submitter (dropping the future awaiting `reply`) is safe
/// and merely discards the reply, per the gateway's suspension contract.
#[derive(Clone)]
pub struct GatewayHandle {
    sender: mpsc::Sender<GatewayRequest>,
}

impl GatewayHandle {
    pub async fn execute_sql(&self, request: SqlRequest) -> shared::Result<SqlResponse> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(GatewayRequest::Sql { request, reply })
            .await
            .map_err(|_| shared::CoreError::Database("gateway task has stopped".into()))?;
        rx.await
            .map_err(|_| shared::CoreError::Database("gateway dropped reply".into()))?
    }

    /// Runs an arbitrary closure against the writer connection on the
    /// Gateway task. Used by components (Heartbeat, Dispatcher, Summary
    /// worker) whose store operations need the single writer but are
    /// typed operations rather than raw SQL.
    pub async fn with_connection<F, R>(&self, f: F) -> shared::Result<R>
    where
        F: FnOnce(&mut Connection) -> shared::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let mut reply = Some(reply);
        self.sender
            .send(GatewayRequest::WithConnection(Box::new(move |conn| {
                let result = f(conn);
                if let Some(reply) = reply.take() {
                    let _ = reply.send(result);
                }
            })))
            .await
            .map_err(|_| shared::CoreError::Database("gateway task has stopped".into()))?;
        rx.await
            .map_err(|_| shared::CoreError::Database("gateway dropped reply".into()))?
    }
}

/// Owns the writer connection and the request channel's receive end.
/// Spawned once at daemon startup via [`spawn`].
pub struct Gateway {
    conn: Connection,
    receiver: mpsc::Receiver<GatewayRequest>,
    default_max_rows: u64,
}

/// Opens the store, runs schema initialization, and spawns the Gateway's
/// processing loop, returning a handle callers clone freely.
pub fn spawn(db_path: PathBuf, busy_timeout_ms: u64, default_max_rows: u64) -> shared::Result<(GatewayHandle, tokio::task::JoinHandle<()>)> {
    let conn = crate::store::open(&db_path, busy_timeout_ms)?;
    crate::store::initialize(&conn)?;

    let (sender, receiver) = mpsc::channel(256);
    let gateway = Gateway {
        conn,
        receiver,
        default_max_rows,
    };
    let handle = tokio::spawn(gateway.run());
    Ok((GatewayHandle { sender }, handle))
}

impl Gateway {
    async fn run(mut self) {
        info!("sql gateway started");
        while let Some(request) = self.receiver.recv().await {
            match request {
                GatewayRequest::Sql { request, reply } => {
                    let result = execute_sql(&self.conn, request, self.default_max_rows);
                    if reply.send(result).is_err() {
                        warn!("sql gateway reply discarded, submitter dropped");
                    }
                }
                GatewayRequest::WithConnection(f) => {
                    f(&mut self.conn);
                }
            }
        }
        info!("sql gateway stopped");
    }
}

const READ_ONLY_PREFIXES: [&str; 3] = ["select", "with", "explain"];

fn is_read_only_statement(sql: &str) -> bool {
    let trimmed = sql.trim_start().to_ascii_lowercase();
    READ_ONLY_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn execute_sql(conn: &Connection, request: SqlRequest, default_max_rows: u64) -> shared::Result<SqlResponse> {
    if request.read_only && !is_read_only_statement(&request.sql) {
        return Err(shared::CoreError::Validation(
            "read_only request must be SELECT/WITH .. SELECT/EXPLAIN".to_string(),
        )
        .into());
    }

    let max_rows = request.max_rows.unwrap_or(default_max_rows);
    let params = request
        .params
        .iter()
        .map(value_to_sql)
        .collect::<Vec<_>>();
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

    let mut stmt = conn
        .prepare(&request.sql)
        .map_err(|e| shared::CoreError::Validation(format!("invalid SQL: {e}")))?;

    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let column_count = columns.len();

    if column_count == 0 {
        let affected = stmt
            .execute(param_refs.as_slice())
            .map_err(|e| shared::CoreError::Database(format!("executing SQL: {e}")))?;
        return Ok(SqlResponse {
            rows: Vec::new(),
            columns: Vec::new(),
            row_count: affected as u64,
            truncated: false,
        });
    }

    let mut rows = stmt
        .query(param_refs.as_slice())
        .map_err(|e| shared::CoreError::Database(format!("executing SQL: {e}")))?;

    let mut out = Vec::new();
    let mut truncated = false;
    let mut count: u64 = 0;
    while let Some(row) = rows
        .next()
        .map_err(|e| shared::CoreError::Database(format!("reading row: {e}")))?
    {
        if count >= max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(sql_value_to_json(row.get_ref(i).map_err(|e| {
                shared::CoreError::Database(format!("reading column {i}: {e}"))
            })?));
        }
        out.push(values);
        count += 1;
    }

    Ok(SqlResponse {
        rows: out,
        columns,
        row_count: count,
        truncated,
    })
}

fn value_to_sql(v: &Value) -> rusqlite::types::Value {
    match v {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                rusqlite::types::Value::Real(f)
            } else {
                rusqlite::types::Value::Null
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

fn sql_value_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
    match value {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::Number(i.into()),
        rusqlite::types::ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        rusqlite::types::ValueRef::Text(t) => {
            Value::String(String::from_utf8_lossy(t).to_string())
        }
        rusqlite::types::ValueRef::Blob(_) => Value::String("<blob>".to_string()),
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
