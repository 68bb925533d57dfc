//! SQLite vector store using the sqlite-vec extension.
//!
//! Each index is an ordinary table of `(id, embedding, payload)` rows plus an
//! entry in the `saga_indexes` registry recording its dimension and metric.
//! Queries rank with `vec_distance_cosine` / `vec_distance_l2` and filter
//! with SQL over `json_extract(payload, ...)`, so filtering happens before
//! ranking and `top_k` is exact.
//!
//! # Example
//!
//! ```ignore
//! use saga_vector_stores::SqliteVecStore;
//!
//! let store = SqliteVecStore::open("memories.db")?;
//! store.ensure_index("character-memory", 1024, DistanceMetric::Cosine).await?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Once};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use zerocopy::IntoBytes;

use saga_core::error::{ErrorCode, SagaError, SagaResult};
use saga_core::traits::{
    DistanceMetric, IndexInfo, StoreConnector, VectorRecord, VectorSearchResult, VectorStore,
};
use saga_core::types::{Filter, FilterCondition, FilterOperator, FilterTranslator};

const REGISTRY_TABLE: &str = "saga_indexes";

static REGISTER_EXTENSION: Once = Once::new();

fn register_extension() {
    REGISTER_EXTENSION.call_once(|| {
        // SAFETY: sqlite3_auto_extension requires a function pointer cast.
        // This is the documented way to register sqlite-vec with rusqlite.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

fn db_error(message: impl Into<String>, code: ErrorCode, e: rusqlite::Error) -> SagaError {
    let message = format!("{}: {}", message.into(), e);
    match code {
        ErrorCode::VecWriteFailed => SagaError::StoreWrite {
            message,
            code,
            partial: false,
            written: 0,
            source: Some(Box::new(e)),
        },
        ErrorCode::VecQueryFailed => SagaError::StoreQuery {
            message,
            code,
            source: Some(Box::new(e)),
        },
        _ => SagaError::VectorStore {
            message,
            code,
            source: Some(Box::new(e)),
        },
    }
}

/// Table name for an index. Index names are restricted so they can be quoted safely.
fn table_name(index: &str) -> SagaResult<String> {
    let valid = !index.is_empty()
        && index
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(SagaError::invalid_identifier("index name", index));
    }
    Ok(format!("\"saga_idx_{}\"", index))
}

fn metric_name(metric: DistanceMetric) -> SagaResult<&'static str> {
    match metric {
        DistanceMetric::Cosine => Ok("cosine"),
        DistanceMetric::Euclidean => Ok("euclidean"),
        DistanceMetric::DotProduct => Err(SagaError::Configuration(
            "sqlite-vec supports cosine and euclidean distance only".to_string(),
        )),
    }
}

fn parse_metric(name: &str) -> DistanceMetric {
    match name {
        "euclidean" => DistanceMetric::Euclidean,
        _ => DistanceMetric::Cosine,
    }
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_payload(id: &str, raw: &str) -> HashMap<String, Value> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(id, error = %e, "Stored payload is not a JSON object");
        HashMap::new()
    })
}

/// Translates [`Filter`] trees into a SQL boolean expression over
/// `json_extract(payload, ...)` plus its bound parameters.
///
/// Every leaf is two-valued (`COALESCE(..., 0)`), so a missing field behaves
/// as in [`Filter::matches`]: it fails comparisons and satisfies `Ne`/`Nin`.
pub struct SqlFilterTranslator;

impl SqlFilterTranslator {
    fn column(field: &str) -> SagaResult<String> {
        let valid = field
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(SagaError::invalid_identifier("filter field", field));
        }
        Ok(format!("json_extract(payload, '$.{}')", field))
    }

    fn bind(cond: &FilterCondition, value: &Value) -> SagaResult<SqlValue> {
        match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Bool(b) => Ok(SqlValue::Integer(*b as i64)),
            Value::Number(n) => Ok(match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            }),
            _ => Err(SagaError::validation(format!(
                "Filter on '{}' cannot compare against {}",
                cond.field, value
            ))),
        }
    }

    fn list(
        cond: &FilterCondition,
        values: &[Value],
        params: &mut Vec<SqlValue>,
    ) -> SagaResult<String> {
        let mut placeholders = Vec::with_capacity(values.len());
        for value in values {
            params.push(Self::bind(cond, value)?);
            placeholders.push("?");
        }
        Ok(placeholders.join(", "))
    }

    fn condition(cond: &FilterCondition, params: &mut Vec<SqlValue>) -> SagaResult<String> {
        let column = Self::column(&cond.field)?;
        let sql = match &cond.operator {
            FilterOperator::Eq(v) => {
                params.push(Self::bind(cond, v)?);
                format!("COALESCE({} = ?, 0)", column)
            }
            FilterOperator::Ne(v) => {
                params.push(Self::bind(cond, v)?);
                format!("NOT COALESCE({} = ?, 0)", column)
            }
            FilterOperator::Gt(v)
            | FilterOperator::Gte(v)
            | FilterOperator::Lt(v)
            | FilterOperator::Lte(v) => {
                let op = match &cond.operator {
                    FilterOperator::Gt(_) => ">",
                    FilterOperator::Gte(_) => ">=",
                    FilterOperator::Lt(_) => "<",
                    _ => "<=",
                };
                // Numbers only compare with numbers and strings with strings.
                let types = if v.is_string() { "'text'" } else { "'integer', 'real'" };
                params.push(Self::bind(cond, v)?);
                format!(
                    "COALESCE(typeof({col}) IN ({types}) AND {col} {op} ?, 0)",
                    col = column,
                    types = types,
                    op = op
                )
            }
            FilterOperator::In(values) if values.is_empty() => "0".to_string(),
            FilterOperator::In(values) => {
                let placeholders = Self::list(cond, values, params)?;
                format!("COALESCE({} IN ({}), 0)", column, placeholders)
            }
            FilterOperator::Nin(values) if values.is_empty() => "1".to_string(),
            FilterOperator::Nin(values) => {
                let placeholders = Self::list(cond, values, params)?;
                format!("NOT COALESCE({} IN ({}), 0)", column, placeholders)
            }
        };
        Ok(sql)
    }

    fn expression(filter: &Filter, params: &mut Vec<SqlValue>) -> SagaResult<String> {
        match filter {
            Filter::Condition(cond) => Self::condition(cond, params),
            Filter::And(filters) if filters.is_empty() => Ok("1".to_string()),
            Filter::Or(filters) if filters.is_empty() => Ok("0".to_string()),
            Filter::And(filters) | Filter::Or(filters) => {
                let joiner = if matches!(filter, Filter::And(_)) { " AND " } else { " OR " };
                let parts = filters
                    .iter()
                    .map(|f| Self::expression(f, params))
                    .collect::<SagaResult<Vec<_>>>()?;
                Ok(format!("({})", parts.join(joiner)))
            }
            Filter::Not(inner) => Ok(format!("NOT ({})", Self::expression(inner, params)?)),
        }
    }
}

impl FilterTranslator for SqlFilterTranslator {
    type Output = (String, Vec<SqlValue>);
    type Error = SagaError;

    fn translate(&self, filter: &Filter) -> SagaResult<Self::Output> {
        let mut params = Vec::new();
        let sql = Self::expression(filter, &mut params)?;
        Ok((sql, params))
    }
}

fn where_clause(filter: Option<&Filter>) -> SagaResult<(String, Vec<SqlValue>)> {
    match filter {
        Some(f) => SqlFilterTranslator.translate(f),
        None => Ok(("1".to_string(), Vec::new())),
    }
}

/// SQLite vector store session over one connection.
pub struct SqliteVecStore {
    /// `None` once the session is disconnected.
    conn: Mutex<Option<Connection>>,
}

impl SqliteVecStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> SagaResult<Self> {
        register_extension();

        let conn = Connection::open(path.as_ref()).map_err(|e| {
            db_error("Failed to open SQLite database", ErrorCode::VecConnectionFailed, e)
        })?;

        let version: String = conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .map_err(|e| {
                db_error("sqlite-vec extension not loaded", ErrorCode::VecConnectionFailed, e)
            })?;
        tracing::debug!(version = %version, "sqlite-vec loaded");

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    name TEXT PRIMARY KEY,
                    dimension INTEGER NOT NULL,
                    metric TEXT NOT NULL
                )",
                REGISTRY_TABLE
            ),
            [],
        )
        .map_err(|e| db_error("Failed to create index registry", ErrorCode::VecConnectionFailed, e))?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn lock(&self) -> SagaResult<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|e| SagaError::vector_store(format!("Failed to acquire lock: {}", e)))
    }

    fn closed() -> SagaError {
        SagaError::vector_store("SQLite session already disconnected")
    }

    fn index_meta(conn: &Connection, index: &str) -> SagaResult<(usize, DistanceMetric)> {
        conn.query_row(
            &format!("SELECT dimension, metric FROM {} WHERE name = ?1", REGISTRY_TABLE),
            [index],
            |row| Ok((row.get::<_, i64>(0)? as usize, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(|e| db_error("Failed to read index registry", ErrorCode::VecConnectionFailed, e))?
        .map(|(dimension, metric)| (dimension, parse_metric(&metric)))
        .ok_or_else(|| SagaError::index_not_found(index))
    }
}

#[async_trait]
impl VectorStore for SqliteVecStore {
    async fn ensure_index(
        &self,
        name: &str,
        dimension: usize,
        distance: DistanceMetric,
    ) -> SagaResult<()> {
        let table = table_name(name)?;
        let metric = metric_name(distance)?;
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(Self::closed)?;

        match Self::index_meta(conn, name) {
            Ok((existing, _)) if existing != dimension => {
                return Err(SagaError::vector_store(format!(
                    "Index '{}' has dimension {}, expected {}",
                    name, existing, dimension
                )))
            }
            Ok(_) => return Ok(()),
            Err(e) if e.code() == ErrorCode::VecIndexNotFound => {}
            Err(e) => return Err(e),
        }

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                payload TEXT NOT NULL
            )",
            table
        ))
        .map_err(|e| db_error(format!("Failed to create index '{}'", name), ErrorCode::VecConnectionFailed, e))?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (name, dimension, metric) VALUES (?1, ?2, ?3)",
                REGISTRY_TABLE
            ),
            rusqlite::params![name, dimension as i64, metric],
        )
        .map_err(|e| db_error("Failed to register index", ErrorCode::VecConnectionFailed, e))?;

        tracing::info!(index = name, dimension, metric, "Created sqlite-vec index");
        Ok(())
    }

    async fn upsert(&self, index: &str, records: Vec<VectorRecord>) -> SagaResult<()> {
        let table = table_name(index)?;
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or_else(Self::closed)?;

        let (dimension, _) = Self::index_meta(conn, index)?;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dimension) {
            return Err(SagaError::store_write(format!(
                "Record '{}' has dimension {}, index expects {}",
                bad.id,
                bad.vector.len(),
                dimension
            )));
        }

        let tx = conn
            .transaction()
            .map_err(|e| db_error("Failed to begin transaction", ErrorCode::VecWriteFailed, e))?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} (id, embedding, payload) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET embedding = excluded.embedding, payload = excluded.payload",
                    table
                ))
                .map_err(|e| db_error("Failed to prepare upsert", ErrorCode::VecWriteFailed, e))?;

            for record in &records {
                let payload = serde_json::to_string(&record.payload)?;
                stmt.execute(rusqlite::params![record.id, record.vector.as_bytes(), payload])
                    .map_err(|e| {
                        db_error(
                            format!("Failed to write record '{}'", record.id),
                            ErrorCode::VecWriteFailed,
                            e,
                        )
                    })?;
            }
        }
        tx.commit()
            .map_err(|e| db_error("Failed to commit upsert", ErrorCode::VecWriteFailed, e))?;

        tracing::debug!(index, count = records.len(), "Upserted records");
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
        include_vector: bool,
    ) -> SagaResult<Vec<VectorSearchResult>> {
        let table = table_name(index)?;
        let (predicate, mut params) = where_clause(filter)?;
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(Self::closed)?;

        let (dimension, metric) = Self::index_meta(conn, index)?;
        if vector.len() != dimension {
            return Err(SagaError::store_query(format!(
                "Query vector has dimension {}, index '{}' expects {}",
                vector.len(),
                index,
                dimension
            )));
        }
        let distance_fn = match metric {
            DistanceMetric::Euclidean => "vec_distance_l2",
            _ => "vec_distance_cosine",
        };

        let sql = format!(
            "SELECT id, payload, embedding, {}(embedding, ?) AS distance
             FROM {} WHERE {} ORDER BY distance ASC LIMIT ?",
            distance_fn, table, predicate
        );
        let mut bound = vec![SqlValue::Blob(vector.as_bytes().to_vec())];
        bound.append(&mut params);
        bound.push(SqlValue::Integer(i64::try_from(top_k).unwrap_or(i64::MAX)));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| db_error("Failed to prepare query", ErrorCode::VecQueryFailed, e))?;
        let rows = stmt
            .query_map(params_from_iter(bound), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })
            .map_err(|e| db_error("Failed to execute query", ErrorCode::VecQueryFailed, e))?;

        let mut results = Vec::new();
        for row in rows {
            let (id, payload, embedding, distance) =
                row.map_err(|e| db_error("Failed to read query row", ErrorCode::VecQueryFailed, e))?;
            let distance = distance as f32;
            let score = match metric {
                DistanceMetric::Euclidean => 1.0 / (1.0 + distance),
                _ => 1.0 - distance,
            };
            results.push(VectorSearchResult {
                payload: parse_payload(&id, &payload),
                vector: include_vector.then(|| bytes_to_vector(&embedding)),
                id,
                score,
            });
        }
        Ok(results)
    }

    async fn list(
        &self,
        index: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> SagaResult<Vec<VectorRecord>> {
        let table = table_name(index)?;
        let (predicate, mut params) = where_clause(filter)?;
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(Self::closed)?;
        Self::index_meta(conn, index)?;

        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        let sql = format!(
            "SELECT id, embedding, payload FROM {} WHERE {} ORDER BY rowid LIMIT ?",
            table, predicate
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| db_error("Failed to prepare list", ErrorCode::VecQueryFailed, e))?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| db_error("Failed to execute list", ErrorCode::VecQueryFailed, e))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, embedding, payload) =
                row.map_err(|e| db_error("Failed to read list row", ErrorCode::VecQueryFailed, e))?;
            records.push(VectorRecord {
                payload: parse_payload(&id, &payload),
                vector: bytes_to_vector(&embedding),
                id,
            });
        }
        Ok(records)
    }

    async fn delete_by_filter(&self, index: &str, filter: &Filter) -> SagaResult<Option<u64>> {
        let table = table_name(index)?;
        let (predicate, params) = SqlFilterTranslator.translate(filter)?;
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(Self::closed)?;
        Self::index_meta(conn, index)?;

        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE {}", table, predicate),
                params_from_iter(params),
            )
            .map_err(|e| db_error("Failed to delete records", ErrorCode::VecWriteFailed, e))?;
        Ok(Some(deleted as u64))
    }

    async fn delete_index(&self, name: &str) -> SagaResult<()> {
        let table = table_name(name)?;
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(Self::closed)?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", table))
            .map_err(|e| db_error("Failed to drop index", ErrorCode::VecConnectionFailed, e))?;
        conn.execute(
            &format!("DELETE FROM {} WHERE name = ?1", REGISTRY_TABLE),
            [name],
        )
        .map_err(|e| db_error("Failed to unregister index", ErrorCode::VecConnectionFailed, e))?;
        Ok(())
    }

    async fn index_info(&self, name: &str) -> SagaResult<IndexInfo> {
        let table = table_name(name)?;
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(Self::closed)?;
        let (dimension, distance) = Self::index_meta(conn, name)?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .map_err(|e| db_error("Failed to count records", ErrorCode::VecQueryFailed, e))?;
        Ok(IndexInfo {
            name: name.to_string(),
            vector_count: count as u64,
            dimension,
            distance,
        })
    }

    async fn disconnect(&self) -> SagaResult<()> {
        if let Some(conn) = self.lock()?.take() {
            conn.close().map_err(|(_, e)| {
                db_error("Failed to close SQLite connection", ErrorCode::VecConnectionFailed, e)
            })?;
        }
        Ok(())
    }
}

/// Opens a fresh connection to one database file per session.
pub struct SqliteVecConnector {
    path: PathBuf,
}

impl SqliteVecConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StoreConnector for SqliteVecConnector {
    async fn connect(&self) -> SagaResult<Arc<dyn VectorStore>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Arc::new(SqliteVecStore::open(&self.path)?))
    }

    fn provider(&self) -> &str {
        "sqlite_vec"
    }
}
