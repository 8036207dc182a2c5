use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::BackendError;
use crate::query::{Filter, SelectQuery};
use crate::{Backend, Row};

/// In-process backend with the same observable behaviour as the REST one:
/// single-row misses carry the not-found code, upserts merge on the conflict
/// column, writes require filters, and registered vector procedures rank rows
/// by cosine similarity.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    storage_base: String,
}

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<Row>>,
    objects: HashSet<(String, String)>,
    procedures: HashMap<String, VectorProcedure>,
    next_id: u64,
    next_token: u64,
}

#[derive(Clone)]
struct VectorProcedure {
    table: String,
    embedding_column: String,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                next_token: 1,
                ..MemoryState::default()
            }),
            storage_base: "http://memory.local".to_string(),
        }
    }

    pub fn create_table(&self, table: &str) {
        self.state.lock().tables.entry(table.to_string()).or_default();
    }

    /// Appends rows verbatim; objects only, other values are skipped.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut state = self.state.lock();
        let target = state.tables.entry(table.to_string()).or_default();
        target.extend(rows.into_iter().filter_map(|v| match v {
            Value::Object(row) => Some(row),
            _ => None,
        }));
    }

    pub fn put_object(&self, bucket: &str, path: &str) {
        self.state
            .lock()
            .objects
            .insert((bucket.to_string(), path.to_string()));
    }

    /// Makes `function` callable through [`Backend::rpc`] with the
    /// `{query_embedding, match_threshold, match_count}` parameter shape.
    pub fn register_vector_procedure(&self, function: &str, table: &str, embedding_column: &str) {
        self.state.lock().procedures.insert(
            function.to_string(),
            VectorProcedure {
                table: table.to_string(),
                embedding_column: embedding_column.to_string(),
            },
        );
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn table_mut(&mut self, table: &str) -> Result<&mut Vec<Row>, BackendError> {
        self.tables.get_mut(table).ok_or_else(|| missing_table(table))
    }

    fn assign_id(&mut self, row: &mut Row) {
        if !row.contains_key("id") {
            row.insert("id".to_string(), json!(self.next_id));
            self.next_id += 1;
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Row>, BackendError> {
        let state = self.state.lock();
        let rows = state
            .tables
            .get(&query.table)
            .ok_or_else(|| missing_table(&query.table))?;
        let projection = query.projected_columns();
        Ok(rows
            .iter()
            .filter(|row| query.filters.iter().all(|f| f.matches(row)))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|row| project(row, projection.as_deref()))
            .collect())
    }

    async fn select_single(&self, query: SelectQuery) -> Result<Row, BackendError> {
        let mut rows = self.select(query.limit(2)).await?;
        if rows.len() != 1 {
            return Err(BackendError::not_found(format!(
                "JSON object requested, {} rows returned",
                rows.len()
            )));
        }
        Ok(rows.remove(0))
    }

    async fn insert(&self, table: &str, rows: Value) -> Result<Vec<Row>, BackendError> {
        let rows = match rows {
            Value::Object(row) => vec![row],
            Value::Array(items) => items
                .into_iter()
                .map(|v| match v {
                    Value::Object(row) => Ok(row),
                    _ => Err(BackendError::InvalidInput(
                        "insert array must contain objects".to_string(),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(BackendError::InvalidInput(
                    "insert payload must be an object or an array of objects".to_string(),
                ));
            }
        };

        let mut state = self.state.lock();
        state.table_mut(table)?;
        let mut inserted = Vec::with_capacity(rows.len());
        for mut row in rows {
            state.assign_id(&mut row);
            inserted.push(row);
        }
        state.table_mut(table)?.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn upsert(
        &self,
        table: &str,
        mut row: Row,
        on_conflict: &str,
    ) -> Result<Vec<Row>, BackendError> {
        let Some(key) = row.get(on_conflict).cloned() else {
            return Err(BackendError::InvalidInput(format!(
                "upsert row is missing conflict column {on_conflict}"
            )));
        };

        let mut state = self.state.lock();
        let rows = state.table_mut(table)?;
        if let Some(existing) = rows.iter_mut().find(|r| r.get(on_conflict) == Some(&key)) {
            for (k, v) in row {
                existing.insert(k, v);
            }
            return Ok(vec![existing.clone()]);
        }
        state.assign_id(&mut row);
        state.table_mut(table)?.push(row.clone());
        Ok(vec![row])
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, BackendError> {
        require_filters("update", table, filters)?;
        let mut state = self.state.lock();
        let mut updated = Vec::new();
        for row in state
            .table_mut(table)?
            .iter_mut()
            .filter(|r| filters.iter().all(|f| f.matches(r)))
        {
            for (k, v) in &patch {
                row.insert(k.clone(), v.clone());
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError> {
        require_filters("delete", table, filters)?;
        let mut state = self.state.lock();
        let rows = state.table_mut(table)?;
        let (removed, kept): (Vec<Row>, Vec<Row>) = rows
            .drain(..)
            .partition(|r| filters.iter().all(|f| f.matches(r)));
        *rows = kept;
        Ok(removed)
    }

    async fn rpc(&self, function: &str, params: Value) -> Result<Value, BackendError> {
        let state = self.state.lock();
        let Some(proc_def) = state.procedures.get(function).cloned() else {
            return Err(BackendError::Api {
                status: 404,
                code: Some("PGRST202".to_string()),
                message: format!("Could not find the function public.{function}"),
            });
        };
        let query = params
            .get("query_embedding")
            .and_then(parse_vector)
            .ok_or_else(|| {
                BackendError::InvalidInput("query_embedding must be a numeric array".to_string())
            })?;
        let threshold = params
            .get("match_threshold")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let count = params
            .get("match_count")
            .and_then(Value::as_u64)
            .map_or(10, |c| usize::try_from(c).unwrap_or(usize::MAX));

        let rows = state
            .tables
            .get(&proc_def.table)
            .ok_or_else(|| missing_table(&proc_def.table))?;
        let mut scored = rows
            .iter()
            .filter_map(|row| {
                let stored = row.get(&proc_def.embedding_column).and_then(parse_vector)?;
                let similarity = cosine_similarity(&query, &stored)?;
                (f64::from(similarity) >= threshold).then_some((row, similarity))
            })
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let out = scored
            .into_iter()
            .take(count)
            .map(|(row, similarity)| {
                let mut row = row.clone();
                row.remove(&proc_def.embedding_column);
                row.insert("similarity".to_string(), json!(similarity));
                Value::Object(row)
            })
            .collect();
        Ok(Value::Array(out))
    }

    async fn list_tables(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.state.lock().tables.keys().cloned().collect())
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, BackendError> {
        let mut state = self.state.lock();
        if !state
            .objects
            .contains(&(bucket.to_string(), path.to_string()))
        {
            return Err(BackendError::Api {
                status: 400,
                code: None,
                message: "Object not found".to_string(),
            });
        }
        let token = state.next_token;
        state.next_token += 1;
        Ok(format!(
            "{}/storage/v1/object/sign/{bucket}/{path}?token=mem-{token}&expires_in={expires_in_secs}",
            self.storage_base
        ))
    }
}

fn missing_table(table: &str) -> BackendError {
    BackendError::Api {
        status: 404,
        code: Some("42P01".to_string()),
        message: format!("relation \"public.{table}\" does not exist"),
    }
}

fn require_filters(op: &str, table: &str, filters: &[Filter]) -> Result<(), BackendError> {
    if filters.is_empty() {
        return Err(BackendError::InvalidInput(format!(
            "{op} on {table} requires at least one filter"
        )));
    }
    Ok(())
}

fn project(row: &Row, columns: Option<&[String]>) -> Row {
    match columns {
        None => row.clone(),
        Some(cols) => cols
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
            .collect(),
    }
}

/// Vectors arrive either as JSON arrays or in the `[0.1,0.2]` text form
/// pgvector columns use over REST.
fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    let owned;
    let items = match value {
        Value::Array(items) => items,
        Value::String(raw) => {
            owned = serde_json::from_str::<Vec<Value>>(raw).ok()?;
            &owned
        }
        _ => return None,
    };
    items
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<_>>>()
        .filter(|v| !v.is_empty())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let mut dot = 0.0_f32;
    let mut na = 0.0_f32;
    let mut nb = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        return Some(0.0);
    }
    Some(dot / denom)
}
