//! Generic data access for the bridge: filtered reads and writes on named
//! tables, stored-procedure calls and signed download links.
//!
//! [`PostgrestBackend`] talks to the managed service over HTTP;
//! [`MemoryBackend`] keeps everything in process with the same observable
//! semantics and is what the tool tests run against.

pub mod error;
pub mod memory;
pub mod postgrest;
pub mod query;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use error::{BackendError, NOT_FOUND_CODE};
pub use memory::MemoryBackend;
pub use postgrest::{PostgrestBackend, PostgrestConfig};
pub use query::{Filter, SelectQuery};

/// One record as returned by the backend.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select(&self, query: SelectQuery) -> Result<Vec<Row>, BackendError>;

    /// Exactly one row. Zero rows is an [`BackendError::Api`] carrying
    /// [`NOT_FOUND_CODE`], see [`BackendError::is_not_found`].
    async fn select_single(&self, query: SelectQuery) -> Result<Row, BackendError>;

    /// `rows` is either one object or an array of objects.
    async fn insert(&self, table: &str, rows: Value) -> Result<Vec<Row>, BackendError>;

    /// Insert, or merge into the existing row whose `on_conflict` column
    /// equals the one in `row`.
    async fn upsert(&self, table: &str, row: Row, on_conflict: &str)
    -> Result<Vec<Row>, BackendError>;

    /// Filters must be non-empty.
    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, BackendError>;

    /// Filters must be non-empty.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError>;

    async fn rpc(&self, function: &str, params: Value) -> Result<Value, BackendError>;

    async fn list_tables(&self) -> Result<Vec<String>, BackendError>;

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, BackendError>;
}
