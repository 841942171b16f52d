use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;

/// Everything needed to create one index.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub mapping: Value,
    pub shards: u32,
    pub replicas: u32,
}

/// One matching document from a search or scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub source: Value,
}

/// A single failed document from a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

/// The per-document outcome of one bulk write. Partial failure is normal:
/// successes are kept and failures itemized, the caller decides what to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failures.len()
    }
}

/// The document-search backend, seen through the operations this system
/// needs. The backend performs no implicit retries; every error surfaces to
/// the caller as a single [`AppError`].
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Creates an index. With `drop_if_exists` the index is deleted and
    /// recreated unconditionally; otherwise creation only happens if the
    /// index is absent.
    async fn create_index(&self, spec: &IndexSpec, drop_if_exists: bool) -> Result<(), AppError>;

    /// Indexes one document under an explicit ID, overwriting any previous
    /// document with that ID.
    async fn index_document(&self, index: &str, id: &str, document: Value) -> Result<(), AppError>;

    /// Fetches one document's source, restricted to `source_includes` when
    /// non-empty. Returns Ok(None) when the document does not exist.
    async fn get_document(
        &self,
        index: &str,
        id: &str,
        source_includes: &[&str],
    ) -> Result<Option<Value>, AppError>;

    /// Partial-document update; when `upsert` is given and the document is
    /// absent, the upsert body is indexed instead.
    async fn update_document(
        &self,
        index: &str,
        id: &str,
        doc: Value,
        upsert: Option<Value>,
    ) -> Result<(), AppError>;

    /// Writes many documents in one round trip. Failures are reported per
    /// document in the outcome, never as an all-or-nothing error.
    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(String, Value)>,
    ) -> Result<BulkOutcome, AppError>;

    /// Atomic server-side append of `element` to an array field of an
    /// existing document. Never read-modify-write, so concurrent appends to
    /// the same document cannot lose updates.
    async fn append_to_list(
        &self,
        index: &str,
        id: &str,
        list_field: &str,
        element: Value,
    ) -> Result<(), AppError>;

    /// Executes N independent queries as one batch. The returned responses
    /// are in query order; anything but a 1:1 response count fails the whole
    /// batch.
    async fn multi_search(&self, index: &str, queries: Vec<Value>)
        -> Result<Vec<Value>, AppError>;

    /// Runs an aggregation-only search (no document bodies fetched) and
    /// returns the raw aggregations object.
    async fn aggregate(&self, index: &str, body: Value) -> Result<Value, AppError>;

    /// Reads every document matching `query`, paging through a server-side
    /// cursor at `page_size` documents per page. The cursor is released when
    /// the scan completes.
    async fn scan_all(
        &self,
        index: &str,
        page_size: i64,
        query: Value,
    ) -> Result<Vec<SearchHit>, AppError>;
}
