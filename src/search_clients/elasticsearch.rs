use async_trait::async_trait;
use elasticsearch::{
    http::request::JsonBody,
    http::transport::{BuildError, SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts},
    BulkParts, ClearScrollParts, Elasticsearch, GetParts, IndexParts, MsearchParts, ScrollParts,
    SearchParts, UpdateParts,
};
use serde_json::{json, Value};
use url::Url;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::search::{BulkFailure, BulkOutcome, IndexSpec, SearchHit, SearchIndex};

/// How long the backend keeps a scroll cursor alive between page fetches.
const SCROLL_KEEP_ALIVE: &str = "1m";

/// Adapter to an Elasticsearch-style document-search backend.
pub struct ElasticSearchIndex {
    client: Elasticsearch,
}

impl ElasticSearchIndex {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        log::debug!(
            "Creating Elasticsearch client for URL: {}",
            config.elasticsearch_url
        );
        let url = Url::parse(&config.elasticsearch_url)?;
        let conn_pool = SingleNodeConnectionPool::new(url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e: BuildError| AppError::Generic(e.to_string()))?;
        let client = Elasticsearch::new(transport);
        log::trace!("Elasticsearch client created successfully.");
        Ok(Self { client })
    }

    /// Opens a lazy scrolled scan over `index`. Pages are fetched on demand;
    /// the scroll context is released at exhaustion, on `finish()`, or (best
    /// effort) when the scan is dropped early.
    pub fn scan(&self, index: &str, page_size: i64, query: Value) -> ScrolledScan {
        ScrolledScan {
            client: self.client.clone(),
            index: index.to_string(),
            page_size,
            query,
            scroll_id: None,
            started: false,
            finished: false,
        }
    }

    async fn check_response(
        response: elasticsearch::http::response::Response,
        context: &str,
    ) -> Result<Value, AppError> {
        let status = response.status_code();
        let body = response.json::<Value>().await?;
        if !status.is_success() {
            return Err(AppError::Backend {
                status: status.as_u16(),
                context: format!("{}: {}", context, body),
            });
        }
        Ok(body)
    }
}

/// A lazy, finite, non-restartable page sequence over one index.
pub struct ScrolledScan {
    client: Elasticsearch,
    index: String,
    page_size: i64,
    query: Value,
    scroll_id: Option<String>,
    started: bool,
    finished: bool,
}

impl ScrolledScan {
    /// Fetches the next page of hits, or None once the scan is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<SearchHit>>, AppError> {
        if self.finished {
            return Ok(None);
        }

        let body = if !self.started {
            self.started = true;
            log::debug!(
                "Opening scroll over index '{}' with page size {}",
                self.index,
                self.page_size
            );
            let response = self
                .client
                .search(SearchParts::Index(&[self.index.as_str()]))
                .scroll(SCROLL_KEEP_ALIVE)
                .body(json!({
                    "size": self.page_size,
                    "query": self.query,
                }))
                .send()
                .await?;
            ElasticSearchIndex::check_response(response, "scroll open").await?
        } else {
            let scroll_id = self
                .scroll_id
                .clone()
                .ok_or_else(|| AppError::Generic("scroll continued without an id".into()))?;
            let response = self
                .client
                .scroll(ScrollParts::None)
                .body(json!({
                    "scroll": SCROLL_KEEP_ALIVE,
                    "scroll_id": scroll_id,
                }))
                .send()
                .await?;
            ElasticSearchIndex::check_response(response, "scroll continue").await?
        };

        self.scroll_id = body["_scroll_id"].as_str().map(str::to_string);
        let hits = decode_hits(&body);
        if hits.is_empty() {
            self.clear().await;
            return Ok(None);
        }
        Ok(Some(hits))
    }

    /// Explicitly releases the scroll context.
    pub async fn finish(mut self) {
        self.clear().await;
    }

    async fn clear(&mut self) {
        self.finished = true;
        if let Some(scroll_id) = self.scroll_id.take() {
            let result = self
                .client
                .clear_scroll(ClearScrollParts::None)
                .body(json!({ "scroll_id": [scroll_id] }))
                .send()
                .await;
            if let Err(e) = result {
                log::warn!("Could not clear scroll context: {}", e);
            }
        }
    }
}

impl Drop for ScrolledScan {
    fn drop(&mut self) {
        // Abandoned before exhaustion: release the server-side cursor from a
        // background task when a runtime is still around to run it.
        if let Some(scroll_id) = self.scroll_id.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let client = self.client.clone();
                    handle.spawn(async move {
                        let result = client
                            .clear_scroll(ClearScrollParts::None)
                            .body(json!({ "scroll_id": [scroll_id] }))
                            .send()
                            .await;
                        if let Err(e) = result {
                            log::warn!("Could not clear abandoned scroll context: {}", e);
                        }
                    });
                }
                Err(_) => {
                    log::warn!("Scroll context leaked: scan dropped outside a runtime");
                }
            }
        }
    }
}

fn decode_hits(body: &Value) -> Vec<SearchHit> {
    body["hits"]["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .map(|hit| SearchHit {
                    id: hit["_id"].as_str().unwrap_or_default().to_string(),
                    source: hit["_source"].clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchIndex for ElasticSearchIndex {
    async fn create_index(&self, spec: &IndexSpec, drop_if_exists: bool) -> Result<(), AppError> {
        log::debug!("Checking if index '{}' exists.", spec.name);
        let exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[spec.name.as_str()]))
            .send()
            .await?
            .status_code()
            .is_success();

        if exists && drop_if_exists {
            log::info!("Dropping index '{}' before recreation.", spec.name);
            let response = self
                .client
                .indices()
                .delete(IndicesDeleteParts::Index(&[spec.name.as_str()]))
                .send()
                .await?;
            Self::check_response(response, "index delete").await?;
        }

        if !exists || drop_if_exists {
            log::info!(
                "Creating index '{}' with {} shards / {} replicas.",
                spec.name,
                spec.shards,
                spec.replicas
            );
            let response = self
                .client
                .indices()
                .create(IndicesCreateParts::Index(&spec.name))
                .body(json!({
                    "settings": {
                        "index": {
                            "number_of_shards": spec.shards,
                            "number_of_replicas": spec.replicas,
                        }
                    },
                    "mappings": spec.mapping,
                }))
                .send()
                .await?;
            Self::check_response(response, "index create").await?;
        } else {
            log::debug!("Index '{}' already exists.", spec.name);
        }

        Ok(())
    }

    async fn index_document(&self, index: &str, id: &str, document: Value) -> Result<(), AppError> {
        let response = self
            .client
            .index(IndexParts::IndexId(index, id))
            .body(document)
            .send()
            .await?;
        Self::check_response(response, "index document").await?;
        Ok(())
    }

    async fn get_document(
        &self,
        index: &str,
        id: &str,
        source_includes: &[&str],
    ) -> Result<Option<Value>, AppError> {
        let mut request = self.client.get(GetParts::IndexId(index, id));
        if !source_includes.is_empty() {
            request = request._source_includes(source_includes);
        }
        let response = request.send().await?;
        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        let body = Self::check_response(response, "get document").await?;
        if body["found"].as_bool() != Some(true) {
            return Ok(None);
        }
        Ok(Some(body["_source"].clone()))
    }

    async fn update_document(
        &self,
        index: &str,
        id: &str,
        doc: Value,
        upsert: Option<Value>,
    ) -> Result<(), AppError> {
        let mut body = json!({ "doc": doc });
        if let Some(upsert) = upsert {
            body["upsert"] = upsert;
        }
        let response = self
            .client
            .update(UpdateParts::IndexId(index, id))
            .body(body)
            .send()
            .await?;
        Self::check_response(response, "update document").await?;
        Ok(())
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(String, Value)>,
    ) -> Result<BulkOutcome, AppError> {
        if documents.is_empty() {
            return Ok(BulkOutcome::default());
        }
        log::debug!("Bulk indexing {} documents into '{}'.", documents.len(), index);

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(documents.len() * 2);
        for (id, document) in documents {
            body.push(json!({ "index": { "_id": id } }).into());
            body.push(document.into());
        }

        let response = self
            .client
            .bulk(BulkParts::Index(index))
            .body(body)
            .send()
            .await?;
        let response_body = Self::check_response(response, "bulk index").await?;

        let mut outcome = BulkOutcome::default();
        if let Some(items) = response_body["items"].as_array() {
            for item in items {
                let entry = &item["index"];
                if entry["error"].is_object() {
                    outcome.failures.push(BulkFailure {
                        id: entry["_id"].as_str().unwrap_or_default().to_string(),
                        reason: entry["error"]["reason"]
                            .as_str()
                            .unwrap_or("unknown")
                            .to_string(),
                    });
                } else {
                    outcome.succeeded += 1;
                }
            }
        }
        if !outcome.is_complete() {
            log::warn!(
                "Bulk index into '{}' had {} failures out of {} documents.",
                index,
                outcome.failures.len(),
                outcome.attempted()
            );
        }
        Ok(outcome)
    }

    async fn append_to_list(
        &self,
        index: &str,
        id: &str,
        list_field: &str,
        element: Value,
    ) -> Result<(), AppError> {
        // Server-side append so two concurrent appends to the same document
        // can never overwrite each other.
        let response = self
            .client
            .update(UpdateParts::IndexId(index, id))
            .body(json!({
                "script": {
                    "source": format!("ctx._source.{}.add(params.element)", list_field),
                    "lang": "painless",
                    "params": { "element": element },
                }
            }))
            .send()
            .await?;
        Self::check_response(response, "scripted append").await?;
        Ok(())
    }

    async fn multi_search(
        &self,
        index: &str,
        queries: Vec<Value>,
    ) -> Result<Vec<Value>, AppError> {
        let expected = queries.len();
        if expected == 0 {
            return Ok(Vec::new());
        }
        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(expected * 2);
        for query in queries {
            body.push(json!({}).into());
            body.push(query.into());
        }

        let response = self
            .client
            .msearch(MsearchParts::Index(&[index]))
            .body(body)
            .send()
            .await?;
        let response_body = Self::check_response(response, "multi search").await?;

        let responses = response_body["responses"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        if responses.len() != expected {
            return Err(AppError::ResponseCountMismatch {
                expected,
                actual: responses.len(),
            });
        }
        Ok(responses)
    }

    async fn aggregate(&self, index: &str, body: Value) -> Result<Value, AppError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(body)
            .send()
            .await?;
        let response_body = Self::check_response(response, "aggregation").await?;
        Ok(response_body["aggregations"].clone())
    }

    async fn scan_all(
        &self,
        index: &str,
        page_size: i64,
        query: Value,
    ) -> Result<Vec<SearchHit>, AppError> {
        let mut scan = self.scan(index, page_size, query);
        let mut all = Vec::new();
        while let Some(mut page) = scan.next_page().await? {
            all.append(&mut page);
        }
        Ok(all)
    }
}
