use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::{json, to_value, Value};

use crate::collection::{ImageCollection, UploadRecord};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::metadata::{GeoPoint, IndexedImageDocument};
use crate::query::{compose, QueryCondition};
use crate::schema::{
    collections_index_mapping, metadata_index_mapping, new_user_document, sites_index_mapping,
    users_index_mapping, INDEX_COLLECTIONS, INDEX_METADATA, INDEX_SITES, INDEX_USERS,
};
use crate::search::{IndexSpec, SearchIndex};
use crate::site::SiteDocument;

/// High-level catalog operations over the search backend: index lifecycle,
/// users, collections, sites, and metadata queries.
pub struct Catalog {
    search: Arc<dyn SearchIndex>,
    scroll_page_size: i64,
}

impl Catalog {
    pub fn new(search: Arc<dyn SearchIndex>, scroll_page_size: i64) -> Self {
        Self {
            search,
            scroll_page_size,
        }
    }

    /// Creates every index this system uses. With `drop_if_exists` the
    /// indices are wiped and rebuilt, losing all stored data.
    pub async fn init_indices(
        &self,
        config: &AppConfig,
        drop_if_exists: bool,
    ) -> Result<(), AppError> {
        let specs = [
            IndexSpec {
                name: INDEX_USERS.into(),
                mapping: users_index_mapping(),
                shards: config.users_index.shards,
                replicas: config.users_index.replicas,
            },
            IndexSpec {
                name: INDEX_METADATA.into(),
                mapping: metadata_index_mapping(),
                shards: config.metadata_index.shards,
                replicas: config.metadata_index.replicas,
            },
            IndexSpec {
                name: INDEX_COLLECTIONS.into(),
                mapping: collections_index_mapping(),
                shards: config.collections_index.shards,
                replicas: config.collections_index.replicas,
            },
            IndexSpec {
                name: INDEX_SITES.into(),
                mapping: sites_index_mapping(),
                shards: config.sites_index.shards,
                replicas: config.sites_index.replicas,
            },
        ];
        try_join_all(
            specs
                .iter()
                .map(|spec| self.search.create_index(spec, drop_if_exists)),
        )
        .await?;
        Ok(())
    }

    /// Creates the user's document on first login; later logins are no-ops.
    pub async fn ensure_user(&self, username: &str) -> Result<(), AppError> {
        let existing = self.search.get_document(INDEX_USERS, username, &[]).await?;
        if existing.is_none() {
            log::info!("Creating first-login document for user '{}'.", username);
            self.search
                .index_document(INDEX_USERS, username, new_user_document(username))
                .await?;
        }
        Ok(())
    }

    /// Overwrites the user's stored settings object.
    pub async fn push_settings(&self, username: &str, settings: Value) -> Result<(), AppError> {
        self.search
            .update_document(INDEX_USERS, username, json!({ "settings": settings }), None)
            .await
    }

    /// Saves a collection. A first save creates the full document; later
    /// saves update everything except `uploads`, which only the scripted
    /// append may touch.
    pub async fn upsert_collection(&self, collection: &ImageCollection) -> Result<(), AppError> {
        self.search
            .update_document(
                INDEX_COLLECTIONS,
                &collection.id,
                collection.to_update_document(),
                Some(collection.to_create_document()),
            )
            .await
    }

    /// Fetches only the upload log of one collection.
    pub async fn collection_uploads(
        &self,
        collection_id: &str,
    ) -> Result<Vec<UploadRecord>, AppError> {
        let source = self
            .search
            .get_document(INDEX_COLLECTIONS, collection_id, &["uploads"])
            .await?
            .ok_or_else(|| AppError::NotFound(format!("collection '{}'", collection_id)))?;
        let uploads = source.get("uploads").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(uploads)?)
    }

    /// Reads every collection document via a paged full scan.
    pub async fn all_collections(&self) -> Result<Vec<ImageCollection>, AppError> {
        let hits = self
            .search
            .scan_all(INDEX_COLLECTIONS, self.scroll_page_size, json!({ "match_all": {} }))
            .await?;
        let mut collections = Vec::with_capacity(hits.len());
        for hit in hits {
            match serde_json::from_value::<ImageCollection>(hit.source) {
                Ok(collection) => collections.push(collection),
                Err(e) => log::warn!("Skipping undecodable collection '{}': {}", hit.id, e),
            }
        }
        Ok(collections)
    }

    /// Reads every site document via a paged full scan.
    pub async fn all_sites(&self) -> Result<Vec<SiteDocument>, AppError> {
        let hits = self
            .search
            .scan_all(INDEX_SITES, self.scroll_page_size, json!({ "match_all": {} }))
            .await?;
        let mut sites = Vec::with_capacity(hits.len());
        for hit in hits {
            match serde_json::from_value::<SiteDocument>(hit.source) {
                Ok(site) => sites.push(site),
                Err(e) => log::warn!("Skipping undecodable site '{}': {}", hit.id, e),
            }
        }
        Ok(sites)
    }

    /// Replaces the whole site cache: the index is dropped, recreated, and
    /// refilled from the given site list in one bulk write.
    pub async fn refresh_sites(
        &self,
        config: &AppConfig,
        sites: &[SiteDocument],
    ) -> Result<(), AppError> {
        let spec = IndexSpec {
            name: INDEX_SITES.into(),
            mapping: sites_index_mapping(),
            shards: config.sites_index.shards,
            replicas: config.sites_index.replicas,
        };
        self.search.create_index(&spec, true).await?;

        let documents = sites
            .iter()
            .map(|site| Ok((site.code.clone(), to_value(site)?)))
            .collect::<Result<Vec<_>, AppError>>()?;
        let outcome = self.search.bulk_index(INDEX_SITES, documents).await?;
        if !outcome.is_complete() {
            log::warn!(
                "{} of {} sites failed to index during refresh.",
                outcome.failures.len(),
                outcome.attempted()
            );
        }
        Ok(())
    }

    /// Runs a composed filter query against the metadata index and returns
    /// every matching image document.
    pub async fn query_images(
        &self,
        conditions: &[QueryCondition],
    ) -> Result<Vec<IndexedImageDocument>, AppError> {
        let query = compose(conditions);
        let hits = self
            .search
            .scan_all(INDEX_METADATA, self.scroll_page_size, query.to_body())
            .await?;
        let mut images = Vec::with_capacity(hits.len());
        for hit in hits {
            match serde_json::from_value::<IndexedImageDocument>(hit.source) {
                Ok(image) => images.push(image),
                Err(e) => log::warn!("Skipping undecodable metadata document '{}': {}", hit.id, e),
            }
        }
        Ok(images)
    }

    /// For each position, finds the site whose boundary contains it. The
    /// result is parallel to the input; positions outside every site map to
    /// None. One multi-search round trip regardless of input size.
    pub async fn detect_sites(
        &self,
        positions: &[GeoPoint],
    ) -> Result<Vec<Option<String>>, AppError> {
        if positions.is_empty() {
            return Ok(Vec::new());
        }
        let queries = positions
            .iter()
            .map(|position| {
                json!({
                    "size": 1,
                    "_source": ["code"],
                    "query": {
                        "bool": {
                            "filter": {
                                "geo_shape": {
                                    "boundary": {
                                        "shape": {
                                            "type": "point",
                                            "coordinates": [position.lon, position.lat],
                                        },
                                        "relation": "intersects",
                                    }
                                }
                            }
                        }
                    }
                })
            })
            .collect();
        let responses = self.search.multi_search(INDEX_SITES, queries).await?;

        Ok(responses
            .iter()
            .map(|response| {
                response["hits"]["hits"]
                    .as_array()
                    .and_then(|hits| hits.first())
                    .and_then(|hit| hit["_source"]["code"].as_str())
                    .map(str::to_string)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::search::{BulkOutcome, SearchHit};

    /// In-memory stand-in for the search backend.
    #[derive(Default)]
    struct FakeSearch {
        documents: Mutex<HashMap<(String, String), Value>>,
        msearch_responses: Mutex<Vec<Value>>,
        enforce_msearch_contract: bool,
        msearch_expected: Mutex<usize>,
    }

    #[async_trait]
    impl SearchIndex for FakeSearch {
        async fn create_index(&self, _spec: &IndexSpec, _drop: bool) -> Result<(), AppError> {
            Ok(())
        }

        async fn index_document(
            &self,
            index: &str,
            id: &str,
            document: Value,
        ) -> Result<(), AppError> {
            self.documents
                .lock()
                .unwrap()
                .insert((index.into(), id.into()), document);
            Ok(())
        }

        async fn get_document(
            &self,
            index: &str,
            id: &str,
            _includes: &[&str],
        ) -> Result<Option<Value>, AppError> {
            Ok(self
                .documents
                .lock()
                .unwrap()
                .get(&(index.into(), id.into()))
                .cloned())
        }

        async fn update_document(
            &self,
            index: &str,
            id: &str,
            doc: Value,
            upsert: Option<Value>,
        ) -> Result<(), AppError> {
            let mut documents = self.documents.lock().unwrap();
            let key = (index.to_string(), id.to_string());
            if let Some(existing) = documents.get_mut(&key) {
                if let (Some(existing), Some(doc)) = (existing.as_object_mut(), doc.as_object()) {
                    for (k, v) in doc {
                        existing.insert(k.clone(), v.clone());
                    }
                }
            } else {
                documents.insert(key, upsert.unwrap_or(doc));
            }
            Ok(())
        }

        async fn bulk_index(
            &self,
            index: &str,
            documents: Vec<(String, Value)>,
        ) -> Result<BulkOutcome, AppError> {
            let mut stored = self.documents.lock().unwrap();
            let succeeded = documents.len();
            for (id, document) in documents {
                stored.insert((index.to_string(), id), document);
            }
            Ok(BulkOutcome {
                succeeded,
                failures: Vec::new(),
            })
        }

        async fn append_to_list(
            &self,
            index: &str,
            id: &str,
            list_field: &str,
            element: Value,
        ) -> Result<(), AppError> {
            let mut documents = self.documents.lock().unwrap();
            let document = documents
                .get_mut(&(index.to_string(), id.to_string()))
                .ok_or_else(|| AppError::NotFound(id.to_string()))?;
            document[list_field]
                .as_array_mut()
                .ok_or_else(|| AppError::Generic(format!("{} is not a list", list_field)))?
                .push(element);
            Ok(())
        }

        async fn multi_search(
            &self,
            _index: &str,
            queries: Vec<Value>,
        ) -> Result<Vec<Value>, AppError> {
            *self.msearch_expected.lock().unwrap() = queries.len();
            let responses = self.msearch_responses.lock().unwrap().clone();
            if self.enforce_msearch_contract && responses.len() != queries.len() {
                return Err(AppError::ResponseCountMismatch {
                    expected: queries.len(),
                    actual: responses.len(),
                });
            }
            Ok(responses)
        }

        async fn aggregate(&self, _index: &str, _body: Value) -> Result<Value, AppError> {
            Ok(json!({}))
        }

        async fn scan_all(
            &self,
            index: &str,
            _page_size: i64,
            _query: Value,
        ) -> Result<Vec<SearchHit>, AppError> {
            Ok(self
                .documents
                .lock()
                .unwrap()
                .iter()
                .filter(|((stored_index, _), _)| stored_index == index)
                .map(|((_, id), source)| SearchHit {
                    id: id.clone(),
                    source: source.clone(),
                })
                .collect())
        }
    }

    fn site_hit(code: &str) -> Value {
        json!({ "hits": { "hits": [ { "_source": { "code": code } } ] } })
    }

    fn no_hit() -> Value {
        json!({ "hits": { "hits": [] } })
    }

    #[tokio::test]
    async fn detect_sites_is_parallel_to_input_with_nulls() {
        let fake = Arc::new(FakeSearch::default());
        *fake.msearch_responses.lock().unwrap() = vec![site_hit("SRER"), no_hit(), site_hit("JORN")];
        let catalog = Catalog::new(fake.clone(), 10);

        let positions = [
            GeoPoint::new(31.8, -110.85),
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(32.6, -106.74),
        ];
        let detected = catalog.detect_sites(&positions).await.unwrap();
        assert_eq!(
            detected,
            vec![Some("SRER".to_string()), None, Some("JORN".to_string())]
        );
        assert_eq!(*fake.msearch_expected.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn short_msearch_response_fails_the_batch() {
        let fake = Arc::new(FakeSearch {
            enforce_msearch_contract: true,
            ..Default::default()
        });
        *fake.msearch_responses.lock().unwrap() = vec![site_hit("SRER")];
        let catalog = Catalog::new(fake, 10);

        let positions = [GeoPoint::new(1.0, 1.0), GeoPoint::new(2.0, 2.0)];
        let result = catalog.detect_sites(&positions).await;
        assert!(matches!(
            result,
            Err(AppError::ResponseCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[tokio::test]
    async fn ensure_user_is_idempotent() {
        let fake = Arc::new(FakeSearch::default());
        let catalog = Catalog::new(fake.clone(), 10);

        catalog.ensure_user("dslovikosky").await.unwrap();
        let created = fake
            .get_document(INDEX_USERS, "dslovikosky", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created["username"], "dslovikosky");

        // A second login must not reset settings.
        catalog
            .push_settings("dslovikosky", json!({ "distanceUnits": "Feet" }))
            .await
            .unwrap();
        catalog.ensure_user("dslovikosky").await.unwrap();
        let kept = fake
            .get_document(INDEX_USERS, "dslovikosky", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept["settings"]["distanceUnits"], "Feet");
    }

    #[tokio::test]
    async fn upsert_then_append_preserves_concurrent_upload_log() {
        use crate::collection::Permission;
        let fake = Arc::new(FakeSearch::default());
        let catalog = Catalog::new(fake.clone(), 10);

        let mut collection = ImageCollection {
            name: "Flights".into(),
            organization: "UA".into(),
            contact_info: "x@y.z".into(),
            description: "d".into(),
            id: "c1".into(),
            permissions: vec![Permission::owner_of("owner")],
            uploads: Vec::new(),
        };
        catalog.upsert_collection(&collection).await.unwrap();

        // An upload record lands through the scripted append...
        fake.append_to_list(
            INDEX_COLLECTIONS,
            "c1",
            "uploads",
            json!({ "uploadUser": "owner", "imageCount": 5 }),
        )
        .await
        .unwrap();

        // ...and a later metadata-only save must not clobber it.
        collection.description = "updated".into();
        catalog.upsert_collection(&collection).await.unwrap();

        let stored = fake
            .get_document(INDEX_COLLECTIONS, "c1", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["description"], "updated");
        assert_eq!(stored["uploads"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_images_round_trips_documents() {
        use crate::metadata::ImageMetadata;
        use chrono::TimeZone;

        let fake = Arc::new(FakeSearch::default());
        let catalog = Catalog::new(fake.clone(), 10);

        let taken = chrono::Utc.with_ymd_and_hms(2020, 3, 14, 9, 0, 0).unwrap();
        let mut metadata = ImageMetadata::new(taken, GeoPoint::new(31.8, -110.85));
        metadata.file_type = "jpg".into();
        let document = IndexedImageDocument::new("/grid/a/img.jpg".into(), "c1".into(), metadata);
        fake.index_document(INDEX_METADATA, &document.id(), to_value(&document).unwrap())
            .await
            .unwrap();

        let images = catalog.query_images(&[]).await.unwrap();
        assert_eq!(images, vec![document]);
    }
}
