use serde_json::{json, Value};

use crate::error::AppError;
use crate::metadata::{fields, GeoPoint};
use crate::query::StructuredQuery;
use crate::schema::INDEX_METADATA;
use crate::search::SearchIndex;

/// A grid cell of aggregated images: where the cell's images cluster, how
/// many there are, and a bounded sample of their document IDs. Computed per
/// query, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoBucket {
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub document_count: u64,
    pub sample_ids: Vec<String>,
}

/// Parameters for one geo-grid aggregation over the metadata index.
#[derive(Debug, Clone)]
pub struct GeoGridRequest {
    pub top_left: GeoPoint,
    pub bottom_right: GeoPoint,
    /// Geohash precision, clamped to 1..=12.
    pub precision: u8,
    /// Optional filter narrowing which images are aggregated.
    pub query: Option<StructuredQuery>,
    /// Upper bound on sampled document IDs per bucket.
    pub ids_per_bucket: usize,
}

impl GeoGridRequest {
    pub fn bounded(top_left: GeoPoint, bottom_right: GeoPoint, precision: u8) -> Self {
        Self {
            top_left,
            bottom_right,
            precision,
            query: None,
            ids_per_bucket: 10,
        }
    }

    /// The full aggregation-only search body: bounding-box filter, then a
    /// geohash grid, then per-cell centroid and ID sample. No document
    /// bodies are fetched.
    pub fn body(&self) -> Value {
        let query = self
            .query
            .as_ref()
            .map(StructuredQuery::to_body)
            .unwrap_or_else(|| json!({ "match_all": {} }));
        json!({
            "size": 0,
            "query": query,
            "aggs": {
                "bounded": {
                    "filter": {
                        "geo_bounding_box": {
                            (fields::POSITION): {
                                "top_left": self.top_left,
                                "bottom_right": self.bottom_right,
                            }
                        }
                    },
                    "aggs": {
                        "cells": {
                            "geohash_grid": {
                                "field": fields::POSITION,
                                "precision": self.precision.clamp(1, 12),
                            },
                            "aggs": {
                                "centroid": {
                                    "geo_centroid": { "field": fields::POSITION }
                                },
                                "sample": {
                                    "top_hits": {
                                        "size": self.ids_per_bucket,
                                        "_source": false,
                                    }
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}

/// Decodes the aggregations object into buckets. Cells with no computed
/// centroid are transient partial results and are skipped, not errors.
pub fn decode_buckets(aggregations: &Value) -> Vec<GeoBucket> {
    let cells = aggregations["bounded"]["cells"]["buckets"].as_array();
    let mut buckets = Vec::new();
    for cell in cells.into_iter().flatten() {
        let centroid = &cell["centroid"]["location"];
        let (lat, lon) = match (centroid["lat"].as_f64(), centroid["lon"].as_f64()) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                log::debug!("Skipping grid cell without a centroid: {}", cell["key"]);
                continue;
            }
        };
        let sample_ids = cell["sample"]["hits"]["hits"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit["_id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        buckets.push(GeoBucket {
            center_latitude: lat,
            center_longitude: lon,
            document_count: cell["doc_count"].as_u64().unwrap_or(0),
            sample_ids,
        });
    }
    buckets
}

/// Runs the aggregation against the metadata index and decodes the result.
pub async fn geo_buckets(
    search: &dyn SearchIndex,
    request: &GeoGridRequest,
) -> Result<Vec<GeoBucket>, AppError> {
    let aggregations = search.aggregate(INDEX_METADATA, request.body()).await?;
    Ok(decode_buckets(&aggregations))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GeoGridRequest {
        GeoGridRequest {
            top_left: GeoPoint::new(33.0, -112.0),
            bottom_right: GeoPoint::new(31.0, -110.0),
            precision: 5,
            query: None,
            ids_per_bucket: 10,
        }
    }

    #[test]
    fn body_is_aggregation_only() {
        let body = request().body();
        assert_eq!(body["size"], 0);
        let cells = &body["aggs"]["bounded"]["aggs"]["cells"];
        assert_eq!(cells["geohash_grid"]["precision"], 5);
        assert_eq!(cells["aggs"]["sample"]["top_hits"]["size"], 10);
        assert_eq!(cells["aggs"]["sample"]["top_hits"]["_source"], false);
    }

    #[test]
    fn precision_is_clamped_to_geohash_range() {
        let mut wild = request();
        wild.precision = 40;
        let body = wild.body();
        assert_eq!(body["aggs"]["bounded"]["aggs"]["cells"]["geohash_grid"]["precision"], 12);
    }

    #[test]
    fn decode_skips_cells_without_centroids() {
        let aggregations = json!({
            "bounded": {
                "doc_count": 12,
                "cells": {
                    "buckets": [
                        {
                            "key": "9tbkh",
                            "doc_count": 7,
                            "centroid": { "location": { "lat": 31.91, "lon": -110.84 }, "count": 7 },
                            "sample": { "hits": { "hits": [
                                { "_id": "a" }, { "_id": "b" }, { "_id": "c" }
                            ] } }
                        },
                        {
                            "key": "9tbkj",
                            "doc_count": 5,
                            "centroid": {},
                            "sample": { "hits": { "hits": [] } }
                        }
                    ]
                }
            }
        });
        let buckets = decode_buckets(&aggregations);
        assert_eq!(buckets.len(), 1);
        let bucket = &buckets[0];
        assert_eq!(bucket.document_count, 7);
        assert_eq!(bucket.sample_ids, vec!["a", "b", "c"]);
        assert!(bucket.sample_ids.len() as u64 <= bucket.document_count);
    }

    #[test]
    fn sample_size_never_exceeds_request_cap() {
        let ids: Vec<Value> = (0..10).map(|i| json!({ "_id": format!("doc-{}", i) })).collect();
        let aggregations = json!({
            "bounded": {
                "cells": {
                    "buckets": [{
                        "key": "9tbkh",
                        "doc_count": 40,
                        "centroid": { "location": { "lat": 31.0, "lon": -110.0 } },
                        "sample": { "hits": { "hits": ids } }
                    }]
                }
            }
        });
        let buckets = decode_buckets(&aggregations);
        assert_eq!(buckets[0].sample_ids.len(), 10);
        assert!(buckets[0].document_count >= buckets[0].sample_ids.len() as u64);
    }
}
