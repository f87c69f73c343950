//! Milvus collection accessed through its RESTful v2 API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Neighbor, SimilarityIndex};
use crate::error::IndexError;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Longest metadata string the collection stores.
pub const META_MAX_LENGTH: usize = 512;

/// A Milvus collection with schema `{id: Int64 auto, embedding:
/// FloatVector(dim), meta: VarChar}` and an L2 index on `embedding`.
pub struct MilvusIndex {
    http_client: Client,
    endpoint: String,
    token: Option<String>,
    collection: String,
    dimension: usize,
}

/// Every v2 response is wrapped in `{code, message, data}`; `code` 0 means
/// success.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

impl MilvusIndex {
    /// Connect and create the collection if it does not exist yet.
    pub async fn connect(
        endpoint: &str,
        token: Option<String>,
        collection: &str,
        dimension: usize,
    ) -> Result<Self, IndexError> {
        let index = Self {
            http_client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            collection: collection.to_string(),
            dimension,
        };
        index.ensure_collection().await?;
        Ok(index)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn call(&self, path: &str, body: Value) -> Result<Value, IndexError> {
        let url = format!("{}/v2/vectordb/{}", self.endpoint, path);
        let mut request = self.http_client.post(&url).json(&body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IndexError::Remote(format!("{path}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IndexError::Remote(format!("{path}: HTTP {status}: {text}")));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| IndexError::Remote(format!("{path}: invalid response: {e}")))?;
        if envelope.code != 0 {
            return Err(IndexError::Remote(format!(
                "{path}: code {}: {}",
                envelope.code,
                envelope.message.unwrap_or_default()
            )));
        }
        Ok(envelope.data)
    }

    async fn ensure_collection(&self) -> Result<(), IndexError> {
        let data = self
            .call("collections/has", json!({ "collectionName": self.collection }))
            .await?;
        if data.get("has").and_then(Value::as_bool).unwrap_or(false) {
            tracing::debug!(collection = %self.collection, "Milvus collection exists");
            return Ok(());
        }

        tracing::info!(
            collection = %self.collection,
            dim = self.dimension,
            "Creating Milvus collection"
        );
        self.call("collections/create", self.create_request()).await?;
        Ok(())
    }

    fn create_request(&self) -> Value {
        json!({
            "collectionName": self.collection,
            "schema": {
                "autoId": true,
                "enableDynamicField": false,
                "fields": [
                    { "fieldName": "id", "dataType": "Int64", "isPrimary": true },
                    {
                        "fieldName": "embedding",
                        "dataType": "FloatVector",
                        "elementTypeParams": { "dim": self.dimension.to_string() }
                    },
                    {
                        "fieldName": "meta",
                        "dataType": "VarChar",
                        "elementTypeParams": { "max_length": META_MAX_LENGTH.to_string() }
                    }
                ]
            },
            "indexParams": [
                { "fieldName": "embedding", "indexName": "embedding", "metricType": "L2" }
            ]
        })
    }
}

/// Quote `meta` as a string literal inside a Milvus boolean expression.
fn filter_literal(meta: &str) -> String {
    let escaped = meta.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Truncate to the collection's VarChar limit on a char boundary.
fn clip_meta(meta: &str) -> &str {
    if meta.len() <= META_MAX_LENGTH {
        return meta;
    }
    let mut end = META_MAX_LENGTH;
    while !meta.is_char_boundary(end) {
        end -= 1;
    }
    &meta[..end]
}

#[async_trait]
impl SimilarityIndex for MilvusIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn stored_meta<'a>(&self, meta: &'a str) -> &'a str {
        clip_meta(meta)
    }

    async fn insert(&self, vectors: &[Vec<f32>], metas: &[String]) -> Result<(), IndexError> {
        if vectors.len() != metas.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                metas: metas.len(),
            });
        }
        if vectors.is_empty() {
            return Ok(());
        }
        for vector in vectors {
            if vector.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        let rows: Vec<Value> = vectors
            .iter()
            .zip(metas)
            .map(|(vector, meta)| json!({ "embedding": vector, "meta": clip_meta(meta) }))
            .collect();
        self.call(
            "entities/insert",
            json!({ "collectionName": self.collection, "data": rows }),
        )
        .await?;
        self.call(
            "collections/flush",
            json!({ "collectionName": self.collection }),
        )
        .await?;
        tracing::debug!(rows = vectors.len(), collection = %self.collection, "Inserted into Milvus");
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let data = self
            .call(
                "entities/search",
                json!({
                    "collectionName": self.collection,
                    "data": [vector],
                    "annsField": "embedding",
                    "limit": k,
                    "outputFields": ["meta"]
                }),
            )
            .await?;

        let hits: Vec<SearchHit> = serde_json::from_value(data)?;
        let mut neighbors: Vec<Neighbor> = hits
            .into_iter()
            .map(|hit| Neighbor {
                meta: hit.meta,
                distance: hit.distance,
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(neighbors)
    }

    async fn vector_for_meta(&self, meta: &str) -> Result<Option<Vec<f32>>, IndexError> {
        let data = self
            .call(
                "entities/query",
                json!({
                    "collectionName": self.collection,
                    "filter": format!("meta == {}", filter_literal(clip_meta(meta))),
                    "outputFields": ["embedding"],
                    "limit": 1
                }),
            )
            .await?;

        let rows: Vec<QueryRow> = serde_json::from_value(data)?;
        Ok(rows.into_iter().next().map(|row| row.embedding))
    }

    async fn len(&self) -> Result<usize, IndexError> {
        let data = self
            .call(
                "collections/get_stats",
                json!({ "collectionName": self.collection }),
            )
            .await?;
        data.get("rowCount")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| IndexError::Remote("get_stats: missing rowCount".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    distance: f64,
    #[serde(default)]
    meta: String,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_literal_escapes_quotes() {
        assert_eq!(filter_literal("plain"), "\"plain\"");
        assert_eq!(filter_literal(r#"say "hi" \o/"#), r#""say \"hi\" \\o/""#);
    }

    #[test]
    fn test_clip_meta_respects_char_boundaries() {
        let short = "abc";
        assert_eq!(clip_meta(short), "abc");

        let long = "é".repeat(META_MAX_LENGTH);
        let clipped = clip_meta(&long);
        assert!(clipped.len() <= META_MAX_LENGTH);
        assert!(clipped.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_envelope_error_code() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"code": 1100, "message": "collection not found"}"#).unwrap();
        assert_eq!(envelope.code, 1100);
        assert!(envelope.data.is_null());
    }

    #[test]
    fn test_search_hits_parse() {
        let data = serde_json::json!([
            {"id": 7, "distance": 0.25, "meta": "b"},
            {"id": 3, "distance": 0.0, "meta": "a"}
        ]);
        let hits: Vec<SearchHit> = serde_json::from_value(data).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].meta, "a");
    }

    #[tokio::test]
    #[ignore = "requires a running Milvus instance"]
    async fn test_live_round_trip() {
        let index = MilvusIndex::connect("http://localhost:19530", None, "datatagger_test", 2)
            .await
            .unwrap();
        index
            .insert(&[vec![0.0, 1.0]], &["live".to_string()])
            .await
            .unwrap();
        assert!(index.vector_for_meta("live").await.unwrap().is_some());
    }
}
