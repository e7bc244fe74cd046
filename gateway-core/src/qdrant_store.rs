//! `qdrant-client`-backed [`VectorStore`]. Assumes the collection already
//! exists with the right vector size and distance metric (cosine) --
//! collection bootstrap/schema management is the deployment's job, not
//! this crate's.

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, Filter, PointStruct, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
};
use qdrant_client::{Payload, Qdrant};

use crate::cache::{CacheError, CachedEntry, VectorMatch, VectorStore};
use crate::models::EmbeddingVector;

const TAG_FIELD: &str = "model_tag";
const ENTRY_FIELD: &str = "entry_json";

pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
}

impl QdrantVectorStore {
    pub fn new(url: &str, collection: impl Into<String>) -> Result<Self, CacheError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|err| CacheError::Store(err.to_string()))?;
        Ok(Self {
            client,
            collection: collection.into(),
        })
    }

    fn payload_for(tag: &str, entry: &CachedEntry) -> Result<Payload, CacheError> {
        let entry_json = serde_json::to_value(entry).map_err(|err| CacheError::Store(err.to_string()))?;
        let payload_json = serde_json::json!({ TAG_FIELD: tag, ENTRY_FIELD: entry_json });
        Payload::try_from(payload_json).map_err(|err| CacheError::Store(err.to_string()))
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(
        &self,
        tag: &str,
        vector: EmbeddingVector,
        entry: CachedEntry,
        _ttl: std::time::Duration,
    ) -> Result<(), CacheError> {
        let payload = Self::payload_for(tag, &entry)?;
        let point_id = uuid::Uuid::new_v4().to_string();
        let point = PointStruct::new(point_id, vector.0, payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), vec![point]))
            .await
            .map_err(|err| CacheError::Store(err.to_string()))?;
        Ok(())
    }

    async fn search_by_tag(
        &self,
        tag: &str,
        vector: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<VectorMatch>, CacheError> {
        let filter = Filter::must([Condition::matches(TAG_FIELD, tag.to_string())]);

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.collection.clone(), vector.0.clone(), k as u64)
                    .filter(filter)
                    .with_payload(true),
            )
            .await
            .map_err(|err| CacheError::Store(err.to_string()))?;

        response
            .result
            .into_iter()
            .map(|point| scored_point_to_match(point))
            .collect()
    }
}

fn scored_point_to_match(point: ScoredPoint) -> Result<VectorMatch, CacheError> {
    let entry_value = point
        .payload
        .get(ENTRY_FIELD)
        .cloned()
        .ok_or_else(|| CacheError::Store("cached entry missing from payload".to_string()))?;
    let entry: CachedEntry = qdrant_value_to_entry(entry_value)?;
    // Qdrant's cosine similarity is in [-1, 1] where 1 is identical; the
    // cache's threshold is expressed as a distance, so invert it.
    let cosine_distance = 1.0 - point.score;
    Ok(VectorMatch { entry, cosine_distance })
}

fn qdrant_value_to_entry(value: QdrantValue) -> Result<CachedEntry, CacheError> {
    let json: serde_json::Value = value.into();
    serde_json::from_value(json).map_err(|err| CacheError::Store(err.to_string()))
}
