//! Qdrant vector store implementation.
//!
//! An index is a collection. Qdrant only accepts UUID or integer point ids,
//! so each record's point id is the UUIDv5 of its vector id and the vector id
//! itself travels in the payload (`vectorId`), where it is indexed and used
//! as the record id on the way out.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use saga_core::error::{SagaError, SagaResult};
use saga_core::traits::{
    DistanceMetric, IndexInfo, StoreConnector, VectorRecord, VectorSearchResult, VectorStore,
    VectorStoreConfig,
};
use saga_core::types::{fields, Filter, FilterCondition, FilterOperator, FilterTranslator};

use qdrant_client::qdrant::{
    condition::ConditionOneOf, point_id::PointIdOptions, r#match::MatchValue,
    vectors_config::Config, vectors_output::VectorsOptions, Condition, CountPointsBuilder,
    CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance,
    FieldCondition, FieldType, Filter as QdrantFilter, HasIdCondition, Match, PointId,
    PointStruct, Range, RepeatedIntegers, RepeatedStrings, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder, VectorsOutput,
};
use qdrant_client::Qdrant;

const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Payload fields indexed on creation, with their index type.
const PAYLOAD_INDEXES: [(&str, FieldType); 5] = [
    (fields::EPISODE_NO, FieldType::Integer),
    (fields::EPISODE_ID, FieldType::Keyword),
    (fields::SCOPE, FieldType::Keyword),
    (fields::CHARACTER_ID, FieldType::Keyword),
    (fields::VECTOR_ID, FieldType::Keyword),
];

/// Qdrant point id for a vector id.
pub fn point_id(vector_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, vector_id.as_bytes()).to_string()
}

/// Qdrant vector store session.
pub struct QdrantVectorStore {
    client: Qdrant,
    upsert_batch_size: usize,
}

impl QdrantVectorStore {
    /// Create a new Qdrant client for one session.
    pub fn new(config: &VectorStoreConfig) -> SagaResult<Self> {
        let url = config.url.as_deref().unwrap_or(DEFAULT_QDRANT_URL);
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = config.api_key.as_deref() {
            builder = builder.api_key(key);
        }
        let client = builder.build().map_err(|e| SagaError::VectorStore {
            message: format!("Failed to create Qdrant client: {}", e),
            code: saga_core::ErrorCode::VecConnectionFailed,
            source: Some(Box::new(e)),
        })?;

        Ok(Self {
            client,
            upsert_batch_size: config.upsert_batch_size.max(1),
        })
    }

    fn distance_to_qdrant(metric: DistanceMetric) -> Distance {
        match metric {
            DistanceMetric::Cosine => Distance::Cosine,
            DistanceMetric::Euclidean => Distance::Euclid,
            DistanceMetric::DotProduct => Distance::Dot,
        }
    }

    fn qdrant_to_distance(distance: i32) -> DistanceMetric {
        match Distance::try_from(distance) {
            Ok(Distance::Euclid) => DistanceMetric::Euclidean,
            Ok(Distance::Dot) => DistanceMetric::DotProduct,
            _ => DistanceMetric::Cosine,
        }
    }

    fn payload_to_hashmap(payload: HashMap<String, Value>) -> HashMap<String, serde_json::Value> {
        payload
            .into_iter()
            .map(|(k, v)| (k, Self::qdrant_value_to_json(v)))
            .collect()
    }

    fn qdrant_value_to_json(value: Value) -> serde_json::Value {
        use qdrant_client::qdrant::value::Kind;
        match value.kind {
            Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
            Some(Kind::IntegerValue(i)) => serde_json::Value::Number(i.into()),
            Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Some(Kind::StringValue(s)) => serde_json::Value::String(s),
            Some(Kind::ListValue(list)) => serde_json::Value::Array(
                list.values
                    .into_iter()
                    .map(Self::qdrant_value_to_json)
                    .collect(),
            ),
            Some(Kind::StructValue(s)) => serde_json::Value::Object(
                s.fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::qdrant_value_to_json(v)))
                    .collect(),
            ),
            Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
        }
    }

    fn json_to_qdrant_value(value: serde_json::Value) -> Value {
        use qdrant_client::qdrant::value::Kind;
        use qdrant_client::qdrant::{ListValue, Struct};

        let kind = match value {
            serde_json::Value::Null => Kind::NullValue(0),
            serde_json::Value::Bool(b) => Kind::BoolValue(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Kind::IntegerValue(i),
                None => Kind::DoubleValue(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Kind::StringValue(s),
            serde_json::Value::Array(arr) => Kind::ListValue(ListValue {
                values: arr.into_iter().map(Self::json_to_qdrant_value).collect(),
            }),
            serde_json::Value::Object(obj) => Kind::StructValue(Struct {
                fields: obj
                    .into_iter()
                    .map(|(k, v)| (k, Self::json_to_qdrant_value(v)))
                    .collect(),
            }),
        };

        Value { kind: Some(kind) }
    }

    fn to_point(record: VectorRecord) -> PointStruct {
        let mut payload: HashMap<String, Value> = record
            .payload
            .into_iter()
            .map(|(k, v)| (k, Self::json_to_qdrant_value(v)))
            .collect();
        payload.insert(
            fields::VECTOR_ID.to_string(),
            Self::json_to_qdrant_value(serde_json::Value::String(record.id.clone())),
        );
        PointStruct::new(point_id(&record.id), record.vector, payload)
    }

    /// Record id: the payload's vector id, or the raw point id for foreign points.
    fn record_id(point_id: Option<PointId>, payload: &HashMap<String, serde_json::Value>) -> String {
        if let Some(id) = payload.get(fields::VECTOR_ID).and_then(|v| v.as_str()) {
            return id.to_string();
        }
        match point_id.and_then(|p| p.point_id_options) {
            Some(PointIdOptions::Uuid(uuid)) => uuid,
            Some(PointIdOptions::Num(num)) => num.to_string(),
            None => String::new(),
        }
    }

    #[allow(deprecated)]
    fn vector_data(vectors: Option<VectorsOutput>) -> Option<Vec<f32>> {
        match vectors?.vectors_options? {
            VectorsOptions::Vector(v) => Some(v.data),
            _ => None,
        }
    }

    fn translate(filter: Option<&Filter>) -> SagaResult<Option<QdrantFilter>> {
        filter.map(|f| QdrantFilterTranslator.translate(f)).transpose()
    }
}

/// Map a client error, recognising a missing collection.
fn map_error(
    index: &str,
    operation: &str,
    err: qdrant_client::QdrantError,
    make: fn(String) -> SagaError,
) -> SagaError {
    let message = err.to_string();
    if message.contains("Not found") || message.contains("doesn't exist") {
        SagaError::index_not_found(index)
    } else {
        make(format!("Failed to {} in '{}': {}", operation, index, message))
    }
}

fn store_write(message: String) -> SagaError {
    SagaError::store_write(message)
}

fn store_query(message: String) -> SagaError {
    SagaError::store_query(message)
}

fn vector_store(message: String) -> SagaError {
    SagaError::vector_store(message)
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_index(
        &self,
        name: &str,
        dimension: usize,
        distance: DistanceMetric,
    ) -> SagaResult<()> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| map_error(name, "check collection", e, vector_store))?;
        if exists {
            return Ok(());
        }

        let request = CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
            dimension as u64,
            Self::distance_to_qdrant(distance),
        ));
        if let Err(e) = self.client.create_collection(request).await {
            // Another worker may have created it in the meantime.
            if !e.to_string().contains("already exists") {
                return Err(map_error(name, "create collection", e, vector_store));
            }
        }

        for (field, field_type) in PAYLOAD_INDEXES {
            self.client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(name, field, field_type).wait(true),
                )
                .await
                .map_err(|e| map_error(name, "create payload index", e, vector_store))?;
        }

        tracing::info!(collection = name, dimension, "Created Qdrant collection");
        Ok(())
    }

    async fn upsert(&self, index: &str, records: Vec<VectorRecord>) -> SagaResult<()> {
        let total = records.len();
        let points: Vec<PointStruct> = records.into_iter().map(Self::to_point).collect();

        let mut written = 0;
        for chunk in points.chunks(self.upsert_batch_size) {
            let request = UpsertPointsBuilder::new(index, chunk.to_vec()).wait(true);
            if let Err(e) = self.client.upsert_points(request).await {
                let err = map_error(index, "upsert points", e, store_write);
                return Err(match err {
                    SagaError::StoreWrite { message, .. } if written > 0 => {
                        SagaError::partial_store_write(message, written)
                    }
                    other => other,
                });
            }
            written += chunk.len();
        }

        tracing::debug!(collection = index, count = total, "Upserted points");
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
        let mut request = SearchPointsBuilder::new(index, vector.to_vec(), top_k as u64)
            .with_payload(true)
            .with_vectors(include_vector);
        if let Some(f) = Self::translate(filter)? {
            request = request.filter(f);
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| map_error(index, "search points", e, store_query))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let payload = Self::payload_to_hashmap(point.payload);
                VectorSearchResult {
                    id: Self::record_id(point.id, &payload),
                    score: point.score,
                    vector: Self::vector_data(point.vectors),
                    payload,
                }
            })
            .collect())
    }

    async fn list(
        &self,
        index: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> SagaResult<Vec<VectorRecord>> {
        let mut request = ScrollPointsBuilder::new(index)
            .limit(limit.min(u32::MAX as usize) as u32)
            .with_payload(true)
            .with_vectors(true);
        if let Some(f) = Self::translate(filter)? {
            request = request.filter(f);
        }

        let response = self
            .client
            .scroll(request)
            .await
            .map_err(|e| map_error(index, "scroll points", e, store_query))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let payload = Self::payload_to_hashmap(point.payload);
                VectorRecord {
                    id: Self::record_id(point.id, &payload),
                    vector: Self::vector_data(point.vectors).unwrap_or_default(),
                    payload,
                }
            })
            .collect())
    }

    async fn delete_by_filter(&self, index: &str, filter: &Filter) -> SagaResult<Option<u64>> {
        let filter = QdrantFilterTranslator.translate(filter)?;

        let count = self
            .client
            .count(CountPointsBuilder::new(index).filter(filter.clone()).exact(true))
            .await
            .map_err(|e| map_error(index, "count points", e, store_write))?
            .result
            .map(|r| r.count);
        if count == Some(0) {
            return Ok(Some(0));
        }

        self.client
            .delete_points(DeletePointsBuilder::new(index).points(filter).wait(true))
            .await
            .map_err(|e| map_error(index, "delete points", e, store_write))?;
        Ok(count)
    }

    async fn delete_index(&self, name: &str) -> SagaResult<()> {
        self.client
            .delete_collection(name)
            .await
            .map_err(|e| map_error(name, "delete collection", e, vector_store))?;
        Ok(())
    }

    async fn index_info(&self, name: &str) -> SagaResult<IndexInfo> {
        let response = self
            .client
            .collection_info(name)
            .await
            .map_err(|e| map_error(name, "get collection info", e, vector_store))?;

        let info = response
            .result
            .ok_or_else(|| SagaError::index_not_found(name))?;

        let params = info
            .config
            .as_ref()
            .and_then(|c| c.params.as_ref())
            .and_then(|p| p.vectors_config.as_ref())
            .and_then(|vc| vc.config.as_ref());
        let (dimension, distance) = match params {
            Some(Config::Params(p)) => (p.size as usize, Self::qdrant_to_distance(p.distance)),
            _ => (0, DistanceMetric::Cosine),
        };

        Ok(IndexInfo {
            name: name.to_string(),
            vector_count: info.points_count.unwrap_or(0),
            dimension,
            distance,
        })
    }
}

/// Translates [`Filter`] trees into native Qdrant filters.
///
/// A missing payload field satisfies `Ne` and `Nin`, matching
/// [`Filter::matches`], because both become `must_not` clauses.
pub struct QdrantFilterTranslator;

impl QdrantFilterTranslator {
    fn field(key: &str, r#match: Option<Match>, range: Option<Range>) -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: key.to_string(),
                r#match,
                range,
                ..Default::default()
            })),
        }
    }

    fn nested(filter: QdrantFilter) -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::Filter(filter)),
        }
    }

    /// A condition no point satisfies.
    fn never() -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::HasId(HasIdCondition { has_id: Vec::new() })),
        }
    }

    fn match_value(value: &serde_json::Value) -> Option<MatchValue> {
        match value {
            serde_json::Value::String(s) => Some(MatchValue::Keyword(s.clone())),
            serde_json::Value::Bool(b) => Some(MatchValue::Boolean(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(MatchValue::Integer),
            _ => None,
        }
    }

    fn match_any(values: &[serde_json::Value], negate: bool) -> Option<MatchValue> {
        if let Some(strings) = values
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
        {
            let strings = RepeatedStrings { strings };
            return Some(if negate {
                MatchValue::ExceptKeywords(strings)
            } else {
                MatchValue::Keywords(strings)
            });
        }
        let integers = values.iter().map(|v| v.as_i64()).collect::<Option<Vec<_>>>()?;
        let integers = RepeatedIntegers { integers };
        Some(if negate {
            MatchValue::ExceptIntegers(integers)
        } else {
            MatchValue::Integers(integers)
        })
    }

    fn range(op: &FilterOperator, value: &serde_json::Value) -> Option<Range> {
        let bound = value.as_f64()?;
        let mut range = Range::default();
        match op {
            FilterOperator::Gt(_) => range.gt = Some(bound),
            FilterOperator::Gte(_) => range.gte = Some(bound),
            FilterOperator::Lt(_) => range.lt = Some(bound),
            FilterOperator::Lte(_) => range.lte = Some(bound),
            _ => return None,
        }
        Some(range)
    }

    fn unsupported(cond: &FilterCondition) -> SagaError {
        SagaError::validation(format!(
            "Filter on '{}' cannot be expressed in Qdrant: {:?}",
            cond.field, cond.operator
        ))
    }

    fn condition(cond: &FilterCondition) -> SagaResult<QdrantFilter> {
        let key = cond.field.as_str();
        let filter = match &cond.operator {
            FilterOperator::Eq(v) => {
                let m = Self::match_value(v).ok_or_else(|| Self::unsupported(cond))?;
                QdrantFilter::must([Self::field(key, Some(Match { match_value: Some(m) }), None)])
            }
            FilterOperator::Ne(v) => {
                let m = Self::match_value(v).ok_or_else(|| Self::unsupported(cond))?;
                QdrantFilter::must_not([Self::field(
                    key,
                    Some(Match { match_value: Some(m) }),
                    None,
                )])
            }
            op @ (FilterOperator::Gt(v)
            | FilterOperator::Gte(v)
            | FilterOperator::Lt(v)
            | FilterOperator::Lte(v)) => {
                let range = Self::range(op, v).ok_or_else(|| Self::unsupported(cond))?;
                QdrantFilter::must([Self::field(key, None, Some(range))])
            }
            FilterOperator::In(values) if values.is_empty() => QdrantFilter::must([Self::never()]),
            FilterOperator::In(values) => {
                let m = Self::match_any(values, false).ok_or_else(|| Self::unsupported(cond))?;
                QdrantFilter::must([Self::field(key, Some(Match { match_value: Some(m) }), None)])
            }
            FilterOperator::Nin(values) if values.is_empty() => QdrantFilter::default(),
            FilterOperator::Nin(values) => {
                // `must_not(any of)` rather than `except`, so missing fields pass.
                let m = Self::match_any(values, false).ok_or_else(|| Self::unsupported(cond))?;
                QdrantFilter::must_not([Self::field(
                    key,
                    Some(Match { match_value: Some(m) }),
                    None,
                )])
            }
        };
        Ok(filter)
    }
}

impl FilterTranslator for QdrantFilterTranslator {
    type Output = QdrantFilter;
    type Error = SagaError;

    fn translate(&self, filter: &Filter) -> SagaResult<QdrantFilter> {
        match filter {
            Filter::Condition(cond) => Self::condition(cond),
            Filter::And(filters) => Ok(QdrantFilter::must(
                filters
                    .iter()
                    .map(|f| self.translate(f).map(Self::nested))
                    .collect::<SagaResult<Vec<_>>>()?,
            )),
            Filter::Or(filters) if filters.is_empty() => Ok(QdrantFilter::must([Self::never()])),
            Filter::Or(filters) => Ok(QdrantFilter::should(
                filters
                    .iter()
                    .map(|f| self.translate(f).map(Self::nested))
                    .collect::<SagaResult<Vec<_>>>()?,
            )),
            Filter::Not(inner) => Ok(QdrantFilter::must_not([Self::nested(
                self.translate(inner)?,
            )])),
        }
    }
}

/// Opens a Qdrant session per logical operation.
pub struct QdrantConnector {
    config: VectorStoreConfig,
}

impl QdrantConnector {
    pub fn new(config: VectorStoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreConnector for QdrantConnector {
    async fn connect(&self) -> SagaResult<Arc<dyn VectorStore>> {
        Ok(Arc::new(QdrantVectorStore::new(&self.config)?))
    }

    fn provider(&self) -> &str {
        "qdrant"
    }
}
