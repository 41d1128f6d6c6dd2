use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use super::embedding::Embedder;
use super::hit::Hit;
use crate::core::config::settings::{require, RetrievalSettings};
use crate::core::errors::ConciergeError;

/// "Given a query and an optional match count, return hit records."
///
/// Implemented by [`VectorRetriever`] and, through a blanket impl, by every
/// shared (`Arc`) tool runtime, so generation does not care which path
/// served the hits.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn retrieve_hits(
        &self,
        query: &str,
        match_count: Option<u32>,
    ) -> Result<Vec<Hit>, ConciergeError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchRequest {
    pub query_embedding: Vec<f32>,
    pub match_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Map<String, Value>>,
}

/// Remote similarity-search function. Returns raw rows in ranked order.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn match_rows(&self, request: &MatchRequest) -> Result<Vec<Value>, ConciergeError>;
}

/// Supabase PostgREST `rpc/<function>` endpoint.
pub struct SupabaseVectorSearch {
    client: reqwest::Client,
    settings: RetrievalSettings,
}

impl SupabaseVectorSearch {
    pub fn new(settings: RetrievalSettings) -> Result<Self, ConciergeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(ConciergeError::internal)?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl VectorSearch for SupabaseVectorSearch {
    async fn match_rows(&self, request: &MatchRequest) -> Result<Vec<Value>, ConciergeError> {
        let base = require(&self.settings.supabase_url, "SUPABASE_URL")?;
        let key = require(&self.settings.supabase_key, "SUPABASE_KEY")?;
        let url = format!(
            "{}/rest/v1/rpc/{}",
            base.trim_end_matches('/'),
            self.settings.match_function
        );

        let res = self
            .client
            .post(&url)
            .header("apikey", key)
            .bearer_auth(key)
            .json(request)
            .send()
            .await
            .map_err(|e| ConciergeError::Upstream(format!("vector search request failed: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ConciergeError::Upstream(format!(
                "vector search returned {}: {}",
                status, text
            )));
        }

        match res.json::<Value>().await.map_err(ConciergeError::upstream)? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(ConciergeError::Upstream(format!(
                "vector search returned a non-list payload: {}",
                other
            ))),
        }
    }
}

pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn VectorSearch>,
    default_match_count: u32,
    default_filter: Option<Map<String, Value>>,
}

impl VectorRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn VectorSearch>,
        settings: &RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            search,
            default_match_count: settings.default_match_count,
            default_filter: settings.parsed_default_filter(),
        }
    }

    /// Embeds `query`, runs the similarity search and normalises the rows.
    /// Row order is kept as returned.
    pub async fn retrieve(
        &self,
        query: &str,
        match_count: Option<u32>,
        extra_filter: Option<Map<String, Value>>,
    ) -> Result<Vec<Hit>, ConciergeError> {
        let query_embedding = self.embedder.embed(query).await?;
        let request = MatchRequest {
            query_embedding,
            match_count: match_count
                .filter(|count| *count > 0)
                .unwrap_or(self.default_match_count),
            filter: merge_filters(extra_filter, self.default_filter.as_ref()),
        };

        let rows = self.search.match_rows(&request).await?;
        tracing::debug!(rows = rows.len(), match_count = request.match_count, "vector search completed");
        Ok(rows.iter().map(Hit::from_row).collect())
    }
}

#[async_trait]
impl ContextSource for VectorRetriever {
    async fn retrieve_hits(
        &self,
        query: &str,
        match_count: Option<u32>,
    ) -> Result<Vec<Hit>, ConciergeError> {
        self.retrieve(query, match_count, None).await
    }
}

/// Caller filter first, then configured default keys on top.
fn merge_filters(
    extra: Option<Map<String, Value>>,
    defaults: Option<&Map<String, Value>>,
) -> Option<Map<String, Value>> {
    let mut merged = extra.unwrap_or_default();
    if let Some(defaults) = defaults {
        for (key, value) in defaults {
            merged.insert(key.clone(), value.clone());
        }
    }
    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ConciergeError> {
            Ok(vec![0.5, 0.25])
        }
    }

    struct RecordingSearch {
        rows: Vec<Value>,
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl VectorSearch for RecordingSearch {
        async fn match_rows(&self, request: &MatchRequest) -> Result<Vec<Value>, ConciergeError> {
            self.seen
                .lock()
                .unwrap()
                .push(serde_json::to_value(request).unwrap());
            Ok(self.rows.clone())
        }
    }

    fn retriever(rows: Vec<Value>, default_filter: Option<&str>) -> (VectorRetriever, Arc<RecordingSearch>) {
        let search = Arc::new(RecordingSearch {
            rows,
            seen: Mutex::new(Vec::new()),
        });
        let settings = RetrievalSettings {
            default_filter: default_filter.map(str::to_string),
            ..Default::default()
        };
        let retriever = VectorRetriever::new(Arc::new(FixedEmbedder), search.clone(), &settings);
        (retriever, search)
    }

    #[tokio::test]
    async fn keeps_remote_ranking_order() {
        let (retriever, _) = retriever(
            vec![
                json!({ "content": "low", "similarity": 0.1 }),
                json!({ "content": "high", "similarity": 0.9 }),
            ],
            None,
        );
        let hits = retriever.retrieve("q", None, None).await.unwrap();
        let docs: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(docs, ["low", "high"]);
    }

    #[tokio::test]
    async fn zero_rows_is_an_empty_result() {
        let (retriever, _) = retriever(Vec::new(), None);
        assert!(retriever.retrieve("q", Some(3), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_uses_default_count_and_merged_filter() {
        let (retriever, search) = retriever(Vec::new(), Some(r#"{"category": "Orientation"}"#));
        let mut extra = Map::new();
        extra.insert("category".into(), json!("Housing"));
        extra.insert("campus".into(), json!("Tampa"));

        retriever.retrieve("q", None, Some(extra)).await.unwrap();

        let seen = search.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            json!({
                "query_embedding": [0.5, 0.25],
                "match_count": 6,
                "filter": { "category": "Orientation", "campus": "Tampa" }
            })
        );
    }

    #[tokio::test]
    async fn malformed_default_filter_is_ignored() {
        let (retriever, search) = retriever(Vec::new(), Some("{oops"));
        retriever.retrieve("q", Some(2), None).await.unwrap();
        let seen = search.seen.lock().unwrap();
        assert_eq!(seen[0], json!({ "query_embedding": [0.5, 0.25], "match_count": 2 }));
    }

    #[tokio::test]
    async fn supabase_rpc_posts_to_configured_function() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/match_document_chunks"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .and(body_json(json!({ "query_embedding": [1.0], "match_count": 4 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 1, "content": "Parking", "similarity": 0.7 }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let search = SupabaseVectorSearch::new(RetrievalSettings {
            supabase_url: Some(server.uri()),
            supabase_key: Some("service-key".into()),
            ..Default::default()
        })
        .unwrap();
        let rows = search
            .match_rows(&MatchRequest {
                query_embedding: vec![1.0],
                match_count: 4,
                filter: None,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn supabase_error_status_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("function not found"))
            .mount(&server)
            .await;

        let search = SupabaseVectorSearch::new(RetrievalSettings {
            supabase_url: Some(server.uri()),
            supabase_key: Some("k".into()),
            ..Default::default()
        })
        .unwrap();
        let err = search
            .match_rows(&MatchRequest {
                query_embedding: vec![1.0],
                match_count: 1,
                filter: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConciergeError::Upstream(ref m) if m.contains("404")));
    }
}
