//! Query execution: parse -> validate -> dispatch -> fuse -> filter ->
//! truncate -> respond.

use std::sync::Arc;

use brain_core::{
  BackendKind, DEFAULT_ALPHA, DEFAULT_GRAPH_DEPTH, DEFAULT_RRF_K, DEFAULT_TOP_K, Error, MAX_GRAPH_DEPTH, MAX_TOP_K,
  Result, SearchResult, SourceType,
};
use embedding::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use storage::{MetadataFilter, StorageBackend};
use tracing::{debug, warn};

use crate::{fusion, graph};

/// Extra candidates fetched from each retriever before fusion, so documents
/// ranked by only one retriever still have a chance after merging.
const FUSION_OVERSAMPLE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
  Keyword,
  Vector,
  Hybrid,
  Graph,
  Multi,
}

impl SearchMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      SearchMode::Keyword => "keyword",
      SearchMode::Vector => "vector",
      SearchMode::Hybrid => "hybrid",
      SearchMode::Graph => "graph",
      SearchMode::Multi => "multi",
    }
  }
}

impl std::str::FromStr for SearchMode {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "keyword" => Ok(SearchMode::Keyword),
      "vector" => Ok(SearchMode::Vector),
      "hybrid" => Ok(SearchMode::Hybrid),
      "graph" => Ok(SearchMode::Graph),
      "multi" => Ok(SearchMode::Multi),
      _ => Err(format!("Unknown search mode: {}", s)),
    }
  }
}

/// Result filters applied after fusion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
  pub source_type: Option<SourceType>,
  pub language: Option<String>,
  /// Glob matched against the chunk's source path
  pub path_glob: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
  pub query: String,
  pub mode: SearchMode,
  pub top_k: Option<usize>,
  pub min_score: Option<f32>,
  /// Hybrid weighting between vector and keyword
  pub alpha: Option<f32>,
  pub graph_depth: Option<usize>,
  pub filters: SearchFilters,
}

impl Default for SearchRequest {
  fn default() -> Self {
    Self {
      query: String::new(),
      mode: SearchMode::Hybrid,
      top_k: None,
      min_score: None,
      alpha: None,
      graph_depth: None,
      filters: SearchFilters::default(),
    }
  }
}

impl SearchRequest {
  pub fn new(query: impl Into<String>, mode: SearchMode) -> Self {
    Self {
      query: query.into(),
      mode,
      ..Default::default()
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
  pub results: Vec<SearchResult>,
  /// Mode that actually executed (multi may degrade to hybrid)
  pub mode: SearchMode,
  pub degraded: bool,
}

/// Validated, clamped form of a request
struct Plan {
  top_k: usize,
  min_score: f32,
  alpha: f32,
  depth: usize,
  backend_filter: Option<MetadataFilter>,
  path_glob: Option<globset::GlobMatcher>,
}

/// Default wall-clock budget for one query
const DEFAULT_QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub struct SearchEngine {
  backend: Arc<dyn StorageBackend>,
  embedding: Arc<dyn EmbeddingProvider>,
  query_timeout: std::time::Duration,
  reranker: Option<crate::rerank::RuleBasedReranker>,
}

impl SearchEngine {
  pub fn new(backend: Arc<dyn StorageBackend>, embedding: Arc<dyn EmbeddingProvider>) -> Self {
    Self {
      backend,
      embedding,
      query_timeout: DEFAULT_QUERY_TIMEOUT,
      reranker: None,
    }
  }

  pub fn with_query_timeout(mut self, timeout: std::time::Duration) -> Self {
    self.query_timeout = timeout;
    self
  }

  pub fn with_reranker(mut self, reranker: Option<crate::rerank::RuleBasedReranker>) -> Self {
    self.reranker = reranker;
    self
  }

  pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
    tokio::time::timeout(self.query_timeout, self.search_inner(request))
      .await
      .map_err(|_| Error::JobTimeout {
        seconds: self.query_timeout.as_secs(),
      })?
  }

  async fn search_inner(&self, request: &SearchRequest) -> Result<SearchResponse> {
    let plan = self.validate(request)?;

    let (mut results, mode, degraded) = match request.mode {
      SearchMode::Keyword => (self.keyword(&request.query, plan.top_k, &plan).await?, SearchMode::Keyword, false),
      SearchMode::Vector => (self.vector(&request.query, plan.top_k, &plan).await?, SearchMode::Vector, false),
      SearchMode::Hybrid => (self.hybrid(&request.query, &plan).await?, SearchMode::Hybrid, false),
      SearchMode::Graph => {
        if !self.backend.supports_graph() {
          return Err(Error::BackendUnsupported {
            operation: "graph search",
            backend: self.backend.kind(),
            required: BackendKind::Embedded,
          });
        }
        (graph::graph_search(self.backend.as_ref(), &request.query, plan.depth).await?, SearchMode::Graph, false)
      }
      SearchMode::Multi => {
        if self.backend.supports_graph() {
          (self.multi(&request.query, &plan).await?, SearchMode::Multi, false)
        } else {
          warn!(
            backend = %self.backend.kind(),
            "Graph unavailable on this backend; degrading multi to hybrid"
          );
          (self.hybrid(&request.query, &plan).await?, SearchMode::Hybrid, true)
        }
      }
    };

    // filter -> truncate -> respond
    if let Some(glob) = &plan.path_glob {
      results.retain(|r| glob.is_match(&r.metadata.source));
    }
    if let Some(filter) = &plan.backend_filter {
      // Backends already filtered their own result sets; this re-check
      // covers graph hits, which are hydrated by id.
      results.retain(|r| filter.matches(&r.metadata));
    }

    if let Some(reranker) = &self.reranker {
      results.truncate(reranker.initial_top_k.max(plan.top_k));
      reranker.rerank(&request.query, &mut results);
    }
    results.truncate(plan.top_k);

    Ok(SearchResponse { results, mode, degraded })
  }

  fn validate(&self, request: &SearchRequest) -> Result<Plan> {
    if request.query.trim().is_empty() {
      return Err(Error::Validation("query must not be empty".into()));
    }

    let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K);
    let min_score = request.min_score.unwrap_or(0.0).clamp(0.0, 1.0);
    let alpha = request.alpha.unwrap_or(DEFAULT_ALPHA);
    if !(0.0..=1.0).contains(&alpha) {
      return Err(Error::Validation(format!("alpha must be in [0, 1], got {}", alpha)));
    }
    let depth = request.graph_depth.unwrap_or(DEFAULT_GRAPH_DEPTH).clamp(1, MAX_GRAPH_DEPTH);

    let backend_filter = {
      let filter = MetadataFilter {
        source: None,
        source_type: request.filters.source_type,
        language: request.filters.language.clone(),
      };
      if filter.is_empty() { None } else { Some(filter) }
    };

    let path_glob = request
      .filters
      .path_glob
      .as_deref()
      .map(|pattern| {
        globset::Glob::new(pattern)
          .map(|g| g.compile_matcher())
          .map_err(|e| Error::Validation(format!("bad path glob {:?}: {}", pattern, e)))
      })
      .transpose()?;

    Ok(Plan {
      top_k,
      min_score,
      alpha,
      depth,
      backend_filter,
      path_glob,
    })
  }

  async fn vector(&self, query: &str, fetch: usize, plan: &Plan) -> Result<Vec<SearchResult>> {
    let embedding = self.embedding.embed(query).await.map_err(Error::from)?;
    self
      .backend
      .vector_search(&embedding, fetch, plan.min_score, plan.backend_filter.as_ref())
      .await
  }

  async fn keyword(&self, query: &str, fetch: usize, plan: &Plan) -> Result<Vec<SearchResult>> {
    self.backend.keyword_search(query, fetch, plan.backend_filter.as_ref()).await
  }

  /// Vector and keyword in parallel; one retriever may fail as long as the
  /// other answers.
  async fn hybrid(&self, query: &str, plan: &Plan) -> Result<Vec<SearchResult>> {
    let fetch = plan.top_k * FUSION_OVERSAMPLE;
    let (vector, keyword) = tokio::join!(self.vector(query, fetch, plan), self.keyword(query, fetch, plan));

    match (vector, keyword) {
      (Ok(vector), Ok(keyword)) => Ok(fusion::relative_score_fusion(vector, keyword, plan.alpha)),
      (Ok(vector), Err(e)) => {
        warn!(error = %e, "Keyword retriever failed; continuing with vector only");
        Ok(fusion::relative_score_fusion(vector, Vec::new(), plan.alpha))
      }
      (Err(e), Ok(keyword)) => {
        warn!(error = %e, "Vector retriever failed; continuing with keyword only");
        Ok(fusion::relative_score_fusion(Vec::new(), keyword, plan.alpha))
      }
      (Err(e), Err(_)) => Err(e),
    }
  }

  /// RRF over vector, keyword and graph rankings
  async fn multi(&self, query: &str, plan: &Plan) -> Result<Vec<SearchResult>> {
    let fetch = plan.top_k * FUSION_OVERSAMPLE;
    let (vector, keyword, graph) = tokio::join!(
      self.vector(query, fetch, plan),
      self.keyword(query, fetch, plan),
      graph::graph_search(self.backend.as_ref(), query, plan.depth),
    );

    let mut rankings = Vec::new();
    let mut first_error = None;
    for (name, outcome) in [("vector", vector), ("keyword", keyword), ("graph", graph)] {
      match outcome {
        Ok(ranking) => rankings.push(ranking),
        Err(e) => {
          warn!(retriever = name, error = %e, "Retriever failed during multi search");
          if first_error.is_none() {
            first_error = Some(e);
          }
        }
      }
    }

    if rankings.is_empty() {
      return Err(first_error.unwrap_or_else(|| Error::Validation("no retrievers available".into())));
    }

    debug!(rankings = rankings.len(), "Fusing multi-search rankings");
    Ok(fusion::reciprocal_rank_fusion(rankings, DEFAULT_RRF_K))
  }
}
