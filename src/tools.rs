//! Tool trait, tool context, and the built-in intelligence tools.
//!
//! Every tool follows the same shape: retrieve a result set through the
//! configured [`Retriever`], hand it to one engine component, and serialize
//! the outcome. Tools are registered in a [`ToolRegistry`] and dispatched by
//! name from both the HTTP API (`POST /tools/{name}`) and the MCP endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ToolRegistry                 │
//! │  analyze_relationships  find_similar_docs    │
//! │  detect_conflicts       find_complementary   │
//! │  cluster_documents      expand_cluster/doc   │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!     ToolContext (config, retriever, expansion cache, validator)
//!                        ▼
//!     similarity · cluster · citation · conflict
//! ```
//!
//! Parameters are checked against each tool's JSON schema by
//! [`validate_params`] before [`Tool::execute`] runs.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::cache::ExpansionCache;
use crate::citation::{
    build_citation_network, find_parent_document, find_sibling_document, get_most_authoritative_documents,
    get_most_connected_documents,
};
use crate::cluster::{ClusterAnalyzer, ClusteringStrategy};
use crate::config::Config;
use crate::conflict::{ConflictBudget, ConflictDetector, ConflictPair, MAX_VALIDATION_TIMEOUT_S};
use crate::error::IntelError;
use crate::models::{Document, DocumentRef};
use crate::nlp;
use crate::retrieval::{RetrievalQuery, Retriever};
use crate::similarity::{semantic_text, RelationshipType, SimilarityCalculator, SimilarityMetric, SimilarityWeights};
use crate::validation::ConflictValidator;

/// Number of ranked nodes reported per citation ranking.
const RANKING_LIMIT: usize = 5;

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A tool that agents can discover and call.
///
/// Tools are listed via `GET /tools/list` and invoked via
/// `POST /tools/{name}` or the MCP `call_tool` method.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name, a lowercase identifier with underscores.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// Whether this tool ships with the crate. Defaults to `false`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema (`type: "object"`) describing the parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters already passed through [`validate_params`].
    ///
    /// The returned value is wrapped in `{ "result": ... }` by the HTTP layer.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Serializable tool info for `GET /tools/list` and `ctxi tools list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            builtin: tool.is_builtin(),
            parameters: tool.parameters_schema(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Everything a tool needs to run: configuration, the retrieval
/// collaborator, the expansion cache shared across calls, and the optional
/// conflict validator.
///
/// Cloning is cheap; all fields are reference counted.
#[derive(Clone)]
pub struct ToolContext {
    config: Arc<Config>,
    retriever: Arc<dyn Retriever>,
    cache: Arc<ExpansionCache>,
    validator: Option<Arc<dyn ConflictValidator>>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            config,
            retriever,
            cache: Arc::new(ExpansionCache::default()),
            validator: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ExpansionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_validator(mut self, validator: Option<Arc<dyn ConflictValidator>>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ExpansionCache {
        &self.cache
    }

    /// Retrieve documents and remember them for `expand_document`.
    pub async fn search(&self, query: &RetrievalQuery) -> Result<Vec<Document>> {
        let documents = self.retriever.search(query).await?;
        self.cache.remember_documents(&documents).await;
        tracing::debug!(query = %query.query, results = documents.len(), "retrieved documents");
        Ok(documents)
    }

    /// A document from an earlier result, falling back to the retriever.
    pub async fn document(&self, id: &str) -> Result<Option<Document>> {
        if let Some(doc) = self.cache.document(id).await {
            return Ok(Some(doc));
        }
        self.retriever.get(id).await
    }

    /// Similarity calculator for one invocation over `documents`.
    ///
    /// The NLP backend is prepared for exactly these texts.
    pub async fn calculator(&self, documents: &[Document]) -> SimilarityCalculator {
        let texts: Vec<&str> = documents.iter().map(semantic_text).collect();
        let backend = nlp::backend_for(&self.config, &texts).await;
        SimilarityCalculator::new(backend).with_weights(SimilarityWeights::from_config(&self.config.similarity))
    }

    pub fn conflict_detector(&self) -> ConflictDetector {
        ConflictDetector::new()
            .with_min_text_length(self.config.conflicts.min_text_length)
            .with_validator(self.validator.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter handling
// ═══════════════════════════════════════════════════════════════════════

/// Validate parameters against a tool's JSON schema.
///
/// Checks required keys, primitive types, and enum membership, then
/// injects schema defaults for absent keys. Non-object params are treated
/// as an empty object.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = params.as_object().cloned().unwrap_or_default();

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();

    for req_field in &required {
        if !params_obj.contains_key(req_field) {
            bail!("missing required parameter: {}", req_field);
        }
    }

    let mut result = params_obj.clone();
    for (prop_name, prop_schema) in &properties {
        let Some(value) = params_obj.get(prop_name) else {
            if let Some(default) = prop_schema.get("default") {
                result.insert(prop_name.clone(), default.clone());
            }
            continue;
        };

        if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
            let type_ok = match expected_type {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !type_ok {
                bail!(
                    "invalid parameter '{}': must be of type '{}', got {}",
                    prop_name,
                    expected_type,
                    json_type_name(value)
                );
            }
        }

        if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
            if !enum_values.contains(value) {
                let allowed: Vec<String> = enum_values.iter().map(|v| v.to_string()).collect();
                bail!(
                    "invalid parameter '{}': must be one of [{}], got {}",
                    prop_name,
                    allowed.join(", "),
                    value
                );
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn required_text(params: &Value, key: &str) -> Result<String> {
    let value = params[key].as_str().unwrap_or("").trim();
    if value.is_empty() {
        bail!("{} must not be empty", key);
    }
    Ok(value.to_string())
}

/// A non-negative integer parameter, or `fallback` when absent.
fn count_param(params: &Value, key: &str, fallback: usize) -> Result<usize> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(fallback),
        Some(v) => match v.as_i64() {
            Some(n) if n < 0 => bail!("invalid parameter '{}': must not be negative, got {}", key, n),
            Some(n) => Ok(n as usize),
            None => Ok(v.as_u64().map(|n| n as usize).unwrap_or(fallback)),
        },
    }
}

fn string_list(params: &Value, key: &str) -> Vec<String> {
    params[key]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn retrieval_query(params: &Value, query_key: &str, default_limit: usize) -> Result<RetrievalQuery> {
    Ok(RetrievalQuery {
        query: required_text(params, query_key)?,
        limit: count_param(params, "limit", default_limit)?,
        source_types: string_list(params, "source_types"),
        project_ids: string_list(params, "project_ids"),
    })
}

/// The configured conflict budget with per-call overrides applied.
fn budget_from_params(params: &Value, config: &Config) -> Result<ConflictBudget> {
    let mut budget = config.conflicts.budget();
    if let Some(use_llm) = params["use_llm"].as_bool() {
        budget.use_llm = use_llm;
    }
    budget.max_llm_pairs = count_param(params, "max_llm_pairs", budget.max_llm_pairs)?;
    budget.max_pairs_total = count_param(params, "max_pairs_total", budget.max_pairs_total)?;
    budget.text_window_chars = count_param(params, "text_window_chars", budget.text_window_chars)?;
    if let Some(timeout) = params["overall_timeout_s"].as_f64() {
        if !timeout.is_finite() || timeout < 0.0 {
            bail!("invalid parameter 'overall_timeout_s': must not be negative, got {}", timeout);
        }
        if timeout > MAX_VALIDATION_TIMEOUT_S {
            return Err(IntelError::InvalidArgument(format!(
                "overall_timeout_s must be at most {}, got {}",
                MAX_VALIDATION_TIMEOUT_S, timeout
            ))
            .into());
        }
        budget.overall_timeout_s = timeout;
    }
    Ok(budget)
}

fn filter_properties() -> Value {
    json!({
        "source_types": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Only consider documents from these source types"
        },
        "project_ids": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Only consider documents from these projects"
        }
    })
}

fn budget_properties() -> Value {
    json!({
        "use_llm": { "type": "boolean", "description": "Validate top candidates with the configured language model" },
        "max_llm_pairs": { "type": "integer", "description": "Most candidates sent for validation" },
        "overall_timeout_s": { "type": "number", "description": "Wall-clock limit for the validation phase" },
        "max_pairs_total": { "type": "integer", "description": "Most lexical candidates kept" },
        "text_window_chars": { "type": "integer", "description": "Characters of each document sent for validation" }
    })
}

/// Build an object schema, merging shared property groups into `properties`.
fn object_schema(mut properties: Value, extra: &[Value], required: &[&str]) -> Value {
    if let Some(map) = properties.as_object_mut() {
        for group in extra {
            if let Some(group) = group.as_object() {
                map.extend(group.clone());
            }
        }
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

fn conflict_json(pair: &ConflictPair) -> Value {
    json!({
        "document_a": pair.document_a,
        "document_b": pair.document_b,
        "conflict_type": pair.category.as_str(),
        "confidence": pair.confidence,
        "lexical_confidence": pair.lexical_confidence,
        "indicators": pair.indicators,
        "statements": pair
            .statements
            .iter()
            .map(|(a, b)| json!({ "document_a": a, "document_b": b }))
            .collect::<Vec<_>>(),
        "validated": pair.validation.is_some(),
        "validation": pair.validation,
        "resolution_suggestion": pair.resolution_suggestion,
    })
}

fn short_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in tools
// ═══════════════════════════════════════════════════════════════════════

/// Pairwise relationships, citation structure, and conflicts for one result set.
pub struct AnalyzeRelationshipsTool;

#[async_trait]
impl Tool for AnalyzeRelationshipsTool {
    fn name(&self) -> &str {
        "analyze_relationships"
    }

    fn description(&self) -> &str {
        "Analyze similarity, reference, and conflict relationships between search results"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            json!({
                "query": { "type": "string", "description": "Search query selecting the documents" },
                "limit": { "type": "integer", "description": "Max documents analyzed", "default": 10 }
            }),
            &[filter_properties(), budget_properties()],
            &["query"],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = retrieval_query(&params, "query", 10)?;
        let budget = budget_from_params(&params, ctx.config())?;
        let documents = ctx.search(&query).await?;

        let calculator = ctx.calculator(&documents).await;
        let threshold = ctx.config().similarity.relationship_threshold;
        let mut relationships: Vec<Value> = Vec::new();
        let mut type_counts: BTreeMap<String, usize> = BTreeMap::new();

        let mut pairs = Vec::new();
        for i in 0..documents.len() {
            for j in (i + 1)..documents.len() {
                let result = calculator.calculate_similarity(&documents[i], &documents[j]);
                if result.score >= threshold {
                    pairs.push(result);
                }
            }
        }
        pairs.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        for result in &pairs {
            *type_counts.entry(result.relationship_type.to_string()).or_insert(0) += 1;
            relationships.push(json!({
                "document_a": result.document_a,
                "document_b": result.document_b,
                "relationship_type": result.relationship_type,
                "score": result.score,
                "description": result.describe(),
                "metric_scores": result.metric_scores,
                "shared_entities": result.shared_entities,
            }));
        }

        let analysis = ctx.conflict_detector().detect_conflicts(&documents, &budget).await;
        for pair in &analysis.conflicting_pairs {
            *type_counts
                .entry(RelationshipType::Conflicting.to_string())
                .or_insert(0) += 1;
            relationships.push(json!({
                "document_a": pair.document_a,
                "document_b": pair.document_b,
                "relationship_type": RelationshipType::Conflicting,
                "score": pair.confidence,
                "description": format!("Potential {} conflict: {}", pair.category, pair.indicators.join("; ")),
            }));
        }

        let network = build_citation_network(&documents);
        let stats = network.stats();

        tracing::info!(
            documents = documents.len(),
            relationships = relationships.len(),
            conflicts = analysis.conflicting_pairs.len(),
            "analyzed relationships"
        );

        Ok(json!({
            "relationships": relationships,
            "total_analyzed": documents.len(),
            "citation_network": {
                "stats": stats,
                "most_authoritative": get_most_authoritative_documents(&network, RANKING_LIMIT),
                "most_connected": get_most_connected_documents(&network, RANKING_LIMIT),
            },
            "summary": {
                "relationship_counts": type_counts,
                "similar_pairs": pairs.len(),
                "conflicts": analysis.conflicting_pairs.len(),
                "citation_edges": stats.edge_count,
                "validation": analysis.stats,
            },
        }))
    }
}

/// Documents most similar to the top hit of a target query.
pub struct FindSimilarDocumentsTool;

#[async_trait]
impl Tool for FindSimilarDocumentsTool {
    fn name(&self) -> &str {
        "find_similar_documents"
    }

    fn description(&self) -> &str {
        "Find documents similar to a target document, with a per-metric breakdown"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        let metrics: Vec<&str> = SimilarityMetric::ALL.iter().map(|m| m.as_str()).collect();
        object_schema(
            json!({
                "target_query": { "type": "string", "description": "Query whose top result is the target document" },
                "comparison_query": { "type": "string", "description": "Query selecting the documents to compare against" },
                "similarity_metrics": {
                    "type": "array",
                    "items": { "type": "string", "enum": metrics },
                    "description": "Metrics to combine; all metrics when omitted"
                },
                "max_similar": { "type": "integer", "description": "Max similar documents returned", "default": 5 },
                "limit": { "type": "integer", "description": "Max comparison documents retrieved", "default": 20 }
            }),
            &[filter_properties()],
            &["target_query", "comparison_query"],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let target_query = RetrievalQuery::new(required_text(&params, "target_query")?, 1);
        let comparison_query = retrieval_query(&params, "comparison_query", 20)?;
        let max_similar = count_param(&params, "max_similar", 5)?;

        let metrics: Vec<SimilarityMetric> = match params["similarity_metrics"].as_array() {
            Some(names) if !names.is_empty() => names
                .iter()
                .map(|n| n.as_str().unwrap_or_default().parse::<SimilarityMetric>())
                .collect::<Result<Vec<_>, IntelError>>()?,
            _ => SimilarityMetric::ALL.to_vec(),
        };

        let Some(target) = ctx.search(&target_query).await?.into_iter().next() else {
            return Ok(json!({ "target": null, "similar_documents": [] }));
        };
        let candidates: Vec<Document> = ctx
            .search(&comparison_query)
            .await?
            .into_iter()
            .filter(|d| d.id != target.id)
            .collect();

        let mut all = candidates.clone();
        all.push(target.clone());
        let calculator = ctx.calculator(&all).await;

        let mut results: Vec<_> = candidates
            .iter()
            .map(|c| calculator.calculate_similarity_with(&target, c, &metrics))
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document_b.id.cmp(&b.document_b.id))
        });
        results.truncate(max_similar);

        let similar: Vec<Value> = results
            .iter()
            .map(|r| {
                json!({
                    "id": r.document_b.id,
                    "title": r.document_b.title,
                    "source_type": r.document_b.source_type,
                    "score": r.score,
                    "metric_scores": r.metric_scores,
                    "relationship_type": r.relationship_type,
                    "shared_entities": r.shared_entities,
                    "reason": r.describe(),
                })
            })
            .collect();

        Ok(json!({
            "target": DocumentRef::from(&target),
            "metrics": metrics.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
            "similar_documents": similar,
        }))
    }
}

/// Contradicting document pairs with optional model validation.
pub struct DetectConflictsTool;

#[async_trait]
impl Tool for DetectConflictsTool {
    fn name(&self) -> &str {
        "detect_conflicts"
    }

    fn description(&self) -> &str {
        "Detect contradicting statements between search results"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            json!({
                "query": { "type": "string", "description": "Search query selecting the documents" },
                "limit": { "type": "integer", "description": "Max documents analyzed", "default": 10 }
            }),
            &[filter_properties(), budget_properties()],
            &["query"],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = retrieval_query(&params, "query", 10)?;
        let budget = budget_from_params(&params, ctx.config())?;
        let documents = ctx.search(&query).await?;

        let analysis = ctx.conflict_detector().detect_conflicts(&documents, &budget).await;
        tracing::info!(
            documents = documents.len(),
            conflicts = analysis.conflicting_pairs.len(),
            validated = analysis.stats.validations_completed,
            "detected conflicts"
        );

        Ok(json!({
            "conflicts_detected": analysis.conflicting_pairs.iter().map(conflict_json).collect::<Vec<_>>(),
            "conflict_summary": {
                "total_conflicts": analysis.conflicting_pairs.len(),
                "documents_analyzed": documents.len(),
                "by_category": analysis.category_counts,
                "stats": analysis.stats,
            },
        }))
    }
}

/// Related-but-different documents that fill gaps around a target.
pub struct FindComplementaryContentTool;

#[async_trait]
impl Tool for FindComplementaryContentTool {
    fn name(&self) -> &str {
        "find_complementary_content"
    }

    fn description(&self) -> &str {
        "Recommend documents that complement a target document without duplicating it"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            json!({
                "target_query": { "type": "string", "description": "Query whose top result is the target document" },
                "context_query": { "type": "string", "description": "Query selecting the candidate documents" },
                "max_recommendations": { "type": "integer", "description": "Max recommendations", "default": 5 },
                "limit": { "type": "integer", "description": "Max candidate documents retrieved", "default": 20 }
            }),
            &[filter_properties()],
            &["target_query", "context_query"],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let target_query = RetrievalQuery::new(required_text(&params, "target_query")?, 1);
        let context_query = retrieval_query(&params, "context_query", 20)?;
        let max_recommendations = count_param(&params, "max_recommendations", 5)?;

        let Some(target) = ctx.search(&target_query).await?.into_iter().next() else {
            return Ok(json!({ "target": null, "complementary_content": [] }));
        };
        let candidates = ctx.search(&context_query).await?;

        let mut all = candidates.clone();
        all.push(target.clone());
        let calculator = ctx.calculator(&all).await;
        let matches = calculator.find_complementary_content(&target, &candidates, max_recommendations);

        let content: Vec<Value> = matches
            .iter()
            .map(|m| {
                json!({
                    "id": m.document.id,
                    "title": m.document.title,
                    "source_type": m.document.source_type,
                    "score": m.score,
                    "reason": m.reason,
                    "relationship_type": m.relationship_type,
                })
            })
            .collect();

        Ok(json!({
            "target": DocumentRef::from(&target),
            "complementary_content": content,
        }))
    }
}

/// Group search results into named clusters.
pub struct ClusterDocumentsTool;

#[async_trait]
impl Tool for ClusterDocumentsTool {
    fn name(&self) -> &str {
        "cluster_documents"
    }

    fn description(&self) -> &str {
        "Group search results into named clusters by entity, topic, project, hierarchy, or content"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        let strategies: Vec<&str> = ClusteringStrategy::ALL.iter().map(|s| s.as_str()).collect();
        object_schema(
            json!({
                "query": { "type": "string", "description": "Search query selecting the documents" },
                "strategy": { "type": "string", "enum": strategies, "description": "Clustering strategy; the configured default when omitted" },
                "max_clusters": { "type": "integer", "description": "Max clusters returned" },
                "min_cluster_size": { "type": "integer", "description": "Smallest cluster kept" },
                "limit": { "type": "integer", "description": "Max documents clustered", "default": 20 }
            }),
            &[filter_properties()],
            &["query"],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let config = ctx.config();
        let query = retrieval_query(&params, "query", 20)?;
        let strategy: ClusteringStrategy = params["strategy"]
            .as_str()
            .unwrap_or(&config.clustering.default_strategy)
            .parse()?;
        let max_clusters = count_param(&params, "max_clusters", config.clustering.max_clusters)?;
        let min_cluster_size = count_param(&params, "min_cluster_size", config.clustering.min_cluster_size)?;

        let documents = ctx.search(&query).await?;
        let analyzer = ClusterAnalyzer::new(ctx.calculator(&documents).await)
            .with_threshold(config.clustering.similarity_threshold);
        let report = analyzer.create_clusters_with_report(&documents, strategy, max_clusters, min_cluster_size)?;

        let by_key: HashMap<String, &Document> = documents.iter().map(|d| (d.key(), d)).collect();
        let run = short_run_id();
        let mut clusters = Vec::with_capacity(report.clusters.len());
        for mut cluster in report.clusters {
            cluster.id = format!("{}_{}", run, cluster.id);
            let members: Vec<Document> = cluster
                .documents
                .iter()
                .filter_map(|k| by_key.get(k).map(|d| (*d).clone()))
                .collect();
            clusters.push(json!({
                "id": cluster.id,
                "name": cluster.name,
                "theme": cluster.summary,
                "documents": cluster.documents,
                "document_count": cluster.len(),
                "cohesion": cluster.coherence_score,
                "keywords": cluster.keywords,
                "shared_entities": cluster.shared_entities,
                "shared_topics": cluster.shared_topics,
                "representative": cluster.representative,
            }));
            ctx.cache().remember_cluster(cluster, members).await;
        }

        tracing::info!(
            strategy = %report.strategy_used,
            clusters = clusters.len(),
            documents = report.total_documents,
            "clustered documents"
        );

        Ok(json!({
            "clusters": clusters,
            "clustering_metadata": {
                "strategy_requested": report.strategy_requested,
                "strategy_used": report.strategy_used,
                "total_documents": report.total_documents,
                "clustered_documents": report.clustered_documents,
                "unclustered_documents": report.unclustered_documents,
                "max_clusters": max_clusters,
                "min_cluster_size": min_cluster_size,
            },
        }))
    }
}

/// Page through the members of a cluster returned by `cluster_documents`.
pub struct ExpandClusterTool;

#[async_trait]
impl Tool for ExpandClusterTool {
    fn name(&self) -> &str {
        "expand_cluster"
    }

    fn description(&self) -> &str {
        "List the full documents of a previously returned cluster"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cluster_id": { "type": "string", "description": "Cluster id from cluster_documents" },
                "limit": { "type": "integer", "description": "Page size", "default": 20 },
                "offset": { "type": "integer", "description": "Documents to skip", "default": 0 }
            },
            "required": ["cluster_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let cluster_id = required_text(&params, "cluster_id")?;
        let limit = count_param(&params, "limit", 20)?;
        let offset = count_param(&params, "offset", 0)?;

        let Some(cached) = ctx.cache().cluster(&cluster_id).await else {
            bail!("cluster not found: {}", cluster_id);
        };
        let total = cached.documents.len();
        let page: Vec<&Document> = cached.documents.iter().skip(offset).take(limit).collect();

        Ok(json!({
            "cluster": {
                "id": cached.cluster.id,
                "name": cached.cluster.name,
                "theme": cached.cluster.summary,
                "cohesion": cached.cluster.coherence_score,
                "keywords": cached.cluster.keywords,
            },
            "documents": page,
            "total": total,
            "offset": offset,
            "limit": limit,
            "has_more": offset.saturating_add(page.len()) < total,
        }))
    }
}

/// Full content and metadata of a previously returned document.
pub struct ExpandDocumentTool;

#[async_trait]
impl Tool for ExpandDocumentTool {
    fn name(&self) -> &str {
        "expand_document"
    }

    fn description(&self) -> &str {
        "Retrieve full content and metadata for a document by id"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_id": { "type": "string", "description": "Document id" },
                "include_content": { "type": "boolean", "default": true },
                "include_metadata": { "type": "boolean", "default": true },
                "include_relationships": { "type": "boolean", "default": false }
            },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_text(&params, "document_id")?;
        let Some(doc) = ctx.document(&id).await? else {
            bail!("document not found: {}", id);
        };

        let mut out = json!({
            "id": doc.id,
            "title": doc.title,
            "source_type": doc.source_type,
            "source_url": doc.source_url,
        });
        if params["include_content"].as_bool().unwrap_or(true) {
            out["content"] = json!(doc.text());
        }
        if params["include_metadata"].as_bool().unwrap_or(true) {
            out["metadata"] = json!({
                "project_id": doc.project_id,
                "author": doc.author,
                "updated_at": doc.updated_at,
                "entities": doc.entities,
                "topics": doc.topics,
            });
        }
        if params["include_relationships"].as_bool().unwrap_or(false) {
            // Resolve links against everything earlier calls returned.
            let mut seen = ctx.cache().documents().await;
            let index = match seen.iter().position(|d| d.id == doc.id) {
                Some(i) => i,
                None => {
                    seen.push(doc.clone());
                    seen.len() - 1
                }
            };
            let network = build_citation_network(&seen);
            let related = |found: Option<usize>| found.map(|j| DocumentRef::from(&seen[j]));
            out["relationships"] = json!({
                "cross_references": doc.cross_references,
                "hierarchy": doc.hierarchy,
                "parent": related(find_parent_document(&seen, index)),
                "sibling": related(find_sibling_document(&seen, index)),
                "citation_links": network.links_of(&doc.id),
            });
        }
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of tools dispatched by name.
///
/// # Example
///
/// ```rust
/// use context_intel::tools::ToolRegistry;
///
/// let tools = ToolRegistry::with_builtins();
/// assert!(tools.find("detect_conflicts").is_some());
/// ```
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding every built-in intelligence tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(AnalyzeRelationshipsTool));
        registry.register(Box::new(FindSimilarDocumentsTool));
        registry.register(Box::new(DetectConflictsTool));
        registry.register(Box::new(FindComplementaryContentTool));
        registry.register(Box::new(ClusterDocumentsTool));
        registry.register(Box::new(ExpandClusterTool));
        registry.register(Box::new(ExpandDocumentTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Validate `params` against the named tool's schema and run it.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
        let Some(tool) = self.find(name) else {
            bail!("tool not found: {}", name);
        };
        let params = validate_params(&tool.parameters_schema(), &params)?;
        tracing::info!(tool = name, "executing tool");
        tool.execute(params, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Hierarchy;
    use crate::retrieval::CorpusRetriever;

    fn context() -> ToolContext {
        let docs = vec![
            Document::new("auth-1", "Token lifetime", "confluence")
                .with_project("auth")
                .with_text("The access token expires in 24 hours for every client."),
            Document::new("auth-2", "Token rotation runbook", "jira")
                .with_project("auth")
                .with_text("The access token expires in 4 hours for every client."),
            Document::new("bill-1", "Billing token export", "confluence")
                .with_project("billing")
                .with_hierarchy(Hierarchy::under("Finance"))
                .with_text("Invoices are exported nightly with a token."),
            Document::new("bill-2", "Billing token reports", "confluence")
                .with_project("billing")
                .with_hierarchy(Hierarchy::under("Finance"))
                .with_text("Monthly reports summarize every token invoice."),
        ];
        ToolContext::new(
            Arc::new(Config::minimal()),
            Arc::new(CorpusRetriever::from_documents(docs)),
        )
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 7);
        for name in [
            "analyze_relationships",
            "find_similar_documents",
            "detect_conflicts",
            "find_complementary_content",
            "cluster_documents",
            "expand_cluster",
            "expand_document",
        ] {
            let tool = registry.find(name).unwrap();
            assert!(tool.is_builtin());
            assert_eq!(tool.parameters_schema()["type"], "object");
        }
        assert!(registry.find("search").is_none());
    }

    #[test]
    fn test_validate_params_required_and_defaults() {
        let schema = ClusterDocumentsTool.parameters_schema();
        assert!(validate_params(&schema, &json!({})).is_err());

        let params = validate_params(&schema, &json!({ "query": "token" })).unwrap();
        assert_eq!(params["limit"], 20);
        assert!(params.get("strategy").is_none());
    }

    #[test]
    fn test_validate_params_type_and_enum() {
        let schema = ClusterDocumentsTool.parameters_schema();
        let err = validate_params(&schema, &json!({ "query": 5 })).unwrap_err();
        assert!(err.to_string().contains("must be of type 'string'"));

        let err = validate_params(&schema, &json!({ "query": "x", "strategy": "random" })).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn test_count_param_rejects_negative() {
        assert_eq!(count_param(&json!({}), "limit", 7).unwrap(), 7);
        assert_eq!(count_param(&json!({ "limit": 3 }), "limit", 7).unwrap(), 3);
        let err = count_param(&json!({ "limit": -1 }), "limit", 7).unwrap_err();
        assert!(err.to_string().contains("invalid parameter 'limit'"));
    }

    #[test]
    fn test_budget_overrides() {
        let config = Config::minimal();
        let budget = budget_from_params(
            &json!({ "use_llm": true, "max_llm_pairs": 2, "overall_timeout_s": 1.5 }),
            &config,
        )
        .unwrap();
        assert!(budget.use_llm);
        assert_eq!(budget.max_llm_pairs, 2);
        assert_eq!(budget.overall_timeout_s, 1.5);
        assert_eq!(budget.max_pairs_total, config.conflicts.max_pairs_total);

        assert!(budget_from_params(&json!({ "overall_timeout_s": -1.0 }), &config).is_err());
    }

    #[test]
    fn test_budget_rejects_huge_timeout() {
        let config = Config::minimal();
        let err = budget_from_params(&json!({ "use_llm": true, "overall_timeout_s": 1e19 }), &config).unwrap_err();
        assert!(err.to_string().starts_with("invalid argument"), "{}", err);
        let budget = budget_from_params(&json!({ "overall_timeout_s": MAX_VALIDATION_TIMEOUT_S }), &config).unwrap();
        assert_eq!(budget.overall_timeout_s, MAX_VALIDATION_TIMEOUT_S);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let err = ToolRegistry::with_builtins()
            .call("detect_conflicts", json!({ "query": "   " }), &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let err = ToolRegistry::with_builtins()
            .call("nope", json!({}), &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_detect_conflicts_finds_token_lifetimes() {
        let result = ToolRegistry::with_builtins()
            .call("detect_conflicts", json!({ "query": "access token" }), &context())
            .await
            .unwrap();
        let conflicts = result["conflicts_detected"].as_array().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0]["conflict_type"], "numeric");
        assert_eq!(conflicts[0]["validated"], false);
        assert_eq!(result["conflict_summary"]["total_conflicts"], 1);
    }

    #[tokio::test]
    async fn test_cluster_then_expand() {
        let ctx = context();
        let registry = ToolRegistry::with_builtins();
        let result = registry
            .call(
                "cluster_documents",
                json!({ "query": "token", "strategy": "project_based" }),
                &ctx,
            )
            .await
            .unwrap();
        let clusters = result["clusters"].as_array().unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(result["clustering_metadata"]["strategy_used"], "project_based");

        let id = clusters[0]["id"].as_str().unwrap();
        let page = registry
            .call("expand_cluster", json!({ "cluster_id": id, "limit": 1 }), &ctx)
            .await
            .unwrap();
        assert_eq!(page["total"], 2);
        assert_eq!(page["documents"].as_array().unwrap().len(), 1);
        assert_eq!(page["has_more"], true);

        let err = registry
            .call("expand_cluster", json!({ "cluster_id": "cluster_1" }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_zero_max_clusters_is_invalid() {
        let err = ToolRegistry::with_builtins()
            .call("cluster_documents", json!({ "query": "token", "max_clusters": 0 }), &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid argument"));
    }

    #[tokio::test]
    async fn test_find_similar_documents() {
        let result = ToolRegistry::with_builtins()
            .call(
                "find_similar_documents",
                json!({
                    "target_query": "lifetime",
                    "comparison_query": "token",
                    "similarity_metrics": ["semantic_similarity", "metadata_similarity"]
                }),
                &context(),
            )
            .await
            .unwrap();
        assert_eq!(result["target"]["id"], "auth-1");
        let similar = result["similar_documents"].as_array().unwrap();
        assert_eq!(similar.len(), 3);
        assert!(similar.iter().all(|s| s["id"] != "auth-1"));
        assert_eq!(similar[0]["id"], "auth-2");
    }

    #[tokio::test]
    async fn test_find_similar_rejects_unknown_metric() {
        let err = ToolRegistry::with_builtins()
            .call(
                "find_similar_documents",
                json!({ "target_query": "token", "comparison_query": "token", "similarity_metrics": ["vibes"] }),
                &context(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown similarity metric"));
    }

    #[tokio::test]
    async fn test_expand_document_flags() {
        let ctx = context();
        let registry = ToolRegistry::with_builtins();
        let doc = registry
            .call("expand_document", json!({ "document_id": "bill-1", "include_content": false }), &ctx)
            .await
            .unwrap();
        assert_eq!(doc["title"], "Billing token export");
        assert!(doc.get("content").is_none());
        assert_eq!(doc["metadata"]["project_id"], "billing");

        let err = registry
            .call("expand_document", json!({ "document_id": "ghost" }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_expand_document_relationships() {
        let ctx = context();
        let registry = ToolRegistry::with_builtins();
        registry
            .call("detect_conflicts", json!({ "query": "token" }), &ctx)
            .await
            .unwrap();

        let doc = registry
            .call("expand_document", json!({ "document_id": "bill-1", "include_relationships": true }), &ctx)
            .await
            .unwrap();
        let relationships = &doc["relationships"];
        assert_eq!(relationships["sibling"]["id"], "bill-2");
        assert!(relationships["parent"].is_null());
        let links = relationships["citation_links"].as_array().unwrap();
        assert!(links
            .iter()
            .any(|l| l["id"] == "bill-2" && l["kind"] == "sibling" && l["direction"] == "outbound"));

        let lone = registry
            .call("expand_document", json!({ "document_id": "auth-1", "include_relationships": true }), &ctx)
            .await
            .unwrap();
        assert!(lone["relationships"]["sibling"].is_null());
        assert_eq!(lone["relationships"]["citation_links"], json!([]));
    }

    /// Serves Ollama's `/api/embed` with one fixed vector per input and
    /// records every text it was asked to embed.
    async fn embedding_stub(seen: Arc<std::sync::Mutex<Vec<String>>>) -> String {
        let app = axum::Router::new().route(
            "/api/embed",
            axum::routing::post(move |axum::Json(body): axum::Json<Value>| {
                let seen = seen.clone();
                async move {
                    let inputs: Vec<String> = body["input"]
                        .as_array()
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                        .unwrap_or_default();
                    let count = inputs.len();
                    seen.lock().unwrap().extend(inputs);
                    axum::Json(json!({ "embeddings": vec![vec![0.6, 0.8]; count] }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_calculator_embeds_normalized_text() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let url = embedding_stub(seen.clone()).await;

        let mut config = Config::minimal();
        config.nlp.backend = "embedding".to_string();
        config.embedding.provider = "ollama".to_string();
        config.embedding.model = Some("stub-embed".to_string());
        config.embedding.url = Some(url);
        config.embedding.dims = Some(2);
        config.embedding.max_retries = 0;

        // Lexically disjoint, so only the embedding backend can score them.
        let padded = Document::new("a", "Token lifetime", "confluence").with_text("  OAuth tokens expire daily\n");
        let textless = Document::new("b", "Session expiry policy", "jira");
        let docs = vec![padded.clone(), textless.clone()];

        let ctx = ToolContext::new(Arc::new(config), Arc::new(CorpusRetriever::from_documents(docs.clone())));
        let calculator = ctx.calculator(&docs).await;
        let score = calculator.metric_score(SimilarityMetric::SemanticSimilarity, &padded, &textless);
        assert!(score > 0.99, "semantic score {}", score);

        let embedded = seen.lock().unwrap().clone();
        assert_eq!(embedded, vec!["OAuth tokens expire daily", "Session expiry policy"]);
    }

    #[tokio::test]
    async fn test_analyze_relationships_shape() {
        let result = ToolRegistry::with_builtins()
            .call("analyze_relationships", json!({ "query": "token" }), &context())
            .await
            .unwrap();
        assert_eq!(result["total_analyzed"], 4);
        let relationships = result["relationships"].as_array().unwrap();
        assert!(relationships
            .iter()
            .any(|r| r["relationship_type"] == "conflicting"));
        assert_eq!(result["citation_network"]["stats"]["sibling_edges"], 2);
        assert_eq!(result["summary"]["conflicts"], 1);
    }
}
