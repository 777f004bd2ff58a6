//! Pairwise document similarity.
//!
//! Six metrics each score a pair in `[0.0, 1.0]`:
//!
//! | Metric | Signal |
//! |--------|--------|
//! | `entity_overlap` | Jaccard overlap of extracted entities |
//! | `topic_overlap` | Jaccard overlap of extracted topics |
//! | `semantic_similarity` | injected [`NlpBackend`] text similarity |
//! | `metadata_similarity` | project (0.5), source type (0.3), author (0.2) |
//! | `hierarchical_distance` | shared parent, parent/child, breadcrumb prefix |
//! | `content_features` | length ratio and structural markers |
//!
//! The combined score is a weighted average over whichever metrics were
//! computed. Weights are looked up by name, so score maps may carry keys
//! outside the known set; those use [`SimilarityWeights::default_weight`].

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::SimilarityConfig;
use crate::error::IntelError;
use crate::models::{Document, DocumentRef, Tag};
use crate::nlp::NlpBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    EntityOverlap,
    TopicOverlap,
    SemanticSimilarity,
    MetadataSimilarity,
    HierarchicalDistance,
    ContentFeatures,
}

impl SimilarityMetric {
    pub const ALL: [SimilarityMetric; 6] = [
        SimilarityMetric::EntityOverlap,
        SimilarityMetric::TopicOverlap,
        SimilarityMetric::SemanticSimilarity,
        SimilarityMetric::MetadataSimilarity,
        SimilarityMetric::HierarchicalDistance,
        SimilarityMetric::ContentFeatures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::EntityOverlap => "entity_overlap",
            SimilarityMetric::TopicOverlap => "topic_overlap",
            SimilarityMetric::SemanticSimilarity => "semantic_similarity",
            SimilarityMetric::MetadataSimilarity => "metadata_similarity",
            SimilarityMetric::HierarchicalDistance => "hierarchical_distance",
            SimilarityMetric::ContentFeatures => "content_features",
        }
    }

    /// Built-in weight used when the configuration does not override it.
    pub fn default_weight(&self) -> f64 {
        match self {
            SimilarityMetric::EntityOverlap => 0.25,
            SimilarityMetric::TopicOverlap => 0.20,
            SimilarityMetric::SemanticSimilarity => 0.30,
            SimilarityMetric::MetadataSimilarity => 0.10,
            SimilarityMetric::HierarchicalDistance => 0.10,
            SimilarityMetric::ContentFeatures => 0.05,
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMetric {
    type Err = IntelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SimilarityMetric::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| IntelError::UnknownMetric(s.to_string()))
    }
}

/// Dominant relationship between two documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    CrossReference,
    Hierarchical,
    ProjectGrouping,
    SemanticSimilarity,
    Complementary,
    Conflicting,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::CrossReference => "cross_reference",
            RelationshipType::Hierarchical => "hierarchical",
            RelationshipType::ProjectGrouping => "project_grouping",
            RelationshipType::SemanticSimilarity => "semantic_similarity",
            RelationshipType::Complementary => "complementary",
            RelationshipType::Conflicting => "conflicting",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name-keyed metric weights with a fallback for unknown keys.
#[derive(Debug, Clone)]
pub struct SimilarityWeights {
    overrides: HashMap<String, f64>,
    pub default_weight: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            default_weight: 0.1,
        }
    }
}

impl SimilarityWeights {
    pub fn from_config(config: &SimilarityConfig) -> Self {
        Self {
            overrides: config.weights.clone(),
            default_weight: config.default_weight,
        }
    }

    pub fn weight_for(&self, key: &str) -> f64 {
        if let Some(w) = self.overrides.get(key) {
            return *w;
        }
        key.parse::<SimilarityMetric>()
            .map(|m| m.default_weight())
            .unwrap_or(self.default_weight)
    }
}

/// Outcome of comparing two documents.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    pub document_a: DocumentRef,
    pub document_b: DocumentRef,
    pub score: f64,
    pub metric_scores: BTreeMap<String, f64>,
    pub shared_entities: Vec<String>,
    pub shared_topics: Vec<String>,
    pub relationship_type: RelationshipType,
}

impl SimilarityResult {
    /// One-line human explanation of why the pair scored as it did.
    pub fn describe(&self) -> String {
        match self.relationship_type {
            RelationshipType::CrossReference => {
                return format!("'{}' and '{}' reference each other", self.document_a.title, self.document_b.title)
            }
            RelationshipType::Hierarchical => {
                return format!("'{}' and '{}' share a page hierarchy", self.document_a.title, self.document_b.title)
            }
            _ => {}
        }
        if !self.shared_entities.is_empty() {
            return format!("Shared entities: {}", preview(&self.shared_entities));
        }
        if !self.shared_topics.is_empty() {
            return format!("Shared topics: {}", preview(&self.shared_topics));
        }
        if self.relationship_type == RelationshipType::ProjectGrouping {
            return "Same project".to_string();
        }
        match self.strongest_metric() {
            Some((name, score)) if score > 0.0 => format!("Strongest signal: {} ({:.2})", name, score),
            _ => "No shared signals".to_string(),
        }
    }

    pub fn strongest_metric(&self) -> Option<(&str, f64)> {
        self.metric_scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, v)| (k.as_str(), *v))
    }
}

fn preview(terms: &[String]) -> String {
    terms.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
}

/// A candidate that fills gaps around a target document.
#[derive(Debug, Clone, Serialize)]
pub struct ComplementaryMatch {
    pub document: DocumentRef,
    pub score: f64,
    pub reason: String,
    pub relationship_type: RelationshipType,
}

/// Below this, a candidate is not worth recommending.
const COMPLEMENTARY_MIN_SCORE: f64 = 0.15;

/// Near-duplicates add nothing.
const DUPLICATE_THRESHOLD: f64 = 0.9;

/// Normalized, de-duplicated term set from an entity or topic list.
pub fn extract_terms(tags: Option<&[Tag]>) -> BTreeSet<String> {
    tags.unwrap_or_default()
        .iter()
        .filter_map(Tag::normalized)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    inter / union
}

fn same_field(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => {
            let x = x.trim();
            !x.is_empty() && x.eq_ignore_ascii_case(y.trim())
        }
        _ => false,
    }
}

struct ContentShape {
    words: usize,
    code: bool,
    link: bool,
    list: bool,
}

fn content_shape(text: &str) -> ContentShape {
    ContentShape {
        words: text.split_whitespace().count(),
        code: text.contains("```") || text.lines().any(|l| l.starts_with("    ") && !l.trim().is_empty()),
        link: text.contains("http://") || text.contains("https://") || text.contains("]("),
        list: text.lines().any(|l| {
            let l = l.trim_start();
            l.starts_with("- ")
                || l.starts_with("* ")
                || l.split_once(". ")
                    .map(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
        }),
    }
}

/// Scores document pairs with the configured weights and NLP backend.
#[derive(Clone)]
pub struct SimilarityCalculator {
    nlp: Arc<dyn NlpBackend>,
    weights: SimilarityWeights,
}

impl SimilarityCalculator {
    pub fn new(nlp: Arc<dyn NlpBackend>) -> Self {
        Self {
            nlp,
            weights: SimilarityWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: SimilarityWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Compare two documents across all six metrics.
    pub fn calculate_similarity(&self, a: &Document, b: &Document) -> SimilarityResult {
        self.calculate_similarity_with(a, b, &SimilarityMetric::ALL)
    }

    /// Compare two documents across a chosen subset of metrics.
    ///
    /// An empty subset yields a zero combined score.
    pub fn calculate_similarity_with(
        &self,
        a: &Document,
        b: &Document,
        metrics: &[SimilarityMetric],
    ) -> SimilarityResult {
        let metric_scores: BTreeMap<String, f64> = metrics
            .iter()
            .map(|m| (m.as_str().to_string(), self.metric_score(*m, a, b).clamp(0.0, 1.0)))
            .collect();

        let ents_a = extract_terms(a.entities.as_deref());
        let ents_b = extract_terms(b.entities.as_deref());
        let tops_a = extract_terms(a.topics.as_deref());
        let tops_b = extract_terms(b.topics.as_deref());

        SimilarityResult {
            document_a: DocumentRef::from(a),
            document_b: DocumentRef::from(b),
            score: self.combine_metric_scores(&metric_scores),
            shared_entities: ents_a.intersection(&ents_b).cloned().collect(),
            shared_topics: tops_a.intersection(&tops_b).cloned().collect(),
            relationship_type: self.determine_relationship_type(a, b),
            metric_scores,
        }
    }

    pub fn metric_score(&self, metric: SimilarityMetric, a: &Document, b: &Document) -> f64 {
        match metric {
            SimilarityMetric::EntityOverlap => jaccard(
                &extract_terms(a.entities.as_deref()),
                &extract_terms(b.entities.as_deref()),
            ),
            SimilarityMetric::TopicOverlap => jaccard(
                &extract_terms(a.topics.as_deref()),
                &extract_terms(b.topics.as_deref()),
            ),
            SimilarityMetric::SemanticSimilarity => self.semantic_similarity(a, b),
            SimilarityMetric::MetadataSimilarity => metadata_similarity(a, b),
            SimilarityMetric::HierarchicalDistance => hierarchical_distance(a, b),
            SimilarityMetric::ContentFeatures => content_features(a.text(), b.text()),
        }
    }

    fn semantic_similarity(&self, a: &Document, b: &Document) -> f64 {
        let text_a = semantic_text(a);
        let text_b = semantic_text(b);
        if text_a.is_empty() || text_b.is_empty() {
            return 0.0;
        }
        match self.nlp.text_similarity(text_a, text_b) {
            Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
            Ok(_) => 0.0,
            Err(e) => {
                tracing::debug!(backend = self.nlp.name(), %e, "semantic similarity unavailable");
                0.0
            }
        }
    }

    /// Weighted average of the scores present, each clamped to `[0.0, 1.0]`.
    pub fn combine_metric_scores(&self, scores: &BTreeMap<String, f64>) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (key, score) in scores {
            let w = self.weights.weight_for(key).max(0.0);
            let s = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
            weighted += w * s;
            total_weight += w;
        }
        if total_weight <= f64::EPSILON {
            return 0.0;
        }
        (weighted / total_weight).clamp(0.0, 1.0)
    }

    /// Strongest structural signal between two documents.
    ///
    /// Precedence: cross-reference, hierarchy, shared project, and finally
    /// semantic similarity.
    pub fn determine_relationship_type(&self, a: &Document, b: &Document) -> RelationshipType {
        if a.references(b) || b.references(a) {
            RelationshipType::CrossReference
        } else if a.is_sibling_of(b) || a.is_child_of(b) || b.is_child_of(a) {
            RelationshipType::Hierarchical
        } else if same_field(a.project_id.as_deref(), b.project_id.as_deref()) {
            RelationshipType::ProjectGrouping
        } else {
            RelationshipType::SemanticSimilarity
        }
    }

    /// Rank `candidates` by how well they complement `target`.
    ///
    /// Complementary content is related but not redundant: moderate
    /// similarity peaks the score, near-duplicates are skipped, and
    /// structural links add bonuses.
    pub fn find_complementary_content(
        &self,
        target: &Document,
        candidates: &[Document],
        max_recommendations: usize,
    ) -> Vec<ComplementaryMatch> {
        let mut matches: Vec<ComplementaryMatch> = candidates
            .iter()
            .filter(|c| c.id != target.id)
            .filter_map(|c| self.complementary_score(target, c))
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        matches.truncate(max_recommendations);
        matches
    }

    fn complementary_score(&self, target: &Document, candidate: &Document) -> Option<ComplementaryMatch> {
        let result = self.calculate_similarity(target, candidate);
        if result.score >= DUPLICATE_THRESHOLD {
            return None;
        }

        let mut score = 1.0 - (result.score - 0.5).abs() * 2.0;
        let mut reasons = Vec::new();

        if !target.source_type.eq_ignore_ascii_case(&candidate.source_type) {
            score += 0.15;
            reasons.push(format!("different source ({})", candidate.source_type));
        }
        if same_field(target.project_id.as_deref(), candidate.project_id.as_deref()) {
            score += 0.1;
            reasons.push("same project".to_string());
        }
        if target.is_sibling_of(candidate) {
            score += 0.1;
            reasons.push("sibling page".to_string());
        }
        if target.references(candidate) || candidate.references(target) {
            score += 0.2;
            reasons.push("linked by reference".to_string());
        }
        if !result.shared_entities.is_empty() {
            reasons.push(format!("covers {}", preview(&result.shared_entities)));
        }
        let added: Vec<String> = extract_terms(candidate.entities.as_deref())
            .into_iter()
            .filter(|term| !self.nlp.contains_term(target.text(), term))
            .collect();
        if !added.is_empty() {
            reasons.push(format!("adds {}", preview(&added)));
        }

        let score = score.clamp(0.0, 1.0);
        if score < COMPLEMENTARY_MIN_SCORE {
            return None;
        }

        let reason = if reasons.is_empty() {
            "Related content on the same subject".to_string()
        } else {
            let mut joined = reasons.join(", ");
            if let Some(first) = joined.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            joined
        };

        Some(ComplementaryMatch {
            document: DocumentRef::from(candidate),
            score,
            reason,
            relationship_type: RelationshipType::Complementary,
        })
    }
}

/// The text the semantic metric compares: trimmed body text, or the title
/// when the body is empty. Embedding backends must be prepared with exactly
/// these strings.
pub fn semantic_text(doc: &Document) -> &str {
    let text = doc.text().trim();
    if text.is_empty() {
        doc.title.trim()
    } else {
        text
    }
}

fn metadata_similarity(a: &Document, b: &Document) -> f64 {
    let mut score = 0.0;
    if same_field(a.project_id.as_deref(), b.project_id.as_deref()) {
        score += 0.5;
    }
    if same_field(Some(&a.source_type), Some(&b.source_type)) {
        score += 0.3;
    }
    if same_field(a.author.as_deref(), b.author.as_deref()) {
        score += 0.2;
    }
    score
}

fn hierarchical_distance(a: &Document, b: &Document) -> f64 {
    if a.is_sibling_of(b) {
        return 1.0;
    }
    if a.is_child_of(b) || b.is_child_of(a) {
        return 0.8;
    }
    let (Some(ha), Some(hb)) = (&a.hierarchy, &b.hierarchy) else {
        return 0.0;
    };
    let sa = ha.breadcrumb_segments();
    let sb = hb.breadcrumb_segments();
    let longest = sa.len().max(sb.len());
    if longest == 0 {
        return 0.0;
    }
    let shared = sa.iter().zip(sb.iter()).take_while(|(x, y)| x == y).count();
    shared as f64 / longest as f64
}

fn content_features(a: &str, b: &str) -> f64 {
    if a.trim().is_empty() || b.trim().is_empty() {
        return 0.0;
    }
    let sa = content_shape(a);
    let sb = content_shape(b);

    let ratio = sa.words.min(sb.words) as f64 / sa.words.max(sb.words).max(1) as f64;
    let matching = [sa.code == sb.code, sa.link == sb.link, sa.list == sb.list]
        .iter()
        .filter(|m| **m)
        .count() as f64;

    0.4 * ratio + 0.6 * (matching / 3.0)
}
