//! Document clustering.
//!
//! Groups a result set into named clusters. Bucketing strategies assign each
//! document to at most one cluster:
//!
//! - `entity_based` / `topic_based`: the document's most frequent term across
//!   the whole set.
//! - `project_based`: project id.
//! - `hierarchical`: parent id or title, else breadcrumb root.
//! - `mixed_features`: greedy agglomeration on combined similarity.
//! - `adaptive`: picks one of the above from signal coverage.
//!
//! Buckets below `min_cluster_size` are discarded; the rest are ordered by
//! size, then coherence, and truncated to `max_clusters`.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::IntelError;
use crate::models::Document;
use crate::nlp::tokenize;
use crate::similarity::{extract_terms, SimilarityCalculator};

/// Maximum length of a generated cluster name.
pub const MAX_NAME_LEN: usize = 60;

const MAX_NAME_TERMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringStrategy {
    EntityBased,
    TopicBased,
    ProjectBased,
    MixedFeatures,
    Hierarchical,
    Adaptive,
}

impl ClusteringStrategy {
    pub const ALL: [ClusteringStrategy; 6] = [
        ClusteringStrategy::EntityBased,
        ClusteringStrategy::TopicBased,
        ClusteringStrategy::ProjectBased,
        ClusteringStrategy::MixedFeatures,
        ClusteringStrategy::Hierarchical,
        ClusteringStrategy::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusteringStrategy::EntityBased => "entity_based",
            ClusteringStrategy::TopicBased => "topic_based",
            ClusteringStrategy::ProjectBased => "project_based",
            ClusteringStrategy::MixedFeatures => "mixed_features",
            ClusteringStrategy::Hierarchical => "hierarchical",
            ClusteringStrategy::Adaptive => "adaptive",
        }
    }

    /// Label used in fallback cluster names.
    fn kind_label(&self) -> &'static str {
        match self {
            ClusteringStrategy::EntityBased => "Entity",
            ClusteringStrategy::TopicBased => "Topic",
            ClusteringStrategy::ProjectBased => "Project",
            ClusteringStrategy::MixedFeatures => "Mixed",
            ClusteringStrategy::Hierarchical => "Hierarchy",
            ClusteringStrategy::Adaptive => "Document",
        }
    }
}

impl fmt::Display for ClusteringStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusteringStrategy {
    type Err = IntelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "entity_based" => Ok(ClusteringStrategy::EntityBased),
            "topic_based" => Ok(ClusteringStrategy::TopicBased),
            "project_based" => Ok(ClusteringStrategy::ProjectBased),
            "mixed_features" => Ok(ClusteringStrategy::MixedFeatures),
            "hierarchical" => Ok(ClusteringStrategy::Hierarchical),
            "adaptive" => Ok(ClusteringStrategy::Adaptive),
            other => Err(IntelError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentCluster {
    pub id: String,
    pub name: String,
    /// Member composite keys (`source_type:title`), in input order.
    pub documents: Vec<String>,
    pub coherence_score: f64,
    pub shared_entities: Vec<String>,
    pub shared_topics: Vec<String>,
    pub keywords: Vec<String>,
    pub summary: String,
    /// Key of the highest-scoring member.
    pub representative: Option<String>,
}

impl DocumentCluster {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Clusters plus how they were produced.
#[derive(Debug, Clone, Serialize)]
pub struct ClusteringReport {
    pub strategy_requested: ClusteringStrategy,
    pub strategy_used: ClusteringStrategy,
    pub total_documents: usize,
    pub clustered_documents: usize,
    pub unclustered_documents: Vec<String>,
    pub clusters: Vec<DocumentCluster>,
}

pub struct ClusterAnalyzer {
    calculator: SimilarityCalculator,
    similarity_threshold: f64,
}

impl ClusterAnalyzer {
    pub fn new(calculator: SimilarityCalculator) -> Self {
        Self {
            calculator,
            similarity_threshold: 0.3,
        }
    }

    /// Join threshold for `mixed_features`.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn create_clusters(
        &self,
        documents: &[Document],
        strategy: ClusteringStrategy,
        max_clusters: usize,
        min_cluster_size: usize,
    ) -> Result<Vec<DocumentCluster>, IntelError> {
        self.create_clusters_with_report(documents, strategy, max_clusters, min_cluster_size)
            .map(|report| report.clusters)
    }

    pub fn create_clusters_with_report(
        &self,
        documents: &[Document],
        strategy: ClusteringStrategy,
        max_clusters: usize,
        min_cluster_size: usize,
    ) -> Result<ClusteringReport, IntelError> {
        if max_clusters == 0 {
            return Err(IntelError::InvalidArgument(
                "max_clusters must be at least 1".to_string(),
            ));
        }
        let min_size = min_cluster_size.max(1);

        let used = match strategy {
            ClusteringStrategy::Adaptive => select_adaptive_strategy(documents),
            other => other,
        };

        let buckets = match used {
            ClusteringStrategy::EntityBased => {
                let terms: Vec<Vec<String>> = documents.iter().map(entity_terms).collect();
                bucket_by_key(dominant_terms(&terms))
            }
            ClusteringStrategy::TopicBased => {
                let terms: Vec<Vec<String>> = documents.iter().map(topic_terms).collect();
                bucket_by_key(dominant_terms(&terms))
            }
            ClusteringStrategy::ProjectBased => bucket_by_key(
                documents
                    .iter()
                    .map(|d| {
                        d.project_id
                            .as_deref()
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(|p| p.to_string())
                    })
                    .collect(),
            ),
            ClusteringStrategy::Hierarchical => bucket_by_key(documents.iter().map(hierarchy_key).collect()),
            ClusteringStrategy::MixedFeatures | ClusteringStrategy::Adaptive => self.agglomerate(documents),
        };

        let mut clusters: Vec<DocumentCluster> = buckets
            .into_iter()
            .filter(|b| b.members.len() >= min_size)
            .map(|b| self.build_cluster(documents, used, b))
            .collect();

        clusters.sort_by(|a, b| {
            b.len().cmp(&a.len()).then_with(|| {
                b.coherence_score
                    .partial_cmp(&a.coherence_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        clusters.truncate(max_clusters);

        for (i, cluster) in clusters.iter_mut().enumerate() {
            cluster.id = format!("cluster_{}", i + 1);
            if cluster.name.is_empty() {
                cluster.name = generate_cluster_name(used, &[], i + 1);
            }
        }

        let clustered: std::collections::HashSet<&str> = clusters
            .iter()
            .flat_map(|c| c.documents.iter().map(String::as_str))
            .collect();
        let unclustered_documents: Vec<String> = documents
            .iter()
            .map(Document::key)
            .filter(|k| !clustered.contains(k.as_str()))
            .collect();

        tracing::debug!(
            requested = %strategy,
            used = %used,
            clusters = clusters.len(),
            unclustered = unclustered_documents.len(),
            "clustered documents"
        );

        Ok(ClusteringReport {
            strategy_requested: strategy,
            strategy_used: used,
            total_documents: documents.len(),
            clustered_documents: clustered.len(),
            unclustered_documents,
            clusters,
        })
    }

    /// Average pairwise similarity of the cluster members found in
    /// `documents`. One resolvable member scores `1.0`; none scores `0.0`.
    pub fn calculate_cluster_coherence(&self, cluster: &DocumentCluster, documents: &[Document]) -> f64 {
        let by_key: HashMap<String, &Document> = documents.iter().map(|d| (d.key(), d)).collect();
        let members: Vec<&Document> = cluster
            .documents
            .iter()
            .filter_map(|k| by_key.get(k).copied())
            .collect();
        self.coherence_of(&members)
    }

    fn coherence_of(&self, members: &[&Document]) -> f64 {
        match members.len() {
            0 => 0.0,
            1 => 1.0,
            n => {
                let mut total = 0.0;
                for i in 0..n {
                    for j in (i + 1)..n {
                        total += self.calculator.calculate_similarity(members[i], members[j]).score;
                    }
                }
                let pairs = (n * (n - 1) / 2) as f64;
                (total / pairs).clamp(0.0, 1.0)
            }
        }
    }

    fn agglomerate(&self, documents: &[Document]) -> Vec<Bucket> {
        let mut buckets: Vec<Bucket> = Vec::new();
        for (idx, doc) in documents.iter().enumerate() {
            let best = buckets
                .iter()
                .enumerate()
                .map(|(b, bucket)| {
                    let total: f64 = bucket
                        .members
                        .iter()
                        .map(|&m| self.calculator.calculate_similarity(doc, &documents[m]).score)
                        .sum();
                    (b, total / bucket.members.len() as f64)
                })
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            match best {
                Some((b, avg)) if avg >= self.similarity_threshold => buckets[b].members.push(idx),
                _ => buckets.push(Bucket {
                    label: None,
                    members: vec![idx],
                }),
            }
        }
        buckets
    }

    fn build_cluster(&self, documents: &[Document], strategy: ClusteringStrategy, bucket: Bucket) -> DocumentCluster {
        let members: Vec<&Document> = bucket.members.iter().map(|&i| &documents[i]).collect();

        let shared_entities = shared_terms(&members, entity_terms);
        let shared_topics = shared_terms(&members, topic_terms);
        let keywords = title_keywords(&members);

        let mut name_terms: Vec<String> = Vec::new();
        if let Some(label) = &bucket.label {
            name_terms.push(label.clone());
        }
        match strategy {
            ClusteringStrategy::EntityBased => name_terms.extend(shared_entities.iter().cloned()),
            ClusteringStrategy::TopicBased => name_terms.extend(shared_topics.iter().cloned()),
            _ => {
                name_terms.extend(shared_topics.iter().take(1).cloned());
                name_terms.extend(shared_entities.iter().take(1).cloned());
            }
        }
        // Left empty when no term survives cleaning; the fallback name needs
        // the cluster's final position.
        let name = if name_terms.iter().all(|t| clean_topic_name(t).is_empty()) {
            String::new()
        } else {
            generate_cluster_name(strategy, &name_terms, 0)
        };

        let representative = members
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(_, d)| d.key());

        let summary = summarize(&members, &shared_topics, &shared_entities);

        DocumentCluster {
            id: String::new(),
            name,
            documents: members.iter().map(|d| d.key()).collect(),
            coherence_score: self.coherence_of(&members),
            shared_entities,
            shared_topics,
            keywords,
            summary,
            representative,
        }
    }
}

struct Bucket {
    label: Option<String>,
    members: Vec<usize>,
}

/// Pick a strategy from how well each signal covers the set.
///
/// Projects win when at least two distinct ids cover 60% of documents.
/// Otherwise the best-covered of hierarchy, entities, and topics wins when it
/// covers at least half. Everything else falls back to `mixed_features`.
pub fn select_adaptive_strategy(documents: &[Document]) -> ClusteringStrategy {
    if documents.is_empty() {
        return ClusteringStrategy::MixedFeatures;
    }
    let n = documents.len() as f64;
    let coverage = |pred: fn(&Document) -> bool| documents.iter().filter(|d| pred(d)).count() as f64 / n;

    let projects: std::collections::HashSet<&str> = documents
        .iter()
        .filter_map(|d| d.project_id.as_deref().map(str::trim).filter(|p| !p.is_empty()))
        .collect();
    let project_cov = coverage(|d| d.project_id.as_deref().map(|p| !p.trim().is_empty()).unwrap_or(false));
    if projects.len() >= 2 && project_cov >= 0.6 {
        return ClusteringStrategy::ProjectBased;
    }

    let candidates = [
        (ClusteringStrategy::Hierarchical, coverage(|d| hierarchy_key(d).is_some())),
        (ClusteringStrategy::EntityBased, coverage(|d| !entity_terms(d).is_empty())),
        (ClusteringStrategy::TopicBased, coverage(|d| !topic_terms(d).is_empty())),
    ];

    let mut best: Option<(ClusteringStrategy, f64)> = None;
    for (strategy, cov) in candidates {
        if cov >= 0.5 && best.map(|(_, b)| cov > b).unwrap_or(true) {
            best = Some((strategy, cov));
        }
    }
    best.map(|(s, _)| s).unwrap_or(ClusteringStrategy::MixedFeatures)
}

fn entity_terms(doc: &Document) -> Vec<String> {
    extract_terms(doc.entities.as_deref()).into_iter().collect()
}

fn topic_terms(doc: &Document) -> Vec<String> {
    extract_terms(doc.topics.as_deref()).into_iter().collect()
}

fn hierarchy_key(doc: &Document) -> Option<String> {
    let h = doc.hierarchy.as_ref()?;
    h.parent_key()
        .or_else(|| h.breadcrumb_segments().into_iter().next())
}

fn bucket_by_key(keys: Vec<Option<String>>) -> Vec<Bucket> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, key) in keys.into_iter().enumerate() {
        if let Some(key) = key {
            let slot = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Vec::new()
            });
            slot.push(i);
        }
    }
    order
        .into_iter()
        .filter_map(|key| {
            groups.remove(&key).map(|members| Bucket {
                label: Some(key),
                members,
            })
        })
        .collect()
}

/// Key each document by its term that is most frequent across the set.
/// Ties go to the alphabetically first term.
fn dominant_terms(per_doc: &[Vec<String>]) -> Vec<Option<String>> {
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for terms in per_doc {
        for t in terms {
            *freq.entry(t.as_str()).or_insert(0) += 1;
        }
    }

    per_doc
        .iter()
        .map(|terms| {
            let mut best: Option<(&str, usize)> = None;
            for t in terms {
                let f = freq.get(t.as_str()).copied().unwrap_or(0);
                let better = match best {
                    None => true,
                    Some((bt, bf)) => f > bf || (f == bf && t.as_str() < bt),
                };
                if better {
                    best = Some((t.as_str(), f));
                }
            }
            best.map(|(t, _)| t.to_string())
        })
        .collect()
}

/// Terms carried by at least half the members (and by two, when the cluster
/// has more than one), most common first.
fn shared_terms(members: &[&Document], terms_of: fn(&Document) -> Vec<String>) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for doc in members {
        for t in terms_of(doc) {
            *counts.entry(t).or_insert(0) += 1;
        }
    }
    let needed = if members.len() > 1 {
        members.len().div_ceil(2).max(2)
    } else {
        1
    };
    let mut shared: Vec<(String, usize)> = counts.into_iter().filter(|(_, c)| *c >= needed).collect();
    shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    shared.into_iter().map(|(t, _)| t).collect()
}

fn title_keywords(members: &[&Document]) -> Vec<String> {
    const SKIP: &[&str] = &["the", "and", "for", "with", "from", "how", "what", "this", "that", "into"];
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for doc in members {
        let mut seen = std::collections::HashSet::new();
        for token in tokenize(&doc.title) {
            if token.len() < 3 || SKIP.contains(&token.as_str()) || token.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if seen.insert(token.clone()) {
                *counts.entry(token).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(5).map(|(t, _)| t).collect()
}

fn summarize(members: &[&Document], topics: &[String], entities: &[String]) -> String {
    let mut sources: Vec<&str> = members.iter().map(|d| d.source_type.as_str()).collect();
    sources.sort_unstable();
    sources.dedup();

    let noun = if members.len() == 1 { "document" } else { "documents" };
    let mut summary = format!("{} {} from {}", members.len(), noun, sources.join(", "));
    let focus: Vec<&str> = topics.iter().chain(entities.iter()).take(3).map(String::as_str).collect();
    if !focus.is_empty() {
        summary.push_str(" covering ");
        summary.push_str(&focus.join(", "));
    }
    summary
}

/// Build a readable cluster name from dominant terms.
///
/// Terms are cleaned, de-duplicated case-insensitively, and joined with
/// `" & "` up to [`MAX_NAME_LEN`] characters. With no usable terms the name
/// falls back to `"<Kind> Cluster <index>"`. Never returns an empty string.
pub fn generate_cluster_name(strategy: ClusteringStrategy, terms: &[String], index: usize) -> String {
    let mut picked: Vec<String> = Vec::new();
    for term in terms {
        let cleaned = clean_topic_name(term);
        if cleaned.is_empty() || picked.iter().any(|p| p.eq_ignore_ascii_case(&cleaned)) {
            continue;
        }
        picked.push(cleaned);
        if picked.len() == MAX_NAME_TERMS {
            break;
        }
    }

    while picked.len() > 1 && picked.join(" & ").chars().count() > MAX_NAME_LEN {
        picked.pop();
    }

    match picked.len() {
        0 => format!("{} Cluster {}", strategy.kind_label(), index.max(1)),
        _ => truncate_chars(&picked.join(" & "), MAX_NAME_LEN),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max - 3).collect();
    format!("{}...", kept.trim_end())
}

/// Trim, turn underscores into spaces, and title-case each word. Words that
/// are entirely upper-case (acronyms) are kept as they are.
pub fn clean_topic_name(topic: &str) -> String {
    topic
        .replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let has_letters = word.chars().any(char::is_alphabetic);
            if has_letters && word.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase) {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Hierarchy;
    use crate::nlp::LexicalNlp;
    use std::sync::Arc;

    fn analyzer() -> ClusterAnalyzer {
        ClusterAnalyzer::new(SimilarityCalculator::new(Arc::new(LexicalNlp)))
    }

    fn doc(id: &str, project: &str) -> Document {
        Document::new(id, format!("Doc {}", id), "confluence")
            .with_project(project)
            .with_text(format!("Notes for {} about the {} project", id, project))
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("adaptive".parse::<ClusteringStrategy>().unwrap(), ClusteringStrategy::Adaptive);
        assert!(matches!(
            "kmeans".parse::<ClusteringStrategy>(),
            Err(IntelError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_empty_input_yields_no_clusters() {
        let clusters = analyzer()
            .create_clusters(&[], ClusteringStrategy::Adaptive, 5, 2)
            .unwrap();
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_zero_max_clusters_is_rejected() {
        let err = analyzer()
            .create_clusters(&[doc("1", "a")], ClusteringStrategy::ProjectBased, 0, 1)
            .unwrap_err();
        assert!(matches!(err, IntelError::InvalidArgument(_)));
    }

    #[test]
    fn test_project_based_two_projects() {
        let docs: Vec<Document> = (0..10)
            .map(|i| doc(&i.to_string(), if i % 2 == 0 { "alpha" } else { "beta" }))
            .collect();
        let clusters = analyzer()
            .create_clusters(&docs, ClusteringStrategy::ProjectBased, 10, 2)
            .unwrap();
        assert_eq!(clusters.len(), 2);
        for cluster in &clusters {
            assert_eq!(cluster.len(), 5);
            let projects: std::collections::HashSet<&str> = docs
                .iter()
                .filter(|d| cluster.documents.contains(&d.key()))
                .filter_map(|d| d.project_id.as_deref())
                .collect();
            assert_eq!(projects.len(), 1);
        }
        assert_eq!(clusters[0].id, "cluster_1");
    }

    #[test]
    fn test_small_buckets_discarded() {
        let docs = vec![doc("1", "alpha"), doc("2", "alpha"), doc("3", "beta")];
        let clusters = analyzer()
            .create_clusters(&docs, ClusteringStrategy::ProjectBased, 10, 2)
            .unwrap();
        assert_eq!(clusters.len(), 1);

        let singletons = analyzer()
            .create_clusters(&docs, ClusteringStrategy::ProjectBased, 10, 0)
            .unwrap();
        assert_eq!(singletons.len(), 2);
        assert_eq!(singletons[1].coherence_score, 1.0);
    }

    #[test]
    fn test_truncates_to_max_clusters() {
        let docs: Vec<Document> = (0..6).map(|i| doc(&i.to_string(), &format!("p{}", i % 3))).collect();
        let clusters = analyzer()
            .create_clusters(&docs, ClusteringStrategy::ProjectBased, 2, 2)
            .unwrap();
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_entity_based_uses_most_frequent_term() {
        let docs = vec![
            Document::new("1", "A", "jira").with_entities(["OAuth", "Redis"]),
            Document::new("2", "B", "jira").with_entities(["oauth"]),
            Document::new("3", "C", "jira").with_entities(["oauth", "Postgres"]),
        ];
        let clusters = analyzer()
            .create_clusters(&docs, ClusteringStrategy::EntityBased, 5, 2)
            .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
        assert_eq!(clusters[0].name, "Oauth");
        assert_eq!(clusters[0].shared_entities, vec!["oauth".to_string()]);
    }

    #[test]
    fn test_hierarchical_groups_by_parent() {
        let docs = vec![
            Document::new("1", "Install", "confluence").with_hierarchy(Hierarchy::under("Getting Started")),
            Document::new("2", "Configure", "confluence").with_hierarchy(Hierarchy::under("getting started")),
            Document::new("3", "Orphan", "confluence"),
        ];
        let report = analyzer()
            .create_clusters_with_report(&docs, ClusteringStrategy::Hierarchical, 5, 2)
            .unwrap();
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].name, "Getting Started");
        assert_eq!(report.unclustered_documents, vec!["confluence:Orphan".to_string()]);
    }

    #[test]
    fn test_mixed_features_groups_similar_text() {
        let docs = vec![
            Document::new("1", "Auth A", "web").with_text("oauth token refresh flow for login"),
            Document::new("2", "Auth B", "web").with_text("oauth token refresh flow for signup"),
            Document::new("3", "Cooking", "web").with_text("bake bread with flour and yeast"),
        ];
        let clusters = analyzer()
            .create_clusters(&docs, ClusteringStrategy::MixedFeatures, 5, 2)
            .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].documents, vec!["web:Auth A".to_string(), "web:Auth B".to_string()]);
        assert!(!clusters[0].name.is_empty());
    }

    #[test]
    fn test_adaptive_prefers_projects() {
        let docs = vec![doc("1", "a"), doc("2", "a"), doc("3", "b"), doc("4", "b")];
        assert_eq!(select_adaptive_strategy(&docs), ClusteringStrategy::ProjectBased);
        let report = analyzer()
            .create_clusters_with_report(&docs, ClusteringStrategy::Adaptive, 5, 2)
            .unwrap();
        assert_eq!(report.strategy_used, ClusteringStrategy::ProjectBased);
    }

    #[test]
    fn test_adaptive_falls_back_to_mixed() {
        let docs = vec![Document::new("1", "A", "web"), Document::new("2", "B", "web")];
        assert_eq!(select_adaptive_strategy(&docs), ClusteringStrategy::MixedFeatures);
    }

    #[test]
    fn test_adaptive_picks_best_covered_signal() {
        let docs = vec![
            Document::new("1", "A", "web").with_topics(["x"]).with_entities(["e"]),
            Document::new("2", "B", "web").with_topics(["x"]),
            Document::new("3", "C", "web").with_topics(["y"]),
        ];
        assert_eq!(select_adaptive_strategy(&docs), ClusteringStrategy::TopicBased);
    }

    #[test]
    fn test_coherence_singleton_and_stale() {
        let a = analyzer();
        let docs = vec![doc("1", "a")];
        let mut cluster = DocumentCluster {
            id: "cluster_1".into(),
            name: "x".into(),
            documents: vec![docs[0].key()],
            coherence_score: 0.0,
            shared_entities: vec![],
            shared_topics: vec![],
            keywords: vec![],
            summary: String::new(),
            representative: None,
        };
        assert_eq!(a.calculate_cluster_coherence(&cluster, &docs), 1.0);

        cluster.documents = vec!["jira:Gone".into(), "jira:Missing".into()];
        assert_eq!(a.calculate_cluster_coherence(&cluster, &docs), 0.0);
    }

    #[test]
    fn test_unnamed_clusters_get_distinct_fallbacks() {
        let docs = vec![doc("1", "_"), doc("2", "_"), doc("3", "__"), doc("4", "__")];
        let clusters = analyzer()
            .create_clusters(&docs, ClusteringStrategy::ProjectBased, 10, 2)
            .unwrap();
        let names: Vec<&str> = clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Project Cluster 1", "Project Cluster 2"]);
    }

    #[test]
    fn test_hierarchical_ignores_blank_parent_id() {
        let blank_id = Hierarchy {
            parent_id: Some(" ".into()),
            parent_title: Some("Billing".into()),
            ..Default::default()
        };
        let docs = vec![
            Document::new("1", "Invoices", "confluence").with_hierarchy(blank_id),
            Document::new("2", "Refunds", "confluence").with_hierarchy(Hierarchy::under("Billing")),
        ];
        assert!(docs[0].is_sibling_of(&docs[1]));
        let clusters = analyzer()
            .create_clusters(&docs, ClusteringStrategy::Hierarchical, 5, 2)
            .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
    }

    #[test]
    fn test_generate_name_fallback_and_cap() {
        assert_eq!(
            generate_cluster_name(ClusteringStrategy::TopicBased, &[], 3),
            "Topic Cluster 3"
        );
        let long = vec!["a".repeat(200), "b".repeat(10)];
        let name = generate_cluster_name(ClusteringStrategy::EntityBased, &long, 1);
        assert!(!name.is_empty());
        assert!(name.chars().count() <= MAX_NAME_LEN);

        let repeated = vec!["auth".to_string(); 50];
        assert_eq!(generate_cluster_name(ClusteringStrategy::EntityBased, &repeated, 1), "Auth");

        let pair = vec!["api_gateway".to_string(), "JWT".to_string(), "  ".to_string()];
        assert_eq!(generate_cluster_name(ClusteringStrategy::EntityBased, &pair, 1), "Api Gateway & JWT");
    }

    #[test]
    fn test_clean_topic_name() {
        assert_eq!(clean_topic_name("  machine_learning "), "Machine Learning");
        assert_eq!(clean_topic_name("API design"), "API Design");
        assert_eq!(clean_topic_name("mIxEd"), "Mixed");
        assert_eq!(clean_topic_name(""), "");
    }
}
