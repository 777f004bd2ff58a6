//! Document retrieval for the tool layer.
//!
//! The intelligence engine starts from an already-retrieved, already-scored
//! list of documents. [`Retriever`] is the seam that produces that list; the
//! bundled [`CorpusRetriever`] serves a directory of JSON documents held in
//! memory.
//!
//! # Corpus format
//!
//! Each matching file holds either one document object or an array of them:
//!
//! ```json
//! [{ "id": "auth-1", "title": "OAuth Setup", "source_type": "confluence",
//!    "project_id": "auth", "text": "...", "entities": ["OAuth"] }]
//! ```
//!
//! # Scoring
//!
//! Query terms are matched against titles (weight 2) and bodies (weight 1),
//! then min-max normalized to `[0.0, 1.0]` across the matching documents.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::Document;
use crate::nlp::tokenize;

/// Search parameters shared by every tool that retrieves documents.
#[derive(Debug, Clone, Default)]
pub struct RetrievalQuery {
    pub query: String,
    pub limit: usize,
    pub source_types: Vec<String>,
    pub project_ids: Vec<String>,
}

impl RetrievalQuery {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            ..Default::default()
        }
    }
}

/// Source of scored documents.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Documents matching the query, best first, each with a score in `[0.0, 1.0]`.
    async fn search(&self, query: &RetrievalQuery) -> Result<Vec<Document>>;

    /// Look up one document by id.
    async fn get(&self, id: &str) -> Result<Option<Document>>;
}

/// In-memory retriever over a loaded document corpus.
#[derive(Debug, Default)]
pub struct CorpusRetriever {
    documents: Vec<Document>,
}

impl CorpusRetriever {
    pub fn from_documents(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Walk the corpus root and parse every file matching the include globs.
    pub fn load(config: &CorpusConfig) -> Result<Self> {
        let root = &config.root;
        if !root.exists() {
            bail!("Corpus root does not exist: {}", root.display());
        }

        let include_set = build_globset(&config.include_globs)?;
        let mut excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
        excludes.extend(config.exclude_globs.clone());
        let exclude_set = build_globset(&excludes)?;

        let mut documents = Vec::new();
        for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel = path.strip_prefix(root).unwrap_or(path).to_string_lossy().to_string();
            if exclude_set.is_match(&rel) || !include_set.is_match(&rel) {
                continue;
            }

            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
            match parse_documents(&content) {
                Ok(docs) => documents.extend(docs),
                Err(e) => tracing::warn!(file = %rel, %e, "skipping unreadable corpus file"),
            }
        }

        documents.sort_by(|a, b| a.id.cmp(&b.id));
        let before = documents.len();
        documents.dedup_by(|a, b| a.id == b.id);
        if documents.len() != before {
            tracing::warn!(duplicates = before - documents.len(), "dropped documents with duplicate ids");
        }

        tracing::info!(root = %root.display(), documents = documents.len(), "loaded corpus");
        Ok(Self { documents })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Document counts per source type.
    pub fn source_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for doc in &self.documents {
            *counts.entry(doc.source_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn matches_filters(doc: &Document, query: &RetrievalQuery) -> bool {
        let source_ok = query.source_types.is_empty()
            || query
                .source_types
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&doc.source_type));
        let project_ok = query.project_ids.is_empty()
            || doc
                .project_id
                .as_deref()
                .map(|p| query.project_ids.iter().any(|q| q == p))
                .unwrap_or(false);
        source_ok && project_ok
    }
}

#[async_trait]
impl Retriever for CorpusRetriever {
    async fn search(&self, query: &RetrievalQuery) -> Result<Vec<Document>> {
        let terms: Vec<String> = tokenize(&query.query);
        if terms.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let candidates: Vec<(&Document, f64)> = self
            .documents
            .iter()
            .filter(|d| Self::matches_filters(d, query))
            .map(|d| (d, keyword_score(d, &terms)))
            .filter(|(_, raw)| *raw > 0.0)
            .collect();

        let mut results: Vec<Document> = normalize_scores(&candidates)
            .into_iter()
            .map(|(doc, score)| {
                let mut doc = doc.clone();
                doc.score = score;
                doc
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(query.limit);
        Ok(results)
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.iter().find(|d| d.id == id).cloned())
    }
}

fn parse_documents(content: &str) -> Result<Vec<Document>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.is_array() {
        Ok(serde_json::from_value(value)?)
    } else {
        Ok(vec![serde_json::from_value(value)?])
    }
}

fn keyword_score(doc: &Document, terms: &[String]) -> f64 {
    let title = tokenize(&doc.title);
    let body = tokenize(doc.text());
    terms
        .iter()
        .map(|t| {
            let in_title = title.iter().filter(|w| *w == t).count() as f64;
            let in_body = body.iter().filter(|w| *w == t).count() as f64;
            2.0 * in_title + in_body
        })
        .sum()
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// When every candidate has the same raw score, all normalize to `1.0`.
fn normalize_scores<'a>(candidates: &[(&'a Document, f64)]) -> Vec<(&'a Document, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let s_max = candidates.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|(doc, raw)| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (raw - s_min) / (s_max - s_min)
            };
            (*doc, norm)
        })
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn retriever() -> CorpusRetriever {
        CorpusRetriever::from_documents(vec![
            Document::new("1", "OAuth Setup", "confluence")
                .with_project("auth")
                .with_text("Configure oauth clients"),
            Document::new("2", "Token refresh bug", "jira")
                .with_project("auth")
                .with_text("oauth token refresh fails"),
            Document::new("3", "Billing overview", "confluence")
                .with_project("billing")
                .with_text("Invoices and payments"),
        ])
    }

    #[tokio::test]
    async fn test_search_scores_and_orders() {
        let results = retriever().search(&RetrievalQuery::new("oauth", 10)).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "1");
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[1].score, 0.0);
    }

    #[tokio::test]
    async fn test_search_filters() {
        let query = RetrievalQuery {
            query: "oauth".into(),
            limit: 10,
            source_types: vec!["JIRA".into()],
            project_ids: vec![],
        };
        let results = retriever().search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "2");

        let query = RetrievalQuery {
            query: "overview oauth".into(),
            limit: 10,
            source_types: vec![],
            project_ids: vec!["billing".into()],
        };
        let results = retriever().search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "3");
    }

    #[tokio::test]
    async fn test_empty_query_and_get() {
        let r = retriever();
        assert!(r.search(&RetrievalQuery::new("  ", 10)).await.unwrap().is_empty());
        assert_eq!(r.get("3").await.unwrap().map(|d| d.title), Some("Billing overview".to_string()));
        assert!(r.get("nope").await.unwrap().is_none());
    }

    #[test]
    fn test_load_corpus_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("docs.json"),
            r#"[{"id": "a", "title": "A", "source_type": "git"}, {"id": "b", "title": "B", "source_type": "jira"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("single.json"),
            r#"{"id": "c", "title": "C", "source_type": "git"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let config = CorpusConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let r = CorpusRetriever::load(&config).unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r.source_counts().get("git"), Some(&2));
    }

    #[test]
    fn test_load_missing_root_fails() {
        let config = CorpusConfig {
            root: PathBuf::from("/definitely/not/here"),
            ..Default::default()
        };
        assert!(CorpusRetriever::load(&config).is_err());
    }
}
