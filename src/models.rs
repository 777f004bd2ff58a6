//! Core data models used throughout Context Intel.
//!
//! These types represent the retrieved documents that flow into the
//! intelligence engine. Documents are produced by a [`Retriever`](crate::retrieval::Retriever)
//! and are read-only to every analyzer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A retrieved, already-scored document.
///
/// Enrichment fields (`entities`, `topics`, `cross_references`, `hierarchy`)
/// are optional and tolerate loosely shaped input: see [`Tag`] and
/// [`CrossReference`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub source_type: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Retrieval relevance score in `[0.0, 1.0]`.
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub entities: Option<Vec<Tag>>,
    #[serde(default)]
    pub topics: Option<Vec<Tag>>,
    #[serde(default)]
    pub cross_references: Option<Vec<CrossReference>>,
    #[serde(default)]
    pub hierarchy: Option<Hierarchy>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Create a minimal document. Mostly useful for tests and connectors
    /// that fill in enrichment fields afterwards.
    pub fn new(id: impl Into<String>, title: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source_type: source_type.into(),
            source_url: None,
            project_id: None,
            author: None,
            text: None,
            score: 0.0,
            entities: None,
            topics: None,
            cross_references: None,
            hierarchy: None,
            updated_at: None,
        }
    }

    /// Composite key `"<source_type>:<title>"` used by the cluster analyzer.
    pub fn key(&self) -> String {
        format!("{}:{}", self.source_type, self.title)
    }

    /// Body text, or `""` when absent.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = Some(entities.into_iter().map(|e| Tag::Raw(e.into())).collect());
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = Some(topics.into_iter().map(|t| Tag::Raw(t.into())).collect());
        self
    }

    pub fn with_hierarchy(mut self, hierarchy: Hierarchy) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    pub fn with_references(mut self, refs: Vec<CrossReference>) -> Self {
        self.cross_references = Some(refs);
        self
    }

    /// Whether any of this document's cross-references resolves to `other`.
    pub fn references(&self, other: &Document) -> bool {
        self.id != other.id
            && self
                .cross_references
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|r| r.resolves_to(other))
    }

    /// Whether this document's hierarchy names `other` as its parent.
    pub fn is_child_of(&self, other: &Document) -> bool {
        let Some(h) = &self.hierarchy else {
            return false;
        };
        if self.id == other.id {
            return false;
        }
        if let Some(pid) = h.parent_id.as_deref() {
            if pid.trim() == other.id {
                return true;
            }
        }
        h.parent_title
            .as_deref()
            .map(|t| t.trim().eq_ignore_ascii_case(other.title.trim()))
            .unwrap_or(false)
    }

    /// Whether both documents sit directly under the same parent, matched by
    /// parent id when both carry one, else by parent title.
    pub fn is_sibling_of(&self, other: &Document) -> bool {
        if self.id == other.id {
            return false;
        }
        let (Some(a), Some(b)) = (&self.hierarchy, &other.hierarchy) else {
            return false;
        };
        let norm = |s: &str| s.trim().to_lowercase();
        match (a.parent_id.as_deref(), b.parent_id.as_deref()) {
            (Some(x), Some(y)) if !x.trim().is_empty() && !y.trim().is_empty() => {
                norm(x) == norm(y)
            }
            _ => match (a.parent_title.as_deref(), b.parent_title.as_deref()) {
                (Some(x), Some(y)) if !x.trim().is_empty() && !y.trim().is_empty() => {
                    norm(x) == norm(y)
                }
                _ => false,
            },
        }
    }
}

/// An entity or topic annotation.
///
/// Enrichment pipelines emit `{ "text": ..., "label": ... }` objects, bare
/// strings, or nulls interchangeably. Every JSON shape deserializes; shapes
/// that carry no usable text become [`Tag::Absent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Tag {
    Named { text: String, label: Option<String> },
    Raw(String),
    Absent,
}

impl Tag {
    /// Normalized text: trimmed and lower-cased. `None` when nothing remains.
    pub fn normalized(&self) -> Option<String> {
        let raw = match self {
            Tag::Named { text, .. } | Tag::Raw(text) => text,
            Tag::Absent => return None,
        };
        let norm = raw.trim().to_lowercase();
        if norm.is_empty() {
            None
        } else {
            Some(norm)
        }
    }
}

impl From<Value> for Tag {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Tag::Raw(s),
            Value::Object(map) => match map.get("text").and_then(|t| t.as_str()) {
                Some(text) => Tag::Named {
                    text: text.to_string(),
                    label: map
                        .get("label")
                        .and_then(|l| l.as_str())
                        .map(|l| l.to_string()),
                },
                None => Tag::Absent,
            },
            _ => Tag::Absent,
        }
    }
}

impl From<Tag> for Value {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::Named { text, label } => serde_json::json!({ "text": text, "label": label }),
            Tag::Raw(text) => Value::String(text),
            Tag::Absent => Value::Null,
        }
    }
}

/// An explicit link from one document to another.
///
/// A bare JSON string is read as a URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct CrossReference {
    pub url: Option<String>,
    pub target_id: Option<String>,
    pub text: Option<String>,
}

impl CrossReference {
    pub fn to_id(id: impl Into<String>) -> Self {
        Self {
            target_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn to_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn titled(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Match against a candidate by id, then URL, then title.
    pub fn resolves_to(&self, doc: &Document) -> bool {
        if let Some(id) = self.target_id.as_deref() {
            if id == doc.id {
                return true;
            }
        }
        if let (Some(url), Some(doc_url)) = (self.url.as_deref(), doc.source_url.as_deref()) {
            if url.trim_end_matches('/') == doc_url.trim_end_matches('/') {
                return true;
            }
        }
        match self.text.as_deref() {
            Some(text) if !doc.title.trim().is_empty() => {
                text.trim().eq_ignore_ascii_case(doc.title.trim())
            }
            _ => false,
        }
    }
}

impl From<Value> for CrossReference {
    fn from(value: Value) -> Self {
        let field = |map: &serde_json::Map<String, Value>, key: &str| {
            map.get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        match value {
            Value::String(s) if !s.trim().is_empty() => CrossReference::to_url(s.trim()),
            Value::Object(map) => CrossReference {
                url: field(&map, "url"),
                target_id: field(&map, "target_id").or_else(|| field(&map, "id")),
                text: field(&map, "text").or_else(|| field(&map, "title")),
            },
            _ => CrossReference::default(),
        }
    }
}

/// Position of a document inside its source's page tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub parent_title: Option<String>,
    #[serde(default)]
    pub depth: Option<u32>,
    /// Path from the root, segments separated by `" > "`.
    #[serde(default)]
    pub breadcrumb: Option<String>,
}

impl Hierarchy {
    pub fn under(parent_title: impl Into<String>) -> Self {
        Self {
            parent_title: Some(parent_title.into()),
            ..Default::default()
        }
    }

    /// Key identifying the parent, preferring a non-blank explicit id.
    pub fn parent_key(&self) -> Option<String> {
        let clean = |p: Option<&str>| p.map(|p| p.trim().to_lowercase()).filter(|p| !p.is_empty());
        clean(self.parent_id.as_deref()).or_else(|| clean(self.parent_title.as_deref()))
    }

    pub fn breadcrumb_segments(&self) -> Vec<String> {
        self.breadcrumb
            .as_deref()
            .map(|b| {
                b.split('>')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Short document descriptor embedded in analysis outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRef {
    pub id: String,
    pub title: String,
    pub source_type: String,
}

impl From<&Document> for DocumentRef {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            source_type: doc.source_type.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_accepts_mixed_shapes() {
        let tags: Vec<Tag> =
            serde_json::from_str(r#"[{"text": "OAuth", "label": "TECH"}, "Tokens", null, 42, {"label": "ORG"}]"#)
                .unwrap();
        assert_eq!(tags[0].normalized().as_deref(), Some("oauth"));
        assert_eq!(tags[1].normalized().as_deref(), Some("tokens"));
        assert_eq!(tags[2], Tag::Absent);
        assert_eq!(tags[3], Tag::Absent);
        assert_eq!(tags[4], Tag::Absent);
    }

    #[test]
    fn test_tag_blank_text_normalizes_to_none() {
        assert_eq!(Tag::Raw("   ".into()).normalized(), None);
    }

    #[test]
    fn test_cross_reference_from_string_and_object() {
        let refs: Vec<CrossReference> = serde_json::from_str(
            r#"["https://wiki/a", {"id": "doc-2", "title": "Setup"}, 7]"#,
        )
        .unwrap();
        assert_eq!(refs[0].url.as_deref(), Some("https://wiki/a"));
        assert_eq!(refs[1].target_id.as_deref(), Some("doc-2"));
        assert_eq!(refs[1].text.as_deref(), Some("Setup"));
        assert_eq!(refs[2], CrossReference::default());
    }

    #[test]
    fn test_document_key_and_defaults() {
        let doc: Document =
            serde_json::from_str(r#"{"id": "1", "title": "Auth", "source_type": "confluence"}"#).unwrap();
        assert_eq!(doc.key(), "confluence:Auth");
        assert_eq!(doc.text(), "");
        assert!(doc.entities.is_none());
    }

    #[test]
    fn test_references_and_hierarchy_relations() {
        let parent = Document::new("p", "Platform", "confluence");
        let a = Document::new("a", "Auth", "confluence")
            .with_hierarchy(Hierarchy::under("platform"))
            .with_references(vec![CrossReference::titled("Billing")]);
        let b = Document::new("b", "Billing", "confluence").with_hierarchy(Hierarchy {
            parent_id: Some("p".into()),
            parent_title: Some("Platform".into()),
            ..Default::default()
        });
        assert!(a.references(&b));
        assert!(!b.references(&a));
        assert!(a.is_child_of(&parent));
        assert!(b.is_child_of(&parent));
        assert!(!parent.is_child_of(&a));
        assert!(a.is_sibling_of(&b));
        assert!(b.is_sibling_of(&a));
        assert!(!a.is_sibling_of(&a));
    }

    #[test]
    fn test_hierarchy_breadcrumb_segments() {
        let h = Hierarchy {
            breadcrumb: Some("Eng > Platform >  Auth".into()),
            ..Default::default()
        };
        assert_eq!(h.breadcrumb_segments(), vec!["eng", "platform", "auth"]);
    }

    #[test]
    fn test_parent_key_skips_blank_id() {
        let blank_id = Hierarchy {
            parent_id: Some("  ".into()),
            parent_title: Some("Finance".into()),
            ..Default::default()
        };
        assert_eq!(blank_id.parent_key().as_deref(), Some("finance"));
        assert_eq!(Hierarchy::default().parent_key(), None);

        let a = Document::new("a", "Invoices", "confluence").with_hierarchy(blank_id.clone());
        let b = Document::new("b", "Reports", "confluence").with_hierarchy(Hierarchy::under("finance"));
        assert!(a.is_sibling_of(&b));
        assert_eq!(
            a.hierarchy.as_ref().and_then(Hierarchy::parent_key),
            b.hierarchy.as_ref().and_then(Hierarchy::parent_key)
        );
    }
}
