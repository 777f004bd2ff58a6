//! Bounded memory of documents and clusters returned by earlier tool calls.
//!
//! `expand_cluster` and `expand_document` page through results that a
//! previous call produced. Entries are evicted oldest-first once the
//! capacity is reached.

use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::cluster::DocumentCluster;
use crate::models::Document;

pub const DEFAULT_CAPACITY: usize = 1000;

/// A cluster together with its resolved member documents.
#[derive(Debug, Clone)]
pub struct CachedCluster {
    pub cluster: DocumentCluster,
    pub documents: Vec<Document>,
}

struct Bounded<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
    capacity: usize,
}

impl<V> Bounded<V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, key: String, value: V) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.entries.remove(&old);
            }
        }
    }
}

pub struct ExpansionCache {
    documents: RwLock<Bounded<Document>>,
    clusters: RwLock<Bounded<CachedCluster>>,
}

impl Default for ExpansionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ExpansionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            documents: RwLock::new(Bounded::new(capacity)),
            clusters: RwLock::new(Bounded::new(capacity)),
        }
    }

    pub async fn remember_documents(&self, docs: &[Document]) {
        let mut guard = self.documents.write().await;
        for doc in docs {
            guard.insert(doc.id.clone(), doc.clone());
        }
    }

    pub async fn remember_cluster(&self, cluster: DocumentCluster, documents: Vec<Document>) {
        self.remember_documents(&documents).await;
        let mut guard = self.clusters.write().await;
        guard.insert(cluster.id.clone(), CachedCluster { cluster, documents });
    }

    pub async fn document(&self, id: &str) -> Option<Document> {
        self.documents.read().await.entries.get(id).cloned()
    }

    pub async fn cluster(&self, id: &str) -> Option<CachedCluster> {
        self.clusters.read().await.entries.get(id).cloned()
    }

    /// Every remembered document, oldest first.
    pub async fn documents(&self) -> Vec<Document> {
        let guard = self.documents.read().await;
        guard
            .order
            .iter()
            .filter_map(|id| guard.entries.get(id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: &str) -> DocumentCluster {
        DocumentCluster {
            id: id.to_string(),
            name: "Auth".to_string(),
            documents: vec!["jira:A".to_string()],
            coherence_score: 1.0,
            shared_entities: vec![],
            shared_topics: vec![],
            keywords: vec![],
            summary: String::new(),
            representative: None,
        }
    }

    #[tokio::test]
    async fn test_remember_and_lookup() {
        let cache = ExpansionCache::default();
        cache
            .remember_cluster(cluster("run1_cluster_1"), vec![Document::new("a", "A", "jira")])
            .await;
        assert!(cache.cluster("run1_cluster_1").await.is_some());
        assert_eq!(cache.document("a").await.map(|d| d.title), Some("A".to_string()));
        assert!(cache.cluster("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_evicts_oldest() {
        let cache = ExpansionCache::new(2);
        let docs: Vec<Document> = ["a", "b", "c"].iter().map(|id| Document::new(*id, *id, "web")).collect();
        cache.remember_documents(&docs).await;
        assert!(cache.document("a").await.is_none());
        assert!(cache.document("b").await.is_some());
        assert!(cache.document("c").await.is_some());
        let ids: Vec<String> = cache.documents().await.into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
