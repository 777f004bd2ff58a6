//! Citation network over a result set.
//!
//! Nodes are documents, stored in an arena and addressed by index. Edges are
//! directed index pairs:
//!
//! | Kind | Direction | Weight |
//! |------|-----------|--------|
//! | `reference` | citing → cited | 1.0 |
//! | `parent` | child → parent | 0.8 |
//! | `sibling` | both directions | 0.5 |
//!
//! Only relations that resolve inside the set produce edges. An ordered pair
//! carries at most one edge; references take precedence over hierarchy.

use serde::Serialize;
use std::collections::HashSet;

use crate::models::{CrossReference, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Reference,
    Parent,
    Sibling,
}

impl EdgeKind {
    pub fn weight(&self) -> f64 {
        match self {
            EdgeKind::Reference => 1.0,
            EdgeKind::Parent => 0.8,
            EdgeKind::Sibling => 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CitationNode {
    pub id: String,
    pub title: String,
    pub source_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CitationEdge {
    pub source: usize,
    pub target: usize,
    pub kind: EdgeKind,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CitationNetwork {
    pub nodes: Vec<CitationNode>,
    pub edges: Vec<CitationEdge>,
}

/// One edge seen from a particular node.
#[derive(Debug, Clone, Serialize)]
pub struct CitationLink {
    pub id: String,
    pub title: String,
    /// `"outbound"` when the node is the edge source, else `"inbound"`.
    pub direction: &'static str,
    pub kind: EdgeKind,
    pub weight: f64,
}

/// A node and its ranking score.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRanking {
    pub id: String,
    pub title: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub reference_edges: usize,
    pub parent_edges: usize,
    pub sibling_edges: usize,
    /// Edges over possible ordered pairs, `0.0` below two nodes.
    pub density: f64,
    pub isolated_nodes: Vec<String>,
}

impl CitationNetwork {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Sum of inbound edge weights for a node.
    pub fn inbound_weight(&self, node: usize) -> f64 {
        self.edges
            .iter()
            .filter(|e| e.target == node)
            .map(|e| e.weight)
            .sum()
    }

    /// Number of edges touching a node in either direction.
    pub fn degree(&self, node: usize) -> usize {
        self.edges
            .iter()
            .filter(|e| e.source == node || e.target == node)
            .count()
    }

    /// Edges leaving or entering a node.
    pub fn edges_of(&self, node: usize) -> impl Iterator<Item = &CitationEdge> {
        self.edges
            .iter()
            .filter(move |e| e.source == node || e.target == node)
    }

    /// Every edge touching the node with document id `id`, as seen from it.
    /// Unknown ids yield no links.
    pub fn links_of(&self, id: &str) -> Vec<CitationLink> {
        let Some(node) = self.index_of(id) else {
            return Vec::new();
        };
        self.edges_of(node)
            .map(|e| {
                let (other, direction) = if e.source == node {
                    (e.target, "outbound")
                } else {
                    (e.source, "inbound")
                };
                CitationLink {
                    id: self.nodes[other].id.clone(),
                    title: self.nodes[other].title.clone(),
                    direction,
                    kind: e.kind,
                    weight: e.weight,
                }
            })
            .collect()
    }

    pub fn stats(&self) -> NetworkStats {
        let n = self.nodes.len();
        let count = |kind: EdgeKind| self.edges.iter().filter(|e| e.kind == kind).count();
        let density = if n < 2 {
            0.0
        } else {
            self.edges.len() as f64 / (n * (n - 1)) as f64
        };
        NetworkStats {
            node_count: n,
            edge_count: self.edges.len(),
            reference_edges: count(EdgeKind::Reference),
            parent_edges: count(EdgeKind::Parent),
            sibling_edges: count(EdgeKind::Sibling),
            density,
            isolated_nodes: (0..n)
                .filter(|&i| self.degree(i) == 0)
                .map(|i| self.nodes[i].id.clone())
                .collect(),
        }
    }

    fn add_edge(&mut self, seen: &mut HashSet<(usize, usize)>, source: usize, target: usize, kind: EdgeKind) {
        if source == target || !seen.insert((source, target)) {
            return;
        }
        self.edges.push(CitationEdge {
            source,
            target,
            kind,
            weight: kind.weight(),
        });
    }
}

pub fn build_citation_network(documents: &[Document]) -> CitationNetwork {
    let mut network = CitationNetwork {
        nodes: documents
            .iter()
            .map(|d| CitationNode {
                id: d.id.clone(),
                title: d.title.clone(),
                source_type: d.source_type.clone(),
            })
            .collect(),
        edges: Vec::new(),
    };
    let mut seen = HashSet::new();

    for (i, doc) in documents.iter().enumerate() {
        for reference in doc.cross_references.as_deref().unwrap_or_default() {
            if let Some(j) = find_referenced_document(reference, documents, i) {
                network.add_edge(&mut seen, i, j, EdgeKind::Reference);
            }
        }
    }

    for i in 0..documents.len() {
        if let Some(p) = find_parent_document(documents, i) {
            network.add_edge(&mut seen, i, p, EdgeKind::Parent);
        }
    }

    for i in 0..documents.len() {
        for j in (i + 1)..documents.len() {
            if documents[i].is_sibling_of(&documents[j]) {
                network.add_edge(&mut seen, i, j, EdgeKind::Sibling);
                network.add_edge(&mut seen, j, i, EdgeKind::Sibling);
            }
        }
    }

    tracing::debug!(
        nodes = network.nodes.len(),
        edges = network.edges.len(),
        "built citation network"
    );
    network
}

/// Index of the document a reference points to, excluding the citing
/// document itself.
pub fn find_referenced_document(reference: &CrossReference, documents: &[Document], citing: usize) -> Option<usize> {
    documents
        .iter()
        .enumerate()
        .find(|(j, d)| *j != citing && reference.resolves_to(d))
        .map(|(j, _)| j)
}

/// Index of the first other document sharing a parent with `documents[index]`.
pub fn find_sibling_document(documents: &[Document], index: usize) -> Option<usize> {
    let doc = documents.get(index)?;
    documents
        .iter()
        .enumerate()
        .find(|(j, d)| *j != index && doc.is_sibling_of(d))
        .map(|(j, _)| j)
}

/// Index of the document that `documents[index]` names as its parent.
pub fn find_parent_document(documents: &[Document], index: usize) -> Option<usize> {
    let doc = documents.get(index)?;
    documents
        .iter()
        .enumerate()
        .find(|(j, d)| *j != index && doc.is_child_of(d))
        .map(|(j, _)| j)
}

/// Nodes ranked by inbound edge weight. Nodes nobody points at are omitted.
pub fn get_most_authoritative_documents(network: &CitationNetwork, limit: usize) -> Vec<NodeRanking> {
    rank(network, limit, |n| network.inbound_weight(n))
}

/// Nodes ranked by total degree. Isolated nodes are omitted.
pub fn get_most_connected_documents(network: &CitationNetwork, limit: usize) -> Vec<NodeRanking> {
    rank(network, limit, |n| network.degree(n) as f64)
}

fn rank<F>(network: &CitationNetwork, limit: usize, score_of: F) -> Vec<NodeRanking>
where
    F: Fn(usize) -> f64,
{
    let mut ranked: Vec<(usize, f64)> = (0..network.nodes.len())
        .map(|i| (i, score_of(i)))
        .filter(|(_, s)| *s > 0.0)
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
        .into_iter()
        .take(limit)
        .map(|(i, score)| NodeRanking {
            id: network.nodes[i].id.clone(),
            title: network.nodes[i].title.clone(),
            score,
        })
        .collect()
}
