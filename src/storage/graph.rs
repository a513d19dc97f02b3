//! GraphStore capability (spec §4.1)
//!
//! Backs session→memory and file→memory relations, plus the `sibling_of`
//! edge recorded between near-duplicate memories (spec §8 scenario 2).

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub labels: Vec<String>,
    pub props: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub src: String,
    pub dst: String,
    pub edge_type: String,
    pub props: serde_json::Value,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn merge_node(&self, id: &str, labels: Vec<String>, props: serde_json::Value) -> Result<()>;
    async fn merge_edge(
        &self,
        src: &str,
        dst: &str,
        edge_type: &str,
        props: serde_json::Value,
    ) -> Result<()>;
    async fn neighborhood(
        &self,
        id: &str,
        depth: usize,
        edge_type: Option<&str>,
    ) -> Result<(Vec<GraphNode>, Vec<GraphEdge>)>;
    async fn delete_node(&self, id: &str, cascade: bool) -> Result<()>;
    /// Cheap liveness probe for the `Health` operation (spec §6).
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: DashMap<String, GraphNode>,
    // adjacency keyed by src, values are (dst, edge_type) pairs
    edges: DashMap<String, Vec<GraphEdge>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn merge_node(&self, id: &str, labels: Vec<String>, props: serde_json::Value) -> Result<()> {
        self.nodes
            .entry(id.to_string())
            .and_modify(|node| {
                for label in &labels {
                    if !node.labels.contains(label) {
                        node.labels.push(label.clone());
                    }
                }
                node.props = props.clone();
            })
            .or_insert_with(|| GraphNode {
                id: id.to_string(),
                labels,
                props,
            });
        Ok(())
    }

    async fn merge_edge(
        &self,
        src: &str,
        dst: &str,
        edge_type: &str,
        props: serde_json::Value,
    ) -> Result<()> {
        let mut edges = self.edges.entry(src.to_string()).or_default();
        if let Some(existing) = edges
            .iter_mut()
            .find(|e| e.dst == dst && e.edge_type == edge_type)
        {
            existing.props = props;
        } else {
            edges.push(GraphEdge {
                src: src.to_string(),
                dst: dst.to_string(),
                edge_type: edge_type.to_string(),
                props,
            });
        }
        Ok(())
    }

    async fn neighborhood(
        &self,
        id: &str,
        depth: usize,
        edge_type: Option<&str>,
    ) -> Result<(Vec<GraphNode>, Vec<GraphEdge>)> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![id.to_string()];
        let mut out_edges = Vec::new();
        visited.insert(id.to_string());

        for _ in 0..depth {
            let mut next_frontier = Vec::new();
            for node_id in &frontier {
                let Some(edges) = self.edges.get(node_id) else {
                    continue;
                };
                for edge in edges.iter() {
                    if let Some(wanted) = edge_type {
                        if edge.edge_type != wanted {
                            continue;
                        }
                    }
                    out_edges.push(edge.clone());
                    if visited.insert(edge.dst.clone()) {
                        next_frontier.push(edge.dst.clone());
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        let nodes = visited
            .iter()
            .filter_map(|node_id| self.nodes.get(node_id).map(|n| n.value().clone()))
            .collect();

        Ok((nodes, out_edges))
    }

    async fn delete_node(&self, id: &str, cascade: bool) -> Result<()> {
        self.nodes.remove(id);
        self.edges.remove(id);
        if cascade {
            for mut entry in self.edges.iter_mut() {
                entry.value_mut().retain(|edge| edge.dst != id);
            }
        }
        Ok(())
    }
}
