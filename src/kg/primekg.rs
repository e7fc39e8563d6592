//! Building a patient-sized subgraph out of the PrimeKG release.
//!
//! PrimeKG ships as `nodes.csv` and `edges.csv`, linked by `node_index`. We select seed nodes by
//! keyword, keep everything within a few hops of them, and convert the result into a
//! [`KnowledgeGraph`] that patients can be linked into.
use qu::ick_use::*;
use regex::RegexBuilder;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    path::Path,
};

use crate::{
    kg::{KnowledgeGraph, Node, Value},
    ArcStr,
};

/// A row in `nodes.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimeNode {
    pub node_index: u64,
    pub node_id: ArcStr,
    pub node_type: ArcStr,
    pub node_name: ArcStr,
    pub node_source: ArcStr,
}

/// A row in `edges.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimeEdge {
    pub relation: ArcStr,
    pub display_relation: ArcStr,
    pub x_index: u64,
    pub y_index: u64,
}

/// PrimeKG (or a subgraph of it) held in memory.
#[derive(Debug, Clone, Default)]
pub struct PrimeKg {
    pub nodes: Vec<PrimeNode>,
    pub edges: Vec<PrimeEdge>,
}

impl PrimeKg {
    /// Load `nodes.csv` and `edges.csv` from a PrimeKG directory.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let nodes: Vec<PrimeNode> = load_csv(&dir.join("nodes.csv"))?;
        let edges: Vec<PrimeEdge> = load_csv(&dir.join("edges.csv"))?;
        event!(
            Level::INFO,
            "Loaded PrimeKG with {} nodes and {} edges",
            nodes.len(),
            edges.len()
        );
        Ok(Self { nodes, edges })
    }

    /// Save as `subgraph_nodes.csv` and `subgraph_edges.csv` in `out_dir`.
    pub fn save(&self, out_dir: impl AsRef<Path>) -> Result {
        let out_dir = out_dir.as_ref();
        save_csv(&self.nodes, &out_dir.join("subgraph_nodes.csv"))?;
        save_csv(&self.edges, &out_dir.join("subgraph_edges.csv"))?;
        Ok(())
    }

    /// `node_index`es of nodes whose name contains any of the keywords, ignoring case.
    pub fn nodes_matching_keywords<S: AsRef<str>>(&self, keywords: &[S]) -> Result<Vec<u64>> {
        ensure!(!keywords.is_empty(), "no keywords given");
        let pattern = keywords
            .iter()
            .map(|kw| regex::escape(kw.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        let matcher = RegexBuilder::new(&pattern).case_insensitive(true).build()?;
        Ok(self
            .nodes
            .iter()
            .filter(|node| matcher.is_match(&node.node_name))
            .map(|node| node.node_index)
            .collect())
    }

    /// All nodes at most `max_distance` hops away from any start node, treating edges as
    /// undirected. Start nodes are included. Edges referring to unknown nodes are ignored.
    pub fn nodes_within_distance(&self, start: &[u64], max_distance: usize) -> BTreeSet<u64> {
        let pos: BTreeMap<u64, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(pos, node)| (node.node_index, pos))
            .collect();
        let mut adjacency = vec![vec![]; self.nodes.len()];
        for edge in &self.edges {
            if let (Some(&x), Some(&y)) = (pos.get(&edge.x_index), pos.get(&edge.y_index)) {
                adjacency[x].push(y);
                adjacency[y].push(x);
            }
        }

        let mut dist = vec![usize::MAX; self.nodes.len()];
        let mut queue = VecDeque::new();
        for idx in start.iter().filter_map(|idx| pos.get(idx)) {
            if dist[*idx] != 0 {
                dist[*idx] = 0;
                queue.push_back(*idx);
            }
        }
        while let Some(current) = queue.pop_front() {
            if dist[current] == max_distance {
                continue;
            }
            for &next in &adjacency[current] {
                if dist[next] == usize::MAX {
                    dist[next] = dist[current] + 1;
                    queue.push_back(next);
                }
            }
        }

        dist.iter()
            .enumerate()
            .filter(|(_, d)| **d != usize::MAX)
            .map(|(pos, _)| self.nodes[pos].node_index)
            .collect()
    }

    /// Keep the given nodes and the edges with both ends among them.
    pub fn subset(&self, keep: &BTreeSet<u64>) -> Self {
        Self {
            nodes: self
                .nodes
                .iter()
                .filter(|node| keep.contains(&node.node_index))
                .cloned()
                .collect(),
            edges: self
                .edges
                .iter()
                .filter(|edge| keep.contains(&edge.x_index) && keep.contains(&edge.y_index))
                .cloned()
                .collect(),
        }
    }

    /// Convert to a [`KnowledgeGraph`] keyed by node name, with at most one edge per node pair.
    ///
    /// PrimeKG names are not unique across sources; later nodes with an already used name are
    /// merged into the first one.
    pub fn to_knowledge_graph(&self) -> Result<KnowledgeGraph> {
        let mut kg = KnowledgeGraph::new(false);
        let mut pos = BTreeMap::new();
        let mut merged = 0usize;
        for node in &self.nodes {
            let idx = match kg.find_by_key(&node.node_name) {
                Some(idx) => {
                    merged += 1;
                    idx
                }
                None => {
                    let mut kg_node =
                        Node::new(node.node_name.clone(), Some(node.node_type.clone()));
                    kg_node
                        .attrs
                        .insert("node_id".into(), Value::Str(node.node_id.clone()));
                    kg_node
                        .attrs
                        .insert("node_source".into(), Value::Str(node.node_source.clone()));
                    kg.add_node(kg_node)?
                }
            };
            pos.insert(node.node_index, idx);
        }
        if merged > 0 {
            event!(
                Level::WARN,
                "merged {} PrimeKG nodes sharing a name with an earlier node",
                merged
            );
        }
        // PrimeKG lists each relation in both directions, and several relations can join the
        // same pair; the graph keeps one undirected edge per pair.
        let mut seen = BTreeSet::new();
        for edge in &self.edges {
            if let (Some(&x), Some(&y)) = (pos.get(&edge.x_index), pos.get(&edge.y_index)) {
                if seen.insert((x.min(y), x.max(y))) {
                    kg.add_edge(x, y)?;
                }
            }
        }
        event!(
            Level::DEBUG,
            "{} PrimeKG edges became {} graph edges",
            self.edges.len(),
            kg.edge_count()
        );
        Ok(kg)
    }
}

fn load_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .and_then(|rdr| rdr.into_deserialize().collect::<Result<Vec<T>, _>>())
        .with_context(|| format!("while loading \"{}\"", path.display()))
}

fn save_csv<T: Serialize>(rows: &[T], path: &Path) -> Result {
    fn inner<T: Serialize>(rows: &[T], path: &Path) -> Result {
        let mut writer = csv::Writer::from_writer(crate::create_output(path)?);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
    inner(rows, path).with_context(|| format!("writing \"{}\"", path.display()))
}

#[cfg(test)]
mod test {
    use super::*;

    fn node(idx: u64, ty: &str, name: &str) -> PrimeNode {
        PrimeNode {
            node_index: idx,
            node_id: idx.to_string().into(),
            node_type: ty.into(),
            node_name: name.into(),
            node_source: "test".into(),
        }
    }

    fn edge(x: u64, y: u64) -> PrimeEdge {
        PrimeEdge {
            relation: "rel".into(),
            display_relation: "rel".into(),
            x_index: x,
            y_index: y,
        }
    }

    /// A path 0 - 1 - 2 - 3, plus an isolated node 4 and an edge to a missing node.
    fn chain() -> PrimeKg {
        PrimeKg {
            nodes: vec![
                node(0, "disease", "Marfan syndrome"),
                node(1, "gene/protein", "FBN1"),
                node(2, "disease", "aortic aneurysm"),
                node(3, "gene/protein", "TGFBR2"),
                node(4, "disease", "MARFANOID habitus"),
            ],
            edges: vec![edge(0, 1), edge(2, 1), edge(3, 2), edge(3, 99)],
        }
    }

    #[test]
    fn keywords() {
        let kg = chain();
        assert_eq!(kg.nodes_matching_keywords(&["marfan"]).unwrap(), vec![0, 4]);
        assert_eq!(kg.nodes_matching_keywords(&["fbn1", "aneurysm"]).unwrap(), vec![1, 2]);
        assert!(kg.nodes_matching_keywords::<&str>(&[]).is_err());
    }

    #[test]
    fn neighbourhood() {
        let kg = chain();
        assert_eq!(kg.nodes_within_distance(&[0], 0), BTreeSet::from([0]));
        assert_eq!(kg.nodes_within_distance(&[0], 2), BTreeSet::from([0, 1, 2]));
        assert_eq!(kg.nodes_within_distance(&[0, 4], 1), BTreeSet::from([0, 1, 4]));
    }

    #[test]
    fn subgraph() {
        let kg = chain();
        let sub = kg.subset(&BTreeSet::from([1, 2, 3]));
        assert_eq!(sub.nodes.len(), 3);
        assert_eq!(sub.edges, vec![edge(2, 1), edge(3, 2)]);

        let graph = sub.to_knowledge_graph().unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edges(), &[(1, 0), (2, 1)]);
        assert_eq!(graph.gene_nodes().count(), 2);
    }

    #[test]
    fn both_directions_make_one_edge() {
        let kg = PrimeKg {
            nodes: vec![node(0, "gene/protein", "FBN1"), node(1, "disease", "Marfan syndrome")],
            edges: vec![edge(0, 1), edge(1, 0), edge(0, 1)],
        };
        let graph = kg.to_knowledge_graph().unwrap();
        assert_eq!(graph.edges(), &[(0, 1)]);
        assert!(!graph.is_multigraph());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subgraph.gml");
        graph.save_gml(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("multigraph"));
        assert_eq!(text.matches("edge [").count(), 1);
    }

    #[test]
    fn save_load() {
        let dir = tempfile::tempdir().unwrap();
        let kg = chain();
        kg.save(dir.path()).unwrap();
        std::fs::rename(
            dir.path().join("subgraph_nodes.csv"),
            dir.path().join("nodes.csv"),
        )
        .unwrap();
        std::fs::rename(
            dir.path().join("subgraph_edges.csv"),
            dir.path().join("edges.csv"),
        )
        .unwrap();
        let again = PrimeKg::load(dir.path()).unwrap();
        assert_eq!(again.nodes, kg.nodes);
        assert_eq!(again.edges, kg.edges);
    }
}
