//! Edges as parallel integer arrays, the input format of the embedding trainer.
use qu::ick_use::*;

use crate::kg::{KnowledgeGraph, NodeMapping};

/// Every graph edge stored twice, once in each direction, so that training treats the graph as
/// undirected.
///
/// Parallel edges are kept: an edge that appears `k` times is `k` times as likely to be followed
/// during a random walk.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeIndex {
    pub src: Vec<usize>,
    pub dst: Vec<usize>,
    num_nodes: usize,
}

impl EdgeIndex {
    pub fn from_graph(kg: &KnowledgeGraph, mapping: &NodeMapping) -> Result<Self> {
        let id = |idx: usize| -> Result<usize> {
            let key = &kg
                .node(idx)
                .with_context(|| format!("edge refers to missing node {}", idx))?
                .key;
            mapping
                .id(key)
                .with_context(|| format!("node \"{}\" is not in the node mapping", key))
        };
        event!(
            Level::INFO,
            "building edge index for {} nodes and {} edges",
            mapping.len(),
            kg.edge_count()
        );

        let mut src = Vec::with_capacity(kg.edge_count() * 2);
        let mut dst = Vec::with_capacity(kg.edge_count() * 2);
        for &(from, to) in kg.edges() {
            let (from, to) = (id(from)?, id(to)?);
            src.push(from);
            dst.push(to);
            src.push(to);
            dst.push(from);
        }
        event!(Level::DEBUG, "edge index has {} entries", src.len());
        Ok(Self {
            src,
            dst,
            num_nodes: mapping.len(),
        })
    }

    /// Build directly from directed pairs, e.g. when the graph is already in index form.
    pub fn from_pairs(num_nodes: usize, pairs: impl IntoIterator<Item = (usize, usize)>) -> Result<Self> {
        let (src, dst): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        ensure!(
            src.iter().chain(dst.iter()).all(|&idx| idx < num_nodes),
            "edge index refers to a node outside 0..{}",
            num_nodes
        );
        Ok(Self {
            src,
            dst,
            num_nodes,
        })
    }

    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }

    /// Compressed sparse row view for walking.
    pub fn adjacency(&self) -> Adjacency {
        Adjacency::new(self)
    }
}

/// Neighbour lists in compressed sparse row form. Each node's neighbours are sorted, and
/// repeated once per parallel edge.
#[derive(Debug, Clone)]
pub struct Adjacency {
    /// Offsets into `targets`. Size = node count + 1
    offsets: Vec<usize>,
    targets: Vec<usize>,
}

impl Adjacency {
    fn new(edges: &EdgeIndex) -> Self {
        let n = edges.num_nodes;
        let mut offsets = vec![0; n + 1];
        for &src in &edges.src {
            offsets[src + 1] += 1;
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }

        let mut fill = offsets.clone();
        let mut targets = vec![0; edges.len()];
        for (src, dst) in edges.iter() {
            targets[fill[src]] = dst;
            fill[src] += 1;
        }
        for i in 0..n {
            targets[offsets[i]..offsets[i + 1]].sort_unstable();
        }
        Self { offsets, targets }
    }

    pub fn node_count(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn neighbors(&self, idx: usize) -> &[usize] {
        &self.targets[self.offsets[idx]..self.offsets[idx + 1]]
    }

    pub fn degree(&self, idx: usize) -> usize {
        self.offsets[idx + 1] - self.offsets[idx]
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.neighbors(from).binary_search(&to).is_ok()
    }
}
