//! The biomedical knowledge graph that patients are linked into.
//!
//! Nodes are identified by an opaque string key (a gene symbol, an ICD-10 code, a PMBB ID, ...)
//! and carry a `type` attribute. Within a loaded graph each node also has a dense integer id,
//! which is its position in the file.

mod gml;
pub use gml::Value;
pub mod primekg;

use crate::{icd10, ArcStr, PatientId};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Deref,
    path::Path,
};

/// Node type of genes and their products.
pub const GENE_PROTEIN: &str = "gene/protein";
/// Node type of diseases.
pub const DISEASE: &str = "disease";
/// Node type used for patients when linking them into the graph.
pub const PATIENT: &str = "patient";

/// A node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub key: ArcStr,
    /// The `type` attribute, if present.
    pub node_type: Option<ArcStr>,
    /// All other attributes, apart from the GML `id` and `label`.
    pub attrs: BTreeMap<ArcStr, Value>,
}

impl Node {
    pub fn new(key: impl Into<ArcStr>, node_type: Option<ArcStr>) -> Self {
        Self {
            key: key.into(),
            node_type,
            attrs: BTreeMap::new(),
        }
    }

    /// Types are compared ignoring ASCII case.
    pub fn has_type(&self, ty: &str) -> bool {
        matches!(&self.node_type, Some(t) if t.eq_ignore_ascii_case(ty))
    }
}

/// The loaded graph, with an index on node keys.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    nodes: Vec<Node>,
    edges: Vec<(usize, usize)>,
    key_idx: BTreeMap<ArcStr, usize>,
    directed: bool,
    multigraph: bool,
}

impl KnowledgeGraph {
    pub fn new(directed: bool) -> Self {
        Self {
            directed,
            ..Self::default()
        }
    }

    /// Load a graph from a GML file (as written by networkx).
    pub fn load_gml(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<KnowledgeGraph> {
            let text = std::fs::read_to_string(path)?;
            gml::parse(&text)
        }
        let path = path.as_ref();
        let kg = inner(path)
            .with_context(|| format!("loading knowledge graph from \"{}\"", path.display()))?;
        event!(
            Level::INFO,
            "Loaded KG with {} nodes and {} edges",
            kg.node_count(),
            kg.edge_count()
        );
        Ok(kg)
    }

    /// Parse a graph from GML text.
    pub fn from_gml_str(text: &str) -> Result<Self> {
        gml::parse(text)
    }

    pub fn save_gml(&self, path: impl AsRef<Path>) -> Result {
        fn inner(this: &KnowledgeGraph, path: &Path) -> Result {
            let mut out = std::io::BufWriter::new(crate::create_output(path)?);
            gml::write(this, &mut out)?;
            Ok(())
        }
        let path = path.as_ref();
        inner(self, path)
            .with_context(|| format!("writing knowledge graph to \"{}\"", path.display()))
    }

    /// Add a node, returning its id. Keys must be unique.
    pub fn add_node(&mut self, node: Node) -> Result<usize> {
        ensure!(
            !self.key_idx.contains_key(&node.key),
            "duplicate node key \"{}\"",
            node.key
        );
        let idx = self.nodes.len();
        self.key_idx.insert(node.key.clone(), idx);
        self.nodes.push(node);
        Ok(idx)
    }

    /// Add an edge between two existing node ids.
    pub fn add_edge(&mut self, from: usize, to: usize) -> Result {
        let len = self.nodes.len();
        ensure!(
            from < len && to < len,
            "edge ({}, {}) refers to a node outside the graph (which has {} nodes)",
            from,
            to,
            len
        );
        self.edges.push((from, to));
        Ok(())
    }

    pub fn find_by_key(&self, key: &str) -> Option<usize> {
        self.key_idx.get(key).copied()
    }

    pub fn node(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx)
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// Mark the graph as allowing parallel edges (GML `multigraph 1`).
    pub fn set_multigraph(&mut self, multigraph: bool) {
        self.multigraph = multigraph;
    }

    /// Whether the graph was declared a multigraph or actually has parallel edges.
    pub fn is_multigraph(&self) -> bool {
        self.multigraph || self.has_parallel_edges()
    }

    /// Whether any node pair is joined more than once. In an undirected graph `(a, b)` and
    /// `(b, a)` are the same pair.
    pub fn has_parallel_edges(&self) -> bool {
        let mut seen = BTreeSet::new();
        !self.edges.iter().all(|&(from, to)| {
            let pair = if self.directed || from <= to {
                (from, to)
            } else {
                (to, from)
            };
            seen.insert(pair)
        })
    }

    /// All nodes of the given type (ignoring case), with their ids, in graph order.
    pub fn nodes_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = (usize, &'a Node)> + 'a {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.has_type(ty))
    }

    pub fn gene_nodes(&self) -> impl Iterator<Item = (usize, &Node)> + '_ {
        self.nodes_of_type(GENE_PROTEIN)
    }

    /// Disease nodes keyed by an ICD-10 code, in graph order.
    pub fn icd10_nodes(&self) -> impl Iterator<Item = (usize, &Node)> + '_ {
        self.nodes_of_type(DISEASE)
            .filter(|(_, node)| icd10::is_icd10_key(&node.key))
    }

    /// Add a `patient` node for each patient, with an edge to every ICD-10 disease node matching
    /// one of their codes. Codes are matched without periods.
    ///
    /// Returns the number of edges added.
    pub fn link_patients(&mut self, patient_codes: &BTreeMap<PatientId, Vec<ArcStr>>) -> Result<usize> {
        let disease_idx: BTreeMap<String, usize> = self
            .icd10_nodes()
            .map(|(idx, node)| (icd10::clean_code(&node.key), idx))
            .collect();

        let mut added = 0;
        for (patient_id, codes) in patient_codes {
            let patient_idx = match self.find_by_key(patient_id) {
                Some(idx) => idx,
                None => self.add_node(Node::new(patient_id.clone(), Some(PATIENT.into())))?,
            };
            let targets: BTreeSet<usize> = codes
                .iter()
                .filter_map(|code| disease_idx.get(&icd10::clean_code(code)).copied())
                .collect();
            if targets.is_empty() {
                event!(
                    Level::WARN,
                    "patient {} has no codes present in the knowledge graph",
                    patient_id
                );
            }
            for target in targets {
                self.add_edge(patient_idx, target)?;
                added += 1;
            }
        }
        event!(
            Level::INFO,
            "linked {} patients to the KG with {} edges",
            patient_codes.len(),
            added
        );
        Ok(added)
    }
}

impl Deref for KnowledgeGraph {
    type Target = [Node];
    fn deref(&self) -> &Self::Target {
        &self.nodes
    }
}

/// The mapping between node keys and the dense ids used for numeric processing.
///
/// Ids follow node order in the graph. The mapping is persisted next to the embeddings so that
/// rows can be matched back to nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMapping {
    keys: Vec<ArcStr>,
    idx: BTreeMap<ArcStr, usize>,
}

impl NodeMapping {
    pub fn from_graph(kg: &KnowledgeGraph) -> Self {
        Self::new(kg.iter().map(|node| node.key.clone()).collect())
    }

    fn new(keys: Vec<ArcStr>) -> Self {
        let idx = keys
            .iter()
            .enumerate()
            .map(|(idx, key)| (key.clone(), idx))
            .collect();
        Self { keys, idx }
    }

    pub fn id(&self, key: &str) -> Option<usize> {
        self.idx.get(key).copied()
    }

    pub fn key(&self, id: usize) -> Option<&ArcStr> {
        self.keys.get(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether this mapping assigns the same ids as a fresh mapping of `kg` would.
    pub fn matches(&self, kg: &KnowledgeGraph) -> bool {
        self.keys.len() == kg.node_count()
            && self.keys.iter().zip(kg.iter()).all(|(k, node)| *k == node.key)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        crate::save(&self.keys, path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(crate::load(path)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const GRAPH: &str = r#"
graph [
  node [
    id 0
    label "P1"
    type "patient"
  ]
  node [
    id 1
    label "BRCA1"
    type "gene/protein"
  ]
  node [
    id 2
    label "C50.9"
    type "disease"
  ]
  node [
    id 3
    label "TP53"
    type "Gene/Protein"
  ]
  edge [
    source 1
    target 2
  ]
  edge [
    source 3
    target 2
  ]
]
"#;

    #[test]
    fn typed_nodes() {
        let kg = KnowledgeGraph::from_gml_str(GRAPH).unwrap();
        let genes: Vec<_> = kg.gene_nodes().map(|(_, n)| &*n.key).collect();
        assert_eq!(genes, vec!["BRCA1", "TP53"]);
        let diseases: Vec<_> = kg.icd10_nodes().map(|(idx, _)| idx).collect();
        assert_eq!(diseases, vec![2]);
    }

    #[test]
    fn mapping_covers_edges() {
        let kg = KnowledgeGraph::from_gml_str(GRAPH).unwrap();
        let mapping = NodeMapping::from_graph(&kg);
        assert!(mapping.matches(&kg));
        for &(from, to) in kg.edges() {
            assert!(mapping.id(&kg[from].key).is_some());
            assert!(mapping.id(&kg[to].key).is_some());
        }
        assert_eq!(mapping.id("C50.9"), Some(2));
        assert_eq!(mapping.key(1).map(|k| &**k), Some("BRCA1"));
    }

    #[test]
    fn mapping_round_trip() {
        let kg = KnowledgeGraph::from_gml_str(GRAPH).unwrap();
        let mapping = NodeMapping::from_graph(&kg);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_mapping.bin");
        mapping.save(&path).unwrap();
        assert_eq!(NodeMapping::load(&path).unwrap(), mapping);
    }

    #[test]
    fn linking_patients() {
        let mut kg = KnowledgeGraph::from_gml_str(GRAPH).unwrap();
        let mut codes = BTreeMap::new();
        codes.insert(ArcStr::from("P1"), vec![ArcStr::from("C509"), "Z00".into()]);
        codes.insert(ArcStr::from("P2"), vec![ArcStr::from("C50.9")]);
        let added = kg.link_patients(&codes).unwrap();
        assert_eq!(added, 2);
        // P1 already existed, P2 is new.
        assert_eq!(kg.node_count(), 5);
        let p2 = kg.find_by_key("P2").unwrap();
        assert!(kg[p2].has_type(PATIENT));
        assert!(kg.edges().contains(&(0, 2)));
        assert!(kg.edges().contains(&(p2, 2)));
    }

    #[test]
    fn parallel_edges() {
        let mut kg = KnowledgeGraph::from_gml_str(GRAPH).unwrap();
        assert!(!kg.is_multigraph());
        kg.add_edge(2, 1).unwrap();
        assert!(kg.has_parallel_edges());
        assert!(kg.is_multigraph());

        let mut directed = KnowledgeGraph::new(true);
        directed.add_node(Node::new("A", None)).unwrap();
        directed.add_node(Node::new("B", None)).unwrap();
        directed.add_edge(0, 1).unwrap();
        directed.add_edge(1, 0).unwrap();
        assert!(!directed.is_multigraph());
        directed.set_multigraph(true);
        assert!(directed.is_multigraph());
    }

    #[test]
    fn duplicate_keys_rejected() {
        let mut kg = KnowledgeGraph::new(false);
        kg.add_node(Node::new("A", None)).unwrap();
        assert!(kg.add_node(Node::new("A", None)).is_err());
        assert!(kg.add_edge(0, 1).is_err());
    }
}
