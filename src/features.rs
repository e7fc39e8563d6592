//! Patient × gene training records.
use itertools::Itertools;
use ndarray::{s, Array2};
use qu::ick_use::*;
use std::path::Path;

use crate::{
    kg::{KnowledgeGraph, NodeMapping},
    matrix::CodeMatrix,
    node2vec::Embeddings,
    npy, ArcStr, PatientId,
};

/// One record per (patient, gene) pair, patient-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    /// `concat(patient embedding, gene embedding)` per record.
    pub features: Array2<f32>,
    /// 1 if the patient carries a variant in the gene.
    pub labels: Vec<u8>,
    pub pairs: Vec<(PatientId, ArcStr)>,
}

impl FeatureSet {
    /// Build the full cross product of `patients` and the graph's gene nodes (in graph order).
    ///
    /// Every patient and gene must have an embedding and a cell in the variant matrix.
    pub fn generate(
        kg: &KnowledgeGraph,
        mapping: &NodeMapping,
        embeddings: &Embeddings,
        patients: &[PatientId],
        variants: &CodeMatrix,
    ) -> Result<Self> {
        let embedding_id = |key: &str| -> Result<usize> {
            let id = mapping
                .id(key)
                .with_context(|| format!("\"{}\" is not a node of the knowledge graph", key))?;
            ensure!(
                id < embeddings.len(),
                "no embedding for \"{}\" (id {}, {} embeddings)",
                key,
                id,
                embeddings.len()
            );
            Ok(id)
        };
        let patient_ids = patients
            .iter()
            .map(|p| Ok((p.clone(), embedding_id(p)?)))
            .collect::<Result<Vec<_>>>()?;
        let gene_ids = kg
            .gene_nodes()
            .map(|(_, node)| Ok((node.key.clone(), embedding_id(&node.key)?)))
            .collect::<Result<Vec<_>>>()?;

        let dim = embeddings.dim();
        let len = patient_ids.len() * gene_ids.len();
        let mut features = Array2::zeros((len, 2 * dim));
        let mut labels = Vec::with_capacity(len);
        let mut pairs = Vec::with_capacity(len);
        for (row, ((patient, p_id), (gene, g_id))) in patient_ids
            .iter()
            .cartesian_product(gene_ids.iter())
            .enumerate()
        {
            let label = variants
                .is_nonzero(patient, gene)
                .context("while labelling patient/gene pairs from the variant matrix")?;
            let mut record = features.row_mut(row);
            record.slice_mut(s![..dim]).assign(&embeddings.matrix().row(*p_id));
            record.slice_mut(s![dim..]).assign(&embeddings.matrix().row(*g_id));
            labels.push(label as u8);
            pairs.push((patient.clone(), gene.clone()));
        }

        let set = Self {
            features,
            labels,
            pairs,
        };
        let positives = set.positives();
        event!(
            Level::INFO,
            "generated {} records ({} patients x {} genes), {} positive ({:.2}%)",
            set.len(),
            patient_ids.len(),
            gene_ids.len(),
            positives,
            100. * positives as f64 / set.len().max(1) as f64
        );
        if positives == 0 || positives == set.len() {
            event!(Level::WARN, "all labels are the same");
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }

    /// Save features as `f32` and labels as `i64` arrays.
    pub fn save(&self, features_path: impl AsRef<Path>, labels_path: impl AsRef<Path>) -> Result {
        npy::write_array2(features_path, self.features.view())?;
        let labels: Vec<i64> = self.labels.iter().map(|&l| l as i64).collect();
        npy::write_array1(labels_path, &labels)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::matrix::IdColumn;
    use ndarray::array;

    const GRAPH: &str = r#"graph [
  node [ id 0 label "P1" type "patient" ]
  node [ id 1 label "G1" type "gene/protein" ]
  node [ id 2 label "G2" type "gene/protein" ]
  edge [ source 0 target 1 ]
]"#;

    fn inputs() -> (KnowledgeGraph, NodeMapping, Embeddings, CodeMatrix) {
        let kg = KnowledgeGraph::from_gml_str(GRAPH).unwrap();
        let mapping = NodeMapping::from_graph(&kg);
        let embeddings = Embeddings::new(array![[1., 2.], [3., 4.], [5., 6.]]);
        let variants = CodeMatrix::from_reader(
            "sample,G1,G2\nP1,1,0\n".as_bytes(),
            b',',
            IdColumn::First,
        )
        .unwrap();
        (kg, mapping, embeddings, variants)
    }

    #[test]
    fn one_patient_two_genes() {
        let (kg, mapping, embeddings, variants) = inputs();
        let set =
            FeatureSet::generate(&kg, &mapping, &embeddings, &["P1".into()], &variants).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.labels, vec![1, 0]);
        assert_eq!(set.features, array![[1., 2., 3., 4.], [1., 2., 5., 6.]]);
        assert_eq!(set.pairs[1], (ArcStr::from("P1"), ArcStr::from("G2")));
        assert!(set.labels.iter().all(|&l| l <= 1));
    }

    #[test]
    fn patient_gene_count() {
        let (kg, mapping, embeddings, _) = inputs();
        let variants = CodeMatrix::from_reader(
            "sample,G1,G2\nP1,1,0\nG1,0,2\nG2,0,0\n".as_bytes(),
            b',',
            IdColumn::First,
        )
        .unwrap();
        // any node can stand in for a patient as long as it has an embedding and a row
        let patients: Vec<PatientId> = vec!["P1".into(), "G1".into(), "G2".into()];
        let set = FeatureSet::generate(&kg, &mapping, &embeddings, &patients, &variants).unwrap();
        assert_eq!(set.len(), 3 * 2);
        assert_eq!(set.features.dim(), (6, 4));
        assert_eq!(set.labels, vec![1, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn missing_data() {
        let (kg, mapping, embeddings, variants) = inputs();
        // not in the graph
        assert!(
            FeatureSet::generate(&kg, &mapping, &embeddings, &["P2".into()], &variants).is_err()
        );
        // in the graph but not in the variant matrix
        assert!(
            FeatureSet::generate(&kg, &mapping, &embeddings, &["G1".into()], &variants).is_err()
        );
        // too few embeddings
        let short = Embeddings::new(array![[1., 2.]]);
        assert!(FeatureSet::generate(&kg, &mapping, &short, &["P1".into()], &variants).is_err());
    }

    #[test]
    fn save_arrays() {
        let (kg, mapping, embeddings, variants) = inputs();
        let set =
            FeatureSet::generate(&kg, &mapping, &embeddings, &["P1".into()], &variants).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (f, l) = (dir.path().join("features.npy"), dir.path().join("labels.npy"));
        set.save(&f, &l).unwrap();
        assert_eq!(npy::read_array2::<f32>(&f).unwrap(), set.features);
        assert_eq!(npy::read_array1::<i64>(&l).unwrap().to_vec(), vec![1, 0]);
    }
}
