//! The end to end run: graph -> embeddings -> patient/gene records -> classifier.
use itertools::Itertools;
use qu::ick_use::*;
use serde::Serialize;

use crate::{
    classifier::{self, ClassifierConfig, LogisticRegression},
    config::Config,
    edge_index::EdgeIndex,
    features::FeatureSet,
    kg::{KnowledgeGraph, NodeMapping},
    matrix::{CodeMatrix, IdColumn},
    metrics::Metrics,
    node2vec::{self, Embeddings},
    path_exists, ArcStr, PatientId,
};
use std::path::Path;

pub const EMBEDDINGS_FILE: &str = "node_embeddings.npy";
pub const MAPPING_FILE: &str = "node_mapping.bin";
pub const FEATURES_FILE: &str = "features.npy";
pub const LABELS_FILE: &str = "labels.npy";
pub const MODEL_FILE: &str = "logistic_regression_model.bin";
pub const METRICS_FILE: &str = "metrics.csv";
pub const RANKING_FILE: &str = "ranked_genes_to_check.csv";

/// What a run produced, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub metrics: Metrics,
    pub records: usize,
    pub positives: usize,
    pub train_size: usize,
    pub test_size: usize,
    /// Solver passes used.
    pub n_iter: usize,
    pub converged: bool,
}

impl Report {
    pub fn term_table(&self) -> term_data_table::Table {
        use term_data_table::{Cell, Row};
        let mut table = self.metrics.term_table();
        for (name, value) in [
            ("Records", self.records.to_string()),
            ("Positive records", self.positives.to_string()),
            ("Train / test", format!("{} / {}", self.train_size, self.test_size)),
            (
                "Solver epochs",
                format!(
                    "{}{}",
                    self.n_iter,
                    if self.converged { "" } else { " (not converged)" }
                ),
            ),
        ] {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(name))
                    .with_cell(Cell::from(value)),
            );
        }
        table
    }
}

pub struct Pipeline<'a> {
    config: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn run(&self) -> Result<Report> {
        let paths = &self.config.paths;

        let kg = KnowledgeGraph::load_gml(paths.knowledge_graph()?)?;
        let mapping = NodeMapping::from_graph(&kg);
        let embeddings = self.embeddings(&kg, &mapping)?;

        let icd = CodeMatrix::load(paths.icd_matrix(), IdColumn::default())?;
        let variants = CodeMatrix::load(paths.variant_matrix()?, IdColumn::First)?;
        let features = FeatureSet::generate(&kg, &mapping, &embeddings, icd.ids(), &variants)?;
        features.save(paths.output(FEATURES_FILE), paths.output(LABELS_FILE))?;

        let (model, report) = train_binary_classifier(&features, &self.config.classifier)?;
        model.save(paths.output(MODEL_FILE))?;
        report.metrics.save_csv(paths.output(METRICS_FILE))?;

        if self.config.ranking.enabled {
            let ranked = rank_genes(&model, &features, self.config.ranking.top_k)?;
            save_ranking(&ranked, paths.output(RANKING_FILE))?;
        }
        Ok(report)
    }

    /// Train (and save) embeddings, or load earlier ones when allowed.
    fn embeddings(&self, kg: &KnowledgeGraph, mapping: &NodeMapping) -> Result<Embeddings> {
        let paths = &self.config.paths;
        let (emb_path, map_path) = (paths.output(EMBEDDINGS_FILE), paths.output(MAPPING_FILE));
        if self.config.reuse_embeddings {
            if let Some(embeddings) = self.saved_embeddings(kg, &emb_path, &map_path)? {
                return Ok(embeddings);
            }
        }

        let edges = EdgeIndex::from_graph(kg, mapping)?;
        let embeddings = node2vec::train(&edges, &self.config.node2vec)?;
        embeddings.save_npy(&emb_path)?;
        mapping.save(&map_path)?;
        Ok(embeddings)
    }

    fn saved_embeddings(
        &self,
        kg: &KnowledgeGraph,
        emb_path: &Path,
        map_path: &Path,
    ) -> Result<Option<Embeddings>> {
        if !path_exists(emb_path)? || !path_exists(map_path)? {
            event!(
                Level::INFO,
                "no saved embeddings in \"{}\", training",
                self.config.paths.output_dir.display()
            );
            return Ok(None);
        }
        let saved_mapping = NodeMapping::load(map_path)?;
        let embeddings = Embeddings::load_npy(emb_path)?;
        if !saved_mapping.matches(kg)
            || embeddings.len() != saved_mapping.len()
            || embeddings.dim() != self.config.node2vec.embedding_dim
        {
            event!(
                Level::WARN,
                "saved embeddings do not match the current graph or config, retraining"
            );
            return Ok(None);
        }
        event!(
            Level::INFO,
            "reusing {} saved embeddings from \"{}\"",
            embeddings.len(),
            emb_path.display()
        );
        Ok(Some(embeddings))
    }
}

/// Split the records, fit the classifier on the training part and score it on the rest.
pub fn train_binary_classifier(
    features: &FeatureSet,
    config: &ClassifierConfig,
) -> Result<(LogisticRegression, Report)> {
    let split = classifier::train_test_split(
        features.features.view(),
        &features.labels,
        config.test_size,
        config.random_state,
    )?;
    event!(
        Level::INFO,
        "training on {} records, testing on {}",
        split.y_train.len(),
        split.y_test.len()
    );
    let model = LogisticRegression::fit(split.x_train.view(), &split.y_train, config)?;
    let y_pred = model.predict(split.x_test.view())?;
    let metrics = Metrics::compute(&split.y_test, &y_pred)?;
    event!(
        Level::INFO,
        "Precision: {:.4}, Recall: {:.4}, F1 Score: {:.4}, Accuracy: {:.4}",
        metrics.precision,
        metrics.recall,
        metrics.f1,
        metrics.accuracy
    );

    let report = Report {
        metrics,
        records: features.len(),
        positives: features.positives(),
        train_size: split.y_train.len(),
        test_size: split.y_test.len(),
        n_iter: model.n_iter(),
        converged: model.converged(),
    };
    Ok((model, report))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedGene {
    #[serde(rename = "PMBB_ID")]
    pub patient: PatientId,
    pub gene: ArcStr,
    pub probability: f64,
    /// 1 for the most likely gene of the patient.
    pub rank: usize,
}

/// The `top_k` most likely genes of each patient, most likely first.
pub fn rank_genes(
    model: &LogisticRegression,
    features: &FeatureSet,
    top_k: usize,
) -> Result<Vec<RankedGene>> {
    let proba = model.predict_proba(features.features.view())?;
    let mut ranked = vec![];
    let groups = features
        .pairs
        .iter()
        .zip(proba.iter())
        .group_by(|((patient, _), _)| patient.clone());
    for (patient, group) in &groups {
        let mut genes: Vec<(ArcStr, f64)> =
            group.map(|((_, gene), &p)| (gene.clone(), p)).collect();
        genes.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.extend(
            genes
                .into_iter()
                .take(top_k)
                .enumerate()
                .map(|(idx, (gene, probability))| RankedGene {
                    patient: patient.clone(),
                    gene,
                    probability,
                    rank: idx + 1,
                }),
        );
    }
    Ok(ranked)
}

pub fn save_ranking(ranked: &[RankedGene], path: impl AsRef<Path>) -> Result {
    fn inner(ranked: &[RankedGene], path: &Path) -> Result {
        let mut writer = csv::Writer::from_writer(crate::create_output(path)?);
        for row in ranked {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
    let path = path.as_ref();
    inner(ranked, path).with_context(|| format!("writing ranked genes to \"{}\"", path.display()))?;
    event!(
        Level::INFO,
        "saved {} ranked genes to \"{}\"",
        ranked.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::Paths, node2vec::Node2VecConfig};
    use ndarray::array;
    use std::fs;

    const GRAPH: &str = r#"graph [
  node [ id 0 label "P1" type "patient" ]
  node [ id 1 label "P2" type "patient" ]
  node [ id 2 label "P3" type "patient" ]
  node [ id 3 label "P4" type "patient" ]
  node [ id 4 label "E11" type "disease" ]
  node [ id 5 label "I10" type "disease" ]
  node [ id 6 label "G1" type "gene/protein" ]
  node [ id 7 label "G2" type "gene/protein" ]
  node [ id 8 label "G3" type "gene/protein" ]
  edge [ source 0 target 4 ]
  edge [ source 1 target 4 ]
  edge [ source 2 target 5 ]
  edge [ source 3 target 5 ]
  edge [ source 4 target 6 ]
  edge [ source 5 target 7 ]
  edge [ source 5 target 8 ]
]"#;

    fn setup(dir: &Path) -> Config {
        fs::write(dir.join("kg.gml"), GRAPH).unwrap();
        fs::write(
            dir.join("icd.csv"),
            "PMBB_ID,E11,I10\nP1,1,0\nP2,1,0\nP3,0,1\nP4,0,1\n",
        )
        .unwrap();
        fs::write(
            dir.join("variants.csv"),
            "sample,G1,G2,G3\nP1,1,0,1\nP2,1,0,0\nP3,0,1,1\nP4,0,1,0\n",
        )
        .unwrap();
        Config {
            paths: Paths {
                knowledge_graph: Some(dir.join("kg.gml")),
                icd_matrix: Some(dir.join("icd.csv")),
                variant_matrix: Some(dir.join("variants.csv")),
                output_dir: dir.join("out"),
                ..Paths::default()
            },
            node2vec: Node2VecConfig {
                embedding_dim: 4,
                walk_length: 4,
                context_size: 2,
                walks_per_node: 2,
                epochs: 2,
                seed: Some(1),
                ..Node2VecConfig::default()
            },
            classifier: ClassifierConfig {
                seed: Some(0),
                ..ClassifierConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = setup(dir.path());
        config.ranking.top_k = 2;
        let report = Pipeline::new(&config).run().unwrap();
        assert_eq!(report.records, 12);
        assert_eq!(report.positives, 6);
        assert_eq!(report.test_size, 3);
        assert_eq!(report.train_size, 9);
        for name in [
            EMBEDDINGS_FILE,
            MAPPING_FILE,
            FEATURES_FILE,
            LABELS_FILE,
            MODEL_FILE,
            METRICS_FILE,
            RANKING_FILE,
        ] {
            assert!(config.paths.output(name).exists(), "{} missing", name);
        }
        let embeddings = Embeddings::load_npy(config.paths.output(EMBEDDINGS_FILE)).unwrap();
        assert_eq!((embeddings.len(), embeddings.dim()), (9, 4));
        let ranking = fs::read_to_string(config.paths.output(RANKING_FILE)).unwrap();
        assert!(ranking.starts_with("PMBB_ID,gene,probability,rank\n"));
        assert_eq!(ranking.lines().count(), 1 + 4 * 2);

        // a second run picks up the saved embeddings, so nothing changes
        config.reuse_embeddings = true;
        assert_eq!(Pipeline::new(&config).run().unwrap(), report);
        assert_eq!(
            Embeddings::load_npy(config.paths.output(EMBEDDINGS_FILE)).unwrap(),
            embeddings
        );
    }

    #[test]
    fn mismatched_saved_embeddings_are_retrained() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = setup(dir.path());
        Pipeline::new(&config).run().unwrap();
        config.reuse_embeddings = true;
        config.node2vec.embedding_dim = 6;
        Pipeline::new(&config).run().unwrap();
        let embeddings = Embeddings::load_npy(config.paths.output(EMBEDDINGS_FILE)).unwrap();
        assert_eq!(embeddings.dim(), 6);
    }

    #[test]
    fn ranking_order() {
        let x = array![[-2.0f32], [-1.0], [1.0], [2.0]];
        let model =
            LogisticRegression::fit(x.view(), &[0, 0, 1, 1], &ClassifierConfig::default())
                .unwrap();
        let features = FeatureSet {
            features: array![[-1.0f32], [2.0], [0.5], [1.0], [-3.0], [0.0]],
            labels: vec![0; 6],
            pairs: vec![
                ("P1".into(), "A".into()),
                ("P1".into(), "B".into()),
                ("P1".into(), "C".into()),
                ("P2".into(), "A".into()),
                ("P2".into(), "B".into()),
                ("P2".into(), "C".into()),
            ],
        };
        let ranked = rank_genes(&model, &features, 2).unwrap();
        let summary: Vec<(&str, &str, usize)> = ranked
            .iter()
            .map(|r| (&*r.patient, &*r.gene, r.rank))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("P1", "B", 1),
                ("P1", "C", 2),
                ("P2", "A", 1),
                ("P2", "C", 2)
            ]
        );
        assert!(ranked[0].probability > ranked[1].probability);
    }
}
