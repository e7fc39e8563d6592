//! Run configuration, read from a TOML file.
//!
//! ```toml
//! [paths]
//! knowledge_graph = "inference_engine/updated_knowledge_graph.gml"
//! icd_matrix = "patients_filtered_new/filtered_icd10_matrix.csv"
//! variant_matrix = "patients_filtered_new/pathogenic_variant_matrix.csv"
//! output_dir = "inference_engine"
//!
//! [node2vec]
//! seed = 42
//! ```
//!
//! Everything apart from the input paths a binary actually needs has a default.
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{classifier::ClassifierConfig, icd10, node2vec::Node2VecConfig};

pub const FILTERED_ICD10_FILE: &str = "filtered_icd10_matrix.csv";
pub const SAMPLED_IDS_FILE: &str = "sampled_patient_ids.csv";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Load embeddings and node mapping from the output directory instead of training, when
    /// they exist and match the graph.
    pub reuse_embeddings: bool,
    pub paths: Paths,
    pub cohort: CohortConfig,
    pub node2vec: Node2VecConfig,
    pub classifier: ClassifierConfig,
    pub ranking: RankingConfig,
    pub subgraph: SubgraphConfig,
}

impl Config {
    /// The full ICD-10 matrix of the PMBB release.
    pub fn release_icd10_matrix(&self) -> Result<PathBuf> {
        Ok(self.paths.pmbb_dir()?.join(&self.cohort.icd10_file))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Config> {
            let text = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&text)?;
            config.node2vec.validate()?;
            config.classifier.validate()?;
            Ok(config)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("loading config from \"{}\"", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// The GML knowledge graph, with patients linked in.
    pub knowledge_graph: Option<PathBuf>,
    /// ICD-10 matrix restricted to the cohort and the graph's codes. Its rows are the patients
    /// used for training. Written by `filter_kg_codes`.
    pub icd_matrix: Option<PathBuf>,
    /// Patient-by-gene matrix of pathogenic variants. Patient ids are in the first column.
    pub variant_matrix: Option<PathBuf>,
    /// CSV with a `PMBB_ID` column. Written by `sample_patients`.
    pub patient_ids: Option<PathBuf>,
    /// Directory of PMBB release extracts.
    pub pmbb_dir: Option<PathBuf>,
    /// Directory holding PrimeKG's `nodes.csv` and `edges.csv`.
    pub primekg_dir: Option<PathBuf>,
    /// Where all outputs are written.
    pub output_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            knowledge_graph: None,
            icd_matrix: None,
            variant_matrix: None,
            patient_ids: None,
            pmbb_dir: None,
            primekg_dir: None,
            output_dir: PathBuf::from("."),
        }
    }
}

fn required<'a>(path: &'a Option<PathBuf>, key: &str) -> Result<&'a Path> {
    path.as_deref()
        .with_context(|| format!("`paths.{}` must be set in the config", key))
}

impl Paths {
    pub fn knowledge_graph(&self) -> Result<&Path> {
        required(&self.knowledge_graph, "knowledge_graph")
    }

    /// Defaults to `filtered_icd10_matrix.csv` in the output directory.
    pub fn icd_matrix(&self) -> PathBuf {
        self.or_output(&self.icd_matrix, FILTERED_ICD10_FILE)
    }

    pub fn variant_matrix(&self) -> Result<&Path> {
        required(&self.variant_matrix, "variant_matrix")
    }

    /// Defaults to `sampled_patient_ids.csv` in the output directory.
    pub fn patient_ids(&self) -> PathBuf {
        self.or_output(&self.patient_ids, SAMPLED_IDS_FILE)
    }

    pub fn pmbb_dir(&self) -> Result<&Path> {
        required(&self.pmbb_dir, "pmbb_dir")
    }

    pub fn primekg_dir(&self) -> Result<&Path> {
        required(&self.primekg_dir, "primekg_dir")
    }

    /// A file in the output directory.
    pub fn output(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    fn or_output(&self, path: &Option<PathBuf>, name: &str) -> PathBuf {
        path.clone().unwrap_or_else(|| self.output(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CohortConfig {
    /// The ICD-10 code patients are sampled on.
    pub icd10_code: Option<String>,
    /// Name of the ICD-10 matrix within `paths.pmbb_dir`.
    pub icd10_file: String,
    pub num_patients: usize,
    pub seed: Option<u64>,
    /// Codes starting with this are ignored. Empty to keep everything.
    pub exclude_prefix: String,
    /// Extracts within `paths.pmbb_dir` gathered per patient.
    pub record_files: Vec<String>,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            icd10_code: None,
            icd10_file: "PMBB-Release-2020-2.3_phenotype_icd-10-matrix.txt".into(),
            num_patients: 500,
            seed: None,
            exclude_prefix: icd10::DEFAULT_EXCLUDE_PREFIX.into(),
            record_files: [
                "PMBB-Release-2020-2.3_phenotype_icd-9-matrix.txt",
                "PMBB-Release-2020-2.3_phenotype_icd-10-matrix.txt",
                "PMBB-Release-2020-2.3_phenotype_PheCode-matrix.txt",
                "PMBB-Release-2020-2.3_phenotype_labs-A1C.txt",
                "PMBB-Release-2020-2.3_phenotype_medications.txt",
                "PMBB-Release-2020-2.3_phenotype_vitals-BP.txt",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl CohortConfig {
    pub fn icd10_code(&self) -> Result<&str> {
        self.icd10_code
            .as_deref()
            .context("`cohort.icd10_code` must be set in the config")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RankingConfig {
    pub enabled: bool,
    /// Genes kept per patient.
    pub top_k: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubgraphConfig {
    /// Nodes whose name contains one of these seed the subgraph.
    pub keywords: Vec<String>,
    /// Hops from the seed nodes to include.
    pub max_distance: usize,
    /// Whether to add the cohort's patients as nodes.
    pub link_patients: bool,
    /// File name of the GML output.
    pub output_gml: String,
}

impl Default for SubgraphConfig {
    fn default() -> Self {
        Self {
            keywords: vec![],
            max_distance: 1,
            link_patients: true,
            output_gml: "updated_knowledge_graph.gml".into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() {
        let config: Config = toml::from_str(
            r#"
reuse_embeddings = true

[paths]
knowledge_graph = "kg.gml"
output_dir = "out"

[node2vec]
embedding_dim = 16
seed = 3

[classifier]
max_iter = 10

[subgraph]
keywords = ["marfan", "aneurysm"]
"#,
        )
        .unwrap();
        assert!(config.reuse_embeddings);
        assert_eq!(config.paths.knowledge_graph().unwrap(), Path::new("kg.gml"));
        assert!(config.paths.variant_matrix().is_err());
        assert_eq!(
            config.paths.patient_ids(),
            Path::new("out/sampled_patient_ids.csv")
        );
        assert!(config.release_icd10_matrix().is_err());
        assert_eq!(config.paths.output("metrics.csv"), Path::new("out/metrics.csv"));
        assert_eq!(config.node2vec.embedding_dim, 16);
        assert_eq!(config.node2vec.seed, Some(3));
        // untouched fields keep their defaults
        assert_eq!(config.node2vec.walk_length, 50);
        assert_eq!(config.classifier.max_iter, 10);
        assert_eq!(config.classifier.random_state, 42);
        assert_eq!(config.subgraph.max_distance, 1);
        assert_eq!(config.cohort.num_patients, 500);
        assert_eq!(config.cohort.exclude_prefix, "Q");
        assert!(config.cohort.icd10_code().is_err());
    }

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.paths.output_dir, Path::new("."));
        assert_eq!(config.ranking.top_k, 20);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("[paths]\nkg = \"x\"\n").is_err());
    }

    #[test]
    fn invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[node2vec]\ncontext_size = 1\n").unwrap();
        assert!(Config::load(&path).is_err());
        std::fs::write(&path, "[classifier]\ntest_size = 0.3\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().classifier.test_size, 0.3);
    }
}
