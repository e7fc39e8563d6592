pub mod classifier;
pub mod cohort;
pub mod config;
pub mod edge_index;
pub mod features;
pub mod icd10;
pub mod kg;
pub mod matrix;
pub mod metrics;
pub mod node2vec;
pub mod npy;
pub mod pipeline;
mod util;

pub use anyhow::{Context, Error};
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, io, path::Path, sync::Arc};

pub use crate::{
    classifier::LogisticRegression,
    config::Config,
    edge_index::EdgeIndex,
    features::FeatureSet,
    kg::{KnowledgeGraph, Node, NodeMapping},
    matrix::{CodeMatrix, IdColumn},
    metrics::Metrics,
    node2vec::Embeddings,
    util::{header, path_exists, save_json},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
/// Patients are identified by their PMBB ID, which is also their node key in the knowledge graph.
pub type PatientId = ArcStr;

/// The patient identifier column used in all PMBB extracts.
pub const ID_COLUMN: &str = "PMBB_ID";

/// Load a bincode artifact from disk.
pub fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save a bincode artifact to disk, overwriting (with a warning) anything already there.
pub fn save<T: Serialize + ?Sized>(contents: &T, path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize + ?Sized>(contents: &T, path: &Path) -> Result {
        let mut out = io::BufWriter::new(create_output(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(contents, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Create a file for writing, making parent directories as needed.
pub(crate) fn create_output(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
    }
    // it seems File::options().create_new(true) doesn't work on every filesystem, so fall back
    // to checking for existence.
    if path_exists(path)? {
        event!(
            Level::WARN,
            "overwriting existing file at \"{}\"",
            path.display()
        );
    }
    Ok(fs::File::create(path)?)
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}
