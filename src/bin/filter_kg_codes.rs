use clap::Parser;
use pmbb_kg_analysis::{cohort, CodeMatrix, Config, IdColumn, KnowledgeGraph};
use qu::ick_use::*;
use std::{collections::BTreeSet, path::PathBuf};

/// Keep only the ICD-10 columns that appear as disease nodes in the knowledge graph.
///
/// The output is written to `paths.icd_matrix`.
#[derive(Parser)]
struct Opt {
    /// The TOML run configuration.
    #[clap(long)]
    config: PathBuf,
    /// The matrix to filter. Defaults to the release ICD-10 matrix in `paths.pmbb_dir`.
    #[clap(long)]
    input: Option<PathBuf>,
    /// Keep every patient instead of only those in `paths.patient_ids`.
    #[clap(long)]
    all_patients: bool,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;
    let kg = KnowledgeGraph::load_gml(config.paths.knowledge_graph()?)?;
    let input = match opt.input {
        Some(input) => input,
        None => config.release_icd10_matrix()?,
    };
    let matrix = CodeMatrix::load(&input, IdColumn::default())?;

    let patients = if opt.all_patients {
        None
    } else {
        let ids = cohort::load_patient_ids(config.paths.patient_ids())?;
        Some(ids.into_iter().collect::<BTreeSet<_>>())
    };
    let filtered = matrix.filter_to_kg(&kg, patients.as_ref())?;
    if filtered.nrows() == 0 {
        event!(Level::WARN, "no patients left after filtering");
    }

    let output = config.paths.icd_matrix();
    filtered.save(&output)?;
    event!(
        Level::INFO,
        "Saved filtered ICD-10 matrix ({} patients, {} KG codes) to \"{}\"",
        filtered.nrows(),
        filtered.ncols(),
        output.display()
    );
    Ok(())
}
