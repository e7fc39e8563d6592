use clap::Parser;
use pmbb_kg_analysis::{cohort, save_json, CodeMatrix, Config, IdColumn};
use qu::ick_use::*;
use std::{collections::BTreeSet, path::PathBuf};

/// Write each sampled patient's ICD-10 codes, and optionally all their records, as JSON.
#[derive(Parser)]
struct Opt {
    /// The TOML run configuration.
    #[clap(long)]
    config: PathBuf,
    /// Also gather each patient's rows from `cohort.record_files`.
    #[clap(long)]
    records: bool,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;
    let patients = cohort::load_patient_ids(config.paths.patient_ids())?;
    let matrix = CodeMatrix::load(config.release_icd10_matrix()?, IdColumn::default())?;

    let codes = cohort::patient_codes(&matrix, &patients, &config.cohort.exclude_prefix);
    let total: usize = codes.values().map(Vec::len).sum();
    save_json(&codes, config.paths.output("patient_codes.json"))?;
    event!(
        Level::INFO,
        "Saved {} codes for {} patients",
        total,
        codes.len()
    );

    if opt.records {
        let pmbb_dir = config.paths.pmbb_dir()?;
        let files: Vec<PathBuf> = config
            .cohort
            .record_files
            .iter()
            .map(|name| pmbb_dir.join(name))
            .collect();
        let ids: BTreeSet<_> = patients.into_iter().collect();
        let records = cohort::collect_patient_records(&files, &ids)?;
        save_json(&records, config.paths.output("patient_records.json"))?;
        event!(
            Level::INFO,
            "Saved records from {} files for {} patients",
            files.len(),
            records.len()
        );
    }
    Ok(())
}
