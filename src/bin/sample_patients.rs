use clap::Parser;
use pmbb_kg_analysis::{cohort, header, CodeMatrix, Config, IdColumn};
use qu::ick_use::*;
use std::{collections::BTreeSet, path::PathBuf};
use term_data_table::{Cell, Row, Table};

/// Sample patients with a given ICD-10 code and cut every PMBB extract down to them.
#[derive(Parser)]
struct Opt {
    /// The TOML run configuration.
    #[clap(long)]
    config: PathBuf,
    /// The code to sample on, overriding `cohort.icd10_code`.
    #[clap(long)]
    code: Option<String>,
    /// Number of patients, overriding `cohort.num_patients`.
    #[clap(short, long)]
    num_patients: Option<usize>,
    /// Sampling seed, overriding `cohort.seed`.
    #[clap(long)]
    seed: Option<u64>,
    /// Only write the sampled ids, without filtering the other extracts.
    #[clap(long)]
    ids_only: bool,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;
    let cohort_config = &config.cohort;
    let code = match &opt.code {
        Some(code) => code.as_str(),
        None => cohort_config.icd10_code()?,
    };

    let matrix = CodeMatrix::load(config.release_icd10_matrix()?, IdColumn::default())?;
    let sampled = cohort::sample_patients_with_code(
        &matrix,
        code,
        opt.num_patients.unwrap_or(cohort_config.num_patients),
        opt.seed.or(cohort_config.seed),
        &cohort_config.exclude_prefix,
    )?;
    let ids_path = config.paths.patient_ids();
    cohort::save_patient_ids(&sampled, &ids_path)?;
    event!(
        Level::INFO,
        "Saved {} patient ids to \"{}\"",
        sampled.len(),
        ids_path.display()
    );
    if opt.ids_only {
        return Ok(());
    }

    let ids: BTreeSet<_> = sampled.into_iter().collect();
    let unmatched =
        cohort::filter_directory(config.paths.pmbb_dir()?, &ids, &config.paths.output_dir)?;

    header("Patients without rows");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("File"))
            .with_cell(Cell::from("Unmatched")),
    );
    for (file, count) in &unmatched {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(file.as_str()))
                .with_cell(Cell::from(count.to_string())),
        );
    }
    println!("{}", table.for_terminal());
    Ok(())
}
