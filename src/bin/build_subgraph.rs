use clap::Parser;
use pmbb_kg_analysis::{cohort, kg::primekg::PrimeKg, CodeMatrix, Config, IdColumn};
use qu::ick_use::*;
use std::path::PathBuf;

/// Cut a neighbourhood of keyword-matched nodes out of PrimeKG, link the sampled patients into
/// it and save it as GML.
#[derive(Parser)]
struct Opt {
    /// The TOML run configuration.
    #[clap(long)]
    config: PathBuf,
    /// Seed keywords, replacing `subgraph.keywords`.
    #[clap(short, long)]
    keyword: Vec<String>,
    /// Hops around the seed nodes, overriding `subgraph.max_distance`.
    #[clap(long)]
    max_distance: Option<usize>,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load(&opt.config)?;
    let sub_config = &config.subgraph;
    let keywords = if opt.keyword.is_empty() {
        &sub_config.keywords
    } else {
        &opt.keyword
    };
    let max_distance = opt.max_distance.unwrap_or(sub_config.max_distance);

    let primekg = PrimeKg::load(config.paths.primekg_dir()?)?;
    let seeds = primekg.nodes_matching_keywords(keywords.as_slice())?;
    ensure!(!seeds.is_empty(), "no node matched {:?}", keywords);
    let keep = primekg.nodes_within_distance(&seeds, max_distance);
    event!(
        Level::INFO,
        "{} seed nodes, {} nodes within {} hops",
        seeds.len(),
        keep.len(),
        max_distance
    );
    let sub = primekg.subset(&keep);
    sub.save(&config.paths.output_dir)?;

    let mut kg = sub.to_knowledge_graph()?;
    if sub_config.link_patients {
        let patients = cohort::load_patient_ids(config.paths.patient_ids())?;
        let matrix = CodeMatrix::load(config.release_icd10_matrix()?, IdColumn::default())?;
        let codes = cohort::patient_codes(&matrix, &patients, &config.cohort.exclude_prefix);
        kg.link_patients(&codes)?;
    }
    let output = config.paths.output(&sub_config.output_gml);
    kg.save_gml(&output)?;
    event!(
        Level::INFO,
        "Saved graph with {} nodes and {} edges to \"{}\"",
        kg.node_count(),
        kg.edge_count(),
        output.display()
    );
    Ok(())
}
