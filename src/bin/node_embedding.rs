use clap::Parser;
use pmbb_kg_analysis::{header, pipeline::Pipeline, Config};
use qu::ick_use::*;
use std::path::PathBuf;

/// Train node embeddings on the knowledge graph and a patient/gene association classifier on
/// top of them.
#[derive(Parser)]
struct Opt {
    /// The TOML run configuration.
    #[clap(long)]
    config: PathBuf,
    /// Seed for embedding training, overriding `node2vec.seed`.
    #[clap(long)]
    seed: Option<u64>,
    /// Reuse embeddings from an earlier run if they match the graph.
    #[clap(long)]
    reuse_embeddings: bool,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let mut config = Config::load(&opt.config)?;
    if let Some(seed) = opt.seed {
        config.node2vec.seed = Some(seed);
    }
    config.reuse_embeddings |= opt.reuse_embeddings;

    let report = Pipeline::new(&config).run()?;
    header("Held-out evaluation");
    println!("{}", report.term_table().for_terminal());
    Ok(())
}
