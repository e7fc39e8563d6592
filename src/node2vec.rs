//! Node2Vec embeddings: biased random walks feeding a skip-gram objective with negative sampling.
//!
//! Training follows the usual mini-batch scheme. Each epoch the node ids are shuffled and split
//! into batches. Every node in a batch starts `walks_per_node` biased walks and
//! `walks_per_node * num_negative_samples` walks over uniformly random nodes. Walks are cut into
//! overlapping windows of `context_size` nodes, and the first node of each window is pulled
//! towards the rest of the window (or pushed away, for negative walks).
mod sparse_adam;
mod walk;

use ndarray::{Array2, ArrayView1};
use qu::ick_use::*;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::{collections::BTreeMap, path::Path};

use crate::{
    edge_index::{Adjacency, EdgeIndex},
    npy,
};
pub use sparse_adam::SparseAdam;
pub use walk::Walker;

/// Keeps `ln` finite when the sigmoid saturates.
const EPS: f32 = 1e-15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Node2VecConfig {
    pub embedding_dim: usize,
    /// Number of steps in a walk. Walks contain `walk_length + 1` nodes.
    pub walk_length: usize,
    pub context_size: usize,
    pub walks_per_node: usize,
    /// Return parameter.
    pub p: f64,
    /// In-out parameter.
    pub q: f64,
    pub num_negative_samples: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Threads used to prepare walks. `0` prepares them on the calling thread.
    pub num_workers: usize,
    /// Seed for initialization and sampling. Drawn from the OS when absent.
    pub seed: Option<u64>,
}

impl Default for Node2VecConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 128,
            walk_length: 50,
            context_size: 20,
            walks_per_node: 40,
            p: 0.5,
            q: 2.0,
            num_negative_samples: 1,
            epochs: 50,
            batch_size: 64,
            learning_rate: 0.005,
            num_workers: 0,
            seed: None,
        }
    }
}

impl Node2VecConfig {
    pub fn validate(&self) -> Result {
        ensure!(self.embedding_dim > 0, "embedding_dim must be positive");
        ensure!(
            self.context_size >= 2,
            "context_size must be at least 2 (an anchor and one context node)"
        );
        ensure!(
            self.walk_length + 1 >= self.context_size,
            "walk_length ({}) must be at least context_size - 1 ({})",
            self.walk_length,
            self.context_size - 1
        );
        ensure!(self.walks_per_node > 0, "walks_per_node must be positive");
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(
            self.p > 0. && self.q > 0.,
            "p and q must be positive (found p = {}, q = {})",
            self.p,
            self.q
        );
        ensure!(
            self.learning_rate > 0.,
            "learning_rate must be positive (found {})",
            self.learning_rate
        );
        Ok(())
    }

    fn windows_per_walk(&self) -> usize {
        self.walk_length + 2 - self.context_size
    }
}

/// One vector per node id, as rows of a `num_nodes × dim` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    matrix: Array2<f32>,
}

impl Embeddings {
    pub fn new(matrix: Array2<f32>) -> Self {
        Self { matrix }
    }

    pub fn row(&self, id: usize) -> Option<ArrayView1<'_, f32>> {
        (id < self.len()).then(|| self.matrix.row(id))
    }

    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn len(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }

    pub fn save_npy(&self, path: impl AsRef<Path>) -> Result {
        npy::write_array2(path, self.matrix.view())
    }

    pub fn load_npy(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(npy::read_array2(path)?))
    }
}

/// Train embeddings for every node of the edge index.
pub fn train(edges: &EdgeIndex, config: &Node2VecConfig) -> Result<Embeddings> {
    let mut trainer = Trainer::new(edges, config)?;
    for epoch in 1..=config.epochs {
        let loss = trainer.epoch()?;
        event!(Level::INFO, "Epoch: {:02}, Loss: {:.4}", epoch, loss);
    }
    Ok(trainer.into_embeddings())
}

/// Training state, advanced an epoch at a time.
pub struct Trainer<'a> {
    adj: Adjacency,
    config: &'a Node2VecConfig,
    rng: StdRng,
    embedding: Array2<f32>,
    optimizer: SparseAdam,
    pool: Option<rayon::ThreadPool>,
}

impl<'a> Trainer<'a> {
    pub fn new(edges: &EdgeIndex, config: &'a Node2VecConfig) -> Result<Self> {
        config.validate()?;
        let num_nodes = edges.num_nodes();
        ensure!(num_nodes > 0, "cannot train embeddings for an empty graph");

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let normal = Normal::new(0., 1.)?;
        let embedding = Array2::from_shape_simple_fn((num_nodes, config.embedding_dim), || {
            rng.sample(normal) as f32
        });
        let pool = match config.num_workers {
            0 => None,
            n => Some(rayon::ThreadPoolBuilder::new().num_threads(n).build()?),
        };
        event!(
            Level::INFO,
            "training {}-dimensional embeddings for {} nodes ({} directed edges)",
            config.embedding_dim,
            num_nodes,
            edges.len()
        );

        Ok(Self {
            adj: edges.adjacency(),
            config,
            rng,
            embedding,
            optimizer: SparseAdam::new(num_nodes, config.embedding_dim, config.learning_rate),
            pool,
        })
    }

    /// Run one pass over all nodes, returning the mean batch loss.
    pub fn epoch(&mut self) -> Result<f64> {
        let mut order: Vec<usize> = (0..self.adj.node_count()).collect();
        order.shuffle(&mut self.rng);

        let mut total = 0.;
        let mut batches = 0;
        for batch in order.chunks(self.config.batch_size) {
            let seed: u64 = self.rng.gen();
            let (pos, neg) = self.sample(batch, seed);
            total += self.step(&pos, &neg) as f64;
            batches += 1;
        }
        ensure!(total.is_finite(), "training diverged (loss = {})", total);
        Ok(total / batches as f64)
    }

    pub fn into_embeddings(self) -> Embeddings {
        Embeddings::new(self.embedding)
    }

    /// Positive and negative walks for a batch of start nodes.
    ///
    /// Walk `i` gets its own generator seeded from `seed + i`, so the result does not depend on
    /// how many threads prepare the walks.
    fn sample(&self, batch: &[usize], seed: u64) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let walker = Walker::new(&self.adj, self.config.walk_length, self.config.p, self.config.q);
        let pos_starts: Vec<usize> = batch
            .iter()
            .copied()
            .cycle()
            .take(batch.len() * self.config.walks_per_node)
            .collect();
        let neg_starts: Vec<usize> = batch
            .iter()
            .copied()
            .cycle()
            .take(batch.len() * self.config.walks_per_node * self.config.num_negative_samples)
            .collect();
        let offset = pos_starts.len() as u64;

        let rng_for = |i: u64| StdRng::seed_from_u64(seed.wrapping_add(i));
        match &self.pool {
            Some(pool) => pool.install(|| {
                let pos: Vec<Vec<usize>> = pos_starts
                    .par_iter()
                    .enumerate()
                    .map(|(i, &start)| walker.walk(start, &mut rng_for(i as u64)))
                    .collect();
                let neg: Vec<Vec<usize>> = neg_starts
                    .par_iter()
                    .enumerate()
                    .map(|(i, &start)| walker.negative(start, &mut rng_for(offset + i as u64)))
                    .collect();
                (pos, neg)
            }),
            None => {
                let pos = pos_starts
                    .iter()
                    .enumerate()
                    .map(|(i, &start)| walker.walk(start, &mut rng_for(i as u64)))
                    .collect();
                let neg = neg_starts
                    .iter()
                    .enumerate()
                    .map(|(i, &start)| walker.negative(start, &mut rng_for(offset + i as u64)))
                    .collect();
                (pos, neg)
            }
        }
    }

    /// Compute the loss and apply one optimizer step.
    fn step(&mut self, pos: &[Vec<usize>], neg: &[Vec<usize>]) -> f32 {
        let mut grads = BTreeMap::new();
        let pos_loss = self.accumulate(pos, true, &mut grads);
        let neg_loss = self.accumulate(neg, false, &mut grads);
        self.optimizer.step(&mut self.embedding, &grads);
        pos_loss + neg_loss
    }

    /// Add the gradients of the mean loss over all (anchor, context) pairs of the walks, and
    /// return that loss.
    fn accumulate(
        &self,
        walks: &[Vec<usize>],
        positive: bool,
        grads: &mut BTreeMap<usize, Vec<f32>>,
    ) -> f32 {
        let context = self.config.context_size;
        let pairs = walks.len() * self.config.windows_per_walk() * (context - 1);
        if pairs == 0 {
            return 0.;
        }
        let scale = 1. / pairs as f32;
        let dim = self.config.embedding_dim;

        let mut loss = 0.;
        for walk in walks {
            for window in walk.windows(context) {
                let anchor = window[0];
                let h_anchor = self.embedding.row(anchor);
                for &ctx in &window[1..] {
                    let h_ctx = self.embedding.row(ctx);
                    let prob = sigmoid(h_anchor.dot(&h_ctx));
                    // d/ds of -ln σ(s) and -ln (1 - σ(s))
                    let g = if positive {
                        loss -= (prob + EPS).ln();
                        -(1. - prob) * scale
                    } else {
                        loss -= (1. - prob + EPS).ln();
                        prob * scale
                    };
                    let grad = grads.entry(anchor).or_insert_with(|| vec![0.; dim]);
                    for (acc, x) in grad.iter_mut().zip(h_ctx.iter()) {
                        *acc += g * x;
                    }
                    let grad = grads.entry(ctx).or_insert_with(|| vec![0.; dim]);
                    for (acc, x) in grad.iter_mut().zip(h_anchor.iter()) {
                        *acc += g * x;
                    }
                }
            }
        }
        loss * scale
    }
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}
