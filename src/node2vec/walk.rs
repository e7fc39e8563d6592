use rand::Rng;

use crate::edge_index::Adjacency;

/// Second order biased random walks over an adjacency.
#[derive(Debug, Clone, Copy)]
pub struct Walker<'a> {
    adj: &'a Adjacency,
    walk_length: usize,
    /// Acceptance probability for stepping back to the previous node.
    return_prob: f64,
    /// ... for stepping to a neighbour of the previous node.
    common_prob: f64,
    /// ... for moving further away.
    away_prob: f64,
}

impl<'a> Walker<'a> {
    pub fn new(adj: &'a Adjacency, walk_length: usize, p: f64, q: f64) -> Self {
        let max_prob = (1. / p).max(1.).max(1. / q);
        Self {
            adj,
            walk_length,
            return_prob: (1. / p) / max_prob,
            common_prob: 1. / max_prob,
            away_prob: (1. / q) / max_prob,
        }
    }

    /// A walk of `walk_length + 1` nodes beginning at `start`.
    ///
    /// The first step is uniform over neighbours, later steps are biased by the previous node and
    /// drawn by rejection sampling. A node without neighbours stays where it is.
    pub fn walk(&self, start: usize, rng: &mut impl Rng) -> Vec<usize> {
        let mut walk = Vec::with_capacity(self.walk_length + 1);
        walk.push(start);
        let mut prev = None;
        let mut current = start;
        for _ in 0..self.walk_length {
            let neighbors = self.adj.neighbors(current);
            let next = if neighbors.is_empty() {
                current
            } else {
                match prev {
                    None => neighbors[rng.gen_range(0..neighbors.len())],
                    Some(prev) => self.biased_step(neighbors, prev, rng),
                }
            };
            walk.push(next);
            prev = Some(current);
            current = next;
        }
        walk
    }

    fn biased_step(&self, neighbors: &[usize], prev: usize, rng: &mut impl Rng) -> usize {
        loop {
            let candidate = neighbors[rng.gen_range(0..neighbors.len())];
            let accept = if candidate == prev {
                self.return_prob
            } else if self.adj.has_edge(candidate, prev) {
                self.common_prob
            } else {
                self.away_prob
            };
            if rng.gen::<f64>() < accept {
                return candidate;
            }
        }
    }

    /// `start` followed by `walk_length` nodes drawn uniformly from the whole graph.
    pub fn negative(&self, start: usize, rng: &mut impl Rng) -> Vec<usize> {
        let n = self.adj.node_count();
        let mut walk = Vec::with_capacity(self.walk_length + 1);
        walk.push(start);
        walk.extend((0..self.walk_length).map(|_| rng.gen_range(0..n)));
        walk
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::edge_index::EdgeIndex;
    use rand::{rngs::StdRng, SeedableRng};

    /// Path 0 - 1 - 2 - 3 plus isolated node 4.
    fn path() -> Adjacency {
        EdgeIndex::from_pairs(5, [(0, 1), (1, 0), (1, 2), (2, 1), (2, 3), (3, 2)])
            .unwrap()
            .adjacency()
    }

    #[test]
    fn walks_follow_edges() {
        let adj = path();
        let walker = Walker::new(&adj, 10, 0.5, 2.0);
        let mut rng = StdRng::seed_from_u64(1);
        for start in 0..4 {
            let walk = walker.walk(start, &mut rng);
            assert_eq!(walk.len(), 11);
            assert_eq!(walk[0], start);
            for pair in walk.windows(2) {
                assert!(adj.has_edge(pair[0], pair[1]), "{:?}", walk);
            }
        }
    }

    #[test]
    fn isolated_node_stays() {
        let adj = path();
        let walker = Walker::new(&adj, 4, 1.0, 1.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(walker.walk(4, &mut rng), vec![4; 5]);
    }

    #[test]
    fn never_returning() {
        // With a huge p, returning is (almost) never accepted, so on a path the walk keeps going
        // until it hits an end.
        let adj = path();
        let walker = Walker::new(&adj, 3, 1e12, 1.0);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(walker.walk(0, &mut rng), vec![0, 1, 2, 3]);
    }

    #[test]
    fn negative_walks() {
        let adj = path();
        let walker = Walker::new(&adj, 7, 0.5, 2.0);
        let mut rng = StdRng::seed_from_u64(9);
        let walk = walker.negative(2, &mut rng);
        assert_eq!(walk.len(), 8);
        assert_eq!(walk[0], 2);
        assert!(walk.iter().all(|&n| n < 5));
    }
}
