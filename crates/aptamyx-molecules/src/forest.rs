//! Bootstrap-aggregated regression trees.
//!
//! CART trees grown on variance reduction, every feature considered at
//! every split, thresholds at midpoints between adjacent distinct values.
//! Bootstrap draws come from one seeded RNG, so a fixed seed reproduces
//! the same forest and the same predictions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use aptamyx_common::{AptamyxError, Result, ScoringConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for ForestParams {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            n_trees: config.n_trees,
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split.max(2),
            min_samples_leaf: config.min_samples_leaf.max(1),
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => idx = if row[*feature] <= *threshold { *left } else { *right },
            }
        }
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    /// Summed squared error of both children
    sse: f64,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a ForestParams,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn build(mut self, samples: &mut [usize]) -> Tree {
        self.grow(samples, 0);
        Tree { nodes: self.nodes }
    }

    /// Grow the subtree over `samples`, returning its root index.
    fn grow(&mut self, samples: &mut [usize], depth: usize) -> usize {
        let idx = self.nodes.len();
        let n = samples.len() as f64;
        let sum: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let sum_sq: f64 = samples.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let mean = sum / n;
        self.nodes.push(Node::Leaf(mean));

        let parent_sse = sum_sq - sum * sum / n;
        let depth_exhausted = self.params.max_depth.is_some_and(|max| depth >= max);
        if depth_exhausted
            || samples.len() < self.params.min_samples_split
            || parent_sse <= 1e-12
        {
            return idx;
        }

        let Some(split) = self.best_split(samples) else {
            return idx;
        };
        if split.sse >= parent_sse {
            return idx;
        }

        let x = self.x;
        samples.sort_by(|&a, &b| {
            let side = |i: usize| x[i][split.feature] > split.threshold;
            side(a).cmp(&side(b)).then(a.cmp(&b))
        });
        let cut = samples
            .iter()
            .position(|&i| x[i][split.feature] > split.threshold)
            .unwrap_or(samples.len());
        let (left_samples, right_samples) = samples.split_at_mut(cut);

        let left = self.grow(left_samples, depth + 1);
        let right = self.grow(right_samples, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    /// Lowest-SSE split; ties keep the lower feature index, then the lower
    /// threshold.
    fn best_split(&self, samples: &[usize]) -> Option<Split> {
        let n_features = self.x[samples[0]].len();
        let min_leaf = self.params.min_samples_leaf;
        let total = samples.len();
        let mut best: Option<Split> = None;

        let mut order: Vec<usize> = samples.to_vec();
        for feature in 0..n_features {
            order.sort_by(|&a, &b| {
                self.x[a][feature]
                    .partial_cmp(&self.x[b][feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(&b))
            });

            let total_sum: f64 = order.iter().map(|&i| self.y[i]).sum();
            let total_sq: f64 = order.iter().map(|&i| self.y[i] * self.y[i]).sum();
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;

            for k in 0..total - 1 {
                let yi = self.y[order[k]];
                left_sum += yi;
                left_sq += yi * yi;

                let n_left = k + 1;
                let n_right = total - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let here = self.x[order[k]][feature];
                let next = self.x[order[k + 1]][feature];
                if here >= next {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / n_left as f64)
                    + (right_sq - right_sum * right_sum / n_right as f64);
                if best.as_ref().map_or(true, |b| sse < b.sse - 1e-12) {
                    best = Some(Split {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        sse,
                    });
                }
            }
        }
        best
    }
}

/// Random-forest regressor with `fit`/`predict` semantics.
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    params: ForestParams,
    n_features: usize,
    trees: Vec<Tree>,
}

impl RandomForestRegressor {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        if x.is_empty() {
            return Err(AptamyxError::ModelFit("no training samples".into()));
        }
        if x.len() != y.len() {
            return Err(AptamyxError::ModelFit(format!(
                "{} feature rows but {} targets",
                x.len(),
                y.len()
            )));
        }
        if self.params.n_trees == 0 {
            return Err(AptamyxError::ModelFit("n_trees must be at least 1".into()));
        }
        let n_features = x[0].len();
        if let Some(row) = x.iter().position(|r| r.len() != n_features) {
            return Err(AptamyxError::ModelFit(format!(
                "row {row} has {} features, expected {n_features}",
                x[row].len()
            )));
        }
        if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
            return Err(AptamyxError::ModelFit("non-finite value in training data".into()));
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let n = x.len();
        self.trees = (0..self.params.n_trees)
            .map(|_| {
                let mut samples: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                TreeBuilder {
                    x,
                    y,
                    params: &self.params,
                    nodes: Vec::new(),
                }
                .build(&mut samples)
            })
            .collect();
        self.n_features = n_features;
        Ok(())
    }

    /// Mean of the per-tree predictions for each row.
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(AptamyxError::ModelFit("model has not been fitted".into()));
        }
        x.iter()
            .enumerate()
            .map(|(i, row)| {
                if row.len() != self.n_features {
                    return Err(AptamyxError::ModelFit(format!(
                        "row {i} has {} features, model expects {}",
                        row.len(),
                        self.n_features
                    )));
                }
                let total: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
                Ok(total / self.trees.len() as f64)
            })
            .collect()
    }
}
