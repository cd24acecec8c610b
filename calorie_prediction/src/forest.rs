//! Bagged ensemble of CART regression trees.
//!
//! Fitted forests serialize to JSON; that document is the model artifact the
//! service loads from disk. Each tree is a flat node list where split nodes
//! point at their children by index, so a tree can be walked without recursion.

use ndarray::{ArrayView1, ArrayView2};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForestError {
    #[error("cannot fit a forest on an empty dataset")]
    EmptyDataset,
    #[error("{rows} feature rows but {targets} targets")]
    ShapeMismatch { rows: usize, targets: usize },
    #[error("n_estimators must be at least 1")]
    NoEstimators,
    #[error("model expects {expected} features, got {got}")]
    FeatureMismatch { expected: usize, got: usize },
    #[error("tree {tree} is malformed: {reason}")]
    MalformedTree { tree: usize, reason: String },
    #[error("invalid model document: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_random_state")]
    pub random_state: u64,
}

fn default_n_estimators() -> usize {
    100
}

fn default_max_depth() -> usize {
    6
}

fn default_random_state() -> u64 {
    1
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_depth: default_max_depth(),
            random_state: default_random_state(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    error: f64,
}

impl RegressionTree {
    fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, samples: Vec<usize>, max_depth: usize) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, y, samples, 0, max_depth);
        tree
    }

    fn grow(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        samples: Vec<usize>,
        depth: usize,
        max_depth: usize,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: mean(y, &samples),
        });

        if depth >= max_depth || samples.len() < 2 {
            return id;
        }
        let Some(split) = best_split(x, y, &samples) else {
            return id;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .copied()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);

        let left = self.grow(x, y, left_samples, depth + 1, max_depth);
        let right = self.grow(x, y, right_samples, depth + 1, max_depth);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };

        id
    }

    fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    // Children must sit after their parent; that rules out cycles and keeps
    // `predict` terminating on documents we did not produce ourselves.
    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (id, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(format!("leaf {} has a non-finite value", id));
                }
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {} splits on unknown feature {}", id, feature));
                    }
                    for child in [left, right] {
                        if *child <= id || *child >= self.nodes.len() {
                            return Err(format!("node {} has invalid child {}", id, child));
                        }
                    }
                }
                Node::Leaf { .. } => {}
            }
        }
        Ok(())
    }
}

fn mean(y: ArrayView1<f64>, samples: &[usize]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&i| y[i]).sum::<f64>() / samples.len() as f64
}

fn squared_error(sum: f64, sum_sq: f64, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    (sum_sq - sum * sum / count as f64).max(0.0)
}

fn best_split(x: ArrayView2<f64>, y: ArrayView1<f64>, samples: &[usize]) -> Option<SplitCandidate> {
    const EPSILON: f64 = 1e-9;

    let total_sum: f64 = samples.iter().map(|&i| y[i]).sum();
    let total_sum_sq: f64 = samples.iter().map(|&i| y[i] * y[i]).sum();
    let parent_error = squared_error(total_sum, total_sum_sq, samples.len());

    let mut best: Option<SplitCandidate> = None;
    let mut sorted = samples.to_vec();

    for feature in 0..x.ncols() {
        sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let mut left_sum = 0.0;
        let mut left_sum_sq = 0.0;
        for k in 1..sorted.len() {
            let target = y[sorted[k - 1]];
            left_sum += target;
            left_sum_sq += target * target;

            let lower = x[[sorted[k - 1], feature]];
            let upper = x[[sorted[k], feature]];
            if lower >= upper {
                continue;
            }

            let error = squared_error(left_sum, left_sum_sq, k)
                + squared_error(
                    total_sum - left_sum,
                    total_sum_sq - left_sum_sq,
                    sorted.len() - k,
                );
            if best.as_ref().is_some_and(|b| error >= b.error - EPSILON) {
                continue;
            }

            let mut threshold = (lower + upper) / 2.0;
            if threshold >= upper {
                threshold = lower;
            }
            best = Some(SplitCandidate {
                feature,
                threshold,
                error,
            });
        }
    }

    best.filter(|b| b.error < parent_error - EPSILON)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    n_features: usize,
    params: ForestParams,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    /// Fits `params.n_estimators` trees, each on a bootstrap sample of the
    /// rows of `x`. The same data and `random_state` always give the same forest.
    pub fn fit(
        params: ForestParams,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<Self, ForestError> {
        if params.n_estimators == 0 {
            return Err(ForestError::NoEstimators);
        }
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(ForestError::EmptyDataset);
        }
        if x.nrows() != y.len() {
            return Err(ForestError::ShapeMismatch {
                rows: x.nrows(),
                targets: y.len(),
            });
        }

        let n_samples = x.nrows();
        let mut rng = StdRng::seed_from_u64(params.random_state);
        let trees = (0..params.n_estimators)
            .map(|_| {
                let bootstrap = (0..n_samples)
                    .map(|_| rng.random_range(0..n_samples))
                    .collect();
                RegressionTree::fit(x, y, bootstrap, params.max_depth)
            })
            .collect();

        Ok(Self {
            n_features: x.ncols(),
            params,
            trees,
        })
    }

    /// Mean of the per-tree predictions for a single feature row.
    pub fn predict_row(&self, row: ArrayView1<f64>) -> Result<f64, ForestError> {
        if row.len() != self.n_features {
            return Err(ForestError::FeatureMismatch {
                expected: self.n_features,
                got: row.len(),
            });
        }
        let total: f64 = self.trees.iter().map(|tree| tree.predict(row)).sum();
        Ok(total / self.trees.len() as f64)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn params(&self) -> ForestParams {
        self.params
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn to_json(&self) -> Result<String, ForestError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes and structurally checks a serialized forest.
    pub fn from_json(document: &str) -> Result<Self, ForestError> {
        let forest: Self = serde_json::from_str(document)?;
        if forest.trees.is_empty() {
            return Err(ForestError::NoEstimators);
        }
        for (index, tree) in forest.trees.iter().enumerate() {
            tree.validate(forest.n_features)
                .map_err(|reason| ForestError::MalformedTree {
                    tree: index,
                    reason,
                })?;
        }
        Ok(forest)
    }
}
