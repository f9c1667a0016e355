//! Seeded random forest over dense `f64` rows.
//!
//! CART trees grown on bootstrap samples. Regression splits minimise squared
//! error; classification (targets 0/1) minimises Gini impurity. Leaves store
//! the mean target, so a classification prediction is the home-win share.

use anyhow::{Result, bail};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, RngCore, SeedableRng};

use crate::config::{ForestSettings, Task};
use crate::error::PipelineError;

const MIN_DECREASE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxFeatures {
    All,
    Sqrt,
}

impl MaxFeatures {
    pub fn for_task(task: Task) -> Self {
        match task {
            Task::Regression => MaxFeatures::All,
            Task::Classification => MaxFeatures::Sqrt,
        }
    }

    fn count(self, n_features: usize) -> usize {
        match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => ((n_features as f64).sqrt().floor() as usize).clamp(1, n_features),
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
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

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut at = 0usize;
        loop {
            match &self.nodes[at] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    at = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

struct Grower<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    task: Task,
    settings: &'a ForestSettings,
    max_features: usize,
    nodes: Vec<Node>,
    /// Impurity decrease credited to each feature.
    gains: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

impl Grower<'_> {
    fn grow(&mut self, samples: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let (n, sum, sum_sq) = moments(self.y, &samples);
        let cost = node_cost(self.task, n, sum, sum_sq);
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: sum / n });

        if depth >= self.settings.max_depth
            || samples.len() < self.settings.min_samples_split
            || samples.len() < 2 * self.settings.min_samples_leaf
            || cost <= MIN_DECREASE
        {
            return id;
        }

        let Some(best) = self.best_split(&samples, cost, rng) else {
            return id;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.x[i][best.feature] <= best.threshold);
        self.gains[best.feature] += best.decrease;

        let left = self.grow(left, depth + 1, rng);
        let right = self.grow(right, depth + 1, rng);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&self, samples: &[usize], parent_cost: f64, rng: &mut StdRng) -> Option<BestSplit> {
        let n_features = self.gains.len();
        let candidates = index::sample(rng, n_features, self.max_features).into_vec();
        let min_leaf = self.settings.min_samples_leaf.max(1);
        let total = samples.len();

        let mut best: Option<BestSplit> = None;
        let mut column: Vec<(f64, f64)> = Vec::with_capacity(total);
        for feature in candidates {
            column.clear();
            column.extend(samples.iter().map(|&i| (self.x[i][feature], self.y[i])));
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let (all_n, all_sum, all_sq) = (
                total as f64,
                column.iter().map(|c| c.1).sum::<f64>(),
                column.iter().map(|c| c.1 * c.1).sum::<f64>(),
            );
            let (mut l_sum, mut l_sq) = (0.0, 0.0);
            for pos in 0..total - 1 {
                let (value, target) = column[pos];
                l_sum += target;
                l_sq += target * target;
                let l_n = pos + 1;
                if l_n < min_leaf || total - l_n < min_leaf {
                    continue;
                }
                let next = column[pos + 1].0;
                if value >= next {
                    continue;
                }
                let r_n = all_n - l_n as f64;
                let children = node_cost(self.task, l_n as f64, l_sum, l_sq)
                    + node_cost(self.task, r_n, all_sum - l_sum, all_sq - l_sq);
                let decrease = parent_cost - children;
                if decrease > MIN_DECREASE && best.as_ref().is_none_or(|b| decrease > b.decrease) {
                    best = Some(BestSplit {
                        feature,
                        threshold: value + (next - value) / 2.0,
                        decrease,
                    });
                }
            }
        }
        best
    }
}

fn moments(y: &[f64], samples: &[usize]) -> (f64, f64, f64) {
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for &i in samples {
        sum += y[i];
        sum_sq += y[i] * y[i];
    }
    (samples.len() as f64, sum, sum_sq)
}

/// Node impurity scaled by sample count: squared error for regression,
/// `n * gini` for 0/1 classification.
fn node_cost(task: Task, n: f64, sum: f64, sum_sq: f64) -> f64 {
    if n <= 0.0 {
        return 0.0;
    }
    match task {
        Task::Regression => (sum_sq - sum * sum / n).max(0.0),
        Task::Classification => (2.0 * sum * (n - sum) / n).max(0.0),
    }
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    task: Task,
    n_features: usize,
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        task: Task,
        settings: &ForestSettings,
        seed: u64,
    ) -> Result<Self> {
        if x.is_empty() {
            return Err(PipelineError::NoTrainingData("empty design matrix".to_string()).into());
        }
        if x.len() != y.len() {
            bail!("design matrix has {} rows but target has {}", x.len(), y.len());
        }
        let n_features = x[0].len();
        if n_features == 0 {
            return Err(PipelineError::NoFeatureColumns.into());
        }
        if let Some(bad) = x.iter().position(|row| row.len() != n_features) {
            bail!("row {bad} has {} features, expected {n_features}", x[bad].len());
        }
        if task == Task::Classification && y.iter().any(|v| *v != 0.0 && *v != 1.0) {
            bail!("classification targets must be 0 or 1");
        }

        let mut master = StdRng::seed_from_u64(seed);
        let max_features = MaxFeatures::for_task(task).count(n_features);
        let n = x.len();
        let mut trees = Vec::with_capacity(settings.trees);
        let mut importances = vec![0.0; n_features];

        for _ in 0..settings.trees.max(1) {
            let mut rng = StdRng::seed_from_u64(master.next_u64());
            let samples: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut grower = Grower {
                x,
                y,
                task,
                settings,
                max_features,
                nodes: Vec::new(),
                gains: vec![0.0; n_features],
            };
            grower.grow(samples, 0, &mut rng);

            let total: f64 = grower.gains.iter().sum();
            if total > 0.0 {
                for (acc, g) in importances.iter_mut().zip(&grower.gains) {
                    *acc += g / total;
                }
            }
            trees.push(Tree {
                nodes: grower.nodes,
            });
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in importances.iter_mut() {
                *v /= total;
            }
        }

        Ok(Self {
            task,
            n_features,
            trees,
            importances,
        })
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean of the trees: expected margin, or home-win probability.
    pub fn predict(&self, row: &[f64]) -> f64 {
        let preds = self.tree_predictions(row);
        preds.iter().sum::<f64>() / preds.len().max(1) as f64
    }

    pub fn tree_predictions(&self, row: &[f64]) -> Vec<f64> {
        self.trees.iter().map(|t| t.predict(row)).collect()
    }

    /// Mean impurity decrease per feature; sums to 1 unless no tree split.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}
