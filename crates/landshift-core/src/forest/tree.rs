//! Binary CART tree with Gini splits, stored as a flat node arena.
use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// `value` is the positive fraction of the training samples reaching it.
    Leaf { value: f64, n_samples: usize },
    /// Rows with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

/// Growth limits of one tree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeLimits {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn as split candidates at each node.
    pub max_features: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Root at index 0.
    nodes: Vec<Node>,
}

struct Pending {
    slot: usize,
    samples: Vec<usize>,
    depth: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f32,
    /// Weighted Gini of the children times node size.
    child_impurity: f64,
}

impl DecisionTree {
    /// Grow a tree on the rows listed in `samples` (repeats allowed).
    ///
    /// Impurity decrease per feature is added to `importances`.
    pub(crate) fn grow<R: AsRef<[f32]>>(
        x: &[R],
        y: &[bool],
        samples: Vec<usize>,
        limits: TreeLimits,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> Self {
        let n_features = importances.len();
        let mut nodes = vec![Node::Leaf { value: 0.0, n_samples: 0 }];
        let mut stack = vec![Pending { slot: 0, samples, depth: 0 }];

        while let Some(Pending { slot, samples, depth }) = stack.pop() {
            let n = samples.len();
            let pos = samples.iter().filter(|&&i| y[i]).count();
            let leaf = Node::Leaf {
                value: if n == 0 { 0.0 } else { pos as f64 / n as f64 },
                n_samples: n,
            };

            let depth_ok = limits.max_depth.map_or(true, |d| depth < d);
            if n_features == 0 || !depth_ok || n < limits.min_samples_split || pos == 0 || pos == n
            {
                nodes[slot] = leaf;
                continue;
            }

            let parent_impurity = gini(pos, n) * n as f64;
            let k = limits.max_features.clamp(1, n_features);
            let candidates = index::sample(rng, n_features, k).into_vec();
            let best = best_split(x, y, &samples, &candidates, limits.min_samples_leaf);

            let Some(best) = best.filter(|b| b.child_impurity < parent_impurity - 1e-12) else {
                nodes[slot] = leaf;
                continue;
            };

            importances[best.feature] += parent_impurity - best.child_impurity;

            let (left, right): (Vec<usize>, Vec<usize>) = samples
                .into_iter()
                .partition(|&i| x[i].as_ref()[best.feature] <= best.threshold);

            let left_slot = nodes.len();
            let right_slot = left_slot + 1;
            nodes.push(Node::Leaf { value: 0.0, n_samples: 0 });
            nodes.push(Node::Leaf { value: 0.0, n_samples: 0 });
            nodes[slot] = Node::Split {
                feature: best.feature,
                threshold: best.threshold,
                left: left_slot,
                right: right_slot,
            };
            stack.push(Pending { slot: right_slot, samples: right, depth: depth + 1 });
            stack.push(Pending { slot: left_slot, samples: left, depth: depth + 1 });
        }

        Self { nodes }
    }

    /// Positive-class probability of one row.
    pub fn predict(&self, row: &[f32]) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { value, .. } => return *value,
                Node::Split { feature, threshold, left, right } => {
                    i = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], i: usize) -> usize {
            match &nodes[i] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Gini impurity of a binary node: 1 - p² - (1-p)².
fn gini(pos: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = pos as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

fn best_split<R: AsRef<[f32]>>(
    x: &[R],
    y: &[bool],
    samples: &[usize],
    candidates: &[usize],
    min_leaf: usize,
) -> Option<BestSplit> {
    let n = samples.len();
    let total_pos = samples.iter().filter(|&&i| y[i]).count();
    let mut best: Option<BestSplit> = None;
    let mut sorted = samples.to_vec();

    for &f in candidates {
        let value = |i: usize| x[i].as_ref()[f];
        sorted.sort_by(|&a, &b| value(a).partial_cmp(&value(b)).unwrap_or(Ordering::Equal));

        let mut left_pos = 0;
        for k in 1..n {
            if y[sorted[k - 1]] {
                left_pos += 1;
            }
            let (lo, hi) = (value(sorted[k - 1]), value(sorted[k]));
            if lo == hi || k < min_leaf || n - k < min_leaf {
                continue;
            }
            let right_pos = total_pos - left_pos;
            let impurity = gini(left_pos, k) * k as f64 + gini(right_pos, n - k) * (n - k) as f64;
            if best.as_ref().map_or(true, |b| impurity < b.child_impurity) {
                let mut threshold = lo + (hi - lo) / 2.0;
                // midpoint can round up to `hi` for adjacent floats
                if threshold >= hi {
                    threshold = lo;
                }
                best = Some(BestSplit { feature: f, threshold, child_impurity: impurity });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn limits() -> TreeLimits {
        TreeLimits {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: 2,
        }
    }

    #[test]
    fn separable_data_is_fit_exactly() {
        let x: Vec<Vec<f32>> = (0..20).map(|i| vec![i as f32, 0.0]).collect();
        let y: Vec<bool> = (0..20).map(|i| i >= 12).collect();
        let mut imp = vec![0.0; 2];
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::grow(&x, &y, (0..20).collect(), limits(), &mut rng, &mut imp);

        assert_eq!(tree.depth(), 1);
        for (row, &label) in x.iter().zip(&y) {
            assert_eq!(tree.predict(row), if label { 1.0 } else { 0.0 });
        }
        assert!(imp[0] > 0.0);
        assert_eq!(imp[1], 0.0);
    }

    #[test]
    fn depth_limit_is_respected() {
        // alternating labels force many splits
        let x: Vec<Vec<f32>> = (0..64).map(|i| vec![i as f32]).collect();
        let y: Vec<bool> = (0..64).map(|i| (i / 4) % 2 == 0).collect();
        let mut imp = vec![0.0; 1];
        let mut rng = StdRng::seed_from_u64(3);
        let lim = TreeLimits { max_depth: Some(3), max_features: 1, ..limits() };
        let tree = DecisionTree::grow(&x, &y, (0..64).collect(), lim, &mut rng, &mut imp);
        assert!(tree.depth() <= 3);
    }

    #[test]
    fn min_samples_leaf_blocks_small_children() {
        let x: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32]).collect();
        let y: Vec<bool> = (0..10).map(|i| i == 9).collect();
        let mut imp = vec![0.0; 1];
        let mut rng = StdRng::seed_from_u64(0);
        let lim = TreeLimits { min_samples_leaf: 3, max_features: 1, ..limits() };
        let tree = DecisionTree::grow(&x, &y, (0..10).collect(), lim, &mut rng, &mut imp);
        for node in tree.nodes() {
            if let Node::Leaf { n_samples, .. } = node {
                assert!(*n_samples >= 3);
            }
        }
    }

    #[test]
    fn pure_node_is_a_leaf() {
        let x = vec![vec![1.0f32], vec![2.0]];
        let y = vec![true, true];
        let mut imp = vec![0.0; 1];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = DecisionTree::grow(&x, &y, vec![0, 1], limits(), &mut rng, &mut imp);
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.predict(&[5.0]), 1.0);
    }

    #[test]
    fn gini_of_binary_node() {
        assert_eq!(gini(0, 4), 0.0);
        assert_eq!(gini(4, 4), 0.0);
        assert_eq!(gini(2, 4), 0.5);
    }
}
