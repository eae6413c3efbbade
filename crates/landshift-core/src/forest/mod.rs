//! Random forest of binary classification trees.
//!
//! Each tree is grown on a bootstrap resample with `sqrt(n_features)`
//! candidate features per split. Tree `i` draws from its own
//! `StdRng::seed_from_u64(seed + i)`, so the fitted forest is the same with
//! or without the `threading` feature.
mod tree;

pub use tree::{DecisionTree, Node};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ForestError;
use tree::TreeLimits;

#[cfg(feature = "threading")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// None grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<(), ForestError> {
        if self.n_estimators == 0 {
            return Err(ForestError::InvalidParams("n_estimators must be positive".into()));
        }
        if self.max_depth == Some(0) {
            return Err(ForestError::InvalidParams("max_depth must be positive".into()));
        }
        if self.min_samples_split < 2 {
            return Err(ForestError::InvalidParams("min_samples_split must be >= 2".into()));
        }
        if self.min_samples_leaf == 0 {
            return Err(ForestError::InvalidParams("min_samples_leaf must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<DecisionTree>,
    /// Mean decrease in impurity, normalized to sum to 1 (all zero if no
    /// tree ever split).
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit<R>(params: ForestParams, x: &[R], y: &[bool], seed: u64) -> Result<Self, ForestError>
    where
        R: AsRef<[f32]> + Sync,
    {
        params.validate()?;
        if x.is_empty() {
            return Err(ForestError::EmptyInput);
        }
        if x.len() != y.len() {
            return Err(ForestError::LengthMismatch { rows: x.len(), labels: y.len() });
        }
        let n_features = x[0].as_ref().len();
        if let Some((row, r)) = x.iter().enumerate().find(|(_, r)| r.as_ref().len() != n_features) {
            return Err(ForestError::RaggedRow {
                row,
                found: r.as_ref().len(),
                expected: n_features,
            });
        }

        let limits = TreeLimits {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: ((n_features as f64).sqrt() as usize).max(1),
        };
        let grow = |i: usize| -> (DecisionTree, Vec<f64>) {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            let samples = bootstrap_sample(x.len(), &mut rng);
            let mut imp = vec![0.0; n_features];
            let tree = DecisionTree::grow(x, y, samples, limits, &mut rng, &mut imp);
            normalize(&mut imp);
            (tree, imp)
        };

        #[cfg(feature = "threading")]
        let grown: Vec<(DecisionTree, Vec<f64>)> =
            (0..params.n_estimators).into_par_iter().map(grow).collect();
        #[cfg(not(feature = "threading"))]
        let grown: Vec<(DecisionTree, Vec<f64>)> = (0..params.n_estimators).map(grow).collect();

        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, imp) in grown {
            for (acc, v) in importances.iter_mut().zip(&imp) {
                *acc += v;
            }
            trees.push(tree);
        }
        normalize(&mut importances);

        Ok(Self { params, n_features, trees, importances })
    }

    /// Mean of the per-tree leaf fractions; always in [0, 1].
    pub fn predict_proba_one(&self, row: &[f32]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        sum / self.trees.len() as f64
    }

    pub fn predict_proba<R: AsRef<[f32]>>(&self, x: &[R]) -> Vec<f64> {
        x.iter().map(|r| self.predict_proba_one(r.as_ref())).collect()
    }

    /// `predict_proba` for rows of unchecked width.
    pub fn try_predict_proba<R: AsRef<[f32]>>(&self, x: &[R]) -> Result<Vec<f64>, ForestError> {
        if let Some(r) = x.iter().find(|r| r.as_ref().len() != self.n_features) {
            return Err(ForestError::FeatureCount {
                found: r.as_ref().len(),
                expected: self.n_features,
            });
        }
        Ok(self.predict_proba(x))
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

/// Sample `n` indices with replacement.
fn bootstrap_sample(n: usize, rng: &mut StdRng) -> Vec<usize> {
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

fn normalize(v: &mut [f64]) {
    let total: f64 = v.iter().sum();
    if total > 0.0 {
        v.iter_mut().for_each(|x| *x /= total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Label depends on feature 0 only; feature 1 is noise.
    fn threshold_data(n: usize) -> (Vec<Vec<f32>>, Vec<bool>) {
        let mut rng = StdRng::seed_from_u64(99);
        let x: Vec<Vec<f32>> = (0..n).map(|_| vec![rng.gen::<f32>(), rng.gen::<f32>()]).collect();
        let y = x.iter().map(|r| r[0] > 0.6).collect();
        (x, y)
    }

    fn small() -> ForestParams {
        ForestParams { n_estimators: 15, max_depth: Some(6), ..ForestParams::default() }
    }

    #[test]
    fn learns_a_threshold() {
        let (x, y) = threshold_data(300);
        let rf = RandomForest::fit(small(), &x, &y, 7).unwrap();
        assert!(rf.predict_proba_one(&[0.9, 0.5]) > 0.8);
        assert!(rf.predict_proba_one(&[0.1, 0.5]) < 0.2);
        assert_eq!(rf.trees().len(), 15);
    }

    #[test]
    fn probabilities_stay_in_unit_interval() {
        let (x, y) = threshold_data(120);
        let rf = RandomForest::fit(small(), &x, &y, 1).unwrap();
        assert!(rf.predict_proba(&x).iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = threshold_data(100);
        let a = RandomForest::fit(small(), &x, &y, 5).unwrap();
        let b = RandomForest::fit(small(), &x, &y, 5).unwrap();
        assert_eq!(a, b);
        let c = RandomForest::fit(small(), &x, &y, 6).unwrap();
        assert_ne!(a.trees(), c.trees());
    }

    #[test]
    fn importances_favour_the_informative_feature() {
        let (x, y) = threshold_data(300);
        let rf = RandomForest::fit(small(), &x, &y, 11).unwrap();
        let imp = rf.feature_importances();
        assert_relative_eq!(imp.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(imp[0] > imp[1]);
    }

    #[test]
    fn rejects_bad_input() {
        let p = ForestParams::default();
        let empty: Vec<Vec<f32>> = Vec::new();
        assert_eq!(RandomForest::fit(p, &empty, &[], 0).unwrap_err(), ForestError::EmptyInput);
        let x = vec![vec![1.0f32, 2.0], vec![1.0]];
        assert!(matches!(
            RandomForest::fit(p, &x, &[true, false], 0),
            Err(ForestError::RaggedRow { row: 1, found: 1, expected: 2 })
        ));
        assert!(matches!(
            RandomForest::fit(p, &x, &[true], 0),
            Err(ForestError::LengthMismatch { .. })
        ));
        let zero = ForestParams { n_estimators: 0, ..p };
        assert!(matches!(
            RandomForest::fit(zero, &x, &[true, false], 0),
            Err(ForestError::InvalidParams(_))
        ));
    }

    #[test]
    fn wrong_width_rows_are_rejected() {
        let (x, y) = threshold_data(60);
        let rf = RandomForest::fit(small(), &x, &y, 4).unwrap();
        assert_eq!(
            rf.try_predict_proba(&[vec![0.5f32]]).unwrap_err(),
            ForestError::FeatureCount { found: 1, expected: 2 }
        );
        assert_eq!(rf.try_predict_proba(&x).unwrap(), rf.predict_proba(&x));
    }

    #[test]
    fn serde_round_trip_keeps_predictions() {
        let (x, y) = threshold_data(80);
        let rf = RandomForest::fit(small(), &x, &y, 2).unwrap();
        let json = serde_json::to_string(&rf).unwrap();
        let back: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(rf.predict_proba(&x), back.predict_proba(&x));
    }
}
