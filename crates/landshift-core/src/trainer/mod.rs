//! Per-class transition models.
//!
//! For a target class `c` the binary label of a row is "moved into `c`":
//! prior ≠ c and posterior = c. Rows already in `c` at the prior epoch are
//! left out of that class's data entirely.
pub mod search;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::ClassError;
use crate::features::{FeatureMatrix, FeatureSchema};
use crate::forest::{ForestParams, RandomForest};
use crate::legend::ClassId;
use crate::metrics::roc_auc;
use crate::sampling::{stratified_split, StratifiedKFold};

pub use search::{grid_search, CandidateScore, SearchOutcome, SearchSpace};

/// Transition label of one row for target class `c`.
///
/// None when the row is excluded: it already belongs to `c`, or no posterior
/// class was recorded.
pub fn transition_label(prior: ClassId, posterior: Option<ClassId>, c: ClassId) -> Option<bool> {
    if prior == c {
        return None;
    }
    posterior.map(|post| post == c)
}

/// The class-specific slice of the training pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDataset {
    pub class: ClassId,
    /// Row indices into the feature matrix, ascending.
    pub rows: Vec<usize>,
    pub labels: Vec<bool>,
}

impl ClassDataset {
    pub fn derive(matrix: &FeatureMatrix, class: ClassId) -> Self {
        let (rows, labels) = matrix
            .training_indices()
            .iter()
            .filter_map(|&i| {
                let r = matrix.row(i);
                transition_label(r.prior, r.posterior, class).map(|l| (i, l))
            })
            .unzip();
        Self { class, rows, labels }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l).count()
    }

    fn degenerate(&self, n_rows: usize, positives: usize, note: Option<String>) -> ClassError {
        let present = match (n_rows, positives) {
            (0, _) => "no",
            (_, 0) => "negative",
            _ => "positive",
        };
        ClassError::DegenerateClass {
            class: self.class,
            present: present.to_string(),
            n_rows,
            note,
        }
    }
}

/// How the final hyperparameters were chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Selection {
    /// Tuning disabled.
    Defaults,
    /// Mean cross-validated ROC AUC of the winning candidate.
    GridSearch { cv_roc_auc: f64, candidates: usize },
}

/// A fitted, immutable per-class model with its held-out partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub class: ClassId,
    pub params: ForestParams,
    pub selection: Selection,
    pub schema: FeatureSchema,
    pub forest: RandomForest,
    pub n_train: usize,
    pub n_train_positive: usize,
    /// Held-out rows (feature matrix indices) and their labels.
    pub test_rows: Vec<usize>,
    pub test_labels: Vec<bool>,
}

impl TrainedModel {
    /// Feature names paired with their importances, highest first.
    pub fn ranked_importances(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .schema
            .features
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.forest.feature_importances().iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Fit the class-`c` model on the shared feature matrix.
pub fn train_class(
    matrix: &FeatureMatrix,
    class: ClassId,
    cfg: &PipelineConfig,
) -> Result<TrainedModel, ClassError> {
    let data = ClassDataset::derive(matrix, class);
    let n = data.len();
    let positives = data.positives();
    debug!(class, rows = n, positives, "class dataset derived");

    if positives == 0 || positives == n {
        let note = (n > 0 && positives == n && scope_is_gains_only(cfg, class)).then(|| {
            format!(
                "focus mode keeps only rows touching class {class} and rows already in it are \
                 excluded, so every remaining row is a gain"
            )
        });
        return Err(data.degenerate(n, positives, note));
    }
    if positives < cfg.min_positive_samples {
        return Err(ClassError::InsufficientPositives {
            class,
            positives,
            required: cfg.min_positive_samples,
        });
    }

    let split = stratified_split(&data.labels, cfg.test_size, cfg.random_seed);
    let train_rows: Vec<usize> = split.train.iter().map(|&k| data.rows[k]).collect();
    let train_labels: Vec<bool> = split.train.iter().map(|&k| data.labels[k]).collect();
    let train_pos = train_labels.iter().filter(|&&l| l).count();
    if train_pos == 0 || train_pos == train_labels.len() {
        return Err(data.degenerate(train_labels.len(), train_pos, None));
    }

    let x: Vec<&[f32]> = train_rows.iter().map(|&i| matrix.features(i)).collect();

    let (params, selection) = if cfg.hyperparameter_tuning {
        let candidates = SearchSpace::from_config(cfg).candidates();
        let folds = StratifiedKFold::new(cfg.cv_folds, cfg.random_seed);
        let outcome = grid_search(&candidates, |p| {
            cv_roc_auc(p, &x, &train_labels, &folds, cfg.random_seed)
        })
        .ok_or(ClassError::SearchFailed { class })?;
        debug!(class, best = ?outcome.best, score = outcome.best_score, "grid search done");
        (
            outcome.best,
            Selection::GridSearch {
                cv_roc_auc: outcome.best_score,
                candidates: candidates.len(),
            },
        )
    } else {
        (cfg.default_params(), Selection::Defaults)
    };

    let forest = RandomForest::fit(params, &x, &train_labels, cfg.random_seed).map_err(|e| {
        ClassError::Fit {
            class,
            message: e.to_string(),
        }
    })?;

    info!(
        class,
        n_train = train_rows.len(),
        n_test = split.test.len(),
        n_estimators = params.n_estimators,
        max_depth = ?params.max_depth,
        "model fitted"
    );

    Ok(TrainedModel {
        class,
        params,
        selection,
        schema: matrix.schema().clone(),
        forest,
        n_train: train_rows.len(),
        n_train_positive: train_pos,
        test_rows: split.test.iter().map(|&k| data.rows[k]).collect(),
        test_labels: split.test.iter().map(|&k| data.labels[k]).collect(),
    })
}

/// True when the training pool was restricted to rows touching `class`:
/// after self-transitions are dropped only gains into `class` remain.
fn scope_is_gains_only(cfg: &PipelineConfig, class: ClassId) -> bool {
    cfg.class_scope().focus_class() == Some(class)
}

/// Mean ROC AUC over the folds where it is defined.
fn cv_roc_auc(
    params: &ForestParams,
    x: &[&[f32]],
    y: &[bool],
    folds: &StratifiedKFold,
    seed: u64,
) -> Option<f64> {
    let mut scores = Vec::new();
    for fold in folds.split(y) {
        if fold.train.is_empty() || fold.test.is_empty() {
            continue;
        }
        let fx: Vec<&[f32]> = fold.train.iter().map(|&i| x[i]).collect();
        let fy: Vec<bool> = fold.train.iter().map(|&i| y[i]).collect();
        let Ok(forest) = RandomForest::fit(*params, &fx, &fy, seed) else {
            continue;
        };
        let tx: Vec<&[f32]> = fold.test.iter().map(|&i| x[i]).collect();
        let ty: Vec<bool> = fold.test.iter().map(|&i| y[i]).collect();
        if let Some(auc) = roc_auc(&forest.predict_proba(&tx), &ty) {
            scores.push(auc);
        }
    }
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{CovariateLayer, FeatureInputs, FeatureMatrixBuilder, MASK_USABLE};
    use crate::grid::{Grid, GridFrame};
    use crate::legend::{LegendEntry, LegendTable};

    #[test]
    fn label_is_pure_function_of_classes() {
        assert_eq!(transition_label(6, Some(3), 3), Some(true));
        assert_eq!(transition_label(6, Some(6), 3), Some(false));
        assert_eq!(transition_label(6, Some(1), 3), Some(false));
        assert_eq!(transition_label(3, Some(3), 3), None);
        assert_eq!(transition_label(3, Some(6), 3), None);
        assert_eq!(transition_label(6, None, 3), None);
    }

    /// 30×30 forest grid; cells in the east third turn into cropland.
    fn east_conversion() -> (LegendTable, FeatureMatrix) {
        let legend =
            LegendTable::from_entries(&[LegendEntry::new(211, 3), LegendEntry::new(311, 6)]).unwrap();
        let frame = GridFrame::unit(30, 30);
        let prior = Grid::filled(frame.clone(), 311);
        let posterior = Grid::from_vec(
            frame.clone(),
            (0..900).map(|i| if i % 30 >= 20 { 211 } else { 311 }).collect(),
        );
        let mask = Grid::filled(frame.clone(), MASK_USABLE);
        let east = Grid::from_vec(frame.clone(), (0..900).map(|i| (i % 30) as f32).collect());
        let north = Grid::from_vec(frame, (0..900).map(|i| (i / 30) as f32).collect());
        let covs = [CovariateLayer::numeric("easting", east), CovariateLayer::numeric("northing", north)];
        let matrix = FeatureMatrixBuilder::new(&legend)
            .build(FeatureInputs {
                prior: &prior,
                posterior: Some(&posterior),
                mask: &mask,
                covariates: &covs,
            })
            .unwrap();
        (legend, matrix)
    }

    fn quick_config() -> PipelineConfig {
        PipelineConfig {
            n_estimators_range: vec![10, 20],
            max_depth_range: vec![Some(4), None],
            cv_folds: 3,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn class_dataset_excludes_self_transitions() {
        let (_, matrix) = east_conversion();
        let forest_class = ClassDataset::derive(&matrix, 6);
        assert!(forest_class.is_empty());
        let cropland = ClassDataset::derive(&matrix, 3);
        assert_eq!(cropland.len(), 900);
        assert_eq!(cropland.positives(), 300);
    }

    #[test]
    fn trains_and_keeps_holdout() {
        let (_, matrix) = east_conversion();
        let model = train_class(&matrix, 3, &quick_config()).unwrap();
        assert_eq!(model.test_rows.len(), 270);
        assert_eq!(model.test_labels.iter().filter(|&&l| l).count(), 90);
        assert_eq!(model.n_train, 630);
        assert!(matches!(model.selection, Selection::GridSearch { candidates: 4, .. }));
        assert_eq!(model.ranked_importances()[0].0, "easting");
        assert!(model.test_rows.iter().all(|&r| r < matrix.n_valid()));
    }

    #[test]
    fn defaults_used_without_tuning() {
        let (_, matrix) = east_conversion();
        let cfg = PipelineConfig {
            hyperparameter_tuning: false,
            default_n_estimators: 12,
            ..PipelineConfig::default()
        };
        let model = train_class(&matrix, 3, &cfg).unwrap();
        assert_eq!(model.selection, Selection::Defaults);
        assert_eq!(model.params.n_estimators, 12);
        assert_eq!(model.params.max_depth, Some(20));
    }

    #[test]
    fn degenerate_and_sparse_classes_fail_locally() {
        let (_, matrix) = east_conversion();
        let err = train_class(&matrix, 6, &quick_config()).unwrap_err();
        assert!(matches!(err, ClassError::DegenerateClass { class: 6, n_rows: 0, .. }));
        let err = train_class(&matrix, 1, &quick_config()).unwrap_err();
        assert!(matches!(err, ClassError::DegenerateClass { class: 1, .. }));

        let strict = PipelineConfig { min_positive_samples: 500, ..quick_config() };
        let err = train_class(&matrix, 3, &strict).unwrap_err();
        assert_eq!(
            err,
            ClassError::InsufficientPositives { class: 3, positives: 300, required: 500 }
        );
    }

    #[test]
    fn training_is_reproducible() {
        let (_, matrix) = east_conversion();
        let cfg = PipelineConfig { hyperparameter_tuning: false, default_n_estimators: 8, ..quick_config() };
        let a = train_class(&matrix, 3, &cfg).unwrap();
        let b = train_class(&matrix, 3, &cfg).unwrap();
        assert_eq!(a, b);
    }
}
