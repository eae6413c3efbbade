//! Held-out scoring of trained models.
use serde::Serialize;
use tracing::{info, warn};

use crate::features::FeatureMatrix;
use crate::legend::ClassId;
use crate::metrics::{boyce_index, roc_auc, roc_curve, BoyceBinning, BoycePoint, RocPoint};
use crate::trainer::TrainedModel;

/// Metrics of one class model. `None` marks an undefined metric and
/// serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationRecord {
    pub class: ClassId,
    pub roc_auc: Option<f64>,
    pub boyce_index: Option<f64>,
    pub n_test: usize,
    pub n_test_positive: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roc_curve: Vec<RocPoint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub boyce_curve: Vec<BoycePoint>,
}

/// Score `model` on its held-out partition.
///
/// Never fails: a degenerate test set yields undefined metrics.
pub fn validate(
    model: &TrainedModel,
    matrix: &FeatureMatrix,
    binning: BoyceBinning,
) -> ValidationRecord {
    let x: Vec<&[f32]> = model.test_rows.iter().map(|&i| matrix.features(i)).collect();
    match model.forest.try_predict_proba(&x) {
        Ok(scores) => score_predictions(model.class, &scores, &model.test_labels, binning),
        Err(e) => {
            warn!(class = model.class, "cannot score held-out rows: {e}");
            score_predictions(model.class, &[], &[], binning)
        }
    }
}

/// Metrics for predictions that are already computed.
pub fn score_predictions(
    class: ClassId,
    scores: &[f64],
    labels: &[bool],
    binning: BoyceBinning,
) -> ValidationRecord {
    let n_test_positive = labels.iter().filter(|&&l| l).count();
    let auc = roc_auc(scores, labels);
    let boyce = boyce_index(scores, labels, binning);

    if auc.is_none() || boyce.index.is_none() {
        warn!(
            class,
            n_test = labels.len(),
            n_test_positive,
            roc_auc_defined = auc.is_some(),
            boyce_defined = boyce.index.is_some(),
            "metric undefined on held-out set"
        );
    }
    info!(class, roc_auc = ?auc, boyce_index = ?boyce.index, "validation metrics");

    ValidationRecord {
        class,
        roc_auc: auc,
        boyce_index: boyce.index,
        n_test: labels.len(),
        n_test_positive,
        roc_curve: roc_curve(scores, labels).unwrap_or_default(),
        boyce_curve: boyce.curve,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_positives_gives_undefined_metrics() {
        let scores = [0.1, 0.4, 0.5, 0.9];
        let r = score_predictions(3, &scores, &[false; 4], BoyceBinning::Fixed { nclass: 10 });
        assert_eq!(r.roc_auc, None);
        assert_eq!(r.boyce_index, None);
        assert_eq!(r.n_test, 4);
        assert_eq!(r.n_test_positive, 0);

        let json = serde_json::to_value(&r).unwrap();
        assert!(json["roc_auc"].is_null());
        assert!(json["boyce_index"].is_null());
    }

    #[test]
    fn informative_scores_are_defined() {
        let scores: Vec<f64> = (0..50).map(|i| i as f64 / 50.0).collect();
        let labels: Vec<bool> = (0..50).map(|i| i >= 35).collect();
        let r = score_predictions(6, &scores, &labels, BoyceBinning::Fixed { nclass: 5 });
        assert_eq!(r.roc_auc, Some(1.0));
        assert!(r.boyce_index.unwrap() > 0.5);
        assert_eq!(r.n_test_positive, 15);
        assert!(!r.roc_curve.is_empty());
    }
}
