//! Pipeline options and the class scope derived from them.
use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PipelineError, Result};
use crate::forest::ForestParams;
use crate::legend::{is_sentinel, ClassId, CROPLAND_CLASS};
use crate::metrics::boyce::BoyceBinning;

/// Every recognized option of a run. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model only transitions into the cropland class and keep only rows
    /// touching cropland.
    pub focus_on_cropland_transitions: bool,
    pub cropland_class: ClassId,
    /// Classes modeled when focus mode is off, in modeling order.
    pub all_classes: Vec<ClassId>,
    /// Fraction of valid cells kept for training, in (0, 1].
    pub sampling_factor: f64,
    pub random_seed: u64,
    /// Held-out fraction, in (0, 1).
    pub test_size: f64,
    pub hyperparameter_tuning: bool,
    pub n_estimators_range: Vec<usize>,
    /// `null` as a whole or as an entry means unbounded depth.
    #[serde(deserialize_with = "null_as_unbounded")]
    pub max_depth_range: Vec<Option<usize>>,
    pub min_samples_split_range: Vec<usize>,
    pub min_samples_leaf_range: Vec<usize>,
    pub default_n_estimators: usize,
    pub default_max_depth: Option<usize>,
    pub cv_folds: usize,
    /// Classes with fewer positive transitions are skipped.
    pub min_positive_samples: usize,
    /// Append the prior-epoch class as a categorical feature.
    pub include_prior_class: bool,
    /// 0 selects the moving-window Boyce index; > 0 fixed equal-width bins.
    pub boyce_nclass: usize,
    /// Number of window positions in moving-window mode.
    pub boyce_res: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            focus_on_cropland_transitions: false,
            cropland_class: CROPLAND_CLASS,
            all_classes: vec![1, 2, 3, 4, 5, 6, 7, 14, 15],
            sampling_factor: 1.0,
            random_seed: 42,
            test_size: 0.3,
            hyperparameter_tuning: true,
            n_estimators_range: vec![50, 100, 200],
            max_depth_range: vec![Some(10), Some(20), None],
            min_samples_split_range: vec![2],
            min_samples_leaf_range: vec![1],
            default_n_estimators: 100,
            default_max_depth: Some(20),
            cv_folds: 5,
            min_positive_samples: 10,
            include_prior_class: false,
            boyce_nclass: 0,
            boyce_res: 100,
        }
    }
}

fn null_as_unbounded<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Vec<Option<usize>>, D::Error> {
    let v: Option<Vec<Option<usize>>> = Option::deserialize(d)?;
    Ok(v.unwrap_or_else(|| vec![None]))
}

impl PipelineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text)
            .map_err(|e| PipelineError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject out-of-range options before any data is touched.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if !(self.sampling_factor > 0.0 && self.sampling_factor <= 1.0) {
            return bad(format!("sampling_factor must be in (0, 1], got {}", self.sampling_factor));
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return bad(format!("test_size must be in (0, 1), got {}", self.test_size));
        }
        if is_sentinel(self.cropland_class) {
            return bad(format!("cropland_class {} is a reserved sentinel", self.cropland_class));
        }
        let mut seen = BTreeSet::new();
        for &c in &self.all_classes {
            if !seen.insert(c) {
                return bad(format!("all_classes lists class {c} twice"));
            }
        }
        if !self.focus_on_cropland_transitions
            && self.all_classes.iter().all(|&c| is_sentinel(c))
        {
            return bad("all_classes has no modelable class".into());
        }
        if self.hyperparameter_tuning {
            if self.n_estimators_range.is_empty()
                || self.max_depth_range.is_empty()
                || self.min_samples_split_range.is_empty()
                || self.min_samples_leaf_range.is_empty()
            {
                return bad("hyperparameter candidate sets must be non-empty".into());
            }
            if self.n_estimators_range.contains(&0) {
                return bad("n_estimators_range contains 0".into());
            }
            if self.max_depth_range.contains(&Some(0)) {
                return bad("max_depth_range contains 0".into());
            }
            if self.min_samples_split_range.iter().any(|&s| s < 2) {
                return bad("min_samples_split_range values must be >= 2".into());
            }
            if self.min_samples_leaf_range.contains(&0) {
                return bad("min_samples_leaf_range contains 0".into());
            }
            if self.cv_folds < 2 {
                return bad(format!("cv_folds must be >= 2, got {}", self.cv_folds));
            }
        }
        if self.default_n_estimators == 0 {
            return bad("default_n_estimators must be positive".into());
        }
        if self.default_max_depth == Some(0) {
            return bad("default_max_depth must be positive or null".into());
        }
        if self.boyce_nclass == 1 {
            return bad("boyce_nclass must be 0 (moving window) or >= 2".into());
        }
        if self.boyce_nclass == 0 && self.boyce_res < 2 {
            return bad(format!("boyce_res must be >= 2, got {}", self.boyce_res));
        }
        Ok(())
    }

    /// Hyperparameters used when tuning is disabled.
    pub fn default_params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.default_n_estimators,
            max_depth: self.default_max_depth,
            ..ForestParams::default()
        }
    }

    pub fn boyce_binning(&self) -> BoyceBinning {
        BoyceBinning::from_nclass(self.boyce_nclass, self.boyce_res)
    }

    pub fn class_scope(&self) -> ClassScope {
        ClassScope::from_config(self)
    }
}

/// Which classes a run models, fixed once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassScope {
    /// Every configured class, sentinels removed, order kept.
    All(Vec<ClassId>),
    /// Focus mode: only the cropland class.
    Cropland(ClassId),
}

impl ClassScope {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        if cfg.focus_on_cropland_transitions {
            ClassScope::Cropland(cfg.cropland_class)
        } else {
            ClassScope::All(
                cfg.all_classes
                    .iter()
                    .copied()
                    .filter(|&c| !is_sentinel(c))
                    .collect(),
            )
        }
    }

    pub fn classes(&self) -> Vec<ClassId> {
        match self {
            ClassScope::All(classes) => classes.clone(),
            ClassScope::Cropland(c) => vec![*c],
        }
    }

    /// The cropland class when rows must be restricted to cropland.
    pub fn focus_class(&self) -> Option<ClassId> {
        match self {
            ClassScope::All(_) => None,
            ClassScope::Cropland(c) => Some(*c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn scope_drops_sentinels_and_keeps_order() {
        let cfg = PipelineConfig {
            all_classes: vec![6, 0, 3, 999, 1],
            ..PipelineConfig::default()
        };
        assert_eq!(cfg.class_scope(), ClassScope::All(vec![6, 3, 1]));
    }

    #[test]
    fn focus_mode_scope_is_cropland_only() {
        let cfg = PipelineConfig {
            focus_on_cropland_transitions: true,
            ..PipelineConfig::default()
        };
        let scope = cfg.class_scope();
        assert_eq!(scope.classes(), vec![3]);
        assert_eq!(scope.focus_class(), Some(3));
    }

    #[test]
    fn out_of_range_options_are_rejected() {
        let cases = [
            PipelineConfig { sampling_factor: 0.0, ..Default::default() },
            PipelineConfig { sampling_factor: 1.5, ..Default::default() },
            PipelineConfig { test_size: 1.0, ..Default::default() },
            PipelineConfig { test_size: 0.0, ..Default::default() },
            PipelineConfig { n_estimators_range: vec![], ..Default::default() },
            PipelineConfig { max_depth_range: vec![Some(0)], ..Default::default() },
            PipelineConfig { cv_folds: 1, ..Default::default() },
            PipelineConfig { all_classes: vec![3, 3], ..Default::default() },
            PipelineConfig { all_classes: vec![0, 999], ..Default::default() },
            PipelineConfig { cropland_class: 999, ..Default::default() },
            PipelineConfig { boyce_nclass: 1, ..Default::default() },
            PipelineConfig { boyce_nclass: 0, boyce_res: 1, ..Default::default() },
        ];
        for cfg in cases {
            assert!(
                matches!(cfg.validate(), Err(PipelineError::InvalidConfig(_))),
                "accepted {cfg:?}"
            );
        }
    }

    #[test]
    fn json_null_max_depth_means_unbounded() {
        let cfg = PipelineConfig::from_json(r#"{"max_depth_range": null}"#).unwrap();
        assert_eq!(cfg.max_depth_range, vec![None]);

        let cfg = PipelineConfig::from_json(r#"{"max_depth_range": [5, null]}"#).unwrap();
        assert_eq!(cfg.max_depth_range, vec![Some(5), None]);
    }

    #[test]
    fn json_partial_document_keeps_defaults() {
        let cfg = PipelineConfig::from_json(
            r#"{"focus_on_cropland_transitions": true, "boyce_nclass": 10, "random_seed": 7}"#,
        )
        .unwrap();
        assert!(cfg.focus_on_cropland_transitions);
        assert_eq!(cfg.boyce_nclass, 10);
        assert_eq!(cfg.random_seed, 7);
        assert_eq!(cfg.test_size, 0.3);
        assert_eq!(cfg.boyce_binning(), BoyceBinning::Fixed { nclass: 10 });
    }

    #[test]
    fn json_invalid_values_fail_validation() {
        let err = PipelineConfig::from_json(r#"{"sampling_factor": 0}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        let err = PipelineConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
