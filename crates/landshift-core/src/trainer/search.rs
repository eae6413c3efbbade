//! Exhaustive hyperparameter grid search.
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::forest::ForestParams;

/// Candidate values for each forest hyperparameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchSpace {
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<Option<usize>>,
    pub min_samples_split: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
}

impl SearchSpace {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            n_estimators: cfg.n_estimators_range.clone(),
            max_depth: cfg.max_depth_range.clone(),
            min_samples_split: cfg.min_samples_split_range.clone(),
            min_samples_leaf: cfg.min_samples_leaf_range.clone(),
        }
    }

    /// Cartesian product, `n_estimators` varying slowest.
    pub fn candidates(&self) -> Vec<ForestParams> {
        let mut out = Vec::new();
        for &n_estimators in &self.n_estimators {
            for &max_depth in &self.max_depth {
                for &min_samples_split in &self.min_samples_split {
                    for &min_samples_leaf in &self.min_samples_leaf {
                        out.push(ForestParams {
                            n_estimators,
                            max_depth,
                            min_samples_split,
                            min_samples_leaf,
                        });
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandidateScore {
    pub params: ForestParams,
    /// None when the scorer could not evaluate the candidate.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub best: ForestParams,
    pub best_score: f64,
    /// Every candidate in evaluation order.
    pub evaluated: Vec<CandidateScore>,
}

/// Score every candidate and keep the highest. Ties go to the earlier
/// candidate. None if no candidate produced a score.
pub fn grid_search<F>(candidates: &[ForestParams], mut score: F) -> Option<SearchOutcome>
where
    F: FnMut(&ForestParams) -> Option<f64>,
{
    let evaluated: Vec<CandidateScore> = candidates
        .iter()
        .map(|p| CandidateScore { params: *p, score: score(p).filter(|s| s.is_finite()) })
        .collect();

    let mut best: Option<(ForestParams, f64)> = None;
    for c in &evaluated {
        if let Some(s) = c.score {
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((c.params, s));
            }
        }
    }
    best.map(|(best, best_score)| SearchOutcome { best, best_score, evaluated })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_cover_the_product() {
        let space = SearchSpace {
            n_estimators: vec![10, 20],
            max_depth: vec![Some(3), None],
            min_samples_split: vec![2, 4],
            min_samples_leaf: vec![1],
        };
        let c = space.candidates();
        assert_eq!(c.len(), 8);
        assert_eq!(c[0], ForestParams { n_estimators: 10, max_depth: Some(3), min_samples_split: 2, min_samples_leaf: 1 });
        assert_eq!(c[7], ForestParams { n_estimators: 20, max_depth: None, min_samples_split: 4, min_samples_leaf: 1 });
    }

    #[test]
    fn picks_highest_and_first_on_ties() {
        let cands: Vec<ForestParams> = [5, 10, 15, 20]
            .iter()
            .map(|&n| ForestParams { n_estimators: n, ..ForestParams::default() })
            .collect();
        let out = grid_search(&cands, |p| Some(if p.n_estimators >= 10 { 0.8 } else { 0.6 })).unwrap();
        assert_eq!(out.best.n_estimators, 10);
        assert_eq!(out.best_score, 0.8);
        assert_eq!(out.evaluated.len(), 4);
    }

    #[test]
    fn unscorable_candidates_are_skipped() {
        let cands: Vec<ForestParams> = [5, 10]
            .iter()
            .map(|&n| ForestParams { n_estimators: n, ..ForestParams::default() })
            .collect();
        let out = grid_search(&cands, |p| (p.n_estimators == 10).then_some(0.55)).unwrap();
        assert_eq!(out.best.n_estimators, 10);
        assert!(grid_search(&cands, |_| None).is_none());
        assert!(grid_search(&cands, |_| Some(f64::NAN)).is_none());
        assert!(grid_search(&[], |_| Some(1.0)).is_none());
    }
}
