//! Continuous Boyce index (Hirzel et al. 2006).
//!
//! Fixed bins sit at the quantiles of the predictions, so bin membership,
//! ratios and the index depend only on the rank order of the scores.
//! Moving windows span the observed range in equal widths and are invariant
//! to positive affine rescaling only.
use serde::{Deserialize, Serialize};

use super::rank::spearman_rho;

/// Window width as a fraction of the prediction range in moving-window mode.
const WINDOW_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BoyceBinning {
    /// `nclass` adjacent bins, each holding an equal share of the scores.
    Fixed { nclass: usize },
    /// `res` overlapping windows, each a tenth of the range wide.
    MovingWindow { res: usize },
}

impl BoyceBinning {
    /// 0 selects the moving window.
    pub fn from_nclass(nclass: usize, res: usize) -> Self {
        if nclass == 0 {
            BoyceBinning::MovingWindow { res }
        } else {
            BoyceBinning::Fixed { nclass }
        }
    }
}

/// One predicted/expected ratio sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoycePoint {
    pub midpoint: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoyceResult {
    /// None when fewer than two bins carry a ratio or the ratios are flat.
    pub index: Option<f64>,
    /// Bins with non-zero expected frequency, ascending midpoint.
    pub curve: Vec<BoycePoint>,
}

impl BoyceResult {
    fn undefined() -> Self {
        Self { index: None, curve: Vec::new() }
    }
}

/// Boyce index of `scores` against presence `labels`.
pub fn boyce_index(scores: &[f64], labels: &[bool], binning: BoyceBinning) -> BoyceResult {
    debug_assert_eq!(scores.len(), labels.len());
    let n_total = scores.len();
    let n_pos = labels.iter().filter(|&&l| l).count();
    if n_pos == 0 || n_total == 0 {
        return BoyceResult::undefined();
    }

    let (lo, hi) = scores
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    let range = hi - lo;
    if !(range > 0.0) {
        return BoyceResult::undefined();
    }

    let windows = match binning {
        BoyceBinning::Fixed { nclass } => quantile_bins(scores, nclass),
        BoyceBinning::MovingWindow { res } => moving_windows(lo, hi, res),
    };

    let mut curve = Vec::with_capacity(windows.len());
    for w in &windows {
        let (mut observed, mut expected) = (0usize, 0usize);
        for (&s, &l) in scores.iter().zip(labels) {
            if w.contains(s) {
                expected += 1;
                if l {
                    observed += 1;
                }
            }
        }
        if expected == 0 {
            continue;
        }
        let p = observed as f64 / n_pos as f64;
        let e = expected as f64 / n_total as f64;
        curve.push(BoycePoint {
            midpoint: (w.lo + w.hi) / 2.0,
            ratio: p / e,
        });
    }

    if curve.len() < 2 {
        return BoyceResult { index: None, curve };
    }
    let mids: Vec<f64> = curve.iter().map(|p| p.midpoint).collect();
    let ratios: Vec<f64> = curve.iter().map(|p| p.ratio).collect();
    BoyceResult {
        index: spearman_rho(&mids, &ratios),
        curve,
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    lo: f64,
    hi: f64,
    closed_hi: bool,
}

impl Window {
    fn contains(&self, s: f64) -> bool {
        s >= self.lo && (s < self.hi || (self.closed_hi && s <= self.hi))
    }
}

/// Bin edges at the `i / nclass` quantiles, linearly interpolated between
/// order statistics. The interpolation weights depend only on the number of
/// scores, so every edge falls between the same two ranked scores after any
/// monotone transform.
fn quantile_bins(scores: &[f64], nclass: usize) -> Vec<Window> {
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last = sorted.len() - 1;
    let edges: Vec<f64> = (0..=nclass)
        .map(|i| {
            let pos = (i * last) as f64 / nclass as f64;
            let k = pos.floor() as usize;
            let frac = pos - k as f64;
            match sorted.get(k + 1) {
                Some(&next) if frac > 0.0 => sorted[k] + frac * (next - sorted[k]),
                _ => sorted[k],
            }
        })
        .collect();
    edges
        .windows(2)
        .enumerate()
        .map(|(i, e)| Window {
            lo: e[0],
            hi: e[1],
            closed_hi: i + 1 == nclass,
        })
        .collect()
}

fn moving_windows(lo: f64, hi: f64, res: usize) -> Vec<Window> {
    let width = (hi - lo) * WINDOW_FRACTION;
    let step = if res > 1 { (hi - lo - width) / (res - 1) as f64 } else { 0.0 };
    (0..res)
        .map(|i| {
            let start = lo + i as f64 * step;
            // pin the outermost edges so the extremes are always covered
            let end = if i + 1 == res { hi } else { start + width };
            Window {
                lo: start,
                hi: end,
                closed_hi: true,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 100 rows at scores 0.00..0.99, positives concentrated at high scores.
    fn rising() -> (Vec<f64>, Vec<bool>) {
        let scores: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let labels = (0..100).map(|i| i % 10 < i / 10).collect();
        (scores, labels)
    }

    #[test]
    fn increasing_presence_gives_positive_index() {
        let (s, l) = rising();
        let fixed = boyce_index(&s, &l, BoyceBinning::Fixed { nclass: 10 });
        assert_relative_eq!(fixed.index.unwrap(), 1.0);
        // bin 0 has no positives: ratio 0
        assert_eq!(fixed.curve.len(), 10);
        assert_eq!(fixed.curve[0].ratio, 0.0);

        let window = boyce_index(&s, &l, BoyceBinning::MovingWindow { res: 50 });
        assert!(window.index.unwrap() > 0.8);
        assert_eq!(window.curve.len(), 50);
    }

    #[test]
    fn decreasing_presence_gives_negative_index() {
        let (s, l) = rising();
        let flipped: Vec<f64> = s.iter().map(|v| 1.0 - v).collect();
        let r = boyce_index(&flipped, &l, BoyceBinning::Fixed { nclass: 10 });
        assert_relative_eq!(r.index.unwrap(), -1.0);
    }

    #[test]
    fn no_positives_is_undefined() {
        let s = [0.1, 0.5, 0.9];
        let r = boyce_index(&s, &[false; 3], BoyceBinning::Fixed { nclass: 10 });
        assert!(r.index.is_none());
        assert!(r.curve.is_empty());
    }

    #[test]
    fn constant_predictions_are_undefined() {
        let labels = [true, false, true, false, false, false];
        let r = boyce_index(&[0.4; 6], &labels, BoyceBinning::MovingWindow { res: 100 });
        assert!(r.index.is_none());
    }

    #[test]
    fn empty_bins_are_excluded() {
        // tied scores collapse quantile edges; the collapsed bins receive no rows
        let s = [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let l = [false, false, false, false, false, true, true, true, true, true];
        let r = boyce_index(&s, &l, BoyceBinning::Fixed { nclass: 4 });
        assert_eq!(r.curve.len(), 2);
        assert!(r.curve.iter().all(|p| p.ratio.is_finite()));
        assert_eq!(r.curve[0].ratio, 0.0);
        assert_relative_eq!(r.curve[1].ratio, 2.0);
        assert_relative_eq!(r.index.unwrap(), 1.0);
    }

    #[test]
    fn fixed_bins_ignore_monotone_distortion() {
        let (s, l) = rising();
        let bent: Vec<f64> = s.iter().map(|v| v.powi(4)).collect();
        let stretched: Vec<f64> = s.iter().map(|v| (5.0 * v).exp()).collect();
        let binning = BoyceBinning::Fixed { nclass: 7 };
        let base = boyce_index(&s, &l, binning);
        for other in [&bent, &stretched] {
            let r = boyce_index(other, &l, binning);
            assert_eq!(r.index, base.index);
            let ratios: Vec<f64> = r.curve.iter().map(|p| p.ratio).collect();
            let expected: Vec<f64> = base.curve.iter().map(|p| p.ratio).collect();
            assert_eq!(ratios, expected);
        }
    }

    #[test]
    fn quantile_bins_hold_equal_shares() {
        let s: Vec<f64> = (0..40).map(|i| (i as f64 / 10.0).exp()).collect();
        let bins = quantile_bins(&s, 4);
        for w in &bins {
            assert_eq!(s.iter().filter(|&&v| w.contains(v)).count(), 10);
        }
    }

    #[test]
    fn affine_rescaling_does_not_change_index() {
        let (s, l) = rising();
        let scaled: Vec<f64> = s.iter().map(|v| 0.2 + v * 0.5).collect();
        for binning in [BoyceBinning::Fixed { nclass: 7 }, BoyceBinning::MovingWindow { res: 30 }] {
            let a = boyce_index(&s, &l, binning).index.unwrap();
            let b = boyce_index(&scaled, &l, binning).index.unwrap();
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn max_score_lands_in_last_fixed_bin() {
        let bins = quantile_bins(&[0.0, 0.25, 0.5, 0.75, 1.0], 4);
        assert!(bins[3].contains(1.0));
        assert!(!bins[2].contains(0.75));
        assert!(bins[3].contains(0.75));
    }
}
