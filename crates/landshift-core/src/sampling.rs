//! Label-stratified partitioning for binary targets.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Positions of the negative and positive labels, in input order.
fn by_label(y: &[bool]) -> [Vec<usize>; 2] {
    let mut groups = [Vec::new(), Vec::new()];
    for (i, &label) in y.iter().enumerate() {
        groups[usize::from(label)].push(i);
    }
    groups
}

/// Train/test partition of positions into the label vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Stratified hold-out split.
///
/// Each label group contributes `round(n * test_size)` rows to the test side,
/// capped at `n - 1` so a group never leaves training entirely. Both sides
/// are returned in ascending order.
pub fn stratified_split(y: &[bool], test_size: f64, seed: u64) -> Split {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(y.len());
    let mut test = Vec::new();

    for mut group in by_label(y) {
        let n = group.len();
        if n == 0 {
            continue;
        }
        group.shuffle(&mut rng);
        let n_test = ((n as f64 * test_size).round() as usize).min(n - 1);
        test.extend_from_slice(&group[..n_test]);
        train.extend_from_slice(&group[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    Split { train, test }
}

/// Stratified k-fold cross-validation over binary labels.
#[derive(Debug, Clone)]
pub struct StratifiedKFold {
    n_splits: usize,
    seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize, seed: u64) -> Self {
        Self { n_splits, seed }
    }

    /// One `Split` per fold; every position is tested exactly once.
    pub fn split(&self, y: &[bool]) -> Vec<Split> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); self.n_splits];

        for mut group in by_label(y) {
            group.shuffle(&mut rng);
            let size = group.len() / self.n_splits;
            let remainder = group.len() % self.n_splits;
            let mut start = 0;
            for (i, fold) in folds.iter_mut().enumerate() {
                let end = start + size + usize::from(i < remainder);
                fold.extend_from_slice(&group[start..end]);
                start = end;
            }
        }

        (0..self.n_splits)
            .map(|i| {
                let mut test = folds[i].clone();
                let mut train: Vec<usize> = folds
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .flat_map(|(_, f)| f.iter().copied())
                    .collect();
                test.sort_unstable();
                train.sort_unstable();
                Split { train, test }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n_pos: usize, n_neg: usize) -> Vec<bool> {
        let mut y = vec![true; n_pos];
        y.extend(vec![false; n_neg]);
        y
    }

    #[test]
    fn split_preserves_label_proportions() {
        let y = labels(20, 80);
        let s = stratified_split(&y, 0.3, 42);
        assert_eq!(s.test.len(), 30);
        assert_eq!(s.train.len(), 70);
        assert_eq!(s.test.iter().filter(|&&i| y[i]).count(), 6);
        assert_eq!(s.train.iter().filter(|&&i| y[i]).count(), 14);
    }

    #[test]
    fn split_is_a_partition_and_reproducible() {
        let y = labels(13, 41);
        let a = stratified_split(&y, 0.25, 9);
        let mut all: Vec<usize> = a.train.iter().chain(&a.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..y.len()).collect::<Vec<_>>());
        assert_eq!(a, stratified_split(&y, 0.25, 9));
        assert_ne!(a, stratified_split(&y, 0.25, 10));
    }

    #[test]
    fn lone_positive_stays_in_training() {
        let y = labels(1, 9);
        let s = stratified_split(&y, 0.5, 0);
        assert!(s.train.contains(&0));
        assert!(s.test.iter().all(|&i| !y[i]));
    }

    #[test]
    fn kfold_tests_every_row_once() {
        let y = labels(12, 31);
        let folds = StratifiedKFold::new(5, 3).split(&y);
        assert_eq!(folds.len(), 5);
        let mut seen = vec![0; y.len()];
        for f in &folds {
            assert_eq!(f.train.len() + f.test.len(), y.len());
            for &i in &f.test {
                seen[i] += 1;
            }
            let pos = f.test.iter().filter(|&&i| y[i]).count();
            assert!(pos == 2 || pos == 3, "fold has {pos} positives");
        }
        assert!(seen.iter().all(|&c| c == 1));
    }
}
