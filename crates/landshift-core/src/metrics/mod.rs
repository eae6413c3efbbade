//! Rank-based evaluation metrics.
pub mod boyce;
pub mod rank;
pub mod roc;

pub use boyce::{boyce_index, BoyceBinning, BoycePoint, BoyceResult};
pub use roc::{roc_auc, roc_curve, RocPoint};
