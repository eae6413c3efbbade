//! Full-grid probability surfaces.
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::features::FeatureMatrix;
use crate::grid::{CovariateGrid, Grid};
use crate::legend::ClassId;
use crate::trainer::TrainedModel;

#[cfg(feature = "threading")]
use rayon::prelude::*;

/// Value written to cells outside the modeled set.
pub const PROBABILITY_NODATA: f32 = -9999.0;

/// Rows scored per batch.
pub const PROJECTION_BATCH: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilitySurface {
    pub class: ClassId,
    /// Same frame as the inputs; nodata is [`PROBABILITY_NODATA`].
    pub grid: CovariateGrid,
}

impl ProbabilitySurface {
    /// Probabilities of the modeled cells.
    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        (0..self.grid.data.len())
            .filter(|&i| !self.grid.is_nodata_at(i))
            .map(|i| self.grid.data[i])
    }

    /// (min, mean, max) over modeled cells.
    pub fn summary(&self) -> Option<(f32, f32, f32)> {
        let mut n = 0usize;
        let (mut lo, mut hi, mut sum) = (f32::INFINITY, f32::NEG_INFINITY, 0.0f64);
        for v in self.valid_values() {
            n += 1;
            lo = lo.min(v);
            hi = hi.max(v);
            sum += f64::from(v);
        }
        (n > 0).then(|| (lo, (sum / n as f64) as f32, hi))
    }
}

/// Score every valid cell of the matrix, not only the training pool.
pub fn project(model: &TrainedModel, matrix: &FeatureMatrix) -> ProbabilitySurface {
    let indices: Vec<usize> = (0..matrix.n_valid()).collect();
    let score_batch = |batch: &[usize]| -> Vec<f32> {
        batch
            .iter()
            .map(|&i| model.forest.predict_proba_one(matrix.features(i)) as f32)
            .collect()
    };

    #[cfg(feature = "threading")]
    let scored: Vec<Vec<f32>> = indices.par_chunks(PROJECTION_BATCH).map(score_batch).collect();
    #[cfg(not(feature = "threading"))]
    let scored: Vec<Vec<f32>> = indices.chunks(PROJECTION_BATCH).map(score_batch).collect();

    let frame = matrix.frame().clone();
    let mut grid = Grid::filled(frame, PROBABILITY_NODATA).with_nodata(PROBABILITY_NODATA);
    for (i, p) in scored.into_iter().flatten().enumerate() {
        let row = matrix.row(i);
        grid.set(row.row, row.col, p);
    }

    let surface = ProbabilitySurface { class: model.class, grid };
    if let Some((lo, mean, hi)) = surface.summary() {
        info!(class = model.class, cells = matrix.n_valid(), min = lo, mean, max = hi, "projected");
    }
    surface
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::features::{CovariateLayer, FeatureInputs, FeatureMatrixBuilder, MASK_USABLE};
    use crate::grid::GridFrame;
    use crate::legend::{LegendEntry, LegendTable};
    use crate::trainer::train_class;

    #[test]
    fn surface_covers_valid_cells_and_keeps_frame() {
        let legend =
            LegendTable::from_entries(&[LegendEntry::new(211, 3), LegendEntry::new(311, 6)]).unwrap();
        let frame = GridFrame::new(20, 20, 4_321_000.0, 3_210_000.0, 100.0, -100.0).with_crs("EPSG:3035");
        let prior = Grid::filled(frame.clone(), 311);
        let posterior = Grid::from_vec(
            frame.clone(),
            (0..400).map(|i| if i % 20 >= 14 { 211 } else { 311 }).collect(),
        );
        let mut mask = Grid::filled(frame.clone(), MASK_USABLE);
        for r in 0..20 {
            mask.set(r, 0, 0);
        }
        let east = Grid::from_vec(frame.clone(), (0..400).map(|i| (i % 20) as f32).collect());
        let covs = [CovariateLayer::numeric("easting", east)];
        let matrix = FeatureMatrixBuilder::new(&legend)
            .with_sampling(0.5, 3)
            .build(FeatureInputs {
                prior: &prior,
                posterior: Some(&posterior),
                mask: &mask,
                covariates: &covs,
            })
            .unwrap();
        let cfg = PipelineConfig {
            hyperparameter_tuning: false,
            default_n_estimators: 10,
            ..PipelineConfig::default()
        };
        let model = train_class(&matrix, 3, &cfg).unwrap();
        let surface = project(&model, &matrix);

        assert_eq!(surface.grid.frame, frame);
        assert_eq!(surface.grid.data.len(), 400);
        assert_eq!(surface.valid_values().count(), 380);
        for r in 0..20 {
            assert_eq!(surface.grid.get(r, 0), PROBABILITY_NODATA);
        }
        assert!(surface.valid_values().all(|p| (0.0..=1.0).contains(&p)));
        assert!(surface.grid.get(5, 18) > surface.grid.get(5, 3));
    }
}
