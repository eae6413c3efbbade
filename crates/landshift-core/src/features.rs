//! Feature matrix construction.
//!
//! Turns the prior/posterior class rasters, the land mask and the covariate
//! layers into one sparse table of valid cells. The table keeps every valid
//! cell (the projector scores all of them) and, separately, the subset that
//! survives subsampling and focus filtering (the training pool).
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::grid::{ClassGrid, CovariateGrid, GridFrame, MaskGrid};
use crate::legend::{ClassId, LegendTable, RawCode};

/// Mask value marking a usable cell.
pub const MASK_USABLE: u8 = 1;

/// Name of the optional prior-class feature column.
pub const PRIOR_CLASS_FEATURE: &str = "prior_class";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    /// Integer category codes stored as f32.
    Categorical,
}

/// A covariate raster on the canonical frame.
#[derive(Debug, Clone)]
pub struct CovariateLayer {
    pub name: String,
    pub kind: FeatureKind,
    pub grid: CovariateGrid,
}

impl CovariateLayer {
    pub fn numeric(name: impl Into<String>, grid: CovariateGrid) -> Self {
        Self { name: name.into(), kind: FeatureKind::Numeric, grid }
    }

    pub fn categorical(name: impl Into<String>, grid: CovariateGrid) -> Self {
        Self { name: name.into(), kind: FeatureKind::Categorical, grid }
    }
}

/// One retained feature column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
    /// Observed range over valid cells.
    pub min: f32,
    pub max: f32,
    /// Observed category codes, ascending; empty for numeric features.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<i64>,
}

/// Feature ordering and ranges a model is fit on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Input layers, already resampled onto one frame by the ingestion layer.
#[derive(Debug, Clone, Copy)]
pub struct FeatureInputs<'a> {
    pub prior: &'a ClassGrid,
    /// Absent when no posterior epoch is recorded (projection-only runs).
    pub posterior: Option<&'a ClassGrid>,
    pub mask: &'a MaskGrid,
    pub covariates: &'a [CovariateLayer],
}

/// Per-cell bookkeeping of a valid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CellRecord {
    row: u32,
    col: u32,
    prior: ClassId,
    posterior: Option<ClassId>,
}

/// Borrowed view of one valid cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRow<'a> {
    /// Grid position; kept for reprojection, never a feature.
    pub row: usize,
    pub col: usize,
    pub prior: ClassId,
    /// None = no transition recorded.
    pub posterior: Option<ClassId>,
    pub features: &'a [f32],
}

/// The shared, read-only dataset of one run.
///
/// Serializes as-is so a later run can model or project from the stored
/// table; deserializing re-checks the shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredMatrix")]
pub struct FeatureMatrix {
    frame: GridFrame,
    schema: FeatureSchema,
    cells: Vec<CellRecord>,
    /// Row-major `cells.len() × schema.len()`.
    values: Vec<f32>,
    /// Cells kept by subsampling, before focus filtering.
    n_sampled: usize,
    /// Indices into `cells` eligible for training, ascending.
    training: Vec<usize>,
}

impl FeatureMatrix {
    pub fn frame(&self) -> &GridFrame {
        &self.frame
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn n_features(&self) -> usize {
        self.schema.len()
    }

    /// Number of valid cells.
    pub fn n_valid(&self) -> usize {
        self.cells.len()
    }

    pub fn row(&self, index: usize) -> SampleRow<'_> {
        let cell = self.cells[index];
        let n = self.n_features();
        SampleRow {
            row: cell.row as usize,
            col: cell.col as usize,
            prior: cell.prior,
            posterior: cell.posterior,
            features: &self.values[index * n..(index + 1) * n],
        }
    }

    pub fn features(&self, index: usize) -> &[f32] {
        let n = self.n_features();
        &self.values[index * n..(index + 1) * n]
    }

    /// Every valid cell in frame order.
    pub fn rows(&self) -> impl Iterator<Item = SampleRow<'_>> + '_ {
        (0..self.cells.len()).map(move |i| self.row(i))
    }

    pub fn n_sampled(&self) -> usize {
        self.n_sampled
    }

    /// Indices of the training pool (after sampling and focus filtering).
    pub fn training_indices(&self) -> &[usize] {
        &self.training
    }

    pub fn training_rows(&self) -> impl Iterator<Item = SampleRow<'_>> + '_ {
        self.training.iter().map(move |&i| self.row(i))
    }
}

#[derive(Deserialize)]
struct StoredMatrix {
    frame: GridFrame,
    schema: FeatureSchema,
    cells: Vec<CellRecord>,
    values: Vec<f32>,
    n_sampled: usize,
    training: Vec<usize>,
}

impl TryFrom<StoredMatrix> for FeatureMatrix {
    type Error = PipelineError;

    fn try_from(m: StoredMatrix) -> Result<Self> {
        let bad = |detail: String| PipelineError::SchemaMismatch {
            layer: "feature matrix".into(),
            detail,
        };
        if m.values.len() != m.cells.len() * m.schema.len() {
            return Err(bad(format!(
                "{} values for {} cells x {} features",
                m.values.len(),
                m.cells.len(),
                m.schema.len()
            )));
        }
        if let Some(c) = m
            .cells
            .iter()
            .find(|c| c.row as usize >= m.frame.height || c.col as usize >= m.frame.width)
        {
            return Err(bad(format!("cell ({}, {}) lies outside the frame", c.row, c.col)));
        }
        if !m.training.windows(2).all(|w| w[0] < w[1])
            || m.training.last().is_some_and(|&i| i >= m.cells.len())
        {
            return Err(bad("training indices must be ascending and within the cell table".into()));
        }
        if m.training.is_empty() {
            return Err(PipelineError::EmptyDataset("stored matrix has no training rows".into()));
        }
        if m.n_sampled < m.training.len() {
            return Err(bad(format!(
                "{} sampled cells but {} training rows",
                m.n_sampled,
                m.training.len()
            )));
        }
        Ok(FeatureMatrix {
            frame: m.frame,
            schema: m.schema,
            cells: m.cells,
            values: m.values,
            n_sampled: m.n_sampled,
            training: m.training,
        })
    }
}

/// Builds a [`FeatureMatrix`] from aligned input layers.
#[derive(Debug, Clone)]
pub struct FeatureMatrixBuilder<'a> {
    legend: &'a LegendTable,
    sampling_factor: f64,
    seed: u64,
    focus_class: Option<ClassId>,
    include_prior_class: bool,
}

impl<'a> FeatureMatrixBuilder<'a> {
    /// No subsampling, no focus filter.
    pub fn new(legend: &'a LegendTable) -> Self {
        Self {
            legend,
            sampling_factor: 1.0,
            seed: 0,
            focus_class: None,
            include_prior_class: false,
        }
    }

    pub fn from_config(legend: &'a LegendTable, cfg: &PipelineConfig) -> Self {
        Self::new(legend)
            .with_sampling(cfg.sampling_factor, cfg.random_seed)
            .with_focus(cfg.class_scope().focus_class())
            .with_prior_class(cfg.include_prior_class)
    }

    pub fn with_sampling(mut self, factor: f64, seed: u64) -> Self {
        self.sampling_factor = factor;
        self.seed = seed;
        self
    }

    pub fn with_focus(mut self, cropland: Option<ClassId>) -> Self {
        self.focus_class = cropland;
        self
    }

    pub fn with_prior_class(mut self, include: bool) -> Self {
        self.include_prior_class = include;
        self
    }

    pub fn build(&self, inputs: FeatureInputs<'_>) -> Result<FeatureMatrix> {
        if !(self.sampling_factor > 0.0 && self.sampling_factor <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "sampling_factor must be in (0, 1], got {}",
                self.sampling_factor
            )));
        }

        let frame = inputs.prior.frame.clone();
        check_layer("prior", &frame, &inputs.prior.frame, inputs.prior.data.len())?;
        if let Some(post) = inputs.posterior {
            check_layer("posterior", &frame, &post.frame, post.data.len())?;
        }
        check_layer("land_mask", &frame, &inputs.mask.frame, inputs.mask.data.len())?;
        for layer in inputs.covariates {
            check_layer(&layer.name, &frame, &layer.grid.frame, layer.grid.data.len())?;
        }

        // Legend completeness over every non-nodata class code.
        let translator = self.legend.translator(observed_codes(inputs))?;

        let n_cov = inputs.covariates.len();
        let n_features = n_cov + usize::from(self.include_prior_class);
        let mut cells = Vec::new();
        let mut values = Vec::new();

        for idx in 0..frame.len() {
            if !is_valid_cell(inputs, idx) {
                continue;
            }
            let (row, col) = frame.row_col(idx);
            let prior = translate(&translator, inputs.prior.data[idx])?;
            let posterior = match inputs.posterior {
                Some(post) => Some(translate(&translator, post.data[idx])?),
                None => None,
            };
            cells.push(CellRecord {
                row: row as u32,
                col: col as u32,
                prior,
                posterior,
            });
            values.extend(inputs.covariates.iter().map(|layer| layer.grid.data[idx]));
            if self.include_prior_class {
                values.push(f32::from(prior));
            }
        }

        if cells.is_empty() {
            return Err(PipelineError::EmptyDataset(
                "no cell is inside the land mask with data in every layer".into(),
            ));
        }

        let schema = build_schema(inputs.covariates, self.include_prior_class, &values, n_features);

        // One draw per valid cell in frame order, regardless of outcome, so a
        // smaller factor selects a subset of a larger one under the same seed.
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut training = Vec::new();
        let mut n_sampled = 0;
        for (i, cell) in cells.iter().enumerate() {
            let u: f64 = rng.gen();
            if u >= self.sampling_factor {
                continue;
            }
            n_sampled += 1;
            if let Some(c) = self.focus_class {
                if cell.prior != c && cell.posterior != Some(c) {
                    continue;
                }
            }
            training.push(i);
        }

        if training.is_empty() {
            return Err(PipelineError::EmptyDataset(format!(
                "{} valid cells but none left after sampling (factor {}) and focus filtering",
                cells.len(),
                self.sampling_factor
            )));
        }

        info!(
            valid = cells.len(),
            sampled = n_sampled,
            training = training.len(),
            features = n_features,
            "feature matrix built"
        );

        Ok(FeatureMatrix {
            frame,
            schema,
            cells,
            values,
            n_sampled,
            training,
        })
    }
}

fn check_layer(name: &str, canonical: &GridFrame, frame: &GridFrame, len: usize) -> Result<()> {
    if let Some(detail) = canonical.mismatch(frame) {
        return Err(PipelineError::SchemaMismatch {
            layer: name.to_string(),
            detail,
        });
    }
    if len != frame.len() {
        return Err(PipelineError::SchemaMismatch {
            layer: name.to_string(),
            detail: format!("{} values for a {}-cell frame", len, frame.len()),
        });
    }
    Ok(())
}

fn observed_codes(inputs: FeatureInputs<'_>) -> Vec<RawCode> {
    let mut codes = Vec::new();
    for grid in std::iter::once(inputs.prior).chain(inputs.posterior) {
        codes.extend(
            (0..grid.data.len())
                .filter(|&i| !grid.is_nodata_at(i))
                .map(|i| grid.data[i]),
        );
        codes.sort_unstable();
        codes.dedup();
    }
    codes
}

fn is_valid_cell(inputs: FeatureInputs<'_>, idx: usize) -> bool {
    if inputs.mask.is_nodata_at(idx) || inputs.mask.data[idx] != MASK_USABLE {
        return false;
    }
    if inputs.prior.is_nodata_at(idx) {
        return false;
    }
    if inputs.posterior.is_some_and(|p| p.is_nodata_at(idx)) {
        return false;
    }
    inputs.covariates.iter().all(|layer| !layer.grid.is_nodata_at(idx))
}

fn translate(translator: &crate::legend::Translator, code: RawCode) -> Result<ClassId> {
    translator
        .translate(code)
        .ok_or(PipelineError::UnmappedCode { codes: vec![code] })
}

fn build_schema(
    covariates: &[CovariateLayer],
    include_prior_class: bool,
    values: &[f32],
    n_features: usize,
) -> FeatureSchema {
    let mut specs: Vec<(String, FeatureKind)> = covariates
        .iter()
        .map(|l| (l.name.clone(), l.kind))
        .collect();
    if include_prior_class {
        specs.push((PRIOR_CLASS_FEATURE.to_string(), FeatureKind::Categorical));
    }

    let features = specs
        .into_iter()
        .enumerate()
        .map(|(j, (name, kind))| {
            let column = values.iter().skip(j).step_by(n_features.max(1));
            let (mut min, mut max) = (f32::INFINITY, f32::NEG_INFINITY);
            for &v in column.clone() {
                min = min.min(v);
                max = max.max(v);
            }
            let categories = match kind {
                FeatureKind::Categorical => {
                    let mut cats: Vec<i64> = column.map(|&v| v.round() as i64).collect();
                    cats.sort_unstable();
                    cats.dedup();
                    cats
                }
                FeatureKind::Numeric => Vec::new(),
            };
            FeatureSpec { name, kind, min, max, categories }
        })
        .collect();

    FeatureSchema { features }
}
