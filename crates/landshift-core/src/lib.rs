//! Land-use transition modeling: legend translation, feature construction,
//! per-class random forests, ROC/Boyce validation and probability surfaces.
pub mod config;
pub mod error;
pub mod features;
pub mod forest;
pub mod grid;
pub mod legend;
pub mod metrics;
pub mod pipeline;
pub mod projector;
pub mod sampling;
pub mod trainer;
pub mod validator;

pub use config::{ClassScope, PipelineConfig};
pub use error::{ClassError, ForestError, PipelineError};
pub use features::{CovariateLayer, FeatureInputs, FeatureKind, FeatureMatrix, FeatureMatrixBuilder};
pub use grid::{ClassGrid, CovariateGrid, Grid, GridFrame, MaskGrid};
pub use legend::{ClassId, LegendEntry, LegendTable, RawCode};
pub use pipeline::{ClassOutcome, Pipeline, PipelineRun, ValidationTable};
pub use projector::{project, ProbabilitySurface, PROBABILITY_NODATA};
pub use trainer::{train_class, transition_label, TrainedModel};
pub use validator::{validate, ValidationRecord};
