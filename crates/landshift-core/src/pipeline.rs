//! Run orchestrator: legend → feature matrix → per-class train, validate,
//! project.
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ClassScope, PipelineConfig};
use crate::error::{ClassError, Result};
use crate::features::{FeatureInputs, FeatureMatrix, FeatureMatrixBuilder, FeatureSchema};
use crate::legend::{class_name, ClassId, LegendTable};
use crate::projector::{project, ProbabilitySurface};
use crate::trainer::{train_class, TrainedModel};
use crate::validator::{validate, ValidationRecord};

#[cfg(feature = "threading")]
use rayon::prelude::*;

// ── Results ───────────────────────────────────────────────────────────────────

/// What happened to one class in scope.
#[derive(Debug, Clone)]
pub enum ClassOutcome {
    Modeled {
        model: TrainedModel,
        record: ValidationRecord,
        surface: ProbabilitySurface,
    },
    Failed {
        reason: ClassError,
    },
}

#[derive(Debug, Clone)]
pub struct ClassResult {
    pub class: ClassId,
    pub outcome: ClassOutcome,
}

/// Shape of the shared dataset, for the run manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixSummary {
    pub n_valid: usize,
    pub n_sampled: usize,
    pub n_training: usize,
    pub schema: FeatureSchema,
}

/// Everything one run produced, in class-scope order.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub scope: ClassScope,
    pub matrix: MatrixSummary,
    pub results: Vec<ClassResult>,
    pub elapsed_ms: u64,
}

impl PipelineRun {
    pub fn get(&self, class: ClassId) -> Option<&ClassOutcome> {
        self.results.iter().find(|r| r.class == class).map(|r| &r.outcome)
    }

    pub fn models(&self) -> impl Iterator<Item = &TrainedModel> + '_ {
        self.results.iter().filter_map(|r| match &r.outcome {
            ClassOutcome::Modeled { model, .. } => Some(model),
            ClassOutcome::Failed { .. } => None,
        })
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &ProbabilitySurface> + '_ {
        self.results.iter().filter_map(|r| match &r.outcome {
            ClassOutcome::Modeled { surface, .. } => Some(surface),
            ClassOutcome::Failed { .. } => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &ClassError> + '_ {
        self.results.iter().filter_map(|r| match &r.outcome {
            ClassOutcome::Failed { reason } => Some(reason),
            ClassOutcome::Modeled { .. } => None,
        })
    }

    /// One row per class in scope, failed classes included.
    pub fn validation_table(&self) -> ValidationTable {
        let rows = self
            .results
            .iter()
            .map(|r| {
                let mut row = ValidationRow {
                    class: r.class,
                    name: class_name(r.class).map(str::to_string),
                    status: RowStatus::Modeled,
                    roc_auc: None,
                    boyce_index: None,
                    n_test: 0,
                    n_test_positive: 0,
                    error: None,
                };
                match &r.outcome {
                    ClassOutcome::Modeled { record, .. } => {
                        row.roc_auc = record.roc_auc;
                        row.boyce_index = record.boyce_index;
                        row.n_test = record.n_test;
                        row.n_test_positive = record.n_test_positive;
                    }
                    ClassOutcome::Failed { reason } => {
                        row.status = RowStatus::Failed;
                        row.error = Some(reason.clone());
                    }
                }
                row
            })
            .collect();
        ValidationTable { rows }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Modeled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationRow {
    pub class: ClassId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: RowStatus,
    pub roc_auc: Option<f64>,
    pub boyce_index: Option<f64>,
    pub n_test: usize,
    pub n_test_positive: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassError>,
}

/// The consolidated per-class metrics table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationTable {
    pub rows: Vec<ValidationRow>,
}

impl ValidationTable {
    pub fn get(&self, class: ClassId) -> Option<&ValidationRow> {
        self.rows.iter().find(|r| r.class == class)
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct Pipeline {
    cfg: PipelineConfig,
}

impl Pipeline {
    /// Fails on invalid options before any data is read.
    pub fn new(cfg: PipelineConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Run every stage. Legend and data errors abort; class errors are
    /// recorded in the result.
    pub fn run(&self, legend: &LegendTable, inputs: FeatureInputs<'_>) -> Result<PipelineRun> {
        let start = Instant::now();

        // ── 1. Legend + feature matrix ──────────────────────────────────────
        let matrix = self.build_matrix(legend, inputs)?;

        // ── 2. Per-class modeling ───────────────────────────────────────────
        let mut run = self.run_matrix(&matrix);
        run.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            modeled = run.models().count(),
            failed = run.failures().count(),
            elapsed_ms = run.elapsed_ms,
            "run complete"
        );
        Ok(run)
    }

    /// Stage one alone: translate the class grids and assemble the valid-cell
    /// table with this run's sampling and focus settings.
    pub fn build_matrix(
        &self,
        legend: &LegendTable,
        inputs: FeatureInputs<'_>,
    ) -> Result<FeatureMatrix> {
        FeatureMatrixBuilder::from_config(legend, &self.cfg).build(inputs)
    }

    /// Model every class in scope on an already-built matrix. Sampling and
    /// focus filtering are whatever the matrix was built with.
    pub fn run_matrix(&self, matrix: &FeatureMatrix) -> PipelineRun {
        let start = Instant::now();
        let scope = self.cfg.class_scope();
        let classes = scope.classes();
        info!(scope = ?scope, "modeling {} class(es)", classes.len());

        #[cfg(feature = "threading")]
        let results: Vec<ClassResult> = classes.par_iter().map(|&c| self.run_class(matrix, c)).collect();
        #[cfg(not(feature = "threading"))]
        let results: Vec<ClassResult> = classes.iter().map(|&c| self.run_class(matrix, c)).collect();

        PipelineRun {
            scope,
            matrix: MatrixSummary {
                n_valid: matrix.n_valid(),
                n_sampled: matrix.n_sampled(),
                n_training: matrix.training_indices().len(),
                schema: matrix.schema().clone(),
            },
            results,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn run_class(&self, matrix: &FeatureMatrix, class: ClassId) -> ClassResult {
        let outcome = match train_class(matrix, class, &self.cfg) {
            Ok(model) => {
                let record = validate(&model, matrix, self.cfg.boyce_binning());
                let surface = project(&model, matrix);
                ClassOutcome::Modeled { model, record, surface }
            }
            Err(reason) => {
                warn!(class, "skipped: {reason}");
                ClassOutcome::Failed { reason }
            }
        };
        ClassResult { class, outcome }
    }
}
