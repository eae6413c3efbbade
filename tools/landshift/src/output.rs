//! Run artifacts: models, probability rasters, validation table, manifest.
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use landshift_core::config::{ClassScope, PipelineConfig};
use landshift_core::features::FeatureMatrix;
use landshift_core::grid::GridFrame;
use landshift_core::legend::ClassId;
use landshift_core::pipeline::{ClassOutcome, MatrixSummary, PipelineRun, RowStatus};
use landshift_core::projector::{ProbabilitySurface, PROBABILITY_NODATA};
use serde::Serialize;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use crate::ingest::{
    KEY_GEOGRAPHIC_TYPE, KEY_MODEL_TYPE, KEY_PROJECTED_CS_TYPE, TAG_GDAL_NODATA,
    TAG_GEO_KEY_DIRECTORY, TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT,
};

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;

pub const VALIDATION_FILE: &str = "validation_metrics.json";
pub const SUMMARY_FILE: &str = "processed_summary.json";
pub const MATRIX_FILE: &str = "feature_matrix.json";

pub fn model_path(dir: &Path, class: ClassId) -> PathBuf {
    dir.join("models").join(format!("rf_model_{class}.json"))
}

pub fn surface_path(dir: &Path, class: ClassId, ext: &str) -> PathBuf {
    dir.join(format!("probability_map_{class}.{ext}"))
}

pub fn curves_path(dir: &Path, class: ClassId) -> PathBuf {
    dir.join("curves").join(format!("curves_{class}.json"))
}

#[derive(Serialize)]
struct ClassEntry {
    class: ClassId,
    status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    surface: Option<PathBuf>,
}

/// `processed_summary.json`.
#[derive(Serialize)]
struct Summary<'a> {
    scope: &'a ClassScope,
    config: &'a PipelineConfig,
    matrix: &'a MatrixSummary,
    classes: Vec<ClassEntry>,
    elapsed_ms: u64,
}

#[derive(Serialize)]
struct Curves<'a> {
    class: ClassId,
    roc: &'a [landshift_core::metrics::RocPoint],
    boyce: &'a [landshift_core::metrics::BoycePoint],
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Write failed: {}", path.display()))
}

/// Store the valid-cell table as compact JSON for `--from-matrix`.
pub fn write_matrix(dir: &Path, matrix: &FeatureMatrix) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    let path = dir.join(MATRIX_FILE);
    let file = File::create(&path).with_context(|| format!("Cannot create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, matrix)?;
    out.flush().with_context(|| format!("Write failed: {}", path.display()))?;
    Ok(path)
}

/// Write every artifact of `run` under `dir`. Returns the files written.
pub fn write_run(
    dir: &Path,
    run: &PipelineRun,
    cfg: &PipelineConfig,
    json_surfaces: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    let mut written = Vec::new();
    let mut classes = Vec::new();

    for result in &run.results {
        let entry = match &result.outcome {
            ClassOutcome::Modeled { model, record, surface } => {
                let mp = model_path(dir, result.class);
                write_json(&mp, model)?;

                let sp = surface_path(dir, result.class, "tif");
                write_surface_tiff(&sp, surface)?;
                if json_surfaces {
                    let jp = surface_path(dir, result.class, "json");
                    write_json(&jp, surface)?;
                    written.push(jp);
                }

                let cp = curves_path(dir, result.class);
                write_json(
                    &cp,
                    &Curves {
                        class: result.class,
                        roc: &record.roc_curve,
                        boyce: &record.boyce_curve,
                    },
                )?;

                written.extend([mp.clone(), sp.clone(), cp]);
                ClassEntry {
                    class: result.class,
                    status: RowStatus::Modeled,
                    model: Some(mp),
                    surface: Some(sp),
                }
            }
            ClassOutcome::Failed { .. } => ClassEntry {
                class: result.class,
                status: RowStatus::Failed,
                model: None,
                surface: None,
            },
        };
        classes.push(entry);
    }

    let vp = dir.join(VALIDATION_FILE);
    write_json(&vp, &run.validation_table())?;
    written.push(vp);

    let summary = Summary {
        scope: &run.scope,
        config: cfg,
        matrix: &run.matrix,
        classes,
        elapsed_ms: run.elapsed_ms,
    };
    let smp = dir.join(SUMMARY_FILE);
    write_json(&smp, &summary)?;
    written.push(smp);

    Ok(written)
}

/// Single-band Float32 GeoTIFF with the surface's frame and nodata.
pub fn write_surface_tiff(path: &Path, surface: &ProbabilitySurface) -> Result<()> {
    let frame = &surface.grid.frame;
    let file = File::create(path).with_context(|| format!("Create failed: {}", path.display()))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let mut image =
        encoder.new_image::<colortype::Gray32Float>(frame.width as u32, frame.height as u32)?;

    let (scale, tiepoint) = georef_tags(frame);
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE), &scale[..])?;
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT), &tiepoint[..])?;
    if let Some(keys) = frame.crs.as_deref().and_then(geokeys_for) {
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY), &keys[..])?;
    }
    let nodata = format!("{PROBABILITY_NODATA}");
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(TAG_GDAL_NODATA), nodata.as_str())?;

    image
        .write_data(&surface.grid.data)
        .with_context(|| format!("Write failed: {}", path.display()))?;
    Ok(())
}

/// ModelPixelScale and ModelTiepoint values for a north-up frame.
pub fn georef_tags(frame: &GridFrame) -> ([f64; 3], [f64; 6]) {
    (
        [frame.pixel_width, frame.pixel_height.abs(), 0.0],
        [0.0, 0.0, 0.0, frame.origin_x, frame.origin_y, 0.0],
    )
}

/// Minimal GeoKeyDirectory carrying an "EPSG:n" code. Codes in the EPSG
/// 4000-4999 block are geographic 2D CRSs; everything else is written as
/// projected.
fn geokeys_for(crs: &str) -> Option<[u16; 12]> {
    let code: u16 = crs.strip_prefix("EPSG:")?.parse().ok()?;
    let (model, key) = if (4000..5000).contains(&code) {
        (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, KEY_PROJECTED_CS_TYPE)
    };
    Some([1, 1, 0, 2, KEY_MODEL_TYPE, 0, 1, model, key, 0, 1, code])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{epsg_from_geokeys, frame_from_tags, read_geotiff};
    use landshift_core::grid::Grid;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("landshift-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn georef_tags_invert_frame() {
        let frame = GridFrame::new(40, 30, 4_300_000.0, 2_900_000.0, 100.0, -100.0);
        let (scale, tie) = georef_tags(&frame);
        assert_eq!(frame_from_tags(40, 30, Some(&scale), Some(&tie)), frame);
    }

    #[test]
    fn surface_tiff_round_trip() {
        let dir = scratch("tiff");
        let frame = GridFrame::new(3, 2, 1000.0, 2000.0, 10.0, -10.0);
        let grid = Grid::from_vec(frame.clone(), vec![0.1, 0.5, PROBABILITY_NODATA, 0.9, 0.0, 1.0])
            .with_nodata(PROBABILITY_NODATA);
        let surface = ProbabilitySurface { class: 3, grid };
        let path = surface_path(&dir, 3, "tif");
        write_surface_tiff(&path, &surface).unwrap();

        let raw = read_geotiff(&path).unwrap();
        assert_eq!(raw.frame, frame);
        assert_eq!(raw.nodata, Some(f64::from(PROBABILITY_NODATA)));
        assert_eq!(raw.values.len(), 6);
        assert_eq!(raw.values[2], f64::from(PROBABILITY_NODATA));
        assert!(!raw.integral);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn crs_survives_tiff_round_trip() {
        let dir = scratch("crs");
        let frame = GridFrame::new(2, 2, 0.0, 200.0, 100.0, -100.0).with_crs("EPSG:3035");
        let grid = Grid::from_vec(frame.clone(), vec![0.25f32; 4]).with_nodata(PROBABILITY_NODATA);
        let path = surface_path(&dir, 6, "tif");
        write_surface_tiff(&path, &ProbabilitySurface { class: 6, grid }).unwrap();
        assert_eq!(read_geotiff(&path).unwrap().frame, frame);
        assert_eq!(geokeys_for("WGS84"), None);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn geographic_codes_get_the_geographic_key() {
        let keys = geokeys_for("EPSG:4326").unwrap();
        assert_eq!(&keys[4..8], &[KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC]);
        assert_eq!(&keys[8..], &[KEY_GEOGRAPHIC_TYPE, 0, 1, 4326]);

        let keys = geokeys_for("EPSG:3035").unwrap();
        assert_eq!(keys[7], MODEL_TYPE_PROJECTED);
        assert_eq!(&keys[8..], &[KEY_PROJECTED_CS_TYPE, 0, 1, 3035]);

        assert_eq!(epsg_from_geokeys(&geokeys_for("EPSG:4326").unwrap()), Some(4326));
    }

    #[test]
    fn artifact_names() {
        let dir = Path::new("out");
        assert_eq!(model_path(dir, 3), Path::new("out/models/rf_model_3.json"));
        assert_eq!(surface_path(dir, 15, "tif"), Path::new("out/probability_map_15.tif"));
    }
}
