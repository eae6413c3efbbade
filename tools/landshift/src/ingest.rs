//! Run file parsing and raster loading (JSON grids or GeoTIFF).
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use landshift_core::config::PipelineConfig;
use landshift_core::features::{CovariateLayer, FeatureKind, FeatureMatrix};
use landshift_core::grid::{ClassGrid, CovariateGrid, Grid, GridFrame, MaskGrid};
use landshift_core::legend::{LegendEntry, LegendTable};
use serde::Deserialize;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

// ── GeoTIFF tag ids ──────────────────────────────────────────────────────────

pub const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
pub const TAG_MODEL_TIEPOINT: u16 = 33922;
pub const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
pub const TAG_GDAL_NODATA: u16 = 42113;

pub const KEY_MODEL_TYPE: u16 = 1024;
pub const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
pub const KEY_PROJECTED_CS_TYPE: u16 = 3072;

// ── Run file ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LegendSource {
    /// "corine", or a path to a JSON list of entries.
    Named(String),
    Entries(Vec<LegendEntry>),
}

#[derive(Debug, Deserialize)]
pub struct CovariateSpec {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "numeric")]
    pub kind: FeatureKind,
}

fn numeric() -> FeatureKind {
    FeatureKind::Numeric
}

fn corine() -> LegendSource {
    LegendSource::Named("corine".into())
}

/// Everything one invocation needs: layer paths, legend and options.
#[derive(Debug, Deserialize)]
pub struct RunFile {
    #[serde(default = "corine")]
    pub legend: LegendSource,
    pub prior: PathBuf,
    /// Omitted for projection-only stacks.
    #[serde(default)]
    pub posterior: Option<PathBuf>,
    pub mask: PathBuf,
    #[serde(default)]
    pub covariates: Vec<CovariateSpec>,
    /// Used when the CLI gives no `--output-dir`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read run file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid run file: {}", path.display()))
    }

    /// Resolve the legend; a relative legend path is taken from `base`.
    pub fn legend_table(&self, base: &Path) -> Result<LegendTable> {
        match &self.legend {
            LegendSource::Named(name) if name.eq_ignore_ascii_case("corine") => {
                Ok(LegendTable::corine())
            }
            LegendSource::Named(name) => {
                let path = resolve(base, Path::new(name));
                if !path.is_file() {
                    bail!("Legend is neither `corine` nor a file: {}", path.display());
                }
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("Cannot read legend: {}", path.display()))?;
                let entries: Vec<LegendEntry> = serde_json::from_str(&text)
                    .with_context(|| format!("Invalid legend: {}", path.display()))?;
                Ok(LegendTable::from_entries(&entries)?)
            }
            LegendSource::Entries(entries) => Ok(LegendTable::from_entries(entries)?),
        }
    }
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Loaded, not yet validated, input layers.
pub struct LayerStack {
    pub prior: ClassGrid,
    pub posterior: Option<ClassGrid>,
    pub mask: MaskGrid,
    pub covariates: Vec<CovariateLayer>,
}

pub fn load_layers(run: &RunFile, base: &Path) -> Result<LayerStack> {
    let prior = load_class_grid(&resolve(base, &run.prior)).context("prior layer")?;
    let posterior = match &run.posterior {
        Some(p) => Some(load_class_grid(&resolve(base, p)).context("posterior layer")?),
        None => None,
    };
    let mask = load_mask_grid(&resolve(base, &run.mask)).context("land mask")?;
    let covariates = run
        .covariates
        .iter()
        .map(|spec| {
            let grid = load_covariate_grid(&resolve(base, &spec.path))
                .with_context(|| format!("covariate `{}`", spec.name))?;
            Ok(CovariateLayer {
                name: spec.name.clone(),
                kind: spec.kind,
                grid,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LayerStack { prior, posterior, mask, covariates })
}

// ── Raster readers ───────────────────────────────────────────────────────────

/// Decoded single-band raster before conversion to a concrete cell type.
pub struct RawRaster {
    pub frame: GridFrame,
    pub values: Vec<f64>,
    pub nodata: Option<f64>,
    pub integral: bool,
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

fn read_json_grid<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Read failed: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid grid JSON: {}", path.display()))
}

pub fn load_class_grid(path: &Path) -> Result<ClassGrid> {
    if is_json(path) {
        return read_json_grid(path);
    }
    let raw = read_geotiff(path)?;
    if !raw.integral {
        bail!("{} holds floating-point samples; class rasters must be integer", path.display());
    }
    let data = class_codes(&raw.values)
        .with_context(|| format!("Class codes out of range in {}", path.display()))?;
    let nodata = match raw.nodata {
        Some(v) => Some(class_code(v).with_context(|| format!("nodata of {}", path.display()))?),
        None => None,
    };
    Ok(Grid { frame: raw.frame, data, nodata })
}

fn class_code(v: f64) -> Result<i32> {
    if v.fract() != 0.0 || !v.is_finite() {
        bail!("{v} is not an integer code");
    }
    i32::try_from(v as i64).with_context(|| format!("code {v} does not fit in i32"))
}

fn class_codes(values: &[f64]) -> Result<Vec<i32>> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| class_code(v).with_context(|| format!("sample {i}")))
        .collect()
}

pub fn load_mask_grid(path: &Path) -> Result<MaskGrid> {
    if is_json(path) {
        return read_json_grid(path);
    }
    let raw = read_geotiff(path)?;
    // anything but exactly 1 is unusable
    Ok(Grid {
        frame: raw.frame,
        data: raw.values.iter().map(|&v| u8::from(v == 1.0)).collect(),
        nodata: None,
    })
}

pub fn load_covariate_grid(path: &Path) -> Result<CovariateGrid> {
    if is_json(path) {
        return read_json_grid(path);
    }
    let raw = read_geotiff(path)?;
    Ok(Grid {
        frame: raw.frame,
        data: raw.values.iter().map(|&v| v as f32).collect(),
        nodata: raw.nodata.map(|v| v as f32),
    })
}

/// Reload a table written by `output::write_matrix`.
pub fn load_matrix(path: &Path) -> Result<FeatureMatrix> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid feature matrix: {}", path.display()))
}

pub fn read_geotiff(path: &Path) -> Result<RawRaster> {
    let file = File::open(path).with_context(|| format!("Open failed: {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("Not a valid TIFF: {}", path.display()))?;
    let (width, height) = decoder.dimensions()?;

    let scale = tag_f64s(&mut decoder, TAG_MODEL_PIXEL_SCALE)?;
    let tiepoint = tag_f64s(&mut decoder, TAG_MODEL_TIEPOINT)?;
    let nodata = match decoder.find_tag(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))? {
        Some(v) => v.into_string()?.trim_end_matches('\0').trim().parse::<f64>().ok(),
        None => None,
    };
    let crs = match decoder.find_tag(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))? {
        Some(v) => epsg_from_geokeys(&v.into_u16_vec()?),
        None => None,
    };

    let frame = frame_from_tags(width as usize, height as usize, scale.as_deref(), tiepoint.as_deref());
    let frame = match crs {
        Some(code) => frame.with_crs(format!("EPSG:{code}")),
        None => frame,
    };

    let image = decoder
        .read_image()
        .with_context(|| format!("read_image failed: {}", path.display()))?;
    let (values, integral): (Vec<f64>, bool) = match image {
        DecodingResult::U8(v) => (v.into_iter().map(f64::from).collect(), true),
        DecodingResult::U16(v) => (v.into_iter().map(f64::from).collect(), true),
        DecodingResult::U32(v) => (v.into_iter().map(f64::from).collect(), true),
        DecodingResult::I8(v) => (v.into_iter().map(f64::from).collect(), true),
        DecodingResult::I16(v) => (v.into_iter().map(f64::from).collect(), true),
        DecodingResult::I32(v) => (v.into_iter().map(f64::from).collect(), true),
        DecodingResult::F32(v) => (v.into_iter().map(f64::from).collect(), false),
        DecodingResult::F64(v) => (v, false),
        _ => bail!("Unsupported sample format in {}", path.display()),
    };
    if values.len() != frame.len() {
        bail!(
            "{}: {} samples for a {}x{} raster (multi-band rasters are not supported)",
            path.display(),
            values.len(),
            width,
            height
        );
    }

    Ok(RawRaster { frame, values, nodata, integral })
}

fn tag_f64s<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    tag: u16,
) -> Result<Option<Vec<f64>>> {
    match decoder.find_tag(Tag::from_u16_exhaustive(tag))? {
        Some(v) => Ok(Some(v.into_f64_vec()?)),
        None => Ok(None),
    }
}

/// Frame from ModelPixelScale + ModelTiepoint; unit frame when absent.
pub fn frame_from_tags(
    width: usize,
    height: usize,
    scale: Option<&[f64]>,
    tiepoint: Option<&[f64]>,
) -> GridFrame {
    match (scale, tiepoint) {
        (Some([sx, sy, ..]), Some([i, j, _, x, y, ..])) => {
            GridFrame::new(width, height, x - i * sx, y + j * sy, *sx, -sy)
        }
        _ => GridFrame::unit(width, height),
    }
}

/// EPSG code from a GeoKeyDirectory (projected first, then geographic).
pub fn epsg_from_geokeys(keys: &[u16]) -> Option<u16> {
    let n = *keys.get(3)? as usize;
    let entries: Vec<&[u16]> = keys.get(4..4 + 4 * n)?.chunks_exact(4).collect();
    let lookup = |id: u16| {
        entries
            .iter()
            .find(|e| e[0] == id && e[1] == 0 && e[3] != 0 && e[3] != 32767)
            .map(|e| e[3])
    };
    lookup(KEY_PROJECTED_CS_TYPE).or_else(|| lookup(KEY_GEOGRAPHIC_TYPE))
}
