//! Batch feature extraction over a historical dataset.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;

use crate::data::columns;
use crate::data::model::{CellValue, Dataset, Row};
use crate::error::{Error, Result};
use crate::reliability::stats;
use crate::thermal::{FEATURE_COLUMNS, FeatureRecord, FeatureStatus, ThermalAnalyzer};

fn image_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^Imagen(\d+)\.(?:jpe?g|png|gif|bmp)$").ok())
        .as_ref()
}

/// `Imagen<N>.<ext>` files in `dir`, sorted by `N`.
pub fn list_images(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let io_err = |source| Error::Io {
        path: dir.to_path_buf(),
        source,
    };
    let Some(pattern) = image_pattern() else {
        return Ok(Vec::new());
    };

    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(n) = pattern
            .captures(name)
            .and_then(|c| c[1].parse::<u64>().ok())
        {
            images.push((n, path));
        }
    }
    images.sort_by_key(|(n, _)| *n);
    Ok(images)
}

/// Assign the sorted images of `dir` to rows in order, filling the
/// `imagen_path` / `imagen_numero` columns. Rows past the last image get nulls.
pub fn link_images(dataset: &Dataset, dir: &Path) -> Result<Dataset> {
    let images = list_images(dir)?;
    log::info!("Found {} images in {}", images.len(), dir.display());
    if images.len() != dataset.len() {
        log::warn!(
            "{} images for {} rows; linking the first {}",
            images.len(),
            dataset.len(),
            images.len().min(dataset.len())
        );
    }

    let mut out = dataset.clone();
    let mut paths = Vec::with_capacity(dataset.len());
    let mut numbers = Vec::with_capacity(dataset.len());
    for i in 0..dataset.len() {
        match images.get(i) {
            Some((n, path)) => {
                paths.push(CellValue::String(path.display().to_string()));
                numbers.push(CellValue::Integer(*n as i64));
            }
            None => {
                paths.push(CellValue::Null);
                numbers.push(CellValue::Null);
            }
        }
    }
    out.set_column(columns::IMAGE_PATH, paths);
    out.set_column(columns::IMAGE_NUMBER, numbers);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub processed_ok: usize,
    pub processed_failed: usize,
    pub without_image: usize,
    pub mean_crude_ratio: Option<f64>,
    pub mean_emulsion_ratio: Option<f64>,
    pub mean_water_ratio: Option<f64>,
    pub mean_confidence: Option<f64>,
}

impl BatchSummary {
    fn from_records(records: &[FeatureRecord]) -> Self {
        let ok: Vec<&FeatureRecord> = records.iter().filter(|r| r.status.is_success()).collect();
        let without_image = records
            .iter()
            .filter(|r| r.status == FeatureStatus::NoImage)
            .count();
        let mean_of = |f: fn(&FeatureRecord) -> f64| {
            stats::mean(&ok.iter().map(|r| f(r)).collect::<Vec<_>>())
        };
        Self {
            processed_ok: ok.len(),
            processed_failed: records.len() - ok.len() - without_image,
            without_image,
            mean_crude_ratio: mean_of(|r| r.crude_ratio),
            mean_emulsion_ratio: mean_of(|r| r.emulsion_ratio),
            mean_water_ratio: mean_of(|r| r.water_ratio),
            mean_confidence: mean_of(|r| r.interface_confidence),
        }
    }
}

fn image_of(dataset: &Dataset, row: usize) -> Option<PathBuf> {
    dataset
        .get(row, columns::IMAGE_PATH)
        .as_str()
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.exists())
}

/// Extract features for every row's image (in parallel, order kept) and
/// append the feature columns. Rows without an existing image are tagged
/// `no_image`.
pub fn process_dataset(dataset: &Dataset, analyzer: &ThermalAnalyzer) -> (Dataset, BatchSummary) {
    log::info!("Processing images for {} rows", dataset.len());
    let records: Vec<FeatureRecord> = (0..dataset.len())
        .into_par_iter()
        .map(|i| match image_of(dataset, i) {
            Some(path) => analyzer.process_path(&path),
            None => FeatureRecord::failure(FeatureStatus::NoImage),
        })
        .collect();

    let features = Dataset::with_columns(
        FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        records.iter().map(FeatureRecord::to_row).collect::<Vec<Row>>(),
    );
    let mut out = dataset.clone();
    out.append_columns(&features);

    let summary = BatchSummary::from_records(&records);
    log::info!(
        "Processing complete: {} ok, {} failed, {} without image",
        summary.processed_ok,
        summary.processed_failed,
        summary.without_image
    );
    if let (Some(c), Some(e), Some(w)) = (
        summary.mean_crude_ratio,
        summary.mean_emulsion_ratio,
        summary.mean_water_ratio,
    ) {
        log::info!("Mean layer ratios: crude={c:.3}, emulsion={e:.3}, water={w:.3}");
    }
    (out, summary)
}
