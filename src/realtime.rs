//! Realtime reliability scoring of single images against a reference profile
//! built from stable historical batches.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{DetectorConfig, ExtractorConfig, FeatureWeight, RealtimeConfig};
use crate::data::columns;
use crate::data::filter::{filtered_indices, stable_filter};
use crate::data::model::{CellValue, Dataset, Row};
use crate::reliability::stats;
use crate::thermal::{FEATURE_COLUMNS, FeatureRecord, FeatureStatus, ThermalAnalyzer};
use crate::tracking::{NoopTracker, Tracker};

/// Score returned when nothing can be compared.
pub const NEUTRAL_SCORE: f64 = 50.0;
/// Values closer than this to a zero-spread reference mean count as a match.
pub const ZERO_STD_TOLERANCE: f64 = 0.01;

/// Features summarised in the reference profile.
pub const REFERENCE_FEATURES: [&str; 6] = [
    columns::GRADIENT_MAX,
    columns::GRADIENT_STD,
    columns::EMULSION_RATIO,
    columns::WATER_RATIO,
    columns::CRUDE_RATIO,
    columns::INTERFACE_CONFIDENCE,
];

// ---------------------------------------------------------------------------
// Reference profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub mean: f64,
    /// Sample std; a single observation has a spread of 0.
    pub std: f64,
    pub median: f64,
    pub q25: f64,
    pub q75: f64,
}

impl FeatureSummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        Some(Self {
            mean: stats::mean(values)?,
            std: stats::sample_std(values).unwrap_or(0.0),
            median: stats::median(values)?,
            q25: stats::quantile(values, 0.25)?,
            q75: stats::quantile(values, 0.75)?,
        })
    }

    /// Closeness of `value` to this distribution on a 0–100 scale.
    pub fn sub_score(&self, value: f64) -> f64 {
        if self.std == 0.0 {
            return if (value - self.mean).abs() < ZERO_STD_TOLERANCE { 100.0 } else { 50.0 };
        }
        let z = (value - self.mean).abs() / self.std;
        (100.0 * (-z / 2.0).exp()).clamp(0.0, 100.0)
    }
}

/// Per-feature summary statistics of successful stable-batch records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceProfile {
    pub features: BTreeMap<String, FeatureSummary>,
    pub n_samples: usize,
}

impl ReferenceProfile {
    /// Summarise the stable, successful rows of `history`. Features that are
    /// absent or entirely null are left out.
    pub fn build(history: &Dataset) -> Self {
        let stable = history.select(&filtered_indices(history, &stable_filter()));
        log::info!(
            "Building reference profile from {} stable rows (of {})",
            stable.len(),
            history.len()
        );
        if stable.is_empty() {
            log::warn!("No stable data available for the reference profile");
            return Self::default();
        }

        let mut features = BTreeMap::new();
        for feature in REFERENCE_FEATURES {
            if !stable.has_column(feature) {
                continue;
            }
            let values: Vec<f64> = stable.column_f64(feature).into_iter().flatten().collect();
            if let Some(summary) = FeatureSummary::from_values(&values) {
                log::debug!("{feature}: mean={:.3}, std={:.3}", summary.mean, summary.std);
                features.insert(feature.to_string(), summary);
            }
        }
        log::info!("Reference profile covers {} features", features.len());
        Self {
            features,
            n_samples: stable.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, feature: &str) -> Option<&FeatureSummary> {
        self.features.get(feature)
    }

    /// Weighted mean of per-feature sub-scores, renormalised over the
    /// features available in both the record and the reference.
    pub fn score(&self, record: &FeatureRecord, weights: &[FeatureWeight]) -> f64 {
        if self.is_empty() {
            return NEUTRAL_SCORE;
        }
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for w in weights {
            let (Some(value), Some(summary)) = (record.get(&w.feature), self.get(&w.feature)) else {
                continue;
            };
            weighted += summary.sub_score(value) * w.weight;
            total_weight += w.weight;
        }
        if total_weight > 0.0 {
            weighted / total_weight
        } else {
            NEUTRAL_SCORE
        }
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityCategory {
    Alta,
    Media,
    Baja,
}

impl ReliabilityCategory {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Alta
        } else if score >= 60.0 {
            Self::Media
        } else {
            Self::Baja
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alta => "alta",
            Self::Media => "media",
            Self::Baja => "baja",
        }
    }
}

impl fmt::Display for ReliabilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// Feature record of one image extended with its reliability verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    #[serde(flatten)]
    pub features: FeatureRecord,
    pub reliability_score: f64,
    pub reliability_category: ReliabilityCategory,
    /// Seconds spent extracting features.
    pub processing_time: f64,
    /// Seconds including scoring.
    pub total_processing_time: f64,
    pub image_path: String,
    pub image_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Extra columns a prediction adds to its feature record, in output order.
pub const PREDICTION_COLUMNS: [&str; 8] = [
    columns::RELIABILITY_SCORE,
    columns::RELIABILITY_CATEGORY,
    "processing_time",
    "total_processing_time",
    "image_path",
    "image_filename",
    "timestamp",
    "error",
];

impl Prediction {
    pub fn to_row(&self) -> Row {
        let mut row = self.features.to_row();
        row.insert(columns::RELIABILITY_SCORE.into(), self.reliability_score.into());
        row.insert(
            columns::RELIABILITY_CATEGORY.into(),
            self.reliability_category.as_str().into(),
        );
        row.insert("processing_time".into(), self.processing_time.into());
        row.insert("total_processing_time".into(), self.total_processing_time.into());
        row.insert("image_path".into(), self.image_path.as_str().into());
        row.insert("image_filename".into(), self.image_filename.as_str().into());
        row.insert(
            "timestamp".into(),
            self.timestamp.as_deref().map_or(CellValue::Null, CellValue::from),
        );
        row.insert(
            "error".into(),
            self.error.as_deref().map_or(CellValue::Null, CellValue::from),
        );
        row
    }
}

fn filename_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^tanque_(\d{8})_(\d{6})\.(?:jpe?g|png)$").ok())
        .as_ref()
}

/// Capture time encoded as `tanque_YYYYMMDD_HHMMSS.<jpg|jpeg|png>`.
pub fn timestamp_from_filename(name: &str) -> Option<NaiveDateTime> {
    let caps = filename_pattern()?.captures(name)?;
    let stamp = format!("{}{}", &caps[1], &caps[2]);
    NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M%S").ok()
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Extracts features from new images and scores them against the current
/// reference. The reference is replaced wholesale by [`rebuild_reference`],
/// so in-flight scoring always sees one consistent profile.
///
/// [`rebuild_reference`]: RealtimeScorer::rebuild_reference
pub struct RealtimeScorer {
    analyzer: ThermalAnalyzer,
    config: RealtimeConfig,
    reference: RwLock<Arc<ReferenceProfile>>,
    tracker: Arc<dyn Tracker>,
}

impl RealtimeScorer {
    /// `extractor` supplies the preprocessing settings; its resolution is
    /// replaced by the realtime one.
    pub fn new(
        config: RealtimeConfig,
        extractor: &ExtractorConfig,
        detector: DetectorConfig,
        reference: ReferenceProfile,
        tracker: Arc<dyn Tracker>,
    ) -> Self {
        log::info!(
            "RealtimeScorer: {}×{}, reference with {} features",
            config.width,
            config.height,
            reference.features.len()
        );
        Self {
            analyzer: ThermalAnalyzer::new(config.extractor(extractor), detector),
            config,
            reference: RwLock::new(Arc::new(reference)),
            tracker,
        }
    }

    /// Scorer whose reference is built from `history`.
    pub fn from_history(
        config: RealtimeConfig,
        extractor: &ExtractorConfig,
        detector: DetectorConfig,
        history: &Dataset,
        tracker: Arc<dyn Tracker>,
    ) -> Self {
        Self::new(config, extractor, detector, ReferenceProfile::build(history), tracker)
    }

    pub fn analyzer(&self) -> &ThermalAnalyzer {
        &self.analyzer
    }

    /// Snapshot of the current reference.
    pub fn reference(&self) -> Arc<ReferenceProfile> {
        let guard = self.reference.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Build a new reference from `history` and swap it in.
    pub fn rebuild_reference(&self, history: &Dataset) {
        let fresh = Arc::new(ReferenceProfile::build(history));
        let mut guard = self.reference.write().unwrap_or_else(|e| e.into_inner());
        *guard = fresh;
    }

    pub fn score(&self, record: &FeatureRecord) -> (f64, ReliabilityCategory) {
        let score = self.reference().score(record, &self.config.weights);
        (score, ReliabilityCategory::from_score(score))
    }

    /// Extract, score and time a single image.
    pub fn predict_image(&self, path: &Path) -> Prediction {
        let start = Instant::now();
        let image_filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let timestamp = timestamp_from_filename(&image_filename)
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string());

        let mut prediction = Prediction {
            features: FeatureRecord::failure(FeatureStatus::NotFound),
            reliability_score: 0.0,
            reliability_category: ReliabilityCategory::Baja,
            processing_time: 0.0,
            total_processing_time: 0.0,
            image_path: path.display().to_string(),
            image_filename,
            timestamp,
            error: None,
        };

        if !path.exists() {
            log::error!("Image not found: {}", path.display());
            prediction.error = Some("image_not_found".into());
            self.tracker.log_error("image_not_found", &prediction.image_path);
            return prediction;
        }

        prediction.features = self.analyzer.process_path(path);
        prediction.processing_time = start.elapsed().as_secs_f64();

        if prediction.features.status.is_success() {
            let (score, category) = self.score(&prediction.features);
            prediction.reliability_score = score;
            prediction.reliability_category = category;
        } else {
            log::warn!(
                "Extraction failed for {}: {}",
                prediction.image_path,
                prediction.features.status
            );
        }
        prediction.total_processing_time = start.elapsed().as_secs_f64();

        if prediction.total_processing_time > self.config.processing_time_limit_secs {
            log::warn!(
                "Processing time {:.2}s exceeds limit of {:.2}s",
                prediction.total_processing_time,
                self.config.processing_time_limit_secs
            );
        }
        log::info!(
            "Prediction for {}: score={:.1} ({}), {:.3}s",
            prediction.image_filename,
            prediction.reliability_score,
            prediction.reliability_category,
            prediction.total_processing_time
        );

        match serde_json::to_value(&prediction) {
            Ok(value) => self.tracker.log_prediction(path, &value),
            Err(e) => log::warn!("Could not serialise prediction: {e}"),
        }
        prediction
    }

    /// Predict every image, preserving input order, as one dataset.
    pub fn batch_predict(&self, paths: &[PathBuf]) -> Dataset {
        log::info!("Batch prediction over {} images", paths.len());
        let predictions: Vec<Prediction> = paths.par_iter().map(|p| self.predict_image(p)).collect();

        let scores: Vec<f64> = predictions
            .iter()
            .filter(|p| p.features.status.is_success())
            .map(|p| p.reliability_score)
            .collect();
        if let Some(mean) = stats::mean(&scores) {
            log::info!("Batch mean score: {mean:.1} over {} scored images", scores.len());
        }
        self.tracker.log_metrics(
            "batch_predict",
            &[
                ("n_images", paths.len() as f64),
                ("n_scored", scores.len() as f64),
                ("mean_score", stats::mean(&scores).unwrap_or(0.0)),
            ],
        );

        let column_names = FEATURE_COLUMNS
            .iter()
            .chain(PREDICTION_COLUMNS.iter())
            .map(|c| c.to_string())
            .collect();
        Dataset::with_columns(column_names, predictions.iter().map(Prediction::to_row).collect())
    }
}

impl Default for RealtimeScorer {
    fn default() -> Self {
        Self::new(
            RealtimeConfig::default(),
            &ExtractorConfig::default(),
            DetectorConfig::default(),
            ReferenceProfile::default(),
            Arc::new(NoopTracker),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn history_row(batch: &str, confidence: f64, gradient_max: f64) -> Row {
        let mut r = Row::new();
        r.insert(columns::STATUS.into(), columns::STATUS_SUCCESS.into());
        r.insert(columns::BATCH_TYPE.into(), batch.into());
        r.insert(columns::INTERFACE_CONFIDENCE.into(), confidence.into());
        r.insert(columns::GRADIENT_MAX.into(), gradient_max.into());
        r
    }

    fn success_record(confidence: f64, gradient_max: f64) -> FeatureRecord {
        FeatureRecord {
            interface_confidence: confidence,
            gradient_max,
            ..FeatureRecord::failure(FeatureStatus::Success)
        }
    }

    #[test]
    fn test_empty_reference_is_neutral() {
        let reference = ReferenceProfile::build(&Dataset::default());
        assert!(reference.is_empty());
        let weights = RealtimeConfig::default().weights;
        assert_eq!(reference.score(&success_record(0.9, 3.0), &weights), 50.0);
        assert_eq!(reference.score(&success_record(0.0, 0.0), &weights), 50.0);
    }

    #[test]
    fn test_reference_uses_only_stable_rows() {
        let history = Dataset::from_rows(vec![
            history_row(columns::BATCH_STABLE, 0.70, 2.0),
            history_row(columns::BATCH_STABLE, 0.80, 2.0),
            history_row(columns::BATCH_TURBULENT, 0.10, 9.0),
        ]);
        let reference = ReferenceProfile::build(&history);
        assert_eq!(reference.n_samples, 2);
        assert_eq!(reference.features.len(), 2);
        let c = reference.get(columns::INTERFACE_CONFIDENCE).unwrap();
        assert_relative_eq!(c.mean, 0.75, epsilon = 1e-12);
        assert_relative_eq!(c.median, 0.75, epsilon = 1e-12);
        assert_eq!(reference.get(columns::GRADIENT_MAX).unwrap().std, 0.0);
        assert!(reference.get(columns::WATER_RATIO).is_none());
    }

    #[test]
    fn test_zero_std_sub_score() {
        let s = FeatureSummary::from_values(&[2.0, 2.0, 2.0]).unwrap();
        assert_eq!(s.sub_score(2.0), 100.0);
        assert_eq!(s.sub_score(2.005), 100.0);
        assert_eq!(s.sub_score(2.5), 50.0);
    }

    #[test]
    fn test_zero_std_tolerance_is_exclusive() {
        let s = FeatureSummary::from_values(&[0.0, 0.0]).unwrap();
        assert_eq!(s.sub_score(0.009), 100.0);
        assert_eq!(s.sub_score(ZERO_STD_TOLERANCE), 50.0);
        assert_eq!(s.sub_score(-ZERO_STD_TOLERANCE), 50.0);
    }

    #[test]
    fn test_scorer_uses_configured_preprocessing() {
        let extractor = ExtractorConfig {
            smoothing_sigma: 1.0,
            normalize: false,
            background_threshold: 0,
            ..ExtractorConfig::default()
        };
        let config = RealtimeConfig { width: 320, height: 240, ..RealtimeConfig::default() };
        let scorer = RealtimeScorer::new(
            config,
            &extractor,
            DetectorConfig::default(),
            ReferenceProfile::default(),
            Arc::new(NoopTracker),
        );
        let used = scorer.analyzer().extractor().config();
        assert_eq!((used.width, used.height), (320, 240));
        assert_eq!(used.smoothing_sigma, 1.0);
        assert!(!used.normalize);
        assert_eq!(used.background_threshold, 0);
    }

    #[test]
    fn test_sub_score_decays_with_z() {
        let s = FeatureSummary { mean: 0.75, std: 0.05, median: 0.75, q25: 0.7, q75: 0.8 };
        assert_relative_eq!(s.sub_score(0.75), 100.0);
        assert_relative_eq!(s.sub_score(0.85), 100.0 * (-1.0f64).exp(), epsilon = 1e-9);
        assert!(s.sub_score(10.0) >= 0.0);
    }

    #[test]
    fn test_matching_confidence_contributes_full_score() {
        let history = Dataset::from_rows(
            [0.70, 0.75, 0.80, 0.75]
                .iter()
                .map(|&c| history_row(columns::BATCH_STABLE, c, 2.0))
                .collect(),
        );
        let reference = ReferenceProfile::build(&history);
        let weights = vec![FeatureWeight {
            feature: columns::INTERFACE_CONFIDENCE.into(),
            weight: 0.30,
        }];
        assert_relative_eq!(reference.score(&success_record(0.75, 0.0), &weights), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_weights_renormalise_over_available_features() {
        let history = Dataset::from_rows(vec![
            history_row(columns::BATCH_STABLE, 0.75, 2.0),
            history_row(columns::BATCH_STABLE, 0.75, 2.0),
        ]);
        let reference = ReferenceProfile::build(&history);
        // confidence matches (100), gradient far off (50): (0.30*100 + 0.25*50) / 0.55
        let score = reference.score(&success_record(0.75, 5.0), &RealtimeConfig::default().weights);
        assert_relative_eq!(score, (30.0 + 12.5) / 0.55, epsilon = 1e-9);
    }

    #[test]
    fn test_category_bounds_are_inclusive() {
        assert_eq!(ReliabilityCategory::from_score(80.0), ReliabilityCategory::Alta);
        assert_eq!(ReliabilityCategory::from_score(79.99), ReliabilityCategory::Media);
        assert_eq!(ReliabilityCategory::from_score(60.0), ReliabilityCategory::Media);
        assert_eq!(ReliabilityCategory::from_score(59.9), ReliabilityCategory::Baja);
    }

    #[test]
    fn test_timestamp_from_filename() {
        let t = timestamp_from_filename("tanque_20240315_143022.jpg").unwrap();
        assert_eq!(t.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-15 14:30:22");
        assert!(timestamp_from_filename("tanque_20241345_000000.png").is_none());
        assert!(timestamp_from_filename("Imagen12.png").is_none());
    }

    #[test]
    fn test_missing_image_prediction() {
        let p = RealtimeScorer::default().predict_image(Path::new("/nonexistent/tanque_20240101_000000.png"));
        assert_eq!(p.error.as_deref(), Some("image_not_found"));
        assert_eq!(p.reliability_score, 0.0);
        assert_eq!(p.reliability_category, ReliabilityCategory::Baja);
        assert_eq!(p.timestamp.as_deref(), Some("2024-01-01T00:00:00"));
    }

    #[test]
    fn test_failed_extraction_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.png");
        image::GrayImage::from_pixel(64, 480, image::Luma([128])).save(&path).unwrap();

        let p = RealtimeScorer::default().predict_image(&path);
        assert_eq!(p.features.status, FeatureStatus::NoInterfacesDetected);
        assert_eq!(p.reliability_score, 0.0);
        assert_eq!(p.reliability_category, ReliabilityCategory::Baja);
        assert!(p.error.is_none());
    }

    #[test]
    fn test_rebuild_swaps_reference() {
        let scorer = RealtimeScorer::default();
        let before = scorer.reference();
        assert!(before.is_empty());
        scorer.rebuild_reference(&Dataset::from_rows(vec![history_row(
            columns::BATCH_STABLE,
            0.8,
            2.0,
        )]));
        assert!(before.is_empty());
        assert_eq!(scorer.reference().n_samples, 1);
    }

    #[test]
    fn test_prediction_serialises_flat() {
        let p = RealtimeScorer::default().predict_image(Path::new("/nonexistent/x.png"));
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["status"], "not_found");
        assert_eq!(v["reliability_category"], "baja");
        assert!(v.get(columns::GRADIENT_MAX).is_some());
        assert!(v.get("timestamp").is_none());
    }
}
