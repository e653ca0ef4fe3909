use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::columns;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Top-level configuration
// ---------------------------------------------------------------------------

/// Full run configuration. Every section has working defaults, so an empty
/// JSON object (`{}`) is a valid config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extractor: ExtractorConfig,
    pub detector: DetectorConfig,
    pub variability: VariabilityConfig,
    pub descriptive: DescriptiveConfig,
    pub realtime: RealtimeConfig,
    pub tracking: TrackingConfig,
}

impl Config {
    /// Read a JSON config file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.extractor.validate()?;
        self.realtime.extractor(&self.extractor).validate()?;
        if self.detector.max_candidates < 2 {
            return Err(Error::InvalidConfig(
                "detector.max_candidates must be at least 2".into(),
            ));
        }
        if self.variability.window == 0 {
            return Err(Error::InvalidConfig("variability.window must be > 0".into()));
        }
        self.descriptive.validate()?;
        if self.realtime.weights.iter().any(|w| w.weight < 0.0) {
            return Err(Error::InvalidConfig(
                "realtime.weights must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Thermal profile extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Working width in pixels; images are resized before profiling.
    pub width: u32,
    /// Working height in pixels.
    pub height: u32,
    /// Sigma of the 1-D Gaussian applied to the row profile.
    pub smoothing_sigma: f64,
    /// Stretch the remaining brightness range to [0, 255].
    pub normalize: bool,
    /// Pixels below this brightness are zeroed as "no signal".
    pub background_threshold: u8,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 512,
            smoothing_sigma: 3.0,
            normalize: true,
            background_threshold: 20,
        }
    }
}

impl ExtractorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "working resolution must be non-zero, got {}×{}",
                self.width, self.height
            )));
        }
        if !(self.smoothing_sigma >= 0.0) {
            return Err(Error::InvalidConfig(
                "smoothing_sigma must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Interface detection
// ---------------------------------------------------------------------------

/// Calibrated brightness band of one layer (0–255 pixel scale).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerRange {
    pub low: f64,
    pub high: f64,
    pub weight: f64,
}

/// Brightness priors for the three layers.
/// Calibration: 0 °C maps to 40, 60 °C to 255.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerRanges {
    pub crude: LayerRange,
    pub emulsion: LayerRange,
    pub water: LayerRange,
}

impl Default for LayerRanges {
    fn default() -> Self {
        Self {
            crude: LayerRange { low: 180.0, high: 255.0, weight: 5.0 },
            emulsion: LayerRange { low: 130.0, high: 180.0, weight: 5.0 },
            water: LayerRange { low: 70.0, high: 130.0, weight: 5.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum peak prominence as a multiple of the gradient std.
    pub prominence_factor: f64,
    /// Minimum separation between candidate peaks, in rows.
    pub min_distance: usize,
    /// Candidates kept after ranking by prominence.
    pub max_candidates: usize,
    /// Minimum mean-brightness step between adjacent layers for the bonus.
    pub separation_margin: f64,
    /// Bonus per well-separated layer pair.
    pub separation_bonus: f64,
    /// Score of a fully in-range, well-separated pair; maps to confidence 1.
    pub confidence_scale: f64,
    pub ranges: LayerRanges,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            prominence_factor: 0.4,
            min_distance: 15,
            max_candidates: 6,
            separation_margin: 10.0,
            separation_bonus: 3.0,
            confidence_scale: 25.0,
            ranges: LayerRanges::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Variability / reliability analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariabilityConfig {
    /// Centered rolling window for sigma.
    pub window: usize,
    /// Operating signals whose variability defines the batch type.
    pub signals: Vec<String>,
    /// Explicit classification threshold on `sigma_combined`; median if unset.
    pub threshold: Option<f64>,
    pub correlation_method: CorrelationMethod,
    /// Rows are sorted by this column before sigma computation, if present.
    pub order_column: Option<String>,
}

impl Default for VariabilityConfig {
    fn default() -> Self {
        Self {
            window: 5,
            signals: vec![columns::FLOW.to_string(), columns::LEVEL.to_string()],
            threshold: None,
            correlation_method: CorrelationMethod::Pearson,
            order_column: Some(columns::DAY.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptive analysis
// ---------------------------------------------------------------------------

/// Confidence cut-offs for the `alta` / `media` / `baja` reliability levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityLevels {
    pub high: f64,
    pub medium: f64,
}

impl Default for ReliabilityLevels {
    fn default() -> Self {
        Self { high: 0.7, medium: 0.4 }
    }
}

/// Level (%) and flow limits that define the tank's operating state.
/// Filling is checked first, then draining, then settling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationalThresholds {
    pub filling_min_level: f64,
    pub filling_min_flow: f64,
    pub draining_min_level: f64,
    pub draining_max_flow: f64,
    pub settling_min_level: f64,
    pub settling_min_flow: f64,
    pub settling_max_flow: f64,
}

impl Default for OperationalThresholds {
    fn default() -> Self {
        Self {
            filling_min_level: 20.0,
            filling_min_flow: 100.0,
            draining_min_level: 20.0,
            draining_max_flow: -100.0,
            settling_min_level: 50.0,
            settling_min_flow: -50.0,
            settling_max_flow: 50.0,
        }
    }
}

/// Accepted `[min, max]` interval of one layer ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatioRange {
    pub min: f64,
    pub max: f64,
}

impl Default for RatioRange {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatioLimits {
    pub crude: RatioRange,
    pub emulsion: RatioRange,
    pub water: RatioRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptiveConfig {
    pub reliability: ReliabilityLevels,
    pub operational: OperationalThresholds,
    pub ratio_limits: RatioLimits,
    /// Correlations with operating or weather variables weaker than this
    /// (in absolute value) are not reported.
    pub min_correlation: f64,
    /// Rows per window when comparing consecutive window means.
    pub trend_window: usize,
    /// Mean window-to-window change above which a ratio is trending.
    pub trend_threshold: f64,
}

impl Default for DescriptiveConfig {
    fn default() -> Self {
        Self {
            reliability: ReliabilityLevels::default(),
            operational: OperationalThresholds::default(),
            ratio_limits: RatioLimits::default(),
            min_correlation: 0.3,
            trend_window: 5,
            trend_threshold: 0.05,
        }
    }
}

impl DescriptiveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trend_window == 0 {
            return Err(Error::InvalidConfig("descriptive.trend_window must be > 0".into()));
        }
        if self.reliability.medium > self.reliability.high {
            return Err(Error::InvalidConfig(
                "descriptive.reliability.medium must not exceed high".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Realtime scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub feature: String,
    pub weight: f64,
}

impl FeatureWeight {
    fn new(feature: &str, weight: f64) -> Self {
        Self { feature: feature.to_string(), weight }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub width: u32,
    pub height: u32,
    /// Passive budget; exceeding it only logs a warning.
    pub processing_time_limit_secs: f64,
    pub weights: Vec<FeatureWeight>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            processing_time_limit_secs: 5.0,
            weights: vec![
                FeatureWeight::new(columns::GRADIENT_MAX, 0.25),
                FeatureWeight::new(columns::INTERFACE_CONFIDENCE, 0.30),
                FeatureWeight::new(columns::EMULSION_RATIO, 0.20),
                FeatureWeight::new(columns::WATER_RATIO, 0.15),
                FeatureWeight::new(columns::CRUDE_RATIO, 0.10),
            ],
        }
    }
}

impl RealtimeConfig {
    /// `base` extractor settings moved to the realtime resolution.
    pub fn extractor(&self, base: &ExtractorConfig) -> ExtractorConfig {
        ExtractorConfig {
            width: self.width,
            height: self.height,
            ..base.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackingConfig {
    #[default]
    Noop,
    JsonLines { path: PathBuf },
}
