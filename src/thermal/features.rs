use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::columns;
use crate::data::model::{CellValue, Row};

use super::detector::InterfaceCandidate;
use super::profile::ThermalProfile;

// ---------------------------------------------------------------------------
// FeatureStatus
// ---------------------------------------------------------------------------

/// Outcome tag of a feature extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Success,
    /// Image file missing.
    NotFound,
    /// Fewer than two gradient peaks.
    NoInterfacesDetected,
    /// Decoding or any other failure during extraction.
    ProcessingError,
    /// No image associated with the dataset row.
    NoImage,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureStatus::Success => "success",
            FeatureStatus::NotFound => "not_found",
            FeatureStatus::NoInterfacesDetected => "no_interfaces_detected",
            FeatureStatus::ProcessingError => "processing_error",
            FeatureStatus::NoImage => "no_image",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FeatureStatus::Success)
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "success" => FeatureStatus::Success,
            "not_found" => FeatureStatus::NotFound,
            "no_interfaces_detected" => FeatureStatus::NoInterfacesDetected,
            "processing_error" => FeatureStatus::ProcessingError,
            "no_image" => FeatureStatus::NoImage,
            other => return Err(format!("unknown status '{other}'")),
        })
    }
}

// ---------------------------------------------------------------------------
// FeatureRecord
// ---------------------------------------------------------------------------

/// Thermal features of one image.
///
/// Failed extractions keep the same shape with every numeric field zeroed,
/// so the distinction must be read from `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub status: FeatureStatus,
    #[serde(rename = "thermal_interface_top_px")]
    pub interface_top_px: usize,
    #[serde(rename = "thermal_interface_bottom_px")]
    pub interface_bottom_px: usize,
    #[serde(rename = "thermal_interface_confidence")]
    pub interface_confidence: f64,
    #[serde(rename = "thermal_crudo_px")]
    pub crude_px: usize,
    #[serde(rename = "thermal_emulsion_px")]
    pub emulsion_px: usize,
    #[serde(rename = "thermal_agua_px")]
    pub water_px: usize,
    #[serde(rename = "thermal_crudo_ratio")]
    pub crude_ratio: f64,
    #[serde(rename = "thermal_emulsion_ratio")]
    pub emulsion_ratio: f64,
    #[serde(rename = "thermal_agua_ratio")]
    pub water_ratio: f64,
    #[serde(rename = "thermal_temp_crudo_mean")]
    pub temp_crude_mean: f64,
    #[serde(rename = "thermal_temp_emulsion_mean")]
    pub temp_emulsion_mean: f64,
    #[serde(rename = "thermal_temp_agua_mean")]
    pub temp_water_mean: f64,
    #[serde(rename = "thermal_gradient_max")]
    pub gradient_max: f64,
    #[serde(rename = "thermal_gradient_std")]
    pub gradient_std: f64,
}

/// Column order of a feature record in tabular output.
pub const FEATURE_COLUMNS: [&str; 15] = [
    columns::STATUS,
    columns::INTERFACE_TOP,
    columns::INTERFACE_BOTTOM,
    columns::INTERFACE_CONFIDENCE,
    columns::CRUDE_PX,
    columns::EMULSION_PX,
    columns::WATER_PX,
    columns::CRUDE_RATIO,
    columns::EMULSION_RATIO,
    columns::WATER_RATIO,
    columns::TEMP_CRUDE,
    columns::TEMP_EMULSION,
    columns::TEMP_WATER,
    columns::GRADIENT_MAX,
    columns::GRADIENT_STD,
];

impl FeatureRecord {
    /// Fixed-shape record for a failed extraction.
    pub fn failure(status: FeatureStatus) -> Self {
        Self {
            status,
            interface_top_px: 0,
            interface_bottom_px: 0,
            interface_confidence: 0.0,
            crude_px: 0,
            emulsion_px: 0,
            water_px: 0,
            crude_ratio: 0.0,
            emulsion_ratio: 0.0,
            water_ratio: 0.0,
            temp_crude_mean: 0.0,
            temp_emulsion_mean: 0.0,
            temp_water_mean: 0.0,
            gradient_max: 0.0,
            gradient_std: 0.0,
        }
    }

    /// Assemble the features of a successful detection.
    pub fn build(
        profile: &ThermalProfile,
        gradient: &[f64],
        candidate: &InterfaceCandidate,
        confidence_scale: f64,
    ) -> Self {
        let height = profile.height();
        let top = candidate.top.min(height);
        let bottom = candidate.bottom.clamp(top, height);

        let crude_px = top;
        let emulsion_px = bottom - top;
        let water_px = height - bottom;
        let ratio = |px: usize| if height == 0 { 0.0 } else { px as f64 / height as f64 };

        let gradient_max = gradient.iter().fold(0.0f64, |m, g| m.max(g.abs()));
        let gradient_std = {
            let n = gradient.len().max(1) as f64;
            let mean = gradient.iter().sum::<f64>() / n;
            (gradient.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n).sqrt()
        };

        Self {
            status: FeatureStatus::Success,
            interface_top_px: top,
            interface_bottom_px: bottom,
            interface_confidence: candidate.confidence(confidence_scale),
            crude_px,
            emulsion_px,
            water_px,
            crude_ratio: ratio(crude_px),
            emulsion_ratio: ratio(emulsion_px),
            water_ratio: ratio(water_px),
            temp_crude_mean: profile.band_mean(0, top),
            temp_emulsion_mean: profile.band_mean(top, bottom),
            temp_water_mean: profile.band_mean(bottom, height),
            gradient_max,
            gradient_std,
        }
    }

    /// Look a numeric feature up by its column name. NaN reads as missing.
    pub fn get(&self, name: &str) -> Option<f64> {
        let v = match name {
            columns::INTERFACE_TOP => self.interface_top_px as f64,
            columns::INTERFACE_BOTTOM => self.interface_bottom_px as f64,
            columns::INTERFACE_CONFIDENCE => self.interface_confidence,
            columns::CRUDE_PX => self.crude_px as f64,
            columns::EMULSION_PX => self.emulsion_px as f64,
            columns::WATER_PX => self.water_px as f64,
            columns::CRUDE_RATIO => self.crude_ratio,
            columns::EMULSION_RATIO => self.emulsion_ratio,
            columns::WATER_RATIO => self.water_ratio,
            columns::TEMP_CRUDE => self.temp_crude_mean,
            columns::TEMP_EMULSION => self.temp_emulsion_mean,
            columns::TEMP_WATER => self.temp_water_mean,
            columns::GRADIENT_MAX => self.gradient_max,
            columns::GRADIENT_STD => self.gradient_std,
            _ => return None,
        };
        (!v.is_nan()).then_some(v)
    }

    /// Flatten into a dataset row keyed by [`FEATURE_COLUMNS`].
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(columns::STATUS.to_string(), self.status.as_str().into());
        for &col in &FEATURE_COLUMNS[1..] {
            let cell = match col {
                columns::INTERFACE_TOP
                | columns::INTERFACE_BOTTOM
                | columns::CRUDE_PX
                | columns::EMULSION_PX
                | columns::WATER_PX => self
                    .get(col)
                    .map_or(CellValue::Null, |v| CellValue::Integer(v as i64)),
                _ => CellValue::from(self.get(col)),
            };
            row.insert(col.to_string(), cell);
        }
        row
    }
}
