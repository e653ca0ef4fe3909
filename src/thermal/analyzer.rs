use std::path::Path;

use image::DynamicImage;

use crate::config::{DetectorConfig, ExtractorConfig};

use super::detector::InterfaceDetector;
use super::features::{FeatureRecord, FeatureStatus};
use super::profile::{ProfileExtractor, ThermalProfile};

/// Image → feature record, end to end.
///
/// Never fails: every problem is reported through [`FeatureRecord::status`].
#[derive(Debug, Clone)]
pub struct ThermalAnalyzer {
    extractor: ProfileExtractor,
    detector: InterfaceDetector,
}

impl ThermalAnalyzer {
    pub fn new(extractor: ExtractorConfig, detector: DetectorConfig) -> Self {
        Self {
            extractor: ProfileExtractor::new(extractor),
            detector: InterfaceDetector::new(detector),
        }
    }

    pub fn extractor(&self) -> &ProfileExtractor {
        &self.extractor
    }

    pub fn detector(&self) -> &InterfaceDetector {
        &self.detector
    }

    /// Process an image file.
    pub fn process_path(&self, path: &Path) -> FeatureRecord {
        if !path.exists() {
            log::warn!("Image not found: {}", path.display());
            return FeatureRecord::failure(FeatureStatus::NotFound);
        }
        match self.extractor.extract_path(path) {
            Ok(profile) => self.process_profile(&profile),
            Err(e) => {
                log::warn!("Error processing {}: {e}", path.display());
                FeatureRecord::failure(FeatureStatus::ProcessingError)
            }
        }
    }

    /// Process an already decoded image.
    pub fn process_image(&self, img: &DynamicImage) -> FeatureRecord {
        match self.extractor.extract(img) {
            Ok(profile) => self.process_profile(&profile),
            Err(e) => {
                log::warn!("Error processing in-memory image: {e}");
                FeatureRecord::failure(FeatureStatus::ProcessingError)
            }
        }
    }

    /// Detect interfaces on a profile and build its features.
    pub fn process_profile(&self, profile: &ThermalProfile) -> FeatureRecord {
        match self.detector.detect(profile) {
            Ok(candidate) => {
                let gradient = profile.gradient();
                let record = FeatureRecord::build(
                    profile,
                    &gradient,
                    &candidate,
                    self.detector.config().confidence_scale,
                );
                log::debug!(
                    "Interfaces at rows {} / {} (score {:.1}, confidence {:.2})",
                    record.interface_top_px,
                    record.interface_bottom_px,
                    candidate.score,
                    record.interface_confidence
                );
                record
            }
            Err(status) => {
                log::debug!("Detection failed: {status}");
                FeatureRecord::failure(status)
            }
        }
    }
}

impl Default for ThermalAnalyzer {
    fn default() -> Self {
        Self::new(ExtractorConfig::default(), DetectorConfig::default())
    }
}
