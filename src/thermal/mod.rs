/// Thermal image analysis: brightness profile, interface detection, features.
///
/// ```text
///   image file
///        │
///        ▼
///   ┌──────────┐
///   │ profile   │  luma → resize → blur → background cut → normalise → row means → smooth
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ detector  │  gradient → peaks → best (top, bottom) pair under layer priors
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ features  │  thicknesses, ratios, band temperatures, gradient stats
///   └──────────┘
/// ```

pub mod analyzer;
pub mod detector;
pub mod features;
pub mod peaks;
pub mod profile;

pub use analyzer::ThermalAnalyzer;
pub use detector::{InterfaceCandidate, InterfaceDetector};
pub use features::{FEATURE_COLUMNS, FeatureRecord, FeatureStatus};
pub use profile::{ProfileExtractor, ThermalProfile};
