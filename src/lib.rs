//! Interface detection and reliability scoring for infrared images of a
//! stratified crude / emulsion / water tank.

pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod realtime;
pub mod reliability;
pub mod thermal;
pub mod tracking;

pub use config::Config;
pub use data::model::{CellValue, Dataset};
pub use error::{Error, Result};
pub use realtime::{Prediction, RealtimeScorer, ReferenceProfile, ReliabilityCategory};
pub use reliability::{DescriptiveAnalyzer, DescriptiveResult, ReliabilityAnalyzer, ReliabilityResult};
pub use thermal::{FeatureRecord, FeatureStatus, ThermalAnalyzer};
