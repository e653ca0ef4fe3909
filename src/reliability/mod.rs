/// Offline reliability validation over historical feature records.
///
/// ```text
///   Dataset (features + operating signals)
///        │
///        ▼
///   ┌─────────────┐
///   │ variability  │  rolling sigma → sigma_combined → estable / turbulento
///   └─────────────┘
///        │
///        ▼
///   ┌─────────────┐
///   │  analysis    │  correlation · ANOVA · comparative report
///   └─────────────┘
///
///   Dataset (features + operating / weather signals)
///        │
///        ▼
///   ┌─────────────┐
///   │ descriptive  │  derived metrics · condition correlations · trends
///   └─────────────┘  · per-day and per-state aggregates
/// ```

pub mod analysis;
pub mod descriptive;
pub mod stats;
pub mod variability;

pub use analysis::{
    AnovaEntry, CorrelationEntry, GroupStats, HypothesisTest, ReliabilityAnalyzer,
    ReliabilityResult, ReportRow,
};
pub use descriptive::{
    ConditionCorrelation, DescriptiveAnalyzer, DescriptiveResult, OperationalState,
    ReliabilityLevel, Trend, TrendDirection, TrendMagnitude,
};
