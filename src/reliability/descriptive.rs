//! Descriptive analysis of processed thermal records: derived operating
//! metrics, correlations with operating and weather conditions, ratio trends
//! and per-day / per-state aggregates.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::json;

use crate::config::{DescriptiveConfig, OperationalThresholds, ReliabilityLevels};
use crate::data::columns;
use crate::data::filter::{filtered_indices, success_filter};
use crate::data::loader;
use crate::data::model::{CellValue, Dataset, Row};
use crate::tracking::{NoopTracker, Tracker};

use super::analysis::{CORRELATION_ALPHA, MIN_CORRELATION_PAIRS, table};
use super::stats;

/// Successful rows needed before trends are looked for.
pub const MIN_TREND_ROWS: usize = 3;

/// Ratio columns checked for a sustained rise or fall.
pub const TREND_FEATURES: [&str; 2] = [columns::EMULSION_RATIO, columns::WATER_RATIO];

/// Thermal features correlated against operating and weather variables.
pub const CONDITION_FEATURES: [&str; 4] = [
    columns::EMULSION_RATIO,
    columns::WATER_RATIO,
    columns::CRUDE_RATIO,
    columns::INTERFACE_CONFIDENCE,
];

/// Operating variables followed by weather variables.
pub const CONDITION_VARIABLES: [&str; 8] = [
    columns::LEVEL,
    columns::FLOW,
    columns::TANK_TEMP,
    columns::DELTA_T,
    columns::WIND_SPEED,
    columns::SOLAR_RADIATION,
    columns::RELATIVE_HUMIDITY,
    columns::AMBIENT_TEMP,
];

const LAYER_RATIO_COLUMNS: [&str; 3] =
    [columns::CRUDE_RATIO, columns::EMULSION_RATIO, columns::WATER_RATIO];

/// Columns summarised by their mean only in both aggregate tables.
const MEAN_ONLY_COLUMNS: [&str; 4] = [
    columns::INTERFACE_CONFIDENCE,
    columns::DELTA_T,
    columns::LEVEL,
    columns::FLOW,
];

/// Aggregate tables are rounded to this many decimals.
const TABLE_DECIMALS: i32 = 3;

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Reliability level of one detection, from its interface confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReliabilityLevel {
    #[serde(rename = "alta")]
    High,
    #[serde(rename = "media")]
    Medium,
    #[serde(rename = "baja")]
    Low,
    #[serde(rename = "desconocida")]
    Unknown,
}

impl ReliabilityLevel {
    pub fn from_confidence(confidence: Option<f64>, levels: &ReliabilityLevels) -> Self {
        match confidence {
            None => Self::Unknown,
            Some(c) if c >= levels.high => Self::High,
            Some(c) if c >= levels.medium => Self::Medium,
            Some(_) => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "alta",
            Self::Medium => "media",
            Self::Low => "baja",
            Self::Unknown => "desconocida",
        }
    }
}

/// What the tank is doing, from its level and flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationalState {
    #[serde(rename = "LLENADO")]
    Filling,
    #[serde(rename = "VACIADO")]
    Draining,
    #[serde(rename = "DECANTACION")]
    Settling,
    #[serde(rename = "TRANSICION")]
    Transition,
    #[serde(rename = "desconocido")]
    Unknown,
}

impl OperationalState {
    /// Rules are checked in order: filling, draining, settling. Anything
    /// else with both readings present is a transition.
    pub fn from_readings(
        level: Option<f64>,
        flow: Option<f64>,
        thresholds: &OperationalThresholds,
    ) -> Self {
        let (Some(level), Some(flow)) = (level, flow) else {
            return Self::Unknown;
        };
        let t = thresholds;
        if level >= t.filling_min_level && flow >= t.filling_min_flow {
            Self::Filling
        } else if level >= t.draining_min_level && flow <= t.draining_max_flow {
            Self::Draining
        } else if level >= t.settling_min_level
            && (t.settling_min_flow..=t.settling_max_flow).contains(&flow)
        {
            Self::Settling
        } else {
            Self::Transition
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filling => "LLENADO",
            Self::Draining => "VACIADO",
            Self::Settling => "DECANTACION",
            Self::Transition => "TRANSICION",
            Self::Unknown => "desconocido",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendDirection {
    #[serde(rename = "aumento")]
    Increase,
    #[serde(rename = "disminucion")]
    Decrease,
    #[serde(rename = "estable")]
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increase => "aumento",
            Self::Decrease => "disminucion",
            Self::Stable => "estable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendMagnitude {
    /// Mean change beyond twice the trend threshold.
    #[serde(rename = "alta")]
    High,
    #[serde(rename = "moderada")]
    Moderate,
}

impl TrendMagnitude {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "alta",
            Self::Moderate => "moderada",
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionCorrelation {
    pub feature: String,
    pub variable: String,
    pub correlation: f64,
    pub p_value: f64,
    /// `p_value < CORRELATION_ALPHA`.
    pub significant: bool,
    pub n_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub feature: String,
    pub direction: TrendDirection,
    /// Mean difference between each window mean and the one before it.
    pub mean_change: f64,
    /// Population std of those differences.
    pub std_change: f64,
    pub magnitude: TrendMagnitude,
    pub n_windows: usize,
}

#[derive(Debug, Clone)]
pub struct DescriptiveResult {
    /// Input rows plus the derived metric columns.
    pub dataset: Dataset,
    pub conditions: Vec<ConditionCorrelation>,
    pub trends: Vec<Trend>,
    /// One row per calendar date of successful records.
    pub by_day: Dataset,
    /// One row per operating state of successful records.
    pub by_state: Dataset,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 date or date-time cell. Numbers and free text are not
/// timestamps.
pub fn parse_timestamp(cell: &CellValue) -> Option<NaiveDateTime> {
    let text = cell.as_str()?.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|t| t.naive_local()))
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

pub struct DescriptiveAnalyzer {
    config: DescriptiveConfig,
    tracker: Arc<dyn Tracker>,
}

impl DescriptiveAnalyzer {
    pub fn new(config: DescriptiveConfig, tracker: Arc<dyn Tracker>) -> Self {
        log::info!(
            "DescriptiveAnalyzer: trend window={}, threshold={}",
            config.trend_window,
            config.trend_threshold
        );
        Self { config, tracker }
    }

    pub fn config(&self) -> &DescriptiveConfig {
        &self.config
    }

    /// Append the derived columns whose inputs are present:
    /// `fecha` / `hora` from `Día`, `delta_t_tank_ambient`,
    /// `fiabilidad_termica` / `fiabilidad_categoria`, `estado_operacional`
    /// and one `<layer>_fuera_rango` flag per layer ratio.
    pub fn derive_metrics(&self, dataset: &Dataset) -> Dataset {
        let mut out = dataset.clone();

        if dataset.has_column(columns::DAY) {
            let stamps: Vec<Option<NaiveDateTime>> = (0..dataset.len())
                .map(|i| parse_timestamp(dataset.get(i, columns::DAY)))
                .collect();
            out.set_column(
                columns::DATE,
                stamps.iter().map(|t| {
                    t.map_or(CellValue::Null, |t| {
                        CellValue::Date(t.date().format("%Y-%m-%d").to_string())
                    })
                }),
            );
            out.set_column(
                columns::HOUR,
                stamps
                    .iter()
                    .map(|t| t.map_or(CellValue::Null, |t| CellValue::Integer(i64::from(t.hour())))),
            );
        }

        if dataset.has_column(columns::TANK_TEMP) && dataset.has_column(columns::AMBIENT_TEMP) {
            let delta: Vec<Option<f64>> = dataset
                .column_f64(columns::TANK_TEMP)
                .into_iter()
                .zip(dataset.column_f64(columns::AMBIENT_TEMP))
                .map(|(tank, ambient)| Some(tank? - ambient?))
                .collect();
            out.set_column(columns::DELTA_T, delta);
        }

        if dataset.has_column(columns::INTERFACE_CONFIDENCE) {
            let confidence = dataset.column_f64(columns::INTERFACE_CONFIDENCE);
            let levels = &self.config.reliability;
            out.set_column(
                columns::RELIABILITY_LEVEL,
                confidence
                    .iter()
                    .map(|&c| ReliabilityLevel::from_confidence(c, levels).as_str()),
            );
            out.set_column(columns::THERMAL_RELIABILITY, confidence);
        }

        if dataset.has_column(columns::LEVEL) && dataset.has_column(columns::FLOW) {
            let thresholds = &self.config.operational;
            out.set_column(
                columns::OPERATIONAL_STATE,
                dataset
                    .column_f64(columns::LEVEL)
                    .into_iter()
                    .zip(dataset.column_f64(columns::FLOW))
                    .map(|(level, flow)| {
                        OperationalState::from_readings(level, flow, thresholds).as_str()
                    }),
            );
        }

        let limits = &self.config.ratio_limits;
        let ranges = [limits.crude, limits.emulsion, limits.water];
        for ((layer, column), range) in columns::LAYER_RATIOS.iter().zip(ranges) {
            if !dataset.has_column(column) {
                continue;
            }
            let flags: Vec<CellValue> = dataset
                .column_f64(column)
                .into_iter()
                .map(|v| {
                    let outside = v.is_some_and(|v| v < range.min || v > range.max);
                    CellValue::Integer(i64::from(outside))
                })
                .collect();
            out.set_column(&columns::out_of_range_of(layer), flags);
        }

        out
    }

    /// Pearson correlation of each thermal feature with each operating or
    /// weather variable over successful rows. Coefficients weaker than
    /// `min_correlation` are dropped.
    pub fn correlate_conditions(&self, dataset: &Dataset) -> Vec<ConditionCorrelation> {
        let valid = dataset.select(&filtered_indices(dataset, &success_filter()));
        if valid.is_empty() {
            log::warn!("No successful records to correlate");
            return Vec::new();
        }

        let mut out = Vec::new();
        for feature in CONDITION_FEATURES {
            if !valid.has_column(feature) {
                continue;
            }
            let x_all = valid.column_f64(feature);
            for variable in CONDITION_VARIABLES {
                if !valid.has_column(variable) {
                    continue;
                }
                let (x, y): (Vec<f64>, Vec<f64>) = x_all
                    .iter()
                    .zip(valid.column_f64(variable))
                    .filter_map(|(x, y)| Some(((*x)?, y?)))
                    .unzip();
                if x.len() < MIN_CORRELATION_PAIRS {
                    continue;
                }
                let Some(c) = stats::pearson(&x, &y) else {
                    continue;
                };
                if c.coefficient.abs() < self.config.min_correlation {
                    continue;
                }
                out.push(ConditionCorrelation {
                    feature: feature.to_string(),
                    variable: variable.to_string(),
                    correlation: c.coefficient,
                    p_value: c.p_value,
                    significant: c.p_value < CORRELATION_ALPHA,
                    n_samples: c.n,
                });
            }
        }
        log::info!("{} condition correlations above |r| = {}", out.len(), self.config.min_correlation);
        out
    }

    /// Compare the mean of each `trend_window` rows with the window one row
    /// earlier, over successful rows in `Día` order. Windows with a missing
    /// value are skipped.
    pub fn detect_trends(&self, dataset: &Dataset) -> Vec<Trend> {
        let mut valid = dataset.select(&filtered_indices(dataset, &success_filter()));
        if valid.len() < MIN_TREND_ROWS {
            log::warn!("Only {} successful records, skipping trends", valid.len());
            return Vec::new();
        }
        if valid.has_column(columns::DAY) {
            valid.sort_by_column(columns::DAY);
        }

        let window = self.config.trend_window;
        let threshold = self.config.trend_threshold;
        let mut out = Vec::new();
        for feature in TREND_FEATURES {
            if !valid.has_column(feature) {
                continue;
            }
            let values = valid.column_f64(feature);
            let changes: Vec<f64> = (window..values.len())
                .filter_map(|i| {
                    let previous: Vec<f64> = values[i - window..i].iter().copied().collect::<Option<_>>()?;
                    let current: Vec<f64> =
                        values[i + 1 - window..=i].iter().copied().collect::<Option<_>>()?;
                    Some(stats::mean(&current)? - stats::mean(&previous)?)
                })
                .collect();
            let (Some(mean_change), Some(std_change)) =
                (stats::mean(&changes), stats::population_std(&changes))
            else {
                continue;
            };

            let direction = if mean_change > threshold {
                TrendDirection::Increase
            } else if mean_change < -threshold {
                TrendDirection::Decrease
            } else {
                TrendDirection::Stable
            };
            let magnitude = if mean_change.abs() > 2.0 * threshold {
                TrendMagnitude::High
            } else {
                TrendMagnitude::Moderate
            };
            log::info!("{feature}: {} ({})", direction.as_str(), magnitude.as_str());
            out.push(Trend {
                feature: feature.to_string(),
                direction,
                mean_change,
                std_change,
                magnitude,
                n_windows: changes.len(),
            });
        }
        out
    }

    /// Per-date mean / std / min / max of the layer ratios and means of the
    /// operating columns. Expects the `fecha` column of [`derive_metrics`].
    ///
    /// [`derive_metrics`]: DescriptiveAnalyzer::derive_metrics
    pub fn aggregate_by_day(&self, dataset: &Dataset) -> Dataset {
        let spread = [Statistic::Mean, Statistic::Std, Statistic::Min, Statistic::Max];
        aggregate(dataset, columns::DATE, &spread)
    }

    /// Per-state mean / std / count of the layer ratios and means of the
    /// operating columns. Expects the `estado_operacional` column.
    pub fn aggregate_by_state(&self, dataset: &Dataset) -> Dataset {
        let spread = [Statistic::Mean, Statistic::Std, Statistic::Count];
        aggregate(dataset, columns::OPERATIONAL_STATE, &spread)
    }

    pub fn analyze(&self, dataset: &Dataset) -> DescriptiveResult {
        log::info!("Starting descriptive analysis on {} rows", dataset.len());
        let mut params = serde_json::Map::new();
        params.insert("trend_window".into(), json!(self.config.trend_window));
        params.insert("trend_threshold".into(), json!(self.config.trend_threshold));
        params.insert("min_correlation".into(), json!(self.config.min_correlation));
        self.tracker.log_params("descriptive", params);

        let dataset = self.derive_metrics(dataset);
        let conditions = self.correlate_conditions(&dataset);
        let trends = self.detect_trends(&dataset);
        let by_day = self.aggregate_by_day(&dataset);
        let by_state = self.aggregate_by_state(&dataset);

        self.tracker.log_metrics(
            "descriptive",
            &[
                ("n_rows", dataset.len() as f64),
                ("n_valid", filtered_indices(&dataset, &success_filter()).len() as f64),
                ("n_correlations", conditions.len() as f64),
                ("n_trends", trends.len() as f64),
                ("n_days", by_day.len() as f64),
                ("n_states", by_state.len() as f64),
            ],
        );
        log::info!("Descriptive analysis complete");

        DescriptiveResult {
            dataset,
            conditions,
            trends,
            by_day,
            by_state,
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }
}

impl Default for DescriptiveAnalyzer {
    fn default() -> Self {
        Self::new(DescriptiveConfig::default(), Arc::new(NoopTracker))
    }
}

// ---------------------------------------------------------------------------
// Grouped aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Statistic {
    Mean,
    Std,
    Min,
    Max,
    Count,
}

impl Statistic {
    fn suffix(self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Std => "std",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Count => "count",
        }
    }

    fn apply(self, values: &[f64]) -> CellValue {
        let value = match self {
            Statistic::Mean => stats::mean(values),
            Statistic::Std => stats::sample_std(values),
            Statistic::Min => values.iter().copied().reduce(f64::min),
            Statistic::Max => values.iter().copied().reduce(f64::max),
            Statistic::Count => return values.len().into(),
        };
        value.map(round_table).into()
    }
}

fn round_table(value: f64) -> f64 {
    let scale = 10f64.powi(TABLE_DECIMALS);
    (value * scale).round() / scale
}

/// Group successful rows by `key` (sorted, nulls dropped) and summarise each
/// present layer ratio with `spread` and each operating column by its mean.
fn aggregate(dataset: &Dataset, key: &str, spread: &[Statistic]) -> Dataset {
    let valid = dataset.select(&filtered_indices(dataset, &success_filter()));
    if !valid.has_column(key) {
        log::warn!("No {key} column, skipping aggregates");
        return Dataset::default();
    }

    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, k) in valid.column_str(key).into_iter().enumerate() {
        if let Some(k) = k {
            groups.entry(k).or_default().push(i);
        }
    }

    let mean_only = [Statistic::Mean];
    let specs: Vec<(&str, &[Statistic])> = LAYER_RATIO_COLUMNS
        .iter()
        .map(|&c| (c, spread))
        .chain(MEAN_ONLY_COLUMNS.iter().map(|&c| (c, &mean_only[..])))
        .filter(|(c, _)| valid.has_column(c))
        .collect();

    let mut headers = vec![key.to_string()];
    for (column, statistics) in &specs {
        headers.extend(statistics.iter().map(|s| format!("{column}_{}", s.suffix())));
    }

    let rows = groups
        .values()
        .map(|indices| {
            let mut row = Row::new();
            row.insert(key.to_string(), valid.get(indices[0], key).clone());
            for (column, statistics) in &specs {
                let values: Vec<f64> = indices
                    .iter()
                    .filter_map(|&i| valid.get(i, column).as_f64())
                    .collect();
                for s in statistics.iter() {
                    row.insert(format!("{column}_{}", s.suffix()), s.apply(&values));
                }
            }
            row
        })
        .collect();
    log::info!("{} groups by {key}", groups.len());
    Dataset::with_columns(headers, rows)
}

// ---------------------------------------------------------------------------
// Tabular export
// ---------------------------------------------------------------------------

impl DescriptiveResult {
    pub fn condition_table(&self) -> Dataset {
        table(
            &["feature", "variable", "correlation", "p_value", "significant", "n_samples"],
            self.conditions
                .iter()
                .map(|c| {
                    vec![
                        c.feature.as_str().into(),
                        c.variable.as_str().into(),
                        c.correlation.into(),
                        c.p_value.into(),
                        c.significant.into(),
                        c.n_samples.into(),
                    ]
                })
                .collect(),
        )
    }

    pub fn trend_table(&self) -> Dataset {
        table(
            &["feature", "direction", "mean_change", "std_change", "magnitude", "n_windows"],
            self.trends
                .iter()
                .map(|t| {
                    vec![
                        t.feature.as_str().into(),
                        t.direction.as_str().into(),
                        t.mean_change.into(),
                        t.std_change.into(),
                        t.magnitude.as_str().into(),
                        t.n_windows.into(),
                    ]
                })
                .collect(),
        )
    }

    /// Count of successful rows per reliability level.
    pub fn reliability_levels(&self) -> BTreeMap<String, usize> {
        let valid = filtered_indices(&self.dataset, &success_filter());
        let mut counts = BTreeMap::new();
        for i in valid {
            if let Some(level) = self.dataset.get(i, columns::RELIABILITY_LEVEL).as_str() {
                *counts.entry(level.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn write_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        loader::save_file(&self.dataset, &dir.join("dataset_descriptive.csv"))?;
        loader::save_file(&self.condition_table(), &dir.join("condition_correlations.csv"))?;
        loader::save_file(&self.trend_table(), &dir.join("trends.csv"))?;
        loader::save_file(&self.by_day, &dir.join("metrics_by_day.csv"))?;
        loader::save_file(&self.by_state, &dir.join("metrics_by_state.csv"))?;

        let valid = self.dataset.select(&filtered_indices(&self.dataset, &success_filter()));
        let reliability: Vec<f64> = valid
            .column_f64(columns::THERMAL_RELIABILITY)
            .into_iter()
            .flatten()
            .collect();
        let summary = json!({
            "n_rows": self.dataset.len(),
            "n_valid": valid.len(),
            "mean_reliability": stats::mean(&reliability),
            "std_reliability": stats::sample_std(&reliability),
            "reliability_levels": self.reliability_levels(),
            "trends": self.trends,
            "timestamp": self.timestamp,
        });
        let text = serde_json::to_string_pretty(&summary).context("serializing summary")?;
        std::fs::write(dir.join("summary.json"), text).context("writing summary.json")?;
        log::info!("Descriptive artifacts written to {}", dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(pairs: &[(&str, CellValue)]) -> Row {
        let mut r: Row = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        r.entry(columns::STATUS.into())
            .or_insert_with(|| columns::STATUS_SUCCESS.into());
        r
    }

    #[test]
    fn test_reliability_level_cutoffs() {
        let levels = ReliabilityLevels::default();
        let level = |c| ReliabilityLevel::from_confidence(c, &levels);
        assert_eq!(level(None), ReliabilityLevel::Unknown);
        assert_eq!(level(Some(0.7)), ReliabilityLevel::High);
        assert_eq!(level(Some(0.69)), ReliabilityLevel::Medium);
        assert_eq!(level(Some(0.4)), ReliabilityLevel::Medium);
        assert_eq!(level(Some(0.39)), ReliabilityLevel::Low);
    }

    #[test]
    fn test_operational_state_rules() {
        let t = OperationalThresholds::default();
        let state = |l, f| OperationalState::from_readings(l, f, &t);
        assert_eq!(state(Some(30.0), Some(150.0)), OperationalState::Filling);
        assert_eq!(state(Some(30.0), Some(-150.0)), OperationalState::Draining);
        assert_eq!(state(Some(60.0), Some(10.0)), OperationalState::Settling);
        assert_eq!(state(Some(60.0), Some(-50.0)), OperationalState::Settling);
        assert_eq!(state(Some(60.0), Some(80.0)), OperationalState::Transition);
        assert_eq!(state(Some(30.0), Some(10.0)), OperationalState::Transition);
        // Filling wins over settling when both would match.
        assert_eq!(state(Some(90.0), Some(100.0)), OperationalState::Filling);
        assert_eq!(state(None, Some(10.0)), OperationalState::Unknown);
    }

    #[test]
    fn test_derive_metrics_adds_columns() {
        let ds = Dataset::from_rows(vec![
            record(&[
                (columns::DAY, "2024-01-05 08:15:00".into()),
                (columns::TANK_TEMP, 45.0.into()),
                (columns::AMBIENT_TEMP, 12.5.into()),
                (columns::INTERFACE_CONFIDENCE, 0.75.into()),
                (columns::LEVEL, 30.0.into()),
                (columns::FLOW, 150.0.into()),
                (columns::CRUDE_RATIO, 1.2.into()),
                (columns::EMULSION_RATIO, 0.5.into()),
                (columns::WATER_RATIO, (-0.1).into()),
            ]),
            record(&[
                (columns::DAY, CellValue::Date("2024-01-06".into())),
                (columns::TANK_TEMP, 40.0.into()),
                (columns::FLOW, 0.0.into()),
                (columns::CRUDE_RATIO, 0.3.into()),
            ]),
        ]);
        let out = DescriptiveAnalyzer::default().derive_metrics(&ds);

        assert_eq!(out.len(), 2);
        assert_eq!(out.column_f64(columns::DELTA_T), vec![Some(32.5), None]);
        assert_eq!(out.column_str(columns::DATE), vec![Some("2024-01-05"), Some("2024-01-06")]);
        assert_eq!(out.column_f64(columns::HOUR), vec![Some(8.0), Some(0.0)]);
        assert_eq!(out.column_str(columns::RELIABILITY_LEVEL), vec![Some("alta"), Some("desconocida")]);
        assert_eq!(out.column_f64(columns::THERMAL_RELIABILITY), vec![Some(0.75), None]);
        assert_eq!(
            out.column_str(columns::OPERATIONAL_STATE),
            vec![Some("LLENADO"), Some("desconocido")]
        );
        assert_eq!(out.column_f64("crudo_fuera_rango"), vec![Some(1.0), Some(0.0)]);
        assert_eq!(out.column_f64("emulsion_fuera_rango"), vec![Some(0.0), Some(0.0)]);
        assert_eq!(out.column_f64("agua_fuera_rango"), vec![Some(1.0), Some(0.0)]);
    }

    #[test]
    fn test_derive_metrics_skips_missing_inputs() {
        let ds = Dataset::from_rows(vec![record(&[
            (columns::DAY, CellValue::Integer(3)),
            (columns::TANK_TEMP, 45.0.into()),
        ])]);
        let out = DescriptiveAnalyzer::default().derive_metrics(&ds);
        assert!(!out.has_column(columns::DELTA_T));
        assert!(!out.has_column(columns::OPERATIONAL_STATE));
        assert!(!out.has_column("agua_fuera_rango"));
        // Day indices are not calendar dates.
        assert!(out.get(0, columns::DATE).is_null());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let t = |s: &str| parse_timestamp(&CellValue::from(s));
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5)
            .and_then(|d| d.and_hms_opt(8, 15, 0));
        assert_eq!(t("2024-01-05T08:15:00"), expected);
        assert_eq!(t("2024-01-05 08:15"), expected);
        assert_eq!(t("2024-01-05T08:15:00+00:00"), expected);
        assert_eq!(t("2024-01-05").map(|d| d.hour()), Some(0));
        assert_eq!(t("ayer"), None);
        assert_eq!(parse_timestamp(&CellValue::Integer(5)), None);
    }

    fn trend_rows() -> Dataset {
        let mut rows: Vec<Row> = (0..8)
            .map(|i| {
                record(&[
                    (columns::DAY, format!("2024-01-{:02}", i + 1).into()),
                    (columns::WATER_RATIO, (0.15 * i as f64).into()),
                    (columns::EMULSION_RATIO, (1.0 - 0.08 * i as f64).into()),
                ])
            })
            .collect();
        rows.reverse();
        rows.push(record(&[
            (columns::STATUS, "processing_error".into()),
            (columns::DAY, "2024-01-04".into()),
            (columns::WATER_RATIO, 9.0.into()),
            (columns::EMULSION_RATIO, 9.0.into()),
        ]));
        Dataset::from_rows(rows)
    }

    #[test]
    fn test_trends_follow_day_order() {
        let trends = DescriptiveAnalyzer::default().detect_trends(&trend_rows());
        assert_eq!(trends.len(), 2);

        let emulsion = &trends[0];
        assert_eq!(emulsion.feature, columns::EMULSION_RATIO);
        assert_eq!(emulsion.direction, TrendDirection::Decrease);
        assert_eq!(emulsion.magnitude, TrendMagnitude::Moderate);
        assert_relative_eq!(emulsion.mean_change, -0.08, epsilon = 1e-9);

        let water = &trends[1];
        assert_eq!(water.direction, TrendDirection::Increase);
        assert_eq!(water.magnitude, TrendMagnitude::High);
        assert_relative_eq!(water.mean_change, 0.15, epsilon = 1e-9);
        assert!(water.std_change < 1e-9);
        assert_eq!(water.n_windows, 3);
    }

    #[test]
    fn test_trends_skip_windows_with_gaps() {
        let mut ds = trend_rows();
        ds.sort_by_column(columns::DAY);
        // Row 2 (2024-01-03) sits in every window of six successful rows.
        let keep: Vec<usize> = (0..ds.len())
            .filter(|&i| ds.get(i, columns::STATUS).as_str() == Some(columns::STATUS_SUCCESS))
            .take(6)
            .collect();
        let mut ds = ds.select(&keep);
        ds.rows[2].insert(columns::WATER_RATIO.into(), CellValue::Null);

        let trends = DescriptiveAnalyzer::default().detect_trends(&ds);
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].feature, columns::EMULSION_RATIO);
        assert_eq!(trends[0].n_windows, 1);
    }

    #[test]
    fn test_trends_need_three_rows() {
        let ds = trend_rows();
        let two = ds.select(&[0, 1]);
        assert!(DescriptiveAnalyzer::default().detect_trends(&two).is_empty());
    }

    fn aggregate_rows() -> Dataset {
        let analyzer = DescriptiveAnalyzer::default();
        analyzer.derive_metrics(&Dataset::from_rows(vec![
            record(&[
                (columns::DAY, "2024-01-01 06:00:00".into()),
                (columns::WATER_RATIO, 0.2.into()),
                (columns::INTERFACE_CONFIDENCE, 0.8.into()),
                (columns::LEVEL, 60.0.into()),
                (columns::FLOW, 10.0.into()),
            ]),
            record(&[
                (columns::DAY, "2024-01-01 18:00:00".into()),
                (columns::WATER_RATIO, 0.3.into()),
                (columns::INTERFACE_CONFIDENCE, 0.6.into()),
                (columns::LEVEL, 62.0.into()),
                (columns::FLOW, 20.0.into()),
            ]),
            record(&[
                (columns::DAY, "2024-01-02 06:00:00".into()),
                (columns::WATER_RATIO, 0.25.into()),
                (columns::INTERFACE_CONFIDENCE, 0.5.into()),
                (columns::LEVEL, 30.0.into()),
                (columns::FLOW, 150.0.into()),
            ]),
            record(&[
                (columns::STATUS, "not_found".into()),
                (columns::DAY, "2024-01-02 07:00:00".into()),
                (columns::WATER_RATIO, 0.9.into()),
                (columns::LEVEL, 30.0.into()),
                (columns::FLOW, 150.0.into()),
            ]),
        ]))
    }

    #[test]
    fn test_aggregate_by_day() {
        let by_day = DescriptiveAnalyzer::default().aggregate_by_day(&aggregate_rows());
        assert_eq!(by_day.len(), 2);
        assert_eq!(by_day.column_names[0], columns::DATE);
        assert!(!by_day.has_column("thermal_crudo_ratio_mean"));
        assert!(!by_day.has_column("delta_t_tank_ambient_mean"));

        assert_eq!(by_day.get(0, columns::DATE).as_str(), Some("2024-01-01"));
        assert_eq!(by_day.get(0, "thermal_agua_ratio_mean").as_f64(), Some(0.25));
        assert_eq!(by_day.get(0, "thermal_agua_ratio_std").as_f64(), Some(0.071));
        assert_eq!(by_day.get(0, "thermal_agua_ratio_min").as_f64(), Some(0.2));
        assert_eq!(by_day.get(0, "thermal_agua_ratio_max").as_f64(), Some(0.3));
        assert_eq!(by_day.get(0, "Caudal_mean").as_f64(), Some(15.0));
        assert_relative_eq!(
            by_day.get(0, "thermal_interface_confidence_mean").as_f64().unwrap(),
            0.7,
            epsilon = 1e-9
        );

        // The failed 2024-01-02 row does not count.
        assert_eq!(by_day.get(1, "thermal_agua_ratio_mean").as_f64(), Some(0.25));
        assert!(by_day.get(1, "thermal_agua_ratio_std").is_null());
    }

    #[test]
    fn test_aggregate_by_state() {
        let by_state = DescriptiveAnalyzer::default().aggregate_by_state(&aggregate_rows());
        assert_eq!(
            by_state.column_str(columns::OPERATIONAL_STATE),
            vec![Some("DECANTACION"), Some("LLENADO")]
        );
        assert_eq!(
            by_state.column_f64("thermal_agua_ratio_count"),
            vec![Some(2.0), Some(1.0)]
        );
        assert_eq!(by_state.get(1, "Nivel TK %_mean").as_f64(), Some(30.0));
        assert!(!by_state.has_column("thermal_agua_ratio_min"));
    }

    #[test]
    fn test_aggregates_without_key_are_empty() {
        let ds = Dataset::from_rows(vec![record(&[(columns::WATER_RATIO, 0.2.into())])]);
        let analyzer = DescriptiveAnalyzer::default();
        assert!(analyzer.aggregate_by_day(&ds).is_empty());
        assert!(analyzer.aggregate_by_state(&ds).is_empty());
    }

    #[test]
    fn test_condition_correlation_threshold() {
        let confidence = [0.1, 0.2, 0.3, 0.4];
        let flow = [10.0, 21.0, 29.0, 41.0];
        let level = [1.0, -1.0, -1.0, 1.0];
        let rows = (0..4)
            .map(|i| {
                record(&[
                    (columns::INTERFACE_CONFIDENCE, confidence[i].into()),
                    (columns::FLOW, flow[i].into()),
                    (columns::LEVEL, level[i].into()),
                ])
            })
            .collect();
        let found = DescriptiveAnalyzer::default().correlate_conditions(&Dataset::from_rows(rows));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].feature, columns::INTERFACE_CONFIDENCE);
        assert_eq!(found[0].variable, columns::FLOW);
        assert_relative_eq!(found[0].correlation, 0.99736, epsilon = 1e-4);
        assert!(found[0].significant);
        assert_eq!(found[0].n_samples, 4);
    }

    #[test]
    fn test_analyze_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let result = DescriptiveAnalyzer::default().analyze(&aggregate_rows());
        assert_eq!(result.by_day.len(), 2);
        assert_eq!(result.by_state.len(), 2);
        let levels = result.reliability_levels();
        assert_eq!(levels.get("alta"), Some(&1));
        assert_eq!(levels.get("media"), Some(&2));

        result.write_to(dir.path()).unwrap();
        for name in [
            "dataset_descriptive.csv",
            "condition_correlations.csv",
            "trends.csv",
            "metrics_by_day.csv",
            "metrics_by_state.csv",
            "summary.json",
        ] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }
        let by_day = loader::load_file(&dir.path().join("metrics_by_day.csv")).unwrap();
        assert_eq!(by_day.len(), 2);
        assert_eq!(by_day.get(0, columns::DATE).as_str(), Some("2024-01-01"));
    }
}
