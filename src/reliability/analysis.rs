use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::config::VariabilityConfig;
use crate::data::columns;
use crate::data::filter::{analysis_filter, filtered_indices};
use crate::data::loader;
use crate::data::model::{CellValue, Dataset, Row};
use crate::tracking::{NoopTracker, Tracker};

use super::{stats, variability};

/// Exploratory correlation significance level.
pub const CORRELATION_ALPHA: f64 = 0.05;
/// Confirmatory group-test significance level.
pub const HYPOTHESIS_ALPHA: f64 = 0.1;
/// Minimum paired observations for a correlation.
pub const MIN_CORRELATION_PAIRS: usize = 3;
/// Minimum observations per group for ANOVA.
pub const MIN_GROUP_SIZE: usize = 3;
/// Minimum valid rows before hypothesis validation is attempted.
pub const MIN_HYPOTHESIS_ROWS: usize = 10;

/// Thermal features correlated against every sigma column.
pub const CORRELATION_FEATURES: [&str; 5] = [
    columns::GRADIENT_MAX,
    columns::GRADIENT_STD,
    columns::INTERFACE_CONFIDENCE,
    columns::EMULSION_RATIO,
    columns::WATER_RATIO,
];

/// Features compared between stable and turbulent batches.
pub const ANOVA_FEATURES: [&str; 4] = [
    columns::GRADIENT_MAX,
    columns::INTERFACE_CONFIDENCE,
    columns::EMULSION_RATIO,
    columns::WATER_RATIO,
];

/// Features listed in the comparative report.
pub const REPORT_FEATURES: [&str; 6] = [
    columns::GRADIENT_MAX,
    columns::GRADIENT_STD,
    columns::INTERFACE_CONFIDENCE,
    columns::EMULSION_RATIO,
    columns::WATER_RATIO,
    columns::CRUDE_RATIO,
];

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationEntry {
    pub feature: String,
    pub sigma_column: String,
    pub correlation: f64,
    pub p_value: f64,
    /// `p_value < CORRELATION_ALPHA`.
    pub significant: bool,
    pub n_samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroupStats {
    pub n: usize,
    pub mean: f64,
    /// Sample std; `None` for a single observation.
    pub std: Option<f64>,
}

impl GroupStats {
    fn of(values: &[f64]) -> Option<Self> {
        Some(Self {
            n: values.len(),
            mean: stats::mean(values)?,
            std: stats::sample_std(values),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnovaEntry {
    pub feature: String,
    pub f_statistic: f64,
    pub p_value: f64,
    /// `p_value < HYPOTHESIS_ALPHA`.
    pub significant: bool,
    pub stable: GroupStats,
    pub turbulent: GroupStats,
    /// `(mean_stable − mean_turbulent) / sqrt((std_stable² + std_turbulent²) / 2)`.
    pub effect_size: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HypothesisTest {
    pub entries: Vec<AnovaEntry>,
    pub validated: bool,
    pub significant_features: Vec<String>,
    pub conclusion: String,
    /// Set when the test could not run at all (e.g. `insufficient_data`).
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub metric: String,
    pub n_stable: usize,
    pub n_turbulent: usize,
    pub mean_stable: f64,
    pub std_stable: Option<f64>,
    pub mean_turbulent: f64,
    pub std_turbulent: Option<f64>,
    /// First non-negative correlation against a sigma column, if any.
    pub correlation_sigma: Option<f64>,
    pub p_value_anova: Option<f64>,
    pub significant: bool,
}

/// Everything produced by one analysis run.
#[derive(Debug, Clone)]
pub struct ReliabilityResult {
    /// Input rows plus sigma, `sigma_combined` and `batch_type` columns.
    pub dataset: Dataset,
    pub correlations: Vec<CorrelationEntry>,
    pub hypothesis: HypothesisTest,
    pub report: Vec<ReportRow>,
    pub hypothesis_validated: bool,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Validates that thermal readings are more reliable in low-variability
/// operating periods.
pub struct ReliabilityAnalyzer {
    config: VariabilityConfig,
    tracker: Arc<dyn Tracker>,
}

impl ReliabilityAnalyzer {
    pub fn new(config: VariabilityConfig, tracker: Arc<dyn Tracker>) -> Self {
        log::info!(
            "ReliabilityAnalyzer: window={}, method={:?}",
            config.window,
            config.correlation_method
        );
        Self { config, tracker }
    }

    pub fn config(&self) -> &VariabilityConfig {
        &self.config
    }

    fn sigma_columns(&self) -> Vec<String> {
        self.config.signals.iter().map(|s| columns::sigma_of(s)).collect()
    }

    /// Sort by the order column (if present) and append sigma columns.
    pub fn compute_sigma(&self, dataset: &Dataset) -> Dataset {
        let mut sorted;
        let source = match &self.config.order_column {
            Some(col) if dataset.has_column(col) => {
                sorted = dataset.clone();
                sorted.sort_by_column(col);
                &sorted
            }
            _ => dataset,
        };
        variability::compute_sigma(source, &self.config.signals, self.config.window)
    }

    pub fn classify(&self, dataset: &Dataset) -> Dataset {
        variability::classify(dataset, &self.sigma_columns(), self.config.threshold)
    }

    /// Correlate each thermal feature with each `sigma_*` column over valid
    /// rows. Pairs with fewer than three complete observations are omitted.
    pub fn correlate(&self, dataset: &Dataset) -> Vec<CorrelationEntry> {
        log::info!("Correlating thermal features with sigma");
        let valid = dataset.select(&filtered_indices(dataset, &analysis_filter()));
        let sigma_columns: Vec<&String> = valid
            .column_names
            .iter()
            .filter(|c| c.starts_with(columns::SIGMA_PREFIX))
            .collect();

        let mut out = Vec::new();
        for feature in CORRELATION_FEATURES {
            if !valid.has_column(feature) {
                continue;
            }
            let y_all = valid.column_f64(feature);
            for sigma in &sigma_columns {
                let (x, y): (Vec<f64>, Vec<f64>) = valid
                    .column_f64(sigma)
                    .into_iter()
                    .zip(&y_all)
                    .filter_map(|(x, y)| Some((x?, (*y)?)))
                    .unzip();
                if x.len() < MIN_CORRELATION_PAIRS {
                    continue;
                }
                let Some(c) = stats::correlate(&x, &y, self.config.correlation_method) else {
                    log::debug!("{feature} vs {sigma}: undefined (constant series)");
                    continue;
                };
                log::debug!(
                    "{feature} vs {sigma}: r={:.3}, p={:.4}",
                    c.coefficient,
                    c.p_value
                );
                out.push(CorrelationEntry {
                    feature: feature.to_string(),
                    sigma_column: sigma.to_string(),
                    correlation: c.coefficient,
                    p_value: c.p_value,
                    significant: c.p_value < CORRELATION_ALPHA,
                    n_samples: c.n,
                });
            }
        }
        log::info!("{} correlations computed", out.len());
        out
    }

    /// Stable-vs-turbulent ANOVA per feature; validated when any is significant.
    pub fn validate_hypothesis(&self, dataset: &Dataset) -> HypothesisTest {
        log::info!("Validating hypothesis with ANOVA");
        let valid = dataset.select(&filtered_indices(dataset, &analysis_filter()));
        if valid.len() < MIN_HYPOTHESIS_ROWS {
            log::warn!(
                "Insufficient data for ANOVA: {} valid rows (need {MIN_HYPOTHESIS_ROWS})",
                valid.len()
            );
            return HypothesisTest {
                conclusion: "insufficient data".into(),
                error: Some("insufficient_data".into()),
                ..HypothesisTest::default()
            };
        }

        let mut entries = Vec::new();
        for feature in ANOVA_FEATURES {
            if !valid.has_column(feature) {
                continue;
            }
            let (stable, turbulent) = split_by_batch(&valid, feature);
            if stable.len() < MIN_GROUP_SIZE || turbulent.len() < MIN_GROUP_SIZE {
                log::warn!("Insufficient data for ANOVA on {feature}");
                continue;
            }
            let Some(anova) = stats::one_way_anova(&[&stable, &turbulent]) else {
                log::warn!("ANOVA undefined for {feature} (no variation)");
                continue;
            };
            let (Some(s), Some(t)) = (GroupStats::of(&stable), GroupStats::of(&turbulent)) else {
                continue;
            };
            let s_std = s.std.unwrap_or(0.0);
            let t_std = t.std.unwrap_or(0.0);
            let pooled = ((s_std.powi(2) + t_std.powi(2)) / 2.0).sqrt();
            let effect_size = if pooled > 0.0 { (s.mean - t.mean) / pooled } else { 0.0 };

            log::info!(
                "{feature}: F={:.3}, p={:.4}, stable={:.3}±{s_std:.3}, turbulent={:.3}±{t_std:.3}",
                anova.f_statistic,
                anova.p_value,
                s.mean,
                t.mean
            );
            entries.push(AnovaEntry {
                feature: feature.to_string(),
                f_statistic: anova.f_statistic,
                p_value: anova.p_value,
                significant: anova.p_value < HYPOTHESIS_ALPHA,
                stable: s,
                turbulent: t,
                effect_size,
            });
        }

        let significant_features: Vec<String> = entries
            .iter()
            .filter(|e| e.significant)
            .map(|e| e.feature.clone())
            .collect();
        let validated = !significant_features.is_empty();
        let conclusion = format!(
            "Hypothesis {} with {} significant features (p < {HYPOTHESIS_ALPHA})",
            if validated { "VALIDATED" } else { "NOT VALIDATED" },
            significant_features.len()
        );
        log::info!("{conclusion}");

        HypothesisTest {
            entries,
            validated,
            significant_features,
            conclusion,
            error: None,
        }
    }

    /// Side-by-side group summary. Only non-negative sigma correlations are
    /// surfaced here; the raw table keeps the negative ones.
    pub fn comparative_report(
        &self,
        dataset: &Dataset,
        correlations: &[CorrelationEntry],
        hypothesis: &HypothesisTest,
    ) -> Vec<ReportRow> {
        log::info!("Building comparative report");
        let valid = dataset.select(&filtered_indices(dataset, &analysis_filter()));
        if valid.is_empty() {
            log::warn!("No valid rows for the report");
            return Vec::new();
        }

        // Preference order: primary signal, combined, remaining signals.
        let mut sigma_preference: Vec<String> = Vec::new();
        let mut signal_sigmas = self.sigma_columns().into_iter();
        sigma_preference.extend(signal_sigmas.next());
        sigma_preference.push(columns::SIGMA_COMBINED.to_string());
        sigma_preference.extend(signal_sigmas);

        let mut rows = Vec::new();
        for metric in REPORT_FEATURES {
            if !valid.has_column(metric) {
                continue;
            }
            let (stable, turbulent) = split_by_batch(&valid, metric);
            let (Some(s), Some(t)) = (GroupStats::of(&stable), GroupStats::of(&turbulent)) else {
                continue;
            };

            let p_value_anova = hypothesis
                .entries
                .iter()
                .find(|e| e.feature == metric)
                .map(|e| e.p_value);

            let correlation_sigma = sigma_preference.iter().find_map(|sigma| {
                correlations
                    .iter()
                    .find(|c| c.feature == metric && &c.sigma_column == sigma)
                    .map(|c| c.correlation)
                    .filter(|r| *r >= 0.0)
            });

            rows.push(ReportRow {
                metric: metric.to_string(),
                n_stable: s.n,
                n_turbulent: t.n,
                mean_stable: s.mean,
                std_stable: s.std,
                mean_turbulent: t.mean,
                std_turbulent: t.std,
                correlation_sigma,
                p_value_anova,
                significant: p_value_anova.is_some_and(|p| p < HYPOTHESIS_ALPHA),
            });
        }
        log::info!("Report: {} metrics compared", rows.len());
        rows
    }

    /// Full run: sigma → classification → correlation → ANOVA → report.
    pub fn analyze(&self, dataset: &Dataset) -> ReliabilityResult {
        log::info!("Starting thermal reliability analysis on {} rows", dataset.len());
        let mut params = serde_json::Map::new();
        params.insert("window".into(), json!(self.config.window));
        params.insert("signals".into(), json!(self.config.signals));
        params.insert("threshold".into(), json!(self.config.threshold));
        params.insert("correlation_method".into(), json!(self.config.correlation_method));
        self.tracker.log_params("reliability", params);

        let dataset = self.classify(&self.compute_sigma(dataset));
        let correlations = self.correlate(&dataset);
        let hypothesis = self.validate_hypothesis(&dataset);
        let report = self.comparative_report(&dataset, &correlations, &hypothesis);

        let n_valid = filtered_indices(&dataset, &analysis_filter()).len();
        self.tracker.log_metrics(
            "reliability",
            &[
                ("n_rows", dataset.len() as f64),
                ("n_valid", n_valid as f64),
                ("n_correlations", correlations.len() as f64),
                ("n_significant", hypothesis.significant_features.len() as f64),
                ("hypothesis_validated", if hypothesis.validated { 1.0 } else { 0.0 }),
            ],
        );
        if let Some(err) = &hypothesis.error {
            self.tracker.log_error(err, &hypothesis.conclusion);
        }
        log::info!("Reliability analysis complete");

        ReliabilityResult {
            hypothesis_validated: hypothesis.validated,
            dataset,
            correlations,
            hypothesis,
            report,
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }
}

impl Default for ReliabilityAnalyzer {
    fn default() -> Self {
        Self::new(VariabilityConfig::default(), Arc::new(NoopTracker))
    }
}

/// Present values of `feature` for stable and turbulent rows.
fn split_by_batch(dataset: &Dataset, feature: &str) -> (Vec<f64>, Vec<f64>) {
    let mut stable = Vec::new();
    let mut turbulent = Vec::new();
    for (value, batch) in dataset
        .column_f64(feature)
        .into_iter()
        .zip(dataset.column_str(columns::BATCH_TYPE))
    {
        match (value, batch) {
            (Some(v), Some(columns::BATCH_STABLE)) => stable.push(v),
            (Some(v), Some(columns::BATCH_TURBULENT)) => turbulent.push(v),
            _ => {}
        }
    }
    (stable, turbulent)
}

// ---------------------------------------------------------------------------
// Tabular export
// ---------------------------------------------------------------------------

pub(super) fn table(headers: &[&str], rows: Vec<Vec<CellValue>>) -> Dataset {
    let rows = rows
        .into_iter()
        .map(|cells| {
            headers
                .iter()
                .map(|h| h.to_string())
                .zip(cells)
                .collect::<Row>()
        })
        .collect();
    Dataset::with_columns(headers.iter().map(|h| h.to_string()).collect(), rows)
}

impl ReliabilityResult {
    pub fn correlation_table(&self) -> Dataset {
        table(
            &["feature", "sigma_column", "correlation", "p_value", "significant", "n_samples"],
            self.correlations
                .iter()
                .map(|c| {
                    vec![
                        c.feature.as_str().into(),
                        c.sigma_column.as_str().into(),
                        c.correlation.into(),
                        c.p_value.into(),
                        c.significant.into(),
                        c.n_samples.into(),
                    ]
                })
                .collect(),
        )
    }

    pub fn anova_table(&self) -> Dataset {
        table(
            &[
                "feature",
                "f_statistic",
                "p_value",
                "significant",
                "stable_mean",
                "stable_std",
                "n_stable",
                "turbulent_mean",
                "turbulent_std",
                "n_turbulent",
                "effect_size",
            ],
            self.hypothesis
                .entries
                .iter()
                .map(|e| {
                    vec![
                        e.feature.as_str().into(),
                        e.f_statistic.into(),
                        e.p_value.into(),
                        e.significant.into(),
                        e.stable.mean.into(),
                        e.stable.std.into(),
                        e.stable.n.into(),
                        e.turbulent.mean.into(),
                        e.turbulent.std.into(),
                        e.turbulent.n.into(),
                        e.effect_size.into(),
                    ]
                })
                .collect(),
        )
    }

    pub fn report_table(&self) -> Dataset {
        table(
            &[
                "metric",
                "n_estable",
                "n_turbulento",
                "mean_estable",
                "std_estable",
                "mean_turbulento",
                "std_turbulento",
                "correlacion_sigma",
                "p_value_anova",
                "significativo",
            ],
            self.report
                .iter()
                .map(|r| {
                    vec![
                        r.metric.as_str().into(),
                        r.n_stable.into(),
                        r.n_turbulent.into(),
                        r.mean_stable.into(),
                        r.std_stable.into(),
                        r.mean_turbulent.into(),
                        r.std_turbulent.into(),
                        r.correlation_sigma.into(),
                        r.p_value_anova.into(),
                        r.significant.into(),
                    ]
                })
                .collect(),
        )
    }

    /// Write the four tables as CSV plus a JSON summary into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        loader::save_file(&self.dataset, &dir.join("dataset_annotated.csv"))?;
        loader::save_file(&self.correlation_table(), &dir.join("correlations.csv"))?;
        loader::save_file(&self.anova_table(), &dir.join("anova.csv"))?;
        loader::save_file(&self.report_table(), &dir.join("comparative_report.csv"))?;

        let summary = json!({
            "hypothesis_validated": self.hypothesis_validated,
            "significant_features": self.hypothesis.significant_features,
            "conclusion": self.hypothesis.conclusion,
            "error": self.hypothesis.error,
            "n_rows": self.dataset.len(),
            "timestamp": self.timestamp,
        });
        let text = serde_json::to_string_pretty(&summary).context("serializing summary")?;
        std::fs::write(dir.join("summary.json"), text).context("writing summary.json")?;
        log::info!("Reliability artifacts written to {}", dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn row(batch: &str, sigma: f64, gradient_max: f64) -> Row {
        let mut r = Row::new();
        r.insert(columns::STATUS.into(), columns::STATUS_SUCCESS.into());
        r.insert(columns::BATCH_TYPE.into(), batch.into());
        r.insert(columns::sigma_of(columns::FLOW), sigma.into());
        r.insert(columns::GRADIENT_MAX.into(), gradient_max.into());
        r
    }

    fn grouped_dataset() -> Dataset {
        let stable = [1.0, 1.1, 0.9, 1.0, 1.05, 0.95];
        let turbulent = [3.0, 3.2, 2.9, 3.1, 2.8, 3.0];
        let mut rows = Vec::new();
        for (i, v) in stable.iter().enumerate() {
            rows.push(row(columns::BATCH_STABLE, 0.1 + i as f64 * 0.01, *v));
        }
        for (i, v) in turbulent.iter().enumerate() {
            rows.push(row(columns::BATCH_TURBULENT, 1.0 + i as f64 * 0.1, *v));
        }
        Dataset::from_rows(rows)
    }

    #[test]
    fn test_correlation_needs_three_pairs() {
        let analyzer = ReliabilityAnalyzer::default();
        let two = Dataset::from_rows(vec![
            row(columns::BATCH_STABLE, 0.1, 1.0),
            row(columns::BATCH_TURBULENT, 0.9, 3.0),
        ]);
        assert!(analyzer.correlate(&two).is_empty());

        let c = analyzer.correlate(&grouped_dataset());
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].feature, columns::GRADIENT_MAX);
        assert_eq!(c[0].n_samples, 12);
        assert!(c[0].correlation > 0.9);
        assert!(c[0].significant);
    }

    #[test]
    fn test_failed_rows_are_excluded() {
        let mut ds = grouped_dataset();
        let mut failed = row(columns::BATCH_STABLE, 5.0, 100.0);
        failed.insert(columns::STATUS.into(), "processing_error".into());
        ds.rows.push(failed);
        let c = ReliabilityAnalyzer::default().correlate(&ds);
        assert_eq!(c[0].n_samples, 12);
    }

    #[test]
    fn test_hypothesis_insufficient_data() {
        let ds = Dataset::from_rows(grouped_dataset().rows.into_iter().take(9).collect());
        let h = ReliabilityAnalyzer::default().validate_hypothesis(&ds);
        assert_eq!(h.error.as_deref(), Some("insufficient_data"));
        assert!(!h.validated);
        assert!(h.entries.is_empty());
    }

    #[test]
    fn test_hypothesis_validated_on_separated_groups() {
        let h = ReliabilityAnalyzer::default().validate_hypothesis(&grouped_dataset());
        assert!(h.validated);
        assert_eq!(h.significant_features, vec![columns::GRADIENT_MAX.to_string()]);
        let e = &h.entries[0];
        assert_eq!(e.stable.n, 6);
        assert_relative_eq!(e.stable.mean, 1.0, epsilon = 1e-12);
        assert!(e.effect_size < 0.0);
        assert!(e.p_value < HYPOTHESIS_ALPHA);
    }

    #[test]
    fn test_report_hides_negative_correlations() {
        let analyzer = ReliabilityAnalyzer::default();
        let ds = grouped_dataset();
        let hypothesis = analyzer.validate_hypothesis(&ds);
        let entry = |sigma: &str, r: f64| CorrelationEntry {
            feature: columns::GRADIENT_MAX.into(),
            sigma_column: sigma.into(),
            correlation: r,
            p_value: 0.01,
            significant: true,
            n_samples: 12,
        };

        let negative = [entry(columns::sigma_of(columns::FLOW).as_str(), -0.6)];
        let report = analyzer.comparative_report(&ds, &negative, &hypothesis);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].correlation_sigma, None);
        assert!(report[0].significant);

        let mixed = [
            entry(columns::sigma_of(columns::FLOW).as_str(), -0.6),
            entry(columns::SIGMA_COMBINED, 0.4),
        ];
        let report = analyzer.comparative_report(&ds, &mixed, &hypothesis);
        assert_eq!(report[0].correlation_sigma, Some(0.4));
    }

    #[test]
    fn test_analyze_writes_artifacts() {
        let mut rows = Vec::new();
        for i in 0..12 {
            let mut r = Row::new();
            r.insert(columns::DAY.into(), CellValue::Integer(i as i64));
            let burst = if i % 3 == 0 { 10.0 } else { 1.0 };
            r.insert(columns::FLOW.into(), (burst * i as f64).into());
            r.insert(columns::LEVEL.into(), (40.0 + (i % 4) as f64).into());
            r.insert(columns::STATUS.into(), columns::STATUS_SUCCESS.into());
            r.insert(columns::GRADIENT_MAX.into(), (0.5 + 0.1 * i as f64).into());
            rows.push(r);
        }
        let result = ReliabilityAnalyzer::default().analyze(&Dataset::from_rows(rows));
        assert!(result.dataset.has_column(columns::SIGMA_COMBINED));
        assert_eq!(result.dataset.len(), 12);

        let dir = tempfile::tempdir().unwrap();
        result.write_to(dir.path()).unwrap();
        for name in [
            "dataset_annotated.csv",
            "correlations.csv",
            "anova.csv",
            "comparative_report.csv",
            "summary.json",
        ] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }
    }
}
