use crate::data::columns;
use crate::data::model::{CellValue, Dataset};

use super::stats;

/// Append `sigma_<signal>` columns: centered rolling sample std over `window`
/// rows (at least one observation), edge gaps back- then forward-filled.
/// Missing signal columns are skipped with a warning.
pub fn compute_sigma(dataset: &Dataset, signals: &[String], window: usize) -> Dataset {
    log::info!("Computing rolling sigma (window={window}) for {signals:?}");
    let mut out = dataset.clone();
    for signal in signals {
        if !dataset.has_column(signal) {
            log::warn!("Column '{signal}' not found, skipping");
            continue;
        }
        let sigma = fill_gaps(rolling_std_centered(&dataset.column_f64(signal), window));
        let present: Vec<f64> = sigma.iter().flatten().copied().collect();
        log::debug!(
            "sigma_{signal}: mean={:.3}, n={}",
            stats::mean(&present).unwrap_or(f64::NAN),
            present.len()
        );
        out.set_column(&columns::sigma_of(signal), sigma.into_iter().map(CellValue::from));
    }
    out
}

/// Label each row `estable` / `turbulento` from the mean of the z-scored
/// sigma columns. Adds `sigma_combined` and `batch_type`.
///
/// `threshold` defaults to the median of `sigma_combined`. With none of the
/// sigma columns present every row is `desconocido`.
pub fn classify(dataset: &Dataset, sigma_columns: &[String], threshold: Option<f64>) -> Dataset {
    log::info!("Classifying batches by operational variability");
    let mut out = dataset.clone();

    let valid: Vec<&String> = sigma_columns
        .iter()
        .filter(|c| dataset.has_column(c))
        .collect();
    if valid.is_empty() {
        log::error!("No sigma columns found among {sigma_columns:?}");
        out.set_column(
            columns::BATCH_TYPE,
            std::iter::repeat(columns::BATCH_UNKNOWN).take(dataset.len()),
        );
        return out;
    }

    let normalized: Vec<Vec<f64>> = valid
        .iter()
        .map(|c| standardize(&dataset.column_f64(c)))
        .collect();
    let combined: Vec<f64> = (0..dataset.len())
        .map(|i| normalized.iter().map(|col| col[i]).sum::<f64>() / normalized.len() as f64)
        .collect();

    let threshold = match threshold {
        Some(t) => {
            log::info!("Manual threshold: {t:.3}");
            t
        }
        None => {
            let t = stats::median(&combined).unwrap_or(0.0);
            log::info!("Automatic threshold: {t:.3} (median)");
            t
        }
    };

    let labels: Vec<&str> = combined
        .iter()
        .map(|&s| {
            if s <= threshold {
                columns::BATCH_STABLE
            } else {
                columns::BATCH_TURBULENT
            }
        })
        .collect();
    let n_stable = labels.iter().filter(|&&l| l == columns::BATCH_STABLE).count();
    log::info!(
        "Batches classified: {n_stable} {}, {} {}",
        columns::BATCH_STABLE,
        labels.len() - n_stable,
        columns::BATCH_TURBULENT
    );

    out.set_column(columns::SIGMA_COMBINED, combined);
    out.set_column(columns::BATCH_TYPE, labels);
    out
}

/// Rolling sample std whose window for row `i` is
/// `[i + 1 + (w-1)/2 - w, i + 1 + (w-1)/2)`, clipped to the data.
/// Fewer than two present values yield `None`.
pub fn rolling_std_centered(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let window = window.max(1);
    let offset = (window - 1) / 2;
    (0..n)
        .map(|i| {
            let end = (i + 1 + offset).min(n);
            let start = (i + 1 + offset).saturating_sub(window);
            let present: Vec<f64> = values[start..end].iter().flatten().copied().collect();
            stats::sample_std(&present)
        })
        .collect()
}

/// Back-fill, then forward-fill missing entries.
pub fn fill_gaps(mut values: Vec<Option<f64>>) -> Vec<Option<f64>> {
    let mut next = None;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
    let mut prev = None;
    for v in values.iter_mut() {
        match v {
            Some(x) => prev = Some(*x),
            None => *v = prev,
        }
    }
    values
}

/// Z-score with the population std. Constant (or empty) columns, and missing
/// cells, contribute exactly 0.
fn standardize(values: &[Option<f64>]) -> Vec<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let (Some(m), Some(s)) = (stats::mean(&present), stats::population_std(&present)) else {
        return vec![0.0; values.len()];
    };
    if s == 0.0 {
        return vec![0.0; values.len()];
    }
    values
        .iter()
        .map(|v| v.map_or(0.0, |x| (x - m) / s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Row;
    use approx::assert_relative_eq;

    fn signal_dataset(flow: &[f64], level: &[f64]) -> Dataset {
        let rows = flow
            .iter()
            .zip(level)
            .map(|(&f, &l)| {
                let mut r = Row::new();
                r.insert(columns::FLOW.into(), CellValue::Float(f));
                r.insert(columns::LEVEL.into(), CellValue::Float(l));
                r
            })
            .collect();
        Dataset::with_columns(vec![columns::FLOW.into(), columns::LEVEL.into()], rows)
    }

    fn signals() -> Vec<String> {
        vec![columns::FLOW.to_string(), columns::LEVEL.to_string()]
    }

    fn sigma_columns() -> Vec<String> {
        signals().iter().map(|s| columns::sigma_of(s)).collect()
    }

    #[test]
    fn test_rolling_window_bounds() {
        let v: Vec<Option<f64>> = [1.0, 2.0, 4.0, 8.0, 16.0].iter().map(|&x| Some(x)).collect();
        let s = rolling_std_centered(&v, 3);
        // Row 0 sees [1, 2], row 2 sees [2, 4, 8], row 4 sees [8, 16].
        assert_relative_eq!(s[0].unwrap(), stats::sample_std(&[1.0, 2.0]).unwrap());
        assert_relative_eq!(s[2].unwrap(), stats::sample_std(&[2.0, 4.0, 8.0]).unwrap());
        assert_relative_eq!(s[4].unwrap(), stats::sample_std(&[8.0, 16.0]).unwrap());
    }

    #[test]
    fn test_single_observation_window_is_filled() {
        let s = fill_gaps(rolling_std_centered(&[Some(1.0), Some(3.0), Some(5.0)], 1));
        // Every window holds one value: all None, nothing to fill from.
        assert_eq!(s, vec![None, None, None]);

        let gaps = fill_gaps(vec![None, Some(2.0), None, Some(4.0), None]);
        assert_eq!(gaps, vec![Some(2.0), Some(2.0), Some(4.0), Some(4.0), Some(4.0)]);
    }

    #[test]
    fn test_sigma_columns_added_without_removing() {
        let ds = signal_dataset(&[1.0, 2.0, 3.0, 10.0, 1.0, 2.0], &[50.0; 6]);
        let out = compute_sigma(&ds, &signals(), 5);
        assert_eq!(
            out.column_names,
            vec![
                columns::FLOW.to_string(),
                columns::LEVEL.to_string(),
                columns::sigma_of(columns::FLOW),
                columns::sigma_of(columns::LEVEL),
            ]
        );
        assert!(out.column_f64(&columns::sigma_of(columns::FLOW)).iter().all(Option::is_some));
        assert!(out
            .column_f64(&columns::sigma_of(columns::LEVEL))
            .iter()
            .all(|v| *v == Some(0.0)));
    }

    #[test]
    fn test_zero_variance_column_contributes_zero() {
        let flow = [1.0, 5.0, 1.0, 9.0, 1.0, 1.0, 2.0, 1.0];
        let ds = compute_sigma(&signal_dataset(&flow, &[50.0; 8]), &signals(), 3);
        let out = classify(&ds, &sigma_columns(), None);

        let sigma_flow = standardize(&ds.column_f64(&columns::sigma_of(columns::FLOW)));
        let combined = out.column_f64(columns::SIGMA_COMBINED);
        for (c, f) in combined.iter().zip(&sigma_flow) {
            let c = c.unwrap();
            assert!(c.is_finite());
            assert_relative_eq!(c, f / 2.0, epsilon = 1e-12);
        }
        assert!(out
            .column_str(columns::BATCH_TYPE)
            .iter()
            .all(|b| matches!(*b, Some("estable") | Some("turbulento"))));
    }

    #[test]
    fn test_median_threshold_count() {
        let flow = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0, 5.0];
        let level = [40.0, 41.0, 39.0, 45.0, 44.0, 38.0, 40.0, 42.0, 47.0, 41.0, 40.0];
        let ds = compute_sigma(&signal_dataset(&flow, &level), &signals(), 5);
        let out = classify(&ds, &sigma_columns(), None);

        let combined: Vec<f64> = out.column_f64(columns::SIGMA_COMBINED).into_iter().flatten().collect();
        let med = stats::median(&combined).unwrap();
        let expected = combined.iter().filter(|&&c| c <= med).count();
        let stable = out
            .column_str(columns::BATCH_TYPE)
            .iter()
            .filter(|b| **b == Some(columns::BATCH_STABLE))
            .count();
        assert_eq!(stable, expected);
    }

    #[test]
    fn test_explicit_threshold_and_unknown() {
        let ds = compute_sigma(&signal_dataset(&[1.0, 2.0, 8.0], &[1.0, 1.0, 1.0]), &signals(), 3);
        let out = classify(&ds, &sigma_columns(), Some(f64::INFINITY));
        assert!(out
            .column_str(columns::BATCH_TYPE)
            .iter()
            .all(|b| *b == Some(columns::BATCH_STABLE)));

        let out = classify(&ds, &["sigma_missing".to_string()], None);
        assert!(out
            .column_str(columns::BATCH_TYPE)
            .iter()
            .all(|b| *b == Some(columns::BATCH_UNKNOWN)));
        assert!(!out.has_column(columns::SIGMA_COMBINED));
    }
}
