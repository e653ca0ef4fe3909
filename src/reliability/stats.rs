//! Descriptive statistics, correlation and one-way ANOVA.
//!
//! Standard deviations follow the dataframe convention (`ddof = 1`) unless
//! named `population_*`.

use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

use crate::config::CorrelationMethod;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (`n - 1` denominator). `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Population standard deviation (`n` denominator).
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / values.len() as f64).sqrt())
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    pub coefficient: f64,
    /// Two-sided p-value of the null hypothesis of no correlation.
    pub p_value: f64,
    pub n: usize,
}

/// Correlate two equal-length series. `None` when there are fewer than three
/// pairs or either series is constant.
pub fn correlate(x: &[f64], y: &[f64], method: CorrelationMethod) -> Option<Correlation> {
    match method {
        CorrelationMethod::Pearson => pearson(x, y),
        CorrelationMethod::Spearman => spearman(x, y),
    }
}

pub fn pearson(x: &[f64], y: &[f64]) -> Option<Correlation> {
    let n = x.len();
    if n != y.len() || n < 3 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    Some(Correlation {
        coefficient: r,
        p_value: correlation_p_value(r, n)?,
        n,
    })
}

/// Pearson correlation of the average ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<Correlation> {
    if x.len() != y.len() {
        return None;
    }
    pearson(&rank(x), &rank(y))
}

/// 1-based ranks, ties get the average of their positions.
pub fn rank(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

fn correlation_p_value(r: f64, n: usize) -> Option<f64> {
    let df = (n - 2) as f64;
    if (1.0 - r.abs()) <= f64::EPSILON {
        return Some(0.0);
    }
    let t = r * (df / (1.0 - r * r)).sqrt();
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some((2.0 * dist.sf(t.abs())).min(1.0))
}

// ---------------------------------------------------------------------------
// One-way ANOVA
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anova {
    pub f_statistic: f64,
    pub p_value: f64,
}

/// One-way between-groups ANOVA. `None` with fewer than two groups, an empty
/// group, no residual degrees of freedom, or when every value is identical.
pub fn one_way_anova(groups: &[&[f64]]) -> Option<Anova> {
    let k = groups.len();
    let n: usize = groups.iter().map(|g| g.len()).sum();
    if k < 2 || groups.iter().any(|g| g.is_empty()) || n <= k {
        return None;
    }
    let grand_mean = groups.iter().flat_map(|g| g.iter()).sum::<f64>() / n as f64;

    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for g in groups {
        let m = mean(g)?;
        ss_between += g.len() as f64 * (m - grand_mean).powi(2);
        ss_within += g.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    }

    let df_between = (k - 1) as f64;
    let df_within = (n - k) as f64;
    if ss_within == 0.0 {
        if ss_between == 0.0 {
            return None;
        }
        return Some(Anova { f_statistic: f64::INFINITY, p_value: 0.0 });
    }

    let f = (ss_between / df_between) / (ss_within / df_within);
    let dist = FisherSnedecor::new(df_between, df_within).ok()?;
    Some(Anova {
        f_statistic: f,
        p_value: dist.sf(f),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_descriptive() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&v).unwrap(), 5.0);
        assert_relative_eq!(population_std(&v).unwrap(), 2.0);
        assert_relative_eq!(sample_std(&v).unwrap(), (32.0f64 / 7.0).sqrt());
        assert_eq!(sample_std(&[1.0]), None);
    }

    #[test]
    fn test_quantiles_interpolate() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(median(&v).unwrap(), 2.5);
        assert_relative_eq!(quantile(&v, 0.25).unwrap(), 1.75);
        assert_relative_eq!(quantile(&v, 0.75).unwrap(), 3.25);
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_rank_averages_ties() {
        assert_eq!(rank(&[10.0, 30.0, 20.0, 20.0]), vec![1.0, 4.0, 2.5, 2.5]);
    }

    #[test]
    fn test_pearson_known_value() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 5.0, 4.0, 5.0];
        let c = pearson(&x, &y).unwrap();
        assert_relative_eq!(c.coefficient, 0.7745966692414834, epsilon = 1e-12);
        assert_relative_eq!(c.p_value, 0.12402706265755174, epsilon = 1e-4);
    }

    #[test]
    fn test_perfect_and_degenerate_correlation() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let c = pearson(&x, &[2.0, 4.0, 6.0, 8.0]).unwrap();
        assert_relative_eq!(c.coefficient, 1.0, epsilon = 1e-12);
        assert_eq!(c.p_value, 0.0);
        assert!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]).is_none());
        assert!(pearson(&[1.0, 2.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_spearman_is_rank_based() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 8.0, 27.0, 64.0, 125.0];
        let c = spearman(&x, &y).unwrap();
        assert_relative_eq!(c.coefficient, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_anova_identical_means_not_significant() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [5.0, 4.0, 3.0, 2.0, 1.0];
        let r = one_way_anova(&[&a, &b]).unwrap();
        assert!(r.f_statistic.abs() < 1e-12);
        assert!(r.p_value > 0.99);
    }

    #[test]
    fn test_anova_known_value() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        let r = one_way_anova(&[&a, &b]).unwrap();
        assert_relative_eq!(r.f_statistic, 13.5, epsilon = 1e-12);
        assert_relative_eq!(r.p_value, 0.021311641128756727, epsilon = 1e-4);
    }

    #[test]
    fn test_anova_degenerate_groups() {
        assert!(one_way_anova(&[&[1.0, 2.0]]).is_none());
        assert!(one_way_anova(&[&[1.0, 1.0], &[1.0, 1.0]]).is_none());
        let r = one_way_anova(&[&[1.0, 1.0], &[2.0, 2.0]]).unwrap();
        assert!(r.f_statistic.is_infinite());
        assert_eq!(r.p_value, 0.0);
    }
}
