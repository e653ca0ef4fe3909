use crate::config::{DetectorConfig, LayerRange};
use crate::reliability::stats;

use super::features::FeatureStatus;
use super::peaks::{Peak, find_peaks};
use super::profile::ThermalProfile;

/// Score given to a pair whose layers are not hottest-on-top.
pub const REJECTED_SCORE: f64 = -100.0;

/// Score the selection starts from; a pair must beat it to be chosen.
const INITIAL_BEST_SCORE: f64 = -1.0;

/// Chosen boundary pair. Invariant: `top < bottom <= height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterfaceCandidate {
    /// First row of the emulsion band.
    pub top: usize,
    /// First row of the water band.
    pub bottom: usize,
    pub score: f64,
}

impl InterfaceCandidate {
    /// Confidence in [0, 1]: `max(0, score) / scale`, two decimals.
    pub fn confidence(&self, scale: f64) -> f64 {
        confidence_from_score(self.score, scale)
    }
}

pub fn confidence_from_score(score: f64, scale: f64) -> f64 {
    if score <= 0.0 || scale <= 0.0 {
        return 0.0;
    }
    ((score / scale) * 100.0).round() / 100.0
}

/// Finds crude/emulsion and emulsion/water boundaries in a thermal profile.
#[derive(Debug, Clone, Default)]
pub struct InterfaceDetector {
    config: DetectorConfig,
}

impl InterfaceDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Candidate boundaries: peaks of the negated gradient, i.e. the sharpest
    /// downward brightness steps.
    pub fn candidate_peaks(&self, gradient: &[f64]) -> Vec<Peak> {
        let negated: Vec<f64> = gradient.iter().map(|g| -g).collect();
        let min_prominence =
            stats::population_std(gradient).unwrap_or(0.0) * self.config.prominence_factor;
        find_peaks(&negated, min_prominence, self.config.min_distance)
    }

    /// Detect the best-scoring boundary pair, or `NoInterfacesDetected` when
    /// fewer than two candidate peaks survive.
    pub fn detect(&self, profile: &ThermalProfile) -> Result<InterfaceCandidate, FeatureStatus> {
        let gradient = profile.gradient();
        let peaks = self.candidate_peaks(&gradient);
        log::debug!(
            "{} gradient peaks: {:?}",
            peaks.len(),
            peaks.iter().map(|p| p.index).collect::<Vec<_>>()
        );
        if peaks.len() < 2 {
            return Err(FeatureStatus::NoInterfacesDetected);
        }
        Ok(self.select_pair(profile, &peaks))
    }

    /// Keep the most prominent peaks and evaluate every `(t, b)` pair with
    /// `t < b`. Pairs are visited in ascending position order and the first
    /// maximum wins.
    pub fn select_pair(&self, profile: &ThermalProfile, peaks: &[Peak]) -> InterfaceCandidate {
        let height = profile.height();

        // Stable sort: equal prominences keep peak order.
        let mut ranked: Vec<&Peak> = peaks.iter().collect();
        ranked.sort_by(|a, b| b.prominence.total_cmp(&a.prominence));
        ranked.truncate(self.config.max_candidates);

        let mut best = InterfaceCandidate {
            top: height / 3,
            bottom: 2 * height / 3,
            score: INITIAL_BEST_SCORE,
        };

        // Pairs come in prominence order, so a tie keeps the pair built from
        // the more prominent peaks.
        for (i, first) in ranked.iter().enumerate() {
            for second in &ranked[i + 1..] {
                if first.index == second.index {
                    continue;
                }
                let t = first.index.min(second.index);
                let b = first.index.max(second.index);
                let score = self.score_sequence(
                    profile.band_mean(0, t),
                    profile.band_mean(t, b),
                    profile.band_mean(b, height),
                );
                log::trace!("pair ({t}, {b}) scored {score}");
                if score > best.score {
                    best = InterfaceCandidate { top: t, bottom: b, score };
                }
            }
        }

        if best.score == INITIAL_BEST_SCORE {
            log::debug!("no pair beat the default split, using thirds");
        }
        best
    }

    /// Physical plausibility of three band temperatures (top to bottom).
    pub fn score_sequence(&self, top: f64, middle: f64, bottom: f64) -> f64 {
        if !(top > middle && middle > bottom) {
            return REJECTED_SCORE;
        }
        let ranges = &self.config.ranges;
        let mut score = range_score(top, &ranges.crude)
            + range_score(middle, &ranges.emulsion)
            + range_score(bottom, &ranges.water);

        if top - middle > self.config.separation_margin {
            score += self.config.separation_bonus;
        }
        if middle - bottom > self.config.separation_margin {
            score += self.config.separation_bonus;
        }
        score
    }
}

/// Full weight inside the range, half above it, minus half below it.
fn range_score(value: f64, range: &LayerRange) -> f64 {
    if value >= range.low && value <= range.high {
        range.weight
    } else if value > range.high {
        range.weight / 2.0
    } else {
        -range.weight / 2.0
    }
}
