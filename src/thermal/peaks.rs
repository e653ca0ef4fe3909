//! Peak search on 1-D signals.
//!
//! Pipeline: strict local maxima (flat tops collapse to their midpoint) →
//! minimum-distance thinning by height → topographic prominence filter.

/// A surviving local maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Sample index of the peak.
    pub index: usize,
    /// Height above the higher of the two surrounding bases.
    pub prominence: f64,
}

/// Find peaks of `x` that are at least `min_distance` samples apart and have
/// prominence `>= min_prominence`. Peaks are returned in index order.
pub fn find_peaks(x: &[f64], min_prominence: f64, min_distance: usize) -> Vec<Peak> {
    let candidates = local_maxima(x);
    let kept = select_by_distance(x, &candidates, min_distance.max(1));
    kept.into_iter()
        .map(|index| Peak {
            index,
            prominence: prominence(x, index),
        })
        .filter(|p| p.prominence >= min_prominence)
        .collect()
}

/// Indices of strict local maxima. A plateau counts once, at its midpoint
/// (rounded down), and only if both neighbours of the plateau are lower.
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Drop peaks closer than `distance` to a higher peak; higher peaks are
/// visited first, ties in index order.
fn select_by_distance(x: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    let mut keep = vec![true; peaks.len()];
    let mut by_priority: Vec<usize> = (0..peaks.len()).collect();
    by_priority.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    for &j in by_priority.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// Prominence of the peak at `peak`, searching the whole signal for bases.
fn prominence(x: &[f64], peak: usize) -> f64 {
    let height = x[peak];

    let mut left_min = height;
    for &v in x[..=peak].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = height;
    for &v in &x[peak..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}
