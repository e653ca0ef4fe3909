use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};

use crate::config::ExtractorConfig;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// ThermalProfile – vertical brightness profile of one image
// ---------------------------------------------------------------------------

/// Row-wise mean brightness of a preprocessed image, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalProfile {
    /// Mean brightness of each row.
    pub row_means: Vec<f64>,
    /// `row_means` after 1-D Gaussian smoothing; input to derivative analysis.
    pub smoothed: Vec<f64>,
}

impl ThermalProfile {
    /// Build a profile from row means, smoothing with the given sigma.
    pub fn from_row_means(row_means: Vec<f64>, sigma: f64) -> Self {
        let smoothed = gaussian_filter1d(&row_means, sigma);
        Self { row_means, smoothed }
    }

    /// Number of rows (image height).
    pub fn height(&self) -> usize {
        self.row_means.len()
    }

    /// Discrete first derivative of the smoothed profile.
    pub fn gradient(&self) -> Vec<f64> {
        gradient(&self.smoothed)
    }

    /// Mean brightness over rows `[start, end)`; 0 for an empty band.
    ///
    /// Every row has the same width, so this equals the pixel mean of the band.
    pub fn band_mean(&self, start: usize, end: usize) -> f64 {
        let end = end.min(self.row_means.len());
        if start >= end {
            return 0.0;
        }
        let band = &self.row_means[start..end];
        band.iter().sum::<f64>() / band.len() as f64
    }
}

// ---------------------------------------------------------------------------
// ProfileExtractor – image → profile
// ---------------------------------------------------------------------------

/// Loads, normalises and profiles thermal images at a fixed working resolution.
#[derive(Debug, Clone)]
pub struct ProfileExtractor {
    config: ExtractorConfig,
}

impl ProfileExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Load an image file as single-channel brightness at working resolution.
    pub fn load(&self, path: &Path) -> Result<GrayImage> {
        let img = image::open(path)?;
        self.resize(&img)
    }

    /// Luma conversion (multi-channel sources) followed by a bilinear resize.
    /// Resizing happens first so pixel coordinates do not depend on the
    /// source resolution.
    pub fn resize(&self, img: &DynamicImage) -> Result<GrayImage> {
        if img.width() == 0 || img.height() == 0 {
            return Err(Error::EmptyImage {
                width: img.width(),
                height: img.height(),
            });
        }
        let gray = img.to_luma8();
        let (w, h) = (self.config.width, self.config.height);
        if gray.dimensions() == (w, h) {
            return Ok(gray);
        }
        Ok(imageops::resize(&gray, w, h, FilterType::Triangle))
    }

    /// Blur, suppress background, and optionally stretch to [0, 255].
    pub fn preprocess(&self, img: &GrayImage) -> GrayImage {
        let mut out = blur3x3(img);

        // Pixels at or below the threshold carry no signal.
        let threshold = self.config.background_threshold;
        for p in out.pixels_mut() {
            if p.0[0] <= threshold {
                p.0[0] = 0;
            }
        }

        if self.config.normalize {
            normalize_min_max(&mut out);
        }
        out
    }

    /// Full extraction: resize → preprocess → row means → smoothing.
    pub fn extract(&self, img: &DynamicImage) -> Result<ThermalProfile> {
        let gray = self.resize(img)?;
        Ok(self.profile_of(&self.preprocess(&gray)))
    }

    /// Extraction straight from a file.
    pub fn extract_path(&self, path: &Path) -> Result<ThermalProfile> {
        let gray = self.load(path)?;
        Ok(self.profile_of(&self.preprocess(&gray)))
    }

    fn profile_of(&self, img: &GrayImage) -> ThermalProfile {
        ThermalProfile::from_row_means(row_means(img), self.config.smoothing_sigma)
    }
}

/// Mean brightness of every row.
pub fn row_means(img: &GrayImage) -> Vec<f64> {
    let width = img.width() as usize;
    if width == 0 {
        return vec![0.0; img.height() as usize];
    }
    img.as_raw()
        .chunks_exact(width)
        .map(|row| row.iter().map(|&v| v as f64).sum::<f64>() / width as f64)
        .collect()
}

// ---------------------------------------------------------------------------
// Image filters
// ---------------------------------------------------------------------------

/// Mirror an index into `[0, n)` without repeating the edge sample
/// (`2 1 | 0 1 2 … n-1 | n-2`).
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let period = 2 * (n - 1);
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    i as usize
}

/// Separable [1 2 1]/4 blur (the 3×3 Gaussian), rounded back to `u8`.
fn blur3x3(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let src = img.as_raw();
    const K: [f64; 3] = [0.25, 0.5, 0.25];

    let mut horiz = vec![0.0f64; wu * hu];
    for y in 0..hu {
        for x in 0..wu {
            horiz[y * wu + x] = (-1..=1)
                .map(|d| K[(d + 1) as usize] * src[y * wu + reflect_101(x as isize + d, wu)] as f64)
                .sum();
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let v: f64 = (-1..=1)
            .map(|d| K[(d + 1) as usize] * horiz[reflect_101(y as isize + d, hu) * wu + x])
            .sum();
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Stretch the brightness range to [0, 255]. A constant image maps to 0.
fn normalize_min_max(img: &mut GrayImage) {
    let (lo, hi) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if lo > hi {
        return;
    }
    let scale = if hi > lo { 255.0 / (hi - lo) as f64 } else { 0.0 };
    for p in img.pixels_mut() {
        let v = (p.0[0] - lo) as f64 * scale;
        p.0[0] = v.round().clamp(0.0, 255.0) as u8;
    }
}

// ---------------------------------------------------------------------------
// 1-D signal helpers
// ---------------------------------------------------------------------------

/// Gaussian smoothing with half-sample symmetric boundaries (`d c b a | a b c d | d c b a`),
/// kernel truncated at 4 sigma.
pub fn gaussian_filter1d(input: &[f64], sigma: f64) -> Vec<f64> {
    let n = input.len();
    if n == 0 || sigma <= 0.0 {
        return input.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);

    let period = 2 * n as isize;
    let reflect = |i: isize| -> usize {
        let i = i.rem_euclid(period);
        if i < n as isize {
            i as usize
        } else {
            (period - 1 - i) as usize
        }
    };

    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * input[reflect(i + k as isize - radius)])
                .sum()
        })
        .collect()
}

/// First derivative: central differences inside, one-sided at the edges.
pub fn gradient(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| {
            if i == 0 {
                values[1] - values[0]
            } else if i == n - 1 {
                values[n - 1] - values[n - 2]
            } else {
                (values[i + 1] - values[i - 1]) / 2.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(2, 5), 2);
        assert_eq!(reflect_101(-1, 1), 0);
    }

    #[test]
    fn test_gaussian_preserves_constant_and_mass() {
        let flat = vec![7.0; 40];
        for v in gaussian_filter1d(&flat, 3.0) {
            assert_relative_eq!(v, 7.0, epsilon = 1e-12);
        }
        let mut spike = vec![0.0; 101];
        spike[50] = 1.0;
        let smoothed = gaussian_filter1d(&spike, 2.0);
        assert_relative_eq!(smoothed.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(smoothed[50] > smoothed[49] && smoothed[49] > smoothed[45]);
    }

    #[test]
    fn test_gradient_matches_central_differences() {
        let g = gradient(&[1.0, 2.0, 4.0, 7.0, 11.0]);
        assert_eq!(g, vec![1.0, 1.5, 2.5, 3.5, 4.0]);
        assert_eq!(gradient(&[3.0]), vec![0.0]);
    }

    #[test]
    fn test_band_mean() {
        let p = ThermalProfile::from_row_means(vec![10.0, 20.0, 30.0, 40.0], 0.0);
        assert_relative_eq!(p.band_mean(0, 2), 15.0);
        assert_relative_eq!(p.band_mean(1, 4), 30.0);
        assert_eq!(p.band_mean(3, 3), 0.0);
    }

    #[test]
    fn test_preprocess_zeroes_background_and_stretches() {
        let img = GrayImage::from_fn(8, 8, |_, y| Luma([if y < 4 { 200 } else { 10 }]));
        let extractor = ProfileExtractor::new(ExtractorConfig {
            width: 8,
            height: 8,
            ..ExtractorConfig::default()
        });
        let out = extractor.preprocess(&img);
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
        assert_eq!(out.get_pixel(0, 7).0[0], 0);
    }

    #[test]
    fn test_resize_happens_before_profiling() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(32, 60, |_, y| {
            Luma([if y < 30 { 200 } else { 100 }])
        }));
        let extractor = ProfileExtractor::new(ExtractorConfig {
            width: 16,
            height: 120,
            ..ExtractorConfig::default()
        });
        let profile = extractor.extract(&img).unwrap();
        assert_eq!(profile.height(), 120);
        assert!(profile.row_means[0] > profile.row_means[119]);
    }
}
