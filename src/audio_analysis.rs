//! Frame-level signal features and the 1-D helpers the boundary detector
//! builds on: z-score normalization, gradients, Gaussian smoothing and
//! percentiles.

use chfft::RFft1D;
use std::f64::consts::PI;

/// Samples per analysis frame.
pub const FRAME_LENGTH: usize = 2048;
/// Samples between the centres of consecutive frames.
pub const HOP_LENGTH: usize = 512;

/// Per-frame spectral centroid (Hz) and RMS energy.
#[derive(Debug, Clone)]
pub struct FrameFeatures {
    pub spectral_centroid: Vec<f64>,
    pub rms: Vec<f64>,
}

impl FrameFeatures {
    pub fn len(&self) -> usize {
        self.rms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rms.is_empty()
    }
}

/// Number of centred frames for `num_samples` samples.
pub fn frame_count(num_samples: usize) -> usize {
    1 + num_samples / HOP_LENGTH
}

/// Compute spectral centroid and RMS for every frame.
///
/// Frames are centred on `t * HOP_LENGTH`; samples outside the signal count
/// as zero.  The centroid uses a periodic Hann window, the RMS uses the raw
/// frame.  Silent frames get a centroid of 0.
pub fn frame_features(samples: &[f32], sample_rate: u32) -> FrameFeatures {
    let n_frames = frame_count(samples.len());
    let half = (FRAME_LENGTH / 2) as isize;
    let bins = FRAME_LENGTH / 2 + 1;
    let bin_hz = sample_rate as f64 / FRAME_LENGTH as f64;

    let window: Vec<f64> = (0..FRAME_LENGTH)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / FRAME_LENGTH as f64).cos())
        .collect();
    let mut fft = RFft1D::<f64>::new(FRAME_LENGTH);

    let mut frame = vec![0.0f64; FRAME_LENGTH];
    let mut windowed = vec![0.0f64; FRAME_LENGTH];
    let mut spectral_centroid = Vec::with_capacity(n_frames);
    let mut rms = Vec::with_capacity(n_frames);

    for t in 0..n_frames {
        let start = (t * HOP_LENGTH) as isize - half;
        for (i, slot) in frame.iter_mut().enumerate() {
            let idx = start + i as isize;
            *slot = if idx >= 0 && (idx as usize) < samples.len() {
                samples[idx as usize] as f64
            } else {
                0.0
            };
        }

        let energy: f64 = frame.iter().map(|s| s * s).sum();
        rms.push((energy / FRAME_LENGTH as f64).sqrt());

        for ((w, s), win) in windowed.iter_mut().zip(frame.iter()).zip(window.iter()) {
            *w = s * win;
        }
        let spectrum = fft.forward(&windowed);

        let mut weighted = 0.0;
        let mut total = 0.0;
        for (k, c) in spectrum.iter().take(bins).enumerate() {
            let magnitude = (c.re * c.re + c.im * c.im).sqrt();
            weighted += k as f64 * bin_hz * magnitude;
            total += magnitude;
        }
        spectral_centroid.push(if total > 0.0 { weighted / total } else { 0.0 });
    }

    FrameFeatures { spectral_centroid, rms }
}

/// Subtract the mean and divide by the (population) standard deviation.
///
/// A constant series has no scale to normalize by and maps to all zeros.
pub fn zscore(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if !std.is_finite() || std <= f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

/// Absolute discrete gradient: central differences inside, one-sided at the ends.
pub fn gradient_magnitude(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = Vec::with_capacity(n);
    out.push((values[1] - values[0]).abs());
    for i in 1..n - 1 {
        out.push(((values[i + 1] - values[i - 1]) / 2.0).abs());
    }
    out.push((values[n - 1] - values[n - 2]).abs());
    out
}

/// Gaussian smoothing with kernel radius `round(4 * sigma)` and mirrored edges
/// (`d c b a | a b c d | d c b a`).
pub fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    let n = values.len();
    if n == 0 || sigma <= 0.0 {
        return values.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= norm);

    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * values[reflect_index(i + k as isize - radius, n)])
                .sum()
        })
        .collect()
}

fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Percentile (0-100) with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
