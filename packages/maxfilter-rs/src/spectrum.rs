//! Welch power spectral density, used by the report's raw vs. filtered figure.

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;
use std::cell::RefCell;
use std::f64::consts::PI;

thread_local! {
    static FFT_PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

const MIN_SAMPLES: usize = 16;
pub const DEFAULT_N_FFT: usize = 2048;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSpectrum {
    pub frequencies: Vec<f64>,
    pub power: Vec<f64>,
}

fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

fn largest_pow2_at_most(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}

/// One-sided Welch PSD (Hann window, 50% overlap, per-segment mean removed),
/// linear units per Hz. `None` if the signal is too short.
pub fn welch_psd(signal: &[f64], sample_rate: f64, n_fft: usize) -> Option<PowerSpectrum> {
    let n_fft = n_fft.min(largest_pow2_at_most(signal.len()));
    if n_fft < MIN_SAMPLES || sample_rate <= 0.0 {
        return None;
    }

    let window = hann(n_fft);
    let scale = 1.0 / (sample_rate * window.iter().map(|w| w * w).sum::<f64>());
    let step = n_fft / 2;
    let n_positive = n_fft / 2 + 1;
    let mut accum = vec![0.0; n_positive];
    let mut n_segments = 0usize;

    let mut start = 0;
    while start + n_fft <= signal.len() {
        let chunk = &signal[start..start + n_fft];
        let mean = chunk.iter().sum::<f64>() / n_fft as f64;
        let mut buffer: Vec<Complex<f64>> = chunk
            .iter()
            .zip(&window)
            .map(|(x, w)| Complex::new((x - mean) * w, 0.0))
            .collect();

        FFT_PLANNER.with(|planner| {
            let fft = planner.borrow_mut().plan_fft_forward(n_fft);
            fft.process(&mut buffer);
        });

        for (acc, c) in accum.iter_mut().zip(&buffer[..n_positive]) {
            *acc += c.norm_sqr();
        }
        n_segments += 1;
        start += step;
    }

    let last = n_positive - 1;
    let power = accum
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let one_sided = if i == 0 || i == last { 1.0 } else { 2.0 };
            p * scale * one_sided / n_segments as f64
        })
        .collect();

    let freq_resolution = sample_rate / n_fft as f64;
    Some(PowerSpectrum {
        frequencies: (0..n_positive).map(|i| i as f64 * freq_resolution).collect(),
        power,
    })
}

/// Channel-averaged PSD in dB, limited to `fmax`. `None` when there is no
/// renderable frequency content.
pub fn mean_psd_db(
    data: &[Vec<f64>],
    channels: &[usize],
    sample_rate: f64,
    fmax: Option<f64>,
) -> Option<PowerSpectrum> {
    let spectra: Vec<PowerSpectrum> = channels
        .par_iter()
        .filter_map(|&i| data.get(i))
        .filter_map(|signal| welch_psd(signal, sample_rate, DEFAULT_N_FFT))
        .collect();

    let first = spectra.first()?;
    let n_bins = first
        .frequencies
        .iter()
        .take_while(|&&f| fmax.map_or(true, |m| f <= m))
        .count();

    let mut mean = vec![0.0; n_bins];
    for spectrum in &spectra {
        for (m, p) in mean.iter_mut().zip(&spectrum.power) {
            *m += p / spectra.len() as f64;
        }
    }

    // DC is removed by detrending, so it never counts as content
    if !mean.iter().skip(1).any(|&p| p > 0.0 && p.is_finite()) {
        return None;
    }

    let floor = mean
        .iter()
        .copied()
        .filter(|&p| p > 0.0)
        .fold(f64::INFINITY, f64::min);
    Some(PowerSpectrum {
        frequencies: first.frequencies[..n_bins].to_vec(),
        power: mean
            .iter()
            .map(|&p| 10.0 * p.max(floor).log10())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_sine_peak_frequency() {
        let psd = welch_psd(&sine(10.0, 200.0, 4096), 200.0, 512).unwrap();
        let (peak, _) = psd
            .power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert!((psd.frequencies[peak] - 10.0).abs() < 200.0 / 512.0);
        assert_eq!(psd.frequencies.len(), 257);
    }

    #[test]
    fn test_parseval_scale() {
        // Unit-amplitude sine carries 0.5 power
        let fs = 256.0;
        let psd = welch_psd(&sine(32.0, fs, 8192), fs, 256).unwrap();
        let df = psd.frequencies[1];
        let total: f64 = psd.power.iter().sum::<f64>() * df;
        assert!((total - 0.5).abs() < 0.05, "total power {}", total);
    }

    #[test]
    fn test_short_signal_has_no_spectrum() {
        assert!(welch_psd(&[1.0; 8], 100.0, 256).is_none());
    }

    #[test]
    fn test_flat_signal_not_renderable() {
        let data = vec![vec![3.0; 1024]; 2];
        assert!(mean_psd_db(&data, &[0, 1], 100.0, None).is_none());
    }

    #[test]
    fn test_mean_psd_respects_fmax() {
        let data = vec![sine(5.0, 100.0, 2048), sine(20.0, 100.0, 2048)];
        let psd = mean_psd_db(&data, &[0, 1], 100.0, Some(25.0)).unwrap();
        assert!(psd.frequencies.iter().all(|&f| f <= 25.0));
        assert!(psd.power.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_no_channels_no_spectrum() {
        let data = vec![sine(5.0, 100.0, 2048)];
        assert!(mean_psd_db(&data, &[], 100.0, None).is_none());
    }
}
