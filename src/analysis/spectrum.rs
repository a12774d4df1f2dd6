//! Frequency-domain level metering
//!
//! Mirrors the behaviour of a web audio analyser node: Blackman-windowed
//! FFT, exponential smoothing of bin magnitudes across calls, then a
//! decibel mapping onto `0..=255`.

use std::f32::consts::PI;
use thiserror::Error;

/// Smallest supported FFT size
pub const MIN_FFT_SIZE: usize = 32;

/// Largest supported FFT size
pub const MAX_FFT_SIZE: usize = 32_768;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Invalid analyser parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyserError {
    #[error("fft size must be a power of two in 32..=32768, got {0}")]
    FftSize(usize),

    #[error("smoothing time constant must be within 0..=1, got {0}")]
    Smoothing(f32),
}

/// Spectrum analyser over a window of mono samples
#[derive(Debug, Clone)]
pub struct SpectrumAnalyser {
    fft_size: usize,
    smoothing: f32,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    samples: Vec<f32>,
    re: Vec<f32>,
    im: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize, smoothing_time_constant: f32) -> Result<Self, AnalyserError> {
        if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
            return Err(AnalyserError::FftSize(fft_size));
        }
        if !(0.0..=1.0).contains(&smoothing_time_constant) {
            return Err(AnalyserError::Smoothing(smoothing_time_constant));
        }

        Ok(Self {
            fft_size,
            smoothing: smoothing_time_constant,
            window: blackman(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            samples: vec![0.0; fft_size],
            re: vec![0.0; fft_size],
            im: vec![0.0; fft_size],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Forget the smoothing history
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }

    /// Analyse the most recent `fft_size` samples into byte magnitudes.
    ///
    /// `samples` shorter than the FFT size are left-padded with silence;
    /// longer input uses only its tail. `out` receives at most
    /// [`frequency_bin_count`](Self::frequency_bin_count) values.
    pub fn byte_frequency_data(&mut self, samples: &[f32], out: &mut [u8]) {
        let n = self.fft_size;
        let tail = &samples[samples.len().saturating_sub(n)..];
        let pad = n - tail.len();
        self.samples[..pad].fill(0.0);
        self.samples[pad..].copy_from_slice(tail);

        for i in 0..n {
            self.re[i] = self.samples[i] * self.window[i];
            self.im[i] = 0.0;
        }
        fft_in_place(&mut self.re, &mut self.im);

        let scale = 1.0 / n as f32;
        let tau = self.smoothing;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = (self.re[k] * self.re[k] + self.im[k] * self.im[k]).sqrt() * scale;
            let next = tau * *smoothed + (1.0 - tau) * magnitude;
            *smoothed = if next.is_finite() { next } else { 0.0 };
        }

        for (byte, magnitude) in out.iter_mut().zip(self.smoothed.iter()) {
            *byte = to_byte(*magnitude);
        }
    }

    /// Analyse `samples` and return the mean byte magnitude across all bins
    pub fn level(&mut self, samples: &[f32]) -> f32 {
        let mut bins = vec![0u8; self.frequency_bin_count()];
        self.byte_frequency_data(samples, &mut bins);
        bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman(n: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Iterative radix-2 FFT; `re.len()` must be a power of two
fn fft_in_place(re: &mut [f32], im: &mut [f32]) {
    let n = re.len();

    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f32;
        let (w_im, w_re) = angle.sin_cos();
        for start in (0..n).step_by(len) {
            let (mut cur_re, mut cur_im) = (1.0f32, 0.0f32);
            for k in 0..len / 2 {
                let a = start + k;
                let b = a + len / 2;
                let t_re = re[b] * cur_re - im[b] * cur_im;
                let t_im = re[b] * cur_im + im[b] * cur_re;
                re[b] = re[a] - t_re;
                im[b] = im[a] - t_im;
                re[a] += t_re;
                im[a] += t_im;
                let next_re = cur_re * w_re - cur_im * w_im;
                cur_im = cur_re * w_im + cur_im * w_re;
                cur_re = next_re;
            }
        }
        len <<= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(n: usize, cycles: f32, amplitude: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * cycles * i as f32 / n as f32).sin())
            .collect()
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert_eq!(
            SpectrumAnalyser::new(300, 0.8).unwrap_err(),
            AnalyserError::FftSize(300)
        );
        assert_eq!(
            SpectrumAnalyser::new(16, 0.8).unwrap_err(),
            AnalyserError::FftSize(16)
        );
        assert!(matches!(
            SpectrumAnalyser::new(256, 1.5),
            Err(AnalyserError::Smoothing(_))
        ));
    }

    #[test]
    fn test_bin_count_is_half_fft_size() {
        let analyser = SpectrumAnalyser::new(256, 0.8).unwrap();
        assert_eq!(analyser.frequency_bin_count(), 128);
    }

    #[test]
    fn test_silence_reads_zero() {
        let mut analyser = SpectrumAnalyser::new(256, 0.0).unwrap();
        assert_eq!(analyser.level(&[0.0; 256]), 0.0);
    }

    #[test]
    fn test_tone_peaks_in_its_bin() {
        let mut analyser = SpectrumAnalyser::new(256, 0.0).unwrap();
        let mut bins = vec![0u8; 128];
        analyser.byte_frequency_data(&sine(256, 16.0, 0.01), &mut bins);

        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 16);
        assert!(bins[16] > bins[15] && bins[16] < 255);
        assert_eq!(bins[100], 0);
    }

    #[test]
    fn test_louder_tone_reads_higher() {
        let mut quiet = SpectrumAnalyser::new(256, 0.0).unwrap();
        let mut loud = SpectrumAnalyser::new(256, 0.0).unwrap();
        let quiet_level = quiet.level(&sine(256, 16.0, 0.001));
        let loud_level = loud.level(&sine(256, 16.0, 0.5));
        assert!(loud_level > quiet_level);
        assert!(quiet_level > 0.0);
    }

    #[test]
    fn test_smoothing_decays_towards_silence() {
        let mut analyser = SpectrumAnalyser::new(256, 0.8).unwrap();
        let tone = sine(256, 16.0, 0.5);
        let first = analyser.level(&tone);
        let after = analyser.level(&[0.0; 256]);
        assert!(after > 0.0);
        assert!(after <= first);

        analyser.reset();
        assert_eq!(analyser.level(&[0.0; 256]), 0.0);
    }

    #[test]
    fn test_short_input_is_padded() {
        let mut analyser = SpectrumAnalyser::new(64, 0.0).unwrap();
        let mut bins = vec![0u8; 32];
        analyser.byte_frequency_data(&[0.0; 10], &mut bins);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fft_of_impulse_is_flat() {
        let mut re = vec![0.0f32; 8];
        let mut im = vec![0.0f32; 8];
        re[0] = 1.0;
        fft_in_place(&mut re, &mut im);
        for k in 0..8 {
            assert!((re[k] - 1.0).abs() < 1e-6);
            assert!(im[k].abs() < 1e-6);
        }
    }
}
