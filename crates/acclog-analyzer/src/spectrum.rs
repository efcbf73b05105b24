//! Amplitude spectra of real signals
//!
//! The transform works for any length: powers of two go straight through an
//! in-place radix-2 FFT, other lengths are evaluated exactly with Bluestein's
//! chirp-z algorithm on top of it.

use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

/// Shortest signal a spectrum is computed for
pub const MIN_SAMPLES: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// `e^(i·angle)`
    pub fn from_angle(angle: f64) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    pub fn conj(self) -> Self {
        Self::new(self.re, -self.im)
    }

    pub fn norm(self) -> f64 {
        self.re.hypot(self.im)
    }

    fn scale(self, k: f64) -> Self {
        Self::new(self.re * k, self.im * k)
    }
}

impl Add for Complex {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// In-place radix-2 FFT; `data.len()` must be a power of two
fn fft_pow2(data: &mut [Complex], inverse: bool) {
    let n = data.len();
    debug_assert!(n.is_power_of_two());

    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            data.swap(i, j);
        }
    }

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let step = Complex::from_angle(sign * 2.0 * PI / len as f64);
        for start in (0..n).step_by(len) {
            let mut w = Complex::new(1.0, 0.0);
            for k in 0..len / 2 {
                let a = data[start + k];
                let b = data[start + k + len / 2] * w;
                data[start + k] = a + b;
                data[start + k + len / 2] = a - b;
                w = w * step;
            }
        }
        len <<= 1;
    }

    if inverse {
        let k = 1.0 / n as f64;
        data.iter_mut().for_each(|c| *c = c.scale(k));
    }
}

/// Discrete Fourier transform of any length
pub fn dft(input: &[Complex]) -> Vec<Complex> {
    let n = input.len();
    if n <= 1 {
        return input.to_vec();
    }
    if n.is_power_of_two() {
        let mut data = input.to_vec();
        fft_pow2(&mut data, false);
        return data;
    }

    // chirp w_k = e^(-iπk²/n); k² is reduced mod 2n to keep the angle small
    let chirp: Vec<Complex> = (0..n)
        .map(|k| {
            let k2 = (k as u128 * k as u128 % (2 * n as u128)) as f64;
            Complex::from_angle(-PI * k2 / n as f64)
        })
        .collect();

    let m = (2 * n - 1).next_power_of_two();
    let mut a = vec![Complex::default(); m];
    for (k, (x, w)) in input.iter().zip(&chirp).enumerate() {
        a[k] = *x * *w;
    }

    let mut b = vec![Complex::default(); m];
    b[0] = chirp[0].conj();
    for k in 1..n {
        b[k] = chirp[k].conj();
        b[m - k] = chirp[k].conj();
    }

    fft_pow2(&mut a, false);
    fft_pow2(&mut b, false);
    for (x, y) in a.iter_mut().zip(&b) {
        *x = *x * *y;
    }
    fft_pow2(&mut a, true);

    a.iter().zip(&chirp).take(n).map(|(x, w)| *x * *w).collect()
}

/// Symmetric Hann window of length `n`, zero at both ends
pub fn hann(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}

/// One-sided amplitude spectrum
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Bin centre frequencies in Hz, `0..=fs/2`
    pub freqs: Vec<f64>,
    pub amplitudes: Vec<f64>,
}

impl Spectrum {
    /// Hann-windowed spectrum of `signal` sampled at `fs_hz`
    ///
    /// Amplitudes are corrected for the window's coherent gain, so a sine of
    /// amplitude A that falls on a bin shows up as roughly A.
    pub fn of(signal: &[f64], fs_hz: f64) -> Option<Self> {
        let n = signal.len();
        if n < MIN_SAMPLES {
            return None;
        }

        let window = hann(n);
        let coherent_gain = window.iter().sum::<f64>() / n as f64;
        let windowed: Vec<Complex> = signal
            .iter()
            .zip(&window)
            .map(|(x, w)| Complex::new(x * w, 0.0))
            .collect();

        let bins = n / 2 + 1;
        let amplitudes = dft(&windowed)
            .into_iter()
            .take(bins)
            .map(|c| c.norm() / n as f64 * (2.0 / coherent_gain))
            .collect();
        let freqs = (0..bins).map(|k| k as f64 * fs_hz / n as f64).collect();

        Some(Self { freqs, amplitudes })
    }

    /// Strongest local maxima, skipping the first `skip_bins` bins and
    /// anything above `max_freq_hz`
    pub fn peaks(&self, skip_bins: usize, max_freq_hz: Option<f64>, count: usize) -> Vec<Peak> {
        let limit = max_freq_hz.unwrap_or(f64::INFINITY);
        let amps = &self.amplitudes;

        let mut peaks: Vec<Peak> = (skip_bins..amps.len())
            .filter(|&k| self.freqs[k] <= limit)
            .filter(|&k| {
                let left = k == 0 || amps[k] >= amps[k - 1];
                let right = k + 1 >= amps.len() || amps[k] >= amps[k + 1];
                left && right
            })
            .map(|k| Peak {
                freq_hz: self.freqs[k],
                amplitude: amps[k],
            })
            .collect();

        peaks.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));
        peaks.truncate(count);
        peaks
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub freq_hz: f64,
    pub amplitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dft(input: &[Complex]) -> Vec<Complex> {
        let n = input.len();
        (0..n)
            .map(|k| {
                input.iter().enumerate().fold(Complex::default(), |acc, (t, x)| {
                    acc + *x * Complex::from_angle(-2.0 * PI * (k * t) as f64 / n as f64)
                })
            })
            .collect()
    }

    fn assert_close(a: &[Complex], b: &[Complex]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((*x - *y).norm() < 1e-9, "{x:?} != {y:?}");
        }
    }

    fn ramp(n: usize) -> Vec<Complex> {
        (0..n)
            .map(|i| Complex::new((i as f64 * 0.7).sin() + i as f64 * 0.1, (i % 3) as f64))
            .collect()
    }

    #[test]
    fn power_of_two_matches_naive_dft() {
        let input = ramp(16);
        assert_close(&dft(&input), &naive_dft(&input));
    }

    #[test]
    fn other_lengths_match_naive_dft() {
        for n in [3, 10, 12, 37, 100] {
            let input = ramp(n);
            assert_close(&dft(&input), &naive_dft(&input));
        }
    }

    #[test]
    fn hann_window_shape() {
        let w = hann(5);
        assert!(w[0].abs() < 1e-12 && w[4].abs() < 1e-12);
        assert!((w[2] - 1.0).abs() < 1e-12);
        assert!((w[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn too_short_for_a_spectrum() {
        assert_eq!(Spectrum::of(&[1.0; 7], 100.0), None);
        assert!(Spectrum::of(&[1.0; 8], 100.0).is_some());
    }

    #[test]
    fn sine_on_a_bin_has_its_amplitude() {
        // 200 samples at 100 Hz: bins are 0.5 Hz apart, 10 Hz is bin 20
        let fs = 100.0;
        let signal: Vec<f64> = (0..200)
            .map(|i| 2.0 * (2.0 * PI * 10.0 * i as f64 / fs).sin())
            .collect();
        let spectrum = Spectrum::of(&signal, fs).unwrap();

        assert_eq!(spectrum.freqs.len(), 101);
        assert!((spectrum.freqs[100] - 50.0).abs() < 1e-9);

        let peak = spectrum.peaks(2, None, 1)[0];
        assert!((peak.freq_hz - 10.0).abs() < 1e-9);
        assert!((peak.amplitude - 2.0).abs() < 0.05, "{}", peak.amplitude);
    }

    #[test]
    fn peaks_respect_frequency_limit() {
        let fs = 100.0;
        let signal: Vec<f64> = (0..256)
            .map(|i| {
                let t = i as f64 / fs;
                (2.0 * PI * 5.0 * t).sin() + 3.0 * (2.0 * PI * 40.0 * t).sin()
            })
            .collect();
        let spectrum = Spectrum::of(&signal, fs).unwrap();

        let all = spectrum.peaks(2, None, 2);
        assert!((all[0].freq_hz - 40.0).abs() < 0.5);

        let limited = spectrum.peaks(2, Some(20.0), 1);
        assert!((limited[0].freq_hz - 5.0).abs() < 0.5);
    }
}
