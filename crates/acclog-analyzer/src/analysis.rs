//! Loading a recording and summarising it

use std::fmt::{self, Write as _};

use acclog_core::storage::{is_header, parse_row};
use anyhow::{Context, Result, bail};
use log::debug;

use crate::spectrum::{Peak, Spectrum};

/// Peaks listed per signal
const PEAK_COUNT: usize = 5;
/// Lowest bins left out of the peak search; they carry DC and drift
const AXIS_SKIP_BINS: usize = 2;
const MAGNITUDE_SKIP_BINS: usize = 1;

/// A CSV log split into columns
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Recording {
    pub t_ms: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    /// Rows that were missing values or could not be parsed
    pub skipped: usize,
}

impl Recording {
    /// Parse the contents of a log file
    ///
    /// The header line is optional; rows with unparsable or non-finite values
    /// are skipped and counted.
    pub fn parse(text: &str) -> Result<Self> {
        let mut recording = Self::default();
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

        match lines.next() {
            None => bail!("file is empty"),
            Some((_, line)) if is_header(line) => {}
            Some((n, line)) => recording.push_line(n, line),
        }
        for (n, line) in lines {
            recording.push_line(n, line);
        }

        if recording.is_empty() {
            bail!("no valid samples");
        }
        Ok(recording)
    }

    fn push_line(&mut self, line_no: usize, line: &str) {
        match parse_row(line) {
            Ok([t, x, y, z]) if [x, y, z].iter().all(|v| v.is_finite()) => {
                self.t_ms.push(t);
                self.x.push(x);
                self.y.push(y);
                self.z.push(z);
            }
            Ok(_) => {
                debug!("line {}: non-finite value", line_no + 1);
                self.skipped += 1;
            }
            Err(e) => {
                debug!("line {}: {}", line_no + 1, e);
                self.skipped += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.t_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t_ms.is_empty()
    }

    /// `sqrt(x² + y² + z²)` per sample
    pub fn magnitude(&self) -> Vec<f64> {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((x, y), z)| (x * x + y * y + z * z).sqrt())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate {
    pub fs_hz: f64,
    pub median_dt_ms: f64,
}

impl SampleRate {
    pub fn nyquist_hz(&self) -> f64 {
        self.fs_hz / 2.0
    }
}

/// Sampling rate from the median of the positive time steps
pub fn estimate_rate(t_ms: &[f64]) -> Result<SampleRate> {
    let mut steps: Vec<f64> = t_ms
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|dt| dt.is_finite() && *dt > 0.0)
        .collect();
    if steps.len() < 2 {
        bail!("not enough valid time steps to estimate the sampling rate");
    }

    steps.sort_by(f64::total_cmp);
    let mid = steps.len() / 2;
    let median_dt_ms = if steps.len() % 2 == 0 {
        (steps[mid - 1] + steps[mid]) / 2.0
    } else {
        steps[mid]
    };

    Ok(SampleRate {
        fs_hz: 1000.0 / median_dt_ms,
        median_dt_ms,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub rms: f64,
}

impl Stats {
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        Some(Self {
            mean: values.iter().sum::<f64>() / n,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            rms: (values.iter().map(|v| v * v).sum::<f64>() / n).sqrt(),
        })
    }
}

/// Everything printed for one signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalReport {
    pub name: &'static str,
    pub stats: Stats,
    /// Empty when the recording is too short for a spectrum
    pub peaks: Vec<Peak>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub samples: usize,
    pub skipped: usize,
    pub rate: SampleRate,
    pub max_freq_hz: Option<f64>,
    pub signals: Vec<SignalReport>,
}

pub fn analyze(recording: &Recording, max_freq_hz: Option<f64>) -> Result<Report> {
    let rate = estimate_rate(&recording.t_ms).context("estimating the sampling rate")?;
    let magnitude = recording.magnitude();

    let signals = [
        ("Xacc", &recording.x[..], AXIS_SKIP_BINS),
        ("Yacc", &recording.y[..], AXIS_SKIP_BINS),
        ("Zacc", &recording.z[..], AXIS_SKIP_BINS),
        ("AccMag", &magnitude[..], MAGNITUDE_SKIP_BINS),
    ]
    .into_iter()
    .filter_map(|(name, values, skip)| {
        let stats = Stats::of(values)?;
        let peaks = Spectrum::of(values, rate.fs_hz)
            .map(|s| s.peaks(skip, max_freq_hz, PEAK_COUNT))
            .unwrap_or_default();
        Some(SignalReport { name, stats, peaks })
    })
    .collect();

    Ok(Report {
        samples: recording.len(),
        skipped: recording.skipped,
        rate,
        max_freq_hz,
        signals,
    })
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Samples: {}", self.samples)?;
        if self.skipped > 0 {
            writeln!(f, "Skipped rows: {}", self.skipped)?;
        }
        writeln!(
            f,
            "Estimated fs: {:.3} Hz (median dt = {:.3} ms, Nyquist = {:.3} Hz)",
            self.rate.fs_hz,
            self.rate.median_dt_ms,
            self.rate.nyquist_hz()
        )?;

        for signal in &self.signals {
            let s = signal.stats;
            writeln!(f)?;
            writeln!(
                f,
                "{:<7} mean {:>9.4}  min {:>9.4}  max {:>9.4}  rms {:>9.4}  (m/s^2)",
                signal.name, s.mean, s.min, s.max, s.rms
            )?;

            if signal.peaks.is_empty() {
                writeln!(f, "        too few samples for a spectrum")?;
                continue;
            }
            let mut line = String::new();
            for peak in &signal.peaks {
                let _ = write!(line, "  {:.2} Hz ({:.4})", peak.freq_hz, peak.amplitude);
            }
            match self.max_freq_hz {
                Some(limit) => writeln!(f, "        peaks <= {:.1} Hz:{}", limit, line)?,
                None => writeln!(f, "        peaks:{}", line)?,
            }
        }
        Ok(())
    }
}
