//! Offline analysis of CSV logs recorded by the acclog firmware.
//!
//! Prints the estimated sampling rate, per-axis statistics and the strongest
//! spectral peaks of each axis and of the acceleration magnitude.
//!
//! ```text
//! acclog-analyzer LOG00001.CSV [max_freq_hz]
//! ```
//!
//! Set `RUST_LOG=debug` to see which rows were skipped.

mod analysis;
mod spectrum;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use log::info;

use analysis::{Recording, analyze};

fn parse_args() -> Result<(PathBuf, Option<f64>)> {
    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: acclog-analyzer <file.csv> [max_freq_hz]");
    };

    let max_freq_hz = match args.next() {
        None => None,
        Some(arg) => {
            let limit: f64 = arg
                .parse()
                .with_context(|| format!("invalid max_freq_hz: {arg}"))?;
            if !(limit.is_finite() && limit > 0.0) {
                bail!("max_freq_hz must be positive");
            }
            Some(limit)
        }
    };
    Ok((PathBuf::from(path), max_freq_hz))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (path, max_freq_hz) = parse_args()?;
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;

    let recording = Recording::parse(&text).with_context(|| format!("parsing {}", path.display()))?;
    info!("Loaded {} samples from {}", recording.len(), path.display());

    let report = analyze(&recording, max_freq_hz)?;
    println!("File: {}", path.display());
    print!("{report}");
    Ok(())
}
