//! Settings that can be changed at runtime from the web interface
//!
//! They start out as the compile-time defaults from [`crate::config`] and are
//! persisted on the SD card with postcard, behind a one byte format version.

use alloc::vec::Vec;

use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::config::{self, MMA_DATARATE, MMA_RANGE, SAMPLE_INTERVAL_MS_DEFAULT};
use crate::mma8451::{DataRate, Range};

const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub sample_interval_ms: u32,
    pub range: Range,
    pub data_rate: DataRate,
    /// Start recording as soon as the device boots
    pub auto_start: bool,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    #[error("sample interval of {0} ms is outside 1..=60000")]
    InvalidInterval(u32),
    #[error("sampling every {0} ms is faster than the selected data rate")]
    FasterThanDataRate(u32),
    #[error("unknown setting")]
    UnknownKey,
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),
    #[error("malformed query")]
    MalformedQuery,
}

impl Default for Settings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Settings {
    pub const DEFAULT: Self = Self {
        sample_interval_ms: SAMPLE_INTERVAL_MS_DEFAULT,
        range: MMA_RANGE,
        data_rate: MMA_DATARATE,
        auto_start: false,
    };

    pub const MAX_INTERVAL_MS: u32 = 60_000;

    /// Upper bound of [`Settings::to_bytes`]
    pub const MAX_ENCODED_LEN: usize = 16;

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sample_interval_ms == 0 || self.sample_interval_ms > Self::MAX_INTERVAL_MS {
            return Err(SettingsError::InvalidInterval(self.sample_interval_ms));
        }
        if !config::interval_within_rate(self.sample_interval_ms, self.data_rate) {
            return Err(SettingsError::FasterThanDataRate(self.sample_interval_ms));
        }
        Ok(())
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms as u64)
    }

    /// Sampling frequency in Hz
    pub fn sample_rate_hz(&self) -> f32 {
        1000.0 / self.sample_interval_ms as f32
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        let mut bytes = postcard::to_allocvec(self)?;
        bytes.insert(0, FORMAT_VERSION);
        Ok(bytes)
    }

    /// Decode persisted settings, falling back to defaults when the data is
    /// corrupt, from another format version or no longer valid
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let Some((&version, body)) = bytes.split_first() else {
            return Self::DEFAULT;
        };
        if version != FORMAT_VERSION {
            log::warn!("Ignoring settings with format version {}", version);
            return Self::DEFAULT;
        }

        match postcard::from_bytes::<Settings>(body) {
            Ok(settings) if settings.validate().is_ok() => settings,
            Ok(_) => {
                log::warn!("Stored settings are out of range, using defaults");
                Self::DEFAULT
            }
            Err(e) => {
                log::warn!("Stored settings are corrupt ({:?}), using defaults", e);
                Self::DEFAULT
            }
        }
    }

    /// Apply `key=value` pairs from an HTTP query string
    ///
    /// Accepted keys are `interval_ms`, `range` (2, 4 or 8), `rate` (Hz as
    /// listed by [`DataRate::label`]) and `auto_start` (on/off, 1/0,
    /// true/false). Either every pair is applied or none is. Returns whether
    /// anything changed.
    pub fn apply_query(&mut self, query: &str) -> Result<bool, SettingsError> {
        let mut updated = *self;

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or(SettingsError::MalformedQuery)?;
            match key {
                "interval_ms" => {
                    updated.sample_interval_ms = value
                        .parse()
                        .map_err(|_| SettingsError::InvalidValue("interval_ms"))?;
                }
                "range" => {
                    updated.range = value
                        .parse()
                        .ok()
                        .and_then(Range::from_g)
                        .ok_or(SettingsError::InvalidValue("range"))?;
                }
                "rate" => {
                    updated.data_rate =
                        DataRate::from_label(value).ok_or(SettingsError::InvalidValue("rate"))?;
                }
                "auto_start" => {
                    updated.auto_start =
                        parse_flag(value).ok_or(SettingsError::InvalidValue("auto_start"))?;
                }
                _ => return Err(SettingsError::UnknownKey),
            }
        }

        updated.validate()?;
        let changed = updated != *self;
        *self = updated;
        Ok(changed)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "on" | "true" => Some(true),
        "0" | "off" | "false" => Some(false),
        _ => None,
    }
}
