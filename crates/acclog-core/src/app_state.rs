//! Application-wide state and error types shared by the firmware tasks

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use thiserror_no_std::Error;

use crate::config::{ConfigError, SAMPLE_CHANNEL_DEPTH};
use crate::network::NetworkInfo;
use crate::sampler::SessionStats;
use crate::sensors::SensorError;
use crate::settings::Settings;
use crate::storage::{AccelSample, LogName};

/// What travels from the sampler to the SD writer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogRecord {
    /// Open a new log file
    SessionStart,
    Sample(AccelSample),
    /// Flush and close the current log file
    SessionEnd,
}

/// Commands from the web interface to the sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Start,
    Stop,
    Apply(Settings),
}

pub const CONTROL_CHANNEL_DEPTH: usize = 4;

/// Sampler → writer queue
pub static SAMPLE_CHANNEL: Channel<CriticalSectionRawMutex, LogRecord, SAMPLE_CHANNEL_DEPTH> =
    Channel::new();

/// HTTP server → sampler queue
pub static CONTROL_CHANNEL: Channel<CriticalSectionRawMutex, Control, CONTROL_CHANNEL_DEPTH> =
    Channel::new();

/// Status shown on the web interface
pub static STATUS: SharedStatus = SharedStatus::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Booting,
    ConnectingStation,
    Station,
    AccessPoint,
    Recording,
    Idle,
    Error,
}

impl RunState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::ConnectingStation => "connecting",
            Self::Station => "station",
            Self::AccessPoint => "access-point",
            Self::Recording => "recording",
            Self::Idle => "idle",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub run_state: RunState,
    pub network: Option<NetworkInfo>,
    pub recording: bool,
    pub active_file: Option<LogName>,
    pub settings: Settings,
    pub stats: SessionStats,
    pub sd_ready: bool,
    pub sensor_ready: bool,
    /// Most recent failure worth showing on the web interface
    pub last_error: Option<heapless::String<64>>,
}

impl StatusSnapshot {
    pub const fn new() -> Self {
        Self {
            run_state: RunState::Booting,
            network: None,
            recording: false,
            active_file: None,
            settings: Settings::DEFAULT,
            stats: SessionStats::new(),
            sd_ready: false,
            sensor_ready: false,
            last_error: None,
        }
    }

    /// A recording whose log file could not be created is abandoned
    pub fn log_open_failed(&mut self, error: &AppError) {
        self.sd_ready = false;
        self.recording = false;
        self.active_file = None;
        self.run_state = RunState::Error;
        self.last_error = Some(truncated(error));
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Status readable from any task without awaiting
pub struct SharedStatus {
    inner: BlockingMutex<CriticalSectionRawMutex, RefCell<StatusSnapshot>>,
}

impl SharedStatus {
    pub const fn new() -> Self {
        Self {
            inner: BlockingMutex::new(RefCell::new(StatusSnapshot::new())),
        }
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut StatusSnapshot) -> R) -> R {
        self.inner.lock(|status| f(&mut status.borrow_mut()))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock(|status| status.borrow().clone())
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("WiFi connection failed: {0}")]
    Wifi(heapless::String<64>),
    #[error("SD card error: {0}")]
    Storage(heapless::String<64>),
    #[error("Sensor error: {0}")]
    Sensor(SensorError),
    #[error("Invalid configuration: {0}")]
    Config(ConfigError),
}

impl From<SensorError> for AppError {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl AppError {
    /// Storage error with a message truncated to fit
    pub fn storage(details: impl core::fmt::Display) -> Self {
        Self::Storage(truncated(details))
    }

    pub fn wifi(details: impl core::fmt::Display) -> Self {
        Self::Wifi(truncated(details))
    }
}

fn truncated<const N: usize>(details: impl core::fmt::Display) -> heapless::String<N> {
    use core::fmt::Write;

    struct Truncating<'a, const N: usize>(&'a mut heapless::String<N>);

    impl<const N: usize> Write for Truncating<'_, N> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            for c in s.chars() {
                if self.0.push(c).is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    let mut out = heapless::String::new();
    let _ = write!(Truncating(&mut out), "{}", details);
    out
}
