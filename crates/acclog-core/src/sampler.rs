//! Session timing for the sampling loop

use serde::Serialize;

use crate::mma8451::Acceleration;
use crate::sensors::{Sensor, SensorError};
use crate::storage::AccelSample;

/// Result of one sampling instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Milliseconds since the session started
    pub timedelta_ms: u32,
    /// Sampling periods skipped since the previous tick
    pub missed: u32,
}

/// Converts monotonic milliseconds into session-relative time stamps
#[derive(Debug, Clone, Copy)]
pub struct SampleClock {
    start_ms: u64,
    interval_ms: u32,
    last_tick_ms: Option<u64>,
}

impl SampleClock {
    pub const fn new(interval_ms: u32) -> Self {
        Self {
            start_ms: 0,
            interval_ms,
            last_tick_ms: None,
        }
    }

    /// Begin a session at `now_ms`
    pub fn start(&mut self, now_ms: u64) {
        self.start_ms = now_ms;
        self.last_tick_ms = None;
    }

    pub fn set_interval(&mut self, interval_ms: u32) {
        self.interval_ms = interval_ms.max(1);
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn tick(&mut self, now_ms: u64) -> Tick {
        let elapsed = now_ms.saturating_sub(self.start_ms);
        let timedelta_ms = u32::try_from(elapsed).unwrap_or(u32::MAX);

        let missed = match self.last_tick_ms {
            Some(last) => {
                let periods = now_ms.saturating_sub(last) / self.interval_ms.max(1) as u64;
                u32::try_from(periods.saturating_sub(1)).unwrap_or(u32::MAX)
            }
            None => 0,
        };
        self.last_tick_ms = Some(now_ms);

        Tick {
            timedelta_ms,
            missed,
        }
    }
}

/// Counters for one recording session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub samples: u32,
    /// Samples lost because the channel or the write buffer was full
    pub dropped: u32,
    /// Sampling periods skipped because a tick came late
    pub overruns: u32,
    pub read_errors: u32,
    pub bytes_written: u64,
    pub flushes: u32,
    pub write_errors: u32,
}

impl SessionStats {
    pub const fn new() -> Self {
        Self {
            samples: 0,
            dropped: 0,
            overruns: 0,
            read_errors: 0,
            bytes_written: 0,
            flushes: 0,
            write_errors: 0,
        }
    }

    pub fn record_flush(&mut self, bytes: usize) {
        self.flushes = self.flushes.saturating_add(1);
        self.bytes_written += bytes as u64;
    }
}

/// Sensor plus session clock: produces time-stamped samples
pub struct Sampler<S> {
    sensor: S,
    clock: SampleClock,
    stats: SessionStats,
}

impl<S> Sampler<S>
where
    S: Sensor<Readings = Acceleration>,
{
    pub fn new(sensor: S, interval_ms: u32) -> Self {
        Self {
            sensor,
            clock: SampleClock::new(interval_ms),
            stats: SessionStats::new(),
        }
    }

    pub fn start(&mut self, now_ms: u64) {
        self.clock.start(now_ms);
        self.stats = SessionStats::new();
    }

    pub fn set_interval(&mut self, interval_ms: u32) {
        self.clock.set_interval(interval_ms);
    }

    /// Read the sensor and stamp the reading with the session time
    pub async fn sample(&mut self, now_ms: u64) -> Result<AccelSample, SensorError> {
        let tick = self.clock.tick(now_ms);
        if tick.missed > 0 {
            self.stats.overruns = self.stats.overruns.saturating_add(tick.missed);
            log::warn!("Sampler overrun: {} periods skipped", tick.missed);
        }

        match self.sensor.read().await {
            Ok(acceleration) => {
                self.stats.samples = self.stats.samples.saturating_add(1);
                Ok(AccelSample::new(tick.timedelta_ms, acceleration))
            }
            Err(e) => {
                self.stats.read_errors = self.stats.read_errors.saturating_add(1);
                Err(e)
            }
        }
    }

    /// Count a sample that could not be handed on
    pub fn record_drop(&mut self) {
        self.stats.dropped = self.stats.dropped.saturating_add(1);
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}
