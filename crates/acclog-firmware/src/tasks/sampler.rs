//! Fixed-rate sampling task
//!
//! Owns the accelerometer. Samples go to the writer through
//! `SAMPLE_CHANNEL` without waiting, so a slow SD card costs samples but
//! never stretches the sampling period.

use acclog_core::app_state::{CONTROL_CHANNEL, Control, LogRecord, RunState, SAMPLE_CHANNEL, STATUS};
use acclog_core::sampler::Sampler;
use acclog_core::settings::Settings;
use embassy_futures::select::{Either, select};
use embassy_time::Ticker;
use log::{info, warn};

use super::now_ms;
use crate::app_state::AccelSensor;

struct SamplerTask {
    sampler: Sampler<AccelSensor>,
    settings: Settings,
    recording: bool,
}

impl SamplerTask {
    async fn start(&mut self) {
        if self.recording {
            return;
        }
        SAMPLE_CHANNEL.send(LogRecord::SessionStart).await;
        self.sampler.start(now_ms());
        self.recording = true;

        STATUS.update(|s| {
            s.recording = true;
            s.run_state = RunState::Recording;
            s.stats = Default::default();
            s.last_error = None;
        });
        info!("Recording started at {} Hz", self.settings.sample_rate_hz());
    }

    async fn stop(&mut self) {
        if !self.recording {
            return;
        }
        self.recording = false;
        SAMPLE_CHANNEL.send(LogRecord::SessionEnd).await;

        let stats = self.sampler.stats();
        STATUS.update(|s| {
            s.recording = false;
            if s.run_state == RunState::Recording {
                s.run_state = RunState::Idle;
            }
        });
        info!(
            "Recording stopped: {} samples, {} dropped, {} overruns",
            stats.samples, stats.dropped, stats.overruns
        );
    }

    async fn apply(&mut self, settings: Settings) {
        if settings.range != self.settings.range || settings.data_rate != self.settings.data_rate {
            if let Err(e) = self
                .sampler
                .sensor_mut()
                .reconfigure(settings.range, settings.data_rate)
                .await
            {
                warn!("Sensor reconfigure failed: {}", e);
                STATUS.update(|s| s.sensor_ready = false);
            }
        }
        self.sampler.set_interval(settings.sample_interval_ms);
        self.settings = settings;
        STATUS.update(|s| s.settings = settings);
        info!("Settings applied: {:?}", settings);
    }

    async fn tick(&mut self) {
        match self.sampler.sample(now_ms()).await {
            Ok(sample) => {
                if SAMPLE_CHANNEL.try_send(LogRecord::Sample(sample)).is_err() {
                    self.sampler.record_drop();
                    STATUS.update(|s| s.stats.dropped = s.stats.dropped.saturating_add(1));
                }
            }
            Err(e) => warn!("Sample read failed: {}", e),
        }

        let stats = self.sampler.stats();
        STATUS.update(|s| {
            s.stats.samples = stats.samples;
            s.stats.overruns = stats.overruns;
            s.stats.read_errors = stats.read_errors;
        });
    }
}

fn ticker_for(settings: &Settings) -> Ticker {
    Ticker::every(settings.sample_period())
}

#[embassy_executor::task]
pub async fn sampler_task(sensor: AccelSensor, settings: Settings) {
    let mut task = SamplerTask {
        sampler: Sampler::new(sensor, settings.sample_interval_ms),
        settings,
        recording: false,
    };
    let mut ticker = ticker_for(&settings);

    STATUS.update(|s| s.settings = settings);
    if settings.auto_start {
        task.start().await;
    }

    loop {
        match select(CONTROL_CHANNEL.receive(), ticker.next()).await {
            Either::First(Control::Start) => {
                task.start().await;
                ticker.reset();
            }
            Either::First(Control::Stop) => task.stop().await,
            Either::First(Control::Apply(new_settings)) => {
                task.apply(new_settings).await;
                ticker = ticker_for(&new_settings);
            }
            Either::Second(()) => {
                if task.recording {
                    task.tick().await;
                }
            }
        }
    }
}
