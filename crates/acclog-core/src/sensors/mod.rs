//! Sensor abstraction
//!
//! The logger only carries one sensor today, but the sampler is written
//! against [`Sensor`] so tests can substitute a scripted source.

mod accelerometer;

pub use accelerometer::Accelerometer;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} initialization failed: {details}")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor} {operation} failed: {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor} reported device id {id:#04x}")]
    WrongDevice { sensor: &'static str, id: u8 },
}

/// Trait for sensors that produce typed readings.
pub trait Sensor {
    /// The type of readings this sensor produces.
    type Readings;

    /// Read the sensor and return typed readings.
    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}
