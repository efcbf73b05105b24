use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use super::{Sensor, SensorError};
use crate::mma8451::{Acceleration, DataRate, Error, Mma8451, Range};

const NAME: &str = "MMA8451";

/// MMA8451 behind the [`Sensor`] trait, readings in m/s²
pub struct Accelerometer<I, D> {
    device: Mma8451<I, D>,
}

impl<I: I2c, D: DelayNs> Accelerometer<I, D> {
    pub fn new(i2c: I, delay: D) -> Self {
        Self {
            device: Mma8451::new(i2c, delay),
        }
    }

    /// Probe and configure the accelerometer
    pub async fn init(&mut self, range: Range, rate: DataRate) -> Result<(), SensorError> {
        self.device.init(range, rate).await.map_err(|e| {
            log::error!("MMA8451 init failed: {:?}", e);
            match e {
                Error::WrongDevice(id) => SensorError::WrongDevice { sensor: NAME, id },
                Error::ResetTimeout => SensorError::InitializationFailed {
                    sensor: NAME,
                    details: "software reset did not complete",
                },
                Error::I2c(_) => SensorError::InitializationFailed {
                    sensor: NAME,
                    details: "I2C communication error or sensor not responding",
                },
            }
        })?;

        log::info!(
            "MMA8451 ready: ±{} g at {} Hz",
            range.g(),
            rate.label()
        );
        Ok(())
    }

    /// Apply a new range and data rate to a running device
    pub async fn reconfigure(&mut self, range: Range, rate: DataRate) -> Result<(), SensorError> {
        let to_error = |e: Error<I::Error>| {
            log::error!("MMA8451 reconfigure failed: {:?}", e);
            SensorError::ReadFailed {
                sensor: NAME,
                operation: "reconfigure",
                details: "I2C communication error or sensor not responding",
            }
        };

        if self.device.range() != range {
            self.device.set_range(range).await.map_err(to_error)?;
        }
        self.device.set_data_rate(rate).await.map_err(to_error)?;
        Ok(())
    }

    pub fn range(&self) -> Range {
        self.device.range()
    }
}

impl<I: I2c, D: DelayNs> Sensor for Accelerometer<I, D> {
    type Readings = Acceleration;

    async fn read(&mut self) -> Result<Acceleration, SensorError> {
        self.device.read().await.map_err(|e| {
            log::error!("MMA8451 read failed: {:?}", e);
            SensorError::ReadFailed {
                sensor: NAME,
                operation: "read acceleration",
                details: "I2C communication error or sensor not responding",
            }
        })
    }
}
