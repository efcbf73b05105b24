//! Hardware initialization for the logger
//!
//! The typed GPIO peripherals below must match the pin numbers in
//! `acclog_core::config`; the assertions make a mismatch a build error.

use acclog_core::config::{
    I2C_FREQ_HZ, I2C_SCL_PIN, I2C_SDA_PIN, SD_CS_PIN, SD_INIT_FREQ, SD_SPI_FREQ, SPI_MISO_PIN,
    SPI_MOSI_PIN, SPI_SCK_PIN,
};
use acclog_core::sensors::Accelerometer;
use acclog_core::storage::{FixedTimeSource, SdCardStorage};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use embedded_sdmmc::SdCard;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::i2c::master::Config as I2cConfig;
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use log::{error, info};

const _: () = assert!(I2C_SDA_PIN == 21 && I2C_SCL_PIN == 22);
const _: () = assert!(SPI_SCK_PIN == 18 && SPI_MISO_PIN == 19 && SPI_MOSI_PIN == 23);
const _: () = assert!(SD_CS_PIN == 5);

pub type I2cBus = esp_hal::i2c::master::I2c<'static, esp_hal::Async>;
pub type AccelSensor = Accelerometer<I2cBus, embassy_time::Delay>;

pub type SdSpiDevice = ExclusiveDevice<Spi<'static, esp_hal::Blocking>, Output<'static>, NoDelay>;
pub type SdStorage = SdCardStorage<SdCard<SdSpiDevice, Delay>, FixedTimeSource>;
/// The SD card is shared by the writer and the HTTP server
pub type StorageMutex = AsyncMutex<CriticalSectionRawMutex, SdStorage>;

/// Initialize the I2C bus hardware
///
/// Creates the I2C peripheral with proper configuration
pub fn create_i2c_bus(
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: esp_hal::peripherals::GPIO21<'static>,
    scl: esp_hal::peripherals::GPIO22<'static>,
) -> I2cBus {
    esp_hal::i2c::master::I2c::new(
        i2c0,
        I2cConfig::default().with_frequency(Rate::from_hz(I2C_FREQ_HZ)),
    )
    .unwrap()
    .with_sda(sda)
    .with_scl(scl)
    .into_async()
}

fn sd_spi_config(frequency_hz: u32) -> SpiConfig {
    SpiConfig::default()
        .with_frequency(Rate::from_hz(frequency_hz))
        .with_mode(Mode::_0)
}

/// Set up the VSPI bus for the SD card at the card-init clock
pub fn init_sd_card(
    spi3: esp_hal::peripherals::SPI3<'static>,
    sck: esp_hal::peripherals::GPIO18<'static>,
    miso: esp_hal::peripherals::GPIO19<'static>,
    mosi: esp_hal::peripherals::GPIO23<'static>,
    cs: esp_hal::peripherals::GPIO5<'static>,
) -> SdCard<SdSpiDevice, Delay> {
    let spi_bus = Spi::new(spi3, sd_spi_config(SD_INIT_FREQ))
        .unwrap()
        .with_sck(sck)
        .with_miso(miso)
        .with_mosi(mosi);

    let cs = Output::new(cs, Level::High, OutputConfig::default());
    let spi_device = ExclusiveDevice::new_no_delay(spi_bus, cs).unwrap();

    SdCard::new(spi_device, Delay::new())
}

/// Initialise the card and raise the SPI clock to `SD_SPI_FREQ`
///
/// Returns false when no usable card answered.
pub fn bring_up_sd_card(sd_card: &SdCard<SdSpiDevice, Delay>) -> bool {
    match sd_card.num_bytes() {
        Ok(bytes) => info!("SD card size: {} MB", bytes / (1024 * 1024)),
        Err(e) => {
            error!("SD card init failed: {:?}", e);
            return false;
        }
    }

    let config = sd_spi_config(SD_SPI_FREQ);
    match sd_card.spi(|device| device.bus_mut().apply_config(&config)) {
        Ok(()) => {
            info!("SD SPI clock raised to {} kHz", SD_SPI_FREQ / 1000);
            true
        }
        Err(e) => {
            error!("SD SPI reconfigure failed: {:?}", e);
            false
        }
    }
}
