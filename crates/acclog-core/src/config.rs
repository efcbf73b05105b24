//! Static configuration for the accelerometer logger
//!
//! GPIO |   Function    | Notes
//! -----+---------------+-------------------------------------------
//!  21  | I2C SDA       | MMA8451 data
//!  22  | I2C SCL       | MMA8451 clock
//!  18  | SPI SCK       | VSPI clock to the SD card
//!  19  | SPI MISO      | VSPI data from the SD card
//!  23  | SPI MOSI      | VSPI data to the SD card
//!   5  | SD CS         | SD card chip select
//!
//! Every value here is fixed at compile time. The table is checked by a
//! `const` assertion so an inconsistent edit fails the build; [`validate`]
//! runs the same checks at runtime and reports which rule was broken.

use core::net::Ipv4Addr;

use thiserror_no_std::Error;

use crate::mma8451::{DataRate, Range};

// ----- I2C (MMA8451) -----
pub const I2C_SDA_PIN: u8 = 21;
pub const I2C_SCL_PIN: u8 = 22;
pub const I2C_FREQ_HZ: u32 = 400 * 1000;

// ----- SD card (SPI) -----
pub const SPI_SCK_PIN: u8 = 18;
pub const SPI_MISO_PIN: u8 = 19;
pub const SPI_MOSI_PIN: u8 = 23;
pub const SD_CS_PIN: u8 = 5;

/// SD SPI clock once the card is initialised. 20 MHz is safe for most modules.
pub const SD_SPI_FREQ: u32 = 20 * 1000 * 1000;
/// SD cards must be brought up at 400 kHz or less
pub const SD_INIT_FREQ: u32 = 400 * 1000;

// ----- Sampling -----
pub const SAMPLE_INTERVAL_MS_DEFAULT: u32 = 20; // 50 Hz
pub const FILE_FLUSH_MS: u32 = 1000; // bounds what a power cut can lose

/// RAM buffered between SD writes (eight sectors)
pub const WRITE_BUFFER_SIZE: usize = 4096;
/// Samples queued between the sampler and the writer
pub const SAMPLE_CHANNEL_DEPTH: usize = 64;

// ----- MMA8451 -----
pub const MMA_RANGE: Range = Range::G2;
pub const MMA_DATARATE: DataRate = DataRate::Hz100;

// ----- WiFi -----
pub const WIFI_CONNECT_TIMEOUT_MS: u32 = 10 * 1000;
pub const MDNS_NAME: &str = "esp32-acc"; // http://esp32-acc.local/
pub const AP_SSID: &str = "ESP32-ACC-LOGGER";
pub const AP_PASS: &str = "esp32logger";

/// Address of the device on its own access point network
pub const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
pub const AP_PREFIX_LEN: u8 = 24;

pub const HTTP_PORT: u16 = 80;

/// Current firmware version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ----- Hardware limits -----

/// Highest GPIO number on the ESP32
pub const GPIO_MAX: u8 = 39;
/// GPIO 6..=11 are wired to the SPI flash on every ESP32 module
pub const FLASH_PINS: core::ops::RangeInclusive<u8> = 6..=11;
/// GPIO 34..=39 have no output driver
pub const INPUT_ONLY_PINS: core::ops::RangeInclusive<u8> = 34..=39;
/// Maximum SD clock in SPI mode (default speed)
pub const SD_SPI_FREQ_MAX: u32 = 25 * 1000 * 1000;

pub const AP_PASS_MIN_LEN: usize = 8;
pub const AP_PASS_MAX_LEN: usize = 63;
pub const AP_SSID_MAX_LEN: usize = 32;
pub const DNS_LABEL_MAX_LEN: usize = 63;

/// How a pin is driven, which decides whether input-only GPIOs are acceptable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinAssignment {
    pub name: &'static str,
    pub gpio: u8,
    pub direction: PinDirection,
}

impl PinAssignment {
    pub const fn new(name: &'static str, gpio: u8, direction: PinDirection) -> Self {
        Self {
            name,
            gpio,
            direction,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GPIO{pin} is assigned to both {first} and {second}")]
    DuplicatePin {
        pin: u8,
        first: &'static str,
        second: &'static str,
    },
    #[error("{name} uses GPIO{pin}, which is not a usable ESP32 GPIO")]
    InvalidPin { name: &'static str, pin: u8 },
    #[error("{name} drives GPIO{pin}, which is input-only")]
    InputOnlyPin { name: &'static str, pin: u8 },
    #[error("SD SPI frequency of {0} Hz is outside 1..=25 MHz")]
    SpiFrequency(u32),
    #[error("access point passphrase must be 8 to 63 bytes, got {0}")]
    PassphraseLength(usize),
    #[error("access point SSID must be 1 to 32 bytes, got {0}")]
    SsidLength(usize),
    #[error("mDNS name is not a valid DNS label")]
    InvalidHostname,
    #[error("{0} must be positive")]
    ZeroInterval(&'static str),
    #[error("sampling every {interval_ms} ms is faster than the sensor output rate")]
    SampleFasterThanSensor { interval_ms: u32 },
    #[error("flush interval is shorter than the sample interval")]
    FlushBeforeSample,
}

/// Every compile-time setting that has a validity rule
#[derive(Debug, Clone, Copy)]
pub struct ConfigTable {
    pub pins: [PinAssignment; 6],
    pub sd_spi_freq: u32,
    pub sample_interval_ms: u32,
    pub flush_ms: u32,
    pub connect_timeout_ms: u32,
    pub data_rate: DataRate,
    pub mdns_name: &'static str,
    pub ap_ssid: &'static str,
    pub ap_pass: &'static str,
}

pub const CONFIG: ConfigTable = ConfigTable {
    pins: [
        PinAssignment::new("I2C_SDA_PIN", I2C_SDA_PIN, PinDirection::Bidirectional),
        PinAssignment::new("I2C_SCL_PIN", I2C_SCL_PIN, PinDirection::Output),
        PinAssignment::new("SPI_SCK_PIN", SPI_SCK_PIN, PinDirection::Output),
        PinAssignment::new("SPI_MISO_PIN", SPI_MISO_PIN, PinDirection::Input),
        PinAssignment::new("SPI_MOSI_PIN", SPI_MOSI_PIN, PinDirection::Output),
        PinAssignment::new("SD_CS_PIN", SD_CS_PIN, PinDirection::Output),
    ],
    sd_spi_freq: SD_SPI_FREQ,
    sample_interval_ms: SAMPLE_INTERVAL_MS_DEFAULT,
    flush_ms: FILE_FLUSH_MS,
    connect_timeout_ms: WIFI_CONNECT_TIMEOUT_MS,
    data_rate: MMA_DATARATE,
    mdns_name: MDNS_NAME,
    ap_ssid: AP_SSID,
    ap_pass: AP_PASS,
};

const _: () = assert!(CONFIG.validate().is_ok(), "invalid acclog configuration");

impl ConfigTable {
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = check_pins(&self.pins) {
            return Err(e);
        }

        if self.sd_spi_freq == 0 || self.sd_spi_freq > SD_SPI_FREQ_MAX {
            return Err(ConfigError::SpiFrequency(self.sd_spi_freq));
        }

        if self.ap_pass.len() < AP_PASS_MIN_LEN || self.ap_pass.len() > AP_PASS_MAX_LEN {
            return Err(ConfigError::PassphraseLength(self.ap_pass.len()));
        }
        if self.ap_ssid.is_empty() || self.ap_ssid.len() > AP_SSID_MAX_LEN {
            return Err(ConfigError::SsidLength(self.ap_ssid.len()));
        }
        if !is_dns_label(self.mdns_name) {
            return Err(ConfigError::InvalidHostname);
        }

        if self.sample_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("SAMPLE_INTERVAL_MS_DEFAULT"));
        }
        if self.flush_ms == 0 {
            return Err(ConfigError::ZeroInterval("FILE_FLUSH_MS"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval("WIFI_CONNECT_TIMEOUT_MS"));
        }
        if !interval_within_rate(self.sample_interval_ms, self.data_rate) {
            return Err(ConfigError::SampleFasterThanSensor {
                interval_ms: self.sample_interval_ms,
            });
        }
        if self.flush_ms < self.sample_interval_ms {
            return Err(ConfigError::FlushBeforeSample);
        }

        Ok(())
    }
}

/// Check the built-in table
pub fn validate() -> Result<(), ConfigError> {
    CONFIG.validate()
}

/// Sampling period must not be shorter than one sensor output period
pub const fn interval_within_rate(interval_ms: u32, rate: DataRate) -> bool {
    (interval_ms as u64) * 1000 >= rate.period_us() as u64
}

const fn check_pins(pins: &[PinAssignment]) -> Result<(), ConfigError> {
    let mut i = 0;
    while i < pins.len() {
        let pin = pins[i];

        if pin.gpio > GPIO_MAX || (pin.gpio >= *FLASH_PINS.start() && pin.gpio <= *FLASH_PINS.end())
        {
            return Err(ConfigError::InvalidPin {
                name: pin.name,
                pin: pin.gpio,
            });
        }

        let input_only = pin.gpio >= *INPUT_ONLY_PINS.start() && pin.gpio <= *INPUT_ONLY_PINS.end();
        if input_only && !matches!(pin.direction, PinDirection::Input) {
            return Err(ConfigError::InputOnlyPin {
                name: pin.name,
                pin: pin.gpio,
            });
        }

        let mut j = i + 1;
        while j < pins.len() {
            if pins[j].gpio == pin.gpio {
                return Err(ConfigError::DuplicatePin {
                    pin: pin.gpio,
                    first: pin.name,
                    second: pins[j].name,
                });
            }
            j += 1;
        }

        i += 1;
    }
    Ok(())
}

/// A single DNS label: letters, digits and inner hyphens, at most 63 bytes
pub const fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > DNS_LABEL_MAX_LEN {
        return false;
    }
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }

    let mut i = 0;
    while i < bytes.len() {
        if !(bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
            return false;
        }
        i += 1;
    }
    true
}
