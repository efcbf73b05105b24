//! Async register-level driver for the NXP MMA8451 three-axis accelerometer
//!
//! The device is read in 14-bit high-resolution mode. Readings are returned
//! either as raw left-justified counts or converted to m/s² using the
//! currently configured full-scale range.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use serde::{Deserialize, Serialize};

// =============================================================================
// I2C Address
// =============================================================================

/// Default I2C address (SA0 pulled high, as on most breakout boards)
pub const DEFAULT_ADDRESS: u8 = 0x1D;
/// Alternate I2C address (SA0 tied low)
pub const ALTERNATE_ADDRESS: u8 = 0x1C;

/// Expected content of `WHO_AM_I`
pub const DEVICE_ID: u8 = 0x1A;

// =============================================================================
// Register Addresses
// =============================================================================

pub const REG_OUT_X_MSB: u8 = 0x01;
pub const REG_WHO_AM_I: u8 = 0x0D;
pub const REG_XYZ_DATA_CFG: u8 = 0x0E;
pub const REG_PL_CFG: u8 = 0x11;
pub const REG_CTRL_REG1: u8 = 0x2A;
pub const REG_CTRL_REG2: u8 = 0x2B;
pub const REG_CTRL_REG4: u8 = 0x2D;
pub const REG_CTRL_REG5: u8 = 0x2E;

// =============================================================================
// Register Bits
// =============================================================================

/// CTRL_REG1: active mode
const CTRL1_ACTIVE: u8 = 0x01;
/// CTRL_REG1: reduced noise mode (only valid up to ±4 g)
const CTRL1_LNOISE: u8 = 0x04;
/// CTRL_REG1: output data rate field
const CTRL1_DR_MASK: u8 = 0x38;
/// CTRL_REG2: software reset
const CTRL2_RST: u8 = 0x40;
/// CTRL_REG2: high resolution oversampling in active mode
const CTRL2_MODS_HIGH_RES: u8 = 0x02;
/// CTRL_REG4: data-ready interrupt enable
const CTRL4_INT_EN_DRDY: u8 = 0x01;
/// CTRL_REG5: route data-ready interrupt to INT1
const CTRL5_INT_CFG_DRDY: u8 = 0x01;
/// PL_CFG: portrait/landscape detection enable
const PL_CFG_PL_EN: u8 = 0x40;

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f32 = 9.80665;

/// Number of 1 ms polls to wait for a software reset to complete
const RESET_POLL_LIMIT: u32 = 50;

// =============================================================================
// Enums
// =============================================================================

/// Full-scale measurement range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Range {
    /// ±2 g, 4096 counts/g
    G2 = 0b00,
    /// ±4 g, 2048 counts/g
    G4 = 0b01,
    /// ±8 g, 1024 counts/g
    G8 = 0b10,
}

impl Range {
    /// Convert from the `XYZ_DATA_CFG` FS field
    pub const fn from_register(val: u8) -> Option<Self> {
        match val & 0b11 {
            0b00 => Some(Self::G2),
            0b01 => Some(Self::G4),
            0b10 => Some(Self::G8),
            _ => None,
        }
    }

    /// Parse a range given in whole g (`2`, `4` or `8`)
    pub const fn from_g(g: u8) -> Option<Self> {
        match g {
            2 => Some(Self::G2),
            4 => Some(Self::G4),
            8 => Some(Self::G8),
            _ => None,
        }
    }

    pub const fn to_register(self) -> u8 {
        self as u8
    }

    /// Full-scale value in g
    pub const fn g(self) -> u8 {
        match self {
            Self::G2 => 2,
            Self::G4 => 4,
            Self::G8 => 8,
        }
    }

    /// Counts per g of a 14-bit reading
    pub const fn counts_per_g(self) -> f32 {
        match self {
            Self::G2 => 4096.0,
            Self::G4 => 2048.0,
            Self::G8 => 1024.0,
        }
    }

    /// Whether the reduced noise mode may be used with this range
    pub const fn allows_low_noise(self) -> bool {
        !matches!(self, Self::G8)
    }
}

/// Output data rate in active mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataRate {
    Hz800 = 0b000,
    Hz400 = 0b001,
    Hz200 = 0b010,
    Hz100 = 0b011,
    Hz50 = 0b100,
    Hz12_5 = 0b101,
    Hz6_25 = 0b110,
    Hz1_56 = 0b111,
}

impl DataRate {
    pub const ALL: [Self; 8] = [
        Self::Hz800,
        Self::Hz400,
        Self::Hz200,
        Self::Hz100,
        Self::Hz50,
        Self::Hz12_5,
        Self::Hz6_25,
        Self::Hz1_56,
    ];

    /// Convert from the CTRL_REG1 DR field (already shifted down)
    pub const fn from_register(val: u8) -> Self {
        match val & 0b111 {
            0b000 => Self::Hz800,
            0b001 => Self::Hz400,
            0b010 => Self::Hz200,
            0b011 => Self::Hz100,
            0b100 => Self::Hz50,
            0b101 => Self::Hz12_5,
            0b110 => Self::Hz6_25,
            _ => Self::Hz1_56,
        }
    }

    /// Value of the CTRL_REG1 DR field, in place
    pub const fn to_register(self) -> u8 {
        (self as u8) << 3
    }

    /// Time between two output samples in microseconds
    pub const fn period_us(self) -> u32 {
        match self {
            Self::Hz800 => 1_250,
            Self::Hz400 => 2_500,
            Self::Hz200 => 5_000,
            Self::Hz100 => 10_000,
            Self::Hz50 => 20_000,
            Self::Hz12_5 => 80_000,
            Self::Hz6_25 => 160_000,
            Self::Hz1_56 => 640_000,
        }
    }

    /// Human readable rate, also accepted by [`DataRate::from_label`]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hz800 => "800",
            Self::Hz400 => "400",
            Self::Hz200 => "200",
            Self::Hz100 => "100",
            Self::Hz50 => "50",
            Self::Hz12_5 => "12.5",
            Self::Hz6_25 => "6.25",
            Self::Hz1_56 => "1.56",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|rate| rate.label() == label)
    }
}

/// Raw 14-bit counts for the three axes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawAcceleration {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl RawAcceleration {
    /// Decode the six output registers starting at `OUT_X_MSB`
    ///
    /// Each axis is a left-justified 14-bit two's complement value.
    pub fn from_registers(buf: &[u8; 6]) -> Self {
        Self {
            x: i16::from_be_bytes([buf[0], buf[1]]) >> 2,
            y: i16::from_be_bytes([buf[2], buf[3]]) >> 2,
            z: i16::from_be_bytes([buf[4], buf[5]]) >> 2,
        }
    }

    /// Convert to m/s² for the given range
    pub fn to_acceleration(self, range: Range) -> Acceleration {
        let scale = STANDARD_GRAVITY / range.counts_per_g();
        Acceleration {
            x: self.x as f32 * scale,
            y: self.y as f32 * scale,
            z: self.z as f32 * scale,
        }
    }
}

/// Acceleration in m/s²
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Acceleration {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

// =============================================================================
// Driver Error Type
// =============================================================================

/// Errors that can occur during MMA8451 operations
#[derive(Debug)]
pub enum Error<E> {
    /// I2C communication error
    I2c(E),
    /// `WHO_AM_I` returned something other than [`DEVICE_ID`]
    WrongDevice(u8),
    /// The reset bit did not clear in time
    ResetTimeout,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::I2c(e)
    }
}

// =============================================================================
// Driver Implementation
// =============================================================================

/// MMA8451 driver with an async I2C interface
pub struct Mma8451<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    /// Range last written to the device, used to scale readings
    range: Range,
}

impl<I2C, D> Mma8451<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    /// Create a driver for a device at [`DEFAULT_ADDRESS`]
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self::with_address(i2c, delay, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I2C, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
            range: Range::G2,
        }
    }

    pub fn range(&self) -> Range {
        self.range
    }

    async fn read_byte(&mut self, reg: u8) -> Result<u8, Error<I2C::Error>> {
        let mut buf = [0u8; 1];
        self.i2c.write_read(self.address, &[reg], &mut buf).await?;
        Ok(buf[0])
    }

    async fn write_byte(&mut self, reg: u8, data: u8) -> Result<(), Error<I2C::Error>> {
        self.i2c.write(self.address, &[reg, data]).await?;
        Ok(())
    }

    /// Read `WHO_AM_I`
    pub async fn device_id(&mut self) -> Result<u8, Error<I2C::Error>> {
        self.read_byte(REG_WHO_AM_I).await
    }

    /// Issue a software reset and wait until the device reports completion
    pub async fn reset(&mut self) -> Result<(), Error<I2C::Error>> {
        self.write_byte(REG_CTRL_REG2, CTRL2_RST).await?;

        for _ in 0..RESET_POLL_LIMIT {
            if self.read_byte(REG_CTRL_REG2).await? & CTRL2_RST == 0 {
                self.range = Range::G2;
                return Ok(());
            }
            self.delay.delay_ms(1).await;
        }

        Err(Error::ResetTimeout)
    }

    /// Probe, reset and configure the device, leaving it in active mode
    pub async fn init(&mut self, range: Range, rate: DataRate) -> Result<(), Error<I2C::Error>> {
        let id = self.device_id().await?;
        if id != DEVICE_ID {
            return Err(Error::WrongDevice(id));
        }

        self.reset().await?;

        self.write_byte(REG_XYZ_DATA_CFG, range.to_register()).await?;
        self.range = range;

        self.write_byte(REG_CTRL_REG2, CTRL2_MODS_HIGH_RES).await?;
        self.write_byte(REG_CTRL_REG4, CTRL4_INT_EN_DRDY).await?;
        self.write_byte(REG_CTRL_REG5, CTRL5_INT_CFG_DRDY).await?;
        self.write_byte(REG_PL_CFG, PL_CFG_PL_EN).await?;

        self.write_byte(REG_CTRL_REG1, Self::ctrl1(range, rate) | CTRL1_ACTIVE)
            .await
    }

    fn ctrl1(range: Range, rate: DataRate) -> u8 {
        let mut ctrl1 = rate.to_register();
        if range.allows_low_noise() {
            ctrl1 |= CTRL1_LNOISE;
        }
        ctrl1
    }

    /// Change the full-scale range
    ///
    /// The device is put in standby for the write and returned to its
    /// previous state afterwards.
    pub async fn set_range(&mut self, range: Range) -> Result<(), Error<I2C::Error>> {
        let ctrl1 = self.read_byte(REG_CTRL_REG1).await?;
        self.write_byte(REG_CTRL_REG1, ctrl1 & !CTRL1_ACTIVE).await?;
        self.write_byte(REG_XYZ_DATA_CFG, range.to_register()).await?;
        self.range = range;

        let rate = DataRate::from_register((ctrl1 & CTRL1_DR_MASK) >> 3);
        self.write_byte(
            REG_CTRL_REG1,
            Self::ctrl1(range, rate) | (ctrl1 & CTRL1_ACTIVE),
        )
        .await
    }

    /// Change the output data rate
    pub async fn set_data_rate(&mut self, rate: DataRate) -> Result<(), Error<I2C::Error>> {
        let ctrl1 = self.read_byte(REG_CTRL_REG1).await?;
        self.write_byte(REG_CTRL_REG1, ctrl1 & !CTRL1_ACTIVE).await?;
        let updated = (ctrl1 & !(CTRL1_DR_MASK | CTRL1_ACTIVE)) | rate.to_register();
        self.write_byte(REG_CTRL_REG1, updated | (ctrl1 & CTRL1_ACTIVE))
            .await
    }

    /// Read the data rate currently programmed in CTRL_REG1
    pub async fn data_rate(&mut self) -> Result<DataRate, Error<I2C::Error>> {
        let ctrl1 = self.read_byte(REG_CTRL_REG1).await?;
        Ok(DataRate::from_register((ctrl1 & CTRL1_DR_MASK) >> 3))
    }

    pub async fn read_raw(&mut self) -> Result<RawAcceleration, Error<I2C::Error>> {
        let mut buf = [0u8; 6];
        self.i2c
            .write_read(self.address, &[REG_OUT_X_MSB], &mut buf)
            .await?;
        Ok(RawAcceleration::from_registers(&buf))
    }

    /// Read all three axes in m/s²
    pub async fn read(&mut self) -> Result<Acceleration, Error<I2C::Error>> {
        let raw = self.read_raw().await?;
        Ok(raw.to_acceleration(self.range))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_async::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};

    /// Register-file model of the accelerometer with auto-incrementing reads
    pub(crate) struct FakeMma {
        pub regs: [u8; 0x32],
        pointer: usize,
        /// Keep CTRL_REG2.RST set after a reset request
        pub stuck_reset: bool,
        pub fail_reads: bool,
    }

    impl FakeMma {
        pub(crate) fn new() -> Self {
            let mut regs = [0u8; 0x32];
            regs[REG_WHO_AM_I as usize] = DEVICE_ID;
            Self {
                regs,
                pointer: 0,
                stuck_reset: false,
                fail_reads: false,
            }
        }

        pub(crate) fn set_output(&mut self, x: i16, y: i16, z: i16) {
            let base = REG_OUT_X_MSB as usize;
            for (i, value) in [x, y, z].into_iter().enumerate() {
                let bytes = (value << 2).to_be_bytes();
                self.regs[base + i * 2] = bytes[0];
                self.regs[base + i * 2 + 1] = bytes[1];
            }
        }
    }

    impl ErrorType for FakeMma {
        type Error = ErrorKind;
    }

    impl I2c for FakeMma {
        async fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if address != DEFAULT_ADDRESS {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        let Some((reg, data)) = bytes.split_first() else {
                            continue;
                        };
                        self.pointer = *reg as usize;
                        for byte in data {
                            let mut value = *byte;
                            if self.pointer == REG_CTRL_REG2 as usize && !self.stuck_reset {
                                value &= !CTRL2_RST;
                            }
                            self.regs[self.pointer] = value;
                            self.pointer += 1;
                        }
                    }
                    Operation::Read(buf) => {
                        if self.fail_reads {
                            return Err(ErrorKind::Bus);
                        }
                        for byte in buf.iter_mut() {
                            *byte = self.regs[self.pointer];
                            self.pointer += 1;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    pub(crate) struct NoDelay;

    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    #[test]
    fn init_configures_range_rate_and_activates() {
        let mut fake = FakeMma::new();
        let mut dev = Mma8451::new(&mut fake, NoDelay);
        block_on(dev.init(Range::G4, DataRate::Hz100)).unwrap();
        drop(dev);

        assert_eq!(fake.regs[REG_XYZ_DATA_CFG as usize], Range::G4.to_register());
        assert_eq!(fake.regs[REG_CTRL_REG2 as usize], CTRL2_MODS_HIGH_RES);
        assert_eq!(fake.regs[REG_CTRL_REG4 as usize], CTRL4_INT_EN_DRDY);
        assert_eq!(fake.regs[REG_CTRL_REG5 as usize], CTRL5_INT_CFG_DRDY);
        assert_eq!(
            fake.regs[REG_CTRL_REG1 as usize],
            (0b011 << 3) | CTRL1_LNOISE | CTRL1_ACTIVE
        );
    }

    #[test]
    fn init_skips_low_noise_at_8g() {
        let mut fake = FakeMma::new();
        let mut dev = Mma8451::new(&mut fake, NoDelay);
        block_on(dev.init(Range::G8, DataRate::Hz800)).unwrap();
        drop(dev);

        assert_eq!(fake.regs[REG_CTRL_REG1 as usize], CTRL1_ACTIVE);
    }

    #[test]
    fn init_rejects_foreign_device() {
        let mut fake = FakeMma::new();
        fake.regs[REG_WHO_AM_I as usize] = 0x2A;
        let mut dev = Mma8451::new(&mut fake, NoDelay);
        assert!(matches!(
            block_on(dev.init(Range::G2, DataRate::Hz100)),
            Err(Error::WrongDevice(0x2A))
        ));
    }

    #[test]
    fn stuck_reset_times_out() {
        let mut fake = FakeMma::new();
        fake.stuck_reset = true;
        let mut dev = Mma8451::new(&mut fake, NoDelay);
        assert!(matches!(block_on(dev.reset()), Err(Error::ResetTimeout)));
    }

    #[test]
    fn wrong_address_is_a_bus_error() {
        let mut fake = FakeMma::new();
        let mut dev = Mma8451::with_address(&mut fake, NoDelay, ALTERNATE_ADDRESS);
        assert!(matches!(block_on(dev.device_id()), Err(Error::I2c(_))));
    }

    #[test]
    fn read_scales_by_range() {
        let mut fake = FakeMma::new();
        fake.set_output(4096, -2048, 0);
        let mut dev = Mma8451::new(&mut fake, NoDelay);
        block_on(dev.init(Range::G2, DataRate::Hz100)).unwrap();

        let acc = block_on(dev.read()).unwrap();
        assert!((acc.x - STANDARD_GRAVITY).abs() < 1e-4);
        assert!((acc.y + STANDARD_GRAVITY / 2.0).abs() < 1e-4);
        assert_eq!(acc.z, 0.0);

        block_on(dev.set_range(Range::G8)).unwrap();
        let acc = block_on(dev.read()).unwrap();
        assert!((acc.x - 4.0 * STANDARD_GRAVITY).abs() < 1e-3);
    }

    #[test]
    fn raw_decoding_keeps_sign() {
        let raw = RawAcceleration::from_registers(&[0xFF, 0xFC, 0x7F, 0xFC, 0x80, 0x00]);
        assert_eq!(raw.x, -1);
        assert_eq!(raw.y, 8191);
        assert_eq!(raw.z, -8192);
    }

    #[test]
    fn set_data_rate_preserves_active_state() {
        let mut fake = FakeMma::new();
        let mut dev = Mma8451::new(&mut fake, NoDelay);
        block_on(dev.init(Range::G2, DataRate::Hz100)).unwrap();
        block_on(dev.set_data_rate(DataRate::Hz12_5)).unwrap();
        assert_eq!(block_on(dev.data_rate()).unwrap(), DataRate::Hz12_5);
        drop(dev);

        let ctrl1 = fake.regs[REG_CTRL_REG1 as usize];
        assert_eq!(ctrl1 & CTRL1_ACTIVE, CTRL1_ACTIVE);
        assert_eq!(ctrl1 & CTRL1_LNOISE, CTRL1_LNOISE);
    }

    #[test]
    fn data_rate_labels_round_trip() {
        for rate in DataRate::ALL {
            assert_eq!(DataRate::from_label(rate.label()), Some(rate));
        }
        assert_eq!(DataRate::from_label("123"), None);
    }
}
