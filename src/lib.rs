//! Platform-agnostic driver for the Honeywell HMC5883L 3-axis magnetometer,
//! built on the `embedded-hal` 1.0 traits.
//!
//! Besides the register-level accessors the driver carries a per-gain scale
//! factor table, filled in by [`Hmc5883l::calibrate`] from the sensor's
//! built-in self-test field and applied to every scaled heading read.
//!
//! ```no_run
//! use hmc5883l::Hmc5883l;
//!
//! fn bring_up<I2C, D, E>(i2c: I2C, delay: D) -> Result<(), hmc5883l::Error<E>>
//! where
//!     I2C: embedded_hal::i2c::I2c<Error = E>,
//!     D: embedded_hal::delay::DelayNs,
//! {
//!     let mut mag = Hmc5883l::new(i2c, delay);
//!     mag.init()?;
//!     mag.calibrate(None)?;
//!     let _heading = mag.get_heading()?;
//!     Ok(())
//! }
//! ```
//!
//! The async twin of the driver lives in the `asynch` module behind the
//! `async` feature.

#![cfg_attr(not(test), no_std)]

use core::f32::consts::PI;

use embedded_hal::{delay::DelayNs, i2c::I2c};
use log::debug;
use micromath::F32Ext;
use nalgebra::Vector3;
use num_traits::FromPrimitive;

use regs::{ConfigA, ConfigB, ModeReg, Status};

#[cfg(feature = "async")]
pub mod asynch;
mod bits;
pub mod regs;

pub use regs::{DataRate, Gain, MeasurementBias, Mode, SampleAveraging};

/// All possible errors in this crate
#[derive(Debug)]
pub enum Error<E> {
    /// Bus transport failure
    I2c(E),
    /// A configuration field read back a reserved bit pattern
    Configuration,
    /// An axis hit the overflow sentinel during self-test
    SelfTestOverflow,
    /// An axis read exactly zero during self-test, which has no finite
    /// scale factor
    SelfTestZeroField,
}

/// Settings applied by [`Hmc5883l::init_with`]
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub averaging: SampleAveraging,
    pub rate: DataRate,
    pub bias: MeasurementBias,
    pub gain: Gain,
    pub mode: Mode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            averaging: SampleAveraging::Samples8,
            rate: DataRate::Hz15,
            bias: MeasurementBias::Normal,
            gain: Gain::Gain1090,
            mode: Mode::Single,
        }
    }
}

/// Handles all operations on/with the HMC5883L
pub struct Hmc5883l<I2C, D> {
    i2c: I2C,
    delay: D,
    addr: u8,
    gain: Gain,
    mode: Mode,
    scale: [Vector3<f32>; 8],
}

impl<I2C, D, E> Hmc5883l<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    /// Side effect free constructor; tracked gain and mode start at the
    /// device's power-on values
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            addr: regs::DEFAULT_ADDRESS,
            gain: Gain::Gain1090,
            mode: Mode::Single,
            scale: neutral_scale(),
        }
    }

    pub fn with_address(mut self, addr: u8) -> Self {
        self.addr = addr;
        self
    }

    pub fn i2c(&mut self) -> &mut I2C {
        &mut self.i2c
    }

    /// Releases the bus and the delay
    pub fn destroy(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    /// Last gain handed to [`set_gain`](Self::set_gain); selects the active
    /// scale factor vector
    pub fn gain(&self) -> Gain {
        self.gain
    }

    /// Last mode handed to [`set_mode`](Self::set_mode)
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Brings the device up with the [`Config::default`] settings: 8-sample
    /// averaging, 15 Hz, normal bias, gain 1090, single-measurement mode
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.init_with(Config::default())
    }

    /// Brings the device up with `config` and resets every scale factor
    /// vector to (1.0, 1.0, 1.0)
    pub fn init_with(&mut self, config: Config) -> Result<(), Error<E>> {
        debug!("hmc5883l: init {:?}", config);
        // The device accepts commands 200us after power-up
        self.delay.delay_us(regs::STARTUP_DELAY_US);

        self.write_byte(
            ConfigA::ADDR,
            ((config.averaging as u8) << ConfigA::AVERAGE.bit)
                | ((config.rate as u8) << ConfigA::RATE.bit)
                | ((config.bias as u8) << ConfigA::BIAS.bit),
        )?;
        self.set_gain(config.gain)?;
        self.set_mode(config.mode)?;

        self.scale = neutral_scale();
        Ok(())
    }

    /// Whether a device with the expected identification answers on the bus
    pub fn test_connection(&mut self) -> bool {
        match self.get_identification() {
            Ok(id) if id == regs::IDENTIFICATION => true,
            Ok(id) => {
                debug!("hmc5883l: unexpected identification {:x?}", id);
                false
            }
            Err(_) => false,
        }
    }

    /// The three identification bytes, ASCII "H43" on a live device
    pub fn get_identification(&mut self) -> Result<[u8; 3], Error<E>> {
        let mut id = [0u8; 3];
        self.read_bytes(*regs::ID.start(), &mut id)?;
        Ok(id)
    }

    /// get number of samples averaged per output
    pub fn get_sample_averaging(&mut self) -> Result<SampleAveraging, Error<E>> {
        let raw = self.read_bits(ConfigA::ADDR, ConfigA::AVERAGE.bit, ConfigA::AVERAGE.length)?;
        SampleAveraging::from_u8(raw).ok_or(Error::Configuration)
    }

    /// set number of samples averaged per output
    pub fn set_sample_averaging(&mut self, averaging: SampleAveraging) -> Result<(), Error<E>> {
        self.write_bits(
            ConfigA::ADDR,
            ConfigA::AVERAGE.bit,
            ConfigA::AVERAGE.length,
            averaging as u8,
        )
    }

    /// get continuous-mode data output rate
    pub fn get_data_rate(&mut self) -> Result<DataRate, Error<E>> {
        let raw = self.read_bits(ConfigA::ADDR, ConfigA::RATE.bit, ConfigA::RATE.length)?;
        DataRate::from_u8(raw).ok_or(Error::Configuration)
    }

    /// set continuous-mode data output rate
    pub fn set_data_rate(&mut self, rate: DataRate) -> Result<(), Error<E>> {
        self.write_bits(ConfigA::ADDR, ConfigA::RATE.bit, ConfigA::RATE.length, rate as u8)
    }

    /// get measurement flow bias
    pub fn get_measurement_bias(&mut self) -> Result<MeasurementBias, Error<E>> {
        let raw = self.read_bits(ConfigA::ADDR, ConfigA::BIAS.bit, ConfigA::BIAS.length)?;
        MeasurementBias::from_u8(raw).ok_or(Error::Configuration)
    }

    /// set measurement flow bias
    pub fn set_measurement_bias(&mut self, bias: MeasurementBias) -> Result<(), Error<E>> {
        self.write_bits(ConfigA::ADDR, ConfigA::BIAS.bit, ConfigA::BIAS.length, bias as u8)
    }

    /// Gain currently in CONFIG_B
    pub fn get_gain(&mut self) -> Result<Gain, Error<E>> {
        let raw = self.read_bits(ConfigB::ADDR, ConfigB::GAIN.bit, ConfigB::GAIN.length)?;
        Gain::from_u8(raw).ok_or(Error::Configuration)
    }

    /// Writes the whole CONFIG_B byte, keeping bits 4:0 zero as the
    /// datasheet requires. The tracked gain follows only on a successful
    /// write.
    pub fn set_gain(&mut self, gain: Gain) -> Result<(), Error<E>> {
        self.write_byte(ConfigB::ADDR, (gain as u8) << ConfigB::GAIN.bit)?;
        self.gain = gain;
        Ok(())
    }

    /// Mode currently in the mode register; the tracked mode is untouched
    pub fn get_mode(&mut self) -> Result<Mode, Error<E>> {
        let raw = self.read_bits(ModeReg::ADDR, ModeReg::MODE.bit, ModeReg::MODE.length)?;
        Ok(Mode::from_bits(raw))
    }

    /// Writes the whole mode byte, keeping bits 7:2 zero. The tracked mode
    /// is updated even when the write fails, so the next raw read still
    /// knows whether a single measurement must be re-triggered; the write
    /// error is returned regardless.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), Error<E>> {
        let res = self.write_byte(ModeReg::ADDR, mode as u8);
        self.mode = mode;
        res
    }

    /// Raw field sample. An axis reads -4096 when the ADC or the internal
    /// bias math over/underflowed; the sentinel clears on the next valid
    /// measurement.
    pub fn get_raw_heading(&mut self) -> Result<Vector3<i16>, Error<E>> {
        if self.mode == Mode::Single {
            // One-shot: trigger a measurement and sit out the settling time
            self.write_byte(ModeReg::ADDR, Mode::Single as u8)?;
            self.delay.delay_ms(regs::MEASUREMENT_PERIOD_MS);
        }
        let mut data = [0u8; 6];
        self.read_bytes(regs::DATA, &mut data)?;
        Ok(assemble_raw(&data))
    }

    /// Field sample multiplied by the scale factors of the tracked gain,
    /// truncated toward zero per axis
    pub fn get_heading(&mut self) -> Result<Vector3<i16>, Error<E>> {
        let raw = self.get_raw_heading()?;
        Ok(apply_scale(raw, self.scale[self.gain as usize]))
    }

    /// Calibrated field in Gauss
    pub fn get_heading_gauss(&mut self) -> Result<Vector3<f32>, Error<E>> {
        let heading = self.get_heading()?;
        Ok(to_gauss(heading, self.gain))
    }

    /// Compass bearing in degrees (0..360), from the X/Y plane reading
    /// corrected by the local magnetic `declination` in radians
    pub fn get_azimuth(&mut self, declination: f32) -> Result<f32, Error<E>> {
        let heading = self.get_heading_gauss()?;
        Ok(azimuth_degrees(heading, declination))
    }

    /// get data output register lock flag
    pub fn get_lock_status(&mut self) -> Result<bool, Error<E>> {
        Ok(self.read_bit(Status::ADDR, Status::LOCK)? != 0)
    }

    /// get data ready flag
    pub fn get_ready_status(&mut self) -> Result<bool, Error<E>> {
        Ok(self.read_bit(Status::ADDR, Status::READY)? != 0)
    }

    /// Derives the scale factor vector for `target` (the tracked gain when
    /// `None`) from the device's self-test excitation field.
    ///
    /// On success the pre-test gain and normal bias are restored. On
    /// [`Error::SelfTestOverflow`] or [`Error::SelfTestZeroField`] the
    /// target gain's factors are reset to (1.0, 1.0, 1.0) and the device is
    /// left at the target gain in positive bias; the caller decides whether
    /// to retry or reconfigure.
    pub fn calibrate(&mut self, target: Option<Gain>) -> Result<(), Error<E>> {
        let previous = self.get_gain()?;
        let target = target.unwrap_or(self.gain);
        debug!("hmc5883l: self test at {:?}", target);

        self.set_gain(target)?;
        // Positive bias excites the offset straps with the self-test field
        self.set_measurement_bias(MeasurementBias::Positive)?;
        self.set_mode(Mode::Single)?;

        // The device runs a double acquisition after a bias change; the
        // first read only proves the channels are alive
        let first = self.get_raw_heading()?;
        if has_overflow(first) {
            self.reset_scale(target);
            return Err(Error::SelfTestOverflow);
        }

        let observed = self.get_raw_heading()?;
        if has_overflow(observed) {
            self.reset_scale(target);
            return Err(Error::SelfTestOverflow);
        }
        if observed.iter().any(|&axis| axis == 0) {
            self.reset_scale(target);
            return Err(Error::SelfTestZeroField);
        }

        self.scale[target as usize] = self_test_scale(target, observed);
        debug!(
            "hmc5883l: scale[{:?}] = {:?}",
            target, self.scale[target as usize]
        );

        self.set_gain(previous)?;
        self.set_measurement_bias(MeasurementBias::Normal)?;
        Ok(())
    }

    fn reset_scale(&mut self, gain: Gain) {
        self.scale[gain as usize] = Vector3::new(1.0, 1.0, 1.0);
    }

    /// Writes byte to register
    pub fn write_byte(&mut self, reg: u8, byte: u8) -> Result<(), Error<E>> {
        self.i2c.write(self.addr, &[reg, byte]).map_err(Error::I2c)
    }

    /// Reads byte from register
    pub fn read_byte(&mut self, reg: u8) -> Result<u8, Error<E>> {
        let mut byte: [u8; 1] = [0; 1];
        self.i2c
            .write_read(self.addr, &[reg], &mut byte)
            .map_err(Error::I2c)?;
        Ok(byte[0])
    }

    /// Reads buf.len() bytes starting at register reg
    pub fn read_bytes(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Error<E>> {
        self.i2c
            .write_read(self.addr, &[reg], buf)
            .map_err(Error::I2c)
    }

    /// Enables or clears bit n at register reg
    pub fn write_bit(&mut self, reg: u8, bit_n: u8, enable: bool) -> Result<(), Error<E>> {
        let mut byte = self.read_byte(reg)?;
        bits::set_bit(&mut byte, bit_n, enable);
        self.write_byte(reg, byte)
    }

    /// Write bits data at reg from start_bit to start_bit+length
    pub fn write_bits(
        &mut self,
        reg: u8,
        start_bit: u8,
        length: u8,
        data: u8,
    ) -> Result<(), Error<E>> {
        let mut byte = self.read_byte(reg)?;
        bits::set_bits(&mut byte, start_bit, length, data);
        self.write_byte(reg, byte)
    }

    /// Read bits at register reg, starting with bit start_bit, until start_bit+length
    pub fn read_bits(&mut self, reg: u8, start_bit: u8, length: u8) -> Result<u8, Error<E>> {
        Ok(bits::get_bits(self.read_byte(reg)?, start_bit, length))
    }

    /// Read bit n from register
    fn read_bit(&mut self, reg: u8, bit_n: u8) -> Result<u8, Error<E>> {
        Ok(bits::get_bit(self.read_byte(reg)?, bit_n))
    }
}

// Conversion helpers shared with the async driver.

pub(crate) fn neutral_scale() -> [Vector3<f32>; 8] {
    [Vector3::new(1.0, 1.0, 1.0); 8]
}

/// The six data bytes come in X, Z, Y order, high byte first
pub(crate) fn assemble_raw(data: &[u8; 6]) -> Vector3<i16> {
    Vector3::new(
        i16::from_be_bytes([data[0], data[1]]),
        i16::from_be_bytes([data[4], data[5]]),
        i16::from_be_bytes([data[2], data[3]]),
    )
}

pub(crate) fn has_overflow(raw: Vector3<i16>) -> bool {
    raw.iter().any(|&axis| axis == regs::DATA_OVERFLOW)
}

pub(crate) fn apply_scale(raw: Vector3<i16>, scale: Vector3<f32>) -> Vector3<i16> {
    Vector3::new(
        (scale.x * raw.x as f32) as i16,
        (scale.y * raw.y as f32) as i16,
        (scale.z * raw.z as f32) as i16,
    )
}

/// Expected self-test reading per axis over what the sensor actually saw
pub(crate) fn self_test_scale(gain: Gain, observed: Vector3<i16>) -> Vector3<f32> {
    let lsb = gain.lsb_per_gauss();
    Vector3::new(
        regs::SELF_TEST_X_GAUSS * lsb / observed.x as f32,
        regs::SELF_TEST_Y_GAUSS * lsb / observed.y as f32,
        regs::SELF_TEST_Z_GAUSS * lsb / observed.z as f32,
    )
}

pub(crate) fn to_gauss(heading: Vector3<i16>, gain: Gain) -> Vector3<f32> {
    let lsb = gain.lsb_per_gauss();
    Vector3::new(
        heading.x as f32 / lsb,
        heading.y as f32 / lsb,
        heading.z as f32 / lsb,
    )
}

pub(crate) fn azimuth_degrees(heading: Vector3<f32>, declination: f32) -> f32 {
    let mut azimuth = F32Ext::atan2(heading.y, heading.x) + declination;
    if azimuth < 0.0 {
        azimuth += 2.0 * PI;
    }
    if azimuth >= 2.0 * PI {
        azimuth -= 2.0 * PI;
    }
    azimuth.to_degrees()
}
