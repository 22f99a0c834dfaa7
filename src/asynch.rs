//! Async twin of the blocking driver, over the `embedded-hal-async` traits.
//!
//! Same device state, same register semantics, same calibration sequence;
//! every bus access and settling wait suspends instead of blocking. The
//! conversion arithmetic is shared with the blocking driver.

use embedded_hal_async::{delay::DelayNs, i2c::I2c};
use log::debug;
use nalgebra::Vector3;
use num_traits::FromPrimitive;

use crate::regs::{self, ConfigA, ConfigB, ModeReg, Status};
use crate::{
    apply_scale, assemble_raw, azimuth_degrees, bits, has_overflow, neutral_scale,
    self_test_scale, to_gauss, Config, Error,
};
use crate::{DataRate, Gain, MeasurementBias, Mode, SampleAveraging};

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
    pub async fn init(&mut self) -> Result<(), Error<E>> {
        self.init_with(Config::default()).await
    }

    /// Brings the device up with `config` and resets every scale factor
    /// vector to (1.0, 1.0, 1.0)
    pub async fn init_with(&mut self, config: Config) -> Result<(), Error<E>> {
        debug!("hmc5883l: init {:?}", config);
        // The device accepts commands 200us after power-up
        self.delay.delay_us(regs::STARTUP_DELAY_US).await;

        self.write_byte(
            ConfigA::ADDR,
            ((config.averaging as u8) << ConfigA::AVERAGE.bit)
                | ((config.rate as u8) << ConfigA::RATE.bit)
                | ((config.bias as u8) << ConfigA::BIAS.bit),
        )
        .await?;
        self.set_gain(config.gain).await?;
        self.set_mode(config.mode).await?;

        self.scale = neutral_scale();
        Ok(())
    }

    /// Whether a device with the expected identification answers on the bus
    pub async fn test_connection(&mut self) -> bool {
        match self.get_identification().await {
            Ok(id) if id == regs::IDENTIFICATION => true,
            Ok(id) => {
                debug!("hmc5883l: unexpected identification {:x?}", id);
                false
            }
            Err(_) => false,
        }
    }

    /// The three identification bytes, ASCII "H43" on a live device
    pub async fn get_identification(&mut self) -> Result<[u8; 3], Error<E>> {
        let mut id = [0u8; 3];
        self.read_bytes(*regs::ID.start(), &mut id).await?;
        Ok(id)
    }

    /// get number of samples averaged per output
    pub async fn get_sample_averaging(&mut self) -> Result<SampleAveraging, Error<E>> {
        let raw = self
            .read_bits(ConfigA::ADDR, ConfigA::AVERAGE.bit, ConfigA::AVERAGE.length)
            .await?;
        SampleAveraging::from_u8(raw).ok_or(Error::Configuration)
    }

    /// set number of samples averaged per output
    pub async fn set_sample_averaging(
        &mut self,
        averaging: SampleAveraging,
    ) -> Result<(), Error<E>> {
        self.write_bits(
            ConfigA::ADDR,
            ConfigA::AVERAGE.bit,
            ConfigA::AVERAGE.length,
            averaging as u8,
        )
        .await
    }

    /// get continuous-mode data output rate
    pub async fn get_data_rate(&mut self) -> Result<DataRate, Error<E>> {
        let raw = self
            .read_bits(ConfigA::ADDR, ConfigA::RATE.bit, ConfigA::RATE.length)
            .await?;
        DataRate::from_u8(raw).ok_or(Error::Configuration)
    }

    /// set continuous-mode data output rate
    pub async fn set_data_rate(&mut self, rate: DataRate) -> Result<(), Error<E>> {
        self.write_bits(ConfigA::ADDR, ConfigA::RATE.bit, ConfigA::RATE.length, rate as u8)
            .await
    }

    /// get measurement flow bias
    pub async fn get_measurement_bias(&mut self) -> Result<MeasurementBias, Error<E>> {
        let raw = self
            .read_bits(ConfigA::ADDR, ConfigA::BIAS.bit, ConfigA::BIAS.length)
            .await?;
        MeasurementBias::from_u8(raw).ok_or(Error::Configuration)
    }

    /// set measurement flow bias
    pub async fn set_measurement_bias(&mut self, bias: MeasurementBias) -> Result<(), Error<E>> {
        self.write_bits(ConfigA::ADDR, ConfigA::BIAS.bit, ConfigA::BIAS.length, bias as u8)
            .await
    }

    /// Gain currently in CONFIG_B
    pub async fn get_gain(&mut self) -> Result<Gain, Error<E>> {
        let raw = self
            .read_bits(ConfigB::ADDR, ConfigB::GAIN.bit, ConfigB::GAIN.length)
            .await?;
        Gain::from_u8(raw).ok_or(Error::Configuration)
    }

    /// Writes the whole CONFIG_B byte, keeping bits 4:0 zero as the
    /// datasheet requires. The tracked gain follows only on a successful
    /// write.
    pub async fn set_gain(&mut self, gain: Gain) -> Result<(), Error<E>> {
        self.write_byte(ConfigB::ADDR, (gain as u8) << ConfigB::GAIN.bit)
            .await?;
        self.gain = gain;
        Ok(())
    }

    /// Mode currently in the mode register; the tracked mode is untouched
    pub async fn get_mode(&mut self) -> Result<Mode, Error<E>> {
        let raw = self
            .read_bits(ModeReg::ADDR, ModeReg::MODE.bit, ModeReg::MODE.length)
            .await?;
        Ok(Mode::from_bits(raw))
    }

    /// Writes the whole mode byte, keeping bits 7:2 zero. The tracked mode
    /// is updated even when the write fails, so the next raw read still
    /// knows whether a single measurement must be re-triggered; the write
    /// error is returned regardless.
    pub async fn set_mode(&mut self, mode: Mode) -> Result<(), Error<E>> {
        let res = self.write_byte(ModeReg::ADDR, mode as u8).await;
        self.mode = mode;
        res
    }

    /// Raw field sample. An axis reads -4096 when the ADC or the internal
    /// bias math over/underflowed; the sentinel clears on the next valid
    /// measurement.
    pub async fn get_raw_heading(&mut self) -> Result<Vector3<i16>, Error<E>> {
        if self.mode == Mode::Single {
            // One-shot: trigger a measurement and sit out the settling time
            self.write_byte(ModeReg::ADDR, Mode::Single as u8).await?;
            self.delay.delay_ms(regs::MEASUREMENT_PERIOD_MS).await;
        }
        let mut data = [0u8; 6];
        self.read_bytes(regs::DATA, &mut data).await?;
        Ok(assemble_raw(&data))
    }

    /// Field sample multiplied by the scale factors of the tracked gain,
    /// truncated toward zero per axis
    pub async fn get_heading(&mut self) -> Result<Vector3<i16>, Error<E>> {
        let raw = self.get_raw_heading().await?;
        Ok(apply_scale(raw, self.scale[self.gain as usize]))
    }

    /// Calibrated field in Gauss
    pub async fn get_heading_gauss(&mut self) -> Result<Vector3<f32>, Error<E>> {
        let heading = self.get_heading().await?;
        Ok(to_gauss(heading, self.gain))
    }

    /// Compass bearing in degrees (0..360), from the X/Y plane reading
    /// corrected by the local magnetic `declination` in radians
    pub async fn get_azimuth(&mut self, declination: f32) -> Result<f32, Error<E>> {
        let heading = self.get_heading_gauss().await?;
        Ok(azimuth_degrees(heading, declination))
    }

    /// get data output register lock flag
    pub async fn get_lock_status(&mut self) -> Result<bool, Error<E>> {
        Ok(self.read_bit(Status::ADDR, Status::LOCK).await? != 0)
    }

    /// get data ready flag
    pub async fn get_ready_status(&mut self) -> Result<bool, Error<E>> {
        Ok(self.read_bit(Status::ADDR, Status::READY).await? != 0)
    }

    /// Derives the scale factor vector for `target` (the tracked gain when
    /// `None`) from the device's self-test excitation field.
    ///
    /// On success the pre-test gain and normal bias are restored. On
    /// [`Error::SelfTestOverflow`] or [`Error::SelfTestZeroField`] the
    /// target gain's factors are reset to (1.0, 1.0, 1.0) and the device is
    /// left at the target gain in positive bias; the caller decides whether
    /// to retry or reconfigure.
    pub async fn calibrate(&mut self, target: Option<Gain>) -> Result<(), Error<E>> {
        let previous = self.get_gain().await?;
        let target = target.unwrap_or(self.gain);
        debug!("hmc5883l: self test at {:?}", target);

        self.set_gain(target).await?;
        // Positive bias excites the offset straps with the self-test field
        self.set_measurement_bias(MeasurementBias::Positive).await?;
        self.set_mode(Mode::Single).await?;

        // The device runs a double acquisition after a bias change; the
        // first read only proves the channels are alive
        let first = self.get_raw_heading().await?;
        if has_overflow(first) {
            self.reset_scale(target);
            return Err(Error::SelfTestOverflow);
        }

        let observed = self.get_raw_heading().await?;
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

        self.set_gain(previous).await?;
        self.set_measurement_bias(MeasurementBias::Normal).await?;
        Ok(())
    }

    fn reset_scale(&mut self, gain: Gain) {
        self.scale[gain as usize] = Vector3::new(1.0, 1.0, 1.0);
    }

    /// Writes byte to register
    pub async fn write_byte(&mut self, reg: u8, byte: u8) -> Result<(), Error<E>> {
        self.i2c
            .write(self.addr, &[reg, byte])
            .await
            .map_err(Error::I2c)
    }

    /// Reads byte from register
    pub async fn read_byte(&mut self, reg: u8) -> Result<u8, Error<E>> {
        let mut byte: [u8; 1] = [0; 1];
        self.i2c
            .write_read(self.addr, &[reg], &mut byte)
            .await
            .map_err(Error::I2c)?;
        Ok(byte[0])
    }

    /// Reads buf.len() bytes starting at register reg
    pub async fn read_bytes(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Error<E>> {
        self.i2c
            .write_read(self.addr, &[reg], buf)
            .await
            .map_err(Error::I2c)
    }

    /// Enables or clears bit n at register reg
    pub async fn write_bit(&mut self, reg: u8, bit_n: u8, enable: bool) -> Result<(), Error<E>> {
        let mut byte = self.read_byte(reg).await?;
        bits::set_bit(&mut byte, bit_n, enable);
        self.write_byte(reg, byte).await
    }

    /// Write bits data at reg from start_bit to start_bit+length
    pub async fn write_bits(
        &mut self,
        reg: u8,
        start_bit: u8,
        length: u8,
        data: u8,
    ) -> Result<(), Error<E>> {
        let mut byte = self.read_byte(reg).await?;
        bits::set_bits(&mut byte, start_bit, length, data);
        self.write_byte(reg, byte).await
    }

    /// Read bits at register reg, starting with bit start_bit, until start_bit+length
    pub async fn read_bits(&mut self, reg: u8, start_bit: u8, length: u8) -> Result<u8, Error<E>> {
        Ok(bits::get_bits(self.read_byte(reg).await?, start_bit, length))
    }

    /// Read bit n from register
    async fn read_bit(&mut self, reg: u8, bit_n: u8) -> Result<u8, Error<E>> {
        Ok(bits::get_bit(self.read_byte(reg).await?, bit_n))
    }
}
