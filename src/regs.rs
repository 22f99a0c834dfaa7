//! HMC5883L register map, device constants and typed settings.

use core::ops::RangeInclusive;

use num_derive::FromPrimitive;

use crate::bits::BitBlock;

pub const DEFAULT_ADDRESS: u8 = 0x1E;

/// Contents of the three identification registers, ASCII "H43"
pub const IDENTIFICATION: [u8; 3] = *b"H43";

/// Reported on an axis when the ADC or the internal bias math over/underflows
pub const DATA_OVERFLOW: i16 = -4096;

/// Self-test excitation field strength on the X axis, in Gauss
pub const SELF_TEST_X_GAUSS: f32 = 1.16;
/// Self-test excitation field strength on the Y axis, in Gauss
pub const SELF_TEST_Y_GAUSS: f32 = 1.16;
/// Self-test excitation field strength on the Z axis, in Gauss
pub const SELF_TEST_Z_GAUSS: f32 = 1.08;

/// Settling time of one single-mode measurement
pub const MEASUREMENT_PERIOD_MS: u32 = 6;

/// Power-up to ready-for-I2C-commands
pub const STARTUP_DELAY_US: u32 = 200;

pub struct ConfigA;
impl ConfigA {
    pub const ADDR: u8 = 0x00;

    pub const AVERAGE: BitBlock = BitBlock { bit: 5, length: 2 };
    pub const RATE: BitBlock = BitBlock { bit: 2, length: 3 };
    pub const BIAS: BitBlock = BitBlock { bit: 0, length: 2 };
}

pub struct ConfigB;
impl ConfigB {
    pub const ADDR: u8 = 0x01;

    pub const GAIN: BitBlock = BitBlock { bit: 5, length: 3 };
}

pub struct ModeReg;
impl ModeReg {
    pub const ADDR: u8 = 0x02;

    pub const MODE: BitBlock = BitBlock { bit: 0, length: 2 };
}

/// First of the six data registers. The device streams X, Z, then Y,
/// high byte first.
pub const DATA: u8 = 0x03;

pub struct Status;
impl Status {
    pub const ADDR: u8 = 0x09;

    pub const LOCK: u8 = 1;
    pub const READY: u8 = 0;
}

pub const ID: RangeInclusive<u8> = 0x0A..=0x0C;

/// Samples averaged per measurement output
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum SampleAveraging {
    Samples1 = 0b00,
    Samples2 = 0b01,
    Samples4 = 0b10,
    Samples8 = 0b11,
}

/// Data output rate in continuous mode. 0b111 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum DataRate {
    Hz0_75 = 0b000,
    Hz1_5 = 0b001,
    Hz3 = 0b010,
    Hz7_5 = 0b011,
    Hz15 = 0b100,
    Hz30 = 0b101,
    Hz75 = 0b110,
}

/// Measurement flow bias. The positive and negative settings excite the
/// offset straps with a known artificial field, used by self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum MeasurementBias {
    Normal = 0b00,
    Positive = 0b01,
    Negative = 0b10,
}

/// Gain (sensitivity) setting. Each level trades field range against
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Gain {
    /// ±0.88 Ga range, 1370 LSB/Gauss
    Gain1370 = 0b000,
    /// ±1.3 Ga range, 1090 LSB/Gauss (power-on default)
    Gain1090 = 0b001,
    /// ±1.9 Ga range, 820 LSB/Gauss
    Gain820 = 0b010,
    /// ±2.5 Ga range, 660 LSB/Gauss
    Gain660 = 0b011,
    /// ±4.0 Ga range, 440 LSB/Gauss
    Gain440 = 0b100,
    /// ±4.7 Ga range, 390 LSB/Gauss
    Gain390 = 0b101,
    /// ±5.6 Ga range, 330 LSB/Gauss
    Gain330 = 0b110,
    /// ±8.1 Ga range, 230 LSB/Gauss
    Gain230 = 0b111,
}

impl Gain {
    pub fn lsb_per_gauss(&self) -> f32 {
        match self {
            Gain::Gain1370 => 1370.0,
            Gain::Gain1090 => 1090.0,
            Gain::Gain820 => 820.0,
            Gain::Gain660 => 660.0,
            Gain::Gain440 => 440.0,
            Gain::Gain390 => 390.0,
            Gain::Gain330 => 330.0,
            Gain::Gain230 => 230.0,
        }
    }
}

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Continuous = 0b00,
    /// One measurement, then back to idle. Must be re-triggered per reading.
    Single = 0b01,
    Idle = 0b10,
}

impl Mode {
    /// Decodes the 2-bit mode field. The device uses both 0b10 and 0b11 for
    /// idle, so both map to [`Mode::Idle`].
    pub fn from_bits(bits: u8) -> Mode {
        match bits & 0b11 {
            0b00 => Mode::Continuous,
            0b01 => Mode::Single,
            _ => Mode::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use num_traits::FromPrimitive;

    use super::*;

    #[test]
    fn default_config_a_byte_composes_to_0x70() {
        let byte = ((SampleAveraging::Samples8 as u8) << ConfigA::AVERAGE.bit)
            | ((DataRate::Hz15 as u8) << ConfigA::RATE.bit)
            | ((MeasurementBias::Normal as u8) << ConfigA::BIAS.bit);
        assert_eq!(byte, 0x70);
    }

    #[test]
    fn gain_field_levels_decode() {
        assert_eq!(Gain::from_u8(0b000), Some(Gain::Gain1370));
        assert_eq!(Gain::from_u8(0b111), Some(Gain::Gain230));
        assert_eq!(Gain::from_u8(0b1000), None);
    }

    #[test]
    fn reserved_rate_and_bias_encodings_do_not_decode() {
        assert_eq!(DataRate::from_u8(0b111), None);
        assert_eq!(MeasurementBias::from_u8(0b11), None);
    }

    #[test]
    fn both_idle_encodings_map_to_idle() {
        assert_eq!(Mode::from_bits(0b00), Mode::Continuous);
        assert_eq!(Mode::from_bits(0b01), Mode::Single);
        assert_eq!(Mode::from_bits(0b10), Mode::Idle);
        assert_eq!(Mode::from_bits(0b11), Mode::Idle);
    }

    #[test]
    fn lsb_per_gauss_matches_datasheet_table() {
        assert_eq!(Gain::Gain1370.lsb_per_gauss(), 1370.0);
        assert_eq!(Gain::Gain1090.lsb_per_gauss(), 1090.0);
        assert_eq!(Gain::Gain230.lsb_per_gauss(), 230.0);
    }
}
