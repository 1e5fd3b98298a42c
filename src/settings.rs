//! Tunable constants, operational settings and the transient control
//! variables, plus their fixed little-endian record encoding.

use crate::temperature::{LongTemp, Temp};

/// Operating mode. The byte value is the mode character used on the host
/// link and in the persisted settings record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Hold the chamber at a fixed temperature.
    FridgeConstant,
    /// Hold the beer at a fixed temperature.
    BeerConstant,
    /// Follow beer setpoints pushed by the host.
    BeerProfile,
    Off,
    /// Outputs are driven manually.
    Test,
}

impl Mode {
    pub const fn as_char(self) -> char {
        match self {
            Mode::FridgeConstant => 'f',
            Mode::BeerConstant => 'b',
            Mode::BeerProfile => 'p',
            Mode::Off => 'o',
            Mode::Test => 't',
        }
    }

    pub const fn from_char(c: char) -> Option<Mode> {
        match c {
            'f' => Some(Mode::FridgeConstant),
            'b' => Some(Mode::BeerConstant),
            'p' => Some(Mode::BeerProfile),
            'o' => Some(Mode::Off),
            't' => Some(Mode::Test),
            _ => None,
        }
    }

    /// Modes in which the chamber setpoint is derived from the beer setpoint.
    pub const fn is_beer_following(self) -> bool {
        matches!(self, Mode::BeerConstant | Mode::BeerProfile)
    }
}

/// Tunables that rarely change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlConstants {
    pub temp_format: u8,
    pub temp_setting_min: Temp,
    pub temp_setting_max: Temp,
    pub kp: Temp,
    pub ki: Temp,
    pub kd: Temp,
    pub i_max_error: Temp,
    pub idle_range_high: Temp,
    pub idle_range_low: Temp,
    pub heating_target_upper: Temp,
    pub heating_target_lower: Temp,
    pub cooling_target_upper: Temp,
    pub cooling_target_lower: Temp,
    /// Seconds of heating taken into account for the overshoot estimate.
    pub max_heat_time_for_estimate: u16,
    pub max_cool_time_for_estimate: u16,
    pub fridge_fast_filter: u8,
    pub fridge_slow_filter: u8,
    pub fridge_slope_filter: u8,
    pub beer_fast_filter: u8,
    pub beer_slow_filter: u8,
    pub beer_slope_filter: u8,
    pub light_as_heater: bool,
}

impl Default for ControlConstants {
    fn default() -> Self {
        Self {
            temp_format: b'C',
            temp_setting_min: Temp::from_degrees(1),
            temp_setting_max: Temp::from_degrees(30),
            kp: Temp::from_degrees(20),
            ki: Temp::from_centi(60),
            kd: Temp::from_degrees(-3),
            i_max_error: Temp::from_centi(50),
            idle_range_high: Temp::from_degrees(1),
            idle_range_low: Temp::from_degrees(-1),
            heating_target_upper: Temp::from_centi(30),
            heating_target_lower: Temp::from_centi(-20),
            cooling_target_upper: Temp::from_centi(20),
            cooling_target_lower: Temp::from_centi(-30),
            max_heat_time_for_estimate: 600,
            max_cool_time_for_estimate: 1200,
            fridge_fast_filter: 1,
            fridge_slow_filter: 4,
            fridge_slope_filter: 3,
            beer_fast_filter: 3,
            beer_slow_filter: 5,
            beer_slope_filter: 4,
            light_as_heater: false,
        }
    }
}

/// Operational settings, persisted whenever they meaningfully change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlSettings {
    pub mode: Mode,
    pub beer_setting: Temp,
    pub fridge_setting: Temp,
    /// Expected overshoot per hour of heating.
    pub heat_estimator: Temp,
    /// Expected overshoot per hour of cooling.
    pub cool_estimator: Temp,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Off,
            beer_setting: Temp::from_degrees(20),
            fridge_setting: Temp::from_degrees(20),
            heat_estimator: Temp::from_centi(20),
            cool_estimator: Temp::from_degrees(5),
        }
    }
}

/// Working values of the control loop. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlVariables {
    pub beer_diff: Temp,
    pub diff_integral: LongTemp,
    pub beer_slope: Temp,
    pub p: LongTemp,
    pub i: LongTemp,
    pub d: LongTemp,
    pub estimated_peak: Temp,
    pub neg_peak_estimate: Temp,
    pub pos_peak_estimate: Temp,
    pub neg_peak: Temp,
    pub pos_peak: Temp,
}

impl Default for ControlVariables {
    fn default() -> Self {
        Self {
            beer_diff: Temp::ZERO,
            diff_integral: LongTemp::ZERO,
            beer_slope: Temp::ZERO,
            p: LongTemp::ZERO,
            i: LongTemp::ZERO,
            d: LongTemp::ZERO,
            estimated_peak: Temp::INVALID,
            neg_peak_estimate: Temp::INVALID,
            pos_peak_estimate: Temp::INVALID,
            neg_peak: Temp::INVALID,
            pos_peak: Temp::INVALID,
        }
    }
}

/// Why a stored record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordError {
    UnknownMode(u8),
    InvalidLimits,
    UnknownFormat(u8),
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self, value: u8) {
        self.buf[self.pos] = value;
        self.pos += 1;
    }

    fn u16(&mut self, value: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&value.to_le_bytes());
        self.pos += 2;
    }

    fn temp(&mut self, value: Temp) {
        self.u16(value.raw() as u16);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let value = self.buf[self.pos];
        self.pos += 1;
        value
    }

    fn u16(&mut self) -> u16 {
        let value = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        value
    }

    fn temp(&mut self) -> Temp {
        Temp::from_raw(self.u16() as i16)
    }
}

impl ControlSettings {
    pub const ENCODED_LEN: usize = 9;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        let mut w = Writer::new(&mut buf);
        w.u8(self.mode.as_char() as u8);
        w.temp(self.beer_setting);
        w.temp(self.fridge_setting);
        w.temp(self.heat_estimator);
        w.temp(self.cool_estimator);
        buf
    }

    pub fn decode(buf: &[u8; Self::ENCODED_LEN]) -> Result<Self, RecordError> {
        let mut r = Reader::new(buf);
        let mode_byte = r.u8();
        let mode = Mode::from_char(mode_byte as char).ok_or(RecordError::UnknownMode(mode_byte))?;
        Ok(Self {
            mode,
            beer_setting: r.temp(),
            fridge_setting: r.temp(),
            heat_estimator: r.temp(),
            cool_estimator: r.temp(),
        })
    }
}

impl ControlConstants {
    pub const ENCODED_LEN: usize = 36;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        let mut w = Writer::new(&mut buf);
        w.u8(self.temp_format);
        for value in [
            self.temp_setting_min,
            self.temp_setting_max,
            self.kp,
            self.ki,
            self.kd,
            self.i_max_error,
            self.idle_range_high,
            self.idle_range_low,
            self.heating_target_upper,
            self.heating_target_lower,
            self.cooling_target_upper,
            self.cooling_target_lower,
        ] {
            w.temp(value);
        }
        w.u16(self.max_heat_time_for_estimate);
        w.u16(self.max_cool_time_for_estimate);
        for coefficient in [
            self.fridge_fast_filter,
            self.fridge_slow_filter,
            self.fridge_slope_filter,
            self.beer_fast_filter,
            self.beer_slow_filter,
            self.beer_slope_filter,
        ] {
            w.u8(coefficient);
        }
        w.u8(self.light_as_heater as u8);
        buf
    }

    pub fn decode(buf: &[u8; Self::ENCODED_LEN]) -> Result<Self, RecordError> {
        let mut r = Reader::new(buf);
        let temp_format = r.u8();
        if temp_format != b'C' && temp_format != b'F' {
            return Err(RecordError::UnknownFormat(temp_format));
        }
        let constants = Self {
            temp_format,
            temp_setting_min: r.temp(),
            temp_setting_max: r.temp(),
            kp: r.temp(),
            ki: r.temp(),
            kd: r.temp(),
            i_max_error: r.temp(),
            idle_range_high: r.temp(),
            idle_range_low: r.temp(),
            heating_target_upper: r.temp(),
            heating_target_lower: r.temp(),
            cooling_target_upper: r.temp(),
            cooling_target_lower: r.temp(),
            max_heat_time_for_estimate: r.u16(),
            max_cool_time_for_estimate: r.u16(),
            fridge_fast_filter: r.u8(),
            fridge_slow_filter: r.u8(),
            fridge_slope_filter: r.u8(),
            beer_fast_filter: r.u8(),
            beer_slow_filter: r.u8(),
            beer_slope_filter: r.u8(),
            light_as_heater: r.u8() != 0,
        };
        if !constants.temp_setting_min.is_valid() || constants.temp_setting_min > constants.temp_setting_max {
            return Err(RecordError::InvalidLimits);
        }
        Ok(constants)
    }
}
