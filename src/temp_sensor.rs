//! Temperature sensors as seen by the controller.
//!
//! A [`BasicTempSensor`] only knows how to produce a reading. [`TempSensor`]
//! wraps one and adds the fast, slow and slope filters plus peak detection
//! that the control loop works from.

use crate::filter::{CascadedFilter, EXTRA_BITS};
use crate::temperature::Temp;

/// Which sensor a [`TempSensor`] is, used for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorRole {
    Beer,
    Fridge,
}

/// A raw temperature source.
pub trait BasicTempSensor {
    fn is_connected(&self) -> bool;

    /// Try to (re)connect. Returns the first reading, or [`Temp::INVALID`]
    /// when the device did not answer.
    fn init(&mut self) -> Temp;

    /// Latest reading, [`Temp::INVALID`] when disconnected.
    fn read(&mut self) -> Temp;
}

impl<T: BasicTempSensor + ?Sized> BasicTempSensor for &mut T {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn init(&mut self) -> Temp {
        (**self).init()
    }

    fn read(&mut self) -> Temp {
        (**self).read()
    }
}

/// A sensor whose value is set in code rather than read from a device.
///
/// The firmware's bus code pushes DS18B20 readings into one of these, and
/// tests and simulations use it directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalTempSensor {
    temperature: Temp,
    connected: bool,
}

impl ExternalTempSensor {
    pub fn new(connected: bool) -> Self {
        Self { temperature: Temp::ZERO, connected }
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn set_value(&mut self, temperature: Temp) {
        self.temperature = temperature;
    }
}

impl BasicTempSensor for ExternalTempSensor {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn init(&mut self) -> Temp {
        self.read()
    }

    fn read(&mut self) -> Temp {
        if !self.connected {
            return Temp::INVALID;
        }
        self.temperature
    }
}

/// Placeholder for a sensor that has not been configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedTempSensor;

impl BasicTempSensor for DisconnectedTempSensor {
    fn is_connected(&self) -> bool {
        false
    }

    fn init(&mut self) -> Temp {
        Temp::INVALID
    }

    fn read(&mut self) -> Temp {
        Temp::INVALID
    }
}

// Slow filter output is differenced every this many samples to feed the slope filter
const SLOPE_INTERVAL: u8 = 3;
// Differences over SLOPE_INTERVAL seconds, scaled to one hour
const SLOPE_SCALE: i32 = 3600 / SLOPE_INTERVAL as i32;
// Largest difference whose scaled value still fits the narrow format
const SLOPE_DIFF_LIMIT: i32 = ((i16::MAX as i32) << EXTRA_BITS) / SLOPE_SCALE;

/// Filtered view of a [`BasicTempSensor`].
#[derive(Debug)]
pub struct TempSensor<S> {
    role: SensorRole,
    sensor: S,
    fast: CascadedFilter,
    slow: CascadedFilter,
    slope: CascadedFilter,
    prev_output_for_slope: i32,
    update_counter: u8,
    failed_read_count: u8,
    initialized: bool,
    was_connected: bool,
}

impl<S: BasicTempSensor> TempSensor<S> {
    pub fn new(role: SensorRole, sensor: S) -> Self {
        Self {
            role,
            sensor,
            fast: CascadedFilter::default(),
            slow: CascadedFilter::default(),
            slope: CascadedFilter::default(),
            prev_output_for_slope: 0,
            update_counter: SLOPE_INTERVAL,
            failed_read_count: 0,
            initialized: false,
            was_connected: false,
        }
    }

    pub fn role(&self) -> SensorRole {
        self.role
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    /// (Re)connect the underlying sensor and seed the filters from its first
    /// reading.
    pub fn init(&mut self) {
        let temperature = self.sensor.init();
        if temperature.is_valid() {
            self.seed(temperature);
        }
        self.note_connection();
    }

    fn seed(&mut self, temperature: Temp) {
        self.fast.init(temperature);
        self.slow.init(temperature);
        self.slope.init(Temp::ZERO);
        self.prev_output_for_slope = self.slow.read_output_double_precision();
        self.update_counter = SLOPE_INTERVAL;
        self.initialized = true;
    }

    /// Take a new reading and run it through the filters. A failed read
    /// leaves the filters untouched, the first good read after one seeds
    /// them again.
    pub fn update(&mut self) {
        let temperature = self.sensor.read();
        if !temperature.is_valid() {
            self.failed_read_count = self.failed_read_count.saturating_add(1).min(127);
            self.note_connection();
            return;
        }
        let reconnected = self.failed_read_count > 0;
        self.failed_read_count = 0;
        self.note_connection();
        if !self.initialized || reconnected {
            self.seed(temperature);
            return;
        }

        self.fast.add(temperature);
        self.slow.add(temperature);

        self.update_counter -= 1;
        if self.update_counter == 0 {
            let output = self.slow.read_output_double_precision();
            let diff = (output - self.prev_output_for_slope).clamp(-SLOPE_DIFF_LIMIT, SLOPE_DIFF_LIMIT);
            self.slope.add_double_precision(diff * SLOPE_SCALE);
            self.prev_output_for_slope = output;
            self.update_counter = SLOPE_INTERVAL;
        }
    }

    fn note_connection(&mut self) {
        let connected = self.sensor.is_connected();
        if connected != self.was_connected {
            if connected {
                info!("{:?} sensor connected", self.role);
            } else {
                warn!("{:?} sensor disconnected", self.role);
            }
            self.was_connected = connected;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sensor.is_connected()
    }

    pub fn failed_read_count(&self) -> u8 {
        self.failed_read_count
    }

    pub fn read_fast_filtered(&self) -> Temp {
        if self.initialized { self.fast.read_output() } else { Temp::INVALID }
    }

    pub fn read_slow_filtered(&self) -> Temp {
        if self.initialized { self.slow.read_output() } else { Temp::INVALID }
    }

    /// Rate of change in degrees per hour.
    pub fn read_slope(&self) -> Temp {
        if self.initialized { self.slope.read_output() } else { Temp::INVALID }
    }

    pub fn detect_pos_peak(&self) -> Option<Temp> {
        if self.initialized { self.slow.detect_pos_peak() } else { None }
    }

    pub fn detect_neg_peak(&self) -> Option<Temp> {
        if self.initialized { self.slow.detect_neg_peak() } else { None }
    }

    pub fn set_fast_filter_coefficients(&mut self, b: u8) {
        self.fast.set_coefficients(b);
    }

    pub fn set_slow_filter_coefficients(&mut self, b: u8) {
        self.slow.set_coefficients(b);
    }

    pub fn set_slope_filter_coefficients(&mut self, b: u8) {
        self.slope.set_coefficients(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fridge(temperature: Temp) -> TempSensor<ExternalTempSensor> {
        let mut raw = ExternalTempSensor::new(true);
        raw.set_value(temperature);
        let mut sensor = TempSensor::new(SensorRole::Fridge, raw);
        sensor.init();
        sensor
    }

    #[test]
    fn readings_are_invalid_until_first_value() {
        let mut sensor = TempSensor::new(SensorRole::Beer, ExternalTempSensor::new(false));
        sensor.init();
        assert!(!sensor.is_connected());
        assert_eq!(sensor.read_fast_filtered(), Temp::INVALID);
        assert_eq!(sensor.read_slow_filtered(), Temp::INVALID);
        assert_eq!(sensor.read_slope(), Temp::INVALID);
        assert_eq!(sensor.detect_pos_peak(), None);
    }

    #[test]
    fn init_seeds_filters() {
        let sensor = fridge(Temp::from_degrees(12));
        assert_eq!(sensor.read_fast_filtered(), Temp::from_degrees(12));
        assert_eq!(sensor.read_slow_filtered(), Temp::from_degrees(12));
        assert_eq!(sensor.read_slope(), Temp::ZERO);
    }

    #[test]
    fn failed_reads_leave_filters_untouched() {
        let mut sensor = fridge(Temp::from_degrees(12));
        sensor.sensor_mut().set_connected(false);
        for _ in 0..5 {
            sensor.update();
        }
        assert_eq!(sensor.failed_read_count(), 5);
        assert_eq!(sensor.read_fast_filtered(), Temp::from_degrees(12));

        sensor.sensor_mut().set_connected(true);
        sensor.update();
        assert_eq!(sensor.failed_read_count(), 0);
    }

    #[test]
    fn reconnected_sensor_starts_from_its_new_reading() {
        let mut sensor = fridge(Temp::from_degrees(20));
        sensor.sensor_mut().set_connected(false);
        for _ in 0..10 {
            sensor.update();
        }
        sensor.sensor_mut().set_value(Temp::from_degrees(5));
        sensor.sensor_mut().set_connected(true);
        sensor.update();
        assert!(sensor.is_connected());
        assert_eq!(sensor.read_fast_filtered(), Temp::from_degrees(5));
        assert_eq!(sensor.read_slow_filtered(), Temp::from_degrees(5));
        assert_eq!(sensor.read_slope(), Temp::ZERO);
    }

    #[test]
    fn first_valid_reading_seeds_uninitialized_sensor() {
        let mut sensor = TempSensor::new(SensorRole::Beer, ExternalTempSensor::new(false));
        sensor.init();
        sensor.sensor_mut().set_connected(true);
        sensor.sensor_mut().set_value(Temp::from_degrees(19));
        sensor.update();
        assert_eq!(sensor.read_slow_filtered(), Temp::from_degrees(19));
    }

    #[test]
    fn rising_temperature_gives_positive_slope() {
        let mut sensor = fridge(Temp::from_degrees(10));
        sensor.set_fast_filter_coefficients(1);
        sensor.set_slow_filter_coefficients(3);
        let mut value = Temp::from_degrees(10);
        for _ in 0..120 {
            // 0.01 degree per second, 36 degrees per hour
            value = (value + Temp::from_raw(5)).saturate();
            sensor.sensor_mut().set_value(value);
            sensor.update();
        }
        assert!(sensor.read_slope() > Temp::from_degrees(10));
        assert!(sensor.read_fast_filtered() > sensor.read_slow_filtered());
    }

    #[test]
    fn peak_is_reported_once_the_slow_filter_turns() {
        let mut sensor = fridge(Temp::from_degrees(10));
        sensor.set_slow_filter_coefficients(0);
        let mut detected = None;
        for step in [11, 12, 13, 12, 11] {
            sensor.sensor_mut().set_value(Temp::from_degrees(step));
            sensor.update();
            if let Some(peak) = sensor.detect_pos_peak() {
                detected = Some(peak);
            }
        }
        assert_eq!(detected, Some(Temp::from_degrees(13)));
    }
}
