//! The temperature controller.
//!
//! [`TempControl`] owns the sensors, actuators, board and all control data.
//! The host loop calls, once per second and in this order:
//! [`update_temperatures`](TempControl::update_temperatures),
//! [`update_pid`](TempControl::update_pid),
//! [`update_state`](TempControl::update_state),
//! [`update_outputs`](TempControl::update_outputs) and
//! [`detect_peaks`](TempControl::detect_peaks), or simply
//! [`tick`](TempControl::tick).

use crate::actuator::{Actuator, AutoOffActuator, ValueActuator};
use crate::board::{Annotation, AnnotationSink, Board, Ticks};
use crate::eeprom::EepromManager;
use crate::estimator::{self, Direction, PeakCheck, PeakOutcome};
use crate::pid::{self, IntegralCadence, PidInputs};
use crate::settings::{ControlConstants, ControlSettings, ControlVariables, Mode};
use crate::switch::SwitchSensor;
use crate::temp_sensor::{BasicTempSensor, SensorRole, TempSensor};
use crate::temperature::Temp;
use crate::{
    CAMERA_LIGHT_TIMEOUT, MIN_COOL_OFF_TIME, MIN_COOL_OFF_TIME_FRIDGE_CONSTANT, MIN_COOL_ON_TIME,
    MIN_HEAT_OFF_TIME, MIN_HEAT_ON_TIME, MIN_SWITCH_TIME,
};

// Setpoint changes smaller than this (0.25 degree) are not worth a reset or an EEPROM write
const SETTING_HYSTERESIS: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Startup,
    Idle,
    Heating,
    Cooling,
    DoorOpen,
    Off,
}

/// A change requested from outside the control loop, applied between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SetBeerTemp(Temp),
    SetFridgeTemp(Temp),
    SetMode(Mode),
    TriggerCameraLight,
}

/// The four switched outputs of a chamber.
#[derive(Debug, Default)]
pub struct Actuators<A> {
    pub heater: A,
    pub cooler: A,
    pub light: A,
    pub fan: A,
}

pub struct TempControl<S, A, D, B> {
    beer_sensor: TempSensor<S>,
    fridge_sensor: TempSensor<S>,
    actuators: Actuators<A>,
    camera_light: AutoOffActuator<ValueActuator>,
    door: D,
    board: B,

    cc: ControlConstants,
    cs: ControlSettings,
    cv: ControlVariables,

    state: State,
    do_pos_peak_detect: bool,
    do_neg_peak_detect: bool,
    // beer setting as last written to storage
    stored_beer_setting: Temp,
    integral_cadence: IntegralCadence,

    last_idle_time: u32,
    last_heat_time: u32,
    last_cool_time: u32,
}

impl<S, A, D, B> TempControl<S, A, D, B>
where
    S: BasicTempSensor,
    A: Actuator,
    D: SwitchSensor,
    B: Board,
{
    pub fn new(beer: S, fridge: S, actuators: Actuators<A>, door: D, board: B) -> Self {
        let now = board.seconds();
        Self {
            beer_sensor: TempSensor::new(SensorRole::Beer, beer),
            fridge_sensor: TempSensor::new(SensorRole::Fridge, fridge),
            actuators,
            camera_light: AutoOffActuator::new(CAMERA_LIGHT_TIMEOUT, ValueActuator::default()),
            door,
            board,
            cc: ControlConstants::default(),
            cs: ControlSettings::default(),
            cv: ControlVariables::default(),
            state: State::Startup,
            do_pos_peak_detect: false,
            do_neg_peak_detect: false,
            stored_beer_setting: Temp::INVALID,
            integral_cadence: IntegralCadence::default(),
            last_idle_time: now,
            last_heat_time: now,
            last_cool_time: now,
        }
    }

    /// Power-on initialisation: state Startup, mode Off, sensors connected
    /// and read once. Follow with [`load_settings_and_constants`](Self::load_settings_and_constants).
    pub fn init(&mut self) {
        self.state = State::Startup;
        self.cs.mode = Mode::Off;
        let now = self.board.seconds();
        self.last_idle_time = now;
        self.last_heat_time = now;
        self.last_cool_time = now;
        self.constants_changed();
        self.beer_sensor.init();
        self.fridge_sensor.init();
        self.update_temperatures();
        self.reset();
    }

    /// Forget pending peak detections.
    pub fn reset(&mut self) {
        self.do_pos_peak_detect = false;
        self.do_neg_peak_detect = false;
    }

    /// Run the five per-tick steps in order.
    pub fn tick(&mut self) {
        self.update_temperatures();
        self.update_pid();
        self.update_state();
        self.update_outputs();
        self.detect_peaks();
    }

    pub fn update_temperatures(&mut self) {
        self.beer_sensor.update();
        if !self.beer_sensor.is_connected() && self.cs.mode.is_beer_following() {
            self.beer_sensor.init();
        }
        self.fridge_sensor.update();
        if !self.fridge_sensor.is_connected() {
            self.fridge_sensor.init();
        }
    }

    /// Recompute the chamber setting from the beer setting. Outside the beer
    /// following modes the beer setting is marked undefined instead.
    pub fn update_pid(&mut self) {
        if !self.cs.mode.is_beer_following() {
            self.cs.beer_setting = Temp::INVALID;
            return;
        }
        let inputs = PidInputs {
            beer_slow: self.beer_sensor.read_slow_filtered(),
            beer_slope: self.beer_sensor.read_slope(),
            fridge_fast: self.fridge_sensor.read_fast_filtered(),
        };
        pid::update_pid(&self.cc, &mut self.cs, &mut self.cv, inputs, &mut self.integral_cadence);
    }

    pub fn update_state(&mut self) {
        let previous = self.state;
        self.evaluate_state();
        if self.state != previous {
            debug!("state {:?} -> {:?}", previous, self.state);
        }
    }

    fn evaluate_state(&mut self) {
        if self.door.sense() {
            if self.state != State::DoorOpen {
                self.annotate(Annotation::DoorOpened);
            }
            self.state = State::DoorOpen;
            return;
        }
        let door_just_closed = self.state == State::DoorOpen;
        if door_just_closed {
            self.annotate(Annotation::DoorClosed);
            self.state = State::Idle;
        }

        if self.cs.mode == Mode::Off {
            self.state = State::Off;
            return;
        }
        if !self.cs.fridge_setting.is_valid() {
            self.state = State::Idle;
            return;
        }
        if !self.fridge_sensor.is_connected() || (self.cs.mode.is_beer_following() && !self.beer_sensor.is_connected()) {
            self.state = State::Idle;
            return;
        }
        if door_just_closed {
            return;
        }

        let since_idle = self.time_since_idle();
        let since_cooling = self.time_since_cooling();
        let since_heating = self.time_since_heating();
        let fridge_fast = self.fridge_sensor.read_fast_filtered();
        let beer_fast = self.beer_sensor.read_fast_filtered();
        let now = self.board.seconds();

        match self.state {
            State::Startup | State::Idle | State::Off => {
                self.last_idle_time = now;
                if self.do_neg_peak_detect || self.do_pos_peak_detect {
                    // wait for the peaks before heating or cooling again
                    return;
                }
                let startup = self.state == State::Startup;
                let setting = self.cs.fridge_setting;
                let beer_following = self.cs.mode.is_beer_following();
                if !fridge_fast.is_valid() || (beer_following && !beer_fast.is_valid()) {
                    return;
                }

                if fridge_fast.wide() > setting + self.cc.idle_range_high {
                    let min_off = if beer_following { MIN_COOL_OFF_TIME } else { MIN_COOL_OFF_TIME_FRIDGE_CONSTANT };
                    if beer_following && beer_fast < self.cs.beer_setting {
                        // beer already cold enough
                        return;
                    }
                    if (since_cooling > min_off && since_heating > MIN_SWITCH_TIME) || startup {
                        self.state = State::Cooling;
                    }
                } else if fridge_fast.wide() < setting + self.cc.idle_range_low {
                    if beer_following && beer_fast > self.cs.beer_setting {
                        // beer already warm enough
                        return;
                    }
                    if (since_cooling > MIN_SWITCH_TIME && since_heating > MIN_HEAT_OFF_TIME) || startup {
                        self.state = State::Heating;
                    }
                }
            }
            State::Cooling => {
                self.do_neg_peak_detect = true;
                self.last_cool_time = now;
                self.cv.estimated_peak = estimator::estimated_peak(
                    fridge_fast,
                    self.cs.cool_estimator,
                    since_idle,
                    self.cc.max_cool_time_for_estimate,
                    Direction::Cooling,
                );
                if self.cv.estimated_peak <= self.cs.fridge_setting && since_idle > MIN_COOL_ON_TIME {
                    self.cv.neg_peak_estimate = self.cv.estimated_peak;
                    self.state = State::Idle;
                }
            }
            State::Heating => {
                self.do_pos_peak_detect = true;
                self.last_heat_time = now;
                self.cv.estimated_peak = estimator::estimated_peak(
                    fridge_fast,
                    self.cs.heat_estimator,
                    since_idle,
                    self.cc.max_heat_time_for_estimate,
                    Direction::Heating,
                );
                if self.cv.estimated_peak >= self.cs.fridge_setting && since_idle > MIN_HEAT_ON_TIME {
                    self.cv.pos_peak_estimate = self.cv.estimated_peak;
                    self.state = State::Idle;
                }
            }
            // handled above, the door is closed here
            State::DoorOpen => {}
        }
    }

    fn annotate(&mut self, annotation: Annotation) {
        info!("{}", annotation.message());
        self.board.annotate(annotation);
    }

    /// Drive the actuators from the current state. Does nothing in test
    /// mode.
    pub fn update_outputs(&mut self) {
        if self.cs.mode == Mode::Test {
            return;
        }
        let now = self.board.seconds();
        self.camera_light.update(now);

        let heating = self.state == State::Heating;
        let cooling = self.state == State::Cooling;
        let light_as_heater = self.cc.light_as_heater;
        self.actuators.cooler.set_active(cooling);
        self.actuators.heater.set_active(heating && !light_as_heater);
        self.actuators
            .light
            .set_active(self.state == State::DoorOpen || (heating && light_as_heater) || self.camera_light.is_active());
        self.actuators.fan.set_active(heating || cooling);
    }

    /// Compare the real chamber peaks with their estimates and tune the
    /// estimators.
    pub fn detect_peaks(&mut self) {
        if self.do_pos_peak_detect && self.state != State::Heating {
            let check = PeakCheck {
                direction: Direction::Heating,
                detected: self.fridge_sensor.detect_pos_peak(),
                estimate: self.cv.pos_peak_estimate,
                fridge_fast: self.fridge_sensor.read_fast_filtered(),
                since_active: self.time_since_heating(),
            };
            match estimator::resolve_peak(&check, &self.cc, self.cs.heat_estimator) {
                PeakOutcome::Pending => {}
                PeakOutcome::Abandoned => self.do_pos_peak_detect = false,
                PeakOutcome::Resolved { peak, estimator: adjusted } => {
                    if let Some(new) = adjusted {
                        self.cs.heat_estimator = new;
                    }
                    info!(
                        "positive peak {} estimated {} heat estimator {}",
                        peak,
                        self.cv.pos_peak_estimate,
                        self.cs.heat_estimator
                    );
                    self.cv.pos_peak = peak;
                    self.do_pos_peak_detect = false;
                    if adjusted.is_some() {
                        self.store_settings();
                    }
                }
            }
        }

        if self.do_neg_peak_detect && self.state != State::Cooling {
            let check = PeakCheck {
                direction: Direction::Cooling,
                detected: self.fridge_sensor.detect_neg_peak(),
                estimate: self.cv.neg_peak_estimate,
                fridge_fast: self.fridge_sensor.read_fast_filtered(),
                since_active: self.time_since_cooling(),
            };
            match estimator::resolve_peak(&check, &self.cc, self.cs.cool_estimator) {
                PeakOutcome::Pending => {}
                PeakOutcome::Abandoned => self.do_neg_peak_detect = false,
                PeakOutcome::Resolved { peak, estimator: adjusted } => {
                    if let Some(new) = adjusted {
                        self.cs.cool_estimator = new;
                    }
                    info!(
                        "negative peak {} estimated {} cool estimator {}",
                        peak,
                        self.cv.neg_peak_estimate,
                        self.cs.cool_estimator
                    );
                    self.cv.neg_peak = peak;
                    self.do_neg_peak_detect = false;
                    if adjusted.is_some() {
                        self.store_settings();
                    }
                }
            }
        }
    }

    pub fn time_since_cooling(&self) -> u32 {
        self.board.time_since(self.last_cool_time)
    }

    pub fn time_since_heating(&self) -> u32 {
        self.board.time_since(self.last_heat_time)
    }

    pub fn time_since_idle(&self) -> u32 {
        self.board.time_since(self.last_idle_time)
    }

    /// Fast filtered beer temperature, undefined while the sensor is
    /// disconnected.
    pub fn beer_temp(&self) -> Temp {
        if self.beer_sensor.is_connected() {
            self.beer_sensor.read_fast_filtered()
        } else {
            Temp::INVALID
        }
    }

    pub fn fridge_temp(&self) -> Temp {
        if self.fridge_sensor.is_connected() {
            self.fridge_sensor.read_fast_filtered()
        } else {
            Temp::INVALID
        }
    }

    pub fn beer_setting(&self) -> Temp {
        self.cs.beer_setting
    }

    pub fn fridge_setting(&self) -> Temp {
        self.cs.fridge_setting
    }

    pub fn mode(&self) -> Mode {
        self.cs.mode
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn constants(&self) -> &ControlConstants {
        &self.cc
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.cs
    }

    pub fn variables(&self) -> &ControlVariables {
        &self.cv
    }

    pub fn is_pos_peak_pending(&self) -> bool {
        self.do_pos_peak_detect
    }

    pub fn is_neg_peak_pending(&self) -> bool {
        self.do_neg_peak_detect
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn beer_sensor(&self) -> &TempSensor<S> {
        &self.beer_sensor
    }

    pub fn beer_sensor_mut(&mut self) -> &mut TempSensor<S> {
        &mut self.beer_sensor
    }

    pub fn fridge_sensor(&self) -> &TempSensor<S> {
        &self.fridge_sensor
    }

    pub fn fridge_sensor_mut(&mut self) -> &mut TempSensor<S> {
        &mut self.fridge_sensor
    }

    pub fn actuators(&self) -> &Actuators<A> {
        &self.actuators
    }

    /// Outputs are only touched directly in test mode.
    pub fn actuators_mut(&mut self) -> &mut Actuators<A> {
        &mut self.actuators
    }

    pub fn door_mut(&mut self) -> &mut D {
        &mut self.door
    }

    pub fn set_beer_temp(&mut self, new_temp: Temp) {
        let old = self.cs.beer_setting;
        self.cs.beer_setting = new_temp;
        if (old - new_temp).raw().abs() > SETTING_HYSTERESIS {
            self.reset();
        }
        self.update_pid();
        self.update_state();
        if (self.stored_beer_setting - new_temp).raw().abs() > SETTING_HYSTERESIS {
            self.store_settings();
        }
    }

    pub fn set_fridge_temp(&mut self, new_temp: Temp) {
        self.cs.fridge_setting = new_temp;
        self.reset();
        self.update_pid();
        self.update_state();
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if mode == self.cs.mode {
            return;
        }
        info!("mode {:?} -> {:?}", self.cs.mode, mode);
        self.state = State::Idle;
        self.apply_mode(mode);
        // settle the state now, outputs follow on the next tick
        self.update_pid();
        self.update_state();
        self.store_settings();
    }

    fn apply_mode(&mut self, mode: Mode) {
        self.cs.mode = mode;
        if matches!(mode, Mode::BeerProfile | Mode::Off) {
            // undefined until the host supplies them
            self.cs.beer_setting = Temp::INVALID;
            self.cs.fridge_setting = Temp::INVALID;
        }
    }

    /// Turn the camera light on for [`CAMERA_LIGHT_TIMEOUT`] seconds.
    pub fn trigger_camera_light(&mut self) {
        let now = self.board.seconds();
        self.camera_light.set_active(true, now);
    }

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::SetBeerTemp(t) => self.set_beer_temp(t),
            Command::SetFridgeTemp(t) => self.set_fridge_temp(t),
            Command::SetMode(mode) => self.set_mode(mode),
            Command::TriggerCameraLight => self.trigger_camera_light(),
        }
    }

    /// Replace the constants, apply the filter coefficients and persist.
    pub fn set_constants(&mut self, constants: ControlConstants) {
        self.cc = constants;
        self.constants_changed();
        self.store_constants();
    }

    pub fn constants_changed(&mut self) {
        let cc = self.cc;
        self.fridge_sensor.set_fast_filter_coefficients(cc.fridge_fast_filter);
        self.fridge_sensor.set_slow_filter_coefficients(cc.fridge_slow_filter);
        self.fridge_sensor.set_slope_filter_coefficients(cc.fridge_slope_filter);
        self.beer_sensor.set_fast_filter_coefficients(cc.beer_fast_filter);
        self.beer_sensor.set_slow_filter_coefficients(cc.beer_slow_filter);
        self.beer_sensor.set_slope_filter_coefficients(cc.beer_slope_filter);
    }

    pub fn load_default_settings(&mut self) {
        if self.cs.mode != Mode::Off {
            self.state = State::Idle;
        }
        self.cs = ControlSettings::default();
    }

    pub fn load_default_constants(&mut self) {
        self.cc = ControlConstants::default();
        self.constants_changed();
    }

    pub fn store_settings(&mut self) {
        match EepromManager::store_settings(&mut self.board, &self.cs) {
            Ok(()) => {
                debug!("settings stored");
                self.stored_beer_setting = self.cs.beer_setting;
            }
            Err(e) => warn!("storing settings failed: {:?}", e),
        }
    }

    pub fn store_constants(&mut self) {
        match EepromManager::store_constants(&mut self.board, &self.cc) {
            Ok(()) => debug!("constants stored"),
            Err(e) => warn!("storing constants failed: {:?}", e),
        }
    }

    /// Load the settings record. The stored mode is applied without leaving
    /// the current state, so a controller still in Startup keeps its
    /// exemption from the off times. Returns false when the record was
    /// unusable and nothing changed.
    pub fn load_settings(&mut self) -> bool {
        match EepromManager::load_settings(&mut self.board) {
            Ok(cs) => {
                info!("loaded settings, mode {:?}", cs.mode);
                self.cs = cs;
                self.apply_mode(cs.mode);
                self.stored_beer_setting = cs.beer_setting;
                true
            }
            Err(e) => {
                warn!("loading settings failed: {:?}", e);
                false
            }
        }
    }

    pub fn load_constants(&mut self) -> bool {
        match EepromManager::load_constants(&mut self.board) {
            Ok(cc) => {
                self.cc = cc;
                self.constants_changed();
                true
            }
            Err(e) => {
                warn!("loading constants failed: {:?}", e);
                false
            }
        }
    }

    /// Startup path: use the stored records when the storage is initialized
    /// and both records are intact, otherwise fall back to the factory
    /// defaults and write them back.
    pub fn load_settings_and_constants(&mut self) {
        let initialized = match EepromManager::is_initialized(&mut self.board) {
            Ok(initialized) => initialized,
            Err(e) => {
                warn!("reading storage marker failed: {:?}", e);
                false
            }
        };
        if initialized && self.load_constants() && self.load_settings() {
            return;
        }

        info!("storage not initialized, loading defaults");
        self.load_default_constants();
        self.load_default_settings();
        let result = EepromManager::initialize(&mut self.board, &self.cs, &self.cc);
        match result {
            Ok(()) => self.stored_beer_setting = self.cs.beer_setting,
            Err(e) => warn!("writing defaults failed: {:?}", e),
        }
    }
}
