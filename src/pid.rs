//! Translates a beer setpoint into a chamber setpoint.
//!
//! The chamber setpoint is `beer setting + P + I + D`, clamped to the
//! configured limits. The integral only moves on a slow cadence and is kept
//! from winding up while the chamber cannot follow.

use crate::settings::{ControlConstants, ControlSettings, ControlVariables};
use crate::temperature::{multiply, multiply_long, LongTemp, Temp};
use crate::INTEGRAL_UPDATE_INTERVAL;

// Chamber this far from its setting means the actuator is already flat out
const SATURATION_MARGIN: Temp = Temp::from_degrees(2);

/// Filtered readings the translator works from.
#[derive(Debug, Clone, Copy)]
pub struct PidInputs {
    pub beer_slow: Temp,
    pub beer_slope: Temp,
    pub fridge_fast: Temp,
}

/// Counts `update_pid` calls so the integral only moves once per
/// [`INTEGRAL_UPDATE_INTERVAL`] calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegralCadence {
    calls: u8,
}

impl IntegralCadence {
    /// Count one call. Returns true on every `INTEGRAL_UPDATE_INTERVAL`th.
    pub fn tick(&mut self) -> bool {
        self.calls += 1;
        if self.calls >= INTEGRAL_UPDATE_INTERVAL {
            self.calls = 0;
            true
        } else {
            false
        }
    }
}

/// One step of the translator for the beer following modes.
///
/// An undefined beer setting makes the chamber setting undefined as well and
/// nothing else is computed. An undefined beer reading leaves everything as
/// it was; the state machine idles on the disconnected sensor.
pub fn update_pid(
    cc: &ControlConstants,
    cs: &mut ControlSettings,
    cv: &mut ControlVariables,
    inputs: PidInputs,
    cadence: &mut IntegralCadence,
) {
    if !cs.beer_setting.is_valid() {
        cs.fridge_setting = Temp::INVALID;
        return;
    }
    if !inputs.beer_slow.is_valid() {
        return;
    }

    cv.beer_diff = (cs.beer_setting - inputs.beer_slow).saturate();
    cv.beer_slope = if inputs.beer_slope.is_valid() { inputs.beer_slope } else { Temp::ZERO };

    if cadence.tick() {
        cv.diff_integral = next_integral(cc, cs, cv.beer_diff, cv.diff_integral, inputs.fridge_fast);
    }

    cv.p = multiply(cc.kp, cv.beer_diff);
    cv.i = multiply_long(cc.ki, cv.diff_integral);
    cv.d = multiply(cc.kd, cv.beer_slope);
    cs.fridge_setting = (cs.beer_setting.wide() + cv.p + cv.i + cv.d).clamp_to(cc.temp_setting_min, cc.temp_setting_max);
}

fn next_integral(cc: &ControlConstants, cs: &ControlSettings, diff: Temp, integral: LongTemp, fridge_fast: Temp) -> LongTemp {
    if diff.abs() >= cc.i_max_error {
        // far from target: bleed off an eighth
        return integral - integral.shr(3);
    }
    if (diff >= Temp::ZERO) != (integral >= LongTemp::ZERO) {
        // correcting, unwind faster than it grows
        return integral + diff.wide().scale(4);
    }
    if output_saturated(cc, cs, diff, fridge_fast) {
        return integral;
    }
    integral + diff
}

fn output_saturated(cc: &ControlConstants, cs: &ControlSettings, diff: Temp, fridge_fast: Temp) -> bool {
    let setting = cs.fridge_setting;
    if !setting.is_valid() || !fridge_fast.is_valid() {
        return true;
    }
    if setting == cc.temp_setting_max && setting == cc.temp_setting_min {
        return true;
    }
    // cooling, but the chamber is still more than 2 degrees above its setting
    if diff < Temp::ZERO && setting + SATURATION_MARGIN < fridge_fast.wide() {
        return true;
    }
    // heating, but the chamber is still more than 2 degrees below its setting
    diff > Temp::ZERO && setting - SATURATION_MARGIN > fridge_fast.wide()
}
