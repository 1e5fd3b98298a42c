//! Overshoot estimator.
//!
//! After the heater or cooler switches off the chamber keeps drifting. The
//! estimators in [`ControlSettings`](crate::settings::ControlSettings)
//! predict that drift in degrees per hour of active time. When the real peak
//! shows up it is compared with the prediction and the estimator is scaled
//! up or down.

use crate::settings::ControlConstants;
use crate::temperature::{LongTemp, Temp, FRACTION_BITS};
use crate::{COOL_PEAK_DETECT_TIME, HEAT_PEAK_DETECT_TIME};

/// Estimators never drop below this, so they can always grow back.
pub const ESTIMATOR_FLOOR: Temp = Temp::from_raw(25);

// 1.2 and 0.833 in 23.9 format, plus the most the error may add or take
const INCREASE_BASE: i32 = 614;
const INCREASE_SPAN: i32 = 154;
const DECREASE_BASE: i32 = 426;
const DECREASE_SPAN: i32 = 85;

// The drift branch may fire this many seconds before the window closes
const DRIFT_MARGIN: u32 = 10;

/// Which way the chamber was being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Heating,
    Cooling,
}

impl Direction {
    /// Seconds after switching off during which a peak is looked for.
    pub const fn detect_time(self) -> u32 {
        match self {
            Direction::Heating => HEAT_PEAK_DETECT_TIME,
            Direction::Cooling => COOL_PEAK_DETECT_TIME,
        }
    }

    fn targets(self, cc: &ControlConstants) -> (Temp, Temp) {
        match self {
            Direction::Heating => (cc.heating_target_lower, cc.heating_target_upper),
            Direction::Cooling => (cc.cooling_target_lower, cc.cooling_target_upper),
        }
    }
}

fn error_step(error: Temp) -> i32 {
    (error.raw() as i32).abs() >> 5
}

fn rescale(estimator: Temp, factor: i32) -> Temp {
    estimator.wide().scale(factor).shr(FRACTION_BITS).clamp_to(ESTIMATOR_FLOOR, Temp::MAX)
}

/// Scale up by 1.2 to 1.5, more for a larger error.
pub fn increase_estimator(estimator: Temp, error: Temp) -> Temp {
    rescale(estimator, INCREASE_BASE + error_step(error).clamp(0, INCREASE_SPAN))
}

/// Scale down by 0.833 to 0.667, more for a larger error.
pub fn decrease_estimator(estimator: Temp, error: Temp) -> Temp {
    rescale(estimator, DECREASE_BASE - error_step(error).clamp(0, DECREASE_SPAN))
}

/// Where the chamber is expected to end up if the output switches off now.
///
/// `active_time` is capped at `max_time` so a long run does not extrapolate
/// without bound. Heating overshoots upwards, cooling downwards.
pub fn estimated_peak(fridge_fast: Temp, estimator: Temp, active_time: u32, max_time: u16, direction: Direction) -> Temp {
    if !fridge_fast.is_valid() || !estimator.is_valid() {
        return fridge_fast;
    }
    let active_time = active_time.min(max_time as u32) as i32;
    let overshoot = LongTemp::from_raw(estimator.raw() as i32 * active_time / 3600);
    match direction {
        Direction::Heating => (fridge_fast.wide() + overshoot).saturate(),
        // cooling keeps pulling the chamber down after the compressor stops
        Direction::Cooling => (fridge_fast.wide() - overshoot).saturate(),
    }
}

/// Everything known about a pending peak detection at one moment.
#[derive(Debug, Clone, Copy)]
pub struct PeakCheck {
    pub direction: Direction,
    /// Peak reported by the chamber sensor, if any.
    pub detected: Option<Temp>,
    /// Estimated peak recorded when the output switched off.
    pub estimate: Temp,
    pub fridge_fast: Temp,
    /// Seconds since the output was last active.
    pub since_active: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeakOutcome {
    /// Keep looking.
    Pending,
    /// A peak was found (or the chamber drifted too slowly). `estimator`
    /// holds the new value when it changed.
    Resolved { peak: Temp, estimator: Option<Temp> },
    /// The window closed without a usable peak.
    Abandoned,
}

/// Decide what a pending detection amounts to.
pub fn resolve_peak(check: &PeakCheck, cc: &ControlConstants, estimator: Temp) -> PeakOutcome {
    let (lower, upper) = check.direction.targets(cc);

    if let Some(peak) = check.detected {
        if !check.estimate.is_valid() {
            return PeakOutcome::Resolved { peak, estimator: None };
        }
        let error = (peak - check.estimate).saturate();
        // For heating a high peak means too little overshoot was expected,
        // for cooling a low one does.
        let (too_small, too_large) = match check.direction {
            Direction::Heating => (error > upper, error < lower),
            Direction::Cooling => (error < lower, error > upper),
        };
        let adjusted = if too_small {
            Some(increase_estimator(estimator, error))
        } else if too_large {
            Some(decrease_estimator(estimator, error))
        } else {
            None
        };
        return PeakOutcome::Resolved { peak, estimator: adjusted };
    }

    let window = check.direction.detect_time();
    if check.since_active.saturating_add(DRIFT_MARGIN) > window && check.estimate.is_valid() && check.fridge_fast.is_valid() {
        let drifting = match check.direction {
            Direction::Heating => check.fridge_fast.wide() < check.estimate + lower,
            Direction::Cooling => check.fridge_fast.wide() > check.estimate + upper,
        };
        if drifting {
            // the chamber moved the right way but never got there
            let error = (check.fridge_fast - check.estimate).saturate();
            return PeakOutcome::Resolved {
                peak: check.fridge_fast,
                estimator: Some(decrease_estimator(estimator, error)),
            };
        }
    }

    if check.since_active > window {
        PeakOutcome::Abandoned
    } else {
        PeakOutcome::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(direction: Direction, detected: Option<Temp>, estimate: Temp) -> PeakCheck {
        PeakCheck { direction, detected, estimate, fridge_fast: estimate, since_active: 60 }
    }

    #[test]
    fn increase_stays_between_1_2_and_1_5() {
        let est = Temp::from_degrees(5);
        let small = increase_estimator(est, Temp::ZERO);
        assert_eq!(small.raw(), ((2560_i32 * 614) >> 9) as i16);
        let huge = increase_estimator(est, Temp::from_degrees(-20));
        assert_eq!(huge.raw(), ((2560_i32 * (614 + 154)) >> 9) as i16);
        assert!(huge.raw() as i32 * 2 <= est.raw() as i32 * 3);
    }

    #[test]
    fn decrease_stays_between_0_667_and_0_833() {
        let est = Temp::from_degrees(5);
        assert_eq!(decrease_estimator(est, Temp::ZERO).raw(), ((2560_i32 * 426) >> 9) as i16);
        assert_eq!(decrease_estimator(est, Temp::from_degrees(10)).raw(), ((2560_i32 * 341) >> 9) as i16);
    }

    #[test]
    fn estimator_saturates_and_has_a_floor() {
        assert_eq!(increase_estimator(Temp::MAX, Temp::ZERO), Temp::MAX);
        assert_eq!(decrease_estimator(Temp::from_raw(26), Temp::ZERO), ESTIMATOR_FLOOR);
        assert!(increase_estimator(ESTIMATOR_FLOOR, Temp::ZERO) > ESTIMATOR_FLOOR);
    }

    #[test]
    fn estimated_peak_is_capped_by_max_time() {
        let fridge = Temp::from_degrees(10);
        let est = Temp::from_degrees(6);
        // 6 degrees per hour for 10 minutes
        let after_600 = estimated_peak(fridge, est, 600, 600, Direction::Heating);
        assert_eq!(after_600, Temp::from_degrees(11));
        assert_eq!(estimated_peak(fridge, est, 7200, 600, Direction::Heating), after_600);
        assert_eq!(estimated_peak(fridge, est, 600, 1200, Direction::Cooling), Temp::from_degrees(9));
        assert_eq!(estimated_peak(Temp::INVALID, est, 600, 1200, Direction::Cooling), Temp::INVALID);
    }

    #[test]
    fn cooling_overshoot_lands_below_the_chamber() {
        let fridge = Temp::from_degrees(20);
        // 3 degrees per hour for 20 minutes
        let est = Temp::from_degrees(3);
        assert_eq!(estimated_peak(fridge, est, 1200, 1200, Direction::Cooling), Temp::from_degrees(19));
        assert_eq!(estimated_peak(fridge, est, 1200, 1200, Direction::Heating), Temp::from_degrees(21));
    }

    #[test]
    fn higher_heating_peak_increases_estimator() {
        let cc = ControlConstants::default();
        let estimate = Temp::from_degrees(20);
        let outcome = resolve_peak(&check(Direction::Heating, Some(Temp::from_centi(2050)), estimate), &cc, Temp::from_centi(20));
        match outcome {
            PeakOutcome::Resolved { peak, estimator: Some(new) } => {
                assert_eq!(peak, Temp::from_centi(2050));
                assert!(new > Temp::from_centi(20));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn peak_within_targets_keeps_estimator() {
        let cc = ControlConstants::default();
        let estimate = Temp::from_degrees(4);
        let outcome = resolve_peak(&check(Direction::Cooling, Some(Temp::from_centi(390)), estimate), &cc, Temp::from_degrees(5));
        assert_eq!(outcome, PeakOutcome::Resolved { peak: Temp::from_centi(390), estimator: None });
    }

    #[test]
    fn deeper_cooling_peak_increases_and_shallower_decreases() {
        let cc = ControlConstants::default();
        let est = Temp::from_degrees(5);
        let estimate = Temp::from_degrees(4);
        let deeper = resolve_peak(&check(Direction::Cooling, Some(Temp::from_centi(350)), estimate), &cc, est);
        assert!(matches!(deeper, PeakOutcome::Resolved { estimator: Some(new), .. } if new > est));
        let shallower = resolve_peak(&check(Direction::Cooling, Some(Temp::from_centi(450)), estimate), &cc, est);
        assert!(matches!(shallower, PeakOutcome::Resolved { estimator: Some(new), .. } if new < est));
    }

    #[test]
    fn slow_drift_near_window_end_decreases_estimator() {
        let cc = ControlConstants::default();
        let est = Temp::from_centi(20);
        let mut c = check(Direction::Heating, None, Temp::from_degrees(20));
        c.fridge_fast = Temp::from_centi(1950);
        c.since_active = HEAT_PEAK_DETECT_TIME - 5;
        let outcome = resolve_peak(&c, &cc, est);
        assert_eq!(
            outcome,
            PeakOutcome::Resolved {
                peak: Temp::from_centi(1950),
                estimator: Some(decrease_estimator(est, Temp::from_centi(-50))),
            }
        );

        c.since_active = 100;
        assert_eq!(resolve_peak(&c, &cc, est), PeakOutcome::Pending);
    }

    #[test]
    fn closed_window_abandons_without_adjusting() {
        let cc = ControlConstants::default();
        let mut c = check(Direction::Cooling, None, Temp::from_degrees(4));
        c.since_active = COOL_PEAK_DETECT_TIME + 1;
        assert_eq!(resolve_peak(&c, &cc, Temp::from_degrees(5)), PeakOutcome::Abandoned);
    }
}
