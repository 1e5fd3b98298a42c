//! Things the controller switches on and off.

use embedded_hal::digital::OutputPin;

/// An actuator simply turns something on or off.
pub trait Actuator {
    fn set_active(&mut self, active: bool);
    fn is_active(&self) -> bool;

    fn activate(&mut self) {
        self.set_active(true);
    }

    fn deactivate(&mut self) {
        self.set_active(false);
    }
}

impl<T: Actuator + ?Sized> Actuator for &mut T {
    fn set_active(&mut self, active: bool) {
        (**self).set_active(active)
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}

/// Remembers the value it was set to. Stands in for hardware that is not
/// fitted, and for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueActuator {
    state: bool,
}

impl ValueActuator {
    pub fn new(initial: bool) -> Self {
        Self { state: initial }
    }
}

impl Actuator for ValueActuator {
    fn set_active(&mut self, active: bool) {
        self.state = active;
    }

    fn is_active(&self) -> bool {
        self.state
    }
}

/// Drives a digital output pin. With `invert` the pin is low while active,
/// which is how most relay boards are wired.
#[derive(Debug)]
pub struct DigitalPinActuator<P> {
    pin: P,
    invert: bool,
    active: bool,
}

impl<P: OutputPin> DigitalPinActuator<P> {
    pub fn new(pin: P, invert: bool) -> Self {
        let mut actuator = Self { pin, invert, active: true };
        actuator.set_active(false);
        actuator
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> Actuator for DigitalPinActuator<P> {
    fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        let high = active ^ self.invert;
        let result = if high { self.pin.set_high() } else { self.pin.set_low() };
        if result.is_err() {
            warn!("failed to drive actuator pin");
            return;
        }
        self.active = active;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Wraps another actuator and switches it off again once it has been on
/// for `timeout` seconds. [`AutoOffActuator::update`] has to be called
/// regularly with the current time.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoOffActuator<A> {
    target: A,
    timeout: u32,
    last_active_time: u32,
}

impl<A: Actuator> AutoOffActuator<A> {
    pub fn new(timeout: u32, target: A) -> Self {
        Self { target, timeout, last_active_time: 0 }
    }

    pub fn set_active(&mut self, active: bool, now: u32) {
        self.target.set_active(active);
        if active {
            self.last_active_time = now;
        }
    }

    pub fn update(&mut self, now: u32) {
        if self.target.is_active() && now.wrapping_sub(self.last_active_time) >= self.timeout {
            self.target.set_active(false);
        }
    }

    pub fn is_active(&self) -> bool {
        self.target.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    #[derive(Default)]
    struct RecordingPin {
        high: bool,
        writes: u8,
    }

    impl embedded_hal::digital::ErrorType for RecordingPin {
        type Error = Infallible;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.high = false;
            self.writes += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.high = true;
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn pin_actuator_starts_inactive() {
        let actuator = DigitalPinActuator::new(RecordingPin::default(), false);
        assert!(!actuator.is_active());
        let pin = actuator.release();
        assert!(!pin.high);
        assert_eq!(pin.writes, 1);
    }

    #[test]
    fn inverted_pin_is_low_while_active() {
        let mut actuator = DigitalPinActuator::new(RecordingPin::default(), true);
        assert!(actuator.pin.high);
        actuator.activate();
        assert!(actuator.is_active());
        assert!(!actuator.pin.high);
    }

    #[test]
    fn unchanged_state_does_not_touch_pin() {
        let mut actuator = DigitalPinActuator::new(RecordingPin::default(), false);
        actuator.set_active(true);
        actuator.set_active(true);
        actuator.set_active(true);
        assert_eq!(actuator.release().writes, 2);
    }

    #[test]
    fn auto_off_switches_off_after_timeout() {
        let mut light = AutoOffActuator::new(600, ValueActuator::default());
        light.set_active(true, 1000);
        light.update(1599);
        assert!(light.is_active());
        light.update(1600);
        assert!(!light.is_active());
    }
}
