//! On/off inputs, such as the chamber door switch.

use embedded_hal::digital::InputPin;

pub trait SwitchSensor {
    /// `true` when the switch is triggered (door open).
    fn sense(&mut self) -> bool;
}

impl<T: SwitchSensor + ?Sized> SwitchSensor for &mut T {
    fn sense(&mut self) -> bool {
        (**self).sense()
    }
}

/// A switch whose value is set in code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueSensor {
    value: bool,
}

impl ValueSensor {
    pub fn new(value: bool) -> Self {
        Self { value }
    }

    pub fn set(&mut self, value: bool) {
        self.value = value;
    }
}

impl SwitchSensor for ValueSensor {
    fn sense(&mut self) -> bool {
        self.value
    }
}

/// Reads a digital input. A door reed switch usually pulls the pin low
/// while the door is closed, so `invert` is false for that wiring.
#[derive(Debug)]
pub struct DigitalPinSwitch<P> {
    pin: P,
    invert: bool,
}

impl<P: InputPin> DigitalPinSwitch<P> {
    pub fn new(pin: P, invert: bool) -> Self {
        Self { pin, invert }
    }
}

impl<P: InputPin> SwitchSensor for DigitalPinSwitch<P> {
    fn sense(&mut self) -> bool {
        match self.pin.is_high() {
            Ok(high) => high ^ self.invert,
            // An unreadable switch is treated as closed
            Err(_) => false,
        }
    }
}
