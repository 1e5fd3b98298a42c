//! Board wiring, resolved once at startup.

use crate::temperature::Temp;

pub type Rom = [u8; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Relay boards usually switch on a low input.
    pub invert_heater: bool,
    pub invert_cooler: bool,
    pub invert_light: bool,
    pub invert_fan: bool,
    pub invert_door: bool,
    pub beer_rom: Option<Rom>,
    pub fridge_rom: Option<Rom>,
    /// Added to every reading of the sensor.
    pub beer_calibration: Temp,
    pub fridge_calibration: Temp,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            invert_heater: true,
            invert_cooler: true,
            invert_light: true,
            invert_fan: true,
            invert_door: false,
            beer_rom: None,
            fridge_rom: None,
            beer_calibration: Temp::ZERO,
            fridge_calibration: Temp::ZERO,
        }
    }
}

impl DeviceConfig {
    /// Fill in the sensors that have no ROM configured from the devices found
    /// on the bus. The first unclaimed device becomes the fridge sensor, the
    /// next one the beer sensor.
    pub fn assign_roms(&mut self, found: &[Option<Rom>]) {
        let mut unclaimed = found
            .iter()
            .flatten()
            .filter(|rom| Some(**rom) != self.beer_rom && Some(**rom) != self.fridge_rom)
            .copied();
        let mut fridge_rom = self.fridge_rom;
        let mut beer_rom = self.beer_rom;
        if fridge_rom.is_none() {
            fridge_rom = unclaimed.next();
        }
        if beer_rom.is_none() {
            beer_rom = unclaimed.next();
        }
        self.fridge_rom = fridge_rom;
        self.beer_rom = beer_rom;
    }
}
