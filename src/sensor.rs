//! DS18B20 1-Wire temperature sensor driver.

use embedded_hal_async::delay::DelayNs;

use crate::config::Rom;
use crate::onewire::OneWire;
use crate::temperature::{Temp, FRACTION_BITS};
use crate::CONVERSION_TIME_MS;

/// Maximum number of devices a bus search reports.
pub const MAX_DEVICES: usize = 8;

// DS18B20 readings carry 4 fraction bits
const DEVICE_FRACTION_BITS: u32 = 4;

const SEARCH_ROM: u8 = 0xF0;
const MATCH_ROM: u8 = 0x55;
const SKIP_ROM: u8 = 0xCC;
const CONVERT_T: u8 = 0x44;
const WRITE_SCRATCHPAD: u8 = 0x4E;
const READ_SCRATCHPAD: u8 = 0xBE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// Data arrived but the checksum did not match.
    Crc,
    /// Nothing answered.
    NoDevice,
    /// The device did not accept the resolution.
    Resolution,
}

/// Resolution settings for temperature readings
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    Bits9 = 0x1F,  // 0.5°C resolution, 93.75ms conversion time
    Bits10 = 0x3F, // 0.25°C resolution, 187.5ms conversion time
    Bits11 = 0x5F, // 0.125°C resolution, 375ms conversion time
    Bits12 = 0x7F, // 0.0625°C resolution, 750ms conversion time
}

/// DS18B20 temperature sensor driver
pub struct Ds18b20<W> {
    wire: W,
}

impl<W: OneWire> Ds18b20<W> {
    pub fn new(wire: W) -> Self {
        Self { wire }
    }

    pub fn release(self) -> W {
        self.wire
    }

    /// Enumerate the devices on the bus. Devices whose ROM fails the CRC
    /// check are skipped.
    pub async fn search_for_roms(&mut self) -> Result<[Option<Rom>; MAX_DEVICES], SensorError> {
        let mut devices = [None; MAX_DEVICES];
        let mut device_count = 0;
        // bit positions count from 1, 0 means no branch left to take
        let mut last_discrepancy = 0;
        let mut rom: Rom = [0; 8];

        'search: loop {
            if !self.wire.reset().await {
                break 'search;
            }
            self.wire.write_bytes(&[SEARCH_ROM]).await;
            let mut last_zero = 0;

            for position in 1..=64usize {
                let byte = (position - 1) / 8;
                let mask = 1u8 << ((position - 1) % 8);

                // A bit and its complement
                let id_bit = self.wire.read_bit().await;
                let complement_bit = self.wire.read_bit().await;

                let direction = match (id_bit, complement_bit) {
                    (true, true) => break 'search,
                    (false, false) => {
                        // devices disagree on this bit
                        let direction = if position < last_discrepancy {
                            rom[byte] & mask != 0
                        } else {
                            position == last_discrepancy
                        };
                        if !direction {
                            last_zero = position;
                        }
                        direction
                    }
                    (id_bit, _) => id_bit,
                };

                if direction {
                    rom[byte] |= mask;
                } else {
                    rom[byte] &= !mask;
                }
                self.wire.write_bit(direction).await;
            }

            if crc8(&rom[0..7]) == rom[7] {
                devices[device_count] = Some(rom);
                device_count += 1;
            } else {
                warn!("skipping device with bad ROM CRC");
            }

            last_discrepancy = last_zero;
            if last_discrepancy == 0 || device_count >= MAX_DEVICES {
                break 'search;
            }
        }

        if device_count == 0 {
            return Err(SensorError::NoDevice);
        }
        Ok(devices)
    }

    /// Reset the bus and address one device, or all of them.
    async fn select(&mut self, rom: Option<&Rom>) -> Result<(), SensorError> {
        if !self.wire.reset().await {
            return Err(SensorError::NoDevice);
        }
        match rom {
            Some(rom) => {
                self.wire.write_bytes(&[MATCH_ROM]).await;
                self.wire.write_bytes(rom).await;
            }
            None => self.wire.write_bytes(&[SKIP_ROM]).await,
        }
        Ok(())
    }

    /// Set the resolution for a specific device and read it back.
    pub async fn set_resolution_with_rom(&mut self, rom: &Rom, resolution: Resolution) -> Result<(), SensorError> {
        self.select(Some(rom)).await?;
        self.wire.write_bytes(&[WRITE_SCRATCHPAD, 0x00, 0x00, resolution as u8]).await;

        let data = self.read_scratchpad(Some(rom)).await?;
        if (data[4] & 0x60) == (resolution as u8 & 0x60) {
            Ok(())
        } else {
            Err(SensorError::Resolution)
        }
    }

    /// Set the resolution for all devices (broadcast)
    pub async fn set_resolution(&mut self, resolution: Resolution) -> Result<(), SensorError> {
        self.select(None).await?;
        self.wire.write_bytes(&[WRITE_SCRATCHPAD, 0x00, 0x00, resolution as u8]).await;
        Ok(())
    }

    /// Start a new measurement on one device. Allow the conversion time
    /// before reading.
    pub async fn start_with_rom(&mut self, rom: &Rom) -> Result<(), SensorError> {
        self.select(Some(rom)).await?;
        self.wire.write_bytes(&[CONVERT_T]).await;
        Ok(())
    }

    /// Start a new measurement on every device.
    pub async fn start(&mut self) -> Result<(), SensorError> {
        self.select(None).await?;
        self.wire.write_bytes(&[CONVERT_T]).await;
        Ok(())
    }

    /// Start a measurement on every device and wait out the 12 bit
    /// conversion time.
    pub async fn convert<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), SensorError> {
        self.start().await?;
        delay.delay_ms(CONVERSION_TIME_MS).await;
        Ok(())
    }

    async fn read_scratchpad(&mut self, rom: Option<&Rom>) -> Result<[u8; 9], SensorError> {
        self.select(rom).await?;
        self.wire.write_bytes(&[READ_SCRATCHPAD]).await;
        let mut data = [0u8; 9];
        self.wire.read_bytes(&mut data).await;
        check_scratchpad(&data)?;
        Ok(data)
    }

    /// Raw reading of one device, in 1/16 degree.
    pub async fn raw_temperature_with_rom(&mut self, rom: &Rom) -> Result<i16, SensorError> {
        let data = self.read_scratchpad(Some(rom)).await?;
        Ok(i16::from_le_bytes([data[0], data[1]]))
    }

    /// Reading of one device with `calibration` added.
    pub async fn temperature_with_rom(&mut self, rom: &Rom, calibration: Temp) -> Result<Temp, SensorError> {
        let raw = self.raw_temperature_with_rom(rom).await?;
        Ok(raw_to_temp(raw, calibration))
    }

    /// Reading of the only device on the bus.
    pub async fn temperature(&mut self, calibration: Temp) -> Result<Temp, SensorError> {
        let data = self.read_scratchpad(None).await?;
        Ok(raw_to_temp(i16::from_le_bytes([data[0], data[1]]), calibration))
    }
}

fn check_scratchpad(data: &[u8; 9]) -> Result<(), SensorError> {
    // an idle bus reads all ones, a shorted one all zeros (which passes the CRC)
    if data.iter().all(|b| *b == 0xFF) || data.iter().all(|b| *b == 0x00) {
        return Err(SensorError::NoDevice);
    }
    if crc8(data) != 0 {
        return Err(SensorError::Crc);
    }
    Ok(())
}

/// Convert a DS18B20 reading to [`Temp`], add the calibration offset and
/// clamp to the valid range.
pub fn raw_to_temp(raw: i16, calibration: Temp) -> Temp {
    let value = ((raw as i32) << (FRACTION_BITS - DEVICE_FRACTION_BITS)) + calibration.raw() as i32;
    Temp::from_raw(value.clamp(Temp::MIN.raw() as i32, Temp::MAX.raw() as i32) as i16)
}

/// Format the ROM code as a hex string
pub fn format_rom(rom: &Rom) -> [u8; 16] {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut hex = [0u8; 16];
    for (i, byte) in rom.iter().enumerate() {
        hex[i * 2] = HEX[(byte >> 4) as usize];
        hex[i * 2 + 1] = HEX[(byte & 0xF) as usize];
    }
    hex
}

/// Dallas/Maxim CRC8. Also protects the persisted control records.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0;
    for b in data {
        let mut data_byte = *b;
        for _ in 0..8 {
            let mix = (crc ^ data_byte) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            data_byte >>= 1;
        }
    }
    crc
}


#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    // Known good scratchpad from the datasheet: +25.0625 C
    const SCRATCHPAD_25: [u8; 9] = [0x91, 0x01, 0x4B, 0x46, 0x7F, 0xFF, 0x0F, 0x10, 0x00];

    struct SimDevice {
        rom: Rom,
        scratchpad: [u8; 9],
    }

    /// A DS18B20 answering `raw` (1/16 degree), with a valid ROM built
    /// from `serial`.
    fn device(serial: u8, raw: i16) -> SimDevice {
        let mut rom = [0x28, serial, 0x4C, 0x8A, 0x61, 0x16, 0x04, 0x00];
        rom[7] = crc8(&rom[..7]);
        let mut scratchpad = SCRATCHPAD_25;
        scratchpad[..2].copy_from_slice(&raw.to_le_bytes());
        SimDevice { rom, scratchpad: with_crc(scratchpad) }
    }

    #[derive(Clone, Copy)]
    enum Phase {
        Idle,
        RomCommand { byte: u8, bits: u8 },
        // step 0 sends the ROM bit, step 1 its complement, step 2 takes the direction
        Search { bit: usize, step: u8 },
        Match { bit: usize },
        Function { byte: u8, bits: u8 },
        Read { bit: usize },
        Write { bit: usize },
    }

    /// Devices on a wired-AND bus, modelled one time slot at a time.
    struct SimBus {
        devices: heapless::Vec<SimDevice, 4>,
        selected: [bool; 4],
        phase: Phase,
        conversions: u32,
    }

    impl SimBus {
        fn new<const N: usize>(devices: [SimDevice; N]) -> Self {
            Self {
                devices: devices.into_iter().collect(),
                selected: [false; 4],
                phase: Phase::Idle,
                conversions: 0,
            }
        }

        // every selected device drives the line, any zero wins
        fn wired_and(&self, bit_of: impl Fn(&SimDevice) -> bool) -> bool {
            self.devices.iter().zip(self.selected.iter()).filter(|(_, s)| **s).all(|(d, _)| bit_of(d))
        }

        fn keep_matching(&mut self, bit: usize, value: bool) {
            for (device, selected) in self.devices.iter().zip(self.selected.iter_mut()) {
                if rom_bit(&device.rom, bit) != value {
                    *selected = false;
                }
            }
        }

        fn function(&mut self, command: u8) -> Phase {
            match command {
                READ_SCRATCHPAD => Phase::Read { bit: 0 },
                WRITE_SCRATCHPAD => Phase::Write { bit: 0 },
                CONVERT_T => {
                    self.conversions += 1;
                    Phase::Idle
                }
                _ => Phase::Idle,
            }
        }
    }

    fn rom_bit(rom: &Rom, bit: usize) -> bool {
        (rom[bit / 8] >> (bit % 8)) & 0x01 != 0
    }

    impl OneWire for SimBus {
        async fn reset(&mut self) -> bool {
            self.phase = Phase::RomCommand { byte: 0, bits: 0 };
            self.selected = [true; 4];
            !self.devices.is_empty()
        }

        async fn write_bit(&mut self, value: bool) {
            self.phase = match self.phase {
                Phase::RomCommand { byte, bits } => {
                    let byte = byte | (value as u8) << bits;
                    if bits < 7 {
                        Phase::RomCommand { byte, bits: bits + 1 }
                    } else {
                        match byte {
                            SEARCH_ROM => Phase::Search { bit: 0, step: 0 },
                            MATCH_ROM => Phase::Match { bit: 0 },
                            SKIP_ROM => Phase::Function { byte: 0, bits: 0 },
                            _ => Phase::Idle,
                        }
                    }
                }
                Phase::Search { bit, step: 2 } => {
                    self.keep_matching(bit, value);
                    if bit == 63 {
                        Phase::Idle
                    } else {
                        Phase::Search { bit: bit + 1, step: 0 }
                    }
                }
                Phase::Match { bit } => {
                    self.keep_matching(bit, value);
                    if bit == 63 {
                        Phase::Function { byte: 0, bits: 0 }
                    } else {
                        Phase::Match { bit: bit + 1 }
                    }
                }
                Phase::Function { byte, bits } => {
                    let byte = byte | (value as u8) << bits;
                    if bits < 7 {
                        Phase::Function { byte, bits: bits + 1 }
                    } else {
                        self.function(byte)
                    }
                }
                Phase::Write { bit } => {
                    // TH, TL and config land in bytes 2 to 4
                    let index = 2 + bit / 8;
                    let mask = 1u8 << (bit % 8);
                    for (device, selected) in self.devices.iter_mut().zip(self.selected.iter()) {
                        if *selected {
                            if value {
                                device.scratchpad[index] |= mask;
                            } else {
                                device.scratchpad[index] &= !mask;
                            }
                            device.scratchpad[8] = crc8(&device.scratchpad[..8]);
                        }
                    }
                    if bit == 23 {
                        Phase::Idle
                    } else {
                        Phase::Write { bit: bit + 1 }
                    }
                }
                other => other,
            };
        }

        async fn read_bit(&mut self) -> bool {
            match self.phase {
                Phase::Search { bit, step } if step < 2 => {
                    let complement = step == 1;
                    self.phase = Phase::Search { bit, step: step + 1 };
                    self.wired_and(|d| rom_bit(&d.rom, bit) != complement)
                }
                Phase::Read { bit } if bit < 72 => {
                    self.phase = Phase::Read { bit: bit + 1 };
                    self.wired_and(|d| (d.scratchpad[bit / 8] >> (bit % 8)) & 0x01 != 0)
                }
                // released line
                _ => true,
            }
        }
    }

    fn with_crc(mut data: [u8; 9]) -> [u8; 9] {
        data[8] = crc8(&data[..8]);
        data
    }

    fn found(roms: &[Option<Rom>; MAX_DEVICES]) -> heapless::Vec<u8, MAX_DEVICES> {
        roms.iter().flatten().map(|rom| rom[1]).collect()
    }

    #[test]
    fn crc8_of_datasheet_scratchpad() {
        let data = with_crc(SCRATCHPAD_25);
        assert_eq!(crc8(&data), 0);
    }

    #[test]
    fn search_walks_every_branch_of_the_rom_tree() {
        let mut sensor = Ds18b20::new(SimBus::new([device(0x01, 0), device(0x02, 0), device(0x03, 0)]));
        let roms = block_on(sensor.search_for_roms()).unwrap();
        // zero branches are taken first
        assert_eq!(&found(&roms)[..], &[0x02, 0x01, 0x03]);
        let bus = sensor.release();
        for (rom, device) in roms.iter().flatten().zip([&bus.devices[1], &bus.devices[0], &bus.devices[2]]) {
            assert_eq!(rom, &device.rom);
        }
    }

    #[test]
    fn search_finds_a_lone_device() {
        let mut sensor = Ds18b20::new(SimBus::new([device(0x5A, 0)]));
        let roms = block_on(sensor.search_for_roms()).unwrap();
        assert_eq!(&found(&roms)[..], &[0x5A]);
    }

    #[test]
    fn search_on_an_empty_bus_is_no_device() {
        let mut sensor = Ds18b20::new(SimBus::new([]));
        assert_eq!(block_on(sensor.search_for_roms()), Err(SensorError::NoDevice));
    }

    #[test]
    fn search_skips_device_with_bad_rom_crc() {
        let mut damaged = device(0x02, 0);
        damaged.rom[7] ^= 0xFF;
        let mut sensor = Ds18b20::new(SimBus::new([device(0x01, 0), damaged]));
        let roms = block_on(sensor.search_for_roms()).unwrap();
        assert_eq!(&found(&roms)[..], &[0x01]);
    }

    #[test]
    fn reading_is_converted_to_nine_fraction_bits() {
        // 0x191 / 16 = 25.0625, -162 / 16 = -10.125
        let mut sensor = Ds18b20::new(SimBus::new([device(0x01, 0x191), device(0x02, -162)]));
        let first = sensor.wire.devices[0].rom;
        let second = sensor.wire.devices[1].rom;
        let t = block_on(sensor.temperature_with_rom(&first, Temp::ZERO)).unwrap();
        assert_eq!(t.raw(), 0x191 << 5);
        let t = block_on(sensor.temperature_with_rom(&second, Temp::ZERO)).unwrap();
        assert_eq!(t.raw(), -162 << 5);
    }

    #[test]
    fn resolution_is_written_to_one_device_and_read_back() {
        let mut sensor = Ds18b20::new(SimBus::new([device(0x01, 0), device(0x02, 0)]));
        let rom = sensor.wire.devices[1].rom;
        assert_eq!(block_on(sensor.set_resolution_with_rom(&rom, Resolution::Bits9)), Ok(()));
        let bus = sensor.release();
        assert_eq!(bus.devices[1].scratchpad[4], Resolution::Bits9 as u8);
        assert_eq!(bus.devices[0].scratchpad[4], Resolution::Bits12 as u8);
    }

    #[test]
    fn broadcast_resolution_reaches_every_device() {
        let mut sensor = Ds18b20::new(SimBus::new([device(0x01, 0), device(0x02, 0)]));
        assert_eq!(block_on(sensor.set_resolution(Resolution::Bits10)), Ok(()));
        let bus = sensor.release();
        assert!(bus.devices.iter().all(|d| d.scratchpad[4] == Resolution::Bits10 as u8));
    }

    #[derive(Default)]
    struct CountingDelay {
        ns: u64,
    }

    impl DelayNs for CountingDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.ns += ns as u64;
        }
    }

    #[test]
    fn convert_broadcasts_and_waits() {
        let mut sensor = Ds18b20::new(SimBus::new([device(0x01, 0), device(0x02, 0)]));
        let mut delay = CountingDelay::default();
        assert_eq!(block_on(sensor.convert(&mut delay)), Ok(()));
        assert_eq!(delay.ns, CONVERSION_TIME_MS as u64 * 1_000_000);
        assert_eq!(sensor.release().conversions, 1);
    }

    #[test]
    fn convert_without_presence_pulse_fails_fast() {
        let mut sensor = Ds18b20::new(SimBus::new([]));
        let mut delay = CountingDelay::default();
        assert_eq!(block_on(sensor.convert(&mut delay)), Err(SensorError::NoDevice));
        assert_eq!(delay.ns, 0);
    }

    #[test]
    fn corrupted_scratchpad_is_a_crc_error() {
        let mut corrupted = device(0x01, 0x191);
        corrupted.scratchpad[0] ^= 0x01;
        let mut sensor = Ds18b20::new(SimBus::new([corrupted]));
        assert_eq!(block_on(sensor.temperature(Temp::ZERO)), Err(SensorError::Crc));
    }

    #[test]
    fn silent_bus_is_no_device() {
        let mut sensor = Ds18b20::new(SimBus::new([]));
        assert_eq!(block_on(sensor.temperature(Temp::ZERO)), Err(SensorError::NoDevice));
        // nobody answers to an unknown ROM, the scratchpad reads all ones
        let mut sensor = Ds18b20::new(SimBus::new([device(0x01, 0)]));
        let unknown = device(0x02, 0).rom;
        assert_eq!(block_on(sensor.temperature_with_rom(&unknown, Temp::ZERO)), Err(SensorError::NoDevice));
    }

    #[test]
    fn conversion_clamps_and_applies_calibration() {
        // -10.125 C
        assert_eq!(raw_to_temp(-162, Temp::ZERO).raw(), -162 << 5);
        assert_eq!(raw_to_temp(16 * 20, Temp::from_centi(-50)), Temp::from_centi(1950));
        // 125 C is beyond the narrow range
        assert_eq!(raw_to_temp(2000, Temp::ZERO), Temp::MAX);
        assert!(raw_to_temp(-2000, Temp::ZERO).is_valid());
    }

    #[test]
    fn rom_formats_as_hex() {
        let hex = format_rom(&[0x28, 0xFF, 0x4C, 0x8A, 0x61, 0x16, 0x04, 0x2E]);
        assert_eq!(&hex, b"28FF4C8A6116042E");
    }
}
