#![no_std]
#![no_main]

use defmt::*;

use embassy_executor::Spawner;
use embassy_rp::flash::{Blocking, Flash, ERASE_SIZE};
use embassy_rp::gpio::{Input, Level, Output, OutputOpenDrain, Pull};
use embassy_rp::peripherals::FLASH;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Delay, Duration, Instant, Ticker};
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

use auto_ferment_rs::actuator::DigitalPinActuator;
use auto_ferment_rs::board::{Annotation, AnnotationSink, Eeprom, Ticks};
use auto_ferment_rs::config::{DeviceConfig, Rom};
use auto_ferment_rs::control::Actuators;
use auto_ferment_rs::eeprom::STORAGE_SIZE;
use auto_ferment_rs::onewire::PinBus;
use auto_ferment_rs::sensor::{format_rom, Ds18b20, Resolution};
use auto_ferment_rs::switch::DigitalPinSwitch;
use auto_ferment_rs::temp_sensor::ExternalTempSensor;
use auto_ferment_rs::{Temp, TempControl};

const FLASH_SIZE: usize = 2 * 1024 * 1024; // Raspberry Pi Pico
const SETTINGS_SECTOR: u32 = (FLASH_SIZE - ERASE_SIZE) as u32; // Last sector holds the control records
const FLASH_PAGE: usize = 256;
const ANNOTATION_QUEUE: usize = 4;

type AnnotationChannel = Channel<CriticalSectionRawMutex, Annotation, ANNOTATION_QUEUE>;

static ANNOTATIONS: StaticCell<AnnotationChannel> = StaticCell::new();

/// Thermometer bus, bit-banged on an open drain pin with an external pull-up.
type Thermometers = Ds18b20<PinBus<OutputOpenDrain<'static>, Delay>>;

#[derive(Debug, Format)]
enum StorageError {
    Flash,
    OutOfRange,
}

/// Seconds from the embassy clock, records in the last flash sector,
/// annotations to the logging task.
struct PicoBoard {
    flash: Flash<'static, FLASH, Blocking, FLASH_SIZE>,
    // RAM copy of the records; flash is rewritten as a whole on every store
    mirror: [u8; STORAGE_SIZE],
    annotations: &'static AnnotationChannel,
}

impl PicoBoard {
    fn new(mut flash: Flash<'static, FLASH, Blocking, FLASH_SIZE>, annotations: &'static AnnotationChannel) -> Self {
        let mut mirror = [0xFF; STORAGE_SIZE];
        if flash.blocking_read(SETTINGS_SECTOR, &mut mirror).is_err() {
            warn!("reading settings sector failed");
            mirror = [0xFF; STORAGE_SIZE];
        }
        Self { flash, mirror, annotations }
    }
}

impl Ticks for PicoBoard {
    fn seconds(&self) -> u32 {
        Instant::now().as_secs() as u32
    }
}

impl AnnotationSink for PicoBoard {
    fn annotate(&mut self, annotation: Annotation) {
        if self.annotations.try_send(annotation).is_err() {
            warn!("annotation dropped: {}", annotation);
        }
    }
}

impl Eeprom for PicoBoard {
    type Error = StorageError;

    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let end = offset.checked_add(buf.len()).ok_or(StorageError::OutOfRange)?;
        let src = self.mirror.get(offset..end).ok_or(StorageError::OutOfRange)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_block(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let end = offset.checked_add(data.len()).ok_or(StorageError::OutOfRange)?;
        let dst = self.mirror.get_mut(offset..end).ok_or(StorageError::OutOfRange)?;
        dst.copy_from_slice(data);
        let mut page = [0xFF; FLASH_PAGE];
        page[..STORAGE_SIZE].copy_from_slice(&self.mirror);
        self.flash
            .blocking_erase(SETTINGS_SECTOR, SETTINGS_SECTOR + ERASE_SIZE as u32)
            .map_err(|_| StorageError::Flash)?;
        self.flash
            .blocking_write(SETTINGS_SECTOR, &page)
            .map_err(|_| StorageError::Flash)
    }
}

#[embassy_executor::task]
async fn annotation_task(annotations: &'static AnnotationChannel) {
    loop {
        let annotation = annotations.receive().await;
        info!("annotation: {=str}", annotation.message());
    }
}

async fn read_sensor(ds: &mut Thermometers, rom: Option<Rom>, calibration: Temp, target: &mut ExternalTempSensor) {
    let Some(rom) = rom else {
        target.set_connected(false);
        return;
    };
    match ds.temperature_with_rom(&rom, calibration).await {
        Ok(temp) => {
            target.set_value(temp);
            target.set_connected(true);
        }
        Err(e) => {
            debug!("sensor {=[u8]:a} read failed: {}", &format_rom(&rom)[..], e);
            target.set_connected(false);
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Program start");
    let peripherals = embassy_rp::init(Default::default());
    let mut config = DeviceConfig::default();

    // Thermometer bus
    let mut ds: Thermometers = Ds18b20::new(PinBus::new(OutputOpenDrain::new(peripherals.PIN_16, Level::High), Delay));

    match ds.search_for_roms().await {
        Ok(found) => {
            for rom in found.iter().flatten() {
                info!("found sensor {=[u8]:a}", &format_rom(rom)[..]);
            }
            config.assign_roms(&found);
        }
        Err(e) => warn!("sensor search failed: {}", e),
    }
    if let Err(e) = ds.set_resolution(Resolution::Bits12).await {
        warn!("setting sensor resolution failed: {}", e);
    }

    // Relays and door switch
    let actuators = Actuators {
        heater: DigitalPinActuator::new(Output::new(peripherals.PIN_2, Level::High), config.invert_heater),
        cooler: DigitalPinActuator::new(Output::new(peripherals.PIN_3, Level::High), config.invert_cooler),
        light: DigitalPinActuator::new(Output::new(peripherals.PIN_4, Level::High), config.invert_light),
        fan: DigitalPinActuator::new(Output::new(peripherals.PIN_5, Level::High), config.invert_fan),
    };
    let door = DigitalPinSwitch::new(Input::new(peripherals.PIN_6, Pull::Up), config.invert_door);

    let annotations: &'static AnnotationChannel = ANNOTATIONS.init(Channel::new());
    unwrap!(spawner.spawn(annotation_task(annotations)));
    let flash = Flash::<_, Blocking, FLASH_SIZE>::new_blocking(peripherals.FLASH);
    let board = PicoBoard::new(flash, annotations);

    let mut control = TempControl::new(
        ExternalTempSensor::new(false),
        ExternalTempSensor::new(false),
        actuators,
        door,
        board,
    );

    // First conversion so init() sees real readings
    let mut delay = Delay;
    if let Err(e) = ds.convert(&mut delay).await {
        warn!("first conversion failed: {}", e);
    }
    read_sensor(&mut ds, config.beer_rom, config.beer_calibration, control.beer_sensor_mut().sensor_mut()).await;
    read_sensor(&mut ds, config.fridge_rom, config.fridge_calibration, control.fridge_sensor_mut().sensor_mut()).await;

    control.init();
    control.load_settings_and_constants();
    info!("mode {} state {}", control.mode(), control.state());

    let mut ticker = Ticker::every(Duration::from_secs(1));
    loop {
        if let Err(e) = ds.convert(&mut delay).await {
            debug!("conversion failed: {}", e);
        }
        read_sensor(&mut ds, config.beer_rom, config.beer_calibration, control.beer_sensor_mut().sensor_mut()).await;
        read_sensor(&mut ds, config.fridge_rom, config.fridge_calibration, control.fridge_sensor_mut().sensor_mut()).await;

        control.tick();
        trace!(
            "beer {} ({}) fridge {} ({}) state {}",
            control.beer_temp(),
            control.beer_setting(),
            control.fridge_temp(),
            control.fridge_setting(),
            control.state()
        );
        ticker.next().await;
    }
}
