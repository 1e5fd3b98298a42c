//! 1-Wire bus access at the bit level.
//!
//! The DS18B20 driver needs single time slots for the ROM search, so the bus
//! trait exposes the reset pulse and individual bits. Byte transfers are
//! built on top, least significant bit first.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

#[allow(async_fn_in_trait)]
pub trait OneWire {
    /// Reset pulse. Returns true when at least one device answered with a
    /// presence pulse.
    async fn reset(&mut self) -> bool;

    async fn write_bit(&mut self, bit: bool);

    async fn read_bit(&mut self) -> bool;

    async fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            for i in 0..8 {
                self.write_bit((byte >> i) & 0x01 != 0).await;
            }
        }
    }

    async fn read_bytes(&mut self, bytes: &mut [u8]) {
        for byte in bytes.iter_mut() {
            *byte = 0;
            for i in 0..8 {
                if self.read_bit().await {
                    *byte |= 1 << i;
                }
            }
        }
    }
}

// Standard speed slot timings in microseconds
const RESET_LOW_US: u32 = 480;
const PRESENCE_SAMPLE_US: u32 = 70;
const RESET_RECOVERY_US: u32 = 410;
const WRITE_ONE_LOW_US: u32 = 6;
const WRITE_ONE_RECOVERY_US: u32 = 64;
const WRITE_ZERO_LOW_US: u32 = 60;
const WRITE_ZERO_RECOVERY_US: u32 = 10;
const READ_LOW_US: u32 = 6;
const READ_SAMPLE_US: u32 = 9;
const READ_RECOVERY_US: u32 = 55;

/// A bus driven by software on an open drain pin with an external pull-up.
/// `set_high` releases the line, `set_low` pulls it down.
pub struct PinBus<P, D> {
    pin: P,
    delay: D,
}

impl<P: InputPin + OutputPin, D: DelayNs> PinBus<P, D> {
    pub fn new(mut pin: P, delay: D) -> Self {
        let _ = pin.set_high();
        Self { pin, delay }
    }

    pub fn release(self) -> (P, D) {
        (self.pin, self.delay)
    }

    fn pull_low(&mut self) {
        if self.pin.set_low().is_err() {
            warn!("1-Wire pin write failed");
        }
    }

    fn let_go(&mut self) {
        if self.pin.set_high().is_err() {
            warn!("1-Wire pin write failed");
        }
    }

    // an unreadable pin looks like an idle bus
    fn sample(&mut self) -> bool {
        self.pin.is_high().unwrap_or(true)
    }
}

impl<P: InputPin + OutputPin, D: DelayNs> OneWire for PinBus<P, D> {
    async fn reset(&mut self) -> bool {
        self.pull_low();
        self.delay.delay_us(RESET_LOW_US);
        self.let_go();
        self.delay.delay_us(PRESENCE_SAMPLE_US);
        let presence = !self.sample();
        self.delay.delay_us(RESET_RECOVERY_US);
        presence
    }

    async fn write_bit(&mut self, bit: bool) {
        let (low, recovery) = if bit {
            (WRITE_ONE_LOW_US, WRITE_ONE_RECOVERY_US)
        } else {
            (WRITE_ZERO_LOW_US, WRITE_ZERO_RECOVERY_US)
        };
        self.pull_low();
        self.delay.delay_us(low);
        self.let_go();
        self.delay.delay_us(recovery);
    }

    async fn read_bit(&mut self) -> bool {
        self.pull_low();
        self.delay.delay_us(READ_LOW_US);
        self.let_go();
        self.delay.delay_us(READ_SAMPLE_US);
        let bit = self.sample();
        self.delay.delay_us(READ_RECOVERY_US);
        bit
    }
}
