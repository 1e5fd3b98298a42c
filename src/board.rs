//! Services the controller needs from the board it runs on: a seconds
//! clock, a one-way annotation channel and non-volatile storage.

use heapless::Deque;

/// Seconds since power-on. The counter may wrap; callers only ever look at
/// differences.
pub trait Ticks {
    fn seconds(&self) -> u32;

    fn time_since(&self, then: u32) -> u32 {
        self.seconds().wrapping_sub(then)
    }
}

/// Events reported to whoever is watching the chamber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Annotation {
    DoorOpened,
    DoorClosed,
}

impl Annotation {
    pub fn message(self) -> &'static str {
        match self {
            Annotation::DoorOpened => "Fridge door opened",
            Annotation::DoorClosed => "Fridge door closed",
        }
    }
}

/// One-way notification channel. Delivery is best effort.
pub trait AnnotationSink {
    fn annotate(&mut self, annotation: Annotation);
}

/// Byte-addressed non-volatile storage.
pub trait Eeprom {
    type Error: core::fmt::Debug;

    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn write_block(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error>;
}

/// Everything the controller needs from the board.
pub trait Board: Ticks + AnnotationSink + Eeprom {}

impl<T: Ticks + AnnotationSink + Eeprom> Board for T {}

/// Access outside the storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfRange;

const ANNOTATION_QUEUE: usize = 8;

/// A board held entirely in RAM: manual clock, `N` bytes of erased storage
/// and a short annotation queue. Used by tests and simulations.
#[derive(Debug)]
pub struct RamBoard<const N: usize> {
    now: u32,
    storage: [u8; N],
    writes: u32,
    annotations: Deque<Annotation, ANNOTATION_QUEUE>,
}

impl<const N: usize> Default for RamBoard<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RamBoard<N> {
    pub fn new() -> Self {
        Self {
            now: 0,
            storage: [0xFF; N],
            writes: 0,
            annotations: Deque::new(),
        }
    }

    pub fn set_seconds(&mut self, now: u32) {
        self.now = now;
    }

    pub fn advance(&mut self, seconds: u32) {
        self.now = self.now.wrapping_add(seconds);
    }

    /// Number of `write_block` calls so far.
    pub fn writes(&self) -> u32 {
        self.writes
    }

    pub fn storage(&self) -> &[u8; N] {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut [u8; N] {
        &mut self.storage
    }

    pub fn take_annotation(&mut self) -> Option<Annotation> {
        self.annotations.pop_front()
    }

    pub fn pending_annotations(&self) -> usize {
        self.annotations.len()
    }
}

impl<const N: usize> Ticks for RamBoard<N> {
    fn seconds(&self) -> u32 {
        self.now
    }
}

impl<const N: usize> AnnotationSink for RamBoard<N> {
    fn annotate(&mut self, annotation: Annotation) {
        // A full queue drops the newest event
        let _ = self.annotations.push_back(annotation);
    }
}

impl<const N: usize> Eeprom for RamBoard<N> {
    type Error = OutOfRange;

    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), OutOfRange> {
        let end = offset.checked_add(buf.len()).filter(|end| *end <= N).ok_or(OutOfRange)?;
        buf.copy_from_slice(&self.storage[offset..end]);
        Ok(())
    }

    fn write_block(&mut self, offset: usize, data: &[u8]) -> Result<(), OutOfRange> {
        let end = offset.checked_add(data.len()).filter(|end| *end <= N).ok_or(OutOfRange)?;
        self.storage[offset..end].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}
