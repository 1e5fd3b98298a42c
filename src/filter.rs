//! Cascaded fixed point low-pass filters used by [`crate::temp_sensor::TempSensor`].
//!
//! Each section is a first order filter `y += (x - y) >> b`, so its delay
//! grows as roughly `2^b` samples. Three sections are cascaded to get a
//! steeper roll-off. Internally the sections keep 7 more fraction bits than
//! [`Temp`] to avoid losing small steps.

use crate::temperature::Temp;

/// Extra fraction bits kept inside the sections.
pub const EXTRA_BITS: u32 = 7;
const SECTIONS: usize = 3;

/// Largest allowed coefficient. Beyond this the filter barely moves.
pub const MAX_COEFFICIENT: u8 = 8;

#[derive(Debug, Clone, Copy, Default)]
struct Section {
    b: u8,
    y: i32,
}

impl Section {
    fn add(&mut self, x: i32) -> i32 {
        self.y += (x - self.y) >> self.b;
        self.y
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CascadedFilter {
    sections: [Section; SECTIONS],
    // Last three outputs, newest first
    history: [i32; 3],
}

impl Default for CascadedFilter {
    fn default() -> Self {
        Self::new(2)
    }
}

impl CascadedFilter {
    pub fn new(b: u8) -> Self {
        let mut filter = Self {
            sections: [Section::default(); SECTIONS],
            history: [0; 3],
        };
        filter.set_coefficients(b);
        filter
    }

    pub fn set_coefficients(&mut self, b: u8) {
        let b = b.min(MAX_COEFFICIENT);
        for section in self.sections.iter_mut() {
            section.b = b;
        }
    }

    pub fn coefficients(&self) -> u8 {
        self.sections[0].b
    }

    /// Seed every section with `value`, as if it had been the input forever.
    pub fn init(&mut self, value: Temp) {
        let y = widen(value);
        for section in self.sections.iter_mut() {
            section.y = y;
        }
        self.history = [y; 3];
    }

    pub fn add(&mut self, value: Temp) -> Temp {
        self.add_double_precision(widen(value));
        self.read_output()
    }

    /// Add a sample that is already in the internal precision.
    pub fn add_double_precision(&mut self, value: i32) -> i32 {
        let mut x = value;
        for section in self.sections.iter_mut() {
            x = section.add(x);
        }
        self.history = [x, self.history[0], self.history[1]];
        x
    }

    pub fn read_output(&self) -> Temp {
        narrow(self.history[0])
    }

    pub fn read_output_double_precision(&self) -> i32 {
        self.history[0]
    }

    /// The previous output, if it was a local maximum.
    pub fn detect_pos_peak(&self) -> Option<Temp> {
        let [newest, middle, oldest] = self.history;
        if middle > newest && middle >= oldest {
            Some(narrow(middle))
        } else {
            None
        }
    }

    /// The previous output, if it was a local minimum.
    pub fn detect_neg_peak(&self) -> Option<Temp> {
        let [newest, middle, oldest] = self.history;
        if middle < newest && middle <= oldest {
            Some(narrow(middle))
        } else {
            None
        }
    }
}

fn widen(value: Temp) -> i32 {
    (value.raw() as i32) << EXTRA_BITS
}

fn narrow(value: i32) -> Temp {
    let rounded = (value + (1 << (EXTRA_BITS - 1))) >> EXTRA_BITS;
    Temp::from_raw(rounded.clamp(Temp::MIN.raw() as i32, Temp::MAX.raw() as i32) as i16)
}
