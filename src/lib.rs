#![cfg_attr(not(test), no_std)]

// must come first so the logging macros are visible to every module
mod fmt;

pub mod actuator;
pub mod board;
pub mod config;
pub mod control;
pub mod eeprom;
pub mod estimator;
pub mod filter;
pub mod onewire;
pub mod pid;
pub mod sensor;
pub mod settings;
pub mod switch;
pub mod temp_sensor;
pub mod temperature;

pub use control::{Command, State, TempControl};
pub use settings::{ControlConstants, ControlSettings, ControlVariables, Mode};
pub use temperature::{LongTemp, Temp};

pub const MIN_COOL_OFF_TIME: u32 = 300; // Minimum off time before cooling again (seconds)
pub const MIN_HEAT_OFF_TIME: u32 = 300; // Minimum off time before heating again (seconds)
pub const MIN_COOL_ON_TIME: u32 = 180; // Minimum time cooling has to run (seconds)
pub const MIN_HEAT_ON_TIME: u32 = 180; // Minimum time heating has to run (seconds)
pub const MIN_COOL_OFF_TIME_FRIDGE_CONSTANT: u32 = 600; // Minimum off time before cooling in chamber constant mode (seconds)
pub const MIN_SWITCH_TIME: u32 = 600; // Minimum time between heating and cooling (seconds)
pub const COOL_PEAK_DETECT_TIME: u32 = 1800; // Window for detecting the peak after cooling (seconds)
pub const HEAT_PEAK_DETECT_TIME: u32 = 900; // Window for detecting the peak after heating (seconds)
pub const CAMERA_LIGHT_TIMEOUT: u32 = 600; // Camera light switches itself off after this (seconds)
pub const INTEGRAL_UPDATE_INTERVAL: u8 = 60; // PID integral moves once per this many calls
pub const CONVERSION_TIME_MS: u32 = 750; // DS18B20 12 bit conversion time
