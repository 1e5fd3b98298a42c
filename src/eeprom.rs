//! Layout of the persisted control records.
//!
//! ```text
//! offset 0            marker, 1 once the records below have been written
//! SETTINGS_OFFSET     ControlSettings record, CRC8
//! CONSTANTS_OFFSET    ControlConstants record, CRC8
//! ```

use crate::board::Eeprom;
use crate::sensor::crc8;
use crate::settings::{ControlConstants, ControlSettings};

pub const MARKER_OFFSET: usize = 0;
pub const MARKER_SET: u8 = 1;
pub const SETTINGS_OFFSET: usize = MARKER_OFFSET + 1;
pub const CONSTANTS_OFFSET: usize = SETTINGS_OFFSET + ControlSettings::ENCODED_LEN + 1;
/// Bytes of storage the records occupy.
pub const STORAGE_SIZE: usize = CONSTANTS_OFFSET + ControlConstants::ENCODED_LEN + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PersistError {
    /// The storage itself failed.
    Storage,
    /// A record was unreadable: bad CRC or invalid content.
    Corrupt,
}

fn storage<E>(_: E) -> PersistError {
    PersistError::Storage
}

/// Reads and writes the control records at their fixed offsets.
pub struct EepromManager;

impl EepromManager {
    pub fn is_initialized<E: Eeprom>(eeprom: &mut E) -> Result<bool, PersistError> {
        let mut marker = [0u8];
        eeprom.read_block(MARKER_OFFSET, &mut marker).map_err(storage)?;
        Ok(marker[0] == MARKER_SET)
    }

    /// Both records, or `None` when the storage was never initialized.
    pub fn load<E: Eeprom>(eeprom: &mut E) -> Result<Option<(ControlSettings, ControlConstants)>, PersistError> {
        if !Self::is_initialized(eeprom)? {
            return Ok(None);
        }
        let settings = Self::load_settings(eeprom)?;
        let constants = Self::load_constants(eeprom)?;
        Ok(Some((settings, constants)))
    }

    pub fn load_settings<E: Eeprom>(eeprom: &mut E) -> Result<ControlSettings, PersistError> {
        let mut buf = [0u8; ControlSettings::ENCODED_LEN + 1];
        eeprom.read_block(SETTINGS_OFFSET, &mut buf).map_err(storage)?;
        let (record, crc) = buf.split_at(ControlSettings::ENCODED_LEN);
        if crc8(record) != crc[0] {
            warn!("settings record CRC mismatch");
            return Err(PersistError::Corrupt);
        }
        let mut bytes = [0u8; ControlSettings::ENCODED_LEN];
        bytes.copy_from_slice(record);
        ControlSettings::decode(&bytes).map_err(|e| {
            warn!("settings record rejected: {:?}", e);
            PersistError::Corrupt
        })
    }

    pub fn load_constants<E: Eeprom>(eeprom: &mut E) -> Result<ControlConstants, PersistError> {
        let mut buf = [0u8; ControlConstants::ENCODED_LEN + 1];
        eeprom.read_block(CONSTANTS_OFFSET, &mut buf).map_err(storage)?;
        let (record, crc) = buf.split_at(ControlConstants::ENCODED_LEN);
        if crc8(record) != crc[0] {
            warn!("constants record CRC mismatch");
            return Err(PersistError::Corrupt);
        }
        let mut bytes = [0u8; ControlConstants::ENCODED_LEN];
        bytes.copy_from_slice(record);
        ControlConstants::decode(&bytes).map_err(|e| {
            warn!("constants record rejected: {:?}", e);
            PersistError::Corrupt
        })
    }

    pub fn store_settings<E: Eeprom>(eeprom: &mut E, settings: &ControlSettings) -> Result<(), PersistError> {
        let mut buf = [0u8; ControlSettings::ENCODED_LEN + 1];
        buf[..ControlSettings::ENCODED_LEN].copy_from_slice(&settings.encode());
        buf[ControlSettings::ENCODED_LEN] = crc8(&buf[..ControlSettings::ENCODED_LEN]);
        eeprom.write_block(SETTINGS_OFFSET, &buf).map_err(storage)
    }

    pub fn store_constants<E: Eeprom>(eeprom: &mut E, constants: &ControlConstants) -> Result<(), PersistError> {
        let mut buf = [0u8; ControlConstants::ENCODED_LEN + 1];
        buf[..ControlConstants::ENCODED_LEN].copy_from_slice(&constants.encode());
        buf[ControlConstants::ENCODED_LEN] = crc8(&buf[..ControlConstants::ENCODED_LEN]);
        eeprom.write_block(CONSTANTS_OFFSET, &buf).map_err(storage)
    }

    /// Write both records, then the marker.
    pub fn initialize<E: Eeprom>(
        eeprom: &mut E,
        settings: &ControlSettings,
        constants: &ControlConstants,
    ) -> Result<(), PersistError> {
        Self::store_settings(eeprom, settings)?;
        Self::store_constants(eeprom, constants)?;
        eeprom.write_block(MARKER_OFFSET, &[MARKER_SET]).map_err(storage)
    }
}
