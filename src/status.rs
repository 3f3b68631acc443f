//! The supply's 32 bit status word.
//!
//! Returned by the `02` query as eight hex digits. The low nibble carries
//! the output enable states, the upper bits are latching trip flags that
//! the device raises on its own protective actions.

use modular_bitfield::prelude::*;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::types::OutputStates;

/// Bit layout of the status register.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct StatusWord {
    pub beam_on: bool,
    pub extractor_on: bool,
    pub suppressor_on: bool,
    pub heater_on: bool,
    #[skip]
    __: B4,
    pub power_on_reset: bool,
    #[skip]
    __: B1,
    pub vacuum_interlock: bool,
    #[skip]
    __: B1,
    pub input_voltage: bool,
    pub beam_over_voltage: bool,
    pub beam_over_current: bool,
    pub extractor_over_current: bool,
    pub heater_open_circuit: bool,
    pub heater_current_trip: bool,
    pub over_temperature: bool,
    pub suppressor_over_current: bool,
    pub arc_trip: bool,
    pub suppressor_regulation: bool,
    pub heater_regulation: bool,
    pub extractor_regulation: bool,
    #[skip]
    __: B6,
    pub rx_crc_error: bool,
    pub rx_error: bool,
}

/// Protective actions the device reports through the status word.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumIter)]
pub enum TripFlag {
    PowerOnReset,
    VacuumInterlock,
    InputVoltageOutOfRange,
    BeamOverVoltage,
    BeamOverCurrent,
    ExtractorOverCurrent,
    HeaterOpenCircuit,
    HeaterCurrentTrip,
    OverTemperature,
    SuppressorOverCurrent,
    ArcTrip,
    SuppressorRegulation,
    HeaterRegulation,
    ExtractorRegulation,
    RxCrcError,
    RxError,
}

impl StatusWord {
    /// Build from the integer value of the register.
    pub fn from_word(word: u32) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }

    /// Parse the payload of a status response. Only the first eight hex
    /// digits count; shorter payloads are rejected.
    pub fn parse(payload: &str) -> Option<Self> {
        let digits = payload.get(..8)?;
        let word = u32::from_str_radix(digits, 16).ok()?;
        Some(Self::from_word(word))
    }

    /// The output enable states carried in the low nibble.
    pub fn outputs(&self) -> OutputStates {
        OutputStates {
            beam: self.beam_on(),
            extractor: self.extractor_on(),
            suppressor: self.suppressor_on(),
            heater: self.heater_on(),
        }
    }

    fn flag(&self, flag: TripFlag) -> bool {
        match flag {
            TripFlag::PowerOnReset => self.power_on_reset(),
            TripFlag::VacuumInterlock => self.vacuum_interlock(),
            TripFlag::InputVoltageOutOfRange => self.input_voltage(),
            TripFlag::BeamOverVoltage => self.beam_over_voltage(),
            TripFlag::BeamOverCurrent => self.beam_over_current(),
            TripFlag::ExtractorOverCurrent => self.extractor_over_current(),
            TripFlag::HeaterOpenCircuit => self.heater_open_circuit(),
            TripFlag::HeaterCurrentTrip => self.heater_current_trip(),
            TripFlag::OverTemperature => self.over_temperature(),
            TripFlag::SuppressorOverCurrent => self.suppressor_over_current(),
            TripFlag::ArcTrip => self.arc_trip(),
            TripFlag::SuppressorRegulation => self.suppressor_regulation(),
            TripFlag::HeaterRegulation => self.heater_regulation(),
            TripFlag::ExtractorRegulation => self.extractor_regulation(),
            TripFlag::RxCrcError => self.rx_crc_error(),
            TripFlag::RxError => self.rx_error(),
        }
    }

    /// All trip flags currently raised.
    pub fn trips(&self) -> Vec<TripFlag> {
        TripFlag::iter().filter(|&f| self.flag(f)).collect()
    }
}
