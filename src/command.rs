//! This module defines the command set of the supply: the controllable
//! channels with their hardware ranges, the monitor queries, and the frame
//! bodies each of them puts on the wire.

use core::fmt::Write as _;
use core::ops::RangeInclusive;

use heapless::String;
use strum_macros::{Display, EnumIter};

/// Hardware ceiling of the beam accelerating voltage.
pub const BEAM_VOLTAGE_MAX_V: f64 = 30_000.0;
/// Hardware ceiling of the extractor electrode voltage.
pub const EXTRACTOR_VOLTAGE_MAX_V: f64 = 10_000.0;
/// Hardware ceiling of the suppressor electrode voltage.
pub const SUPPRESSOR_VOLTAGE_MAX_V: f64 = 1_000.0;
/// Hardware ceiling of the filament heater current.
pub const HEATER_CURRENT_MAX_MA: f64 = 3_000.0;
/// Programmable range of the extractor trip current.
pub const TRIP_CURRENT_RANGE_UA: RangeInclusive<f64> = 50.0..=770.0;
/// Factory default for the extractor trip current.
pub const DEFAULT_TRIP_CURRENT_UA: f64 = 735.0;

/// Longest body we ever build is a setpoint, code plus `"30000.0"`.
pub type Body = String<16>;

/// The four controllable outputs of the gun supply.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumIter)]
pub enum Channel {
    /// Accelerating voltage, 0..=30 kV. Set with opcode `09`.
    Beam,
    /// Extraction voltage, 0..=10 kV. Set with opcode `15`.
    Extractor,
    /// Suppressor voltage, 0..=1 kV. Set with opcode `1F`.
    Suppressor,
    /// Filament current, 0..=3000 mA. Set with opcode `29`.
    Heater,
}

impl Channel {
    /// The accepted setpoint range, in the channel's native unit.
    pub fn range(self) -> RangeInclusive<f64> {
        match self {
            Channel::Beam => 0.0..=BEAM_VOLTAGE_MAX_V,
            Channel::Extractor => 0.0..=EXTRACTOR_VOLTAGE_MAX_V,
            Channel::Suppressor => 0.0..=SUPPRESSOR_VOLTAGE_MAX_V,
            Channel::Heater => 0.0..=HEATER_CURRENT_MAX_MA,
        }
    }

    /// The channel's native unit, for messages and display.
    pub fn unit(self) -> &'static str {
        match self {
            Channel::Heater => "mA",
            _ => "V",
        }
    }

    /// Frame body applying a setpoint to this channel.
    ///
    /// The device wants a fixed width zero padded decimal, six characters
    /// for the voltage channels and five for the heater.
    pub fn set_body(self, value: f64) -> Option<Body> {
        if !self.range().contains(&value) {
            return None;
        }
        let mut body = Body::new();
        let result = match self {
            Channel::Beam => write!(body, "09{value:06.1}"),
            Channel::Extractor => write!(body, "15{value:06.1}"),
            Channel::Suppressor => write!(body, "1F{value:06.1}"),
            Channel::Heater => write!(body, "29{value:05.1}"),
        };
        result.ok()?;
        Some(body)
    }

    /// Frame body switching this channel's output. Opcode `03`; the even
    /// argument enables, the odd one disables.
    pub fn switch_body(self, enable: bool) -> Body {
        let arg = match (self, enable) {
            (Channel::Beam, true) => "00",
            (Channel::Beam, false) => "01",
            (Channel::Extractor, true) => "02",
            (Channel::Extractor, false) => "03",
            (Channel::Suppressor, true) => "04",
            (Channel::Suppressor, false) => "05",
            (Channel::Heater, true) => "06",
            (Channel::Heater, false) => "07",
        };
        let mut body = Body::new();
        // Infallible, "03" plus two characters always fits.
        let _ = write!(body, "03{arg}");
        body
    }
}

/// Read-only queries. Monitor responses echo the two character opcode with
/// the value appended, so each query knows the code to strip.
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter)]
pub enum Query {
    /// Live accelerating voltage in volts.
    BeamVoltage,
    /// Programmed accelerating voltage target in volts.
    BeamVoltageTarget,
    /// Emission current in microamps.
    BeamCurrent,
    /// Live extractor voltage in volts.
    ExtractorVoltage,
    /// Extractor current in microamps.
    ExtractorCurrent,
    /// Programmed extractor trip current in microamps.
    ExtractorTripCurrent,
    /// Live suppressor voltage in volts.
    SuppressorVoltage,
    /// Suppressor current in microamps.
    SuppressorCurrent,
    /// Heater voltage. The device reports millivolts.
    HeaterVoltage,
    /// Heater current in milliamps.
    HeaterCurrent,
    /// 32 bit status word as eight hex digits.
    Status,
    /// Firmware version of the main controller.
    FirmwareMain,
    /// Firmware version of the floating deck.
    FirmwareDeck,
}

impl Query {
    /// The body to transmit. Some monitors take a fixed `1` argument.
    pub fn body(self) -> &'static str {
        match self {
            Query::BeamVoltage => "081",
            Query::BeamVoltageTarget => "080",
            Query::BeamCurrent => "0E",
            Query::ExtractorVoltage => "141",
            Query::ExtractorCurrent => "1A",
            Query::ExtractorTripCurrent => "1C",
            Query::SuppressorVoltage => "1E1",
            Query::SuppressorCurrent => "24",
            Query::HeaterVoltage => "26",
            Query::HeaterCurrent => "281",
            Query::Status => "02",
            Query::FirmwareMain => "050",
            Query::FirmwareDeck => "051",
        }
    }

    /// The opcode echoed in the response, without any argument.
    pub fn code(self) -> &'static str {
        match self {
            Query::BeamVoltage => "08",
            Query::BeamVoltageTarget => "08",
            Query::BeamCurrent => "0E",
            Query::ExtractorVoltage => "14",
            Query::ExtractorCurrent => "1A",
            Query::ExtractorTripCurrent => "1C",
            Query::SuppressorVoltage => "1E",
            Query::SuppressorCurrent => "24",
            Query::HeaterVoltage => "26",
            Query::HeaterCurrent => "28",
            Query::Status => "02",
            Query::FirmwareMain => "05",
            Query::FirmwareDeck => "05",
        }
    }
}

/// Body programming the extractor trip current. The device takes this one
/// as a bare integer.
pub fn trip_current_body(microamps: f64) -> Option<Body> {
    if !TRIP_CURRENT_RANGE_UA.contains(&microamps) {
        return None;
    }
    let mut body = Body::new();
    write!(body, "1D{}", microamps as i64).ok()?;
    Some(body)
}

/// The init handshake, in the order the vendor software performs it:
/// identify, select working mode, read both firmware versions, then read
/// the beam voltage target and monitor once.
pub const HANDSHAKE: [&str; 6] = ["017F", "01990", "050", "051", "080", "081"];
