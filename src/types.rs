//! Value types shared between the protocol client, the interlock and the
//! session engine.

use std::time::{Duration, SystemTime};

use strum_macros::Display;

use crate::command::{self, Channel};
use crate::status::TripFlag;

/// One full telemetry sweep, in display units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceReading {
    pub beam_voltage_v: f64,
    /// Programmed beam voltage target, read back from the device.
    pub beam_target_v: f64,
    pub beam_current_ua: f64,
    pub extractor_voltage_v: f64,
    pub extractor_current_ua: f64,
    pub suppressor_voltage_v: f64,
    pub suppressor_current_ua: f64,
    /// Converted from the millivolts the device reports.
    pub heater_voltage_v: f64,
    pub heater_current_ma: f64,
    /// When the sweep completed.
    pub taken_at: SystemTime,
}

/// A validated request to change one channel's programmed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub channel: Channel,
    pub value: f64,
}

/// The active safety limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Host side ceiling for heater setpoints, in milliamps.
    pub heater_current_ma: f64,
    /// Device side extractor trip current, in microamps.
    pub extractor_trip_ua: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            heater_current_ma: command::HEATER_CURRENT_MAX_MA,
            extractor_trip_ua: command::DEFAULT_TRIP_CURRENT_UA,
        }
    }
}

/// Which safety limit a limit change intent adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Limit {
    /// Host side heater current ceiling, in milliamps.
    HeaterCurrentMa,
    /// Device side extractor trip current, in microamps.
    ExtractorTripUa,
}

/// Which outputs the device reports as enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputStates {
    pub beam: bool,
    pub extractor: bool,
    pub suppressor: bool,
    pub heater: bool,
}

impl OutputStates {
    pub fn any_on(&self) -> bool {
        self.beam || self.extractor || self.suppressor || self.heater
    }

    pub fn get(&self, channel: Channel) -> bool {
        match channel {
            Channel::Beam => self.beam,
            Channel::Extractor => self.extractor,
            Channel::Suppressor => self.suppressor,
            Channel::Heater => self.heater,
        }
    }
}

/// Reason a safety fault latched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultFlag {
    /// A monitored value reached or exceeded its limit.
    LimitExceeded(Channel),
    /// The device raised one of its own trip bits.
    DeviceTrip(TripFlag),
    /// Too many consecutive poll cycles failed.
    CommunicationLoss,
}

impl core::fmt::Display for FaultFlag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FaultFlag::LimitExceeded(channel) => write!(f, "{channel} limit exceeded"),
            FaultFlag::DeviceTrip(trip) => write!(f, "device trip {trip}"),
            FaultFlag::CommunicationLoss => write!(f, "communication loss"),
        }
    }
}

/// Latched faults and active warnings. Faults stay latched until they are
/// acknowledged and the session is reset; warnings clear themselves as soon
/// as the reading drops back below the warning band.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultState {
    pub latched: Vec<FaultFlag>,
    /// True once the operator has acknowledged every latched fault.
    pub acknowledged: bool,
    /// Channels currently in the warning band below their limit.
    pub warnings: Vec<Channel>,
}

impl FaultState {
    pub fn is_faulted(&self) -> bool {
        !self.latched.is_empty()
    }

    /// Latch a fault, keeping the list free of duplicates. Any new fault
    /// voids a previous acknowledgement.
    pub fn latch(&mut self, flag: FaultFlag) -> bool {
        if self.latched.contains(&flag) {
            return false;
        }
        self.latched.push(flag);
        self.acknowledged = false;
        true
    }
}

/// Lifecycle of one connection to the supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// A fault is latched. Polling continues; output enabling intents are
    /// refused until acknowledge and reset.
    Fault,
}

/// Firmware identification read during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub main: String,
    pub floating_deck: String,
}

/// What the engine publishes after every poll cycle and state change.
/// Cloned out to callers, never shared by reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub state: SessionState,
    /// None until the first successful sweep of a connection.
    pub reading: Option<DeviceReading>,
    pub outputs: OutputStates,
    pub limits: Limits,
    pub faults: FaultState,
    pub firmware: Option<FirmwareInfo>,
}

/// Engine timing and safety thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Telemetry poll period.
    pub poll_interval: Duration,
    /// Immediate retries per exchange after a timeout or a bad frame.
    pub retries: u8,
    /// Consecutive failed poll cycles before communication loss latches.
    pub comm_loss_threshold: u8,
    /// Fraction of a limit at which a warning raises.
    pub warn_fraction: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            retries: 2,
            comm_loss_threshold: 3,
            warn_fraction: 0.9,
        }
    }
}
