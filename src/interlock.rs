//! Limit checking for one telemetry sweep.
//!
//! Pure logic, deliberately free of any I/O: the session engine feeds each
//! poll result through [evaluate] and acts on the outcome. The interlock
//! only ever disables outputs, it never turns anything back on.

use crate::command::Channel;
use crate::status::StatusWord;
use crate::types::{DeviceReading, FaultFlag, Limits};

/// Outcome of checking one reading against the active limits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Faults that must latch. Non-empty means all outputs come down.
    pub faults: Vec<FaultFlag>,
    /// Channels inside the warning band below their limit.
    pub warnings: Vec<Channel>,
}

impl Evaluation {
    /// Whether the engine has to force every output off.
    pub fn must_disable(&self) -> bool {
        !self.faults.is_empty()
    }
}

/// Check a reading and the device's own trip bits against the limits.
///
/// A monitored value above its limit is a fault; at or above
/// `warn_fraction` of the limit, up to and including the limit itself,
/// it is a warning. Device trip bits are folded in as faults so they
/// latch host side like everything else.
pub fn evaluate(
    reading: &DeviceReading,
    status: &StatusWord,
    limits: &Limits,
    warn_fraction: f64,
) -> Evaluation {
    let mut eval = Evaluation::default();

    check_limit(
        &mut eval,
        Channel::Heater,
        reading.heater_current_ma,
        limits.heater_current_ma,
        warn_fraction,
    );
    check_limit(
        &mut eval,
        Channel::Extractor,
        reading.extractor_current_ua,
        limits.extractor_trip_ua,
        warn_fraction,
    );

    for trip in status.trips() {
        eval.faults.push(FaultFlag::DeviceTrip(trip));
    }

    eval
}

fn check_limit(
    eval: &mut Evaluation,
    channel: Channel,
    value: f64,
    limit: f64,
    warn_fraction: f64,
) {
    if value > limit {
        eval.faults.push(FaultFlag::LimitExceeded(channel));
    } else if value >= limit * warn_fraction {
        eval.warnings.push(channel);
    }
}
