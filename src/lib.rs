//! This crate provides device control and a safety interlock for the
//! EBM-30N6/FEG electron beam gun high voltage power supply.
//!
//! The supply speaks a line oriented ASCII protocol over its serial port,
//! one request and one response per frame. On top of that sit three layers:
//!
//! * [supply::FegSupply] - the protocol client. Works over any interface
//!   implementing [embedded_io::Read] & [embedded_io::Write].
//! * [interlock] - pure limit checking over each telemetry sweep.
//! * [session::Session] - the engine. A worker thread owns the port, polls
//!   telemetry on a fixed period, serves operator intents in order, and
//!   latches safety faults until they are acknowledged and reset.
//!
//! The serial port used for comms should be configured like so:
//! * Default baud rate: 115200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

pub mod command;
pub mod error;
pub mod frame;
pub mod interlock;
pub mod session;
pub mod status;
pub mod supply;
pub mod transport;
pub mod types;

#[cfg(test)]
mod mock_supply;
