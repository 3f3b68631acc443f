//! We use this mocking module in unit tests to emulate the gun supply.
//!
//! [MockPort] behaves like the real serial link: it decodes each frame we
//! write with the production codec, updates a shared [DeviceState], and
//! queues a framed response for reading back. Tests keep a [ModelHandle]
//! to script telemetry, inject failures and inspect the request log.

use core::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::command::DEFAULT_TRIP_CURRENT_UA;
use crate::error::ConnectError;
use crate::frame;
use crate::transport::Transport;
use crate::types::OutputStates;

/// Everything the emulated device remembers.
#[derive(Debug)]
pub struct DeviceState {
    beam_voltage_v: f64,
    beam_target_v: f64,
    beam_current_ua: f64,
    extractor_voltage_v: f64,
    extractor_current_ua: f64,
    suppressor_voltage_v: f64,
    suppressor_current_ua: f64,
    /// Reported unit, matching the hardware.
    heater_voltage_mv: f64,
    heater_current_ma: f64,
    trip_current_ua: f64,
    outputs: OutputStates,
    /// Raw trip bits OR'd into the status word.
    trip_bits: u32,
    /// Swallow every request without answering.
    muted: bool,
    /// Swallow the next N responses, then recover.
    drop_responses: u32,
    /// Corrupt the next N responses so the checksum fails.
    corrupt_responses: u32,
    /// Bodies of every well formed frame received.
    requests: Vec<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            beam_voltage_v: 0.0,
            beam_target_v: 0.0,
            beam_current_ua: 0.0,
            extractor_voltage_v: 0.0,
            extractor_current_ua: 0.0,
            suppressor_voltage_v: 0.0,
            suppressor_current_ua: 0.0,
            heater_voltage_mv: 0.0,
            heater_current_ma: 0.0,
            trip_current_ua: DEFAULT_TRIP_CURRENT_UA,
            outputs: OutputStates::default(),
            trip_bits: 0,
            muted: false,
            drop_responses: 0,
            corrupt_responses: 0,
            requests: Vec::new(),
        }
    }
}

impl DeviceState {
    fn status_word(&self) -> u32 {
        let mut word = self.trip_bits;
        word |= u32::from(self.outputs.beam);
        word |= u32::from(self.outputs.extractor) << 1;
        word |= u32::from(self.outputs.suppressor) << 2;
        word |= u32::from(self.outputs.heater) << 3;
        word
    }

    /// Response body for one request body, or None when the device keeps
    /// quiet. Mirrors the response shapes seen from real hardware, with
    /// values fused to the echoed opcode.
    fn respond(&mut self, request: &str) -> Option<String> {
        self.requests.push(request.to_string());
        if self.muted {
            return None;
        }
        if self.drop_responses > 0 {
            self.drop_responses -= 1;
            return None;
        }

        let mut body = String::new();
        let result = match request {
            "02" => write!(body, "02{:08X}", self.status_word()),
            "080" => write!(body, "08{:.1}", self.beam_target_v),
            "081" => write!(body, "08{:.1}", self.beam_voltage_v),
            "0E" => write!(body, "0E{:.2}", self.beam_current_ua),
            "141" => write!(body, "14{:.1}", self.extractor_voltage_v),
            "1A" => write!(body, "1A{:.2}", self.extractor_current_ua),
            "1C" => write!(body, "1C{:.0}", self.trip_current_ua),
            "1E1" => write!(body, "1E{:.1}", self.suppressor_voltage_v),
            "24" => write!(body, "24{:.2}", self.suppressor_current_ua),
            "26" => write!(body, "26{:.0}", self.heater_voltage_mv),
            "281" => write!(body, "28{:.1}", self.heater_current_ma),
            "050" => write!(body, "050 3.01"),
            "051" => write!(body, "051 1.17"),
            _ => {
                self.execute(request);
                write!(body, "{request}")
            }
        };
        result.ok()?;
        Some(body)
    }

    /// Apply the side effect of a write style command.
    fn execute(&mut self, request: &str) {
        if let Some(arg) = request.strip_prefix("03") {
            let (channel, enable) = match arg {
                "00" => (&mut self.outputs.beam, true),
                "01" => (&mut self.outputs.beam, false),
                "02" => (&mut self.outputs.extractor, true),
                "03" => (&mut self.outputs.extractor, false),
                "04" => (&mut self.outputs.suppressor, true),
                "05" => (&mut self.outputs.suppressor, false),
                "06" => (&mut self.outputs.heater, true),
                "07" => (&mut self.outputs.heater, false),
                _ => return,
            };
            *channel = enable;
        } else if let Some(value) = parse_arg(request, "09") {
            self.beam_target_v = value;
            self.beam_voltage_v = value;
        } else if let Some(value) = parse_arg(request, "15") {
            self.extractor_voltage_v = value;
        } else if let Some(value) = parse_arg(request, "1F") {
            self.suppressor_voltage_v = value;
        } else if let Some(value) = parse_arg(request, "29") {
            self.heater_current_ma = value;
        } else if let Some(value) = parse_arg(request, "1D") {
            self.trip_current_ua = value;
        }
    }
}

fn parse_arg(request: &str, code: &str) -> Option<f64> {
    request.strip_prefix(code)?.parse().ok()
}

/// Shared handle tests use to script the device while the engine owns the
/// port.
#[derive(Clone)]
pub struct ModelHandle(Arc<Mutex<DeviceState>>);

impl ModelHandle {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// Count of requests whose body starts with the given code.
    pub fn requests_with_code(&self, code: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.starts_with(code))
            .count()
    }

    pub fn set_muted(&self, muted: bool) {
        self.lock().muted = muted;
    }

    pub fn drop_next_responses(&self, count: u32) {
        self.lock().drop_responses = count;
    }

    pub fn corrupt_next_responses(&self, count: u32) {
        self.lock().corrupt_responses = count;
    }

    pub fn set_beam_voltage_v(&self, value: f64) {
        let mut state = self.lock();
        state.beam_voltage_v = value;
        state.beam_target_v = value;
    }

    pub fn set_extractor_current_ua(&self, value: f64) {
        self.lock().extractor_current_ua = value;
    }

    pub fn set_heater_voltage_mv(&self, value: f64) {
        self.lock().heater_voltage_mv = value;
    }

    pub fn set_heater_current_ma(&self, value: f64) {
        self.lock().heater_current_ma = value;
    }

    pub fn set_trip_bits(&self, bits: u32) {
        self.lock().trip_bits = bits;
    }

    pub fn trip_current_ua(&self) -> f64 {
        self.lock().trip_current_ua
    }

    pub fn outputs(&self) -> OutputStates {
        self.lock().outputs
    }
}

#[derive(Debug)]
pub enum MockPortError {
    /// No response pending within the emulated read timeout.
    TimedOut,
}

impl core::fmt::Display for MockPortError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MockPortError::TimedOut => write!(f, "read timed out"),
        }
    }
}

impl std::error::Error for MockPortError {}

impl embedded_io::Error for MockPortError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockPortError::TimedOut => embedded_io::ErrorKind::TimedOut,
        }
    }
}

/// Emulated serial port bound to one [DeviceState].
pub struct MockPort {
    model: ModelHandle,
    /// Frame bytes received so far, up to the next terminator.
    rx_line: Vec<u8>,
    /// Response bytes queued for reading.
    pending: std::collections::VecDeque<u8>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::with_model(ModelHandle(Arc::new(Mutex::new(DeviceState::default()))))
    }

    pub fn with_model(model: ModelHandle) -> Self {
        Self {
            model,
            rx_line: Vec::new(),
            pending: std::collections::VecDeque::new(),
        }
    }

    pub fn model(&self) -> ModelHandle {
        self.model.clone()
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        let Ok(request) = frame::decode(&line) else {
            return;
        };
        let mut state = self.model.lock();
        let response = state.respond(request.body());
        let corrupt = if state.corrupt_responses > 0 {
            state.corrupt_responses -= 1;
            true
        } else {
            false
        };
        drop(state);

        if let Some(body) = response {
            if let Ok(mut line) = frame::encode(&body) {
                if corrupt {
                    // Damage a body byte, leaving the checksum stale.
                    line[2] ^= 0x01;
                }
                self.pending.extend(line.iter());
            }
        }
    }
}

impl embedded_io::ErrorType for MockPort {
    type Error = MockPortError;
}

impl embedded_io::Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for &byte in buf {
            self.rx_line.push(byte);
            if byte == b'\n' {
                let line = core::mem::take(&mut self.rx_line);
                self.handle_line(line);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.pending.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Err(MockPortError::TimedOut),
        }
    }
}

/// Transport double for session tests. Every open yields a fresh port
/// bound to the same scripted device.
pub struct MockTransport {
    model: ModelHandle,
    /// Fail the next N open attempts.
    fail_opens: u32,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            model: ModelHandle(Arc::new(Mutex::new(DeviceState::default()))),
            fail_opens: 0,
        }
    }

    pub fn failing_once() -> Self {
        let mut transport = Self::new();
        transport.fail_opens = 1;
        transport
    }

    pub fn model(&self) -> ModelHandle {
        self.model.clone()
    }
}

impl Transport for MockTransport {
    type Port = MockPort;

    fn open(&mut self) -> Result<MockPort, ConnectError> {
        if self.fail_opens > 0 {
            self.fail_opens -= 1;
            return Err(ConnectError::Open {
                port: "MOCK0".to_string(),
                reason: "no such device".to_string(),
            });
        }
        Ok(MockPort::with_model(self.model.clone()))
    }
}
