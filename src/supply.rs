//! The protocol client for the gun supply.
//!
//! You can drive a [FegSupply] over any interface which implements
//! [embedded_io::Read] & [embedded_io::Write]. Methods named "read" return
//! measured values; "set" programs a value; "switch" toggles an output.
//!
//! Every operation is one request/response exchange: the supply answers
//! each frame with a single line, so there is no pipelining to manage.

use embedded_io::Error as _;
use log::{debug, trace, warn};
use strum::IntoEnumIterator;

use crate::command::{self, Channel, Query};
use crate::error::{Error, Result};
use crate::frame::{self, MAX_FRAME, Response};
use crate::status::StatusWord;
use crate::types::{DeviceReading, FirmwareInfo, Setpoint};

/// One full poll sweep: telemetry, the device's status word and the trip
/// current read back from the device.
#[derive(Debug, Clone, Copy)]
pub struct PollSample {
    pub reading: DeviceReading,
    pub status: StatusWord,
    pub trip_current_ua: f64,
}

pub struct FegSupply<S: embedded_io::Read + embedded_io::Write> {
    interface: S,
    /// Immediate retries per exchange after a timeout or a bad frame.
    retries: u8,
}

impl<S: embedded_io::Read + embedded_io::Write> FegSupply<S> {
    pub fn new(interface: S) -> Self {
        Self {
            interface,
            retries: 2,
        }
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    /// Give the interface back, e.g. to drop the port on disconnect.
    pub fn into_inner(self) -> S {
        self.interface
    }

    /// Transmit one frame and read the response line.
    fn exchange_once(&mut self, body: &str) -> Result<Response, S::Error> {
        let line = frame::encode(body)?;
        self.interface.write_all(&line).map_err(Error::Serial)?;
        self.interface.flush().map_err(Error::Serial)?;

        // Read byte-wise until the terminator. The port's own read timeout
        // bounds how long this blocks.
        let mut buf: heapless::Vec<u8, MAX_FRAME> = heapless::Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.interface.read(&mut byte) {
                Ok(0) => return Err(Error::Timeout),
                Ok(_) => {
                    if buf.push(byte[0]).is_err() {
                        return Err(Error::BufferOverflow);
                    }
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Err(e) => {
                    if matches!(
                        e.kind(),
                        embedded_io::ErrorKind::TimedOut | embedded_io::ErrorKind::Other
                    ) {
                        return Err(Error::Timeout);
                    }
                    return Err(Error::Serial(e));
                }
            }
        }

        let resp = frame::decode(&buf)?;
        trace!("exchange {body} -> {}", resp.body());
        Ok(resp)
    }

    /// Exchange with immediate retries on timeout or a corrupt frame.
    /// Other errors propagate straight away.
    pub fn exchange(&mut self, body: &str) -> Result<Response, S::Error> {
        let mut attempt = 0;
        loop {
            match self.exchange_once(body) {
                Err(e) if attempt < self.retries
                    && matches!(e, Error::Timeout | Error::Frame(_)) =>
                {
                    attempt += 1;
                    debug!("retrying '{body}' after {e}, attempt {attempt}");
                }
                other => return other,
            }
        }
    }

    /// Run the init handshake the vendor software performs after opening
    /// the port. Individual init commands are allowed to go unanswered,
    /// but the closing status query must succeed for the handshake to.
    pub fn handshake(&mut self) -> Result<FirmwareInfo, S::Error> {
        let mut firmware = FirmwareInfo::default();
        for body in command::HANDSHAKE {
            match self.exchange(body) {
                Ok(resp) => match body {
                    "050" => firmware.main = payload_or_body(&resp, "050"),
                    "051" => firmware.floating_deck = payload_or_body(&resp, "051"),
                    _ => {}
                },
                Err(e) => warn!("init command '{body}' unanswered: {e}"),
            }
        }
        self.read_status()?;
        Ok(firmware)
    }

    /// Read and parse the status word.
    pub fn read_status(&mut self) -> Result<StatusWord, S::Error> {
        let resp = self.exchange(Query::Status.body())?;
        let payload = resp.value("02").ok_or(Error::InvalidResponse)?;
        StatusWord::parse(payload).ok_or(Error::InvalidResponse)
    }

    /// Read one monitor as a number in the device's reporting unit.
    pub fn read_value(&mut self, query: Query) -> Result<f64, S::Error> {
        let resp = self.exchange(query.body())?;
        let value = resp.value(query.code()).ok_or(Error::InvalidResponse)?;
        value.parse().map_err(|_| Error::InvalidResponse)
    }

    /// Heater voltage in volts. The device reports millivolts.
    pub fn read_heater_voltage_v(&mut self) -> Result<f64, S::Error> {
        Ok(self.read_value(Query::HeaterVoltage)? / 1000.0)
    }

    /// One full telemetry sweep, in the order the vendor software polls.
    pub fn read_all(&mut self) -> Result<PollSample, S::Error> {
        let beam_voltage_v = self.read_value(Query::BeamVoltage)?;
        let beam_current_ua = self.read_value(Query::BeamCurrent)?;
        let heater_current_ma = self.read_value(Query::HeaterCurrent)?;
        let heater_voltage_v = self.read_heater_voltage_v()?;
        let extractor_voltage_v = self.read_value(Query::ExtractorVoltage)?;
        let extractor_current_ua = self.read_value(Query::ExtractorCurrent)?;
        let suppressor_voltage_v = self.read_value(Query::SuppressorVoltage)?;
        let suppressor_current_ua = self.read_value(Query::SuppressorCurrent)?;
        let beam_target_v = self.read_value(Query::BeamVoltageTarget)?;
        let trip_current_ua = self.read_value(Query::ExtractorTripCurrent)?;
        let status = self.read_status()?;

        Ok(PollSample {
            reading: DeviceReading {
                beam_voltage_v,
                beam_target_v,
                beam_current_ua,
                extractor_voltage_v,
                extractor_current_ua,
                suppressor_voltage_v,
                suppressor_current_ua,
                heater_voltage_v,
                heater_current_ma,
                taken_at: std::time::SystemTime::now(),
            },
            status,
            trip_current_ua,
        })
    }

    /// Program a channel setpoint. The value is validated against the
    /// channel's hardware range before any frame is built.
    pub fn apply(&mut self, setpoint: Setpoint) -> Result<(), S::Error> {
        let body = setpoint
            .channel
            .set_body(setpoint.value)
            .ok_or(Error::OutOfRange)?;
        self.exchange(&body)?;
        Ok(())
    }

    /// Switch one output on or off.
    pub fn switch_output(&mut self, channel: Channel, enable: bool) -> Result<(), S::Error> {
        self.exchange(&channel.switch_body(enable))?;
        Ok(())
    }

    /// Switch every output off, beam first.
    pub fn disable_all(&mut self) -> Result<(), S::Error> {
        for channel in Channel::iter() {
            self.switch_output(channel, false)?;
        }
        Ok(())
    }

    /// Program the extractor trip current on the device.
    pub fn set_trip_current(&mut self, microamps: f64) -> Result<(), S::Error> {
        let body = command::trip_current_body(microamps).ok_or(Error::OutOfRange)?;
        self.exchange(&body)?;
        Ok(())
    }
}

fn payload_or_body(resp: &Response, code: &str) -> String {
    resp.value(code).unwrap_or_else(|| resp.body()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_supply::MockPort;

    #[test]
    fn handshake_sends_init_sequence_then_status() {
        let port = MockPort::new();
        let model = port.model();
        let mut supply = FegSupply::new(port);

        supply.handshake().unwrap();

        let requests = model.requests();
        assert_eq!(
            requests,
            vec!["017F", "01990", "050", "051", "080", "081", "02"]
        );
    }

    #[test]
    fn handshake_fails_without_status_answer() {
        let port = MockPort::new();
        let model = port.model();
        model.set_muted(true);
        let mut supply = FegSupply::new(port).with_retries(0);

        assert!(matches!(supply.handshake(), Err(Error::Timeout)));
    }

    #[test]
    fn read_all_converts_units() {
        let port = MockPort::new();
        let model = port.model();
        model.set_beam_voltage_v(25_000.0);
        model.set_heater_voltage_mv(1_500.0);
        model.set_heater_current_ma(2_345.6);
        let mut supply = FegSupply::new(port);

        let sample = supply.read_all().unwrap();
        assert_eq!(sample.reading.beam_voltage_v, 25_000.0);
        assert_eq!(sample.reading.heater_voltage_v, 1.5);
        assert_eq!(sample.reading.heater_current_ma, 2_345.6);
        assert_eq!(sample.trip_current_ua, 735.0);
    }

    #[test]
    fn apply_rejects_out_of_range_without_framing() {
        let port = MockPort::new();
        let model = port.model();
        let mut supply = FegSupply::new(port);

        let result = supply.apply(Setpoint {
            channel: Channel::Extractor,
            value: 15_000.0,
        });
        assert!(matches!(result, Err(Error::OutOfRange)));
        assert!(model.requests().is_empty());
    }

    #[test]
    fn apply_writes_setpoint_frame() {
        let port = MockPort::new();
        let model = port.model();
        let mut supply = FegSupply::new(port);

        supply
            .apply(Setpoint {
                channel: Channel::Beam,
                value: 12_345.6,
            })
            .unwrap();
        assert_eq!(model.requests(), vec!["0912345.6"]);
    }

    #[test]
    fn exchange_retries_through_a_dropped_response() {
        let port = MockPort::new();
        let model = port.model();
        model.drop_next_responses(1);
        let mut supply = FegSupply::new(port);

        supply.read_status().unwrap();
        // First attempt went unanswered, the retry got through.
        assert_eq!(model.requests(), vec!["02", "02"]);
    }

    #[test]
    fn exchange_gives_up_after_configured_retries() {
        let port = MockPort::new();
        let model = port.model();
        model.set_muted(true);
        let mut supply = FegSupply::new(port).with_retries(2);

        assert!(matches!(supply.read_status(), Err(Error::Timeout)));
        assert_eq!(model.requests().len(), 3);
    }

    #[test]
    fn corrupt_frames_error_after_retries() {
        let port = MockPort::new();
        let model = port.model();
        model.corrupt_next_responses(3);
        let mut supply = FegSupply::new(port).with_retries(2);

        assert!(matches!(supply.read_status(), Err(Error::Frame(_))));
    }

    #[test]
    fn switch_output_uses_channel_codes() {
        let port = MockPort::new();
        let model = port.model();
        let mut supply = FegSupply::new(port);

        supply.switch_output(Channel::Heater, true).unwrap();
        supply.switch_output(Channel::Beam, false).unwrap();
        assert_eq!(model.requests(), vec!["0306", "0301"]);
    }
}
