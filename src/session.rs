//! The session engine.
//!
//! One worker thread owns the transport and the [FegSupply] built on it.
//! Operator intents arrive over an mpsc queue and are answered through a
//! one shot reply channel each, so a caller can fire and forget or block
//! on the outcome. Telemetry and session state are published as a cloned
//! [Snapshot] behind a mutex; callers never touch the port directly.
//!
//! The worker interleaves queued intents with the periodic poll cycle by
//! waiting on the intent queue until the next poll is due. Intents are
//! served strictly in submission order and a steady stream of them cannot
//! starve the poll, because the poll deadline keeps advancing regardless.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::command::{self, Channel};
use crate::error::{ConnectError, IntentError};
use crate::interlock;
use crate::supply::FegSupply;
use crate::transport::Transport;
use crate::types::{
    Config, FaultFlag, FaultState, Limit, Limits, SessionState, Setpoint, Snapshot,
};

enum Intent {
    Connect,
    Disconnect,
    Reset,
    SetValue { channel: Channel, value: f64 },
    SetEnabled { channel: Channel, enable: bool },
    SetLimit { limit: Limit, value: f64 },
    AcknowledgeFaults,
    Shutdown,
}

struct Envelope {
    intent: Intent,
    reply: SyncSender<Result<(), IntentError>>,
}

/// Handle on one submitted intent. Resolves exactly once; if the worker
/// is gone before it answers, the outcome is [IntentError::SessionClosed].
#[must_use = "the intent outcome is reported through this handle"]
pub struct Pending {
    rx: Receiver<Result<(), IntentError>>,
}

impl Pending {
    /// Block until the worker has carried out or refused the intent.
    pub fn wait(self) -> Result<(), IntentError> {
        self.rx.recv().unwrap_or(Err(IntentError::SessionClosed))
    }
}

/// Owning handle on a running session engine.
///
/// Dropping the session stops the worker; the port closes with it.
pub struct Session {
    tx: Sender<Envelope>,
    shared: Arc<Mutex<Snapshot>>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Start the engine. The worker sits idle in `Disconnected` until a
    /// connect intent arrives.
    pub fn spawn<T: Transport>(transport: T, config: Config) -> Self {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Mutex::new(Snapshot::default()));
        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || Worker::new(transport, config, worker_shared, rx).run());
        Self {
            tx,
            shared,
            worker: Some(worker),
        }
    }

    /// The most recently published state and telemetry, cloned out.
    pub fn snapshot(&self) -> Snapshot {
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn connect(&self) -> Pending {
        self.submit(Intent::Connect)
    }

    pub fn disconnect(&self) -> Pending {
        self.submit(Intent::Disconnect)
    }

    /// Clear acknowledged faults and return to `Connected`. Verifies that
    /// every output is off first, forcing them off if need be.
    pub fn reset(&self) -> Pending {
        self.submit(Intent::Reset)
    }

    pub fn set_value(&self, channel: Channel, value: f64) -> Pending {
        self.submit(Intent::SetValue { channel, value })
    }

    pub fn set_enabled(&self, channel: Channel, enable: bool) -> Pending {
        self.submit(Intent::SetEnabled { channel, enable })
    }

    pub fn set_limit(&self, limit: Limit, value: f64) -> Pending {
        self.submit(Intent::SetLimit { limit, value })
    }

    pub fn acknowledge_faults(&self) -> Pending {
        self.submit(Intent::AcknowledgeFaults)
    }

    /// Stop the worker and wait for it to finish.
    pub fn shutdown(self) {}

    fn submit(&self, intent: Intent) -> Pending {
        let (reply, rx) = mpsc::sync_channel(1);
        // A send failure means the worker is gone; wait() then reads the
        // dropped reply sender as SessionClosed.
        let _ = self.tx.send(Envelope { intent, reply });
        Pending { rx }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let (reply, _rx) = mpsc::sync_channel(1);
            let _ = self.tx.send(Envelope {
                intent: Intent::Shutdown,
                reply,
            });
            let _ = worker.join();
        }
    }
}

struct Worker<T: Transport> {
    transport: T,
    config: Config,
    shared: Arc<Mutex<Snapshot>>,
    intents: Receiver<Envelope>,
    supply: Option<FegSupply<T::Port>>,
    snapshot: Snapshot,
    poll_failures: u8,
    next_poll: Instant,
}

impl<T: Transport> Worker<T> {
    fn new(
        transport: T,
        config: Config,
        shared: Arc<Mutex<Snapshot>>,
        intents: Receiver<Envelope>,
    ) -> Self {
        Self {
            transport,
            config,
            shared,
            intents,
            supply: None,
            snapshot: Snapshot::default(),
            poll_failures: 0,
            next_poll: Instant::now(),
        }
    }

    fn run(mut self) {
        loop {
            if self.supply.is_some() {
                let until_poll = self.next_poll.saturating_duration_since(Instant::now());
                match self.intents.recv_timeout(until_poll) {
                    Ok(envelope) => {
                        if !self.handle(envelope) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        self.poll_cycle();
                        self.next_poll = Instant::now() + self.config.poll_interval;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                // Nothing to poll; block until someone wants something.
                match self.intents.recv() {
                    Ok(envelope) => {
                        if !self.handle(envelope) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
        debug!("session worker stopping");
    }

    /// Carry out one intent and answer it. Returns false on shutdown.
    fn handle(&mut self, envelope: Envelope) -> bool {
        let result = match envelope.intent {
            Intent::Shutdown => {
                let _ = envelope.reply.send(Ok(()));
                return false;
            }
            Intent::Connect => match self.snapshot.state {
                SessionState::Disconnected => self.do_connect(),
                state => Err(IntentError::NotAllowed(state)),
            },
            Intent::Disconnect => self.do_disconnect(),
            Intent::Reset => self.do_reset(),
            Intent::SetValue { channel, value } => self.do_set_value(channel, value),
            Intent::SetEnabled { channel, enable } => self.do_set_enabled(channel, enable),
            Intent::SetLimit { limit, value } => self.do_set_limit(limit, value),
            Intent::AcknowledgeFaults => {
                if self.snapshot.faults.is_faulted() {
                    self.snapshot.faults.acknowledged = true;
                    info!("operator acknowledged latched faults");
                }
                Ok(())
            }
        };
        self.publish();
        let _ = envelope.reply.send(result);
        true
    }

    fn do_connect(&mut self) -> Result<(), IntentError> {
        self.snapshot.state = SessionState::Connecting;
        self.publish();

        let port = match self.transport.open() {
            Ok(port) => port,
            Err(e) => {
                warn!("connect failed: {e}");
                self.snapshot.state = SessionState::Disconnected;
                return Err(e.into());
            }
        };

        let mut supply = FegSupply::new(port).with_retries(self.config.retries);
        match supply.handshake() {
            Ok(firmware) => {
                info!(
                    "connected, firmware main '{}' deck '{}'",
                    firmware.main, firmware.floating_deck
                );
                self.snapshot = Snapshot {
                    state: SessionState::Connected,
                    firmware: Some(firmware),
                    ..Snapshot::default()
                };
                self.supply = Some(supply);
                self.poll_failures = 0;
                // First poll right away so callers see telemetry promptly.
                self.next_poll = Instant::now();
                Ok(())
            }
            Err(e) => {
                warn!("handshake failed: {e}");
                self.snapshot.state = SessionState::Disconnected;
                Err(ConnectError::Handshake(e.to_string()).into())
            }
        }
    }

    fn do_disconnect(&mut self) -> Result<(), IntentError> {
        if let Some(mut supply) = self.supply.take() {
            // Best effort: the port closes even when the supply no
            // longer answers.
            if let Err(e) = supply.disable_all() {
                warn!("could not confirm outputs off before closing: {e}");
            }
            info!("disconnected");
        }
        // Dropping the supply closed the port. Host side limits and any
        // latched faults do not survive the connection.
        self.snapshot = Snapshot::default();
        Ok(())
    }

    fn do_reset(&mut self) -> Result<(), IntentError> {
        match self.snapshot.state {
            SessionState::Connected | SessionState::Fault => {}
            state => return Err(IntentError::NotAllowed(state)),
        }
        if self.snapshot.faults.is_faulted() && !self.snapshot.faults.acknowledged {
            return Err(IntentError::Unacknowledged);
        }
        let Some(supply) = self.supply.as_mut() else {
            return Err(IntentError::NotAllowed(self.snapshot.state));
        };

        // Outputs must be verifiably off before the latch clears.
        let verified = match supply.read_status() {
            Ok(status) if status.outputs().any_on() => supply.disable_all(),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = verified {
            return Err(IntentError::Device(e.to_string()));
        }

        // Setpoints return to zero so a later enable cannot revive the
        // values that were programmed before the fault.
        for channel in [
            Channel::Beam,
            Channel::Heater,
            Channel::Suppressor,
            Channel::Extractor,
        ] {
            supply
                .apply(Setpoint { channel, value: 0.0 })
                .map_err(|e| IntentError::Device(e.to_string()))?;
        }

        self.snapshot.faults = FaultState::default();
        self.snapshot.limits.heater_current_ma = Limits::default().heater_current_ma;
        self.snapshot.outputs = Default::default();
        self.snapshot.state = SessionState::Connected;
        self.poll_failures = 0;
        info!("session reset, back to Connected");
        Ok(())
    }

    fn do_set_value(&mut self, channel: Channel, value: f64) -> Result<(), IntentError> {
        match self.snapshot.state {
            SessionState::Connected => {}
            SessionState::Fault => return Err(IntentError::Faulted),
            state => return Err(IntentError::NotAllowed(state)),
        }
        if !channel.range().contains(&value) {
            return Err(IntentError::Validation(format!(
                "{channel} setpoint {value} outside {:?} {}",
                channel.range(),
                channel.unit()
            )));
        }

        // The heater additionally honours the host side current limit,
        // clamping rather than refusing, like the vendor software.
        let mut value = value;
        if channel == Channel::Heater && value > self.snapshot.limits.heater_current_ma {
            warn!(
                "heater setpoint {value} mA above limit, clamping to {} mA",
                self.snapshot.limits.heater_current_ma
            );
            value = self.snapshot.limits.heater_current_ma;
        }

        let Some(supply) = self.supply.as_mut() else {
            return Err(IntentError::NotAllowed(self.snapshot.state));
        };
        supply
            .apply(Setpoint { channel, value })
            .map_err(|e| IntentError::Device(e.to_string()))
    }

    fn do_set_enabled(&mut self, channel: Channel, enable: bool) -> Result<(), IntentError> {
        match (self.snapshot.state, enable) {
            (SessionState::Connected, _) => {}
            // Turning things off is always allowed under a fault.
            (SessionState::Fault, false) => {}
            (SessionState::Fault, true) => return Err(IntentError::Faulted),
            (state, _) => return Err(IntentError::NotAllowed(state)),
        }
        let Some(supply) = self.supply.as_mut() else {
            return Err(IntentError::NotAllowed(self.snapshot.state));
        };
        supply
            .switch_output(channel, enable)
            .map_err(|e| IntentError::Device(e.to_string()))?;
        // Read the switch result back so the snapshot follows promptly.
        if let Ok(status) = supply.read_status() {
            self.snapshot.outputs = status.outputs();
        }
        Ok(())
    }

    fn do_set_limit(&mut self, limit: Limit, value: f64) -> Result<(), IntentError> {
        match self.snapshot.state {
            SessionState::Connected | SessionState::Fault => {}
            state => return Err(IntentError::NotAllowed(state)),
        }
        match limit {
            Limit::HeaterCurrentMa => {
                if !(value > 0.0 && value <= command::HEATER_CURRENT_MAX_MA) {
                    return Err(IntentError::Validation(format!(
                        "heater limit {value} outside 0..={} mA",
                        command::HEATER_CURRENT_MAX_MA
                    )));
                }
                self.snapshot.limits.heater_current_ma = value;
                Ok(())
            }
            Limit::ExtractorTripUa => {
                if !command::TRIP_CURRENT_RANGE_UA.contains(&value) {
                    return Err(IntentError::Validation(format!(
                        "trip current {value} outside {:?} uA",
                        command::TRIP_CURRENT_RANGE_UA
                    )));
                }
                let Some(supply) = self.supply.as_mut() else {
                    return Err(IntentError::NotAllowed(self.snapshot.state));
                };
                supply
                    .set_trip_current(value)
                    .map_err(|e| IntentError::Device(e.to_string()))?;
                self.snapshot.limits.extractor_trip_ua = value;
                Ok(())
            }
        }
    }

    /// One telemetry sweep plus interlock evaluation. Runs in every state
    /// with a live port, `Fault` included, so the operator can keep
    /// watching the device while deciding what to do.
    fn poll_cycle(&mut self) {
        let Some(supply) = self.supply.as_mut() else {
            return;
        };
        match supply.read_all() {
            Ok(sample) => {
                self.poll_failures = 0;
                self.snapshot.reading = Some(sample.reading);
                self.snapshot.outputs = sample.status.outputs();
                self.snapshot.limits.extractor_trip_ua = sample.trip_current_ua;

                let eval = interlock::evaluate(
                    &sample.reading,
                    &sample.status,
                    &self.snapshot.limits,
                    self.config.warn_fraction,
                );
                for channel in &eval.warnings {
                    if !self.snapshot.faults.warnings.contains(channel) {
                        warn!("{channel} is approaching its limit");
                    }
                }
                let must_disable = eval.must_disable();
                self.snapshot.faults.warnings = eval.warnings;

                if must_disable {
                    for flag in eval.faults {
                        if self.snapshot.faults.latch(flag) {
                            error!("safety fault latched: {flag}");
                        }
                    }
                    if let Err(e) = supply.disable_all() {
                        error!("failed to force outputs off: {e}");
                    } else if let Ok(status) = supply.read_status() {
                        self.snapshot.outputs = status.outputs();
                    }
                    self.snapshot.state = SessionState::Fault;
                }
            }
            Err(e) => {
                self.poll_failures = self.poll_failures.saturating_add(1);
                warn!(
                    "poll cycle failed ({} of {}): {e}",
                    self.poll_failures, self.config.comm_loss_threshold
                );
                if self.poll_failures >= self.config.comm_loss_threshold
                    && self.snapshot.faults.latch(FaultFlag::CommunicationLoss)
                {
                    error!("communication loss, faulting the session");
                    self.snapshot.state = SessionState::Fault;
                }
            }
        }
        self.publish();
    }

    fn publish(&self) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        *shared = self.snapshot.clone();
    }
}
