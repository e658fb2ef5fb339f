//! Fan protocol controller
//!
//! Top-level state machine: restores or negotiates the pairing, polls the
//! main unit for its settings and turns user requests into set-speed
//! exchanges.
//!
//! # State Machine
//!
//! ```text
//!            stored record                       command pending
//! ┌─────────┐───────────────>┌──────┐─────────────────────────────>┌──────────────────────┐
//! │ Startup │                │ Idle │                              │ WaitSetSpeedResponse │
//! └─────────┘───────┐        └──────┘<──────┐                      └──────────────────────┘
//!        no record  │         │  ^  │       │ settings                   │ settings, send ack
//!                   v         │  │  │       │                            v
//!            ┌───────────┐    │  │  │  ┌──────────────────────┐   ┌──────────────────────┐
//!            │ Discovery │────┘  │  └─>│ WaitQueryResponse /  │   │ WaitSetSpeedConfirm  │
//!            └───────────┘ done  │     │ WaitQueryForUpdate   │   └──────────────────────┘
//!                                │     └──────────────────────┘              │ ack sent
//!                                └───────────────────────────────────────────┘
//! ```
//!
//! Any failed exchange sets [`ErrorStatus::CommunicationError`] and returns to
//! `Idle`. The host drives everything through [`FanController::tick`],
//! [`FanController::rf_complete`] and [`FanController::rf_handle_received`],
//! passing a millisecond timestamp.

use crate::config::{fan, protocol};
use crate::join::{JoinOutcome, JoinSettings, JoinState, NetworkJoin};
use crate::protocol::{FanSettings, Frame, Opcode, Payload, SpeedPreset};
use crate::radio::{FanRadio, RadioConfig};
use crate::store::{ConfigStore, NetworkConfig};
use crate::transport::{
    Exchange, TransmissionManager, TransportError, TransportEvent, TransportSettings,
};
use heapless::Deque;
use log::{debug, info, trace, warn};

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanState {
    /// Nothing loaded yet
    Startup,
    /// Join handshake in progress
    Discovery,
    /// Paired, nothing outstanding
    Idle,
    /// First query after pairing or boot
    WaitQueryResponse,
    /// Set-speed sent, waiting for the resulting settings
    WaitSetSpeedResponse,
    /// Acknowledging the settings the main unit replied with
    WaitSetSpeedConfirm,
    /// Periodic status query
    WaitQueryForUpdate,
}

/// Error indicator exposed to the host
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    None = 0,
    /// An exchange with the main unit failed
    CommunicationError = 1,
    /// Pairing attempts exhausted
    DiscoveryFailed = 2,
}

/// Errors returned synchronously to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// Speed is not one of the presets
    InvalidSpeed,
    /// No network to send on yet
    Busy,
}

/// Last settings reported by the main unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanStatus {
    pub speed: u8,
    pub voltage: u8,
    pub timer: u8,
}

impl FanStatus {
    /// Reported speed as a preset, if it is one
    pub fn preset(&self) -> Option<SpeedPreset> {
        SpeedPreset::from_byte(self.speed)
    }
}

/// Latest user request. A newer request replaces an unsent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub speed: SpeedPreset,
    pub timer: u8,
    /// Set when the command still has to be sent
    pub dirty: bool,
}

impl Default for PendingCommand {
    fn default() -> Self {
        Self {
            speed: SpeedPreset::Auto,
            timer: 0,
            dirty: false,
        }
    }
}

/// Per-device control bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub pending: PendingCommand,
    /// When the last status query was issued
    pub last_query: Option<u32>,
    pub error: ErrorStatus,
    pub status: Option<FanStatus>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            pending: PendingCommand::default(),
            last_query: None,
            error: ErrorStatus::None,
            status: None,
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub radio: RadioConfig,
    pub transport: TransportSettings,
    pub join: JoinSettings,
    pub update_interval_ms: u32,
    /// Resends for queries and set-speed commands
    pub reply_retries: u8,
    /// Preferred device id when pairing
    pub device_id_seed: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            radio: RadioConfig::default(),
            transport: TransportSettings::default(),
            join: JoinSettings::default(),
            update_interval_ms: fan::UPDATE_INTERVAL_MS,
            reply_retries: protocol::TX_RETRIES,
            device_id_seed: 0x00,
        }
    }
}

pub struct FanController<R: FanRadio, S: ConfigStore> {
    transport: TransmissionManager<R>,
    store: S,
    config: ControllerConfig,
    state: FanState,
    join: Option<NetworkJoin>,
    network: Option<NetworkConfig>,
    control: ControlState,
    /// Frames received since the last tick
    rx_queue: Deque<Frame, { protocol::RX_QUEUE_DEPTH }>,
}

impl<R: FanRadio, S: ConfigStore> FanController<R, S> {
    /// Build a controller and apply the radio configuration. Nothing is
    /// sent until the first [`tick`](Self::tick).
    pub fn new(radio: R, store: S, config: ControllerConfig) -> Self {
        let mut transport = TransmissionManager::new(radio, config.transport.clone());
        if let Err(e) = transport.radio_mut().configure(&config.radio) {
            warn!("Radio configuration failed: {:?}", e);
        }

        Self {
            transport,
            store,
            config,
            state: FanState::Startup,
            join: None,
            network: None,
            control: ControlState::default(),
            rx_queue: Deque::new(),
        }
    }

    pub fn state(&self) -> FanState {
        self.state
    }

    /// Numeric error indicator, 0 when healthy
    pub fn error_status(&self) -> u8 {
        self.control.error as u8
    }

    pub fn error(&self) -> ErrorStatus {
        self.control.error
    }

    pub fn status(&self) -> Option<FanStatus> {
        self.control.status
    }

    pub fn network(&self) -> Option<&NetworkConfig> {
        self.network.as_ref()
    }

    pub fn pending_command(&self) -> &PendingCommand {
        &self.control.pending
    }

    pub fn join_state(&self) -> Option<JoinState> {
        self.join.as_ref().map(NetworkJoin::state)
    }

    pub fn transport(&self) -> &TransmissionManager<R> {
        &self.transport
    }

    pub fn radio(&self) -> &R {
        self.transport.radio()
    }

    pub fn radio_mut(&mut self) -> &mut R {
        self.transport.radio_mut()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Advance the controller. Call periodically with the current time.
    pub fn tick(&mut self, now: u32) {
        if self.state == FanState::Startup {
            self.startup(now);
        }

        while let Some(frame) = self.rx_queue.pop_front() {
            self.dispatch_frame(&frame, now);
        }

        if let Some(event) = self.transport.poll(now) {
            self.handle_transport_event(event, now);
        }

        self.step(now);

        // Send whatever the step queued without waiting for the next tick
        if let Some(event) = self.transport.poll(now) {
            self.handle_transport_event(event, now);
        }
    }

    /// The radio finished a transmit
    pub fn rf_complete(&mut self, now: u32) {
        if let Some(event) = self.transport.on_radio_complete(now) {
            self.handle_transport_event(event, now);
        }
    }

    /// A frame arrived from the radio. Filtered here, handled on the next tick.
    pub fn rf_handle_received(&mut self, data: &[u8]) {
        let Some(frame) = self.transport.handle_received(data) else {
            return;
        };

        if self.rx_queue.push_back(frame).is_err() {
            warn!("Receive queue full, dropping frame");
            self.transport.release_reply();
        }
    }

    /// Request a speed preset, with an optional timer in minutes.
    ///
    /// Only recorded here; the next tick sends it. A newer request replaces
    /// one that has not gone out yet.
    pub fn set_speed(&mut self, speed: u8, timer: u8) -> Result<(), ControlError> {
        let preset = SpeedPreset::from_byte(speed).ok_or(ControlError::InvalidSpeed)?;

        if self.network.is_none() || matches!(self.state, FanState::Startup | FanState::Discovery) {
            debug!("Set speed rejected in {:?}", self.state);
            return Err(ControlError::Busy);
        }

        self.control.pending = PendingCommand {
            speed: preset,
            timer,
            dirty: true,
        };
        Ok(())
    }

    /// (Re)start pairing with a main unit
    pub fn discovery_start(&mut self, seed_id: u8, now: u32) {
        info!("Starting discovery");
        self.transport.cancel();
        self.state = FanState::Discovery;

        let mut join = NetworkJoin::new(seed_id, self.config.join.clone());
        let outcome = join.poll(&mut self.transport, now);
        self.join = Some(join);

        if let Some(outcome) = outcome {
            self.finish_join(outcome);
        }
    }

    /// Apply settings reported by the main unit and return to `Idle`
    pub fn fan_settings_received(&mut self, speed: u8, voltage: u8, timer: u8) {
        self.update_status(FanSettings { speed, voltage, timer });
        self.state = FanState::Idle;
    }

    fn startup(&mut self, now: u32) {
        match self.store.load() {
            Some(network) if network.is_valid() => {
                info!(
                    "Using stored network 0x{:08X}, main unit 0x{:02X}",
                    network.network_id, network.main_unit_id
                );
                self.use_network(network);
                self.state = FanState::Idle;
            }
            Some(_) => {
                warn!("Stored network config is invalid, rediscovering");
                self.discovery_start(self.config.device_id_seed, now);
            }
            None => {
                info!("No stored network config");
                self.discovery_start(self.config.device_id_seed, now);
            }
        }
    }

    fn use_network(&mut self, network: NetworkConfig) {
        if let Err(e) = self.transport.radio_mut().set_network_address(network.network_id) {
            warn!("Could not switch to network 0x{:08X}: {:?}", network.network_id, e);
        }
        self.transport.set_local_address(network.my_address());
        self.network = Some(network);
        self.control.last_query = None;
    }

    fn finish_join(&mut self, outcome: JoinOutcome) {
        self.join = None;
        self.state = FanState::Idle;

        match outcome {
            JoinOutcome::Joined(network) => {
                self.use_network(network);
                self.control.error = ErrorStatus::None;
            }
            JoinOutcome::Failed => {
                warn!("Discovery failed");
                self.control.error = ErrorStatus::DiscoveryFailed;
                // Fall back to the pairing we had, if any
                if let Some(previous) = self.network {
                    self.use_network(previous);
                }
            }
        }
    }

    fn step(&mut self, now: u32) {
        match self.state {
            FanState::Discovery => {
                let outcome = match self.join.as_mut() {
                    Some(join) => join.poll(&mut self.transport, now),
                    None => None,
                };
                if let Some(outcome) = outcome {
                    self.finish_join(outcome);
                    self.step_idle(now);
                }
            }
            FanState::Idle => self.step_idle(now),
            _ => {}
        }
    }

    fn step_idle(&mut self, now: u32) {
        let network = match self.network {
            Some(network) => network,
            None => return,
        };

        if self.control.pending.dirty {
            // Always the timer form, a zero timer means none
            let PendingCommand { speed, timer, .. } = self.control.pending;
            let payload = Payload::SetTimer {
                speed: speed as u8,
                timer,
            };

            info!("Setting speed {:?} (timer {} min)", speed, timer);
            let retries = Some(self.config.reply_retries);
            if self
                .send(&network, Opcode::SetTimer, payload, Exchange::SetSpeed, retries, now)
                .is_ok()
            {
                self.control.pending.dirty = false;
                self.state = FanState::WaitSetSpeedResponse;
            }
            return;
        }

        let (due, next) = match self.control.last_query {
            None => (true, FanState::WaitQueryResponse),
            Some(last) => (
                now.wrapping_sub(last) >= self.config.update_interval_ms,
                FanState::WaitQueryForUpdate,
            ),
        };

        if due {
            trace!("Querying main unit");
            let retries = Some(self.config.reply_retries);
            if self
                .send(&network, Opcode::QueryDevice, Payload::Empty, Exchange::Query, retries, now)
                .is_ok()
            {
                self.control.last_query = Some(now);
                self.state = next;
            }
        }
    }

    fn send(
        &mut self,
        network: &NetworkConfig,
        opcode: Opcode,
        payload: Payload,
        exchange: Exchange,
        retries: Option<u8>,
        now: u32,
    ) -> Result<(), TransportError> {
        let frame = Frame::encode(
            network.main_unit(),
            network.my_address(),
            protocol::TTL,
            opcode as u8,
            &payload.encode(),
        );

        self.transport
            .start_transmit(frame, exchange, retries, now)
            .map_err(|e| {
                debug!("Could not start {:?}: {:?}", exchange, e);
                e
            })
    }

    fn handle_transport_event(&mut self, event: TransportEvent, now: u32) {
        if self.state == FanState::Discovery {
            if let Some(join) = self.join.as_mut() {
                join.on_transport_event(event);
            }
            return;
        }

        match event {
            TransportEvent::Completed(Exchange::SetSpeedAck) => {
                if self.state == FanState::WaitSetSpeedConfirm {
                    self.state = FanState::Idle;
                    self.step_idle(now);
                }
            }
            TransportEvent::Completed(exchange) => {
                trace!("{:?} completed", exchange);
            }
            TransportEvent::Failed(exchange) => {
                warn!("{:?} failed, main unit unreachable", exchange);
                self.control.error = ErrorStatus::CommunicationError;
                self.state = FanState::Idle;
            }
        }
    }

    fn dispatch_frame(&mut self, frame: &Frame, now: u32) {
        if self.state == FanState::Discovery {
            let outcome = match self.join.as_mut() {
                Some(join) => join.handle_frame(frame, &mut self.transport, &mut self.store, now),
                None => None,
            };
            if let Some(outcome) = outcome {
                self.finish_join(outcome);
            }
            return;
        }

        let network = match self.network {
            Some(network) => network,
            None => {
                self.transport.release_reply();
                return;
            }
        };

        if frame.source() != network.main_unit() {
            trace!("Ignoring frame from {:?}", frame.source());
            self.transport.release_reply();
            return;
        }

        let opcode = Opcode::from_byte(frame.opcode());
        match (opcode, opcode.map(|op| Payload::parse(op, &frame.payload()))) {
            (Some(Opcode::FanSettings), Some(Ok(Payload::FanSettings(settings)))) => {
                self.on_fan_settings(&network, settings, now);
            }
            (Some(Opcode::FanSettings), _) => {
                debug!("Malformed fan settings");
                self.transport.release_reply();
            }
            _ => {
                trace!("Ignoring opcode 0x{:02X} in {:?}", frame.opcode(), self.state);
                self.transport.release_reply();
            }
        }
    }

    fn on_fan_settings(&mut self, network: &NetworkConfig, settings: FanSettings, now: u32) {
        match self.state {
            FanState::WaitQueryResponse | FanState::WaitQueryForUpdate => {
                self.transport.accept_reply();
                self.fan_settings_received(settings.speed, settings.voltage, settings.timer);
            }
            FanState::WaitSetSpeedResponse => {
                self.transport.accept_reply();
                self.update_status(settings);
                // A set-speed reply counts as a fresh status
                self.control.last_query = Some(now);

                match self.send(
                    network,
                    Opcode::SetSpeedReply,
                    Payload::Empty,
                    Exchange::SetSpeedAck,
                    None,
                    now,
                ) {
                    Ok(()) => self.state = FanState::WaitSetSpeedConfirm,
                    Err(_) => self.state = FanState::Idle,
                }
            }
            FanState::WaitSetSpeedConfirm => {
                self.update_status(settings);
            }
            FanState::Idle => {
                debug!("Unsolicited fan settings");
                self.fan_settings_received(settings.speed, settings.voltage, settings.timer);
            }
            FanState::Startup | FanState::Discovery => {
                self.transport.release_reply();
            }
        }
    }

    fn update_status(&mut self, settings: FanSettings) {
        debug!(
            "Fan settings: speed {} voltage {} timer {}",
            settings.speed, settings.voltage, settings.timer
        );
        self.control.status = Some(FanStatus {
            speed: settings.speed,
            voltage: settings.voltage,
            timer: settings.timer,
        });
        self.control.error = ErrorStatus::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{discovery, network};
    use crate::fan::FanCall;
    use crate::protocol::{Address, DeviceType};
    use crate::radio::traits::mock::MockRadio;
    use crate::store::mock::MemoryStore;
    use crate::transport::TransportState;

    const NETWORK_ID: u32 = 0x1122_3344;
    const MAIN: Address = Address::new(DeviceType::MainUnit as u8, 0x11);
    const ME: Address = Address::new(DeviceType::RemoteControl as u8, 0x42);

    type Controller = FanController<MockRadio, MemoryStore>;

    fn paired() -> NetworkConfig {
        NetworkConfig {
            network_id: NETWORK_ID,
            my_device_type: ME.device_type,
            my_device_id: ME.device_id,
            main_unit_type: MAIN.device_type,
            main_unit_id: MAIN.device_id,
        }
    }

    fn unpaired_controller() -> Controller {
        let config = ControllerConfig {
            device_id_seed: ME.device_id,
            ..ControllerConfig::default()
        };
        FanController::new(MockRadio::new(), MemoryStore::new(), config)
    }

    /// Booted from a stored record, initial query on air
    fn paired_controller() -> Controller {
        let mut controller = FanController::new(
            MockRadio::new(),
            MemoryStore::with_record(paired()),
            ControllerConfig::default(),
        );
        controller.tick(0);
        controller
    }

    /// Paired and idle with a known status
    fn idle_controller() -> Controller {
        let mut controller = paired_controller();
        finish_tx(&mut controller, 0);
        main_unit_sends(&mut controller, ME, Opcode::FanSettings, settings(0x01, 30, 0), 10);
        assert_eq!(controller.state(), FanState::Idle);
        controller.radio_mut().clear_tx_history();
        controller
    }

    fn settings(speed: u8, voltage: u8, timer: u8) -> Payload {
        Payload::FanSettings(FanSettings { speed, voltage, timer })
    }

    /// Report every pending hardware transmit as done
    fn finish_tx(controller: &mut Controller, now: u32) {
        while controller.transport().state() == TransportState::TxBusy {
            controller.rf_complete(now);
        }
    }

    fn main_unit_sends(
        controller: &mut Controller,
        destination: Address,
        opcode: Opcode,
        payload: Payload,
        now: u32,
    ) {
        let frame =
            Frame::encode(destination, MAIN, protocol::TTL, opcode as u8, &payload.encode());
        controller.rf_handle_received(frame.as_bytes());
        controller.tick(now);
    }

    fn last_sent(controller: &Controller) -> Frame {
        let bytes = controller.radio().last_tx().expect("Should have sent a frame");
        Frame::decode(bytes).expect("Sent frames must decode")
    }

    fn sent_count(controller: &Controller, opcode: Opcode) -> usize {
        controller
            .radio()
            .tx_history()
            .iter()
            .filter(|bytes| bytes[5] == opcode as u8)
            .count()
    }

    #[test]
    fn test_stored_record_skips_discovery() {
        let controller = paired_controller();

        assert_eq!(controller.state(), FanState::WaitQueryResponse);
        assert_eq!(controller.network(), Some(&paired()));
        assert_eq!(controller.radio().network_address(), Some(NETWORK_ID));
        assert!(controller.join_state().is_none());

        let query = last_sent(&controller);
        assert_eq!(query.opcode(), Opcode::QueryDevice as u8);
        assert_eq!(query.destination(), MAIN);
        assert_eq!(query.source(), ME);
        assert_eq!(query.ttl(), protocol::TTL);
    }

    #[test]
    fn test_invalid_record_starts_discovery() {
        let stored = NetworkConfig {
            network_id: network::DEFAULT_ID,
            ..paired()
        };
        let mut controller = FanController::new(
            MockRadio::new(),
            MemoryStore::with_record(stored),
            ControllerConfig::default(),
        );
        controller.tick(0);

        assert_eq!(controller.state(), FanState::Discovery);
        assert_eq!(controller.radio().network_address(), Some(network::LINK_ID));
    }

    #[test]
    fn test_query_response_updates_status() {
        let mut controller = paired_controller();
        finish_tx(&mut controller, 0);
        assert_eq!(controller.transport().state(), TransportState::RxWait);

        main_unit_sends(&mut controller, ME, Opcode::FanSettings, settings(0x02, 50, 0), 10);

        assert_eq!(controller.state(), FanState::Idle);
        assert_eq!(
            controller.status(),
            Some(FanStatus {
                speed: 0x02,
                voltage: 50,
                timer: 0
            })
        );
        assert_eq!(controller.status().and_then(|s| s.preset()), Some(SpeedPreset::Medium));
        assert_eq!(controller.error_status(), 0);
        assert!(controller.transport().is_idle());
    }

    #[test]
    fn test_set_speed_coalesces() {
        let mut controller = idle_controller();

        controller.set_speed(SpeedPreset::High as u8, 0).unwrap();
        controller.set_speed(SpeedPreset::Medium as u8, 0).unwrap();
        controller.tick(100);

        assert_eq!(controller.state(), FanState::WaitSetSpeedResponse);
        assert_eq!(controller.radio().tx_history().len(), 1);
        let command = last_sent(&controller);
        assert_eq!(command.opcode(), Opcode::SetTimer as u8);
        assert_eq!(
            Payload::parse(Opcode::SetTimer, &command.payload()),
            Ok(Payload::SetTimer {
                speed: SpeedPreset::Medium as u8,
                timer: 0
            })
        );
        assert!(!controller.pending_command().dirty);

        // Further ticks while waiting must not queue another command
        controller.tick(110);
        assert_eq!(sent_count(&controller, Opcode::SetTimer), 1);
    }

    #[test]
    fn test_set_speed_exchange() {
        let mut controller = idle_controller();

        controller.set_speed(SpeedPreset::Max as u8, 0).unwrap();
        controller.tick(100);
        finish_tx(&mut controller, 100);
        assert_eq!(sent_count(&controller, Opcode::SetTimer), protocol::TX_FRAMES as usize);
        assert_eq!(sent_count(&controller, Opcode::SetSpeed), 0);

        main_unit_sends(&mut controller, ME, Opcode::FanSettings, settings(0x04, 100, 0), 200);
        assert_eq!(controller.state(), FanState::WaitSetSpeedConfirm);
        assert_eq!(controller.status().map(|s| s.speed), Some(0x04));

        let ack = last_sent(&controller);
        assert_eq!(ack.opcode(), Opcode::SetSpeedReply as u8);
        assert_eq!(ack.destination(), MAIN);

        finish_tx(&mut controller, 210);
        assert_eq!(controller.state(), FanState::Idle);
        assert!(controller.transport().is_idle());
        assert_eq!(controller.error_status(), 0);
    }

    #[test]
    fn test_set_speed_with_timer() {
        let mut controller = idle_controller();

        controller.set_speed(SpeedPreset::High as u8, 30).unwrap();
        controller.tick(100);

        let command = last_sent(&controller);
        assert_eq!(command.opcode(), Opcode::SetTimer as u8);
        assert_eq!(command.payload(), [2, 0x03, 30, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_set_speed_without_timer_uses_timer_frame() {
        let mut controller = idle_controller();

        controller.set_speed(SpeedPreset::Medium as u8, 0).unwrap();
        controller.tick(100);

        let command = last_sent(&controller);
        assert_eq!(command.opcode(), Opcode::SetTimer as u8);
        assert_eq!(command.payload(), [2, 0x02, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_set_speed_rejects_invalid_preset() {
        let mut controller = idle_controller();
        assert_eq!(controller.set_speed(0x05, 0), Err(ControlError::InvalidSpeed));
        assert!(!controller.pending_command().dirty);
    }

    #[test]
    fn test_set_speed_busy_while_unpaired() {
        let mut controller = unpaired_controller();
        assert_eq!(controller.set_speed(SpeedPreset::Low as u8, 0), Err(ControlError::Busy));

        controller.tick(0);
        assert_eq!(controller.state(), FanState::Discovery);
        assert_eq!(controller.set_speed(SpeedPreset::Low as u8, 0), Err(ControlError::Busy));
    }

    #[test]
    fn test_retry_exhaustion_sets_error() {
        let mut controller = paired_controller();
        let mut now = 0;

        for _ in 0..100 {
            finish_tx(&mut controller, now);
            now += protocol::REPLY_TIMEOUT_MS + 1;
            controller.tick(now);
            if controller.state() == FanState::Idle {
                break;
            }
        }

        assert_eq!(controller.state(), FanState::Idle);
        assert_eq!(controller.error(), ErrorStatus::CommunicationError);
        assert_eq!(controller.error_status(), 1);
        assert_eq!(
            sent_count(&controller, Opcode::QueryDevice),
            (1 + protocol::TX_RETRIES as usize) * protocol::TX_FRAMES as usize
        );

        // Still usable afterwards
        controller.set_speed(SpeedPreset::Low as u8, 0).unwrap();
        controller.tick(now + 1);
        assert_eq!(controller.state(), FanState::WaitSetSpeedResponse);
    }

    #[test]
    fn test_successful_exchange_clears_error() {
        let mut controller = paired_controller();
        let mut now = 0;
        while controller.state() != FanState::Idle {
            finish_tx(&mut controller, now);
            now += protocol::REPLY_TIMEOUT_MS + 1;
            controller.tick(now);
        }
        assert_eq!(controller.error_status(), 1);

        controller.set_speed(SpeedPreset::Low as u8, 0).unwrap();
        controller.tick(now);
        finish_tx(&mut controller, now);
        main_unit_sends(&mut controller, ME, Opcode::FanSettings, settings(0x01, 30, 0), now + 10);

        assert_eq!(controller.error_status(), 0);
    }

    #[test]
    fn test_foreign_frame_ignored() {
        let mut controller = paired_controller();
        finish_tx(&mut controller, 0);

        let other_remote = Address::new(DeviceType::RemoteControl as u8, 0x43);
        let reply = settings(0x04, 100, 0);
        main_unit_sends(&mut controller, other_remote, Opcode::FanSettings, reply, 10);

        assert_eq!(controller.state(), FanState::WaitQueryResponse);
        assert_eq!(controller.transport().state(), TransportState::RxWait);
        assert!(controller.status().is_none());
    }

    #[test]
    fn test_frame_from_other_unit_released() {
        let mut controller = paired_controller();
        finish_tx(&mut controller, 0);

        let frame = Frame::encode(
            ME,
            Address::new(DeviceType::MainUnit as u8, 0x99),
            protocol::TTL,
            Opcode::FanSettings as u8,
            &settings(0x04, 100, 0).encode(),
        );
        controller.rf_handle_received(frame.as_bytes());
        controller.tick(10);

        assert_eq!(controller.state(), FanState::WaitQueryResponse);
        assert_eq!(controller.transport().state(), TransportState::RxWait);
    }

    #[test]
    fn test_unsolicited_settings_in_idle() {
        let mut controller = idle_controller();

        main_unit_sends(&mut controller, ME, Opcode::FanSettings, settings(0x03, 90, 15), 500);

        assert_eq!(controller.state(), FanState::Idle);
        assert_eq!(
            controller.status(),
            Some(FanStatus {
                speed: 0x03,
                voltage: 90,
                timer: 15
            })
        );
        assert!(controller.radio().tx_history().is_empty());
    }

    #[test]
    fn test_periodic_query() {
        let mut controller = idle_controller();

        controller.tick(fan::UPDATE_INTERVAL_MS - 1);
        assert_eq!(controller.state(), FanState::Idle);
        assert!(controller.radio().tx_history().is_empty());

        controller.tick(fan::UPDATE_INTERVAL_MS);
        assert_eq!(controller.state(), FanState::WaitQueryForUpdate);
        assert_eq!(last_sent(&controller).opcode(), Opcode::QueryDevice as u8);
    }

    #[test]
    fn test_join_and_persist() {
        let mut controller = unpaired_controller();
        controller.tick(0);

        assert_eq!(controller.state(), FanState::Discovery);
        assert_eq!(controller.radio().network_address(), Some(network::LINK_ID));
        let announce = last_sent(&controller);
        assert_eq!(announce.opcode(), Opcode::NetworkJoinAck as u8);
        assert_eq!(announce.source(), ME);
        finish_tx(&mut controller, 0);

        let open = Payload::Network { network_id: NETWORK_ID };
        let broadcast = Address::new(DeviceType::Broadcast as u8, 0x00);
        main_unit_sends(&mut controller, broadcast, Opcode::NetworkJoinOpen, open, 100);
        assert_eq!(controller.join_state(), Some(JoinState::WaitForLinkAck));
        assert_eq!(last_sent(&controller).opcode(), Opcode::NetworkJoinRequest as u8);
        finish_tx(&mut controller, 100);

        main_unit_sends(&mut controller, ME, Opcode::NetworkJoinAck, open, 200);
        assert_eq!(controller.join_state(), Some(JoinState::WaitForJoinResponse));
        let confirm = last_sent(&controller);
        assert_eq!(confirm.opcode(), Opcode::JoinConfirm as u8);
        assert_eq!(
            Payload::parse(Opcode::JoinConfirm, &confirm.payload()),
            Ok(Payload::Network { network_id: NETWORK_ID })
        );
        finish_tx(&mut controller, 200);

        main_unit_sends(&mut controller, ME, Opcode::JoinConfirm, open, 300);

        assert_eq!(controller.store().record(), Some(paired()));
        assert_eq!(controller.network(), Some(&paired()));
        assert_eq!(controller.radio().network_address(), Some(NETWORK_ID));
        assert!(controller.join_state().is_none());

        // Pairing is followed straight away by the initial query
        assert_eq!(controller.state(), FanState::WaitQueryResponse);
        let query = last_sent(&controller);
        assert_eq!(query.opcode(), Opcode::QueryDevice as u8);
        assert_eq!(query.destination(), MAIN);
    }

    #[test]
    fn test_discovery_failure() {
        let mut controller = unpaired_controller();
        let mut now = 0;

        for _ in 0..200 {
            controller.tick(now);
            finish_tx(&mut controller, now);
            if controller.state() == FanState::Idle {
                break;
            }
            now += 1_000;
        }

        assert_eq!(controller.state(), FanState::Idle);
        assert_eq!(controller.error(), ErrorStatus::DiscoveryFailed);
        assert_eq!(controller.error_status(), 2);
        assert!(now > discovery::STEP_TIMEOUT_MS * discovery::MAX_ATTEMPTS as u32);
        assert!(controller.store().record().is_none());
        assert_eq!(controller.set_speed(SpeedPreset::Low as u8, 0), Err(ControlError::Busy));

        controller.discovery_start(0x10, now);
        assert_eq!(controller.state(), FanState::Discovery);
        assert_eq!(controller.join_state(), Some(JoinState::WaitForLinkRequest));
    }

    #[test]
    fn test_host_control_percentage() {
        let mut controller = idle_controller();

        controller.control(FanCall::percentage(40).with_timer(10)).unwrap();
        assert_eq!(
            *controller.pending_command(),
            PendingCommand {
                speed: SpeedPreset::Medium,
                timer: 10,
                dirty: true
            }
        );

        controller.control(FanCall::default()).unwrap();
        assert_eq!(controller.pending_command().speed, SpeedPreset::Medium);

        let traits = controller.traits();
        assert_eq!(traits.speed_count, 5);
        assert_eq!(traits.presets.len(), 5);
    }
}
