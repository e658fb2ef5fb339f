//! Network join handshake
//!
//! Pairs this remote with a main unit and yields the [`NetworkConfig`] used
//! for all later traffic.
//!
//! # Handshake
//!
//! ```text
//! remote                                   main unit
//!   │ NetworkJoinAck{link id} (broadcast)      │   on the link network
//!   │─────────────────────────────────────────>│
//!   │        NetworkJoinOpen{network id}       │
//!   │<─────────────────────────────────────────│
//!   │ NetworkJoinRequest{network id}           │   on the new network
//!   │─────────────────────────────────────────>│
//!   │              NetworkJoinAck              │
//!   │<─────────────────────────────────────────│
//!   │ JoinConfirm                              │
//!   │─────────────────────────────────────────>│
//!   │               JoinConfirm                │
//!   │<─────────────────────────────────────────│
//! ```
//!
//! Every step must be answered within the step timeout, otherwise the
//! handshake restarts with a fresh device id. After `max_attempts` restarts
//! discovery is reported as failed.

use crate::config::{discovery, network, protocol};
use crate::protocol::{Address, DeviceType, Frame, Opcode, Payload};
use crate::radio::FanRadio;
use crate::store::{ConfigStore, NetworkConfig};
use crate::transport::{Exchange, TransmissionManager, TransportEvent};
use log::{debug, info, trace, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Join handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// About to (re)start the handshake
    StartDiscovery,
    /// Announced on the link network, waiting for a main unit to open a network
    WaitForLinkRequest,
    /// Join requested, waiting for the main unit to acknowledge
    WaitForLinkAck,
    /// Confirmation sent, waiting for the main unit to echo it
    WaitForJoinResponse,
    JoinComplete,
    /// Attempts exhausted
    Failed,
}

/// Result of a finished handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(NetworkConfig),
    Failed,
}

/// Discovery configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSettings {
    /// Time allowed for the main unit to answer each step
    pub step_timeout_ms: u32,
    /// Handshake attempts before giving up
    pub max_attempts: u8,
    /// Transport resends per handshake frame
    pub reply_retries: u8,
}

impl Default for JoinSettings {
    fn default() -> Self {
        Self {
            step_timeout_ms: discovery::STEP_TIMEOUT_MS,
            max_attempts: discovery::MAX_ATTEMPTS,
            reply_retries: protocol::TX_RETRIES,
        }
    }
}

/// Join handshake state machine
pub struct NetworkJoin {
    state: JoinState,
    settings: JoinSettings,
    seed_id: u8,
    attempts: u8,
    step_started: u32,
    /// Identity negotiated so far
    candidate: NetworkConfig,
    rng: SmallRng,
}

impl NetworkJoin {
    /// Prepare a handshake. `seed_id` is used as the device id when it is a
    /// valid one, and seeds the generator for later attempts.
    pub fn new(seed_id: u8, settings: JoinSettings) -> Self {
        Self {
            state: JoinState::StartDiscovery,
            settings,
            seed_id,
            attempts: 0,
            step_started: 0,
            candidate: NetworkConfig {
                network_id: network::LINK_ID,
                my_device_type: DeviceType::RemoteControl as u8,
                my_device_id: seed_id,
                main_unit_type: 0,
                main_unit_id: 0,
            },
            rng: SmallRng::seed_from_u64(u64::from(seed_id)),
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn candidate(&self) -> &NetworkConfig {
        &self.candidate
    }

    /// Start attempts and enforce the step timeout. Call on every tick.
    pub fn poll<R: FanRadio>(
        &mut self,
        transport: &mut TransmissionManager<R>,
        now: u32,
    ) -> Option<JoinOutcome> {
        match self.state {
            JoinState::StartDiscovery => self.start_attempt(transport, now),
            JoinState::WaitForLinkRequest
            | JoinState::WaitForLinkAck
            | JoinState::WaitForJoinResponse => {
                if now.wrapping_sub(self.step_started) > self.settings.step_timeout_ms {
                    warn!("Discovery: no answer in {:?}, restarting", self.state);
                    transport.cancel();
                    self.state = JoinState::StartDiscovery;
                }
                None
            }
            JoinState::JoinComplete | JoinState::Failed => None,
        }
    }

    /// A handshake frame could not be delivered
    pub fn on_transport_event(&mut self, event: TransportEvent) {
        if let TransportEvent::Failed(exchange) = event {
            if self.is_waiting() {
                warn!("Discovery: {:?} failed, restarting", exchange);
                self.state = JoinState::StartDiscovery;
            }
        }
    }

    /// Feed a received frame into the handshake
    pub fn handle_frame<R: FanRadio, S: ConfigStore>(
        &mut self,
        frame: &Frame,
        transport: &mut TransmissionManager<R>,
        store: &mut S,
        now: u32,
    ) -> Option<JoinOutcome> {
        let me = self.candidate.my_address();

        match (self.state, Opcode::from_byte(frame.opcode())) {
            (JoinState::WaitForLinkRequest, Some(Opcode::NetworkJoinOpen))
                if is_main_unit(frame) =>
            {
                let network_id = match Payload::parse(Opcode::NetworkJoinOpen, &frame.payload()) {
                    Ok(Payload::Network { network_id })
                        if network_id != network::LINK_ID && network_id != network::DEFAULT_ID =>
                    {
                        network_id
                    }
                    _ => {
                        debug!("Discovery: ignoring malformed join open");
                        transport.release_reply();
                        return None;
                    }
                };

                transport.accept_reply();
                info!(
                    "Discovery: found unit 0x{:02X} on network 0x{:08X}",
                    frame.source().device_id,
                    network_id
                );

                self.candidate.network_id = network_id;
                if let Err(e) = transport.radio_mut().set_network_address(network_id) {
                    warn!("Discovery: could not switch network: {:?}", e);
                }

                let request = Frame::encode(
                    Address::new(DeviceType::MainUnit as u8, 0x00),
                    me,
                    protocol::TTL,
                    Opcode::NetworkJoinRequest as u8,
                    &Payload::Network { network_id }.encode(),
                );
                self.send(
                    transport,
                    request,
                    Exchange::JoinRequest,
                    JoinState::WaitForLinkAck,
                    now,
                );
                None
            }

            (JoinState::WaitForLinkAck, Some(Opcode::NetworkJoinAck)) if is_main_unit(frame) => {
                transport.accept_reply();
                let main_unit = frame.source();
                debug!("Discovery: ack received from unit 0x{:02X}", main_unit.device_id);

                self.candidate.main_unit_type = main_unit.device_type;
                self.candidate.main_unit_id = main_unit.device_id;

                let confirm = Frame::encode(
                    main_unit,
                    me,
                    protocol::TTL,
                    Opcode::JoinConfirm as u8,
                    &Payload::Network {
                        network_id: self.candidate.network_id,
                    }
                    .encode(),
                );
                self.send(
                    transport,
                    confirm,
                    Exchange::JoinConfirm,
                    JoinState::WaitForJoinResponse,
                    now,
                );
                None
            }

            (JoinState::WaitForJoinResponse, Some(Opcode::JoinConfirm))
                if frame.source() == self.candidate.main_unit()
                    && frame.destination() == me
                    && carries_network(frame, self.candidate.network_id) =>
            {
                transport.accept_reply();
                self.state = JoinState::JoinComplete;

                if let Err(e) = store.save(&self.candidate) {
                    warn!("Discovery: could not persist network config: {:?}", e);
                }

                info!(
                    "Discovery: joined network 0x{:08X} as 0x{:02X}",
                    self.candidate.network_id, self.candidate.my_device_id
                );
                Some(JoinOutcome::Joined(self.candidate))
            }

            (state, opcode) => {
                trace!("Discovery: ignoring {:?} in {:?}", opcode, state);
                transport.release_reply();
                None
            }
        }
    }

    fn is_waiting(&self) -> bool {
        matches!(
            self.state,
            JoinState::WaitForLinkRequest
                | JoinState::WaitForLinkAck
                | JoinState::WaitForJoinResponse
        )
    }

    fn start_attempt<R: FanRadio>(
        &mut self,
        transport: &mut TransmissionManager<R>,
        now: u32,
    ) -> Option<JoinOutcome> {
        if self.attempts >= self.settings.max_attempts {
            warn!("Discovery failed after {} attempts", self.attempts);
            self.state = JoinState::Failed;
            return Some(JoinOutcome::Failed);
        }
        self.attempts += 1;
        transport.cancel();

        let device_id = self.pick_device_id();
        self.candidate = NetworkConfig {
            network_id: network::LINK_ID,
            my_device_type: DeviceType::RemoteControl as u8,
            my_device_id: device_id,
            main_unit_type: 0,
            main_unit_id: 0,
        };
        let me = self.candidate.my_address();
        transport.set_local_address(me);

        if let Err(e) = transport.radio_mut().set_network_address(network::LINK_ID) {
            warn!("Discovery: could not switch to link network: {:?}", e);
        }

        info!("Discovery attempt {}: announcing as 0x{:02X}", self.attempts, device_id);

        let announce = Frame::encode(
            Address::new(DeviceType::Broadcast as u8, 0x00),
            me,
            protocol::TTL,
            Opcode::NetworkJoinAck as u8,
            &Payload::Network {
                network_id: network::LINK_ID,
            }
            .encode(),
        );
        self.send(
            transport,
            announce,
            Exchange::DiscoveryBroadcast,
            JoinState::WaitForLinkRequest,
            now,
        );
        None
    }

    /// First attempt uses the seed if usable, later ones draw a random id
    /// outside the broadcast/unset values.
    fn pick_device_id(&mut self) -> u8 {
        if self.attempts == 1 && is_usable_id(self.seed_id) {
            return self.seed_id;
        }
        self.rng.gen_range(0x01..=0xFE)
    }

    fn send<R: FanRadio>(
        &mut self,
        transport: &mut TransmissionManager<R>,
        frame: Frame,
        exchange: Exchange,
        next: JoinState,
        now: u32,
    ) {
        match transport.start_transmit(frame, exchange, Some(self.settings.reply_retries), now) {
            Ok(()) => {
                self.state = next;
                self.step_started = now;
            }
            Err(e) => {
                warn!("Discovery: could not send {:?}: {:?}", exchange, e);
                self.state = JoinState::StartDiscovery;
            }
        }
    }
}

fn is_usable_id(id: u8) -> bool {
    id != 0x00 && id != 0xFF
}

fn is_main_unit(frame: &Frame) -> bool {
    frame.source().device_type == DeviceType::MainUnit as u8
}

/// True when a join confirmation echoes `network_id`
fn carries_network(frame: &Frame, network_id: u32) -> bool {
    matches!(
        Payload::parse(Opcode::JoinConfirm, &frame.payload()),
        Ok(Payload::Network { network_id: echoed }) if echoed == network_id
    )
}
