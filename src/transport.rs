//! Transmission manager
//!
//! Owns the radio and its single in-flight transmission slot.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ start  ┌────────────────┐ clear  ┌────────┐ repeats done ┌────────┐ frame ┌────────┐
//! │ Idle │───────>│ WaitAirwayFree │───────>│ TxBusy │─────────────>│ RxWait │──────>│ RxBusy │
//! └──────┘        └────────────────┘        └────────┘              └────────┘       └────────┘
//!    ^                    ^                      │ no reply               │ timeout      │ accepted
//!    │                    └──────────────────────┼────── retry ───────────┘              │
//!    └───────────────────────────────────────────┴───────────────────────────────────────┘
//! ```
//!
//! Time is passed in as a millisecond timestamp sampled by the caller and
//! compared with wrapping arithmetic, so the counter may roll over.
//! Completion is reported as a [`TransportEvent`] carrying the [`Exchange`]
//! the transmission was started for.

use crate::config::protocol;
use crate::protocol::{Address, DeviceType, Frame};
use crate::radio::FanRadio;
use log::{debug, trace, warn};

/// Synchronous outcome of a transport request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// A transmission is already pending
    Busy,
    /// Retries exhausted without completing
    Failure,
}

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Nothing pending
    Idle,
    /// Waiting for the channel to clear before sending
    WaitAirwayFree,
    /// Frame is being transmitted (and repeated)
    TxBusy,
    /// Transmission done, waiting for a reply
    RxWait,
    /// A candidate reply arrived and is being handled
    RxBusy,
}

/// The exchange a transmission belongs to.
///
/// Stored with the pending transmission and handed back on completion so the
/// caller knows how to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// Link-network broadcast announcing a remote that wants to pair
    DiscoveryBroadcast,
    /// Join request for the network the main unit opened
    JoinRequest,
    /// Final join confirmation to the main unit
    JoinConfirm,
    /// Status query
    Query,
    /// Speed (and timer) command
    SetSpeed,
    /// Acknowledgement of the settings the main unit replied with
    SetSpeedAck,
}

/// Completion notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// Frame sent; only raised when no reply was requested
    Completed(Exchange),
    /// Retries exhausted, channel never cleared or radio refused to send
    Failed(Exchange),
}

/// Transport timing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Copies of each frame put on air per attempt
    pub tx_frames: u8,
    pub reply_timeout_ms: u32,
    pub airway_timeout_ms: u32,
    pub max_transmit_time_ms: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            tx_frames: protocol::TX_FRAMES,
            reply_timeout_ms: protocol::REPLY_TIMEOUT_MS,
            airway_timeout_ms: protocol::AIRWAY_TIMEOUT_MS,
            max_transmit_time_ms: protocol::MAX_TRANSMIT_TIME_MS,
        }
    }
}

/// The single in-flight transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransmission {
    pub frame: Frame,
    pub exchange: Exchange,
    /// Resends left when no reply arrives; `None` when no reply is expected
    pub retries: Option<u8>,
    /// Copies still to transmit in the current attempt
    pub frames_remaining: u8,
    /// Start of the current attempt (or of the reply wait)
    pub send_time: u32,
    /// Start of the current wait for a free channel
    pub airway_wait_since: u32,
}

/// Drives the radio for one transmission at a time
pub struct TransmissionManager<R: FanRadio> {
    radio: R,
    state: TransportState,
    pending: Option<PendingTransmission>,
    /// Address frames must be sent to (unless broadcast) to be accepted
    local: Address,
    /// Set while the hardware has an unfinished send
    hw_busy_since: Option<u32>,
    settings: TransportSettings,
}

impl<R: FanRadio> TransmissionManager<R> {
    pub fn new(radio: R, settings: TransportSettings) -> Self {
        Self {
            radio,
            state: TransportState::Idle,
            pending: None,
            local: Address::new(DeviceType::RemoteControl as u8, 0x00),
            hw_busy_since: None,
            settings,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == TransportState::Idle
    }

    pub fn pending(&self) -> Option<&PendingTransmission> {
        self.pending.as_ref()
    }

    pub fn local_address(&self) -> Address {
        self.local
    }

    pub fn set_local_address(&mut self, address: Address) {
        self.local = address;
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Queue a frame for transmission.
    ///
    /// With `reply_retries` set, the manager waits for a reply after sending
    /// and resends up to that many times. Fails with
    /// [`TransportError::Busy`] while another transmission is pending; the
    /// pending one is left untouched.
    pub fn start_transmit(
        &mut self,
        frame: Frame,
        exchange: Exchange,
        reply_retries: Option<u8>,
        now: u32,
    ) -> Result<(), TransportError> {
        if self.pending.is_some() {
            debug!("Transport busy with {:?}, rejecting {:?}", self.state, exchange);
            return Err(TransportError::Busy);
        }

        trace!("Transmit {:?} (retries: {:?})", exchange, reply_retries);
        self.pending = Some(PendingTransmission {
            frame,
            exchange,
            retries: reply_retries,
            frames_remaining: 0,
            send_time: now,
            airway_wait_since: now,
        });
        self.state = TransportState::WaitAirwayFree;
        Ok(())
    }

    /// Advance timeouts and start sends. Call on every tick.
    pub fn poll(&mut self, now: u32) -> Option<TransportEvent> {
        let (send_time, exchange) = match &self.pending {
            Some(pending) => (pending.send_time, pending.exchange),
            None => return None,
        };

        match self.state {
            TransportState::TxBusy
                if elapsed(now, send_time) > self.settings.max_transmit_time_ms =>
            {
                warn!("Transmit of {:?} did not complete in time", exchange);
                if let Some(event) = self.retry_or_fail(now) {
                    return Some(event);
                }
            }
            TransportState::RxWait if elapsed(now, send_time) > self.settings.reply_timeout_ms => {
                debug!("No reply to {:?}", exchange);
                if let Some(event) = self.retry_or_fail(now) {
                    return Some(event);
                }
            }
            _ => {}
        }

        if self.state == TransportState::WaitAirwayFree {
            return self.try_send(now);
        }

        None
    }

    /// The radio finished a hardware transmit
    pub fn on_radio_complete(&mut self, now: u32) -> Option<TransportEvent> {
        self.hw_busy_since = None;

        if self.state != TransportState::TxBusy {
            trace!("Radio completion ignored in {:?}", self.state);
            return None;
        }

        let pending = self.pending.as_mut()?;

        if pending.frames_remaining > 0 {
            pending.frames_remaining -= 1;
            match self.radio.send(pending.frame.as_bytes()) {
                Ok(()) => {
                    self.hw_busy_since = Some(now);
                    return None;
                }
                Err(e) => {
                    // At least one copy is on air, finish the attempt
                    warn!("Repeat send failed: {:?}", e);
                    pending.frames_remaining = 0;
                }
            }
        }

        if pending.retries.is_some() {
            pending.send_time = now;
            self.state = TransportState::RxWait;
            trace!("Waiting for reply to {:?}", pending.exchange);
            return None;
        }

        let exchange = pending.exchange;
        self.pending = None;
        self.state = TransportState::Idle;
        Some(TransportEvent::Completed(exchange))
    }

    /// Decode and filter a received frame.
    ///
    /// Corrupt frames and frames for other devices are dropped. A frame that
    /// passes moves a waiting transport to `RxBusy` until the caller either
    /// accepts it as the reply or releases it.
    pub fn handle_received(&mut self, data: &[u8]) -> Option<Frame> {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                trace!("Dropping frame: {:?}", e);
                return None;
            }
        };

        if !self.is_for_us(&frame) {
            trace!(
                "Dropping frame for {:?} (we are {:?})",
                frame.destination(),
                self.local
            );
            return None;
        }

        if self.state == TransportState::RxWait {
            self.state = TransportState::RxBusy;
        }

        Some(frame)
    }

    /// Complete the pending exchange with the reply just received.
    ///
    /// Also accepted while copies are still being repeated or a retry is
    /// waiting for the channel, since the peer may answer the first copy.
    pub fn accept_reply(&mut self) -> Option<Exchange> {
        if !self.pending.as_ref().is_some_and(|pending| pending.retries.is_some()) {
            return None;
        }

        let pending = self.pending.take()?;
        self.state = TransportState::Idle;
        Some(pending.exchange)
    }

    /// The received frame was not the awaited reply, keep waiting
    pub fn release_reply(&mut self) {
        if self.state == TransportState::RxBusy {
            self.state = TransportState::RxWait;
        }
    }

    /// Abandon the pending transmission without reporting it
    pub fn cancel(&mut self) -> Option<Exchange> {
        let pending = self.pending.take()?;
        debug!("Cancelled {:?} in {:?}", pending.exchange, self.state);
        self.state = TransportState::Idle;
        Some(pending.exchange)
    }

    fn is_for_us(&self, frame: &Frame) -> bool {
        let destination = frame.destination();
        destination.device_type == DeviceType::Broadcast as u8 || destination == self.local
    }

    fn try_send(&mut self, now: u32) -> Option<TransportEvent> {
        if let Some(since) = self.hw_busy_since {
            if elapsed(now, since) <= self.settings.max_transmit_time_ms {
                return None;
            }
            warn!("Radio never reported completion, assuming idle");
            self.hw_busy_since = None;
        }

        let pending = self.pending.as_mut()?;

        if self.radio.airway_busy() {
            if elapsed(now, pending.airway_wait_since) > self.settings.airway_timeout_ms {
                warn!("Airway too busy, giving up on {:?}", pending.exchange);
                return self.finish_failed();
            }
            return None;
        }

        match self.radio.send(pending.frame.as_bytes()) {
            Ok(()) => {
                pending.frames_remaining = self.settings.tx_frames.saturating_sub(1);
                pending.send_time = now;
                self.hw_busy_since = Some(now);
                self.state = TransportState::TxBusy;
                None
            }
            Err(e) => {
                warn!("Radio send failed: {:?}", e);
                self.retry_or_fail(now)
            }
        }
    }

    fn retry_or_fail(&mut self, now: u32) -> Option<TransportEvent> {
        let pending = self.pending.as_mut()?;

        match pending.retries {
            Some(left) if left > 0 => {
                pending.retries = Some(left - 1);
                pending.airway_wait_since = now;
                self.state = TransportState::WaitAirwayFree;
                debug!("Resending {:?}, {} retries left", pending.exchange, left - 1);
                None
            }
            _ => self.finish_failed(),
        }
    }

    fn finish_failed(&mut self) -> Option<TransportEvent> {
        let pending = self.pending.take()?;
        self.state = TransportState::Idle;
        warn!("Transmission of {:?} failed", pending.exchange);
        Some(TransportEvent::Failed(pending.exchange))
    }
}

/// Milliseconds from `since` to `now`, tolerant of counter wrap
fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}
