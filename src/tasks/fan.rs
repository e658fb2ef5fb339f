//! Fan controller task
//!
//! Ticks the controller on a fixed period. Radio interrupts and host calls
//! arrive through channels and are applied before each tick, so the
//! controller itself is only ever touched from this task.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker};
use log::{info, warn};

use crate::config::protocol::FRAME_SIZE;
use crate::fan::{ErrorStatus, FanCall, FanController, FanState, FanStatus};
use crate::radio::FanRadio;
use crate::store::ConfigStore;

/// Controller tick period
const TICK_INTERVAL_MS: u64 = 10;

/// Channel capacity for radio events
const RADIO_EVENT_CHANNEL_SIZE: usize = 8;

/// Channel capacity for host calls
const FAN_CALL_CHANNEL_SIZE: usize = 4;

/// Notifications from the radio driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    /// Hardware transmit finished
    TxComplete,
    /// A frame with valid hardware CRC was received
    Received([u8; FRAME_SIZE]),
}

/// Snapshot published to the host whenever it changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanReport {
    pub state: FanState,
    pub status: Option<FanStatus>,
    pub error: ErrorStatus,
}

/// Type alias for the radio event channel sender
pub type RadioEventSender =
    Sender<'static, CriticalSectionRawMutex, RadioEvent, RADIO_EVENT_CHANNEL_SIZE>;

/// Type alias for the radio event channel receiver
pub type RadioEventReceiver =
    Receiver<'static, CriticalSectionRawMutex, RadioEvent, RADIO_EVENT_CHANNEL_SIZE>;

/// Type alias for the fan call channel sender
pub type FanCallSender = Sender<'static, CriticalSectionRawMutex, FanCall, FAN_CALL_CHANNEL_SIZE>;

/// Type alias for the fan call channel receiver
pub type FanCallReceiver =
    Receiver<'static, CriticalSectionRawMutex, FanCall, FAN_CALL_CHANNEL_SIZE>;

/// Radio driver to controller
pub static RADIO_EVENT_CHANNEL: Channel<
    CriticalSectionRawMutex,
    RadioEvent,
    RADIO_EVENT_CHANNEL_SIZE,
> = Channel::new();

/// Host fan entity to controller
pub static FAN_CALL_CHANNEL: Channel<CriticalSectionRawMutex, FanCall, FAN_CALL_CHANNEL_SIZE> =
    Channel::new();

/// Latest controller snapshot for the host
pub static FAN_REPORT: Signal<CriticalSectionRawMutex, FanReport> = Signal::new();

/// Millisecond timestamp for the controller, wraps after ~49 days
fn now_ms() -> u32 {
    Instant::now().as_millis() as u32
}

/// Task that owns and drives the fan controller
pub async fn fan_task<R: FanRadio, S: ConfigStore>(
    mut controller: FanController<R, S>,
    radio_events: RadioEventReceiver,
    fan_calls: FanCallReceiver,
) {
    let mut ticker = Ticker::every(Duration::from_millis(TICK_INTERVAL_MS));
    let mut last_report: Option<FanReport> = None;

    info!("Fan: controller started");

    loop {
        let now = now_ms();

        while let Ok(event) = radio_events.try_receive() {
            match event {
                RadioEvent::TxComplete => controller.rf_complete(now),
                RadioEvent::Received(frame) => controller.rf_handle_received(&frame),
            }
        }

        while let Ok(call) = fan_calls.try_receive() {
            if let Err(e) = controller.control(call) {
                warn!("Fan: call rejected: {:?}", e);
            }
        }

        controller.tick(now);

        let report = FanReport {
            state: controller.state(),
            status: controller.status(),
            error: controller.error(),
        };
        if last_report != Some(report) {
            FAN_REPORT.signal(report);
            last_report = Some(report);
        }

        ticker.next().await;
    }
}
