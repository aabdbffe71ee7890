#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(any(
    all(feature = "radio-device-echo", any(feature = "radio-device-lora-sx1262", feature = "radio-device-simulator")),
    all(feature = "radio-device-lora-sx1262", any(feature = "radio-device-echo", feature = "radio-device-simulator")),
    all(feature = "radio-device-simulator", any(feature = "radio-device-echo", feature = "radio-device-lora-sx1262")),
))]
compile_error!("Only one radio implementation feature can be enabled at a time");

#[cfg(all(
    not(test),
    not(any(feature = "radio-device-echo", feature = "radio-device-lora-sx1262", feature = "radio-device-simulator"))
))]
compile_error!("At least one radio implementation feature must be enabled");

#[cfg(feature = "radio-device-lora-sx1262")]
pub mod radio_device_lora_sx1262;

#[cfg(feature = "radio-device-echo")]
pub mod radio_device_echo;

#[cfg(feature = "radio-device-simulator")]
pub mod radio_device_simulator;

#[cfg(feature = "radio-device-lora-sx1262")]
pub use crate::radio_device_lora_sx1262::RadioDevice;

#[cfg(feature = "radio-device-echo")]
pub use crate::radio_device_echo::RadioDevice;

#[cfg(feature = "radio-device-simulator")]
pub use crate::radio_device_simulator::RadioDevice;

#[cfg(any(feature = "radio-device-echo", feature = "radio-device-lora-sx1262", feature = "radio-device-simulator"))]
mod channel_sense;
mod cycle;
mod diagnostics;
mod frame;
mod poll_schedule;
#[cfg(any(feature = "radio-device-echo", feature = "radio-device-lora-sx1262", feature = "radio-device-simulator"))]
mod poller;
mod report;

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::log;

pub use cycle::CycleSequencer;
pub use diagnostics::{ControllerEvent, DiagnosticsLevel};
pub use frame::{Frame, FrameError, MessageType, FRAME_PAYLOAD_CAPACITY};
pub use poll_schedule::{PollSchedule, PollScheduleError, BROADCAST_PERIPHERAL_ID, MAX_POLLED_PERIPHERALS};
pub use report::{response_frame, PeripheralReport, ReportError, REPORT_LENGTH_OFFSET, REPORT_TEXT_OFFSET, SENSOR_TEXT_CAPACITY};

#[cfg(any(feature = "radio-device-echo", feature = "radio-device-lora-sx1262", feature = "radio-device-simulator"))]
use crate::diagnostics::DiagnosticsEmitter;
#[cfg(any(feature = "radio-device-echo", feature = "radio-device-lora-sx1262", feature = "radio-device-simulator"))]
use crate::poller::{poller_task, Poller};

//Wire-compatibility constant: both ends of the link must agree on it
pub const FRAME_SIZE: usize = 12;

/// Runtime radio errors shared by all radio device implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Device was not initialized before attempting an operation
    NotInitialized,
    /// The supplied frame exceeds what the radio can transmit
    FrameTooLong,
    /// Timeout occurred while transmitting
    TxTimeout,
    /// Transmission failed for some other reason
    TransmitFailed,
    /// Timeout occurred while waiting for a packet
    RxTimeout,
    /// A packet was received but is malformed
    CrcMismatch,
    /// Reception failed for some other reason
    ReceiveFailed,
    /// Channel sensing failed
    SenseFailed,
}

#[cfg(feature = "std")]
impl std::fmt::Display for RadioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioError::NotInitialized => write!(f, "device not initialized"),
            RadioError::FrameTooLong => write!(f, "frame too long for the radio"),
            RadioError::TxTimeout => write!(f, "transmission timed out"),
            RadioError::TransmitFailed => write!(f, "frame transmission failed"),
            RadioError::RxTimeout => write!(f, "no packet received before the timeout"),
            RadioError::CrcMismatch => write!(f, "received packet failed CRC verification"),
            RadioError::ReceiveFailed => write!(f, "packet reception failed"),
            RadioError::SenseFailed => write!(f, "channel sensing failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RadioError {}

/// A received frame together with the controller's own receipt-time RSSI.
pub(crate) struct ReceivedFrame {
    pub(crate) bytes: [u8; FRAME_SIZE],
    pub(crate) rssi_dbm: i16,
}

/// Controller status as owned by the polling state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    /// Waiting for the radio device to report successful bring-up.
    Initializing,
    /// Ready; transitions straight into `RequestingReport`.
    Idle,
    /// Building and transmitting the next report request.
    RequestingReport,
    /// Waiting for a response frame.
    ListeningForResponse,
    /// Reserved for forward compatibility; no transition currently produces
    /// it. If ever entered it recovers into `RequestingReport`.
    ReportTimedOut,
}

/// Protocol timing, sensing and diagnostics configuration.
///
/// Radio tuning (frequency, bandwidth, spreading factor, ...) is a separate
/// opaque bundle consumed by the radio device, not by the protocol core.
#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// How long a single receive attempt waits before reporting a timeout.
    pub receive_timeout_ms: u32,
    /// Pause after an accepted report before polling the next target.
    pub settle_delay_ms: u32,
    /// The channel counts as busy while sampled RSSI is above this.
    pub sense_threshold_dbm: i16,
    /// Delay between RSSI samples while waiting for a clear channel.
    pub sense_poll_interval_ms: u32,
    /// Optional bound on channel sensing. `None` keeps waiting indefinitely,
    /// which can suspend polling for as long as the channel stays occupied.
    pub max_sense_wait_ms: Option<u32>,
    /// Runtime verbosity of the diagnostics sink.
    pub diagnostics_level: DiagnosticsLevel,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            receive_timeout_ms: 1000,
            settle_delay_ms: 3000,
            sense_threshold_dbm: -90,
            sense_poll_interval_ms: 100,
            max_sense_wait_ms: None,
            diagnostics_level: DiagnosticsLevel::Normal,
        }
    }
}

pub(crate) const REPORT_QUEUE_SIZE: usize = 8;
pub(crate) type ReportQueue = Channel<CriticalSectionRawMutex, PeripheralReport, REPORT_QUEUE_SIZE>;
pub(crate) type ReportQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, PeripheralReport, REPORT_QUEUE_SIZE>;
pub(crate) type ReportQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, PeripheralReport, REPORT_QUEUE_SIZE>;

#[cfg(feature = "embedded")]
static REPORT_QUEUE: ReportQueue = Channel::new();

pub(crate) const DIAGNOSTICS_QUEUE_SIZE: usize = 16;
pub(crate) type DiagnosticsQueue = Channel<CriticalSectionRawMutex, ControllerEvent, DIAGNOSTICS_QUEUE_SIZE>;
pub(crate) type DiagnosticsQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, ControllerEvent, DIAGNOSTICS_QUEUE_SIZE>;
pub(crate) type DiagnosticsQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, ControllerEvent, DIAGNOSTICS_QUEUE_SIZE>;

#[cfg(feature = "embedded")]
static DIAGNOSTICS_QUEUE: DiagnosticsQueue = Channel::new();

pub enum ReceiveReportError {
    NotInited,
}

pub enum ReceiveEventError {
    NotInited,
}

enum PollControllerState {
    Uninitialized,
    Initialized {
        report_queue_receiver: ReportQueueReceiver,
        diagnostics_queue_receiver: DiagnosticsQueueReceiver,
    },
}

/// Handle through which a host drives the polling controller.
///
/// `initialize` spawns the polling task; after that the host only drains the
/// report and diagnostics queues. Ignoring the diagnostics queue entirely is
/// fine - events are dropped once it fills, without affecting polling.
pub struct PollController {
    state: PollControllerState,
}

impl PollController {
    pub const fn new() -> Self {
        PollController {
            state: PollControllerState::Uninitialized,
        }
    }

    #[cfg(all(
        feature = "embedded",
        any(feature = "radio-device-echo", feature = "radio-device-lora-sx1262", feature = "radio-device-simulator")
    ))]
    pub fn initialize(
        &mut self,
        config: ControllerConfig,
        schedule: PollSchedule,
        spawner: Spawner,
        radio_device: RadioDevice,
    ) -> Result<(), ()> {
        self.initialize_common(config, schedule, spawner, radio_device, &REPORT_QUEUE, &DIAGNOSTICS_QUEUE)
    }

    #[cfg(all(
        feature = "std",
        any(feature = "radio-device-echo", feature = "radio-device-lora-sx1262", feature = "radio-device-simulator")
    ))]
    pub fn initialize(
        &mut self,
        config: ControllerConfig,
        schedule: PollSchedule,
        spawner: Spawner,
        radio_device: RadioDevice,
    ) -> Result<(), ()> {
        let report_queue_temp: ReportQueue = Channel::new();
        let report_queue_static: &'static ReportQueue = Box::leak(Box::new(report_queue_temp));

        let diagnostics_queue_temp: DiagnosticsQueue = Channel::new();
        let diagnostics_queue_static: &'static DiagnosticsQueue = Box::leak(Box::new(diagnostics_queue_temp));

        self.initialize_common(config, schedule, spawner, radio_device, report_queue_static, diagnostics_queue_static)
    }

    #[cfg(any(feature = "radio-device-echo", feature = "radio-device-lora-sx1262", feature = "radio-device-simulator"))]
    fn initialize_common(
        &mut self,
        config: ControllerConfig,
        schedule: PollSchedule,
        spawner: Spawner,
        radio_device: RadioDevice,
        report_queue: &'static ReportQueue,
        diagnostics_queue: &'static DiagnosticsQueue,
    ) -> Result<(), ()> {
        let emitter = DiagnosticsEmitter::new(diagnostics_queue.sender(), config.diagnostics_level);
        let poller = Poller::new(radio_device, config, schedule, report_queue.sender(), emitter);

        let poller_task_result = spawner.spawn(poller_task(poller));
        if poller_task_result.is_err() {
            return Err(());
        }
        log!(log::Level::Debug, "Poller task spawned");

        self.state = PollControllerState::Initialized {
            report_queue_receiver: report_queue.receiver(),
            diagnostics_queue_receiver: diagnostics_queue.receiver(),
        };
        log!(log::Level::Info, "Poll controller initialized");
        Ok(())
    }

    /// Wait for the next decoded peripheral report.
    pub async fn receive_report(&self) -> Result<PeripheralReport, ReceiveReportError> {
        let report_queue_receiver = match &self.state {
            PollControllerState::Uninitialized => {
                return Err(ReceiveReportError::NotInited);
            }
            PollControllerState::Initialized { report_queue_receiver, .. } => report_queue_receiver,
        };
        Ok(report_queue_receiver.receive().await)
    }

    /// Wait for the next diagnostics event.
    pub async fn next_event(&self) -> Result<ControllerEvent, ReceiveEventError> {
        let diagnostics_queue_receiver = match &self.state {
            PollControllerState::Uninitialized => {
                return Err(ReceiveEventError::NotInited);
            }
            PollControllerState::Initialized {
                diagnostics_queue_receiver, ..
            } => diagnostics_queue_receiver,
        };
        Ok(diagnostics_queue_receiver.receive().await)
    }

    /// Non-blocking diagnostics poll for hosts without an async context.
    pub fn try_next_event(&self) -> Option<ControllerEvent> {
        match &self.state {
            PollControllerState::Uninitialized => None,
            PollControllerState::Initialized {
                diagnostics_queue_receiver, ..
            } => diagnostics_queue_receiver.try_receive().ok(),
        }
    }
}
