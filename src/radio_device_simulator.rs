//! # Radio Device Simulator - Scripted Transceiver for Tests
//!
//! A radio device implementation that needs no hardware: a test harness
//! scripts the radio environment over channels and observes everything the
//! controller does on the air.
//!
//! ## Architecture
//!
//! - **Output Queue**: operations the device performs on the simulated
//!   channel - transmitted frames and RSSI sampling requests.
//! - **Input Queue**: what the simulated channel hands back - delivered
//!   frames with their receipt-time RSSI, receive timeouts, CRC failures and
//!   RSSI sample readings.
//!
//! Receive timeouts are scripted rather than timed, so scenario tests run
//! deterministically without a timer driver; the real timeout behavior lives
//! in the hardware device. RSSI sampling requests are recorded best-effort so
//! a harness may pre-load sample readings without draining requests.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Duration;
use log::{log, Level};

use crate::RadioError;
use crate::ReceivedFrame;
use crate::FRAME_SIZE;

/// Size of the radio output message queue.
const RADIO_OUTPUT_QUEUE_SIZE: usize = 10;

/// Channel carrying the device's on-air operations to the harness.
pub type RadioOutputQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, RadioOutputMessage, RADIO_OUTPUT_QUEUE_SIZE>;
pub type RadioOutputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RadioOutputMessage, RADIO_OUTPUT_QUEUE_SIZE>;
pub type RadioOutputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RadioOutputMessage, RADIO_OUTPUT_QUEUE_SIZE>;

/// Size of the radio input message queue.
const RADIO_INPUT_QUEUE_SIZE: usize = 10;

/// Channel carrying scripted channel activity to the device.
pub type RadioInputQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, RadioInputMessage, RADIO_INPUT_QUEUE_SIZE>;
pub type RadioInputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RadioInputMessage, RADIO_INPUT_QUEUE_SIZE>;
pub type RadioInputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RadioInputMessage, RADIO_INPUT_QUEUE_SIZE>;

/// Nominal data rate reported for diagnostics.
const SIMULATED_DATA_RATE_BPS: u32 = 5470;

/// Operations the device performs on the simulated channel.
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RadioOutputMessage {
    /// A frame was transmitted.
    TransmitFrame([u8; FRAME_SIZE]),
    /// The channel sense gate asked for an RSSI reading.
    SampleRssi,
}

/// Scripted channel activity handed to the device.
#[cfg_attr(feature = "std", derive(Debug))]
pub enum RadioInputMessage {
    /// A frame arrives, with the RSSI the controller reads at receipt time.
    DeliverFrame { bytes: [u8; FRAME_SIZE], rssi_dbm: i16 },
    /// The current receive attempt times out.
    RxTimeout,
    /// The current receive attempt fails CRC verification.
    CrcMismatch,
    /// The current receive attempt fails for some other reason.
    ReceiveError,
    /// Answer to a [`RadioOutputMessage::SampleRssi`] request.
    RssiSample(i16),
}

pub struct RadioDevice {
    input: Option<RadioInputQueueReceiver>,
    output: Option<RadioOutputQueueSender>,
}

impl RadioDevice {
    pub const fn new() -> Self {
        RadioDevice { input: None, output: None }
    }

    pub fn initialize(&mut self, input: RadioInputQueueReceiver, output: RadioOutputQueueSender) {
        self.input = Some(input);
        self.output = Some(output);
    }

    pub fn is_initialized(&self) -> bool {
        self.input.is_some() && self.output.is_some()
    }

    pub(crate) async fn transmit(&mut self, bytes: &[u8; FRAME_SIZE]) -> Result<(), RadioError> {
        let output = self.output.as_ref().ok_or(RadioError::NotInitialized)?;
        output
            .try_send(RadioOutputMessage::TransmitFrame(*bytes))
            .map_err(|_| RadioError::TransmitFailed)
    }

    /// Wait for the next scripted receive outcome.
    ///
    /// The timeout parameter is unused: the harness scripts timeouts
    /// explicitly as [`RadioInputMessage::RxTimeout`].
    pub(crate) async fn receive(&mut self, _timeout: Duration) -> Result<ReceivedFrame, RadioError> {
        let input = self.input.as_ref().ok_or(RadioError::NotInitialized)?;
        loop {
            match input.receive().await {
                RadioInputMessage::DeliverFrame { bytes, rssi_dbm } => return Ok(ReceivedFrame { bytes, rssi_dbm }),
                RadioInputMessage::RxTimeout => return Err(RadioError::RxTimeout),
                RadioInputMessage::CrcMismatch => return Err(RadioError::CrcMismatch),
                RadioInputMessage::ReceiveError => return Err(RadioError::ReceiveFailed),
                RadioInputMessage::RssiSample(_) => {
                    log!(Level::Warn, "dropping stray RSSI sample while receiving");
                }
            }
        }
    }

    pub(crate) async fn sample_rssi(&mut self) -> Result<i16, RadioError> {
        let (input, output) = match (&self.input, &self.output) {
            (Some(input), Some(output)) => (input, output),
            _ => return Err(RadioError::NotInitialized),
        };
        if output.try_send(RadioOutputMessage::SampleRssi).is_err() {
            log!(Level::Warn, "radio output queue full, RSSI request not recorded");
        }
        loop {
            match input.receive().await {
                RadioInputMessage::RssiSample(rssi_dbm) => return Ok(rssi_dbm),
                _ => {
                    log!(Level::Warn, "dropping non-RSSI input while sensing the channel");
                }
            }
        }
    }

    pub(crate) fn data_rate_bps(&self) -> u32 {
        SIMULATED_DATA_RATE_BPS
    }
}
