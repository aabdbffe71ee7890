use embassy_time::Duration;

use crate::RadioError;
use crate::ReceivedFrame;
use crate::FRAME_SIZE;

/// RSSI reported for every echoed frame.
const ECHO_RSSI_DBM: i16 = -42;

/// The echo channel always reads quiet.
const ECHO_CHANNEL_RSSI_DBM: i16 = -127;

const ECHO_DATA_RATE_BPS: u32 = 300;

/// Loopback radio: every transmitted frame comes straight back on receive.
///
/// Useful for exercising the controller against its own traffic - most
/// notably that an echoed copy of its own request is suppressed by the cycle
/// sequencer instead of being parsed as a response.
pub struct RadioDevice {
    initialized: bool,
    pending: Option<[u8; FRAME_SIZE]>,
}

impl RadioDevice {
    pub const fn new() -> Self {
        RadioDevice {
            initialized: false,
            pending: None,
        }
    }

    pub fn initialize(&mut self) {
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) async fn transmit(&mut self, bytes: &[u8; FRAME_SIZE]) -> Result<(), RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        self.pending = Some(*bytes);
        Ok(())
    }

    pub(crate) async fn receive(&mut self, _timeout: Duration) -> Result<ReceivedFrame, RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        match self.pending.take() {
            Some(bytes) => Ok(ReceivedFrame {
                bytes,
                rssi_dbm: ECHO_RSSI_DBM,
            }),
            None => Err(RadioError::RxTimeout),
        }
    }

    pub(crate) async fn sample_rssi(&mut self) -> Result<i16, RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        Ok(ECHO_CHANNEL_RSSI_DBM)
    }

    pub(crate) fn data_rate_bps(&self) -> u32 {
        ECHO_DATA_RATE_BPS
    }
}
