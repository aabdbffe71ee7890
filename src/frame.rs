use crate::FRAME_SIZE;

const CYCLE_OFFSET: usize = 0;
const TYPE_OFFSET: usize = 1;
const PERIPHERAL_OFFSET: usize = 2;
pub(crate) const PAYLOAD_OFFSET: usize = 3;

/// Payload bytes carried by every frame after the three header octets.
pub const FRAME_PAYLOAD_CAPACITY: usize = FRAME_SIZE - PAYLOAD_OFFSET;

/// Message types the controller understands.
///
/// The wire carries a raw octet; the codec never checks it against this set.
/// Consumers compare against `MessageType as u8` and treat everything else as
/// unrecognized.
#[derive(Clone, Copy)]
pub enum MessageType {
    RequestReport = 0x01,
    ResponseReport = 0x02,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The payload does not fit into the fixed frame.
    PayloadTooLong,
}

#[cfg(feature = "std")]
impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::PayloadTooLong => write!(f, "payload exceeds the reserved frame capacity"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

/// Fixed-size wire frame exchanged between controller and peripherals.
///
/// Layout is purely positional: cycle tag, message type, peripheral id, then
/// the payload block. There is no wire-level length prefix; payload
/// interpretation carries any internal lengths itself, so a frame always holds
/// the full zero-padded payload block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    cycle: u8,
    message_type: u8,
    peripheral_id: u8,
    payload: [u8; FRAME_PAYLOAD_CAPACITY],
}

impl Frame {
    pub fn new(cycle: u8, message_type: u8, peripheral_id: u8, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > FRAME_PAYLOAD_CAPACITY {
            return Err(FrameError::PayloadTooLong);
        }
        let mut padded = [0u8; FRAME_PAYLOAD_CAPACITY];
        padded[..payload.len()].copy_from_slice(payload);
        Ok(Frame {
            cycle,
            message_type,
            peripheral_id,
            payload: padded,
        })
    }

    /// Build a report request addressed to `peripheral_id`.
    pub fn request_report(cycle: u8, peripheral_id: u8) -> Self {
        Frame {
            cycle,
            message_type: MessageType::RequestReport as u8,
            peripheral_id,
            payload: [0u8; FRAME_PAYLOAD_CAPACITY],
        }
    }

    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[CYCLE_OFFSET] = self.cycle;
        bytes[TYPE_OFFSET] = self.message_type;
        bytes[PERIPHERAL_OFFSET] = self.peripheral_id;
        bytes[PAYLOAD_OFFSET..].copy_from_slice(&self.payload);
        bytes
    }

    /// Decode an exact-size byte block.
    ///
    /// Positional only; the message type octet is passed through raw and left
    /// for the consumer to interpret.
    pub fn decode(bytes: &[u8; FRAME_SIZE]) -> Frame {
        let mut payload = [0u8; FRAME_PAYLOAD_CAPACITY];
        payload.copy_from_slice(&bytes[PAYLOAD_OFFSET..]);
        Frame {
            cycle: bytes[CYCLE_OFFSET],
            message_type: bytes[TYPE_OFFSET],
            peripheral_id: bytes[PERIPHERAL_OFFSET],
            payload,
        }
    }

    pub fn cycle(&self) -> u8 {
        self.cycle
    }

    /// Raw message type octet as received.
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    /// Target id on a request, source id on a response.
    pub fn peripheral_id(&self) -> u8 {
        self.peripheral_id
    }

    pub fn payload(&self) -> &[u8; FRAME_PAYLOAD_CAPACITY] {
        &self.payload
    }
}
