//! Peripheral status report decoding.
//!
//! A `ResponseReport` frame carries, after the three header octets, the
//! peripheral-side RSSI magnitude, a battery level and a spare octet (all
//! reserved, not decoded here), then a length declarator and the sensor text:
//!
//! `cycle[0] | type[1] | id[2] | rssi[3] | battery[4] | spare[5] | len[6] | text[7..]`
//!
//! The RSSI stored in the decoded report is the controller's own reading of
//! the received packet, not a value carried in the payload.

use crate::frame::{Frame, FrameError, MessageType, PAYLOAD_OFFSET};
use crate::FRAME_SIZE;

/// Frame offset of the sensor-text length declarator in a `ResponseReport`.
pub const REPORT_LENGTH_OFFSET: usize = 6;

/// Frame offset of the first sensor-text byte.
///
/// The declared length counts exactly the bytes from this offset on; the
/// length byte itself is not part of the text.
pub const REPORT_TEXT_OFFSET: usize = 7;

/// Maximum sensor-text length a frame can carry.
pub const SENSOR_TEXT_CAPACITY: usize = FRAME_SIZE - REPORT_TEXT_OFFSET;

const LENGTH_INDEX: usize = REPORT_LENGTH_OFFSET - PAYLOAD_OFFSET;
const TEXT_INDEX: usize = REPORT_TEXT_OFFSET - PAYLOAD_OFFSET;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    /// The frame is not a `ResponseReport`.
    WrongMessageType,
    /// The declared sensor-text length does not fit into the frame.
    LengthOutOfBounds,
}

#[cfg(feature = "std")]
impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::WrongMessageType => write!(f, "frame is not a response report"),
            ReportError::LengthOutOfBounds => write!(f, "declared sensor text length exceeds frame capacity"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ReportError {}

/// One decoded peripheral status report.
///
/// Constructed fresh for each accepted response and handed to the report and
/// diagnostics queues; nothing is retained across cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralReport {
    peripheral_id: u8,
    rssi_magnitude: u8,
    sensor_text: [u8; SENSOR_TEXT_CAPACITY],
    sensor_text_len: usize,
}

impl PeripheralReport {
    /// Decode a report from a `ResponseReport` frame and the controller's own
    /// receipt-time RSSI sample.
    pub(crate) fn from_frame(frame: &Frame, rssi_dbm: i16) -> Result<Self, ReportError> {
        if frame.message_type() != MessageType::ResponseReport as u8 {
            return Err(ReportError::WrongMessageType);
        }

        let payload = frame.payload();
        let declared_len = payload[LENGTH_INDEX] as usize;
        if declared_len > SENSOR_TEXT_CAPACITY {
            return Err(ReportError::LengthOutOfBounds);
        }

        let mut sensor_text = [0u8; SENSOR_TEXT_CAPACITY];
        sensor_text[..declared_len].copy_from_slice(&payload[TEXT_INDEX..TEXT_INDEX + declared_len]);

        // RSSI readings are negative in normal operation; keeping the
        // magnitude fits the value into one byte.
        let rssi_magnitude = rssi_dbm.unsigned_abs().min(u8::MAX as u16) as u8;

        Ok(PeripheralReport {
            peripheral_id: frame.peripheral_id(),
            rssi_magnitude,
            sensor_text,
            sensor_text_len: declared_len,
        })
    }

    /// Id of the peripheral the report came from.
    pub fn peripheral_id(&self) -> u8 {
        self.peripheral_id
    }

    /// Unsigned magnitude of the controller's RSSI reading at receipt time.
    pub fn rssi_magnitude(&self) -> u8 {
        self.rssi_magnitude
    }

    pub fn sensor_text(&self) -> &[u8] {
        &self.sensor_text[..self.sensor_text_len]
    }
}

impl core::fmt::Display for PeripheralReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "peripheral {} (RSSI -{} dBm): \"", self.peripheral_id, self.rssi_magnitude)?;
        for &byte in self.sensor_text() {
            let printable = if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '.' };
            write!(f, "{}", printable)?;
        }
        write!(f, "\"")
    }
}

/// Build a `ResponseReport` frame carrying `sensor_text`.
///
/// This is the encoding counterpart of [`PeripheralReport::from_frame`]; the
/// controller itself never sends responses, but peripheral implementations and
/// test harnesses do.
pub fn response_frame(cycle: u8, peripheral_id: u8, sensor_text: &[u8]) -> Result<Frame, ReportError> {
    if sensor_text.len() > SENSOR_TEXT_CAPACITY {
        return Err(ReportError::LengthOutOfBounds);
    }

    let mut payload = [0u8; FRAME_SIZE - PAYLOAD_OFFSET];
    payload[LENGTH_INDEX] = sensor_text.len() as u8;
    payload[TEXT_INDEX..TEXT_INDEX + sensor_text.len()].copy_from_slice(sensor_text);

    // The payload block is exactly frame-sized, so construction cannot fail.
    Frame::new(cycle, MessageType::ResponseReport as u8, peripheral_id, &payload).map_err(|_: FrameError| ReportError::LengthOutOfBounds)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn decodes_exactly_the_declared_bytes() {
        let frame = response_frame(7, 255, b"42C").unwrap();
        let report = PeripheralReport::from_frame(&frame, -80).unwrap();
        assert_eq!(report.peripheral_id(), 255);
        assert_eq!(report.sensor_text(), b"42C");
        assert_eq!(report.rssi_magnitude(), 80);
    }

    #[test]
    fn text_starts_after_the_length_byte() {
        // Hand-rolled payload pins the offset convention: len at frame byte 6,
        // text from frame byte 7 on.
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[0] = 7;
        bytes[1] = MessageType::ResponseReport as u8;
        bytes[2] = 12;
        bytes[REPORT_LENGTH_OFFSET] = 2;
        bytes[REPORT_TEXT_OFFSET] = b'o';
        bytes[REPORT_TEXT_OFFSET + 1] = b'k';

        let report = PeripheralReport::from_frame(&Frame::decode(&bytes), -50).unwrap();
        assert_eq!(report.sensor_text(), b"ok");
    }

    #[test]
    fn zero_length_report_is_valid_and_empty() {
        let frame = response_frame(1, 3, b"").unwrap();
        let report = PeripheralReport::from_frame(&frame, -90).unwrap();
        assert_eq!(report.sensor_text(), b"");
    }

    #[test]
    fn over_length_declarator_is_rejected() {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[1] = MessageType::ResponseReport as u8;
        bytes[REPORT_LENGTH_OFFSET] = (SENSOR_TEXT_CAPACITY + 1) as u8;

        assert_eq!(
            PeripheralReport::from_frame(&Frame::decode(&bytes), -50),
            Err(ReportError::LengthOutOfBounds)
        );
    }

    #[test]
    fn request_frame_is_not_a_report() {
        let frame = Frame::request_report(1, 255);
        assert_eq!(
            PeripheralReport::from_frame(&frame, -50),
            Err(ReportError::WrongMessageType)
        );
    }

    #[test]
    fn rssi_magnitude_drops_the_sign() {
        let frame = response_frame(1, 1, b"x").unwrap();
        assert_eq!(PeripheralReport::from_frame(&frame, -87).unwrap().rssi_magnitude(), 87);
        assert_eq!(PeripheralReport::from_frame(&frame, 5).unwrap().rssi_magnitude(), 5);
    }

    #[test]
    fn oversized_sensor_text_cannot_be_encoded() {
        let text = [b'a'; SENSOR_TEXT_CAPACITY + 1];
        assert_eq!(response_frame(1, 1, &text), Err(ReportError::LengthOutOfBounds));
    }

    #[test]
    fn display_masks_unprintable_bytes() {
        let frame = response_frame(1, 9, &[b'2', 0x01, b'C']).unwrap();
        let report = PeripheralReport::from_frame(&frame, -64).unwrap();
        assert_eq!(format!("{}", report), "peripheral 9 (RSSI -64 dBm): \"2.C\"");
    }
}
