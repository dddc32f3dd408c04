//! Fixed 8-byte bus payloads.
//!
//! ```text
//! request   [opcode][dest_hi][dest_lo][arg3][arg2][arg1][arg0][reserved]
//! response  [0x08][src_hi][src_lo][opcode][val3][val2][val1][val0]
//! realtime  [0x05][sensor][ch0_hi][ch0_lo][ch1_hi][ch1_lo][0][0]
//! heartbeat [0x08][node_hi][node_lo][0x7F][tick3][tick2][tick1][tick0]
//! ```
//!
//! All multi-byte fields are big-endian.

use crate::error::FrameError;
use crate::sample::Sample;

/// Every frame carries exactly this many payload bytes.
pub const FRAME_LEN: usize = 8;

/// Length byte of responses and heartbeats.
pub const RESPONSE_LEN_MARKER: u8 = 0x08;
/// Frame-type byte of realtime sample frames.
pub const REALTIME_FRAME_TYPE: u8 = 0x05;
/// Opcode-echo byte of heartbeats.
pub const HEARTBEAT_MARKER: u8 = 0x7F;

/// A payload together with the bus id it travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFrame {
    pub id: u16,
    pub data: [u8; FRAME_LEN],
}

impl BusFrame {
    pub const fn new(id: u16, data: [u8; FRAME_LEN]) -> Self {
        Self { id, data }
    }

    /// Build a frame from a received payload, rejecting short or long ones.
    pub fn from_payload(id: u16, payload: &[u8]) -> Result<Self, FrameError> {
        let data: [u8; FRAME_LEN] = payload
            .try_into()
            .map_err(|_| FrameError::Length { len: payload.len() })?;
        Ok(Self { id, data })
    }
}

/// Command opcodes understood by the dispatcher.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    ReadVersion = 0x01,
    ReadData = 0x02,
    FlashStart = 0x03,
    FlashReadPos = 0x04,
    FlashEraseFull = 0x05,
    FlashSetSampleSize = 0x06,
    FlashStatus = 0x07,
    FlashGetData = 0x08,
    FlashGenCsv = 0x09,
    StreamRealtime = 0x0A,
    StreamBuffered = 0x0B,
    StopStreaming = 0x0C,
    StreamingStatus = 0x0D,
    SetBufferSize = 0x0E,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::ReadVersion,
            0x02 => Self::ReadData,
            0x03 => Self::FlashStart,
            0x04 => Self::FlashReadPos,
            0x05 => Self::FlashEraseFull,
            0x06 => Self::FlashSetSampleSize,
            0x07 => Self::FlashStatus,
            0x08 => Self::FlashGetData,
            0x09 => Self::FlashGenCsv,
            0x0A => Self::StreamRealtime,
            0x0B => Self::StreamBuffered,
            0x0C => Self::StopStreaming,
            0x0D => Self::StreamingStatus,
            0x0E => Self::SetBufferSize,
            other => return Err(other),
        })
    }
}

/// A decoded inbound command.
///
/// The opcode is kept raw so unknown opcodes still reach the dispatcher,
/// which logs and drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    /// Bus id the response must be sent to.
    pub reply_to: u16,
    pub argument: u32,
}

impl Command {
    pub const fn new(opcode: u8, reply_to: u16, argument: u32) -> Self {
        Self {
            opcode,
            reply_to,
            argument,
        }
    }

    pub fn decode(data: &[u8; FRAME_LEN]) -> Self {
        Self {
            opcode: data[0],
            reply_to: u16::from_be_bytes([data[1], data[2]]),
            argument: u32::from_be_bytes([data[3], data[4], data[5], data[6]]),
        }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let dest = self.reply_to.to_be_bytes();
        let arg = self.argument.to_be_bytes();
        [
            self.opcode,
            dest[0],
            dest[1],
            arg[0],
            arg[1],
            arg[2],
            arg[3],
            0,
        ]
    }

    pub fn opcode(&self) -> Result<Opcode, u8> {
        Opcode::try_from(self.opcode)
    }
}

/// A command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub source: u16,
    pub opcode: u8,
    pub value: u32,
}

impl Response {
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let src = self.source.to_be_bytes();
        let val = self.value.to_be_bytes();
        [
            RESPONSE_LEN_MARKER,
            src[0],
            src[1],
            self.opcode,
            val[0],
            val[1],
            val[2],
            val[3],
        ]
    }

    pub fn decode(data: &[u8; FRAME_LEN]) -> Self {
        Self {
            source: u16::from_be_bytes([data[1], data[2]]),
            opcode: data[3],
            value: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        }
    }

    /// Frame addressed to the requester-chosen id.
    pub fn to_frame(&self, destination: u16) -> BusFrame {
        BusFrame::new(destination, self.encode())
    }
}

/// Build a realtime sample broadcast.
pub fn realtime_frame(broadcast_id: u16, sensor_id: u8, sample: &Sample) -> BusFrame {
    let ch0 = sample.channel(0).unwrap_or(0).to_be_bytes();
    let ch1 = sample.channel(1).unwrap_or(0).to_be_bytes();
    BusFrame::new(
        broadcast_id,
        [
            REALTIME_FRAME_TYPE,
            sensor_id,
            ch0[0],
            ch0[1],
            ch1[0],
            ch1[1],
            0,
            0,
        ],
    )
}

/// Build a heartbeat broadcast carrying the tick counter.
pub fn heartbeat_frame(broadcast_id: u16, node_id: u16, tick: u32) -> BusFrame {
    Response {
        source: node_id,
        opcode: HEARTBEAT_MARKER,
        value: tick,
    }
    .to_frame(broadcast_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_fields_are_big_endian() {
        let data = [0x0E, 0x06, 0x42, 0x00, 0x00, 0x10, 0x00, 0xAA];
        let command = Command::decode(&data);

        assert_eq!(command.opcode(), Ok(Opcode::SetBufferSize));
        assert_eq!(command.reply_to, 0x0642);
        assert_eq!(command.argument, 4096);
    }

    #[test]
    fn test_response_layout() {
        let response = Response {
            source: 0x107,
            opcode: Opcode::ReadVersion as u8,
            value: 1002,
        };
        assert_eq!(
            response.encode(),
            [0x08, 0x01, 0x07, 0x01, 0x00, 0x00, 0x03, 0xEA]
        );
    }

    #[test]
    fn test_realtime_frame_layout() {
        let frame = realtime_frame(0x7DF, 0x07, &Sample::dual(0x0102, 0x0304));
        assert_eq!(frame.id, 0x7DF);
        assert_eq!(frame.data, [0x05, 0x07, 0x01, 0x02, 0x03, 0x04, 0, 0]);
    }

    #[test]
    fn test_heartbeat_frame_layout() {
        let frame = heartbeat_frame(0x7DF, 0x107, 0x0001_86A1);
        assert_eq!(frame.id, 0x7DF);
        assert_eq!(frame.data, [0x08, 0x01, 0x07, 0x7F, 0x00, 0x01, 0x86, 0xA1]);
    }

    #[test]
    fn test_unknown_opcode_is_preserved() {
        let command = Command::decode(&[0x42, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(command.opcode(), Err(0x42));
    }

    #[test]
    fn test_short_payload_is_rejected() {
        assert_eq!(
            BusFrame::from_payload(0x107, &[1, 2, 3]),
            Err(FrameError::Length { len: 3 })
        );
    }
}
