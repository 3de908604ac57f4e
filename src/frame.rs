//! On-wire framing: sentinel escaping and the streaming frame parser.
//!
//! A frame is `0x10, byte0, byte1, [command, payload…], crc8` where any
//! `0x10` after the leading sentinel is doubled on the wire. `byte0` packs
//! `target<<4 | kind`; `byte1` packs `source<<4 | payload_len` (command
//! shapes), `source<<4` (pings), and is absent for handoffs.

use heapless::Vec;
use log::info;

use crate::crc::crc8;
use crate::message::{Kind, Message, Payload};

/// Frame start sentinel; doubled when it occurs inside a frame.
pub const SENTINEL: u8 = 0x10;

// Longest unescaped frame: sentinel + 2 header bytes + command + 15 payload
// bytes + crc.
const MAX_FRAME: usize = 20;

// Worst case on the wire: every byte after the sentinel escaped.
const MAX_ENCODED: usize = 1 + (MAX_FRAME - 1) * 2;

fn nibbles(left: u8, right: u8) -> u8 {
    right | (left << 4)
}

/// Encodes a message into its escaped wire bytes.
pub fn encode(message: &Message) -> Vec<u8, MAX_ENCODED> {
    let mut raw: Vec<u8, MAX_FRAME> = Vec::new();
    let _ = raw.push(SENTINEL);
    let _ = raw.push(nibbles(message.target, message.kind.nibble()));
    match message.kind {
        Kind::Handoff => {}
        Kind::PingReq | Kind::PingResp => {
            let _ = raw.push(nibbles(message.source, 0));
        }
        Kind::CmdReq | Kind::CmdResp => {
            let _ = raw.push(nibbles(message.source, message.payload.len() as u8));
            let _ = raw.push(message.command);
            let _ = raw.extend_from_slice(&message.payload);
        }
    }
    let crc = crc8(&raw);
    let _ = raw.push(crc);

    let mut escaped: Vec<u8, MAX_ENCODED> = Vec::new();
    let _ = escaped.push(raw[0]);
    for &byte in &raw[1..] {
        let _ = escaped.push(byte);
        if byte == SENTINEL {
            let _ = escaped.push(byte);
        }
    }
    escaped
}

/// Outcome of feeding one byte to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// More bytes needed.
    Continue,
    /// A standalone `0x00` outside a frame; the display waking the bus.
    Wakeup,
    /// A complete frame whose checksum did not match.
    CrcError,
    /// A complete, checksum-verified message.
    Complete(Message),
}

/// Streaming parser for the byte side of the bus.
///
/// Feed it bytes as they arrive; it deals with escaping, restarts on an
/// unescaped sentinel (dropping any half-read frame), infers the frame size
/// from the header nibbles, and checks the CRC once the frame is complete.
#[derive(Debug, Default)]
pub struct FrameParser {
    // Holding back the last byte to see whether it escapes a sentinel.
    escaping: bool,
    // An unescaped sentinel was seen; bytes now belong to a frame.
    started: bool,
    buf: Vec<u8, MAX_FRAME>,
    target: u8,
    source: u8,
    kind: u8,
    size: usize,
}

impl FrameParser {
    /// A parser waiting for a frame start.
    pub fn new() -> FrameParser {
        FrameParser::default()
    }

    /// Drops any in-progress frame and waits for the next start.
    pub fn reset(&mut self) {
        *self = FrameParser::default();
    }

    /// Consumes one wire byte.
    pub fn feed(&mut self, value: u8) -> Progress {
        if self.escaping {
            self.escaping = false;
            if value == SENTINEL {
                // Doubled sentinel: a literal 0x10 inside the frame.
                return self.handle_byte(SENTINEL);
            }

            // Unescaped sentinel: start of a frame.
            if !self.buf.is_empty() {
                info!("incomplete frame dropped: {:02x?}", self.buf.as_slice());
            }
            self.reset();
            self.started = true;
            // Record the sentinel itself; it is part of the checksum.
            let _ = self.handle_byte(SENTINEL);
            self.handle_byte(value)
        } else if value == SENTINEL {
            self.escaping = true;
            Progress::Continue
        } else {
            self.handle_byte(value)
        }
    }

    fn handle_byte(&mut self, value: u8) -> Progress {
        if self.started {
            self.parse_byte(value)
        } else if value == 0x00 {
            Progress::Wakeup
        } else {
            // Noise between frames; skip until a sentinel or wakeup.
            Progress::Continue
        }
    }

    fn parse_byte(&mut self, value: u8) -> Progress {
        let low = value & 0x0f;
        let high = value >> 4;

        match self.buf.len() {
            // The sentinel; kept only for the checksum.
            0 => {}
            1 => {
                self.target = high;
                self.kind = low;
            }
            2 => {
                if self.kind == Kind::Handoff.nibble() {
                    self.size = 3;
                } else {
                    self.source = high;
                    if self.kind == Kind::PingReq.nibble()
                        || self.kind == Kind::PingResp.nibble()
                    {
                        self.size = 4;
                    } else {
                        self.size = low as usize + 5;
                    }
                }
            }
            _ => {}
        }

        let _ = self.buf.push(value);

        // A handoff closes after byte 2 (size 3 counting the sentinel); the
        // size for the other shapes is known from the length nibble.
        if self.buf.len() > 2 && self.buf.len() == self.size {
            return self.complete();
        }

        Progress::Continue
    }

    fn complete(&mut self) -> Progress {
        let len = self.buf.len();
        let crc = crc8(&self.buf[..len - 1]);
        if crc != self.buf[len - 1] {
            info!("crc mismatch on frame: {:02x?}", self.buf.as_slice());
            self.reset();
            return Progress::CrcError;
        }

        let kind = match Kind::from_nibble(self.kind) {
            Some(kind) => kind,
            None => {
                info!("unknown message kind {:x}: {:02x?}", self.kind, self.buf.as_slice());
                self.reset();
                return Progress::Continue;
            }
        };

        let (command, payload) = if len >= 5 {
            (self.buf[3], Payload::from_slice(&self.buf[4..len - 1]).unwrap_or_default())
        } else {
            (0x00, Payload::new())
        };

        let message = Message {
            target: self.target,
            source: self.source,
            kind,
            command,
            payload,
        };
        self.reset();
        Progress::Complete(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{cmd, BMS, DISPLAY, MOTOR};

    fn decode_all(parser: &mut FrameParser, bytes: &[u8]) -> Option<Progress> {
        for &byte in bytes {
            match parser.feed(byte) {
                Progress::Continue => {}
                other => return Some(other),
            }
        }
        None
    }

    fn round_trip(message: Message) -> Message {
        let bytes = encode(&message);
        let mut parser = FrameParser::new();
        match decode_all(&mut parser, &bytes) {
            Some(Progress::Complete(decoded)) => decoded,
            other => panic!("no message decoded: {:?}", other),
        }
    }

    #[test]
    fn handoff_is_three_bytes() {
        let bytes = encode(&Message::handoff(DISPLAY));
        assert_eq!(bytes.len(), 3);
        assert_eq!(bytes[0], SENTINEL);
        assert_eq!(bytes[1], 0xc0);
        assert_eq!(bytes[2], crc8(&bytes[..2]));
    }

    #[test]
    fn ping_round_trip() {
        let message = Message::ping_req(BMS, MOTOR);
        assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn command_round_trip_preserves_all_fields() {
        let message = Message::cmd_req(MOTOR, BMS, cmd::PUT_DATA, &[0x94, 0xb0, 0x09, 0xc4]);
        assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn sentinel_payload_is_escaped_and_recovered() {
        let message = Message::cmd_req(MOTOR, BMS, cmd::PUT_DATA, &[0x10, 0x22, 0x10]);
        let bytes = encode(&message);

        // The encoder never emits a lone 0x10 after the leading sentinel.
        let mut pos = 1;
        while pos < bytes.len() {
            if bytes[pos] == SENTINEL {
                assert_eq!(bytes[pos + 1], SENTINEL, "unescaped sentinel at {}", pos);
                pos += 2;
            } else {
                pos += 1;
            }
        }

        assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn wakeup_byte_outside_frame() {
        let mut parser = FrameParser::new();
        assert_eq!(parser.feed(0x00), Progress::Wakeup);
    }

    #[test]
    fn noise_before_frame_is_skipped() {
        let message = Message::ping_resp(MOTOR, BMS);
        let mut bytes: std::vec::Vec<u8> = std::vec![0x55, 0xaa, 0x42];
        bytes.extend_from_slice(&encode(&message));

        let mut parser = FrameParser::new();
        assert_eq!(
            decode_all(&mut parser, &bytes),
            Some(Progress::Complete(message))
        );
    }

    #[test]
    fn new_sentinel_restarts_incomplete_frame() {
        let message = Message::cmd_resp(BMS, MOTOR, 0x01, &[0x02, 0x02]);
        let complete = encode(&message);

        // Half a frame, then a fresh complete one.
        let mut bytes: std::vec::Vec<u8> = complete[..4].to_vec();
        bytes.extend_from_slice(&complete);

        let mut parser = FrameParser::new();
        assert_eq!(
            decode_all(&mut parser, &bytes),
            Some(Progress::Complete(message))
        );
    }

    #[test]
    fn arbitrary_bytes_never_panic_the_parser() {
        let mut parser = FrameParser::new();
        // Cheap deterministic byte soup.
        let mut lcg: u32 = 0x1234_5678;
        for _ in 0..10_000 {
            lcg = lcg.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let _ = parser.feed((lcg >> 16) as u8);
        }
    }

    #[test]
    fn corrupt_byte_yields_crc_error() {
        let mut bytes = encode(&Message::cmd_req(BMS, MOTOR, 0x11, &[]));
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let mut parser = FrameParser::new();
        assert_eq!(decode_all(&mut parser, &bytes), Some(Progress::CrcError));
    }
}
