//! The typed message model of the bus.
//!
//! Every frame on the wire carries one message: a target node, a kind, and
//! for command messages a source node, command byte and up to 15 payload
//! bytes. The payload length travels in a single nibble, which is where the
//! 15-byte limit comes from.

use heapless::Vec;

/// Hard payload limit; the on-wire length field is one nibble.
pub const MAX_PAYLOAD: usize = 15;

/// Payload storage for one message.
pub type Payload = Vec<u8, MAX_PAYLOAD>;

/// Node address of the motor controller.
pub const MOTOR: u8 = 0x0;
/// Node address of this battery controller.
pub const BMS: u8 = 0x2;
/// Node address of the display head-unit.
pub const DISPLAY: u8 = 0xc;

/// Command bytes understood on the bus.
pub mod cmd {
    /// Read one or more data keys from a peer.
    pub const GET_DATA: u8 = 0x08;
    /// Write one or more data keys to a peer.
    pub const PUT_DATA: u8 = 0x09;
    /// Read the 8-byte serial of a display.
    pub const GET_SERIAL: u8 = 0x20;
    /// CU2 button poll; the reply carries the pressed-button bits.
    pub const BUTTON_POLL: u8 = 0x22;
    /// CU2 display update.
    pub const DISPLAY_UPDATE_CU2: u8 = 0x26;
    /// CU2 default-display update, shown when updates stop for a while.
    pub const DISPLAY_DEFAULT_CU2: u8 = 0x27;
    /// CU3 display update.
    pub const DISPLAY_UPDATE_CU3: u8 = 0x28;
    /// Tells a CU3 that calibration finished.
    pub const CALIBRATE_DONE: u8 = 0x2a;
    /// Turns the motor electronics on.
    pub const MOTOR_ON: u8 = 0x30;
    /// Turns the motor electronics off.
    pub const MOTOR_OFF: u8 = 0x31;
    /// Enables pedal assist.
    pub const ASSIST_ON: u8 = 0x32;
    /// Disables pedal assist.
    pub const ASSIST_OFF: u8 = 0x33;
    /// Selects the active assist level (1..=3).
    pub const SET_ASSIST_LEVEL: u8 = 0x34;
    /// Starts a motor torque-sensor calibration.
    pub const CALIBRATE: u8 = 0x35;
}

/// Message kind, the low nibble of the first content byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Transfers permission-to-transmit to the target node.
    Handoff,
    /// Command request; carries command byte and payload.
    CmdReq,
    /// Command response; carries command byte and payload.
    CmdResp,
    /// Ping response.
    PingResp,
    /// Ping request.
    PingReq,
}

impl Kind {
    /// The wire nibble for this kind.
    pub fn nibble(self) -> u8 {
        match self {
            Kind::Handoff => 0x0,
            Kind::CmdReq => 0x1,
            Kind::CmdResp => 0x2,
            Kind::PingResp => 0x3,
            Kind::PingReq => 0x4,
        }
    }

    /// Parses a wire nibble; unknown values have never been observed on the
    /// bus and are dropped by the frame parser.
    pub fn from_nibble(nibble: u8) -> Option<Kind> {
        match nibble {
            0x0 => Some(Kind::Handoff),
            0x1 => Some(Kind::CmdReq),
            0x2 => Some(Kind::CmdResp),
            0x3 => Some(Kind::PingResp),
            0x4 => Some(Kind::PingReq),
            _ => None,
        }
    }
}

/// One bus message.
///
/// `source`, `command` and `payload` are only meaningful for the kinds that
/// carry them; handoffs are target-only and pings are target + source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Addressed node.
    pub target: u8,
    /// Sending node, `0x0` where the kind has no source on the wire.
    pub source: u8,
    /// Message kind.
    pub kind: Kind,
    /// Command byte, `0x00` where the kind has no command.
    pub command: u8,
    /// Payload bytes.
    pub payload: Payload,
}

impl Message {
    fn new(target: u8, kind: Kind, source: u8, command: u8, payload: &[u8]) -> Message {
        Message {
            target,
            source,
            kind,
            command,
            payload: Payload::from_slice(payload).expect("payload longer than 15 bytes"),
        }
    }

    /// A handoff passing the token to `target`.
    pub fn handoff(target: u8) -> Message {
        Message::new(target, Kind::Handoff, 0x0, 0x00, &[])
    }

    /// A ping request.
    pub fn ping_req(target: u8, source: u8) -> Message {
        Message::new(target, Kind::PingReq, source, 0x00, &[])
    }

    /// A ping response.
    pub fn ping_resp(target: u8, source: u8) -> Message {
        Message::new(target, Kind::PingResp, source, 0x00, &[])
    }

    /// A command request.
    pub fn cmd_req(target: u8, source: u8, command: u8, payload: &[u8]) -> Message {
        Message::new(target, Kind::CmdReq, source, command, payload)
    }

    /// A command response.
    pub fn cmd_resp(target: u8, source: u8, command: u8, payload: &[u8]) -> Message {
        Message::new(target, Kind::CmdResp, source, command, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_nibble_round_trip() {
        for &kind in &[
            Kind::Handoff,
            Kind::CmdReq,
            Kind::CmdResp,
            Kind::PingResp,
            Kind::PingReq,
        ] {
            assert_eq!(Kind::from_nibble(kind.nibble()), Some(kind));
        }
        assert_eq!(Kind::from_nibble(0x7), None);
    }

    #[test]
    fn builders_fill_the_wire_fields() {
        let ping = Message::ping_resp(MOTOR, BMS);
        assert_eq!(ping.target, MOTOR);
        assert_eq!(ping.source, BMS);
        assert_eq!(ping.kind, Kind::PingResp);

        let req = Message::cmd_req(MOTOR, BMS, cmd::SET_ASSIST_LEVEL, &[0x02]);
        assert_eq!(req.command, cmd::SET_ASSIST_LEVEL);
        assert_eq!(req.payload.as_slice(), &[0x02]);
    }
}
