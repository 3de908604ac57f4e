//! The bus engine: timed reads and the write/retry exchange.

use embedded_hal::serial::{Read, Write};
use log::{trace, warn};

use crate::frame::{encode, FrameParser, Progress};
use crate::message::{Message, BMS};
use crate::platform::Clock;
use crate::Error;

/// Poll cadence while waiting without a deadline, so a quiet bus is still
/// re-examined about once a second.
const IDLE_SLICE_MS: u64 = 1000;

/// Outcome of one timed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// A checksum-verified message.
    Message(Message),
    /// The display pulled the bus up with a bare `0x00`.
    Wakeup,
    /// A complete frame arrived with a bad checksum.
    CrcError,
    /// No complete frame within the timeout.
    Timeout,
}

/// Owns the two serial halves and the frame parser.
///
/// Only one task may drive the bus; every read and write on the wire goes
/// through this type, in call order.
pub struct Bus<R, W> {
    reader: R,
    writer: W,
    parser: FrameParser,
}

impl<R: Read<u8>, W: Write<u8>> Bus<R, W> {
    /// Wraps the serial halves of the bus UART.
    pub fn new(reader: R, writer: W) -> Self {
        Bus {
            reader,
            writer,
            parser: FrameParser::new(),
        }
    }

    /// Writes one message, escaped and checksummed.
    pub fn write_message(&mut self, message: &Message) -> Result<(), Error> {
        for &byte in encode(message).iter() {
            block!(self.writer.write(byte)).map_err(|_| Error::Io)?;
        }
        block!(self.writer.flush()).map_err(|_| Error::Io)?;
        Ok(())
    }

    /// Reads until a complete frame, a wakeup byte, a checksum failure, or
    /// the timeout. `None` waits forever, polling in one-second slices; the
    /// timeout is re-armed whenever a byte arrives, so it bounds bus
    /// silence rather than total frame time.
    pub fn read_message<C: Clock>(
        &mut self,
        timeout_ms: Option<u32>,
        clock: &mut C,
    ) -> Result<ReadResult, Error> {
        self.parser.reset();
        let mut deadline = timeout_ms.map(|t| clock.now_ms() + u64::from(t));
        let mut slice_end = clock.now_ms() + IDLE_SLICE_MS;

        loop {
            match self.reader.read() {
                Ok(byte) => {
                    if let Some(t) = timeout_ms {
                        deadline = Some(clock.now_ms() + u64::from(t));
                    }
                    match self.parser.feed(byte) {
                        Progress::Continue => {}
                        Progress::Wakeup => return Ok(ReadResult::Wakeup),
                        Progress::CrcError => return Ok(ReadResult::CrcError),
                        Progress::Complete(message) => {
                            return Ok(ReadResult::Message(message))
                        }
                    }
                }
                Err(nb::Error::WouldBlock) => {
                    let now = clock.now_ms();
                    if let Some(deadline) = deadline {
                        if now >= deadline {
                            return Ok(ReadResult::Timeout);
                        }
                    } else if now >= slice_end {
                        trace!("bus quiet, still waiting");
                        slice_end = now + IDLE_SLICE_MS;
                    }
                }
                Err(nb::Error::Other(_)) => return Err(Error::Io),
            }
        }
    }

    /// Sends `request` and reads until a reply addressed to us arrives.
    ///
    /// A timeout retransmits the request; messages for other nodes, wakeup
    /// bytes and checksum failures are skipped. The bus has no sequence
    /// numbers, so a reply whose command differs from the request is logged
    /// and returned anyway.
    pub fn exchange<C: Clock>(
        &mut self,
        request: &Message,
        timeout_ms: Option<u32>,
        clock: &mut C,
    ) -> Result<Message, Error> {
        self.write_message(request)?;
        loop {
            match self.read_message(timeout_ms, clock)? {
                ReadResult::Timeout => {
                    self.write_message(request)?;
                }
                ReadResult::Message(reply) if reply.target == BMS => {
                    if reply.command != request.command {
                        warn!(
                            "reply command {:02x} does not match request {:02x}",
                            reply.command, request.command
                        );
                    }
                    return Ok(reply);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{cmd, Kind, DISPLAY, MOTOR};
    use crate::testutil::{ScriptSerial, TestClock};
    use embedded_hal_mock::serial::{Mock, Transaction};

    #[test]
    fn read_decodes_a_buffered_frame() {
        let wire = encode(&Message::ping_req(BMS, MOTOR));
        let mock = Mock::new(&[Transaction::read_many(wire.iter())]);
        let mut bus = Bus::new(mock.clone(), mock.clone());
        let mut clock = TestClock::new(1);

        match bus.read_message(Some(250), &mut clock).unwrap() {
            ReadResult::Message(message) => {
                assert_eq!(message.kind, Kind::PingReq);
                assert_eq!(message.target, BMS);
                assert_eq!(message.source, MOTOR);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        mock.clone().done();
    }

    #[test]
    fn read_times_out_on_silence() {
        let mut bus = Bus::new(ScriptSerial::silent(), ScriptSerial::silent());
        let mut clock = TestClock::new(10);

        let started = clock.now_ms();
        let result = bus.read_message(Some(250), &mut clock).unwrap();
        assert_eq!(result, ReadResult::Timeout);
        // Allow one poll step of slack on either side.
        let elapsed = clock.now_ms() - started;
        assert!((230..=280).contains(&elapsed), "elapsed {}", elapsed);
    }

    #[test]
    fn exchange_skips_messages_for_other_nodes() {
        let request = Message::cmd_req(MOTOR, BMS, cmd::MOTOR_ON, &[]);
        let other = encode(&Message::cmd_req(DISPLAY, MOTOR, 0x55, &[]));
        let reply = encode(&Message::cmd_resp(BMS, MOTOR, cmd::MOTOR_ON, &[0x00]));

        let mut wire: std::vec::Vec<u8> = other.to_vec();
        wire.extend_from_slice(&reply);

        let mock = Mock::new(&[
            Transaction::write_many(encode(&request).to_vec()),
            Transaction::flush(),
            Transaction::read_many(wire),
        ]);
        let mut bus = Bus::new(mock.clone(), mock.clone());
        let mut clock = TestClock::new(1);

        let response = bus.exchange(&request, Some(250), &mut clock).unwrap();
        assert_eq!(response.command, cmd::MOTOR_ON);
        assert_eq!(response.source, MOTOR);
        mock.clone().done();
    }

    #[test]
    fn exchange_retransmits_after_timeout() {
        let request = Message::cmd_req(MOTOR, BMS, cmd::MOTOR_ON, &[]);
        let reply = Message::cmd_resp(BMS, MOTOR, cmd::MOTOR_ON, &[0x00]);

        // Silence for the first window, then the reply.
        let serial = ScriptSerial::new();
        serial.delay_reads(50, &encode(&reply));

        let mut bus = Bus::new(serial.clone(), serial.clone());
        let mut clock = TestClock::new(1);

        let response = bus.exchange(&request, Some(41), &mut clock).unwrap();
        assert_eq!(response, reply);
        // Initial transmission plus at least one retry.
        assert!(serial.written_frames() >= 2, "request was not retransmitted");
    }
}
