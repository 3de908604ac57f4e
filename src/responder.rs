//! Answers queries from the motor and the display.
//!
//! Invoked from the handoff loop for every message addressed to us while a
//! peer holds the token. Dispatch is on the message kind, the command byte,
//! the payload length and the key bytes inside the payload. Replies to
//! GET/PUT data carry a leading `0x00` status byte before the echoed keys.
//!
//! Several motor commands have never been decoded (0x01, 0x11, 0x12); the
//! replies here are the byte patterns the original battery sends, which keep
//! the motor happy.

use embedded_hal::serial::{Read, Write};
use log::{info, warn};

use crate::bytes::{put_u16, put_u32, u16_at, u32_at};
use crate::controller::Controller;
use crate::cu3;
use crate::event::flags;
use crate::message::{cmd, Kind, Message, BMS};
use crate::platform::Platform;
use crate::storage::{Blob, Storage};
use crate::Error;

impl<'q, R, W, S, P> Controller<'q, R, W, S, P>
where
    R: Read<u8>,
    W: Write<u8>,
    S: Storage,
    P: Platform,
{
    /// Handles one message addressed to us and writes the reply. Unmatched
    /// messages are logged and left unanswered; the token stays with the
    /// peer either way.
    pub(crate) fn answer(&mut self, message: &Message) -> Result<(), Error> {
        match message.kind {
            Kind::PingReq => {
                return self
                    .bus
                    .write_message(&Message::ping_resp(message.source, BMS));
            }
            Kind::CmdReq => {}
            _ => {
                self.log_unexpected(message);
                return Ok(());
            }
        }

        let source = message.source;
        let command = message.command;
        let payload = message.payload.clone();
        let payload = payload.as_slice();

        match (command, payload.len()) {
            // Sent by the motor early in its boot; meaning unknown.
            (0x01, 0) => self.reply(source, command, &[0x02, 0x02]),

            // The motor confirms it is ready to power down.
            (0x11, 0) => {
                self.motor_off_ack = true;
                self.reply(source, command, &[])
            }

            // Assist on/off acknowledgment; the argument mirrors the state.
            (0x12, 1) => {
                self.flags.set(flags::ASSIST_ACK);
                self.reply(source, command, &[])
            }

            // Wake request; the motor wants the system up.
            (0x14, 0) => {
                self.flags.set(flags::WAKEUP);
                self.reply(source, command, &[])
            }

            // Calibration request from a display without buttons of its own.
            (0x1b, 1) => {
                self.flags.set(flags::CALIBRATE);
                self.reply(source, command, &[])
            }

            // Light relay.
            (0x1c, 1) => {
                self.light_on = payload[0] != 0;
                let on = self.light_on;
                self.platform.set_light(on);
                self.reply(source, command, &[])
            }

            // Assist level request from the display.
            (0x1d, 1) => {
                self.level = payload[0].min(3);
                self.reply(source, command, &[])
            }

            (cmd::GET_DATA, 2) => self.answer_get2(source, payload),
            (cmd::GET_DATA, 3) => self.answer_get3(source, payload),

            // 14:18 battery level + 14:1a maximum, asked together.
            (cmd::GET_DATA, 4) if payload[1] == 0x18 && payload[3] == 0x1a => {
                let mut data = [0u8; 9];
                data[1] = payload[0];
                data[2] = payload[1];
                put_u16(&mut data, 3, cu3::bat_value(self.battery.percentage()));
                data[5] = payload[2];
                data[6] = payload[3];
                put_u16(&mut data, 7, cu3::BAT_MAX_VALUE);
                self.reply(source, cmd::GET_DATA, &data)
            }

            // 14:38 + 28:3a: the stored calibration blob.
            (cmd::GET_DATA, 4) if payload[1] == 0x38 && payload[3] == 0x3a => {
                let mut data = [0u8; 11];
                data[1..].copy_from_slice(&self.calibration);
                self.reply(source, cmd::GET_DATA, &data)
            }

            // Motion report: speed and distance since motor power-on.
            (cmd::PUT_DATA, 10) if payload[1] == 0xc0 && payload[5] == 0xc1 => {
                self.speed = u16_at(payload, 2);
                self.trip.distance_update(u32_at(payload, 6));
                self.flags.set(flags::DISPLAY_UPDATE);
                self.reply(source, cmd::PUT_DATA, &[0x00])
            }

            // The motor stores its calibration with us.
            (cmd::PUT_DATA, 10) if payload[1] == 0x38 && payload[5] == 0x3a => {
                self.calibration.copy_from_slice(payload);
                if !self.storage.write(Blob::Calibration, payload) {
                    warn!("could not persist calibration data");
                }
                self.reply(source, cmd::PUT_DATA, &[0x00])
            }

            // Wall-clock time from the display.
            (cmd::PUT_DATA, 6) if payload[1] == 0x8e => {
                let wall = u32_at(payload, 2);
                self.time_offset = i64::from(wall) - i64::from(self.uptime_s());
                self.reply(source, cmd::PUT_DATA, &[0x00])
            }

            _ => {
                self.log_unexpected(message);
                Ok(())
            }
        }
    }

    fn answer_get2(&mut self, source: u8, payload: &[u8]) -> Result<(), Error> {
        match payload[1] {
            // Unknown; the original battery always answers 1.
            0x2a => {
                let data = [0x00, payload[0], payload[1], 0x01];
                self.reply(source, cmd::GET_DATA, &data)
            }

            // Distance of the next service, in 10 m units.
            0x3b => {
                let data = [0x00, payload[0], payload[1], 0x00, 0x01, 0xe2, 0x08];
                self.reply(source, cmd::GET_DATA, &data)
            }

            // Lifetime distance.
            0x80 => {
                let mut data = [0u8; 7];
                data[1] = payload[0];
                data[2] = payload[1];
                put_u32(&mut data, 3, self.trip.total());
                self.reply(source, cmd::GET_DATA, &data)
            }

            // Wall-clock seconds, as set via PUT 8e.
            0x8e => {
                let uptime = i64::from(self.uptime_s());
                let time = (uptime + self.time_offset).max(0) as u32;
                let mut data = [0u8; 7];
                data[1] = payload[0];
                data[2] = payload[1];
                put_u32(&mut data, 3, time);
                self.reply(source, cmd::GET_DATA, &data)
            }

            // Battery level in the display's raw encoding.
            0x18 => {
                let mut data = [0u8; 5];
                data[1] = payload[0];
                data[2] = payload[1];
                put_u16(&mut data, 3, cu3::bat_value(self.battery.percentage()));
                self.reply(source, cmd::GET_DATA, &data)
            }

            // Unknown; constant observed from the original battery.
            0x94 => {
                let data = [0x00, payload[0], payload[1], 0x40, 0x0e, 0x14, 0x7b];
                self.reply(source, cmd::GET_DATA, &data)
            }

            _ => {
                info!("unhandled get {:02x?}", payload);
                Ok(())
            }
        }
    }

    fn answer_get3(&mut self, source: u8, payload: &[u8]) -> Result<(), Error> {
        match (payload[1], payload[2]) {
            // Maximum speed record.
            (0x9a, 0x00) => {
                let data = [0x00, payload[0], payload[1], 0x02, 0x00, 0x00, 0x00, 0xd0];
                self.reply(source, cmd::GET_DATA, &data)
            }

            // Trip time record.
            (0x99, 0x00) => {
                let data = [
                    0x00, payload[0], payload[1], 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                    0xf6,
                ];
                self.reply(source, cmd::GET_DATA, &data)
            }

            _ => {
                info!("unhandled get {:02x?}", payload);
                Ok(())
            }
        }
    }

    fn reply(&mut self, target: u8, command: u8, payload: &[u8]) -> Result<(), Error> {
        self.bus
            .write_message(&Message::cmd_resp(target, BMS, command, payload))
    }

    fn log_unexpected(&self, message: &Message) {
        info!(
            "unexpected message: tgt {:x} src {:x} kind {:?} cmd {:02x} payload {:02x?}",
            message.target,
            message.source,
            message.kind,
            message.command,
            message.payload.as_slice()
        );
    }
}
