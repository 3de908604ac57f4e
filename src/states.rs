//! State handlers for the controller.
//!
//! Each state runs one sub-step per control-loop tick; the handoff at the
//! end of every tick keeps the peers serviced between steps. Transition
//! helpers (`to_*`) queue the LED pattern for the change and reset the step
//! counter.

use embedded_hal::serial::{Read, Write};
use log::info;

use crate::blink::Blink;
use crate::bus::ReadResult;
use crate::controller::{
    Controller, State, ASSIST_ACK_TIMEOUT_MS, CHARGE_DEBOUNCE_MS, DISPLAY_EXCHANGE_TIMEOUT_MS,
    NO_MOTION_OFF_MS,
};
use crate::cu2;
use crate::display::DisplayKind;
use crate::event::flags;
use crate::message::{cmd, Kind, Message, BMS, DISPLAY, MOTOR};
use crate::platform::Platform;
use crate::storage::Storage;
use crate::Error;

/// Idle keeps its bus reads short so button flags stay responsive.
const IDLE_READ_MS: u32 = 50;

/// The original battery retries MOTOR_ON every 41 ms until the motor wakes.
const MOTOR_ON_RETRY_MS: u32 = 41;

impl<'q, R, W, S, P> Controller<'q, R, W, S, P>
where
    R: Read<u8>,
    W: Write<u8>,
    S: Storage,
    P: Platform,
{
    pub(crate) fn to_idle(&mut self) {
        self.state = State::Idle;
        self.step = 0;
    }

    /// Waits for a board button, a bus wakeup byte, or the motor's wake
    /// request. The motor relay is already off here.
    pub(crate) fn handle_idle(&mut self, mode_short: bool) -> Result<(), Error> {
        if mode_short {
            self.to_turn_motor_on();
            return Ok(());
        }

        match self
            .bus
            .read_message(Some(IDLE_READ_MS), &mut self.platform)?
        {
            ReadResult::Wakeup => {
                // Sent when a display is connected, or a button pressed on a
                // sleeping one; that press must not count again once polling
                // starts.
                info!("bus wakeup");
                if self.config.display == DisplayKind::Cu2 {
                    self.flags.set(flags::IGNORE_HELD);
                }
                self.to_turn_motor_on();
            }
            ReadResult::Message(message) => {
                if message.target == BMS && message.kind == Kind::CmdReq && message.command == 0x14
                {
                    info!("wake request from the motor");
                    self.to_turn_motor_on();
                } else {
                    info!(
                        "incoming while idle: tgt {:x} kind {:?} cmd {:02x} payload {:02x?}",
                        message.target,
                        message.kind,
                        message.command,
                        message.payload.as_slice()
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn to_turn_motor_on(&mut self) {
        self.display_on = true;
        self.blink.send(Blink::new(1, 500, 50));
        self.platform.set_motor_relay(true);
        if self.config.display != DisplayKind::None {
            let now = self.platform.now_ms();
            self.timer_display.start(now);
        }
        self.state = State::TurnMotorOn;
        self.step = match self.config.display {
            DisplayKind::Cu2 => 0,
            DisplayKind::Cu3 => 4,
            DisplayKind::None => 5,
        };
    }

    /// The power-on sequence: bring up the display, wake the motor, start
    /// the periodic updates, then pair the display serial into the motor's
    /// second slot.
    pub(crate) fn handle_turn_motor_on(&mut self) -> Result<(), Error> {
        match self.step {
            0 => {
                // Button poll with a special value; maybe it resets the
                // display's default screen, or seeds its clock.
                let request = Message::cmd_req(DISPLAY, BMS, cmd::BUTTON_POLL, &[0x80]);
                self.exchange(&request, Some(DISPLAY_EXCHANGE_TIMEOUT_MS))?;
            }
            1 => {
                let update = cu2::Update::boot_blank();
                let request = Message::cmd_req(DISPLAY, BMS, update.command(), &update.encode());
                self.exchange(&request, None)?;
            }
            2 => {
                // Unknown command, always the same and always sent to the
                // display at this point.
                let request = Message::cmd_req(DISPLAY, BMS, 0x25, &[0x04, 0x08]);
                self.exchange(&request, None)?;
            }
            3 => {
                // First button poll by hand; the timer takes over from here.
                self.poll_buttons()?;
                let now = self.platform.now_ms();
                self.timer_button.start(now);
            }
            4 => match self.config.display {
                DisplayKind::Cu3 => {
                    self.push_display_state()?;
                }
                _ => {
                    // The screen the display falls back to when updates stop.
                    let update = cu2::Update::boot_default();
                    let request =
                        Message::cmd_req(DISPLAY, BMS, update.command(), &update.encode());
                    self.exchange(&request, None)?;
                }
            },
            5 => {
                // The original battery repeats this with 41 ms spacing until
                // the motor answers.
                let request = Message::cmd_req(MOTOR, BMS, cmd::MOTOR_ON, &[]);
                self.exchange(&request, Some(MOTOR_ON_RETRY_MS))?;
                self.do_handoffs = true;
            }
            6 => {
                self.push_motor_update()?;
                let now = self.platform.now_ms();
                self.timer_motor.start(now);
                if self.config.display == DisplayKind::None {
                    self.to_motor_on();
                    return Ok(());
                }
            }
            7 => {
                let request = Message::cmd_req(DISPLAY, BMS, cmd::GET_SERIAL, &[]);
                let response = self.exchange(&request, None)?;
                if response.payload.len() >= 8 {
                    self.display_serial.copy_from_slice(&response.payload[..8]);
                }
            }
            8 => {
                // Serial currently programmed in motor slot 2.
                let request = Message::cmd_req(MOTOR, BMS, cmd::GET_DATA, &[0x40, 0x5c, 0x00]);
                let response = self.exchange(&request, None)?;
                if response.payload.len() >= 12 && response.payload[3] == 8 {
                    self.motor_slot2_serial
                        .copy_from_slice(&response.payload[4..12]);
                }
                if self.display_serial == self.motor_slot2_serial {
                    // Already paired.
                    self.to_motor_on();
                    return Ok(());
                }
            }
            _ => {
                // Pair: program the display serial into motor slot 2.
                let mut payload = [0xff; 13];
                payload[..5].copy_from_slice(&[0x40, 0x5c, 0x00, 0x08, 0x08]);
                payload[5..].copy_from_slice(&self.display_serial);
                let request = Message::cmd_req(MOTOR, BMS, cmd::PUT_DATA, &payload);
                self.exchange(&request, None)?;
                self.to_motor_on();
                return Ok(());
            }
        }
        self.step += 1;
        Ok(())
    }

    pub(crate) fn to_motor_on(&mut self) {
        self.state = State::MotorOn;
        self.step = 0;
    }

    /// Normal riding. Watches for standstill, the charger, calibration
    /// requests and level changes.
    pub(crate) fn handle_motor_on(
        &mut self,
        mode_short: bool,
        light_long: bool,
        calibrate: bool,
    ) -> Result<(), Error> {
        let now = self.platform.now_ms();
        if self.step == 0 || self.speed > 0 || self.level_set != 0 {
            self.last_moving_ms = now;
        }
        if self.step == 0 {
            self.step = 1;
        }

        if now - self.last_moving_ms > NO_MOTION_OFF_MS {
            self.to_turn_motor_off();
            return Ok(());
        }

        if self.platform.charger_connected() {
            self.to_charging();
            return Ok(());
        }

        // Calibration: the motor asks via cmd 0x1b, or the rider holds the
        // light button at level 0 with the light off.
        if calibrate || (self.level == 0 && !self.light_on && light_long) {
            self.to_calibrate();
            return Ok(());
        }

        if mode_short {
            self.level = (self.level + 1) % 4;
        }

        if self.level != self.level_set {
            self.to_set_assist_level();
        }
        Ok(())
    }

    pub(crate) fn to_set_assist_level(&mut self) {
        if self.level == 0 {
            self.blink.send(Blink::new(2, 250, 50));
        } else {
            self.blink.send(Blink::new(self.level, 100, 50));
        }
        self.state = State::SetAssistLevel;
        self.step = 0;
    }

    /// Turns assist on or off as needed, then selects the level. Each
    /// on/off command waits for the motor's cmd 0x12 acknowledgment (with a
    /// timeout) while handoffs keep running.
    pub(crate) fn handle_set_assist_level(&mut self) -> Result<(), Error> {
        match self.step {
            0 => {
                if self.level == 0 {
                    if self.assist_on {
                        let request = Message::cmd_req(MOTOR, BMS, cmd::ASSIST_OFF, &[]);
                        self.exchange(&request, None)?;
                        self.assist_on = false;
                        self.arm_assist_ack();
                        self.step = 1;
                    } else {
                        self.to_motor_on();
                    }
                } else if !self.assist_on {
                    let request = Message::cmd_req(MOTOR, BMS, cmd::ASSIST_ON, &[]);
                    self.exchange(&request, None)?;
                    self.assist_on = true;
                    self.arm_assist_ack();
                    self.step = 1;
                } else {
                    let level = self.level;
                    let request = Message::cmd_req(MOTOR, BMS, cmd::SET_ASSIST_LEVEL, &[level]);
                    self.exchange(&request, None)?;
                    self.level_set = level;
                    self.flags.set(flags::DISPLAY_UPDATE);
                    self.to_motor_on();
                }
            }
            _ => {
                if self.assist_ack_done() {
                    if self.level == 0 {
                        self.level_set = 0;
                        self.flags.set(flags::DISPLAY_UPDATE);
                        self.to_motor_on();
                    } else {
                        // Assist is on now; next tick selects the level.
                        self.step = 0;
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn to_charging(&mut self) {
        self.state = State::Charging;
        self.step = 0;

        // The rider should see the charge screen.
        self.display_on = true;

        // Boards with the voltage divider behind the relay need it closed to
        // measure while charging.
        self.platform.set_motor_relay(true);

        self.timer_motor.stop();

        self.blink.send(Blink::new(5, 500, 500));

        self.flags.set(flags::DISPLAY_UPDATE);
        if self.config.display != DisplayKind::None {
            let now = self.platform.now_ms();
            self.timer_display.start(now);
        }

        self.charger_unplugged_ms = None;
    }

    /// Forces assist off, then waits for the charger to be unplugged, with a
    /// short debounce before going through the full power-on sequence again.
    pub(crate) fn handle_charging(&mut self) -> Result<(), Error> {
        if self.assist_on && self.level_set > 0 {
            let request = Message::cmd_req(MOTOR, BMS, cmd::SET_ASSIST_LEVEL, &[0]);
            self.exchange(&request, None)?;
            self.level = 0;
            self.level_set = 0;
            return Ok(());
        }
        if self.assist_on {
            let request = Message::cmd_req(MOTOR, BMS, cmd::ASSIST_OFF, &[]);
            self.exchange(&request, None)?;
            self.assist_on = false;
            return Ok(());
        }

        let now = self.platform.now_ms();
        if self.platform.charger_connected() {
            self.charger_unplugged_ms = None;
            return Ok(());
        }

        let unplugged = *self.charger_unplugged_ms.get_or_insert(now);
        if now - unplugged >= CHARGE_DEBOUNCE_MS {
            self.platform.set_motor_relay(false);
            // The power-on sequence is a sane place to land after a charge;
            // it falls back to off/idle if the bike stays put.
            self.to_turn_motor_on();
        }
        Ok(())
    }

    pub(crate) fn to_calibrate(&mut self) {
        self.blink.send(Blink::new(10, 100, 100));
        self.state = State::StartCalibrate;
        self.step = 0;
    }

    pub(crate) fn handle_calibrate(&mut self) -> Result<(), Error> {
        match self.step {
            0 => {
                let request = Message::cmd_req(MOTOR, BMS, cmd::CALIBRATE, &[]);
                self.exchange(&request, None)?;
            }
            1 => {
                // Always follows a calibrate; meaning unknown.
                let request = Message::cmd_req(MOTOR, BMS, cmd::GET_DATA, &[0x00, 0xdf]);
                self.exchange(&request, None)?;
                if self.config.display != DisplayKind::Cu3 {
                    self.to_motor_on();
                    return Ok(());
                }
            }
            _ => {
                // Tell the display calibration is done; payload meaning
                // unknown.
                let request = Message::cmd_req(DISPLAY, BMS, cmd::CALIBRATE_DONE, &[0x01, 0x01]);
                self.exchange(&request, None)?;
                self.to_motor_on();
                return Ok(());
            }
        }
        self.step += 1;
        Ok(())
    }

    pub(crate) fn to_turn_motor_off(&mut self) {
        self.display_on = false;
        self.blink.send(Blink::new(2, 400, 50));
        self.state = State::TurnMotorOff;
        self.step = 0;
    }

    /// Assist off (with acknowledgment), stop the periodic updates, tell the
    /// motor to power down, and wait for its cmd 0x11 before releasing the
    /// relay.
    pub(crate) fn handle_turn_motor_off(&mut self) -> Result<(), Error> {
        match self.step {
            0 => {
                if self.assist_on {
                    let request = Message::cmd_req(MOTOR, BMS, cmd::ASSIST_OFF, &[]);
                    self.exchange(&request, None)?;
                    self.assist_on = false;
                    self.arm_assist_ack();
                    self.step = 1;
                } else {
                    self.step = 2;
                }
            }
            1 => {
                if self.assist_ack_done() {
                    self.step = 2;
                }
            }
            2 => {
                self.timer_motor.stop();
                self.timer_display.stop();

                self.motor_off_ack = false;
                let request = Message::cmd_req(MOTOR, BMS, cmd::MOTOR_OFF, &[0x00]);
                self.exchange(&request, None)?;
                // Some motors stop answering handoffs a while after this;
                // the handoff timeout then drops us to idle either way.
                self.step = 3;
            }
            _ => {
                if self.motor_off_ack {
                    self.platform.set_motor_relay(false);
                    self.to_motor_off();
                }
            }
        }
        Ok(())
    }

    pub(crate) fn to_motor_off(&mut self) {
        self.blink.send(Blink::new(4, 100, 300));
        self.save_distances();
        self.state = State::MotorOff;
        self.step = 0;
    }

    /// The motor is down but possibly still chatting; a press or a wakeup
    /// powers everything back up.
    pub(crate) fn handle_motor_off(&mut self, mode_short: bool, wakeup: bool) {
        if mode_short || wakeup {
            self.to_turn_motor_on();
        }
    }

    fn arm_assist_ack(&mut self) {
        // Drop any stale acknowledgment before arming.
        self.flags.take(flags::ASSIST_ACK);
        let now = self.platform.now_ms();
        self.assist_ack_deadline = Some(now + ASSIST_ACK_TIMEOUT_MS);
    }

    /// Whether the armed assist transition may proceed: acknowledged by the
    /// motor, or waited out.
    fn assist_ack_done(&mut self) -> bool {
        if self.flags.take(flags::ASSIST_ACK) {
            self.assist_ack_deadline = None;
            return true;
        }
        match self.assist_ack_deadline {
            Some(deadline) if self.platform.now_ms() >= deadline => {
                info!("no assist acknowledgment from the motor, continuing");
                self.assist_ack_deadline = None;
                true
            }
            _ => false,
        }
    }
}
