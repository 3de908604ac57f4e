//! The controller: owns the bus, the accounting state, the timers and the
//! state machine, and runs them from a single control loop.
//!
//! One task drives everything. Each [`Controller::tick`] services the
//! battery sampler and the pending timer/button flags, runs one step of the
//! active state, and finally yields the bus token with a handoff when
//! handoffs are enabled. All bus traffic and all state mutation happen on
//! this task; the only other moving part is the LED blink task fed through
//! its bounded queue.

use embedded_hal::serial::{Read, Write};
use log::warn;

use crate::battery::Battery;
use crate::blink::BlinkSender;
use crate::bus::{Bus, ReadResult};
use crate::bytes::put_u16;
use crate::charge::Charge;
use crate::config::Config;
use crate::cu2::ButtonPoll;
use crate::display::{self, DisplayKind, View};
use crate::event::{flags, Flags, Periodic};
use crate::message::{cmd, Kind, Message, BMS, DISPLAY, MOTOR};
use crate::platform::Platform;
use crate::storage::{Blob, Storage};
use crate::trip::Trip;
use crate::Error;

/// The eight controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for a button or a bus wakeup; the motor relay is off.
    Idle,
    /// Power-on sequence towards [`State::MotorOn`].
    TurnMotorOn,
    /// Normal operation; queries are answered and the rider can act.
    MotorOn,
    /// Bringing the motor's assist state in line with the requested level.
    SetAssistLevel,
    /// Charger plugged; assist forced off, charge shown on the display.
    Charging,
    /// Running a motor calibration.
    StartCalibrate,
    /// Shutdown sequence towards [`State::MotorOff`].
    TurnMotorOff,
    /// Motor told to power down; still chatting until it goes quiet.
    MotorOff,
}

/// Replies to a handoff come much faster than this in practice; silence
/// this long means the motor powered off.
pub(crate) const HANDOFF_TIMEOUT_MS: u32 = 250;

/// Display pushes get a bounded retry window.
pub(crate) const DISPLAY_EXCHANGE_TIMEOUT_MS: u32 = 225;

const BUTTON_POLL_PERIOD_MS: u32 = 100;
const DISPLAY_UPDATE_PERIOD_MS: u32 = 1500;
const MOTOR_UPDATE_PERIOD_MS: u32 = 10_000;
const BATTERY_SAMPLE_PERIOD_MS: u32 = 100;

/// How long to wait for the motor's cmd 0x12 assist acknowledgment before
/// carrying on without it.
pub(crate) const ASSIST_ACK_TIMEOUT_MS: u64 = 2000;

/// Standing still this long at assist level 0 powers the motor down.
pub(crate) const NO_MOTION_OFF_MS: u64 = 10_000;

/// Debounce after the charger is unplugged.
pub(crate) const CHARGE_DEBOUNCE_MS: u64 = 3000;

/// Served until the motor stores its own calibration. This needs to be
/// plausible calibration data or the motor refuses to run.
pub(crate) const DEFAULT_CALIBRATION: [u8; 10] =
    [0x94, 0x38, 0x4b, 0x15, 0x28, 0x3a, 0x3e, 0x91, 0x79, 0x50];

/// The controller aggregate. Generic over the serial halves, the blob store
/// and the board platform; see the crate docs for the wiring.
pub struct Controller<'q, R, W, S, P> {
    pub(crate) bus: Bus<R, W>,
    pub(crate) storage: S,
    pub(crate) platform: P,
    pub(crate) config: Config,
    pub(crate) blink: BlinkSender<'q>,

    pub(crate) state: State,
    pub(crate) step: u8,
    pub(crate) display_on: bool,
    pub(crate) assist_on: bool,
    pub(crate) level_set: u8,
    pub(crate) do_handoffs: bool,
    pub(crate) motor_off_ack: bool,
    pub(crate) level: u8,
    pub(crate) speed: u16,
    pub(crate) light_on: bool,

    pub(crate) flags: Flags,
    pub(crate) battery: Battery,
    pub(crate) charge: Charge,
    pub(crate) trip: Trip,
    pub(crate) calibration: [u8; 10],
    pub(crate) time_offset: i64,

    pub(crate) button_poll: ButtonPoll,
    pub(crate) display_serial: [u8; 8],
    pub(crate) motor_slot2_serial: [u8; 8],

    pub(crate) timer_button: Periodic,
    pub(crate) timer_display: Periodic,
    pub(crate) timer_motor: Periodic,
    pub(crate) timer_battery: Periodic,

    pub(crate) last_moving_ms: u64,
    pub(crate) charger_unplugged_ms: Option<u64>,
    pub(crate) assist_ack_deadline: Option<u64>,
}

impl<'q, R, W, S, P> Controller<'q, R, W, S, P>
where
    R: Read<u8>,
    W: Write<u8>,
    S: Storage,
    P: Platform,
{
    /// Builds the controller and restores persisted state.
    ///
    /// Missing or unreadable blobs fall back to defaults: zeroed trip
    /// counters, a full charge record and the bundled calibration data.
    pub fn new(
        bus: Bus<R, W>,
        mut storage: S,
        mut platform: P,
        config: Config,
        blink: BlinkSender<'q>,
    ) -> Self {
        let trip = {
            let mut blob = [0u8; Blob::Distance.size()];
            if storage.read(Blob::Distance, &mut blob) {
                Trip::from_blob(&blob)
            } else {
                Trip::new()
            }
        };
        let charge = {
            let mut blob = [0u8; Blob::Charge.size()];
            if storage.read(Blob::Charge, &mut blob) {
                Charge::from_blob(config.full_charge_raw(), &blob)
            } else {
                Charge::new(config.full_charge_raw())
            }
        };
        let mut calibration = DEFAULT_CALIBRATION;
        {
            let mut blob = [0u8; Blob::Calibration.size()];
            if storage.read(Blob::Calibration, &mut blob) {
                calibration = blob;
            }
        }

        let battery = Battery::new(&config);
        let now = platform.now_ms();
        let mut timer_battery = Periodic::new(BATTERY_SAMPLE_PERIOD_MS);
        timer_battery.start(now);

        Controller {
            bus,
            storage,
            platform,
            config,
            blink,
            state: State::Idle,
            step: 0,
            display_on: false,
            assist_on: false,
            level_set: 0,
            do_handoffs: false,
            motor_off_ack: false,
            level: 0,
            speed: 0,
            light_on: false,
            flags: Flags::default(),
            battery,
            charge,
            trip,
            calibration,
            time_offset: 0,
            button_poll: ButtonPoll::new(),
            display_serial: [0; 8],
            motor_slot2_serial: [0; 8],
            timer_button: Periodic::new(BUTTON_POLL_PERIOD_MS),
            timer_display: Periodic::new(DISPLAY_UPDATE_PERIOD_MS),
            timer_motor: Periodic::new(MOTOR_UPDATE_PERIOD_MS),
            timer_battery,
            last_moving_ms: 0,
            charger_unplugged_ms: None,
            assist_ack_deadline: None,
        }
    }

    /// Runs the control loop forever.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.tick()?;
        }
    }

    /// One control-loop iteration: service timers and flags, run one step of
    /// the current state, then yield the token if handoffs are on.
    pub fn tick(&mut self) -> Result<(), Error> {
        let now = self.platform.now_ms();

        if self.timer_battery.poll(now) {
            self.sample_battery();
        }

        let mode_short = self.flags.take(flags::MODE_SHORT_PRESS);
        // Mode long presses have no binding on this hardware yet.
        let _ = self.flags.take(flags::MODE_LONG_PRESS);
        let light_short = self.flags.take(flags::LIGHT_SHORT_PRESS);
        let light_long = self.flags.take(flags::LIGHT_LONG_PRESS);
        let wakeup = self.flags.take(flags::WAKEUP);
        let calibrate = self.flags.take(flags::CALIBRATE);

        if light_short {
            self.light_on = !self.light_on;
            let on = self.light_on;
            self.platform.set_light(on);
            self.flags.set(flags::DISPLAY_UPDATE);
        }

        if self.timer_button.poll(now) {
            self.flags.set(flags::CHECK_BUTTON);
        }
        if self.timer_display.poll(now) {
            self.flags.set(flags::DISPLAY_UPDATE);
        }
        if self.timer_motor.poll(now) {
            self.flags.set(flags::MOTOR_UPDATE);
        }

        if self.flags.take(flags::CHECK_BUTTON) {
            self.poll_buttons()?;
        } else if self.flags.take(flags::DISPLAY_UPDATE) {
            self.push_display_state()?;
        } else if self.flags.take(flags::MOTOR_UPDATE) {
            self.push_motor_update()?;
        } else {
            match self.state {
                State::Idle => self.handle_idle(mode_short)?,
                State::TurnMotorOn => self.handle_turn_motor_on()?,
                State::MotorOn => self.handle_motor_on(mode_short, light_long, calibrate)?,
                State::SetAssistLevel => self.handle_set_assist_level()?,
                State::Charging => self.handle_charging()?,
                State::StartCalibrate => self.handle_calibrate()?,
                State::TurnMotorOff => self.handle_turn_motor_off()?,
                State::MotorOff => self.handle_motor_off(mode_short, wakeup),
            }
        }

        if self.do_handoffs && !self.handoff()? {
            // The motor went quiet, most likely powered off after we told it
            // to (or its battery plug was pulled).
            self.timer_button.stop();
            self.timer_display.stop();
            self.timer_motor.stop();
            self.do_handoffs = false;
            self.to_idle();
        }

        Ok(())
    }

    /// Passes the token to the peer and serves its queries until it hands
    /// back (`true`) or goes quiet (`false`).
    pub(crate) fn handoff(&mut self) -> Result<bool, Error> {
        let target = self.handoff_target();
        self.bus.write_message(&Message::handoff(target))?;
        loop {
            match self
                .bus
                .read_message(Some(HANDOFF_TIMEOUT_MS), &mut self.platform)?
            {
                ReadResult::Timeout => return Ok(false),
                ReadResult::Message(message) => {
                    if message.target != BMS {
                        continue;
                    }
                    if message.kind == Kind::Handoff {
                        return Ok(true);
                    }
                    self.answer(&message)?;
                }
                _ => {}
            }
        }
    }

    /// A CU3 runs the bus and relays to the motor; everyone else talks to
    /// the motor directly. Mixed buses have not been seen in the wild.
    pub(crate) fn handoff_target(&self) -> u8 {
        if self.config.display == DisplayKind::Cu3 {
            DISPLAY
        } else {
            MOTOR
        }
    }

    pub(crate) fn exchange(
        &mut self,
        request: &Message,
        timeout_ms: Option<u32>,
    ) -> Result<Message, Error> {
        self.bus.exchange(request, timeout_ms, &mut self.platform)
    }

    fn sample_battery(&mut self) {
        match self.platform.battery_adc_mv() {
            Some(adc_mv) => {
                self.battery.sample_voltage(adc_mv);
                let ma = if self.config.has_current_sense {
                    match self.platform.current_adc_raw() {
                        Some(raw) => self.battery.sample_current(raw),
                        None => 0,
                    }
                } else {
                    0
                };
                self.charge.update(self.battery.mv(), ma);
                if self.charge.refresh_percentage() {
                    let blob = self.charge.to_blob();
                    if !self.storage.write(Blob::Charge, &blob) {
                        warn!("could not persist charge state");
                    }
                }
            }
            None => self.battery.no_adc_fallback(),
        }
    }

    /// CU2 button poll; the display only reports presses when asked.
    pub(crate) fn poll_buttons(&mut self) -> Result<(), Error> {
        if self.config.display != DisplayKind::Cu2 {
            return Ok(());
        }
        if self.flags.take(flags::IGNORE_HELD) {
            self.button_poll.ignore_next();
        }

        let payload = self.button_poll.request_payload();
        let request = Message::cmd_req(DISPLAY, BMS, cmd::BUTTON_POLL, &payload);
        let response = self.exchange(&request, None)?;

        let status = response.payload.first().copied().unwrap_or(0);
        let events = self.button_poll.interpret(status);
        if events.mode_short {
            self.flags.set(flags::MODE_SHORT_PRESS);
        }
        if events.mode_long {
            self.flags.set(flags::MODE_LONG_PRESS);
        }
        if events.light_short {
            self.flags.set(flags::LIGHT_SHORT_PRESS);
        }
        if events.light_long {
            self.flags.set(flags::LIGHT_LONG_PRESS);
        }
        Ok(())
    }

    /// Pushes the current state to the configured display.
    pub(crate) fn push_display_state(&mut self) -> Result<(), Error> {
        let view = View {
            display_on: self.display_on,
            charging: self.state == State::Charging,
            level: self.level,
            light_on: self.light_on,
            speed: self.speed,
            trip1: self.trip.trip1(),
            trip2: self.trip.trip2(),
            bat_percentage: self.battery.percentage(),
        };
        let push = match display::state_update(self.config.display, &view) {
            Some(push) => push,
            None => return Ok(()),
        };
        let timeout = match self.config.display {
            DisplayKind::Cu3 => Some(DISPLAY_EXCHANGE_TIMEOUT_MS),
            _ => None,
        };
        let request = Message::cmd_req(DISPLAY, BMS, push.command, push.payload());
        self.exchange(&request, timeout)?;
        Ok(())
    }

    /// The periodic PUT to the motor. The first key is almost always 2500
    /// (seen lower once, on a drained pack uphill; an amp limit?); the
    /// second is the pack voltage in 100 mV.
    pub(crate) fn push_motor_update(&mut self) -> Result<(), Error> {
        let mut payload = [0u8; 8];
        payload[0] = 0x94;
        payload[1] = 0xb0;
        put_u16(&mut payload, 2, 2500);
        payload[4] = 0x14;
        payload[5] = 0xb1;
        put_u16(&mut payload, 6, (self.battery.mv() / 100) as u16);

        let request = Message::cmd_req(MOTOR, BMS, cmd::PUT_DATA, &payload);
        self.exchange(&request, None)?;
        Ok(())
    }

    pub(crate) fn save_distances(&mut self) {
        let blob = self.trip.to_blob();
        if !self.storage.write(Blob::Distance, &blob) {
            warn!("could not persist trip counters");
        }
    }

    pub(crate) fn uptime_s(&mut self) -> u32 {
        (self.platform.now_ms() / 1000) as u32
    }

    /// Board mode button released before the hold threshold.
    pub fn press_mode_short(&mut self) {
        self.flags.set(flags::MODE_SHORT_PRESS);
    }

    /// Board mode button held past the hold threshold.
    pub fn press_mode_long(&mut self) {
        self.flags.set(flags::MODE_LONG_PRESS);
    }

    /// Board light button released before the hold threshold.
    pub fn press_light_short(&mut self) {
        self.flags.set(flags::LIGHT_SHORT_PRESS);
    }

    /// Board light button held past the hold threshold.
    pub fn press_light_long(&mut self) {
        self.flags.set(flags::LIGHT_LONG_PRESS);
    }

    /// Current controller state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Requested assist level, 0..=3.
    pub fn assist_level(&self) -> u8 {
        self.level
    }

    /// Last speed reported by the motor, km/h x 10.
    pub fn speed(&self) -> u16 {
        self.speed
    }

    /// Whether the headlight is on.
    pub fn light_on(&self) -> bool {
        self.light_on
    }

    /// Battery measurements.
    pub fn battery(&self) -> &Battery {
        &self.battery
    }

    /// Trip counters.
    pub fn trip(&self) -> &Trip {
        &self.trip
    }

    /// Persisted charge state.
    pub fn charge(&self) -> &Charge {
        &self.charge
    }
}
