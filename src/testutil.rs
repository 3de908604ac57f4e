//! Test doubles shared by the unit tests: a scripted serial pair, a
//! stepping clock and a recording platform.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::serial::{Read, Write};

use crate::frame::encode;
use crate::message::Message;
use crate::platform::{Clock, Platform};

/// A clock that advances by a fixed step on every read, so timeout loops
/// terminate deterministically.
pub struct TestClock {
    now: u64,
    step: u64,
}

impl TestClock {
    pub fn new(step: u64) -> TestClock {
        TestClock { now: 0, step }
    }
}

impl Clock for TestClock {
    fn now_ms(&mut self) -> u64 {
        self.now += self.step;
        self.now
    }
}

#[derive(Default)]
struct ScriptState {
    pending_polls: u32,
    reads: VecDeque<u8>,
    written: Vec<u8>,
    flushes: usize,
}

/// Scripted serial: reads come from a queue (optionally after a number of
/// empty polls), writes are recorded. Clones share state, so one script can
/// serve as both halves of a [`crate::bus::Bus`].
#[derive(Clone, Default)]
pub struct ScriptSerial(Rc<RefCell<ScriptState>>);

impl ScriptSerial {
    pub fn new() -> ScriptSerial {
        ScriptSerial::default()
    }

    /// A serial that never produces a byte.
    pub fn silent() -> ScriptSerial {
        ScriptSerial::default()
    }

    /// Queues raw bytes for reading.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.0.borrow_mut().reads.extend(bytes.iter().cloned());
    }

    /// Queues a whole encoded frame for reading.
    pub fn queue_frame(&self, message: &Message) {
        self.queue_bytes(&encode(message));
    }

    /// Makes the next `polls` reads return nothing before any queued bytes
    /// become visible.
    pub fn delay_reads(&self, polls: u32, bytes: &[u8]) {
        let mut state = self.0.borrow_mut();
        state.pending_polls = polls;
        state.reads.extend(bytes.iter().cloned());
    }

    /// Everything written so far, clearing the record.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().written)
    }

    /// Number of flushes seen; the bus flushes once per written message.
    pub fn written_frames(&self) -> usize {
        self.0.borrow().flushes
    }
}

impl Read<u8> for ScriptSerial {
    type Error = ();

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        let mut state = self.0.borrow_mut();
        if state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Err(nb::Error::WouldBlock);
        }
        match state.reads.pop_front() {
            Some(byte) => Ok(byte),
            None => Err(nb::Error::WouldBlock),
        }
    }
}

impl Write<u8> for ScriptSerial {
    type Error = ();

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.0.borrow_mut().written.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.0.borrow_mut().flushes += 1;
        Ok(())
    }
}

/// Records relay and light switching; scriptable charger and ADC.
pub struct TestPlatform {
    pub clock: TestClock,
    pub motor_relay: bool,
    pub light: bool,
    pub charger: bool,
    pub adc_mv: Option<u32>,
    pub current_raw: Option<u32>,
}

impl TestPlatform {
    pub fn new(clock_step: u64) -> TestPlatform {
        TestPlatform {
            clock: TestClock::new(clock_step),
            motor_relay: false,
            light: false,
            charger: false,
            adc_mv: None,
            current_raw: None,
        }
    }
}

impl Clock for TestPlatform {
    fn now_ms(&mut self) -> u64 {
        self.clock.now_ms()
    }
}

impl Platform for TestPlatform {
    fn set_motor_relay(&mut self, on: bool) {
        self.motor_relay = on;
    }

    fn set_light(&mut self, on: bool) {
        self.light = on;
    }

    fn charger_connected(&mut self) -> bool {
        self.charger
    }

    fn battery_adc_mv(&mut self) -> Option<u32> {
        self.adc_mv
    }

    fn current_adc_raw(&mut self) -> Option<u32> {
        self.current_raw
    }
}
