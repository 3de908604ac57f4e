//! Host-side demo: runs the controller against a USB serial adapter wired to
//! the bike bus. Relays and the LED are printed instead of switched.

use std::io::{Read as IoRead, Write as IoWrite};
use std::time::Instant;

use embedded_hal::serial::{Read, Write};
use serialport::prelude::*;

use ion_bms::blink::BlinkQueue;
use ion_bms::platform::{Clock, Platform};
use ion_bms::storage::RamStorage;
use ion_bms::{Bus, Config, Controller, DisplayKind};

fn main() {
    let (port1, port2) = {
        let mut port = serialport::open("/dev/ttyUSB0").unwrap();
        port.set_baud_rate(9600).unwrap();
        (Port::new(port.try_clone().unwrap()), Port::new(port))
    };

    let mut config = Config::default();
    config.display = DisplayKind::Cu3;

    let mut queue = BlinkQueue::new();
    let (sender, mut blinks) = queue.split();

    let mut controller = Controller::new(
        Bus::new(port1, port2),
        RamStorage::new(),
        HostPlatform::new(),
        config,
        sender,
    );

    loop {
        controller.tick().unwrap();
        while let Some(blink) = blinks.recv() {
            println!("LED: {} x {} ms", blink.blinks, blink.on_ms);
        }
    }
}

struct HostPlatform {
    start: Instant,
}

impl HostPlatform {
    fn new() -> HostPlatform {
        HostPlatform {
            start: Instant::now(),
        }
    }
}

impl Clock for HostPlatform {
    fn now_ms(&mut self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Platform for HostPlatform {
    fn set_motor_relay(&mut self, on: bool) {
        println!("motor relay: {}", if on { "on" } else { "off" });
    }

    fn set_light(&mut self, on: bool) {
        println!("light: {}", if on { "on" } else { "off" });
    }

    fn charger_connected(&mut self) -> bool {
        false
    }

    fn battery_adc_mv(&mut self) -> Option<u32> {
        None
    }

    fn current_adc_raw(&mut self) -> Option<u32> {
        None
    }
}

struct Port {
    inner: Box<dyn SerialPort>,
}

impl Port {
    fn new(inner: Box<dyn SerialPort>) -> Self {
        Port { inner }
    }
}

impl Read<u8> for Port {
    type Error = std::io::Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        let mut buf = [0u8];
        match self.inner.read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(nb::Error::WouldBlock),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }
}

impl Write<u8> for Port {
    type Error = std::io::Error;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        match self.inner.write(&[word]) {
            Ok(1) => Ok(()),
            Ok(_) => Err(nb::Error::Other(std::io::Error::new(
                std::io::ErrorKind::Other,
                "wrote wrong number of bytes",
            ))),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.inner.flush().map_err(nb::Error::Other)
    }
}
