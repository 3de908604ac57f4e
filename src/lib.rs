//! Battery controller core for ION e-bike drive systems.
//!
//! A replacement battery (BMS) sits between the motor controller and the
//! display head-unit on a half-duplex, token-passing serial bus. This crate
//! is the whole controller above the hardware: the wire codec, the
//! token-handoff engine, the query responder, the power-sequencing state
//! machine, and the battery/trip accounting, over the `embedded-hal` serial
//! traits so the same core runs on a microcontroller UART or a host adapter.
//!
//! The embedder supplies the thin hardware surface: the serial halves for
//! [`bus::Bus`], a [`platform::Platform`] (relays, charge detect, ADC,
//! clock), a [`storage::Storage`] for the three persisted blobs, and an LED
//! pin for the [`blink`] task. Wire it up, then call [`Controller::run`]:
//!
//! ```ignore
//! let mut queue = blink::BlinkQueue::new();
//! let (sender, receiver) = queue.split();
//! // hand `receiver` to the LED task
//! let mut controller = Controller::new(
//!     Bus::new(rx, tx), storage, platform, Config::default(), sender,
//! );
//! controller.run()?;
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

#[macro_use(block)]
extern crate nb;

use failure::Fail;

pub mod battery;
pub mod blink;
pub mod bus;
pub mod bytes;
pub mod charge;
pub mod config;
pub mod controller;
pub mod crc;
pub mod cu2;
pub mod cu3;
pub mod display;
mod event;
pub mod frame;
pub mod message;
pub mod platform;
mod responder;
mod states;
pub mod storage;
#[cfg(test)]
pub(crate) mod testutil;
pub mod trip;

pub use crate::bus::{Bus, ReadResult};
pub use crate::config::Config;
pub use crate::controller::{Controller, State};
pub use crate::display::DisplayKind;

/// Errors surfaced by the bus engine.
#[derive(Fail, Debug)]
pub enum Error {
    /// Error occurred during IO
    #[fail(display = "Error occurred during IO")]
    Io,
}
