//! The thin hardware surface the controller runs against.
//!
//! Everything the core needs from a board fits in two traits: a monotonic
//! clock and a handful of pins plus the battery ADC. Boards with the full
//! pin set implement [`Platform`] directly; [`PinPlatform`] adapts plain
//! `embedded-hal` digital pins for boards without an ADC.

use embedded_hal::digital::v2::{InputPin, OutputPin};

/// Monotonic milliseconds since boot. Drives every timeout and timer; the
/// protocol engine never owns a time source of its own.
pub trait Clock {
    /// Current time in milliseconds.
    fn now_ms(&mut self) -> u64;
}

/// Board collaborators: relays, charge detect and the battery ADC.
pub trait Platform: Clock {
    /// Switches the motor power relay.
    fn set_motor_relay(&mut self, on: bool);

    /// Switches the headlight relay.
    fn set_light(&mut self, on: bool);

    /// Whether the charger is currently plugged in.
    fn charger_connected(&mut self) -> bool;

    /// Calibrated voltage at the battery divider, in mV at the ADC pin.
    /// `None` when the board has no voltage channel.
    fn battery_adc_mv(&mut self) -> Option<u32>;

    /// Raw reading of the current-sense channel, `None` when absent.
    fn current_adc_raw(&mut self) -> Option<u32>;
}

/// [`Platform`] over `embedded-hal` digital pins, for boards without an ADC.
///
/// Pin polarity is configuration, not wiring knowledge baked into the core:
/// each output takes an `inverted` flag and the charge-detect input is
/// active-low by default (low means "charger plugged").
pub struct PinPlatform<C, MR, LR, CD> {
    clock: C,
    motor_relay: MR,
    motor_relay_inverted: bool,
    light: Option<LR>,
    light_inverted: bool,
    charge_detect: Option<CD>,
}

impl<C, MR, LR, CD> PinPlatform<C, MR, LR, CD>
where
    C: Clock,
    MR: OutputPin,
    LR: OutputPin,
    CD: InputPin,
{
    /// Builds the adapter. `light` and `charge_detect` are optional wiring.
    pub fn new(
        clock: C,
        motor_relay: MR,
        motor_relay_inverted: bool,
        light: Option<LR>,
        light_inverted: bool,
        charge_detect: Option<CD>,
    ) -> Self {
        PinPlatform {
            clock,
            motor_relay,
            motor_relay_inverted,
            light,
            light_inverted,
            charge_detect,
        }
    }

    fn drive<P: OutputPin>(pin: &mut P, on: bool, inverted: bool) {
        if on != inverted {
            pin.set_high().ok();
        } else {
            pin.set_low().ok();
        }
    }
}

impl<C: Clock, MR, LR, CD> Clock for PinPlatform<C, MR, LR, CD> {
    fn now_ms(&mut self) -> u64 {
        self.clock.now_ms()
    }
}

impl<C, MR, LR, CD> Platform for PinPlatform<C, MR, LR, CD>
where
    C: Clock,
    MR: OutputPin,
    LR: OutputPin,
    CD: InputPin,
{
    fn set_motor_relay(&mut self, on: bool) {
        Self::drive(&mut self.motor_relay, on, self.motor_relay_inverted);
    }

    fn set_light(&mut self, on: bool) {
        let inverted = self.light_inverted;
        if let Some(pin) = self.light.as_mut() {
            Self::drive(pin, on, inverted);
        }
    }

    fn charger_connected(&mut self) -> bool {
        // Active low: a plugged charger pulls the pin down.
        match self.charge_detect.as_ref() {
            Some(pin) => pin.is_low().unwrap_or(false),
            None => false,
        }
    }

    fn battery_adc_mv(&mut self) -> Option<u32> {
        None
    }

    fn current_adc_raw(&mut self) -> Option<u32> {
        None
    }
}
