//! CU3 display payloads and its battery value encoding.

use crate::bytes::{put_u16, put_u32};

/// What the CU3 shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// The normal riding screen.
    Riding = 0x00,
    /// Battery screen with percentage and charging animation.
    BatteryCharging = 0x01,
    /// Battery screen with percentage.
    Battery = 0x02,
}

/// Value the CU3 maps to 100 % battery.
pub const BAT_MAX_VALUE: u16 = 11_000;

/// Encodes the 13-byte CU3 update payload.
///
/// `speed` is km/h x 10 (the display rounds to 0.5 km/h); trips are 10 m
/// units. `screen` off shows the logo; `battery2` adds the range-extender
/// icon. Assist shows 0–3 plus `4 = P`, `5 = R`, `7 = 4`.
pub fn update_payload(
    screen_type: Screen,
    screen_on: bool,
    light_on: bool,
    battery2: bool,
    assist: u8,
    speed: u16,
    trip1: u32,
    trip2: u32,
) -> [u8; 13] {
    let mut byte0 = screen_type as u8;
    if screen_type == Screen::Riding && assist > 0 {
        // What the original battery sends whenever assist is active.
        byte0 = 0x03;
    }
    let flags = (light_on as u8) | (battery2 as u8) << 2 | (screen_on as u8) << 3;

    let mut payload = [0u8; 13];
    payload[0] = byte0;
    payload[1] = assist;
    payload[2] = flags;
    put_u16(&mut payload, 3, speed);
    put_u32(&mut payload, 5, trip1);
    put_u32(&mut payload, 9, trip2);
    payload
}

/// Encodes a battery percentage as the CU3's raw battery value.
///
/// The display recovers the percentage as roughly
/// `floor((value - 0.091 * max) / (0.009 * max))`; this is the inverse,
/// with rounding to land on the intended step.
pub fn bat_value(percentage: u8) -> u16 {
    let max = u32::from(BAT_MAX_VALUE);
    let offset_k = 91 * max;
    let one_percent_k = 9 * max;
    let value_k = offset_k + one_percent_k * u32::from(percentage) + one_percent_k / 2;
    (value_k / 1000) as u16
}
