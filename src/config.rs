//! Build-time configuration, as a typed struct with documented defaults.

use crate::display::DisplayKind;

/// Static configuration of one controller build.
///
/// These were compile-time options on the original hardware; pin numbers,
/// UART selection and pin inversion live with the embedder and the platform
/// adapter.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pack voltage mapped to 0 %, in mV.
    pub empty_mv: u32,
    /// Pack voltage mapped to 100 %, in mV.
    pub full_mv: u32,
    /// Voltage divider scale: pack mV per ADC volt, times 1000.
    pub divider_scale: u32,
    /// Nominal pack capacity in mAh.
    pub charge_mah: u32,
    /// Which display head-unit is on the bus, if any.
    pub display: DisplayKind,
    /// Whether the board has its own mode button wired.
    pub has_button: bool,
    /// Whether the board has a current-sense channel; without one the charge
    /// counter stands still and only the voltage gauge works.
    pub has_current_sense: bool,
}

impl Config {
    /// Full charge in the relative units of the uncalibrated current sense.
    pub fn full_charge_raw(&self) -> u32 {
        self.charge_mah.saturating_mul(1800)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            empty_mv: 21_000,
            full_mv: 27_600,
            divider_scale: 11_000,
            charge_mah: 8_800,
            display: DisplayKind::None,
            has_button: false,
            has_current_sense: false,
        }
    }
}
