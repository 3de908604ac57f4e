//! Battery voltage and current measurement.
//!
//! Voltage is smoothed with an exponential moving average before it feeds
//! the percentage shown on displays and reported to the motor. The smoothing
//! uses an integer accumulator scaled by 128 (alpha 1/128): add the sample,
//! take `history >> 7` as the average, subtract the average back out. At one
//! sample per 100 ms that settles to 99.3 % of a step in roughly 64 s, slow
//! but fine for a battery gauge. Current uses the same trick with alpha 1/32.

use log::warn;

use crate::config::Config;

/// Reported pack voltage on boards without an ADC.
pub const FALLBACK_MV: u32 = 27_600;

/// Reported percentage on boards without an ADC.
pub const FALLBACK_PERCENTAGE: u8 = 50;

/// Measured battery state.
#[derive(Debug)]
pub struct Battery {
    mv: u32,
    ma: u32,
    history: u32,
    current_history: u32,
    percentage: u8,
    empty_mv: u32,
    full_mv: u32,
    divider_scale: u32,
    warned_no_adc: bool,
}

impl Battery {
    /// Fresh state; nothing measured yet.
    pub fn new(config: &Config) -> Battery {
        Battery {
            mv: FALLBACK_MV,
            ma: 0,
            history: 0,
            current_history: 0,
            percentage: 0,
            empty_mv: config.empty_mv,
            full_mv: config.full_mv,
            divider_scale: config.divider_scale,
            warned_no_adc: false,
        }
    }

    /// Feeds one calibrated ADC voltage reading (mV at the divider tap).
    pub fn sample_voltage(&mut self, adc_mv: u32) {
        let pack_mv = adc_mv.saturating_mul(self.divider_scale) / 1000;
        self.mv = pack_mv;

        self.history += pack_mv;
        let avg = self.history >> 7;
        self.history -= avg;

        self.percentage = self.mv_to_percentage(avg);
    }

    /// Feeds one raw current-sense reading and returns the smoothed value,
    /// in the sensor's own relative units.
    pub fn sample_current(&mut self, raw: u32) -> u32 {
        self.current_history += raw;
        let avg = self.current_history >> 5;
        self.current_history -= avg;

        self.ma = avg;
        avg
    }

    /// Degraded mode for boards without a voltage channel.
    pub fn no_adc_fallback(&mut self) {
        if !self.warned_no_adc {
            warn!("no battery ADC; reporting fixed voltage and charge");
            self.warned_no_adc = true;
        }
        self.mv = FALLBACK_MV;
        self.percentage = FALLBACK_PERCENTAGE;
    }

    /// Last raw pack voltage in mV.
    pub fn mv(&self) -> u32 {
        self.mv
    }

    /// Smoothed current in relative units.
    pub fn ma(&self) -> u32 {
        self.ma
    }

    /// Charge percentage from the smoothed voltage, always in `0..=100`.
    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    fn mv_to_percentage(&self, mv: u32) -> u8 {
        if mv < self.empty_mv {
            return 0;
        }
        let span = self.full_mv - self.empty_mv;
        let percentage = (mv - self.empty_mv) * 100 / span;
        if percentage > 100 {
            100
        } else {
            percentage as u8
        }
    }
}
