//! Coulomb-counted charge state, persisted across reboots.
//!
//! The current sense is uncalibrated, so the counter accumulates "relative
//! mAh" and the percentage is taken against a full-charge constant expressed
//! in the same units (see [`Config::full_charge_raw`]).
//!
//! [`Config::full_charge_raw`]: crate::config::Config::full_charge_raw

use crate::storage::Blob;

/// Persisted battery charge state.
#[derive(Debug)]
pub struct Charge {
    percentage: u8,
    mv: u32,
    mah: u32,
    full_raw: u32,
}

impl Charge {
    /// A full battery; the default when nothing was persisted yet.
    pub fn new(full_raw: u32) -> Charge {
        Charge {
            percentage: 100,
            mv: 0,
            mah: 0,
            full_raw,
        }
    }

    /// Restores the state from a [`Blob::Charge`] record.
    pub fn from_blob(full_raw: u32, blob: &[u8]) -> Charge {
        let mut mv = [0u8; 4];
        let mut mah = [0u8; 4];
        mv.copy_from_slice(&blob[1..5]);
        mah.copy_from_slice(&blob[5..9]);
        Charge {
            percentage: blob[0],
            mv: u32::from_le_bytes(mv),
            mah: u32::from_le_bytes(mah),
            full_raw,
        }
    }

    /// Serializes for [`Blob::Charge`].
    pub fn to_blob(&self) -> [u8; Blob::Charge.size()] {
        let mut blob = [0u8; Blob::Charge.size()];
        blob[0] = self.percentage;
        blob[1..5].copy_from_slice(&self.mv.to_le_bytes());
        blob[5..9].copy_from_slice(&self.mah.to_le_bytes());
        blob
    }

    /// Adds one sample tick: latest pack voltage and smoothed current draw.
    pub fn update(&mut self, mv: u32, ma: u32) {
        self.mv = mv;
        self.mah = self.mah.saturating_add(ma);
    }

    /// Recomputes the percentage; `true` when it changed and the blob should
    /// be written out.
    pub fn refresh_percentage(&mut self) -> bool {
        let used = (u64::from(self.mah) * 100 / u64::from(self.full_raw.max(1))).min(100) as u8;
        let percentage = 100 - used;
        if percentage != self.percentage {
            self.percentage = percentage;
            true
        } else {
            false
        }
    }

    /// Remaining charge in percent.
    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    /// Counted discharge in relative mAh units.
    pub fn mah(&self) -> u32 {
        self.mah
    }

    /// Back to full, e.g. after a complete charge.
    pub fn reset(&mut self) {
        self.percentage = 100;
        self.mv = 0;
        self.mah = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let mut charge = Charge::new(1000);
        charge.update(26_500, 320);
        charge.refresh_percentage();

        let restored = Charge::from_blob(1000, &charge.to_blob());
        assert_eq!(restored.percentage(), charge.percentage());
        assert_eq!(restored.mah(), charge.mah());
        assert_eq!(restored.mv, charge.mv);
    }

    #[test]
    fn percentage_counts_down_and_clamps() {
        let mut charge = Charge::new(1000);
        assert_eq!(charge.percentage(), 100);

        charge.update(26_000, 250);
        assert!(charge.refresh_percentage());
        assert_eq!(charge.percentage(), 75);

        charge.update(25_000, 10_000);
        charge.refresh_percentage();
        assert_eq!(charge.percentage(), 0);
    }

    #[test]
    fn reset_returns_to_full() {
        let mut charge = Charge::new(1000);
        charge.update(24_000, 900);
        charge.refresh_percentage();
        assert_eq!(charge.percentage(), 10);

        charge.reset();
        assert_eq!(charge.percentage(), 100);
        assert_eq!(charge.mah(), 0);
    }

    #[test]
    fn refresh_reports_only_changes() {
        let mut charge = Charge::new(100_000);
        charge.update(26_000, 10);
        assert!(!charge.refresh_percentage());
        assert!(!charge.refresh_percentage());
    }
}
