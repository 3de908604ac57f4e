//! Trip distance accounting.
//!
//! The motor reports distance since its own power-on; this module turns that
//! into three cumulative counters (trip 1, trip 2, lifetime total, all in
//! 10 m units) that survive motor power cycles and reboots. A report lower
//! than the previous one means the motor reset, in which case the full
//! report counts as new distance.

use crate::storage::Blob;

/// The three persistent distance counters.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Trip {
    trip1: u32,
    trip2: u32,
    total: u32,
    last_distance: u32,
}

impl Trip {
    /// Counters at zero.
    pub fn new() -> Trip {
        Trip::default()
    }

    /// Restores the counters from a [`Blob::Distance`] record.
    pub fn from_blob(blob: &[u8]) -> Trip {
        let mut word = [0u8; 4];
        word.copy_from_slice(&blob[0..4]);
        let trip1 = u32::from_le_bytes(word);
        word.copy_from_slice(&blob[4..8]);
        let trip2 = u32::from_le_bytes(word);
        word.copy_from_slice(&blob[8..12]);
        let total = u32::from_le_bytes(word);
        Trip {
            trip1,
            trip2,
            total,
            last_distance: 0,
        }
    }

    /// Serializes for [`Blob::Distance`].
    pub fn to_blob(&self) -> [u8; Blob::Distance.size()] {
        let mut blob = [0u8; Blob::Distance.size()];
        blob[0..4].copy_from_slice(&self.trip1.to_le_bytes());
        blob[4..8].copy_from_slice(&self.trip2.to_le_bytes());
        blob[8..12].copy_from_slice(&self.total.to_le_bytes());
        blob
    }

    /// Consumes a distance-since-power-on report from the motor.
    pub fn distance_update(&mut self, distance: u32) {
        let delta = if distance >= self.last_distance {
            distance - self.last_distance
        } else {
            // Motor reset; everything it has counted since is new.
            distance
        };
        self.trip1 = self.trip1.saturating_add(delta);
        self.trip2 = self.trip2.saturating_add(delta);
        self.total = self.total.saturating_add(delta);
        self.last_distance = distance;
    }

    /// Trip 1 in 10 m units.
    pub fn trip1(&self) -> u32 {
        self.trip1
    }

    /// Trip 2 in 10 m units.
    pub fn trip2(&self) -> u32 {
        self.trip2
    }

    /// Lifetime total in 10 m units.
    pub fn total(&self) -> u32 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_deltas() {
        let mut trip = Trip::new();
        trip.distance_update(500);
        trip.distance_update(800);
        assert_eq!(trip.total(), 800);
        assert_eq!(trip.trip1(), 800);
        assert_eq!(trip.trip2(), 800);
    }

    #[test]
    fn survives_a_motor_reset() {
        let mut trip = Trip::new();
        trip.distance_update(500);
        trip.distance_update(800);
        trip.distance_update(50);
        assert_eq!(trip.total(), 850);
        assert_eq!(trip.last_distance, 50);
    }

    #[test]
    fn counters_never_decrease() {
        let mut trip = Trip::new();
        let reports = [0u32, 10, 250, 250, 3, 0, 900, 1, 1, 40_000, 2];
        let mut previous = (0, 0, 0);
        for &report in &reports {
            trip.distance_update(report);
            let now = (trip.trip1(), trip.trip2(), trip.total());
            assert!(now.0 >= previous.0 && now.1 >= previous.1 && now.2 >= previous.2);
            assert!(trip.total() >= trip.trip1());
            assert!(trip.total() >= trip.trip2());
            previous = now;
        }
    }

    #[test]
    fn blob_round_trip_drops_last_distance() {
        let mut trip = Trip::new();
        trip.distance_update(123);
        let restored = Trip::from_blob(&trip.to_blob());
        assert_eq!(restored.trip1(), 123);
        assert_eq!(restored.total(), 123);
        // A fresh boot pairs with a freshly reset motor counter.
        assert_eq!(restored.last_distance, 0);
    }
}
