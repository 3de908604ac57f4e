//! Display façade: translates controller state into the screen push for
//! whichever head-unit is on the bus.

use crate::cu2;
use crate::cu3;
use crate::message::cmd;

/// Which display head-unit a build talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    /// The segment display with battery-polled buttons.
    Cu2,
    /// The dot-matrix display.
    Cu3,
    /// No display on the bus.
    None,
}

/// Everything a screen push needs from the controller.
#[derive(Debug, Clone, Copy)]
pub(crate) struct View {
    pub display_on: bool,
    pub charging: bool,
    pub level: u8,
    pub light_on: bool,
    pub speed: u16,
    pub trip1: u32,
    pub trip2: u32,
    pub bat_percentage: u8,
}

/// A ready-to-send display command.
pub(crate) struct Push {
    pub command: u8,
    pub payload_len: usize,
    payload: [u8; 13],
}

impl Push {
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len]
    }
}

/// Builds the screen push for `kind`, or `None` for display-less builds.
pub(crate) fn state_update(kind: DisplayKind, view: &View) -> Option<Push> {
    match kind {
        DisplayKind::Cu2 => {
            let update = cu2::Update::riding(
                view.level,
                view.light_on,
                view.speed,
                view.trip1,
                view.bat_percentage,
            );
            let mut payload = [0u8; 13];
            payload[..9].copy_from_slice(&update.encode());
            Some(Push {
                command: update.command(),
                payload_len: 9,
                payload,
            })
        }
        DisplayKind::Cu3 => {
            let screen_type = if view.charging {
                cu3::Screen::BatteryCharging
            } else {
                cu3::Screen::Riding
            };
            Some(Push {
                command: cmd::DISPLAY_UPDATE_CU3,
                payload_len: 13,
                payload: cu3::update_payload(
                    screen_type,
                    view.display_on,
                    view.light_on,
                    false,
                    view.level,
                    view.speed,
                    view.trip1,
                    view.trip2,
                ),
            })
        }
        DisplayKind::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> View {
        View {
            display_on: true,
            charging: false,
            level: 1,
            light_on: false,
            speed: 180,
            trip1: 42,
            trip2: 1042,
            bat_percentage: 60,
        }
    }

    #[test]
    fn no_display_pushes_nothing() {
        assert!(state_update(DisplayKind::None, &view()).is_none());
    }

    #[test]
    fn cu3_push_carries_both_trips() {
        let push = state_update(DisplayKind::Cu3, &view()).unwrap();
        assert_eq!(push.command, cmd::DISPLAY_UPDATE_CU3);
        assert_eq!(push.payload().len(), 13);
        assert_eq!(&push.payload()[5..9], &42u32.to_be_bytes());
        assert_eq!(&push.payload()[9..13], &1042u32.to_be_bytes());
    }

    #[test]
    fn charging_selects_the_battery_screen() {
        let mut charging = view();
        charging.charging = true;
        let push = state_update(DisplayKind::Cu3, &charging).unwrap();
        assert_eq!(push.payload()[0], cu3::Screen::BatteryCharging as u8);
    }

    #[test]
    fn cu2_push_is_nine_bytes() {
        let push = state_update(DisplayKind::Cu2, &view()).unwrap();
        assert_eq!(push.command, cmd::DISPLAY_UPDATE_CU2);
        assert_eq!(push.payload().len(), 9);
        assert_eq!(push.payload()[3], 60);
    }
}
