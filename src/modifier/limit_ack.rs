use crate::connection::ConnectionHalf;
use crate::modifier::{AckEffect, SavedAck};
use crate::packet_view::Direction;

fn slot(dir: Direction) -> usize {
    match dir {
        Direction::Forward => 0,
        Direction::Backward => 1,
    }
}

/// Pins every ack to the high ack its sender had when the window opened.
/// Each direction freezes on its own first pure ACK.
#[derive(Debug, Clone, Default)]
pub struct LimitAck {
    engaged: [bool; 2],
}

impl LimitAck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_engaged(&self, dir: Direction) -> bool {
        self.engaged[slot(dir)]
    }

    pub fn effect(&mut self, dir: Direction, src: &ConnectionHalf) -> AckEffect {
        let engaged = &mut self.engaged[slot(dir)];
        if !*engaged {
            *engaged = true;
            return AckEffect::Rewrite {
                ack: src.high_ack,
                save: Some(SavedAck::Limit(src.high_ack)),
                advance_high_ack: false,
            };
        }
        AckEffect::Rewrite {
            ack: src.limit_save,
            save: None,
            advance_high_ack: false,
        }
    }

    /// Called when the window closes; the next activation freezes anew.
    pub fn release(&mut self) {
        self.engaged = [false; 2];
    }
}
