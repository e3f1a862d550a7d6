use crate::connection::ConnectionHalf;
use crate::modifier::{AckEffect, SavedAck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenegeGrowth {
    /// Every ack is pulled back by the same amount.
    Constant,
    /// Each ack is pulled back from the previous reneged value.
    Cumulative,
}

impl RenegeGrowth {
    pub fn from_code(code: u32) -> Self {
        if code == 1 {
            RenegeGrowth::Cumulative
        } else {
            RenegeGrowth::Constant
        }
    }
}

// ==========================================
// 反悔：把 ack 往回拉
// ==========================================
#[derive(Debug, Clone)]
pub struct Renege {
    amount: u32,
    growth: RenegeGrowth,
}

impl Renege {
    pub fn new(amount: u32, growth: RenegeGrowth) -> Self {
        Self { amount, growth }
    }

    pub fn effect(&self, ack: u32, src: &ConnectionHalf) -> AckEffect {
        match self.growth {
            RenegeGrowth::Constant => AckEffect::Rewrite {
                ack: ack.wrapping_sub(self.amount),
                save: None,
                advance_high_ack: false,
            },
            RenegeGrowth::Cumulative => {
                let base = src.renege_save.unwrap_or(ack);
                let reneged = base.wrapping_sub(self.amount);
                AckEffect::Rewrite {
                    ack: reneged,
                    save: Some(SavedAck::Renege(reneged)),
                    advance_high_ack: false,
                }
            }
        }
    }
}
