use crate::connection::ConnectionHalf;
use crate::modifier::{AckEffect, SavedAck};
use crate::seq;

/// How a pre-ack computes the acknowledgment it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreAckMethod {
    /// `ack + amount`, capped one past the peer's highest sequence byte.
    Clamped = 0,
    /// Like `Clamped`, but keeps walking from the last claimed value.
    Cumulative = 1,
    /// Trails the peer's high sequence, creeping up one byte per ack.
    Trailing = 2,
    /// Acks everything the peer sent once, drops repeats of that ack.
    DropRepeats = 3,
    /// Always acks one past the peer's highest sequence byte.
    Optimistic = 4,
}

impl PreAckMethod {
    pub fn from_code(code: u32) -> Option<Self> {
        let m = match code {
            0 => PreAckMethod::Clamped,
            1 => PreAckMethod::Cumulative,
            2 => PreAckMethod::Trailing,
            3 => PreAckMethod::DropRepeats,
            4 => PreAckMethod::Optimistic,
            _ => return None,
        };
        Some(m)
    }
}

const TRAIL_GAP: u32 = 100;

// ==========================================
// 抢先确认：ack 尚未收到的数据
// ==========================================
#[derive(Debug, Clone)]
pub struct PreAck {
    amount: u32,
    method: PreAckMethod,
}

impl PreAck {
    pub fn new(amount: u32, method: PreAckMethod) -> Self {
        Self { amount, method }
    }

    /// `src` sent the ack, `dst` is the peer whose data it acknowledges.
    pub fn effect(&self, ack: u32, src: &ConnectionHalf, dst: &ConnectionHalf) -> AckEffect {
        let top = dst.high_seq.wrapping_add(1);
        let new_ack = match self.method {
            PreAckMethod::Clamped => clamp(ack.wrapping_add(self.amount), dst.high_seq),
            PreAckMethod::Cumulative => {
                let base = src.preack_save.unwrap_or(ack);
                let claimed = clamp(base.wrapping_add(self.amount), dst.high_seq);
                return rewrite(claimed, Some(SavedAck::PreAck(claimed)));
            }
            PreAckMethod::Trailing => {
                if !dst.have_initial_seq {
                    return AckEffect::Keep;
                }
                let trail = dst.high_seq.wrapping_sub(TRAIL_GAP);
                let claimed = match src.preack_save {
                    None => top,
                    Some(_) if ack == top => top,
                    Some(prev) if seq::after(trail, prev) => trail,
                    Some(prev) if seq::after(prev, dst.high_seq) => top,
                    Some(prev) => prev.wrapping_add(1),
                };
                return rewrite(claimed, Some(SavedAck::PreAck(claimed)));
            }
            PreAckMethod::DropRepeats => {
                if !dst.have_initial_seq {
                    return AckEffect::Keep;
                }
                if src.preack_save == Some(dst.high_seq) {
                    return AckEffect::Drop;
                }
                return rewrite(top, Some(SavedAck::PreAck(dst.high_seq)));
            }
            PreAckMethod::Optimistic => {
                if !dst.have_initial_seq {
                    return AckEffect::Keep;
                }
                top
            }
        };
        rewrite(new_ack, None)
    }
}

fn clamp(claimed: u32, high_seq: u32) -> u32 {
    if seq::after(claimed, high_seq) {
        high_seq.wrapping_add(1)
    } else {
        claimed
    }
}

fn rewrite(ack: u32, save: Option<SavedAck>) -> AckEffect {
    AckEffect::Rewrite {
        ack,
        save,
        advance_high_ack: true,
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn halves(peer_high_seq: u32) -> (ConnectionHalf, ConnectionHalf) {
        let src = ConnectionHalf::new(Ipv4Addr::new(1, 2, 3, 4));
        let mut dst = ConnectionHalf::new(Ipv4Addr::new(5, 6, 7, 8));
        dst.have_initial_seq = true;
        dst.high_seq = peer_high_seq;
        (src, dst)
    }

    fn acked(effect: AckEffect) -> u32 {
        match effect {
            AckEffect::Rewrite { ack, .. } => ack,
            other => panic!("expected rewrite, got {other:?}"),
        }
    }

    #[test]
    fn clamped_caps_at_peer_high_seq() {
        let (src, dst) = halves(5000);
        let p = PreAck::new(1000, PreAckMethod::Clamped);
        assert_eq!(acked(p.effect(3000, &src, &dst)), 4000);
        assert_eq!(acked(p.effect(4500, &src, &dst)), 5001);
    }

    #[test]
    fn cumulative_walks_from_previous_claim() {
        let (mut src, dst) = halves(10_000);
        let p = PreAck::new(1000, PreAckMethod::Cumulative);
        let e = p.effect(3000, &src, &dst);
        assert_eq!(e, AckEffect::Rewrite {
            ack: 4000,
            save: Some(SavedAck::PreAck(4000)),
            advance_high_ack: true,
        });
        src.preack_save = Some(4000);
        assert_eq!(acked(p.effect(3000, &src, &dst)), 5000);
        src.preack_save = Some(9500);
        assert_eq!(acked(p.effect(3000, &src, &dst)), 10_001);
    }

    #[test]
    fn trailing_creeps_behind_high_seq() {
        let (mut src, dst) = halves(10_000);
        let p = PreAck::new(0, PreAckMethod::Trailing);
        assert_eq!(acked(p.effect(100, &src, &dst)), 10_001);

        src.preack_save = Some(5000);
        assert_eq!(acked(p.effect(100, &src, &dst)), 9900);

        src.preack_save = Some(9950);
        assert_eq!(acked(p.effect(100, &src, &dst)), 9951);

        src.preack_save = Some(10_500);
        assert_eq!(acked(p.effect(100, &src, &dst)), 10_001);
    }

    #[test]
    fn drop_repeats_forwards_once() {
        let (mut src, dst) = halves(7000);
        let p = PreAck::new(0, PreAckMethod::DropRepeats);
        assert_eq!(p.effect(10, &src, &dst), AckEffect::Rewrite {
            ack: 7001,
            save: Some(SavedAck::PreAck(7000)),
            advance_high_ack: true,
        });
        src.preack_save = Some(7000);
        assert_eq!(p.effect(10, &src, &dst), AckEffect::Drop);
    }

    #[test]
    fn sequence_dependent_methods_wait_for_peer_isn() {
        let src = ConnectionHalf::new(Ipv4Addr::new(1, 2, 3, 4));
        let dst = ConnectionHalf::new(Ipv4Addr::new(5, 6, 7, 8));
        for m in [
            PreAckMethod::Trailing,
            PreAckMethod::DropRepeats,
            PreAckMethod::Optimistic,
        ] {
            assert_eq!(PreAck::new(1, m).effect(10, &src, &dst), AckEffect::Keep);
        }
    }

    #[test]
    fn method_codes() {
        assert_eq!(PreAckMethod::from_code(4), Some(PreAckMethod::Optimistic));
        assert_eq!(PreAckMethod::from_code(5), None);
    }
}
