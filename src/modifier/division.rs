use log::{debug, warn};

use crate::connection::ConnectionHalf;
use crate::modifier::Verdict;
use crate::packet_view::PacketView;
use crate::seq;

/// Larger ack advances are left alone; they almost always mean the tracked
/// state is out of sync.
pub const MAX_DIVISION_SPAN: u32 = 2_000_000;

// ==========================================
// ACK 分割：一个大 ack 拆成很多小 ack
// ==========================================
#[derive(Debug, Clone)]
pub struct Division {
    bytes_per_chunk: u32,
}

impl Division {
    /// `bytes_per_chunk` is validated non-zero by the rule parser.
    pub fn new(bytes_per_chunk: u32) -> Self {
        Self {
            bytes_per_chunk: bytes_per_chunk.max(1),
        }
    }

    /// `prior` is the sender's half as it was before this packet was tracked.
    pub fn apply(&self, view: PacketView, prior: &ConnectionHalf) -> Verdict {
        let ack = view.ack();
        if !prior.have_initial_ack {
            debug!("division: no ack baseline yet");
            return Verdict::Forward(view);
        }
        if seq::before_eq(ack, prior.high_ack) {
            return Verdict::Forward(view);
        }
        let span = seq::distance(prior.high_ack, ack);
        if span > MAX_DIVISION_SPAN {
            warn!(
                "division: ack advance of {} bytes ({} -> {}) exceeds {}, forwarding",
                span, prior.high_ack, ack, MAX_DIVISION_SPAN
            );
            return Verdict::Forward(view);
        }

        let chunks = span.div_ceil(self.bytes_per_chunk) as usize;
        let mut out = Vec::with_capacity(chunks);
        let mut next = prior.high_ack;
        let mut left = span;
        while left > 0 {
            let step = left.min(self.bytes_per_chunk);
            next = next.wrapping_add(step);
            left -= step;
            let mut part = view.clone();
            part.set_ack(next);
            out.push(part);
        }
        Verdict::FanOut(out)
    }
}
