use std::collections::VecDeque;

use crate::modifier::Verdict;
use crate::packet_view::PacketView;

// ==========================================
// 攒批：收满 size 个 ack 再一起放出
// ==========================================
#[derive(Debug)]
pub struct Burst {
    size: usize,
    pending: VecDeque<PacketView>,
}

impl Burst {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            pending: VecDeque::with_capacity(size),
        }
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    pub fn apply(&mut self, view: PacketView) -> Verdict {
        self.pending.push_back(view);
        if self.pending.len() >= self.size {
            Verdict::FanOut(self.flush())
        } else {
            Verdict::Suppress
        }
    }

    /// Hands back everything still held, oldest first.
    pub fn flush(&mut self) -> Vec<PacketView> {
        self.pending.drain(..).collect()
    }
}
