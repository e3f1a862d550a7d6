use crate::modifier::Verdict;
use crate::packet_view::PacketView;

/// Sends the ack plus `copies` identical duplicates.
#[derive(Debug, Clone)]
pub struct Duplication {
    copies: u32,
}

impl Duplication {
    pub fn new(copies: u32) -> Self {
        Self { copies }
    }

    pub fn apply(&self, view: PacketView) -> Verdict {
        let mut out = Vec::with_capacity(self.copies as usize + 1);
        for _ in 0..self.copies {
            out.push(view.clone());
        }
        out.push(view);
        Verdict::FanOut(out)
    }
}
