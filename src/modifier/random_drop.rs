use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::modifier::Verdict;
use crate::packet_view::PacketView;

/// Drops acks at random; a draw from `0..100` at or below `percent` loses
/// the packet.
#[derive(Debug)]
pub struct RandomDrop {
    percent: u32,
    rng: StdRng,
}

impl RandomDrop {
    pub fn new(percent: u32) -> Self {
        Self {
            percent,
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    fn seeded(percent: u32, seed: u64) -> Self {
        Self {
            percent,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn apply(&mut self, view: PacketView) -> Verdict {
        let draw: u32 = self.rng.gen_range(0..100);
        if draw <= self.percent {
            trace!("drop: draw {} <= {}, ack {} lost", draw, self.percent, view.ack());
            Verdict::Suppress
        } else {
            Verdict::Forward(view)
        }
    }
}
