use std::sync::Arc;

use log::{error, warn};

use crate::codec::Repacker;
use crate::iface::Interface;
use crate::packet_view::{Direction, PacketView};

/// The two interfaces the proxy sits between, plus the repacker every
/// outgoing rewritten frame goes through.
pub struct Bridge {
    forward: Arc<dyn Interface>,
    backward: Arc<dyn Interface>,
    repacker: Repacker,
}

impl Bridge {
    pub fn new(forward: Arc<dyn Interface>, backward: Arc<dyn Interface>) -> Self {
        Self {
            forward,
            backward,
            repacker: Repacker::new(),
        }
    }

    /// The interface that receives `dir` traffic.
    pub fn iface(&self, dir: Direction) -> &Arc<dyn Interface> {
        match dir {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    /// Relays a frame byte for byte.
    pub fn forward_raw(&self, view: &PacketView) -> bool {
        self.send_frame(view.snd(), view.as_bytes(), false)
    }

    pub fn send_frame(&self, slot: Direction, frame: &[u8], allow_drop: bool) -> bool {
        let iface = self.iface(slot);
        let sent = iface.send(frame, allow_drop);
        if !sent && !allow_drop {
            warn!("{}: frame of {} bytes not sent", iface.name(), frame.len());
        }
        sent
    }

    /// Fixes lengths and checksums, then transmits.
    pub fn repack_and_send(&self, view: PacketView, allow_drop: bool) -> bool {
        let payload = view.ip_payload();
        match self.repacker.repack(view, payload) {
            Some(view) => self.send_frame(view.snd(), view.as_bytes(), allow_drop),
            None => {
                error!("repack failed, frame dropped");
                false
            }
        }
    }
}
