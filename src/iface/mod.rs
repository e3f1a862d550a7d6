use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use log::{error, info};

use crate::attacker::Attacker;
use crate::packet_view::Direction;

mod bridge;
#[cfg(test)]
pub(crate) mod memory;
mod raw_socket;

pub use bridge::Bridge;
pub use raw_socket::RawSocket;

/// A link the proxy can read whole Ethernet frames from and write them to.
pub trait Interface: Send + Sync {
    fn name(&self) -> &str;

    /// Transmits one frame. With `allow_drop` the frame may be discarded
    /// when the link is congested; otherwise the call retries until the
    /// kernel accepts it or the link fails.
    fn send(&self, frame: &[u8], allow_drop: bool) -> bool;

    /// Waits a short while for the next frame. `None` on timeout.
    fn receive(&self) -> Option<Vec<u8>>;

    /// False once the link has failed for good.
    fn is_open(&self) -> bool {
        true
    }
}

// ==========================================
// 接收线程：每个接口一个
// ==========================================
pub fn spawn_reception(
    attacker: Arc<Attacker>,
    dir: Direction,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let iface = Arc::clone(attacker.bridge().iface(dir));
    thread::Builder::new()
        .name(format!("rx-{}", iface.name()))
        .spawn(move || {
            info!("listening on {} ({:?})", iface.name(), dir);
            while running.load(Ordering::Relaxed) {
                if !iface.is_open() {
                    error!("{} failed, shutting down", iface.name());
                    running.store(false, Ordering::Relaxed);
                    break;
                }
                if let Some(frame) = iface.receive() {
                    attacker.handle_frame(frame, dir);
                }
            }
        })
}
