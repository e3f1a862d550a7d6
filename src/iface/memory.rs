use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::iface::{Bridge, Interface};

/// In-process interface: records what is sent, replays queued frames.
#[derive(Default)]
pub struct MemoryInterface {
    name: String,
    sent: Mutex<Vec<(Vec<u8>, bool)>>,
    inbox: Mutex<VecDeque<Vec<u8>>>,
}

impl MemoryInterface {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// A bridge over two fresh memory interfaces, returned alongside it.
    pub fn bridge() -> (Arc<Bridge>, Arc<MemoryInterface>, Arc<MemoryInterface>) {
        let fwd = Arc::new(MemoryInterface::new("mem0"));
        let back = Arc::new(MemoryInterface::new("mem1"));
        let bridge = Arc::new(Bridge::new(fwd.clone(), back.clone()));
        (bridge, fwd, back)
    }

    pub fn push(&self, frame: Vec<u8>) {
        self.inbox.lock().push_back(frame);
    }

    /// Frames sent so far with their `allow_drop` flag.
    pub fn sent(&self) -> Vec<(Vec<u8>, bool)> {
        self.sent.lock().clone()
    }
}

impl Interface for MemoryInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, frame: &[u8], allow_drop: bool) -> bool {
        self.sent.lock().push((frame.to_vec(), allow_drop));
        true
    }

    fn receive(&self) -> Option<Vec<u8>> {
        self.inbox.lock().pop_front()
    }
}
