use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::{ConnectionHalf, ProtocolState, StateFilter, Tracking};
use crate::iface::Bridge;
use crate::packet_view::PacketView;
use crate::rule::{Action, Rule};

mod burst;
mod division;
mod duplication;
mod inject;
mod limit_ack;
mod pipeline;
mod preack;
mod random_drop;
mod renege;

pub use burst::Burst;
pub use division::{Division, MAX_DIVISION_SPAN};
pub use duplication::Duplication;
pub use inject::Inject;
pub use limit_ack::LimitAck;
pub use pipeline::ModifierPipeline;
pub use preack::{PreAck, PreAckMethod};
pub use random_drop::RandomDrop;
pub use renege::{Renege, RenegeGrowth};

/// Packet-count interval and protocol state in which a modifier acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub start: u64,
    /// Exclusive; 0 leaves the window open.
    pub stop: u64,
    pub state: StateFilter,
}

impl Window {
    pub fn is_active(&self, count: u64, state: ProtocolState) -> bool {
        count >= self.start && (self.stop == 0 || count < self.stop) && self.state.matches(state)
    }
}

/// A baseline an ack policy wants stored in the sending half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedAck {
    PreAck(u32),
    Renege(u32),
    Limit(u32),
}

impl SavedAck {
    pub fn commit(self, half: &mut ConnectionHalf) {
        match self {
            SavedAck::PreAck(v) => half.preack_save = Some(v),
            SavedAck::Renege(v) => half.renege_save = Some(v),
            SavedAck::Limit(v) => half.limit_save = v,
        }
    }
}

/// What an ack-rewriting policy wants done with the current ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckEffect {
    Keep,
    Rewrite {
        ack: u32,
        save: Option<SavedAck>,
        /// Also raise the sender's high ack to the new value.
        advance_high_ack: bool,
    },
    Drop,
}

/// Outcome of a packet's trip through the engine.
#[derive(Debug)]
pub enum Verdict {
    /// Relay the original bytes.
    Forward(PacketView),
    /// Headers changed; repack before relaying.
    Rewritten(PacketView),
    Suppress,
    /// Several packets, each repacked and sent best effort.
    FanOut(Vec<PacketView>),
}

impl Verdict {
    /// Puts `flushed` on the wire ahead of whatever this verdict sends.
    pub fn after_flush(self, mut flushed: Vec<PacketView>) -> Verdict {
        if flushed.is_empty() {
            return self;
        }
        match self {
            Verdict::Forward(v) | Verdict::Rewritten(v) => flushed.push(v),
            Verdict::Suppress => {}
            Verdict::FanOut(vs) => flushed.extend(vs),
        }
        Verdict::FanOut(flushed)
    }

    pub fn into_packets(self) -> Vec<PacketView> {
        match self {
            Verdict::Forward(v) | Verdict::Rewritten(v) => vec![v],
            Verdict::Suppress => Vec::new(),
            Verdict::FanOut(vs) => vs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// Rewrites the ack number in place.
    AckRewrite,
    /// Consumes or multiplies the packet.
    Disposition,
}

pub enum Policy {
    PreAck(PreAck),
    Renege(Renege),
    LimitAck(LimitAck),
    Division(Division),
    Duplication(Duplication),
    Burst(Burst),
    Drop(RandomDrop),
    Inject(Inject),
}

impl Policy {
    pub fn name(&self) -> &'static str {
        match self {
            Policy::PreAck(_) => "PREACK",
            Policy::Renege(_) => "RENEGE",
            Policy::LimitAck(_) => "LIMITACK",
            Policy::Division(_) => "DIV",
            Policy::Duplication(_) => "DUP",
            Policy::Burst(_) => "BURST",
            Policy::Drop(_) => "DROP",
            Policy::Inject(_) => "INJECT",
        }
    }

    pub fn group(&self) -> Group {
        match self {
            Policy::PreAck(_) | Policy::Renege(_) | Policy::LimitAck(_) => Group::AckRewrite,
            _ => Group::Disposition,
        }
    }
}

// ==========================================
// 修改器 = 生效窗口 + 策略
// ==========================================
pub struct Modifier {
    pub window: Window,
    pub policy: Policy,
}

impl Modifier {
    pub fn new(window: Window, policy: Policy) -> Self {
        Self { window, policy }
    }

    /// Turns a parsed rule into a modifier bound to one connection. An
    /// inject whose window starts at zero begins sending right away.
    pub fn build(rule: Rule, tracking: &Arc<Mutex<Tracking>>, bridge: &Arc<Bridge>) -> Self {
        let policy = match rule.action {
            Action::PreAck { amount, method } => Policy::PreAck(PreAck::new(amount, method)),
            Action::Renege { amount, growth } => Policy::Renege(Renege::new(amount, growth)),
            Action::LimitAck => Policy::LimitAck(LimitAck::new()),
            Action::Division { bytes_per_chunk } => {
                Policy::Division(Division::new(bytes_per_chunk))
            }
            Action::Duplication { copies } => Policy::Duplication(Duplication::new(copies)),
            Action::Burst { size } => Policy::Burst(Burst::new(size)),
            Action::Drop { percent } => Policy::Drop(RandomDrop::new(percent)),
            Action::Inject(job) => {
                let mut inject = Inject::new(job, Arc::clone(tracking), Arc::clone(bridge));
                if rule.window.start == 0 {
                    inject.set_active(true);
                }
                Policy::Inject(inject)
            }
        };
        Modifier::new(rule.window, policy)
    }

    /// Evaluates the window for this packet and runs the deactivation
    /// hooks. Burst packets released by a closing window land in `flushed`.
    pub fn poll(
        &mut self,
        count: u64,
        state: ProtocolState,
        flushed: &mut Vec<PacketView>,
    ) -> bool {
        let active = self.window.is_active(count, state);
        match &mut self.policy {
            Policy::LimitAck(l) if !active => l.release(),
            Policy::Burst(b) if !active => flushed.extend(b.flush()),
            Policy::Inject(i) => i.set_active(active),
            _ => {}
        }
        active
    }

    /// Tears the modifier down. Injector threads are stopped and joined, so
    /// this must not run under the connection locks.
    pub fn retire(self, flushed: &mut Vec<PacketView>) {
        match self.policy {
            Policy::Burst(mut b) => flushed.extend(b.flush()),
            Policy::Inject(i) => i.shutdown(),
            _ => {}
        }
    }
}
