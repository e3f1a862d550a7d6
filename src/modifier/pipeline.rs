use log::debug;

use crate::connection::{ConnectionHalf, Tracking};
use crate::modifier::{AckEffect, Group, Modifier, Policy, Verdict};
use crate::packet_view::PacketView;

// ==========================================
// 修改器流水线
// 第一组改写 ack 号，第二组决定包的去留
// ==========================================
#[derive(Default)]
pub struct ModifierPipeline {
    ack_rewrites: Vec<Modifier>,
    dispositions: Vec<Modifier>,
}

impl ModifierPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, modifier: Modifier) {
        debug!("pipeline: installing {}", modifier.policy.name());
        match modifier.policy.group() {
            Group::AckRewrite => self.ack_rewrites.push(modifier),
            Group::Disposition => self.dispositions.push(modifier),
        }
    }

    pub fn len(&self) -> usize {
        self.ack_rewrites.len() + self.dispositions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the pipeline, handing the modifiers to the caller to retire.
    pub fn take(&mut self) -> Vec<Modifier> {
        let mut all = std::mem::take(&mut self.ack_rewrites);
        all.append(&mut self.dispositions);
        all
    }

    /// Runs a pure ACK through every modifier, in install order within each
    /// group. `tracking` already includes this packet; `prior` is the
    /// sender's half as it was before.
    pub fn run(
        &mut self,
        mut view: PacketView,
        tracking: &mut Tracking,
        prior: &ConnectionHalf,
    ) -> Verdict {
        let count = tracking.total_pkts;
        let state = tracking.state;
        let dir = view.dir();
        let mut flushed = Vec::new();
        let mut rewritten = false;
        let mut dropped = false;

        for m in &mut self.ack_rewrites {
            if !m.poll(count, state, &mut flushed) || dropped {
                continue;
            }
            let (src, dst) = tracking.halves_mut(dir);
            let effect = match &mut m.policy {
                Policy::PreAck(p) => p.effect(view.ack(), src, dst),
                Policy::Renege(r) => r.effect(view.ack(), src),
                Policy::LimitAck(l) => l.effect(dir, src),
                _ => AckEffect::Keep,
            };
            match effect {
                AckEffect::Keep => {}
                AckEffect::Rewrite {
                    ack,
                    save,
                    advance_high_ack,
                } => {
                    view.set_ack(ack);
                    if let Some(save) = save {
                        save.commit(src);
                    }
                    if advance_high_ack {
                        src.high_ack = ack;
                    }
                    rewritten = true;
                }
                AckEffect::Drop => {
                    debug!("{}: ack {} dropped", m.policy.name(), view.ack());
                    dropped = true;
                }
            }
        }

        let mut held = if dropped { None } else { Some(view) };
        let mut consumed = None;
        for m in &mut self.dispositions {
            if !m.poll(count, state, &mut flushed) {
                continue;
            }
            let Some(pkt) = held.take() else {
                continue;
            };
            let verdict = match &mut m.policy {
                Policy::Division(d) => d.apply(pkt, prior),
                Policy::Duplication(d) => d.apply(pkt),
                Policy::Burst(b) => b.apply(pkt),
                Policy::Drop(d) => d.apply(pkt),
                _ => Verdict::Forward(pkt),
            };
            match verdict {
                Verdict::Forward(pkt) => held = Some(pkt),
                Verdict::Rewritten(pkt) => {
                    rewritten = true;
                    held = Some(pkt);
                }
                other => consumed = Some(other),
            }
        }

        let verdict = match (held, consumed) {
            (Some(pkt), _) if rewritten => Verdict::Rewritten(pkt),
            (Some(pkt), _) => Verdict::Forward(pkt),
            (None, Some(v)) => v,
            (None, None) => Verdict::Suppress,
        };
        verdict.after_flush(flushed)
    }
}
