use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeDelta};
use log::{info, trace};
use parking_lot::Mutex;

use crate::flow_key::FlowKey;
use crate::iface::Bridge;
use crate::modifier::{Modifier, ModifierPipeline, Verdict};
use crate::packet_view::{Direction, PacketView};
use crate::rule::{Proto, Rule};

mod half;
mod state;
mod table;

pub use half::{ConnectionHalf, Observation, Segment};
pub use state::{ProtocolState, StateFilter};
pub use table::ConnectionTable;

/// Counters and state of one connection, shared with its injectors.
#[derive(Debug, Clone)]
pub struct Tracking {
    /// Half whose segments arrive on the forward interface.
    pub fwd: ConnectionHalf,
    pub rev: ConnectionHalf,
    pub total_pkts: u64,
    pub total_bytes: u64,
    pub state: ProtocolState,
    pub print: bool,
    pub started: Option<DateTime<Local>>,
    pub last_data: Option<DateTime<Local>>,
}

impl Tracking {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self {
            fwd: ConnectionHalf::new(src),
            rev: ConnectionHalf::new(dst),
            total_pkts: 0,
            total_bytes: 0,
            state: ProtocolState::Unknown,
            print: false,
            started: None,
            last_data: None,
        }
    }

    /// `(sender, receiver)` halves for a packet travelling in `dir`.
    pub fn halves(&self, dir: Direction) -> (&ConnectionHalf, &ConnectionHalf) {
        match dir {
            Direction::Forward => (&self.fwd, &self.rev),
            Direction::Backward => (&self.rev, &self.fwd),
        }
    }

    pub fn halves_mut(&mut self, dir: Direction) -> (&mut ConnectionHalf, &mut ConnectionHalf) {
        match dir {
            Direction::Forward => (&mut self.fwd, &mut self.rev),
            Direction::Backward => (&mut self.rev, &mut self.fwd),
        }
    }

    pub fn addresses_known(&self) -> bool {
        self.fwd.has_address() && self.rev.has_address()
    }

    /// Time between the opening SYN and the last data segment.
    pub fn elapsed(&self) -> TimeDelta {
        match (self.started, self.last_data) {
            (Some(start), Some(end)) if end > start => end - start,
            _ => TimeDelta::zero(),
        }
    }

    fn learn(&mut self, syn: &PacketView) {
        let (src, dst) = self.halves_mut(syn.dir());
        src.ip = syn.ip_src();
        src.mac = syn.mac_src();
        src.port = syn.src_port();
        dst.ip = syn.ip_dst();
        dst.mac = syn.mac_dst();
        dst.port = syn.dst_port();
        self.started = Some(syn.captured_at());
    }
}

/// One-line view of a connection for the periodic summary.
#[derive(Debug, Clone)]
pub struct ConnectionSummary {
    pub key: FlowKey,
    pub state: ProtocolState,
    pub pkts: u64,
    pub bytes: u64,
    pub modifiers: usize,
}

// ==========================================
// 单条连接：跟踪状态 + 修改器流水线
// ==========================================
pub struct Connection {
    key: FlowKey,
    proto: Proto,
    tracking: Arc<Mutex<Tracking>>,
    pipeline: Mutex<ModifierPipeline>,
}

impl Connection {
    pub fn new(key: FlowKey, proto: Proto) -> Self {
        Self {
            key,
            proto,
            tracking: Arc::new(Mutex::new(Tracking::new(key.src, key.dst))),
            pipeline: Mutex::new(ModifierPipeline::new()),
        }
    }

    pub fn key(&self) -> FlowKey {
        self.key
    }

    pub fn proto(&self) -> Proto {
        self.proto
    }

    pub fn tracking(&self) -> &Arc<Mutex<Tracking>> {
        &self.tracking
    }

    /// Tracks one packet and decides what goes on the wire.
    ///
    /// Locks the pipeline, then the tracking state; injector threads only
    /// ever take the latter.
    pub fn new_packet(&self, view: PacketView) -> Verdict {
        let mut pipeline = self.pipeline.lock();
        let mut guard = self.tracking.lock();
        let t = &mut *guard;
        let dir = view.dir();

        if t.halves(dir).1.port == 0 {
            if !view.is_syn() {
                return Verdict::Forward(view);
            }
            t.learn(&view);
        }
        {
            let (src, dst) = t.halves(dir);
            if view.src_port() != src.port || view.dst_port() != dst.port {
                trace!(
                    "{}: ports {} -> {} do not match tracked flow",
                    self.key.src,
                    view.src_port(),
                    view.dst_port()
                );
                return Verdict::Forward(view);
            }
        }

        let seg = Segment::from(&view);
        let prior = t.halves(dir).0.clone();
        let observed = t.halves_mut(dir).0.update(&seg);
        t.total_pkts += 1;
        if seg.payload_len > 0 {
            t.total_bytes += seg.payload_len as u64;
            t.last_data = Some(view.captured_at());
        }
        match observed {
            Observation::Opening => t.state = ProtocolState::Init,
            Observation::Closing => t.state = ProtocolState::End,
            Observation::Tracked { .. } => {}
        }

        if t.print {
            info!(
                "{} #{}: {}:{} -> {}:{}, seq: {}, ack: {}",
                view.captured_at().format("%H:%M:%S%.6f"),
                t.total_pkts,
                view.ip_src(),
                view.src_port(),
                view.ip_dst(),
                view.dst_port(),
                view.seq(),
                view.ack()
            );
        }

        if !view.is_pure_ack() {
            return Verdict::Forward(view);
        }
        pipeline.run(view, t, &prior)
    }

    pub fn install(&self, rule: Rule, bridge: &Arc<Bridge>) {
        let modifier = Modifier::build(rule, &self.tracking, bridge);
        self.pipeline.lock().install(modifier);
    }

    /// Removes every modifier: injectors are stopped and joined, queued
    /// bursts are returned for transmission.
    pub fn clear(&self) -> Vec<PacketView> {
        let removed = self.pipeline.lock().take();
        let mut flushed = Vec::new();
        for m in removed {
            m.retire(&mut flushed);
        }
        let mut t = self.tracking.lock();
        t.fwd.reset_baselines();
        t.rev.reset_baselines();
        flushed
    }

    pub fn set_print(&self, on: bool) {
        self.tracking.lock().print = on;
    }

    pub fn set_state(&self, state: ProtocolState) {
        self.tracking.lock().state = state;
    }

    pub fn elapsed_and_bytes(&self) -> (TimeDelta, u64) {
        let t = self.tracking.lock();
        (t.elapsed(), t.total_bytes)
    }

    pub fn summary(&self) -> ConnectionSummary {
        let modifiers = self.pipeline.lock().len();
        let t = self.tracking.lock();
        ConnectionSummary {
            key: self.key,
            state: t.state,
            pkts: t.total_pkts,
            bytes: t.total_bytes,
            modifiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::header::{TCP_ACK, TCP_FIN, TCP_SYN};
    use crate::codec::testutil::{MAC_A, MAC_B, frame, pure_ack};
    use crate::iface::memory::MemoryInterface;
    use crate::injector::{InjectionJob, SeqAckMethod};
    use crate::modifier::Window;
    use crate::rule::Action;

    fn conn() -> Connection {
        Connection::new(
            FlowKey::new(Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8)),
            Proto::Tcp,
        )
    }

    fn open(c: &Connection) {
        c.new_packet(frame(Direction::Forward, 100, 0, TCP_SYN, &[]));
        c.new_packet(frame(Direction::Backward, 900, 101, TCP_SYN | TCP_ACK, &[]));
        c.new_packet(pure_ack(Direction::Forward, 101, 901));
    }

    #[test]
    fn packets_before_syn_pass_untracked() {
        let c = conn();
        assert!(matches!(
            c.new_packet(pure_ack(Direction::Forward, 1, 2)),
            Verdict::Forward(_)
        ));
        assert_eq!(c.tracking().lock().total_pkts, 0);
    }

    #[test]
    fn handshake_learns_both_halves() {
        let c = conn();
        open(&c);
        let t = c.tracking().lock();
        assert_eq!(t.fwd.port, 1000);
        assert_eq!(t.fwd.mac, MAC_A);
        assert_eq!(t.rev.port, 80);
        assert_eq!(t.rev.mac, MAC_B);
        assert_eq!(t.fwd.initial_seq, 100);
        assert_eq!(t.rev.initial_seq, 900);
        assert_eq!(t.fwd.high_ack, 901);
        assert_eq!(t.total_pkts, 3);
        assert_eq!(t.state, ProtocolState::Init);
        assert!(t.addresses_known());
        assert!(t.started.is_some());
    }

    #[test]
    fn data_counts_bytes_and_fin_ends() {
        let c = conn();
        open(&c);
        c.new_packet(frame(Direction::Backward, 901, 101, TCP_ACK, &[7u8; 50]));
        let (_, bytes) = c.elapsed_and_bytes();
        assert_eq!(bytes, 50);
        assert_eq!(c.tracking().lock().rev.high_seq, 950);

        c.new_packet(frame(Direction::Forward, 101, 951, TCP_FIN | TCP_ACK, &[]));
        assert_eq!(c.tracking().lock().state, ProtocolState::End);
    }

    #[test]
    fn mismatched_ports_are_ignored() {
        let c = conn();
        open(&c);
        let mut other = frame(Direction::Forward, 101, 901, TCP_ACK, &[]);
        let (buf, layers) = other.parts_mut();
        buf[layers.tcp..layers.tcp + 2].copy_from_slice(&2000u16.to_be_bytes());
        assert!(matches!(c.new_packet(other), Verdict::Forward(_)));
        assert_eq!(c.tracking().lock().total_pkts, 3);
    }

    #[test]
    fn clear_removes_modifiers() {
        let (bridge, _, _) = MemoryInterface::bridge();
        let c = conn();
        open(&c);
        c.install(
            Rule {
                window: Window::default(),
                action: Action::Burst { size: 10 },
            },
            &bridge,
        );
        assert!(matches!(
            c.new_packet(pure_ack(Direction::Forward, 101, 950)),
            Verdict::Suppress
        ));
        assert_eq!(c.summary().modifiers, 1);

        let flushed = c.clear();
        assert_eq!(flushed.len(), 1);
        assert_eq!(c.summary().modifiers, 0);
        assert!(matches!(
            c.new_packet(pure_ack(Direction::Forward, 101, 960)),
            Verdict::Forward(_)
        ));
    }

    #[test]
    fn clear_stops_running_injectors() {
        use std::thread;
        use std::time::{Duration, Instant};

        let (bridge, _fwd, back) = MemoryInterface::bridge();
        let c = conn();
        open(&c);
        c.install(
            Rule {
                window: Window::default(),
                action: Action::Inject(InjectionJob {
                    addressing: None,
                    flags: TCP_ACK,
                    window: 0,
                    seq: 0,
                    ack: 0,
                    method: SeqAckMethod::Relative,
                    freq_ms: 1,
                    max_packets: None,
                    dir: Direction::Backward,
                }),
            },
            &bridge,
        );
        let deadline = Instant::now() + Duration::from_secs(5);
        while back.sent().len() < 3 {
            assert!(Instant::now() < deadline, "injector never sent");
            thread::sleep(Duration::from_millis(1));
        }

        assert!(c.clear().is_empty());
        assert_eq!(c.summary().modifiers, 0);
        let sent = back.sent().len();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(back.sent().len(), sent);
    }
}
