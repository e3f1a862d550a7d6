use std::sync::Arc;

use chrono::{DateTime, Local, TimeDelta};
use log::{info, trace};
use parking_lot::Mutex;

use crate::codec::parse_layers;
use crate::connection::ConnectionTable;
use crate::error::ParseError;
use crate::flow_key::FlowKey;
use crate::iface::Bridge;
use crate::modifier::Verdict;
use crate::packet_view::{Direction, PacketView, Provenance};
use crate::rule::{Command, ConnOp};

/// `sec.usec`, the way the control channel reports times.
fn format_time(secs: i64, micros: u32) -> String {
    format!("{}.{:06}", secs, micros)
}

fn format_delta(d: TimeDelta) -> String {
    format_time(d.num_seconds(), d.subsec_nanos().unsigned_abs() / 1000)
}

// ==========================================
// 全局上下文：连接表 + 网桥 + 最近一次收包时间
// ==========================================
pub struct Attacker {
    table: ConnectionTable,
    bridge: Arc<Bridge>,
    last_packet: Mutex<DateTime<Local>>,
}

impl Attacker {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self {
            table: ConnectionTable::new(),
            bridge,
            last_packet: Mutex::new(Local::now()),
        }
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    pub fn last_packet(&self) -> DateTime<Local> {
        *self.last_packet.lock()
    }

    /// Entry point for every frame heard on the `dir` interface.
    pub fn handle_frame(&self, frame: Vec<u8>, dir: Direction) {
        let provenance = Provenance::received(dir);
        *self.last_packet.lock() = provenance.captured_at;

        match parse_layers(&frame) {
            Ok(layers) => {
                let view = PacketView::from_parts(frame, layers, provenance);
                let verdict = self.process(view);
                self.dispatch(verdict);
            }
            Err(ParseError::Unsupported) => {
                self.bridge.send_frame(provenance.snd, &frame, false);
            }
            Err(e) => trace!("dropping {} byte frame: {}", frame.len(), e),
        }
    }

    /// Runs a TCP packet through its connection. A SYN creates the
    /// connection; anything else for an unknown pair is relayed as is.
    pub fn process(&self, view: PacketView) -> Verdict {
        let key = FlowKey::from(&view);
        let create = view.is_syn();
        self.table.with_connection(key, create, |conn| match conn {
            Some(conn) => conn.new_packet(view),
            None => Verdict::Forward(view),
        })
    }

    pub fn dispatch(&self, verdict: Verdict) {
        match verdict {
            Verdict::Forward(view) => {
                self.bridge.forward_raw(&view);
            }
            Verdict::Rewritten(view) => {
                self.bridge.repack_and_send(view, false);
            }
            Verdict::Suppress => {}
            Verdict::FanOut(views) => {
                for view in views {
                    self.bridge.repack_and_send(view, true);
                }
            }
        }
    }

    /// Carries out a control command, returning the reply body.
    pub fn execute(&self, cmd: Command) -> String {
        match cmd {
            Command::Active => {
                let last = self.last_packet();
                format!(
                    "{}\n",
                    format_time(last.timestamp(), last.timestamp_subsec_micros())
                )
            }
            Command::ClearAll => {
                let flushed = self.table.clear_all();
                self.dispatch(Verdict::FanOut(flushed));
                info!("all connections cleared");
                String::new()
            }
            Command::Connection { key, proto, op } => {
                self.table.install(key, proto, |conn| match op {
                    ConnOp::Install(rule) => {
                        info!(
                            "new rule installed: {} -> {} ({:?}), {} -> {}, {:?}",
                            key.src, key.dst, proto, rule.window.start, rule.window.stop, rule.action
                        );
                        conn.install(rule, &self.bridge);
                        String::new()
                    }
                    ConnOp::Print(on) => {
                        conn.set_print(on);
                        String::new()
                    }
                    ConnOp::Clear => {
                        let flushed = conn.clear();
                        self.dispatch(Verdict::FanOut(flushed));
                        info!("rules cleared for {} <-> {}", key.src, key.dst);
                        String::new()
                    }
                    ConnOp::Time => {
                        let (elapsed, bytes) = conn.elapsed_and_bytes();
                        format!("{}\n{}\n", format_delta(elapsed), bytes)
                    }
                    ConnOp::State(state) => {
                        conn.set_state(state);
                        String::new()
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::codec::header::{TCP_ACK, TCP_SYN};
    use crate::codec::testutil::{frame, pure_ack};
    use crate::connection::ProtocolState;
    use crate::iface::memory::MemoryInterface;
    use crate::rule::parse_command;

    const FLOW: &str = "1.2.3.4,5.6.7.8,TCP";

    fn run(attacker: &Attacker, line: &str) -> String {
        attacker.execute(parse_command(line).unwrap())
    }

    fn handshake(attacker: &Attacker) {
        for v in [
            frame(Direction::Forward, 100, 0, TCP_SYN, &[]),
            frame(Direction::Backward, 900, 101, TCP_SYN | TCP_ACK, &[]),
            pure_ack(Direction::Forward, 101, 901),
        ] {
            attacker.handle_frame(v.as_bytes().to_vec(), v.dir());
        }
    }

    fn acks(sent: &[(Vec<u8>, bool)]) -> Vec<u32> {
        sent.iter()
            .map(|(f, _)| {
                crate::codec::parse(f.clone(), Provenance::received(Direction::Forward))
                    .unwrap()
                    .ack()
            })
            .collect()
    }

    #[test]
    fn untouched_traffic_is_relayed() {
        let (bridge, fwd, back) = MemoryInterface::bridge();
        let attacker = Attacker::new(bridge);
        handshake(&attacker);
        assert_eq!(back.sent().len(), 2);
        assert_eq!(fwd.sent().len(), 1);
        assert_eq!(attacker.table().len(), 1);

        let mut arp = pure_ack(Direction::Forward, 1, 1).as_bytes().to_vec();
        arp[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        attacker.handle_frame(arp.clone(), Direction::Forward);
        assert_eq!(back.sent().last(), Some(&(arp, false)));

        attacker.handle_frame(vec![0u8; 10], Direction::Forward);
        assert_eq!(back.sent().len(), 3);

        let mut bad_version = pure_ack(Direction::Forward, 101, 901).as_bytes().to_vec();
        bad_version[14] = 0x65;
        attacker.handle_frame(bad_version, Direction::Forward);
        assert_eq!(back.sent().len(), 3);
    }

    #[test]
    fn drop_everything_rule_suppresses_acks() {
        let (bridge, _fwd, back) = MemoryInterface::bridge();
        let attacker = Attacker::new(bridge);
        handshake(&attacker);
        run(&attacker, &format!("{FLOW},0,0,*,DROP,p=100"));
        let before = back.sent().len();
        for ack in [1000, 2000, 3000] {
            let v = pure_ack(Direction::Forward, 101, ack);
            attacker.handle_frame(v.as_bytes().to_vec(), Direction::Forward);
        }
        assert_eq!(back.sent().len(), before);

        let data = frame(Direction::Forward, 101, 3000, TCP_ACK, b"payload");
        attacker.handle_frame(data.as_bytes().to_vec(), Direction::Forward);
        assert_eq!(back.sent().len(), before + 1);
    }

    #[test]
    fn division_splits_on_the_wire() {
        let (bridge, _fwd, back) = MemoryInterface::bridge();
        let attacker = Attacker::new(bridge);
        handshake(&attacker);
        let v = pure_ack(Direction::Forward, 101, 1000);
        attacker.handle_frame(v.as_bytes().to_vec(), Direction::Forward);
        run(&attacker, &format!("{FLOW},0,0,*,DIV,bpc=100"));

        let before = back.sent().len();
        let v = pure_ack(Direction::Forward, 101, 2000);
        attacker.handle_frame(v.as_bytes().to_vec(), Direction::Forward);
        let sent = back.sent();
        let out = &sent[before..];
        assert_eq!(out.len(), 10);
        assert!(out.iter().all(|(_, allow_drop)| *allow_drop));
        let got = acks(out);
        assert_eq!(got.first(), Some(&1100));
        assert_eq!(got.last(), Some(&2000));
    }

    #[test]
    fn preack_drop_repeats() {
        let (bridge, _fwd, back) = MemoryInterface::bridge();
        let attacker = Attacker::new(bridge);
        handshake(&attacker);
        let data = frame(Direction::Backward, 901, 101, TCP_ACK, &[0u8; 100]);
        attacker.handle_frame(data.as_bytes().to_vec(), Direction::Backward);
        run(&attacker, &format!("{FLOW},0,0,*,PREACK,amt=0&method=3"));

        let before = back.sent().len();
        for _ in 0..3 {
            let v = pure_ack(Direction::Forward, 101, 950);
            attacker.handle_frame(v.as_bytes().to_vec(), Direction::Forward);
        }
        let sent = back.sent();
        let out = &sent[before..];
        assert_eq!(acks(out), vec![1001]);
        assert!(!out[0].1);
    }

    #[test]
    fn limit_ack_holds_the_line() {
        let (bridge, _fwd, back) = MemoryInterface::bridge();
        let attacker = Attacker::new(bridge);
        handshake(&attacker);
        run(&attacker, &format!("{FLOW},0,0,*,LIMITACK,"));
        let before = back.sent().len();
        for ack in [1500, 2500] {
            let v = pure_ack(Direction::Forward, 101, ack);
            attacker.handle_frame(v.as_bytes().to_vec(), Direction::Forward);
        }
        assert_eq!(acks(&back.sent()[before..]), vec![1500, 1500]);
    }

    #[test]
    fn limit_ack_freezes_each_direction_at_its_own_ack() {
        let (bridge, fwd, back) = MemoryInterface::bridge();
        let attacker = Attacker::new(bridge);
        handshake(&attacker);
        run(&attacker, &format!("{FLOW},0,0,*,LIMITACK,"));
        let (back_before, fwd_before) = (back.sent().len(), fwd.sent().len());

        let v = pure_ack(Direction::Forward, 101, 1500);
        attacker.handle_frame(v.as_bytes().to_vec(), Direction::Forward);
        for _ in 0..2 {
            let v = pure_ack(Direction::Backward, 901, 101);
            attacker.handle_frame(v.as_bytes().to_vec(), Direction::Backward);
        }
        assert_eq!(acks(&back.sent()[back_before..]), vec![1500]);
        assert_eq!(acks(&fwd.sent()[fwd_before..]), vec![101, 101]);
    }

    #[test]
    fn time_state_and_clear_commands() {
        let (bridge, _fwd, back) = MemoryInterface::bridge();
        let attacker = Attacker::new(bridge);
        handshake(&attacker);
        let data = frame(Direction::Backward, 901, 101, TCP_ACK, &[0u8; 40]);
        attacker.handle_frame(data.as_bytes().to_vec(), Direction::Backward);

        let reply = run(&attacker, &format!("{FLOW},0,0,*,TIME,"));
        let lines: Vec<&str> = reply.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains('.'));
        assert_eq!(lines[1], "40");

        run(&attacker, &format!("{FLOW},0,0,STATE_SLOW_START,STATE,"));
        let conn = attacker
            .table()
            .find(FlowKey::new(Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8)))
            .unwrap();
        assert_eq!(conn.tracking().lock().state, ProtocolState::SlowStart);

        run(&attacker, &format!("{FLOW},0,0,*,BURST,num=10"));
        let v = pure_ack(Direction::Forward, 101, 941);
        attacker.handle_frame(v.as_bytes().to_vec(), Direction::Forward);
        let before = back.sent().len();
        run(&attacker, &format!("{FLOW},0,0,*,CLEAR,"));
        assert_eq!(acks(&back.sent()[before..]), vec![941]);

        assert!(run(&attacker, "*,*,TCP,0,0,*,ACTIVE,").ends_with('\n'));
        run(&attacker, "*,*,TCP,0,0,*,CLEAR,");
        assert!(attacker.table().is_empty());
    }

    #[test]
    fn clear_all_leaves_no_injector_behind() {
        use std::thread;
        use std::time::{Duration, Instant};

        let (bridge, fwd, _back) = MemoryInterface::bridge();
        let attacker = Attacker::new(bridge);
        handshake(&attacker);
        assert_eq!(
            run(&attacker, &format!("{FLOW},1,0,*,INJECT,dir=1&freq=1")),
            ""
        );
        let v = pure_ack(Direction::Forward, 101, 901);
        attacker.handle_frame(v.as_bytes().to_vec(), Direction::Forward);

        let deadline = Instant::now() + Duration::from_secs(5);
        while fwd.sent().len() < 4 {
            assert!(Instant::now() < deadline, "injector never sent");
            thread::sleep(Duration::from_millis(1));
        }
        run(&attacker, "*,*,TCP,0,0,*,CLEAR,");
        assert!(attacker.table().is_empty());
        let sent = fwd.sent().len();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fwd.sent().len(), sent);
    }

    #[test]
    fn contended_clock_still_records_the_frame() {
        use std::thread;
        use std::time::Duration;

        let (bridge, _fwd, _back) = MemoryInterface::bridge();
        let attacker = Attacker::new(bridge);
        let before = attacker.last_packet();
        thread::sleep(Duration::from_millis(2));

        let held = attacker.last_packet.lock();
        thread::scope(|s| {
            let worker = s.spawn(|| {
                let v = pure_ack(Direction::Forward, 1, 2);
                attacker.handle_frame(v.as_bytes().to_vec(), Direction::Forward);
            });
            thread::sleep(Duration::from_millis(20));
            drop(held);
            worker.join().unwrap();
        });
        assert!(attacker.last_packet() > before);
    }

    #[test]
    fn time_formats() {
        assert_eq!(format_time(12, 5), "12.000005");
        assert_eq!(format_delta(TimeDelta::milliseconds(1500)), "1.500000");
    }
}
