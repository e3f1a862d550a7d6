use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use log::info;

use crate::attacker::Attacker;
use crate::connection::ConnectionSummary;
use crate::flow_key::FlowKey;

const TICK: Duration = Duration::from_millis(200);

// ==========================================
// 连接监控面板：周期性打印每条连接的包速和规则数
// ==========================================
pub struct ConnectionMonitor {
    last_pkts: HashMap<FlowKey, u64>,
    last_report: Instant,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self {
            last_pkts: HashMap::new(),
            last_report: Instant::now(),
        }
    }

    pub fn render(&mut self, mut conns: Vec<ConnectionSummary>) -> String {
        let elapsed = self.last_report.elapsed().as_secs_f64().max(f64::EPSILON);
        self.last_report = Instant::now();
        conns.sort_unstable_by_key(|c| (c.key.src, c.key.dst));

        let mut out = String::new();
        let _ = writeln!(
            out,
            "[{}] {} connection(s)",
            Local::now().format("%H:%M:%S"),
            conns.len()
        );
        let _ = writeln!(
            out,
            "{:<33} | {:<10} | {:>10} | {:>10} | {:>12} | {:>5}",
            "flow", "state", "pkts", "pkts/s", "bytes", "rules"
        );

        let mut seen = HashMap::with_capacity(conns.len());
        for c in &conns {
            let prev = self.last_pkts.get(&c.key).copied().unwrap_or(0);
            let rate = c.pkts.saturating_sub(prev) as f64 / elapsed;
            let flow = format!("{} <-> {}", c.key.src, c.key.dst);
            let _ = writeln!(
                out,
                "{:<33} | {:<10} | {:>10} | {:>10.1} | {:>12} | {:>5}",
                flow,
                c.state.to_string(),
                c.pkts,
                rate,
                c.bytes,
                c.modifiers
            );
            seen.insert(c.key, c.pkts);
        }
        // 已清除的连接不再保留
        self.last_pkts = seen;
        out
    }
}

pub fn spawn(
    attacker: Arc<Attacker>,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("monitor".into())
        .spawn(move || {
            let mut monitor = ConnectionMonitor::new();
            let mut next = Instant::now() + interval;
            while running.load(Ordering::Relaxed) {
                thread::sleep(TICK);
                if Instant::now() < next {
                    continue;
                }
                next += interval;
                let conns = attacker
                    .table()
                    .connections()
                    .iter()
                    .map(|c| c.summary())
                    .collect();
                info!("\n{}", monitor.render(conns));
            }
        })
}
