use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};

// 引入模块
mod attacker;
mod cli;
mod codec;
mod connection;
mod control;
mod error;
mod flow_key;
mod iface;
mod injector;
mod modifier;
mod monitor;
mod packet_view;
mod rule;
mod seq;

use crate::{
    attacker::Attacker,
    cli::Cli,
    iface::{Bridge, Interface, RawSocket},
    packet_view::Direction,
};

fn init_logger(cli: &Cli) {
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .format_timestamp_micros()
        .init();
}

fn open_iface(name: &str) -> Result<Arc<dyn Interface>> {
    let sock = RawSocket::open(name).with_context(|| format!("failed to attach to {}", name))?;
    Ok(Arc::new(sock))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli);

    if cli.ifaces.len() != 2 {
        bail!("exactly two interfaces are required, got {}", cli.ifaces.len());
    }

    // 1. 两个网卡组成网桥
    let forward = open_iface(&cli.ifaces[0])?;
    let backward = open_iface(&cli.ifaces[1])?;
    let bridge = Arc::new(Bridge::new(forward, backward));
    let attacker = Arc::new(Attacker::new(bridge));
    let running = Arc::new(AtomicBool::new(true));

    // 2. 每个方向一个接收线程
    let mut workers = Vec::new();
    for dir in [Direction::Forward, Direction::Backward] {
        let handle = iface::spawn_reception(Arc::clone(&attacker), dir, Arc::clone(&running))
            .context("failed to start reception thread")?;
        workers.push(handle);
    }

    // 3. 可选的监控面板
    if cli.stats_interval > 0 {
        let handle = monitor::spawn(
            Arc::clone(&attacker),
            Duration::from_secs(cli.stats_interval),
            Arc::clone(&running),
        )
        .context("failed to start monitor thread")?;
        workers.push(handle);
    }

    // 4. 控制通道，阻塞在这里
    let listener = TcpListener::bind(("0.0.0.0", cli.port))
        .with_context(|| format!("failed to bind control port {}", cli.port))?;
    info!(
        "bridging {} <-> {}, control on port {}",
        cli.ifaces[0], cli.ifaces[1], cli.port
    );
    let served = control::serve(Arc::clone(&attacker), listener, Arc::clone(&running));

    running.store(false, Ordering::Relaxed);
    for handle in workers {
        if handle.join().is_err() {
            warn!("worker thread panicked");
        }
    }
    attacker.table().clear_all();
    served.context("control channel failed")
}
