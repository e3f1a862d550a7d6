use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::attacker::Attacker;
use crate::rule::parse_command;

const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Parses and executes one record, producing the full reply.
pub fn respond(attacker: &Attacker, line: &str) -> String {
    match parse_command(line) {
        Ok(cmd) => {
            let mut reply = attacker.execute(cmd);
            reply.push_str("OK\n");
            reply
        }
        Err(e) => {
            warn!("rejected command {:?}: {}", line.trim(), e);
            format!("ERR {}\n", e)
        }
    }
}

// ==========================================
// 控制通道：每个客户端一个线程，一行一条规则
// ==========================================
pub fn serve(
    attacker: Arc<Attacker>,
    listener: TcpListener,
    running: Arc<AtomicBool>,
) -> io::Result<()> {
    info!("control channel listening on {}", listener.local_addr()?);
    // 非阻塞 accept，轮询 running
    listener.set_nonblocking(true)?;
    while running.load(Ordering::Relaxed) {
        let stream = match listener.accept() {
            Ok((s, _)) => s,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                warn!("control: accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
                continue;
            }
        };
        stream.set_nonblocking(false)?;
        let attacker = Arc::clone(&attacker);
        thread::Builder::new()
            .name("control".into())
            .spawn(move || {
                if let Err(e) = session(&attacker, stream) {
                    debug!("control: session ended: {}", e);
                }
            })?;
    }
    info!("control channel closed");
    Ok(())
}

fn session(attacker: &Attacker, stream: TcpStream) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    debug!("control: {} connected", peer);
    let reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        writer.write_all(respond(attacker, &line).as_bytes())?;
    }
    debug!("control: {} disconnected", peer);
    Ok(())
}
