use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use log::{debug, error, info};
use parking_lot::Mutex;

use crate::codec::header::MacAddr;
use crate::codec::{FrameSpec, build_tcp_frame};
use crate::connection::Tracking;
use crate::iface::Bridge;
use crate::packet_view::{Direction, Provenance};

/// How the job's seq/ack/window numbers are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqAckMethod {
    Absolute,
    /// Offsets from the sending half's live high seq, high ack and window.
    Relative,
}

/// Addresses given in the rule, used until the connection's own are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAddressing {
    pub mac_src: MacAddr,
    pub mac_dst: MacAddr,
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub port_src: u16,
    pub port_dst: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionJob {
    pub addressing: Option<StaticAddressing>,
    pub flags: u8,
    pub window: u16,
    pub seq: u32,
    pub ack: u32,
    pub method: SeqAckMethod,
    pub freq_ms: u64,
    pub max_packets: Option<u64>,
    /// Interface the packets leave on.
    pub dir: Direction,
}

impl InjectionJob {
    /// Builds the next frame from the live connection, or `None` when
    /// neither the connection nor the rule supplies addresses.
    pub fn frame_spec(&self, tracking: &Tracking) -> Option<FrameSpec> {
        // 从 dir 接口发出 = 冒充反方向的发送者
        let (from, to) = match self.dir {
            Direction::Forward => (&tracking.rev, &tracking.fwd),
            Direction::Backward => (&tracking.fwd, &tracking.rev),
        };

        let addr = if tracking.addresses_known() {
            StaticAddressing {
                mac_src: from.mac,
                mac_dst: to.mac,
                ip_src: from.ip,
                ip_dst: to.ip,
                port_src: from.port,
                port_dst: to.port,
            }
        } else {
            self.addressing?
        };

        let (seq, ack, window) = match self.method {
            SeqAckMethod::Absolute => (self.seq, self.ack, self.window),
            SeqAckMethod::Relative => (
                from.high_seq.wrapping_add(self.seq),
                from.high_ack.wrapping_add(self.ack),
                from.window.wrapping_add(self.window),
            ),
        };

        Some(FrameSpec {
            mac_src: addr.mac_src,
            mac_dst: addr.mac_dst,
            ip_src: addr.ip_src,
            ip_dst: addr.ip_dst,
            port_src: addr.port_src,
            port_dst: addr.port_dst,
            seq,
            ack,
            flags: self.flags,
            window,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorState {
    Idle,
    Running,
    Stopped,
}

// ==========================================
// 注入线程：按固定周期发送伪造报文，可随时取消
// ==========================================
pub struct Injector {
    job: InjectionJob,
    tracking: Arc<Mutex<Tracking>>,
    bridge: Arc<Bridge>,
    state: InjectorState,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    sent: Arc<AtomicU64>,
}

impl Injector {
    pub fn new(job: InjectionJob, tracking: Arc<Mutex<Tracking>>, bridge: Arc<Bridge>) -> Self {
        Self {
            job,
            tracking,
            bridge,
            state: InjectorState::Idle,
            stop_tx: None,
            handle: None,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> InjectorState {
        self.state
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Spawns the sender thread. Only an idle injector can be started.
    pub fn start(&mut self) -> io::Result<()> {
        if self.state != InjectorState::Idle {
            return Ok(());
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let job = self.job.clone();
        let tracking = Arc::clone(&self.tracking);
        let bridge = Arc::clone(&self.bridge);
        let sent = Arc::clone(&self.sent);

        let handle = thread::Builder::new()
            .name("injector".into())
            .spawn(move || {
                let period = Duration::from_millis(job.freq_ms);
                let mut deadline = Instant::now();
                loop {
                    let spec = job.frame_spec(&tracking.lock());
                    let Some(spec) = spec else {
                        error!("inject: no addresses for the connection, giving up");
                        break;
                    };
                    let frame = build_tcp_frame(&spec, &[], Provenance::synthesized(job.dir));
                    bridge.repack_and_send(frame, true);
                    let n = sent.fetch_add(1, Ordering::Relaxed) + 1;
                    if job.max_packets.is_some_and(|max| n >= max) {
                        debug!("inject: sent {} packets, done", n);
                        break;
                    }

                    deadline += period;
                    match stop_rx.recv_deadline(deadline) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            })?;

        info!(
            "inject: started, every {} ms out the {:?} interface",
            self.job.freq_ms, self.job.dir
        );
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        self.state = InjectorState::Running;
        Ok(())
    }

    /// Asks the thread to stop; it wakes from its sleep at once. Does not
    /// wait for it.
    pub fn stop(&mut self) {
        if self.state == InjectorState::Running {
            // 断开通道即可唤醒 recv_deadline
            self.stop_tx = None;
            self.state = InjectorState::Stopped;
        }
    }

    /// The thread has exited (stopped, finished its count, or never ran).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("inject: sender thread panicked");
            }
        }
    }
}

impl Drop for Injector {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
