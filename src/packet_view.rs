use std::net::Ipv4Addr;

use chrono::{DateTime, Local};

use crate::codec::header::{
    self, MacAddr, TCP_ACK, TCP_ACK_NUM, TCP_FIN, TCP_RST, TCP_SEQ, TCP_SYN,
};
use crate::codec::{IpPayload, Layers};

/// Which way a packet travels through the bridge.
///
/// Interfaces are named after the direction of the traffic they receive: the
/// `Forward` interface hears forward traffic and transmits backward traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Where a frame came from and where it is going.
#[derive(Debug, Clone, Copy)]
pub struct Provenance {
    pub dir: Direction,
    /// Receiving interface; `None` for synthesized frames.
    pub rcv: Option<Direction>,
    /// Interface the frame will be transmitted on.
    pub snd: Direction,
    pub captured_at: DateTime<Local>,
}

impl Provenance {
    /// A frame heard on the `dir` interface, to be relayed out the other one.
    pub fn received(dir: Direction) -> Self {
        Self {
            dir,
            rcv: Some(dir),
            snd: dir.reverse(),
            captured_at: Local::now(),
        }
    }

    /// A frame built locally and sent out the `dir` interface.
    pub fn synthesized(dir: Direction) -> Self {
        Self {
            dir,
            rcv: None,
            snd: dir,
            captured_at: Local::now(),
        }
    }
}

// ==========================================
// 包视图：自有缓冲区 + 已校验的各层偏移
// ==========================================
#[derive(Debug, Clone)]
pub struct PacketView {
    buf: Vec<u8>,
    layers: Layers,
    provenance: Provenance,
}

impl PacketView {
    /// `layers` must come from `codec::parse_layers` on `buf` (or a builder
    /// that upholds the same bounds).
    pub(crate) fn from_parts(buf: Vec<u8>, layers: Layers, provenance: Provenance) -> Self {
        Self {
            buf,
            layers,
            provenance,
        }
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Vec<u8>, &mut Layers) {
        (&mut self.buf, &mut self.layers)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn layers(&self) -> Layers {
        self.layers
    }

    pub fn dir(&self) -> Direction {
        self.provenance.dir
    }

    pub fn rcv(&self) -> Option<Direction> {
        self.provenance.rcv
    }

    pub fn snd(&self) -> Direction {
        self.provenance.snd
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.provenance.captured_at
    }

    pub fn mac_src(&self) -> MacAddr {
        let mut m = [0u8; 6];
        m.copy_from_slice(&self.buf[6..12]);
        MacAddr(m)
    }

    pub fn mac_dst(&self) -> MacAddr {
        let mut m = [0u8; 6];
        m.copy_from_slice(&self.buf[0..6]);
        MacAddr(m)
    }

    pub fn ip_src(&self) -> Ipv4Addr {
        let o = self.layers.ip + 12;
        Ipv4Addr::new(self.buf[o], self.buf[o + 1], self.buf[o + 2], self.buf[o + 3])
    }

    pub fn ip_dst(&self) -> Ipv4Addr {
        let o = self.layers.ip + 16;
        Ipv4Addr::new(self.buf[o], self.buf[o + 1], self.buf[o + 2], self.buf[o + 3])
    }

    pub fn ip_id(&self) -> u16 {
        let o = self.layers.ip + header::IP_ID;
        u16::from_be_bytes([self.buf[o], self.buf[o + 1]])
    }

    pub fn src_port(&self) -> u16 {
        let o = self.layers.tcp;
        u16::from_be_bytes([self.buf[o], self.buf[o + 1]])
    }

    pub fn dst_port(&self) -> u16 {
        let o = self.layers.tcp + 2;
        u16::from_be_bytes([self.buf[o], self.buf[o + 1]])
    }

    pub fn seq(&self) -> u32 {
        let o = self.layers.tcp + TCP_SEQ;
        u32::from_be_bytes([self.buf[o], self.buf[o + 1], self.buf[o + 2], self.buf[o + 3]])
    }

    pub fn ack(&self) -> u32 {
        let o = self.layers.tcp + TCP_ACK_NUM;
        u32::from_be_bytes([self.buf[o], self.buf[o + 1], self.buf[o + 2], self.buf[o + 3]])
    }

    /// Rewrites the ack field in place. The TCP checksum is stale until the
    /// view goes through `Repacker::repack`.
    pub fn set_ack(&mut self, ack: u32) {
        let o = self.layers.tcp + TCP_ACK_NUM;
        self.buf[o..o + 4].copy_from_slice(&ack.to_be_bytes());
    }

    pub fn flags(&self) -> u8 {
        self.buf[self.layers.tcp + 13]
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags() & flag != 0
    }

    pub fn window(&self) -> u16 {
        let o = self.layers.tcp + 14;
        u16::from_be_bytes([self.buf[o], self.buf[o + 1]])
    }

    pub fn tcp_checksum(&self) -> u16 {
        let o = self.layers.tcp + header::TCP_CHECKSUM;
        u16::from_be_bytes([self.buf[o], self.buf[o + 1]])
    }

    pub fn payload_len(&self) -> usize {
        self.layers.end - self.layers.payload
    }

    /// The TCP segment as the IPv4 payload of this frame.
    pub fn ip_payload(&self) -> IpPayload {
        IpPayload {
            offset: self.layers.tcp,
            len: self.layers.end - self.layers.tcp,
        }
    }

    pub fn tcp_segment(&self) -> &[u8] {
        &self.buf[self.layers.tcp..self.layers.end]
    }

    pub fn ip_header(&self) -> &[u8] {
        &self.buf[self.layers.ip..self.layers.tcp]
    }

    pub fn is_syn(&self) -> bool {
        self.has_flag(TCP_SYN)
    }

    /// ACK set, SYN/FIN/RST clear and no payload.
    pub fn is_pure_ack(&self) -> bool {
        self.has_flag(TCP_ACK)
            && !self.has_flag(TCP_SYN | TCP_FIN | TCP_RST)
            && self.payload_len() == 0
    }
}
