use std::net::Ipv4Addr;

use crate::codec::header::{MacAddr, TCP_ACK, TCP_FIN, TCP_RST, TCP_SYN};
use crate::packet_view::PacketView;
use crate::seq;

/// The header fields `ConnectionHalf::update` needs from one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub payload_len: usize,
}

impl Segment {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

impl From<&PacketView> for Segment {
    fn from(view: &PacketView) -> Self {
        Segment {
            seq: view.seq(),
            ack: view.ack(),
            flags: view.flags(),
            window: view.window(),
            payload_len: view.payload_len(),
        }
    }
}

/// What an update learned about the connection as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Opening,
    Closing,
    Tracked { retransmission: bool },
}

/// One direction of a tracked TCP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHalf {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub port: u16,
    pub have_initial_seq: bool,
    pub initial_seq: u32,
    pub high_seq: u32,
    pub have_initial_ack: bool,
    pub initial_ack: u32,
    pub high_ack: u32,
    pub window: u16,
    pub pkts: u64,
    pub dup: u64,
    pub retransmits: u64,
    /// Baselines owned by the ack policies.
    pub preack_save: Option<u32>,
    pub renege_save: Option<u32>,
    pub limit_save: u32,
}

impl ConnectionHalf {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            mac: MacAddr::ZERO,
            port: 0,
            have_initial_seq: false,
            initial_seq: 0,
            high_seq: 0,
            have_initial_ack: false,
            initial_ack: 0,
            high_ack: 0,
            window: 0,
            pkts: 0,
            dup: 0,
            retransmits: 0,
            preack_save: None,
            renege_save: None,
            limit_save: 0,
        }
    }

    /// Both endpoints of this half are known.
    pub fn has_address(&self) -> bool {
        self.port != 0 && !self.ip.is_unspecified()
    }

    pub fn reset_baselines(&mut self) {
        self.preack_save = None;
        self.renege_save = None;
        self.limit_save = 0;
    }

    /// Folds one segment sent by this half into its statistics.
    pub fn update(&mut self, seg: &Segment) -> Observation {
        self.pkts += 1;
        if seg.has(TCP_FIN) || seg.has(TCP_RST) {
            return Observation::Closing;
        }

        let syn = seg.has(TCP_SYN);
        if syn && !self.have_initial_seq {
            self.have_initial_seq = true;
            self.initial_seq = seg.seq;
            self.high_seq = seg.seq;
        }

        let mut retransmission = false;
        if !syn && self.have_initial_seq {
            if seq::after(seg.seq, self.high_seq) {
                // 最后一个字节的序号；纯 ACK 时为 seq - 1
                self.high_seq = seg
                    .seq
                    .wrapping_add(seg.payload_len as u32)
                    .wrapping_sub(1);
            } else if seg.payload_len > 0 {
                self.retransmits += 1;
                retransmission = true;
            }
        }

        if seg.has(TCP_ACK) {
            if !self.have_initial_ack {
                self.have_initial_ack = true;
                self.initial_ack = seg.ack;
                self.high_ack = seg.ack;
                self.dup = 0;
            } else if seq::after_eq(seg.ack, self.high_ack) {
                if seg.ack == self.high_ack && seg.payload_len == 0 && !syn {
                    self.dup += 1;
                } else {
                    self.dup = 0;
                }
                self.high_ack = seg.ack;
            }
        }

        self.window = seg.window;

        if syn {
            Observation::Opening
        } else {
            Observation::Tracked { retransmission }
        }
    }
}
