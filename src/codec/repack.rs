use std::sync::atomic::{AtomicU16, Ordering};

use log::error;

use crate::codec::checksum;
use crate::codec::header::{
    IP_CHECKSUM, IP_ID, IP_TOTAL_LEN, TCP_CHECKSUM, TCP_MIN_HDR_LEN, write_u16,
};
use crate::packet_view::PacketView;

const FIRST_IP_ID: u16 = 42;

/// The IPv4 payload a caller wants on the wire, as a range of the frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPayload {
    pub offset: usize,
    pub len: usize,
}

// ==========================================
// 重新打包：长度、IP ID、两层校验和
// ==========================================
pub struct Repacker {
    next_id: AtomicU16,
}

impl Repacker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU16::new(FIRST_IP_ID),
        }
    }

    fn next_id(&self) -> u16 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fixes lengths, identification and checksums after the TCP segment was
    /// rewritten. Refuses a payload that doesn't start where the IPv4 header
    /// ends.
    pub fn repack(&self, mut view: PacketView, payload: IpPayload) -> Option<PacketView> {
        let ip_src = view.ip_src();
        let ip_dst = view.ip_dst();
        let (buf, layers) = view.parts_mut();

        if payload.offset != layers.tcp {
            error!(
                "repack: payload at offset {} but IPv4 header ends at {}",
                payload.offset, layers.tcp
            );
            return None;
        }
        let end = payload.offset.checked_add(payload.len)?;
        if end > buf.len() || payload.len < TCP_MIN_HDR_LEN {
            error!("repack: payload of {} bytes does not fit the frame", payload.len);
            return None;
        }
        let data_offset = (buf[layers.tcp + 12] >> 4) as usize * 4;
        if data_offset < TCP_MIN_HDR_LEN || data_offset > payload.len {
            return None;
        }

        let ip_hdr_len = layers.tcp - layers.ip;
        let total_len = u16::try_from(ip_hdr_len + payload.len).ok()?;
        buf.truncate(end);
        layers.end = end;
        layers.payload = layers.tcp + data_offset;

        let id = self.next_id();
        let ip = layers.ip;
        write_u16(buf, ip + IP_TOTAL_LEN, total_len)?;
        write_u16(buf, ip + IP_ID, id)?;
        write_u16(buf, ip + IP_CHECKSUM, 0)?;
        let ip_sum = checksum::ipv4_header(&buf[ip..layers.tcp]);
        write_u16(buf, ip + IP_CHECKSUM, ip_sum)?;

        let tcp = layers.tcp;
        write_u16(buf, tcp + TCP_CHECKSUM, 0)?;
        let tcp_sum = checksum::tcp_ipv4(ip_src, ip_dst, &buf[tcp..end]);
        write_u16(buf, tcp + TCP_CHECKSUM, tcp_sum)?;

        Some(view)
    }
}

impl Default for Repacker {
    fn default() -> Self {
        Self::new()
    }
}
