use crate::error::{Layer, ParseError};
use crate::packet_view::{PacketView, Provenance};

mod build;
pub mod checksum;
pub mod header;
mod repack;

pub use build::{FrameSpec, build_tcp_frame};
pub use repack::{IpPayload, Repacker};

use header::{
    ETH_HDR_LEN, ETHERTYPE_IPV4, EthernetHeader, IPPROTO_TCP, IPV4_MIN_HDR_LEN, Ipv4Header,
    TCP_MIN_HDR_LEN, TcpHeader,
};

/// Byte offsets of each layer inside a frame. Ethernet always starts at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layers {
    pub ip: usize,
    pub tcp: usize,
    pub payload: usize,
    /// End of the IPv4 datagram; anything after it is link padding.
    pub end: usize,
}

/// Validates Ethernet/IPv4/TCP framing without reading past `buf`.
pub fn parse_layers(buf: &[u8]) -> Result<Layers, ParseError> {
    // 1. 以太网
    let eth = EthernetHeader::read(buf).ok_or(ParseError::Malformed(Layer::Ethernet))?;
    if eth.ethertype != ETHERTYPE_IPV4 {
        return Err(ParseError::Unsupported);
    }

    // 2. IPv4: 版本、头长、总长都要落在缓冲区内
    let ip_off = ETH_HDR_LEN;
    let remaining = buf.len() - ip_off;
    let ip = Ipv4Header::read(&buf[ip_off..]).ok_or(ParseError::Malformed(Layer::Ipv4))?;
    if ip.version != 4 {
        return Err(ParseError::Malformed(Layer::Ipv4));
    }
    if ip.header_len < IPV4_MIN_HDR_LEN || ip.header_len > remaining {
        return Err(ParseError::Malformed(Layer::Ipv4));
    }
    let total_len = ip.total_len as usize;
    if total_len < ip.header_len || total_len > remaining {
        return Err(ParseError::Malformed(Layer::Ipv4));
    }
    if ip.protocol != IPPROTO_TCP {
        return Err(ParseError::Unsupported);
    }

    // 3. TCP: data offset 不能超过剩余长度
    let tcp_off = ip_off + ip.header_len;
    let end = ip_off + total_len;
    let segment_len = end - tcp_off;
    if segment_len < TCP_MIN_HDR_LEN {
        return Err(ParseError::Malformed(Layer::Tcp));
    }
    let tcp = TcpHeader::read(&buf[tcp_off..end]).ok_or(ParseError::Malformed(Layer::Tcp))?;
    if tcp.header_len < TCP_MIN_HDR_LEN || tcp.header_len > segment_len {
        return Err(ParseError::Malformed(Layer::Tcp));
    }

    Ok(Layers {
        ip: ip_off,
        tcp: tcp_off,
        payload: tcp_off + tcp.header_len,
        end,
    })
}

/// Parses an owned frame; any violation yields `None` and the frame is dropped.
pub fn parse(buf: Vec<u8>, provenance: Provenance) -> Option<PacketView> {
    let layers = parse_layers(&buf).ok()?;
    Some(PacketView::from_parts(buf, layers, provenance))
}
