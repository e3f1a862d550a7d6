use std::net::Ipv4Addr;

use crate::codec::Layers;
use crate::codec::header::{
    ETH_HDR_LEN, ETHERTYPE_IPV4, EthernetHeader, IPPROTO_TCP, IPV4_MIN_HDR_LEN, Ipv4Header,
    MacAddr, TCP_MIN_HDR_LEN, TcpHeader,
};
use crate::packet_view::{PacketView, Provenance};

const INJECT_TTL: u8 = 255;

/// Everything needed to synthesize one TCP segment on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    pub mac_src: MacAddr,
    pub mac_dst: MacAddr,
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub port_src: u16,
    pub port_dst: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
}

/// Lays out Ethernet + IPv4 + TCP headers and `payload`. Checksums and the IP
/// identification are left zero for `Repacker::repack` to fill in.
pub fn build_tcp_frame(spec: &FrameSpec, payload: &[u8], provenance: Provenance) -> PacketView {
    let ip = ETH_HDR_LEN;
    let tcp = ip + IPV4_MIN_HDR_LEN;
    let data = tcp + TCP_MIN_HDR_LEN;
    let end = data + payload.len();
    let mut buf = vec![0u8; end];

    let eth = EthernetHeader {
        dst: spec.mac_dst,
        src: spec.mac_src,
        ethertype: ETHERTYPE_IPV4,
    };
    let iph = Ipv4Header {
        version: 4,
        header_len: IPV4_MIN_HDR_LEN,
        tos: 0,
        total_len: (end - ip) as u16,
        id: 0,
        frag_off: 0,
        ttl: INJECT_TTL,
        protocol: IPPROTO_TCP,
        checksum: 0,
        src: spec.ip_src,
        dst: spec.ip_dst,
    };
    let tcph = TcpHeader {
        src_port: spec.port_src,
        dst_port: spec.port_dst,
        seq: spec.seq,
        ack: spec.ack,
        header_len: TCP_MIN_HDR_LEN,
        flags: spec.flags,
        window: spec.window,
        checksum: 0,
        urgent: 0,
    };

    // 缓冲区按上面的长度分配，写入不会越界
    let _ = eth.write(&mut buf);
    let _ = iph.write(&mut buf[ip..]);
    let _ = tcph.write(&mut buf[tcp..]);
    buf[data..].copy_from_slice(payload);

    PacketView::from_parts(
        buf,
        Layers {
            ip,
            tcp,
            payload: data,
            end,
        },
        provenance,
    )
}
