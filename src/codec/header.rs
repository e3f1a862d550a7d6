use std::fmt;
use std::net::Ipv4Addr;

pub const ETH_HDR_LEN: usize = 14;
pub const IPV4_MIN_HDR_LEN: usize = 20;
pub const TCP_MIN_HDR_LEN: usize = 20;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IPPROTO_TCP: u8 = 6;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;

// 字段偏移 (相对各层头部起点)
pub(crate) const IP_TOTAL_LEN: usize = 2;
pub(crate) const IP_ID: usize = 4;
pub(crate) const IP_CHECKSUM: usize = 10;
pub(crate) const TCP_SEQ: usize = 4;
pub(crate) const TCP_ACK_NUM: usize = 8;
pub(crate) const TCP_CHECKSUM: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

pub(crate) fn read_u16(buf: &[u8], off: usize) -> Option<u16> {
    let b = buf.get(off..off + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

pub(crate) fn read_u32(buf: &[u8], off: usize) -> Option<u32> {
    let b = buf.get(off..off + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn write_u16(buf: &mut [u8], off: usize, v: u16) -> Option<()> {
    buf.get_mut(off..off + 2)?.copy_from_slice(&v.to_be_bytes());
    Some(())
}

pub(crate) fn write_u32(buf: &mut [u8], off: usize, v: u32) -> Option<()> {
    buf.get_mut(off..off + 4)?.copy_from_slice(&v.to_be_bytes());
    Some(())
}

// ==========================================
// 以太网头
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn read(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..ETH_HDR_LEN)?;
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&b[0..6]);
        src.copy_from_slice(&b[6..12]);
        Some(Self {
            dst: MacAddr(dst),
            src: MacAddr(src),
            ethertype: u16::from_be_bytes([b[12], b[13]]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Option<()> {
        let b = buf.get_mut(..ETH_HDR_LEN)?;
        b[0..6].copy_from_slice(&self.dst.0);
        b[6..12].copy_from_slice(&self.src.0);
        b[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
        Some(())
    }
}

// ==========================================
// IPv4 头 (拷贝出来，不做原地别名)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    /// Header length in bytes.
    pub header_len: usize,
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub frag_off: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// Reads the fixed part of the header. Length claims are not checked here.
    pub fn read(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..IPV4_MIN_HDR_LEN)?;
        Some(Self {
            version: b[0] >> 4,
            header_len: (b[0] & 0x0F) as usize * 4,
            tos: b[1],
            total_len: u16::from_be_bytes([b[2], b[3]]),
            id: u16::from_be_bytes([b[4], b[5]]),
            frag_off: u16::from_be_bytes([b[6], b[7]]),
            ttl: b[8],
            protocol: b[9],
            checksum: u16::from_be_bytes([b[10], b[11]]),
            src: Ipv4Addr::new(b[12], b[13], b[14], b[15]),
            dst: Ipv4Addr::new(b[16], b[17], b[18], b[19]),
        })
    }

    /// Writes a header without options; `header_len` must be 20.
    pub fn write(&self, buf: &mut [u8]) -> Option<()> {
        let b = buf.get_mut(..IPV4_MIN_HDR_LEN)?;
        b[0] = (self.version << 4) | ((self.header_len / 4) as u8 & 0x0F);
        b[1] = self.tos;
        b[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        b[4..6].copy_from_slice(&self.id.to_be_bytes());
        b[6..8].copy_from_slice(&self.frag_off.to_be_bytes());
        b[8] = self.ttl;
        b[9] = self.protocol;
        b[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        b[12..16].copy_from_slice(&self.src.octets());
        b[16..20].copy_from_slice(&self.dst.octets());
        Some(())
    }
}

// ==========================================
// TCP 头
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// Data offset in bytes.
    pub header_len: usize,
    pub flags: u8,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
}

impl TcpHeader {
    pub fn read(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..TCP_MIN_HDR_LEN)?;
        Some(Self {
            src_port: u16::from_be_bytes([b[0], b[1]]),
            dst_port: u16::from_be_bytes([b[2], b[3]]),
            seq: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            ack: u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
            header_len: (b[12] >> 4) as usize * 4,
            flags: b[13],
            window: u16::from_be_bytes([b[14], b[15]]),
            checksum: u16::from_be_bytes([b[16], b[17]]),
            urgent: u16::from_be_bytes([b[18], b[19]]),
        })
    }

    /// Writes a header without options; `header_len` must be 20.
    pub fn write(&self, buf: &mut [u8]) -> Option<()> {
        let b = buf.get_mut(..TCP_MIN_HDR_LEN)?;
        b[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        b[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        b[4..8].copy_from_slice(&self.seq.to_be_bytes());
        b[8..12].copy_from_slice(&self.ack.to_be_bytes());
        b[12] = ((self.header_len / 4) as u8) << 4;
        b[13] = self.flags;
        b[14..16].copy_from_slice(&self.window.to_be_bytes());
        b[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        b[18..20].copy_from_slice(&self.urgent.to_be_bytes());
        Some(())
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_buffers_are_rejected() {
        assert!(EthernetHeader::read(&[0u8; 13]).is_none());
        assert!(Ipv4Header::read(&[0u8; 19]).is_none());
        assert!(TcpHeader::read(&[0u8; 19]).is_none());
        assert!(read_u32(&[0u8; 3], 0).is_none());
        assert!(write_u16(&mut [0u8; 3], 2, 1).is_none());
    }

    #[test]
    fn tcp_header_write_read() {
        let hdr = TcpHeader {
            src_port: 1000,
            dst_port: 80,
            seq: 0xDEAD_BEEF,
            ack: 7,
            header_len: 20,
            flags: TCP_ACK | TCP_PSH,
            window: 512,
            checksum: 0,
            urgent: 0,
        };
        let mut buf = [0u8; 20];
        hdr.write(&mut buf).unwrap();
        assert_eq!(TcpHeader::read(&buf), Some(hdr));
        assert!(hdr.has(TCP_ACK));
        assert!(!hdr.has(TCP_SYN));
    }

    #[test]
    fn mac_display() {
        let mac = MacAddr([0x00, 0x1b, 0x21, 0xaa, 0xbb, 0x0c]);
        assert_eq!(mac.to_string(), "00:1b:21:aa:bb:0c");
    }
}
