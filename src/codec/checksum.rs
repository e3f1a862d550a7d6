// RFC 1071 internet checksum.

use std::net::Ipv4Addr;

use crate::codec::header::IPPROTO_TCP;

/// Adds `data` to a running one's-complement accumulator.
///
/// Words are big-endian; a trailing odd byte is the high byte of a padded word.
pub fn accumulate(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = fold_once(sum + u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = fold_once(sum + ((*last as u32) << 8));
    }
    sum
}

fn fold_once(sum: u32) -> u32 {
    (sum & 0xFFFF) + (sum >> 16)
}

/// Folds carries until the sum fits in 16 bits.
pub fn fold(mut sum: u32) -> u16 {
    while sum > 0xFFFF {
        sum = fold_once(sum);
    }
    sum as u16
}

/// Final checksum value, in host order. Write it with `to_be_bytes`.
pub fn finish(sum: u32) -> u16 {
    !fold(sum)
}

pub fn ipv4_header(header: &[u8]) -> u16 {
    finish(accumulate(0, header))
}

/// TCP checksum over the IPv4 pseudo header followed by the segment.
pub fn tcp_ipv4(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = IPPROTO_TCP;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());
    finish(accumulate(accumulate(0, &pseudo), segment))
}

/// Residual over data that already carries its checksum; zero when valid.
pub fn residual(data: &[u8]) -> u16 {
    finish(accumulate(0, data))
}
