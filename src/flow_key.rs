// flow_key.rs
use std::net::Ipv4Addr;

use crate::packet_view::PacketView;

/// Ordered IPv4 address pair. The connection table stores every connection
/// under both orderings, so either key finds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl FlowKey {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self { src, dst }
    }

    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl From<&PacketView> for FlowKey {
    fn from(view: &PacketView) -> Self {
        FlowKey::new(view.ip_src(), view.ip_dst())
    }
}
