use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::connection::Connection;
use crate::flow_key::FlowKey;
use crate::packet_view::PacketView;
use crate::rule::Proto;

type ConnMap = HashMap<FlowKey, Arc<Connection>>;

// ==========================================
// 连接表：同一条连接按两种地址顺序各登记一次
// ==========================================
#[derive(Default)]
pub struct ConnectionTable {
    conns: RwLock<ConnMap>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, key: FlowKey) -> Option<Arc<Connection>> {
        self.conns.read().get(&key).cloned()
    }

    pub fn find_or_create(&self, key: FlowKey, proto: Proto) -> Arc<Connection> {
        let mut map = self.conns.write();
        Self::insert_locked(&mut map, key, proto)
    }

    fn insert_locked(map: &mut ConnMap, key: FlowKey, proto: Proto) -> Arc<Connection> {
        if let Some(conn) = map.get(&key) {
            return Arc::clone(conn);
        }
        debug!("table: new connection {} <-> {}", key.src, key.dst);
        let conn = Arc::new(Connection::new(key, proto));
        map.insert(key, Arc::clone(&conn));
        map.insert(key.reversed(), Arc::clone(&conn));
        conn
    }

    /// Runs `f` on the connection for `key` while holding the read lock.
    /// With `create`, a missing connection is added under the write lock,
    /// which is then downgraded so other readers proceed.
    pub fn with_connection<R>(
        &self,
        key: FlowKey,
        create: bool,
        f: impl FnOnce(Option<&Connection>) -> R,
    ) -> R {
        {
            let map = self.conns.read();
            if let Some(conn) = map.get(&key) {
                return f(Some(conn.as_ref()));
            }
            if !create {
                return f(None);
            }
        }
        let mut map = self.conns.write();
        let conn = Self::insert_locked(&mut map, key, Proto::Tcp);
        let _map = RwLockWriteGuard::downgrade(map);
        f(Some(conn.as_ref()))
    }

    /// Runs `f` with the table write-locked, creating the connection if
    /// needed. Rule installs go through here so they never race a packet.
    pub fn install<R>(&self, key: FlowKey, proto: Proto, f: impl FnOnce(&Connection) -> R) -> R {
        let mut map = self.conns.write();
        let conn = Self::insert_locked(&mut map, key, proto);
        f(&conn)
    }

    /// Forgets every connection; their modifiers are cleared and any queued
    /// burst packets returned.
    pub fn clear_all(&self) -> Vec<PacketView> {
        let drained: Vec<_> = self.conns.write().drain().collect();
        // 注入线程在表锁之外 join
        let mut flushed = Vec::new();
        for (key, conn) in drained {
            if key == conn.key() {
                flushed.extend(conn.clear());
            }
        }
        flushed
    }

    /// Each connection once, under its SYN ordering.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.conns
            .read()
            .iter()
            .filter(|(key, conn)| **key == conn.key())
            .map(|(_, conn)| Arc::clone(conn))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.read().is_empty()
    }
}
