use std::ffi::CString;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{debug, error};

use crate::error::IfaceError;
use crate::iface::Interface;

const ETH_P_ALL: u16 = 0x0003;
/// `sll_pkttype` of frames this host transmitted itself.
const PACKET_OUTGOING: u8 = 4;
const RECV_TIMEOUT_USEC: libc::suseconds_t = 200_000;
const MAX_FRAME: usize = 65_536;

// ==========================================
// AF_PACKET 原始套接字，绑定到单个网卡，混杂模式
// ==========================================
pub struct RawSocket {
    name: String,
    fd: libc::c_int,
    open: AtomicBool,
}

impl RawSocket {
    pub fn open(name: &str) -> Result<Self, IfaceError> {
        if name.len() >= libc::IFNAMSIZ {
            return Err(IfaceError::NameTooLong(name.to_string()));
        }
        let c_name = CString::new(name).map_err(|_| IfaceError::NameTooLong(name.to_string()))?;

        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                ETH_P_ALL.to_be() as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(IfaceError::Socket {
                iface: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        // 之后任何一步失败，Drop 负责关闭 fd
        let sock = RawSocket {
            name: name.to_string(),
            fd,
            open: AtomicBool::new(true),
        };

        let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        if index == 0 {
            return Err(sock.config_error("interface index"));
        }
        sock.bind(index as libc::c_int)?;
        sock.promiscuous(index as libc::c_int)?;
        sock.receive_timeout()?;

        debug!("{}: raw socket bound to ifindex {}", name, index);
        Ok(sock)
    }

    fn config_error(&self, step: &'static str) -> IfaceError {
        IfaceError::Configure {
            iface: self.name.clone(),
            step,
            source: io::Error::last_os_error(),
        }
    }

    fn bind(&self, index: libc::c_int) -> Result<(), IfaceError> {
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = ETH_P_ALL.to_be();
        addr.sll_ifindex = index;

        let res = unsafe {
            libc::bind(
                self.fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(self.config_error("bind"));
        }
        Ok(())
    }

    fn promiscuous(&self, index: libc::c_int) -> Result<(), IfaceError> {
        let mut mreq: libc::packet_mreq = unsafe { mem::zeroed() };
        mreq.mr_ifindex = index;
        mreq.mr_type = libc::PACKET_MR_PROMISC as u16;

        let res = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_PACKET,
                libc::PACKET_ADD_MEMBERSHIP,
                &mreq as *const libc::packet_mreq as *const libc::c_void,
                mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(self.config_error("promiscuous mode"));
        }
        Ok(())
    }

    fn receive_timeout(&self) -> Result<(), IfaceError> {
        let tv = libc::timeval {
            tv_sec: 0,
            tv_usec: RECV_TIMEOUT_USEC,
        };
        let res = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(self.config_error("receive timeout"));
        }
        Ok(())
    }

    fn fail(&self, what: &str, err: io::Error) {
        error!("{}: {} failed: {}", self.name, what, err);
        self.open.store(false, Ordering::Relaxed);
    }
}

impl Interface for RawSocket {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, frame: &[u8], allow_drop: bool) -> bool {
        loop {
            let res = unsafe {
                libc::send(
                    self.fd,
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    0,
                )
            };
            if res >= 0 {
                return true;
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ENOBUFS) | Some(libc::EAGAIN) | Some(libc::EINTR) => {
                    if allow_drop {
                        return false;
                    }
                    thread::yield_now();
                }
                _ => {
                    self.fail("send", err);
                    return false;
                }
            }
        }
    }

    fn receive(&self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; MAX_FRAME];
        let mut from: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;

        let n = unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut from_len,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => self.fail("receive", err),
            }
            return None;
        }
        // 自己发出去的帧也会被抓到，不能再转发回去
        if from.sll_pkttype == PACKET_OUTGOING {
            return None;
        }
        buf.truncate(n as usize);
        Some(buf)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
