//! CAN socket interface.
//!
//! The kernel SocketCAN syscalls themselves are out of scope for the core
//! pipeline (see SPEC_FULL.md §1/§4.1), but the pipeline still needs a real
//! default so it can run on a car. [`CanSocket`] is the seam: production
//! code uses [`LinuxCanSocket`], tests use an in-memory fake.

use std::time::Duration;

use crate::error::CanError;
use crate::frame::CanFrame;

/// Narrow interface the CAN Reader worker needs from a socket.
pub trait CanSocket: Send {
    /// Waits up to `timeout` for the socket to become readable. Returns
    /// `Ok(false)` on a plain timeout so the caller can re-check the
    /// terminate flag, matching the spec's "poll with a bounded timeout so
    /// the loop can observe terminate" requirement.
    fn poll_readable(&mut self, timeout: Duration) -> Result<bool, CanError>;

    /// Reads exactly one frame. Only called after `poll_readable` returned
    /// `true`.
    fn read_frame(&mut self) -> Result<CanFrame, CanError>;
}

#[cfg(target_os = "linux")]
pub use linux::LinuxCanSocket;

#[cfg(target_os = "linux")]
mod linux {
    use std::io;
    use std::os::fd::RawFd;
    use std::time::Duration;

    use super::{CanError, CanFrame, CanSocket};

    // Linux SocketCAN constants not exposed by the `libc` crate.
    const PF_CAN: libc::c_int = 29;
    const AF_CAN: libc::sa_family_t = 29;
    const CAN_RAW: libc::c_int = 1;
    const SIOCGIFINDEX: libc::c_ulong = 0x8933;

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct SockAddrCan {
        can_family: libc::sa_family_t,
        can_ifindex: libc::c_int,
        // Room for the tp/j1939 union fields we never populate.
        _rx_id: u32,
        _tx_id: u32,
    }

    #[repr(C)]
    struct IfReq {
        ifr_name: [libc::c_char; 16],
        ifr_ifindex: libc::c_int,
        _pad: [u8; 16],
    }

    /// Matches `struct can_frame` from `linux/can.h`: 4-byte id, a length
    /// byte, 3 reserved/padding bytes, then 8 data bytes.
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct RawCanFrame {
        can_id: u32,
        can_dlc: u8,
        _pad: [u8; 3],
        data: [u8; 8],
    }

    pub struct LinuxCanSocket {
        fd: RawFd,
    }

    impl LinuxCanSocket {
        pub fn open(interface: &str) -> Result<Self, CanError> {
            let fd = unsafe { libc::socket(PF_CAN, libc::SOCK_RAW, CAN_RAW) };
            if fd < 0 {
                return Err(CanError::Open(io::Error::last_os_error()));
            }

            let ifindex = Self::interface_index(fd, interface).inspect_err(|_| unsafe {
                libc::close(fd);
            })?;

            let addr = SockAddrCan {
                can_family: AF_CAN,
                can_ifindex: ifindex,
                _rx_id: 0,
                _tx_id: 0,
            };
            let rc = unsafe {
                libc::bind(
                    fd,
                    std::ptr::addr_of!(addr).cast(),
                    std::mem::size_of::<SockAddrCan>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(CanError::Bind { iface: interface.to_string(), source: err });
            }

            Ok(Self { fd })
        }

        fn interface_index(fd: RawFd, interface: &str) -> Result<libc::c_int, CanError> {
            let mut req: IfReq = unsafe { std::mem::zeroed() };
            let bytes = interface.as_bytes();
            let n = bytes.len().min(req.ifr_name.len() - 1);
            for (dst, src) in req.ifr_name.iter_mut().zip(bytes[..n].iter()) {
                *dst = *src as libc::c_char;
            }
            let rc = unsafe { libc::ioctl(fd, SIOCGIFINDEX, std::ptr::addr_of_mut!(req)) };
            if rc < 0 {
                return Err(CanError::InterfaceLookup {
                    iface: interface.to_string(),
                    source: io::Error::last_os_error(),
                });
            }
            Ok(req.ifr_ifindex)
        }
    }

    impl CanSocket for LinuxCanSocket {
        fn poll_readable(&mut self, timeout: Duration) -> Result<bool, CanError> {
            let mut pfd = libc::pollfd { fd: self.fd, events: libc::POLLIN, revents: 0 };
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(false);
                }
                return Err(CanError::Poll(err));
            }
            Ok(rc > 0 && pfd.revents & libc::POLLIN != 0)
        }

        fn read_frame(&mut self) -> Result<CanFrame, CanError> {
            let mut raw: RawCanFrame = unsafe { std::mem::zeroed() };
            let size = std::mem::size_of::<RawCanFrame>();
            let mut have = 0usize;
            while have < size {
                let dst = (std::ptr::addr_of_mut!(raw) as *mut u8).wrapping_add(have);
                let n = unsafe {
                    libc::read(self.fd, dst.cast(), size - have)
                };
                if n < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted
                        || err.kind() == io::ErrorKind::WouldBlock
                    {
                        continue;
                    }
                    return Err(CanError::Read(err));
                }
                if n == 0 {
                    return Err(CanError::Read(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "CAN socket closed",
                    )));
                }
                have += n as usize;
            }
            Ok(CanFrame::new(raw.can_id, raw.data))
        }
    }

    impl Drop for LinuxCanSocket {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

/// In-memory stand-in for tests: replays a fixed list of frames, then
/// reports "no data" forever (mirroring an idle bus) until drained.
pub struct FakeCanSocket {
    frames: std::collections::VecDeque<CanFrame>,
}

impl FakeCanSocket {
    pub fn new(frames: Vec<CanFrame>) -> Self {
        Self { frames: frames.into() }
    }
}

impl CanSocket for FakeCanSocket {
    fn poll_readable(&mut self, timeout: Duration) -> Result<bool, CanError> {
        if self.frames.is_empty() {
            std::thread::sleep(timeout.min(Duration::from_millis(20)));
            return Ok(false);
        }
        Ok(true)
    }

    fn read_frame(&mut self) -> Result<CanFrame, CanError> {
        self.frames.pop_front().ok_or_else(|| {
            CanError::Read(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "no fake frames remaining",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_socket_replays_frames_in_order_then_idles() {
        let mut sock = FakeCanSocket::new(vec![CanFrame::new(1, [0; 8]), CanFrame::new(2, [0; 8])]);
        assert!(sock.poll_readable(Duration::from_millis(1)).unwrap());
        assert_eq!(sock.read_frame().unwrap().id(), 1);
        assert!(sock.poll_readable(Duration::from_millis(1)).unwrap());
        assert_eq!(sock.read_frame().unwrap().id(), 2);
        assert!(!sock.poll_readable(Duration::from_millis(1)).unwrap());
    }
}
