//! HCI Socket implementation for Bluetooth communication
//!
//! This module provides a wrapper around the raw HCI socket interface,
//! allowing for communication with Bluetooth controllers.

use crate::error::HciError;
use crate::hci::constants::{HCI_ACL_PKT, HCI_EVENT_PKT};
use crate::hci::transport::Transport;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

// Bluetooth socket constants
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_CHANNEL_USER: u16 = 1;
const SOL_HCI: i32 = 0;
const HCI_FILTER: i32 = 2;

/// Represents an HCI socket
#[derive(Debug)]
pub struct HciSocket {
    fd: RawFd,
}

// Kernel-side packet filter for raw channel sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

// Define the sockaddr_hci structure
#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

impl HciSocket {
    /// Opens a raw HCI socket bound to `dev_id` (0 for the first device)
    ///
    /// The raw channel shares the controller with the kernel's own stack.
    pub fn open(dev_id: u16) -> Result<Self, HciError> {
        Self::open_channel(dev_id, HCI_CHANNEL_RAW)
    }

    /// Opens an exclusive user-channel socket
    ///
    /// The device must be down (`hciconfig hciX down`) and the process
    /// needs `CAP_NET_ADMIN`.
    pub fn open_user_channel(dev_id: u16) -> Result<Self, HciError> {
        Self::open_channel(dev_id, HCI_CHANNEL_USER)
    }

    fn open_channel(dev_id: u16, channel: u16) -> Result<Self, HciError> {
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                BTPROTO_HCI,
            )
        };

        if fd < 0 {
            return Err(HciError::SocketError(io::Error::last_os_error()));
        }

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev_id,
            hci_channel: channel,
        };

        let result = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };

        if result < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(HciError::BindError(err));
        }

        let socket = HciSocket { fd };
        if channel == HCI_CHANNEL_RAW {
            socket.pass_all_packets()?;
        }
        Ok(socket)
    }

    // A fresh raw socket filters everything out; let events and ACL data through.
    fn pass_all_packets(&self) -> Result<(), HciError> {
        let filter = HciFilter {
            type_mask: (1 << HCI_EVENT_PKT) | (1 << HCI_ACL_PKT),
            event_mask: [u32::MAX, u32::MAX],
            opcode: 0,
        };
        let result = unsafe {
            libc::setsockopt(
                self.fd,
                SOL_HCI,
                HCI_FILTER,
                &filter as *const _ as *const libc::c_void,
                std::mem::size_of::<HciFilter>() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(HciError::SocketError(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Transport for HciSocket {
    fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        let n = unsafe {
            libc::write(
                self.fd,
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n as usize != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "short write on HCI socket",
            ));
        }
        Ok(())
    }

    fn close(&self) {
        unsafe {
            libc::shutdown(self.fd, libc::SHUT_RDWR);
        }
    }
}

impl AsRawFd for HciSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for HciSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
