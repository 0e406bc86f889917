//! Packet transport to the controller
//!
//! The engine only needs a duplex channel that moves whole HCI frames
//! (packet type byte included). How the channel is obtained is up to the
//! implementation; [`HciSocket`](super::HciSocket) is the Linux one.

use std::io;

/// A duplex channel carrying whole HCI frames
///
/// Both methods take `&self`: the reader task and every writer share one
/// transport concurrently.
pub trait Transport: Send + Sync {
    /// Blocks until one frame is available and copies it into `buf`.
    fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes one complete frame.
    fn write_packet(&self, packet: &[u8]) -> io::Result<()>;

    /// Unblocks a pending `read_packet` so the reader can exit.
    fn close(&self) {}
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_packet(buf)
    }

    fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        (**self).write_packet(packet)
    }

    fn close(&self) {
        (**self).close()
    }
}
