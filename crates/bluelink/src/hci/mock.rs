//! In-memory controller for unit tests

use crate::hci::constants::*;
use crate::hci::packet::{encode_command, AclPacket};
use crate::hci::transport::Transport;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub(crate) const MOCK_ACL_LEN: u16 = 27;
pub(crate) const MOCK_ACL_PKTS: u8 = 4;
pub(crate) const MOCK_BD_ADDR: [u8; 6] = [0x66, 0x55, 0x44, 0x33, 0x22, 0x11];

#[derive(Default)]
struct Inbound {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
}

/// Transport that records writes and, optionally, answers commands the
/// way a cooperative controller would
#[derive(Default)]
pub(crate) struct MockTransport {
    inbound: Mutex<Inbound>,
    ready: Condvar,
    written: Mutex<Vec<Vec<u8>>>,
    auto_reply: bool,
    replies: Mutex<HashMap<u16, Vec<Vec<u8>>>>,
    silenced: Mutex<HashSet<u16>>,
    fail_writes: AtomicBool,
}

impl MockTransport {
    /// A transport that never answers on its own
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport that answers every command with success
    pub fn controller() -> Arc<Self> {
        Arc::new(Self {
            auto_reply: true,
            ..Self::default()
        })
    }

    /// Answer `opcode` with `frames` instead of the default reply
    pub fn reply_with(&self, opcode: u16, frames: Vec<Vec<u8>>) {
        self.replies.lock().unwrap().insert(opcode, frames);
    }

    /// Never answer `opcode`
    pub fn silence(&self, opcode: u16) {
        self.silenced.lock().unwrap().insert(opcode);
    }

    /// Queue one inbound frame for the reader
    pub fn push(&self, frame: Vec<u8>) {
        self.inbound.lock().unwrap().queue.push_back(frame);
        self.ready.notify_all();
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    /// Every command written so far as `(opcode, params)`
    pub fn commands(&self) -> Vec<(u16, Vec<u8>)> {
        self.written()
            .into_iter()
            .filter(|f| f.first() == Some(&HCI_COMMAND_PKT) && f.len() >= 4)
            .map(|f| (u16::from_le_bytes([f[1], f[2]]), f[4..].to_vec()))
            .collect()
    }

    pub fn command_count(&self, opcode: u16) -> usize {
        self.commands().iter().filter(|(op, _)| *op == opcode).count()
    }

    /// Every ACL frame written so far, parsed
    pub fn acl_packets(&self) -> Vec<AclPacket> {
        self.written()
            .into_iter()
            .filter(|f| f.first() == Some(&HCI_ACL_PKT))
            .filter_map(|f| AclPacket::parse(&f[1..]))
            .collect()
    }

    pub fn clear_written(&self) {
        self.written.lock().unwrap().clear();
    }

    fn default_reply(opcode: u16) -> Vec<Vec<u8>> {
        let le = |ocf| crate::hci::packet::opcode(OGF_LE, ocf);
        let disconnect = crate::hci::packet::opcode(OGF_LINK_CTL, OCF_DISCONNECT);

        if opcode == le(OCF_LE_CREATE_CONNECTION)
            || opcode == le(OCF_LE_CONNECTION_UPDATE)
            || opcode == disconnect
        {
            return vec![command_status(opcode, HCI_SUCCESS)];
        }
        if opcode == le(OCF_LE_READ_BUFFER_SIZE) {
            let [lo, hi] = MOCK_ACL_LEN.to_le_bytes();
            return vec![command_complete(opcode, &[HCI_SUCCESS, lo, hi, MOCK_ACL_PKTS])];
        }
        if opcode == crate::hci::packet::opcode(OGF_INFO_PARAM, OCF_READ_BD_ADDR) {
            let mut ret = vec![HCI_SUCCESS];
            ret.extend_from_slice(&MOCK_BD_ADDR);
            return vec![command_complete(opcode, &ret)];
        }
        vec![command_complete(opcode, &[HCI_SUCCESS])]
    }
}

impl Transport for MockTransport {
    fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.inbound.lock().unwrap();
        loop {
            if let Some(frame) = inbound.queue.pop_front() {
                buf[..frame.len()].copy_from_slice(&frame);
                return Ok(frame.len());
            }
            if inbound.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock closed"));
            }
            inbound = self.ready.wait(inbound).unwrap();
        }
    }

    fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        self.written.lock().unwrap().push(packet.to_vec());

        if packet.first() != Some(&HCI_COMMAND_PKT) || packet.len() < 4 {
            return Ok(());
        }
        let opcode = u16::from_le_bytes([packet[1], packet[2]]);
        if self.silenced.lock().unwrap().contains(&opcode) {
            return Ok(());
        }
        let replies = match self.replies.lock().unwrap().get(&opcode) {
            Some(frames) => frames.clone(),
            None if self.auto_reply => Self::default_reply(opcode),
            None => Vec::new(),
        };
        for frame in replies {
            self.push(frame);
        }
        Ok(())
    }

    fn close(&self) {
        self.inbound.lock().unwrap().closed = true;
        self.ready.notify_all();
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub(crate) fn event(code: u8, params: &[u8]) -> Vec<u8> {
    let mut frame = vec![HCI_EVENT_PKT, code, params.len() as u8];
    frame.extend_from_slice(params);
    frame
}

pub(crate) fn command_complete(opcode: u16, ret: &[u8]) -> Vec<u8> {
    let mut params = vec![1];
    params.extend_from_slice(&opcode.to_le_bytes());
    params.extend_from_slice(ret);
    event(EVT_CMD_COMPLETE, &params)
}

pub(crate) fn command_status(opcode: u16, status: u8) -> Vec<u8> {
    let [lo, hi] = opcode.to_le_bytes();
    event(EVT_CMD_STATUS, &[status, 1, lo, hi])
}

pub(crate) fn completed_packets(handle: u16, count: u16) -> Vec<u8> {
    let mut params = vec![1];
    params.extend_from_slice(&handle.to_le_bytes());
    params.extend_from_slice(&count.to_le_bytes());
    event(EVT_NUM_COMP_PKTS, &params)
}

pub(crate) fn disconnection_complete(handle: u16, reason: u8) -> Vec<u8> {
    let [lo, hi] = handle.to_le_bytes();
    event(EVT_DISCONN_COMPLETE, &[HCI_SUCCESS, lo, hi, reason])
}

pub(crate) fn le_connection_complete(status: u8, handle: u16, role: u8, peer: [u8; 6]) -> Vec<u8> {
    let mut params = vec![EVT_LE_CONN_COMPLETE, status];
    params.extend_from_slice(&handle.to_le_bytes());
    params.push(role);
    params.push(0x00);
    params.extend_from_slice(&peer);
    params.extend_from_slice(&0x0018u16.to_le_bytes());
    params.extend_from_slice(&0x0000u16.to_le_bytes());
    params.extend_from_slice(&0x0048u16.to_le_bytes());
    params.push(0x00);
    event(EVT_LE_META_EVENT, &params)
}

pub(crate) fn acl(handle: u16, boundary: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    AclPacket::write_header(&mut frame, handle, boundary, payload.len() as u16);
    frame.extend_from_slice(payload);
    frame
}

pub(crate) fn command_frame(opcode: u16, params: &[u8]) -> Vec<u8> {
    encode_command(opcode, params)
}
