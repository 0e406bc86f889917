//! One L2CAP link over one ACL connection
//!
//! Inbound fragments arrive from the manager over a channel and are
//! reassembled by a dedicated thread. Complete ATT frames queue up for
//! [`Connection::read`]; signaling frames are answered in place.

use super::constants::*;
use super::packet::{segment_sdu, L2capHeader};
use super::signaling::SignalingMessage;
use super::types::*;
use crate::error::HciError;
use crate::gap::{AddressType, BdAddr, Role};
use crate::hci::constants::HCI_REMOTE_USER_TERMINATED;
use crate::hci::{AclLink, AclPacket, CommandSender, HciCommand};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, trace, warn};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why a connection stopped delivering data
#[derive(Debug, Clone)]
pub(crate) enum Teardown {
    Disconnected(u8),
    Framing(String),
    Terminated(String),
}

#[derive(Debug, Clone, Copy)]
struct Sizes {
    rx_mtu: u16,
    tx_mtu: u16,
    rx_mps: u16,
    tx_mps: u16,
}

struct Inbound {
    pdus: Receiver<Vec<u8>>,
    // A frame handed back because the caller's buffer was too small
    stash: Option<Vec<u8>>,
}

/// Static description of a freshly completed link
#[derive(Debug, Clone, Copy)]
pub struct LinkInfo {
    pub handle: u16,
    pub role: Role,
    pub local_addr: BdAddr,
    pub peer_addr: BdAddr,
    pub peer_addr_type: AddressType,
}

/// Byte-stream view of one LE connection, handed to ATT
pub struct Connection {
    info: LinkInfo,
    le_frame: bool,
    sizes: Mutex<Sizes>,
    link: AclLink,
    commander: CommandSender,
    inbound: Mutex<Inbound>,
    teardown: Mutex<Option<Teardown>>,
}

impl Connection {
    pub(crate) fn new(
        info: LinkInfo,
        config: &L2capConfig,
        link: AclLink,
        commander: CommandSender,
        pdus: Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            info,
            le_frame: config.le_frame,
            sizes: Mutex::new(Sizes {
                rx_mtu: config.rx_mtu,
                tx_mtu: config.tx_mtu,
                rx_mps: config.rx_mps,
                tx_mps: config.tx_mps,
            }),
            link,
            commander,
            inbound: Mutex::new(Inbound { pdus, stash: None }),
            teardown: Mutex::new(None),
        }
    }

    /// Controller-assigned connection handle
    pub fn handle(&self) -> u16 {
        self.info.handle
    }

    pub fn role(&self) -> Role {
        self.info.role
    }

    pub fn local_addr(&self) -> BdAddr {
        self.info.local_addr
    }

    pub fn peer_addr(&self) -> BdAddr {
        self.info.peer_addr
    }

    pub fn peer_addr_type(&self) -> AddressType {
        self.info.peer_addr_type
    }

    pub fn rx_mtu(&self) -> u16 {
        lock(&self.sizes).rx_mtu
    }

    pub fn tx_mtu(&self) -> u16 {
        lock(&self.sizes).tx_mtu
    }

    pub fn rx_mps(&self) -> u16 {
        lock(&self.sizes).rx_mps
    }

    pub fn tx_mps(&self) -> u16 {
        lock(&self.sizes).tx_mps
    }

    /// Set the largest SDU accepted from the peer
    ///
    /// Without LE frames an SDU is a single frame, so the frame limit
    /// grows with it.
    pub fn set_rx_mtu(&self, mtu: u16) {
        let mut sizes = lock(&self.sizes);
        sizes.rx_mtu = mtu;
        if !self.le_frame {
            sizes.rx_mps = sizes.rx_mps.max(mtu);
        }
    }

    /// Set the largest SDU sent to the peer
    pub fn set_tx_mtu(&self, mtu: u16) {
        let mut sizes = lock(&self.sizes);
        sizes.tx_mtu = mtu;
        if !self.le_frame {
            sizes.tx_mps = sizes.tx_mps.max(mtu);
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.teardown).is_none()
    }

    /// Read one SDU into `buf`, blocking until one is available
    ///
    /// Fails with [`L2capError::BufferTooSmall`] without consuming the SDU
    /// when `buf` cannot hold it. A malformed SDU fails the connection:
    /// this and every later read return [`L2capError::Framing`].
    pub fn read(&self, buf: &mut [u8]) -> L2capResult<usize> {
        let mut inbound = lock(&self.inbound);
        if let Some(Teardown::Framing(reason)) = &*lock(&self.teardown) {
            return Err(L2capError::Framing(reason.clone()));
        }
        let first = self.next_pdu(&mut inbound)?;

        if !self.le_frame {
            if buf.len() < first.len() {
                let needed = first.len();
                inbound.stash = Some(first);
                return Err(L2capError::BufferTooSmall {
                    needed,
                    available: buf.len(),
                });
            }
            buf[..first.len()].copy_from_slice(&first);
            return Ok(first.len());
        }

        if first.len() < L2CAP_SDU_LENGTH_SIZE {
            return Err(self.fail_framing("frame without SDU length".into()));
        }
        let sdu_len = LittleEndian::read_u16(&first[..L2CAP_SDU_LENGTH_SIZE]) as usize;
        let rx_mtu = self.rx_mtu();
        if sdu_len > rx_mtu as usize {
            return Err(self.fail_framing(format!(
                "SDU length {} exceeds MTU {}",
                sdu_len, rx_mtu
            )));
        }
        if buf.len() < sdu_len {
            inbound.stash = Some(first);
            return Err(L2capError::BufferTooSmall {
                needed: sdu_len,
                available: buf.len(),
            });
        }

        let mut sdu = Vec::with_capacity(sdu_len);
        let mut segment = first[L2CAP_SDU_LENGTH_SIZE..].to_vec();
        loop {
            if sdu.len() + segment.len() > sdu_len {
                return Err(self.fail_framing(format!(
                    "SDU overran its declared length {}",
                    sdu_len
                )));
            }
            sdu.extend_from_slice(&segment);
            if sdu.len() == sdu_len {
                buf[..sdu_len].copy_from_slice(&sdu);
                return Ok(sdu_len);
            }
            segment = self.next_pdu(&mut inbound)?;
        }
    }

    // Segments left in the queue can no longer be delimited, so the link goes.
    fn fail_framing(&self, reason: String) -> L2capError {
        warn!("Framing error on handle {:#06x}: {}", self.info.handle, reason);
        self.mark(Teardown::Framing(reason.clone()));
        if let Err(err) = self.disconnect() {
            debug!("Disconnect after framing error failed: {}", err);
        }
        L2capError::Framing(reason)
    }

    fn next_pdu(&self, inbound: &mut Inbound) -> L2capResult<Vec<u8>> {
        if let Some(pdu) = inbound.stash.take() {
            return Ok(pdu);
        }
        inbound.pdus.recv().map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> L2capError {
        match &*lock(&self.teardown) {
            Some(Teardown::Framing(reason)) => L2capError::Framing(reason.clone()),
            Some(Teardown::Terminated(reason)) => {
                L2capError::Hci(HciError::Terminated(reason.clone()))
            }
            Some(Teardown::Disconnected(_)) | None => L2capError::ConnectionTerminated,
        }
    }

    /// Write one SDU to the peer's ATT channel
    ///
    /// Returns once every fragment has been handed to the controller.
    pub fn write(&self, sdu: &[u8]) -> L2capResult<usize> {
        if !self.is_open() {
            return Err(self.closed_error());
        }

        let sizes = *lock(&self.sizes);
        if sdu.len() > sizes.tx_mtu as usize {
            return Err(L2capError::MtuExceeded {
                len: sdu.len(),
                mtu: sizes.tx_mtu,
            });
        }

        let frames = segment_sdu(
            L2CAP_ATTRIBUTE_PROTOCOL_CID,
            sdu,
            sizes.tx_mps as usize,
            self.le_frame,
        );
        self.send_frames(&frames)?;
        Ok(sdu.len())
    }

    fn send_frames(&self, frames: &[Vec<u8>]) -> L2capResult<()> {
        let fragment = (self.tx_mps() as usize).min(self.link.max_fragment()).max(1);
        self.link.send_pdus(self.info.handle, frames, fragment)?;
        Ok(())
    }

    /// Ask the controller to drop the link
    ///
    /// Teardown completes when the Disconnection Complete event arrives.
    pub fn close(&self) -> L2capResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.disconnect()
    }

    fn disconnect(&self) -> L2capResult<()> {
        self.commander.send(&HciCommand::Disconnect {
            handle: self.info.handle,
            reason: HCI_REMOTE_USER_TERMINATED,
        })?;
        Ok(())
    }

    pub(crate) fn mark(&self, teardown: Teardown) {
        let mut slot = lock(&self.teardown);
        if slot.is_none() {
            *slot = Some(teardown);
        }
    }

    /// Reassembly loop; runs on the connection's own thread
    pub(crate) fn run(&self, fragments: Receiver<AclPacket>, pdus: Sender<Vec<u8>>) {
        while let Ok(first) = fragments.recv() {
            match self.assemble(first, &fragments) {
                Ok(Some(pdu)) => self.dispatch(&pdu, &pdus),
                Ok(None) => break,
                Err(reason) => {
                    self.fail_framing(reason);
                    break;
                }
            }
        }
        debug!("Reassembly for handle {:#06x} finished", self.info.handle);
    }

    // Ok(None) means the fragment stream closed mid-PDU.
    fn assemble(
        &self,
        first: AclPacket,
        fragments: &Receiver<AclPacket>,
    ) -> Result<Option<Vec<u8>>, String> {
        if first.is_continuation() {
            return Err("continuation fragment without a start".into());
        }
        let header = L2capHeader::parse(&first.data)
            .ok_or_else(|| format!("{} byte fragment cannot hold a header", first.data.len()))?;

        let rx_mps = self.rx_mps();
        if header.length > rx_mps {
            return Err(format!(
                "frame length {} exceeds MPS {}",
                header.length, rx_mps
            ));
        }

        let total = header.frame_size();
        let mut pdu = first.data;
        while pdu.len() < total {
            let Ok(next) = fragments.recv() else {
                return Ok(None);
            };
            if !next.is_continuation() {
                return Err(format!(
                    "new frame started with {} of {} bytes assembled",
                    pdu.len(),
                    total
                ));
            }
            pdu.extend_from_slice(&next.data);
        }
        if pdu.len() > total {
            return Err(format!(
                "fragments carry {} bytes for a {} byte frame",
                pdu.len(),
                total
            ));
        }
        Ok(Some(pdu))
    }

    fn dispatch(&self, pdu: &[u8], pdus: &Sender<Vec<u8>>) {
        let Some(header) = L2capHeader::parse(pdu) else {
            return;
        };
        let payload = &pdu[L2CAP_BASIC_HEADER_SIZE..];
        trace!(
            "l2cap rx handle {:#06x} cid {:#06x}: {}",
            self.info.handle,
            header.channel_id,
            hex::encode(payload)
        );

        match header.channel_id {
            L2CAP_ATTRIBUTE_PROTOCOL_CID => {
                if pdus.send(payload.to_vec()).is_err() {
                    debug!("Reader for handle {:#06x} is gone", self.info.handle);
                }
            }
            L2CAP_LE_SIGNALING_CID => self.handle_signaling(payload),
            L2CAP_SECURITY_MANAGER_CID => {
                debug!("Dropping SMP frame on handle {:#06x}", self.info.handle)
            }
            cid => info!(
                "Dropping frame for unrecognized CID {:#06x} on handle {:#06x}",
                cid, self.info.handle
            ),
        }
    }

    fn handle_signaling(&self, payload: &[u8]) {
        let message = match SignalingMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!("Dropping signaling frame: {}", err);
                return;
            }
        };

        let reply = match message {
            SignalingMessage::ConnectionParameterUpdateRequest { identifier, params } => {
                if self.info.role != Role::Central {
                    // Only the central may apply parameters
                    Some(SignalingMessage::CommandReject {
                        identifier,
                        reason: L2CAP_REJECT_NOT_UNDERSTOOD,
                        data: Vec::new(),
                    })
                } else {
                    let accepted = params.validate();
                    let result = if accepted {
                        L2CAP_CONN_PARAM_UPDATE_ACCEPTED
                    } else {
                        L2CAP_CONN_PARAM_UPDATE_REJECTED
                    };
                    self.signal(&SignalingMessage::ConnectionParameterUpdateResponse {
                        identifier,
                        result,
                    });
                    if accepted {
                        self.apply_parameters(&params);
                    }
                    None
                }
            }
            SignalingMessage::ConnectionParameterUpdateResponse { result, .. } => {
                debug!("Connection parameter update answered with {:#06x}", result);
                None
            }
            SignalingMessage::CommandReject { reason, .. } => {
                debug!("Peer rejected a signaling command: {:#06x}", reason);
                None
            }
            SignalingMessage::Unknown { identifier, code } => {
                debug!("Rejecting signaling command {:#04x}", code);
                Some(SignalingMessage::CommandReject {
                    identifier,
                    reason: L2CAP_REJECT_NOT_UNDERSTOOD,
                    data: Vec::new(),
                })
            }
        };

        if let Some(reply) = reply {
            self.signal(&reply);
        }
    }

    fn signal(&self, message: &SignalingMessage) {
        if let Err(err) = self.send_frames(&[message.to_pdu()]) {
            warn!("Failed to send signaling reply: {}", err);
        }
    }

    fn apply_parameters(&self, params: &ConnectionParameterUpdate) {
        let command = HciCommand::LeConnectionUpdate {
            handle: self.info.handle,
            conn_interval_min: params.conn_interval_min,
            conn_interval_max: params.conn_interval_max,
            conn_latency: params.conn_latency,
            supervision_timeout: params.supervision_timeout,
            min_ce_length: 0,
            max_ce_length: 0,
        };
        if let Err(err) = self.commander.send(&command) {
            warn!("Connection update on handle {:#06x} failed: {}", self.info.handle, err);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.info.handle)
            .field("role", &self.info.role)
            .field("peer", &self.info.peer_addr.to_string())
            .field("open", &self.is_open())
            .finish()
    }
}
