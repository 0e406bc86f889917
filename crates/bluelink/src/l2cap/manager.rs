//! L2CAP connection multiplexer
//!
//! The manager owns the table of open connections keyed by controller
//! handle. Connection lifecycle events and completed-packet reports are fed
//! in by whoever wires the HCI event handlers; inbound ACL data arrives
//! through [`AclHandler`].

use super::conn::{Connection, LinkInfo, Teardown};
use super::types::L2capConfig;
use crate::gap::{AddressType, BdAddr, Role};
use crate::hci::{
    AclHandler, AclLink, AclPacket, BufferPool, CommandSender, DisconnectionComplete,
    LeConnectionComplete, NumberOfCompletedPackets,
};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

struct Entry {
    conn: Arc<Connection>,
    fragments: Sender<AclPacket>,
}

/// Table of open connections plus the shared ACL write path
pub struct L2capManager {
    link: AclLink,
    commander: CommandSender,
    config: L2capConfig,
    local_addr: BdAddr,
    connections: Mutex<HashMap<u16, Entry>>,
}

impl L2capManager {
    pub fn new(
        link: AclLink,
        commander: CommandSender,
        config: L2capConfig,
        local_addr: BdAddr,
    ) -> Self {
        Self {
            link,
            commander,
            config,
            local_addr,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u16, Entry>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        self.link.pool()
    }

    pub fn config(&self) -> &L2capConfig {
        &self.config
    }

    /// Register a newly completed link and start its reassembly thread
    ///
    /// Returns `None` for a failed connection attempt.
    pub fn on_connection_complete(&self, event: &LeConnectionComplete) -> Option<Arc<Connection>> {
        if event.status != crate::hci::constants::HCI_SUCCESS {
            debug!("Connection attempt failed with status {:#04x}", event.status);
            return None;
        }

        let role = match Role::from_le(event.role) {
            Some(role) => role,
            None => {
                warn!("Unknown role {:#04x} in connection complete", event.role);
                return None;
            }
        };

        let info = LinkInfo {
            handle: event.connection_handle,
            role,
            local_addr: self.local_addr,
            peer_addr: BdAddr::new(event.peer_address),
            peer_addr_type: AddressType::from(event.peer_address_type),
        };

        self.pool().activate(info.handle);
        let (fragment_tx, fragment_rx) = mpsc::channel();
        let (pdu_tx, pdu_rx) = mpsc::channel();
        let conn = Arc::new(Connection::new(
            info,
            &self.config,
            self.link.clone(),
            self.commander.clone(),
            pdu_rx,
        ));

        let worker = conn.clone();
        let spawned = thread::Builder::new()
            .name(format!("l2cap-{:#06x}", info.handle))
            .spawn(move || worker.run(fragment_rx, pdu_tx));
        if let Err(err) = spawned {
            warn!("Failed to start reassembly for handle {:#06x}: {}", info.handle, err);
            conn.mark(Teardown::Terminated(err.to_string()));
            return None;
        }

        let previous = self.table().insert(
            info.handle,
            Entry {
                conn: conn.clone(),
                fragments: fragment_tx,
            },
        );
        if let Some(previous) = previous {
            warn!("Handle {:#06x} reused while still open", info.handle);
            previous.conn.mark(Teardown::Disconnected(0));
        }

        info!(
            "Connected to {} on handle {:#06x} as {:?}",
            info.peer_addr, info.handle, role
        );
        Some(conn)
    }

    /// Tear down a link and reclaim its in-flight buffers
    pub fn on_disconnection_complete(
        &self,
        event: &DisconnectionComplete,
    ) -> Option<Arc<Connection>> {
        let entry = self.table().remove(&event.connection_handle);
        let reclaimed = self.pool().checkin_all(event.connection_handle);

        match entry {
            Some(entry) => {
                entry.conn.mark(Teardown::Disconnected(event.reason));
                // Dropping the fragment sender ends the reassembly thread,
                // which in turn closes the reader's queue.
                drop(entry.fragments);
                info!(
                    "Disconnected handle {:#06x} (reason {:#04x}, {} buffers reclaimed)",
                    event.connection_handle, event.reason, reclaimed
                );
                Some(entry.conn)
            }
            None => {
                warn!(
                    "Disconnection for unknown handle {:#06x}",
                    event.connection_handle
                );
                None
            }
        }
    }

    /// Return buffers the controller reports as delivered
    pub fn on_completed_packets(&self, event: &NumberOfCompletedPackets) {
        for &(handle, count) in &event.completed {
            self.pool().complete(handle, count as usize);
        }
    }

    pub fn connection(&self, handle: u16) -> Option<Arc<Connection>> {
        self.table().get(&handle).map(|entry| entry.conn.clone())
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.table().values().map(|entry| entry.conn.clone()).collect()
    }
}

impl AclHandler for L2capManager {
    fn handle_acl(&self, packet: AclPacket) {
        let handle = packet.handle;
        let table = self.table();
        match table.get(&handle) {
            Some(entry) => {
                if entry.fragments.send(packet).is_err() {
                    debug!("Reassembly for handle {:#06x} already stopped", handle);
                }
            }
            None => warn!("ACL data for unknown handle {:#06x}", handle),
        }
    }

    fn shutdown(&self, reason: &str) {
        let entries: Vec<Entry> = self.table().drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            entry.conn.mark(Teardown::Terminated(reason.to_string()));
        }
        self.pool().close(reason);
    }
}
