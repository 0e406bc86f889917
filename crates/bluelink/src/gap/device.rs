//! Device facade
//!
//! [`Device`] brings a controller up, owns the HCI engine, the L2CAP
//! multiplexer and the radio control loop, and wires the controller's
//! events to all three.

use crate::error::{HciError, HciResult};
use crate::gap::constants::*;
use crate::gap::params::{AdvParams, ConnParams, DeviceConfig, ScanParams};
use crate::gap::radio::{Notifier, Radio, RadioSettings};
use crate::gap::state::{Outcome, RadioFlags, Transition};
use crate::gap::types::*;
use crate::hci::constants::*;
use crate::hci::{
    AclHandler, AclPacket, BufferPool, DisconnectionComplete, HciCommand, HciEngine, HciEvent,
    HciSocket, LeAdvertisingReport, LeConnectionComplete, NumberOfCompletedPackets, Transport,
};
use crate::l2cap::{Connection, L2capManager};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Called with every new connection
pub type ConnectHook = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;
/// Called with every closed connection and the disconnect reason
pub type DisconnectHook = Arc<dyn Fn(&Arc<Connection>, u8) + Send + Sync>;
/// Called with every advertising report while scanning
pub type ScanObserver = Arc<dyn Fn(&Advertisement) + Send + Sync>;

// Err carries the connection complete status
type DialCompletion = Result<Arc<Connection>, u8>;

#[derive(Default)]
struct Waiters {
    dial: Mutex<Option<Sender<DialCompletion>>>,
    accept: Mutex<Option<Sender<Arc<Connection>>>>,
}

impl Waiters {
    // Dropping the senders fails every blocked dial and accept
    fn clear(&self) {
        lock(&self.dial).take();
        lock(&self.accept).take();
    }
}

#[derive(Default)]
struct Hooks {
    on_connect: RwLock<Option<ConnectHook>>,
    on_disconnect: RwLock<Option<DisconnectHook>>,
    observer: RwLock<Option<ScanObserver>>,
}

impl Hooks {
    fn get<T: Clone>(slot: &RwLock<Option<T>>) -> Option<T> {
        slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set<T>(slot: &RwLock<Option<T>>, value: Option<T>) {
        *slot.write().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

/// Forwards ACL data to the multiplexer and releases waiters when the
/// engine dies
struct Dispatch {
    manager: Arc<L2capManager>,
    waiters: Arc<Waiters>,
}

impl AclHandler for Dispatch {
    fn handle_acl(&self, packet: AclPacket) {
        self.manager.handle_acl(packet);
    }

    fn shutdown(&self, reason: &str) {
        self.manager.shutdown(reason);
        self.waiters.clear();
    }
}

/// Controller buffer budget for ACL data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferSize {
    len: usize,
    count: usize,
}

/// A local LE controller and everything running on top of it
pub struct Device {
    engine: HciEngine,
    manager: Arc<L2capManager>,
    radio: Radio,
    waiters: Arc<Waiters>,
    hooks: Arc<Hooks>,
    local_addr: BdAddr,
    address_type: AddressType,
    config: DeviceConfig,
}

impl Device {
    /// Open HCI device `dev_id` over an exclusive user channel
    pub fn open(dev_id: u16, config: DeviceConfig) -> GapResult<Self> {
        let socket = HciSocket::open_user_channel(dev_id)?;
        Self::with_transport(Arc::new(socket), config)
    }

    /// Bring up a controller reachable through `transport`
    pub fn with_transport(transport: Arc<dyn Transport>, config: DeviceConfig) -> GapResult<Self> {
        if !config.adv.payloads_fit() {
            return Err(GapError::InvalidParameter(format!(
                "advertising payloads are limited to {} bytes",
                MAX_ADV_DATA_LEN
            )));
        }

        let engine = HciEngine::start(transport)?;

        engine.send(&HciCommand::Reset)?;
        engine.send(&HciCommand::SetEventMask {
            mask: config.event_mask,
        })?;
        engine.send(&HciCommand::LeSetEventMask {
            mask: config.le_event_mask,
        })?;

        let reply = engine.send(&HciCommand::ReadBdAddr)?;
        let public_addr = BdAddr::from_slice(reply.get(1..).unwrap_or_default())
            .ok_or(HciError::InvalidPacketFormat)?;
        let buffers = read_buffer_size(&engine)?;

        let (local_addr, address_type) = if config.use_random_address {
            let addr = BdAddr::random_static();
            engine.send(&HciCommand::LeSetRandomAddress {
                address: addr.bytes,
            })?;
            (addr, AddressType::Random)
        } else {
            (public_addr, AddressType::Public)
        };
        let own_address_type = u8::from(address_type);

        for command in config.adv.to_commands(own_address_type) {
            engine.send(&command)?;
        }

        info!(
            "Controller up: address {} ({:?}), {} ACL buffers of {} bytes",
            local_addr, address_type, buffers.count, buffers.len
        );

        let pool = Arc::new(BufferPool::new(buffers.count, buffers.len));
        let manager = Arc::new(L2capManager::new(
            engine.acl_link(pool),
            engine.commander(),
            config.l2cap,
            local_addr,
        ));
        let waiters = Arc::new(Waiters::default());
        let hooks = Arc::new(Hooks::default());

        let radio = Radio::start(
            engine.commander(),
            RadioSettings {
                scan: config.scan,
                adv: config.adv.clone(),
                conn: config.conn,
                own_address_type,
            },
        )?;

        let device = Self {
            engine,
            manager,
            radio,
            waiters,
            hooks,
            local_addr,
            address_type,
            config,
        };
        device.wire_handlers();
        Ok(device)
    }

    fn wire_handlers(&self) {
        self.engine.set_acl_handler(Arc::new(Dispatch {
            manager: self.manager.clone(),
            waiters: self.waiters.clone(),
        }));

        let manager = self.manager.clone();
        self.engine
            .register_event_handler(EVT_NUM_COMP_PKTS, move |event: &HciEvent| {
                let completed =
                    NumberOfCompletedPackets::parse(event).ok_or(HciError::InvalidPacketFormat)?;
                manager.on_completed_packets(&completed);
                Ok(())
            });

        let (manager, hooks, notifier) = self.handler_context();
        self.engine
            .register_event_handler(EVT_DISCONN_COMPLETE, move |event: &HciEvent| {
                let complete =
                    DisconnectionComplete::parse(event).ok_or(HciError::InvalidPacketFormat)?;
                if let Some(conn) = manager.on_disconnection_complete(&complete) {
                    if conn.role() == Role::Peripheral {
                        notifier.notify(Transition::CentralDisconnected);
                    }
                    if let Some(hook) = Hooks::get(&hooks.on_disconnect) {
                        hook(&conn, complete.reason);
                    }
                }
                Ok(())
            });

        let (manager, hooks, notifier) = self.handler_context();
        let waiters = self.waiters.clone();
        self.engine
            .register_subevent_handler(EVT_LE_CONN_COMPLETE, move |event: &HciEvent| {
                let complete =
                    LeConnectionComplete::parse(event).ok_or(HciError::InvalidPacketFormat)?;
                on_connection_complete(&complete, &manager, &waiters, &hooks, &notifier);
                Ok(())
            });

        let hooks = self.hooks.clone();
        self.engine
            .register_subevent_handler(EVT_LE_ADVERTISING_REPORT, move |event: &HciEvent| {
                let reports = LeAdvertisingReport::parse_from_event(event)?;
                if let Some(observer) = Hooks::get(&hooks.observer) {
                    for report in &reports {
                        observer(&Advertisement::from(report));
                    }
                }
                Ok(())
            });
    }

    fn handler_context(&self) -> (Arc<L2capManager>, Arc<Hooks>, Notifier) {
        (
            self.manager.clone(),
            self.hooks.clone(),
            self.radio.notifier(),
        )
    }

    pub fn local_address(&self) -> BdAddr {
        self.local_addr
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Radio flags as of the last completed transition
    pub fn radio_flags(&self) -> RadioFlags {
        self.radio.flags()
    }

    /// ACL buffers sized from the controller's reply
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        self.manager.pool()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.manager.connections()
    }

    pub fn connection(&self, handle: u16) -> Option<Arc<Connection>> {
        self.manager.connection(handle)
    }

    /// Register the hook run for every new connection, replacing any previous one
    ///
    /// Runs on the HCI reader thread, so it must not block.
    pub fn on_connect<F>(&self, hook: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        Hooks::set(&self.hooks.on_connect, Some(Arc::new(hook) as ConnectHook));
    }

    /// Register the hook run for every closed connection
    ///
    /// Runs on the HCI reader thread, so it must not block.
    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: Fn(&Arc<Connection>, u8) + Send + Sync + 'static,
    {
        Hooks::set(&self.hooks.on_disconnect, Some(Arc::new(hook) as DisconnectHook));
    }

    /// Start advertising with the current advertising parameters
    pub fn advertise(&self) -> GapResult<Outcome> {
        self.radio.request(Transition::Advertising)
    }

    pub fn stop_advertising(&self) -> GapResult<Outcome> {
        self.radio.request(Transition::StopAdvertising)
    }

    /// Start scanning, handing every report to `observer`
    ///
    /// The observer runs on the HCI reader thread and replaces any
    /// previous one.
    pub fn scan<F>(&self, observer: F) -> GapResult<Outcome>
    where
        F: Fn(&Advertisement) + Send + Sync + 'static,
    {
        Hooks::set(&self.hooks.observer, Some(Arc::new(observer) as ScanObserver));
        let outcome = self.radio.request(Transition::Scanning);
        if outcome.is_err() && !self.radio.flags().scanning {
            Hooks::set(&self.hooks.observer, None);
        }
        outcome
    }

    pub fn stop_scanning(&self) -> GapResult<Outcome> {
        let outcome = self.radio.request(Transition::StopScanning)?;
        Hooks::set(&self.hooks.observer, None);
        Ok(outcome)
    }

    /// Connect to `peer` as central using the configured dial timeout
    pub fn dial(&self, peer: BdAddr, peer_type: AddressType) -> GapResult<Arc<Connection>> {
        self.dial_with_timeout(peer, peer_type, self.config.dial_timeout)
    }

    /// Connect to `peer` as central
    ///
    /// On timeout the attempt is canceled and the call still waits for
    /// the controller to report how the attempt ended. A connection that
    /// completed just before the cancel is returned as a success.
    pub fn dial_with_timeout(
        &self,
        peer: BdAddr,
        peer_type: AddressType,
        timeout: Option<Duration>,
    ) -> GapResult<Arc<Connection>> {
        let (tx, rx) = mpsc::channel();
        {
            let mut slot = lock(&self.waiters.dial);
            if slot.is_some() {
                return Err(GapError::Conflict("already dialing".into()));
            }
            *slot = Some(tx);
        }

        match self.radio.request(Transition::Dialing { peer, peer_type }) {
            Ok(Outcome::Swallowed { status }) => {
                // Nothing is in flight, so no completion will arrive
                lock(&self.waiters.dial).take();
                self.radio.request(Transition::StopDialing)?;
                return Err(GapError::ConnectionFailed(status));
            }
            Ok(_) => debug!("Dialing {}", peer),
            Err(err) => {
                lock(&self.waiters.dial).take();
                return Err(err);
            }
        }

        let completion = match timeout {
            None => rx.recv().map_err(|_| GapError::Closed)?,
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(completion) => completion,
                Err(RecvTimeoutError::Disconnected) => return Err(GapError::Closed),
                Err(RecvTimeoutError::Timeout) => {
                    info!("Dial to {} timed out, canceling", peer);
                    if let Err(err) = self.radio.request(Transition::DialingCanceling) {
                        warn!("Canceling dial to {} failed: {}", peer, err);
                    }
                    return match rx.recv() {
                        Ok(Ok(conn)) => Ok(conn),
                        Ok(Err(_)) => Err(GapError::Timeout),
                        Err(_) => Err(GapError::Closed),
                    };
                }
            },
        };
        completion.map_err(GapError::ConnectionFailed)
    }

    /// Wait for a central to connect using the configured accept timeout
    pub fn accept(&self) -> GapResult<Arc<Connection>> {
        self.accept_with_timeout(self.config.accept_timeout)
    }

    /// Advertise until a central connects
    ///
    /// On timeout listening is stopped and [`GapError::Timeout`] returned.
    pub fn accept_with_timeout(&self, timeout: Option<Duration>) -> GapResult<Arc<Connection>> {
        let (tx, rx) = mpsc::channel();
        {
            let mut slot = lock(&self.waiters.accept);
            if slot.is_some() {
                return Err(GapError::Conflict("already accepting".into()));
            }
            *slot = Some(tx);
        }

        if let Err(err) = self.radio.request(Transition::Listening) {
            lock(&self.waiters.accept).take();
            return Err(err);
        }

        let Some(timeout) = timeout else {
            return rx.recv().map_err(|_| GapError::Closed);
        };
        match rx.recv_timeout(timeout) {
            Ok(conn) => Ok(conn),
            Err(RecvTimeoutError::Disconnected) => Err(GapError::Closed),
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.waiters.accept).take();
                // A central may have connected while the slot was released
                if let Ok(conn) = rx.try_recv() {
                    return Ok(conn);
                }
                self.radio.request(Transition::StopListening)?;
                Err(GapError::Timeout)
            }
        }
    }

    pub fn update_scan_params(&self, params: ScanParams) -> GapResult<Outcome> {
        self.radio.request(Transition::ScanParamsUpdated(params))
    }

    pub fn update_adv_params(&self, params: AdvParams) -> GapResult<Outcome> {
        if !params.payloads_fit() {
            return Err(GapError::InvalidParameter(format!(
                "advertising payloads are limited to {} bytes",
                MAX_ADV_DATA_LEN
            )));
        }
        self.radio.request(Transition::AdvParamsUpdated(params))
    }

    /// Parameters used by the next dial
    pub fn update_conn_params(&self, params: ConnParams) -> GapResult<Outcome> {
        self.radio.request(Transition::ConnParamsUpdated(params))
    }

    /// Shut the engine and the radio loop down
    ///
    /// Every open connection, blocked dial and blocked accept fails.
    pub fn close(&self) {
        self.engine.close();
        self.radio.close();
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}

/// Route one LE Connection Complete event
///
/// Failed attempts and central-role links answer a dial; peripheral-role
/// links answer an accept.
fn on_connection_complete(
    complete: &LeConnectionComplete,
    manager: &L2capManager,
    waiters: &Waiters,
    hooks: &Hooks,
    notifier: &Notifier,
) {
    let conn = manager.on_connection_complete(complete);

    if complete.status != HCI_SUCCESS || complete.role == LE_ROLE_CENTRAL {
        notifier.notify(Transition::StopDialing);
        let completion = conn.clone().ok_or(complete.status);
        match lock(&waiters.dial).take() {
            Some(waiter) => {
                if waiter.send(completion).is_err() {
                    debug!("Dialer stopped waiting");
                }
            }
            None => debug!(
                "Connection complete with status {:#04x} and no dial waiting",
                complete.status
            ),
        }
    } else if let Some(conn) = &conn {
        notifier.notify(Transition::CentralConnected);
        if let Some(waiter) = lock(&waiters.accept).take() {
            if waiter.send(conn.clone()).is_err() {
                debug!("Acceptor stopped waiting");
            }
        }
    }

    if let Some(conn) = conn {
        if let Some(hook) = Hooks::get(&hooks.on_connect) {
            hook(&conn);
        }
    }
}

/// Read the ACL buffer budget, preferring the LE-specific pool
fn read_buffer_size(engine: &HciEngine) -> HciResult<BufferSize> {
    let reply = engine.send(&HciCommand::LeReadBufferSize)?;
    if reply.len() < 4 {
        return Err(HciError::InvalidPacketFormat);
    }
    let le = BufferSize {
        len: LittleEndian::read_u16(&reply[1..3]) as usize,
        count: reply[3] as usize,
    };
    if le.len > 0 && le.count > 0 {
        return Ok(le);
    }

    // Zero means the controller shares its BR/EDR buffers with LE
    let reply = engine.send(&HciCommand::ReadBufferSize)?;
    if reply.len() < 8 {
        return Err(HciError::InvalidPacketFormat);
    }
    let shared = BufferSize {
        len: LittleEndian::read_u16(&reply[1..3]) as usize,
        count: LittleEndian::read_u16(&reply[4..6]) as usize,
    };
    if shared.len == 0 || shared.count == 0 {
        return Err(HciError::InvalidPacketFormat);
    }
    Ok(shared)
}
