//! HCI command/event engine
//!
//! The engine owns the transport. A reader thread drains it and routes
//! every inbound frame: command replies resolve the caller blocked in
//! [`HciEngine::submit`], other events go to the handler registered for
//! their code (LE meta events by subevent code), and ACL data goes to the
//! [`AclHandler`], normally the L2CAP manager.
//!
//! A transport read or write failure is fatal. It records the terminal
//! reason, fails every pending and future command, and shuts the ACL
//! handler down so connection readers unblock.

use crate::error::{HciError, HciResult};
use crate::hci::constants::*;
use crate::hci::packet::{
    encode_command, AclPacket, CommandComplete, CommandStatus, HciCommand, HciEvent,
};
use crate::hci::pool::BufferPool;
use crate::hci::transport::Transport;
use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};

/// Upper bound on command credits accumulated from controller reports
pub const COMMAND_CREDIT_LIMIT: usize = 8;

/// Handler for one event code or LE subevent code
///
/// Handlers run on the reader thread. They must not submit commands and
/// wait for the reply, since the reply can only be read once they return.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &HciEvent) -> HciResult<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&HciEvent) -> HciResult<()> + Send + Sync,
{
    fn handle(&self, event: &HciEvent) -> HciResult<()> {
        self(event)
    }
}

/// Receiver of inbound ACL data
pub trait AclHandler: Send + Sync {
    /// One inbound ACL fragment
    fn handle_acl(&self, packet: AclPacket);

    /// The engine terminated; release everything waiting on ACL traffic.
    fn shutdown(&self, reason: &str);
}

enum Reply {
    Complete(Vec<u8>),
    Status(u8),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serialized frame writer shared by commands and ACL data
struct Tx {
    transport: Arc<dyn Transport>,
    lock: Mutex<()>,
}

impl Tx {
    fn write(&self, frame: &[u8]) -> io::Result<()> {
        let _guard = lock(&self.lock);
        trace!("hci tx {}", hex::encode(frame));
        self.transport.write_packet(frame)
    }
}

struct Credits {
    available: usize,
    terminal: Option<String>,
}

type HandlerTable = RwLock<HashMap<u8, Arc<dyn EventHandler>>>;

struct Shared {
    tx: Arc<Tx>,
    credits: Mutex<Credits>,
    credit_freed: Condvar,
    pending: Mutex<HashMap<u16, SyncSender<Reply>>>,
    event_handlers: HandlerTable,
    subevent_handlers: HandlerTable,
    acl_handler: RwLock<Option<Arc<dyn AclHandler>>>,
}

impl Shared {
    fn terminal(&self) -> Option<String> {
        lock(&self.credits).terminal.clone()
    }

    fn terminated(&self) -> HciError {
        HciError::Terminated(self.terminal().unwrap_or_else(|| "engine closed".into()))
    }

    fn acquire_credit(&self) -> HciResult<()> {
        let mut credits = lock(&self.credits);
        loop {
            if let Some(reason) = &credits.terminal {
                return Err(HciError::Terminated(reason.clone()));
            }
            if credits.available > 0 {
                credits.available -= 1;
                return Ok(());
            }
            credits = self
                .credit_freed
                .wait(credits)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn add_credits(&self, n: usize) {
        let mut credits = lock(&self.credits);
        credits.available = (credits.available + n).min(COMMAND_CREDIT_LIMIT);
        drop(credits);
        if n > 0 {
            self.credit_freed.notify_all();
        }
    }

    fn submit(&self, opcode: u16, params: &[u8]) -> HciResult<Vec<u8>> {
        if params.len() > HCI_MAX_PARAM_LEN {
            return Err(HciError::InvalidParamLength(params.len()));
        }

        self.acquire_credit()?;

        let (reply_tx, reply_rx) = sync_channel(1);
        {
            let mut pending = lock(&self.pending);
            // Checked under the pending lock so a concurrent `fail` either
            // rejects us here or drains our entry afterwards.
            if self.terminal().is_some() {
                return Err(self.terminated());
            }
            if pending.contains_key(&opcode) {
                drop(pending);
                self.add_credits(1);
                return Err(HciError::CommandPending(opcode));
            }
            pending.insert(opcode, reply_tx);
        }

        let frame = encode_command(opcode, params);
        if let Err(err) = self.tx.write(&frame) {
            lock(&self.pending).remove(&opcode);
            self.fail(&format!("write failed: {}", err));
            return Err(HciError::SendError(err));
        }

        match reply_rx.recv() {
            Ok(Reply::Complete(ret)) => match ret.first() {
                Some(&status) if status != HCI_SUCCESS => {
                    Err(HciError::CommandFailed { opcode, status })
                }
                _ => Ok(ret),
            },
            Ok(Reply::Status(HCI_SUCCESS)) => Ok(vec![HCI_SUCCESS]),
            Ok(Reply::Status(status)) => Err(HciError::CommandFailed { opcode, status }),
            Err(_) => Err(self.terminated()),
        }
    }

    fn resolve(&self, opcode: u16, reply: Reply) {
        match lock(&self.pending).remove(&opcode) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => warn!("Reply for opcode {:#06x} with no pending command", opcode),
        }
    }

    fn fail(&self, reason: &str) {
        {
            let mut credits = lock(&self.credits);
            if credits.terminal.is_some() {
                return;
            }
            credits.terminal = Some(reason.to_string());
        }
        error!("HCI engine terminated: {}", reason);
        self.credit_freed.notify_all();

        // Dropping the reply senders wakes every blocked submit.
        lock(&self.pending).clear();

        let acl = self
            .acl_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(acl) = acl {
            acl.shutdown(reason);
        }
    }

    fn dispatch(&self, frame: &[u8]) {
        trace!("hci rx {}", hex::encode(frame));
        let Some((&packet_type, body)) = frame.split_first() else {
            return;
        };
        match packet_type {
            HCI_EVENT_PKT => self.handle_event(body),
            HCI_ACL_PKT => self.handle_acl(body),
            HCI_COMMAND_PKT => warn!("Ignoring inbound HCI command packet"),
            HCI_SCO_PKT | HCI_ISO_PKT | HCI_VENDOR_PKT => {
                debug!("Unsupported HCI packet type {:#04x}", packet_type)
            }
            other => warn!("Unknown HCI packet type {:#04x}", other),
        }
    }

    fn handle_acl(&self, body: &[u8]) {
        let Some(packet) = AclPacket::parse(body) else {
            warn!("Dropping malformed ACL packet");
            return;
        };
        let acl = self
            .acl_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match acl {
            Some(acl) => acl.handle_acl(packet),
            None => debug!("No ACL handler; dropping data for handle {:#06x}", packet.handle),
        }
    }

    fn handle_event(&self, body: &[u8]) {
        let Some(event) = HciEvent::parse(body) else {
            warn!("Dropping malformed HCI event");
            return;
        };

        match event.event_code {
            EVT_CMD_COMPLETE => match CommandComplete::parse(&event) {
                Some(cc) => {
                    self.add_credits(cc.num_packets as usize);
                    // Opcode 0 only hands out credits
                    if cc.opcode != 0 {
                        self.resolve(cc.opcode, Reply::Complete(cc.return_parameters));
                    }
                }
                None => warn!("Dropping malformed Command Complete"),
            },
            EVT_CMD_STATUS => match CommandStatus::parse(&event) {
                Some(cs) => {
                    self.add_credits(cs.num_packets as usize);
                    if cs.opcode != 0 {
                        self.resolve(cs.opcode, Reply::Status(cs.status));
                    }
                }
                None => warn!("Dropping malformed Command Status"),
            },
            EVT_LE_META_EVENT => match event.subevent_code() {
                Some(subcode) => {
                    self.invoke(&self.subevent_handlers, subcode, &event, "LE subevent")
                }
                None => warn!("Dropping LE meta event without subevent code"),
            },
            code => self.invoke(&self.event_handlers, code, &event, "event"),
        }
    }

    fn invoke(&self, table: &HandlerTable, code: u8, event: &HciEvent, kind: &str) {
        let handler = table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&code)
            .cloned();
        match handler {
            Some(handler) => {
                if let Err(err) = handler.handle(event) {
                    warn!("Handler for {} {:#04x} failed: {}", kind, code, err);
                }
            }
            None => debug!("Unhandled {} {:#04x}", kind, code),
        }
    }
}

fn register(
    table: &HandlerTable,
    code: u8,
    handler: Option<Arc<dyn EventHandler>>,
) -> Option<Arc<dyn EventHandler>> {
    let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
    match handler {
        Some(handler) => table.insert(code, handler),
        None => table.remove(&code),
    }
}

/// Owns the transport and the reader thread
pub struct HciEngine {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl HciEngine {
    /// Start the engine and its reader thread over `transport`
    pub fn start(transport: Arc<dyn Transport>) -> HciResult<Self> {
        let shared = Arc::new(Shared {
            tx: Arc::new(Tx {
                transport: transport.clone(),
                lock: Mutex::new(()),
            }),
            credits: Mutex::new(Credits {
                available: 1,
                terminal: None,
            }),
            credit_freed: Condvar::new(),
            pending: Mutex::new(HashMap::new()),
            event_handlers: RwLock::new(HashMap::new()),
            subevent_handlers: RwLock::new(HashMap::new()),
            acl_handler: RwLock::new(None),
        });

        let reader = {
            let shared = shared.clone();
            let transport = transport.clone();
            thread::Builder::new()
                .name("hci-reader".into())
                .spawn(move || read_loop(shared, transport))?
        };

        Ok(Self {
            shared,
            transport,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Send a command and block until the controller answers
    ///
    /// Returns the Command Complete return parameters (status byte first),
    /// or just the status byte when the controller answered with Command
    /// Status. A non-zero status is returned as
    /// [`HciError::CommandFailed`].
    pub fn submit(&self, opcode: u16, params: &[u8]) -> HciResult<Vec<u8>> {
        self.shared.submit(opcode, params)
    }

    /// Send a typed command
    pub fn send(&self, command: &HciCommand) -> HciResult<Vec<u8>> {
        self.shared.submit(command.opcode(), &command.parameters())
    }

    /// Register the handler for an event code, returning the previous one
    pub fn register_event_handler<F>(&self, code: u8, handler: F) -> Option<Arc<dyn EventHandler>>
    where
        F: Fn(&HciEvent) -> HciResult<()> + Send + Sync + 'static,
    {
        register(&self.shared.event_handlers, code, Some(Arc::new(handler) as Arc<dyn EventHandler>))
    }

    /// Register the handler for an LE meta subevent code, returning the previous one
    pub fn register_subevent_handler<F>(
        &self,
        subcode: u8,
        handler: F,
    ) -> Option<Arc<dyn EventHandler>>
    where
        F: Fn(&HciEvent) -> HciResult<()> + Send + Sync + 'static,
    {
        register(&self.shared.subevent_handlers, subcode, Some(Arc::new(handler) as Arc<dyn EventHandler>))
    }

    pub fn unregister_event_handler(&self, code: u8) -> Option<Arc<dyn EventHandler>> {
        register(&self.shared.event_handlers, code, None)
    }

    pub fn unregister_subevent_handler(&self, subcode: u8) -> Option<Arc<dyn EventHandler>> {
        register(&self.shared.subevent_handlers, subcode, None)
    }

    /// Route inbound ACL data to `handler`
    pub fn set_acl_handler(&self, handler: Arc<dyn AclHandler>) -> Option<Arc<dyn AclHandler>> {
        self.shared
            .acl_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handler)
    }

    /// A command-only handle that does not keep the engine alive
    pub fn commander(&self) -> CommandSender {
        CommandSender {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// The ACL write path over `pool`
    pub fn acl_link(&self, pool: Arc<BufferPool>) -> AclLink {
        let shared = Arc::downgrade(&self.shared);
        AclLink {
            tx: self.shared.tx.clone(),
            pool,
            writer: Arc::new(Mutex::new(())),
            on_fatal: Some(Arc::new(move |reason: &str| {
                if let Some(shared) = shared.upgrade() {
                    shared.fail(reason);
                }
            })),
        }
    }

    /// The reason the engine stopped, if it has
    pub fn terminal_error(&self) -> Option<String> {
        self.shared.terminal()
    }

    pub fn is_running(&self) -> bool {
        self.shared.terminal().is_none()
    }

    /// Stop the engine and wait for the reader thread
    pub fn close(&self) {
        self.shared.fail("engine closed");
        self.transport.close();
        if let Some(reader) = lock(&self.reader).take() {
            if reader.thread().id() != thread::current().id() {
                let _ = reader.join();
            }
        }
    }
}

impl Drop for HciEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>) {
    let mut buf = vec![0u8; HCI_MAX_FRAME_SIZE];
    loop {
        match transport.read_packet(&mut buf) {
            Ok(0) => {
                shared.fail("transport closed");
                break;
            }
            Ok(n) => {
                if shared.terminal().is_some() {
                    break;
                }
                shared.dispatch(&buf[..n]);
            }
            Err(err) => {
                shared.fail(&format!("read failed: {}", err));
                break;
            }
        }
    }
    debug!("HCI reader exiting");
}

/// Command-only capability handed to connections and the radio loop
///
/// Holds a weak reference, so it never keeps a closed engine alive.
#[derive(Clone)]
pub struct CommandSender {
    shared: Weak<Shared>,
}

impl CommandSender {
    pub fn submit(&self, opcode: u16, params: &[u8]) -> HciResult<Vec<u8>> {
        match self.shared.upgrade() {
            Some(shared) => shared.submit(opcode, params),
            None => Err(HciError::Terminated("engine dropped".into())),
        }
    }

    pub fn send(&self, command: &HciCommand) -> HciResult<Vec<u8>> {
        self.submit(command.opcode(), &command.parameters())
    }
}

type FatalHook = Arc<dyn Fn(&str) + Send + Sync>;

/// ACL write capability: buffer pool plus the serialized transport
///
/// Connections get this instead of the engine itself.
#[derive(Clone)]
pub struct AclLink {
    tx: Arc<Tx>,
    pool: Arc<BufferPool>,
    writer: Arc<Mutex<()>>,
    on_fatal: Option<FatalHook>,
}

impl AclLink {
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Largest ACL payload one fragment can carry
    pub fn max_fragment(&self) -> usize {
        self.pool.buffer_size()
    }

    /// Write `chunks` as the fragments of one PDU on `handle`
    ///
    /// The first fragment is flagged start, the rest continuing. The
    /// writer lock is held for the whole PDU so fragments of different
    /// PDUs never interleave. Each fragment takes a pool buffer, which
    /// blocks while the controller is full.
    pub fn send_fragments<'a, I>(&self, handle: u16, chunks: I) -> HciResult<usize>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let _guard = lock(&self.writer);
        self.write_fragments(handle, chunks)
    }

    /// Write several PDUs back to back, each split into `fragment` sized chunks
    ///
    /// The writer lock is held across all of them.
    pub fn send_pdus(&self, handle: u16, pdus: &[Vec<u8>], fragment: usize) -> HciResult<usize> {
        let fragment = fragment.max(1);
        let _guard = lock(&self.writer);
        let mut sent = 0;
        for pdu in pdus {
            sent += self.write_fragments(handle, pdu.chunks(fragment))?;
        }
        Ok(sent)
    }

    fn write_fragments<'a, I>(&self, handle: u16, chunks: I) -> HciResult<usize>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut boundary = ACL_PB_START_NON_FLUSHABLE;
        let mut sent = 0;

        for chunk in chunks {
            if chunk.len() > self.pool.buffer_size() {
                return Err(HciError::InvalidParamLength(chunk.len()));
            }

            let mut buffer = self.pool.checkout()?;
            let frame = buffer.frame_mut();
            AclPacket::write_header(frame, handle, boundary, chunk.len() as u16);
            frame.extend_from_slice(chunk);

            let result = self.tx.write(buffer.as_slice());
            // The reader may already have handled this fragment's completion;
            // the pool holds it as a credit that this commit consumes.
            self.pool.commit(handle, buffer);
            if let Err(err) = result {
                if let Some(on_fatal) = &self.on_fatal {
                    on_fatal(&format!("ACL write failed: {}", err));
                }
                return Err(HciError::SendError(err));
            }

            sent += chunk.len();
            boundary = ACL_PB_CONTINUING;
        }

        Ok(sent)
    }
}
