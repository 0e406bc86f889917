//! Radio control loop
//!
//! All advertising, scanning and connection-initiation commands are issued
//! from one thread, one transition at a time. Callers either wait for the
//! outcome ([`Radio::request`]) or post and move on ([`Notifier::notify`]);
//! the HCI reader only ever posts.

use crate::gap::params::{AdvParams, ConnParams, ScanParams};
use crate::gap::state::{decide, swallows, Outcome, RadioFlags, Transition, Verdict};
use crate::gap::types::{GapError, GapResult};
use crate::error::{HciError, HciResult};
use crate::hci::{CommandSender, HciCommand};
use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Reply = SyncSender<GapResult<Outcome>>;

enum Message {
    Transition {
        transition: Transition,
        reply: Option<Reply>,
    },
    Stop,
}

/// Parameters the loop starts with
#[derive(Debug, Clone)]
pub struct RadioSettings {
    pub scan: ScanParams,
    pub adv: AdvParams,
    pub conn: ConnParams,
    pub own_address_type: u8,
}

/// Controller-facing half of the loop
///
/// Owned by the loop thread; nothing else reads or writes it.
struct Controller {
    commander: CommandSender,
    settings: RadioSettings,
    flags: RadioFlags,
    published: Arc<Mutex<RadioFlags>>,
}

impl Controller {
    fn send(&self, command: HciCommand) -> HciResult<()> {
        self.commander.send(&command).map(|_| ())
    }

    fn set_advertise(&self, enable: bool) -> HciResult<()> {
        self.send(HciCommand::LeSetAdvertiseEnable { enable })
    }

    fn set_scan(&self, enable: bool) -> HciResult<()> {
        self.send(HciCommand::LeSetScanEnable {
            enable,
            filter_duplicates: enable && self.settings.scan.filter_duplicates,
        })
    }

    fn push_adv_params(&self) -> HciResult<()> {
        for command in self.settings.adv.to_commands(self.settings.own_address_type) {
            self.send(command)?;
        }
        Ok(())
    }

    /// Issue the commands for one transition
    fn execute(&mut self, transition: &Transition) -> HciResult<()> {
        let own = self.settings.own_address_type;

        match transition {
            Transition::Scanning => {
                self.send(self.settings.scan.to_command(own))?;
                self.set_scan(true)
            }
            Transition::StopScanning => self.set_scan(false),
            Transition::Advertising
            | Transition::Listening
            | Transition::CentralDisconnected => self.set_advertise(true),
            Transition::StopAdvertising | Transition::StopListening => self.set_advertise(false),
            Transition::Dialing { peer, peer_type } => self.send(
                self.settings
                    .conn
                    .create_connection(*peer, *peer_type, own),
            ),
            Transition::DialingCanceling => self.send(HciCommand::LeCreateConnectionCancel),
            Transition::StopDialing | Transition::CentralConnected => Ok(()),
            Transition::ScanParamsUpdated(params) => {
                let active = self.flags.scanning;
                if active {
                    self.set_scan(false)?;
                }
                self.settings.scan = *params;
                if active {
                    self.send(self.settings.scan.to_command(own))?;
                    self.set_scan(true)?;
                }
                Ok(())
            }
            Transition::AdvParamsUpdated(params) => {
                let active = self.flags.advertising_enabled();
                if active {
                    self.set_advertise(false)?;
                }
                self.settings.adv = params.clone();
                self.push_adv_params()?;
                if active {
                    self.set_advertise(true)?;
                }
                Ok(())
            }
            // Used by the next dial
            Transition::ConnParamsUpdated(params) => {
                self.settings.conn = *params;
                Ok(())
            }
        }
    }

    fn apply(&mut self, transition: &Transition) -> GapResult<Outcome> {
        match decide(self.flags, transition) {
            Verdict::Unchanged => return Ok(Outcome::Unchanged),
            Verdict::Conflict(reason) => {
                debug!("Refusing {}: {}", transition.name(), reason);
                return Err(GapError::Conflict(reason.to_string()));
            }
            Verdict::Proceed => {}
        }

        let outcome = match self.execute(transition) {
            Ok(()) => Outcome::Applied,
            Err(HciError::CommandFailed { opcode, status }) if swallows(transition, status) => {
                warn!(
                    "{}: command {:#06x} answered with status {:#04x}, treating as connection limit",
                    transition.name(),
                    opcode,
                    status
                );
                Outcome::Swallowed { status }
            }
            Err(err) => return Err(err.into()),
        };

        self.flags = self.flags.after(transition);
        *lock(&self.published) = self.flags;
        Ok(outcome)
    }

    fn run(mut self, messages: Receiver<Message>) {
        while let Ok(message) = messages.recv() {
            let (transition, reply) = match message {
                Message::Transition { transition, reply } => (transition, reply),
                Message::Stop => break,
            };

            let result = self.apply(&transition);
            match reply {
                Some(reply) => {
                    // The requester may have given up waiting
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(err) = result {
                        warn!("{} failed: {}", transition.name(), err);
                    }
                }
            }
        }
        info!("Radio control loop stopped");
    }
}

/// Posts transitions without waiting for them
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<Message>,
}

impl Notifier {
    pub fn notify(&self, transition: Transition) {
        let name = transition.name();
        let message = Message::Transition {
            transition,
            reply: None,
        };
        if self.tx.send(message).is_err() {
            debug!("Radio loop gone, dropping {}", name);
        }
    }
}

/// Handle to the radio control loop
pub struct Radio {
    tx: Sender<Message>,
    flags: Arc<Mutex<RadioFlags>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Radio {
    /// Start the control loop thread
    pub fn start(commander: CommandSender, settings: RadioSettings) -> GapResult<Self> {
        let (tx, rx) = mpsc::channel();
        let flags = Arc::new(Mutex::new(RadioFlags::default()));

        let controller = Controller {
            commander,
            settings,
            flags: RadioFlags::default(),
            published: flags.clone(),
        };
        let worker = thread::Builder::new()
            .name("radio".into())
            .spawn(move || controller.run(rx))
            .map_err(HciError::SocketError)?;

        Ok(Self {
            tx,
            flags,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Run one transition and wait for its outcome
    pub fn request(&self, transition: Transition) -> GapResult<Outcome> {
        let (reply, outcome) = mpsc::sync_channel(1);
        self.tx
            .send(Message::Transition {
                transition,
                reply: Some(reply),
            })
            .map_err(|_| GapError::Closed)?;
        outcome.recv().map_err(|_| GapError::Closed)?
    }

    pub fn notifier(&self) -> Notifier {
        Notifier {
            tx: self.tx.clone(),
        }
    }

    /// Snapshot of the flags after the last completed transition
    pub fn flags(&self) -> RadioFlags {
        *lock(&self.flags)
    }

    /// Stop the loop once queued transitions have run
    pub fn close(&self) {
        let _ = self.tx.send(Message::Stop);
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for Radio {
    fn drop(&mut self) {
        self.close();
    }
}
