//! Radio transition table
//!
//! Everything here is pure: given the current [`RadioFlags`] and a
//! requested [`Transition`], [`decide`] says whether the control loop may
//! issue commands, [`RadioFlags::after`] gives the flags once it has, and
//! [`swallows`] lists the controller statuses a transition treats as an
//! expected outcome rather than an error.

use crate::gap::params::{AdvParams, ConnParams, ScanParams};
use crate::gap::types::{AddressType, BdAddr};
use crate::hci::constants::HCI_COMMAND_DISALLOWED;

/// Which radio activities are currently on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadioFlags {
    pub advertising: bool,
    pub scanning: bool,
    pub dialing: bool,
    pub listening: bool,
}

/// A requested change of radio state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Scanning,
    StopScanning,
    Advertising,
    StopAdvertising,
    Dialing { peer: BdAddr, peer_type: AddressType },
    /// A dial finished on its own; no command is needed
    StopDialing,
    /// Abort a create-connection still in flight
    DialingCanceling,
    Listening,
    StopListening,
    /// A central connected to us while we were accepting
    CentralConnected,
    /// A link where we were peripheral went down
    CentralDisconnected,
    ScanParamsUpdated(ScanParams),
    AdvParamsUpdated(AdvParams),
    ConnParamsUpdated(ConnParams),
}

impl Transition {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Scanning => "Scanning",
            Transition::StopScanning => "StopScanning",
            Transition::Advertising => "Advertising",
            Transition::StopAdvertising => "StopAdvertising",
            Transition::Dialing { .. } => "Dialing",
            Transition::StopDialing => "StopDialing",
            Transition::DialingCanceling => "DialingCanceling",
            Transition::Listening => "Listening",
            Transition::StopListening => "StopListening",
            Transition::CentralConnected => "CentralConnected",
            Transition::CentralDisconnected => "CentralDisconnected",
            Transition::ScanParamsUpdated(_) => "ScanParamsUpdated",
            Transition::AdvParamsUpdated(_) => "AdvParamsUpdated",
            Transition::ConnParamsUpdated(_) => "ConnParamsUpdated",
        }
    }
}

/// What the control loop should do with a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Issue the transition's commands
    Proceed,
    /// Already in the requested state; touch nothing
    Unchanged,
    /// Forbidden by the current flags
    Conflict(&'static str),
}

/// Result of a transition that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Commands were issued and accepted
    Applied,
    /// Nothing needed to change
    Unchanged,
    /// The controller refused with a status this transition expects
    Swallowed { status: u8 },
}

/// Decide a transition against the current flags
pub fn decide(flags: RadioFlags, transition: &Transition) -> Verdict {
    use Transition::*;

    match transition {
        Scanning if flags.scanning => Verdict::Unchanged,
        Scanning if flags.dialing => Verdict::Conflict("cannot scan while dialing"),
        StopScanning if !flags.scanning => Verdict::Unchanged,

        Advertising if flags.advertising => Verdict::Unchanged,

        Dialing { .. } if flags.scanning => Verdict::Conflict("cannot dial while scanning"),
        Dialing { .. } if flags.dialing => Verdict::Conflict("already dialing"),
        DialingCanceling if !flags.dialing => Verdict::Unchanged,

        Listening if flags.listening => Verdict::Conflict("already listening"),
        Listening if flags.advertising => Verdict::Conflict("cannot listen while advertising"),
        StopListening if !flags.listening => Verdict::Unchanged,

        CentralDisconnected if !flags.listening => Verdict::Unchanged,

        _ => Verdict::Proceed,
    }
}

/// True if `status` from this transition's commands is an expected outcome
///
/// "Command disallowed" is read as "at the connection limit". The same
/// status can have other causes, so the raw value is kept in
/// [`Outcome::Swallowed`].
pub fn swallows(transition: &Transition, status: u8) -> bool {
    status == HCI_COMMAND_DISALLOWED
        && matches!(
            transition,
            Transition::Advertising | Transition::Dialing { .. } | Transition::CentralDisconnected
        )
}

impl RadioFlags {
    /// Flags once `transition` has been carried out (or swallowed)
    pub fn after(self, transition: &Transition) -> RadioFlags {
        use Transition::*;

        let mut next = self;
        match transition {
            Scanning => next.scanning = true,
            StopScanning => next.scanning = false,
            Advertising => next.advertising = true,
            StopAdvertising => next.advertising = false,
            Dialing { .. } => next.dialing = true,
            StopDialing | DialingCanceling => next.dialing = false,
            Listening => next.listening = true,
            StopListening => next.listening = false,
            // The controller stops advertising once a central connects
            CentralConnected => {
                next.listening = false;
                next.advertising = false;
            }
            CentralDisconnected | ScanParamsUpdated(_) | AdvParamsUpdated(_)
            | ConnParamsUpdated(_) => {}
        }
        next
    }

    /// True if the advertising-enable mechanism is in use
    pub fn advertising_enabled(&self) -> bool {
        self.advertising || self.listening
    }
}
