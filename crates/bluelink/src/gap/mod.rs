//! Generic Access Profile
//!
//! Radio modes (advertising, scanning, connecting) and the [`Device`]
//! facade that ties the controller, the L2CAP layer and the radio
//! control loop together.

pub mod constants;
pub mod device;
pub mod params;
pub mod radio;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

pub use constants::*;
pub use device::{ConnectHook, Device, DisconnectHook, ScanObserver};
pub use params::{AdvParams, ConnParams, DeviceConfig, ScanParams};
pub use radio::{Notifier, Radio, RadioSettings};
pub use state::{decide, swallows, Outcome, RadioFlags, Transition, Verdict};
pub use types::*;
