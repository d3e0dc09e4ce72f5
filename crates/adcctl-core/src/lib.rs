#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arbiter;
pub mod calibration;
pub mod channel;
pub mod config;
pub mod consts;
pub mod continuous;
pub mod controller;
pub mod error;
pub mod frame;
pub mod hal;
pub mod oneshot;
pub mod request;

#[cfg(test)]
mod testing;

pub use arbiter::{SessionKind, Snapshot};
pub use channel::{Attenuation, BitWidth, Channel, ChannelMask};
pub use config::ControllerConfig;
pub use continuous::{ContinuousRequest, FrameCallback, FrameSlot};
pub use controller::AdcController;
pub use error::{AdcError, HalError, HalOp};
pub use frame::{ChannelAccumulator, Conversion, decode_frame};
pub use hal::{AdcHal, PatternEntry};
pub use oneshot::OneShotRequest;
pub use request::{Outcome, Request, SamplingRequest};
