//! Tagged sampling requests.

use enum_dispatch::enum_dispatch;

use crate::channel::{Attenuation, ChannelMask};
use crate::config::ControllerConfig;
use crate::continuous::ContinuousRequest;
use crate::error::AdcError;
use crate::oneshot::OneShotRequest;

#[enum_dispatch]
pub trait Request {
    /// Channels the request needs reserved.
    fn channel_mask(&self) -> ChannelMask;
    fn attenuation(&self) -> Attenuation;
    /// Checks that need no hardware and no reservation.
    fn check(&self, config: &ControllerConfig) -> Result<(), AdcError>;
}

impl Request for OneShotRequest {
    fn channel_mask(&self) -> ChannelMask {
        self.channel.mask()
    }

    fn attenuation(&self) -> Attenuation {
        self.attenuation
    }

    fn check(&self, _config: &ControllerConfig) -> Result<(), AdcError> {
        self.validate()
    }
}

impl Request for ContinuousRequest {
    fn channel_mask(&self) -> ChannelMask {
        self.channel_mask
    }

    fn attenuation(&self) -> Attenuation {
        self.attenuation
    }

    fn check(&self, config: &ControllerConfig) -> Result<(), AdcError> {
        self.validate(config)
    }
}

/// What a caller asks the controller for; each variant carries only its own fields.
#[enum_dispatch(Request)]
#[derive(Debug, Clone, Copy)]
pub enum SamplingRequest {
    OneShot(OneShotRequest),
    Continuous(ContinuousRequest),
}

/// Result of [`AdcController::start_sampling`](crate::controller::AdcController::start_sampling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Averaged raw code of a one-shot request.
    Sample(u16),
    /// A continuous session is delivering frames.
    Streaming,
}
