//! Continuous Sampler - request validation, pattern table, frame routing
//!
//! A continuous session samples every channel of its mask at a hardware-paced
//! rate and hands each completed frame to one registered [`FrameCallback`].
//! The callback runs in the driver's completion context (an ISR on ESP-IDF),
//! so it is stored in a lock-free [`FrameSlot`] that the producer can read
//! without touching the arbiter lock.

use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use alloc::sync::Arc;
use heapless::Vec;

use crate::arbiter::SessionKind;
use crate::channel::{Attenuation, ChannelMask};
use crate::config::ControllerConfig;
use crate::consts::MAX_CHANNELS;
use crate::controller::{AdcController, check_mask};
use crate::error::{AdcError, HalError};
use crate::hal::{AdcHal, PatternEntry};

/// Receives one conversion frame; returns whether the producer context
/// should yield to a higher-priority task on exit.
///
/// Runs in a restricted context: it must not block, must not allocate and
/// must copy out what it needs before returning, because the frame storage
/// is reused for the next conversion.
pub type FrameCallback = fn(frame: &[u8]) -> bool;

/// Pattern table for one session, in ascending channel order.
pub type Pattern = Vec<PatternEntry, MAX_CHANNELS>;

/// Parameters of a continuous session.
#[derive(Debug, Clone, Copy)]
pub struct ContinuousRequest {
    pub channel_mask: ChannelMask,
    pub attenuation: Attenuation,
    pub samples_per_channel: u32,
    pub sample_rate_hz: u32,
    pub frame_callback: Option<FrameCallback>,
}

impl ContinuousRequest {
    /// Check the request in a fixed order; nothing has been touched when this fails.
    pub fn validate(&self, config: &ControllerConfig) -> Result<(), AdcError> {
        if self.channel_mask.is_empty() {
            return Err(AdcError::InvalidArgument("empty channel mask"));
        }
        if self.channel_mask.channel_count() == 0 || !self.channel_mask.is_within_unit() {
            return Err(AdcError::InvalidArgument("channel mask names no valid channel"));
        }
        if self.samples_per_channel == 0 {
            return Err(AdcError::InvalidArgument("samples_per_channel must be non-zero"));
        }
        if self.frame_callback.is_none() {
            return Err(AdcError::InvalidArgument("missing frame callback"));
        }
        if self.sample_rate_hz == 0 || self.sample_rate_hz > config.max_sample_rate_hz {
            return Err(AdcError::InvalidArgument("sample rate out of range"));
        }
        Ok(())
    }

    /// Conversion buffer size in bytes, used for both the driver's store
    /// buffer and its per-frame size.
    pub fn frame_bytes(&self, config: &ControllerConfig) -> Result<u32, AdcError> {
        let bytes = (self.samples_per_channel as u64)
            * (self.channel_mask.channel_count() as u64)
            * (config.bytes_per_sample as u64);
        u32::try_from(bytes).map_err(|_| AdcError::InvalidArgument("frame size overflows"))
    }

    /// One pattern entry per channel of the mask, ascending by index.
    pub fn pattern(&self, config: &ControllerConfig) -> Pattern {
        let mut pattern = Pattern::new();
        for channel in self.channel_mask.iter() {
            // MAX_CHANNELS capacity holds every channel of a mask
            let _ = pattern.push(PatternEntry {
                channel,
                attenuation: self.attenuation,
                bit_width: config.bit_width,
            });
        }
        pattern
    }
}

/// The single slot holding the live continuous callback.
pub struct FrameSlot {
    callback: AtomicPtr<()>,
    delivered: AtomicU32,
    dropped: AtomicU32,
}

impl FrameSlot {
    pub const fn new() -> Self {
        Self {
            callback: AtomicPtr::new(core::ptr::null_mut()),
            delivered: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    pub(crate) fn install(&self, callback: FrameCallback) {
        self.callback.store(callback as *mut (), Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.callback.store(core::ptr::null_mut(), Ordering::Release);
    }

    /// Zero the frame counters; called with no callback installed.
    pub(crate) fn reset_counters(&self) {
        self.delivered.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }

    pub fn is_armed(&self) -> bool {
        !self.callback.load(Ordering::Acquire).is_null()
    }

    /// Hand one completed frame to the registered callback.
    ///
    /// Called from the producer context. A frame arriving while no callback
    /// is installed (a teardown racing the delivery) is counted and dropped.
    pub fn deliver(&self, frame: &[u8]) -> bool {
        let ptr = self.callback.load(Ordering::Acquire);
        if ptr.is_null() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        // SAFETY: the only non-null values ever stored are `FrameCallback`
        // pointers written by `install`, and fn pointers are never dangling.
        let callback = unsafe { core::mem::transmute::<*mut (), FrameCallback>(ptr) };
        self.delivered.fetch_add(1, Ordering::Relaxed);
        callback(frame)
    }

    /// Frames handed to a callback since the current session started.
    pub fn delivered_frames(&self) -> u32 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: AdcHal> AdcController<H> {
    /// Validate `request`, reserve its mask and start hardware-paced sampling.
    ///
    /// Starting again with exactly the running mask keeps the session and
    /// only swaps in the new callback.
    pub fn start_continuous(&self, request: &ContinuousRequest) -> Result<(), AdcError> {
        request.validate(&self.config)?;
        let frame_bytes = request.frame_bytes(&self.config)?;
        let Some(callback) = request.frame_callback else {
            return Err(AdcError::InvalidArgument("missing frame callback"));
        };
        let mask = request.channel_mask;

        self.arbiter
            .with_state(|state| {
                let prior = state.admit(mask)?;
                match prior {
                    SessionKind::Continuous => {
                        self.slot.install(callback);
                        log::debug!("continuous {} already running, callback replaced", mask);
                        return Ok(());
                    }
                    SessionKind::Idle | SessionKind::Reserved => {}
                    _ => return Err(state.busy(mask)),
                }
                if let Err(e) = self.configure_continuous(request, frame_bytes, callback) {
                    state.restore(mask, prior);
                    return Err(AdcError::from(e));
                }
                state.session = SessionKind::Continuous;
                Ok(())
            })
            .inspect(|_| {
                log::debug!(
                    "continuous {} started: {} Hz, {} bytes/frame",
                    mask,
                    request.sample_rate_hz,
                    frame_bytes
                )
            })
            .inspect_err(|e| log::warn!("continuous start on {} failed: {}", mask, e))
    }

    /// Stop the continuous session running on exactly `mask`.
    ///
    /// The callback is cleared before the driver is stopped, and the mask is
    /// released even if stopping fails.
    pub fn stop_continuous(&self, mask: ChannelMask) -> Result<(), AdcError> {
        check_mask(mask)?;
        self.arbiter
            .with_state(|state| {
                if state.active_mask != mask || state.session != SessionKind::Continuous {
                    return Err(state.mismatch(mask));
                }
                let result = self.teardown(SessionKind::Continuous);
                state.clear();
                result.map_err(AdcError::from)
            })
            .inspect(|_| {
                log::debug!(
                    "continuous {} stopped ({} frames, {} dropped)",
                    mask,
                    self.slot.delivered_frames(),
                    self.slot.dropped_frames()
                )
            })
            .inspect_err(|e| log::warn!("continuous stop on {} failed: {}", mask, e))
    }

    fn configure_continuous(
        &self,
        request: &ContinuousRequest,
        frame_bytes: u32,
        callback: FrameCallback,
    ) -> Result<(), HalError> {
        let pattern = request.pattern(&self.config);
        self.hal.create_continuous(frame_bytes, frame_bytes)?;

        let started = self
            .hal
            .configure_continuous(request.sample_rate_hz, &pattern)
            .and_then(|()| {
                self.slot.reset_counters();
                self.slot.install(callback);
                self.hal.register_frame_slot(Arc::clone(&self.slot))
            })
            .and_then(|()| self.hal.start_continuous());

        if let Err(e) = started {
            self.slot.clear();
            let _ = self.hal.deinit_continuous();
            return Err(e);
        }
        Ok(())
    }
}
