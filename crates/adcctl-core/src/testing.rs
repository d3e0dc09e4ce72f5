//! Recording hardware double for controller tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use crate::channel::{Attenuation, BitWidth, Channel};
use crate::continuous::FrameSlot;
use crate::error::{HalError, HalOp};
use crate::hal::{AdcHal, PatternEntry};

/// Status code returned for injected failures (`ESP_FAIL`).
pub const FAIL_CODE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateOneShotUnit,
    ConfigureOneShotChannel(Channel, Attenuation, BitWidth),
    ReadOneShot(Channel),
    DeleteOneShotUnit,
    CreateContinuous { buffer_bytes: u32, frame_bytes: u32 },
    ConfigureContinuous { sample_rate_hz: u32, pattern: Vec<PatternEntry> },
    RegisterFrameSlot,
    StartContinuous,
    StopContinuous,
    DeinitContinuous,
    CreateCalibration(Channel, Attenuation, BitWidth),
    ApplyCalibration(u16),
    DeleteCalibration,
}

#[derive(Default)]
pub struct RecordingHal {
    calls: Mutex<Vec<Call>>,
    reads: Mutex<VecDeque<u16>>,
    failing: Mutex<Vec<HalOp>>,
    slot: Mutex<Option<Arc<FrameSlot>>>,
    live_calibrations: AtomicUsize,
    gate: Mutex<Option<Arc<Barrier>>>,
    failing_raw: Mutex<Vec<u16>>,
}

impl RecordingHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw codes returned by successive reads; reads past the end return 0.
    pub fn with_reads(reads: &[u16]) -> Self {
        let hal = Self::new();
        hal.reads.lock().unwrap().extend(reads.iter().copied());
        hal
    }

    pub fn fail_on(&self, op: HalOp) {
        self.failing.lock().unwrap().push(op);
    }

    /// Park the next read between two waits on `gate`: the first tells the
    /// test the read has started, the second lets it finish.
    pub fn gate_next_read(&self, gate: Arc<Barrier>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    /// Fail calibration of this one raw code only.
    pub fn fail_on_raw(&self, raw: u16) {
        self.failing_raw.lock().unwrap().push(raw);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.failing_raw.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn reads(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::ReadOneShot(_)))
            .count()
    }

    pub fn live_calibrations(&self) -> usize {
        self.live_calibrations.load(Ordering::SeqCst)
    }

    pub fn has_slot(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    /// Push a frame through the registered slot as the driver would.
    pub fn deliver(&self, frame: &[u8]) -> Option<bool> {
        let slot = self.slot.lock().unwrap().clone();
        slot.map(|slot| slot.deliver(frame))
    }

    fn record(&self, op: HalOp, call: Call) -> Result<(), HalError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(&op) {
            return Err(HalError::new(op, FAIL_CODE));
        }
        Ok(())
    }
}

impl AdcHal for RecordingHal {
    type Calibration = (Attenuation, BitWidth);

    fn create_oneshot_unit(&self) -> Result<(), HalError> {
        self.record(HalOp::CreateOneShotUnit, Call::CreateOneShotUnit)
    }

    fn configure_oneshot_channel(
        &self,
        channel: Channel,
        attenuation: Attenuation,
        bit_width: BitWidth,
    ) -> Result<(), HalError> {
        self.record(
            HalOp::ConfigureOneShotChannel,
            Call::ConfigureOneShotChannel(channel, attenuation, bit_width),
        )
    }

    fn read_oneshot(&self, channel: Channel) -> Result<u16, HalError> {
        self.record(HalOp::ReadOneShot, Call::ReadOneShot(channel))?;
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }
        Ok(self.reads.lock().unwrap().pop_front().unwrap_or(0))
    }

    fn delete_oneshot_unit(&self) -> Result<(), HalError> {
        self.record(HalOp::DeleteOneShotUnit, Call::DeleteOneShotUnit)
    }

    fn create_continuous(&self, buffer_bytes: u32, frame_bytes: u32) -> Result<(), HalError> {
        self.record(
            HalOp::CreateContinuous,
            Call::CreateContinuous {
                buffer_bytes,
                frame_bytes,
            },
        )
    }

    fn configure_continuous(
        &self,
        sample_rate_hz: u32,
        pattern: &[PatternEntry],
    ) -> Result<(), HalError> {
        self.record(
            HalOp::ConfigureContinuous,
            Call::ConfigureContinuous {
                sample_rate_hz,
                pattern: pattern.to_vec(),
            },
        )
    }

    fn register_frame_slot(&self, slot: Arc<FrameSlot>) -> Result<(), HalError> {
        self.record(HalOp::RegisterFrameSlot, Call::RegisterFrameSlot)?;
        *self.slot.lock().unwrap() = Some(slot);
        Ok(())
    }

    fn start_continuous(&self) -> Result<(), HalError> {
        self.record(HalOp::StartContinuous, Call::StartContinuous)
    }

    fn stop_continuous(&self) -> Result<(), HalError> {
        self.record(HalOp::StopContinuous, Call::StopContinuous)
    }

    fn deinit_continuous(&self) -> Result<(), HalError> {
        let result = self.record(HalOp::DeinitContinuous, Call::DeinitContinuous);
        // the driver keeps its registration until deinit
        if result.is_ok() {
            *self.slot.lock().unwrap() = None;
        }
        result
    }

    fn create_calibration(
        &self,
        channel: Channel,
        attenuation: Attenuation,
        bit_width: BitWidth,
    ) -> Result<Self::Calibration, HalError> {
        self.record(
            HalOp::CreateCalibration,
            Call::CreateCalibration(channel, attenuation, bit_width),
        )?;
        self.live_calibrations.fetch_add(1, Ordering::SeqCst);
        Ok((attenuation, bit_width))
    }

    fn apply_calibration(
        &self,
        calibration: &Self::Calibration,
        raw: u16,
    ) -> Result<u16, HalError> {
        self.record(HalOp::ApplyCalibration, Call::ApplyCalibration(raw))?;
        if self.failing_raw.lock().unwrap().contains(&raw) {
            return Err(HalError::new(HalOp::ApplyCalibration, FAIL_CODE));
        }
        let (attenuation, bit_width) = *calibration;
        let mv = raw as u32 * attenuation.full_scale_mv() as u32 / bit_width.max_raw() as u32;
        Ok(mv as u16)
    }

    fn delete_calibration(&self, _calibration: Self::Calibration) {
        self.calls.lock().unwrap().push(Call::DeleteCalibration);
        self.live_calibrations.fetch_sub(1, Ordering::SeqCst);
    }
}
