//! Simulated ADC unit for running the controller on a desktop.
//!
//! Each channel carries an input voltage set from the dashboard. One-shot
//! reads convert it with the configured attenuation and bit width plus a
//! little noise. A continuous session runs a producer thread that paces
//! frames at the requested sample rate and hands them to the frame slot,
//! the way the ESP-IDF driver does from its ISR.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use adcctl_core::consts::{BYTES_PER_CONVERSION, MAX_CHANNELS};
use adcctl_core::{
    AdcHal, Attenuation, BitWidth, Channel, Conversion, FrameSlot, HalError, HalOp, PatternEntry,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// `ESP_ERR_INVALID_ARG`
pub const ERR_INVALID_ARG: i32 = 0x102;
/// `ESP_ERR_INVALID_STATE`
pub const ERR_INVALID_STATE: i32 = 0x103;
/// `ESP_FAIL`, used for injected faults.
pub const ERR_FAIL: i32 = -1;

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Peak noise added to every conversion, in LSB.
    pub noise_lsb: u16,
    pub seed: u64,
    /// Input voltage every channel starts at.
    pub initial_input_mv: u32,
    /// Shortest pause between two frames of a continuous session.
    pub min_frame_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            noise_lsb: 4,
            seed: 0x5eed,
            initial_input_mv: 1650,
            min_frame_interval: Duration::from_millis(1),
        }
    }
}

impl SimConfig {
    /// Defaults, overridden by `ADCCTL_SEED` and `ADCCTL_NOISE` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(seed) = std::env::var("ADCCTL_SEED").ok().and_then(|v| v.parse().ok()) {
            config.seed = seed;
        }
        if let Some(noise) = std::env::var("ADCCTL_NOISE").ok().and_then(|v| v.parse().ok()) {
            config.noise_lsb = noise;
        }
        config
    }
}

/// Linear calibration: the full raw range maps onto the attenuation's
/// full-scale voltage.
#[derive(Debug, Clone, Copy)]
pub struct SimCalibration {
    attenuation: Attenuation,
    bit_width: BitWidth,
}

type ChannelSetting = (Attenuation, BitWidth);

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ContinuousState {
    frame_bytes: Option<u32>,
    sample_rate_hz: u32,
    pattern: Vec<PatternEntry>,
    slot: Option<Arc<FrameSlot>>,
    producer: Option<Producer>,
}

pub struct SimulatedAdc {
    config: SimConfig,
    inputs: Arc<[AtomicU32; MAX_CHANNELS]>,
    oneshot: Mutex<Option<[Option<ChannelSetting>; MAX_CHANNELS]>>,
    continuous: Mutex<ContinuousState>,
    rng: Mutex<SmallRng>,
    fault: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ideal conversion of `input_mv` plus `noise`, clamped to the code range.
fn convert(input_mv: u32, (attenuation, bit_width): ChannelSetting, noise: i32) -> u16 {
    let max_raw = bit_width.max_raw() as u32;
    let ideal = input_mv.min(attenuation.full_scale_mv() as u32) * max_raw
        / attenuation.full_scale_mv() as u32;
    (ideal as i32 + noise).clamp(0, max_raw as i32) as u16
}

fn noise(rng: &mut SmallRng, peak: u16) -> i32 {
    if peak == 0 {
        return 0;
    }
    rng.random_range(-(peak as i32)..=peak as i32)
}

impl SimulatedAdc {
    pub fn new(config: SimConfig) -> Self {
        log::info!("Simulated ADC ready (seed {:#x}, noise ±{} LSB)", config.seed, config.noise_lsb);
        let inputs = Arc::new(core::array::from_fn(|_| AtomicU32::new(config.initial_input_mv)));
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(config.seed)),
            config,
            inputs,
            oneshot: Mutex::new(None),
            continuous: Mutex::new(ContinuousState::default()),
            fault: AtomicBool::new(false),
        }
    }

    pub fn input_mv(&self, channel: Channel) -> u32 {
        self.inputs[channel.index() as usize].load(Ordering::Relaxed)
    }

    pub fn set_input_mv(&self, channel: Channel, mv: u32) {
        self.inputs[channel.index() as usize].store(mv, Ordering::Relaxed);
    }

    /// Make the next hardware call fail with `ESP_FAIL`.
    pub fn inject_fault(&self) {
        self.fault.store(true, Ordering::Relaxed);
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.continuous).producer.is_some()
    }

    fn take_fault(&self, op: HalOp) -> Result<(), HalError> {
        if self.fault.swap(false, Ordering::Relaxed) {
            return Err(HalError::new(op, ERR_FAIL));
        }
        Ok(())
    }

    fn stop_producer(state: &mut ContinuousState) {
        if let Some(producer) = state.producer.take() {
            producer.stop.store(true, Ordering::Relaxed);
            if producer.handle.join().is_err() {
                log::error!("Frame producer panicked");
            }
        }
    }
}

impl Drop for SimulatedAdc {
    fn drop(&mut self) {
        Self::stop_producer(&mut lock(&self.continuous));
    }
}

/// Produce frames until `stop` is raised, one conversion per pattern entry
/// in turn, reusing a single frame buffer.
fn run_producer(
    inputs: Arc<[AtomicU32; MAX_CHANNELS]>,
    pattern: Vec<PatternEntry>,
    frame_bytes: usize,
    interval: Duration,
    noise_lsb: u16,
    mut rng: SmallRng,
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
) {
    let mut frame = Vec::with_capacity(frame_bytes);
    let mut entries = pattern.iter().cycle();

    while !stop.load(Ordering::Relaxed) {
        frame.clear();
        while frame.len() + BYTES_PER_CONVERSION <= frame_bytes {
            let Some(entry) = entries.next() else {
                break;
            };
            let input = inputs[entry.channel.index() as usize].load(Ordering::Relaxed);
            let raw = convert(input, (entry.attenuation, entry.bit_width), noise(&mut rng, noise_lsb));
            let conversion = Conversion {
                unit: 0,
                channel: entry.channel.index(),
                raw,
            };
            frame.extend_from_slice(&conversion.encode());
        }
        slot.deliver(&frame);
        thread::sleep(interval);
    }
}

impl AdcHal for SimulatedAdc {
    type Calibration = SimCalibration;

    fn create_oneshot_unit(&self) -> Result<(), HalError> {
        self.take_fault(HalOp::CreateOneShotUnit)?;
        let mut unit = lock(&self.oneshot);
        if unit.is_some() {
            return Err(HalError::new(HalOp::CreateOneShotUnit, ERR_INVALID_STATE));
        }
        *unit = Some([None; MAX_CHANNELS]);
        Ok(())
    }

    fn configure_oneshot_channel(
        &self,
        channel: Channel,
        attenuation: Attenuation,
        bit_width: BitWidth,
    ) -> Result<(), HalError> {
        self.take_fault(HalOp::ConfigureOneShotChannel)?;
        let mut unit = lock(&self.oneshot);
        let Some(channels) = unit.as_mut() else {
            return Err(HalError::new(HalOp::ConfigureOneShotChannel, ERR_INVALID_STATE));
        };
        channels[channel.index() as usize] = Some((attenuation, bit_width));
        Ok(())
    }

    fn read_oneshot(&self, channel: Channel) -> Result<u16, HalError> {
        self.take_fault(HalOp::ReadOneShot)?;
        let setting = lock(&self.oneshot)
            .as_ref()
            .and_then(|channels| channels[channel.index() as usize])
            .ok_or(HalError::new(HalOp::ReadOneShot, ERR_INVALID_STATE))?;
        let noise = noise(&mut lock(&self.rng), self.config.noise_lsb);
        Ok(convert(self.input_mv(channel), setting, noise))
    }

    fn delete_oneshot_unit(&self) -> Result<(), HalError> {
        self.take_fault(HalOp::DeleteOneShotUnit)?;
        lock(&self.oneshot)
            .take()
            .map(|_| ())
            .ok_or(HalError::new(HalOp::DeleteOneShotUnit, ERR_INVALID_STATE))
    }

    fn create_continuous(&self, buffer_bytes: u32, frame_bytes: u32) -> Result<(), HalError> {
        self.take_fault(HalOp::CreateContinuous)?;
        if frame_bytes == 0
            || frame_bytes > buffer_bytes
            || frame_bytes as usize % BYTES_PER_CONVERSION != 0
        {
            return Err(HalError::new(HalOp::CreateContinuous, ERR_INVALID_ARG));
        }
        let mut state = lock(&self.continuous);
        if state.frame_bytes.is_some() {
            return Err(HalError::new(HalOp::CreateContinuous, ERR_INVALID_STATE));
        }
        state.frame_bytes = Some(frame_bytes);
        Ok(())
    }

    fn configure_continuous(
        &self,
        sample_rate_hz: u32,
        pattern: &[PatternEntry],
    ) -> Result<(), HalError> {
        self.take_fault(HalOp::ConfigureContinuous)?;
        if pattern.is_empty() || sample_rate_hz == 0 {
            return Err(HalError::new(HalOp::ConfigureContinuous, ERR_INVALID_ARG));
        }
        let mut state = lock(&self.continuous);
        if state.frame_bytes.is_none() {
            return Err(HalError::new(HalOp::ConfigureContinuous, ERR_INVALID_STATE));
        }
        state.sample_rate_hz = sample_rate_hz;
        state.pattern = pattern.to_vec();
        Ok(())
    }

    fn register_frame_slot(&self, slot: Arc<FrameSlot>) -> Result<(), HalError> {
        self.take_fault(HalOp::RegisterFrameSlot)?;
        let mut state = lock(&self.continuous);
        if state.frame_bytes.is_none() {
            return Err(HalError::new(HalOp::RegisterFrameSlot, ERR_INVALID_STATE));
        }
        state.slot = Some(slot);
        Ok(())
    }

    fn start_continuous(&self) -> Result<(), HalError> {
        self.take_fault(HalOp::StartContinuous)?;
        let mut state = lock(&self.continuous);
        let (Some(frame_bytes), Some(slot)) = (state.frame_bytes, state.slot.clone()) else {
            return Err(HalError::new(HalOp::StartContinuous, ERR_INVALID_STATE));
        };
        if state.producer.is_some() || state.pattern.is_empty() {
            return Err(HalError::new(HalOp::StartContinuous, ERR_INVALID_STATE));
        }

        let conversions = frame_bytes as u64 / BYTES_PER_CONVERSION as u64;
        let interval = Duration::from_micros(conversions * 1_000_000 / state.sample_rate_hz as u64)
            .max(self.config.min_frame_interval);
        let stop = Arc::new(AtomicBool::new(false));
        let rng = SmallRng::from_rng(&mut *lock(&self.rng));

        let inputs = Arc::clone(&self.inputs);
        let pattern = state.pattern.clone();
        let noise_lsb = self.config.noise_lsb;
        let producer_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("adc_frames".to_string())
            .spawn(move || {
                run_producer(
                    inputs,
                    pattern,
                    frame_bytes as usize,
                    interval,
                    noise_lsb,
                    rng,
                    slot,
                    producer_stop,
                )
            })
            .map_err(|_| HalError::new(HalOp::StartContinuous, ERR_FAIL))?;

        log::debug!("Frame producer started, one frame every {:?}", interval);
        state.producer = Some(Producer { stop, handle });
        Ok(())
    }

    fn stop_continuous(&self) -> Result<(), HalError> {
        self.take_fault(HalOp::StopContinuous)?;
        let mut state = lock(&self.continuous);
        if state.producer.is_none() {
            return Err(HalError::new(HalOp::StopContinuous, ERR_INVALID_STATE));
        }
        Self::stop_producer(&mut state);
        Ok(())
    }

    fn deinit_continuous(&self) -> Result<(), HalError> {
        self.take_fault(HalOp::DeinitContinuous)?;
        let mut state = lock(&self.continuous);
        if state.frame_bytes.is_none() {
            return Err(HalError::new(HalOp::DeinitContinuous, ERR_INVALID_STATE));
        }
        // a driver deinitialized while running stops first
        Self::stop_producer(&mut state);
        *state = ContinuousState::default();
        Ok(())
    }

    fn create_calibration(
        &self,
        _channel: Channel,
        attenuation: Attenuation,
        bit_width: BitWidth,
    ) -> Result<SimCalibration, HalError> {
        self.take_fault(HalOp::CreateCalibration)?;
        Ok(SimCalibration {
            attenuation,
            bit_width,
        })
    }

    fn apply_calibration(&self, calibration: &SimCalibration, raw: u16) -> Result<u16, HalError> {
        self.take_fault(HalOp::ApplyCalibration)?;
        let max_raw = calibration.bit_width.max_raw() as u32;
        if raw as u32 > max_raw {
            return Err(HalError::new(HalOp::ApplyCalibration, ERR_INVALID_ARG));
        }
        Ok((raw as u32 * calibration.attenuation.full_scale_mv() as u32 / max_raw) as u16)
    }

    fn delete_calibration(&self, _calibration: SimCalibration) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcctl_core::{
        AdcController, AdcError, ChannelAccumulator, ChannelMask, ContinuousRequest,
        ControllerConfig,
    };
    use std::time::Instant;

    fn quiet() -> SimConfig {
        SimConfig {
            noise_lsb: 0,
            ..SimConfig::default()
        }
    }

    fn controller(config: SimConfig) -> AdcController<SimulatedAdc> {
        AdcController::new(SimulatedAdc::new(config), ControllerConfig::default())
    }

    #[test]
    fn test_oneshot_follows_input() {
        let ctrl = controller(quiet());
        ctrl.hal().set_input_mv(Channel::Ch2, 3100);
        ctrl.hal().set_input_mv(Channel::Ch3, 0);

        assert_eq!(ctrl.sample_once(Channel::Ch2, Attenuation::Db12, 8).unwrap(), 4095);
        assert_eq!(ctrl.sample_once(Channel::Ch3, Attenuation::Db12, 8).unwrap(), 0);
        // above full scale saturates
        ctrl.hal().set_input_mv(Channel::Ch2, 2000);
        assert_eq!(ctrl.sample_once(Channel::Ch2, Attenuation::Db0, 1).unwrap(), 4095);
        assert!(ctrl.is_available());
    }

    #[test]
    fn test_noise_stays_bounded() {
        let ctrl = controller(SimConfig {
            noise_lsb: 10,
            ..SimConfig::default()
        });
        ctrl.hal().set_input_mv(Channel::Ch0, 1550);

        for _ in 0..20 {
            let raw = ctrl.sample_once(Channel::Ch0, Attenuation::Db12, 1).unwrap();
            assert!((2037..=2057).contains(&raw), "raw {raw}");
        }
    }

    #[test]
    fn test_calibration_recovers_input() {
        let ctrl = controller(quiet());
        ctrl.hal().set_input_mv(Channel::Ch5, 1200);

        let raw = ctrl.sample_once(Channel::Ch5, Attenuation::Db6, 4).unwrap();
        let mut samples = [raw];
        ctrl.calibrate(Channel::Ch5, Attenuation::Db6, &mut samples).unwrap();

        assert!((1199..=1200).contains(&samples[0]), "mv {}", samples[0]);
    }

    #[test]
    fn test_read_without_unit_fails() {
        let adc = SimulatedAdc::new(quiet());
        let err = adc.read_oneshot(Channel::Ch0).unwrap_err();
        assert_eq!(err, HalError::new(HalOp::ReadOneShot, ERR_INVALID_STATE));
    }

    #[test]
    fn test_injected_fault_surfaces_as_hardware_error() {
        let ctrl = controller(quiet());
        ctrl.hal().inject_fault();

        let err = ctrl.sample_once(Channel::Ch0, Attenuation::Db12, 4).unwrap_err();
        assert!(err.requires_reinit());
        assert!(ctrl.is_available());
        // the fault is consumed by the first call
        assert!(ctrl.sample_once(Channel::Ch0, Attenuation::Db12, 4).is_ok());
    }

    static STREAM: ChannelAccumulator = ChannelAccumulator::new();

    fn on_frame(frame: &[u8]) -> bool {
        STREAM.accumulate(frame);
        false
    }

    #[test]
    fn test_stream_delivers_every_channel() {
        let ctrl = controller(quiet());
        ctrl.hal().set_input_mv(Channel::Ch1, 3100);
        ctrl.hal().set_input_mv(Channel::Ch4, 0);
        let mask: ChannelMask = [Channel::Ch1, Channel::Ch4].into_iter().collect();
        let request = ContinuousRequest {
            channel_mask: mask,
            attenuation: Attenuation::Db12,
            samples_per_channel: 16,
            sample_rate_hz: 80_000,
            frame_callback: Some(on_frame),
        };

        ctrl.start_continuous(&request).unwrap();
        assert!(ctrl.hal().is_streaming());

        let deadline = Instant::now() + Duration::from_secs(2);
        while ctrl.frame_slot().delivered_frames() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        ctrl.stop_continuous(mask).unwrap();

        assert!(ctrl.frame_slot().delivered_frames() >= 3);
        assert!(!ctrl.hal().is_streaming());
        assert_eq!(STREAM.take_average(Channel::Ch1), Some(4095));
        assert_eq!(STREAM.take_average(Channel::Ch4), Some(0));
        assert_eq!(STREAM.take_average(Channel::Ch2), None);

        // nothing is delivered after stop
        let delivered = ctrl.frame_slot().delivered_frames();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ctrl.frame_slot().delivered_frames(), delivered);
    }

    #[test]
    fn test_reinit_stops_a_running_stream() {
        let ctrl = controller(quiet());
        let request = ContinuousRequest {
            channel_mask: Channel::Ch7.mask(),
            attenuation: Attenuation::Db12,
            samples_per_channel: 4,
            sample_rate_hz: 10_000,
            frame_callback: Some(on_frame),
        };
        ctrl.start_continuous(&request).unwrap();

        assert!(matches!(
            ctrl.sample_once(Channel::Ch0, Attenuation::Db12, 1),
            Err(AdcError::ResourceBusy { .. })
        ));

        ctrl.reinit().unwrap();
        assert!(!ctrl.hal().is_streaming());
        assert!(ctrl.is_available());
    }
}
