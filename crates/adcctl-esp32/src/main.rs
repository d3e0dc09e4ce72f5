use std::sync::Arc;
use std::thread;

use adcctl_core::{
    AdcController, AdcError, Attenuation, Channel, ChannelAccumulator, ChannelMask,
    ContinuousRequest, ControllerConfig,
};
use esp_idf_hal::delay::FreeRtos;

mod peripherals;

use peripherals::{EspAdcHal, SystemPeripherals};

type Controller = AdcController<EspAdcHal>;

// Board wiring on ADC1: microphone on GPIO1, light sensor on GPIO2, battery
// divider on GPIO4.
const MIC: Channel = Channel::Ch0;
const LIGHT: Channel = Channel::Ch1;
const BATTERY: Channel = Channel::Ch3;

const BATTERY_PERIOD_MS: u32 = 2000;
const STREAM_RATE_HZ: u32 = 20_000;
const STREAM_SAMPLES_PER_CHANNEL: u32 = 64;
const STREAM_SECONDS: u32 = 5;
const LOUDNESS_WINDOW: u32 = 100;

static STREAM_ACCUMULATOR: ChannelAccumulator = ChannelAccumulator::new();

fn on_stream_frame(frame: &[u8]) -> bool {
    STREAM_ACCUMULATOR.accumulate(frame);
    false
}

fn main() -> anyhow::Result<()> {
    // It is necessary to call this function once. Otherwise, some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("adcctl ESP32 starting...");

    let peripherals = SystemPeripherals::take()?;
    let controller = Arc::new(AdcController::new(
        EspAdcHal::new(peripherals.adc1),
        ControllerConfig::default(),
    ));

    let battery_controller = Arc::clone(&controller);
    thread::Builder::new()
        .name("battery_monitor".to_string())
        .stack_size(4096)
        .spawn(move || battery_monitor(&battery_controller))?;

    log::info!("Starting sampling cycle...");
    loop {
        if let Err(e) = stream_cycle(&controller) {
            recover(&controller, e);
        }
        if let Err(e) = loudness_cycle(&controller) {
            recover(&controller, e);
        }
    }
}

/// Periodic one-shot reads that compete with the main cycle for the unit.
fn battery_monitor(controller: &Controller) {
    loop {
        FreeRtos::delay_ms(BATTERY_PERIOD_MS);

        let raw = match controller.sample_once(BATTERY, Attenuation::Db12, 16) {
            Ok(raw) => raw,
            Err(e) if e.is_retryable() => {
                log::debug!("Battery read deferred: {}", e);
                continue;
            }
            Err(e) => {
                recover(controller, e);
                continue;
            }
        };

        let mut samples = [raw];
        match controller.calibrate(BATTERY, Attenuation::Db12, &mut samples) {
            // the divider halves the cell voltage
            Ok(()) => log::info!("Battery: {} mV (raw {})", samples[0] as u32 * 2, raw),
            Err(e) => log::warn!("Battery calibration failed: {}", e),
        }
    }
}

/// Stream the light sensor and microphone for a few seconds, printing
/// calibrated per-channel averages once a second.
fn stream_cycle(controller: &Controller) -> Result<(), AdcError> {
    let mask: ChannelMask = [MIC, LIGHT].into_iter().collect();
    let request = ContinuousRequest {
        channel_mask: mask,
        attenuation: Attenuation::Db12,
        samples_per_channel: STREAM_SAMPLES_PER_CHANNEL,
        sample_rate_hz: STREAM_RATE_HZ,
        frame_callback: Some(on_stream_frame),
    };

    STREAM_ACCUMULATOR.reset();
    controller.start_continuous(&request)?;

    for _ in 0..STREAM_SECONDS {
        FreeRtos::delay_ms(1000);
        for channel in mask.iter() {
            let Some(raw) = STREAM_ACCUMULATOR.take_average(channel) else {
                log::warn!("{}: no conversions this second", channel);
                continue;
            };
            let mut samples = [raw];
            controller.calibrate(channel, Attenuation::Db12, &mut samples)?;
            log::info!("{}: {} mV", channel, samples[0]);
        }
    }

    controller.stop_continuous(mask)?;
    let slot = controller.frame_slot();
    log::info!(
        "Stream stopped: {} frames delivered, {} dropped",
        slot.delivered_frames(),
        slot.dropped_frames()
    );
    Ok(())
}

/// Tight polling of the microphone through the time-critical path.
fn loudness_cycle(controller: &Controller) -> Result<(), AdcError> {
    controller.setup_time_critical(MIC, Attenuation::Db12)?;

    let mut min = u16::MAX;
    let mut max = 0;
    for _ in 0..LOUDNESS_WINDOW {
        let raw = controller.sample_time_critical(MIC, 4)?;
        min = min.min(raw);
        max = max.max(raw);
        FreeRtos::delay_ms(10);
    }

    controller.release_time_critical(MIC)?;
    log::info!("Mic peak-to-peak: {} (raw)", max.saturating_sub(min));
    Ok(())
}

fn recover(controller: &Controller, error: AdcError) {
    if error.requires_reinit() {
        log::error!("ADC hardware error: {}, re-initializing", error);
        let _ = controller.reinit();
    } else {
        log::warn!("ADC request failed: {}", error);
    }
}
