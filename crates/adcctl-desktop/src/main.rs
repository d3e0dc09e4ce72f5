use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use adcctl_core::{AdcController, Attenuation, Channel, ControllerConfig};
use log::LevelFilter;

mod dashboard;
mod sim_hal;

use sim_hal::{SimConfig, SimulatedAdc};

/// Channel polled in the background, competing with the dashboard for the unit.
const HOUSEKEEPING_CHANNEL: Channel = Channel::Ch9;
const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(3);

fn main() -> anyhow::Result<()> {
    let logs = dashboard::init_logging(LevelFilter::Debug);

    let adc = SimulatedAdc::new(SimConfig::from_env());
    let controller = Arc::new(AdcController::new(adc, ControllerConfig::default()));
    let running = Arc::new(AtomicBool::new(true));

    let housekeeping = {
        let controller = Arc::clone(&controller);
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("housekeeping".to_string())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    thread::sleep(HOUSEKEEPING_PERIOD);
                    match controller.sample_once(HOUSEKEEPING_CHANNEL, Attenuation::Db12, 8) {
                        Ok(raw) => log::debug!("Housekeeping {}: raw {}", HOUSEKEEPING_CHANNEL, raw),
                        Err(e) => log::debug!("Housekeeping read skipped: {}", e),
                    }
                }
            })?
    };

    dashboard::run(&controller, logs)?;

    running.store(false, Ordering::Relaxed);
    if housekeeping.join().is_err() {
        anyhow::bail!("housekeeping thread panicked");
    }
    Ok(())
}
