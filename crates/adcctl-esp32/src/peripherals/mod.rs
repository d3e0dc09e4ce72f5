pub mod adc_unit;

pub use adc_unit::EspAdcHal;

use esp_idf_hal::adc;
use esp_idf_hal::peripherals::Peripherals;

pub struct SystemPeripherals {
    pub adc1: adc::ADC1,
}

impl SystemPeripherals {
    pub fn take() -> anyhow::Result<Self> {
        let peripherals = Peripherals::take()?;

        Ok(SystemPeripherals {
            adc1: peripherals.adc1,
        })
    }
}
