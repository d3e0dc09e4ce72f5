//! ADC Unit - ESP-IDF backend for the shared ADC1 controller
//!
//! Drives ADC1 through the raw ESP-IDF drivers rather than the esp-idf-hal
//! wrappers: the continuous driver and the calibration schemes are not
//! wrapped there, and the one-shot unit has to be created and deleted per
//! session instead of living for the program's lifetime.
//!
//! On the ESP32-S3, ADC1 channels 0..=9 are GPIO1..=GPIO10.

use std::ffi::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use adcctl_core::{AdcHal, Attenuation, BitWidth, Channel, FrameSlot, HalError, HalOp, PatternEntry};
use esp_idf_hal::adc::ADC1;
use esp_idf_svc::sys::{self, esp, esp_err_t};

/// A live curve-fitting calibration scheme.
pub struct EspCalibration(sys::adc_cali_handle_t);

/// Owns ADC1 and the driver handles of whichever path is live.
pub struct EspAdcHal {
    _adc1: ADC1,
    oneshot: AtomicPtr<sys::adc_oneshot_unit_ctx_t>,
    continuous: AtomicPtr<sys::adc_continuous_ctx_t>,
    /// Keeps the frame slot alive while the driver holds a pointer to it.
    slot: Mutex<Option<Arc<FrameSlot>>>,
}

// SAFETY: the ADC1 token is only held for ownership and never touched; the
// driver handles are atomics and the controller serializes every path.
unsafe impl Sync for EspAdcHal {}

impl EspAdcHal {
    pub fn new(adc1: ADC1) -> Self {
        log::info!("ADC1 backend ready");
        Self {
            _adc1: adc1,
            oneshot: AtomicPtr::new(ptr::null_mut()),
            continuous: AtomicPtr::new(ptr::null_mut()),
            slot: Mutex::new(None),
        }
    }

    fn oneshot_handle(&self, op: HalOp) -> Result<sys::adc_oneshot_unit_handle_t, HalError> {
        let handle = self.oneshot.load(Ordering::Acquire);
        if handle.is_null() {
            return Err(HalError::new(op, sys::ESP_ERR_INVALID_STATE as esp_err_t));
        }
        Ok(handle)
    }

    fn continuous_handle(&self, op: HalOp) -> Result<sys::adc_continuous_handle_t, HalError> {
        let handle = self.continuous.load(Ordering::Acquire);
        if handle.is_null() {
            return Err(HalError::new(op, sys::ESP_ERR_INVALID_STATE as esp_err_t));
        }
        Ok(handle)
    }
}

fn check(op: HalOp, code: esp_err_t) -> Result<(), HalError> {
    esp!(code).map_err(|e| HalError::new(op, e.code()))
}

fn atten(attenuation: Attenuation) -> sys::adc_atten_t {
    match attenuation {
        Attenuation::Db0 => sys::adc_atten_t_ADC_ATTEN_DB_0,
        Attenuation::Db2_5 => sys::adc_atten_t_ADC_ATTEN_DB_2_5,
        Attenuation::Db6 => sys::adc_atten_t_ADC_ATTEN_DB_6,
        Attenuation::Db12 => sys::adc_atten_t_ADC_ATTEN_DB_12,
    }
}

fn bitwidth(bit_width: BitWidth) -> sys::adc_bitwidth_t {
    match bit_width {
        BitWidth::Bits9 => sys::adc_bitwidth_t_ADC_BITWIDTH_9,
        BitWidth::Bits10 => sys::adc_bitwidth_t_ADC_BITWIDTH_10,
        BitWidth::Bits11 => sys::adc_bitwidth_t_ADC_BITWIDTH_11,
        BitWidth::Bits12 => sys::adc_bitwidth_t_ADC_BITWIDTH_12,
        BitWidth::Bits13 => sys::adc_bitwidth_t_ADC_BITWIDTH_13,
    }
}

fn channel_id(channel: Channel) -> sys::adc_channel_t {
    channel.index() as sys::adc_channel_t
}

/// Conversion-done handler, runs in ISR context.
unsafe extern "C" fn on_conv_done(
    _handle: sys::adc_continuous_handle_t,
    edata: *const sys::adc_continuous_evt_data_t,
    user_data: *mut c_void,
) -> bool {
    if edata.is_null() || user_data.is_null() {
        return false;
    }
    // SAFETY: user_data is the registered FrameSlot, kept alive in `slot`
    // until the driver is deinitialized; the driver owns the frame buffer
    // for the duration of this call.
    let (slot, frame) = unsafe {
        let data = &*edata;
        (
            &*(user_data as *const FrameSlot),
            core::slice::from_raw_parts(data.conv_frame_buffer, data.size as usize),
        )
    };
    slot.deliver(frame)
}

impl AdcHal for EspAdcHal {
    type Calibration = EspCalibration;

    fn create_oneshot_unit(&self) -> Result<(), HalError> {
        let config = sys::adc_oneshot_unit_init_cfg_t {
            unit_id: sys::adc_unit_t_ADC_UNIT_1,
            ..Default::default()
        };
        let mut handle: sys::adc_oneshot_unit_handle_t = ptr::null_mut();
        check(HalOp::CreateOneShotUnit, unsafe {
            sys::adc_oneshot_new_unit(&config, &mut handle)
        })?;
        self.oneshot.store(handle, Ordering::Release);
        Ok(())
    }

    fn configure_oneshot_channel(
        &self,
        channel: Channel,
        attenuation: Attenuation,
        bit_width: BitWidth,
    ) -> Result<(), HalError> {
        let handle = self.oneshot_handle(HalOp::ConfigureOneShotChannel)?;
        let config = sys::adc_oneshot_chan_cfg_t {
            atten: atten(attenuation),
            bitwidth: bitwidth(bit_width),
        };
        check(HalOp::ConfigureOneShotChannel, unsafe {
            sys::adc_oneshot_config_channel(handle, channel_id(channel), &config)
        })
    }

    fn read_oneshot(&self, channel: Channel) -> Result<u16, HalError> {
        let handle = self.oneshot_handle(HalOp::ReadOneShot)?;
        let mut raw: c_int = 0;
        check(HalOp::ReadOneShot, unsafe {
            sys::adc_oneshot_read(handle, channel_id(channel), &mut raw)
        })?;
        Ok(raw.clamp(0, u16::MAX as c_int) as u16)
    }

    fn delete_oneshot_unit(&self) -> Result<(), HalError> {
        let handle = self.oneshot_handle(HalOp::DeleteOneShotUnit)?;
        check(HalOp::DeleteOneShotUnit, unsafe { sys::adc_oneshot_del_unit(handle) })?;
        self.oneshot.store(ptr::null_mut(), Ordering::Release);
        Ok(())
    }

    fn create_continuous(&self, buffer_bytes: u32, frame_bytes: u32) -> Result<(), HalError> {
        let config = sys::adc_continuous_handle_cfg_t {
            max_store_buf_size: buffer_bytes,
            conv_frame_size: frame_bytes,
            ..Default::default()
        };
        let mut handle: sys::adc_continuous_handle_t = ptr::null_mut();
        check(HalOp::CreateContinuous, unsafe {
            sys::adc_continuous_new_handle(&config, &mut handle)
        })?;
        self.continuous.store(handle, Ordering::Release);
        Ok(())
    }

    fn configure_continuous(
        &self,
        sample_rate_hz: u32,
        pattern: &[PatternEntry],
    ) -> Result<(), HalError> {
        let handle = self.continuous_handle(HalOp::ConfigureContinuous)?;
        let mut table: Vec<sys::adc_digi_pattern_config_t> = pattern
            .iter()
            .map(|entry| sys::adc_digi_pattern_config_t {
                atten: atten(entry.attenuation) as u8,
                channel: entry.channel.index(),
                unit: sys::adc_unit_t_ADC_UNIT_1 as u8,
                bit_width: bitwidth(entry.bit_width) as u8,
            })
            .collect();
        let config = sys::adc_continuous_config_t {
            pattern_num: table.len() as u32,
            adc_pattern: table.as_mut_ptr(),
            sample_freq_hz: sample_rate_hz,
            conv_mode: sys::adc_digi_convert_mode_t_ADC_CONV_SINGLE_UNIT_1,
            format: sys::adc_digi_output_format_t_ADC_DIGI_OUTPUT_FORMAT_TYPE2,
        };
        // the driver copies the pattern table
        check(HalOp::ConfigureContinuous, unsafe {
            sys::adc_continuous_config(handle, &config)
        })
    }

    fn register_frame_slot(&self, slot: Arc<FrameSlot>) -> Result<(), HalError> {
        let handle = self.continuous_handle(HalOp::RegisterFrameSlot)?;
        let callbacks = sys::adc_continuous_evt_cbs_t {
            on_conv_done: Some(on_conv_done),
            ..Default::default()
        };
        let user_data = Arc::as_ptr(&slot) as *mut c_void;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(slot);
        check(HalOp::RegisterFrameSlot, unsafe {
            sys::adc_continuous_register_event_callbacks(handle, &callbacks, user_data)
        })
    }

    fn start_continuous(&self) -> Result<(), HalError> {
        let handle = self.continuous_handle(HalOp::StartContinuous)?;
        check(HalOp::StartContinuous, unsafe { sys::adc_continuous_start(handle) })
    }

    fn stop_continuous(&self) -> Result<(), HalError> {
        let handle = self.continuous_handle(HalOp::StopContinuous)?;
        check(HalOp::StopContinuous, unsafe { sys::adc_continuous_stop(handle) })
    }

    fn deinit_continuous(&self) -> Result<(), HalError> {
        let handle = self.continuous_handle(HalOp::DeinitContinuous)?;
        check(HalOp::DeinitContinuous, unsafe { sys::adc_continuous_deinit(handle) })?;
        self.continuous.store(ptr::null_mut(), Ordering::Release);
        // no more callbacks after deinit
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }

    fn create_calibration(
        &self,
        channel: Channel,
        attenuation: Attenuation,
        bit_width: BitWidth,
    ) -> Result<EspCalibration, HalError> {
        let config = sys::adc_cali_curve_fitting_config_t {
            unit_id: sys::adc_unit_t_ADC_UNIT_1,
            chan: channel_id(channel),
            atten: atten(attenuation),
            bitwidth: bitwidth(bit_width),
        };
        let mut handle: sys::adc_cali_handle_t = ptr::null_mut();
        check(HalOp::CreateCalibration, unsafe {
            sys::adc_cali_create_scheme_curve_fitting(&config, &mut handle)
        })?;
        Ok(EspCalibration(handle))
    }

    fn apply_calibration(&self, calibration: &EspCalibration, raw: u16) -> Result<u16, HalError> {
        let mut mv: c_int = 0;
        check(HalOp::ApplyCalibration, unsafe {
            sys::adc_cali_raw_to_voltage(calibration.0, raw as c_int, &mut mv)
        })?;
        Ok(mv.clamp(0, u16::MAX as c_int) as u16)
    }

    fn delete_calibration(&self, calibration: EspCalibration) {
        let code = unsafe { sys::adc_cali_delete_scheme_curve_fitting(calibration.0) };
        if let Err(e) = esp!(code) {
            log::warn!("Failed to delete calibration scheme: {}", e);
        }
    }
}
