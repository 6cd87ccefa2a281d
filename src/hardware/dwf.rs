//! Digilent Analog Discovery impedance analyzer via the WaveForms SDK.
//!
//! The SDK is loaded at runtime by `dwf-sys`, once per process; every
//! `DwfAnalyzer` shares the same library handle.
#![allow(unsafe_code)]

use super::{dedup_by_serial, AnalyzerStatus, DeviceInfo, ImpedanceAnalyzer};
use crate::config::AnalyzerConfig;
use crate::error::{AppResult, ImpedanceError};
use dwf_sys::{
    buffer_to_string, DwfLibrary, DwfState, BOOL, DEVICE_INDEX_FIRST_AVAILABLE,
    DWF_ANALOG_IMPEDANCE_RESISTANCE, DWF_STATE_DONE, ENUMFILTER_ALL, HDWF, HDWF_NONE,
    STRING_BUFFER_LEN,
};
use once_cell::sync::OnceCell;
use std::ffi::{c_char, c_int};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

static LIBRARY: OnceCell<Arc<DwfLibrary>> = OnceCell::new();

/// Load the SDK on first use. Later calls return the same library and ignore
/// `explicit`.
fn library(explicit: Option<&Path>) -> AppResult<Arc<DwfLibrary>> {
    LIBRARY
        .get_or_try_init(|| {
            // SAFETY: the WaveForms SDK is a trusted vendor library installed by the user.
            let library = unsafe { DwfLibrary::load(explicit) }?;
            let mut version = [0 as c_char; STRING_BUFFER_LEN];
            // SAFETY: the buffer exceeds the SDK's documented 32-byte version string.
            unsafe { (library.get_version)(version.as_mut_ptr()) };
            info!(
                path = %library.path().display(),
                version = %buffer_to_string(&version),
                "Loaded WaveForms SDK"
            );
            Ok::<_, ImpedanceError>(Arc::new(library))
        })
        .cloned()
}

pub struct DwfAnalyzer {
    library: Arc<DwfLibrary>,
    handle: HDWF,
    running: bool,
}

impl DwfAnalyzer {
    /// Load (or reuse) the SDK. `library_path` overrides the platform search.
    pub fn new(library_path: Option<&Path>) -> AppResult<Self> {
        Ok(Self {
            library: library(library_path)?,
            handle: HDWF_NONE,
            running: false,
        })
    }

    fn is_open(&self) -> bool {
        self.handle != HDWF_NONE
    }

    fn require_open(&self) -> AppResult<HDWF> {
        if self.is_open() {
            Ok(self.handle)
        } else {
            Err(ImpedanceError::Instrument("device is not open".into()))
        }
    }

    /// Turn an SDK return code into a result carrying the SDK's message.
    fn check(&mut self, ok: BOOL, call: &str) -> AppResult<()> {
        if ok != 0 {
            return Ok(());
        }
        let message = self
            .last_error()
            .unwrap_or_else(|| "no error message".to_string());
        Err(ImpedanceError::Instrument(format!("{call} failed: {message}")))
    }

    fn enum_string(&self, f: dwf_sys::FnEnumString, index: c_int) -> String {
        let mut buffer = [0 as c_char; STRING_BUFFER_LEN];
        // SAFETY: index < device count; the buffer is larger than the SDK's 32-byte strings.
        unsafe { f(index, buffer.as_mut_ptr()) };
        buffer_to_string(&buffer)
    }
}

impl ImpedanceAnalyzer for DwfAnalyzer {
    fn enumerate(&mut self) -> AppResult<Vec<DeviceInfo>> {
        let mut count: c_int = 0;
        // SAFETY: `count` is a valid out pointer.
        let ok = unsafe { (self.library.enumerate)(ENUMFILTER_ALL, &mut count) };
        self.check(ok, "FDwfEnum")?;

        let mut devices = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            let name = self.enum_string(self.library.enum_device_name, index);
            let serial_number = self.enum_string(self.library.enum_serial_number, index);
            let mut in_use: BOOL = 0;
            // SAFETY: `in_use` is a valid out pointer.
            unsafe { (self.library.enum_device_is_opened)(index, &mut in_use) };
            devices.push(DeviceInfo {
                name,
                serial_number,
                in_use: in_use != 0,
            });
        }
        Ok(dedup_by_serial(devices))
    }

    fn open_first(&mut self) -> AppResult<bool> {
        if self.is_open() {
            return Ok(true);
        }
        let mut handle = HDWF_NONE;
        // SAFETY: `handle` is a valid out pointer.
        unsafe { (self.library.device_open)(DEVICE_INDEX_FIRST_AVAILABLE, &mut handle) };
        self.handle = handle;
        Ok(self.is_open())
    }

    fn last_error(&mut self) -> Option<String> {
        let mut buffer = [0 as c_char; STRING_BUFFER_LEN];
        // SAFETY: the SDK writes at most 512 bytes, the buffer length.
        unsafe { (self.library.get_last_error_msg)(buffer.as_mut_ptr()) };
        let message = buffer_to_string(&buffer);
        let message = message.trim();
        (!message.is_empty()).then(|| message.to_string())
    }

    fn configure(&mut self, config: &AnalyzerConfig) -> AppResult<()> {
        let handle = self.require_open()?;
        let lib = Arc::clone(&self.library);

        // SAFETY: `handle` was returned by FDwfDeviceOpen and has not been closed.
        unsafe {
            self.check((lib.impedance_reset)(handle), "FDwfAnalogImpedanceReset")?;
            self.check(
                (lib.impedance_mode_set)(handle, config.mode.code()),
                "FDwfAnalogImpedanceModeSet",
            )?;
            self.check(
                (lib.impedance_reference_set)(handle, config.reference_resistance_ohms),
                "FDwfAnalogImpedanceReferenceSet",
            )?;
            self.check(
                (lib.impedance_frequency_set)(handle, config.measurement_frequency_hz),
                "FDwfAnalogImpedanceFrequencySet",
            )?;
            self.check(
                (lib.impedance_period_set)(handle, config.minimum_periods as c_int),
                "FDwfAnalogImpedancePeriodSet",
            )?;
            self.check(
                (lib.impedance_amplitude_set)(handle, config.amplitude_volts),
                "FDwfAnalogImpedanceAmplitudeSet",
            )?;
            self.check(
                (lib.impedance_offset_set)(handle, config.offset_volts),
                "FDwfAnalogImpedanceOffsetSet",
            )?;
            self.check(
                (lib.impedance_configure)(handle, 1),
                "FDwfAnalogImpedanceConfigure",
            )?;
        }
        self.running = true;
        debug!(
            mode = ?config.mode,
            frequency_hz = config.measurement_frequency_hz,
            amplitude_volts = config.amplitude_volts,
            "Impedance analysis started"
        );
        Ok(())
    }

    fn status(&mut self) -> AppResult<AnalyzerStatus> {
        let handle = self.require_open()?;
        let mut state: DwfState = 0;
        // SAFETY: open handle, valid out pointer.
        let ok = unsafe { (self.library.impedance_status)(handle, &mut state) };
        self.check(ok, "FDwfAnalogImpedanceStatus")?;
        Ok(if state == DWF_STATE_DONE {
            AnalyzerStatus::Done
        } else {
            AnalyzerStatus::Pending(state)
        })
    }

    fn read_resistance(&mut self) -> AppResult<f64> {
        let handle = self.require_open()?;
        let mut ohms = 0.0;
        // SAFETY: open handle, valid out pointer.
        let ok = unsafe {
            (self.library.impedance_status_measure)(
                handle,
                DWF_ANALOG_IMPEDANCE_RESISTANCE,
                &mut ohms,
            )
        };
        self.check(ok, "FDwfAnalogImpedanceStatusMeasure")?;
        Ok(ohms)
    }

    fn close(&mut self) {
        if !self.is_open() {
            return;
        }
        // SAFETY: open handle; it is reset to HDWF_NONE below so it is closed once.
        unsafe {
            if self.running {
                (self.library.impedance_configure)(self.handle, 0);
            }
            (self.library.device_close)(self.handle);
        }
        if self.running {
            info!("Impedance analysis stopped");
        }
        self.handle = HDWF_NONE;
        self.running = false;
    }
}

impl Drop for DwfAnalyzer {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("DwfAnalyzer dropped with the device open; closing");
            self.close();
        }
    }
}
