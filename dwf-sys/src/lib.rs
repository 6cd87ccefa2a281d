//! Runtime-loaded bindings for the Digilent WaveForms SDK (`dwf`).
//!
//! The SDK ships as a proprietary shared library (`dwf.dll`, `libdwf.so`, or
//! `dwf.framework` on macOS) that cannot be linked at build time on machines
//! without WaveForms installed. This crate resolves it at runtime with
//! `libloading` and exposes the raw C entry points used for impedance analysis.
//!
//! Only the subset of `dwf.h` needed by the impedance analyzer is bound. All
//! entry points are `unsafe extern "C"` function pointers; safe wrappers live in
//! the consuming crate.

#![allow(non_camel_case_types)]

use libloading::Library;
use std::ffi::{c_char, c_double, c_int, c_uchar, CStr};
use std::path::{Path, PathBuf};

/// Device handle.
pub type HDWF = c_int;
/// C `BOOL` as used by the SDK (non-zero is true).
pub type BOOL = c_int;
/// Instrument state byte.
pub type DwfState = c_uchar;
/// Device enumeration filter.
pub type ENUMFILTER = c_int;
/// Impedance measurement selector.
pub type DwfAnalogImpedance = c_int;

/// Invalid device handle.
pub const HDWF_NONE: HDWF = 0;
/// Enumerate all device types.
pub const ENUMFILTER_ALL: ENUMFILTER = 0;
/// Acquisition finished; a measurement is ready.
pub const DWF_STATE_DONE: DwfState = 2;
/// Series resistance component of the measured impedance.
pub const DWF_ANALOG_IMPEDANCE_RESISTANCE: DwfAnalogImpedance = 2;
/// Open the first available device.
pub const DEVICE_INDEX_FIRST_AVAILABLE: c_int = -1;
/// Minimum buffer size for strings returned by the SDK (error messages are the longest).
pub const STRING_BUFFER_LEN: usize = 512;

/// `FDwfGetVersion(char szVersion[32])`
pub type FnGetVersion = unsafe extern "C" fn(version: *mut c_char) -> BOOL;
/// `FDwfGetLastErrorMsg(char szError[512])`
pub type FnGetLastErrorMsg = unsafe extern "C" fn(error: *mut c_char) -> BOOL;
/// `FDwfEnum(ENUMFILTER, int*)`
pub type FnEnum = unsafe extern "C" fn(filter: ENUMFILTER, count: *mut c_int) -> BOOL;
/// `FDwfEnumDeviceName(int, char[32])` and `FDwfEnumSN(int, char[32])`
pub type FnEnumString = unsafe extern "C" fn(index: c_int, out: *mut c_char) -> BOOL;
/// `FDwfEnumDeviceIsOpened(int, BOOL*)`
pub type FnEnumIsOpened = unsafe extern "C" fn(index: c_int, in_use: *mut BOOL) -> BOOL;
/// `FDwfDeviceOpen(int, HDWF*)`
pub type FnDeviceOpen = unsafe extern "C" fn(index: c_int, handle: *mut HDWF) -> BOOL;
/// Functions taking only a device handle.
pub type FnHandle = unsafe extern "C" fn(handle: HDWF) -> BOOL;
/// Functions taking a device handle and an integer argument.
pub type FnHandleInt = unsafe extern "C" fn(handle: HDWF, value: c_int) -> BOOL;
/// Functions taking a device handle and a double argument.
pub type FnHandleDouble = unsafe extern "C" fn(handle: HDWF, value: c_double) -> BOOL;
/// `FDwfAnalogImpedanceStatus(HDWF, DwfState*)`
pub type FnImpedanceStatus = unsafe extern "C" fn(handle: HDWF, state: *mut DwfState) -> BOOL;
/// `FDwfAnalogImpedanceStatusMeasure(HDWF, DwfAnalogImpedance, double*)`
pub type FnImpedanceStatusMeasure = unsafe extern "C" fn(
    handle: HDWF,
    measure: DwfAnalogImpedance,
    value: *mut c_double,
) -> BOOL;

/// Errors raised while locating or binding the SDK.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("WaveForms SDK not found (searched: {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to load WaveForms SDK from {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("WaveForms SDK at {path} is missing symbol {name}: {source}")]
    Symbol {
        path: PathBuf,
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

/// Entry points resolved from a loaded SDK.
///
/// The function pointers stay valid for as long as this value (and therefore
/// the underlying [`Library`]) is alive.
pub struct DwfLibrary {
    path: PathBuf,
    pub get_version: FnGetVersion,
    pub get_last_error_msg: FnGetLastErrorMsg,
    pub enumerate: FnEnum,
    pub enum_device_name: FnEnumString,
    pub enum_serial_number: FnEnumString,
    pub enum_device_is_opened: FnEnumIsOpened,
    pub device_open: FnDeviceOpen,
    pub device_close: FnHandle,
    pub impedance_reset: FnHandle,
    pub impedance_mode_set: FnHandleInt,
    pub impedance_reference_set: FnHandleDouble,
    pub impedance_frequency_set: FnHandleDouble,
    pub impedance_period_set: FnHandleInt,
    pub impedance_amplitude_set: FnHandleDouble,
    pub impedance_offset_set: FnHandleDouble,
    pub impedance_configure: FnHandleInt,
    pub impedance_status: FnImpedanceStatus,
    pub impedance_status_measure: FnImpedanceStatusMeasure,
    _library: Library,
}

macro_rules! resolve {
    ($library:expr, $path:expr, $name:literal, $ty:ty) => {{
        let symbol = $library
            .get::<$ty>(concat!($name, "\0").as_bytes())
            .map_err(|source| LoadError::Symbol {
                path: $path.to_path_buf(),
                name: $name,
                source,
            })?;
        *symbol
    }};
}

impl DwfLibrary {
    /// Load the SDK from `explicit` if given, otherwise from the first platform
    /// candidate that opens.
    ///
    /// # Safety
    ///
    /// Loading a shared library runs its initialisers. The caller must trust
    /// the library found at the given or searched locations.
    pub unsafe fn load(explicit: Option<&Path>) -> Result<Self, LoadError> {
        if let Some(path) = explicit {
            return Self::open(path);
        }

        let candidates = candidate_paths();
        let mut last_error = None;
        for candidate in &candidates {
            match Self::open(candidate) {
                Ok(library) => return Ok(library),
                Err(err @ LoadError::Symbol { .. }) => return Err(err),
                Err(err) => last_error = Some(err),
            }
        }

        match last_error {
            // A single bare library name (Windows, Linux) gives the more useful loader message.
            Some(err) if candidates.len() == 1 => Err(err),
            _ => Err(LoadError::NotFound {
                searched: candidates,
            }),
        }
    }

    /// Open the library at `path` and resolve every required entry point.
    ///
    /// # Safety
    ///
    /// See [`DwfLibrary::load`].
    pub unsafe fn open(path: &Path) -> Result<Self, LoadError> {
        let library = Library::new(path).map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            get_version: resolve!(library, path, "FDwfGetVersion", FnGetVersion),
            get_last_error_msg: resolve!(library, path, "FDwfGetLastErrorMsg", FnGetLastErrorMsg),
            enumerate: resolve!(library, path, "FDwfEnum", FnEnum),
            enum_device_name: resolve!(library, path, "FDwfEnumDeviceName", FnEnumString),
            enum_serial_number: resolve!(library, path, "FDwfEnumSN", FnEnumString),
            enum_device_is_opened: resolve!(library, path, "FDwfEnumDeviceIsOpened", FnEnumIsOpened),
            device_open: resolve!(library, path, "FDwfDeviceOpen", FnDeviceOpen),
            device_close: resolve!(library, path, "FDwfDeviceClose", FnHandle),
            impedance_reset: resolve!(library, path, "FDwfAnalogImpedanceReset", FnHandle),
            impedance_mode_set: resolve!(library, path, "FDwfAnalogImpedanceModeSet", FnHandleInt),
            impedance_reference_set: resolve!(
                library,
                path,
                "FDwfAnalogImpedanceReferenceSet",
                FnHandleDouble
            ),
            impedance_frequency_set: resolve!(
                library,
                path,
                "FDwfAnalogImpedanceFrequencySet",
                FnHandleDouble
            ),
            impedance_period_set: resolve!(library, path, "FDwfAnalogImpedancePeriodSet", FnHandleInt),
            impedance_amplitude_set: resolve!(
                library,
                path,
                "FDwfAnalogImpedanceAmplitudeSet",
                FnHandleDouble
            ),
            impedance_offset_set: resolve!(
                library,
                path,
                "FDwfAnalogImpedanceOffsetSet",
                FnHandleDouble
            ),
            impedance_configure: resolve!(library, path, "FDwfAnalogImpedanceConfigure", FnHandleInt),
            impedance_status: resolve!(library, path, "FDwfAnalogImpedanceStatus", FnImpedanceStatus),
            impedance_status_measure: resolve!(
                library,
                path,
                "FDwfAnalogImpedanceStatusMeasure",
                FnImpedanceStatusMeasure
            ),
            _library: library,
        })
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Platform-specific locations to try, in order of preference.
pub fn candidate_paths() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        vec![PathBuf::from(libloading::library_filename("dwf"))]
    } else if cfg!(target_os = "macos") {
        macos_candidate_paths()
    } else {
        vec![PathBuf::from("libdwf.so")]
    }
}

const FRAMEWORK_SUFFIX: &str = "Frameworks/dwf.framework/dwf";
const DEFAULT_APP_PATH: &str = "/Applications/WaveForms.app";

// System framework folders come first. The copy bundled inside WaveForms.app
// cannot enumerate devices unless run as superuser.
fn macos_candidate_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);

    let mut paths = vec![Path::new("/Library").join(FRAMEWORK_SUFFIX)];
    if let Some(home) = &home {
        paths.push(home.join("Library").join(FRAMEWORK_SUFFIX));
    }

    let mut app_paths = vec![PathBuf::from(DEFAULT_APP_PATH)];
    if let Some(home) = &home {
        app_paths.push(home.join(DEFAULT_APP_PATH.trim_start_matches('/')));
    }
    app_paths.extend(spotlight_app_paths());

    if let Some(app) = app_paths.into_iter().find(|p| p.is_dir()) {
        paths.push(app.join("Contents").join(FRAMEWORK_SUFFIX));
    }

    paths.into_iter().filter(|p| p.is_file()).collect()
}

fn spotlight_app_paths() -> Vec<PathBuf> {
    let output = std::process::Command::new("mdfind")
        .arg("kMDItemKind == Application && kMDItemDisplayName == 'WaveForms'")
        .output();
    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Decode a NUL-terminated SDK string buffer, lossily.
pub fn buffer_to_string(buffer: &[c_char]) -> String {
    // SAFETY: c_char and u8 have identical size and alignment.
    let bytes: &[u8] =
        unsafe { std::slice::from_raw_parts(buffer.as_ptr().cast::<u8>(), buffer.len()) };
    match CStr::from_bytes_until_nul(bytes) {
        Ok(s) => s.to_string_lossy().into_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_stops_at_nul() {
        let mut buffer = [0 as c_char; 16];
        for (dst, src) in buffer.iter_mut().zip(b"AD2\0junk") {
            *dst = *src as c_char;
        }
        assert_eq!(buffer_to_string(&buffer), "AD2");
    }

    #[test]
    fn buffer_without_nul_is_kept_whole() {
        let buffer = [b'x' as c_char; 4];
        assert_eq!(buffer_to_string(&buffer), "xxxx");
    }

    #[test]
    fn missing_library_reports_open_error() {
        let result = unsafe { DwfLibrary::open(Path::new("/nonexistent/libdwf.so")) };
        assert!(matches!(result, Err(LoadError::Open { .. })));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_uses_soname() {
        assert_eq!(candidate_paths(), vec![PathBuf::from("libdwf.so")]);
    }
}
