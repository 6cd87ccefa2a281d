//! Impedance analyzer hardware.
//!
//! The polling loop in [`crate::source::analyzer`] is written against the
//! [`ImpedanceAnalyzer`] trait so that it can run against the real WaveForms SDK
//! ([`dwf::DwfAnalyzer`]) or a simulated subject ([`mock::MockAnalyzer`]).
//!
//! The trait is synchronous: SDK calls block briefly and are made from a
//! dedicated blocking thread, never from an async task.

pub mod dwf;
pub mod mock;

use crate::config::AnalyzerConfig;
use crate::error::AppResult;

/// An enumerated device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub serial_number: String,
    /// Opened by another process.
    pub in_use: bool,
}

/// Result of polling the analyzer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalyzerStatus {
    /// A measurement is ready to be read.
    Done,
    /// Any other instrument state, with the raw SDK code.
    Pending(u8),
}

/// Blocking interface to an impedance analyzer.
pub trait ImpedanceAnalyzer: Send {
    /// Connected devices, one entry per serial number.
    fn enumerate(&mut self) -> AppResult<Vec<DeviceInfo>>;

    /// Try to open the first available device. `Ok(false)` means none could
    /// be opened yet; see [`ImpedanceAnalyzer::last_error`].
    fn open_first(&mut self) -> AppResult<bool>;

    /// The most recent SDK error message, if any.
    fn last_error(&mut self) -> Option<String>;

    /// Apply `config` and start the analysis.
    fn configure(&mut self, config: &AnalyzerConfig) -> AppResult<()>;

    /// Poll the analysis state.
    fn status(&mut self) -> AppResult<AnalyzerStatus>;

    /// Resistance of the last completed measurement, in ohms.
    fn read_resistance(&mut self) -> AppResult<f64>;

    /// Stop the analysis and close the device. Safe to call repeatedly.
    fn close(&mut self);
}

impl<T: ImpedanceAnalyzer + ?Sized> ImpedanceAnalyzer for Box<T> {
    fn enumerate(&mut self) -> AppResult<Vec<DeviceInfo>> {
        (**self).enumerate()
    }

    fn open_first(&mut self) -> AppResult<bool> {
        (**self).open_first()
    }

    fn last_error(&mut self) -> Option<String> {
        (**self).last_error()
    }

    fn configure(&mut self, config: &AnalyzerConfig) -> AppResult<()> {
        (**self).configure(config)
    }

    fn status(&mut self) -> AppResult<AnalyzerStatus> {
        (**self).status()
    }

    fn read_resistance(&mut self) -> AppResult<f64> {
        (**self).read_resistance()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Keep the first entry for each serial number.
pub(crate) fn dedup_by_serial(devices: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    let mut unique: Vec<DeviceInfo> = Vec::with_capacity(devices.len());
    for device in devices {
        if !unique.iter().any(|d| d.serial_number == device.serial_number) {
            unique.push(device);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_by_serial() {
        let device = |name: &str, sn: &str| DeviceInfo {
            name: name.into(),
            serial_number: sn.into(),
            in_use: false,
        };
        let unique = dedup_by_serial(vec![
            device("Analog Discovery 2", "SN:210321A1"),
            device("Analog Discovery 2", "SN:210321A1"),
            device("Analog Discovery 3", "SN:210415B7"),
        ]);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[1].name, "Analog Discovery 3");
    }
}
