//! Device enumeration and sample-rate negotiation, cached per device pair.
//!
//! Probing hardware is slow on some hosts, so results are kept until
//! [`DeviceCatalog::invalidate`] is called on a device-change notification.
//! Only used while no stream is running.

use std::collections::HashMap;

use crate::driver::{AudioDriver, DeviceInfo, Direction, RateRange};
use crate::error::DriverError;

/// Rates probed against each device's supported ranges.
pub const STANDARD_RATES: [u32; 13] = [
    8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000, 176400, 192000, 352800, 384000,
];

/// Preferred rate when nothing else is asked for.
pub const PREFERRED_RATE: u32 = 44100;

/// Playback and capture device names; `None` is the host default.
pub type DevicePair = (Option<String>, Option<String>);

#[derive(Default)]
pub struct DeviceCatalog {
    devices: Option<Vec<DeviceInfo>>,
    rates: HashMap<DevicePair, Vec<u32>>,
    best: HashMap<(DevicePair, u32), u32>,
}

fn rates_in(ranges: &[RateRange]) -> Vec<u32> {
    STANDARD_RATES
        .iter()
        .copied()
        .filter(|rate| ranges.iter().any(|range| range.contains(*rate)))
        .collect()
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; the next query probes the driver again.
    pub fn invalidate(&mut self) {
        log::debug!("device catalog invalidated");
        self.devices = None;
        self.rates.clear();
        self.best.clear();
    }

    pub fn devices(&mut self, driver: &dyn AudioDriver) -> Result<&[DeviceInfo], DriverError> {
        if self.devices.is_none() {
            let devices = driver.devices()?;
            if devices.is_empty() {
                return Err(DriverError::NoDevices);
            }
            self.devices = Some(devices);
        }
        Ok(self.devices.as_deref().unwrap_or_default())
    }

    /// Standard rates supported by both devices. A missing side does not
    /// constrain the result.
    pub fn supported_rates(
        &mut self,
        driver: &dyn AudioDriver,
        playback: Option<&str>,
        capture: Option<&str>,
    ) -> Result<Vec<u32>, DriverError> {
        let key: DevicePair = (playback.map(str::to_owned), capture.map(str::to_owned));
        if let Some(rates) = self.rates.get(&key) {
            return Ok(rates.clone());
        }

        let output = rates_in(&driver.supported_rates(playback, Direction::Playback)?);
        let input = rates_in(&driver.supported_rates(capture, Direction::Capture)?);
        let rates: Vec<u32> = match (output.is_empty(), input.is_empty()) {
            (false, false) => output.into_iter().filter(|rate| input.contains(rate)).collect(),
            (false, true) => output,
            (true, _) => input,
        };
        log::debug!("supported rates for {key:?}: {rates:?}");
        self.rates.insert(key, rates.clone());
        Ok(rates)
    }

    /// `requested` if supported, else the next higher rate, else the highest.
    pub fn best_rate(
        &mut self,
        driver: &dyn AudioDriver,
        playback: Option<&str>,
        capture: Option<&str>,
        requested: u32,
    ) -> Result<u32, DriverError> {
        let key: DevicePair = (playback.map(str::to_owned), capture.map(str::to_owned));
        if let Some(rate) = self.best.get(&(key.clone(), requested)) {
            return Ok(*rate);
        }

        let rates = self.supported_rates(driver, playback, capture)?;
        let rate = if rates.contains(&requested) {
            requested
        } else {
            rates
                .iter()
                .copied()
                .find(|rate| *rate > requested)
                .or_else(|| rates.last().copied())
                .ok_or(DriverError::NoSupportedRate)?
        };
        if rate != requested {
            log::info!("{requested} Hz not supported, using {rate} Hz");
        }
        self.best.insert((key, requested), rate);
        Ok(rate)
    }

    /// [`PREFERRED_RATE`] if supported, else the highest supported rate.
    pub fn optimal_rate(
        &mut self,
        driver: &dyn AudioDriver,
        playback: Option<&str>,
        capture: Option<&str>,
    ) -> Result<u32, DriverError> {
        let rates = self.supported_rates(driver, playback, capture)?;
        if rates.contains(&PREFERRED_RATE) {
            return Ok(PREFERRED_RATE);
        }
        rates.last().copied().ok_or(DriverError::NoSupportedRate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeDriver;

    #[test]
    fn test_duplex_rates_are_intersected() {
        let driver = FakeDriver::new();
        driver.set_rates(Direction::Playback, vec![RateRange { min: 8000, max: 96000 }]);
        driver.set_rates(Direction::Capture, vec![RateRange { min: 44100, max: 192000 }]);
        let mut catalog = DeviceCatalog::new();

        let rates = catalog.supported_rates(&driver, None, None).unwrap();
        assert_eq!(rates, vec![44100, 48000, 88200, 96000]);
    }

    #[test]
    fn test_best_rate_prefers_exact_then_higher_then_highest() {
        let driver = FakeDriver::new();
        driver.set_rates(Direction::Playback, vec![
            RateRange { min: 22050, max: 22050 },
            RateRange { min: 48000, max: 48000 },
        ]);
        driver.set_rates(Direction::Capture, Vec::new());
        let mut catalog = DeviceCatalog::new();

        assert_eq!(catalog.best_rate(&driver, None, None, 48000).unwrap(), 48000);
        assert_eq!(catalog.best_rate(&driver, None, None, 44100).unwrap(), 48000);
        assert_eq!(catalog.best_rate(&driver, None, None, 96000).unwrap(), 48000);
        assert_eq!(catalog.optimal_rate(&driver, None, None).unwrap(), 48000);
    }

    #[test]
    fn test_results_are_cached_until_invalidated() {
        let driver = FakeDriver::new();
        driver.set_rates(Direction::Playback, vec![RateRange { min: 44100, max: 44100 }]);
        driver.set_rates(Direction::Capture, Vec::new());
        let mut catalog = DeviceCatalog::new();
        assert_eq!(catalog.best_rate(&driver, None, None, 44100).unwrap(), 44100);

        driver.set_rates(Direction::Playback, vec![RateRange { min: 96000, max: 96000 }]);
        assert_eq!(catalog.best_rate(&driver, None, None, 44100).unwrap(), 44100);

        catalog.invalidate();
        assert_eq!(catalog.best_rate(&driver, None, None, 44100).unwrap(), 96000);
    }

    #[test]
    fn test_no_rates_is_an_error() {
        let driver = FakeDriver::new();
        driver.set_rates(Direction::Playback, Vec::new());
        driver.set_rates(Direction::Capture, Vec::new());
        let mut catalog = DeviceCatalog::new();

        assert!(matches!(
            catalog.best_rate(&driver, None, None, 44100),
            Err(DriverError::NoSupportedRate)
        ));
    }

    #[test]
    fn test_devices_are_listed_once() {
        let driver = FakeDriver::new();
        let mut catalog = DeviceCatalog::new();

        let names: Vec<String> = catalog
            .devices(&driver)
            .unwrap()
            .iter()
            .map(|device| device.name.clone())
            .collect();
        assert_eq!(names, vec!["Fake Duplex".to_string()]);
    }
}
