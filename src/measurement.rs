//! Measurement stream and fit windows
//!
//! The learning loop consumes ordered arrays of equal length: current,
//! voltage, temperature, timestamp. Windows are contiguous `[start, k)`
//! slices taken at trigger time, owned by value and never mutated after
//! creation.

use crate::{Error, Result};

/// Snapshot of the twin's operating condition, read back after each step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatingPoint {
    /// State of charge, in [0, 1]
    pub soc: f64,
    /// Cell temperature, in kelvin
    pub temperature: f64,
}

/// Full measurement stream for one identification run.
///
/// Arrays are most-recent-last and index-aligned: sample `k` of every
/// array belongs to the same instant.
#[derive(Debug, Clone)]
pub struct MeasurementStream {
    current: Vec<f64>,
    voltage: Vec<f64>,
    temperature: Vec<f64>,
    time: Vec<f64>,
}

impl MeasurementStream {
    /// Build a stream from index-aligned arrays.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamMismatch`] when the arrays differ in length
    /// and [`Error::InvalidConfig`] when the stream is empty.
    pub fn new(
        current: Vec<f64>,
        voltage: Vec<f64>,
        temperature: Vec<f64>,
        time: Vec<f64>,
    ) -> Result<Self> {
        let n = current.len();
        if n == 0 {
            return Err(Error::InvalidConfig(
                "measurement stream must contain at least one sample".to_string(),
            ));
        }
        for (name, len) in [
            ("voltage", voltage.len()),
            ("temperature", temperature.len()),
            ("time", time.len()),
        ] {
            if len != n {
                return Err(Error::StreamMismatch {
                    current: n,
                    name,
                    other: len,
                });
            }
        }
        Ok(Self {
            current,
            voltage,
            temperature,
            time,
        })
    }

    /// Number of samples in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// True when the stream holds no samples (never, by construction).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Measured currents, most-recent-last.
    #[must_use]
    pub fn current(&self) -> &[f64] {
        &self.current
    }

    /// Measured terminal voltages.
    #[must_use]
    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    /// Measured cell temperatures.
    #[must_use]
    pub fn temperature(&self) -> &[f64] {
        &self.temperature
    }

    /// Timestep preceding sample `k`: `time[k] - time[k-1]`, with 1.0 for
    /// the very first sample where no predecessor exists.
    #[must_use]
    pub fn dt_at(&self, k: usize) -> f64 {
        if k == 0 {
            1.0
        } else {
            self.time[k] - self.time[k - 1]
        }
    }

    /// Slice the `[start, end)` window for one fit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyWindow`] when `start >= end` and
    /// [`Error::InvalidConfig`] when `end` exceeds the stream length.
    pub fn window(&self, start: usize, end: usize, dt: f64) -> Result<MeasurementWindow> {
        if start >= end {
            return Err(Error::EmptyWindow { start, end });
        }
        if end > self.len() {
            return Err(Error::InvalidConfig(format!(
                "window end {end} exceeds stream length {}",
                self.len()
            )));
        }
        Ok(MeasurementWindow {
            current: self.current[start..end].to_vec(),
            voltage: self.voltage[start..end].to_vec(),
            temperature: self.temperature[start..end].to_vec(),
            dt,
        })
    }
}

/// One contiguous slice of the stream, handed to the optimizer by value.
#[derive(Debug, Clone)]
pub struct MeasurementWindow {
    current: Vec<f64>,
    voltage: Vec<f64>,
    temperature: Vec<f64>,
    dt: f64,
}

impl MeasurementWindow {
    /// Build a window directly from sample arrays (test and bench entry).
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyWindow`] for zero samples and
    /// [`Error::StreamMismatch`] for unequal array lengths.
    pub fn new(
        current: Vec<f64>,
        voltage: Vec<f64>,
        temperature: Vec<f64>,
        dt: f64,
    ) -> Result<Self> {
        if current.is_empty() {
            return Err(Error::EmptyWindow { start: 0, end: 0 });
        }
        for (name, len) in [
            ("voltage", voltage.len()),
            ("temperature", temperature.len()),
        ] {
            if len != current.len() {
                return Err(Error::StreamMismatch {
                    current: current.len(),
                    name,
                    other: len,
                });
            }
        }
        Ok(Self {
            current,
            voltage,
            temperature,
            dt,
        })
    }

    /// Number of samples in the window (always at least one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Always false: empty windows are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Real current over the window (the simulation input).
    #[must_use]
    pub fn current(&self) -> &[f64] {
        &self.current
    }

    /// Real terminal voltage over the window (the fit target).
    #[must_use]
    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    /// Real cell temperature over the window.
    #[must_use]
    pub fn temperature(&self) -> &[f64] {
        &self.temperature
    }

    /// Timestep used when forward-simulating this window.
    #[must_use]
    pub const fn dt(&self) -> f64 {
        self.dt
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn stream_of(n: usize) -> MeasurementStream {
        let ramp: Vec<f64> = (0..n).map(|k| k as f64).collect();
        MeasurementStream::new(ramp.clone(), ramp.clone(), ramp.clone(), ramp).unwrap()
    }

    #[test]
    fn test_mismatched_arrays_are_rejected() {
        let err = MeasurementStream::new(vec![1.0, 2.0], vec![3.0], vec![0.0, 0.0], vec![0.0, 1.0]);
        assert!(matches!(
            err,
            Err(Error::StreamMismatch { name: "voltage", .. })
        ));
    }

    #[test]
    fn test_empty_stream_is_rejected() {
        let err = MeasurementStream::new(vec![], vec![], vec![], vec![]);
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_dt_defaults_to_one_at_stream_head() {
        let stream = MeasurementStream::new(
            vec![0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0],
            vec![10.0, 12.5, 13.0],
        )
        .unwrap();
        assert_eq!(stream.dt_at(0), 1.0);
        assert_eq!(stream.dt_at(1), 2.5);
        assert_eq!(stream.dt_at(2), 0.5);
    }

    #[test]
    fn test_window_slices_half_open_range() {
        let stream = stream_of(10);
        let window = stream.window(2, 5, 1.0).unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window.current(), &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_empty_window_is_rejected() {
        let stream = stream_of(10);
        assert!(matches!(
            stream.window(4, 4, 1.0),
            Err(Error::EmptyWindow { start: 4, end: 4 })
        ));
        assert!(stream.window(5, 3, 1.0).is_err());
    }

    #[test]
    fn test_window_end_is_bounds_checked() {
        let stream = stream_of(4);
        assert!(stream.window(0, 5, 1.0).is_err());
    }
}
