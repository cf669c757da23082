//! Single-pole RC low-pass filter.
//!
//! Used to smooth RSSI/SNR/link-quality readings and the inter-frame
//! interval. The filter is time-aware: the smoothing factor depends on the
//! elapsed time between updates, so irregular sampling (lost frames) does
//! not distort the output.

use crate::util::time::TimeMicros;

#[derive(Debug, Clone, Copy)]
pub struct Lpf {
    value: f32,
    rc: f32,
    last_update: Option<TimeMicros>,
}

impl Lpf {
    /// Creates a filter with the given cutoff frequency in Hz.
    pub fn new(cutoff: f32) -> Self {
        Self {
            value: 0.0,
            rc: 1.0 / (2.0 * std::f32::consts::PI * cutoff),
            last_update: None,
        }
    }

    /// Feeds a sample. The first sample after a reset is taken verbatim.
    pub fn update(&mut self, value: f32, now: TimeMicros) -> f32 {
        match self.last_update {
            Some(last) => {
                let dt = now.micros_since(last) as f32 * 1e-6;
                self.value += dt / (self.rc + dt) * (value - self.value);
            }
            None => self.value = value,
        }
        self.last_update = Some(now);
        self.value
    }

    /// Forces the filter to `value` and restarts smoothing from scratch.
    pub fn reset(&mut self, value: f32) -> f32 {
        self.value = value;
        self.last_update = None;
        value
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_taken_verbatim() {
        let mut lpf = Lpf::new(0.1);
        assert_eq!(lpf.update(42.0, TimeMicros(1000)), 42.0);
    }

    #[test]
    fn test_converges_towards_input() {
        let mut lpf = Lpf::new(0.5);
        let mut now = TimeMicros(0);
        lpf.update(0.0, now);
        for _ in 0..100 {
            now += 100_000;
            lpf.update(10.0, now);
        }
        assert!((lpf.value() - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_reset_restarts_smoothing() {
        let mut lpf = Lpf::new(0.1);
        lpf.update(5.0, TimeMicros(0));
        lpf.reset(0.0);
        // Next update is taken verbatim again
        assert_eq!(lpf.update(7.0, TimeMicros(1)), 7.0);
    }
}
