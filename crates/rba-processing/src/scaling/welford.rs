use serde::{Deserialize, Serialize};

/// Online mean/variance accumulator (Welford).
///
/// `m2` is the running sum of squared deviations from the current mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WelfordAccumulator {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
}

impl WelfordAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Population variance; `0.0` before the first value.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Population standard deviation.
    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Divisor used by normalization. Degenerate columns are centered only.
    pub fn divisor(&self) -> f64 {
        let std = self.std();
        if self.count <= 1 || std == 0.0 || !std.is_finite() {
            1.0
        } else {
            std
        }
    }

    /// Whether the accumulated state is usable (finite, non-negative m2).
    pub fn is_consistent(&self) -> bool {
        self.mean.is_finite() && self.m2.is_finite() && self.m2 >= 0.0
    }
}
