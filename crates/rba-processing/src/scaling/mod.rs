//! Global normalization statistics accumulated over the whole stream.

mod scaler;
mod welford;

pub use scaler::{RunningScaler, ScalerState};
pub use welford::WelfordAccumulator;
