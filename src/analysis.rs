mod aggregate;
mod recommend;
mod stats;
mod trend;

pub use aggregate::aggregate_windows;
pub use recommend::recommendations;
pub use trend::detect_trend;
