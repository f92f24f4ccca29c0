pub mod cli;
pub mod config;
pub mod interval;
pub mod time_range;

pub use interval::{Interval, IntervalCalculator};
pub use time_range::TimeRange;
