//! # stagehand-core
//!
//! Types shared by every stagehand crate:
//! - Branded identifiers for connections and operations
//! - [`ProgressCounter`]: fraction, elapsed/paused time, ETA and throughput
//! - [`StateSink`]: the leveled log + progress interface operation steps report through

#![deny(unsafe_code)]

pub mod ids;
pub mod progress;
pub mod sink;

pub use progress::{ProgressCounter, ProgressState};
pub use sink::{LogLevel, StateSink, TracingSink};
