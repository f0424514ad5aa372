//! Graph Bench Core
//!
//! Foundational types shared by every crate in the workspace:
//!
//! - [`errors`]: The unified [`EvalError`] type and the host-side [`HostError`]
//! - [`options`]: [`OptionValue`] and the immutable [`OptionSet`]
//! - [`stats`]: [`MetricStats`], [`StatisticsRecord`] and the streaming
//!   [`SampleAccumulator`] used to build them

pub mod errors;
pub mod options;
pub mod stats;

pub use errors::{EvalError, HostError, HostResult, Result};
pub use options::{OptionSet, OptionValue};
pub use stats::{MetricStats, SampleAccumulator, StatisticsRecord};
