//! Training metric logging.
//!
//! Provides:
//! - `MetricLogger` trait for composable backends
//! - `ConsoleLogger` for tracing-based output
//! - `CompositeLogger` for multi-backend logging

mod console;
mod logger;

pub use console::ConsoleLogger;
pub use logger::{CompositeLogger, MetricLogger, NoOpLogger};
