//! # protocache-core
//!
//! Core traits and error types shared across all protocache crates.
//! The descriptor registry, the refresh coordinator and the observability
//! layer are all built on top of the interfaces defined here.

pub mod error;
pub mod fetch;
pub mod observer;
pub mod schedule;

pub use error::{CodecError, ConfigError, DecodeError, FetchError, SourceError, WireError};
pub use fetch::Fetcher;
pub use observer::{NoopObserver, RefreshObserver};
pub use schedule::{ScheduledTask, Scheduler, TimerHandle};
