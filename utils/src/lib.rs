//! Shared utilities for Crossbar.

mod atomic_write;

pub use atomic_write::atomic_write;
