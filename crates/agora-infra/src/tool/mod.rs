//! Tool execution backends.

pub mod process;

pub use process::ProcessToolExecutor;
