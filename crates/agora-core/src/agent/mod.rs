//! Agent turn execution.
//!
//! The agent module runs the provider loop for one world:
//! - `LlmProvider`: turn backend abstraction, plus `ScriptedProvider` for
//!   canned turns
//! - `ToolExecutor`: runs one tool call to completion
//! - `TurnRunner`: streams a turn onto the bus, gates its tool calls, and
//!   handles post-approval resumes

pub mod executor;
pub mod provider;
pub mod runner;

pub use executor::ToolExecutor;
pub use provider::{
    LlmProvider, ProviderError, ProviderEvent, ProviderStream, ScriptedProvider, TurnRequest,
};
pub use runner::{TurnError, TurnRunner};
