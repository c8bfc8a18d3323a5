//! Agent memory repository trait definition.
//!
//! Agent memory is the append-only message log each agent carries per world:
//! user turns, assistant turns (with any tool calls), and tool results. The
//! approval coordinator and turn runner append through this trait; providers
//! read a chat back as context for the next turn.

use agora_types::error::RepositoryError;
use agora_types::memory::AgentMemoryMessage;

/// Repository trait for agent memory persistence.
///
/// Chats are keyed by a string id (worlds use `<world_id>/<agent_id>`).
/// Messages within a chat are returned oldest-first, matching the order
/// a provider expects its context in.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait MemoryRepository: Send + Sync {
    /// Append one message to a chat.
    fn append_message(
        &self,
        message: &AgentMemoryMessage,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load a full chat, oldest message first.
    fn load_chat(
        &self,
        chat_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<AgentMemoryMessage>, RepositoryError>> + Send;
}
