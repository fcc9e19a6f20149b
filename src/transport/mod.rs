//! Chat transport seam.
//!
//! The engine never talks to a bot framework directly; it renders stimuli
//! and prompts through [`ChatTransport`]. The [`memory`] implementation
//! records traffic for tests; [`console`] backs the demo shell.

pub mod console;
pub mod memory;

pub use console::ConsoleTransport;
pub use memory::MemoryTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportResult;
use crate::session::ChatId;

/// Handle of a message previously sent to a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

/// One outbound chat message: text plus optional inline keyboard rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboundMessage {
    pub text: String,
    pub keyboard: Vec<Vec<String>>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    pub fn with_keyboard(mut self, keyboard: Vec<Vec<String>>) -> Self {
        self.keyboard = keyboard;
        self
    }
}

/// Message send/edit/delete primitives of the surrounding chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, chat_id: ChatId, message: OutboundMessage) -> TransportResult<MessageId>;

    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        message: OutboundMessage,
    ) -> TransportResult<()>;

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> TransportResult<()>;
}
