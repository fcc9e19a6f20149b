//! Stdout transport for the demo shell.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::session::ChatId;

use super::{ChatTransport, MessageId, OutboundMessage};

/// Renders messages as plain stdout lines. Edits are re-printed rather than
/// rewritten in place, so countdown refreshes show up as new lines.
#[derive(Default)]
pub struct ConsoleTransport {
    next_id: AtomicI64,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn render(message: &OutboundMessage) {
        println!("{}", message.text);
        if !message.keyboard.is_empty() {
            let rows: Vec<String> = message
                .keyboard
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|key| format!("[{}]", key))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();
            println!("  {}", rows.join("  "));
        }
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send(&self, _chat_id: ChatId, message: OutboundMessage) -> TransportResult<MessageId> {
        Self::render(&message);
        Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn edit(
        &self,
        _chat_id: ChatId,
        _message_id: MessageId,
        message: OutboundMessage,
    ) -> TransportResult<()> {
        Self::render(&message);
        Ok(())
    }

    async fn delete(&self, _chat_id: ChatId, _message_id: MessageId) -> TransportResult<()> {
        Ok(())
    }
}
