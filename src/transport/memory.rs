//! In-memory transport that records every call.
//!
//! Used by the integration tests to assert exactly what the engine sent.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{TransportError, TransportResult};
use crate::session::ChatId;

use super::{ChatTransport, MessageId, OutboundMessage};

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Sent {
        chat_id: ChatId,
        message_id: MessageId,
        message: OutboundMessage,
    },
    Edited {
        chat_id: ChatId,
        message_id: MessageId,
        message: OutboundMessage,
    },
    Deleted {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

/// Recording transport. `fail_sends(true)` makes every subsequent send fail,
/// which is how tests exercise the transport-failure path.
#[derive(Default)]
pub struct MemoryTransport {
    events: Mutex<Vec<TransportEvent>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle send/edit failures.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().expect("transport events lock").clone()
    }

    /// Texts of sent messages, in order. Edits are not included.
    pub fn sent_texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Sent { message, .. } => Some(message.text),
                _ => None,
            })
            .collect()
    }

    /// Number of send calls recorded.
    pub fn sent_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TransportEvent::Sent { .. }))
            .count()
    }

    fn record(&self, event: TransportEvent) {
        self.events.lock().expect("transport events lock").push(event);
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn send(&self, chat_id: ChatId, message: OutboundMessage) -> TransportResult<MessageId> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Send {
                chat_id: chat_id.0,
                message: "transport set to fail".to_string(),
            });
        }
        let message_id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.record(TransportEvent::Sent {
            chat_id,
            message_id,
            message,
        });
        Ok(message_id)
    }

    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        message: OutboundMessage,
    ) -> TransportResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Edit {
                chat_id: chat_id.0,
                message_id: message_id.0,
                message: "transport set to fail".to_string(),
            });
        }
        self.record(TransportEvent::Edited {
            chat_id,
            message_id,
            message,
        });
        Ok(())
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> TransportResult<()> {
        self.record(TransportEvent::Deleted { chat_id, message_id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_assigns_increasing_ids() {
        let transport = MemoryTransport::new();
        let a = transport
            .send(ChatId(1), OutboundMessage::text("one"))
            .await
            .unwrap();
        let b = transport
            .send(ChatId(1), OutboundMessage::text("two"))
            .await
            .unwrap();
        assert!(b.0 > a.0);
        assert_eq!(transport.sent_texts(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_failing_transport_rejects_sends() {
        let transport = MemoryTransport::new();
        transport.fail_sends(true);
        let err = transport
            .send(ChatId(2), OutboundMessage::text("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Send { chat_id: 2, .. }));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_edit_and_delete_are_recorded() {
        let transport = MemoryTransport::new();
        let id = transport
            .send(ChatId(3), OutboundMessage::text("hello"))
            .await
            .unwrap();
        transport
            .edit(ChatId(3), id, OutboundMessage::text("hello again"))
            .await
            .unwrap();
        transport.delete(ChatId(3), id).await.unwrap();

        let events = transport.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], TransportEvent::Edited { .. }));
        assert!(matches!(events[2], TransportEvent::Deleted { .. }));
    }
}
