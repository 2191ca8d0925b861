//! Notifications pushed to observers of a [`Context`](crate::context::Context).
//!
//! Events travel over a `tokio::sync::broadcast` channel. They are sent
//! only after the mutation they describe succeeded; a send with no live
//! receivers is ignored, and slow receivers lag instead of blocking the
//! emitter.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextEventKind {
    #[serde(rename = "context:url")]
    UrlChanged,
    #[serde(rename = "document:insert")]
    DocumentInserted,
    #[serde(rename = "document:update")]
    DocumentUpdated,
    #[serde(rename = "document:remove")]
    DocumentRemoved,
    #[serde(rename = "document:delete")]
    DocumentDeleted,
    #[serde(rename = "documents:insert")]
    DocumentsInserted,
    #[serde(rename = "documents:update")]
    DocumentsUpdated,
    #[serde(rename = "documents:remove")]
    DocumentsRemoved,
    #[serde(rename = "documents:delete")]
    DocumentsDeleted,
}

/// One notification: the operation and its result payload.
#[derive(Debug, Clone, Serialize)]
pub struct ContextEvent {
    pub context_id: String,
    pub kind: ContextEventKind,
    pub payload: serde_json::Value,
}

/// Sending half owned by a context.
#[derive(Debug)]
pub(crate) struct EventSender {
    context_id: String,
    tx: broadcast::Sender<ContextEvent>,
}

impl EventSender {
    pub(crate) fn new(context_id: impl Into<String>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            context_id: context_id.into(),
            tx,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, kind: ContextEventKind, payload: serde_json::Value) {
        let event = ContextEvent {
            context_id: self.context_id.clone(),
            kind,
            payload,
        };
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }
}
