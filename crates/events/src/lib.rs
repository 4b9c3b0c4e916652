#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in kiln
//!
//! Library crates never print or log directly. They emit domain events over
//! an unbounded channel and the CLI decides how to render them (human text,
//! JSON lines, or tracing records).

pub mod meta;
pub use meta::{EventLevel, EventMeta, EventSource};

pub mod events;
pub use events::{AppEvent, BuildEvent, FailureContext, FetchEvent, GeneralEvent, OutputStream};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// An event paired with its emission metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub meta: EventMeta,
    pub event: AppEvent,
}

impl EventMessage {
    /// Wrap an event, deriving level and source from its domain
    #[must_use]
    pub fn new(event: AppEvent) -> Self {
        let meta = EventMeta::new(event.log_level(), event.event_source());
        Self { meta, event }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.meta = self.meta.with_correlation_id(id);
        self
    }
}

/// Type alias for the event sender
pub type EventSender = UnboundedSender<EventMessage>;

/// Type alias for the event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<EventMessage>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events throughout kiln
///
/// Implemented for a raw [`EventSender`] and for any struct that optionally
/// holds one; a missing sender silently drops events.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Correlation id attached to every emitted event, if any
    fn correlation_id(&self) -> Option<&str> {
        None
    }

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            let mut message = EventMessage::new(event);
            if let Some(id) = self.correlation_id() {
                message = message.with_correlation_id(id);
            }
            // receiver may be gone during shutdown
            let _ = sender.send(message);
        }
    }

    fn emit_debug(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::debug(message)));
    }

    fn emit_warning(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(message)));
    }

    fn emit_warning_with_context(&self, message: impl Into<String>, context: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning_with_context(
            message, context,
        )));
    }

    /// Emit a build phase started event
    fn emit_phase_started(
        &self,
        recipe: impl Into<String>,
        phase: impl Into<String>,
        command: impl Into<String>,
    ) {
        self.emit(AppEvent::Build(BuildEvent::PhaseStarted {
            recipe: recipe.into(),
            phase: phase.into(),
            command: command.into(),
        }));
    }

    /// Emit a build phase completed event
    fn emit_phase_completed(
        &self,
        recipe: impl Into<String>,
        phase: impl Into<String>,
        duration: Duration,
    ) {
        self.emit(AppEvent::Build(BuildEvent::PhaseCompleted {
            recipe: recipe.into(),
            phase: phase.into(),
            duration,
        }));
    }
}

impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}

impl EventEmitter for Option<EventSender> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_with_metadata() {
        let (tx, mut rx) = channel();
        tx.emit_warning("careful");
        tx.emit_debug("detail");

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.event, AppEvent::General(GeneralEvent::Warning { .. })));
        assert_eq!(first.meta.level, EventLevel::Warn);
        assert_eq!(first.meta.source, EventSource::GENERAL);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.meta.level, EventLevel::Debug);
    }

    #[tokio::test]
    async fn dropped_receiver_is_ignored() {
        let (tx, rx) = channel();
        drop(rx);
        tx.emit_warning("ignored");
    }

    #[test]
    fn missing_sender_is_a_no_op() {
        let none: Option<EventSender> = None;
        none.emit_warning("nobody listens");
    }

    struct Tagged {
        tx: EventSender,
    }

    impl EventEmitter for Tagged {
        fn event_sender(&self) -> Option<&EventSender> {
            Some(&self.tx)
        }

        fn correlation_id(&self) -> Option<&str> {
            Some("zlib@1.3.1")
        }
    }

    #[tokio::test]
    async fn correlation_id_is_attached() {
        let (tx, mut rx) = channel();
        Tagged { tx }.emit_phase_started("zlib", "configure", "./configure");
        let message = rx.recv().await.unwrap();
        assert_eq!(message.meta.correlation_id.as_deref(), Some("zlib@1.3.1"));
        assert_eq!(message.meta.source, EventSource::BUILD);
    }

    #[test]
    fn messages_serialize_with_domain_tag() {
        let message = EventMessage::new(AppEvent::Fetch(FetchEvent::CacheHit {
            url: "https://example.com/a.tar.gz".into(),
            checksum: "sha256:00".into(),
        }));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["event"]["domain"], "fetch");
        assert_eq!(json["event"]["event"]["type"], "CacheHit");
    }
}
