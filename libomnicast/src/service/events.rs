//! Event system for dispatch progress
//!
//! An in-process event bus over `tokio::sync::broadcast`. The coordinator
//! emits an event when it starts a dispatch, when each platform attempt
//! resolves, and when the post is finalised. Events are dropped immediately
//! when nobody is subscribed, and lagging subscribers never block emitters.
//!
//! # Example
//!
//! ```no_run
//! use libomnicast::service::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::DispatchStarted {
//!     post_id: "abc123".to_string(),
//!     platforms: vec![libomnicast::PlatformId::X],
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::FailureKind;
use crate::types::{PlatformId, PostStatus};

pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing dispatch events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers without blocking
    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Events emitted by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A claimed post is being delivered
    DispatchStarted {
        post_id: String,
        /// Platforms that will be invoked (already-resolved ones excluded)
        platforms: Vec<PlatformId>,
    },

    /// One platform attempt reached its outcome for this dispatch
    AttemptCompleted {
        post_id: String,
        platform: PlatformId,
        success: bool,
        platform_post_id: Option<String>,
        error_kind: Option<FailureKind>,
        tries: u32,
    },

    /// The post was finalised
    DispatchCompleted { post_id: String, status: PostStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_emission_and_subscription() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.emit(Event::DispatchStarted {
            post_id: "test123".to_string(),
            platforms: vec![PlatformId::LinkedIn],
        });

        match receiver.recv().await.unwrap() {
            Event::DispatchStarted { post_id, platforms } => {
                assert_eq!(post_id, "test123");
                assert_eq!(platforms, vec![PlatformId::LinkedIn]);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        let event = Event::DispatchCompleted {
            post_id: "test456".to_string(),
            status: PostStatus::PartiallyPublished,
        };
        event_bus.emit(event.clone());

        assert_eq!(receiver1.recv().await.unwrap(), event);
        assert_eq!(receiver2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let event_bus = EventBus::new(10);

        event_bus.emit(Event::DispatchCompleted {
            post_id: "test789".to_string(),
            status: PostStatus::Published,
        });

        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::AttemptCompleted {
            post_id: "serial_test".to_string(),
            platform: PlatformId::TikTok,
            success: false,
            platform_post_id: None,
            error_kind: Some(FailureKind::ContentRejected),
            tries: 1,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"attempt_completed\""));
        assert!(json.contains("\"platform\":\"tiktok\""));
        assert!(json.contains("content_rejected"));

        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }
}
