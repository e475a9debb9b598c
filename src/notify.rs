use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Lifecycle event emitted for every step transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    Started {
        id: String,
        name: String,
    },
    Completed {
        id: String,
        name: String,
        result: Value,
    },
    Failed {
        id: String,
        name: String,
        error: String,
    },
}

impl StepEvent {
    pub fn step_id(&self) -> &str {
        match self {
            StepEvent::Started { id, .. }
            | StepEvent::Completed { id, .. }
            | StepEvent::Failed { id, .. } => id,
        }
    }
}

/// Observational sink for step lifecycle events.
///
/// Never on the critical path: the coordinator logs an `Err` from an
/// implementation and carries on. Notifier outcomes cannot change a
/// step's status or abort the run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: StepEvent) -> Result<()>;
}

/// Notifier that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: StepEvent) -> Result<()> {
        Ok(())
    }
}

/// Notifier that forwards events over an unbounded channel, e.g. to a
/// reporting task draining the receiver.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<StepEvent>,
}

impl ChannelNotifier {
    /// Create a notifier plus the receiver to drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StepEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, event: StepEvent) -> Result<()> {
        // ignore send error: the receiver may already be dropped, and
        // a missing observer must not disturb the run
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_notifier_forwards_events() {
        let (notifier, mut rx) = ChannelNotifier::new();

        notifier
            .notify(StepEvent::Started { id: "a".into(), name: "A".into() })
            .await
            .unwrap();
        notifier
            .notify(StepEvent::Completed {
                id: "a".into(),
                name: "A".into(),
                result: json!(42),
            })
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            StepEvent::Started { id: "a".into(), name: "A".into() }
        );
        assert!(matches!(rx.recv().await.unwrap(), StepEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn test_channel_notifier_survives_dropped_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);

        let outcome = notifier
            .notify(StepEvent::Failed {
                id: "a".into(),
                name: "A".into(),
                error: "boom".into(),
            })
            .await;
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_event_serialization() {
        let event = StepEvent::Failed {
            id: "deploy".into(),
            name: "Deploy".into(),
            error: "timeout".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"failed\""));

        let back: StepEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.step_id(), "deploy");
    }
}
