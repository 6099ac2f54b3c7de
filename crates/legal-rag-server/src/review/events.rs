use dashmap::DashMap;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

/// One SSE event in a review's lifecycle. Event names are part of the
/// client contract and must not change.
#[derive(Debug, Clone)]
pub enum ReviewEvent {
    Info { message: String },
    Progress { stage: String, progress: u8, message: String },
    Result { payload: serde_json::Value },
    Complete { message: String },
    Error { message: String },
}

impl ReviewEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Info { .. } => "info",
            Self::Progress { .. } => "progress",
            Self::Result { .. } => "result",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    pub fn data(&self) -> String {
        match self {
            Self::Info { message } => json!({ "message": message }).to_string(),
            Self::Progress {
                stage,
                progress,
                message,
            } => json!({
                "stage": stage,
                "progress": progress,
                "message": message,
            })
            .to_string(),
            Self::Result { payload } => payload.to_string(),
            Self::Complete { message } => json!({ "message": message }).to_string(),
            Self::Error { message } => json!({ "message": message }).to_string(),
        }
    }
}

/// Per-review broadcast channels connecting the pipeline workers to any
/// number of SSE subscribers. Publishing without subscribers is fine: the
/// pipeline never blocks on slow or absent clients.
pub struct ReviewEventBus {
    channels: DashMap<i64, broadcast::Sender<ReviewEvent>>,
}

impl ReviewEventBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn subscribe(&self, review_id: i64) -> broadcast::Receiver<ReviewEvent> {
        self.channels
            .entry(review_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn publish(&self, review_id: i64, event: ReviewEvent) {
        let terminal = event.is_terminal();

        if let Some(sender) = self.channels.get(&review_id) {
            // Err just means nobody is listening right now
            let _ = sender.send(event);
        }

        if terminal {
            self.channels.remove(&review_id);
            debug!(review_id, "review channel closed");
        }
    }

    pub fn progress(&self, review_id: i64, stage: &str, progress: u8, message: impl Into<String>) {
        self.publish(
            review_id,
            ReviewEvent::Progress {
                stage: stage.to_string(),
                progress,
                message: message.into(),
            },
        );
    }
}

impl Default for ReviewEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_then_publish() {
        let bus = ReviewEventBus::new();
        let mut rx = bus.subscribe(1);

        bus.progress(1, "parse", 20, "解析完成");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "progress");
        let data: serde_json::Value = serde_json::from_str(&event.data()).unwrap();
        assert_eq!(data["progress"], 20);
        assert_eq!(data["stage"], "parse");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = ReviewEventBus::new();
        bus.progress(42, "parse", 10, "nobody listening");
    }

    #[tokio::test]
    async fn test_terminal_event_closes_channel() {
        let bus = ReviewEventBus::new();
        let mut rx = bus.subscribe(7);

        bus.publish(
            7,
            ReviewEvent::Complete {
                message: "done".into(),
            },
        );

        assert_eq!(rx.recv().await.unwrap().name(), "complete");
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_events_isolated_per_review() {
        let bus = ReviewEventBus::new();
        let mut rx_a = bus.subscribe(1);
        let _rx_b = bus.subscribe(2);

        bus.progress(2, "parse", 5, "other review");
        bus.progress(1, "parse", 10, "mine");

        let event = rx_a.recv().await.unwrap();
        let data: serde_json::Value = serde_json::from_str(&event.data()).unwrap();
        assert_eq!(data["message"], "mine");
    }
}
