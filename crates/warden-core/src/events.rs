use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub enum Event {
    SignatureIssued {
        secret: String,
        fingerprint: String,
        requester: String,
        required_authentication: bool,
        at: DateTime<Utc>,
    },
    SignatureRefused {
        requester: String,
        reason: String,
        at: DateTime<Utc>,
    },
    StoresChanged {
        secrets: usize,
    },
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers saw the event.
    pub fn send(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
