use std::{fmt, sync::Arc};

use serde::Serialize;

use crate::timeline::TimeSignature;

/// Change notification pushed to subscribers of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    BpmChanged { bpm: u32 },
    PlayingChanged { playing: bool },
    TimeSignatureChanged { signature: TimeSignature },
    /// The cycle position moved; `beat` is the next beat to be played.
    BeatChanged { beat: u32 },
    /// A click was triggered for `beat`.
    Click { beat: u32, accent: bool },
}

/// Callback receiving engine events.
pub type Listener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Token returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registry of listeners in subscription order.
#[derive(Default)]
pub struct Subscribers {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns whether `id` was subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Copies the current listeners so they can be invoked without holding
    /// whatever lock guards the registry.
    pub fn snapshot(&self) -> Vec<Listener> {
        self.listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn unsubscribed_listeners_are_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subscribers = Subscribers::new();

        let recorder = |label: &'static str| -> Listener {
            let seen = Arc::clone(&seen);
            Arc::new(move |event: &EngineEvent| seen.lock().unwrap().push((label, event.clone())))
        };
        let first = subscribers.subscribe(recorder("a"));
        subscribers.subscribe(recorder("b"));

        assert!(subscribers.unsubscribe(first));
        assert!(!subscribers.unsubscribe(first));
        assert_eq!(subscribers.len(), 1);

        for listener in subscribers.snapshot() {
            listener(&EngineEvent::BpmChanged { bpm: 100 });
        }
        assert_eq!(
            *seen.lock().unwrap(),
            [("b", EngineEvent::BpmChanged { bpm: 100 })]
        );
    }

    #[test]
    fn serializes_with_event_tag() {
        let json = serde_json::to_value(EngineEvent::Click { beat: 0, accent: true }).unwrap();
        assert_eq!(json["event"], "click");
        assert_eq!(json["accent"], true);

        let json = serde_json::to_value(EngineEvent::TimeSignatureChanged {
            signature: TimeSignature::WALTZ,
        })
        .unwrap();
        assert_eq!(json["signature"]["beats"], 3);
        assert_eq!(json["signature"]["name"], "Waltz");
    }
}
