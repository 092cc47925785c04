use parking_lot::Mutex;
use room_api::{Participant, Room, SwipeKind};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Something the sync loop noticed about a watched room.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The fetched room differs from the last snapshot.
    RoomChanged(Box<Room>),
    ParticipantJoined {
        room_id: String,
        participant: Participant,
    },
    ParticipantLeft {
        room_id: String,
        participant_id: String,
    },
    /// An item everyone swiped right on, reported once per client.
    Matched {
        room_id: String,
        kind: SwipeKind,
        item_id: String,
    },
    FetchFailed {
        room_id: String,
        error: String,
        retry_in: Option<Duration>,
    },
}

/// In-process fan-out of sync events. Subscribers whose receiver was
/// dropped are removed on the next publish.
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<SyncEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<SyncEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SyncEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_and_drops_closed() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let b = bus.subscribe();
        drop(b);
        let ev = SyncEvent::ParticipantLeft {
            room_id: "R".into(),
            participant_id: "p".into(),
        };
        bus.publish(ev.clone());
        assert_eq!(a.recv().await, Some(ev));
        assert_eq!(bus.subscriber_count(), 1);
    }
}
