//! UI notifications
//!
//! Fire-and-forget: the sender never waits. When the channel is full the
//! oldest pending event is discarded, so the newest event in the channel
//! always matches the current slave state.

use flume::{Receiver, Sender};

use crate::types::SlaveTransportState;

/// Notification posted to the UI thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncEvent {
    /// The peer's transport changed; carries a copy of the new state
    SlaveTransport(SlaveTransportState),
}

/// Create a bounded notification channel
pub fn event_channel(capacity: usize) -> (EventSender, Receiver<SyncEvent>) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    let sender = EventSender {
        tx,
        evict: rx.clone(),
    };
    (sender, rx)
}

/// Non-blocking sending half of the notification channel
///
/// Not `Clone`: a second eviction handle would hide a dropped UI receiver.
pub struct EventSender {
    tx: Sender<SyncEvent>,
    /// Sender-side handle used only to discard the oldest event
    evict: Receiver<SyncEvent>,
}

impl EventSender {
    /// Post an event without waiting, displacing the oldest if full
    ///
    /// Returns false if the event was dropped because the UI receiver is gone.
    pub fn notify(&self, event: SyncEvent) -> bool {
        // Our own eviction handle keeps the channel open; count only the UI's
        if self.tx.receiver_count() <= 1 {
            return false;
        }

        let mut pending = event;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return true,
                Err(flume::TrySendError::Full(returned)) => {
                    if let Ok(stale) = self.evict.try_recv() {
                        log::trace!("Event channel full, discarding {:?}", stale);
                    }
                    pending = returned;
                }
                Err(flume::TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}
