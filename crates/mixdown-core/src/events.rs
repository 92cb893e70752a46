//! Engine notifications for the host
//!
//! The engine never calls back into the host. Every state change is posted
//! as an [`EngineEvent`] on a bounded channel and the host drains it at its
//! own cadence (typically once per UI frame). Sending never blocks: when the
//! channel is full the event is dropped, which is harmless because each
//! event only says "something changed, re-read the getters".

use crate::types::StemId;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};

/// Default number of undelivered events kept before new ones are dropped
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A control-surface setter changed engine state
    StateChanged,

    /// Playback stopped on its own at the end of the track
    PlaybackStopped,

    /// A stem finished decoding and is now mixed
    StemReady(StemId),

    /// A stem failed to load and will stay silent
    StemFailed { id: StemId, error: String },

    /// A stem's waveform image was replaced
    WaveformUpdated { id: StemId, ordinal: u64 },
}

/// Cloneable, non-blocking sending side
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<EngineEvent>,
}

impl EventSender {
    /// Post an event, dropping it if the host is not keeping up
    pub fn send(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::trace!("Event channel full, dropping {:?}", event);
            }
            // Host dropped the receiver; nobody is listening
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Create a bounded event channel
pub fn event_channel(capacity: usize) -> (EventSender, Receiver<EngineEvent>) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, rx) = event_channel(8);
        tx.send(EngineEvent::StateChanged);
        tx.send(EngineEvent::StemReady(4));

        assert_eq!(rx.try_recv().unwrap(), EngineEvent::StateChanged);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::StemReady(4));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (tx, rx) = event_channel(2);
        for _ in 0..10 {
            tx.send(EngineEvent::StateChanged);
        }
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_send_without_receiver_is_harmless() {
        let (tx, rx) = event_channel(2);
        drop(rx);
        tx.send(EngineEvent::PlaybackStopped);
    }
}
