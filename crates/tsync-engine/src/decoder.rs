//! Inbound message validation and dispatch
//!
//! Messages come from an untrusted peer, so every update is validated in
//! full before any field of [`SlaveTransportState`] is touched. A rejected
//! message leaves the prior state intact.
//!
//! | Address     | Accepted arguments                         |
//! |-------------|--------------------------------------------|
//! | `/tempo`    | exactly one float32                        |
//! | `/position` | five or more, the first three int32 are bar/beat/sub |
//! | `/play`     | exactly one int32, `1` = playing           |

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tsync_osc::{OscArg, OscMessage};

use crate::events::{EventSender, SyncEvent};
use crate::types::{
    MusicalPosition, SlaveTransportState, PLAY_ADDRESS, POSITION_ADDRESS, TEMPO_ADDRESS,
};

/// Minimum argument count of an inbound `/position` ("bar | beat | sub")
pub const POSITION_MIN_ARGS: usize = 5;

/// Why an inbound message was not applied
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Unknown address {0}")]
    UnknownAddress(String),

    #[error("{address} expects {expected} argument(s), got {found}")]
    ArgumentCount {
        address: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("{address} expects {expected}, got type '{found}'")]
    ArgumentType {
        address: &'static str,
        expected: &'static str,
        found: char,
    },

    #[error("/position needs 3 int32 components, got {found}")]
    PositionComponents { found: usize },
}

/// A validated change to the slave transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InboundUpdate {
    Tempo(f64),
    Position(MusicalPosition),
    Play(bool),
}

impl InboundUpdate {
    /// Validate a message without applying it
    pub fn parse(msg: &OscMessage) -> Result<Self, DecodeError> {
        match msg.address.as_str() {
            TEMPO_ADDRESS => {
                let arg = single_arg(msg, TEMPO_ADDRESS)?;
                arg.as_float()
                    .map(|bpm| Self::Tempo(bpm as f64))
                    .ok_or_else(|| type_error(TEMPO_ADDRESS, "float32", arg))
            }
            PLAY_ADDRESS => {
                let arg = single_arg(msg, PLAY_ADDRESS)?;
                arg.as_int()
                    .map(|v| Self::Play(v == 1))
                    .ok_or_else(|| type_error(PLAY_ADDRESS, "int32", arg))
            }
            POSITION_ADDRESS => {
                if msg.len() < POSITION_MIN_ARGS {
                    return Err(DecodeError::ArgumentCount {
                        address: POSITION_ADDRESS,
                        expected: "at least 5",
                        found: msg.len(),
                    });
                }

                // Separators like "|" may sit between the components
                let mut components = [0i32; 3];
                let mut found = 0;
                for value in msg.args.iter().filter_map(OscArg::as_int).take(3) {
                    components[found] = value;
                    found += 1;
                }
                if found < 3 {
                    return Err(DecodeError::PositionComponents { found });
                }

                Ok(Self::Position(MusicalPosition {
                    bar: components[0],
                    beat: components[1],
                    sub_beat: components[2],
                }))
            }
            other => Err(DecodeError::UnknownAddress(other.to_string())),
        }
    }

    fn apply(self, state: &mut SlaveTransportState) {
        match self {
            Self::Tempo(bpm) => state.bpm = bpm,
            Self::Position(pos) => {
                state.bar = pos.bar;
                state.beat = pos.beat;
                state.sub_beat = pos.sub_beat;
            }
            Self::Play(playing) => state.is_playing = playing,
        }
    }
}

fn single_arg<'a>(msg: &'a OscMessage, address: &'static str) -> Result<&'a OscArg, DecodeError> {
    match msg.args.as_slice() {
        [arg] => Ok(arg),
        args => Err(DecodeError::ArgumentCount {
            address,
            expected: "1",
            found: args.len(),
        }),
    }
}

fn type_error(address: &'static str, expected: &'static str, arg: &OscArg) -> DecodeError {
    DecodeError::ArgumentType {
        address,
        expected,
        found: arg.type_tag() as char,
    }
}

/// Slave transport shared between the decoder and the UI
///
/// Readers always get a full copy taken under one read lock.
pub struct SharedSlaveState {
    state: RwLock<SlaveTransportState>,
}

impl SharedSlaveState {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SlaveTransportState::default()),
        }
    }

    /// Copy of the current state
    ///
    /// A poisoned lock still holds the last applied state, so it is read as-is.
    pub fn snapshot(&self) -> SlaveTransportState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply an update under the write lock, returning the new state
    fn apply(&self, update: InboundUpdate) -> SlaveTransportState {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        update.apply(&mut state);
        *state
    }
}

impl Default for SharedSlaveState {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for inbound traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Valid messages applied to the slave state
    pub applied: u64,
    /// Known addresses with invalid arguments
    pub rejected: u64,
    /// Unknown addresses
    pub ignored: u64,
}

/// Validates inbound messages and applies them to the slave state
pub struct InboundMessageDecoder {
    slave: Arc<SharedSlaveState>,
    events: EventSender,
    applied: AtomicU64,
    rejected: AtomicU64,
    ignored: AtomicU64,
    /// Text of the most recent message, for display
    last_message: RwLock<Option<String>>,
}

impl InboundMessageDecoder {
    pub fn new(slave: Arc<SharedSlaveState>, events: EventSender) -> Self {
        Self {
            slave,
            events,
            applied: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            last_message: RwLock::new(None),
        }
    }

    /// Validate and apply one message, then notify the UI
    ///
    /// Errors are already counted and logged; callers may ignore them.
    pub fn handle(&self, msg: &OscMessage) -> Result<InboundUpdate, DecodeError> {
        log::debug!("OSC: Received {}", msg);
        if let Ok(mut last) = self.last_message.write() {
            *last = Some(msg.to_string());
        }

        let update = match InboundUpdate::parse(msg) {
            Ok(update) => update,
            Err(e @ DecodeError::UnknownAddress(_)) => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
                log::debug!("OSC: Ignoring message: {}", e);
                return Err(e);
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("OSC: Rejected malformed message ({}): {}", msg, e);
                return Err(e);
            }
        };

        let state = self.slave.apply(update);
        self.applied.fetch_add(1, Ordering::Relaxed);
        self.events.notify(SyncEvent::SlaveTransport(state));
        Ok(update)
    }

    pub fn slave_state(&self) -> SlaveTransportState {
        self.slave.snapshot()
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            applied: self.applied.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }

    /// Text form of the last received message, if any
    pub fn last_message(&self) -> Option<String> {
        self.last_message.read().ok().and_then(|m| m.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;

    fn decoder() -> (InboundMessageDecoder, flume::Receiver<SyncEvent>) {
        let (tx, rx) = event_channel(16);
        (InboundMessageDecoder::new(Arc::new(SharedSlaveState::new()), tx), rx)
    }

    fn position_msg() -> OscMessage {
        OscMessage::new("/position")
            .with_arg(5)
            .with_arg("|")
            .with_arg(2)
            .with_arg("|")
            .with_arg(3)
    }

    #[test]
    fn test_position_with_separators() {
        let (decoder, rx) = decoder();
        decoder.handle(&position_msg()).unwrap();

        let state = decoder.slave_state();
        assert_eq!((state.bar, state.beat, state.sub_beat), (5, 2, 3));
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::SlaveTransport(state));
    }

    #[test]
    fn test_position_uses_first_three_ints() {
        let msg = OscMessage::new("/position")
            .with_arg(9)
            .with_arg(8)
            .with_arg(7)
            .with_arg(6)
            .with_arg(5);
        assert_eq!(
            InboundUpdate::parse(&msg),
            Ok(InboundUpdate::Position(MusicalPosition {
                bar: 9,
                beat: 8,
                sub_beat: 7
            }))
        );
    }

    #[test]
    fn test_position_with_two_ints_keeps_triplet() {
        let (decoder, rx) = decoder();
        decoder.handle(&position_msg()).unwrap();
        rx.try_recv().unwrap();

        let msg = OscMessage::new("/position")
            .with_arg(7)
            .with_arg("|")
            .with_arg(8)
            .with_arg("|")
            .with_arg(1.5f32);
        assert_eq!(
            decoder.handle(&msg),
            Err(DecodeError::PositionComponents { found: 2 })
        );

        let state = decoder.slave_state();
        assert_eq!((state.bar, state.beat, state.sub_beat), (5, 2, 3));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_position_too_short_is_rejected() {
        let (decoder, _rx) = decoder();
        let msg = OscMessage::new("/position").with_arg(1).with_arg(2).with_arg(3);
        assert!(matches!(
            decoder.handle(&msg),
            Err(DecodeError::ArgumentCount { found: 3, .. })
        ));
        assert_eq!(decoder.slave_state().position(), MusicalPosition::default());
    }

    #[test]
    fn test_tempo_float() {
        let (decoder, _rx) = decoder();
        decoder
            .handle(&OscMessage::new("/tempo").with_arg(98.5f32))
            .unwrap();
        assert_eq!(decoder.slave_state().bpm, 98.5);
    }

    #[test]
    fn test_tempo_string_is_ignored() {
        let (decoder, rx) = decoder();
        let result = decoder.handle(&OscMessage::new("/tempo").with_arg("fast"));
        assert!(matches!(
            result,
            Err(DecodeError::ArgumentType { found: 's', .. })
        ));
        assert_eq!(decoder.slave_state().bpm, 120.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tempo_needs_exactly_one_arg() {
        let (decoder, _rx) = decoder();
        let msg = OscMessage::new("/tempo").with_arg(100.0f32).with_arg(101.0f32);
        assert!(matches!(
            decoder.handle(&msg),
            Err(DecodeError::ArgumentCount { found: 2, .. })
        ));
        assert!(decoder.handle(&OscMessage::new("/tempo")).is_err());
        assert_eq!(decoder.slave_state().bpm, 120.0);
    }

    #[test]
    fn test_play_values() {
        let (decoder, _rx) = decoder();

        decoder.handle(&OscMessage::new("/play").with_arg(1)).unwrap();
        assert!(decoder.slave_state().is_playing);

        decoder.handle(&OscMessage::new("/play").with_arg(0)).unwrap();
        assert!(!decoder.slave_state().is_playing);

        decoder.handle(&OscMessage::new("/play").with_arg(1)).unwrap();
        decoder.handle(&OscMessage::new("/play").with_arg(2)).unwrap();
        assert!(!decoder.slave_state().is_playing);
    }

    #[test]
    fn test_play_float_is_ignored() {
        let (decoder, _rx) = decoder();
        decoder.handle(&OscMessage::new("/play").with_arg(1)).unwrap();

        assert!(decoder
            .handle(&OscMessage::new("/play").with_arg(0.0f32))
            .is_err());
        assert!(decoder.slave_state().is_playing);
    }

    #[test]
    fn test_unknown_address_counts_as_ignored() {
        let (decoder, rx) = decoder();
        assert_eq!(
            decoder.handle(&OscMessage::new("/volume").with_arg(0.5f32)),
            Err(DecodeError::UnknownAddress("/volume".to_string()))
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(decoder.slave_state(), SlaveTransportState::default());
    }

    #[test]
    fn test_stats_and_last_message() {
        let (decoder, _rx) = decoder();
        assert_eq!(decoder.last_message(), None);

        decoder.handle(&OscMessage::new("/tempo").with_arg(130.0f32)).ok();
        decoder.handle(&OscMessage::new("/tempo").with_arg("x")).ok();
        decoder.handle(&OscMessage::new("/nope")).ok();
        decoder.handle(&OscMessage::new("/play").with_arg(1)).ok();

        assert_eq!(
            decoder.stats(),
            DecoderStats {
                applied: 2,
                rejected: 1,
                ignored: 1
            }
        );
        assert_eq!(decoder.last_message().as_deref(), Some("/play 1"));
    }

    #[test]
    fn test_event_carries_full_state() {
        let (decoder, rx) = decoder();
        decoder.handle(&OscMessage::new("/tempo").with_arg(140.0f32)).unwrap();
        decoder.handle(&OscMessage::new("/play").with_arg(1)).unwrap();

        rx.try_recv().unwrap();
        match rx.try_recv().unwrap() {
            SyncEvent::SlaveTransport(state) => {
                assert_eq!(state.bpm, 140.0);
                assert!(state.is_playing);
            }
        }
    }

    #[test]
    fn test_burst_leaves_newest_event_current() {
        let (tx, rx) = event_channel(2);
        let decoder = InboundMessageDecoder::new(Arc::new(SharedSlaveState::new()), tx);

        for bpm in [100.0f32, 110.0, 120.5, 130.0] {
            decoder.handle(&OscMessage::new("/tempo").with_arg(bpm)).unwrap();
        }

        let events: Vec<SyncEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events.last(),
            Some(&SyncEvent::SlaveTransport(decoder.slave_state()))
        );
        assert_eq!(decoder.slave_state().bpm, 130.0);
    }

    #[test]
    fn test_poisoned_lock_keeps_last_state() {
        let slave = Arc::new(SharedSlaveState::new());
        slave.apply(InboundUpdate::Tempo(133.0));

        let poisoner = slave.clone();
        let result = std::thread::spawn(move || {
            let _guard = poisoner.state.write().unwrap();
            panic!("poison the slave state lock");
        })
        .join();
        assert!(result.is_err());
        assert!(slave.state.is_poisoned());

        assert_eq!(slave.snapshot().bpm, 133.0);
        assert_eq!(slave.apply(InboundUpdate::Play(true)).bpm, 133.0);
        assert!(slave.snapshot().is_playing);
    }
}
