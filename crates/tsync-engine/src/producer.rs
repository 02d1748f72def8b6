//! Transport snapshot producer - runs inside the real-time audio callback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  TransportCommand   ┌─────────────────────┐
//! │     UI Thread    │───push()───────────►│  Command Ring       │
//! └──────────────────┘                     │  (rtrb, lock-free)  │
//!         ▲                                └──────────┬──────────┘
//!         │ Relaxed atomics                           │ pop()
//! ┌──────────────────┐                     ┌─────────────────────┐
//! │ LocalTransport   │◄────publish()───────│  Audio RT Thread    │
//! │ Atomics          │                     │  (owns producer)    │
//! └──────────────────┘                     └──────────┬──────────┘
//!                                                     │ push()
//!                                          ┌──────────▼──────────┐
//!                                          │  SnapshotQueue      │──► sender thread
//!                                          └─────────────────────┘
//! ```
//!
//! The producer owns the only writable copy of [`LocalTransportState`]. The UI
//! never flips its own play flag; it sends a [`TransportCommand`] and reads
//! the result back from [`LocalTransportAtomics`].

use std::sync::atomic::{fence, AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::queue::SnapshotQueue;
use crate::types::{
    HostPosition, LocalTransportState, TransportSnapshot, DEFAULT_BPM, DEFAULT_PPQ_POSITION,
};

/// UI commands capacity (toggles are rare; this is generous)
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Commands sent from the UI thread to the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    /// Force the local play flag
    SetPlaying(bool),
    /// Flip the local play flag
    TogglePlay,
}

/// Create the UI → audio command ring
pub fn command_channel(capacity: usize) -> (TransportCommandSender, rtrb::Consumer<TransportCommand>) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity.max(1));
    (TransportCommandSender { producer }, consumer)
}

/// Command sender for the UI thread
///
/// Wraps the lock-free producer; all operations are non-blocking.
pub struct TransportCommandSender {
    producer: rtrb::Producer<TransportCommand>,
}

impl TransportCommandSender {
    /// Queue a command for the next processing block
    ///
    /// Returns `Err(cmd)` if the ring is full.
    pub fn send(&mut self, cmd: TransportCommand) -> Result<(), TransportCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }

    /// Check if the ring has space for more commands
    pub fn has_space(&self) -> bool {
        self.producer.slots() > 0
    }
}

/// Local transport published by the audio thread for lock-free UI reads
///
/// Floats are stored as their bit patterns. A generation counter makes the
/// fields a unit: it is odd while a publish is in progress, and a reader
/// retries until it sees the same even generation before and after its loads.
/// Only the audio thread publishes, so the writer never waits.
pub struct LocalTransportAtomics {
    generation: AtomicU64,
    is_playing: AtomicBool,
    bpm_bits: AtomicU64,
    ppq_bits: AtomicU64,
    time_sig_numerator: AtomicI32,
    time_sig_denominator: AtomicI32,
}

impl LocalTransportAtomics {
    pub fn new() -> Self {
        let defaults = LocalTransportState::default();
        Self {
            generation: AtomicU64::new(0),
            is_playing: AtomicBool::new(defaults.is_playing),
            bpm_bits: AtomicU64::new(defaults.bpm.to_bits()),
            ppq_bits: AtomicU64::new(defaults.ppq_position.to_bits()),
            time_sig_numerator: AtomicI32::new(defaults.time_sig_numerator),
            time_sig_denominator: AtomicI32::new(defaults.time_sig_denominator),
        }
    }

    /// Store a full state (audio thread only)
    #[inline]
    pub fn publish(&self, state: &LocalTransportState) {
        let generation = self.generation.load(Ordering::Relaxed);
        self.generation.store(generation.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.is_playing.store(state.is_playing, Ordering::Relaxed);
        self.bpm_bits.store(state.bpm.to_bits(), Ordering::Relaxed);
        self.ppq_bits.store(state.ppq_position.to_bits(), Ordering::Relaxed);
        self.time_sig_numerator
            .store(state.time_sig_numerator, Ordering::Relaxed);
        self.time_sig_denominator
            .store(state.time_sig_denominator, Ordering::Relaxed);

        self.generation
            .store(generation.wrapping_add(2), Ordering::Release);
    }

    /// Play flag alone (a single field is never torn)
    #[inline]
    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }

    /// Number of completed publishes
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire) / 2
    }

    /// Copy every field as written by one publish
    pub fn snapshot(&self) -> LocalTransportState {
        loop {
            let before = self.generation.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let state = LocalTransportState {
                is_playing: self.is_playing.load(Ordering::Relaxed),
                bpm: f64::from_bits(self.bpm_bits.load(Ordering::Relaxed)),
                ppq_position: f64::from_bits(self.ppq_bits.load(Ordering::Relaxed)),
                time_sig_numerator: self.time_sig_numerator.load(Ordering::Relaxed),
                time_sig_denominator: self.time_sig_denominator.load(Ordering::Relaxed),
            };

            fence(Ordering::Acquire);
            if self.generation.load(Ordering::Relaxed) == before {
                return state;
            }
            std::hint::spin_loop();
        }
    }
}

impl Default for LocalTransportAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// What one processing block enqueued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    /// A rate-limited snapshot was queued
    pub periodic: bool,
    /// An immediate play/stop snapshot was queued
    pub play_state: bool,
}

impl BlockOutcome {
    /// Number of snapshots queued this block (0-2)
    pub fn count(&self) -> usize {
        self.periodic as usize + self.play_state as usize
    }
}

/// Detects transport changes and decimates them into queued snapshots
///
/// Lives on the audio thread. `process_block` never allocates, waits, or logs.
pub struct TransportSnapshotProducer {
    state: LocalTransportState,
    /// Samples processed since the last rate-limited snapshot
    sample_accumulator: f64,
    samples_per_message: f64,
    publish_rate_hz: f64,
    queue: Arc<SnapshotQueue>,
    commands: rtrb::Consumer<TransportCommand>,
    atomics: Arc<LocalTransportAtomics>,
    connection: Arc<ConnectionManager>,
}

impl TransportSnapshotProducer {
    pub fn new(
        queue: Arc<SnapshotQueue>,
        commands: rtrb::Consumer<TransportCommand>,
        atomics: Arc<LocalTransportAtomics>,
        connection: Arc<ConnectionManager>,
        publish_rate_hz: f64,
        sample_rate: f64,
    ) -> Self {
        Self {
            state: LocalTransportState::default(),
            sample_accumulator: 0.0,
            samples_per_message: sample_rate / publish_rate_hz,
            publish_rate_hz,
            queue,
            commands,
            atomics,
            connection,
        }
    }

    /// Host "prepare to play" hook (not called from the steady-state callback)
    ///
    /// Recomputes the decimation window, resets the accumulator and makes one
    /// inline reconnect attempt of the outbound socket.
    pub fn prepare(&mut self, sample_rate: f64) {
        if sample_rate.is_finite() && sample_rate > 0.0 {
            self.samples_per_message = sample_rate / self.publish_rate_hz;
        } else {
            log::warn!(
                "prepare: ignoring invalid sample rate {}, keeping {} samples per message",
                sample_rate,
                self.samples_per_message
            );
        }
        self.sample_accumulator = 0.0;

        if let Err(e) = self.connection.reconnect() {
            log::warn!("prepare: OSC reconnect failed: {}", e);
        }
    }

    /// Run once per audio block with the host playhead (if any)
    pub fn process_block(&mut self, position: Option<&HostPosition>, num_samples: usize) -> BlockOutcome {
        self.apply_commands();

        let host = position.copied().unwrap_or_default();
        let new_bpm = host.bpm.unwrap_or(DEFAULT_BPM);
        let new_ppq = host.ppq_position.unwrap_or(DEFAULT_PPQ_POSITION);

        let play_state_changed = self.state.is_playing != host.is_playing;
        let transport_changed = play_state_changed
            || self.state.bpm != new_bpm
            || self.state.ppq_position != new_ppq;

        if transport_changed {
            self.state.is_playing = host.is_playing;
            self.state.bpm = new_bpm;
            self.state.ppq_position = new_ppq;
        }
        if let Some((numerator, denominator)) = host.time_signature {
            self.state.time_sig_numerator = numerator;
            self.state.time_sig_denominator = denominator;
        }

        self.sample_accumulator += num_samples as f64;

        let mut outcome = BlockOutcome::default();

        if self.state.is_playing
            && transport_changed
            && self.sample_accumulator >= self.samples_per_message
        {
            self.enqueue();
            // Carry the remainder so the long-run rate stays exact
            self.sample_accumulator -= self.samples_per_message;
            outcome.periodic = true;
        }

        // Idle time must not build up a backlog of overdue snapshots
        if self.sample_accumulator > self.samples_per_message {
            self.sample_accumulator = self.samples_per_message;
        }

        // Play/stop bypasses the rate limiter
        if play_state_changed {
            self.enqueue();
            outcome.play_state = true;
        }

        self.atomics.publish(&self.state);
        outcome
    }

    fn apply_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                TransportCommand::SetPlaying(playing) => self.state.is_playing = playing,
                TransportCommand::TogglePlay => self.state.is_playing = !self.state.is_playing,
            }
        }
    }

    #[inline]
    fn enqueue(&self) {
        // Overload displaces the oldest entry; the queue counts it
        let _ = self.queue.push(TransportSnapshot::from(&self.state));
    }

    /// Current local state (audio thread view)
    pub fn state(&self) -> &LocalTransportState {
        &self.state
    }

    pub fn samples_per_message(&self) -> f64 {
        self.samples_per_message
    }

    pub fn sample_accumulator(&self) -> f64 {
        self.sample_accumulator
    }
}
