//! Transport sync engine
//!
//! Keeps a host's transport (play/stop, tempo, musical position) in sync with
//! a peer over OSC/UDP:
//! - Change detection and rate limiting inside the real-time audio callback
//! - Lock-free snapshot handoff to a background sender thread
//! - Validation of the peer's `/tempo`, `/position` and `/play` reports
//! - Copy-only state access and change notifications for the UI
//!
//! # Architecture
//!
//! ```text
//! audio callback → TransportSnapshotProducer → SnapshotQueue → tsync-sender → UDP :8000
//! UDP :8002 → tsync-receiver → InboundMessageDecoder → SharedSlaveState
//!                                                    └→ flume channel → UI
//! ```
//!
//! [`TransportSync::start`] wires everything together and hands back the
//! [`TransportSnapshotProducer`], which the host moves into its audio callback.

mod config;
mod connection;
mod decoder;
mod error;
mod events;
mod producer;
mod queue;
mod receiver;
mod sender;
mod types;

pub use config::{
    default_config_path, load_config, save_config, InboundConfig, OutboundConfig, SenderConfig,
    SyncConfig, DEFAULT_PUBLISH_RATE_HZ,
};
pub use connection::{ConnectionError, ConnectionManager, ConnectionStatus};
pub use decoder::{
    DecodeError, DecoderStats, InboundMessageDecoder, InboundUpdate, SharedSlaveState,
    POSITION_MIN_ARGS,
};
pub use error::{SyncError, SyncResult};
pub use events::{event_channel, EventSender, SyncEvent};
pub use producer::{
    command_channel, BlockOutcome, LocalTransportAtomics, TransportCommand,
    TransportCommandSender, TransportSnapshotProducer, COMMAND_QUEUE_CAPACITY,
};
pub use queue::{SnapshotQueue, SnapshotWaiter, DEFAULT_QUEUE_CAPACITY};
pub use receiver::{InboundReceiver, RECEIVER_THREAD_NAME};
pub use sender::{send_immediate, send_snapshot, SenderWorker, SENDER_THREAD_NAME};
pub use types::{
    HostPosition, LocalTransportState, MusicalPosition, SlaveTransportState, TransportSnapshot,
    DEFAULT_BPM, DEFAULT_PPQ_POSITION, PLAY_ADDRESS, POSITION_ADDRESS, TEMPO_ADDRESS,
};

use flume::Receiver;
use std::path::Path;
use std::sync::Arc;

/// Host-facing owner of the sync engine
///
/// Owns the sender and receiver threads and exposes the UI surface. The
/// real-time half ([`TransportSnapshotProducer`]) is returned separately by
/// [`start`](Self::start). Dropping this stops both threads.
pub struct TransportSync {
    config: SyncConfig,
    connection: Arc<ConnectionManager>,
    queue: Arc<SnapshotQueue>,
    local: Arc<LocalTransportAtomics>,
    slave: Arc<SharedSlaveState>,
    decoder: Arc<InboundMessageDecoder>,
    commands: TransportCommandSender,
    event_rx: Receiver<SyncEvent>,
    sender: Option<SenderWorker>,
    /// None if the listen port could not be bound
    receiver: Option<InboundReceiver>,
}

impl TransportSync {
    /// Start the engine
    ///
    /// Socket failures are not errors: a failed outbound connect leaves the
    /// engine disconnected and a failed bind leaves it without inbound
    /// updates. Only thread spawn failures are returned.
    pub fn start(config: SyncConfig) -> SyncResult<(Self, TransportSnapshotProducer)> {
        let config = config.sanitized();

        let connection = Arc::new(ConnectionManager::new(
            config.outbound.clone(),
            config.inbound.clone(),
        ));

        let (queue, waiter) = SnapshotQueue::with_capacity(config.queue_capacity);
        let (commands, command_rx) = command_channel(COMMAND_QUEUE_CAPACITY);
        let local = Arc::new(LocalTransportAtomics::new());

        let producer = TransportSnapshotProducer::new(
            queue.clone(),
            command_rx,
            local.clone(),
            connection.clone(),
            config.publish_rate_hz,
            config.default_sample_rate,
        );

        let sender = SenderWorker::spawn(queue.clone(), waiter, connection.clone(), &config.sender)?;

        let (event_tx, event_rx) = event_channel(config.event_capacity);
        let slave = Arc::new(SharedSlaveState::new());
        let decoder = Arc::new(InboundMessageDecoder::new(slave.clone(), event_tx));

        let receiver = match connection.listen() {
            Ok(socket) => Some(InboundReceiver::spawn(socket, decoder.clone())?),
            Err(e) => {
                log::warn!("TransportSync: Running without inbound updates: {}", e);
                None
            }
        };

        log::info!(
            "TransportSync: Started (outbound {}, inbound port {})",
            connection.status(),
            connection.listen_port()
        );

        let sync = Self {
            config,
            connection,
            queue,
            local,
            slave,
            decoder,
            commands,
            event_rx,
            sender: Some(sender),
            receiver,
        };
        Ok((sync, producer))
    }

    /// Load config from `path` (or the default location) and start
    pub fn from_config_file(path: Option<&Path>) -> SyncResult<(Self, TransportSnapshotProducer)> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(default_config_path);
        Self::start(load_config(&path))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ─── UI surface ───

    /// Copy of the peer's transport
    pub fn slave_state(&self) -> SlaveTransportState {
        self.slave.snapshot()
    }

    /// Copy of the local transport as of the last audio block
    pub fn local_state(&self) -> LocalTransportState {
        self.local.snapshot()
    }

    /// Ask the audio thread to flip the local play state
    ///
    /// Returns false if the command ring is full.
    pub fn toggle_play(&mut self) -> bool {
        self.send_command(TransportCommand::TogglePlay)
    }

    pub fn set_playing(&mut self, playing: bool) -> bool {
        self.send_command(TransportCommand::SetPlaying(playing))
    }

    fn send_command(&mut self, cmd: TransportCommand) -> bool {
        match self.commands.send(cmd) {
            Ok(()) => true,
            Err(cmd) => {
                log::warn!("TransportSync: Command ring full, dropping {:?}", cmd);
                false
            }
        }
    }

    /// Send the current local state now, from the calling thread
    pub fn send_immediate(&self) -> SyncResult<()> {
        let state = self.local.snapshot();
        send_immediate(&self.connection, &TransportSnapshot::from(&state))
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Bound inbound port, or 0 when not listening
    pub fn listen_port(&self) -> u16 {
        self.connection.listen_port()
    }

    /// Receiver for UI notifications (use `recv_async` from async UIs)
    pub fn events(&self) -> &Receiver<SyncEvent> {
        &self.event_rx
    }

    /// Take the next pending notification without waiting
    pub fn try_recv_event(&self) -> Option<SyncEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Take every pending notification
    pub fn drain_events(&self) -> Vec<SyncEvent> {
        self.event_rx.try_iter().collect()
    }

    /// Text of the most recent inbound message
    pub fn last_message(&self) -> Option<String> {
        self.decoder.last_message()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Snapshots lost to queue overload since start
    pub fn dropped_snapshots(&self) -> u64 {
        self.queue.dropped_count()
    }

    pub fn pending_snapshots(&self) -> usize {
        self.queue.len()
    }

    // ─── Host state persistence ───

    /// Persisted state blob (always empty; nothing is persisted)
    pub fn get_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restore persisted state (ignored)
    pub fn set_state(&mut self, _data: &[u8]) {}

    /// Stop both threads and discard anything still queued
    ///
    /// Called automatically on drop. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(mut sender) = self.sender.take() else {
            return;
        };

        sender.stop();
        let discarded = self.queue.drain();
        if discarded > 0 {
            log::debug!("TransportSync: Discarded {} unsent snapshot(s)", discarded);
        }

        if let Some(mut receiver) = self.receiver.take() {
            receiver.stop();
        }
        self.connection.stop_listening();
        self.connection.disconnect();
        log::info!("TransportSync: Shut down");
    }
}

impl Drop for TransportSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::Duration;
    use tsync_osc::{decode_message, OscArg, OscMessage};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn peer() -> UdpSocket {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        peer
    }

    fn loopback_config(peer: &UdpSocket) -> SyncConfig {
        SyncConfig {
            outbound: OutboundConfig {
                host: "127.0.0.1".to_string(),
                port: peer.local_addr().unwrap().port(),
            },
            inbound: InboundConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 0,
                read_timeout_ms: 20,
            },
            default_sample_rate: 48_000.0,
            ..Default::default()
        }
    }

    fn recv(peer: &UdpSocket) -> OscMessage {
        let mut buf = [0u8; 512];
        let n = peer.recv(&mut buf).unwrap();
        decode_message(&buf[..n]).unwrap()
    }

    #[test]
    fn test_outbound_end_to_end() {
        init_logging();
        let peer = peer();
        let (sync, mut producer) = TransportSync::start(loopback_config(&peer)).unwrap();
        assert!(sync.is_connected());

        producer.process_block(Some(&HostPosition::playing(128.0, 4.5)), 2_048);

        let play = recv(&peer);
        let tempo = recv(&peer);
        let position = recv(&peer);
        assert_eq!(play.args, vec![OscArg::Int(1)]);
        assert_eq!(tempo.args, vec![OscArg::Float(128.0)]);
        let ppq = position.arg(0).and_then(OscArg::as_float).unwrap();
        assert!((ppq as f64 - 4.5).abs() < 1e-6);

        let local = sync.local_state();
        assert!(local.is_playing);
        assert_eq!(local.bpm, 128.0);
    }

    #[test]
    fn test_inbound_end_to_end() {
        init_logging();
        let peer = peer();
        let (sync, _producer) = TransportSync::start(loopback_config(&peer)).unwrap();
        let port = sync.listen_port();
        assert_ne!(port, 0);

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let position = OscMessage::new("/position")
            .with_arg(5)
            .with_arg("|")
            .with_arg(2)
            .with_arg("|")
            .with_arg(3);
        client.send_to(&position.encode(), ("127.0.0.1", port)).unwrap();

        let SyncEvent::SlaveTransport(state) =
            sync.events().recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(state.position().to_string(), "5 | 2 | 3");
        assert_eq!(sync.slave_state(), state);
        assert_eq!(sync.last_message().as_deref(), Some("/position 5 | 2 | 3"));
        assert_eq!(sync.decoder_stats().applied, 1);
    }

    #[test]
    fn test_toggle_command_produces_snapshot() {
        init_logging();
        let peer = peer();
        let (mut sync, mut producer) = TransportSync::start(loopback_config(&peer)).unwrap();
        let stopped = HostPosition::stopped(120.0, 0.0);
        assert_eq!(producer.process_block(Some(&stopped), 256).count(), 0);

        assert!(sync.toggle_play());
        let outcome = producer.process_block(Some(&stopped), 256);
        assert!(outcome.play_state);

        // The snapshot reports the host's state after the block
        let play = recv(&peer);
        assert_eq!(play.address, "/play");
        assert_eq!(play.args, vec![OscArg::Int(0)]);
    }

    #[test]
    fn test_send_immediate_uses_local_state() {
        init_logging();
        let peer = peer();
        let (sync, mut producer) = TransportSync::start(loopback_config(&peer)).unwrap();
        // Stopped throughout, so the block queues nothing
        assert_eq!(
            producer
                .process_block(Some(&HostPosition::stopped(96.0, 2.0)), 64)
                .count(),
            0
        );

        sync.send_immediate().unwrap();
        let messages: Vec<OscMessage> = (0..3).map(|_| recv(&peer)).collect();
        assert_eq!(messages[1].args, vec![OscArg::Float(96.0)]);
        assert_eq!(messages[2].args, vec![OscArg::Float(2.0)]);
    }

    #[test]
    fn test_listen_conflict_degrades() {
        init_logging();
        let peer = peer();
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut config = loopback_config(&peer);
        config.inbound.port = taken.local_addr().unwrap().port();

        let (sync, _producer) = TransportSync::start(config).unwrap();
        assert_eq!(sync.listen_port(), 0);
        assert!(sync.is_connected());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        init_logging();
        let peer = peer();
        let (mut sync, _producer) = TransportSync::start(loopback_config(&peer)).unwrap();
        sync.shutdown();
        assert_eq!(sync.listen_port(), 0);
        assert_eq!(sync.connection_status(), ConnectionStatus::Disconnected);
        assert_eq!(sync.pending_snapshots(), 0);
        sync.shutdown();
    }

    #[test]
    fn test_persisted_state_is_empty() {
        let peer = peer();
        let (mut sync, _producer) = TransportSync::start(loopback_config(&peer)).unwrap();
        assert!(sync.get_state().is_empty());
        sync.set_state(b"ignored");
        assert_eq!(sync.slave_state(), SlaveTransportState::default());
    }
}
