//! Inbound OSC receiver thread
//!
//! Owns the listening socket. Each datagram is decoded into an OSC packet,
//! bundles are flattened, and every message is handed to the
//! [`InboundMessageDecoder`]. Malformed datagrams are logged and skipped.

use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tsync_osc::decode_packet;

use crate::decoder::InboundMessageDecoder;
use crate::error::{SyncError, SyncResult};

pub const RECEIVER_THREAD_NAME: &str = "tsync-receiver";

/// Largest datagram accepted (UDP payload limit)
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Receiver thread handle
///
/// The socket must have a read timeout; the thread checks its stop flag
/// between reads. Dropping the handle stops and joins the thread.
pub struct InboundReceiver {
    shutdown: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    /// Datagrams that failed to decode
    malformed: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl InboundReceiver {
    pub fn spawn(socket: UdpSocket, decoder: Arc<InboundMessageDecoder>) -> SyncResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let malformed = Arc::new(AtomicU64::new(0));

        let thread_shutdown = shutdown.clone();
        let thread_alive = alive.clone();
        let thread_malformed = malformed.clone();

        let handle = thread::Builder::new()
            .name(RECEIVER_THREAD_NAME.to_string())
            .spawn(move || {
                Self::run(&socket, &decoder, &thread_shutdown, &thread_malformed);
                thread_alive.store(false, Ordering::Relaxed);
            })
            .map_err(|e| SyncError::ThreadSpawn {
                name: RECEIVER_THREAD_NAME,
                reason: e.to_string(),
            })?;

        Ok(Self {
            shutdown,
            alive,
            malformed,
            handle: Some(handle),
        })
    }

    fn run(
        socket: &UdpSocket,
        decoder: &InboundMessageDecoder,
        shutdown: &AtomicBool,
        malformed: &AtomicU64,
    ) {
        log::info!("[OSC receiver] Thread started");
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while !shutdown.load(Ordering::Relaxed) {
            let (n, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue;
                }
                // Windows reports ICMP port-unreachable on the next recv
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    log::error!("[OSC receiver] Read error: {}", e);
                    break;
                }
            };

            match decode_packet(&buf[..n]) {
                Ok(packet) => packet.for_each_message(&mut |msg| {
                    // Outcome is counted and logged by the decoder
                    let _ = decoder.handle(msg);
                }),
                Err(e) => {
                    malformed.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[OSC receiver] Malformed datagram from {} ({} bytes): {}", from, n, e);
                }
            }
        }

        log::info!("[OSC receiver] Thread stopped");
    }

    /// Check if the receive loop is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Signal the thread and join it
    ///
    /// Returns within about one socket read timeout.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            log::debug!("[OSC receiver] Waiting for thread to stop...");
            let _ = handle.join();
        }
    }
}

impl Drop for InboundReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SharedSlaveState;
    use crate::events::{event_channel, SyncEvent};
    use std::time::Duration;
    use tsync_osc::{OscBundle, OscMessage, OscPacket, TimeTag};

    fn start() -> (
        InboundReceiver,
        Arc<InboundMessageDecoder>,
        flume::Receiver<SyncEvent>,
        UdpSocket,
    ) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let port = socket.local_addr().unwrap().port();

        let (tx, rx) = event_channel(16);
        let decoder = Arc::new(InboundMessageDecoder::new(Arc::new(SharedSlaveState::new()), tx));
        let receiver = InboundReceiver::spawn(socket, decoder.clone()).unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(("127.0.0.1", port)).unwrap();
        (receiver, decoder, rx, client)
    }

    #[test]
    fn test_datagram_updates_slave_state() {
        let (_receiver, decoder, rx, client) = start();
        client
            .send(&OscMessage::new("/tempo").with_arg(111.0f32).encode())
            .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let SyncEvent::SlaveTransport(state) = event;
        assert_eq!(state.bpm, 111.0);
        assert_eq!(decoder.slave_state().bpm, 111.0);
    }

    #[test]
    fn test_bundle_messages_dispatched_in_order() {
        let (_receiver, decoder, rx, client) = start();
        let bundle = OscPacket::Bundle(OscBundle {
            time_tag: TimeTag::IMMEDIATELY,
            content: vec![
                OscMessage::new("/play").with_arg(1).into(),
                OscMessage::new("/tempo").with_arg(125.0f32).into(),
            ],
        });
        client.send(&bundle.encode()).unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let SyncEvent::SlaveTransport(state) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(state.is_playing);
        assert_eq!(state.bpm, 125.0);
        assert_eq!(decoder.stats().applied, 2);
    }

    #[test]
    fn test_malformed_datagram_is_skipped() {
        let (receiver, decoder, rx, client) = start();
        client.send(b"not osc").unwrap();
        client
            .send(&OscMessage::new("/play").with_arg(1).encode())
            .unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(decoder.slave_state().is_playing);
        assert_eq!(receiver.malformed_count(), 1);
        assert!(receiver.is_alive());
    }

    #[test]
    fn test_stop_joins_thread() {
        let (mut receiver, _decoder, _rx, _client) = start();
        receiver.stop();
        assert!(!receiver.is_alive());
    }
}
