//! OSC sender thread
//!
//! Drains the [`SnapshotQueue`] and transmits each snapshot as three
//! independent datagrams: `/play` (int32), `/tempo` (float32) and
//! `/position` (float32). Delivery is at-most-once: a popped snapshot is
//! never re-queued, and a failed send is logged and skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tsync_osc::{encode_message, OscArg};

use crate::config::SenderConfig;
use crate::connection::{ConnectionError, ConnectionManager};
use crate::error::{SyncError, SyncResult};
use crate::queue::{SnapshotQueue, SnapshotWaiter};
use crate::types::{TransportSnapshot, PLAY_ADDRESS, POSITION_ADDRESS, TEMPO_ADDRESS};

pub const SENDER_THREAD_NAME: &str = "tsync-sender";

/// Sender thread handle
///
/// Owns the join handle and the stop flag. Dropping it stops the thread
/// with a bounded wait.
pub struct SenderWorker {
    shutdown: Arc<AtomicBool>,
    /// Cleared by the thread on exit
    alive: Arc<AtomicBool>,
    /// Snapshots popped and transmitted (successfully or not)
    processed: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
    queue: Arc<SnapshotQueue>,
    shutdown_timeout: Duration,
}

impl SenderWorker {
    /// Start the sender thread
    pub fn spawn(
        queue: Arc<SnapshotQueue>,
        waiter: SnapshotWaiter,
        connection: Arc<ConnectionManager>,
        config: &SenderConfig,
    ) -> SyncResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let processed = Arc::new(AtomicU64::new(0));

        let thread_queue = queue.clone();
        let thread_shutdown = shutdown.clone();
        let thread_alive = alive.clone();
        let thread_processed = processed.clone();
        let idle_wait = config.idle_wait();

        let handle = thread::Builder::new()
            .name(SENDER_THREAD_NAME.to_string())
            .spawn(move || {
                Self::run(
                    &thread_queue,
                    &waiter,
                    &connection,
                    &thread_shutdown,
                    &thread_processed,
                    idle_wait,
                );
                thread_alive.store(false, Ordering::Relaxed);
            })
            .map_err(|e| SyncError::ThreadSpawn {
                name: SENDER_THREAD_NAME,
                reason: e.to_string(),
            })?;

        Ok(Self {
            shutdown,
            alive,
            processed,
            handle: Some(handle),
            queue,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    fn run(
        queue: &SnapshotQueue,
        waiter: &SnapshotWaiter,
        connection: &ConnectionManager,
        shutdown: &AtomicBool,
        processed: &AtomicU64,
        idle_wait: Duration,
    ) {
        log::info!("[OSC sender] Thread started");
        let mut buf = Vec::with_capacity(64);

        while !shutdown.load(Ordering::Relaxed) {
            match queue.pop() {
                Some(snapshot) => {
                    send_snapshot(connection, &snapshot, &mut buf);
                    processed.fetch_add(1, Ordering::Relaxed);
                }
                None => waiter.wait(idle_wait),
            }
        }

        log::info!("[OSC sender] Thread stopped");
    }

    /// Check if the send loop is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Signal the thread and wait up to the shutdown timeout for it to exit
    ///
    /// Returns false if the thread had to be detached. Idempotent.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        self.shutdown.store(true, Ordering::Relaxed);
        self.queue.wake();

        let deadline = Instant::now() + self.shutdown_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "[OSC sender] Thread did not stop within {:?}, detaching",
                    self.shutdown_timeout
                );
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }

        let _ = handle.join();
        true
    }
}

impl Drop for SenderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn send_one(
    connection: &ConnectionManager,
    address: &str,
    arg: OscArg,
    buf: &mut Vec<u8>,
) -> Result<(), ConnectionError> {
    buf.clear();
    encode_message(address, &[arg], buf);
    connection.send(buf)
}

fn log_send_failure(address: &str, error: &ConnectionError) {
    match error {
        // Degraded mode: every send fails until the next reconnect
        ConnectionError::NotConnected => log::debug!("OSC: Dropping {} (not connected)", address),
        _ => log::warn!("OSC: Failed to send {}: {}", address, error),
    }
}

/// Transmit one snapshot as three independent messages
///
/// Returns how many of the three were sent.
pub fn send_snapshot(
    connection: &ConnectionManager,
    snapshot: &TransportSnapshot,
    buf: &mut Vec<u8>,
) -> usize {
    let messages = [
        (PLAY_ADDRESS, OscArg::Int(snapshot.is_playing as i32)),
        (TEMPO_ADDRESS, OscArg::Float(snapshot.tempo)),
        (POSITION_ADDRESS, OscArg::Float(snapshot.position)),
    ];

    let mut sent = 0;
    for (address, arg) in messages {
        match send_one(connection, address, arg, buf) {
            Ok(()) => sent += 1,
            Err(e) => log_send_failure(address, &e),
        }
    }
    log::debug!(
        "OSC: Sent {}/3 for play={} tempo={} position={}",
        sent,
        snapshot.is_playing,
        snapshot.tempo,
        snapshot.position
    );
    sent
}

/// Send a snapshot synchronously from the calling thread
///
/// If `/play` fails, one reconnect is attempted. A failed reconnect abandons
/// the cycle; otherwise `/tempo` and `/position` follow regardless.
pub fn send_immediate(connection: &ConnectionManager, snapshot: &TransportSnapshot) -> SyncResult<()> {
    let mut buf = Vec::with_capacity(32);

    if let Err(e) = send_one(
        connection,
        PLAY_ADDRESS,
        OscArg::Int(snapshot.is_playing as i32),
        &mut buf,
    ) {
        log::warn!("OSC: Failed to send {} ({}), attempting to reconnect", PLAY_ADDRESS, e);
        connection.reconnect()?;
    }

    if let Err(e) = send_one(connection, TEMPO_ADDRESS, OscArg::Float(snapshot.tempo), &mut buf) {
        log_send_failure(TEMPO_ADDRESS, &e);
    }
    if let Err(e) = send_one(
        connection,
        POSITION_ADDRESS,
        OscArg::Float(snapshot.position),
        &mut buf,
    ) {
        log_send_failure(POSITION_ADDRESS, &e);
    }
    Ok(())
}
