//! UDP socket ownership for the outbound peer and the inbound listener
//!
//! Reconnects are never attempted in the background. They happen inline, once,
//! when the host re-prepares the audio callback or when an immediate send fails.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::RwLock;

use crate::config::{InboundConfig, OutboundConfig};

/// Error type for socket operations
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid target address {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Failed to connect UDP socket to {target}: {source}")]
    Connect { target: String, source: io::Error },

    #[error("Failed to configure UDP socket: {0}")]
    Configure(#[source] io::Error),

    #[error("Outbound socket is not connected")]
    NotConnected,

    #[error("Failed to send datagram: {0}")]
    Send(#[source] io::Error),

    #[error("Short send: {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },
}

/// Outbound connection state for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected { port: u16 },
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { port } => write!(f, "Connected to Port {}", port),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Owns the outbound socket and the inbound listen state
pub struct ConnectionManager {
    outbound: OutboundConfig,
    inbound: InboundConfig,
    /// `None` while disconnected
    socket: RwLock<Option<UdpSocket>>,
    connected: AtomicBool,
    /// Connected peer port, 0 when disconnected
    port: AtomicU16,
    listening: AtomicBool,
    /// Actually bound listen port, 0 when not listening
    listen_port: AtomicU16,
}

impl ConnectionManager {
    /// Create the manager and attempt the initial outbound connection
    ///
    /// Never fails: a failed connect is logged and leaves the manager in a
    /// disconnected state where sends are rejected.
    pub fn new(outbound: OutboundConfig, inbound: InboundConfig) -> Self {
        let manager = Self {
            outbound,
            inbound,
            socket: RwLock::new(None),
            connected: AtomicBool::new(false),
            port: AtomicU16::new(0),
            listening: AtomicBool::new(false),
            listen_port: AtomicU16::new(0),
        };
        let _ = manager.reconnect();
        manager
    }

    /// (Re)open the outbound socket to the configured peer
    pub fn reconnect(&self) -> Result<(), ConnectionError> {
        let target = format!("{}:{}", self.outbound.host, self.outbound.port);

        match open_outbound(&self.outbound) {
            Ok(socket) => {
                if let Ok(mut slot) = self.socket.write() {
                    *slot = Some(socket);
                }
                self.connected.store(true, Ordering::Relaxed);
                self.port.store(self.outbound.port, Ordering::Relaxed);
                log::info!("OSC: Sender connected to {}", target);
                Ok(())
            }
            Err(e) => {
                if let Ok(mut slot) = self.socket.write() {
                    *slot = None;
                }
                self.connected.store(false, Ordering::Relaxed);
                self.port.store(0, Ordering::Relaxed);
                log::error!("OSC: Sender failed to connect to {}: {}", target, e);
                Err(e)
            }
        }
    }

    /// Close the outbound socket; sends fail until the next `reconnect`
    pub fn disconnect(&self) {
        if let Ok(mut slot) = self.socket.write() {
            if slot.take().is_some() {
                log::info!("OSC: Sender disconnected");
            }
        }
        self.connected.store(false, Ordering::Relaxed);
        self.port.store(0, Ordering::Relaxed);
    }

    /// Send one datagram to the peer
    pub fn send(&self, datagram: &[u8]) -> Result<(), ConnectionError> {
        let slot = self.socket.read().map_err(|_| ConnectionError::NotConnected)?;
        let socket = slot.as_ref().ok_or(ConnectionError::NotConnected)?;

        let sent = socket.send(datagram).map_err(ConnectionError::Send)?;
        if sent != datagram.len() {
            return Err(ConnectionError::ShortSend {
                sent,
                len: datagram.len(),
            });
        }
        Ok(())
    }

    /// Check if the last connect attempt succeeded
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Peer port, or 0 when disconnected
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.is_connected() {
            ConnectionStatus::Connected { port: self.port() }
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Bind the inbound socket
    ///
    /// The returned socket has a read timeout so its owner can poll a stop flag.
    pub fn listen(&self) -> Result<UdpSocket, ConnectionError> {
        let addr = format!("{}:{}", self.inbound.bind_address, self.inbound.port);
        let socket = UdpSocket::bind(addr.as_str()).map_err(|source| {
            log::error!("OSC: Receiver failed to bind {}: {}", addr, source);
            ConnectionError::Bind {
                addr: addr.clone(),
                source,
            }
        })?;
        socket
            .set_read_timeout(Some(self.inbound.read_timeout()))
            .map_err(ConnectionError::Configure)?;

        let port = socket
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(self.inbound.port);
        self.listen_port.store(port, Ordering::Relaxed);
        self.listening.store(true, Ordering::Relaxed);
        log::info!("OSC: Receiver listening on port {}", port);

        Ok(socket)
    }

    /// Mark the inbound socket as closed (the receiver thread owns and drops it)
    pub fn stop_listening(&self) {
        if self.listening.swap(false, Ordering::Relaxed) {
            log::info!("OSC: Receiver stopped listening on port {}", self.listen_port());
        }
        self.listen_port.store(0, Ordering::Relaxed);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Bound listen port, or 0 when not listening
    pub fn listen_port(&self) -> u16 {
        self.listen_port.load(Ordering::Relaxed)
    }
}

fn open_outbound(outbound: &OutboundConfig) -> Result<UdpSocket, ConnectionError> {
    let target_str = format!("{}:{}", outbound.host, outbound.port);
    let target: SocketAddr = (outbound.host.as_str(), outbound.port)
        .to_socket_addrs()
        .map_err(|e| ConnectionError::InvalidTarget {
            target: target_str.clone(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| ConnectionError::InvalidTarget {
            target: target_str.clone(),
            reason: "no addresses resolved".to_string(),
        })?;

    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local).map_err(|source| ConnectionError::Bind {
        addr: local.to_string(),
        source,
    })?;
    socket
        .connect(target)
        .map_err(|source| ConnectionError::Connect {
            target: target_str,
            source,
        })?;

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_inbound() -> InboundConfig {
        InboundConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            read_timeout_ms: 20,
        }
    }

    #[test]
    fn test_connect_and_send_to_peer() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let peer_port = peer.local_addr().unwrap().port();

        let manager = ConnectionManager::new(
            OutboundConfig {
                host: "127.0.0.1".to_string(),
                port: peer_port,
            },
            local_inbound(),
        );
        assert!(manager.is_connected());
        assert_eq!(manager.port(), peer_port);
        assert_eq!(
            manager.status().to_string(),
            format!("Connected to Port {}", peer_port)
        );

        manager.send(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let n = peer.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_disconnect_then_reconnect() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let peer_port = peer.local_addr().unwrap().port();
        let manager = ConnectionManager::new(
            OutboundConfig {
                host: "127.0.0.1".to_string(),
                port: peer_port,
            },
            local_inbound(),
        );

        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(matches!(manager.send(b"x"), Err(ConnectionError::NotConnected)));

        manager.reconnect().unwrap();
        assert_eq!(manager.port(), peer_port);
        manager.send(b"back").unwrap();
        let mut buf = [0u8; 16];
        let n = peer.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"back");
    }

    #[test]
    fn test_unresolvable_host_is_disconnected() {
        let manager = ConnectionManager::new(
            OutboundConfig {
                host: "invalid host name".to_string(),
                port: 8000,
            },
            local_inbound(),
        );
        assert!(!manager.is_connected());
        assert_eq!(manager.port(), 0);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(matches!(
            manager.send(b"x"),
            Err(ConnectionError::NotConnected)
        ));
    }

    #[test]
    fn test_listen_lifecycle() {
        let manager = ConnectionManager::new(OutboundConfig::default(), local_inbound());
        assert!(!manager.is_listening());

        let socket = manager.listen().unwrap();
        assert!(manager.is_listening());
        assert_eq!(manager.listen_port(), socket.local_addr().unwrap().port());
        assert_ne!(manager.listen_port(), 0);

        manager.stop_listening();
        assert!(!manager.is_listening());
        assert_eq!(manager.listen_port(), 0);
    }

    #[test]
    fn test_listen_conflict_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let manager = ConnectionManager::new(
            OutboundConfig::default(),
            InboundConfig {
                port,
                ..local_inbound()
            },
        );
        assert!(matches!(manager.listen(), Err(ConnectionError::Bind { .. })));
        assert!(!manager.is_listening());
    }
}
