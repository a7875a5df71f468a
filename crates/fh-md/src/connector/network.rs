//! TCP transport.
//!
//! `prepare` resolves the endpoint and allocates a socket, `establish`
//! connects within the connect timeout, and every read is bounded by the
//! heartbeat timeout (applied by the job driver through
//! [`Transport::read_timeout`]), so a silent peer ends the connection instead
//! of hanging it forever.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use fh_core::FeedError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, warn};

use super::Transport;

/// TCP client transport with connect and heartbeat timeouts.
pub struct NetworkTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    heartbeat_timeout: Duration,
    /// Resolved address and the socket allocated for it, set by `prepare`.
    pending: Option<(SocketAddr, TcpSocket)>,
    stream: Option<TcpStream>,
}

impl NetworkTransport {
    pub fn new(host: String, port: u16, connect_timeout: Duration, heartbeat_timeout: Duration) -> Self {
        Self { host, port, connect_timeout, heartbeat_timeout, pending: None, stream: None }
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn prepare(&mut self) -> Result<(), FeedError> {
        let addr = tokio::net::lookup_host((self.host.as_str(), self.port)).await?.next().ok_or_else(|| {
            FeedError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} resolved to no addresses", self.describe()),
            ))
        })?;
        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        debug!("allocated socket for {addr}");
        self.pending = Some((addr, socket));
        Ok(())
    }

    async fn establish(&mut self) -> Result<(), FeedError> {
        let (addr, socket) = self.pending.take().ok_or_else(|| {
            FeedError::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "establish called before prepare"))
        })?;
        let stream = match tokio::time::timeout(self.connect_timeout, socket.connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(FeedError::ConnectTimeout { target: self.describe(), timeout: self.connect_timeout }),
        };
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FeedError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "socket not open")))?;
        Ok(stream.read(buf).await?)
    }

    fn read_timeout(&self) -> Option<Duration> {
        Some(self.heartbeat_timeout)
    }

    async fn end(&mut self) {
        self.pending = None;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("error closing socket to {}: {e}", self.describe());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn stalled_handshake_is_a_connect_timeout() {
        let Some((_listener, addr, _held)) = crate::connector::testing::saturated_listener().await else {
            eprintln!("loopback handshakes do not stall here, skipping");
            return;
        };

        let timeout = Duration::from_millis(100);
        let mut t = NetworkTransport::new("127.0.0.1".into(), addr.port(), timeout, Duration::from_secs(60));
        t.prepare().await.unwrap();
        let started = std::time::Instant::now();
        match t.establish().await {
            Err(FeedError::ConnectTimeout { target, timeout: waited }) => {
                assert_eq!(target, format!("127.0.0.1:{}", addr.port()));
                assert_eq!(waited, timeout);
            }
            other => panic!("expected connect timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= timeout);
        t.end().await;
    }

    #[tokio::test]
    async fn establish_before_prepare_is_an_error() {
        let mut t = NetworkTransport::new("127.0.0.1".into(), 1, Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(t.establish().await, Err(FeedError::Io(_))));
    }

    #[tokio::test]
    async fn reads_from_connected_peer_and_ends_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hello").await.unwrap();
        });

        let mut t = NetworkTransport::new("127.0.0.1".into(), port, Duration::from_secs(5), Duration::from_secs(5));
        assert_eq!(t.describe(), format!("127.0.0.1:{port}"));
        assert_eq!(t.read_timeout(), Some(Duration::from_secs(5)));
        t.prepare().await.unwrap();
        t.establish().await.unwrap();

        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        loop {
            let n = t.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"hello");

        t.end().await;
        t.end().await;
        assert!(t.read(&mut buf).await.is_err());
    }
}
