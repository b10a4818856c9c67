//! TCP transport
//!
//! Each exchange opens a fresh connection, writes the request in one go,
//! performs a single bounded read and closes the socket. Meters answer one
//! request per connection.

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

use super::{Progress, Transport};
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_IO_TIMEOUT_SECS, DEFAULT_METER_PORT,
    DEFAULT_READ_BUFFER_SIZE,
};
use crate::error::{EmopError, Phase, Result};

/// Socket parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSettings {
    pub connect_timeout: Duration,
    /// Applies to both the write and the read
    pub io_timeout: Duration,
    /// Upper bound of the single read
    pub read_buffer_size: usize,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Blocking TCP transport to one meter
///
/// # Example
///
/// ```ignore
/// let mut transport = TcpTransport::new("10.0.0.5", 8080);
/// let reply = transport.exchange(&request_bytes)?;
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    settings: TcpSettings,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_settings(host, port, TcpSettings::default())
    }

    pub fn with_settings(host: impl Into<String>, port: u16, settings: TcpSettings) -> Self {
        Self {
            host: host.into(),
            port,
            settings,
        }
    }

    /// Meter on the default modem port
    pub fn default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_METER_PORT)
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }

    fn error(&self, phase: Phase, source: std::io::Error) -> EmopError {
        EmopError::Transport {
            endpoint: self.endpoint(),
            phase,
            source,
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.error(Phase::Connect, e))?
            .collect();

        let mut last_err = std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "host resolved to no addresses",
        );
        for addr in addrs {
            match self.connect_addr(addr) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    trace!("connect to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }
        Err(self.error(Phase::Connect, last_err))
    }

    fn connect_addr(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        socket.connect_timeout(&addr.into(), self.settings.connect_timeout)?;
        socket.set_read_timeout(Some(self.settings.io_timeout))?;
        socket.set_write_timeout(Some(self.settings.io_timeout))?;
        Ok(socket.into())
    }
}

impl Transport for TcpTransport {
    fn exchange_with(
        &mut self,
        request: &[u8],
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Bytes> {
        // Dropped on every return path, which closes the connection
        let mut stream = self.connect()?;
        debug!("connected");
        progress(Progress::Connected);

        progress(Progress::Sending);

        stream
            .write_all(request)
            .and_then(|_| stream.flush())
            .map_err(|e| self.error(Phase::Send, e))?;
        debug!(request = %hex::encode(request), "sent");
        progress(Progress::AwaitingResponse);

        let mut buf = vec![0u8; self.settings.read_buffer_size];
        let len = stream
            .read(&mut buf)
            .map_err(|e| self.error(Phase::Receive, e))?;
        buf.truncate(len);
        debug!(response = %hex::encode(&buf), "received");

        Ok(Bytes::from(buf))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_default_settings() {
        let settings = TcpSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.io_timeout, Duration::from_secs(10));
        assert_eq!(settings.read_buffer_size, 128);
    }

    #[test]
    fn test_endpoint_label() {
        assert_eq!(TcpTransport::default_port("10.1.2.3").endpoint(), "10.1.2.3:8080");
    }

    #[test]
    fn test_exchange_against_echo_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = conn.read(&mut buf).unwrap();
            conn.write_all(&buf[..n]).unwrap();
        });

        let mut transport = TcpTransport::new("127.0.0.1", port);
        let mut seen = Vec::new();
        let reply = transport
            .exchange_with(&[0x7e, 0x01, 0x02], &mut |p| seen.push(p))
            .unwrap();
        assert_eq!(&reply[..], &[0x7e, 0x01, 0x02]);
        assert_eq!(
            seen,
            [Progress::Connected, Progress::Sending, Progress::AwaitingResponse]
        );
        server.join().unwrap();
    }

    #[test]
    fn test_refused_connection_reports_connect_phase() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut transport = TcpTransport::new("127.0.0.1", port);
        let mut seen = Vec::new();
        match transport.exchange_with(&[0x7e], &mut |p| seen.push(p)) {
            Err(EmopError::Transport { phase, .. }) => assert_eq!(phase, Phase::Connect),
            other => panic!("expected connect failure, got {:?}", other),
        }
        assert!(seen.is_empty());
    }

    #[test]
    fn test_read_is_bounded_by_buffer_size() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 8];
            let _ = conn.read(&mut buf).unwrap();
            conn.write_all(&[0xaa; 32]).unwrap();
        });

        let settings = TcpSettings {
            read_buffer_size: 16,
            ..TcpSettings::default()
        };
        let mut transport = TcpTransport::with_settings("127.0.0.1", port, settings);
        let reply = transport.exchange(&[0x00]).unwrap();
        assert!(reply.len() <= 16);
        server.join().unwrap();
    }
}
