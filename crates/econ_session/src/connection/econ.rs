//! Econ remote console connection.
//!
//! The econ protocol is line based text over TCP. After connecting the server
//! prompts for a password and confirms or rejects it with a plain text line.
//! Framing is done by [`EconCodec`](super::codec::EconCodec).

use super::codec::EconCodec;
use crate::error::BridgeError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info};

const PASSWORD_PROMPT: &str = "Enter password";
const AUTH_SUCCESS: &str = "Authentication successful";
const AUTH_FAILURE: &str = "Wrong password";

type EconTransport = Framed<TcpStream, EconCodec>;

/// An authenticated econ connection.
pub struct EconConnection {
    address: String,
    transport: EconTransport,
}

impl EconConnection {
    /// Dials `address`, answers the password prompt and waits for the
    /// authentication result. The whole exchange is bounded by `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] if the server is unreachable, rejects
    /// the password, closes the connection, or does not answer in time.
    pub async fn connect(address: &str, password: &str, connect_timeout: Duration) -> Result<Self, BridgeError> {
        timeout(connect_timeout, Self::handshake(address, password))
            .await
            .map_err(|_| BridgeError::Connection(format!("timed out connecting to {address}")))?
    }

    async fn handshake(address: &str, password: &str) -> Result<Self, BridgeError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| BridgeError::Connection(format!("failed to connect to {address}: {e}")))?;
        let mut transport = Framed::new(stream, EconCodec::new());

        let mut prompted = false;
        while let Some(line) = transport.next().await {
            let line = line.map_err(|e| BridgeError::Connection(format!("{address}: {e}")))?;
            debug!("econ handshake {}: {}", address, line);

            if !prompted && line.contains(PASSWORD_PROMPT) {
                transport
                    .send(password.to_string())
                    .await
                    .map_err(|e| BridgeError::Connection(format!("{address}: {e}")))?;
                prompted = true;
            } else if prompted && line.contains(AUTH_SUCCESS) {
                info!("🔗 Authenticated econ connection to {}", address);
                return Ok(Self {
                    address: address.to_string(),
                    transport,
                });
            } else if line.contains(AUTH_FAILURE) {
                return Err(BridgeError::Connection(format!("{address}: wrong password")));
            }
        }

        Err(BridgeError::Connection(format!(
            "{address}: connection closed during authentication"
        )))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Splits the connection into independently owned reader and writer.
    pub fn split(self) -> (EconReader, EconWriter) {
        let (sink, stream) = self.transport.split();
        (
            EconReader {
                address: self.address.clone(),
                stream,
            },
            EconWriter {
                address: self.address,
                sink,
            },
        )
    }
}

/// Read half of an econ connection.
pub struct EconReader {
    address: String,
    stream: SplitStream<EconTransport>,
}

impl EconReader {
    /// Reads the next line. `Ok(None)` means the server closed the connection.
    pub async fn read_line(&mut self) -> Result<Option<String>, BridgeError> {
        match self.stream.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(BridgeError::ProtocolRead(format!("{}: {}", self.address, e))),
            None => Ok(None),
        }
    }
}

/// Write half of an econ connection.
pub struct EconWriter {
    address: String,
    sink: SplitSink<EconTransport, String>,
}

impl EconWriter {
    /// Writes one command line.
    pub async fn write_line(&mut self, line: &str) -> Result<(), BridgeError> {
        self.sink
            .send(line.to_string())
            .await
            .map_err(|e| BridgeError::Connection(format!("{}: write failed: {}", self.address, e)))
    }

    /// Flushes and closes the write half.
    pub async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("closing econ writer of {}: {}", self.address, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::codec::MAX_LINE_LENGTH;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn fake_server(password: &'static str) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        fake_server_sending(password, b"[server]: hello\n").await
    }

    async fn fake_server_sending(
        password: &'static str,
        greeting: &'static [u8],
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            write.write_all(b"Enter password:\n").await.unwrap();
            let attempt = lines.next_line().await.unwrap().unwrap_or_default();
            if attempt == password {
                write
                    .write_all(b"Authentication successful. External console access granted.\n")
                    .await
                    .unwrap();
            } else {
                write.write_all(b"Wrong password. Remaining attempts: 2.\n").await.unwrap();
                return Vec::new();
            }
            write.write_all(greeting).await.unwrap();

            let mut received = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                received.push(line);
            }
            received
        });
        (address, handle)
    }

    #[tokio::test]
    async fn test_connect_read_and_write() {
        let (address, server) = fake_server("secret").await;
        let conn = EconConnection::connect(&address, "secret", Duration::from_secs(5))
            .await
            .unwrap();
        let (mut reader, mut writer) = conn.split();

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("[server]: hello"));
        writer.write_line("status").await.unwrap();
        writer.close().await;
        drop(reader);

        assert_eq!(server.await.unwrap(), vec!["status"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_the_connection() {
        let greeting = b"[chat]: 1:-2:Foo\xff: hi\n[chat]: 1:-2:Bar: ok\n";
        let (address, _server) = fake_server_sending("secret", greeting).await;
        let conn = EconConnection::connect(&address, "secret", Duration::from_secs(5))
            .await
            .unwrap();
        let (mut reader, _writer) = conn.split();

        let first = reader.read_line().await.unwrap().unwrap();
        assert!(first.starts_with("[chat]: 1:-2:Foo\u{FFFD}"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("[chat]: 1:-2:Bar: ok"));
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped_by_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"Enter password:\n").await.unwrap();
            let mut lines = BufReader::new(&mut socket).lines();
            lines.next_line().await.unwrap();
            drop(lines);
            socket.write_all(b"Authentication successful.\n").await.unwrap();
            let mut long = vec![b'x'; MAX_LINE_LENGTH * 2];
            long.push(b'\n');
            socket.write_all(&long).await.unwrap();
            socket.write_all(b"[server]: after\n").await.unwrap();
            // keep the socket open until the client hangs up
            let _ = socket.read(&mut [0u8; 16]).await;
        });

        let conn = EconConnection::connect(&address, "secret", Duration::from_secs(5))
            .await
            .unwrap();
        let (mut reader, _writer) = conn.split();
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("[server]: after"));
    }

    #[tokio::test]
    async fn test_wrong_password_is_connection_error() {
        let (address, _server) = fake_server("secret").await;
        let err = EconConnection::connect(&address, "nope", Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::Connection(ref msg) if msg.contains("wrong password")));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = EconConnection::connect(&address, "x", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(BridgeError::Connection(_))));
    }
}
