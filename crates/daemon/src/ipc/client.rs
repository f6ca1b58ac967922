//! Client side of the request socket.
//!
//! Used by the CLI's `--remote` mode to send one request to a running
//! `pagekeep serve` and wait for its answer.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::{Envelope, Message};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::server::IpcError;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A client connected to a running server.
pub struct IpcClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    timeout: Duration,
    next_sequence: u64,
}

impl IpcClient {
    /// Connect to the server at the specified socket path.
    ///
    /// Fails when nothing is listening, which usually means `pagekeep
    /// serve` is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(stream, Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
    }

    /// Connect with a custom timeout for the connection and every request.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))??;
        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
            next_sequence: 1,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request and wait for the response payload.
    ///
    /// Error responses are returned as `Message::Error`, not as `Err`;
    /// `Err` means the exchange itself failed.
    pub async fn request(&mut self, message: Message) -> Result<Message, IpcError> {
        tokio::time::timeout(self.timeout, self.request_internal(message))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "operation timed out"))?
    }

    async fn request_internal(&mut self, message: Message) -> Result<Message, IpcError> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut json = Envelope::new(sequence, message).to_json()?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "server closed connection").into());
        }

        let response = Envelope::from_json(line.trim())?;
        if response.sequence != sequence {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "response sequence {} does not match request {}",
                    response.sequence, sequence
                ),
            )
            .into());
        }
        Ok(response.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::IpcServer;
    use protocol::messages::{CheckExtensionRequest, ExtensionChecked};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_client_connect_fails_when_server_not_running() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("nonexistent.sock");

        let result = IpcClient::connect(&socket_path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_client_request() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let request = conn.read_envelope().await.unwrap().unwrap();
            assert_eq!(request.sequence, 1);
            assert!(matches!(request.payload, Message::CheckExtension(_)));
            let reply = Envelope::new(
                request.sequence,
                Message::ExtensionChecked(ExtensionChecked {
                    extension: "png".to_string(),
                }),
            );
            conn.send_envelope(&reply).await.unwrap();
        });

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let response = client
            .request(Message::CheckExtension(CheckExtensionRequest {
                filename: "a.png".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(
            response,
            Message::ExtensionChecked(ExtensionChecked {
                extension: "png".to_string()
            })
        );

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_rejects_mismatched_sequence() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let request = conn.read_envelope().await.unwrap().unwrap();
            let reply = Envelope::new(request.sequence + 41, Message::ListPages);
            conn.send_envelope(&reply).await.unwrap();
        });

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        assert!(client.request(Message::ListPages).await.is_err());

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_timeout() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        // Server that never responds
        let _server_handle = tokio::spawn(async move {
            let _conn = server.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut client =
            IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
                .await
                .unwrap();

        assert!(client.request(Message::ListPages).await.is_err());
    }
}
