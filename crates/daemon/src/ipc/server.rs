//! Socket server answering protocol envelopes.
//!
//! Each accepted connection gets its own tokio task. Requests on one
//! connection are answered in order; separate connections run concurrently.

use std::io;
use std::path::Path;

use protocol::messages::ErrorMessage;
use protocol::{Envelope, ErrorKind, Message, ProtocolError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::router::MessageRouter;

/// A server that listens for connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// Parent directories are created and a stale socket file at the path
    /// is removed first.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "Listening for requests");

        Ok(Self { listener })
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }

    /// Accept connections forever, answering each on its own task.
    ///
    /// Only returns when accepting fails.
    pub async fn serve(&self, router: MessageRouter) -> Result<(), io::Error> {
        loop {
            let conn = self.accept().await?;
            let router = router.clone();
            tokio::spawn(async move {
                if let Err(e) = conn.serve(router).await {
                    warn!(error = %e, "Connection closed with error");
                }
            });
        }
    }
}

/// A connection to a single client.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the next envelope from the client.
    ///
    /// Returns `None` if the client has disconnected.
    pub async fn read_envelope(&mut self) -> Result<Option<Envelope>, IpcError> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        Ok(Some(Envelope::from_json(line.trim())?))
    }

    /// Send an envelope to the client.
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), IpcError> {
        let mut json = envelope.to_json()?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Answer requests until the client disconnects.
    ///
    /// A line that does not parse is answered with an `invalid_request`
    /// error on sequence 0 and the connection stays open.
    pub async fn serve(mut self, router: MessageRouter) -> Result<(), IpcError> {
        loop {
            match self.read_envelope().await {
                Ok(Some(envelope)) => {
                    if let Some(response) = router.handle(envelope).await {
                        self.send_envelope(&response).await?;
                    }
                }
                Ok(None) => {
                    debug!("Client disconnected");
                    return Ok(());
                }
                Err(IpcError::Protocol(e)) => {
                    warn!(error = %e, "Malformed request line");
                    let reply = Envelope::new(
                        0,
                        Message::Error(ErrorMessage {
                            kind: ErrorKind::InvalidRequest,
                            message: e.to_string(),
                            context: None,
                            recoverable: false,
                        }),
                    );
                    self.send_envelope(&reply).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Errors that can occur on the socket.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A line could not be encoded or decoded as an envelope.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
