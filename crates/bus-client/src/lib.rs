//! bus-client: a minimal client for the korebus message bus.
//!
//! Handles the identification handshake and frame-level send/receive over
//! one TCP connection. The bus's integration tests drive the server with
//! this client; it is equally usable as an embedding API for bots and
//! tooling that speak the bus protocol.
//!
//! # Handshake
//! The server greets every connection with `HELLO{yourID}`. The client
//! answers with `HELLO{userAgent, privateOnly}` and is then free to send
//! and receive arbitrary messages.

use bus_protocol::{Args, CodecError, FrameParser, Value, msg, serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),
    #[error("server closed the connection")]
    Closed,
    #[error("expected {expected} from server, got {got}")]
    UnexpectedFrame { expected: String, got: String },
    #[error("server greeting carried no client id")]
    MissingClientId,
}

pub struct BusClient {
    stream: TcpStream,
    parser: FrameParser,
    client_id: Option<String>,
}

impl BusClient {
    /// Connect to a bus server. No frames are exchanged yet; call
    /// [`identify`](Self::identify) to complete the handshake.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(BusClient {
            stream,
            parser: FrameParser::new(),
            client_id: None,
        })
    }

    /// Complete the handshake: read the server greeting, learn the
    /// assigned id, and identify with `user_agent` and `private_only`.
    /// Returns the assigned client id.
    pub async fn identify(
        &mut self,
        user_agent: &str,
        private_only: bool,
    ) -> Result<String, ClientError> {
        let (message_id, args) = self.recv().await?;
        if message_id != msg::HELLO {
            return Err(ClientError::UnexpectedFrame {
                expected: msg::HELLO.to_owned(),
                got: message_id,
            });
        }
        let client_id = args
            .get("yourID")
            .and_then(Value::as_str)
            .ok_or(ClientError::MissingClientId)?
            .to_owned();
        debug!(client_id = %client_id, "server assigned id");

        let mut hello = Args::new();
        hello.insert("userAgent".to_owned(), Value::Text(user_agent.to_owned()));
        hello.insert("privateOnly".to_owned(), Value::from(private_only));
        self.send(msg::HELLO, &hello).await?;

        self.client_id = Some(client_id.clone());
        Ok(client_id)
    }

    /// The id assigned during the handshake, if identified.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Serialize and send one message.
    pub async fn send(&mut self, message_id: &str, args: &Args) -> Result<(), ClientError> {
        let frame = serialize(message_id, args)?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Receive the next message, waiting as long as it takes.
    pub async fn recv(&mut self) -> Result<(String, Args), ClientError> {
        let mut buf = [0u8; 32 * 1024];
        loop {
            if let Some(message) = self.parser.try_next()? {
                return Ok(message);
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ClientError::Closed);
            }
            self.parser.feed(&buf[..n]);
        }
    }

    /// Receive the next message, or `None` if nothing arrives within
    /// `wait`. Useful for asserting that a message was *not* delivered.
    pub async fn recv_timeout(
        &mut self,
        wait: Duration,
    ) -> Result<Option<(String, Args)>, ClientError> {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}
