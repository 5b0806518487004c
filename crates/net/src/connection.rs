//! One framed TCP connection.

use crate::NetError;
use futures::{SinkExt, StreamExt};
use ringkv_proto::{FrameCodec, Message, Source, StatusType};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// A TCP stream wrapped in the frame codec.
///
/// Callers enforce one request in flight: [`Connection::request`] writes a
/// frame and reads exactly one frame back.
#[derive(Debug)]
pub struct Connection {
    framed: Framed<TcpStream, FrameCodec>,
    peer: String,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: impl Into<String>) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed: {}", e);
        }
        Self {
            framed: Framed::new(stream, FrameCodec),
            peer: peer.into(),
        }
    }

    /// Open a connection to `addr`, giving up after `timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, NetError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetError::Timeout(format!("connect to {}", addr)))??;
        Ok(Self::new(stream, addr))
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), NetError> {
        self.framed.send(msg).await?;
        Ok(())
    }

    /// Next frame, or `None` when the peer closed cleanly.
    pub async fn recv(&mut self) -> Result<Option<Message>, NetError> {
        Ok(self.framed.next().await.transpose()?)
    }

    /// Send `msg` and wait for the single reply.
    pub async fn request(&mut self, msg: &Message, timeout: Duration) -> Result<Message, NetError> {
        let peer = self.peer.clone();
        tokio::time::timeout(timeout, async {
            self.send(msg).await?;
            self.recv().await?.ok_or(NetError::Closed)
        })
        .await
        .map_err(|_| NetError::Timeout(format!("{} to {}", msg.status, peer)))?
    }

    /// Send the classifying IDENTIFY frame. Controller and client
    /// connections get a greeting back; server connections do not.
    pub async fn identify(
        &mut self,
        source: Source,
        timeout: Duration,
    ) -> Result<Option<Message>, NetError> {
        let hello = Message::empty(source, StatusType::Identify);
        match source {
            Source::Server => {
                self.send(&hello).await?;
                Ok(None)
            }
            Source::Ecs | Source::Client => {
                let greeting = self.request(&hello, timeout).await?;
                if greeting.status != StatusType::Info {
                    let reason = greeting
                        .first()
                        .and_then(|kv| kv.value_str())
                        .unwrap_or_default()
                        .to_string();
                    return Err(NetError::Rejected(format!("{}: {}", greeting.status, reason)));
                }
                Ok(Some(greeting))
            }
        }
    }
}
