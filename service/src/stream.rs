//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Client-side stream plumbing
//!
//! [`ClientStream`] is the plain-or-TLS socket a client arrives on.
//! [`ByteChannel`] abstracts over framing so the bridge relays the same way
//! whether payload arrives as raw TCP bytes ([`RawChannel`]) or WebSocket
//! messages ([`WsChannel`]).

use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::{Error as WsError, error::ProtocolError};

const READ_BUFFER_SIZE: usize = 8192;

/// A client TCP stream, optionally wrapped in server-side TLS
pub enum ClientStream {
    /// Plaintext TCP
    Plain(TcpStream),
    /// TLS-terminated TCP
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientStream {
    /// Get the peer address of the underlying socket
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            ClientStream::Plain(stream) => stream.peer_addr(),
            ClientStream::Tls(stream) => stream.get_ref().0.peer_addr(),
        }
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientStream::Plain(_) => write!(f, "ClientStream::Plain"),
            ClientStream::Tls(_) => write!(f, "ClientStream::Tls"),
        }
    }
}

/// Stream wrapper replaying bytes consumed while sniffing the request head
#[derive(Debug)]
pub(crate) struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    pub(crate) fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let count = std::cmp::min(this.prefix.len(), buf.remaining());
            buf.put_slice(&this.prefix.split_to(count));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Framing-agnostic view of the client side of a bridge
///
/// `recv` futures must be cancel safe; the bridge polls them inside a
/// `select!` loop and drops them between iterations.
#[async_trait]
pub trait ByteChannel: Send {
    /// Receive the next chunk of payload bytes, `None` on orderly close
    async fn recv(&mut self) -> Result<Option<Bytes>>;

    /// Send a chunk of payload bytes to the client
    async fn send(&mut self, data: Bytes) -> Result<()>;

    /// Periodic liveness check; the default does nothing
    async fn keepalive(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the channel, best effort, with an optional reason for the peer
    async fn close(&mut self, reason: Option<&str>) -> Result<()>;
}

/// Byte channel over an unframed socket
#[derive(Debug)]
pub struct RawChannel<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S> RawChannel<S> {
    /// Wrap a socket
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }
}

#[async_trait]
impl<S> ByteChannel for RawChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        self.buffer.reserve(READ_BUFFER_SIZE);
        let count = self.stream.read_buf(&mut self.buffer).await?;
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(self.buffer.split().freeze()))
    }

    async fn send(&mut self, data: Bytes) -> Result<()> {
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self, reason: Option<&str>) -> Result<()> {
        if let Some(reason) = reason {
            let _ = self
                .stream
                .write_all(format!("[{reason}]\r\n").as_bytes())
                .await;
        }
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Byte channel over WebSocket framing
///
/// Text and binary frames both surface as raw bytes. Pings are answered
/// inline; pongs refresh the heartbeat deadline checked by `keepalive`.
#[derive(Debug)]
pub struct WsChannel<S> {
    ws: WebSocketStream<S>,
    max_message_size: usize,
    ping_timeout: Duration,
    last_pong: Instant,
}

impl<S> WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an accepted WebSocket stream
    pub fn new(ws: WebSocketStream<S>, max_message_size: usize, ping_timeout: Duration) -> Self {
        Self {
            ws,
            max_message_size,
            ping_timeout,
            last_pong: Instant::now(),
        }
    }
}

/// Errors that mean the peer went away rather than a real failure
fn is_disconnect(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[async_trait]
impl<S> ByteChannel for WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        loop {
            let message = match self.ws.next().await {
                None => return Ok(None),
                Some(Err(err)) if is_disconnect(&err) => return Ok(None),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(message)) => message,
            };
            let mut data: Bytes = match message {
                Message::Binary(data) => data,
                Message::Text(text) => Bytes::from(text),
                Message::Ping(payload) => {
                    self.ws.send(Message::Pong(payload)).await?;
                    continue;
                }
                Message::Pong(_) => {
                    self.last_pong = Instant::now();
                    continue;
                }
                Message::Close(_) => return Ok(None),
                Message::Frame(_) => continue,
            };
            if data.len() > self.max_message_size {
                tracing::warn!(
                    size = data.len(),
                    limit = self.max_message_size,
                    "oversized client message truncated"
                );
                data.truncate(self.max_message_size);
            }
            return Ok(Some(data));
        }
    }

    async fn send(&mut self, data: Bytes) -> Result<()> {
        self.ws.send(Message::Binary(data)).await?;
        Ok(())
    }

    async fn keepalive(&mut self) -> Result<()> {
        if self.last_pong.elapsed() > self.ping_timeout {
            return Err(BridgeError::HeartbeatTimeout);
        }
        self.ws.send(Message::Ping(Bytes::new())).await?;
        Ok(())
    }

    async fn close(&mut self, reason: Option<&str>) -> Result<()> {
        let frame = reason.map(|reason| CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        });
        match self.ws.close(frame).await {
            Ok(()) => Ok(()),
            Err(err) if is_disconnect(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
