//! Per-connection workers
//!
//! Every upgraded socket gets two loops: inbound reads and dispatches client
//! frames, outbound is the only writer to the socket. They share nothing but
//! the [`ConnectionHandle`]; whichever notices the peer is gone first calls
//! [`Hub::unregister`], and the other observes `closed()` and exits.

use std::future::Future;
use std::sync::Arc;

use actix_ws::{Message, ProtocolError};
use async_trait::async_trait;
use bytes::Bytes;
use bytestring::ByteString;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};

use super::{ChannelId, ClientFrame, ConnectionHandle, Hub, Mailbox, ServerFrame};
use crate::middleware::auth::ChannelAccess;

/// Pongs queued from the reader for the writer
const CONTROL_QUEUE: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("read deadline expired")]
    ReadTimeout,

    #[error("write deadline expired")]
    WriteTimeout,

    #[error("socket closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("inbound frame exceeds size limit")]
    FrameTooLarge,
}

/// Socket frames the reader asks the writer to emit
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Control {
    Pong(Bytes),
}

/// Write half of a client socket
#[async_trait(?Send)]
pub trait FrameSink {
    /// Text frame when `payload` is UTF-8, binary otherwise
    async fn send_payload(&mut self, payload: &Bytes) -> Result<(), ConnectionError>;
    async fn send_ping(&mut self) -> Result<(), ConnectionError>;
    async fn send_pong(&mut self, payload: &[u8]) -> Result<(), ConnectionError>;
    async fn close(&mut self);
}

#[async_trait(?Send)]
impl FrameSink for actix_ws::Session {
    async fn send_payload(&mut self, payload: &Bytes) -> Result<(), ConnectionError> {
        let sent = match ByteString::try_from(payload.clone()) {
            Ok(text) => self.text(text).await,
            Err(_) => self.binary(payload.clone()).await,
        };
        sent.map_err(|_| ConnectionError::Closed)
    }

    async fn send_ping(&mut self) -> Result<(), ConnectionError> {
        self.ping(b"").await.map_err(|_| ConnectionError::Closed)
    }

    async fn send_pong(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        self.pong(payload).await.map_err(|_| ConnectionError::Closed)
    }

    async fn close(&mut self) {
        let _ = self.clone().close(None).await;
    }
}

/// One verified client attached to the hub
#[derive(Clone)]
pub struct Connection {
    hub: Hub,
    handle: Arc<ConnectionHandle>,
    access: Arc<dyn ChannelAccess>,
}

impl Connection {
    pub fn new(hub: Hub, handle: Arc<ConnectionHandle>, access: Arc<dyn ChannelAccess>) -> Self {
        Self {
            hub,
            handle,
            access,
        }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Spawn the inbound and outbound loops on the current actix worker
    pub fn start(
        self,
        mailbox: Mailbox,
        session: actix_ws::Session,
        stream: actix_ws::MessageStream,
    ) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);

        let outbound = self.clone();
        actix_web::rt::spawn(async move {
            let _ = outbound.run_outbound(mailbox, control_rx, session).await;
        });
        actix_web::rt::spawn(async move {
            let _ = self.run_inbound(stream, control_tx).await;
        });
    }

    /// Read frames until the peer leaves, the deadline passes, or the hub
    /// closes the connection. Always ends by unregistering.
    pub(crate) async fn run_inbound<S>(
        &self,
        mut stream: S,
        control: mpsc::Sender<Control>,
    ) -> Result<(), ConnectionError>
    where
        S: Stream<Item = Result<Message, ProtocolError>> + Unpin,
    {
        let result = self.read_frames(&mut stream, &control).await;
        self.hub.unregister(&self.handle).await;

        match &result {
            Ok(()) => tracing::debug!(
                connection_id = %self.handle.id(),
                user_id = self.handle.user_id(),
                "inbound loop finished"
            ),
            Err(ConnectionError::ReadTimeout) => tracing::info!(
                connection_id = %self.handle.id(),
                user_id = self.handle.user_id(),
                "client missed pong deadline"
            ),
            Err(e) => tracing::warn!(
                connection_id = %self.handle.id(),
                user_id = self.handle.user_id(),
                error = %e,
                "closing connection after read failure"
            ),
        }
        result
    }

    async fn read_frames<S>(
        &self,
        stream: &mut S,
        control: &mpsc::Sender<Control>,
    ) -> Result<(), ConnectionError>
    where
        S: Stream<Item = Result<Message, ProtocolError>> + Unpin,
    {
        let pong_wait = self.hub.config().pong_wait;
        let max_frame_bytes = self.hub.config().max_frame_bytes;
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let next = tokio::select! {
                _ = self.handle.closed() => return Ok(()),
                next = timeout_at(deadline, stream.next()) => next,
            };

            let msg = match next {
                Err(_) => return Err(ConnectionError::ReadTimeout),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(ConnectionError::Protocol(e.to_string())),
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                Message::Pong(_) => {
                    deadline = Instant::now() + pong_wait;
                }
                Message::Ping(bytes) => {
                    // Writer busy or gone; the peer will ping again
                    let _ = control.try_send(Control::Pong(bytes));
                }
                Message::Text(text) => {
                    if text.len() > max_frame_bytes {
                        return Err(ConnectionError::FrameTooLarge);
                    }
                    self.dispatch(text.as_bytes()).await;
                }
                Message::Binary(bytes) => {
                    if bytes.len() > max_frame_bytes {
                        return Err(ConnectionError::FrameTooLarge);
                    }
                    self.dispatch(&bytes).await;
                }
                Message::Close(reason) => {
                    tracing::debug!(
                        connection_id = %self.handle.id(),
                        ?reason,
                        "client sent close"
                    );
                    return Ok(());
                }
                Message::Continuation(_) => {
                    return Err(ConnectionError::Protocol(
                        "fragmented frames are not supported".into(),
                    ));
                }
                Message::Nop => {}
            }
        }
    }

    /// Apply one client frame. Problems go back to this client only.
    async fn dispatch(&self, raw: &[u8]) {
        let frame = match ClientFrame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.reply_error(&e.to_string());
                return;
            }
        };
        let channel = frame.channel_id();

        match frame {
            ClientFrame::Join { .. } => match channel {
                Some(channel) => self.join(channel).await,
                None => self.reply_error("channel_id required"),
            },
            ClientFrame::Leave { .. } => {
                if let Some(channel) = channel {
                    self.hub.leave(&self.handle, channel).await;
                }
            }
            ClientFrame::Typing { user_name, .. } => {
                if let Some(channel) = channel {
                    self.relay_typing(channel, user_name, true).await;
                }
            }
            ClientFrame::TypingStop { user_name, .. } => {
                if let Some(channel) = channel {
                    self.relay_typing(channel, user_name, false).await;
                }
            }
        }
    }

    async fn join(&self, channel: ChannelId) {
        if !self.access.can_join(self.handle.user_id(), channel).await {
            tracing::info!(
                connection_id = %self.handle.id(),
                user_id = self.handle.user_id(),
                channel_id = channel,
                "join refused by channel access policy"
            );
            self.reply_error("forbidden channel");
            return;
        }
        self.hub.join(&self.handle, channel).await;
    }

    async fn relay_typing(&self, channel: ChannelId, user_name: Option<String>, typing: bool) {
        let user_name = user_name.unwrap_or_default();
        self.hub
            .publish_typing(channel, self.handle.user_id(), &user_name, typing)
            .await;
    }

    fn reply_error(&self, error: &str) {
        self.handle.send(ServerFrame::Error(error).encode());
    }

    /// Drain the mailbox to the socket and keep the peer alive with pings.
    ///
    /// Exits once the hub closes the connection (after flushing what was
    /// already queued) or when a write fails or times out.
    pub(crate) async fn run_outbound<K: FrameSink>(
        &self,
        mut mailbox: Mailbox,
        mut control: mpsc::Receiver<Control>,
        mut sink: K,
    ) -> Result<(), ConnectionError> {
        let ping_period = self.hub.config().ping_period();
        let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;

                _ = self.handle.closed() => {
                    break self.flush(&mut mailbox, &mut sink).await;
                }
                Some(payload) = mailbox.recv() => {
                    if let Err(e) = self.write(sink.send_payload(&payload)).await {
                        break Err(e);
                    }
                }
                Some(Control::Pong(bytes)) = control.recv() => {
                    if let Err(e) = self.write(sink.send_pong(&bytes)).await {
                        break Err(e);
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.write(sink.send_ping()).await {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = &result {
            tracing::info!(
                connection_id = %self.handle.id(),
                user_id = self.handle.user_id(),
                error = %e,
                "write failed, dropping connection"
            );
            self.hub.unregister(&self.handle).await;
        }
        sink.close().await;
        result
    }

    /// Write whatever was queued before the close signal
    async fn flush<K: FrameSink>(
        &self,
        mailbox: &mut Mailbox,
        sink: &mut K,
    ) -> Result<(), ConnectionError> {
        mailbox.close();
        while let Some(payload) = mailbox.recv().await {
            self.write(sink.send_payload(&payload)).await?;
        }
        Ok(())
    }

    async fn write<F>(&self, write: F) -> Result<(), ConnectionError>
    where
        F: Future<Output = Result<(), ConnectionError>>,
    {
        match timeout(self.hub.config().write_wait, write).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}
