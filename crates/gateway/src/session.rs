//! Connection sessions: one per attached client.
//!
//! A session runs two tasks. The read loop forwards every inbound payload to
//! the hub and is the only place that unregisters the session. The write loop
//! drains the session's outbound queue, coalescing whatever is already queued
//! into a single newline-joined frame, and pings the peer on a fixed period.
//!
//! The hub closes the outbound queue to end a session; the write loop answers
//! with a close frame. A failed write cancels the read loop.

use std::{fmt, sync::Arc, time::Duration};

use {
    futures::{Sink, SinkExt, Stream, StreamExt},
    parley_config::SessionConfig,
    parley_otp::OtpEngine,
    parley_protocol::ServerFrame,
    parley_vault::SecretStore,
    tokio::{
        sync::mpsc,
        task::JoinHandle,
        time::{self, Instant, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, SessionError},
    hub::{HubHandle, SessionEntry},
    transport::Frame,
};

/// Size and timing limits applied to every session.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_message_size: usize,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
    pub queue_capacity: usize,
}

impl From<&SessionConfig> for SessionLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            write_wait: config.write_wait(),
            queue_capacity: config.send_queue_capacity.max(1),
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Tasks backing one attached connection.
#[derive(Debug)]
pub struct Attached {
    pub conn_id: String,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// Everything a new connection needs to join the hub.
#[derive(Clone)]
pub struct Relay {
    pub hub: HubHandle,
    pub store: Arc<dyn SecretStore>,
    pub otp: Arc<OtpEngine>,
    pub limits: SessionLimits,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("hub", &self.hub)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Relay {
    pub fn new(
        hub: HubHandle,
        store: Arc<dyn SecretStore>,
        otp: Arc<OtpEngine>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            hub,
            store,
            otp,
            limits,
        }
    }

    /// Attach an upgraded connection for `client_id`.
    ///
    /// A client the secret store does not know is enrolled first: a fresh
    /// secret is minted, its provisioning descriptor is written to the
    /// connection, and the secret is persisted. The session is then
    /// registered and its read and write loops started.
    pub async fn attach<W, R, E>(
        &self,
        client_id: &str,
        alias: &str,
        mut writer: W,
        reader: R,
    ) -> Result<Attached, Error>
    where
        W: Sink<Frame> + Send + Unpin + 'static,
        W::Error: fmt::Display + Send,
        R: Stream<Item = Result<Frame, E>> + Send + Unpin + 'static,
        E: fmt::Display + Send + 'static,
    {
        let stored = self
            .store
            .lookup(client_id)
            .await
            .map_err(|e| Error::SecretLookup(format!("{e:#}")))?;

        let secret = match stored {
            Some(secret) => secret,
            None => {
                let secret = self.otp.generate_secret();
                let data = self.otp.provisioning_uri(&secret, client_id, alias)?;
                let frame = ServerFrame::Enrollment { data }.encode()?;
                send_with_deadline(&mut writer, Frame::Text(frame), self.limits.write_wait)
                    .await
                    .map_err(Error::Enrollment)?;
                if let Err(e) = self.store.store(client_id, &secret).await {
                    warn!(client_id, error = %e, "failed to persist enrolled secret");
                }
                info!(client_id, alias, "enrolled new client");
                secret
            },
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(self.limits.queue_capacity);
        let entry = SessionEntry::new(client_id, alias, secret, outbound_tx);
        let conn_id = entry.conn_id.clone();
        self.hub.register(entry);

        let shutdown = CancellationToken::new();
        let writer = tokio::spawn(write_loop(
            writer,
            outbound_rx,
            self.limits.clone(),
            shutdown.clone(),
            conn_id.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            reader,
            self.hub.clone(),
            self.limits.clone(),
            shutdown,
            conn_id.clone(),
        ));

        Ok(Attached {
            conn_id,
            reader,
            writer,
        })
    }
}

/// Flatten newlines to spaces and trim surrounding whitespace.
pub fn normalize(raw: &str) -> String {
    raw.replace('\n', " ").trim().to_string()
}

// ── Read side ────────────────────────────────────────────────────────────────

async fn read_loop<R, E>(
    mut reader: R,
    hub: HubHandle,
    limits: SessionLimits,
    shutdown: CancellationToken,
    conn_id: String,
) where
    R: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
{
    match read_frames(&mut reader, &hub, &limits, &shutdown, &conn_id).await {
        Ok(()) => debug!(conn_id, "connection closed"),
        Err(e @ SessionError::Transport(_)) => warn!(conn_id, error = %e, "read failed"),
        Err(e) => info!(conn_id, error = %e, "dropping connection"),
    }
    hub.unregister(&conn_id);
    shutdown.cancel();
}

async fn read_frames<R, E>(
    reader: &mut R,
    hub: &HubHandle,
    limits: &SessionLimits,
    shutdown: &CancellationToken,
    conn_id: &str,
) -> Result<(), SessionError>
where
    R: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
{
    // Only pongs move the deadline.
    let mut deadline = Instant::now() + limits.pong_wait;
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            next = time::timeout_at(deadline, reader.next()) => {
                next.map_err(|_| SessionError::ReadTimeout)?
            },
        };
        let frame = match next {
            None => return Ok(()),
            Some(Err(e)) => return Err(SessionError::Transport(e.to_string())),
            Some(Ok(frame)) => frame,
        };
        if frame.len() > limits.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size: frame.len(),
                limit: limits.max_message_size,
            });
        }
        match frame {
            Frame::Text(text) => hub.inbound(conn_id, normalize(&text)),
            Frame::Binary(data) => hub.inbound(conn_id, normalize(&String::from_utf8_lossy(&data))),
            Frame::Pong(_) => deadline = Instant::now() + limits.pong_wait,
            // Pings are answered by the transport.
            Frame::Ping(_) => {},
            Frame::Close => return Ok(()),
        }
    }
}

// ── Write side ───────────────────────────────────────────────────────────────

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<String>,
    limits: SessionLimits,
    shutdown: CancellationToken,
    conn_id: String,
) where
    W: Sink<Frame> + Unpin,
    W::Error: fmt::Display,
{
    match write_frames(&mut writer, &mut outbound, &limits).await {
        Ok(()) => debug!(conn_id, "outbound queue closed"),
        Err(e) => debug!(conn_id, error = %e, "write loop ended"),
    }
    shutdown.cancel();
    let _ = time::timeout(limits.write_wait, writer.close()).await;
}

async fn write_frames<W>(
    writer: &mut W,
    outbound: &mut mpsc::Receiver<String>,
    limits: &SessionLimits,
) -> Result<(), SessionError>
where
    W: Sink<Frame> + Unpin,
    W::Error: fmt::Display,
{
    // `interval_at` panics on a zero period.
    let period = limits.ping_period.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(first) = next else {
                    send_with_deadline(writer, Frame::Close, limits.write_wait).await?;
                    return Ok(());
                };
                let batch = coalesce(first, outbound);
                send_with_deadline(writer, Frame::Text(batch), limits.write_wait).await?;
            },
            _ = ticker.tick() => {
                send_with_deadline(writer, Frame::Ping(Vec::new()), limits.write_wait).await?;
            },
        }
    }
}

/// Append everything queued right now to `first`, newline-separated.
fn coalesce(first: String, outbound: &mut mpsc::Receiver<String>) -> String {
    let mut batch = first;
    for _ in 0..outbound.len() {
        let Ok(next) = outbound.try_recv() else {
            break;
        };
        batch.push('\n');
        batch.push_str(&next);
    }
    batch
}

async fn send_with_deadline<W>(
    writer: &mut W,
    frame: Frame,
    wait: Duration,
) -> Result<(), SessionError>
where
    W: Sink<Frame> + Unpin,
    W::Error: fmt::Display,
{
    match time::timeout(wait, writer.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Transport(e.to_string())),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}
