//! The hub: single owner of the live-session registry.
//!
//! All registry and allow-list mutation happens inside [`Hub::run`], which
//! processes one [`HubEvent`] at a time. Everything else talks to the hub
//! through a cloneable [`HubHandle`].
//!
//! Delivery to a session is a non-blocking enqueue onto its bounded outbound
//! queue. A session whose queue is full is evicted on the spot: its queue is
//! closed and it leaves the registry, so one slow reader never stalls the
//! rest.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Instant,
};

use {
    parley_config::HubConfig,
    parley_otp::OtpEngine,
    parley_protocol::{Message, Route, ServerFrame},
    secrecy::SecretString,
    tokio::sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    tracing::{debug, info, warn},
};

use crate::clock::Clock;

// ── Session entry ────────────────────────────────────────────────────────────

/// Hub-side state of one attached connection.
pub struct SessionEntry {
    pub conn_id: String,
    pub client_id: String,
    pub alias: String,
    secret: SecretString,
    /// Peers allowed to direct-message this session.
    allow: HashSet<String>,
    /// Producer end of the session's outbound queue. Dropping it closes the queue.
    outbound: mpsc::Sender<String>,
    pub connected_at: Instant,
}

impl SessionEntry {
    pub fn new(
        client_id: impl Into<String>,
        alias: impl Into<String>,
        secret: SecretString,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            alias: alias.into(),
            secret,
            allow: HashSet::new(),
            outbound,
            connected_at: Instant::now(),
        }
    }

    pub fn allows(&self, peer_id: &str) -> bool {
        self.allow.contains(peer_id)
    }
}

impl fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("conn_id", &self.conn_id)
            .field("client_id", &self.client_id)
            .field("alias", &self.alias)
            .field("allow", &self.allow)
            .finish_non_exhaustive()
    }
}

// ── Events & handle ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum HubEvent {
    Register(SessionEntry),
    Unregister {
        conn_id: String,
    },
    /// A normalized payload read from a session's transport.
    Inbound {
        conn_id: String,
        payload: String,
    },
    ClientCount(oneshot::Sender<usize>),
    AllowList {
        client_id: String,
        reply: oneshot::Sender<Option<Vec<String>>>,
    },
}

/// Cheap, cloneable sender into the hub's event loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    pub fn register(&self, entry: SessionEntry) {
        self.send(HubEvent::Register(entry));
    }

    pub fn unregister(&self, conn_id: &str) {
        self.send(HubEvent::Unregister {
            conn_id: conn_id.to_string(),
        });
    }

    pub fn inbound(&self, conn_id: &str, payload: String) {
        self.send(HubEvent::Inbound {
            conn_id: conn_id.to_string(),
            payload,
        });
    }

    /// Number of live sessions. Zero if the hub has stopped.
    pub async fn client_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::ClientCount(reply));
        rx.await.unwrap_or_default()
    }

    /// Sorted allow-list of the session currently addressed by `client_id`.
    pub async fn allow_list(&self, client_id: &str) -> Option<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::AllowList {
            client_id: client_id.to_string(),
            reply,
        });
        rx.await.ok().flatten()
    }

    fn send(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            debug!("hub event loop has stopped, event dropped");
        }
    }
}

// ── Hub ──────────────────────────────────────────────────────────────────────

pub struct Hub {
    /// conn_id → session
    sessions: HashMap<String, SessionEntry>,
    /// client_id → conn_id of the connection that currently receives for it
    by_client: HashMap<String, String>,
    otp: OtpEngine,
    clock: Arc<dyn Clock>,
    config: HubConfig,
}

impl Hub {
    pub fn new(otp: OtpEngine, clock: Arc<dyn Clock>, config: HubConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            by_client: HashMap::new(),
            otp,
            clock,
            config,
        }
    }

    /// Start the event loop on the current runtime.
    pub fn spawn(self) -> HubHandle {
        let (events, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        HubHandle { events }
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<HubEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
        debug!("hub event loop stopped");
    }

    pub fn apply(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(entry) => self.register(entry),
            HubEvent::Unregister { conn_id } => {
                self.unregister(&conn_id);
            },
            HubEvent::Inbound { conn_id, payload } => self.handle_inbound(&conn_id, &payload),
            HubEvent::ClientCount(reply) => {
                let _ = reply.send(self.len());
            },
            HubEvent::AllowList { client_id, reply } => {
                let _ = reply.send(self.allow_list(&client_id));
            },
        }
    }

    pub fn register(&mut self, entry: SessionEntry) {
        info!(
            conn_id = %entry.conn_id,
            client_id = %entry.client_id,
            alias = %entry.alias,
            "session registered"
        );
        self.by_client
            .insert(entry.client_id.clone(), entry.conn_id.clone());
        self.sessions.insert(entry.conn_id.clone(), entry);
    }

    /// Remove a session and close its outbound queue. Unknown ids are a no-op.
    pub fn unregister(&mut self, conn_id: &str) -> bool {
        match self.remove(conn_id) {
            Some(entry) => {
                info!(
                    conn_id,
                    client_id = %entry.client_id,
                    connected_secs = entry.connected_at.elapsed().as_secs(),
                    "session unregistered"
                );
                true
            },
            None => false,
        }
    }

    /// Enqueue `payload` on every live session, evicting any whose queue is
    /// full. Returns how many sessions accepted it.
    pub fn broadcast(&mut self, payload: &str) -> usize {
        let targets: Vec<String> = self.sessions.keys().cloned().collect();
        let mut delivered = 0;
        for conn_id in &targets {
            if self.deliver(conn_id, payload.to_string()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Decode and route one payload read from connection `conn_id`.
    pub fn handle_inbound(&mut self, conn_id: &str, raw: &str) {
        let Some(origin) = self.sessions.get(conn_id).map(|s| s.client_id.clone()) else {
            debug!(conn_id, "payload from a connection no longer registered, dropped");
            return;
        };

        let msg = match Message::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(conn_id, error = %e, "discarding undecodable payload");
                return;
            },
        };

        match msg.route() {
            Route::Handshake {
                sender_id,
                target_id,
                code,
            } => {
                if let Some(sender_id) = self.claimed_sender(&origin, sender_id) {
                    self.handle_handshake(sender_id, target_id, code);
                }
            },
            Route::Direct {
                sender_id,
                target_id,
                content,
            } => {
                if let Some(sender_id) = self.claimed_sender(&origin, sender_id) {
                    self.handle_direct(sender_id, target_id, content);
                }
            },
            Route::Broadcast => {
                let delivered = self.broadcast(raw);
                debug!(conn_id, delivered, "broadcast fanned out");
            },
            Route::Incomplete(kind) => {
                debug!(conn_id, ?kind, "message missing required fields, dropped");
            },
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_registered(&self, conn_id: &str) -> bool {
        self.sessions.contains_key(conn_id)
    }

    pub fn allow_list(&self, client_id: &str) -> Option<Vec<String>> {
        let session = self.session_for(client_id)?;
        let mut peers: Vec<String> = session.allow.iter().cloned().collect();
        peers.sort();
        Some(peers)
    }

    // ── Routing ──────────────────────────────────────────────────────────────

    /// Resolve who a handshake or dm is from. An empty `sender_id` means the
    /// sending connection itself.
    fn claimed_sender<'a>(&self, origin: &'a str, claimed: &'a str) -> Option<&'a str> {
        if claimed.is_empty() {
            return Some(origin);
        }
        if self.config.enforce_sender_identity && claimed != origin {
            warn!(origin, claimed, "sender_id does not match connection, dropped");
            return None;
        }
        Some(claimed)
    }

    fn handle_handshake(&mut self, sender_id: &str, target_id: &str, code: &str) {
        let Some(target_conn) = self.conn_for(target_id) else {
            debug!(sender_id, target_id, "handshake target not connected, dropped");
            return;
        };

        let now = self.clock.unix_now();
        let verified = self
            .sessions
            .get(&target_conn)
            .is_some_and(|target| self.otp.verify(&target.secret, code, now));
        if !verified {
            info!(sender_id, target_id, "direct messaging request denied");
            return;
        }

        if let Some(target) = self.sessions.get_mut(&target_conn) {
            target.allow.insert(sender_id.to_string());
        }
        let sender_conn = self.conn_for(sender_id);
        if let Some(sender) = sender_conn.as_ref().and_then(|c| self.sessions.get_mut(c)) {
            sender.allow.insert(target_id.to_string());
        }
        info!(sender_id, target_id, "handshake accepted, direct messaging allowed");

        if self.config.acknowledge_handshakes {
            self.send_frame(&target_conn, &ServerFrame::HandshakeAccepted {
                peer_id: sender_id.to_string(),
            });
            if let Some(sender_conn) = sender_conn {
                self.send_frame(&sender_conn, &ServerFrame::HandshakeAccepted {
                    peer_id: target_id.to_string(),
                });
            }
        }
    }

    fn handle_direct(&mut self, sender_id: &str, target_id: &str, content: &str) {
        let Some(target_conn) = self.conn_for(target_id) else {
            debug!(sender_id, target_id, "dm target not connected, dropped");
            return;
        };
        let authorized = self
            .sessions
            .get(&target_conn)
            .is_some_and(|target| target.allows(sender_id));
        if !authorized {
            debug!(sender_id, target_id, "dm from unauthorized sender, dropped");
            return;
        }
        self.send_frame(&target_conn, &ServerFrame::Direct {
            sender_id: sender_id.to_string(),
            content: content.to_string(),
        });
    }

    // ── Registry internals ───────────────────────────────────────────────────

    fn session_for(&self, client_id: &str) -> Option<&SessionEntry> {
        self.by_client
            .get(client_id)
            .and_then(|conn_id| self.sessions.get(conn_id))
    }

    fn conn_for(&self, client_id: &str) -> Option<String> {
        self.session_for(client_id).map(|s| s.conn_id.clone())
    }

    fn send_frame(&mut self, conn_id: &str, frame: &ServerFrame) -> bool {
        match frame.encode() {
            Ok(text) => self.deliver(conn_id, text),
            Err(e) => {
                warn!(conn_id, error = %e, "failed to encode frame");
                false
            },
        }
    }

    fn deliver(&mut self, conn_id: &str, payload: String) -> bool {
        let Some(session) = self.sessions.get(conn_id) else {
            return false;
        };
        match session.outbound.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.evict(conn_id, "outbound queue full");
                false
            },
            Err(TrySendError::Closed(_)) => {
                self.evict(conn_id, "outbound queue closed");
                false
            },
        }
    }

    fn evict(&mut self, conn_id: &str, reason: &str) {
        if let Some(entry) = self.remove(conn_id) {
            warn!(conn_id, client_id = %entry.client_id, reason, "evicting session");
        }
    }

    /// Drop a session from the registry. Dropping the entry closes its queue.
    fn remove(&mut self, conn_id: &str) -> Option<SessionEntry> {
        let entry = self.sessions.remove(conn_id)?;
        if self
            .by_client
            .get(&entry.client_id)
            .is_some_and(|c| c == conn_id)
        {
            self.by_client.remove(&entry.client_id);
            // Another connection for the same client takes over routing.
            if let Some(other) = self
                .sessions
                .values()
                .find(|s| s.client_id == entry.client_id)
            {
                self.by_client
                    .insert(other.client_id.clone(), other.conn_id.clone());
            }
        }
        Some(entry)
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
