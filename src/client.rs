// ABOUTME: RelayClient wires link deliveries into the derivation engine.
// ABOUTME: Exposes derived views, the outbound send surface, and a broadcast event hub.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;

use huddle_core::cache::TtlCache;
use huddle_core::config::Config;
use huddle_core::dedup;
use huddle_core::dm::DmSession;
use huddle_core::ingest::{self, IngestContext, MessageLog};
use huddle_core::message::ChatMessage;
use huddle_core::outbox::Outbox;
use huddle_core::presence::{
    PresenceEntry, PresenceRoster, TypingIndicator, TYPING_SWEEP_INTERVAL, TYPING_TTL,
};
use huddle_core::thread::{self, ThreadState, ThreadView};

use crate::protocol::{self, ClientFrame, PresenceAction, SendKind, ServerFrame};
use crate::transport::{CloseReason, LinkEvent, LinkState, RelayLink};

/// Events broadcast to consumers (UI layers, the listen binary).
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A new authoritative record entered the log.
    Delivery(ChatMessage),
    LinkChanged(LinkState),
    PresenceChanged,
    Error(String),
}

struct LoopWiring {
    link_events: mpsc::Receiver<LinkEvent>,
    link_state: watch::Receiver<LinkState>,
}

struct EngineState {
    log: MessageLog,
    outbox: Outbox,
    presence: PresenceRoster,
    threads: ThreadState,
    dm: DmSession,
    known_agents: HashSet<String>,
    roster_cache: TtlCache<String, Vec<String>>,
    /// Local typing auto-stop deadline; None when we are not typing.
    typing_deadline: Option<Instant>,
}

struct ClientInner {
    username: String,
    avatar_url: Option<String>,
    channels: Vec<String>,
    ingest_ctx: IngestContext,
    link: RelayLink,
    state: Mutex<EngineState>,
    events: broadcast::Sender<ClientEvent>,
    wiring: Mutex<Option<LoopWiring>>,
}

/// The client-side engine: one per logical relay stream.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

impl RelayClient {
    pub fn new(config: Config) -> Self {
        let (link, link_events, link_state) =
            RelayLink::new(config.relay.url.clone(), config.link.retry_policy());
        let (events, _) = broadcast::channel(256);

        let state = EngineState {
            log: MessageLog::new(config.engine.history_limit),
            outbox: Outbox::new(config.engine.reconcile_window),
            presence: PresenceRoster::new(config.relay.username.clone()),
            threads: ThreadState::new(),
            dm: DmSession::new(Some(&config.relay.username)),
            known_agents: HashSet::new(),
            roster_cache: TtlCache::new(
                std::time::Duration::from_secs(config.engine.roster_ttl_secs),
                config.engine.roster_cache_capacity,
            ),
            typing_deadline: None,
        };

        Self {
            inner: Arc::new(ClientInner {
                username: config.relay.username.clone(),
                avatar_url: config.relay.avatar_url.clone(),
                channels: config.relay.channels.clone(),
                ingest_ctx: IngestContext::new("relay"),
                link,
                state: Mutex::new(state),
                events,
                wiring: Mutex::new(Some(LoopWiring {
                    link_events,
                    link_state,
                })),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn link_state(&self) -> LinkState {
        self.inner.link.state()
    }

    /// Open the link. The first call also starts the event loop.
    pub async fn connect(&self) {
        if let Some(wiring) = self.inner.wiring.lock().await.take() {
            let client = self.clone();
            tokio::spawn(async move {
                client.run_loop(wiring).await;
            });
        }
        self.inner.link.connect().await;
    }

    /// Announce departure and close the link for good.
    pub async fn disconnect(&self) {
        let _ = self
            .send_frame(&ClientFrame::Presence {
                action: PresenceAction::Leave,
                user: self.inner.username.clone(),
            })
            .await;
        self.inner.link.disconnect().await;
    }

    async fn run_loop(&self, mut wiring: LoopWiring) {
        let mut sweep = tokio::time::interval(TYPING_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = wiring.link_events.recv() => match event {
                    None => break,
                    Some(LinkEvent::Delivery(value)) => self.handle_delivery(value).await,
                    Some(LinkEvent::ConnectionLost) => {
                        let _ = self
                            .inner
                            .events
                            .send(ClientEvent::Error("lost connection to relay".to_string()));
                    }
                    Some(LinkEvent::Closed { reason }) => self.handle_closed(reason),
                },
                changed = wiring.link_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *wiring.link_state.borrow_and_update();
                    if state == LinkState::Connected {
                        self.announce().await;
                    }
                    let _ = self.inner.events.send(ClientEvent::LinkChanged(state));
                },
                _ = sweep.tick() => self.on_sweep_tick().await,
            }
        }
        tracing::debug!("relay client loop ended");
    }

    fn handle_closed(&self, reason: CloseReason) {
        match reason {
            CloseReason::Manual => {
                tracing::info!("relay link closed by request");
            }
            CloseReason::TargetGone => {
                let _ = self.inner.events.send(ClientEvent::Error(
                    "relay target no longer exists; giving up".to_string(),
                ));
            }
            CloseReason::RetriesExhausted => {
                let _ = self.inner.events.send(ClientEvent::Error(
                    "could not reach relay after repeated attempts".to_string(),
                ));
            }
        }
    }

    /// Join presence and the configured channels after every (re)connect.
    async fn announce(&self) {
        let _ = self
            .send_frame(&ClientFrame::Presence {
                action: PresenceAction::Join,
                user: self.inner.username.clone(),
            })
            .await;
        for channel in &self.inner.channels {
            let _ = self
                .send_frame(&ClientFrame::send(SendKind::ChannelJoin, channel, "", None, None))
                .await;
        }
    }

    async fn handle_delivery(&self, value: Value) {
        if let Some(frame) = protocol::classify(&value) {
            {
                let mut st = self.inner.state.lock().await;
                match frame {
                    ServerFrame::PresenceList { users } => st.presence.replace_all(users),
                    ServerFrame::PresenceJoin { user } => st.presence.join(user),
                    ServerFrame::PresenceLeave { username } => st.presence.leave(&username),
                    ServerFrame::Typing { is_typing, username, avatar_url } => {
                        st.presence
                            .set_typing(&username, avatar_url, is_typing, Instant::now());
                    }
                    ServerFrame::Subscribed { agent } => {
                        tracing::info!(agent = %agent, "subscribed to agent stream");
                        st.known_agents.insert(agent);
                    }
                }
            }
            let _ = self.inner.events.send(ClientEvent::PresenceChanged);
            return;
        }

        let records = ingest::normalize(&value, &self.inner.ingest_ctx);
        let mut fresh = Vec::new();
        {
            let mut st = self.inner.state.lock().await;
            for record in records {
                if st.log.push(record.clone()) {
                    fresh.push(record);
                }
            }
            let EngineState { log, outbox, .. } = &mut *st;
            outbox.reconcile(log.messages());
        }
        for record in fresh {
            let _ = self.inner.events.send(ClientEvent::Delivery(record));
        }
    }

    async fn on_sweep_tick(&self) {
        let now = Instant::now();
        let (evicted, stop_typing) = {
            let mut st = self.inner.state.lock().await;
            let evicted = st.presence.sweep(now);
            let stop = match st.typing_deadline {
                Some(deadline) if deadline <= now => {
                    st.typing_deadline = None;
                    true
                }
                _ => false,
            };
            (evicted, stop)
        };

        if stop_typing {
            let _ = self
                .send_frame(&ClientFrame::Typing {
                    is_typing: false,
                    username: self.inner.username.clone(),
                    avatar_url: self.inner.avatar_url.clone(),
                })
                .await;
        }
        if evicted > 0 {
            let _ = self.inner.events.send(ClientEvent::PresenceChanged);
        }
    }

    async fn send_frame(&self, frame: &ClientFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.inner.link.send_text(text).await,
            Err(error) => {
                tracing::warn!(error = %error, "failed to encode outbound frame");
                false
            }
        }
    }

    /// Send a message (or a channel join/leave). Returns acceptance: the
    /// frame was queued on a live link, not that the relay delivered it.
    ///
    /// Plain messages appear in the visible list immediately as a pending
    /// record; a rejected send rolls that record back right away.
    pub async fn send_message(
        &self,
        to: &str,
        body: &str,
        kind: SendKind,
        data: Option<Value>,
        thread: Option<String>,
    ) -> bool {
        let pending = if kind == SendKind::Message {
            let mut st = self.inner.state.lock().await;
            Some(st.outbox.stage(&self.inner.username, to, body))
        } else {
            None
        };

        let frame = ClientFrame::send(kind, to, body, thread, data);
        let accepted = self.send_frame(&frame).await;

        if !accepted {
            if let Some(pending) = pending {
                self.inner.state.lock().await.outbox.fail(&pending.id);
            }
            let _ = self
                .inner
                .events
                .send(ClientEvent::Error(format!("send to '{to}' rejected: link not connected")));
        }
        accepted
    }

    /// Signal local typing. Rapid calls coalesce into one outbound
    /// transition; a stop is auto-sent after the TTL unless refreshed.
    pub async fn set_typing(&self, active: bool) {
        let transition = {
            let mut st = self.inner.state.lock().await;
            if active {
                let fresh = st.typing_deadline.is_none();
                st.typing_deadline = Some(Instant::now() + TYPING_TTL);
                fresh
            } else {
                st.typing_deadline.take().is_some()
            }
        };

        if transition {
            let _ = self
                .send_frame(&ClientFrame::Typing {
                    is_typing: active,
                    username: self.inner.username.clone(),
                    avatar_url: self.inner.avatar_url.clone(),
                })
                .await;
        }
    }

    // -------------------------------------------------------------------------
    // Derived views. Each is recomputed from the full log on every call.
    // -------------------------------------------------------------------------

    /// The main conversational view: broadcasts collapsed, replies folded
    /// into their threads, DM scoping applied, pending sends at the tail.
    pub async fn visible_messages(&self) -> Vec<ChatMessage> {
        let mut st = self.inner.state.lock().await;
        let EngineState { log, outbox, dm, known_agents, .. } = &mut *st;
        let collapsed = dedup::collapse_broadcasts(log.messages());
        let main: Vec<ChatMessage> = thread::main_view(&collapsed).into_iter().cloned().collect();
        let scoped: Vec<ChatMessage> = dm
            .filter(&main, known_agents)
            .into_iter()
            .cloned()
            .collect();
        outbox.overlay(scoped)
    }

    pub async fn threads(&self) -> Vec<ThreadView> {
        let mut st = self.inner.state.lock().await;
        let EngineState { log, threads, .. } = &mut *st;
        let collapsed = dedup::collapse_broadcasts(log.messages());
        thread::resolve_threads(&collapsed, &self.inner.username, threads)
    }

    /// Record the instant a thread is selected; unread counting restarts
    /// from here.
    pub async fn open_thread(&self, thread_id: &str) {
        self.inner.state.lock().await.threads.mark_opened(thread_id);
    }

    pub async fn mark_read(&self, message_id: &str) -> bool {
        self.inner.state.lock().await.log.mark_read(message_id)
    }

    pub async fn online_users(&self) -> Vec<PresenceEntry> {
        let st = self.inner.state.lock().await;
        st.presence.online().into_iter().cloned().collect()
    }

    pub async fn typing_users(&self) -> Vec<TypingIndicator> {
        let st = self.inner.state.lock().await;
        st.presence.typing().into_iter().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Direct-conversation controls
    // -------------------------------------------------------------------------

    pub async fn set_dm_anchor(&self, anchor: Option<&str>) {
        self.inner.state.lock().await.dm.set_anchor(anchor);
    }

    pub async fn invite_agent(&self, agent: &str) {
        self.inner.state.lock().await.dm.invite(agent);
    }

    pub async fn remove_agent(&self, agent: &str) {
        self.inner.state.lock().await.dm.remove(agent);
    }

    pub async fn dm_participants(&self) -> Vec<String> {
        let mut st = self.inner.state.lock().await;
        let EngineState { log, dm, known_agents, .. } = &mut *st;
        dm.participants(log.messages(), known_agents)
            .into_iter()
            .collect()
    }

    /// Roster lookup with the instance-owned TTL cache in front.
    pub async fn find_agents(&self, query: &str) -> Vec<String> {
        let now = Instant::now();
        let mut st = self.inner.state.lock().await;
        if let Some(hit) = st.roster_cache.get(&query.to_string(), now) {
            return hit.clone();
        }
        let mut matches: Vec<String> = st
            .known_agents
            .iter()
            .filter(|name| name.contains(query))
            .cloned()
            .collect();
        matches.sort();
        st.roster_cache.insert(query.to_string(), matches.clone(), now);
        matches
    }
}
