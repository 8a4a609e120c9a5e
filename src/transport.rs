// ABOUTME: Resilient WebSocket link to the relay with exponential reconnect.
// ABOUTME: Per-connection metadata keeps overlapping connection lifetimes from cross-contaminating.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use huddle_core::backoff::{RetryPolicy, RetryState};

/// Close code the relay sends when the requested stream's target entity does
/// not exist. Reconnecting would back off forever against nothing, so this
/// code permanently disables reconnection for the stream.
pub const CLOSE_CODE_GONE: u16 = 4404;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
}

/// Why the link stopped trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Manual,
    RetriesExhausted,
    TargetGone,
}

/// Events delivered to the consuming client loop.
#[derive(Debug)]
pub enum LinkEvent {
    /// A payload arrived from the relay. Non-JSON text arrives as a JSON
    /// string value; the ingest layer treats both uniformly.
    Delivery(Value),
    /// An established connection (one that had delivered data) dropped
    /// involuntarily. Data-less flaps never produce this.
    ConnectionLost,
    /// Reconnection will not continue.
    Closed { reason: CloseReason },
}

/// Lifecycle flags owned by exactly one connection instance. A closing old
/// connection and a freshly opened replacement each hold their own record,
/// so overlapping lifetimes can never corrupt each other's state.
#[derive(Debug, Default)]
struct ConnMeta {
    manually_closed: AtomicBool,
    received_data: AtomicBool,
}

struct ConnHandle {
    generation: u64,
    meta: Arc<ConnMeta>,
    writer: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

struct LinkInner {
    url: String,
    state_tx: watch::Sender<LinkState>,
    events_tx: mpsc::Sender<LinkEvent>,
    /// Bumped for every new connection instance; stale instances compare
    /// their own generation against this before touching shared state.
    generation: AtomicU64,
    conn: Mutex<Option<ConnHandle>>,
    retry: Mutex<RetryState>,
    pending_reconnect: Mutex<Option<JoinHandle<()>>>,
    /// Set once the relay reports the target entity gone.
    gone: AtomicBool,
    /// Set by disconnect(); closes the race where a close handler schedules
    /// a reconnect timer concurrently with the disconnect call.
    stopped: AtomicBool,
}

/// Owns the persistent connection lifecycle to the relay: dialing, the
/// read/write pump, reconnect scheduling, and manual-close suppression.
///
/// Cheap to clone; all clones drive the same logical stream.
#[derive(Clone)]
pub struct RelayLink {
    inner: Arc<LinkInner>,
}

impl RelayLink {
    pub fn new(
        url: impl Into<String>,
        policy: RetryPolicy,
    ) -> (Self, mpsc::Receiver<LinkEvent>, watch::Receiver<LinkState>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let link = Self {
            inner: Arc::new(LinkInner {
                url: url.into(),
                state_tx,
                events_tx,
                generation: AtomicU64::new(0),
                conn: Mutex::new(None),
                retry: Mutex::new(RetryState::new(policy)),
                pending_reconnect: Mutex::new(None),
                gone: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        };
        (link, events_rx, state_rx)
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state_tx.borrow()
    }

    /// Open (or re-open) the link. Supersedes any live connection and any
    /// pending reconnect, and restarts the retry attempt counter.
    pub async fn connect(&self) {
        self.inner.gone.store(false, Ordering::SeqCst);
        self.inner.stopped.store(false, Ordering::SeqCst);
        self.inner.retry.lock().await.record_open();
        self.cancel_pending_reconnect().await;

        // A superseded connection is a manual close from its point of view:
        // tag it before tearing it down so its close event stays silent.
        if let Some(old) = self.inner.conn.lock().await.take() {
            old.meta.manually_closed.store(true, Ordering::SeqCst);
            old.task.abort();
        }

        self.start_connection().await;
    }

    /// Close the link and stop reconnecting. The current connection instance
    /// is tagged manually-closed *before* the close is issued, so its close
    /// event can never be mistaken for an involuntary drop.
    pub async fn disconnect(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.cancel_pending_reconnect().await;

        if let Some(handle) = self.inner.conn.lock().await.take() {
            handle.meta.manually_closed.store(true, Ordering::SeqCst);
            // Dropping the writer asks the pump to send a Close frame and
            // wind down; its close handler stays silent for tagged instances.
            drop(handle.writer);
        }

        let was_idle = *self.inner.state_tx.borrow() == LinkState::Idle;
        self.inner.state_tx.send_replace(LinkState::Idle);
        if !was_idle {
            let _ = self
                .inner
                .events_tx
                .send(LinkEvent::Closed { reason: CloseReason::Manual })
                .await;
        }
    }

    /// Queue one text frame. Returns acceptance, not delivery confirmation.
    pub async fn send_text(&self, text: String) -> bool {
        if self.state() != LinkState::Connected {
            return false;
        }
        let guard = self.inner.conn.lock().await;
        match guard.as_ref() {
            Some(handle) => handle.writer.try_send(text).is_ok(),
            None => false,
        }
    }

    async fn cancel_pending_reconnect(&self) {
        if let Some(task) = self.inner.pending_reconnect.lock().await.take() {
            task.abort();
        }
    }

    // Returns a boxed future with a concrete `Send` type rather than an
    // `async fn`'s opaque type. `start_connection` is part of a recursive
    // cycle (it spawns `run_connection`, whose close handling spawns
    // `start_connection` again); a concrete return type breaks the opaque
    // self-reference the compiler cannot reveal within its defining scope.
    fn start_connection(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let meta = Arc::new(ConnMeta::default());
            let (writer_tx, writer_rx) = mpsc::channel(64);

            let link = self.clone();
            let conn_meta = Arc::clone(&meta);
            let task = tokio::spawn(async move {
                link.run_connection(generation, conn_meta, writer_rx).await;
            });

            *self.inner.conn.lock().await = Some(ConnHandle {
                generation,
                meta,
                writer: writer_tx,
                task,
            });
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    async fn run_connection(
        &self,
        generation: u64,
        meta: Arc<ConnMeta>,
        mut writer_rx: mpsc::Receiver<String>,
    ) {
        self.inner.state_tx.send_replace(LinkState::Connecting);

        let stream = match connect_async(self.inner.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(error) => {
                tracing::warn!(url = %self.inner.url, error = %error, "relay dial failed");
                self.handle_close(generation, &meta, None).await;
                return;
            }
        };

        // connect() or disconnect() may have superseded us mid-dial.
        if !self.is_current(generation)
            || meta.manually_closed.load(Ordering::SeqCst)
            || self.inner.stopped.load(Ordering::SeqCst)
        {
            let (mut sink, _) = stream.split();
            let _ = sink.send(Message::Close(None)).await;
            if self.is_current(generation) && self.inner.stopped.load(Ordering::SeqCst) {
                self.inner.state_tx.send_replace(LinkState::Idle);
            }
            return;
        }

        self.inner.retry.lock().await.record_open();
        self.inner.state_tx.send_replace(LinkState::Connected);
        tracing::info!(url = %self.inner.url, "relay link connected");

        let (mut sink, mut reader) = stream.split();
        let mut close_code: Option<u16> = None;

        loop {
            tokio::select! {
                outbound = writer_rx.recv() => match outbound {
                    Some(text) => {
                        if let Err(error) = sink.send(Message::Text(text)).await {
                            tracing::warn!(error = %error, "relay write failed");
                            break;
                        }
                    }
                    // Writer dropped: this is the manual-close path.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                inbound = reader.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        meta.received_data.store(true, Ordering::SeqCst);
                        let value = serde_json::from_str::<Value>(&text)
                            .unwrap_or_else(|_| Value::String(text));
                        let _ = self.inner.events_tx.send(LinkEvent::Delivery(value)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        close_code = frame.map(|f| u16::from(f.code));
                        break;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary: nothing to deliver
                    Some(Err(error)) => {
                        tracing::warn!(error = %error, "relay socket error");
                        break;
                    }
                    None => break,
                },
            }
        }

        self.handle_close(generation, &meta, close_code).await;
    }

    /// Decide what a close means: silence for manual closes, a lost notice
    /// for established connections, then either a scheduled reconnect or a
    /// terminal transition.
    async fn handle_close(&self, generation: u64, meta: &ConnMeta, close_code: Option<u16>) {
        if !self.is_current(generation) {
            // A newer connection owns the shared state now.
            return;
        }

        if meta.manually_closed.load(Ordering::SeqCst) || self.inner.stopped.load(Ordering::SeqCst) {
            // disconnect() already reported Idle and emitted the close event.
            self.clear_conn_slot(generation).await;
            self.inner.state_tx.send_replace(LinkState::Idle);
            return;
        }

        // Only connections that delivered data count as established; a
        // data-less flap must not surface a user-visible lost notice.
        if meta.received_data.load(Ordering::SeqCst) {
            let _ = self.inner.events_tx.send(LinkEvent::ConnectionLost).await;
        }

        self.clear_conn_slot(generation).await;

        if close_code == Some(CLOSE_CODE_GONE) {
            tracing::warn!(url = %self.inner.url, "relay reports target entity gone; reconnect disabled");
            self.inner.gone.store(true, Ordering::SeqCst);
            self.inner.state_tx.send_replace(LinkState::Idle);
            let _ = self
                .inner
                .events_tx
                .send(LinkEvent::Closed { reason: CloseReason::TargetGone })
                .await;
            return;
        }

        let delay = self.inner.retry.lock().await.next_delay();
        match delay {
            Some(delay) => {
                tracing::info!(delay_ms = delay.as_millis() as u64, "scheduling relay reconnect");
                self.inner.state_tx.send_replace(LinkState::Connecting);
                let link = self.clone();
                let scheduled_for = generation;
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // A connect() or disconnect() issued during the wait
                    // supersedes this timer.
                    if !link.is_current(scheduled_for)
                        || link.inner.gone.load(Ordering::SeqCst)
                        || link.inner.stopped.load(Ordering::SeqCst)
                    {
                        return;
                    }
                    link.start_connection().await;
                });
                *self.inner.pending_reconnect.lock().await = Some(task);
            }
            None => {
                tracing::warn!(url = %self.inner.url, "relay reconnect attempts exhausted");
                self.inner.state_tx.send_replace(LinkState::Idle);
                let _ = self
                    .inner
                    .events_tx
                    .send(LinkEvent::Closed { reason: CloseReason::RetriesExhausted })
                    .await;
            }
        }
    }

    async fn clear_conn_slot(&self, generation: u64) {
        let mut guard = self.inner.conn.lock().await;
        if guard.as_ref().is_some_and(|h| h.generation == generation) {
            *guard = None;
        }
    }
}
