//! Tokio driver around the session state machine.
//!
//! The [`ConnectionManager`] owns the core [`Session`] and [`EventBus`]
//! behind a single `tokio::sync::Mutex`, spawns the tasks the session asks
//! for (receive loop, heartbeat ticker, backoff dials), and executes every
//! [`SessionAction`] the core returns. All spawned tasks register abort
//! handles so teardown cancels them deterministically.
//!
//! No public operation returns an error for network conditions: sends queue,
//! drops reconnect, and callers observe progress through
//! [`ConnectionManager::on`] subscriptions or
//! [`ConnectionManager::connection_status`].

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use livepulse_core::{
    BusPayload, ConnectionStatus, Environment, EventBus, HandlerResult, Session, SessionAction,
    SessionConfig, SessionState, SubscriptionId, Topic, env::SystemEnv,
};
use livepulse_proto::{
    Envelope, EventKind,
    payloads::{
        self, ChatBody, ChatKind, PollActionKind, PollBody, PollOption, QaActionKind, QaBody,
        UserActionBody, UserActionKind,
    },
};
use tokio::{
    sync::{Mutex, mpsc},
    task::AbortHandle,
};

use crate::{
    collaborators::{
        ApproveAll, HistoryStore, ModerationService, NoHistory, NotificationSink, NullNotifier,
    },
    error::ClientError,
    transport::{Transport, TransportLink},
};

/// Cached chat envelopes kept per room.
const ROOM_HISTORY_CAP: usize = 200;

/// Cached `event_update` envelopes kept overall.
const EVENT_UPDATE_CAP: usize = 100;

/// Ticker granularity as a fraction of the heartbeat interval. The session
/// decides when a beat or a liveness check is actually due.
const TICKS_PER_INTERVAL: u32 = 5;

/// Locally-applied poll and Q&A tallies, reconciled against server echoes.
///
/// A vote or upvote bumps the local count immediately so the UI reflects the
/// action; when the authoritative echo arrives its counts replace the local
/// ones. There is no timeout-based revert.
#[derive(Debug, Default)]
struct OptimisticTallies {
    poll_votes: HashMap<(String, String), u64>,
    question_upvotes: HashMap<String, u64>,
}

impl OptimisticTallies {
    fn record_local_vote(&mut self, poll_id: &str, option_id: &str) {
        *self.poll_votes.entry((poll_id.to_string(), option_id.to_string())).or_insert(0) += 1;
    }

    fn record_local_upvote(&mut self, question_id: &str) {
        *self.question_upvotes.entry(question_id.to_string()).or_insert(0) += 1;
    }

    fn reconcile_poll(&mut self, body: &PollBody) {
        if let Some(options) = &body.options {
            for option in options {
                self.poll_votes.insert((body.poll_id.clone(), option.id.clone()), option.votes);
            }
        }
    }

    fn reconcile_question(&mut self, body: &QaBody) {
        if let Some(upvotes) = body.upvotes {
            self.question_upvotes.insert(body.question_id.clone(), upvotes);
        }
    }

    fn vote_count(&self, poll_id: &str, option_id: &str) -> u64 {
        self.poll_votes
            .get(&(poll_id.to_string(), option_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn upvote_count(&self, question_id: &str) -> u64 {
        self.question_upvotes.get(question_id).copied().unwrap_or(0)
    }

    fn clear(&mut self) {
        self.poll_votes.clear();
        self.question_upvotes.clear();
    }
}

/// Mutable driver state behind the manager's mutex.
struct Driver<E: Environment> {
    session: Session<E>,
    bus: EventBus,
    outbound: Option<mpsc::Sender<Envelope>>,
    recv_task: Option<AbortHandle>,
    ticker_task: Option<AbortHandle>,
    dial_task: Option<AbortHandle>,
    chat_history: HashMap<String, Vec<Envelope>>,
    event_updates: Vec<Envelope>,
    tallies: OptimisticTallies,
}

impl<E: Environment> Driver<E> {
    /// Drop the current link and cancel its tasks.
    fn abort_link(&mut self) {
        self.outbound = None;
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        if let Some(task) = self.ticker_task.take() {
            task.abort();
        }
    }

    /// Cancel everything, pending dials included.
    fn abort_all(&mut self) {
        self.abort_link();
        if let Some(task) = self.dial_task.take() {
            task.abort();
        }
    }
}

struct Inner<T, E: Environment> {
    env: E,
    config: SessionConfig,
    transport: T,
    driver: Mutex<Driver<E>>,
    history: Arc<dyn HistoryStore>,
    moderation: Arc<dyn ModerationService>,
    notifications: Arc<dyn NotificationSink>,
}

/// High-level realtime client.
///
/// Cheap to clone; all clones share one session. The manager is the single
/// writer of the session state, so operations serialize on its internal
/// mutex.
pub struct ConnectionManager<T: Transport, E: Environment = SystemEnv> {
    inner: Arc<Inner<T, E>>,
}

impl<T: Transport, E: Environment> Clone for ConnectionManager<T, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager with the default clock, config, and inert
    /// collaborators.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_parts(
            transport,
            SystemEnv,
            SessionConfig::default(),
            Arc::new(NoHistory),
            Arc::new(ApproveAll),
            Arc::new(NullNotifier),
        )
    }
}

impl<T: Transport, E: Environment> ConnectionManager<T, E> {
    /// Create a manager with explicit environment, config, and collaborators.
    #[must_use]
    pub fn with_parts(
        transport: T,
        env: E,
        config: SessionConfig,
        history: Arc<dyn HistoryStore>,
        moderation: Arc<dyn ModerationService>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        let driver = Driver {
            session: Session::new(env.clone(), config.clone()),
            bus: EventBus::new(),
            outbound: None,
            recv_task: None,
            ticker_task: None,
            dial_task: None,
            chat_history: HashMap::new(),
            event_updates: Vec::new(),
            tallies: OptimisticTallies::default(),
        };
        Self {
            inner: Arc::new(Inner {
                env,
                config,
                transport,
                driver: Mutex::new(driver),
                history,
                moderation,
                notifications,
            }),
        }
    }

    /// Establish the session for `user_id`.
    ///
    /// Returns whether the initial connection succeeded. On failure the
    /// backoff path is already running in the background, so a `false` here
    /// still leads to a usable session if the transport recovers; callers
    /// watch [`Topic::Connected`] for that.
    pub async fn initialize(&self, user_id: &str) -> bool {
        let inner = &self.inner;
        let mut driver = inner.driver.lock().await;

        let actions = match driver.session.initialize(user_id, inner.env.now()) {
            Ok(actions) => actions,
            Err(error) => {
                let error = ClientError::from(error);
                tracing::warn!(%error, "initialize rejected");
                return false;
            },
        };

        // The first dial runs inline so the caller learns the outcome; the
        // rest of the actions execute as usual.
        let rest: Vec<SessionAction> = actions
            .into_iter()
            .filter(|action| !matches!(action, SessionAction::Dial { attempt: 0, .. }))
            .collect();
        inner.run_actions(&mut driver, rest);

        match inner.transport.connect(user_id).await {
            Ok(link) => {
                inner.attach_link(&mut driver, link);
                driver.session.state() == SessionState::Connected
            },
            Err(error) => {
                tracing::debug!(error = %ClientError::from(error), "initial connection failed");
                let actions = driver.session.dial_failed(inner.env.now());
                inner.run_actions(&mut driver, actions);
                false
            },
        }
    }

    /// Join a room, seeding its history cache from the [`HistoryStore`] on
    /// first join.
    pub async fn join_room(&self, room_id: &str) {
        let mut driver = self.inner.driver.lock().await;
        let first_join = !driver.session.rooms().is_joined(room_id);
        let actions = driver.session.join_room(room_id);

        if first_join {
            let backlog = self.inner.history.recent(room_id);
            let entries = driver.chat_history.entry(room_id.to_string()).or_default();
            if entries.is_empty() {
                *entries = backlog;
            }
        }
        self.inner.run_actions(&mut driver, actions);
    }

    /// Leave a room.
    pub async fn leave_room(&self, room_id: &str) {
        let mut driver = self.inner.driver.lock().await;
        let actions = driver.session.leave_room(room_id);
        self.inner.run_actions(&mut driver, actions);
    }

    /// Send a pre-built envelope, queueing it if the session is offline.
    pub async fn send_message(&self, envelope: Envelope) {
        let mut driver = self.inner.driver.lock().await;
        let actions = driver.session.send(envelope);
        self.inner.run_actions(&mut driver, actions);
    }

    /// Send a chat message to a room.
    ///
    /// Returns whether the message was accepted for delivery (sent or
    /// queued). Moderation rejection is the only refusal; an offline session
    /// queues and still returns `true`.
    pub async fn send_chat_message(&self, room_id: &str, message: &str, kind: ChatKind) -> bool {
        let verdict = self.inner.moderation.review(message);
        if !verdict.approved {
            tracing::info!(room = room_id, flags = ?verdict.flags, "chat message rejected");
            return false;
        }

        let mut driver = self.inner.driver.lock().await;
        let user_id = driver.session.user_id().unwrap_or_default().to_string();
        let body = ChatBody {
            room_id: room_id.to_string(),
            user_id: user_id.clone(),
            message: message.to_string(),
            kind,
            timestamp: self.inner.env.unix_millis(),
        };
        let envelope = self.inner.build_envelope(EventKind::Chat, &body, Some(room_id), &user_id);
        let actions = driver.session.send(envelope);
        self.inner.run_actions(&mut driver, actions);
        true
    }

    /// Open a poll for an event. Returns the generated poll id.
    pub async fn create_poll(&self, event_id: &str, question: &str, options: &[&str]) -> String {
        let mut driver = self.inner.driver.lock().await;
        let poll_id = self.inner.env.envelope_id();
        let options = options
            .iter()
            .enumerate()
            .map(|(i, text)| PollOption {
                id: format!("opt-{i}"),
                text: (*text).to_string(),
                votes: 0,
            })
            .collect();
        let body = PollBody {
            action: PollActionKind::Create,
            poll_id: poll_id.clone(),
            question: Some(question.to_string()),
            options: Some(options),
            option_id: None,
        };
        let envelope = self.poll_envelope(&driver, &body).with_event(event_id);
        let actions = driver.session.send(envelope);
        self.inner.run_actions(&mut driver, actions);
        poll_id
    }

    /// Vote in a poll. The local tally is bumped immediately and reconciled
    /// when the authoritative echo arrives.
    pub async fn vote_poll(&self, poll_id: &str, option_id: &str) {
        let mut driver = self.inner.driver.lock().await;
        driver.tallies.record_local_vote(poll_id, option_id);
        let body = PollBody {
            action: PollActionKind::Vote,
            poll_id: poll_id.to_string(),
            question: None,
            options: None,
            option_id: Some(option_id.to_string()),
        };
        let envelope = self.poll_envelope(&driver, &body);
        let actions = driver.session.send(envelope);
        self.inner.run_actions(&mut driver, actions);
    }

    /// Close voting on a poll.
    pub async fn close_poll(&self, poll_id: &str) {
        let mut driver = self.inner.driver.lock().await;
        let body = PollBody {
            action: PollActionKind::Close,
            poll_id: poll_id.to_string(),
            question: None,
            options: None,
            option_id: None,
        };
        let envelope = self.poll_envelope(&driver, &body);
        let actions = driver.session.send(envelope);
        self.inner.run_actions(&mut driver, actions);
    }

    /// Submit a Q&A question for an event. Returns the generated question
    /// id.
    pub async fn ask_question(&self, event_id: &str, question: &str) -> String {
        let mut driver = self.inner.driver.lock().await;
        let question_id = self.inner.env.envelope_id();
        let body = QaBody {
            action: QaActionKind::Ask,
            question_id: question_id.clone(),
            question: Some(question.to_string()),
            answer: None,
            upvotes: None,
        };
        let envelope = self.qa_envelope(&driver, &body).with_event(event_id);
        let actions = driver.session.send(envelope);
        self.inner.run_actions(&mut driver, actions);
        question_id
    }

    /// Upvote a question, with the same optimistic bookkeeping as poll
    /// votes.
    pub async fn upvote_question(&self, question_id: &str) {
        let mut driver = self.inner.driver.lock().await;
        driver.tallies.record_local_upvote(question_id);
        let body = QaBody {
            action: QaActionKind::Upvote,
            question_id: question_id.to_string(),
            question: None,
            answer: None,
            upvotes: None,
        };
        let envelope = self.qa_envelope(&driver, &body);
        let actions = driver.session.send(envelope);
        self.inner.run_actions(&mut driver, actions);
    }

    /// Answer a question.
    pub async fn answer_question(&self, question_id: &str, answer: &str) {
        let mut driver = self.inner.driver.lock().await;
        let body = QaBody {
            action: QaActionKind::Answer,
            question_id: question_id.to_string(),
            question: None,
            answer: Some(answer.to_string()),
            upvotes: None,
        };
        let envelope = self.qa_envelope(&driver, &body);
        let actions = driver.session.send(envelope);
        self.inner.run_actions(&mut driver, actions);
    }

    fn poll_envelope(&self, driver: &Driver<E>, body: &PollBody) -> Envelope {
        let user_id = driver.session.user_id().unwrap_or_default().to_string();
        self.inner.build_envelope(EventKind::Poll, body, None, &user_id)
    }

    fn qa_envelope(&self, driver: &Driver<E>, body: &QaBody) -> Envelope {
        let user_id = driver.session.user_id().unwrap_or_default().to_string();
        self.inner.build_envelope(EventKind::Qa, body, None, &user_id)
    }

    /// Signal that the user started typing in a room.
    pub async fn start_typing(&self, room_id: &str) {
        self.typing_signal(room_id, UserActionKind::TypingStart).await;
    }

    /// Signal that the user stopped typing in a room.
    pub async fn stop_typing(&self, room_id: &str) {
        self.typing_signal(room_id, UserActionKind::TypingStop).await;
    }

    /// Typing indicators are ephemeral: sent only while connected, never
    /// queued for a later flush.
    async fn typing_signal(&self, room_id: &str, action: UserActionKind) {
        let mut driver = self.inner.driver.lock().await;
        let user_id = driver.session.user_id().unwrap_or_default().to_string();
        let body = UserActionBody { action, room_id: room_id.to_string() };
        let envelope =
            self.inner.build_envelope(EventKind::UserAction, &body, Some(room_id), &user_id);
        let actions = driver.session.send_ephemeral(envelope);
        self.inner.run_actions(&mut driver, actions);
    }

    /// Subscribe a handler to a bus topic.
    pub async fn on(
        &self,
        topic: Topic,
        handler: impl FnMut(&BusPayload) -> HandlerResult + Send + 'static,
    ) -> SubscriptionId {
        self.inner.driver.lock().await.bus.on(topic, handler)
    }

    /// Remove a subscription. Returns whether anything was removed.
    pub async fn off(&self, topic: &Topic, id: SubscriptionId) -> bool {
        self.inner.driver.lock().await.bus.off(topic, id)
    }

    /// Synchronous-style status snapshot.
    pub async fn connection_status(&self) -> ConnectionStatus {
        self.inner.driver.lock().await.session.status()
    }

    /// Cached chat history for a room, oldest first.
    ///
    /// `before` filters to envelopes with a timestamp strictly earlier; at
    /// most `limit` entries (the newest matching ones) are returned.
    pub async fn get_message_history(
        &self,
        room_id: &str,
        limit: usize,
        before: Option<u64>,
    ) -> Vec<Envelope> {
        let driver = self.inner.driver.lock().await;
        let Some(entries) = driver.chat_history.get(room_id) else {
            return Vec::new();
        };
        let mut matching: Vec<Envelope> = entries
            .iter()
            .filter(|e| before.is_none_or(|cutoff| e.timestamp < cutoff))
            .cloned()
            .collect();
        if matching.len() > limit {
            matching.drain(..matching.len() - limit);
        }
        matching
    }

    /// Cached `event_update` envelopes for one event, oldest first, at most
    /// `limit` (the newest ones).
    pub async fn get_event_updates(&self, event_id: &str, limit: usize) -> Vec<Envelope> {
        let driver = self.inner.driver.lock().await;
        let mut matching: Vec<Envelope> = driver
            .event_updates
            .iter()
            .filter(|e| e.event_id.as_deref() == Some(event_id))
            .cloned()
            .collect();
        if matching.len() > limit {
            matching.drain(..matching.len() - limit);
        }
        matching
    }

    /// Local tally for a poll option (optimistic until the server echoes).
    pub async fn poll_vote_count(&self, poll_id: &str, option_id: &str) -> u64 {
        self.inner.driver.lock().await.tallies.vote_count(poll_id, option_id)
    }

    /// Local upvote tally for a question.
    pub async fn question_upvote_count(&self, question_id: &str) -> u64 {
        self.inner.driver.lock().await.tallies.upvote_count(question_id)
    }

    /// Tear the session down: cancel all tasks, close the transport, drop
    /// every subscription and cache. Idempotent.
    pub async fn disconnect(&self) {
        let mut driver = self.inner.driver.lock().await;
        let actions = driver.session.disconnect();
        self.inner.run_actions(&mut driver, actions);
        driver.bus.clear();
        driver.chat_history.clear();
        driver.event_updates.clear();
        driver.tallies.clear();
    }
}

impl<T: Transport, E: Environment> Inner<T, E> {
    /// Execute a batch of session actions, in order.
    fn run_actions(self: &Arc<Self>, driver: &mut Driver<E>, actions: Vec<SessionAction>) {
        let mut work: VecDeque<SessionAction> = actions.into();
        while let Some(action) = work.pop_front() {
            match action {
                // Transmit carries loss-tolerant traffic (rejoins, heartbeats,
                // typing). Acknowledged sends flow through FlushQueue, which
                // re-parks an envelope the link refuses.
                SessionAction::Transmit(envelope) => {
                    if let Some(tx) = &driver.outbound {
                        if let Err(error) = tx.try_send(envelope) {
                            tracing::warn!(%error, "outbound link rejected envelope");
                        }
                    } else {
                        tracing::warn!("transmit requested without a live link");
                    }
                },
                SessionAction::Dial { attempt, delay } => self.spawn_dial(driver, attempt, delay),
                SessionAction::FlushQueue => {
                    let outbound = driver.outbound.clone();
                    let more = driver.session.flush_queue(|envelope| {
                        outbound
                            .as_ref()
                            .is_some_and(|tx| tx.try_send(envelope.clone()).is_ok())
                    });
                    work.extend(more);
                },
                SessionAction::Announce { topic, payload } => driver.bus.emit(&topic, &payload),
                SessionAction::Deliver(envelope) => self.deliver(driver, envelope),
                SessionAction::Log { message } => tracing::debug!("{message}"),
                SessionAction::HangUp => driver.abort_all(),
            }
        }
    }

    /// Route one validated inbound envelope: caches, collaborators, then the
    /// bus.
    fn deliver(&self, driver: &mut Driver<E>, envelope: Envelope) {
        match &envelope.kind {
            EventKind::Chat => {
                if let Some(room_id) = &envelope.room_id {
                    self.history.record(&envelope);
                    let entries = driver.chat_history.entry(room_id.clone()).or_default();
                    entries.push(envelope.clone());
                    if entries.len() > ROOM_HISTORY_CAP {
                        let excess = entries.len() - ROOM_HISTORY_CAP;
                        entries.drain(..excess);
                    }
                }
            },
            EventKind::EventUpdate => {
                driver.event_updates.push(envelope.clone());
                if driver.event_updates.len() > EVENT_UPDATE_CAP {
                    let excess = driver.event_updates.len() - EVENT_UPDATE_CAP;
                    driver.event_updates.drain(..excess);
                }
            },
            EventKind::Notification => self.notifications.notify(&envelope),
            EventKind::Poll => {
                if let Ok(body) = payloads::from_data::<PollBody>(&envelope.data) {
                    driver.tallies.reconcile_poll(&body);
                }
            },
            EventKind::Qa => {
                if let Ok(body) = payloads::from_data::<QaBody>(&envelope.data) {
                    driver.tallies.reconcile_question(&body);
                }
            },
            _ => {},
        }
        driver.bus.emit_envelope(&envelope);
    }

    /// Wire a fresh link into the session and spawn its tasks.
    fn attach_link(self: &Arc<Self>, driver: &mut Driver<E>, link: TransportLink) {
        let actions = driver.session.transport_connected(self.env.now());
        if driver.session.state() != SessionState::Connected {
            // The dial raced a manual disconnect; the session asked for the
            // fresh link to be dropped.
            self.run_actions(driver, actions);
            return;
        }

        driver.abort_link();
        driver.outbound = Some(link.outbound);
        driver.recv_task = Some(self.spawn_recv(link.inbound));
        driver.ticker_task = Some(self.spawn_ticker());
        self.run_actions(driver, actions);
    }

    fn spawn_dial(self: &Arc<Self>, driver: &mut Driver<E>, attempt: u32, delay: Duration) {
        let user_id = driver.session.user_id().unwrap_or_default().to_string();
        if let Some(old) = driver.dial_task.take() {
            old.abort();
        }

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            inner.env.sleep(delay).await;
            let result = inner.transport.connect(&user_id).await;
            let mut driver = inner.driver.lock().await;
            driver.dial_task = None;
            match result {
                Ok(link) => inner.attach_link(&mut driver, link),
                Err(error) => {
                    tracing::debug!(%error, attempt, "dial attempt failed");
                    let actions = driver.session.dial_failed(inner.env.now());
                    inner.run_actions(&mut driver, actions);
                },
            }
        });
        driver.dial_task = Some(handle.abort_handle());
    }

    fn spawn_recv(self: &Arc<Self>, mut inbound: mpsc::Receiver<Envelope>) -> AbortHandle {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Some(envelope) => {
                        let mut driver = inner.driver.lock().await;
                        let actions = driver.session.handle_envelope(envelope, inner.env.now());
                        inner.run_actions(&mut driver, actions);
                    },
                    None => {
                        let mut driver = inner.driver.lock().await;
                        driver.outbound = None;
                        driver.recv_task = None;
                        if let Some(ticker) = driver.ticker_task.take() {
                            ticker.abort();
                        }
                        let actions =
                            driver.session.transport_lost("link closed", inner.env.now());
                        inner.run_actions(&mut driver, actions);
                        return;
                    },
                }
            }
        })
        .abort_handle()
    }

    fn spawn_ticker(self: &Arc<Self>) -> AbortHandle {
        let period = self.config.heartbeat_interval / TICKS_PER_INTERVAL;
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                inner.env.sleep(period).await;
                let mut driver = inner.driver.lock().await;
                let actions = driver.session.tick(inner.env.now());
                inner.run_actions(&mut driver, actions);
            }
        })
        .abort_handle()
    }

    fn build_envelope<B: serde::Serialize>(
        &self,
        kind: EventKind,
        body: &B,
        room_id: Option<&str>,
        user_id: &str,
    ) -> Envelope {
        let data = payloads::to_data(body).unwrap_or(serde_json::Value::Null);
        let mut envelope =
            Envelope::new(self.env.envelope_id(), kind, data, self.env.unix_millis());
        if !user_id.is_empty() {
            envelope = envelope.with_user(user_id);
        }
        if let Some(room_id) = room_id {
            envelope = envelope.with_room(room_id);
        }
        envelope
    }
}
