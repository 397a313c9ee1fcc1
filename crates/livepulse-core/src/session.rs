//! Session lifecycle state machine.
//!
//! Orchestrates connection establishment, backoff-driven reconnection,
//! heartbeat liveness, offline queueing, and room rejoin. Uses the action
//! pattern: methods take events plus the current time and return actions for
//! the driver to execute. This keeps the state machine pure (no I/O) and
//! makes every ordering property testable without a socket.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ initialize  ┌────────────┐  success   ┌───────────┐
//! │ Disconnected │────────────>│ Connecting │───────────>│ Connected │
//! └──────────────┘             └────────────┘            └───────────┘
//!        ^                           │ failure                 │ drop /
//!        │ disconnect()              v                         │ heartbeat
//!        │                    ┌──────────────┐                 │ timeout
//!        └────────────────────│ Reconnecting │<────────────────┘
//!                             └──────────────┘
//!                                    │ failure, attempts == max
//!                                    v
//!                               ┌────────┐
//!                               │ Failed │  (terminal)
//!                               └────────┘
//! ```
//!
//! Transport errors never cross the public API: failure surfaces as state
//! plus announced bus events, and callers observe via [`Session::status`] or
//! subscriptions.

use std::time::Duration;

use livepulse_proto::{
    Envelope, EventKind,
    payloads::{self, HeartbeatBody, UserActionBody, UserActionKind},
};

use crate::{
    bus::{BusPayload, Topic},
    env::Environment,
    error::SessionError,
    queue::MessageQueue,
    rooms::RoomRegistry,
};

/// Delay before the first reconnection attempt; doubles per attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Reconnection attempts before the session fails terminally.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Interval between outbound heartbeat envelopes while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Multiples of the heartbeat interval without any inbound traffic before
/// the session is declared dropped.
pub const DEFAULT_LIVENESS_FACTOR: u32 = 3;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport. Initial state, and the result of `disconnect()`.
    Disconnected,
    /// First transport establishment in progress.
    Connecting,
    /// Live session; traffic flows immediately.
    Connected,
    /// Transport lost; backoff-scheduled attempts are running.
    Reconnecting,
    /// Attempt cap reached. Terminal: no further automatic retries.
    Failed,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backoff base: delay for attempt n is `base_delay * 2^(n-1)`.
    pub base_delay: Duration,
    /// Attempt cap before the terminal `Failed` state.
    pub max_attempts: u32,
    /// Heartbeat emission interval while connected.
    pub heartbeat_interval: Duration,
    /// Liveness window, in multiples of the heartbeat interval.
    pub liveness_factor: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            liveness_factor: DEFAULT_LIVENESS_FACTOR,
        }
    }
}

/// Actions returned by the session state machine.
///
/// The driver executes these in order. None of them may be skipped: dropping
/// a `Dial` strands the session in `Reconnecting`, dropping a `HangUp` leaks
/// the transport and its timers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Hand this envelope to the transport.
    Transmit(Envelope),

    /// Attempt transport establishment after `delay`.
    Dial {
        /// Attempt number (0 for the initial connect, then 1..=max).
        attempt: u32,
        /// How long to wait before dialing.
        delay: Duration,
    },

    /// Drain the offline queue through [`Session::flush_queue`].
    FlushQueue,

    /// Publish a lifecycle event on the bus.
    Announce {
        /// Bus topic.
        topic: Topic,
        /// Payload for subscribers.
        payload: BusPayload,
    },

    /// Fan an inbound envelope out to the catch-all and kind topics.
    Deliver(Envelope),

    /// Forward to the logging layer.
    Log {
        /// Log line.
        message: String,
    },

    /// Close the transport and cancel every outstanding timer.
    HangUp,
}

/// Synchronous status snapshot for callers that poll instead of subscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Whether the session is in `Connected`.
    pub connected: bool,
    /// Full state, for callers that distinguish `Reconnecting` from `Failed`.
    pub state: SessionState,
    /// Consecutive failed attempts in the current reconnect cycle; 0 while
    /// connected.
    pub reconnect_attempts: u32,
    /// Rooms currently joined (sorted).
    pub rooms: Vec<String>,
}

/// The single logical session against the message bus.
///
/// Owns the offline queue and the room registry exclusively; the driver owns
/// the transport and the bus. Exactly one `Session` exists per logical
/// connection.
pub struct Session<E: Environment> {
    env: E,
    config: SessionConfig,
    state: SessionState,
    user_id: Option<String>,
    connection_id: Option<String>,
    reconnect_attempts: u32,
    queue: MessageQueue,
    rooms: RoomRegistry,
    last_activity: Option<E::Instant>,
    last_heartbeat: Option<E::Instant>,
    failure_announced: bool,
}

impl<E: Environment> Session<E> {
    /// Create a new session in `Disconnected`.
    pub fn new(env: E, config: SessionConfig) -> Self {
        Self {
            env,
            config,
            state: SessionState::Disconnected,
            user_id: None,
            connection_id: None,
            reconnect_attempts: 0,
            queue: MessageQueue::new(),
            rooms: RoomRegistry::new(),
            last_activity: None,
            last_heartbeat: None,
            failure_announced: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id assigned to the current transport link. `None` unless connected.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// User this session was initialized for.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Number of envelopes parked for the next flush.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Joined-room cache.
    #[must_use]
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Synchronous status snapshot.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.state == SessionState::Connected,
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            rooms: self.rooms.snapshot(),
        }
    }

    /// Begin session establishment for `user_id`.
    ///
    /// Valid from `Disconnected` and from the terminal `Failed` state (the
    /// owning layer may explicitly restart a failed session).
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if establishment is already underway:
    ///   a programmer error, not a network condition.
    pub fn initialize(
        &mut self,
        user_id: impl Into<String>,
        now: E::Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        match self.state {
            SessionState::Disconnected | SessionState::Failed => {},
            state => {
                return Err(SessionError::InvalidState { state, operation: "initialize" });
            },
        }

        let user_id = user_id.into();
        self.state = SessionState::Connecting;
        self.reconnect_attempts = 0;
        self.failure_announced = false;
        self.connection_id = None;
        self.last_activity = Some(now);
        self.user_id = Some(user_id.clone());

        Ok(vec![
            SessionAction::Log { message: format!("initializing session for user {user_id}") },
            SessionAction::Dial { attempt: 0, delay: Duration::ZERO },
        ])
    }

    /// The transport reported a successfully established link.
    ///
    /// On entry into `Connected` the attempt counter resets, every room in
    /// the registry snapshot is rejoined, and only then is the offline queue
    /// flushed; queued traffic must not reach peers before the rejoins.
    pub fn transport_connected(&mut self, now: E::Instant) -> Vec<SessionAction> {
        match self.state {
            SessionState::Connecting | SessionState::Reconnecting => {},
            // A dial raced a manual disconnect; drop the fresh link.
            _ => return vec![SessionAction::HangUp],
        }

        self.state = SessionState::Connected;
        self.reconnect_attempts = 0;
        self.connection_id = Some(self.env.envelope_id());
        self.last_activity = Some(now);
        self.last_heartbeat = None;

        let mut actions = vec![
            SessionAction::Log { message: "session connected".to_string() },
            SessionAction::Announce { topic: Topic::Connected, payload: BusPayload::Empty },
        ];

        for room_id in self.rooms.snapshot() {
            actions.push(SessionAction::Transmit(
                self.user_action_envelope(UserActionKind::JoinRoom, &room_id),
            ));
            actions.push(SessionAction::Announce {
                topic: Topic::RoomJoined,
                payload: BusPayload::Room { room_id },
            });
        }

        actions.push(SessionAction::FlushQueue);
        actions
    }

    /// Drain the offline queue through `sender`, announcing each delivery.
    ///
    /// `sender` returns whether the transport accepted the envelope; a
    /// refusal reinserts that envelope at the head and ends the cycle so
    /// later traffic is never sent out of turn.
    pub fn flush_queue(
        &mut self,
        mut sender: impl FnMut(&Envelope) -> bool,
    ) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        let report = self.queue.flush(|envelope| {
            if sender(envelope) {
                actions.push(SessionAction::Announce {
                    topic: Topic::MessageSent,
                    payload: BusPayload::Delivery { id: envelope.id.clone() },
                });
                true
            } else {
                false
            }
        });

        if report.stalled {
            actions.push(SessionAction::Log {
                message: format!(
                    "queue flush stalled after {} envelopes, {} still parked",
                    report.sent,
                    self.queue.len()
                ),
            });
        }
        actions
    }

    /// The established transport link died.
    pub fn transport_lost(&mut self, reason: &str, now: E::Instant) -> Vec<SessionAction> {
        match self.state {
            SessionState::Connected => {
                let error = SessionError::Transport(reason.to_string());
                self.connection_id = None;

                let mut actions = vec![
                    SessionAction::Log { message: error.to_string() },
                    SessionAction::Announce {
                        topic: Topic::Disconnected,
                        payload: BusPayload::Empty,
                    },
                ];
                actions.extend(self.begin_reconnect());
                actions
            },
            SessionState::Connecting | SessionState::Reconnecting => self.dial_failed(now),
            SessionState::Disconnected | SessionState::Failed => vec![],
        }
    }

    /// A dial attempt failed to establish a link.
    ///
    /// Attempts below the cap schedule the next dial with doubled delay;
    /// hitting the cap transitions to the terminal `Failed` state and
    /// announces `reconnection_failed` exactly once.
    pub fn dial_failed(&mut self, _now: E::Instant) -> Vec<SessionAction> {
        match self.state {
            SessionState::Connecting => self.begin_reconnect(),
            SessionState::Reconnecting => {
                if self.reconnect_attempts >= self.config.max_attempts {
                    self.state = SessionState::Failed;
                    let error =
                        SessionError::ReconnectExhausted { attempts: self.reconnect_attempts };

                    let mut actions = vec![
                        SessionAction::Log { message: error.to_string() },
                        SessionAction::HangUp,
                    ];
                    if !self.failure_announced {
                        self.failure_announced = true;
                        actions.push(SessionAction::Announce {
                            topic: Topic::ReconnectionFailed,
                            payload: BusPayload::Exhausted { attempts: self.reconnect_attempts },
                        });
                    }
                    actions
                } else {
                    self.reconnect_attempts += 1;
                    self.schedule_dial()
                }
            },
            _ => vec![],
        }
    }

    /// Inbound envelope from the transport.
    ///
    /// Any inbound traffic counts as liveness. Envelopes that violate the
    /// wire contract are dropped and logged, never delivered.
    pub fn handle_envelope(&mut self, envelope: Envelope, now: E::Instant) -> Vec<SessionAction> {
        if let Err(error) = envelope.validate() {
            let error = SessionError::Validation(error);
            return vec![SessionAction::Log {
                message: format!("dropping inbound envelope: {error}"),
            }];
        }

        self.last_activity = Some(now);
        vec![SessionAction::Deliver(envelope)]
    }

    /// Send an envelope.
    ///
    /// Every send passes through the queue. While `Connected` a flush
    /// follows immediately, so the `message_sent` acknowledgment fires only
    /// once the transport actually accepts the envelope; a refusal (link
    /// saturated or just closed) leaves it parked at the head for the next
    /// flush. While not `Connected` it stays queued FIFO and the caller
    /// observes nothing unusual (no data loss, no error).
    pub fn send(&mut self, envelope: Envelope) -> Vec<SessionAction> {
        let id = envelope.id.clone();
        self.queue.enqueue(envelope, self.env.unix_millis());
        if self.state == SessionState::Connected {
            vec![SessionAction::FlushQueue]
        } else {
            vec![SessionAction::Log {
                message: format!(
                    "parked envelope {id} while {:?} ({} queued)",
                    self.state,
                    self.queue.len()
                ),
            }]
        }
    }

    /// Send a transient signal that must not outlive the moment.
    ///
    /// Transmitted only while `Connected`; otherwise dropped, never queued,
    /// and no delivery acknowledgment is announced either way. Used for
    /// typing indicators, where replaying a stale signal after a reconnect
    /// would be wrong.
    pub fn send_ephemeral(&mut self, envelope: Envelope) -> Vec<SessionAction> {
        if self.state == SessionState::Connected {
            vec![SessionAction::Transmit(envelope)]
        } else {
            vec![SessionAction::Log {
                message: format!(
                    "dropped transient envelope {} while {:?}",
                    envelope.id, self.state
                ),
            }]
        }
    }

    /// Join a room. Idempotent: a second join re-announces but does not
    /// re-transmit.
    pub fn join_room(&mut self, room_id: &str) -> Vec<SessionAction> {
        let newly_joined = self.rooms.join(room_id);

        let mut actions = Vec::new();
        if newly_joined && self.state == SessionState::Connected {
            actions.push(SessionAction::Transmit(
                self.user_action_envelope(UserActionKind::JoinRoom, room_id),
            ));
        }
        actions.push(SessionAction::Announce {
            topic: Topic::RoomJoined,
            payload: BusPayload::Room { room_id: room_id.to_string() },
        });
        actions
    }

    /// Leave a room. Idempotent.
    pub fn leave_room(&mut self, room_id: &str) -> Vec<SessionAction> {
        let was_joined = self.rooms.leave(room_id);

        let mut actions = Vec::new();
        if was_joined && self.state == SessionState::Connected {
            actions.push(SessionAction::Transmit(
                self.user_action_envelope(UserActionKind::LeaveRoom, room_id),
            ));
        }
        actions.push(SessionAction::Announce {
            topic: Topic::RoomLeft,
            payload: BusPayload::Room { room_id: room_id.to_string() },
        });
        actions
    }

    /// Periodic maintenance: heartbeat emission, liveness detection, and
    /// retry of traffic stalled by a saturated link.
    ///
    /// While connected, a heartbeat envelope is transmitted each interval,
    /// and any envelopes still queued (the transport refused them on a
    /// previous flush) get another flush. Silence (no inbound traffic of
    /// any kind) past `heartbeat_interval * liveness_factor` declares the
    /// link dead and begins the reconnect path.
    pub fn tick(&mut self, now: E::Instant) -> Vec<SessionAction> {
        if self.state != SessionState::Connected {
            return vec![];
        }

        if let Some(last) = self.last_activity {
            let elapsed = now - last;
            let window = self.config.heartbeat_interval * self.config.liveness_factor;
            if elapsed > window {
                let error = SessionError::HeartbeatTimeout { elapsed };
                self.connection_id = None;

                let mut actions = vec![
                    SessionAction::Log { message: error.to_string() },
                    SessionAction::HangUp,
                    SessionAction::Announce {
                        topic: Topic::Disconnected,
                        payload: BusPayload::Empty,
                    },
                ];
                actions.extend(self.begin_reconnect());
                return actions;
            }
        }

        let due = match self.last_heartbeat {
            None => true,
            Some(last) => now - last >= self.config.heartbeat_interval,
        };

        let mut actions = Vec::new();
        if due {
            self.last_heartbeat = Some(now);
            actions.push(SessionAction::Transmit(self.heartbeat_envelope()));
        }
        if !self.queue.is_empty() {
            actions.push(SessionAction::FlushQueue);
        }
        actions
    }

    /// Idempotent teardown.
    ///
    /// Clears the queue, the room set, and the attempt counter; the driver
    /// must react to `HangUp` by cancelling every outstanding timer and
    /// dropping all bus subscriptions. Calling this again is a no-op.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        let prior = self.state;
        if prior == SessionState::Disconnected && self.queue.is_empty() && self.rooms.is_empty() {
            return vec![];
        }

        self.state = SessionState::Disconnected;
        self.reconnect_attempts = 0;
        self.connection_id = None;
        self.last_activity = None;
        self.last_heartbeat = None;
        self.failure_announced = false;
        self.queue.clear();
        self.rooms.clear();

        let mut actions = vec![
            SessionAction::Log { message: "session torn down".to_string() },
            SessionAction::HangUp,
        ];
        if prior == SessionState::Connected {
            actions.push(SessionAction::Announce {
                topic: Topic::Disconnected,
                payload: BusPayload::Empty,
            });
        }
        actions
    }

    /// Enter `Reconnecting` and schedule the first attempt.
    fn begin_reconnect(&mut self) -> Vec<SessionAction> {
        self.state = SessionState::Reconnecting;
        self.reconnect_attempts = 1;
        self.schedule_dial()
    }

    /// Schedule the dial for the current attempt number.
    fn schedule_dial(&mut self) -> Vec<SessionAction> {
        let attempt = self.reconnect_attempts;
        let delay = self.backoff_delay(attempt);
        vec![
            SessionAction::Announce {
                topic: Topic::Reconnecting,
                payload: BusPayload::Retry { attempt, delay },
            },
            SessionAction::Dial { attempt, delay },
        ]
    }

    /// Delay for attempt n: `base_delay * 2^(n-1)`, uncapped below the
    /// attempt ceiling.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config.base_delay * (1u32 << (attempt.saturating_sub(1)))
    }

    fn user_action_envelope(&self, action: UserActionKind, room_id: &str) -> Envelope {
        let body = UserActionBody { action, room_id: room_id.to_string() };
        let data = payloads::to_data(&body).unwrap_or(serde_json::Value::Null);
        let mut envelope = Envelope::new(
            self.env.envelope_id(),
            EventKind::UserAction,
            data,
            self.env.unix_millis(),
        )
        .with_room(room_id);
        if let Some(user_id) = &self.user_id {
            envelope = envelope.with_user(user_id.clone());
        }
        envelope
    }

    fn heartbeat_envelope(&self) -> Envelope {
        let data = payloads::to_data(&HeartbeatBody::new()).unwrap_or(serde_json::Value::Null);
        let mut envelope = Envelope::new(
            self.env.envelope_id(),
            EventKind::SystemAlert,
            data,
            self.env.unix_millis(),
        );
        if let Some(user_id) = &self.user_id {
            envelope = envelope.with_user(user_id.clone());
        }
        envelope
    }
}
