//! The realtime client.
//!
//! [`RealtimeClient`] owns one transport connection and drives it through
//! the [`ConnectionState`] machine:
//!
//! ```text
//!  Disconnected ──connect()──▶ Connecting ──connected──▶ Connected
//!       ▲                          ▲                         │
//!       │                          │ timer              disconnected / error
//!  disconnect()               Reconnecting ◀─────────────────┤
//!                                  │ attempts exhausted      │ unauthorized
//!                                  ▼                         ▼
//!                                Error ◀─────────────────────┘
//! ```
//!
//! All mutable state lives behind a single mutex that is never held across
//! an `.await`. Each transport connection is a *session*; events from a
//! session that has since been replaced or torn down are ignored.

use beacon_protocol::TriggerRequest;
use beacon_transport::{
    ChannelEvent, ChannelHandle, ConnectParams, EventStream, Transport, TransportEvent,
    MESSAGE_EVENT,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::api::{AuthApi, MemoryTokenStore, TokenStore, TriggerApi, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::backoff::ReconnectPolicy;
use crate::channel::validate_channel_name;
use crate::config::ClientOptions;
use crate::error::{codes, ClientError, ConnectionError};
use crate::handlers::{
    invoke_isolated, ErrorObserver, MessageHandler, ObserverSet, StateObserver, TypeHandlers,
};
use crate::message::{payload_size, InboundMessage, QueuedMessage, SendOptions, SendReceipt, SubscriptionId};
use crate::queue::MessageQueue;
use crate::registry::{BindOutcome, ChannelRegistry};
use crate::state::ConnectionState;
use crate::stats::Stats;
use crate::token::{is_placeholder_key, RefreshPlan};

type Waiter = oneshot::Sender<Result<(), String>>;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Whether a disconnect reason means the credential was rejected.
#[must_use]
pub fn is_auth_failure(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("unauthorized") || reason.contains("auth")
}

/// A spawned one-shot timer.
struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

/// One transport connection.
struct Session {
    id: u64,
    pump: Option<JoinHandle<()>>,
    /// Queue flush and channel rebinding started by this connection.
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[derive(Default)]
struct TokenState {
    access_token: Option<String>,
    /// Epoch seconds.
    expires_at: Option<u64>,
    refresh_timer: Option<Timer>,
}

#[derive(Default)]
struct ReconnectState {
    attempts: u32,
    timer: Option<Timer>,
}

enum Notice {
    State(ConnectionState),
    Error(ConnectionError),
}

/// Observer notifications collected under the lock and dispatched after it.
#[derive(Default)]
struct Notices(Vec<Notice>);

impl Notices {
    fn error(&mut self, error: ConnectionError) {
        self.0.push(Notice::Error(error));
    }
}

struct CoreState {
    state: ConnectionState,
    registry: ChannelRegistry,
    queue: MessageQueue,
    token: TokenState,
    reconnect: ReconnectState,
    stats: Stats,
    type_handlers: TypeHandlers,
    state_observers: ObserverSet<StateObserver>,
    error_observers: ObserverSet<ErrorObserver>,
    session: Option<Session>,
    /// Bumped by every new session and every `disconnect()`.
    generation: u64,
    waiters: Vec<Waiter>,
    flushing: bool,
    next_timer: u64,
}

impl CoreState {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            registry: ChannelRegistry::default(),
            queue: MessageQueue::default(),
            token: TokenState::default(),
            reconnect: ReconnectState::default(),
            stats: Stats::default(),
            type_handlers: TypeHandlers::default(),
            state_observers: ObserverSet::new(),
            error_observers: ObserverSet::new(),
            session: None,
            generation: 0,
            waiters: Vec::new(),
            flushing: false,
            next_timer: 0,
        }
    }

    fn set_state(&mut self, next: ConnectionState, notices: &mut Notices) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        self.stats.connection_state = next;
        notices.0.push(Notice::State(next));
    }

    fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id)
    }

    fn is_current(&self, session: u64) -> bool {
        self.session_id() == Some(session)
    }

    fn begin_session(&mut self) -> u64 {
        self.abort_session();
        self.generation += 1;
        self.session = Some(Session {
            id: self.generation,
            pump: None,
            tasks: Vec::new(),
        });
        self.generation
    }

    /// Forget the session, letting its pump run down on its own.
    fn detach_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.abort_tasks();
        }
        self.registry.reset_bindings();
    }

    /// Forget the session and stop its pump. Returns whether one existed.
    fn abort_session(&mut self) -> bool {
        let existed = match self.session.take() {
            Some(mut session) => {
                session.abort_tasks();
                if let Some(pump) = session.pump {
                    pump.abort();
                }
                true
            }
            None => false,
        };
        self.registry.reset_bindings();
        existed
    }

    fn next_timer_id(&mut self) -> u64 {
        self.next_timer += 1;
        self.next_timer
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect.timer.take() {
            timer.handle.abort();
        }
    }

    fn cancel_refresh_timer(&mut self) {
        if let Some(timer) = self.token.refresh_timer.take() {
            timer.handle.abort();
        }
    }

    fn resolve_waiters(&mut self) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn fail_waiters(&mut self, reason: &str) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }
}

struct Inner {
    options: ClientOptions,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    auth_api: Arc<dyn AuthApi>,
    trigger_api: Arc<dyn TriggerApi>,
    token_store: Arc<dyn TokenStore>,
    core: Mutex<CoreState>,
}

enum SubscribeStep {
    Done,
    Bind(u64),
    Join(oneshot::Receiver<Result<(), String>>),
}

enum ConnectStep {
    Done,
    Join(oneshot::Receiver<Result<(), String>>, Option<u64>),
    Open {
        session: u64,
        token: Option<String>,
        waiter: oneshot::Receiver<Result<(), String>>,
    },
}

struct FlushGuard<'a>(&'a Inner);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.core.lock().flushing = false;
    }
}

impl Inner {
    fn notify(&self, notices: Notices) {
        if notices.0.is_empty() {
            return;
        }
        let (state_observers, error_observers) = {
            let core = self.core.lock();
            (
                core.state_observers.snapshot(),
                core.error_observers.snapshot(),
            )
        };

        for notice in notices.0 {
            match notice {
                Notice::State(state) => {
                    for observer in &state_observers {
                        invoke_isolated("state_change", || observer(state));
                    }
                }
                Notice::Error(error) => {
                    warn!(
                        code = %error.code,
                        message = %error.message,
                        recoverable = error.recoverable,
                        "Connection error"
                    );
                    for observer in &error_observers {
                        invoke_isolated("error", || observer(&error));
                    }
                }
            }
        }
    }

    async fn connect(self: &Arc<Self>, token: Option<String>, manual: bool) -> Result<(), ClientError> {
        let token = token.or_else(|| self.token_store.get(ACCESS_TOKEN_KEY));
        let mut notices = Notices::default();

        let step = {
            let mut core = self.core.lock();
            match core.state {
                state if state.can_connect() => {
                    if token.is_none() && !self.options.environment.is_development() {
                        return Err(ClientError::AuthenticationRequired);
                    }

                    if manual {
                        core.reconnect.attempts = 0;
                        core.cancel_reconnect_timer();
                    }

                    if self
                        .options
                        .provider_key
                        .as_deref()
                        .is_some_and(is_placeholder_key)
                    {
                        info!("Realtime provider is not configured, staying disconnected");
                        core.cancel_reconnect_timer();
                        core.set_state(ConnectionState::Disconnected, &mut notices);
                        ConnectStep::Done
                    } else {
                        core.token.access_token = token.clone();
                        core.set_state(ConnectionState::Connecting, &mut notices);
                        let session = core.begin_session();
                        let (tx, rx) = oneshot::channel();
                        core.waiters.push(tx);
                        ConnectStep::Open {
                            session,
                            token,
                            waiter: rx,
                        }
                    }
                }
                ConnectionState::Connecting => {
                    let (tx, rx) = oneshot::channel();
                    core.waiters.push(tx);
                    ConnectStep::Join(rx, core.session_id())
                }
                _ => ConnectStep::Done,
            }
        };
        self.notify(notices);

        match step {
            ConnectStep::Done => Ok(()),
            ConnectStep::Join(waiter, session) => self.await_connected(waiter, session).await,
            ConnectStep::Open {
                session,
                token,
                waiter,
            } => {
                info!(
                    transport = self.transport.name(),
                    session,
                    authenticated = token.is_some(),
                    "Connecting"
                );
                let params = ConnectParams {
                    url: self.options.url.clone(),
                    token,
                };
                match self.transport.connect(params).await {
                    Ok(events) => self.start_pump(session, events),
                    Err(e) => {
                        let error = ConnectionError::new(
                            codes::CONNECT_FAILED,
                            e.to_string(),
                            e.is_recoverable(),
                        );
                        self.handle_fault(session, error).await;
                        return Err(ClientError::Transport(e));
                    }
                }
                self.await_connected(waiter, Some(session)).await
            }
        }
    }

    fn start_pump(self: &Arc<Self>, session: u64, events: EventStream) {
        let pump = tokio::spawn(pump_events(Arc::downgrade(self), session, events));
        let mut core = self.core.lock();
        match core.session.as_mut() {
            Some(current) if current.id == session => current.pump = Some(pump),
            _ => pump.abort(),
        }
    }

    async fn await_connected(
        self: &Arc<Self>,
        waiter: oneshot::Receiver<Result<(), String>>,
        session: Option<u64>,
    ) -> Result<(), ClientError> {
        let limit = self.options.connect_timeout();
        match tokio::time::timeout(limit, waiter).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(ClientError::ConnectionClosed(reason)),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed(
                "connection attempt abandoned".to_string(),
            )),
            Err(_) => {
                let timeout_ms = self.options.connect_timeout_ms;
                let pending = {
                    let core = self.core.lock();
                    if core.state.is_connected() {
                        return Ok(());
                    }
                    match session {
                        Some(id) if core.is_current(id) => Some(id),
                        _ => None,
                    }
                };
                if let Some(session) = pending {
                    let error = ConnectionError::new(
                        codes::CONNECT_TIMEOUT,
                        format!("provider did not accept the connection within {}ms", timeout_ms),
                        true,
                    );
                    self.handle_fault(session, error).await;
                }
                Err(ClientError::ConnectTimeout(timeout_ms))
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, session: u64, event: TransportEvent) {
        match event {
            TransportEvent::Connected { socket_id } => self.on_connected(session, socket_id),
            TransportEvent::Disconnected { reason } => self.on_disconnected(session, &reason),
            TransportEvent::Error(fault) => {
                self.handle_fault(session, ConnectionError::from_fault(&fault))
                    .await;
            }
            TransportEvent::Message(event) => {
                if self.core.lock().is_current(session) {
                    self.dispatch(event);
                }
            }
        }
    }

    fn on_connected(self: &Arc<Self>, session: u64, socket_id: Option<String>) {
        let mut notices = Notices::default();
        let (token, flush, channels) = {
            let mut core = self.core.lock();
            if !core.is_current(session) || core.state.is_connected() {
                return;
            }
            core.set_state(ConnectionState::Connected, &mut notices);
            core.reconnect.attempts = 0;
            core.resolve_waiters();
            (
                core.token.access_token.clone(),
                core.queue.len() > 0,
                core.registry.claim_unbound(session),
            )
        };
        self.notify(notices);
        info!(session, socket_id = ?socket_id, "Connected");

        if let Some(token) = token {
            self.schedule_token_refresh(&token);
        }

        // The pump keeps draining events while these run.
        if flush {
            let inner = Arc::clone(self);
            self.spawn_session_task(session, async move {
                if let Err(e) = inner.flush_message_queue().await {
                    inner.report(
                        session,
                        ConnectionError::new(codes::FLUSH_FAILED, e.to_string(), true),
                    );
                }
            });
        }
        if !channels.is_empty() {
            let inner = Arc::clone(self);
            self.spawn_session_task(session, async move {
                for channel in channels {
                    if let Err(e) = inner.bind_channel(&channel, session).await {
                        inner.report(
                            session,
                            ConnectionError::new(
                                codes::SUBSCRIBE_FAILED,
                                format!("{}: {}", channel, e),
                                e.is_recoverable(),
                            ),
                        );
                    }
                }
            });
        }
    }

    /// Run `work` for `session`; it is aborted when the session ends.
    fn spawn_session_task<F>(&self, session: u64, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(work);
        let mut core = self.core.lock();
        match core.session.as_mut() {
            Some(current) if current.id == session => current.tasks.push(task),
            _ => task.abort(),
        }
    }

    /// Report an error on behalf of `session`, unless it has ended.
    fn report(&self, session: u64, error: ConnectionError) {
        if !self.core.lock().is_current(session) {
            debug!(session, code = %error.code, "Dropping error from ended session");
            return;
        }
        let mut notices = Notices::default();
        notices.error(error);
        self.notify(notices);
    }

    fn on_disconnected(self: &Arc<Self>, session: u64, reason: &str) {
        let mut notices = Notices::default();
        {
            let mut core = self.core.lock();
            if !core.is_current(session) {
                return;
            }
            core.detach_session();
            info!(session, reason = %reason, "Disconnected");

            if is_auth_failure(reason) {
                core.cancel_reconnect_timer();
                let settled = if self.options.reconnect {
                    ConnectionState::Error
                } else {
                    ConnectionState::Disconnected
                };
                core.set_state(settled, &mut notices);
                notices.error(ConnectionError::new(codes::UNAUTHORIZED, reason, false));
            } else if self.options.reconnect {
                self.schedule_reconnect(&mut core, &mut notices);
            } else {
                core.set_state(ConnectionState::Disconnected, &mut notices);
            }
            core.fail_waiters(reason);
        }
        self.notify(notices);
    }

    async fn handle_fault(self: &Arc<Self>, session: u64, error: ConnectionError) {
        {
            let mut core = self.core.lock();
            if !core.is_current(session) {
                return;
            }
            core.detach_session();
        }

        self.transport.disconnect().await;

        let mut notices = Notices::default();
        {
            let mut core = self.core.lock();
            // A connect() or disconnect() while the transport closed wins.
            if core.generation != session || core.session.is_some() {
                return;
            }
            core.set_state(ConnectionState::Error, &mut notices);
            notices.error(error.clone());
            core.fail_waiters(&error.message);
            if error.recoverable && self.options.reconnect {
                self.schedule_reconnect(&mut core, &mut notices);
            }
        }
        self.notify(notices);
    }

    fn stream_ended(self: &Arc<Self>, session: u64) {
        self.on_disconnected(session, "transport stream closed");
    }

    fn schedule_reconnect(self: &Arc<Self>, core: &mut CoreState, notices: &mut Notices) {
        let attempts = core.reconnect.attempts;
        if !self.policy.allows(attempts) {
            core.cancel_reconnect_timer();
            core.set_state(ConnectionState::Error, notices);
            notices.error(ConnectionError::new(
                codes::RECONNECT_EXHAUSTED,
                format!("gave up after {} reconnection attempts", attempts),
                false,
            ));
            return;
        }

        let delay = self.policy.delay(attempts);
        core.reconnect.attempts += 1;
        core.stats.reconnect_attempts += 1;
        core.set_state(ConnectionState::Reconnecting, notices);

        let id = core.next_timer_id();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let token = {
                let mut core = inner.core.lock();
                match core.reconnect.timer.take() {
                    Some(timer) if timer.id == id => {}
                    other => {
                        core.reconnect.timer = other;
                        return;
                    }
                }
                core.token.access_token.clone()
            };
            if let Err(e) = inner.connect(token, false).await {
                debug!(error = %e, "Reconnection attempt failed");
            }
        });
        if let Some(previous) = core.reconnect.timer.replace(Timer { id, handle }) {
            previous.handle.abort();
        }

        info!(
            attempt = attempts + 1,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection"
        );
    }

    async fn disconnect(&self, reason: &str) {
        let mut notices = Notices::default();
        let had_session = {
            let mut core = self.core.lock();
            core.generation += 1;
            core.cancel_reconnect_timer();
            core.cancel_refresh_timer();
            let had_session = core.abort_session();
            core.fail_waiters(reason);
            core.set_state(ConnectionState::Disconnected, &mut notices);
            had_session
        };

        if had_session {
            info!(reason = %reason, "Disconnecting");
            self.transport.disconnect().await;
        }
        self.notify(notices);
    }

    fn dispatch(&self, event: ChannelEvent) {
        if event.event != MESSAGE_EVENT {
            trace!(channel = %event.channel, event = %event.event, "Ignoring non-message event");
            return;
        }

        let message = InboundMessage::new(event.channel, event.event, event.payload);
        let handlers = {
            let mut core = self.core.lock();
            core.stats.record_received(message.size());
            let mut handlers = core.registry.handlers_for(&message.channel);
            handlers.extend(core.type_handlers.handlers_for(&message.message_type));
            handlers
        };

        if self.options.debug {
            debug!(channel = %message.channel, payload = %message.payload, "Message received");
        }
        trace!(
            channel = %message.channel,
            message_type = %message.message_type,
            handlers = handlers.len(),
            "Dispatching message"
        );

        for handler in handlers {
            invoke_isolated("message", || handler(&message));
        }
    }

    /// Subscribe `channel` on the transport for `session` and record the outcome.
    async fn bind_channel(
        &self,
        channel: &str,
        session: u64,
    ) -> Result<(), beacon_transport::TransportError> {
        match self.transport.subscribe(channel).await {
            Ok(handle) => {
                self.complete_bind(channel, session, handle).await;
                Ok(())
            }
            Err(e) => {
                let joiners = self.core.lock().registry.fail_bind(channel, session);
                for (id, joiner) in joiners {
                    debug!(channel = %channel, subscription = %id, "Joined subscribe failed");
                    let _ = joiner.send(Err(e.to_string()));
                }
                Err(e)
            }
        }
    }

    async fn complete_bind(&self, channel: &str, session: u64, handle: ChannelHandle) {
        let outcome = self
            .core
            .lock()
            .registry
            .complete_bind(channel, session, handle.clone());
        match outcome {
            BindOutcome::Bound => debug!(channel = %channel, handle = %handle, "Channel bound"),
            BindOutcome::Orphaned => {
                debug!(channel = %channel, "Channel released while binding");
                if let Err(e) = self.transport.unsubscribe(channel).await {
                    warn!(channel = %channel, error = %e, "Failed to release channel");
                }
            }
            BindOutcome::Stale => trace!(channel = %channel, "Discarding stale bind"),
        }
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, ClientError> {
        let (registration, step) = {
            let mut core = self.core.lock();
            let registration = core
                .registry
                .register(channel, handler)
                .map_err(ClientError::InvalidChannel)?;
            let step = match (core.state, core.session_id()) {
                (ConnectionState::Connected, Some(session))
                    if core.registry.begin_bind(&registration.channel, session) =>
                {
                    SubscribeStep::Bind(session)
                }
                _ => match core.registry.join_bind(&registration.channel, &registration.id) {
                    Some(joined) => SubscribeStep::Join(joined),
                    None => SubscribeStep::Done,
                },
            };
            (registration, step)
        };

        match step {
            SubscribeStep::Done => {}
            SubscribeStep::Bind(session) => {
                if let Err(e) = self.bind_channel(&registration.channel, session).await {
                    self.core.lock().registry.remove(&registration.id);
                    return Err(ClientError::Transport(e));
                }
            }
            // A dropped sender means the channel went away with its bind.
            SubscribeStep::Join(joined) => {
                if let Ok(Err(reason)) = joined.await {
                    return Err(ClientError::SubscribeFailed {
                        channel: registration.channel,
                        reason,
                    });
                }
            }
        }
        Ok(registration.id)
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), ClientError> {
        let removal = self.core.lock().registry.remove(id);
        let Some(removal) = removal else {
            trace!(subscription = %id, "Unsubscribe of unknown handle");
            return Ok(());
        };

        if removal.release.is_some() {
            self.transport.unsubscribe(&removal.channel).await?;
        }
        Ok(())
    }

    async fn send(
        &self,
        message_type: &str,
        payload: Value,
        mut options: SendOptions,
    ) -> Result<SendReceipt, ClientError> {
        let requested = options
            .channel
            .as_deref()
            .unwrap_or(&self.options.default_channel);
        let channel = validate_channel_name(requested).map_err(ClientError::InvalidChannel)?;

        {
            let mut core = self.core.lock();
            if !core.state.is_connected() {
                options.channel = Some(channel);
                let depth = core.queue.push(message_type, payload, options);
                debug!(message_type = %message_type, depth, "Queued message while offline");
                return Ok(SendReceipt::Queued { depth });
            }
        }

        let request = TriggerRequest::new(channel, message_type, payload);
        let size = payload_size(&request.payload);
        if self.options.debug {
            debug!(channel = %request.channel, payload = %request.payload, "Sending message");
        }

        let response = match (options.await_acknowledgment, options.timeout) {
            (true, Some(limit)) => {
                tokio::time::timeout(limit, self.trigger_api.trigger(&request))
                    .await
                    .map_err(|_| ClientError::MessageTimeout(limit))??
            }
            _ => self.trigger_api.trigger(&request).await?,
        };

        if !response.is_delivered() {
            if options.await_acknowledgment {
                return Err(ClientError::NotAcknowledged);
            }
            warn!(channel = %request.channel, message_type = %message_type, "Trigger endpoint refused message");
            return Ok(SendReceipt::Refused);
        }

        self.core.lock().stats.record_sent(size);
        trace!(channel = %request.channel, bytes = size, "Message sent");
        Ok(SendReceipt::Delivered {
            message_id: response.message_id,
        })
    }

    async fn flush_message_queue(&self) -> Result<usize, ClientError> {
        let batch = {
            let mut core = self.core.lock();
            if core.flushing || !core.state.is_connected() || core.queue.len() == 0 {
                return Ok(0);
            }
            core.flushing = true;
            core.queue.snapshot()
        };
        let _guard = FlushGuard(self);

        debug!(queued = batch.len(), "Flushing message queue");
        let mut delivered = 0;
        for item in batch {
            if !self.core.lock().state.is_connected() {
                break;
            }

            let channel = item
                .options
                .channel
                .clone()
                .unwrap_or_else(|| self.options.default_channel.clone());
            let size = payload_size(&item.payload);
            let request = TriggerRequest::new(channel, item.message_type.clone(), item.payload.clone());

            let response = self.trigger_api.trigger(&request).await?;
            if !response.is_delivered() {
                return Err(ClientError::NotAcknowledged);
            }

            let mut core = self.core.lock();
            core.queue.remove(item.seq);
            core.stats.record_sent(size);
            delivered += 1;
        }

        debug!(delivered, remaining = self.core.lock().queue.len(), "Flush finished");
        Ok(delivered)
    }

    fn schedule_token_refresh(self: &Arc<Self>, token: &str) {
        let plan = RefreshPlan::for_token(token, now_secs(), self.options.refresh_margin());
        let mut core = self.core.lock();
        core.cancel_refresh_timer();
        core.token.expires_at = Some(plan.expires_at());

        let RefreshPlan::After { delay, expires_at } = plan else {
            debug!("Token carries no usable expiry, refresh disabled");
            return;
        };

        let id = core.next_timer_id();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut core = inner.core.lock();
                match core.token.refresh_timer.take() {
                    Some(timer) if timer.id == id => {}
                    other => {
                        core.token.refresh_timer = other;
                        return;
                    }
                }
            }
            inner.refresh_token_with_api().await;
        });
        core.token.refresh_timer = Some(Timer { id, handle });

        debug!(
            expires_at,
            refresh_in_secs = delay.as_secs(),
            "Token refresh scheduled"
        );
    }

    async fn refresh_token_with_api(self: &Arc<Self>) -> Option<String> {
        let Some(refresh_token) = self.token_store.get(REFRESH_TOKEN_KEY) else {
            debug!("No refresh token stored");
            return None;
        };

        let pair = match self.auth_api.refresh_token(&refresh_token).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                return None;
            }
        };

        for (key, value) in [
            (ACCESS_TOKEN_KEY, &pair.access_token),
            (REFRESH_TOKEN_KEY, &pair.refresh_token),
        ] {
            if let Err(e) = self.token_store.set(key, value) {
                warn!(key, error = %e, "Failed to persist token");
            }
        }

        self.core.lock().token.access_token = Some(pair.access_token.clone());
        self.schedule_token_refresh(&pair.access_token);
        info!("Access token refreshed");
        Some(pair.access_token)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        core.cancel_reconnect_timer();
        core.cancel_refresh_timer();
        if let Some(mut session) = core.session.take() {
            session.abort_tasks();
            if let Some(pump) = session.pump {
                pump.abort();
            }
        }
    }
}

async fn pump_events(inner: Weak<Inner>, session: u64, mut events: EventStream) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle_event(session, event).await;
    }
    if let Some(inner) = inner.upgrade() {
        inner.stream_ended(session);
    }
}

/// A handle to a realtime client.
///
/// Cloning is cheap; every clone drives the same connection. Dropping the
/// last clone cancels the client's timers and stops its event pump.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    /// Start building a client.
    #[must_use]
    pub fn builder() -> RealtimeClientBuilder {
        RealtimeClientBuilder::default()
    }

    /// Connect to the provider.
    ///
    /// Uses `token` if given, else the stored access token. Resolves once
    /// the provider accepts the connection; queued messages are flushed and
    /// channels bound in the background afterwards. A no-op when already
    /// connected; joins the in-flight attempt when connecting.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AuthenticationRequired`] if no token is available
    ///   outside development.
    /// - [`ClientError::Transport`] if the transport could not be opened.
    /// - [`ClientError::ConnectTimeout`] if the provider did not answer in time.
    /// - [`ClientError::ConnectionClosed`] if the attempt failed or was cancelled.
    pub async fn connect(&self, token: Option<String>) -> Result<(), ClientError> {
        self.inner.connect(token, true).await
    }

    /// Close the connection and cancel all timers. Safe to call from any state.
    pub async fn disconnect(&self, reason: Option<&str>) {
        self.inner
            .disconnect(reason.unwrap_or("client disconnect"))
            .await;
    }

    /// Register `handler` for `message` events on `channel`.
    ///
    /// The channel name is sanitized first. The transport is subscribed once
    /// per sanitized name, now if connected, otherwise on the next connect.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidChannel`] if the name sanitizes to nothing.
    /// - [`ClientError::Transport`] if the transport subscribe failed.
    /// - [`ClientError::SubscribeFailed`] if another call's subscribe for the
    ///   same channel was in flight and failed; the handler is not kept.
    pub async fn subscribe<F>(&self, channel: &str, handler: F) -> Result<SubscriptionId, ClientError>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.inner.subscribe(channel, Arc::new(handler)).await
    }

    /// Remove one handler. Unknown handles are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport unsubscribe failed.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), ClientError> {
        self.inner.unsubscribe(id).await
    }

    /// Send a message through the trigger endpoint, or queue it while offline.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidChannel`] if the destination sanitizes to nothing.
    /// - [`ClientError::MessageTimeout`] if acknowledgment took longer than
    ///   `options.timeout`.
    /// - [`ClientError::NotAcknowledged`] if acknowledgment was requested and
    ///   the endpoint answered `ok: false`.
    /// - [`ClientError::Api`] for trigger failures, unchanged.
    pub async fn send(
        &self,
        message_type: &str,
        payload: Value,
        options: SendOptions,
    ) -> Result<SendReceipt, ClientError> {
        self.inner.send(message_type, payload, options).await
    }

    /// Deliver queued messages in order while connected.
    ///
    /// Returns how many were delivered. Stops at the first failure, leaving
    /// that message and everything after it queued.
    ///
    /// # Errors
    ///
    /// Returns the trigger failure that stopped the pass.
    pub async fn flush_message_queue(&self) -> Result<usize, ClientError> {
        self.inner.flush_message_queue().await
    }

    /// Schedule the refresh of `token` ahead of its expiry.
    pub fn schedule_token_refresh(&self, token: &str) {
        self.inner.schedule_token_refresh(token);
    }

    /// Exchange the stored refresh token for a new token pair.
    ///
    /// Returns the new access token, or `None` if there is no refresh token
    /// or the exchange failed.
    pub async fn refresh_token_with_api(&self) -> Option<String> {
        self.inner.refresh_token_with_api().await
    }

    /// Register a handler for a message type.
    pub fn on(&self, message_type: &str, handler: MessageHandler) {
        self.inner.core.lock().type_handlers.add(message_type, handler);
    }

    /// Remove a handler registered with [`on`](Self::on).
    pub fn off(&self, message_type: &str, handler: &MessageHandler) {
        self.inner
            .core
            .lock()
            .type_handlers
            .remove(message_type, handler);
    }

    /// Observe state transitions. Call the returned closure to stop.
    pub fn on_state_change<F>(&self, observer: F) -> impl FnOnce() + Send + 'static
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.inner.core.lock().state_observers.add(Arc::new(observer));
        let inner = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = inner.upgrade() {
                inner.core.lock().state_observers.remove(id);
            }
        }
    }

    /// Observe connection errors. Call the returned closure to stop.
    pub fn on_error<F>(&self, observer: F) -> impl FnOnce() + Send + 'static
    where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        let id = self.inner.core.lock().error_observers.add(Arc::new(observer));
        let inner = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = inner.upgrade() {
                inner.core.lock().error_observers.remove(id);
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        self.inner.core.lock().stats.clone()
    }

    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.core.lock().queue.len()
    }

    #[must_use]
    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.inner.core.lock().queue.snapshot()
    }

    /// Handlers registered on a channel; the name is sanitized first.
    #[must_use]
    pub fn channel_handler_count(&self, channel: &str) -> usize {
        let Ok(channel) = validate_channel_name(channel) else {
            return 0;
        };
        self.inner
            .core
            .lock()
            .registry
            .get(&channel)
            .map_or(0, |entry| entry.handler_count())
    }

    /// Number of channels with at least one handler.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.core.lock().registry.len()
    }

    #[must_use]
    pub fn has_reconnect_timer(&self) -> bool {
        self.inner.core.lock().reconnect.timer.is_some()
    }

    #[must_use]
    pub fn has_refresh_timer(&self) -> bool {
        self.inner.core.lock().token.refresh_timer.is_some()
    }

    /// Expiry of the current access token, in epoch seconds.
    #[must_use]
    pub fn token_expiry(&self) -> Option<u64> {
        self.inner.core.lock().token.expires_at
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core.lock().reconnect.attempts
    }

    /// Number of state and error observers.
    #[must_use]
    pub fn observer_count(&self) -> (usize, usize) {
        let core = self.inner.core.lock();
        (core.state_observers.len(), core.error_observers.len())
    }

    /// Number of handlers registered with [`on`](Self::on) for a type.
    #[must_use]
    pub fn type_handler_count(&self, message_type: &str) -> usize {
        self.inner.core.lock().type_handlers.count(message_type)
    }
}

/// Builder for [`RealtimeClient`].
#[derive(Default)]
pub struct RealtimeClientBuilder {
    options: Option<ClientOptions>,
    transport: Option<Arc<dyn Transport>>,
    auth_api: Option<Arc<dyn AuthApi>>,
    trigger_api: Option<Arc<dyn TriggerApi>>,
    token_store: Option<Arc<dyn TokenStore>>,
}

impl RealtimeClientBuilder {
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = Some(options);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn auth_api(mut self, auth_api: Arc<dyn AuthApi>) -> Self {
        self.auth_api = Some(auth_api);
        self
    }

    #[must_use]
    pub fn trigger_api(mut self, trigger_api: Arc<dyn TriggerApi>) -> Self {
        self.trigger_api = Some(trigger_api);
        self
    }

    /// Token store; an in-memory store is used if none is given.
    #[must_use]
    pub fn token_store(mut self, token_store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(token_store);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if a collaborator is missing or
    /// the default channel is invalid.
    pub fn build(self) -> Result<RealtimeClient, ClientError> {
        let options = self.options.unwrap_or_default();
        let transport = self
            .transport
            .ok_or_else(|| ClientError::Configuration("transport is required".into()))?;
        let auth_api = self
            .auth_api
            .ok_or_else(|| ClientError::Configuration("auth_api is required".into()))?;
        let trigger_api = self
            .trigger_api
            .ok_or_else(|| ClientError::Configuration("trigger_api is required".into()))?;
        let token_store = self
            .token_store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));

        if validate_channel_name(&options.default_channel).is_err() {
            return Err(ClientError::Configuration(format!(
                "invalid default channel {:?}",
                options.default_channel
            )));
        }
        if options.reconnect_base_delay_ms > options.reconnect_max_delay_ms {
            return Err(ClientError::Configuration(
                "reconnect_base_delay_ms exceeds reconnect_max_delay_ms".into(),
            ));
        }

        debug!(
            transport = transport.name(),
            environment = ?options.environment,
            reconnect = options.reconnect,
            "Building realtime client"
        );

        Ok(RealtimeClient {
            inner: Arc::new(Inner {
                policy: options.reconnect_policy(),
                options,
                transport,
                auth_api,
                trigger_api,
                token_store,
                core: Mutex::new(CoreState::new()),
            }),
        })
    }
}
