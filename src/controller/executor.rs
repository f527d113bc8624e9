//! Session controller executor

use super::{Notification, SessionHandle};
use crate::state_machine::{transition, Effect, Event, SessionContext, SessionState};
use crate::store::{Mutation, Session, SessionPersistence, SessionStore};
use crate::termination::{Navigator, RedirectGuard};
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const EVENT_QUEUE_CAPACITY: usize = 64;
const BROADCAST_CAPACITY: usize = 256;

/// Generic session controller that can work with any transport and
/// persistence implementation
pub struct SessionController<T, P>
where
    T: Transport,
    P: SessionPersistence + 'static,
{
    context: SessionContext,
    state: SessionState,
    store: SessionStore,
    transport: T,
    persistence: P,
    navigator: Arc<dyn Navigator>,
    event_rx: mpsc::Receiver<Event>,
    /// Handed to the transport as its listener
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<Notification>,
    shutdown: CancellationToken,
    redirect: Option<RedirectGuard>,
    /// Last state announced with `StateChange`
    announced: SessionState,
}

impl<T, P> SessionController<T, P>
where
    T: Transport,
    P: SessionPersistence + 'static,
{
    /// Restore any persisted snapshot and start the controller task
    pub async fn spawn(
        context: SessionContext,
        mut transport: T,
        persistence: P,
        navigator: Arc<dyn Navigator>,
    ) -> SessionHandle {
        let restored = match persistence.load(&context.session_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(session_id = %context.session_id, error = %e, "Ignoring unreadable session snapshot");
                None
            }
        };
        let (session, state) = restore(&context.session_id, restored);

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let shutdown = CancellationToken::new();
        transport.bind_shutdown(&shutdown);
        let store = SessionStore::new(session);

        let handle = SessionHandle::new(
            context.session_id.clone(),
            event_tx.clone(),
            broadcast_tx.clone(),
            store.reader(),
            shutdown.clone(),
        );

        let navigator: Arc<dyn Navigator> = Arc::new(AnnouncingNavigator {
            inner: navigator,
            broadcast_tx: broadcast_tx.clone(),
        });

        let controller = Self {
            context,
            announced: state.clone(),
            state,
            store,
            transport,
            persistence,
            navigator,
            event_rx,
            event_tx,
            broadcast_tx,
            shutdown,
            redirect: None,
        };
        tokio::spawn(controller.run());
        handle
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.context.session_id, state = %self.state.status(), "Starting session controller");

        // Process events in a loop - no recursion
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                event = self.event_rx.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.process_event(event).await {
                            tracing::error!(session_id = %self.context.session_id, error = %e, "Error handling event");
                        }
                    }
                    None => break,
                },
            }
        }

        self.teardown();
        tracing::info!(session_id = %self.context.session_id, "Session controller stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        // Effects may generate follow-up events; handle them in the same turn
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let kind = current_event.kind();
            let result = match transition(&self.state, &self.context, current_event) {
                Ok(r) => r,
                Err(e) if e.is_user_facing() => {
                    tracing::info!(session_id = %self.context.session_id, event = kind, reason = %e, "Command rejected");
                    let _ = self.broadcast_tx.send(Notification::CommandRejected {
                        reason: e.to_string(),
                        error: e.to_session_error(),
                    });
                    return Ok(());
                }
                Err(e) => {
                    // Late transport events after disconnect/end land here
                    tracing::debug!(session_id = %self.context.session_id, event = kind, reason = %e, "Ignoring event");
                    return Ok(());
                }
            };

            if result.new_state != self.state {
                tracing::debug!(
                    session_id = %self.context.session_id,
                    from = %self.state.status(),
                    to = %result.new_state.status(),
                    event = kind,
                    "State transition"
                );
            }
            self.state = result.new_state;

            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect).await? {
                    events_to_process.push(generated_event);
                }
            }
        }

        Ok(())
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(&mut self, effect: Effect) -> Result<Option<Event>, String> {
        match effect {
            Effect::Mutate(mutation) => {
                let gauge_changed = matches!(mutation, Mutation::UpdateGauge { .. });
                if let Some(turn) = self.store.apply(mutation) {
                    let _ = self.broadcast_tx.send(Notification::TurnAppended { turn });
                }
                if gauge_changed {
                    let session = self.store.snapshot();
                    let _ = self.broadcast_tx.send(Notification::GaugeChanged {
                        gauge: session.gauge,
                        mood: session.mood,
                    });
                }
                Ok(None)
            }

            Effect::PersistState => {
                self.store
                    .apply(Mutation::SetStatus(self.state.status()));
                if let Err(e) = self.persistence.save(&self.store.snapshot()).await {
                    // The in-memory store stays authoritative
                    tracing::warn!(session_id = %self.context.session_id, error = %e, "Failed to persist session");
                }
                self.announce_state();
                Ok(None)
            }

            Effect::OpenTransport => {
                let listener = self.event_tx.clone();
                match self.transport.connect(
                    &self.context.session_id,
                    &self.context.auth_token,
                    listener,
                ) {
                    Ok(()) => Ok(None),
                    Err(TransportError::Auth(message)) => Ok(Some(Event::AuthRejected { message })),
                    Err(TransportError::AlreadyConnected) => {
                        tracing::debug!(session_id = %self.context.session_id, "Transport already connected");
                        Ok(None)
                    }
                    Err(e) => Err(format!("Failed to open transport: {e}")),
                }
            }

            Effect::CloseTransport => {
                self.transport.disconnect();
                Ok(None)
            }

            Effect::SendCommand(command) => {
                if let Err(e) = self.transport.send(command) {
                    // The optimistic turn stays; only the delivery is reported
                    tracing::warn!(session_id = %self.context.session_id, error = %e, "Command not delivered");
                    let _ = self.broadcast_tx.send(Notification::CommandRejected {
                        reason: e.to_string(),
                        error: e.to_session_error(),
                    });
                }
                Ok(None)
            }

            Effect::Notify(notification) => {
                let _ = self.broadcast_tx.send(notification);
                Ok(None)
            }

            Effect::BeginRedirect { target } => {
                if let Some(mut previous) = self.redirect.take() {
                    previous.cancel();
                }
                tracing::info!(session_id = %self.context.session_id, redirect_target = %target, "Starting redirect countdown");
                self.redirect = Some(RedirectGuard::start(
                    target,
                    self.context.redirect_delay,
                    Arc::clone(&self.navigator),
                    self.shutdown.child_token(),
                ));
                Ok(None)
            }

            Effect::RedirectNow { target } => {
                let guard = self.redirect.get_or_insert_with(|| {
                    RedirectGuard::start(
                        target,
                        self.context.redirect_delay,
                        Arc::clone(&self.navigator),
                        self.shutdown.child_token(),
                    )
                });
                if !guard.redirect_now() {
                    tracing::debug!(session_id = %self.context.session_id, "Redirect already happened");
                }
                Ok(None)
            }
        }
    }

    fn announce_state(&mut self) {
        if self.announced == self.state {
            return;
        }
        self.announced = self.state.clone();
        let (attempt, max_attempts) = match self.state {
            SessionState::Reconnecting {
                attempt,
                max_attempts,
            } => (Some(attempt), Some(max_attempts)),
            _ => (None, None),
        };
        let _ = self.broadcast_tx.send(Notification::StateChange {
            status: self.state.status(),
            attempt,
            max_attempts,
        });
    }

    fn teardown(&mut self) {
        if let Some(mut guard) = self.redirect.take() {
            guard.cancel();
        }
        self.transport.disconnect();
    }
}

/// Rebuild controller state from a persisted snapshot. A session that had not
/// ended comes back idle; an ended one stays ended.
fn restore(session_id: &str, snapshot: Option<Session>) -> (Session, SessionState) {
    let Some(mut session) = snapshot else {
        return (Session::new(session_id), SessionState::Idle);
    };

    session.prospect_thinking = false;
    let state = match session.termination.clone() {
        Some(record) => SessionState::Ended { record },
        None => SessionState::Idle,
    };
    session.status = state.status();
    tracing::info!(
        session_id = %session_id,
        turns = session.transcript.len(),
        status = %session.status,
        "Restored session snapshot"
    );
    (session, state)
}

/// Mirrors countdown ticks and the final navigation onto the notification
/// channel
struct AnnouncingNavigator {
    inner: Arc<dyn Navigator>,
    broadcast_tx: broadcast::Sender<Notification>,
}

impl Navigator for AnnouncingNavigator {
    fn navigate(&self, target: &str) {
        let _ = self.broadcast_tx.send(Notification::Redirected {
            target: target.to_string(),
        });
        self.inner.navigate(target);
    }

    fn countdown(&self, remaining_secs: u64) {
        let _ = self
            .broadcast_tx
            .send(Notification::Countdown { remaining_secs });
        self.inner.countdown(remaining_secs);
    }
}
