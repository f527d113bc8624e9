//! Transport client and its connection task

use super::traits::{Channel, ConnectError, Connector};
use super::{LinkStatus, Transport, TransportError};
use crate::config::{ReconnectPolicy, SessionConfig};
use crate::protocol::{ClientCommand, ServerEvent};
use crate::state_machine::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Transport over any [`Connector`]
pub struct TransportClient<C: Connector> {
    connector: Arc<C>,
    policy: ReconnectPolicy,
    handshake_timeout: Duration,
    status: Arc<watch::Sender<LinkStatus>>,
    commands: Option<mpsc::UnboundedSender<ClientCommand>>,
    /// Each link's token is a child of this one
    shutdown: CancellationToken,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<C: Connector> TransportClient<C> {
    pub fn new(connector: C, config: &SessionConfig) -> Self {
        Self::with_policy(connector, config.reconnect, config.handshake_timeout)
    }

    pub fn with_policy(connector: C, policy: ReconnectPolicy, handshake_timeout: Duration) -> Self {
        let (status, _) = watch::channel(LinkStatus::Idle);
        Self {
            connector: Arc::new(connector),
            policy,
            handshake_timeout,
            status: Arc::new(status),
            commands: None,
            shutdown: CancellationToken::new(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

impl<C: Connector> Transport for TransportClient<C> {
    fn connect(
        &mut self,
        session_id: &str,
        auth_token: &str,
        listener: mpsc::Sender<Event>,
    ) -> Result<(), TransportError> {
        if auth_token.trim().is_empty() {
            return Err(TransportError::Auth(
                "Missing authentication token".to_string(),
            ));
        }
        if self.status().is_live() {
            return Err(TransportError::AlreadyConnected);
        }

        // Make sure a previous link can no longer emit
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        self.cancel = self.shutdown.child_token();
        self.commands = Some(commands_tx);
        self.status.send_replace(LinkStatus::Connecting);

        let link = Link {
            connector: Arc::clone(&self.connector),
            policy: self.policy,
            handshake_timeout: self.handshake_timeout,
            session_id: session_id.to_string(),
            auth_token: auth_token.to_string(),
            status: Arc::clone(&self.status),
            listener,
            commands: commands_rx,
            cancel: self.cancel.clone(),
            in_flight: None,
        };
        tracing::info!(session_id = %session_id, "Opening session transport");
        self.task = Some(tokio::spawn(link.run()));
        Ok(())
    }

    fn send(&self, command: ClientCommand) -> Result<(), TransportError> {
        let status = self.status();
        if !status.is_live() {
            return Err(TransportError::NotConnected(status));
        }
        let commands = self
            .commands
            .as_ref()
            .ok_or(TransportError::NotConnected(status))?;
        commands.send(command).map_err(|_| TransportError::Closed)
    }

    fn disconnect(&mut self) {
        self.cancel.cancel();
        self.commands = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.status.send_if_modified(|status| {
            if matches!(status, LinkStatus::Idle | LinkStatus::Ended | LinkStatus::Disconnected) {
                false
            } else {
                *status = LinkStatus::Disconnected;
                true
            }
        });
    }

    fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    fn bind_shutdown(&mut self, shutdown: &CancellationToken) {
        self.shutdown = shutdown.clone();
    }
}

impl<C: Connector> Drop for TransportClient<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// Connection task
// ============================================================================

enum AttemptError {
    /// Counts against the retry budget
    Retry(String),
    /// Reported to the controller; the link stops
    Fatal(Event),
}

enum PumpExit {
    Dropped(String),
    Finished,
}

/// Owns the connection for one `connect` call
struct Link<C: Connector> {
    connector: Arc<C>,
    policy: ReconnectPolicy,
    handshake_timeout: Duration,
    session_id: String,
    auth_token: String,
    status: Arc<watch::Sender<LinkStatus>>,
    listener: mpsc::Sender<Event>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    cancel: CancellationToken,
    /// Frame whose write failed; resent first after reconnecting
    in_flight: Option<String>,
}

impl<C: Connector> Link<C> {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut attempt: u32 = 0;

        loop {
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                opened = self.open_and_handshake() => opened,
            };

            match opened {
                Ok((channel, handshake)) => {
                    if attempt > 0 {
                        tracing::info!(session_id = %self.session_id, attempt, "Reconnected");
                    }
                    attempt = 0;
                    self.set_status(LinkStatus::Connected);
                    if !self.emit(handshake).await {
                        return;
                    }
                    match self.pump(channel).await {
                        PumpExit::Finished => return,
                        PumpExit::Dropped(reason) => {
                            tracing::warn!(session_id = %self.session_id, reason = %reason, "Connection dropped");
                        }
                    }
                }
                Err(AttemptError::Retry(reason)) => {
                    tracing::warn!(session_id = %self.session_id, attempt, reason = %reason, "Connection attempt failed");
                }
                Err(AttemptError::Fatal(event)) => {
                    tracing::error!(session_id = %self.session_id, event = event.kind(), "Connection rejected");
                    self.set_status(LinkStatus::Disconnected);
                    self.emit(event).await;
                    return;
                }
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                tracing::error!(
                    session_id = %self.session_id,
                    attempts = self.policy.max_attempts,
                    "Reconnection budget exhausted"
                );
                self.set_status(LinkStatus::Disconnected);
                self.emit(Event::ConnectionLost {
                    attempts: self.policy.max_attempts,
                })
                .await;
                return;
            }

            self.set_status(LinkStatus::Reconnecting);
            let announced = self
                .emit(Event::Reconnecting {
                    attempt,
                    max_attempts: self.policy.max_attempts,
                })
                .await;
            if !announced {
                return;
            }

            let delay = self.policy.delay(attempt);
            tracing::debug!(session_id = %self.session_id, attempt, delay = ?delay, "Backing off");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Open a channel and wait for the `connected` event
    async fn open_and_handshake(&self) -> Result<(Box<dyn Channel>, Event), AttemptError> {
        let mut channel = match self.connector.open(&self.session_id, &self.auth_token).await {
            Ok(channel) => channel,
            Err(ConnectError::Unauthorized(message)) => {
                return Err(AttemptError::Fatal(Event::AuthRejected { message }));
            }
            Err(ConnectError::Unreachable(reason)) => return Err(AttemptError::Retry(reason)),
        };

        let first = match tokio::time::timeout(self.handshake_timeout, channel.recv_text()).await {
            Ok(Some(Ok(text))) => text,
            Ok(Some(Err(e))) => return Err(AttemptError::Retry(e.to_string())),
            Ok(None) => {
                return Err(AttemptError::Retry(
                    "Connection closed during handshake".to_string(),
                ))
            }
            Err(_) => {
                channel.close().await;
                return Err(AttemptError::Retry("Handshake timed out".to_string()));
            }
        };

        match ServerEvent::decode(&first) {
            Ok(event @ ServerEvent::Connected(_)) => Ok((channel, Event::Server(event))),
            Ok(other) => {
                channel.close().await;
                Err(AttemptError::Fatal(Event::ProtocolViolation {
                    message: format!(
                        "Expected `connected` as first event, got `{}`",
                        other.kind()
                    ),
                }))
            }
            Err(e) => {
                channel.close().await;
                Err(AttemptError::Fatal(Event::ProtocolViolation { message: e.0 }))
            }
        }
    }

    /// Shuttle frames until the connection drops or the link is finished
    async fn pump(&mut self, mut channel: Box<dyn Channel>) -> PumpExit {
        if let Some(frame) = self.in_flight.take() {
            tracing::info!(session_id = %self.session_id, "Resending in-flight command");
            if let Err(e) = channel.send_text(frame.clone()).await {
                self.in_flight = Some(frame);
                return PumpExit::Dropped(e.to_string());
            }
        }

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    channel.close().await;
                    return PumpExit::Finished;
                }

                incoming = channel.recv_text() => match incoming {
                    Some(Ok(text)) => {
                        if let Some(exit) = self.dispatch(&text, channel.as_mut()).await {
                            return exit;
                        }
                    }
                    Some(Err(e)) => return PumpExit::Dropped(e.to_string()),
                    None => return PumpExit::Dropped("Connection closed by peer".to_string()),
                },

                command = self.commands.recv() => match command {
                    Some(command) => {
                        let frame = match command.encode() {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::error!(error = %e, "Dropping command that cannot be encoded");
                                continue;
                            }
                        };
                        if let Err(e) = channel.send_text(frame.clone()).await {
                            self.in_flight = Some(frame);
                            return PumpExit::Dropped(e.to_string());
                        }
                    }
                    None => {
                        channel.close().await;
                        return PumpExit::Finished;
                    }
                },
            }
        }
    }

    /// Forward one frame; `Some` when the link must stop
    async fn dispatch(&self, text: &str, channel: &mut dyn Channel) -> Option<PumpExit> {
        match ServerEvent::decode(text) {
            Ok(event) => {
                let ended = matches!(event, ServerEvent::SessionEnded(_));
                if ended {
                    self.set_status(LinkStatus::Ended);
                }
                if !self.emit(Event::Server(event)).await {
                    channel.close().await;
                    return Some(PumpExit::Finished);
                }
                if ended {
                    tracing::info!(session_id = %self.session_id, "Server ended the session");
                    channel.close().await;
                    return Some(PumpExit::Finished);
                }
                None
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "Malformed server event");
                self.set_status(LinkStatus::Disconnected);
                self.emit(Event::ProtocolViolation { message: e.0 }).await;
                channel.close().await;
                Some(PumpExit::Finished)
            }
        }
    }

    /// Push an event to the controller; `false` once nobody is listening
    async fn emit(&self, event: Event) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.listener.send(event).await.is_ok()
    }

    fn set_status(&self, status: LinkStatus) {
        if !self.cancel.is_cancelled() {
            self.status.send_replace(status);
        }
    }
}
