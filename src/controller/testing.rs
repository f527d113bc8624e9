//! Mock implementations for testing
//!
//! These mocks let controller tests play the server without any I/O: the
//! transport records what it is asked to do and hands the test the
//! controller's event queue.

use super::{Notification, SessionController, SessionHandle};
use crate::protocol::{ClientCommand, ServerEvent};
use crate::state_machine::{Event, SessionContext};
use crate::store::{ConnectionStatus, MemoryPersistence, Session};
use crate::termination::Navigator;
use crate::transport::{LinkStatus, Transport, TransportError};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// Recording Transport
// ============================================================================

#[derive(Default)]
struct Recorded {
    connects: Vec<(String, String)>,
    commands: Vec<ClientCommand>,
    disconnects: usize,
    listener: Option<mpsc::Sender<Event>>,
    status: LinkStatus,
    refuse_auth: Option<String>,
}

/// Transport double that records calls and keeps the controller's listener
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recorded>>,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `connect` fails the way a missing token does
    pub fn refusing_auth(message: impl Into<String>) -> Self {
        let transport = Self::default();
        transport.inner.lock().unwrap().refuse_auth = Some(message.into());
        transport
    }

    pub fn connects(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().connects.clone()
    }

    pub fn commands(&self) -> Vec<ClientCommand> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.inner.lock().unwrap().disconnects
    }

    /// The listener handed over by the last `connect`, even after disconnect
    pub fn listener(&self) -> Option<mpsc::Sender<Event>> {
        self.inner.lock().unwrap().listener.clone()
    }

    /// Push an event as if the transport produced it, once `connect` ran
    pub async fn deliver(&self, event: Event) {
        let listener = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(listener) = self.listener() {
                    return listener;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("transport was never connected");
        listener.send(event).await.expect("controller stopped");
    }

    /// Push a server frame
    pub async fn server(&self, frame: Value) {
        let event = ServerEvent::decode(&frame.to_string()).expect("valid frame");
        self.deliver(Event::Server(event)).await;
    }
}

impl Transport for RecordingTransport {
    fn connect(
        &mut self,
        session_id: &str,
        auth_token: &str,
        listener: mpsc::Sender<Event>,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = inner.refuse_auth.clone() {
            return Err(TransportError::Auth(message));
        }
        if inner.status.is_live() {
            return Err(TransportError::AlreadyConnected);
        }
        inner
            .connects
            .push((session_id.to_string(), auth_token.to_string()));
        inner.listener = Some(listener);
        inner.status = LinkStatus::Connecting;
        Ok(())
    }

    fn send(&self, command: ClientCommand) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.status.is_live() {
            return Err(TransportError::NotConnected(inner.status));
        }
        inner.commands.push(command);
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnects += 1;
        if inner.status.is_live() {
            inner.status = LinkStatus::Disconnected;
        }
    }

    fn status(&self) -> LinkStatus {
        self.inner.lock().unwrap().status
    }
}

// ============================================================================
// Recording Navigator
// ============================================================================

#[derive(Default)]
pub struct RecordingNavigator {
    targets: Mutex<Vec<String>>,
    ticks: Mutex<Vec<u64>>,
}

impl RecordingNavigator {
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }

    pub fn ticks(&self) -> Vec<u64> {
        self.ticks.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: &str) {
        self.targets.lock().unwrap().push(target.to_string());
    }

    fn countdown(&self, remaining_secs: u64) {
        self.ticks.lock().unwrap().push(remaining_secs);
    }
}

// ============================================================================
// Test Session Harness
// ============================================================================

pub const TEST_SESSION: &str = "session-42";

/// A running controller wired to recording doubles
pub struct TestSession {
    pub handle: SessionHandle,
    pub transport: RecordingTransport,
    pub navigator: Arc<RecordingNavigator>,
    pub persistence: Arc<MemoryPersistence>,
    pub notifications: broadcast::Receiver<Notification>,
}

#[allow(dead_code)]
impl TestSession {
    pub async fn start() -> Self {
        Self::start_with(
            SessionContext::new(TEST_SESSION, "token"),
            RecordingTransport::new(),
            Arc::new(MemoryPersistence::new()),
        )
        .await
    }

    pub async fn start_with(
        context: SessionContext,
        transport: RecordingTransport,
        persistence: Arc<MemoryPersistence>,
    ) -> Self {
        let navigator = Arc::new(RecordingNavigator::default());
        let handle = SessionController::spawn(
            context,
            transport.clone(),
            Arc::clone(&persistence),
            navigator.clone(),
        )
        .await;
        let notifications = handle.subscribe();
        Self {
            handle,
            transport,
            navigator,
            persistence,
            notifications,
        }
    }

    /// Connect and complete the handshake with the given gauge and mood
    pub async fn connected(&mut self, gauge: i64, mood: &str) {
        self.handle.connect().await.unwrap();
        self.transport
            .server(serde_json::json!({ "type": "connected", "jauge": gauge, "mood": mood }))
            .await;
        assert!(
            self.wait_for_session(|s| s.status == ConnectionStatus::Connected)
                .await
        );
    }

    /// Wait for a notification matching the predicate
    pub async fn wait_for(
        &mut self,
        predicate: impl Fn(&Notification) -> bool,
    ) -> Option<Notification> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.notifications.recv()).await {
                Ok(Ok(notification)) if predicate(&notification) => return Some(notification),
                Ok(Ok(_) | Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
            }
        }
    }

    /// Wait until the session snapshot satisfies the predicate
    pub async fn wait_for_session(&self, predicate: impl Fn(&Session) -> bool) -> bool {
        let mut reader = self.handle.reader();
        let wait = async {
            loop {
                if predicate(&reader.snapshot()) {
                    return true;
                }
                if !reader.changed().await {
                    return predicate(&reader.snapshot());
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .unwrap_or(false)
    }

    /// Let the controller drain its queue
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerGone;
    use crate::error::SessionError;
    use crate::protocol::Mood;
    use crate::store::{Role, SessionPersistence};
    use crate::termination::EndType;
    use serde_json::json;

    #[tokio::test]
    async fn test_handshake_then_first_prospect_turn() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;
        assert_eq!(
            t.transport.connects(),
            vec![(TEST_SESSION.to_string(), "token".to_string())]
        );

        t.transport
            .server(json!({
                "type": "prospect_response",
                "text": "Bonjour",
                "jauge": 55,
                "mood": "pleased",
                "conversion_possible": false,
            }))
            .await;

        let appended = t
            .wait_for(|n| matches!(n, Notification::TurnAppended { .. }))
            .await;
        assert!(matches!(
            appended,
            Some(Notification::TurnAppended { turn }) if turn.role == Role::Prospect && turn.text == "Bonjour"
        ));
        assert!(t.wait_for_session(|s| s.gauge == 55).await);

        let session = t.handle.session();
        assert_eq!(session.transcript.len(), 1);
        assert_eq!(session.mood, Mood::Pleased);
        assert!(!session.conversion_possible);
        assert!(!session.prospect_thinking);
    }

    #[tokio::test]
    async fn test_user_turn_is_optimistic_and_sent_once() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;

        t.handle.send_message("Bonjour", None).await.unwrap();
        assert!(t.wait_for_session(|s| s.transcript.len() == 1).await);

        let session = t.handle.session();
        assert_eq!(session.transcript[0].role, Role::User);
        assert_eq!(session.transcript[0].text, "Bonjour");
        assert_eq!(
            t.transport.commands(),
            vec![ClientCommand::SendMessage {
                text: "Bonjour".to_string(),
                audio_base64: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected_without_side_effects() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;

        t.handle.send_message("   \n", None).await.unwrap();
        let rejected = t
            .wait_for(|n| matches!(n, Notification::CommandRejected { .. }))
            .await;
        assert!(matches!(
            rejected,
            Some(Notification::CommandRejected { error: None, .. })
        ));
        assert!(t.handle.session().transcript.is_empty());
        assert!(t.transport.commands().is_empty());
    }

    #[tokio::test]
    async fn test_send_before_connect_is_reported() {
        let mut t = TestSession::start().await;
        t.handle.send_message("Allô", None).await.unwrap();
        let rejected = t
            .wait_for(|n| matches!(n, Notification::CommandRejected { .. }))
            .await;
        assert!(matches!(
            rejected,
            Some(Notification::CommandRejected {
                reason,
                error: Some(SessionError::NotConnected { .. }),
            }) if reason.contains("not connected")
        ));
    }

    #[tokio::test]
    async fn test_thinking_indicator_cleared_by_advisory() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;

        t.transport.server(json!({ "type": "prospect_thinking" })).await;
        assert!(t.wait_for_session(|s| s.prospect_thinking).await);

        t.transport
            .server(json!({ "type": "error", "message": "Inference slow" }))
            .await;
        let advisory = t
            .wait_for(|n| matches!(n, Notification::Advisory { .. }))
            .await;
        assert_eq!(
            advisory,
            Some(Notification::Advisory {
                error: SessionError::advisory("Inference slow")
            })
        );
        let session = t.handle.session();
        assert!(!session.prospect_thinking);
        assert_eq!(session.status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_reversal_is_transient() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;

        t.transport
            .server(json!({ "type": "reversal", "data": { "type": "objection", "message": "Trop cher" } }))
            .await;
        let reversal = t
            .wait_for(|n| matches!(n, Notification::Reversal { .. }))
            .await;
        assert_eq!(
            reversal,
            Some(Notification::Reversal {
                kind: "objection".to_string(),
                message: "Trop cher".to_string(),
            })
        );
        assert!(t.handle.session().transcript.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_end_redirects_once_after_countdown() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;

        let started = tokio::time::Instant::now();
        t.transport
            .server(json!({
                "type": "session_ended",
                "end_type": "user_ending",
                "evaluation": { "score": 64 },
            }))
            .await;

        let ended = t.wait_for(|n| matches!(n, Notification::Ended { .. })).await;
        let Some(Notification::Ended {
            end_type,
            redirect_target,
            countdown_secs,
            ..
        }) = ended
        else {
            panic!("expected an ended notification, got {ended:?}");
        };
        assert_eq!(end_type, EndType::UserEnding);
        assert_eq!(redirect_target, "/training/sessions/session-42/report");
        assert_eq!(countdown_secs, 3);

        let redirected = t
            .wait_for(|n| matches!(n, Notification::Redirected { .. }))
            .await;
        assert!(redirected.is_some());
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(
            t.navigator.targets(),
            vec!["/training/sessions/session-42/report".to_string()]
        );
        assert_eq!(t.navigator.ticks(), vec![3, 2, 1]);

        // Manual click after expiry does nothing
        t.handle.redirect_now().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(t.navigator.targets().len(), 1);

        let session = t.handle.session();
        assert_eq!(session.status, ConnectionStatus::Ended);
        assert_eq!(
            session.termination.map(|r| r.end_type),
            Some(EndType::UserEnding)
        );
        assert!(t.transport.disconnects() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_redirect_beats_countdown() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;
        t.transport
            .server(json!({
                "type": "session_ended",
                "end_type": "prospect_ending",
                "redirect_url": "/coach/debrief/42",
                "evaluation": {},
            }))
            .await;
        t.wait_for(|n| matches!(n, Notification::Ended { .. })).await;

        tokio::time::sleep(Duration::from_millis(1200)).await;
        t.handle.redirect_now().await.unwrap();
        t.wait_for(|n| matches!(n, Notification::Redirected { .. }))
            .await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(t.navigator.targets(), vec!["/coach/debrief/42".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_pending_redirect() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;
        t.transport
            .server(json!({ "type": "session_ended", "end_type": "mutual_goodbye", "evaluation": null }))
            .await;
        t.wait_for(|n| matches!(n, Notification::Ended { .. })).await;

        tokio::time::sleep(Duration::from_millis(1000)).await;
        t.handle.dispose();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(t.navigator.targets().is_empty());
        assert_eq!(t.handle.connect().await, Err(ControllerGone));
    }

    #[tokio::test]
    async fn test_commands_after_end_are_rejected() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;
        t.transport
            .server(json!({ "type": "session_ended", "end_type": "user_ending", "evaluation": {} }))
            .await;
        assert!(t.wait_for_session(|s| s.status == ConnectionStatus::Ended).await);

        t.handle.send_message("Attendez", None).await.unwrap();
        let rejected = t
            .wait_for(|n| matches!(n, Notification::CommandRejected { .. }))
            .await;
        assert!(matches!(
            rejected,
            Some(Notification::CommandRejected {
                reason,
                error: Some(SessionError::NotConnected { .. }),
            }) if reason.contains("ended")
        ));

        t.handle.end_session().await.unwrap();
        t.settle().await;
        assert!(t.handle.session().transcript.is_empty());
        assert!(t.transport.commands().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_end_type_is_fatal_protocol_error() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;
        t.transport
            .server(json!({ "type": "session_ended", "end_type": "rage_quit", "evaluation": {} }))
            .await;

        let fatal = t.wait_for(|n| matches!(n, Notification::Fatal { .. })).await;
        assert!(matches!(
            fatal,
            Some(Notification::Fatal { error: SessionError::Protocol { .. } })
        ));
        assert!(t.navigator.targets().is_empty());
        assert_eq!(t.handle.session().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_transcript_and_buffers_input() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;
        t.handle.send_message("Premier", None).await.unwrap();

        t.transport
            .deliver(Event::Reconnecting {
                attempt: 1,
                max_attempts: 5,
            })
            .await;
        let change = t
            .wait_for(|n| matches!(n, Notification::StateChange { status: ConnectionStatus::Reconnecting, .. }))
            .await;
        assert_eq!(
            change,
            Some(Notification::StateChange {
                status: ConnectionStatus::Reconnecting,
                attempt: Some(1),
                max_attempts: Some(5),
            })
        );

        // Input stays enabled while reconnecting
        assert!(t.handle.session().accepts_input());
        t.handle.send_message("Second", None).await.unwrap();

        t.transport
            .server(json!({ "type": "connected", "jauge": 58, "mood": "curious" }))
            .await;
        assert!(t.wait_for_session(|s| s.status == ConnectionStatus::Connected).await);

        let session = t.handle.session();
        let texts: Vec<_> = session.transcript.iter().map(|turn| turn.text.as_str()).collect();
        assert_eq!(texts, vec!["Premier", "Second"]);
        assert_eq!(session.gauge, 58);
        assert_eq!(t.transport.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_lost_surfaces_once_and_allows_reconnect() {
        let mut t = TestSession::start().await;
        t.connected(50, "neutral").await;
        let listener = t.transport.listener().unwrap();

        for attempt in 1..=5 {
            listener
                .send(Event::Reconnecting {
                    attempt,
                    max_attempts: 5,
                })
                .await
                .unwrap();
        }
        listener
            .send(Event::ConnectionLost { attempts: 5 })
            .await
            .unwrap();
        listener
            .send(Event::ConnectionLost { attempts: 5 })
            .await
            .unwrap();

        let fatal = t.wait_for(|n| matches!(n, Notification::Fatal { .. })).await;
        assert_eq!(
            fatal,
            Some(Notification::Fatal {
                error: SessionError::ConnectionLost { attempts: 5 }
            })
        );
        t.settle().await;
        while let Ok(notification) = t.notifications.try_recv() {
            assert!(
                !matches!(notification, Notification::Fatal { .. }),
                "connection loss surfaced twice"
            );
        }

        let session = t.handle.session();
        assert_eq!(session.status, ConnectionStatus::Disconnected);
        assert!(!session.accepts_input());
        assert_eq!(
            session.last_error,
            Some(SessionError::ConnectionLost { attempts: 5 })
        );

        // Manual reconnect
        t.handle.connect().await.unwrap();
        assert!(t.wait_for_session(|s| s.status == ConnectionStatus::Connecting).await);
        assert_eq!(t.transport.connects().len(), 2);
        assert_eq!(t.handle.session().last_error, None);
    }

    #[tokio::test]
    async fn test_auth_refusal_is_fatal_and_not_retried() {
        let transport = RecordingTransport::refusing_auth("HTTP 401");
        let mut t = TestSession::start_with(
            SessionContext::new(TEST_SESSION, "expired"),
            transport,
            Arc::new(MemoryPersistence::new()),
        )
        .await;

        t.handle.connect().await.unwrap();
        let fatal = t.wait_for(|n| matches!(n, Notification::Fatal { .. })).await;
        assert!(matches!(
            fatal,
            Some(Notification::Fatal { error: SessionError::Auth { .. } })
        ));
        assert!(t.transport.connects().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_never_reaches_transport() {
        let mut t = TestSession::start_with(
            SessionContext::new(TEST_SESSION, ""),
            RecordingTransport::new(),
            Arc::new(MemoryPersistence::new()),
        )
        .await;

        t.handle.connect().await.unwrap();
        let fatal = t.wait_for(|n| matches!(n, Notification::Fatal { .. })).await;
        assert!(matches!(
            fatal,
            Some(Notification::Fatal { error: SessionError::Auth { .. } })
        ));
        assert!(t.transport.connects().is_empty());
    }

    #[tokio::test]
    async fn test_transcript_survives_restart() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut first = TestSession::start_with(
            SessionContext::new(TEST_SESSION, "token"),
            RecordingTransport::new(),
            Arc::clone(&persistence),
        )
        .await;
        first.connected(50, "neutral").await;
        first.handle.send_message("Bonjour", None).await.unwrap();
        assert!(first.wait_for_session(|s| s.transcript.len() == 1).await);
        first.settle().await;
        first.handle.dispose();

        let saved = persistence.load(TEST_SESSION).await.unwrap().unwrap();
        assert_eq!(saved.transcript.len(), 1);

        let second = TestSession::start_with(
            SessionContext::new(TEST_SESSION, "token"),
            RecordingTransport::new(),
            Arc::clone(&persistence),
        )
        .await;
        let session = second.handle.session();
        assert_eq!(session.transcript.len(), 1);
        assert_eq!(session.transcript[0].text, "Bonjour");
        assert_eq!(session.status, ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_ended_session_stays_ended_after_restart() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut first = TestSession::start_with(
            SessionContext::new(TEST_SESSION, "token"),
            RecordingTransport::new(),
            Arc::clone(&persistence),
        )
        .await;
        first.connected(50, "neutral").await;
        first
            .transport
            .server(json!({ "type": "session_ended", "end_type": "mutual_goodbye", "evaluation": {} }))
            .await;
        assert!(first.wait_for_session(|s| s.status == ConnectionStatus::Ended).await);
        first.handle.dispose();

        let mut second = TestSession::start_with(
            SessionContext::new(TEST_SESSION, "token"),
            RecordingTransport::new(),
            Arc::clone(&persistence),
        )
        .await;
        assert_eq!(second.handle.session().status, ConnectionStatus::Ended);

        second.handle.connect().await.unwrap();
        let rejected = second
            .wait_for(|n| matches!(n, Notification::CommandRejected { .. }))
            .await;
        assert!(rejected.is_some());
        assert!(second.transport.connects().is_empty());
    }

    #[tokio::test]
    async fn test_notification_stream_yields_state_changes() {
        use tokio_stream::StreamExt;

        let t = TestSession::start().await;
        let mut stream = Box::pin(t.handle.notifications());
        t.handle.connect().await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert_eq!(
            first,
            Some(Notification::StateChange {
                status: ConnectionStatus::Connecting,
                attempt: None,
                max_attempts: None,
            })
        );
    }
}
