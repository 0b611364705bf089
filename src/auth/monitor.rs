// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session monitor.
//!
//! Holds the last known session and publishes every transition (sign-in,
//! sign-out, token refresh) as a discrete event. Subscribers receive events in
//! the order they happened; a subscriber that falls behind gets a single
//! `Resynced` event carrying the current value instead of the events it
//! missed.
//!
//! Calls that outlive the session they started from (sign-out, refresh) only
//! apply their result if that exact session is still current. Every applied
//! transition is handed to the backend to persist while the lock is held, so
//! the persisted copy follows the same order as the events.

use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{AuthError, Session};
use crate::backend::{AuthBackend, SignUpOutcome};

/// Capacity of the event channel before slow subscribers are resynced.
const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    /// The value resolved at startup
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    /// Events were dropped for a lagging subscriber; this is the current value
    Resynced,
}

/// One session transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session: Option<Session>,
}

/// Cancellable stream of session transitions.
pub struct SessionSubscription {
    rx: broadcast::Receiver<SessionEvent>,
    current: Arc<RwLock<Option<Session>>>,
    cancel: CancellationToken,
}

impl SessionSubscription {
    /// Wait for the next transition.
    ///
    /// Returns `None` once the subscription is cancelled or the monitor is
    /// gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let received = tokio::select! {
            received = self.rx.recv() => received,
            _ = self.cancel.cancelled() => return None,
        };

        match received {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session subscriber lagged, resyncing");
                Some(SessionEvent {
                    kind: SessionEventKind::Resynced,
                    session: read_current(&self.current),
                })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Stop receiving events. Pending and future calls to `next` return `None`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Observes authentication state for the rest of the client.
pub struct SessionMonitor<A> {
    auth: Arc<A>,
    current: Arc<RwLock<Option<Session>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl<A: AuthBackend> SessionMonitor<A> {
    /// Resolve the persisted session once and start monitoring.
    ///
    /// A failed restore is logged and treated as signed out.
    pub async fn start(auth: Arc<A>) -> Self {
        let initial = match auth.restore_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Failed to restore session");
                None
            }
        };

        info!(
            signed_in = initial.is_some(),
            user_id = initial.as_ref().map(|s| s.user_id.as_str()).unwrap_or(""),
            "Session monitor started"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let monitor = Self {
            auth,
            current: Arc::new(RwLock::new(initial.clone())),
            events,
        };
        // Restored as-is; a failed restore must not wipe the persisted copy.
        let _ = monitor.events.send(SessionEvent {
            kind: SessionEventKind::InitialSession,
            session: initial,
        });
        monitor
    }

    /// The auth backend this monitor forwards to.
    pub fn backend(&self) -> &Arc<A> {
        &self.auth
    }

    /// Last known session.
    pub fn current_session(&self) -> Option<Session> {
        read_current(&self.current)
    }

    /// Subscribe to transitions happening after this call.
    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            rx: self.events.subscribe(),
            current: Arc::clone(&self.current),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.auth.sign_in(email, password).await?;
        info!(user_id = %session.user_id, "Signed in");
        self.publish(SessionEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Register a new account. Opens a session only when the backend confirms
    /// the account immediately.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        let outcome = self.auth.sign_up(email, password).await?;
        match &outcome {
            SignUpOutcome::SignedIn(session) => {
                info!(user_id = %session.user_id, "Signed up and signed in");
                self.publish(SessionEventKind::SignedIn, Some(session.clone()));
            }
            SignUpOutcome::ConfirmationRequired { email } => {
                info!(email = %email, "Sign-up awaiting email confirmation");
            }
        }
        Ok(outcome)
    }

    /// Sign out.
    ///
    /// The local session is cleared even when the backend call fails; the
    /// backend error is still returned. A session that replaced this one while
    /// the call was in flight is left alone.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(session) = self.current_session() else {
            return Ok(());
        };

        let result = self.auth.sign_out(&session).await;
        if let Err(e) = &result {
            warn!(user_id = %session.user_id, error = %e, "Remote sign-out failed, clearing locally");
        }

        if self.publish_if_current(&session, SessionEventKind::SignedOut, None) {
            info!(user_id = %session.user_id, "Signed out");
        } else {
            info!(user_id = %session.user_id, "Session replaced during sign-out, keeping it");
        }
        result
    }

    /// Refresh the access token.
    ///
    /// An expired refresh token signs the user out. Either outcome is dropped
    /// with `SessionSuperseded` when the session was replaced while the call
    /// was in flight.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let session = self.current_session().ok_or(AuthError::NotSignedIn)?;

        match self.auth.refresh(&session).await {
            Ok(refreshed) => {
                let kind = SessionEventKind::TokenRefreshed;
                if !self.publish_if_current(&session, kind, Some(refreshed.clone())) {
                    info!(user_id = %session.user_id, "Discarding refresh of a replaced session");
                    return Err(AuthError::SessionSuperseded);
                }
                info!(user_id = %refreshed.user_id, expires_at = refreshed.expires_at, "Token refreshed");
                Ok(refreshed)
            }
            Err(AuthError::SessionExpired) => {
                if !self.publish_if_current(&session, SessionEventKind::SignedOut, None) {
                    info!(user_id = %session.user_id, "Ignoring rejected refresh of a replaced session");
                    return Err(AuthError::SessionSuperseded);
                }
                warn!(user_id = %session.user_id, "Refresh token rejected, signed out");
                Err(AuthError::SessionExpired)
            }
            Err(e) => Err(e),
        }
    }

    fn publish(&self, kind: SessionEventKind, session: Option<Session>) {
        let mut current = write_current(&self.current);
        self.apply(&mut current, kind, session);
    }

    /// Publish only while `expected` is still the current session, compared
    /// by access token. Returns whether the transition was applied.
    fn publish_if_current(
        &self,
        expected: &Session,
        kind: SessionEventKind,
        session: Option<Session>,
    ) -> bool {
        let mut current = write_current(&self.current);
        if current.as_ref().map(|s| s.access_token.as_str()) != Some(expected.access_token.as_str()) {
            return false;
        }
        self.apply(&mut current, kind, session);
        true
    }

    fn apply(&self, current: &mut Option<Session>, kind: SessionEventKind, session: Option<Session>) {
        self.auth.remember(session.as_ref());
        *current = session.clone();
        // No subscribers is fine; the value is still recorded above.
        let _ = self.events.send(SessionEvent { kind, session });
    }
}

fn read_current(current: &RwLock<Option<Session>>) -> Option<Session> {
    match current.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_current(current: &RwLock<Option<Session>>) -> RwLockWriteGuard<'_, Option<Session>> {
    match current.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    async fn monitor_with_user() -> (Arc<MemoryBackend>, SessionMonitor<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        backend.register_user("u1", "ann@example.com", "hunter2");
        let monitor = SessionMonitor::start(Arc::clone(&backend)).await;
        (backend, monitor)
    }

    #[tokio::test]
    async fn starts_signed_out_without_persisted_session() {
        let (_backend, monitor) = monitor_with_user().await;
        assert_eq!(monitor.current_session(), None);
    }

    #[tokio::test]
    async fn restores_persisted_session_at_start() {
        let backend = Arc::new(MemoryBackend::new());
        backend.register_user("u1", "ann@example.com", "hunter2");
        backend.persist_session(backend.issue_session("u1").unwrap());

        let monitor = SessionMonitor::start(Arc::clone(&backend)).await;
        assert_eq!(monitor.current_session().unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn transitions_are_delivered_in_order() {
        let (_backend, monitor) = monitor_with_user().await;
        let mut events = monitor.subscribe();

        monitor.sign_in("ann@example.com", "hunter2").await.unwrap();
        monitor.refresh().await.unwrap();
        monitor.sign_out().await.unwrap();

        let kinds: Vec<_> = [
            events.next().await.unwrap(),
            events.next().await.unwrap(),
            events.next().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.kind)
        .collect();
        assert_eq!(
            kinds,
            vec![
                SessionEventKind::SignedIn,
                SessionEventKind::TokenRefreshed,
                SessionEventKind::SignedOut
            ]
        );
        assert_eq!(monitor.current_session(), None);
    }

    #[tokio::test]
    async fn failed_sign_in_leaves_session_absent() {
        let (_backend, monitor) = monitor_with_user().await;

        let result = monitor.sign_in("ann@example.com", "wrong").await;
        assert_eq!(result, Err(AuthError::InvalidCredentials));
        assert_eq!(monitor.current_session(), None);
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_yielding() {
        let (_backend, monitor) = monitor_with_user().await;
        let mut events = monitor.subscribe();

        events.cancel();
        monitor.sign_in("ann@example.com", "hunter2").await.unwrap();

        assert!(events.is_cancelled());
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn sign_out_clears_locally_when_backend_fails() {
        let (backend, monitor) = monitor_with_user().await;
        monitor.sign_in("ann@example.com", "hunter2").await.unwrap();
        backend.fail_sign_out(true);

        let result = monitor.sign_out().await;
        assert!(result.is_err());
        assert_eq!(monitor.current_session(), None);
    }

    #[tokio::test]
    async fn expired_refresh_token_signs_out() {
        let (backend, monitor) = monitor_with_user().await;
        monitor.sign_in("ann@example.com", "hunter2").await.unwrap();
        let mut events = monitor.subscribe();
        backend.expire_refresh_tokens();

        assert_eq!(monitor.refresh().await, Err(AuthError::SessionExpired));
        assert_eq!(events.next().await.unwrap().kind, SessionEventKind::SignedOut);
        assert_eq!(monitor.current_session(), None);
        assert_eq!(backend.persisted_session(), None);
    }

    #[tokio::test]
    async fn transitions_are_persisted_through_the_backend() {
        let (backend, monitor) = monitor_with_user().await;

        let signed_in = monitor.sign_in("ann@example.com", "hunter2").await.unwrap();
        assert_eq!(backend.persisted_session(), Some(signed_in));

        let refreshed = monitor.refresh().await.unwrap();
        assert_eq!(backend.persisted_session(), Some(refreshed));

        monitor.sign_out().await.unwrap();
        assert_eq!(backend.persisted_session(), None);
    }

    #[tokio::test]
    async fn rejected_refresh_of_replaced_session_keeps_new_user() {
        let (backend, monitor) = monitor_with_user().await;
        backend.register_user("u2", "eve@example.com", "swordfish");
        let monitor = Arc::new(monitor);
        monitor.sign_in("ann@example.com", "hunter2").await.unwrap();

        let gate = backend.hold_refreshes();
        let refresh = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.refresh().await })
        };
        gate.started().await;

        monitor.sign_out().await.unwrap();
        let eve = monitor.sign_in("eve@example.com", "swordfish").await.unwrap();
        let mut events = monitor.subscribe();
        backend.expire_refresh_tokens();
        gate.release();

        assert_eq!(refresh.await.unwrap(), Err(AuthError::SessionSuperseded));
        assert_eq!(monitor.current_session(), Some(eve.clone()));
        assert_eq!(backend.persisted_session(), Some(eve));

        // The stale rejection published nothing.
        monitor.sign_in("ann@example.com", "hunter2").await.unwrap();
        assert_eq!(events.next().await.unwrap().kind, SessionEventKind::SignedIn);
    }

    #[tokio::test]
    async fn refresh_of_replaced_session_does_not_overwrite_new_login() {
        let (backend, monitor) = monitor_with_user().await;
        let monitor = Arc::new(monitor);
        monitor.sign_in("ann@example.com", "hunter2").await.unwrap();

        let gate = backend.hold_refreshes();
        let refresh = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.refresh().await })
        };
        gate.started().await;

        monitor.sign_out().await.unwrap();
        let relogin = monitor.sign_in("ann@example.com", "hunter2").await.unwrap();
        gate.release();

        assert_eq!(refresh.await.unwrap(), Err(AuthError::SessionSuperseded));
        assert_eq!(monitor.current_session(), Some(relogin.clone()));
        assert_eq!(backend.persisted_session(), Some(relogin));
    }

    #[tokio::test]
    async fn lagging_subscriber_is_resynced_with_current_value() {
        let (_backend, monitor) = monitor_with_user().await;
        let mut events = monitor.subscribe();

        for _ in 0..(EVENT_CAPACITY + 4) {
            monitor.sign_in("ann@example.com", "hunter2").await.unwrap();
        }

        let event = events.next().await.unwrap();
        assert_eq!(event.kind, SessionEventKind::Resynced);
        assert_eq!(event.session.unwrap().user_id, "u1");
    }
}
