// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Refresher
//!
//! Background task that keeps the access token fresh.
//!
//! ## Strategy
//!
//! While a session exists, the refresher sleeps until `refresh_margin` before
//! the access token expires and then asks the monitor to refresh it. Any
//! failed refresh is retried after `retry_interval`, never sooner; an expired
//! refresh token makes the monitor sign out, after which the refresher idles
//! until the next sign-in. Every session transition wakes the loop so the schedule
//! always tracks the current token.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`, like the coordinator's session
//! loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::session::unix_now;
use super::{AuthError, SessionMonitor};
use crate::backend::AuthBackend;

/// Refresh this long before the access token expires.
const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Wait this long after a failed refresh before trying again.
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Floor on the scheduled delay so short-lived tokens cannot spin the loop.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Background token refresher for a session monitor.
pub struct SessionRefresher<A> {
    monitor: Arc<SessionMonitor<A>>,
    refresh_margin: Duration,
    retry_interval: Duration,
}

impl<A: AuthBackend> SessionRefresher<A> {
    pub fn new(monitor: Arc<SessionMonitor<A>>) -> Self {
        Self {
            monitor,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Run the refresh loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(refresher.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            margin_secs = self.refresh_margin.as_secs(),
            "Session refresher starting"
        );

        let mut events = self.monitor.subscribe();
        let mut retry_after: Option<Duration> = None;

        loop {
            if shutdown.is_cancelled() {
                info!("Session refresher shutting down");
                return;
            }

            let wait = match (self.monitor.current_session(), retry_after.take()) {
                (None, _) => None,
                (Some(_), Some(retry)) => Some(retry),
                (Some(session), None) => Some(self.delay_until_due(session.expires_at)),
            };

            let due = match wait {
                Some(wait) => tokio::select! {
                    _ = tokio::time::sleep(wait) => true,
                    event = events.next() => {
                        if event.is_none() {
                            info!("Session monitor closed, refresher stopping");
                            return;
                        }
                        false
                    }
                    _ = shutdown.cancelled() => {
                        info!("Session refresher shutting down");
                        return;
                    }
                },
                None => tokio::select! {
                    event = events.next() => {
                        if event.is_none() {
                            info!("Session monitor closed, refresher stopping");
                            return;
                        }
                        false
                    }
                    _ = shutdown.cancelled() => {
                        info!("Session refresher shutting down");
                        return;
                    }
                },
            };

            if !due {
                continue;
            }

            match self.monitor.refresh().await {
                Ok(_) => {}
                // The replacing session brings its own schedule.
                Err(AuthError::SessionSuperseded) => {}
                Err(e) => {
                    warn!(
                        error = %e,
                        code = e.error_code(),
                        transient = e.is_transient(),
                        retry_secs = self.retry_interval.as_secs(),
                        "Token refresh failed, will retry"
                    );
                    retry_after = Some(self.retry_interval);
                }
            }
        }
    }

    fn delay_until_due(&self, expires_at: i64) -> Duration {
        let margin = i64::try_from(self.refresh_margin.as_secs()).unwrap_or(i64::MAX);
        let secs = expires_at.saturating_sub(margin).saturating_sub(unix_now());
        Duration::from_secs(u64::try_from(secs).unwrap_or(0)).max(MIN_REFRESH_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[tokio::test]
    async fn refreshes_token_that_is_already_due() {
        let backend = Arc::new(MemoryBackend::new());
        backend.register_user("u1", "ann@example.com", "hunter2");
        backend.set_token_lifetime(Duration::from_secs(1));

        let monitor = Arc::new(SessionMonitor::start(Arc::clone(&backend)).await);
        let first = monitor.sign_in("ann@example.com", "hunter2").await.unwrap();

        let shutdown = CancellationToken::new();
        let refresher = SessionRefresher::new(Arc::clone(&monitor))
            .with_refresh_margin(Duration::from_secs(120));
        let task = tokio::spawn(refresher.run(shutdown.clone()));

        let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(current) = monitor.current_session() {
                    if current.refresh_token != first.refresh_token {
                        return current;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("token should be refreshed");

        assert_eq!(refreshed.user_id, "u1");
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn idles_without_session_and_stops_on_shutdown() {
        let backend = Arc::new(MemoryBackend::new());
        let monitor = Arc::new(SessionMonitor::start(Arc::clone(&backend)).await);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(SessionRefresher::new(monitor).run(shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("refresher should stop")
            .unwrap();
        assert_eq!(backend.refresh_count(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_waits_for_retry_interval() {
        let backend = Arc::new(MemoryBackend::new());
        backend.register_user("u1", "ann@example.com", "hunter2");
        backend.set_token_lifetime(Duration::from_secs(30));

        let monitor = Arc::new(SessionMonitor::start(Arc::clone(&backend)).await);
        monitor.sign_in("ann@example.com", "hunter2").await.unwrap();
        backend.fail_refreshes(Some(AuthError::Rejected {
            status: 403,
            message: "refresh disabled".to_string(),
        }));

        let shutdown = CancellationToken::new();
        let refresher = SessionRefresher::new(Arc::clone(&monitor))
            .with_refresh_margin(Duration::from_secs(60))
            .with_retry_interval(Duration::from_secs(30));
        let task = tokio::spawn(refresher.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(backend.refresh_count(), 1);
        assert_eq!(monitor.current_session().unwrap().user_id, "u1");
    }

    #[test]
    fn delay_is_floored_once_inside_margin() {
        let refresher = SessionRefresher {
            monitor: Arc::new(blocking_monitor()),
            refresh_margin: Duration::from_secs(60),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        };
        assert_eq!(refresher.delay_until_due(unix_now() + 30), MIN_REFRESH_DELAY);
        assert!(refresher.delay_until_due(unix_now() + 600) > Duration::from_secs(500));
    }

    fn blocking_monitor() -> SessionMonitor<MemoryBackend> {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(SessionMonitor::start(Arc::new(MemoryBackend::new())))
    }
}
