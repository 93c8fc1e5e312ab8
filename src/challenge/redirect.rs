// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Redirect-based challenges and return-URL routing.
//!
//! A redirect challenge completes when the host forwards a callback URL that
//! matches the expected return URL, via
//! [`PaymentHandler::handle_url_callback`](crate::handler::PaymentHandler::handle_url_callback).

use std::sync::Mutex;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::context::{AuthenticationContext, PresentedContent};
use super::{present_until_settled, ChallengeOutcome};

struct PendingReturn {
    action_id: Uuid,
    expected: Url,
    returned: CancellationToken,
}

/// Holds the return URL the in-flight redirect is waiting for.
#[derive(Default)]
pub struct ReturnUrlRouter {
    pending: Mutex<Option<PendingReturn>>,
}

impl ReturnUrlRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the pending redirect if `url` matches its return URL.
    ///
    /// Returns `false`, leaving any challenge pending, when nothing is
    /// waiting or the URL does not match.
    pub fn handle_url_callback(&self, url: &Url) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pending) = pending.as_ref() else {
            debug!(url = %redact(url), "return callback with no pending redirect");
            return false;
        };
        if !return_url_matches(&pending.expected, url) {
            debug!(
                action_id = %pending.action_id,
                url = %redact(url),
                "return callback does not match the pending redirect"
            );
            return false;
        }
        info!(action_id = %pending.action_id, "redirect return received");
        pending.returned.cancel();
        true
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn register(&self, action_id: Uuid, expected: Url) -> ReturnRegistration<'_> {
        let returned = CancellationToken::new();
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(PendingReturn {
            action_id,
            expected,
            returned: returned.clone(),
        });
        ReturnRegistration {
            router: self,
            action_id,
            returned,
        }
    }
}

/// Clears the router's pending entry when the redirect stage ends.
struct ReturnRegistration<'a> {
    router: &'a ReturnUrlRouter,
    action_id: Uuid,
    returned: CancellationToken,
}

impl Drop for ReturnRegistration<'_> {
    fn drop(&mut self) {
        let mut pending = self
            .router
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if pending
            .as_ref()
            .is_some_and(|p| p.action_id == self.action_id)
        {
            *pending = None;
        }
    }
}

/// Scheme, host and path must match, and every query pair on `expected`
/// must be present on `received`.
pub fn return_url_matches(expected: &Url, received: &Url) -> bool {
    if expected.scheme() != received.scheme() {
        return false;
    }
    let host = |url: &Url| url.host_str().map(str::to_ascii_lowercase);
    if host(expected) != host(received) {
        return false;
    }
    if expected.path().trim_end_matches('/') != received.path().trim_end_matches('/') {
        return false;
    }
    let received_pairs: Vec<(String, String)> = received
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    expected
        .query_pairs()
        .all(|(k, v)| received_pairs.iter().any(|(rk, rv)| *rk == k && *rv == v))
}

/// Log-safe rendering: return URLs can carry client secrets in their query.
fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    redacted.set_query(None);
    redacted.to_string()
}

/// Present a browser at `url` and wait for the return callback, a user
/// dismissal or the deadline, whichever comes first.
pub(crate) async fn run_redirect(
    context: &dyn AuthenticationContext,
    router: &ReturnUrlRouter,
    action_id: Uuid,
    url: Url,
    return_url: Url,
    deadline: Instant,
) -> ChallengeOutcome {
    let registration = router.register(action_id, return_url.clone());
    info!(
        action_id = %action_id,
        url = %redact(&url),
        return_url = %redact(&return_url),
        "presenting redirect challenge"
    );

    let returned = registration.returned.clone();
    present_until_settled(
        context,
        PresentedContent::Browser { url, return_url },
        deadline,
        async move {
            returned.cancelled().await;
            ChallengeOutcome::Completed
        },
    )
    .await
}
