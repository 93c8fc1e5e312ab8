// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Status Poller
//!
//! Re-fetches an intent after a completed challenge until the payment API
//! reports a status past authentication. The server-side status may lag the
//! challenge by a few seconds.
//!
//! ## Strategy
//!
//! 1. Retrieve the intent. A status other than `requires_action` or
//!    `processing` is returned immediately.
//! 2. A pending status or a retryable error counts as an attempt; the poller
//!    then backs off per [`PollPolicy`] (exponential, capped per delay).
//! 3. A non-retryable error (malformed credential, 4xx) terminates at once.
//!
//! ## Limits
//!
//! Polling ends at `max_attempts` or `max_elapsed`, whichever comes first:
//! - attempts exhausted with a pending snapshot: `IntentStatusUnresolvable`
//! - attempts exhausted with only errors: the last error, wrapped
//! - elapsed ceiling reached: `TimedOut(Polling)`

use std::sync::Arc;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::{deadline_after, PollPolicy};
use crate::error::{PaymentHandlerError, TimeoutStage};
use crate::models::{ClientSecret, Intent, IntentKind, IntentStatus};
use crate::providers::{ApiError, IntentApi};

/// Bounded re-fetch of an intent's status.
#[derive(Clone)]
pub struct StatusPoller {
    api: Arc<dyn IntentApi>,
    policy: PollPolicy,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn IntentApi>, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Poll until the intent leaves authentication or a limit is hit.
    pub async fn poll(
        &self,
        kind: IntentKind,
        client_secret: &ClientSecret,
    ) -> Result<Intent, PaymentHandlerError> {
        let deadline = deadline_after(self.policy.max_elapsed);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_pending: Option<IntentStatus> = None;
        let mut last_error: Option<ApiError> = None;

        for attempt in 1..=max_attempts {
            let fetched = timeout_at(deadline, self.api.retrieve_intent(kind, client_secret))
                .await
                .map_err(|_| PaymentHandlerError::TimedOut(TimeoutStage::Polling))?;

            match fetched {
                Ok(intent) if !intent.status().is_pending_authentication() => {
                    info!(
                        kind = %kind,
                        intent_id = %intent.id(),
                        status = %intent.status(),
                        attempt,
                        "intent status settled"
                    );
                    return Ok(intent);
                }
                Ok(intent) => {
                    debug!(
                        kind = %kind,
                        intent_id = %intent.id(),
                        status = %intent.status(),
                        attempt,
                        "intent still pending authentication"
                    );
                    last_pending = Some(intent.status());
                }
                Err(error) if !error.is_retryable() => {
                    warn!(kind = %kind, attempt, error = %error, "status poll failed permanently");
                    return Err(error.into());
                }
                Err(error) => {
                    warn!(kind = %kind, attempt, error = %error, "status poll failed, retrying");
                    last_error = Some(error);
                }
            }

            if attempt == max_attempts {
                break;
            }

            let delay = self.policy.delay_after(attempt);
            if Instant::now().checked_add(delay).map_or(true, |at| at >= deadline) {
                warn!(kind = %kind, attempt, "status polling ran out of time");
                return Err(PaymentHandlerError::TimedOut(TimeoutStage::Polling));
            }
            sleep(delay).await;
        }

        match (last_pending, last_error) {
            (Some(status), _) => {
                warn!(kind = %kind, status = %status, "status still unresolved after polling");
                Err(PaymentHandlerError::IntentStatusUnresolvable { status })
            }
            (None, Some(error)) => Err(error.into()),
            // Unreachable with at least one attempt.
            (None, None) => Err(PaymentHandlerError::TimedOut(TimeoutStage::Polling)),
        }
    }
}
