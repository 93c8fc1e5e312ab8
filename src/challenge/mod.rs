// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Challenge Executor
//!
//! Performs exactly one authentication challenge for a next action and
//! reports a single [`ChallengeOutcome`].
//!
//! ## Challenge kinds
//!
//! - **Redirect**: `redirect_to_url` and 3-D Secure 1 (`three_d_secure_redirect`)
//!   open a browser surface; the return callback completes the challenge.
//! - **3-D Secure 2**: `stripe_3ds2_fingerprint` runs through a
//!   [`ChallengeProtocol`]; a frictionless handshake presents nothing.
//!
//! ## Deadline
//!
//! One wall-clock deadline covers the whole challenge, fallback redirects
//! included. When it passes the outcome is `Failed(TimedOut)` and whatever
//! was presented is dismissed, regardless of the protocol's own state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

pub mod context;
pub mod redirect;
pub mod three_ds2;

pub use context::{
    AuthenticationContext, DismissalSignal, Presentation, PresentationError,
    PresentationSurface, PresentedContent,
};
pub use redirect::{return_url_matches, ReturnUrlRouter};
pub use three_ds2::{ChallengeProtocol, ChallengeTransaction, Handshake, ProtocolError, ProtocolOutcome};

use crate::config::ThreeDsCustomizationSettings;
use crate::error::{PaymentHandlerError, TimeoutStage};
use crate::models::{NextAction, SdkAction, ThreeDs2Params};
use three_ds2::ThreeDs2Challenge;

/// Why a challenge failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeFailure {
    TimedOut,
    NotAuthenticated,
    Protocol(String),
    Unsupported(String),
}

impl From<ChallengeFailure> for PaymentHandlerError {
    fn from(failure: ChallengeFailure) -> Self {
        match failure {
            ChallengeFailure::TimedOut => PaymentHandlerError::TimedOut(TimeoutStage::Challenge),
            ChallengeFailure::NotAuthenticated => PaymentHandlerError::NotAuthenticated,
            ChallengeFailure::Protocol(message) => PaymentHandlerError::ChallengeProtocol(message),
            ChallengeFailure::Unsupported(message) => {
                PaymentHandlerError::UnsupportedAuthentication(message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Completed,
    UserCanceled,
    Failed(ChallengeFailure),
}

/// A recognised next action, resolved to the challenge that will handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengePlan {
    Redirect { url: Url, return_url: Url },
    ThreeDs2 {
        params: ThreeDs2Params,
        fallback_return_url: Option<Url>,
    },
}

impl ChallengePlan {
    /// Resolve `next_action`, or fail with `UnsupportedAuthentication`
    /// before anything is presented.
    ///
    /// `default_return_url` applies when the action carries no return URL
    /// of its own.
    pub fn resolve(
        next_action: &NextAction,
        default_return_url: Option<&Url>,
    ) -> Result<Self, PaymentHandlerError> {
        let require_return_url = |own: Option<&Url>| {
            own.or(default_return_url).cloned().ok_or_else(|| {
                PaymentHandlerError::UnsupportedAuthentication(format!(
                    "{} requires a return url",
                    next_action.action_type()
                ))
            })
        };

        match next_action {
            NextAction::RedirectToUrl { url, return_url } => Ok(ChallengePlan::Redirect {
                url: url.clone(),
                return_url: require_return_url(return_url.as_ref())?,
            }),
            NextAction::UseSdk(SdkAction::ThreeDsRedirect { url }) => Ok(ChallengePlan::Redirect {
                url: url.clone(),
                return_url: require_return_url(None)?,
            }),
            NextAction::UseSdk(SdkAction::ThreeDs2Fingerprint(params)) => Ok(ChallengePlan::ThreeDs2 {
                params: params.clone(),
                fallback_return_url: default_return_url.cloned(),
            }),
            NextAction::UseSdk(SdkAction::Unknown { .. })
            | NextAction::OxxoDisplayDetails { .. }
            | NextAction::Unknown { .. } => Err(PaymentHandlerError::UnsupportedAuthentication(
                next_action.action_type().to_string(),
            )),
        }
    }
}

/// Runs challenges against a protocol implementation and a return-URL router.
#[derive(Clone)]
pub struct ChallengeExecutor {
    protocol: Arc<dyn ChallengeProtocol>,
    router: Arc<ReturnUrlRouter>,
}

impl ChallengeExecutor {
    pub fn new(protocol: Arc<dyn ChallengeProtocol>, router: Arc<ReturnUrlRouter>) -> Self {
        Self { protocol, router }
    }

    pub fn router(&self) -> &Arc<ReturnUrlRouter> {
        &self.router
    }

    /// Perform one challenge. `deadline` is fixed by the caller at challenge start.
    pub async fn execute(
        &self,
        action_id: Uuid,
        plan: ChallengePlan,
        context: &dyn AuthenticationContext,
        settings: &ThreeDsCustomizationSettings,
        deadline: Instant,
    ) -> ChallengeOutcome {
        let outcome = match plan {
            ChallengePlan::Redirect { url, return_url } => {
                redirect::run_redirect(context, &self.router, action_id, url, return_url, deadline)
                    .await
            }
            ChallengePlan::ThreeDs2 {
                params,
                fallback_return_url,
            } => {
                ThreeDs2Challenge {
                    protocol: self.protocol.as_ref(),
                    router: &self.router,
                    context,
                    settings,
                    action_id,
                    params: &params,
                    fallback_return_url: fallback_return_url.as_ref(),
                    deadline,
                }
                .run()
                .await
            }
        };
        debug!(action_id = %action_id, outcome = ?outcome, "challenge settled");
        outcome
    }
}

/// Upper bound on the host's dismiss hook; the outcome is delivered either way.
pub const DISMISS_GRACE: Duration = Duration::from_secs(5);

/// Present `content`, then wait for `settled`, a user dismissal or the
/// deadline. Dismisses exactly once if presentation went ahead.
pub(crate) async fn present_until_settled<F>(
    context: &dyn AuthenticationContext,
    content: PresentedContent,
    deadline: Instant,
    settled: F,
) -> ChallengeOutcome
where
    F: Future<Output = ChallengeOutcome>,
{
    if timeout_at(deadline, context.prepare_for_presentation())
        .await
        .is_err()
    {
        warn!("authentication context did not prepare before the deadline");
        return ChallengeOutcome::Failed(ChallengeFailure::TimedOut);
    }

    let dismissal = DismissalSignal::new();
    let presentation = Presentation {
        surface: context.presentation_surface(),
        content,
        dismissal: dismissal.clone(),
    };

    let outcome = match timeout_at(deadline, context.present(presentation)).await {
        Ok(Ok(())) => {
            tokio::select! {
                biased;
                outcome = settled => outcome,
                _ = dismissal.dismissed() => ChallengeOutcome::UserCanceled,
                _ = sleep_until(deadline) => ChallengeOutcome::Failed(ChallengeFailure::TimedOut),
            }
        }
        Ok(Err(error)) => {
            warn!(error = %error, "authentication context refused to present");
            return ChallengeOutcome::Failed(ChallengeFailure::Protocol(error.to_string()));
        }
        // The host may have shown something before the deadline cut it off.
        Err(_) => ChallengeOutcome::Failed(ChallengeFailure::TimedOut),
    };

    context.will_dismiss();
    if timeout(DISMISS_GRACE, context.dismiss()).await.is_err() {
        warn!(
            grace_secs = DISMISS_GRACE.as_secs(),
            "authentication context did not finish dismissing"
        );
    }
    outcome
}
