// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-app 3-D Secure 2 challenges.
//!
//! The cryptographic handshake and challenge rendering belong to a
//! [`ChallengeProtocol`] implementation. This module only sequences it and
//! translates its terminal events into a [`ChallengeOutcome`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::context::{AuthenticationContext, PresentedContent};
use super::redirect::{run_redirect, ReturnUrlRouter};
use super::{present_until_settled, ChallengeFailure, ChallengeOutcome};
use crate::config::ThreeDsCustomizationSettings;
use crate::models::ThreeDs2Params;

/// Transaction status the protocol reports for an authenticated cardholder.
pub const AUTHENTICATED_TRANSACTION_STATUS: &str = "Y";

/// Challenge handle returned by a handshake that needs cardholder interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeTransaction {
    pub transaction_id: String,
    /// Protocol-specific challenge data, passed back untouched.
    pub payload: serde_json::Value,
}

/// Result of the UI-less first phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// Authenticated without cardholder interaction.
    Frictionless,
    ChallengeRequired(ChallengeTransaction),
    /// The issuer only supports a browser flow at this URL.
    FallbackRedirect(Url),
}

/// Terminal event of an interactive challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOutcome {
    Completed { transaction_status: String },
    Canceled,
    TimedOut,
    ProtocolError(String),
    RuntimeError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProtocolError(pub String);

/// 3-D Secure 2 implementation consumed opaquely by the executor.
#[async_trait]
pub trait ChallengeProtocol: Send + Sync {
    /// Device fingerprint and authentication request. Presents nothing.
    async fn begin(&self, params: &ThreeDs2Params) -> Result<Handshake, ProtocolError>;

    /// Render the challenge inside the presented container until it ends.
    async fn challenge(
        &self,
        transaction: &ChallengeTransaction,
        settings: &ThreeDsCustomizationSettings,
        remaining: Duration,
    ) -> ProtocolOutcome;
}

impl From<ProtocolOutcome> for ChallengeOutcome {
    fn from(outcome: ProtocolOutcome) -> Self {
        match outcome {
            ProtocolOutcome::Completed { transaction_status }
                if transaction_status == AUTHENTICATED_TRANSACTION_STATUS =>
            {
                ChallengeOutcome::Completed
            }
            ProtocolOutcome::Completed { .. } => {
                ChallengeOutcome::Failed(ChallengeFailure::NotAuthenticated)
            }
            ProtocolOutcome::Canceled => ChallengeOutcome::UserCanceled,
            ProtocolOutcome::TimedOut => ChallengeOutcome::Failed(ChallengeFailure::TimedOut),
            ProtocolOutcome::ProtocolError(message) | ProtocolOutcome::RuntimeError(message) => {
                ChallengeOutcome::Failed(ChallengeFailure::Protocol(message))
            }
        }
    }
}

pub(crate) struct ThreeDs2Challenge<'a> {
    pub protocol: &'a dyn ChallengeProtocol,
    pub router: &'a ReturnUrlRouter,
    pub context: &'a dyn AuthenticationContext,
    pub settings: &'a ThreeDsCustomizationSettings,
    pub action_id: Uuid,
    pub params: &'a ThreeDs2Params,
    /// Return URL for a fallback redirect, if the handshake asks for one.
    pub fallback_return_url: Option<&'a Url>,
    pub deadline: Instant,
}

impl ThreeDs2Challenge<'_> {
    pub(crate) async fn run(self) -> ChallengeOutcome {
        let handshake = match timeout_at(self.deadline, self.protocol.begin(self.params)).await {
            Ok(Ok(handshake)) => handshake,
            Ok(Err(error)) => {
                warn!(action_id = %self.action_id, error = %error, "3DS2 handshake failed");
                return ChallengeOutcome::Failed(ChallengeFailure::Protocol(error.0));
            }
            Err(_) => return ChallengeOutcome::Failed(ChallengeFailure::TimedOut),
        };

        match handshake {
            Handshake::Frictionless => {
                info!(action_id = %self.action_id, "3DS2 authenticated frictionless");
                ChallengeOutcome::Completed
            }
            Handshake::FallbackRedirect(url) => {
                let Some(return_url) = self.fallback_return_url else {
                    return ChallengeOutcome::Failed(ChallengeFailure::Unsupported(
                        "3DS2 fallback redirect requires a return url".to_string(),
                    ));
                };
                info!(action_id = %self.action_id, "3DS2 falling back to redirect");
                run_redirect(
                    self.context,
                    self.router,
                    self.action_id,
                    url,
                    return_url.clone(),
                    self.deadline,
                )
                .await
            }
            Handshake::ChallengeRequired(transaction) => {
                info!(
                    action_id = %self.action_id,
                    transaction_id = %transaction.transaction_id,
                    "presenting 3DS2 challenge"
                );
                let remaining = self.deadline.saturating_duration_since(Instant::now());
                let content = PresentedContent::Challenge {
                    transaction_id: transaction.transaction_id.clone(),
                    ui: self.settings.ui.clone(),
                };
                let protocol = self.protocol;
                let settings = self.settings;
                present_until_settled(self.context, content, self.deadline, async move {
                    ChallengeOutcome::from(
                        protocol.challenge(&transaction, settings, remaining).await,
                    )
                })
                .await
            }
        }
    }
}
