// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment handler errors.
//!
//! Every failure reaches the caller through the terminal [`ActionOutcome`]
//! of an action; nothing here is raised outside that contract.
//!
//! [`ActionOutcome`]: crate::handler::ActionOutcome

use serde::Serialize;

use crate::models::IntentStatus;
use crate::providers::ApiError;

/// Error domain string for errors produced by the payment handler itself.
pub const ERROR_DOMAIN: &str = "payment_handler";

/// Error domain string for wrapped payment API failures.
pub const API_ERROR_DOMAIN: &str = "payment_api";

/// Which namespace an error code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    /// Raised by the handler's own state machine.
    PaymentHandler,
    /// A transport or backend failure from the payment API, wrapped as the cause.
    Api,
}

impl ErrorDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorDomain::PaymentHandler => ERROR_DOMAIN,
            ErrorDomain::Api => API_ERROR_DOMAIN,
        }
    }
}

/// Which stage hit its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStage {
    Challenge,
    Polling,
}

impl std::fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutStage::Challenge => write!(f, "challenge"),
            TimeoutStage::Polling => write!(f, "polling"),
        }
    }
}

/// Errors surfaced to callers in a failed action outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentHandlerError {
    /// The next action requires an authentication method the handler does not support.
    #[error("unsupported authentication: {0}")]
    UnsupportedAuthentication(String),

    /// Attach a payment method to the intent before handling it.
    #[error("the intent has no attached payment method")]
    RequiresPaymentMethod,

    /// The intent status is neither actionable nor success-like.
    #[error("intent status `{status}` cannot be resolved")]
    IntentStatusUnresolvable { status: IntentStatus },

    /// A challenge or polling deadline was exceeded.
    #[error("the action timed out during {0}")]
    TimedOut(TimeoutStage),

    /// The 3-D Secure protocol implementation reported an internal failure.
    #[error("challenge protocol error: {0}")]
    ChallengeProtocol(String),

    /// The challenge finished but the cardholder was not authenticated.
    #[error("the transaction was not authenticated")]
    NotAuthenticated,

    /// Another action is already in flight on this handler.
    #[error("the payment handler does not support concurrent actions")]
    ConcurrentActionRejected,

    /// No authentication context was supplied.
    #[error("an authentication context is required")]
    RequiresAuthenticationContext,

    /// Confirm or retrieve failed at the payment API.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl PaymentHandlerError {
    /// Stable snake_case code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            PaymentHandlerError::UnsupportedAuthentication(_) => "unsupported_authentication",
            PaymentHandlerError::RequiresPaymentMethod => "requires_payment_method",
            PaymentHandlerError::IntentStatusUnresolvable { .. } => "intent_status_unresolvable",
            PaymentHandlerError::TimedOut(_) => "timed_out",
            PaymentHandlerError::ChallengeProtocol(_) => "challenge_protocol_error",
            PaymentHandlerError::NotAuthenticated => "not_authenticated",
            PaymentHandlerError::ConcurrentActionRejected => "concurrent_action_rejected",
            PaymentHandlerError::RequiresAuthenticationContext => {
                "requires_authentication_context"
            }
            PaymentHandlerError::Api(inner) => inner.error_code(),
        }
    }

    pub fn domain(&self) -> ErrorDomain {
        match self {
            PaymentHandlerError::Api(_) => ErrorDomain::Api,
            _ => ErrorDomain::PaymentHandler,
        }
    }

    /// The wrapped backend cause, if any.
    pub fn api_cause(&self) -> Option<&ApiError> {
        match self {
            PaymentHandlerError::Api(inner) => Some(inner),
            _ => None,
        }
    }
}
