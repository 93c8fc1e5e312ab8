// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment API collaborator.
//!
//! The handler only needs confirm and retrieve for both intent kinds. The
//! transport behind [`IntentApi`] is the host's choice; [`stripe`] provides
//! an HTTP implementation.

use async_trait::async_trait;

use crate::models::{ClientSecret, Intent, IntentKind, PaymentIntentParams, SetupIntentConfirmParams};

pub mod stripe;

pub use stripe::HttpIntentClient;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("payment API request failed: {0}")]
    Transport(String),

    #[error("payment API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("payment API response was invalid: {0}")]
    InvalidResponse(String),

    #[error("invalid intent credential: {0}")]
    InvalidCredential(String),
}

impl ApiError {
    /// Whether a poll attempt that hit this error may be retried after backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::InvalidResponse(_) | ApiError::InvalidCredential(_) => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Transport(_) => "api_transport",
            ApiError::Status { .. } => "api_status",
            ApiError::InvalidResponse(_) => "api_invalid_response",
            ApiError::InvalidCredential(_) => "api_invalid_credential",
        }
    }
}

/// Confirm/retrieve operations for payment and setup intents.
#[async_trait]
pub trait IntentApi: Send + Sync {
    async fn confirm_payment_intent(&self, params: &PaymentIntentParams) -> Result<Intent, ApiError>;

    async fn confirm_setup_intent(
        &self,
        params: &SetupIntentConfirmParams,
    ) -> Result<Intent, ApiError>;

    async fn retrieve_intent(
        &self,
        kind: IntentKind,
        client_secret: &ClientSecret,
    ) -> Result<Intent, ApiError>;
}
