// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP implementation of [`IntentApi`] against the payment intents REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{ApiError, IntentApi};
use crate::config::{
    env_optional, env_or_default, ConfigError, PAYMENT_API_BASE_URL_ENV,
    PAYMENT_API_PUBLISHABLE_KEY_ENV,
};
use crate::models::{
    ClientSecret, Intent, IntentKind, PaymentIntentParams, SetupIntentConfirmParams,
};

pub const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Payment intents client authenticated with a publishable key.
///
/// Every call is scoped by the intent's client secret, so no secret key ever
/// reaches the handler.
#[derive(Debug, Clone)]
pub struct HttpIntentClient {
    api_base_url: String,
    publishable_key: String,
    http: Client,
}

impl HttpIntentClient {
    pub fn new(
        api_base_url: impl Into<String>,
        publishable_key: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            publishable_key: publishable_key.into(),
            http,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = env_or_default(PAYMENT_API_BASE_URL_ENV, DEFAULT_API_BASE_URL);
        let publishable_key = env_optional(PAYMENT_API_PUBLISHABLE_KEY_ENV)
            .ok_or_else(|| ConfigError::Missing(PAYMENT_API_PUBLISHABLE_KEY_ENV.to_string()))?;
        Self::new(api_base_url, publishable_key)
            .map_err(|e| ConfigError::Invalid(PAYMENT_API_BASE_URL_ENV.to_string(), e.to_string()))
    }

    fn intent_path(kind: IntentKind, intent_id: &str) -> String {
        format!("/v1/{}/{intent_id}", kind.resource_path())
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let response = self
            .http
            .get(format!("{}{}", self.api_base_url, path))
            .bearer_auth(&self.publishable_key)
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("GET {path} failed: {e}")))?;

        Self::read_json(path, response).await
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<Value, ApiError> {
        let response = self
            .http
            .post(format!("{}{}", self.api_base_url, path))
            .bearer_auth(&self.publishable_key)
            .form(form)
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("POST {path} failed: {e}")))?;

        Self::read_json(path, response).await
    }

    async fn read_json(path: &str, response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{path} invalid JSON: {e}")))
    }

    async fn confirm(
        &self,
        kind: IntentKind,
        client_secret: &ClientSecret,
        form: Vec<(String, String)>,
    ) -> Result<Intent, ApiError> {
        let intent_id = client_secret.validate_for(kind)?;
        let path = format!("{}/confirm", Self::intent_path(kind, intent_id));
        debug!(intent_id = %intent_id, kind = %kind, "confirming intent");

        let response = self.post_form(&path, &form).await?;
        Intent::from_json(kind, &response)
    }
}

#[async_trait]
impl IntentApi for HttpIntentClient {
    async fn confirm_payment_intent(&self, params: &PaymentIntentParams) -> Result<Intent, ApiError> {
        self.confirm(IntentKind::Payment, &params.client_secret, params.to_form())
            .await
    }

    async fn confirm_setup_intent(
        &self,
        params: &SetupIntentConfirmParams,
    ) -> Result<Intent, ApiError> {
        self.confirm(IntentKind::Setup, &params.client_secret, params.to_form())
            .await
    }

    async fn retrieve_intent(
        &self,
        kind: IntentKind,
        client_secret: &ClientSecret,
    ) -> Result<Intent, ApiError> {
        let intent_id = client_secret.validate_for(kind)?;
        let path = Self::intent_path(kind, intent_id);
        let response = self
            .get_json(&path, &[("client_secret", client_secret.expose())])
            .await?;
        Intent::from_json(kind, &response)
    }
}

/// Pull `error.message` out of an API error body, falling back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
