// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::challenge::{
    AuthenticationContext, ChallengeProtocol, ChallengeTransaction, Handshake, Presentation,
    PresentationError, PresentedContent, ProtocolError, ProtocolOutcome,
};
use crate::config::ThreeDsCustomizationSettings;
use crate::models::{
    ClientSecret, Intent, IntentKind, IntentStatus, NextAction, PaymentIntent,
    PaymentIntentParams, SetupIntent, SetupIntentConfirmParams, ThreeDs2Params,
};
use crate::providers::{ApiError, IntentApi};

pub const PAYMENT_INTENT_ID: &str = "pi_3Mtest";
pub const SETUP_INTENT_ID: &str = "seti_1Mtest";

pub fn client_secret() -> ClientSecret {
    ClientSecret::new(format!("{PAYMENT_INTENT_ID}_secret_abc123"))
}

pub fn setup_client_secret() -> ClientSecret {
    ClientSecret::new(format!("{SETUP_INTENT_ID}_secret_def456"))
}

pub fn payment_intent(status: IntentStatus, next_action: Option<NextAction>) -> Intent {
    Intent::Payment(PaymentIntent {
        id: PAYMENT_INTENT_ID.to_string(),
        client_secret: client_secret(),
        status,
        next_action,
        payment_method_id: Some("pm_card_visa".to_string()),
        amount: Some(1099),
        currency: Some("eur".to_string()),
        last_error_message: None,
    })
}

pub fn setup_intent(status: IntentStatus, next_action: Option<NextAction>) -> Intent {
    Intent::Setup(SetupIntent {
        id: SETUP_INTENT_ID.to_string(),
        client_secret: setup_client_secret(),
        status,
        next_action,
        payment_method_id: Some("pm_card_visa".to_string()),
        usage: Some("off_session".to_string()),
        last_error_message: None,
    })
}

pub fn redirect_action(return_url: Option<&str>) -> NextAction {
    NextAction::RedirectToUrl {
        url: Url::parse("https://hooks.stripe.com/redirect/authenticate/src_1").unwrap(),
        return_url: return_url.map(|raw| Url::parse(raw).unwrap()),
    }
}

pub fn three_ds2_params() -> ThreeDs2Params {
    ThreeDs2Params {
        source_id: "src_3ds2".to_string(),
        directory_server_name: "visa".to_string(),
        server_transaction_id: "srv-txn-1".to_string(),
        directory_server_id: Some("A000000003".to_string()),
        directory_server_certificate: None,
        root_certificate_authorities: Vec::new(),
        directory_server_key_id: None,
    }
}

/// Scripted payment API. A response queue repeats its last entry once drained.
#[derive(Default)]
pub struct ScriptedApi {
    confirms: Mutex<VecDeque<Result<Intent, ApiError>>>,
    retrieves: Mutex<VecDeque<Result<Intent, ApiError>>>,
    confirm_delay: Option<Duration>,
    retrieve_delay: Option<Duration>,
    confirm_calls: AtomicUsize,
    retrieve_calls: AtomicUsize,
    payment_params: Mutex<Vec<PaymentIntentParams>>,
    setup_params: Mutex<Vec<SetupIntentConfirmParams>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confirm(self, result: Result<Intent, ApiError>) -> Self {
        self.confirms.lock().unwrap().push_back(result);
        self
    }

    pub fn with_retrieves(self, results: Vec<Result<Intent, ApiError>>) -> Self {
        self.retrieves.lock().unwrap().extend(results);
        self
    }

    pub fn with_confirm_delay(mut self, delay: Duration) -> Self {
        self.confirm_delay = Some(delay);
        self
    }

    pub fn with_retrieve_delay(mut self, delay: Duration) -> Self {
        self.retrieve_delay = Some(delay);
        self
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    pub fn last_payment_params(&self) -> Option<PaymentIntentParams> {
        self.payment_params.lock().unwrap().last().cloned()
    }

    pub fn last_setup_params(&self) -> Option<SetupIntentConfirmParams> {
        self.setup_params.lock().unwrap().last().cloned()
    }

    fn next(queue: &Mutex<VecDeque<Result<Intent, ApiError>>>) -> Result<Intent, ApiError> {
        let mut queue = queue.lock().unwrap();
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.unwrap_or_else(|| Err(ApiError::Transport("no scripted response".into())))
    }

    async fn confirmed(&self) -> Result<Intent, ApiError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.confirm_delay {
            tokio::time::sleep(delay).await;
        }
        Self::next(&self.confirms)
    }
}

#[async_trait]
impl IntentApi for ScriptedApi {
    async fn confirm_payment_intent(&self, params: &PaymentIntentParams) -> Result<Intent, ApiError> {
        self.payment_params.lock().unwrap().push(params.clone());
        self.confirmed().await
    }

    async fn confirm_setup_intent(
        &self,
        params: &SetupIntentConfirmParams,
    ) -> Result<Intent, ApiError> {
        self.setup_params.lock().unwrap().push(params.clone());
        self.confirmed().await
    }

    async fn retrieve_intent(
        &self,
        _kind: IntentKind,
        _client_secret: &ClientSecret,
    ) -> Result<Intent, ApiError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.retrieve_delay {
            tokio::time::sleep(delay).await;
        }
        Self::next(&self.retrieves)
    }
}

#[derive(Clone, Copy)]
enum HostBehaviour {
    /// Presents and waits for the handler to dismiss.
    Stay,
    /// The user closes the surface after the given delay.
    DismissAfter(Duration),
    Refuse,
    /// `prepare_for_presentation` never returns.
    HangOnPrepare,
    /// `dismiss` never returns.
    HangOnDismiss,
}

/// Authentication context that records every call.
pub struct RecordingContext {
    behaviour: HostBehaviour,
    presented: Mutex<Vec<PresentedContent>>,
    prepare_calls: AtomicUsize,
    will_dismiss_calls: AtomicUsize,
    dismiss_calls: AtomicUsize,
}

impl RecordingContext {
    fn with_behaviour(behaviour: HostBehaviour) -> Self {
        Self {
            behaviour,
            presented: Mutex::new(Vec::new()),
            prepare_calls: AtomicUsize::new(0),
            will_dismiss_calls: AtomicUsize::new(0),
            dismiss_calls: AtomicUsize::new(0),
        }
    }

    pub fn new() -> Self {
        Self::with_behaviour(HostBehaviour::Stay)
    }

    pub fn dismissing_after(delay: Duration) -> Self {
        Self::with_behaviour(HostBehaviour::DismissAfter(delay))
    }

    pub fn refusing() -> Self {
        Self::with_behaviour(HostBehaviour::Refuse)
    }

    pub fn hanging_on_prepare() -> Self {
        Self::with_behaviour(HostBehaviour::HangOnPrepare)
    }

    pub fn hanging_on_dismiss() -> Self {
        Self::with_behaviour(HostBehaviour::HangOnDismiss)
    }

    pub fn presented(&self) -> Vec<PresentedContent> {
        self.presented.lock().unwrap().clone()
    }

    pub fn present_count(&self) -> usize {
        self.presented.lock().unwrap().len()
    }

    pub fn prepare_count(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    pub fn will_dismiss_count(&self) -> usize {
        self.will_dismiss_calls.load(Ordering::SeqCst)
    }

    pub fn dismiss_count(&self) -> usize {
        self.dismiss_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthenticationContext for RecordingContext {
    async fn prepare_for_presentation(&self) {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if let HostBehaviour::HangOnPrepare = self.behaviour {
            std::future::pending::<()>().await;
        }
    }

    async fn present(&self, presentation: Presentation) -> Result<(), PresentationError> {
        if let HostBehaviour::Refuse = self.behaviour {
            return Err(PresentationError("no window to present on".into()));
        }
        self.presented
            .lock()
            .unwrap()
            .push(presentation.content.clone());
        if let HostBehaviour::DismissAfter(delay) = self.behaviour {
            let dismissal = presentation.dismissal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                dismissal.user_dismissed();
            });
        }
        Ok(())
    }

    fn will_dismiss(&self) {
        self.will_dismiss_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn dismiss(&self) {
        self.dismiss_calls.fetch_add(1, Ordering::SeqCst);
        if let HostBehaviour::HangOnDismiss = self.behaviour {
            std::future::pending::<()>().await;
        }
    }
}

/// Challenge protocol with a fixed handshake and challenge result.
pub struct ScriptedProtocol {
    handshake: Result<Handshake, ProtocolError>,
    /// `None` never finishes.
    outcome: Option<ProtocolOutcome>,
}

impl ScriptedProtocol {
    fn scripted(handshake: Result<Handshake, ProtocolError>, outcome: Option<ProtocolOutcome>) -> Self {
        Self { handshake, outcome }
    }

    fn transaction() -> ChallengeTransaction {
        ChallengeTransaction {
            transaction_id: "acs-txn-1".to_string(),
            payload: serde_json::json!({ "acsTransID": "acs-txn-1" }),
        }
    }

    pub fn frictionless() -> Self {
        Self::scripted(Ok(Handshake::Frictionless), None)
    }

    pub fn challenging(outcome: ProtocolOutcome) -> Self {
        Self::scripted(
            Ok(Handshake::ChallengeRequired(Self::transaction())),
            Some(outcome),
        )
    }

    pub fn hanging_challenge() -> Self {
        Self::scripted(Ok(Handshake::ChallengeRequired(Self::transaction())), None)
    }

    pub fn handshake_error(message: &str) -> Self {
        Self::scripted(Err(ProtocolError(message.to_string())), None)
    }

    pub fn fallback(url: Url) -> Self {
        Self::scripted(Ok(Handshake::FallbackRedirect(url)), None)
    }
}

#[async_trait]
impl ChallengeProtocol for ScriptedProtocol {
    async fn begin(&self, _params: &ThreeDs2Params) -> Result<Handshake, ProtocolError> {
        self.handshake.clone()
    }

    async fn challenge(
        &self,
        _transaction: &ChallengeTransaction,
        _settings: &ThreeDsCustomizationSettings,
        _remaining: Duration,
    ) -> ProtocolOutcome {
        match &self.outcome {
            Some(outcome) => outcome.clone(),
            None => std::future::pending().await,
        }
    }
}
