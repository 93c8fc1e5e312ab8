// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment Handler
//!
//! Drives one payment or setup intent from confirmation to a terminal
//! outcome: confirm, inspect the status and next action, run a challenge,
//! re-fetch the status, finish.
//!
//! ```text
//! Created -> Confirming -> Inspecting -> Challenging -> Polling -> Succeeded
//!    \________________________/  |             |            \--> Failed
//!      (handle_next_action_*)    |             +--> Canceled
//!                                +--> Succeeded / Failed
//! ```
//!
//! ## Single flight
//!
//! A handler runs at most one action at a time. Entry points check and claim
//! the slot synchronously; a call made while an action is in flight resolves
//! at once with `ConcurrentActionRejected` and leaves the running action
//! untouched. The slot is released before the outcome is delivered, so a
//! caller may start the next action as soon as it observes the previous one.
//!
//! ## Runtime
//!
//! Entry points spawn the action on the current Tokio runtime and must be
//! called from within one. The returned [`PendingAction`] resolves exactly
//! once; the action runs to completion even if it is never awaited.

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};
use url::Url;

pub mod action;

pub use action::{ActionOutcome, ActionSnapshot, ActionState, ActionStatus, PendingAction};

use crate::challenge::{
    AuthenticationContext, ChallengeExecutor, ChallengeOutcome, ChallengePlan, ChallengeProtocol,
    ReturnUrlRouter,
};
use crate::config::{deadline_after, ConfigError, HandlerConfig, ThreeDsCustomizationSettings};
use crate::error::PaymentHandlerError;
use crate::models::{
    Intent, IntentSnapshot, IntentStatus, PaymentIntent, PaymentIntentParams, SetupIntent,
    SetupIntentConfirmParams,
};
use crate::poller::StatusPoller;
use crate::providers::IntentApi;
use action::{ActionGuard, ActionSlot};

/// Coordinates authentication for payment and setup intents.
pub struct PaymentHandler {
    api: Arc<dyn IntentApi>,
    executor: ChallengeExecutor,
    config: RwLock<HandlerConfig>,
    active: ActionSlot,
}

/// How an action begins.
enum Entry {
    ConfirmPayment(PaymentIntentParams),
    ConfirmSetup(SetupIntentConfirmParams),
    Existing(Intent),
}

impl Entry {
    fn intent_id(&self) -> Option<String> {
        match self {
            Entry::ConfirmPayment(params) => params.client_secret.intent_id().map(str::to_string),
            Entry::ConfirmSetup(params) => params.client_secret.intent_id().map(str::to_string),
            Entry::Existing(intent) => Some(intent.id().to_string()),
        }
    }
}

impl PaymentHandler {
    pub fn new(
        api: Arc<dyn IntentApi>,
        protocol: Arc<dyn ChallengeProtocol>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            api,
            executor: ChallengeExecutor::new(protocol, Arc::new(ReturnUrlRouter::new())),
            config: RwLock::new(config),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the 3-D Secure settings. Actions already in flight keep the
    /// settings they started with.
    pub fn set_three_ds_customization(
        &self,
        settings: ThreeDsCustomizationSettings,
    ) -> Result<(), ConfigError> {
        settings.validate()?;
        self.config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .three_ds = settings;
        Ok(())
    }

    pub fn three_ds_customization(&self) -> ThreeDsCustomizationSettings {
        self.config_snapshot().three_ds
    }

    /// Forward an app-level return callback. Returns `true` if it completed
    /// the pending redirect challenge.
    pub fn handle_url_callback(&self, url: &Url) -> bool {
        self.executor.router().handle_url_callback(url)
    }

    pub fn return_url_router(&self) -> Arc<ReturnUrlRouter> {
        self.executor.router().clone()
    }

    pub fn current_action(&self) -> Option<ActionSnapshot> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Confirm a payment intent and handle any authentication it requires.
    pub fn confirm_payment(
        &self,
        params: PaymentIntentParams,
        context: Option<Arc<dyn AuthenticationContext>>,
    ) -> PendingAction<PaymentIntent> {
        self.start(Entry::ConfirmPayment(params), context)
    }

    /// Handle the next action of an already-confirmed payment intent.
    pub fn handle_next_action_for_payment(
        &self,
        intent: PaymentIntent,
        context: Option<Arc<dyn AuthenticationContext>>,
    ) -> PendingAction<PaymentIntent> {
        self.start(Entry::Existing(intent.into()), context)
    }

    /// Confirm a setup intent and handle any authentication it requires.
    pub fn confirm_setup_intent(
        &self,
        params: SetupIntentConfirmParams,
        context: Option<Arc<dyn AuthenticationContext>>,
    ) -> PendingAction<SetupIntent> {
        self.start(Entry::ConfirmSetup(params), context)
    }

    /// Handle the next action of an already-confirmed setup intent.
    pub fn handle_next_action_for_setup_intent(
        &self,
        intent: SetupIntent,
        context: Option<Arc<dyn AuthenticationContext>>,
    ) -> PendingAction<SetupIntent> {
        self.start(Entry::Existing(intent.into()), context)
    }

    fn config_snapshot(&self) -> HandlerConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn start<T: IntentSnapshot>(
        &self,
        entry: Entry,
        context: Option<Arc<dyn AuthenticationContext>>,
    ) -> PendingAction<T> {
        let Some(context) = context else {
            warn!(kind = %T::KIND, "action requested without an authentication context");
            return PendingAction::rejected(PaymentHandlerError::RequiresAuthenticationContext);
        };
        let Some((guard, pending)) = ActionGuard::<T>::begin(&self.active, entry.intent_id())
        else {
            return PendingAction::rejected(PaymentHandlerError::ConcurrentActionRejected);
        };

        let config = self.config_snapshot();
        let run = ActionRun {
            api: self.api.clone(),
            executor: self.executor.clone(),
            poller: StatusPoller::new(self.api.clone(), config.poll),
            context,
            config,
        };
        tokio::spawn(async move {
            let mut guard = guard;
            let outcome = run.drive(&mut guard, entry).await;
            guard.complete(outcome);
        });
        pending
    }
}

/// Everything one action needs, snapshotted at entry.
struct ActionRun {
    api: Arc<dyn IntentApi>,
    executor: ChallengeExecutor,
    poller: StatusPoller,
    context: Arc<dyn AuthenticationContext>,
    config: HandlerConfig,
}

impl ActionRun {
    async fn drive<T>(&self, action: &mut ActionGuard<T>, entry: Entry) -> ActionOutcome<Intent> {
        let (intent, return_url) = match entry {
            Entry::ConfirmPayment(mut params) => {
                action.transition(ActionState::Confirming);
                params.use_stripe_sdk = Some(true);
                if params.return_url.is_none() {
                    params.return_url = self.config.return_url.clone();
                }
                match self.api.confirm_payment_intent(&params).await {
                    Ok(intent) => (intent, params.return_url),
                    Err(error) => return ActionOutcome::failed(error.into()),
                }
            }
            Entry::ConfirmSetup(mut params) => {
                action.transition(ActionState::Confirming);
                params.use_stripe_sdk = Some(true);
                if params.return_url.is_none() {
                    params.return_url = self.config.return_url.clone();
                }
                match self.api.confirm_setup_intent(&params).await {
                    Ok(intent) => (intent, params.return_url),
                    Err(error) => return ActionOutcome::failed(error.into()),
                }
            }
            Entry::Existing(intent) => (intent, self.config.return_url.clone()),
        };

        action.record_intent(intent.id());
        action.transition(ActionState::Inspecting);
        let plan = match inspect(&intent, return_url.as_ref()) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                info!(
                    action_id = %action.id(),
                    intent_id = %intent.id(),
                    status = %intent.status(),
                    "no authentication required"
                );
                return ActionOutcome::Succeeded(intent);
            }
            Err(error) => {
                return ActionOutcome::Failed {
                    intent: Some(intent),
                    error,
                }
            }
        };

        action.transition(ActionState::Challenging);
        let settings = &self.config.three_ds;
        let deadline = deadline_after(settings.authentication_timeout);
        action.record_challenge_deadline(deadline);
        let challenge = self
            .executor
            .execute(action.id(), plan, self.context.as_ref(), settings, deadline)
            .await;
        match challenge {
            ChallengeOutcome::Completed => {}
            ChallengeOutcome::UserCanceled => return ActionOutcome::Canceled(Some(intent)),
            ChallengeOutcome::Failed(failure) => {
                return ActionOutcome::Failed {
                    intent: Some(intent),
                    error: failure.into(),
                }
            }
        }

        action.transition(ActionState::Polling);
        match self.poller.poll(intent.kind(), intent.client_secret()).await {
            Ok(refreshed) => settle(refreshed),
            Err(error) => ActionOutcome::Failed {
                intent: Some(intent),
                error,
            },
        }
    }
}

/// Decide what an intent needs. `Ok(None)` means nothing: it already succeeded.
fn inspect(
    intent: &Intent,
    return_url: Option<&Url>,
) -> Result<Option<ChallengePlan>, PaymentHandlerError> {
    let status = intent.status();
    if status.is_success_like() {
        return Ok(None);
    }
    match (status, intent.next_action()) {
        (IntentStatus::RequiresPaymentMethod, _) => Err(PaymentHandlerError::RequiresPaymentMethod),
        (IntentStatus::RequiresAction, Some(next_action)) => {
            debug!(
                intent_id = %intent.id(),
                action_type = next_action.action_type(),
                "resolving next action"
            );
            ChallengePlan::resolve(next_action, return_url).map(Some)
        }
        _ => Err(PaymentHandlerError::IntentStatusUnresolvable { status }),
    }
}

/// Map the re-fetched intent to the action's outcome.
fn settle(intent: Intent) -> ActionOutcome<Intent> {
    let status = intent.status();
    if status.is_success_like() {
        return ActionOutcome::Succeeded(intent);
    }
    let error = match status {
        // The challenge failed server-side and the payment method was detached.
        IntentStatus::RequiresPaymentMethod => PaymentHandlerError::NotAuthenticated,
        status => PaymentHandlerError::IntentStatusUnresolvable { status },
    };
    ActionOutcome::Failed {
        intent: Some(intent),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::challenge::{PresentedContent, ProtocolOutcome};
    use crate::config::PollPolicy;
    use crate::error::TimeoutStage;
    use crate::models::{NextAction, SdkAction};
    use crate::providers::ApiError;
    use crate::test_support::{
        client_secret, payment_intent, redirect_action, setup_client_secret, setup_intent,
        three_ds2_params, RecordingContext, ScriptedApi, ScriptedProtocol,
    };

    const RETURN_URL: &str = "myapp://payments/return";

    fn config() -> HandlerConfig {
        HandlerConfig {
            poll: PollPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(2),
                multiplier: 2,
                max_elapsed: Duration::from_secs(30),
            },
            ..HandlerConfig::default()
        }
    }

    fn handler(api: &Arc<ScriptedApi>) -> PaymentHandler {
        handler_with(api, ScriptedProtocol::frictionless())
    }

    fn handler_with(api: &Arc<ScriptedApi>, protocol: ScriptedProtocol) -> PaymentHandler {
        PaymentHandler::new(api.clone(), Arc::new(protocol), config())
    }

    fn host(context: &Arc<RecordingContext>) -> Option<Arc<dyn AuthenticationContext>> {
        let context: Arc<dyn AuthenticationContext> = context.clone();
        Some(context)
    }

    fn unwrap_payment(intent: Intent) -> PaymentIntent {
        intent.into_payment().unwrap()
    }

    /// Completes the pending redirect once one is registered.
    fn return_when_pending(router: Arc<ReturnUrlRouter>, after: Duration) -> tokio::task::JoinHandle<bool> {
        tokio::spawn(async move {
            while !router.has_pending() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(after).await;
            router.handle_url_callback(&Url::parse(RETURN_URL).unwrap())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_then_poll_succeeds() {
        let api = Arc::new(
            ScriptedApi::new()
                .with_confirm(Ok(payment_intent(
                    IntentStatus::RequiresAction,
                    Some(redirect_action(Some(RETURN_URL))),
                )))
                .with_retrieves(vec![Ok(payment_intent(IntentStatus::Succeeded, None))]),
        );
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());
        let returned = return_when_pending(handler.return_url_router(), Duration::from_secs(4));

        let outcome = handler
            .confirm_payment(PaymentIntentParams::new(client_secret()), host(&context))
            .await;

        assert!(returned.await.unwrap());
        assert_eq!(outcome.status(), ActionStatus::Succeeded);
        assert_eq!(
            outcome.intent().map(|pi| pi.status),
            Some(IntentStatus::Succeeded)
        );
        assert_eq!(api.retrieve_calls(), 1);
        assert_eq!(context.present_count(), 1);
        assert_eq!(context.dismiss_count(), 1);
        assert!(handler.current_action().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_polling_is_unresolvable() {
        let api = Arc::new(
            ScriptedApi::new()
                .with_confirm(Ok(payment_intent(
                    IntentStatus::RequiresAction,
                    Some(redirect_action(Some(RETURN_URL))),
                )))
                .with_retrieves(vec![Ok(payment_intent(IntentStatus::RequiresAction, None))]),
        );
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());
        let returned = return_when_pending(handler.return_url_router(), Duration::from_secs(1));

        let outcome = handler
            .confirm_payment(PaymentIntentParams::new(client_secret()), host(&context))
            .await;

        assert!(returned.await.unwrap());
        assert_eq!(
            outcome.error(),
            Some(&PaymentHandlerError::IntentStatusUnresolvable {
                status: IntentStatus::RequiresAction
            })
        );
        assert_eq!(api.retrieve_calls(), 3);
        assert!(outcome.intent().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn user_dismissal_cancels_without_polling() {
        let api = Arc::new(ScriptedApi::new().with_confirm(Ok(payment_intent(
            IntentStatus::RequiresAction,
            Some(redirect_action(Some(RETURN_URL))),
        ))));
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::dismissing_after(Duration::from_secs(2)));

        let outcome = handler
            .confirm_payment(PaymentIntentParams::new(client_secret()), host(&context))
            .await;

        assert_eq!(outcome.status(), ActionStatus::Canceled);
        assert_eq!(api.retrieve_calls(), 0);
        assert_eq!(context.dismiss_count(), 1);
        assert!(!handler.return_url_router().has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_call_is_rejected_and_first_unaffected() {
        let api = Arc::new(
            ScriptedApi::new()
                .with_confirm(Ok(payment_intent(IntentStatus::Succeeded, None)))
                .with_confirm_delay(Duration::from_secs(1)),
        );
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        let first = handler.confirm_payment(PaymentIntentParams::new(client_secret()), host(&context));
        assert!(first.action_id().is_some());
        assert_eq!(
            handler.current_action().map(|a| a.id),
            first.action_id()
        );

        let started = Instant::now();
        let second = handler.handle_next_action_for_payment(
            unwrap_payment(payment_intent(IntentStatus::Succeeded, None)),
            host(&context),
        );
        assert!(second.action_id().is_none());
        assert_eq!(
            second.await.error(),
            Some(&PaymentHandlerError::ConcurrentActionRejected)
        );
        assert_eq!(started.elapsed(), Duration::ZERO);

        let setup = handler.confirm_setup_intent(
            SetupIntentConfirmParams::new(setup_client_secret()),
            host(&context),
        );
        assert_eq!(
            setup.await.error(),
            Some(&PaymentHandlerError::ConcurrentActionRejected)
        );

        let first = first.await;
        assert_eq!(first.status(), ActionStatus::Succeeded);
        assert_eq!(api.confirm_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_like_status_skips_challenge() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        for status in [
            IntentStatus::Succeeded,
            IntentStatus::RequiresCapture,
            IntentStatus::RequiresConfirmation,
        ] {
            let outcome = handler
                .handle_next_action_for_payment(
                    unwrap_payment(payment_intent(status, Some(redirect_action(Some(RETURN_URL))))),
                    host(&context),
                )
                .await;
            assert_eq!(outcome.status(), ActionStatus::Succeeded);
            assert_eq!(outcome.intent().map(|pi| pi.status), Some(status));
        }
        assert_eq!(context.present_count(), 0);
        assert_eq!(context.prepare_count(), 0);
        assert_eq!(api.retrieve_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_handle_next_action_is_idempotent() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());
        let intent = unwrap_payment(payment_intent(IntentStatus::Succeeded, None));

        let first = handler
            .handle_next_action_for_payment(intent.clone(), host(&context))
            .await;
        let second = handler
            .handle_next_action_for_payment(intent.clone(), host(&context))
            .await;

        assert_eq!(first, ActionOutcome::Succeeded(intent.clone()));
        assert_eq!(second, ActionOutcome::Succeeded(intent));
        assert_eq!(api.confirm_calls() + api.retrieve_calls(), 0);
        assert_eq!(context.present_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognised_next_actions_are_unsupported() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        for next_action in [
            NextAction::Unknown {
                action_type: "wechat_pay_display_qr_code".into(),
            },
            NextAction::OxxoDisplayDetails {
                hosted_voucher_url: None,
            },
            NextAction::UseSdk(SdkAction::Unknown {
                sdk_type: "stripe_3ds2_challenge_v9".into(),
            }),
        ] {
            let outcome = handler
                .handle_next_action_for_payment(
                    unwrap_payment(payment_intent(IntentStatus::RequiresAction, Some(next_action))),
                    host(&context),
                )
                .await;
            assert_eq!(
                outcome.error().map(PaymentHandlerError::error_code),
                Some("unsupported_authentication")
            );
        }
        assert_eq!(context.present_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_without_any_return_url_is_unsupported() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        let outcome = handler
            .handle_next_action_for_payment(
                unwrap_payment(payment_intent(
                    IntentStatus::RequiresAction,
                    Some(redirect_action(None)),
                )),
                host(&context),
            )
            .await;

        assert_eq!(
            outcome.error().map(PaymentHandlerError::error_code),
            Some("unsupported_authentication")
        );
        assert_eq!(context.present_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_context_fails_without_an_action() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);

        let pending = handler.confirm_payment(PaymentIntentParams::new(client_secret()), None);
        assert!(pending.action_id().is_none());
        assert!(handler.current_action().is_none());
        assert_eq!(
            pending.await.error(),
            Some(&PaymentHandlerError::RequiresAuthenticationContext)
        );
        assert_eq!(api.confirm_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_failure_carries_the_api_cause() {
        let api = Arc::new(ScriptedApi::new().with_confirm(Err(ApiError::Status {
            status: 402,
            message: "Your card was declined.".into(),
        })));
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        let outcome = handler
            .confirm_payment(PaymentIntentParams::new(client_secret()), host(&context))
            .await;

        let error = outcome.error().unwrap();
        assert_eq!(error.domain(), crate::error::ErrorDomain::Api);
        assert!(matches!(
            error.api_cause(),
            Some(ApiError::Status { status: 402, .. })
        ));
        assert!(outcome.intent().is_none());
        assert!(handler.current_action().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_params_request_sdk_actions_and_default_return_url() {
        let api = Arc::new(
            ScriptedApi::new().with_confirm(Ok(payment_intent(IntentStatus::Succeeded, None))),
        );
        let handler = PaymentHandler::new(
            api.clone(),
            Arc::new(ScriptedProtocol::frictionless()),
            HandlerConfig {
                return_url: Some(Url::parse(RETURN_URL).unwrap()),
                ..config()
            },
        );
        let context = Arc::new(RecordingContext::new());

        handler
            .confirm_payment(PaymentIntentParams::new(client_secret()), host(&context))
            .await;

        let sent = api.last_payment_params().unwrap();
        assert_eq!(sent.use_stripe_sdk, Some(true));
        assert_eq!(sent.return_url.map(String::from), Some(RETURN_URL.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_deadline_is_monotonic_in_the_setting() {
        let short = ThreeDsCustomizationSettings::with_authentication_timeout(Duration::from_secs(300))
            .unwrap();
        let long = ThreeDsCustomizationSettings::with_authentication_timeout(Duration::from_secs(600))
            .unwrap();
        let stuck = || {
            unwrap_payment(payment_intent(
                IntentStatus::RequiresAction,
                Some(redirect_action(Some(RETURN_URL))),
            ))
        };

        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        handler.set_three_ds_customization(short).unwrap();
        let started = Instant::now();
        let outcome = handler
            .handle_next_action_for_payment(stuck(), host(&context))
            .await;
        assert_eq!(
            outcome.error(),
            Some(&PaymentHandlerError::TimedOut(TimeoutStage::Challenge))
        );
        assert_eq!(started.elapsed(), Duration::from_secs(300));
        assert_eq!(context.dismiss_count(), 1);

        handler.set_three_ds_customization(long).unwrap();
        let started = Instant::now();
        let pending = handler.handle_next_action_for_payment(stuck(), host(&context));
        tokio::time::sleep(Duration::from_secs(301)).await;
        let snapshot = handler.current_action().unwrap();
        assert_eq!(snapshot.state, ActionState::Challenging);
        assert_eq!(
            snapshot.challenge_deadline,
            Some(started + Duration::from_secs(600))
        );

        let outcome = pending.await;
        assert_eq!(
            outcome.error(),
            Some(&PaymentHandlerError::TimedOut(TimeoutStage::Challenge))
        );
        assert_eq!(started.elapsed(), Duration::from_secs(600));
        assert_eq!(context.dismiss_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_change_does_not_affect_running_action() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        let started = Instant::now();
        let pending = handler.handle_next_action_for_payment(
            unwrap_payment(payment_intent(
                IntentStatus::RequiresAction,
                Some(redirect_action(Some(RETURN_URL))),
            )),
            host(&context),
        );
        handler
            .set_three_ds_customization(
                ThreeDsCustomizationSettings::with_authentication_timeout(Duration::from_secs(900))
                    .unwrap(),
            )
            .unwrap();

        pending.await;
        assert_eq!(started.elapsed(), Duration::from_secs(300));
        assert_eq!(
            handler.three_ds_customization().authentication_timeout,
            Duration::from_secs(900)
        );
    }

    #[test]
    fn too_short_timeout_is_refused() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        let settings = ThreeDsCustomizationSettings {
            authentication_timeout: Duration::from_secs(30),
            ..ThreeDsCustomizationSettings::default()
        };
        assert!(handler.set_three_ds_customization(settings).is_err());
        assert_eq!(
            handler.three_ds_customization(),
            ThreeDsCustomizationSettings::default()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn setup_intent_3ds2_challenge_succeeds() {
        let api = Arc::new(
            ScriptedApi::new()
                .with_confirm(Ok(setup_intent(
                    IntentStatus::RequiresAction,
                    Some(NextAction::UseSdk(SdkAction::ThreeDs2Fingerprint(three_ds2_params()))),
                )))
                .with_retrieves(vec![Ok(setup_intent(IntentStatus::Succeeded, None))]),
        );
        let handler = handler_with(
            &api,
            ScriptedProtocol::challenging(ProtocolOutcome::Completed {
                transaction_status: "Y".into(),
            }),
        );
        let context = Arc::new(RecordingContext::new());

        let outcome = handler
            .confirm_setup_intent(SetupIntentConfirmParams::new(setup_client_secret()), host(&context))
            .await;

        assert_eq!(outcome.status(), ActionStatus::Succeeded);
        assert_eq!(
            outcome.intent().map(|si| si.id.as_str()),
            Some(crate::test_support::SETUP_INTENT_ID)
        );
        assert_eq!(api.last_setup_params().unwrap().use_stripe_sdk, Some(true));
        assert!(matches!(
            context.presented().as_slice(),
            [PresentedContent::Challenge { .. }]
        ));
        assert_eq!(context.will_dismiss_count(), 1);
        assert_eq!(context.dismiss_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_payment_method_after_challenge_is_not_authenticated() {
        let api = Arc::new(ScriptedApi::new().with_retrieves(vec![Ok(payment_intent(
            IntentStatus::RequiresPaymentMethod,
            None,
        ))]));
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        let outcome = handler
            .handle_next_action_for_payment(
                unwrap_payment(payment_intent(
                    IntentStatus::RequiresAction,
                    Some(NextAction::UseSdk(SdkAction::ThreeDs2Fingerprint(three_ds2_params()))),
                )),
                host(&context),
            )
            .await;

        assert_eq!(outcome.error(), Some(&PaymentHandlerError::NotAuthenticated));
        assert_eq!(
            outcome.intent().map(|pi| pi.status),
            Some(IntentStatus::RequiresPaymentMethod)
        );
        // Frictionless: nothing presented.
        assert_eq!(context.present_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_statuses_at_inspection() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        let outcome = handler
            .handle_next_action_for_payment(
                unwrap_payment(payment_intent(IntentStatus::RequiresPaymentMethod, None)),
                host(&context),
            )
            .await;
        assert_eq!(outcome.error(), Some(&PaymentHandlerError::RequiresPaymentMethod));

        for status in [
            IntentStatus::Processing,
            IntentStatus::Canceled,
            IntentStatus::RequiresAction,
        ] {
            let outcome = handler
                .handle_next_action_for_payment(
                    unwrap_payment(payment_intent(status, None)),
                    host(&context),
                )
                .await;
            assert_eq!(
                outcome.error(),
                Some(&PaymentHandlerError::IntentStatusUnresolvable { status })
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn current_action_reports_challenge_in_progress() {
        let api = Arc::new(
            ScriptedApi::new().with_retrieves(vec![Ok(payment_intent(IntentStatus::Succeeded, None))]),
        );
        let handler = handler(&api);
        let context = Arc::new(RecordingContext::new());

        let pending = handler.handle_next_action_for_payment(
            unwrap_payment(payment_intent(
                IntentStatus::RequiresAction,
                Some(redirect_action(Some(RETURN_URL))),
            )),
            host(&context),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = handler.current_action().unwrap();
        assert_eq!(Some(snapshot.id), pending.action_id());
        assert_eq!(snapshot.state, ActionState::Challenging);
        assert_eq!(
            snapshot.intent_id.as_deref(),
            Some(crate::test_support::PAYMENT_INTENT_ID)
        );

        let mismatched = Url::parse("myapp://payments/other").unwrap();
        assert!(!handler.handle_url_callback(&mismatched));
        assert!(handler.handle_url_callback(&Url::parse(RETURN_URL).unwrap()));

        assert_eq!(pending.await.status(), ActionStatus::Succeeded);
        assert!(handler.current_action().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_prepare_hook_still_delivers_and_frees_the_slot() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        let hanging = Arc::new(RecordingContext::hanging_on_prepare());

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            handler.handle_next_action_for_payment(
                unwrap_payment(payment_intent(
                    IntentStatus::RequiresAction,
                    Some(redirect_action(Some(RETURN_URL))),
                )),
                host(&hanging),
            ),
        )
        .await
        .expect("action resolves at its challenge deadline");

        assert_eq!(
            outcome.error(),
            Some(&PaymentHandlerError::TimedOut(TimeoutStage::Challenge))
        );
        assert!(started.elapsed() < Duration::from_secs(301));
        assert_eq!(hanging.present_count(), 0);
        assert_eq!(hanging.dismiss_count(), 0);
        assert!(handler.current_action().is_none());

        let context = Arc::new(RecordingContext::new());
        let next = handler
            .handle_next_action_for_payment(
                unwrap_payment(payment_intent(IntentStatus::Succeeded, None)),
                host(&context),
            )
            .await;
        assert_eq!(next.status(), ActionStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_authentication_timeout_runs_to_a_real_outcome() {
        let api = Arc::new(ScriptedApi::new());
        let handler = handler(&api);
        handler
            .set_three_ds_customization(
                ThreeDsCustomizationSettings::with_authentication_timeout(Duration::from_secs(
                    u64::MAX,
                ))
                .unwrap(),
            )
            .unwrap();
        let context = Arc::new(RecordingContext::dismissing_after(Duration::from_secs(2)));

        let outcome = handler
            .handle_next_action_for_payment(
                unwrap_payment(payment_intent(
                    IntentStatus::RequiresAction,
                    Some(redirect_action(Some(RETURN_URL))),
                )),
                host(&context),
            )
            .await;

        assert_eq!(outcome.status(), ActionStatus::Canceled);
        assert_eq!(context.dismiss_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn setup_intent_next_action_runs_3ds2_then_polls() {
        let api = Arc::new(ScriptedApi::new().with_retrieves(vec![
            Ok(setup_intent(IntentStatus::RequiresAction, None)),
            Ok(setup_intent(IntentStatus::Succeeded, None)),
        ]));
        let handler = handler_with(
            &api,
            ScriptedProtocol::challenging(ProtocolOutcome::Completed {
                transaction_status: "Y".into(),
            }),
        );
        let context = Arc::new(RecordingContext::new());
        let intent = setup_intent(
            IntentStatus::RequiresAction,
            Some(NextAction::UseSdk(SdkAction::ThreeDs2Fingerprint(three_ds2_params()))),
        )
        .into_setup()
        .unwrap();

        let outcome = handler
            .handle_next_action_for_setup_intent(intent, host(&context))
            .await;

        assert_eq!(outcome.status(), ActionStatus::Succeeded);
        assert_eq!(
            outcome.intent().map(|si| si.status),
            Some(IntentStatus::Succeeded)
        );
        assert_eq!(api.confirm_calls(), 0);
        assert_eq!(api.retrieve_calls(), 2);
        assert!(matches!(
            context.presented().as_slice(),
            [PresentedContent::Challenge { .. }]
        ));
        assert_eq!(context.dismiss_count(), 1);
    }
}
