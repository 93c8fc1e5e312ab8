// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Intent snapshots, next-action descriptors and confirmation parameters.
//!
//! Only the fields the payment handler inspects are modelled. Snapshots are
//! read-only views parsed from payment API responses.

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::providers::ApiError;

/// Which kind of intent an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Payment,
    Setup,
}

impl IntentKind {
    /// API path segment for this intent kind.
    pub fn resource_path(&self) -> &'static str {
        match self {
            IntentKind::Payment => "payment_intents",
            IntentKind::Setup => "setup_intents",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            IntentKind::Payment => "pi_",
            IntentKind::Setup => "seti_",
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentKind::Payment => write!(f, "payment_intent"),
            IntentKind::Setup => write!(f, "setup_intent"),
        }
    }
}

/// Intent lifecycle status as reported by the payment API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
    Unknown,
}

impl IntentStatus {
    /// Map a raw API status string. Unrecognised values become `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "requires_payment_method" | "requires_source" => IntentStatus::RequiresPaymentMethod,
            "requires_confirmation" => IntentStatus::RequiresConfirmation,
            "requires_action" | "requires_source_action" => IntentStatus::RequiresAction,
            "processing" => IntentStatus::Processing,
            "requires_capture" => IntentStatus::RequiresCapture,
            "succeeded" => IntentStatus::Succeeded,
            "canceled" | "cancelled" => IntentStatus::Canceled,
            _ => IntentStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::Processing => "processing",
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Unknown => "unknown",
        }
    }

    /// Statuses reported to callers as a successful action. The caller still
    /// captures or confirms server-side for the latter two.
    pub fn is_success_like(&self) -> bool {
        matches!(
            self,
            IntentStatus::Succeeded | IntentStatus::RequiresCapture | IntentStatus::RequiresConfirmation
        )
    }

    /// Statuses the poller keeps waiting on after a challenge.
    pub fn is_pending_authentication(&self) -> bool {
        matches!(self, IntentStatus::RequiresAction | IntentStatus::Processing)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque intent client secret (`<intent id>_secret_<token>`).
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret(String);

impl ClientSecret {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Intent id embedded in the secret, or `None` when the secret is malformed.
    pub fn intent_id(&self) -> Option<&str> {
        let (id, token) = self.0.split_once("_secret_")?;
        if id.is_empty() || token.is_empty() {
            return None;
        }
        Some(id)
    }

    /// Validate that this secret belongs to an intent of `kind`.
    pub fn validate_for(&self, kind: IntentKind) -> Result<&str, ApiError> {
        let id = self.intent_id().ok_or_else(|| {
            ApiError::InvalidCredential("client secret is not of the form <id>_secret_<token>".into())
        })?;
        if !id.starts_with(kind.id_prefix()) {
            return Err(ApiError::InvalidCredential(format!(
                "client secret does not belong to a {kind}"
            )));
        }
        Ok(id)
    }
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.intent_id() {
            Some(id) => write!(f, "ClientSecret({id}_secret_***)"),
            None => write!(f, "ClientSecret(***)"),
        }
    }
}

/// Parameters for a 3-D Secure 2 fingerprint/challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeDs2Params {
    /// Source backing the authentication (`three_d_secure_2_source`).
    pub source_id: String,
    pub directory_server_name: String,
    pub server_transaction_id: String,
    pub directory_server_id: Option<String>,
    pub directory_server_certificate: Option<String>,
    pub root_certificate_authorities: Vec<String>,
    pub directory_server_key_id: Option<String>,
}

/// Challenge descriptors carried by a `use_stripe_sdk` next action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkAction {
    /// 3-D Secure 1, completed in a browser surface.
    ThreeDsRedirect { url: Url },
    /// 3-D Secure 2, completed through the challenge protocol.
    ThreeDs2Fingerprint(ThreeDs2Params),
    Unknown { sdk_type: String },
}

/// Server-declared authentication step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    RedirectToUrl { url: Url, return_url: Option<Url> },
    UseSdk(SdkAction),
    /// Out-of-band voucher display. Recognised but not handled in-SDK.
    OxxoDisplayDetails { hosted_voucher_url: Option<Url> },
    Unknown { action_type: String },
}

impl NextAction {
    /// Parse a `next_action` object. Unknown discriminators are kept as
    /// `Unknown`; known ones with missing or malformed fields are errors.
    pub fn from_json(value: &Value) -> Result<Self, ApiError> {
        let action_type = value.get("type").and_then(Value::as_str).ok_or_else(|| {
            ApiError::InvalidResponse("next_action is missing its type".to_string())
        })?;

        match action_type {
            "redirect_to_url" => {
                let url = required_url(value, "/redirect_to_url/url")?;
                let return_url = optional_url(value, "/redirect_to_url/return_url")?;
                Ok(NextAction::RedirectToUrl { url, return_url })
            }
            "use_stripe_sdk" => {
                let sdk = value.get("use_stripe_sdk").ok_or_else(|| {
                    ApiError::InvalidResponse("use_stripe_sdk payload missing".to_string())
                })?;
                Ok(NextAction::UseSdk(parse_sdk_action(sdk)?))
            }
            "oxxo_display_details" => Ok(NextAction::OxxoDisplayDetails {
                hosted_voucher_url: optional_url(value, "/oxxo_display_details/hosted_voucher_url")?,
            }),
            other => Ok(NextAction::Unknown {
                action_type: other.to_string(),
            }),
        }
    }

    /// Wire discriminator, used in logs and unsupported-authentication errors.
    pub fn action_type(&self) -> &str {
        match self {
            NextAction::RedirectToUrl { .. } => "redirect_to_url",
            NextAction::UseSdk(SdkAction::ThreeDsRedirect { .. }) => "three_d_secure_redirect",
            NextAction::UseSdk(SdkAction::ThreeDs2Fingerprint(_)) => "stripe_3ds2_fingerprint",
            NextAction::UseSdk(SdkAction::Unknown { sdk_type }) => sdk_type,
            NextAction::OxxoDisplayDetails { .. } => "oxxo_display_details",
            NextAction::Unknown { action_type } => action_type,
        }
    }
}

fn parse_sdk_action(sdk: &Value) -> Result<SdkAction, ApiError> {
    let sdk_type = sdk
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::InvalidResponse("use_stripe_sdk is missing its type".into()))?;

    match sdk_type {
        "three_d_secure_redirect" => Ok(SdkAction::ThreeDsRedirect {
            url: required_url(sdk, "/stripe_js")?,
        }),
        "stripe_3ds2_fingerprint" => {
            let params = ThreeDs2Params {
                source_id: required_str(sdk, "/three_d_secure_2_source")?,
                directory_server_name: required_str(sdk, "/directory_server_name")?,
                server_transaction_id: required_str(sdk, "/server_transaction_id")?,
                directory_server_id: optional_str(
                    sdk,
                    "/directory_server_encryption/directory_server_id",
                ),
                directory_server_certificate: optional_str(
                    sdk,
                    "/directory_server_encryption/certificate",
                ),
                root_certificate_authorities: sdk
                    .pointer("/directory_server_encryption/root_certificate_authorities")
                    .and_then(Value::as_array)
                    .map(|certs| {
                        certs
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                directory_server_key_id: optional_str(sdk, "/directory_server_encryption/key_id"),
            };
            Ok(SdkAction::ThreeDs2Fingerprint(params))
        }
        other => Ok(SdkAction::Unknown {
            sdk_type: other.to_string(),
        }),
    }
}

fn optional_str(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required_str(value: &Value, pointer: &str) -> Result<String, ApiError> {
    optional_str(value, pointer)
        .ok_or_else(|| ApiError::InvalidResponse(format!("missing field {pointer}")))
}

fn optional_url(value: &Value, pointer: &str) -> Result<Option<Url>, ApiError> {
    optional_str(value, pointer)
        .map(|raw| {
            Url::parse(&raw)
                .map_err(|e| ApiError::InvalidResponse(format!("invalid url at {pointer}: {e}")))
        })
        .transpose()
}

fn required_url(value: &Value, pointer: &str) -> Result<Url, ApiError> {
    optional_url(value, pointer)?
        .ok_or_else(|| ApiError::InvalidResponse(format!("missing field {pointer}")))
}

/// Read-only snapshot of a payment intent.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: ClientSecret,
    pub status: IntentStatus,
    pub next_action: Option<NextAction>,
    pub payment_method_id: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    /// Message from `last_payment_error`, if the API reported one.
    pub last_error_message: Option<String>,
}

/// Read-only snapshot of a setup intent.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupIntent {
    pub id: String,
    pub client_secret: ClientSecret,
    pub status: IntentStatus,
    pub next_action: Option<NextAction>,
    pub payment_method_id: Option<String>,
    pub usage: Option<String>,
    /// Message from `last_setup_error`, if the API reported one.
    pub last_error_message: Option<String>,
}

/// A payment or setup intent snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Payment(PaymentIntent),
    Setup(SetupIntent),
}

impl Intent {
    /// Parse an intent object returned by the payment API.
    pub fn from_json(kind: IntentKind, value: &Value) -> Result<Self, ApiError> {
        let id = required_str(value, "/id")?;
        let client_secret = optional_str(value, "/client_secret")
            .map(ClientSecret::new)
            .ok_or_else(|| ApiError::InvalidResponse(format!("{kind} {id} has no client_secret")))?;
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .map(IntentStatus::parse)
            .ok_or_else(|| ApiError::InvalidResponse(format!("{kind} {id} has no status")))?;
        let next_action = match value.get("next_action") {
            Some(Value::Null) | None => None,
            Some(action) => Some(NextAction::from_json(action)?),
        };
        // `payment_method` is either an id or an expanded object.
        let payment_method_id = optional_str(value, "/payment_method")
            .or_else(|| optional_str(value, "/payment_method/id"));

        match kind {
            IntentKind::Payment => Ok(Intent::Payment(PaymentIntent {
                id,
                client_secret,
                status,
                next_action,
                payment_method_id,
                amount: value.get("amount").and_then(Value::as_i64),
                currency: optional_str(value, "/currency"),
                last_error_message: optional_str(value, "/last_payment_error/message"),
            })),
            IntentKind::Setup => Ok(Intent::Setup(SetupIntent {
                id,
                client_secret,
                status,
                next_action,
                payment_method_id,
                usage: optional_str(value, "/usage"),
                last_error_message: optional_str(value, "/last_setup_error/message"),
            })),
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Payment(_) => IntentKind::Payment,
            Intent::Setup(_) => IntentKind::Setup,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Intent::Payment(pi) => &pi.id,
            Intent::Setup(si) => &si.id,
        }
    }

    pub fn client_secret(&self) -> &ClientSecret {
        match self {
            Intent::Payment(pi) => &pi.client_secret,
            Intent::Setup(si) => &si.client_secret,
        }
    }

    pub fn status(&self) -> IntentStatus {
        match self {
            Intent::Payment(pi) => pi.status,
            Intent::Setup(si) => si.status,
        }
    }

    pub fn next_action(&self) -> Option<&NextAction> {
        match self {
            Intent::Payment(pi) => pi.next_action.as_ref(),
            Intent::Setup(si) => si.next_action.as_ref(),
        }
    }

    pub fn payment_method_id(&self) -> Option<&str> {
        match self {
            Intent::Payment(pi) => pi.payment_method_id.as_deref(),
            Intent::Setup(si) => si.payment_method_id.as_deref(),
        }
    }

    pub fn into_payment(self) -> Option<PaymentIntent> {
        match self {
            Intent::Payment(pi) => Some(pi),
            Intent::Setup(_) => None,
        }
    }

    pub fn into_setup(self) -> Option<SetupIntent> {
        match self {
            Intent::Setup(si) => Some(si),
            Intent::Payment(_) => None,
        }
    }
}

impl From<PaymentIntent> for Intent {
    fn from(value: PaymentIntent) -> Self {
        Intent::Payment(value)
    }
}

impl From<SetupIntent> for Intent {
    fn from(value: SetupIntent) -> Self {
        Intent::Setup(value)
    }
}

/// A concrete intent type an action can resolve to.
pub trait IntentSnapshot: Sized + Send + 'static {
    const KIND: IntentKind;

    /// `None` when `intent` is of the other kind.
    fn from_intent(intent: Intent) -> Option<Self>;
}

impl IntentSnapshot for PaymentIntent {
    const KIND: IntentKind = IntentKind::Payment;

    fn from_intent(intent: Intent) -> Option<Self> {
        intent.into_payment()
    }
}

impl IntentSnapshot for SetupIntent {
    const KIND: IntentKind = IntentKind::Setup;

    fn from_intent(intent: Intent) -> Option<Self> {
        intent.into_setup()
    }
}

/// Parameters for confirming a payment intent.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentParams {
    pub client_secret: ClientSecret,
    /// Payment method to attach while confirming.
    pub payment_method_id: Option<String>,
    /// Where a redirect-based authentication returns to.
    pub return_url: Option<Url>,
    /// Save the payment method to the intent's customer.
    pub save_payment_method: Option<bool>,
    /// Ask the API to describe challenges as `use_stripe_sdk` next actions.
    pub use_stripe_sdk: Option<bool>,
}

impl PaymentIntentParams {
    pub fn new(client_secret: ClientSecret) -> Self {
        Self {
            client_secret,
            payment_method_id: None,
            return_url: None,
            save_payment_method: None,
            use_stripe_sdk: None,
        }
    }

    /// Form-encoded body for the confirm request.
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![(
            "client_secret".to_string(),
            self.client_secret.expose().to_string(),
        )];
        if let Some(pm) = &self.payment_method_id {
            form.push(("payment_method".to_string(), pm.clone()));
        }
        if let Some(url) = &self.return_url {
            form.push(("return_url".to_string(), url.to_string()));
        }
        if let Some(save) = self.save_payment_method {
            form.push(("save_payment_method".to_string(), save.to_string()));
        }
        if let Some(sdk) = self.use_stripe_sdk {
            form.push(("use_stripe_sdk".to_string(), sdk.to_string()));
        }
        form
    }
}

/// Parameters for confirming a setup intent.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupIntentConfirmParams {
    pub client_secret: ClientSecret,
    pub payment_method_id: Option<String>,
    pub return_url: Option<Url>,
    pub use_stripe_sdk: Option<bool>,
}

impl SetupIntentConfirmParams {
    pub fn new(client_secret: ClientSecret) -> Self {
        Self {
            client_secret,
            payment_method_id: None,
            return_url: None,
            use_stripe_sdk: None,
        }
    }

    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![(
            "client_secret".to_string(),
            self.client_secret.expose().to_string(),
        )];
        if let Some(pm) = &self.payment_method_id {
            form.push(("payment_method".to_string(), pm.clone()));
        }
        if let Some(url) = &self.return_url {
            form.push(("return_url".to_string(), url.to_string()));
        }
        if let Some(sdk) = self.use_stripe_sdk {
            form.push(("use_stripe_sdk".to_string(), sdk.to_string()));
        }
        form
    }
}
