// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Handler settings, their environment variable names and defaults. Hosts
//! either build a [`HandlerConfig`] directly or load one with
//! [`HandlerConfig::from_env`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `PAYMENT_HANDLER_AUTH_TIMEOUT_SECS` | Challenge wall-clock deadline | `300` |
//! | `PAYMENT_HANDLER_POLL_MAX_ATTEMPTS` | Status poll attempt ceiling | `5` |
//! | `PAYMENT_HANDLER_POLL_INITIAL_DELAY_MS` | First poll backoff delay | `500` |
//! | `PAYMENT_HANDLER_POLL_MAX_DELAY_MS` | Cap on a single backoff delay | `8000` |
//! | `PAYMENT_HANDLER_POLL_MAX_ELAPSED_SECS` | Total polling time ceiling | `30` |
//! | `PAYMENT_HANDLER_RETURN_URL` | Fallback return URL for redirects | unset |
//! | `PAYMENT_API_BASE_URL` | Payment API base URL | `https://api.stripe.com` |
//! | `PAYMENT_API_PUBLISHABLE_KEY` | Payment API publishable key | Required for the HTTP client |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::time::Duration;

use tokio::time::Instant;
use url::Url;

pub const AUTH_TIMEOUT_SECS_ENV: &str = "PAYMENT_HANDLER_AUTH_TIMEOUT_SECS";
pub const POLL_MAX_ATTEMPTS_ENV: &str = "PAYMENT_HANDLER_POLL_MAX_ATTEMPTS";
pub const POLL_INITIAL_DELAY_MS_ENV: &str = "PAYMENT_HANDLER_POLL_INITIAL_DELAY_MS";
pub const POLL_MAX_DELAY_MS_ENV: &str = "PAYMENT_HANDLER_POLL_MAX_DELAY_MS";
pub const POLL_MAX_ELAPSED_SECS_ENV: &str = "PAYMENT_HANDLER_POLL_MAX_ELAPSED_SECS";
pub const RETURN_URL_ENV: &str = "PAYMENT_HANDLER_RETURN_URL";
pub const PAYMENT_API_BASE_URL_ENV: &str = "PAYMENT_API_BASE_URL";
pub const PAYMENT_API_PUBLISHABLE_KEY_ENV: &str = "PAYMENT_API_PUBLISHABLE_KEY";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Shortest challenge deadline accepted. 3-D Secure 2 requires at least five minutes.
pub const MIN_AUTHENTICATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_POLL_INITIAL_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_POLL_MAX_DELAY: Duration = Duration::from_secs(8);
const DEFAULT_POLL_MAX_ELAPSED: Duration = Duration::from_secs(30);
const DEFAULT_POLL_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    Missing(String),

    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),

    #[error("authentication timeout {0:?} is shorter than the five minute minimum")]
    AuthenticationTimeoutTooShort(Duration),

    #[error("poll policy must allow at least one attempt")]
    ZeroPollAttempts,
}

/// Visual parameters handed to the challenge protocol's UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UiCustomization {
    /// Hex colour (`#RRGGBB`) for the challenge screen background.
    pub background_color: Option<String>,
    pub accent_color: Option<String>,
    pub text_color: Option<String>,
    pub button_corner_radius: Option<u16>,
    /// Percentage applied to the platform's default font size.
    pub font_scale_percent: Option<u16>,
    pub header_text: Option<String>,
    pub cancel_button_text: Option<String>,
}

/// 3-D Secure challenge settings. Configure before the first action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeDsCustomizationSettings {
    /// Wall-clock deadline for a challenge, measured from challenge start.
    pub authentication_timeout: Duration,
    pub ui: UiCustomization,
}

impl Default for ThreeDsCustomizationSettings {
    fn default() -> Self {
        Self {
            authentication_timeout: MIN_AUTHENTICATION_TIMEOUT,
            ui: UiCustomization::default(),
        }
    }
}

impl ThreeDsCustomizationSettings {
    pub fn with_authentication_timeout(timeout: Duration) -> Result<Self, ConfigError> {
        let settings = Self {
            authentication_timeout: timeout,
            ..Self::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.authentication_timeout < MIN_AUTHENTICATION_TIMEOUT {
            return Err(ConfigError::AuthenticationTimeoutTooShort(
                self.authentication_timeout,
            ));
        }
        Ok(())
    }
}

/// Bounded exponential backoff for post-challenge status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    pub max_elapsed: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            initial_delay: DEFAULT_POLL_INITIAL_DELAY,
            max_delay: DEFAULT_POLL_MAX_DELAY,
            multiplier: DEFAULT_POLL_MULTIPLIER,
            max_elapsed: DEFAULT_POLL_MAX_ELAPSED,
        }
    }
}

impl PollPolicy {
    /// Delay before the attempt following `completed_attempts` (1-based count
    /// of attempts already made).
    pub fn delay_after(&self, completed_attempts: u32) -> Duration {
        let exponent = completed_attempts.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroPollAttempts);
        }
        Ok(())
    }
}

/// Everything a [`PaymentHandler`](crate::handler::PaymentHandler) is configured with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandlerConfig {
    pub three_ds: ThreeDsCustomizationSettings,
    pub poll: PollPolicy,
    /// Used for redirects whose params and next action carry no return URL.
    pub return_url: Option<Url>,
}

impl HandlerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_optional)
    }

    /// Build from any variable source; `lookup` returns trimmed, non-empty values.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse = |name: &str| parse_var::<u64>(name, lookup(name));
        let defaults = PollPolicy::default();
        let poll = PollPolicy {
            max_attempts: parse_var(POLL_MAX_ATTEMPTS_ENV, lookup(POLL_MAX_ATTEMPTS_ENV))?
                .unwrap_or(defaults.max_attempts),
            initial_delay: parse(POLL_INITIAL_DELAY_MS_ENV)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: parse(POLL_MAX_DELAY_MS_ENV)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            multiplier: defaults.multiplier,
            max_elapsed: parse(POLL_MAX_ELAPSED_SECS_ENV)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_elapsed),
        };

        let three_ds = ThreeDsCustomizationSettings {
            authentication_timeout: parse(AUTH_TIMEOUT_SECS_ENV)?
                .map(Duration::from_secs)
                .unwrap_or(MIN_AUTHENTICATION_TIMEOUT),
            ui: UiCustomization::default(),
        };

        let return_url = lookup(RETURN_URL_ENV)
            .map(|raw| {
                Url::parse(&raw)
                    .map_err(|e| ConfigError::Invalid(RETURN_URL_ENV.to_string(), e.to_string()))
            })
            .transpose()?;

        let config = Self {
            three_ds,
            poll,
            return_url,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.three_ds.validate()?;
        self.poll.validate()
    }
}

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating at a far-future instant instead of overflowing.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.map(|raw| {
        raw.parse::<T>()
            .map_err(|e| ConfigError::Invalid(name.to_string(), e.to_string()))
    })
    .transpose()
}
