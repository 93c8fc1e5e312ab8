// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Payment Handler - Intent Confirmation & Authentication
//!
//! Confirms payment and setup intents, runs whatever authentication the
//! payment API declares as the next action (browser redirect or in-app
//! 3-D Secure 2 challenge), re-syncs the intent status and reports exactly
//! one terminal outcome per action.
//!
//! ## Modules
//!
//! - `handler` - Action coordinator and its single-flight lifecycle
//! - `challenge` - Challenge executor, authentication context, 3DS2 protocol seam
//! - `poller` - Post-challenge status polling with bounded backoff
//! - `providers` - Payment API trait and HTTP client
//! - `api` - Return-callback HTTP routes (Axum)
//! - `config` - Settings and environment variables
//! - `logging` - `tracing` subscriber setup

pub mod api;
pub mod challenge;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod models;
pub mod poller;
pub mod providers;
pub mod state;

#[cfg(test)]
mod test_support;

pub use error::{PaymentHandlerError, ERROR_DOMAIN};
pub use handler::{ActionOutcome, ActionStatus, PaymentHandler, PendingAction};
