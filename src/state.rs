// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use url::Url;

use crate::handler::PaymentHandler;

/// Shared state for the return-callback router.
#[derive(Clone)]
pub struct ReturnState {
    pub handler: Arc<PaymentHandler>,
    /// Externally visible origin the browser returns to, e.g.
    /// `https://shop.example.com`. Callback URLs are rebuilt against it
    /// before matching.
    pub public_base_url: Url,
}

impl ReturnState {
    pub fn new(handler: Arc<PaymentHandler>, public_base_url: Url) -> Self {
        Self {
            handler,
            public_base_url,
        }
    }
}
