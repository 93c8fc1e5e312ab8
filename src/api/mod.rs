// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP surface for hosts whose redirect return lands on a web server.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::ReturnState;

pub mod health;
pub mod payment_return;

pub fn router(state: ReturnState) -> Router {
    let v1_routes = Router::new()
        .route(
            "/payment-handler/return",
            get(payment_return::handle_return),
        )
        .route(
            "/payment-handler/action",
            get(payment_return::current_action),
        )
        .with_state(state);

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", v1_routes)
        .layer(TraceLayer::new_for_http())
}
