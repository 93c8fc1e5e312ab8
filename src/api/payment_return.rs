// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{OriginalUri, State},
    http::StatusCode,
    Json,
};
use tracing::{debug, warn};

use crate::handler::ActionSnapshot;
use crate::state::ReturnState;

/// Redirect return callback.
///
/// Returns 200 when the URL completed the pending redirect challenge and
/// 404 when nothing was waiting for it.
pub async fn handle_return(
    State(state): State<ReturnState>,
    OriginalUri(uri): OriginalUri,
) -> StatusCode {
    let mut url = match state.public_base_url.join(uri.path()) {
        Ok(url) => url,
        Err(e) => {
            warn!(path = uri.path(), error = %e, "could not rebuild return url");
            return StatusCode::BAD_REQUEST;
        }
    };
    url.set_query(uri.query());

    if state.handler.handle_url_callback(&url) {
        StatusCode::OK
    } else {
        debug!(path = uri.path(), "return callback matched no pending challenge");
        StatusCode::NOT_FOUND
    }
}

/// The in-flight action, if any.
pub async fn current_action(
    State(state): State<ReturnState>,
) -> Result<Json<ActionSnapshot>, StatusCode> {
    state
        .handler
        .current_action()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
