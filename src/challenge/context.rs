// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Host-provided presentation surface.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::UiCustomization;

/// Where the host should put challenge UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PresentationSurface {
    /// The host's frontmost surface.
    #[default]
    Default,
    /// A surface the host identifies by name (window, scene, tab).
    Named(String),
}

/// What the handler asks the host to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentedContent {
    /// A browser pointed at `url`. Completion arrives as a callback to `return_url`.
    Browser { url: Url, return_url: Url },
    /// Container for an in-app challenge rendered by the challenge protocol.
    Challenge {
        transaction_id: String,
        ui: UiCustomization,
    },
}

/// Handle the host uses to report that the user closed the presented surface.
///
/// Distinct from the redirect return callback: a dismissal cancels the
/// challenge, a return completes it.
#[derive(Debug, Clone, Default)]
pub struct DismissalSignal {
    token: CancellationToken,
}

impl DismissalSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_dismissed(&self) {
        self.token.cancel();
    }

    pub fn is_dismissed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn dismissed(&self) {
        self.token.cancelled().await;
    }
}

#[derive(Debug, Clone)]
pub struct Presentation {
    pub surface: PresentationSurface,
    pub content: PresentedContent,
    pub dismissal: DismissalSignal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not present authentication UI: {0}")]
pub struct PresentationError(pub String);

/// Capability to present and dismiss authentication UI.
///
/// The handler presents at most once per challenge and calls
/// [`dismiss`](Self::dismiss) exactly once for every successful
/// [`present`](Self::present), on every exit path.
#[async_trait]
pub trait AuthenticationContext: Send + Sync {
    fn presentation_surface(&self) -> PresentationSurface {
        PresentationSurface::Default
    }

    /// Awaited before anything is presented.
    async fn prepare_for_presentation(&self) {}

    async fn present(&self, presentation: Presentation) -> Result<(), PresentationError>;

    /// Called right before [`dismiss`](Self::dismiss).
    fn will_dismiss(&self) {}

    async fn dismiss(&self);
}
