// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The in-flight action: lifecycle state, snapshot and outcome delivery.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PaymentHandlerError;
use crate::models::{Intent, IntentKind, IntentSnapshot};
use crate::providers::ApiError;

/// Action lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Accepted by an entry point, nothing sent yet.
    Created,
    /// Waiting for the confirm request.
    Confirming,
    /// Deciding what the intent's status and next action require.
    Inspecting,
    /// A challenge is presented or running.
    Challenging,
    /// Re-fetching the intent after a completed challenge.
    Polling,
    Succeeded,
    Canceled,
    Failed,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Succeeded | ActionState::Canceled | ActionState::Failed
        )
    }

    /// Whether `next` is an allowed transition out of this state.
    pub fn can_transition_to(&self, next: ActionState) -> bool {
        use ActionState::*;
        matches!(
            (self, next),
            (Created, Confirming)
                | (Created, Inspecting)
                | (Confirming, Inspecting)
                | (Confirming, Failed)
                | (Inspecting, Succeeded)
                | (Inspecting, Challenging)
                | (Inspecting, Failed)
                | (Challenging, Polling)
                | (Challenging, Canceled)
                | (Challenging, Failed)
                | (Polling, Succeeded)
                | (Polling, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Created => "created",
            ActionState::Confirming => "confirming",
            ActionState::Inspecting => "inspecting",
            ActionState::Challenging => "challenging",
            ActionState::Polling => "polling",
            ActionState::Succeeded => "succeeded",
            ActionState::Canceled => "canceled",
            ActionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the in-flight action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSnapshot {
    /// Unique action identifier.
    pub id: Uuid,
    /// Intent kind the action targets.
    pub kind: IntentKind,
    /// Known once an intent snapshot is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    pub state: ActionState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Challenge deadline, fixed when the action enters `Challenging`.
    #[serde(skip)]
    pub challenge_deadline: Option<Instant>,
}

/// Terminal status reported with every outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Canceled,
    Failed,
}

/// Terminal result of an action, delivered exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome<I> {
    /// The intent's status is `succeeded`, `requires_capture` or
    /// `requires_confirmation`. Capture and server-side confirmation are
    /// left to the caller.
    Succeeded(I),
    /// The user dismissed the challenge.
    Canceled(Option<I>),
    Failed {
        intent: Option<I>,
        error: PaymentHandlerError,
    },
}

impl<I> ActionOutcome<I> {
    pub(crate) fn failed(error: PaymentHandlerError) -> Self {
        ActionOutcome::Failed {
            intent: None,
            error,
        }
    }

    pub fn status(&self) -> ActionStatus {
        match self {
            ActionOutcome::Succeeded(_) => ActionStatus::Succeeded,
            ActionOutcome::Canceled(_) => ActionStatus::Canceled,
            ActionOutcome::Failed { .. } => ActionStatus::Failed,
        }
    }

    pub fn intent(&self) -> Option<&I> {
        match self {
            ActionOutcome::Succeeded(intent) => Some(intent),
            ActionOutcome::Canceled(intent) | ActionOutcome::Failed { intent, .. } => {
                intent.as_ref()
            }
        }
    }

    pub fn error(&self) -> Option<&PaymentHandlerError> {
        match self {
            ActionOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    fn terminal_state(&self) -> ActionState {
        match self.status() {
            ActionStatus::Succeeded => ActionState::Succeeded,
            ActionStatus::Canceled => ActionState::Canceled,
            ActionStatus::Failed => ActionState::Failed,
        }
    }
}

impl ActionOutcome<Intent> {
    /// Narrow to the concrete intent type the entry point promised.
    fn narrow<T: IntentSnapshot>(self) -> ActionOutcome<T> {
        match self {
            ActionOutcome::Succeeded(intent) => match T::from_intent(intent) {
                Some(intent) => ActionOutcome::Succeeded(intent),
                None => ActionOutcome::failed(
                    ApiError::InvalidResponse(format!("expected a {}", T::KIND)).into(),
                ),
            },
            ActionOutcome::Canceled(intent) => ActionOutcome::Canceled(intent.and_then(T::from_intent)),
            ActionOutcome::Failed { intent, error } => ActionOutcome::Failed {
                intent: intent.and_then(T::from_intent),
                error,
            },
        }
    }
}

/// Outcome of an action started by an entry point.
///
/// Resolves exactly once. Rejected calls resolve immediately.
#[must_use = "the action runs regardless, but its outcome is only observable by awaiting"]
pub struct PendingAction<T> {
    action_id: Option<Uuid>,
    receiver: oneshot::Receiver<ActionOutcome<T>>,
}

impl<T> PendingAction<T> {
    /// Already-resolved failure; no action was created.
    pub(crate) fn rejected(error: PaymentHandlerError) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(ActionOutcome::failed(error));
        Self {
            action_id: None,
            receiver,
        }
    }

    /// `None` when the call was rejected before an action was created.
    pub fn action_id(&self) -> Option<Uuid> {
        self.action_id
    }
}

impl<T> Future for PendingAction<T> {
    type Output = ActionOutcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                ActionOutcome::failed(PaymentHandlerError::ChallengeProtocol(
                    ABANDONED_MESSAGE.to_string(),
                ))
            })
        })
    }
}

const ABANDONED_MESSAGE: &str = "action ended without reaching a terminal state";

pub(crate) type ActionSlot = Arc<Mutex<Option<ActionSnapshot>>>;

/// Owns the single-flight slot for one action and delivers its outcome.
///
/// The slot is cleared before the outcome is sent. If the guard is dropped
/// without [`complete`](Self::complete), the slot is still cleared and a
/// failure is delivered.
pub(crate) struct ActionGuard<T> {
    slot: ActionSlot,
    id: Uuid,
    kind: IntentKind,
    state: ActionState,
    sender: Option<oneshot::Sender<ActionOutcome<T>>>,
    _intent: PhantomData<fn() -> T>,
}

impl<T: IntentSnapshot> ActionGuard<T> {
    /// Claim the slot. Returns `None` while another action holds it.
    pub(crate) fn begin(
        slot: &ActionSlot,
        intent_id: Option<String>,
    ) -> Option<(Self, PendingAction<T>)> {
        let mut active = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = active.as_ref() {
            warn!(
                active_action_id = %current.id,
                state = %current.state,
                "rejecting concurrent action"
            );
            return None;
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        *active = Some(ActionSnapshot {
            id,
            kind: T::KIND,
            intent_id,
            state: ActionState::Created,
            started_at: now,
            updated_at: now,
            challenge_deadline: None,
        });
        drop(active);

        info!(action_id = %id, kind = %T::KIND, "action created");
        let (sender, receiver) = oneshot::channel();
        let guard = Self {
            slot: slot.clone(),
            id,
            kind: T::KIND,
            state: ActionState::Created,
            sender: Some(sender),
            _intent: PhantomData,
        };
        let pending = PendingAction {
            action_id: Some(id),
            receiver,
        };
        Some((guard, pending))
    }
}

impl<T> ActionGuard<T> {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn transition(&mut self, next: ActionState) {
        let allowed = self.state.can_transition_to(next);
        if !allowed {
            warn!(
                action_id = %self.id,
                from = %self.state,
                to = %next,
                "invalid action transition"
            );
        }
        debug_assert!(allowed, "invalid action transition {} -> {}", self.state, next);
        debug!(action_id = %self.id, kind = %self.kind, from = %self.state, to = %next, "action transition");
        self.state = next;
        self.update(|snapshot| snapshot.state = next);
    }

    pub(crate) fn record_intent(&self, intent_id: &str) {
        self.update(|snapshot| snapshot.intent_id = Some(intent_id.to_string()));
    }

    pub(crate) fn record_challenge_deadline(&self, deadline: Instant) {
        self.update(|snapshot| snapshot.challenge_deadline = Some(deadline));
    }

    fn update(&self, apply: impl FnOnce(&mut ActionSnapshot)) {
        let mut active = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(snapshot) = active.as_mut().filter(|s| s.id == self.id) {
            apply(snapshot);
            snapshot.updated_at = Utc::now();
        }
    }

    fn release(&self) {
        let mut active = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_ref().is_some_and(|s| s.id == self.id) {
            *active = None;
        }
    }

    fn deliver(&mut self, outcome: ActionOutcome<T>) {
        self.release();
        if let Some(sender) = self.sender.take() {
            if sender.send(outcome).is_err() {
                debug!(action_id = %self.id, "action outcome receiver was dropped");
            }
        }
    }
}

impl<T: IntentSnapshot> ActionGuard<T> {
    /// Enter the terminal state for `outcome`, free the slot and deliver.
    /// Returns the state the action finished in.
    pub(crate) fn complete(mut self, outcome: ActionOutcome<Intent>) -> ActionState {
        let outcome = outcome.narrow::<T>();
        let terminal = outcome.terminal_state();
        self.transition(terminal);
        match outcome.error() {
            Some(error) => warn!(
                action_id = %self.id,
                kind = %self.kind,
                state = %terminal,
                error_code = error.error_code(),
                error = %error,
                "action finished"
            ),
            None => info!(action_id = %self.id, kind = %self.kind, state = %terminal, "action finished"),
        }
        self.deliver(outcome);
        terminal
    }
}

impl<T> Drop for ActionGuard<T> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            warn!(action_id = %self.id, state = %self.state, "action abandoned");
            self.deliver(ActionOutcome::failed(PaymentHandlerError::ChallengeProtocol(
                ABANDONED_MESSAGE.to_string(),
            )));
        }
    }
}
