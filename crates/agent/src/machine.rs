//! The per-turn state machine.
//!
//! ```text
//!                 ModelReplied(CallPlugin)
//!   AwaitingModel ────────────────────────► HandlingPluginCall
//!        ▲  │                                      │
//!        │  │ ModelReplied(FinalAnswer)            │ ObservationRecorded
//!        │  ▼                                      │
//!        │ Done                                    │
//!        └─────────────────────────────────────────┘
//! ```
//!
//! Any non-terminal state can move to `Failed`. The machine knows nothing
//! about time, I/O or storage; the orchestrator performs the work for each
//! state and feeds the outcome back as a [`TurnEvent`].

use crate::parse::ModelAction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a turn ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureCause {
    StepLimitExceeded { limit: u32 },
    ModelUnavailable,
    Cancelled,
    /// Storage, budget or tokenization failure
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TurnState {
    AwaitingModel,
    HandlingPluginCall {
        plugin: String,
        arguments: serde_json::Value,
    },
    Done {
        answer: String,
    },
    Failed {
        cause: FailureCause,
    },
}

impl TurnState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingModel => "AwaitingModel",
            Self::HandlingPluginCall { .. } => "HandlingPluginCall",
            Self::Done { .. } => "Done",
            Self::Failed { .. } => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }
}

/// Outcome of the work done in the current state.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// The model's response was parsed.
    ModelReplied(ModelAction),
    /// The plugin observation turn was committed.
    ObservationRecorded,
    /// Model transport failed after all retries.
    ModelUnavailable,
    /// The caller cancelled the turn.
    Cancelled,
    /// An unrecoverable error outside the model and plugins.
    Fatal(String),
}

impl TurnEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::ModelReplied(ModelAction::FinalAnswer(_)) => "ModelReplied(FinalAnswer)",
            Self::ModelReplied(ModelAction::CallPlugin { .. }) => "ModelReplied(CallPlugin)",
            Self::ObservationRecorded => "ObservationRecorded",
            Self::ModelUnavailable => "ModelUnavailable",
            Self::Cancelled => "Cancelled",
            Self::Fatal(_) => "Fatal",
        }
    }
}

/// An event that is not legal in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub state: &'static str,
    pub event: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {} is not valid in state {}", self.event, self.state)
    }
}

impl std::error::Error for InvalidTransition {}

/// Drives one user turn from `AwaitingModel` to `Done` or `Failed`.
#[derive(Debug, Clone)]
pub struct TurnMachine {
    state: TurnState,
    steps: u32,
    max_steps: u32,
}

impl TurnMachine {
    /// A machine in `AwaitingModel` allowing `max_steps` plugin calls.
    pub fn new(max_steps: u32) -> Self {
        Self {
            state: TurnState::AwaitingModel,
            steps: 0,
            max_steps,
        }
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Plugin steps consumed so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Apply an event and return the new state.
    ///
    /// Each move into `HandlingPluginCall` consumes one step. A plugin call
    /// requested after the last step was used moves to `Failed` instead.
    pub fn advance(&mut self, event: TurnEvent) -> Result<&TurnState, InvalidTransition> {
        let next = match (&self.state, event) {
            (TurnState::AwaitingModel, TurnEvent::ModelReplied(ModelAction::FinalAnswer(answer))) => {
                TurnState::Done { answer }
            }
            (
                TurnState::AwaitingModel,
                TurnEvent::ModelReplied(ModelAction::CallPlugin { name, arguments }),
            ) => {
                if self.steps >= self.max_steps {
                    TurnState::Failed {
                        cause: FailureCause::StepLimitExceeded {
                            limit: self.max_steps,
                        },
                    }
                } else {
                    self.steps += 1;
                    TurnState::HandlingPluginCall {
                        plugin: name,
                        arguments,
                    }
                }
            }
            (TurnState::AwaitingModel, TurnEvent::ModelUnavailable) => TurnState::Failed {
                cause: FailureCause::ModelUnavailable,
            },
            (TurnState::HandlingPluginCall { .. }, TurnEvent::ObservationRecorded) => {
                TurnState::AwaitingModel
            }
            (
                TurnState::AwaitingModel | TurnState::HandlingPluginCall { .. },
                TurnEvent::Cancelled,
            ) => TurnState::Failed {
                cause: FailureCause::Cancelled,
            },
            (
                TurnState::AwaitingModel | TurnState::HandlingPluginCall { .. },
                TurnEvent::Fatal(reason),
            ) => TurnState::Failed {
                cause: FailureCause::Fatal(reason),
            },
            (state, event) => {
                return Err(InvalidTransition {
                    state: state.name(),
                    event: event.name(),
                });
            }
        };

        self.state = next;
        Ok(&self.state)
    }
}
