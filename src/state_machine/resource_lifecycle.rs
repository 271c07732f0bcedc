// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource Lifecycle State Machine
//!
//! Lifecycle of one node of a live topology.
//!
//! # States
//!
//! - Planned: present in the graph, not yet created
//! - Active: created and serving
//! - Deleted: removed (terminal)
//!
//! # Inputs
//!
//! - Create: Planned → Active
//! - Update: Active → Active
//! - Delete: Planned | Active → Deleted, refused while deletion protection is on

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{StateMachine, TransitionError, TransitionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Planned,
    Active,
    Deleted,
}

impl ResourceState {
    /// Whether the resource exists on the platform
    pub fn is_live(&self) -> bool {
        matches!(self, ResourceState::Active)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Planned => write!(f, "Planned"),
            ResourceState::Active => write!(f, "Active"),
            ResourceState::Deleted => write!(f, "Deleted"),
        }
    }
}

/// Lifecycle command (FSM input)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    Create,
    Update,
    Delete { protected: bool },
}

/// Transition output with metadata
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitionOutput {
    pub warnings: Vec<String>,

    /// Whether the transition destroyed a live resource
    pub is_destructive: bool,
}

impl TransitionOutput {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_warnings(warnings: Vec<String>) -> Self {
        Self {
            warnings,
            is_destructive: false,
        }
    }

    pub fn destructive() -> Self {
        Self {
            warnings: Vec::new(),
            is_destructive: true,
        }
    }
}

impl StateMachine for ResourceState {
    type Input = LifecycleCommand;
    type Output = TransitionOutput;

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
        use LifecycleCommand::*;
        use ResourceState::*;

        match (self, input) {
            (Planned, Create) => Ok((Active, TransitionOutput::ok())),
            (Planned, Delete { .. }) => Ok((
                Deleted,
                TransitionOutput::with_warnings(vec!["Deleting a resource that was never created".to_string()]),
            )),

            (Active, Update) => Ok((Active, TransitionOutput::ok())),
            (Active, Delete { protected: true }) => Err(TransitionError::PreconditionFailed(
                "deletion protection is enabled".to_string(),
            )),
            (Active, Delete { protected: false }) => Ok((Deleted, TransitionOutput::destructive())),

            (Planned, Update) => Err(TransitionError::InvalidTransition {
                from: Planned.to_string(),
                to: "Active (via Update)".to_string(),
            }),
            (Active, Create) => Err(TransitionError::InvalidTransition {
                from: Active.to_string(),
                to: "Active (via Create)".to_string(),
            }),
            (Deleted, _) => Err(TransitionError::InvalidTransition {
                from: Deleted.to_string(),
                to: "any state".to_string(),
            }),
        }
    }
}
