//! Authentication state machine using rust-fsm.
//!
//! The status is tracked by an explicit finite state machine instead of
//! being derived from storage checks scattered across call sites.
//!
//! ## State Diagram
//!
//! ```text
//! ┌──────────┐  InitStart   ┌──────────┐
//! │   Idle   │ ───────────► │ Loading  │ ◄──────────────┐
//! └──────────┘              └────┬─────┘                │
//!                                │                      │ InitStart
//!          InitSuccess /         │        InitFail /    │ (re-auth)
//!          AuthSuccess           │        AuthFail      │
//!                ┌───────────────┴──────────────┐       │
//!                ▼                              ▼       │
//!       ┌───────────────┐              ┌─────────────────┐
//!       │ Authenticated │              │ Unauthenticated │
//!       └───────┬───────┘              └─────────────────┘
//!               │                               ▲
//!               └───────── Logout (from any) ───┘
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

// Define the FSM using rust-fsm's declarative macro
// This generates a module `auth_machine` with:
// - auth_machine::State (enum)
// - auth_machine::Input (enum)
// - auth_machine::StateMachine (type alias)
state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub auth_machine(Idle)

    Idle => {
        InitStart => Loading,
        Logout => Unauthenticated
    },
    Loading => {
        InitSuccess => Authenticated,
        AuthSuccess => Authenticated,
        InitFail => Unauthenticated,
        AuthFail => Unauthenticated,
        // A newer init supersedes the in-flight one
        InitStart => Loading,
        Logout => Unauthenticated
    },
    Authenticated => {
        // Re-auth cycle
        InitStart => Loading,
        Logout => Unauthenticated
    },
    Unauthenticated => {
        InitStart => Loading,
        Logout => Unauthenticated
    }
}

// Re-export the generated types with clearer names
pub use auth_machine::Input as AuthMachineInput;
pub use auth_machine::State as AuthMachineState;
pub use auth_machine::StateMachine as AuthMachine;

/// Authentication status for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// Initial state, bootstrap has not run yet.
    Idle,
    /// Bootstrap in progress, or login/signup in flight.
    Loading,
    /// Valid token and user present.
    Authenticated,
    /// No valid session: never logged in, bootstrap/login failed, or
    /// explicit logout.
    Unauthenticated,
}

impl AuthStatus {
    /// Returns true if the user has a valid session.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStatus::Authenticated)
    }

    /// Returns true if the state is transient; `Authenticated` and
    /// `Unauthenticated` are the terminal-per-session states.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthStatus::Idle | AuthStatus::Loading)
    }
}

impl From<&AuthMachineState> for AuthStatus {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::Idle => AuthStatus::Idle,
            AuthMachineState::Loading => AuthStatus::Loading,
            AuthMachineState::Authenticated => AuthStatus::Authenticated,
            AuthMachineState::Unauthenticated => AuthStatus::Unauthenticated,
        }
    }
}

/// Payload for auth state change events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStateChanged {
    /// Current auth status.
    pub status: AuthStatus,
    /// User ID if authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// User email if available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
