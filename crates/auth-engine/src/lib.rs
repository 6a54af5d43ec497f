//! Authentication state for the Memberport client.
//!
//! This crate provides:
//! - An explicit FSM for the auth status, driven by login/signup/logout/init
//!   actions
//! - The [`AuthEngine`] orchestrating API calls, session persistence, the
//!   expiry poll, and state-change broadcasts

mod auth_fsm;
mod engine;
mod error;

pub use auth_fsm::auth_machine;
pub use auth_fsm::{
    AuthMachine, AuthMachineInput, AuthMachineState, AuthStateChanged, AuthStatus,
};
pub use engine::{AuthAction, AuthEngine, AuthSnapshot, EngineConfig, ExpiryPollHandle};
pub use error::{AuthError, AuthResult};
