//! Protected-view gating for the Memberport client.
//!
//! Composes the session store, auth engine, and token codec into the two
//! startup-facing pieces:
//! - [`Bootstrap`]: hydrate auth state from persisted storage, with bounded
//!   read retries, optimistic hydrate, and a cancellable background profile
//!   refresh
//! - [`RouteGuard`]: gate protected views, enforce the inactivity timeout,
//!   and react to session events from this and other contexts
//! - [`ClientRuntime`]: one-stop wiring of the whole session stack from
//!   configuration

mod bootstrap;
mod guard;
mod runtime;

pub use bootstrap::{read_with_retry, Bootstrap, BootstrapConfig, CancelFlag};
pub use guard::{GuardHandle, GuardState, RouteGuard, RouteGuardConfig};
pub use runtime::ClientRuntime;
