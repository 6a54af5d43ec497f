//! HTTP transport for the Memberport API.
//!
//! This crate owns the wire types for the auth endpoints and the refresh
//! interceptor: any authenticated request that comes back 401/403 triggers
//! exactly one token refresh and one retry of the original request. The
//! refresh failure path is the single place session teardown happens.

mod client;
mod error;
mod types;

pub use client::{ApiClient, RetryConfig};
pub use error::{TransportError, TransportResult};
pub use types::{ApiUser, AuthSession, ProfileUpdate, ProfileUpdateResponse};
