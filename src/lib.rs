//! Session/token lifecycle management against a Keycloak-style identity
//! provider.
//!
//! The core is the [`auth::SessionManager`]: it owns a durable
//! [`auth::TokenStore`], exchanges credentials through an
//! [`api::TokenClient`], evaluates sessions by decoding access token claims,
//! and keeps the session alive with a proactive background refresh loop.
//! [`api::AdminClient`] adds the provider's privileged directory operations
//! for operator tooling.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{AdminClient, AuthError, TokenClient};
pub use auth::{SessionClaims, SessionManager, SessionState};
pub use config::Config;
