//! Clients for the identity provider's REST surfaces.
//!
//! `TokenClient` speaks the realm token/logout endpoints (the three grant
//! exchanges); `AdminClient` speaks the privileged admin directory API with
//! a client-credentials token.

pub mod admin;
pub mod error;
pub mod token;

pub use admin::AdminClient;
pub use error::AuthError;
pub use token::{Exchange, TokenClient};
