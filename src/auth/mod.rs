//! Session core: token storage, claim evaluation, and lifecycle management.
//!
//! - `store`: durable holders for the current token pair
//! - `claims`: JWT payload decoding and validity checks (no signature verification)
//! - `session`: the `SessionManager` with its proactive refresh loop

pub mod claims;
pub mod session;
pub mod store;

pub use claims::SessionClaims;
pub use session::{RefreshLoopHandle, RefreshOutcome, SessionManager, SessionState};
pub use store::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenPair, TokenStore};
