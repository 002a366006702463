//! Credential lifecycle services: refresh coordination, session bridging, bulk sweeps.

pub mod credential_loader;
pub mod refresh_actor;
pub mod session_bridge;
pub mod sweeper;

pub use refresh_actor::RefreshHandle;
pub use session_bridge::{BridgeOutcome, CredentialLookup, FirstPartySession, SessionBridge};
pub use sweeper::{SweepSummary, Sweeper};
