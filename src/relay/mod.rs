//! Data Relay Module
//!
//! Handles bidirectional data relay between a client and the remote target.

pub mod closer;
pub mod engine;
pub mod pump;
pub mod session;

pub use closer::SessionCloser;
pub use engine::{spawn_session, RelayEngine, SessionHandle};
pub use pump::{BytePump, PumpOutcome, StopReason};
pub use session::{Direction, RelaySession, SessionStats};
