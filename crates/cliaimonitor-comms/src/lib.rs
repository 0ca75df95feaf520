//! Realtime agent-comms hub (spec §4.J) and the graceful-shutdown
//! protocol layered on top of it (spec §5). Neither module touches
//! HTTP — `cliaimonitor-server` owns the wire format, this crate owns
//! the in-process signaling.

pub mod hub;
pub mod shutdown;

pub use hub::{AgentCommsHub, HeartbeatResult, Signal};
pub use shutdown::{watch_for_graceful_shutdown, DEFAULT_GRACE_PERIOD_SECS};
