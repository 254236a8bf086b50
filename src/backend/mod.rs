//! Collector connectivity: real-time channel, session creation and the manager
//! task that keeps both alive.

pub mod backoff;
pub mod channel;
pub mod manager;
pub mod session_api;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{Backoff, BackoffConfig};
pub use channel::{ChannelFrame, RealtimeChannel, TcpChannel};
pub use manager::{BackendConfig, BackendHandle, BackendSessionManager, BackendStatus, ConnectionState};
pub use session_api::{HttpSessionService, SessionApi};
