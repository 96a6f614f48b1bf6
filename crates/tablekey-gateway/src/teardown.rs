//! Signals from the gateway to the application shell

use tokio::sync::broadcast;

/// Events buffered per subscriber before the oldest are dropped
pub const TEARDOWN_CAPACITY: usize = 16;

/// Unrecoverable credential failure the shell has to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Panel credentials were wiped; show the login screen
    ForceLogin,
    /// The server revoked this terminal; send the operator to pairing
    DeviceRevoked,
}

impl std::fmt::Display for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Teardown::ForceLogin => write!(f, "login required"),
            Teardown::DeviceRevoked => write!(f, "device revoked"),
        }
    }
}

/// Create a channel that several gateways can share
pub fn teardown_channel() -> broadcast::Sender<Teardown> {
    broadcast::channel(TEARDOWN_CAPACITY).0
}
