//! Live pairing state of the terminal
//!
//! The state is derived from a lightweight server ping and is never cached
//! beyond a single probe. `spawn_monitor` re-probes on an interval and
//! publishes transitions on a watch channel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tablekey_core::{HttpRequest, KeyValueStore, Result, StorageKeys, Transport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Header carrying the device credential
pub const KIOSK_TOKEN_HEADER: &str = "X-Kiosk-Token";

/// Pairing state as seen by the last probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingState {
    /// No device credential stored; the terminal needs pairing
    Unpaired,
    Paired,
    /// The server invalidated this device; re-pairing required
    Revoked,
    /// Probe failed for any other reason; worth probing again
    Offline,
}

impl PairingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingState::Unpaired => "unpaired",
            PairingState::Paired => "paired",
            PairingState::Revoked => "revoked",
            PairingState::Offline => "offline",
        }
    }
}

impl std::fmt::Display for PairingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies the terminal's pairing state
pub struct DeviceStatusProbe {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
}

impl DeviceStatusProbe {
    pub fn new(store: Arc<dyn KeyValueStore>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Probe the server once
    ///
    /// Only a storage failure is an error; every network outcome maps to a
    /// state. The credential check happens before any network call.
    pub async fn probe(&self) -> Result<PairingState> {
        let Some(token) = self.store.get(StorageKeys::KIOSK_TOKEN)? else {
            return Ok(PairingState::Unpaired);
        };

        let request = HttpRequest::post("/kiosk/ping").with_header(KIOSK_TOKEN_HEADER, token);
        let state = match self.transport.send(request).await {
            Ok(response) if response.is_success() => PairingState::Paired,
            Ok(response) if response.status == 401 => PairingState::Revoked,
            Ok(response) => {
                debug!("Ping returned {}", response.status);
                PairingState::Offline
            }
            Err(e) => {
                debug!("Ping failed: {}", e);
                PairingState::Offline
            }
        };
        Ok(state)
    }

    /// Forget this terminal's pairing
    ///
    /// The backend is notified on a best-effort basis; local credentials are
    /// removed whatever the outcome. Calling it again is harmless.
    pub async fn unpair_device(&self) -> Result<()> {
        if let Some(token) = self.store.get(StorageKeys::KIOSK_TOKEN)? {
            let request =
                HttpRequest::post("/kiosk/unpair").with_header(KIOSK_TOKEN_HEADER, token);
            match self.transport.send(request).await {
                Ok(response) if response.is_success() => debug!("Backend acknowledged unpair"),
                Ok(response) => warn!("Unpair notification returned {}", response.status),
                Err(e) => warn!("Unpair notification failed: {}", e),
            }
        }

        self.store.delete_many(&StorageKeys::TERMINAL)?;
        info!("Terminal unpaired");
        Ok(())
    }

    /// Probe now, then every `interval`, publishing state changes
    ///
    /// The task ends once every receiver has been dropped.
    pub async fn spawn_monitor(
        self: Arc<Self>,
        interval: Duration,
    ) -> Result<(watch::Receiver<PairingState>, JoinHandle<()>)> {
        let initial = self.probe().await?;
        info!("Pairing state: {}", initial);
        let (tx, rx) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let state = match self.probe().await {
                    Ok(state) => state,
                    Err(e) => {
                        warn!("Pairing probe failed: {}", e);
                        continue;
                    }
                };
                tx.send_if_modified(|current| {
                    if *current == state {
                        return false;
                    }
                    info!("Pairing state: {} -> {}", current, state);
                    *current = state;
                    true
                });
            }
            debug!("Pairing monitor stopped");
        });

        Ok((rx, handle))
    }
}
