//! Credential sources, one per tier
//!
//! Each backend service authenticates with exactly one tier. A source only
//! reads its own tier's keys, so a device credential can never stand in for
//! a panel credential or the other way round.

use async_trait::async_trait;
use std::sync::Arc;
use tablekey_auth::{KioskOperatorSession, PinProvider, SessionTokenManager, KIOSK_TOKEN_HEADER};
use tablekey_core::{Error, HttpRequest, KeyValueStore, Result, StorageKeys};
use tracing::debug;

/// Credential tier a backend service expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Panel,
    Device,
    Operator,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Panel => write!(f, "panel"),
            Tier::Device => write!(f, "device"),
            Tier::Operator => write!(f, "operator"),
        }
    }
}

/// What to do after the server rejected a credential
#[derive(Debug)]
pub enum Recovery {
    /// A new credential is available; attach and resend once
    Retry,
    /// Nothing can be done; fail with this error
    GiveUp(Error),
}

/// Supplies and recovers the credential for one tier
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn tier(&self) -> Tier;

    /// Put a fresh credential on the request
    async fn attach(&self, request: &mut HttpRequest) -> Result<()>;

    /// Called once after a 401
    async fn recover(&self) -> Recovery;

    /// Wipe this tier's credentials after an unrecoverable failure
    fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

/// Bearer access token of a panel session
pub struct PanelCredentials {
    session: SessionTokenManager,
}

impl PanelCredentials {
    pub fn new(session: SessionTokenManager) -> Self {
        Self { session }
    }
}

#[async_trait]
impl CredentialSource for PanelCredentials {
    fn tier(&self) -> Tier {
        Tier::Panel
    }

    async fn attach(&self, request: &mut HttpRequest) -> Result<()> {
        let token = self.session.get_fresh_access_token().await?;
        request.bearer(&token);
        Ok(())
    }

    async fn recover(&self) -> Recovery {
        match self.session.refresh().await {
            Ok(_) => Recovery::Retry,
            Err(e) => Recovery::GiveUp(e),
        }
    }

    fn teardown(&self) -> Result<()> {
        self.session.clear()
    }
}

/// Device credential sent as `X-Kiosk-Token`
///
/// There is no way to renew it, so a 401 means the device was revoked.
pub struct DeviceCredentials {
    store: Arc<dyn KeyValueStore>,
}

impl DeviceCredentials {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialSource for DeviceCredentials {
    fn tier(&self) -> Tier {
        Tier::Device
    }

    async fn attach(&self, request: &mut HttpRequest) -> Result<()> {
        let token = self
            .store
            .get(StorageKeys::KIOSK_TOKEN)?
            .ok_or(Error::NoDeviceCredential)?;
        request.set_header(KIOSK_TOKEN_HEADER, token);
        Ok(())
    }

    async fn recover(&self) -> Recovery {
        Recovery::GiveUp(Error::DeviceRevoked)
    }

    /// Drop the operator session and shift bound to this device
    ///
    /// The device credential itself stays so the status check keeps
    /// reporting the terminal as revoked.
    fn teardown(&self) -> Result<()> {
        let mut keys = StorageKeys::OPERATOR.to_vec();
        keys.push(StorageKeys::CASH_SHIFT_ID);
        self.store.delete_many(&keys)
    }
}

/// Bearer operator token, re-derived from a PIN when it lapses
pub struct OperatorCredentials {
    session: Arc<KioskOperatorSession>,
    pin_provider: Option<Arc<dyn PinProvider>>,
}

impl OperatorCredentials {
    pub fn new(session: Arc<KioskOperatorSession>) -> Self {
        Self {
            session,
            pin_provider: None,
        }
    }

    /// Builder pattern: prompt through `provider` when a PIN is needed
    pub fn with_pin_provider(mut self, provider: Arc<dyn PinProvider>) -> Self {
        self.pin_provider = Some(provider);
        self
    }
}

#[async_trait]
impl CredentialSource for OperatorCredentials {
    fn tier(&self) -> Tier {
        Tier::Operator
    }

    async fn attach(&self, request: &mut HttpRequest) -> Result<()> {
        let token = self
            .session
            .get_fresh_operator_token(self.pin_provider.as_deref())
            .await?;
        request.bearer(&token);
        Ok(())
    }

    async fn recover(&self) -> Recovery {
        if let Err(e) = self.session.clear() {
            return Recovery::GiveUp(e);
        }
        if self.pin_provider.is_some() {
            debug!("Operator credential rejected, asking for PIN again");
            Recovery::Retry
        } else {
            Recovery::GiveUp(Error::OperatorCredentialNeeded)
        }
    }

    fn teardown(&self) -> Result<()> {
        self.session.clear()
    }
}
