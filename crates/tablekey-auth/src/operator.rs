//! PIN-authenticated operator credential on a paired terminal
//!
//! The operator credential has a fixed lifetime from issuance and is never
//! refreshed; once it lapses the operator has to enter the PIN again.

use async_trait::async_trait;
use std::sync::Arc;
use tablekey_core::protocol::{KioskLoginRequest, KioskLoginResponse};
use tablekey_core::{
    Clock, Config, Error, HttpRequest, KeyValueStore, Result, StorageKeys, SystemClock,
    Transport,
};
use tracing::{debug, info, warn};

/// Supplies an operator PIN on demand, typically by prompting at the terminal
#[async_trait]
pub trait PinProvider: Send + Sync {
    async fn request_pin(&self) -> Result<String>;
}

/// Check that a PIN is exactly 6 ASCII digits
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() == 6 && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::InvalidPin)
    }
}

/// Operator credential lifecycle for one terminal
pub struct KioskOperatorSession {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    margin_ms: i64,
    ttl_ms: i64,
}

impl KioskOperatorSession {
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_clock(config, store, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            margin_ms: config.operator_margin_ms,
            ttl_ms: config.operator_ttl_ms,
        }
    }

    /// The stored operator token, if it has more than the safety margin left
    ///
    /// An operator token never outlives the device credential it was issued to.
    pub fn current_token(&self) -> Result<Option<String>> {
        if !self.store.has(StorageKeys::KIOSK_TOKEN)? {
            return Ok(None);
        }
        let Some(token) = self.store.get(StorageKeys::KIOSK_JWT)? else {
            return Ok(None);
        };
        let expires_at = self
            .store
            .get(StorageKeys::KIOSK_JWT_EXP)?
            .and_then(|raw| raw.parse::<i64>().ok());
        match expires_at {
            Some(expires_at) if expires_at - self.clock.now_ms() > self.margin_ms => {
                Ok(Some(token))
            }
            _ => Ok(None),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.current_token().map(|t| t.is_some()).unwrap_or(false)
    }

    /// Return a valid operator token, asking `pin_provider` for a PIN if needed
    ///
    /// Without a provider an expired or missing credential fails with
    /// `OperatorCredentialNeeded` so the caller can prompt and retry.
    pub async fn get_fresh_operator_token(
        &self,
        pin_provider: Option<&dyn PinProvider>,
    ) -> Result<String> {
        if let Some(token) = self.current_token()? {
            return Ok(token);
        }
        let provider = pin_provider.ok_or(Error::OperatorCredentialNeeded)?;
        debug!("Operator credential missing or expired, requesting PIN");
        let pin = provider.request_pin().await?;
        self.login_with_pin(&pin).await
    }

    /// Exchange the device credential and an operator PIN for an operator token
    pub async fn login_with_pin(&self, pin: &str) -> Result<String> {
        validate_pin(pin)?;
        let kiosk_token = self
            .store
            .get(StorageKeys::KIOSK_TOKEN)?
            .ok_or(Error::NoDeviceCredential)?;

        let request = HttpRequest::post("/kiosk/login")
            .with_header("x-kiosk-token", kiosk_token)
            .json(&KioskLoginRequest {
                password: pin.to_string(),
            })?;
        let response = self.transport.send(request).await?;
        if response.status == 401 {
            warn!("Operator PIN rejected");
            return Err(Error::PinRejected);
        }
        let body: KioskLoginResponse = response.error_for_status()?.json()?;

        let expires_at = self.clock.now_ms() + self.ttl_ms;
        self.store.set_many(&[
            (StorageKeys::KIOSK_JWT, &body.jwt),
            (StorageKeys::KIOSK_JWT_EXP, &expires_at.to_string()),
        ])?;

        info!(expires_at, "Operator unlocked terminal");
        Ok(body.jwt)
    }

    /// Drop the operator credential
    pub fn clear(&self) -> Result<()> {
        self.store.delete_many(&StorageKeys::OPERATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tablekey_core::transport::testing::{Reply, ScriptedTransport};
    use tablekey_core::{ManualClock, MemoryStore, Method};

    const T0: i64 = 1_700_000_000_000;

    struct FixedPin {
        pin: &'static str,
        asked: AtomicUsize,
    }

    impl FixedPin {
        fn new(pin: &'static str) -> Self {
            Self {
                pin,
                asked: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PinProvider for FixedPin {
        async fn request_pin(&self) -> Result<String> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            Ok(self.pin.to_string())
        }
    }

    fn create_test_session() -> (
        KioskOperatorSession,
        Arc<MemoryStore>,
        Arc<ScriptedTransport>,
        Arc<ManualClock>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        let clock = Arc::new(ManualClock::new(T0));
        let session = KioskOperatorSession::with_clock(
            &Config::default(),
            store.clone(),
            transport.clone(),
            clock.clone(),
        );
        (session, store, transport, clock)
    }

    #[test]
    fn test_pin_validation() {
        assert!(validate_pin("123456").is_ok());
        assert!(validate_pin("12345").is_err());
        assert!(validate_pin("1234567").is_err());
        assert!(validate_pin("12a456").is_err());
        assert!(validate_pin("").is_err());
    }

    #[tokio::test]
    async fn test_operator_ttl_window() {
        let (session, store, transport, clock) = create_test_session();
        store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();
        transport.on(Method::Post, "/kiosk/login", Reply::ok_json(json!({"jwt": "op"})));

        session.login_with_pin("123456").await.unwrap();

        clock.set(T0 + 19 * 60_000 + 50_000);
        assert!(session.is_valid());

        clock.set(T0 + 20 * 60_000 + 1_000);
        assert!(!session.is_valid());
    }

    #[tokio::test]
    async fn test_use_does_not_extend_expiry() {
        let (session, store, transport, clock) = create_test_session();
        store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();
        transport.on(Method::Post, "/kiosk/login", Reply::ok_json(json!({"jwt": "op"})));
        session.login_with_pin("123456").await.unwrap();

        clock.advance(10 * 60_000);
        assert_eq!(session.get_fresh_operator_token(None).await.unwrap(), "op");
        assert_eq!(
            store.get(StorageKeys::KIOSK_JWT_EXP).unwrap(),
            Some((T0 + 1_200_000).to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_credential_without_provider() {
        let (session, store, transport, _) = create_test_session();
        store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();

        let err = session.get_fresh_operator_token(None).await.unwrap_err();
        assert!(matches!(err, Error::OperatorCredentialNeeded));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_provider_is_asked_for_pin() {
        let (session, store, transport, clock) = create_test_session();
        store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();
        transport.always(Method::Post, "/kiosk/login", Reply::ok_json(json!({"jwt": "op"})));
        let provider = FixedPin::new("246810");

        let token = session.get_fresh_operator_token(Some(&provider)).await.unwrap();
        assert_eq!(token, "op");
        assert_eq!(provider.asked.load(Ordering::SeqCst), 1);

        let sent = &transport.requests()[0];
        assert_eq!(sent.header("X-Kiosk-Token"), Some("device"));
        assert_eq!(sent.body.as_ref().unwrap()["password"], "246810");

        // Still valid: no second prompt
        session.get_fresh_operator_token(Some(&provider)).await.unwrap();
        assert_eq!(provider.asked.load(Ordering::SeqCst), 1);

        // Expired: prompt again, never refreshed
        clock.advance(20 * 60_000);
        session.get_fresh_operator_token(Some(&provider)).await.unwrap();
        assert_eq!(provider.asked.load(Ordering::SeqCst), 2);
        assert_eq!(transport.count("/kiosk/login"), 2);
    }

    #[tokio::test]
    async fn test_invalid_pin_never_reaches_network() {
        let (session, store, transport, _) = create_test_session();
        store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();

        let err = session.login_with_pin("12 456").await.unwrap_err();
        assert!(matches!(err, Error::InvalidPin));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_pin_login_requires_device_credential() {
        let (session, _, transport, _) = create_test_session();
        let err = session.login_with_pin("123456").await.unwrap_err();
        assert!(matches!(err, Error::NoDeviceCredential));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_pin() {
        let (session, store, transport, _) = create_test_session();
        store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();
        transport.on(Method::Post, "/kiosk/login", Reply::status(401));

        let err = session.login_with_pin("000000").await.unwrap_err();
        assert!(matches!(err, Error::PinRejected));
        assert!(store.get(StorageKeys::KIOSK_JWT).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_drops_operator_only() {
        let (session, store, transport, _) = create_test_session();
        store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();
        transport.on(Method::Post, "/kiosk/login", Reply::ok_json(json!({"jwt": "op"})));
        session.login_with_pin("123456").await.unwrap();

        session.clear().unwrap();
        assert!(!session.is_valid());
        assert!(store.has(StorageKeys::KIOSK_TOKEN).unwrap());
    }

    #[tokio::test]
    async fn test_operator_token_needs_device_credential() {
        let (session, store, transport, _) = create_test_session();
        store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();
        transport.on(Method::Post, "/kiosk/login", Reply::ok_json(json!({"jwt": "op"})));
        session.login_with_pin("123456").await.unwrap();
        assert!(session.is_valid());

        store.delete(StorageKeys::KIOSK_TOKEN).unwrap();
        assert!(!session.is_valid());
        assert_eq!(session.current_token().unwrap(), None);
        let err = session.get_fresh_operator_token(None).await.unwrap_err();
        assert!(matches!(err, Error::OperatorCredentialNeeded));
    }
}
