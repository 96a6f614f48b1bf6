//! Attach-send-refresh-resend policy
//!
//! Per logical request: attach a credential, send, and on a 401 recover the
//! credential and resend exactly once. A second 401 or any other failure is
//! returned as is. Retries never chain, so an unreachable auth backend sees
//! at most one extra request per call.

use crate::credentials::{CredentialSource, Recovery};
use crate::middleware::{Middleware, Next};
use crate::teardown::Teardown;
use async_trait::async_trait;
use std::sync::Arc;
use tablekey_core::{Error, HttpRequest, HttpResponse, Result};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Credential middleware with a single 401 retry
pub struct RefreshRetry {
    source: Arc<dyn CredentialSource>,
    teardown: broadcast::Sender<Teardown>,
}

impl RefreshRetry {
    pub fn new(source: Arc<dyn CredentialSource>, teardown: broadcast::Sender<Teardown>) -> Self {
        Self { source, teardown }
    }

    async fn attach(&self, request: &mut HttpRequest) -> Result<()> {
        self.source
            .attach(request)
            .await
            .map_err(|e| self.escalate(e))
    }

    /// Publish a teardown for failures the shell has to handle
    fn escalate(&self, err: Error) -> Error {
        let event = match &err {
            e if e.is_fatal_for_session() => {
                error!("{} credentials unusable, forcing login", self.source.tier());
                Teardown::ForceLogin
            }
            Error::DeviceRevoked => {
                error!("Server revoked this device");
                Teardown::DeviceRevoked
            }
            _ => return err,
        };
        if let Err(e) = self.source.teardown() {
            warn!("Failed to clear {} credentials: {}", self.source.tier(), e);
        }
        // No subscribers is fine
        let _ = self.teardown.send(event);
        err
    }
}

#[async_trait]
impl Middleware for RefreshRetry {
    async fn handle(&self, mut request: HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        self.attach(&mut request).await?;

        match next.run(request.clone()).await {
            Err(e) if e.is_unauthorized() && !request.retried => {
                debug!(
                    "{} {} unauthorized, recovering {} credential",
                    request.method,
                    request.path,
                    self.source.tier()
                );
                request.retried = true;
                if let Recovery::GiveUp(err) = self.source.recover().await {
                    return Err(self.escalate(err));
                }
                self.attach(&mut request).await?;
                next.run(request).await
            }
            outcome => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{DeviceCredentials, OperatorCredentials, PanelCredentials};
    use crate::teardown::teardown_channel;
    use serde_json::json;
    use tablekey_auth::{KioskOperatorSession, PinProvider, SessionTokenManager};
    use tablekey_core::transport::testing::{Reply, ScriptedTransport};
    use tablekey_core::{
        Clock, Config, KeyValueStore, ManualClock, MemoryStore, Method, StorageKeys, Transport,
    };

    const NOW: i64 = 1_700_000_000_000;

    struct Harness {
        store: Arc<MemoryStore>,
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
        teardown: broadcast::Sender<Teardown>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                transport: Arc::new(ScriptedTransport::new()),
                clock: Arc::new(ManualClock::new(NOW)),
                teardown: teardown_channel(),
            }
        }

        fn session(&self) -> SessionTokenManager {
            SessionTokenManager::with_clock(
                &Config::default(),
                self.store.clone(),
                self.transport.clone(),
                self.clock.clone(),
            )
        }

        fn panel(&self) -> Arc<dyn Middleware> {
            let source = Arc::new(PanelCredentials::new(self.session()));
            Arc::new(RefreshRetry::new(source, self.teardown.clone()))
        }

        async fn send(&self, stage: Arc<dyn Middleware>, request: HttpRequest) -> Result<HttpResponse> {
            let chain = vec![stage];
            let transport: &dyn Transport = &*self.transport;
            Next::new(transport, &chain).run(request).await
        }

        fn store_panel(&self, access: &str) {
            let expires_at = self.clock.now_ms() + 600_000;
            self.store
                .set_many(&[
                    (StorageKeys::ACCESS_JWT, access),
                    (StorageKeys::ACCESS_JWT_EXP, &expires_at.to_string()),
                    (StorageKeys::REFRESH_TOKEN, "r1"),
                ])
                .unwrap();
        }
    }

    fn refreshed() -> Reply {
        Reply::ok_json(json!({"access_jwt": "a2", "expires_in": 900, "refresh_token": "r2"}))
    }

    #[tokio::test]
    async fn test_bearer_attached() {
        let h = Harness::new();
        h.store_panel("a1");
        h.transport.on(Method::Get, "/orders", Reply::status(200));

        h.send(h.panel(), HttpRequest::get("/orders")).await.unwrap();
        let sent = &h.transport.requests()[0];
        assert_eq!(sent.header("Authorization"), Some("Bearer a1"));
        assert!(!sent.retried);
    }

    #[tokio::test]
    async fn test_401_refreshes_and_resends_once() {
        let h = Harness::new();
        h.store_panel("a1");
        h.transport
            .on(Method::Get, "/orders", Reply::status(401))
            .on(Method::Get, "/orders", Reply::ok_json(json!([])))
            .on(Method::Post, "/auth/refresh", refreshed());

        h.send(h.panel(), HttpRequest::get("/orders")).await.unwrap();

        let sent = h.transport.requests();
        assert_eq!(h.transport.count("/auth/refresh"), 1);
        assert_eq!(h.transport.count("/orders"), 2);
        let resent = sent.last().unwrap();
        assert_eq!(resent.header("Authorization"), Some("Bearer a2"));
        assert!(resent.retried);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let h = Harness::new();
        h.store_panel("a1");
        h.transport
            .always(Method::Get, "/orders", Reply::status(401))
            .always(Method::Post, "/auth/refresh", refreshed());

        let err = h.send(h.panel(), HttpRequest::get("/orders")).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(h.transport.count("/auth/refresh"), 1);
        assert_eq!(h.transport.count("/orders"), 2);
    }

    #[tokio::test]
    async fn test_already_retried_request_is_not_retried() {
        let h = Harness::new();
        h.store_panel("a1");
        h.transport.always(Method::Get, "/orders", Reply::status(401));

        let mut request = HttpRequest::get("/orders");
        request.retried = true;
        let err = h.send(h.panel(), request).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(h.transport.count("/auth/refresh"), 0);
        assert_eq!(h.transport.count("/orders"), 1);
    }

    #[tokio::test]
    async fn test_other_failures_propagate_untouched() {
        let h = Harness::new();
        h.store_panel("a1");
        h.transport
            .on(Method::Get, "/orders", Reply::status(500))
            .on(Method::Get, "/stock", Reply::network("reset"));

        let err = h.send(h.panel(), HttpRequest::get("/orders")).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 500, .. }));
        let err = h.send(h.panel(), HttpRequest::get("/stock")).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(h.transport.count("/auth/refresh"), 0);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_tears_down() {
        let h = Harness::new();
        let mut events = h.teardown.subscribe();
        h.store
            .set_many(&[
                (StorageKeys::SESSION_TOKEN, "legacy"),
                (StorageKeys::ACCESS_JWT, "a0"),
                (StorageKeys::ACCESS_JWT_EXP, "0"),
                (StorageKeys::CASH_SHIFT_ID, "5"),
                (StorageKeys::KIOSK_TOKEN, "device"),
            ])
            .unwrap();

        let err = h.send(h.panel(), HttpRequest::get("/orders")).await.unwrap_err();

        assert!(matches!(err, Error::NoRefreshCredential));
        assert_eq!(events.try_recv().unwrap(), Teardown::ForceLogin);
        assert!(h.transport.requests().is_empty());
        let left = h.store.snapshot().unwrap();
        assert_eq!(left.len(), 1);
        assert!(left.contains_key(StorageKeys::KIOSK_TOKEN));
    }

    #[tokio::test]
    async fn test_device_tier_401_means_revoked() {
        let h = Harness::new();
        let mut events = h.teardown.subscribe();
        h.store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();
        h.transport.always(Method::Get, "/kiosk/menu", Reply::status(401));
        let source = Arc::new(DeviceCredentials::new(h.store.clone()));
        let stage = Arc::new(RefreshRetry::new(source, h.teardown.clone()));

        let err = h.send(stage, HttpRequest::get("/kiosk/menu")).await.unwrap_err();

        assert!(matches!(err, Error::DeviceRevoked));
        assert_eq!(events.try_recv().unwrap(), Teardown::DeviceRevoked);
        assert_eq!(h.transport.count("/kiosk/menu"), 1);
        assert_eq!(
            h.transport.requests()[0].header("X-Kiosk-Token"),
            Some("device")
        );
    }

    #[tokio::test]
    async fn test_device_tier_without_credential() {
        let h = Harness::new();
        let source = Arc::new(DeviceCredentials::new(h.store.clone()));
        let stage = Arc::new(RefreshRetry::new(source, h.teardown.clone()));

        let err = h.send(stage, HttpRequest::get("/kiosk/menu")).await.unwrap_err();
        assert!(matches!(err, Error::NoDeviceCredential));
        assert!(h.transport.requests().is_empty());
    }

    struct CountingPin(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl PinProvider for CountingPin {
        async fn request_pin(&self) -> Result<String> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("135790".to_string())
        }
    }

    fn operator_stage(h: &Harness, provider: Option<Arc<CountingPin>>) -> Arc<dyn Middleware> {
        let session = Arc::new(KioskOperatorSession::with_clock(
            &Config::default(),
            h.store.clone(),
            h.transport.clone(),
            h.clock.clone(),
        ));
        let mut source = OperatorCredentials::new(session);
        if let Some(provider) = provider {
            source = source.with_pin_provider(provider);
        }
        Arc::new(RefreshRetry::new(Arc::new(source), h.teardown.clone()))
    }

    #[tokio::test]
    async fn test_operator_401_prompts_for_pin_again() {
        let h = Harness::new();
        h.store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();
        h.transport
            .on(Method::Post, "/kiosk/login", Reply::ok_json(json!({"jwt": "op1"})))
            .on(Method::Post, "/kiosk/login", Reply::ok_json(json!({"jwt": "op2"})))
            .on(Method::Post, "/orders", Reply::status(401))
            .on(Method::Post, "/orders", Reply::status(201));
        let provider = Arc::new(CountingPin(Default::default()));

        let stage = operator_stage(&h, Some(provider.clone()));
        h.send(stage, HttpRequest::post("/orders")).await.unwrap();

        assert_eq!(provider.0.load(std::sync::atomic::Ordering::SeqCst), 2);
        let resent = h.transport.requests().last().cloned().unwrap();
        assert_eq!(resent.header("Authorization"), Some("Bearer op2"));
    }

    #[tokio::test]
    async fn test_operator_without_provider_needs_credential() {
        let h = Harness::new();
        h.store.set(StorageKeys::KIOSK_TOKEN, "device").unwrap();

        let stage = operator_stage(&h, None);
        let err = h.send(stage, HttpRequest::post("/orders")).await.unwrap_err();
        assert!(matches!(err, Error::OperatorCredentialNeeded));
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_revoked_device_drops_operator_session() {
        let h = Harness::new();
        let mut events = h.teardown.subscribe();
        h.store
            .set_many(&[
                (StorageKeys::KIOSK_TOKEN, "device"),
                (StorageKeys::CASH_SHIFT_ID, "12"),
            ])
            .unwrap();
        h.transport
            .on(Method::Post, "/kiosk/login", Reply::ok_json(json!({"jwt": "op"})))
            .always(Method::Get, "/kiosk/menu", Reply::status(401));
        let operator = Arc::new(KioskOperatorSession::with_clock(
            &Config::default(),
            h.store.clone(),
            h.transport.clone(),
            h.clock.clone(),
        ));
        operator.login_with_pin("123456").await.unwrap();
        assert!(operator.is_valid());

        let source = Arc::new(DeviceCredentials::new(h.store.clone()));
        let stage = Arc::new(RefreshRetry::new(source, h.teardown.clone()));
        let err = h.send(stage, HttpRequest::get("/kiosk/menu")).await.unwrap_err();

        assert!(matches!(err, Error::DeviceRevoked));
        assert_eq!(events.try_recv().unwrap(), Teardown::DeviceRevoked);
        assert_eq!(operator.current_token().unwrap(), None);
        let err = operator.get_fresh_operator_token(None).await.unwrap_err();
        assert!(matches!(err, Error::OperatorCredentialNeeded));

        let left = h.store.snapshot().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(
            left.get(StorageKeys::KIOSK_TOKEN).map(String::as_str),
            Some("device")
        );
    }
}
