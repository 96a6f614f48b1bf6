//! Per-service request gateway

use crate::credentials::CredentialSource;
use crate::middleware::{Middleware, Next};
use crate::refresh::RefreshRetry;
use crate::shift::ShiftHeader;
use crate::teardown::{teardown_channel, Teardown};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tablekey_auth::ShiftTracker;
use tablekey_core::{Error, HttpRequest, HttpResponse, Result, Transport};
use tokio::sync::broadcast;
use tracing::debug;

/// Outbound calls to one backend service
///
/// Requests pass through the caller's middleware, then the shift header,
/// then the credential stage, and finally the transport.
pub struct RequestGateway {
    name: String,
    transport: Arc<dyn Transport>,
    chain: Vec<Arc<dyn Middleware>>,
    teardown: broadcast::Sender<Teardown>,
}

impl RequestGateway {
    pub fn builder(name: impl Into<String>) -> RequestGatewayBuilder {
        RequestGatewayBuilder {
            name: name.into(),
            transport: None,
            layers: Vec::new(),
            credentials: None,
            shift: None,
            teardown: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!("[{}] {} {}", self.name, request.method, request.path);
        Next::new(self.transport.as_ref(), &self.chain)
            .run(request)
            .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(HttpRequest::get(path)).await?.json()
    }

    pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.request(HttpRequest::post(path).json(body)?)
            .await?
            .json()
    }

    /// Receive teardown events published by this gateway
    pub fn subscribe_teardown(&self) -> broadcast::Receiver<Teardown> {
        self.teardown.subscribe()
    }
}

/// Builder for `RequestGateway`
pub struct RequestGatewayBuilder {
    name: String,
    transport: Option<Arc<dyn Transport>>,
    layers: Vec<Arc<dyn Middleware>>,
    credentials: Option<Arc<dyn CredentialSource>>,
    shift: Option<ShiftTracker>,
    teardown: Option<broadcast::Sender<Teardown>>,
}

impl RequestGatewayBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Add a middleware stage in front of the built-in ones
    pub fn layer(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.layers.push(middleware);
        self
    }

    pub fn credentials(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    /// Send `X-Shift-Id` while a shift is open
    pub fn shift(mut self, tracker: ShiftTracker) -> Self {
        self.shift = Some(tracker);
        self
    }

    /// Publish teardown events on a shared channel
    pub fn teardown_channel(mut self, sender: broadcast::Sender<Teardown>) -> Self {
        self.teardown = Some(sender);
        self
    }

    pub fn build(self) -> Result<RequestGateway> {
        let transport = self
            .transport
            .ok_or_else(|| Error::Config(format!("gateway '{}' has no transport", self.name)))?;
        let teardown = self.teardown.unwrap_or_else(teardown_channel);

        let mut chain = self.layers;
        if let Some(tracker) = self.shift {
            chain.push(Arc::new(ShiftHeader::new(tracker)));
        }
        if let Some(source) = self.credentials {
            debug!("Gateway '{}' uses {} credentials", self.name, source.tier());
            chain.push(Arc::new(RefreshRetry::new(source, teardown.clone())));
        }

        Ok(RequestGateway {
            name: self.name,
            transport,
            chain,
            teardown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::PanelCredentials;
    use serde_json::{json, Value};
    use tablekey_auth::SessionTokenManager;
    use tablekey_core::transport::testing::{Reply, ScriptedTransport};
    use tablekey_core::{Config, KeyValueStore, MemoryStore, Method, StorageKeys};

    fn create_test_gateway() -> (RequestGateway, Arc<MemoryStore>, Arc<ScriptedTransport>) {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        let session = SessionTokenManager::new(&Config::default(), store.clone(), transport.clone());
        let gateway = RequestGateway::builder("billing")
            .transport(transport.clone())
            .credentials(Arc::new(PanelCredentials::new(session)))
            .shift(ShiftTracker::new(store.clone()))
            .build()
            .unwrap();
        (gateway, store, transport)
    }

    fn store_fresh_panel(store: &MemoryStore) {
        store
            .set_many(&[
                (StorageKeys::ACCESS_JWT, "a1"),
                (StorageKeys::ACCESS_JWT_EXP, &i64::MAX.to_string()),
                (StorageKeys::REFRESH_TOKEN, "r1"),
            ])
            .unwrap();
    }

    #[test]
    fn test_build_requires_transport() {
        let result = RequestGateway::builder("orders").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_shift_header_follows_active_shift() {
        let (gateway, store, transport) = create_test_gateway();
        store_fresh_panel(&store);
        transport.always(Method::Get, "/invoices", Reply::ok_json(json!([])));

        let _: Value = gateway.get_json("/invoices").await.unwrap();
        ShiftTracker::new(store.clone()).set("31").unwrap();
        let _: Value = gateway.get_json("/invoices").await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent[0].header("X-Shift-Id"), None);
        assert_eq!(sent[1].header("X-Shift-Id"), Some("31"));
        assert_eq!(sent[1].header("Authorization"), Some("Bearer a1"));
    }

    #[tokio::test]
    async fn test_post_json_round_trip() {
        let (gateway, store, transport) = create_test_gateway();
        store_fresh_panel(&store);
        transport.on(Method::Post, "/invoices", Reply::ok_json(json!({"id": 88})));

        let created: Value = gateway
            .post_json("/invoices", &json!({"total": 1250}))
            .await
            .unwrap();
        assert_eq!(created["id"], 88);
        assert_eq!(transport.requests()[0].body, Some(json!({"total": 1250})));
    }

    #[tokio::test]
    async fn test_gateways_share_teardown_channel() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        let session = SessionTokenManager::new(&Config::default(), store.clone(), transport.clone());
        let channel = teardown_channel();
        let mut events = channel.subscribe();

        let billing = RequestGateway::builder("billing")
            .transport(transport.clone())
            .credentials(Arc::new(PanelCredentials::new(session.clone())))
            .teardown_channel(channel.clone())
            .build()
            .unwrap();
        let stock = RequestGateway::builder("stock")
            .transport(transport.clone())
            .credentials(Arc::new(PanelCredentials::new(session)))
            .teardown_channel(channel)
            .build()
            .unwrap();
        let mut from_stock = stock.subscribe_teardown();

        let err = billing.request(HttpRequest::get("/invoices")).await.unwrap_err();
        assert!(matches!(err, Error::NoRefreshCredential));
        assert_eq!(events.try_recv().unwrap(), Teardown::ForceLogin);
        assert_eq!(from_stock.try_recv().unwrap(), Teardown::ForceLogin);
        assert!(transport.requests().is_empty());
    }
}
