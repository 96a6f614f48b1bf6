//! Tablekey Gateway - Authenticated requests to backend services
//!
//! One `RequestGateway` per backend service. Each gateway pairs a transport
//! with the `CredentialSource` of the tier that service expects and applies
//! the refresh-then-retry-once policy. Unrecoverable credential failures are
//! published as `Teardown` events for the application shell.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tablekey_auth::SessionTokenManager;
//! use tablekey_core::{Config, MemoryStore};
//! use tablekey_gateway::{PanelCredentials, RequestGateway, ReqwestTransport};
//!
//! async fn example() -> tablekey_core::Result<()> {
//!     let config = Config::new().with_base_url("https://pos.example.com");
//!     let store = Arc::new(MemoryStore::new());
//!     let transport = Arc::new(ReqwestTransport::new(&config)?);
//!     let session = SessionTokenManager::new(&config, store, transport.clone());
//!
//!     let billing = RequestGateway::builder("billing")
//!         .transport(transport)
//!         .credentials(Arc::new(PanelCredentials::new(session)))
//!         .build()?;
//!     let invoices: serde_json::Value = billing.get_json("/invoices").await?;
//!     println!("{}", invoices);
//!     Ok(())
//! }
//! ```

pub mod credentials;
pub mod gateway;
pub mod http;
pub mod middleware;
pub mod refresh;
pub mod shift;
pub mod teardown;

pub use credentials::{
    CredentialSource, DeviceCredentials, OperatorCredentials, PanelCredentials, Recovery, Tier,
};
pub use gateway::{RequestGateway, RequestGatewayBuilder};
pub use http::ReqwestTransport;
pub use middleware::{Middleware, Next};
pub use refresh::RefreshRetry;
pub use shift::{ShiftHeader, SHIFT_HEADER};
pub use teardown::{teardown_channel, Teardown, TEARDOWN_CAPACITY};
