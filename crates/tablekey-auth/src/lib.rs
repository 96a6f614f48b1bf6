//! Tablekey Auth - Panel sessions, terminal pairing and operator credentials
//!
//! Three credential tiers cooperate here:
//!
//! - Panel: a short-lived access token kept fresh with a rotating refresh
//!   token (`SessionTokenManager`)
//! - Device: a long-lived credential issued when a terminal is paired
//!   (`KioskPairingClient`, `DeviceStatusProbe`)
//! - Operator: a 20 minute credential unlocked with a PIN on a paired
//!   terminal (`KioskOperatorSession`)
//!
//! # Pairing Flow
//!
//! 1. `KioskPairingClient::pair_start()` checks the 6-digit pairing code
//! 2. Optionally, `DeviceSearch` looks up catalogued devices to adopt
//! 3. `KioskPairingClient::pair_confirm()` stores the device credential
//! 4. `KioskOperatorSession::login_with_pin()` unlocks the terminal
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tablekey_auth::{DeviceStatusProbe, KioskPairingClient};
//! use tablekey_core::{Config, DeviceType, MemoryStore, Transport};
//!
//! async fn example(transport: Arc<dyn Transport>) -> tablekey_core::Result<()> {
//!     let config = Config::default();
//!     let store = Arc::new(MemoryStore::new());
//!     let pairing = KioskPairingClient::new(&config, store.clone(), transport.clone());
//!
//!     let start = pairing.pair_start("031180", DeviceType::Cash).await?;
//!     println!("Restaurant {} needs station: {}", start.restaurant_id, start.require_station);
//!
//!     let probe = DeviceStatusProbe::new(store, transport);
//!     println!("Pairing state: {}", probe.probe().await?);
//!     Ok(())
//! }
//! ```

pub mod operator;
pub mod pairing;
pub mod probe;
pub mod search;
pub mod session;
pub mod shift;

pub use operator::{validate_pin, KioskOperatorSession, PinProvider};
pub use pairing::{
    device_options, validate_pairing_code, DeviceOption, KioskPairingClient, PAIRING_CODE_LEN,
};
pub use probe::{DeviceStatusProbe, PairingState, KIOSK_TOKEN_HEADER};
pub use search::DeviceSearch;
pub use session::SessionTokenManager;
pub use shift::ShiftTracker;
