//! Tablekey Core - Shared types, storage and transport abstractions
//!
//! This crate provides the foundational types used across all Tablekey components.

pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod protocol;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use keys::StorageKeys;
pub use protocol::{DeviceType, KioskDevice, PairConfirm, PairStart, Station};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, Namespaced};
pub use transport::{HttpRequest, HttpResponse, Method, Transport};
