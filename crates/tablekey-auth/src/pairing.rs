//! Terminal pairing against a restaurant
//!
//! Pairing runs in two phases:
//! 1. `pair_start` checks the pairing code and reports whether the terminal
//!    has to be bound to a station
//! 2. `pair_confirm` completes pairing and stores the device credential
//!
//! Between the two, the pairing UI may look up terminals already catalogued
//! under the same code and offer them for adoption.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tablekey_core::protocol::{PairConfirmResponse, PairStartRequest};
use tablekey_core::{
    Config, DeviceType, Error, HttpRequest, KeyValueStore, KioskDevice, PairConfirm, PairStart,
    Result, StorageKeys, Transport,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Length of a pairing code
pub const PAIRING_CODE_LEN: usize = 6;

/// Check that a pairing code is exactly 6 ASCII digits
pub fn validate_pairing_code(code: &str) -> Result<()> {
    if code.len() == PAIRING_CODE_LEN && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::InvalidPairingCode(code.to_string()))
    }
}

/// A catalogued device as offered in the pairing UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceOption {
    pub id: i64,
    pub label: String,
    /// In use by another terminal, cannot be picked
    pub disabled: bool,
    /// Picking it restores the device
    pub revoked: bool,
}

impl From<&KioskDevice> for DeviceOption {
    fn from(device: &KioskDevice) -> Self {
        let name = if device.name.trim().is_empty() {
            format!("Device #{}", device.id)
        } else {
            device.name.clone()
        };
        let label = if device.in_use {
            format!("{} (in use)", name)
        } else if device.is_revoked() {
            format!("{} (revoked, will be restored)", name)
        } else {
            name
        };

        Self {
            id: device.id,
            label,
            disabled: device.in_use,
            revoked: device.is_revoked(),
        }
    }
}

/// Build the selectable option list for a device search result
pub fn device_options(devices: &[KioskDevice]) -> Vec<DeviceOption> {
    devices.iter().map(DeviceOption::from).collect()
}

/// Percent-encode a single path segment
fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Drives the pairing protocol for one terminal
#[derive(Clone)]
pub struct KioskPairingClient {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    min_search_len: usize,
}

impl KioskPairingClient {
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            transport,
            min_search_len: config.min_search_len,
        }
    }

    /// Validate a pairing code server-side; no local state changes
    pub async fn pair_start(&self, code: &str, device_type: DeviceType) -> Result<PairStart> {
        validate_pairing_code(code)?;
        let request = HttpRequest::post("/kiosk/pair/start").json(&PairStartRequest {
            code: code.to_string(),
            device_type,
        })?;
        let start: PairStart = self
            .transport
            .send(request)
            .await?
            .error_for_status()?
            .json()?;

        info!(
            "Pairing code accepted for restaurant {} ({} stations)",
            start.restaurant_id,
            start.stations.len()
        );
        Ok(start)
    }

    /// Complete pairing and store the device credential
    ///
    /// Operator credentials and the active shift belong to whatever terminal
    /// this was before, so they are dropped in the same write.
    pub async fn pair_confirm(&self, confirm: PairConfirm) -> Result<()> {
        validate_pairing_code(&confirm.code)?;
        let request = HttpRequest::post("/kiosk/pair/confirm").json(&confirm)?;
        let response: PairConfirmResponse = self
            .transport
            .send(request)
            .await?
            .error_for_status()?
            .json()?;

        let mut stale = StorageKeys::OPERATOR.to_vec();
        stale.push(StorageKeys::CASH_SHIFT_ID);
        self.store.delete_many(&stale)?;
        self.store
            .set(StorageKeys::KIOSK_TOKEN, &response.kiosk_token)?;

        info!(
            "Terminal paired as {} '{}'",
            confirm.device_type, confirm.device_name
        );
        Ok(())
    }

    /// Find catalogued devices registered under a pairing code
    ///
    /// Queries shorter than the configured minimum return no results without
    /// touching the network.
    pub async fn search_devices(
        &self,
        code: &str,
        device_type: DeviceType,
    ) -> Result<Vec<KioskDevice>> {
        let code = code.trim();
        if code.chars().count() < self.min_search_len {
            debug!("Device search query too short, skipping");
            return Ok(Vec::new());
        }

        let request = HttpRequest::get(format!("/kiosk/devices/by-code/{}", encode_segment(code)))
            .query("type", device_type.as_str());
        let devices: Vec<KioskDevice> = self
            .transport
            .send(request)
            .await?
            .error_for_status()?
            .json()?;

        debug!("Device search for {} returned {} devices", device_type, devices.len());
        Ok(devices)
    }

    pub fn has_device_credential(&self) -> Result<bool> {
        self.store.has(StorageKeys::KIOSK_TOKEN)
    }

    /// Stable fingerprint of this install for the given device type
    ///
    /// Derived from a random install id created on first use, which survives
    /// unpairing so a re-paired terminal presents the same fingerprint.
    pub fn device_fingerprint(&self, device_type: DeviceType) -> Result<String> {
        let install_id = match self.store.get(StorageKeys::KIOSK_INSTALL_ID)? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                self.store.set(StorageKeys::KIOSK_INSTALL_ID, &id)?;
                debug!("Created install id");
                id
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(install_id.as_bytes());
        hasher.update(b":");
        hasher.update(device_type.as_str().as_bytes());
        Ok(BASE64.encode(hasher.finalize()))
    }
}
