//! Backend wire types

use serde::{Deserialize, Serialize};

/// Physical terminal role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Waiter order-taking terminal
    Commander,
    /// Cash register
    Cash,
    /// Kitchen or bar display
    Monitor,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Commander => "commander",
            DeviceType::Cash => "cash",
            DeviceType::Monitor => "monitor",
        }
    }

    /// Cash and monitor terminals are bound to a station
    pub fn expects_station(&self) -> bool {
        matches!(self, DeviceType::Cash | DeviceType::Monitor)
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "commander" | "waiter" => Ok(Self::Commander),
            "cash" | "register" => Ok(Self::Cash),
            "monitor" | "kitchen" => Ok(Self::Monitor),
            _ => Err(format!(
                "Invalid device type: {}. Use: commander, cash, monitor",
                s
            )),
        }
    }
}

/// `POST /auth/refresh` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `POST /auth/refresh` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_jwt: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Present when the server rotated the refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `POST /login` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// `POST /login` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub admin_session_token: String,
    pub access_jwt: String,
    pub expires_in: i64,
    pub refresh_token: String,
    #[serde(default)]
    pub user: serde_json::Value,
}

/// `POST /kiosk/pair/start` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStartRequest {
    pub code: String,
    pub device_type: DeviceType,
}

/// Station a cash or monitor terminal can be bound to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

/// `POST /kiosk/pair/start` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStart {
    pub restaurant_id: i64,
    pub device_type: DeviceType,
    pub require_station: bool,
    #[serde(default)]
    pub stations: Vec<Station>,
}

/// `POST /kiosk/pair/confirm` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairConfirm {
    pub code: String,
    pub device_type: DeviceType,
    pub device_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl PairConfirm {
    /// Confirm pairing by adopting a catalogued device under its existing name
    ///
    /// A revoked device is restored by the server on adoption; a device in
    /// use by another terminal can never be adopted.
    pub fn adopting(
        device: &KioskDevice,
        code: impl Into<String>,
        device_type: DeviceType,
    ) -> crate::Result<Self> {
        if device.in_use {
            return Err(crate::Error::DeviceInUse(device.id));
        }
        Ok(Self {
            code: code.into(),
            device_type,
            device_name: device.name.clone(),
            station_id: None,
            fingerprint: None,
        })
    }

    pub fn with_station(mut self, station_id: Option<i64>) -> Self {
        self.station_id = station_id;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.fingerprint = fingerprint;
        self
    }
}

/// `POST /kiosk/pair/confirm` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairConfirmResponse {
    pub kiosk_token: String,
}

/// `POST /kiosk/login` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskLoginRequest {
    pub password: String,
}

/// `POST /kiosk/login` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskLoginResponse {
    pub jwt: String,
}

/// A catalogued terminal, as returned by the by-code device search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KioskDevice {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    #[serde(default)]
    pub revoked_at: Option<String>,
    #[serde(default)]
    pub in_use: bool,
}

impl KioskDevice {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}
