//! Storage key constants.

/// Storage keys, grouped by credential tier
pub struct StorageKeys;

impl StorageKeys {
    /// Opaque panel session token
    pub const SESSION_TOKEN: &'static str = "token";

    /// Panel access token
    pub const ACCESS_JWT: &'static str = "access_jwt";

    /// Panel access token expiry (ms epoch, decimal string)
    pub const ACCESS_JWT_EXP: &'static str = "access_jwt_exp";

    /// Panel refresh token
    pub const REFRESH_TOKEN: &'static str = "refresh_token";

    /// Device credential issued at pairing
    pub const KIOSK_TOKEN: &'static str = "kiosk_token";

    /// Operator credential
    pub const KIOSK_JWT: &'static str = "kiosk_jwt";

    /// Operator credential expiry (ms epoch, decimal string)
    pub const KIOSK_JWT_EXP: &'static str = "kiosk_jwt_exp";

    /// Active cash shift identifier
    pub const CASH_SHIFT_ID: &'static str = "cash_shift_id";

    /// Per-install identifier used to derive the device fingerprint
    pub const KIOSK_INSTALL_ID: &'static str = "kiosk_install_id";

    /// Every panel-tier key
    pub const PANEL: [&'static str; 4] = [
        Self::SESSION_TOKEN,
        Self::ACCESS_JWT,
        Self::ACCESS_JWT_EXP,
        Self::REFRESH_TOKEN,
    ];

    /// Operator-tier keys
    pub const OPERATOR: [&'static str; 2] = [Self::KIOSK_JWT, Self::KIOSK_JWT_EXP];

    /// Everything tied to the paired terminal; the install id survives unpairing
    pub const TERMINAL: [&'static str; 4] = [
        Self::KIOSK_TOKEN,
        Self::KIOSK_JWT,
        Self::KIOSK_JWT_EXP,
        Self::CASH_SHIFT_ID,
    ];
}
