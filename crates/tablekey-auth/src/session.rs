//! Panel session tokens with deduplicated refresh
//!
//! The access token is short-lived and renewed with a rotating refresh
//! token. Any number of concurrent callers may ask for a fresh token; while
//! a refresh is outstanding they all await the same operation, so the
//! refresh endpoint is hit at most once per cycle.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tablekey_core::protocol::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};
use tablekey_core::{
    Clock, Config, Error, HttpRequest, KeyValueStore, Result, StorageKeys, SystemClock,
    Transport,
};
use tracing::{debug, info, warn};

/// Outcome shared by every caller awaiting one refresh
#[derive(Debug, Clone, thiserror::Error)]
enum RefreshError {
    #[error("no refresh credential")]
    NoRefreshCredential,
    #[error("{0}")]
    Failed(String),
}

impl From<RefreshError> for Error {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::NoRefreshCredential => Error::NoRefreshCredential,
            RefreshError::Failed(message) => Error::RefreshFailed(message),
        }
    }
}

fn failed(err: Error) -> RefreshError {
    RefreshError::Failed(err.to_string())
}

type PendingRefresh = Shared<BoxFuture<'static, std::result::Result<String, RefreshError>>>;

struct Inner {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    margin_ms: i64,
    /// In-flight refresh, tagged with the cycle that created it
    pending: Mutex<Option<(u64, PendingRefresh)>>,
    cycle: AtomicU64,
}

/// Owns the access/refresh credential pair of a panel session
#[derive(Clone)]
pub struct SessionTokenManager {
    inner: Arc<Inner>,
}

impl SessionTokenManager {
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
            inner: Arc::new(Inner {
                store,
                transport,
                clock,
                margin_ms: config.refresh_margin_ms,
                pending: Mutex::new(None),
                cycle: AtomicU64::new(0),
            }),
        }
    }

    /// Log in with email and password, storing the whole panel session
    ///
    /// Returns the user payload sent by the server.
    pub async fn login(&self, email: &str, password: &str) -> Result<serde_json::Value> {
        let request = HttpRequest::post("/login").json(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        let response = self.inner.transport.send(request).await?.error_for_status()?;
        let body: LoginResponse = response.json()?;

        let expires_at = self.inner.expiry_from(body.expires_in)?;
        self.inner.store.set_many(&[
            (StorageKeys::SESSION_TOKEN, &body.admin_session_token),
            (StorageKeys::ACCESS_JWT, &body.access_jwt),
            (StorageKeys::ACCESS_JWT_EXP, &expires_at.to_string()),
            (StorageKeys::REFRESH_TOKEN, &body.refresh_token),
        ])?;

        info!(expires_at, "Panel session started");
        Ok(body.user)
    }

    /// Drop the panel session and the active shift
    pub fn logout(&self) -> Result<()> {
        self.clear()?;
        info!("Panel session ended");
        Ok(())
    }

    /// Remove every panel-tier credential and the active shift
    pub fn clear(&self) -> Result<()> {
        let mut keys = StorageKeys::PANEL.to_vec();
        keys.push(StorageKeys::CASH_SHIFT_ID);
        self.inner.store.delete_many(&keys)
    }

    /// True iff an access token exists with more than the safety margin left
    pub fn is_valid(&self) -> bool {
        match self.inner.valid_token() {
            Ok(token) => token.is_some(),
            Err(e) => {
                warn!("Failed to read access token: {}", e);
                false
            }
        }
    }

    /// Absolute expiry of the stored access token (ms epoch)
    pub fn access_expiry(&self) -> Result<Option<i64>> {
        self.inner.stored_expiry()
    }

    /// Return a usable access token, refreshing first if needed
    pub async fn get_fresh_access_token(&self) -> Result<String> {
        if let Some(token) = self.inner.valid_token()? {
            return Ok(token);
        }
        self.refresh().await
    }

    /// Mint a new access token, joining a refresh already in flight
    ///
    /// The refresh runs as its own task: it completes and stores its result
    /// even if every caller awaiting it goes away.
    pub async fn refresh(&self) -> Result<String> {
        let pending = self.pending_refresh()?;
        pending.await.map_err(Error::from)
    }

    fn pending_refresh(&self) -> Result<PendingRefresh> {
        let mut pending = self
            .inner
            .pending
            .lock()
            .map_err(|_| Error::Storage("refresh lock poisoned".to_string()))?;

        if let Some((_, shared)) = pending.as_ref() {
            debug!("Joining in-flight token refresh");
            return Ok(shared.clone());
        }

        let cycle = self.inner.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let _guard = CycleGuard {
                inner: inner.clone(),
                cycle,
            };
            inner.perform_refresh().await
        });

        let shared = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(RefreshError::Failed(format!("refresh task aborted: {}", e))),
            }
        }
        .boxed()
        .shared();

        *pending = Some((cycle, shared.clone()));
        Ok(shared)
    }
}

/// Releases the pending slot when the refresh task ends, even by panic
struct CycleGuard {
    inner: Arc<Inner>,
    cycle: u64,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.inner.finish_cycle(self.cycle);
    }
}

impl Inner {
    fn expiry_from(&self, expires_in_secs: i64) -> Result<i64> {
        expires_in_secs
            .checked_mul(1000)
            .and_then(|ms| self.clock.now_ms().checked_add(ms))
            .ok_or_else(|| {
                Error::InvalidResponse(format!("expires_in out of range: {}", expires_in_secs))
            })
    }

    fn stored_expiry(&self) -> Result<Option<i64>> {
        Ok(self
            .store
            .get(StorageKeys::ACCESS_JWT_EXP)?
            .and_then(|raw| raw.parse::<i64>().ok()))
    }

    fn valid_token(&self) -> Result<Option<String>> {
        let Some(token) = self.store.get(StorageKeys::ACCESS_JWT)? else {
            return Ok(None);
        };
        let Some(expires_at) = self.stored_expiry()? else {
            return Ok(None);
        };
        if expires_at - self.clock.now_ms() > self.margin_ms {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Clear the pending slot, but only if it still belongs to `cycle`
    fn finish_cycle(&self, cycle: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(pending.as_ref(), Some((current, _)) if *current == cycle) {
            *pending = None;
        }
    }

    async fn perform_refresh(&self) -> std::result::Result<String, RefreshError> {
        let refresh_token = match self.store.get(StorageKeys::REFRESH_TOKEN).map_err(failed)? {
            Some(token) => token,
            None => {
                warn!("No refresh token stored; session predates the current login flow");
                return Err(RefreshError::NoRefreshCredential);
            }
        };

        info!("Refreshing access token");
        let request = HttpRequest::post("/auth/refresh")
            .json(&RefreshRequest {
                refresh_token: refresh_token.clone(),
            })
            .map_err(failed)?;

        let response = match self.transport.send(request).await {
            Ok(response) => response.error_for_status().map_err(failed)?,
            Err(e) => {
                warn!("Token refresh request failed: {}", e);
                return Err(failed(e));
            }
        };
        let body: RefreshResponse = response.json().map_err(failed)?;

        let expires_at = self.expiry_from(body.expires_in).map_err(failed)?;
        let rotated = body.refresh_token.is_some();
        let next_refresh = body.refresh_token.unwrap_or(refresh_token);
        self.store
            .set_many(&[
                (StorageKeys::ACCESS_JWT, &body.access_jwt),
                (StorageKeys::ACCESS_JWT_EXP, &expires_at.to_string()),
                (StorageKeys::REFRESH_TOKEN, &next_refresh),
            ])
            .map_err(failed)?;

        info!(expires_at, rotated, "Access token refreshed");
        Ok(body.access_jwt)
    }
}
