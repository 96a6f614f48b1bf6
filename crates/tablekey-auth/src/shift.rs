//! Active cash shift tracking

use std::sync::Arc;
use tablekey_core::{KeyValueStore, Result, StorageKeys};
use tracing::info;

/// Reads and writes the active cash shift identifier
#[derive(Clone)]
pub struct ShiftTracker {
    store: Arc<dyn KeyValueStore>,
}

impl ShiftTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn set(&self, shift_id: &str) -> Result<()> {
        self.store.set(StorageKeys::CASH_SHIFT_ID, shift_id)?;
        info!("Cash shift {} opened", shift_id);
        Ok(())
    }

    pub fn current(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(StorageKeys::CASH_SHIFT_ID)?
            .filter(|id| !id.is_empty()))
    }

    pub fn clear(&self) -> Result<()> {
        if self.store.delete(StorageKeys::CASH_SHIFT_ID)? {
            info!("Cash shift closed");
        }
        Ok(())
    }
}
