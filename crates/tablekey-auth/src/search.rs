//! Debounced device search for type-ahead pairing screens

use crate::pairing::KioskPairingClient;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tablekey_core::{Config, DeviceType, KioskDevice, Result};
use tracing::debug;

/// Wraps `KioskPairingClient::search_devices` with a debounce
///
/// Every call supersedes the calls before it. A superseded call resolves to
/// `None` instead of results, whether it was still waiting out the debounce
/// or its response arrived late.
pub struct DeviceSearch {
    client: KioskPairingClient,
    debounce: Duration,
    min_len: usize,
    generation: AtomicU64,
}

impl DeviceSearch {
    pub fn new(config: &Config, client: KioskPairingClient) -> Self {
        Self {
            client,
            debounce: config.search_debounce(),
            min_len: config.min_search_len,
            generation: AtomicU64::new(0),
        }
    }

    pub async fn search(
        &self,
        code: &str,
        device_type: DeviceType,
    ) -> Result<Option<Vec<KioskDevice>>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if code.trim().chars().count() < self.min_len {
            return Ok(Some(Vec::new()));
        }

        tokio::time::sleep(self.debounce).await;
        if self.is_superseded(generation) {
            debug!("Device search superseded before sending");
            return Ok(None);
        }

        let devices = self.client.search_devices(code, device_type).await?;
        if self.is_superseded(generation) {
            debug!("Discarding stale device search response");
            return Ok(None);
        }
        Ok(Some(devices))
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tablekey_core::transport::testing::{Reply, ScriptedTransport};
    use tablekey_core::{MemoryStore, Method};

    fn create_test_search() -> (DeviceSearch, Arc<ScriptedTransport>) {
        let config = Config::default();
        let transport = Arc::new(ScriptedTransport::new());
        let client =
            KioskPairingClient::new(&config, Arc::new(MemoryStore::new()), transport.clone());
        (DeviceSearch::new(&config, client), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_typing_sends_one_request() {
        let (search, transport) = create_test_search();
        transport.always(
            Method::Get,
            "/kiosk/devices/by-code/0311",
            Reply::ok_json(json!([{"id": 1, "name": "Caja"}])),
        );

        let (first, second) = tokio::join!(search.search("03", DeviceType::Cash), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            search.search("0311", DeviceType::Cash).await
        });

        assert!(first.unwrap().is_none());
        let devices = second.unwrap().unwrap();
        assert_eq!(devices[0].id, 1);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_searches_each_resolve() {
        let (search, transport) = create_test_search();
        transport.always(Method::Get, "/kiosk/devices/by-code/03", Reply::ok_json(json!([])));
        transport.always(Method::Get, "/kiosk/devices/by-code/031", Reply::ok_json(json!([])));

        assert!(search.search("03", DeviceType::Monitor).await.unwrap().is_some());
        assert!(search.search("031", DeviceType::Monitor).await.unwrap().is_some());
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_the_query_cancels_pending_search() {
        let (search, transport) = create_test_search();

        let (pending, cleared) = tokio::join!(search.search("031180", DeviceType::Cash), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            search.search("", DeviceType::Cash).await
        });

        assert!(pending.unwrap().is_none());
        assert_eq!(cleared.unwrap(), Some(Vec::new()));
        assert!(transport.requests().is_empty());
    }
}
