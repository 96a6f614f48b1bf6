//! Active shift side-channel header

use crate::middleware::{Middleware, Next};
use async_trait::async_trait;
use tablekey_auth::ShiftTracker;
use tablekey_core::{HttpRequest, HttpResponse, Result};

pub const SHIFT_HEADER: &str = "X-Shift-Id";

/// Sets `X-Shift-Id` while a cash shift is open
pub struct ShiftHeader {
    tracker: ShiftTracker,
}

impl ShiftHeader {
    pub fn new(tracker: ShiftTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Middleware for ShiftHeader {
    async fn handle(&self, mut request: HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        match self.tracker.current()? {
            Some(shift_id) => request.set_header(SHIFT_HEADER, shift_id),
            None => request.remove_header(SHIFT_HEADER),
        }
        next.run(request).await
    }
}
