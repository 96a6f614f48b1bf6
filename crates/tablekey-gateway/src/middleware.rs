//! Middleware pipeline around a `Transport`

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tablekey_core::{HttpRequest, HttpResponse, Result, Transport};

/// One stage of the request pipeline
///
/// A stage may rewrite the request, call `next.run()` zero or more times, and
/// inspect or replace the outcome.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: HttpRequest, next: Next<'_>) -> Result<HttpResponse>;
}

/// The rest of the pipeline after the current stage
#[derive(Clone, Copy)]
pub struct Next<'a> {
    transport: &'a dyn Transport,
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub fn new(transport: &'a dyn Transport, chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { transport, chain }
    }

    /// Run the remaining stages, then the transport
    ///
    /// The innermost stage turns any non-2xx response into `Error::Status`.
    pub fn run(self, request: HttpRequest) -> BoxFuture<'a, Result<HttpResponse>> {
        Box::pin(async move {
            match self.chain.split_first() {
                Some((stage, rest)) => {
                    let next = Next {
                        transport: self.transport,
                        chain: rest,
                    };
                    stage.handle(request, next).await
                }
                None => self.transport.send(request).await?.error_for_status(),
            }
        })
    }
}
