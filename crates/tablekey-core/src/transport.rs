//! Client-agnostic HTTP request/response types
//!
//! Everything above this crate talks to the backend through the `Transport`
//! trait. Non-2xx responses are returned as `Ok(HttpResponse)`; only
//! failures to obtain a response at all (DNS, connect, timeout) are errors.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request, relative to the configured base URL
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Set once the gateway has re-sent this request after a 401
    pub retried: bool,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Add a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Builder pattern: set a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header, replacing any existing value (names compare case-insensitively)
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove_header(&name);
        self.headers.push((name, value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set `Authorization: Bearer <token>`
    pub fn bearer(&mut self, token: &str) {
        self.set_header("Authorization", format!("Bearer {}", token));
    }
}

/// A response with its body fully read
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into `Error::Status`
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::status(self.status, self.body))
        }
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends requests to the backend
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).send(request).await
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! Scripted transport for tests

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    /// What the scripted backend does for one request
    #[derive(Debug, Clone)]
    pub enum Reply {
        Status(u16, String),
        NetworkError(String),
    }

    impl Reply {
        pub fn ok_json(value: serde_json::Value) -> Self {
            Reply::Status(200, value.to_string())
        }

        pub fn status(status: u16) -> Self {
            Reply::Status(status, String::new())
        }

        pub fn network(message: &str) -> Self {
            Reply::NetworkError(message.to_string())
        }
    }

    #[derive(Default)]
    struct Route {
        queued: VecDeque<Reply>,
        fallback: Option<Reply>,
    }

    /// Replays queued replies per `(method, path)` and records every request
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<HashMap<(Method, String), Route>>,
        log: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a one-shot reply
        pub fn on(&self, method: Method, path: &str, reply: Reply) -> &Self {
            let mut routes = self.routes.lock().unwrap();
            routes
                .entry((method, path.to_string()))
                .or_default()
                .queued
                .push_back(reply);
            self
        }

        /// Reply used once the queue for this route is empty
        pub fn always(&self, method: Method, path: &str, reply: Reply) -> &Self {
            let mut routes = self.routes.lock().unwrap();
            routes
                .entry((method, path.to_string()))
                .or_default()
                .fallback = Some(reply);
            self
        }

        /// Every request sent so far
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.log.lock().unwrap().clone()
        }

        /// Number of requests sent to a path
        pub fn count(&self, path: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.path == path)
                .count()
        }

        fn next_reply(&self, request: &HttpRequest) -> Option<Reply> {
            let mut routes = self.routes.lock().unwrap();
            let route = routes.get_mut(&(request.method, request.path.clone()))?;
            route.queued.pop_front().or_else(|| route.fallback.clone())
        }
    }

    /// Suspends once so concurrent callers interleave at the network boundary
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.log.lock().unwrap().push(request.clone());
            let reply = self.next_reply(&request);
            YieldOnce(false).await;
            match reply {
                Some(Reply::Status(status, body)) => Ok(HttpResponse::new(status, body)),
                Some(Reply::NetworkError(message)) => Err(Error::Transport(message)),
                None => Err(Error::Transport(format!(
                    "no scripted reply for {} {}",
                    request.method, request.path
                ))),
            }
        }
    }
}
