//! `Transport` over reqwest

use async_trait::async_trait;
use tablekey_core::{Config, Error, HttpRequest, HttpResponse, Method, Result, Transport};
use tracing::debug;
use url::Url;

/// Sends requests to the configured backend with a per-request timeout
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: Config,
}

impl ReqwestTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;
        Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid base URL {}: {}", config.base_url, e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn url(&self, request: &HttpRequest) -> Result<Url> {
        let joined = self.config.url(&request.path);
        let mut url = Url::parse(&joined)
            .map_err(|e| Error::Config(format!("invalid request URL {}: {}", joined, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = self.url(&request)?;
        debug!("{} {}", request.method, url.path());

        let mut builder = self
            .client
            .request(method(request.method), url)
            .header("Accept", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        debug!("{} {} -> {}", request.method, request.path, status);
        Ok(HttpResponse::new(status, body))
    }
}
