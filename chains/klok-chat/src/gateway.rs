//! HTTP gateway - one outbound call, bounded and uniformly classified.
//!
//! Every call is capped by a hard timeout and optionally routed through the
//! account's proxy. Any failure (timeout, connection error, non-2xx status,
//! unreadable body, unusable proxy) is classified into a [`NetworkError`],
//! logged, and collapsed into `None`. Callers cannot tell a 4xx from a
//! refused connection.

use async_trait::async_trait;
use core_logic::{MetricsCollector, NetworkError, ProxyConfig};
use reqwest::{Client, Method, Proxy};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Response body: JSON when it parses, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Text(String),
}

impl ApiResponse {
    pub fn parse(body: String) -> Self {
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => ApiResponse::Json(value),
            Err(_) => ApiResponse::Text(body),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ApiResponse::Json(value) => Some(value),
            ApiResponse::Text(_) => None,
        }
    }

    /// Top-level field of a JSON object body.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.as_json().and_then(|value| value.get(key))
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.headers.extend(headers);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Issues one call. `None` is the single failure sentinel.
    async fn send(&self, request: ApiRequest) -> Option<ApiResponse>;
}

/// reqwest-backed gateway bound to one account's proxy.
pub struct HttpGateway {
    client: Result<Client, NetworkError>,
    timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl HttpGateway {
    pub fn new(timeout: Duration, proxy: Option<&ProxyConfig>) -> Self {
        Self {
            client: build_client(timeout, proxy),
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError> {
        let client = self.client.as_ref().map_err(Clone::clone)?;
        let endpoint = request.url.clone();

        let mut builder = client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let call = async {
            let response = builder
                .send()
                .await
                .map_err(|e| classify(&endpoint, self.timeout, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(NetworkError::HttpError {
                    status_code: status.as_u16(),
                    endpoint: endpoint.clone(),
                });
            }

            let text = response
                .text()
                .await
                .map_err(|e| classify(&endpoint, self.timeout, e))?;
            Ok(ApiResponse::parse(text))
        };

        // hard cap on the whole exchange, body read included
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
                endpoint: request.url.clone(),
            }),
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send(&self, request: ApiRequest) -> Option<ApiResponse> {
        let method = request.method.clone();
        let start = Instant::now();
        let result = self.execute(request).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_http(start.elapsed(), result.is_ok());
        }

        match result {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("{} request failed: {}", method, e);
                None
            }
        }
    }
}

fn build_client(timeout: Duration, proxy: Option<&ProxyConfig>) -> Result<Client, NetworkError> {
    let mut client_builder = Client::builder().timeout(timeout);

    if let Some(proxy_conf) = proxy {
        let proxy_error = |reason: String| NetworkError::Proxy {
            proxy: proxy_conf.display_url(),
            reason,
        };
        // loader placeholders for unparseable lines have no scheme
        if !proxy_conf.url.contains("://") {
            return Err(proxy_error("expected scheme://host:port".to_string()));
        }
        let mut route = Proxy::all(&proxy_conf.url).map_err(|e| proxy_error(e.to_string()))?;
        if let Some(user) = &proxy_conf.username {
            route = route.basic_auth(user, proxy_conf.password.as_deref().unwrap_or(""));
        }
        client_builder = client_builder.proxy(route);
        debug!("HTTP client routed through {}", proxy_conf.display_url());
    }

    client_builder.build().map_err(|e| NetworkError::Proxy {
        proxy: proxy
            .map(ProxyConfig::display_url)
            .unwrap_or_else(|| "direct".to_string()),
        reason: e.to_string(),
    })
}

fn classify(endpoint: &str, timeout: Duration, error: reqwest::Error) -> NetworkError {
    if error.is_timeout() {
        NetworkError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
            endpoint: endpoint.to_string(),
        }
    } else if let Some(status) = error.status() {
        NetworkError::HttpError {
            status_code: status.as_u16(),
            endpoint: endpoint.to_string(),
        }
    } else if error.is_connect() || error.is_request() {
        NetworkError::ConnectionRefused {
            endpoint: endpoint.to_string(),
            reason: error.to_string(),
        }
    } else {
        NetworkError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: error.to_string(),
        }
    }
}
