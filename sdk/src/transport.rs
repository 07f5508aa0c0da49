//! Pluggable HTTP request/response conveyance for the client auth flow.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::AuthError;

/// Status, headers, and decoded body of one HTTP exchange. Header names are
/// lowercased; non-JSON bodies are wrapped as `{"text": …}`.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        json_body: Option<&Value>,
    ) -> Result<TransportResponse, AuthError>;
}

/// Default transport backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(15)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        json_body: Option<&Value>,
    ) -> Result<TransportResponse, AuthError> {
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| AuthError::Transport(format!("unsupported HTTP method: {}", method)))?;

        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = json_body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let mut response_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                response_headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let body = if text.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| json!({ "text": text }))
        };

        Ok(TransportResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "bearer token".to_string());
        let response = TransportResponse {
            status: 200,
            headers,
            body: json!({}),
        };
        assert_eq!(response.header("Authorization"), Some("bearer token"));
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn connection_failure_maps_to_transport_error() {
        let transport = ReqwestTransport::new(1);
        let err = transport
            .send("GET", "http://127.0.0.1:1/unreachable", &HashMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }

    #[tokio::test]
    async fn bad_method_rejected() {
        let transport = ReqwestTransport::default();
        let err = transport
            .send("NOT A METHOD", "http://localhost/", &HashMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }
}
