//! HTTP transport abstraction and the default `reqwest` implementation

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method, Response};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// Response headers as received; names are lowercased, duplicates are kept in order
pub type Headers = Vec<(String, String)>;

/// Last value of a header, matched case-insensitively
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// HTTP methods supported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
    TRACE,
    CONNECT,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::GET => write!(f, "GET"),
            HttpMethod::POST => write!(f, "POST"),
            HttpMethod::PUT => write!(f, "PUT"),
            HttpMethod::DELETE => write!(f, "DELETE"),
            HttpMethod::PATCH => write!(f, "PATCH"),
            HttpMethod::HEAD => write!(f, "HEAD"),
            HttpMethod::OPTIONS => write!(f, "OPTIONS"),
            HttpMethod::TRACE => write!(f, "TRACE"),
            HttpMethod::CONNECT => write!(f, "CONNECT"),
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::GET),
            "POST" => Ok(HttpMethod::POST),
            "PUT" => Ok(HttpMethod::PUT),
            "DELETE" => Ok(HttpMethod::DELETE),
            "PATCH" => Ok(HttpMethod::PATCH),
            "HEAD" => Ok(HttpMethod::HEAD),
            "OPTIONS" => Ok(HttpMethod::OPTIONS),
            "TRACE" => Ok(HttpMethod::TRACE),
            "CONNECT" => Ok(HttpMethod::CONNECT),
            other => Err(format!("Unsupported HTTP method: {}", other)),
        }
    }
}

/// Basic authentication credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// A fully resolved request, ready to send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub auth: Option<BasicAuth>,
}

/// Per-request transport options taken from the test set configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SendOptions {
    pub timeout: Duration,
    pub ssl_insecure: bool,
    pub verbose: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            ssl_insecure: false,
            verbose: false,
        }
    }
}

/// Response data handed to validators and extractors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub duration: Duration,
}

/// Capability that issues one HTTP request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Send the request, failing with a [`TransportError`] on network-level problems
    async fn send(&self, request: &HttpRequest, options: &SendOptions) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by `reqwest` with pooled connections
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    secure: Client,
    insecure: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            secure: Self::build_client(false)?,
            insecure: Self::build_client(true)?,
        })
    }

    /// Build the HTTP client with connection pooling and configuration
    fn build_client(ssl_insecure: bool) -> Result<Client, TransportError> {
        let mut builder = ClientBuilder::new()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(format!("resttest/{}", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10));

        if ssl_insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))
    }

    /// Convert HttpMethod to reqwest Method
    fn convert_method(method: &HttpMethod) -> Method {
        match method {
            HttpMethod::GET => Method::GET,
            HttpMethod::POST => Method::POST,
            HttpMethod::PUT => Method::PUT,
            HttpMethod::DELETE => Method::DELETE,
            HttpMethod::PATCH => Method::PATCH,
            HttpMethod::HEAD => Method::HEAD,
            HttpMethod::OPTIONS => Method::OPTIONS,
            HttpMethod::TRACE => Method::TRACE,
            HttpMethod::CONNECT => Method::CONNECT,
        }
    }

    /// Extract headers from response
    fn extract_headers(response: &Response) -> Headers {
        response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &str {
        "reqwest"
    }

    async fn send(&self, request: &HttpRequest, options: &SendOptions) -> Result<HttpResponse, TransportError> {
        let client = if options.ssl_insecure {
            log::warn!("TLS certificate verification disabled - use only for testing!");
            &self.insecure
        } else {
            &self.secure
        };

        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidRequest(format!("Invalid URL '{}': {}", request.url, e)))?;

        let mut req_builder = client
            .request(Self::convert_method(&request.method), url)
            .timeout(options.timeout);

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(auth) = &request.auth {
            req_builder = req_builder.basic_auth(&auth.username, Some(&auth.password));
        }

        if let Some(body) = &request.body {
            req_builder = req_builder.body(body.clone());
        }

        if options.verbose {
            log::debug!(
                "{} {} headers={:?} body_bytes={}",
                request.method,
                request.url,
                request.headers,
                request.body.as_ref().map(Vec::len).unwrap_or(0)
            );
        }

        let start_time = Instant::now();
        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    timeout: options.timeout,
                }
            } else if e.is_connect() {
                TransportError::Connection(e.to_string())
            } else if e.is_builder() {
                TransportError::InvalidRequest(e.to_string())
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status_code = response.status().as_u16();
        let headers = Self::extract_headers(&response);

        let body = response
            .bytes()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        timeout: options.timeout,
                    }
                } else {
                    TransportError::Network(format!("Failed to read response body: {}", e))
                }
            })?
            .to_vec();

        Ok(HttpResponse {
            status_code,
            headers,
            body,
            duration: start_time.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::GET);
        assert_eq!(" Patch ".parse::<HttpMethod>().unwrap(), HttpMethod::PATCH);
        assert!("FETCH".parse::<HttpMethod>().is_err());
        assert_eq!(HttpMethod::DELETE.to_string(), "DELETE");
    }

    #[test]
    fn test_header_value_is_case_insensitive_and_last_wins() {
        let headers: Headers = vec![
            ("set-cookie".to_string(), "a=1".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
            ("set-cookie".to_string(), "b=2".to_string()),
        ];
        assert_eq!(header_value(&headers, "Content-Type"), Some("application/json"));
        assert_eq!(header_value(&headers, "SET-COOKIE"), Some("b=2"));
        assert_eq!(header_value(&headers, "x-missing"), None);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_sending() {
        let transport = ReqwestTransport::new().unwrap();
        let request = HttpRequest {
            method: HttpMethod::GET,
            url: "not a url".to_string(),
            headers: vec![],
            body: None,
            auth: None,
        };
        let err = transport.send(&request, &SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_transport_error() {
        // Bind then drop a listener so the port is very likely closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = ReqwestTransport::new().unwrap();
        let request = HttpRequest {
            method: HttpMethod::GET,
            url: format!("http://127.0.0.1:{}/health", port),
            headers: vec![],
            body: None,
            auth: None,
        };
        let options = SendOptions {
            timeout: Duration::from_secs(2),
            ..SendOptions::default()
        };
        let err = transport.send(&request, &options).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
