use async_trait::async_trait;
use resttest::transport::{HttpRequest, HttpResponse, SendOptions, Transport};
use resttest::TransportError;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Build a JSON response with the given status
pub fn json_response(status_code: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status_code,
        headers: vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("server".to_string(), "mock-server/1.0".to_string()),
        ],
        body: body.as_bytes().to_vec(),
        duration: Duration::from_millis(1),
    }
}

/// Mock transport that replays queued outcomes and records every request
pub struct MockTransport {
    queue: Arc<Mutex<VecDeque<Result<HttpResponse, TransportError>>>>,
    routes: Arc<Mutex<HashMap<String, HttpResponse>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    latency: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            routes: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a response; queued outcomes are used before routes
    pub async fn push_response(&self, response: HttpResponse) {
        self.queue.lock().await.push_back(Ok(response));
    }

    pub async fn push_error(&self, error: TransportError) {
        self.queue.lock().await.push_back(Err(error));
    }

    /// Always answer `url` with `response` once the queue is empty
    pub async fn route(&self, url: &str, response: HttpResponse) {
        self.routes.lock().await.insert(url.to_string(), response);
    }

    pub async fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn urls(&self) -> Vec<String> {
        self.requests.lock().await.iter().map(|r| r.url.clone()).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, request: &HttpRequest, _options: &SendOptions) -> Result<HttpResponse, TransportError> {
        self.requests.lock().await.push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(outcome) = self.queue.lock().await.pop_front() {
            return outcome;
        }

        if let Some(response) = self.routes.lock().await.get(&request.url) {
            return Ok(response.clone());
        }

        Ok(json_response(200, "{}"))
    }
}
