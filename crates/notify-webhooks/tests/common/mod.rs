//! Common test utilities for notify-webhooks integration tests.
//!
//! Provides wiremock responders and a harness wiring the engine over
//! in-memory repositories and a recording scheduler, so delivery behavior
//! can be driven step by step without a database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify_webhooks::config::WebhookConfig;
use notify_webhooks::crypto;
use notify_webhooks::models::{CreateEndpointRequest, EndpointWithSecretResponse, WebhookDelivery};
use notify_webhooks::repository::{InMemoryDeliveryRepository, InMemoryEndpointRepository};
use notify_webhooks::scheduler::{DeliveryScheduler, RecordingScheduler};
use notify_webhooks::services::delivery_worker::{AttemptOutcome, DeliveryWorker};
use notify_webhooks::services::dispatcher::Dispatcher;
use notify_webhooks::services::endpoint_service::EndpointService;
use notify_webhooks::services::history_service::HistoryService;
use notify_webhooks::{webhooks_router, DeliveryRepository, EndpointRepository, WebhooksState};
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

/// Standard test tenant IDs
pub const TENANT_A: Uuid = Uuid::from_bytes([
    0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

pub const TENANT_B: Uuid = Uuid::from_bytes([
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
]);

/// Standard test secret
pub const SECRET_1: &str = "whsec_test_secret_key_12345";

/// Key used to encrypt endpoint secrets at rest in tests.
pub const TEST_ENCRYPTION_KEY: [u8; 32] = [0x42; 32];

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRequest {
    /// Parse the body as JSON.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed status
// ---------------------------------------------------------------------------

/// A wiremock responder that captures incoming requests.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
    response_body: Option<String>,
}

impl CaptureResponder {
    /// Create a new capture responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a capture responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
            response_body: None,
        }
    }

    /// Respond with `body` as well.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    /// Get all captured requests.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
            timestamp: Utc::now(),
        };
        self.requests.lock().unwrap().push(captured);

        let template = ResponseTemplate::new(self.response_code);
        match &self.response_body {
            Some(body) => template.set_body_string(body.clone()),
            None => template,
        }
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

/// A wiremock responder that fails a specified number of times before succeeding.
#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
    success_code: u16,
}

impl FailingResponder {
    /// Create a responder that fails `n` times with 500, then returns 200.
    pub fn fail_times(n: u32) -> Self {
        Self::fail_with_status(n, 500)
    }

    /// Create a responder that fails with a custom status code.
    pub fn fail_with_status(n: u32, failure_code: u16) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code,
            success_code: 200,
        }
    }

    /// Get the current attempt count.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(self.success_code)
        }
    }
}

// ---------------------------------------------------------------------------
// DelayedResponder - adds response delay
// ---------------------------------------------------------------------------

/// A wiremock responder that adds a delay before responding.
#[derive(Clone)]
pub struct DelayedResponder {
    delay_ms: u64,
    response_code: u16,
}

impl DelayedResponder {
    /// Create a responder that delays for `ms` milliseconds.
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            response_code: 200,
        }
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(self.response_code).set_delay(Duration::from_millis(self.delay_ms))
    }
}

// ---------------------------------------------------------------------------
// Signature verification
// ---------------------------------------------------------------------------

/// Verify a captured request the way a receiver would.
pub fn verify_captured_signature(request: &CapturedRequest, secret: &str) -> bool {
    let Some(signature) = request.header(crypto::SIGNATURE_HEADER) else {
        return false;
    };
    let Some(timestamp) = request
        .header(crypto::TIMESTAMP_HEADER)
        .and_then(|t| t.parse::<i64>().ok())
    else {
        return false;
    };

    crypto::verify_with_tolerance(
        secret,
        timestamp,
        &request.body,
        signature,
        Utc::now().timestamp(),
        crypto::DEFAULT_TOLERANCE_SECS,
    )
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Configuration that lets tests deliver to a local mock server.
pub fn test_config() -> WebhookConfig {
    WebhookConfig::default()
        .with_allow_http(true)
        .with_allow_internal_hosts(true)
        .with_request_timeout(Duration::from_secs(5))
}

/// The engine wired over in-memory storage.
///
/// Nothing runs on its own: scheduled tasks land in `scheduler` and are
/// executed explicitly with [`Harness::run_scheduled`].
pub struct Harness {
    pub endpoints: Arc<InMemoryEndpointRepository>,
    pub deliveries: Arc<InMemoryDeliveryRepository>,
    pub scheduler: Arc<RecordingScheduler>,
    pub endpoint_service: EndpointService,
    pub dispatcher: Dispatcher,
    pub worker: DeliveryWorker,
    pub history: HistoryService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: WebhookConfig) -> Self {
        let endpoints = Arc::new(InMemoryEndpointRepository::new());
        let deliveries = Arc::new(InMemoryDeliveryRepository::new());
        let scheduler = Arc::new(RecordingScheduler::new());

        let endpoint_repo: Arc<dyn EndpointRepository> = endpoints.clone();
        let delivery_repo: Arc<dyn DeliveryRepository> = deliveries.clone();
        let task_scheduler: Arc<dyn DeliveryScheduler> = scheduler.clone();

        let endpoint_service = EndpointService::new(
            endpoint_repo.clone(),
            TEST_ENCRYPTION_KEY.to_vec(),
            config.clone(),
        );
        let dispatcher = Dispatcher::new(
            endpoint_repo.clone(),
            delivery_repo.clone(),
            task_scheduler.clone(),
        );
        let worker = DeliveryWorker::new(
            endpoint_repo.clone(),
            delivery_repo.clone(),
            task_scheduler,
            TEST_ENCRYPTION_KEY.to_vec(),
            config,
        )
        .expect("Failed to build delivery worker");
        let history = HistoryService::new(endpoint_repo, delivery_repo, worker.clone());

        Self {
            endpoints,
            deliveries,
            scheduler,
            endpoint_service,
            dispatcher,
            worker,
            history,
        }
    }

    /// Register an endpoint with a known secret.
    pub async fn register(
        &self,
        tenant_id: Uuid,
        url: &str,
        events: &[&str],
    ) -> EndpointWithSecretResponse {
        self.endpoint_service
            .register(
                tenant_id,
                CreateEndpointRequest {
                    url: url.to_string(),
                    events: events.iter().map(|e| (*e).to_string()).collect(),
                    description: None,
                    secret: Some(SECRET_1.to_string()),
                },
            )
            .await
            .expect("Failed to register endpoint")
    }

    /// Execute every task scheduled so far, ignoring delays.
    pub async fn run_scheduled(&self) -> Vec<AttemptOutcome> {
        let mut outcomes = Vec::new();
        for (task, _delay) in self.scheduler.take() {
            outcomes.push(
                self.worker
                    .execute(task)
                    .await
                    .expect("Delivery task failed"),
            );
        }
        outcomes
    }

    /// Keep executing scheduled tasks until none are left.
    pub async fn run_until_idle(&self) -> Vec<AttemptOutcome> {
        let mut outcomes = Vec::new();
        while !self.scheduler.is_empty() {
            outcomes.extend(self.run_scheduled().await);
        }
        outcomes
    }

    pub async fn delivery(&self, tenant_id: Uuid, id: Uuid) -> WebhookDelivery {
        self.deliveries
            .find_by_id(tenant_id, id)
            .await
            .unwrap()
            .expect("delivery exists")
    }

    pub fn router(&self) -> axum::Router {
        webhooks_router(WebhooksState::new(
            self.endpoint_service.clone(),
            self.history.clone(),
        ))
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
