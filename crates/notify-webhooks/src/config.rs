//! Runtime settings for the delivery engine.

use std::time::Duration;

use crate::validation::UrlPolicy;

/// Default outbound request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default consecutive-failure threshold before an endpoint is disabled.
pub const DEFAULT_DISABLE_THRESHOLD: i32 = 10;

/// Default maximum endpoints per tenant.
pub const DEFAULT_MAX_ENDPOINTS: i64 = 25;

/// Response bodies are truncated to this many characters before storage.
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 4096;

/// Default number of delivery attempts the background runner executes at once.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 16;

/// Delivery engine configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub request_timeout: Duration,
    pub disable_threshold: i32,
    pub max_endpoints_per_tenant: i64,
    pub response_body_limit: usize,
    pub worker_concurrency: usize,
    pub url_policy: UrlPolicy,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            disable_threshold: DEFAULT_DISABLE_THRESHOLD,
            max_endpoints_per_tenant: DEFAULT_MAX_ENDPOINTS,
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            url_policy: UrlPolicy::default(),
            user_agent: concat!("notify-webhooks/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl WebhookConfig {
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_disable_threshold(mut self, threshold: i32) -> Self {
        self.disable_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_max_endpoints(mut self, max: i64) -> Self {
        self.max_endpoints_per_tenant = max;
        self
    }

    #[must_use]
    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency.max(1);
        self
    }

    /// Allow HTTP URLs (for development/testing).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.url_policy.allow_http = allow;
        self
    }

    /// Allow loopback/private destinations (for development/testing).
    #[must_use]
    pub fn with_allow_internal_hosts(mut self, allow: bool) -> Self {
        self.url_policy.allow_internal_hosts = allow;
        self
    }
}
