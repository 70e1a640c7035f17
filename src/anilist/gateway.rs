//! GraphQL request gateway with rate-limit-aware retry.
//!
//! Every catalog call funnels through [`ApiGateway::execute`], which owns the
//! status classification and retry policy:
//!
//! - `200` parses the JSON body.
//! - `429` waits until the advertised reset (never less than the configured
//!   floor) and retransmits the identical payload, up to a bounded number of waits.
//! - `500` sleeps briefly and retries up to the configured retry count, then
//!   degrades to "absent".
//! - anything else degrades to "absent" immediately.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::{debug, warn};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::SyncSettings;

const RATE_LIMIT_SLOT_POLL: Duration = Duration::from_millis(100);
const HTTP_OK: u16 = 200;
const HTTP_TOO_MANY_REQUESTS: u16 = 429;
const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;

/// Failures the gateway could not absorb locally.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limit still active after {attempts} wait(s)")]
    RateLimited { attempts: u32 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("manga list chunk {chunk} could not be fetched")]
    ListUnavailable { chunk: u32 },
}

/// Raw HTTP result handed back by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub rate_limit_remaining: Option<u32>,
    /// Epoch seconds at which the rate-limit window resets.
    pub rate_limit_reset: Option<i64>,
    pub body: String,
}

/// Sends one GraphQL payload and returns the raw response.
pub trait GraphqlTransport: Send + Sync {
    fn post(&self, payload: &Value) -> Result<TransportResponse, String>;
}

/// Blocking sleep seam so backoff can be observed in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// `ureq`-backed transport posting to the AniList endpoint with bearer auth.
pub struct UreqTransport {
    http_client: ureq::Agent,
    endpoint: String,
    access_token: String,
}

impl UreqTransport {
    pub fn new(endpoint: &str, access_token: &str) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(15))
            .build();
        Self {
            http_client,
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            access_token: access_token.trim().to_string(),
        }
    }

    fn header_number<T: std::str::FromStr>(response: &ureq::Response, name: &str) -> Option<T> {
        response
            .header(name)
            .and_then(|value| value.trim().parse::<T>().ok())
    }
}

impl GraphqlTransport for UreqTransport {
    fn post(&self, payload: &Value) -> Result<TransportResponse, String> {
        let result = self
            .http_client
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.access_token))
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_json(payload);
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(format!("Request failed: {transport}"));
            }
        };
        let status = response.status();
        let rate_limit_remaining = Self::header_number(&response, "X-RateLimit-Remaining");
        let rate_limit_reset = Self::header_number(&response, "X-RateLimit-Reset");
        let body = response
            .into_string()
            .map_err(|err| format!("Failed to read response: {err}"))?;
        Ok(TransportResponse {
            status,
            rate_limit_remaining,
            rate_limit_reset,
            body,
        })
    }
}

/// Retry knobs for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub server_error_retries: u32,
    pub server_error_delay: Duration,
    pub rate_limit_floor: Duration,
    pub rate_limit_wait_attempts: u32,
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            server_error_retries: settings.server_error_retries,
            server_error_delay: settings.server_error_delay,
            rate_limit_floor: settings.rate_limit_floor,
            rate_limit_wait_attempts: settings.rate_limit_wait_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            server_error_retries: 3,
            server_error_delay: Duration::from_secs(2),
            rate_limit_floor: Duration::from_secs(60),
            rate_limit_wait_attempts: 5,
        }
    }
}

/// Classified gateway result.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    Data(Value),
    /// Non-success answer; the requested entity is treated as absent.
    Absent { status: u16 },
}

/// Computes how long to wait after a 429 given the advertised reset time.
pub fn rate_limit_wait(reset_epoch: Option<i64>, now_epoch: i64, floor: Duration) -> Duration {
    let until_reset = reset_epoch
        .map(|reset| reset.saturating_sub(now_epoch))
        .unwrap_or(0)
        .max(0);
    Duration::from_secs(until_reset as u64).max(floor)
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Serialized GraphQL request sender shared by every catalog operation.
pub struct ApiGateway {
    transport: Box<dyn GraphqlTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    pacer: Option<DefaultDirectRateLimiter>,
}

impl ApiGateway {
    pub fn new(
        transport: Box<dyn GraphqlTransport>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
            pacer: None,
        }
    }

    /// Limits outgoing requests to `requests_per_minute`; zero leaves pacing off.
    pub fn with_pacing(mut self, requests_per_minute: u32) -> Self {
        self.pacer = NonZeroU32::new(requests_per_minute)
            .map(|rate| RateLimiter::direct(Quota::per_minute(rate)));
        self
    }

    /// Builds the production gateway for the configured endpoint and token.
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(
            Box::new(UreqTransport::new(&settings.api_url, &settings.access_token)),
            Arc::new(ThreadSleeper),
            RetryPolicy::from_settings(settings),
        )
        .with_pacing(settings.requests_per_minute)
    }

    pub fn sleeper(&self) -> Arc<dyn Sleeper> {
        Arc::clone(&self.sleeper)
    }

    fn wait_for_request_slot(&self) {
        let Some(pacer) = &self.pacer else {
            return;
        };
        while pacer.check().is_err() {
            self.sleeper.sleep(RATE_LIMIT_SLOT_POLL);
        }
    }

    /// Sends `query` and returns the parsed body, or `None` when the entity is absent.
    pub fn send(&self, query: &str, variables: Option<Value>) -> Result<Option<Value>, GatewayError> {
        match self.execute(query, variables)? {
            GatewayOutcome::Data(body) => Ok(Some(body)),
            GatewayOutcome::Absent { .. } => Ok(None),
        }
    }

    /// Sends `query` and returns the classified outcome.
    pub fn execute(
        &self,
        query: &str,
        variables: Option<Value>,
    ) -> Result<GatewayOutcome, GatewayError> {
        let payload = json!({
            "query": query,
            "variables": variables.unwrap_or(Value::Null),
        });
        let mut rate_limit_waits = 0u32;
        let mut server_error_retries = 0u32;

        loop {
            self.wait_for_request_slot();
            let response = self
                .transport
                .post(&payload)
                .map_err(GatewayError::Transport)?;
            if let Some(remaining) = response.rate_limit_remaining {
                debug!("AniList rate limit remaining: {remaining}");
            }

            match response.status {
                HTTP_OK => {
                    return match serde_json::from_str::<Value>(&response.body) {
                        Ok(body) => Ok(GatewayOutcome::Data(body)),
                        Err(err) => {
                            warn!("AniList returned malformed JSON: {err}");
                            Ok(GatewayOutcome::Absent {
                                status: response.status,
                            })
                        }
                    };
                }
                HTTP_TOO_MANY_REQUESTS => {
                    if rate_limit_waits >= self.policy.rate_limit_wait_attempts {
                        return Err(GatewayError::RateLimited {
                            attempts: rate_limit_waits,
                        });
                    }
                    let wait = rate_limit_wait(
                        response.rate_limit_reset,
                        now_epoch(),
                        self.policy.rate_limit_floor,
                    );
                    warn!(
                        "Rate limit hit. Waiting {} seconds before retrying",
                        wait.as_secs()
                    );
                    self.sleeper.sleep(wait);
                    rate_limit_waits = rate_limit_waits.saturating_add(1);
                }
                HTTP_INTERNAL_SERVER_ERROR => {
                    if server_error_retries >= self.policy.server_error_retries {
                        warn!(
                            "AniList server error persisted after {} retries",
                            server_error_retries
                        );
                        return Ok(GatewayOutcome::Absent {
                            status: response.status,
                        });
                    }
                    server_error_retries = server_error_retries.saturating_add(1);
                    debug!(
                        "AniList server error, retry {} of {}",
                        server_error_retries, self.policy.server_error_retries
                    );
                    self.sleeper.sleep(self.policy.server_error_delay);
                }
                status => {
                    debug!("AniList request returned HTTP {status}");
                    return Ok(GatewayOutcome::Absent { status });
                }
            }
        }
    }
}
