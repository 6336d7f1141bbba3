//! Retry layer with exponential backoff and an interceptor chain.
//!
//! Transient failures (5xx responses and transport exceptions) are retried
//! against a [`RetryPolicy`] with backoff. Before each retry, registered
//! [`RetryInterceptor`]s may rewrite the request in place; the upload
//! session uses this to turn a failed chunk send into a status query.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// One failed attempt, as seen by policies and interceptors.
#[derive(Debug)]
pub enum AttemptFailure<'a> {
    /// The server answered with this (5xx) response.
    Status(&'a HttpResponse),
    /// The exchange failed below HTTP.
    Transport(&'a TransportError),
}

impl AttemptFailure<'_> {
    /// Whether this failure is worth another attempt at all.
    ///
    /// Cancellation is never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            AttemptFailure::Status(response) => response.status >= 500,
            AttemptFailure::Transport(TransportError::Cancelled) => false,
            // Malformed requests fail the same way every time.
            AttemptFailure::Transport(TransportError::InvalidRequest(_)) => false,
            AttemptFailure::Transport(_) => true,
        }
    }
}

/// Decides whether a failed attempt will be retried.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is 1-based: the attempt that just failed.
    fn should_retry(&self, attempt: u32, failure: &AttemptFailure<'_>) -> bool;
}

/// Default policy: retry transient failures up to a fixed attempt count.
#[derive(Debug, Clone)]
pub struct AttemptLimit {
    pub max_attempts: u32,
}

impl Default for AttemptLimit {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl RetryPolicy for AttemptLimit {
    fn should_retry(&self, attempt: u32, failure: &AttemptFailure<'_>) -> bool {
        attempt < self.max_attempts && failure.is_transient()
    }
}

/// Configuration for retry backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        // Add ±25% jitter.
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.001);
        Duration::from_secs_f64(with_jitter)
    }
}

/// Rewrites an about-to-be-retried request.
///
/// Invoked only after the policy has granted another attempt. Returning
/// `true` marks the failure handled and stops the chain; the retry layer
/// then reissues the (possibly rewritten) request.
pub trait RetryInterceptor: Send + Sync {
    fn before_retry(&self, request: &mut HttpRequest, failure: &AttemptFailure<'_>) -> bool;
}

/// Transport wrapper that owns the retry policy, the backoff schedule, and
/// the interceptor chain.
///
/// One layer is shared by all sessions on a transport; interceptors are
/// registered for the lifetime of a session and must therefore tolerate
/// seeing requests that are not theirs.
pub struct RetryLayer {
    transport: Arc<dyn Transport>,
    policy: Box<dyn RetryPolicy>,
    backoff: BackoffConfig,
    interceptors: RwLock<Vec<Arc<dyn RetryInterceptor>>>,
}

impl RetryLayer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            policy: Box::new(AttemptLimit::default()),
            backoff: BackoffConfig::default(),
            interceptors: RwLock::new(Vec::new()),
        }
    }

    pub fn with_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Adds an interceptor to the chain.
    pub fn register(&self, interceptor: Arc<dyn RetryInterceptor>) {
        self.interceptors.write().unwrap().push(interceptor);
    }

    /// Removes a previously registered interceptor (pointer identity).
    pub fn deregister(&self, interceptor: &Arc<dyn RetryInterceptor>) {
        self.interceptors
            .write()
            .unwrap()
            .retain(|existing| !Arc::ptr_eq(existing, interceptor));
    }

    /// Sends `request`, retrying transient failures per the policy.
    ///
    /// The request is `&mut` because interceptors may rewrite it between
    /// attempts. A 5xx that exhausts the policy is returned as a response
    /// for the caller to classify; cancellation is returned immediately.
    pub async fn send(
        &self,
        request: &mut HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.transport.send(request, cancel).await {
                Ok(response) if response.status < 500 => return Ok(response),
                Ok(response) => {
                    let failure = AttemptFailure::Status(&response);
                    if !self.policy.should_retry(attempt, &failure) {
                        return Ok(response);
                    }
                    warn!(status = response.status, attempt, url = %request.url, "server error, retrying");
                    self.run_interceptors(request, &failure);
                }
                Err(TransportError::Cancelled) => return Err(TransportError::Cancelled),
                Err(err) => {
                    let failure = AttemptFailure::Transport(&err);
                    if !self.policy.should_retry(attempt, &failure) {
                        return Err(err);
                    }
                    warn!(error = %err, attempt, url = %request.url, "transport failure, retrying");
                    self.run_interceptors(request, &failure);
                }
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn run_interceptors(&self, request: &mut HttpRequest, failure: &AttemptFailure<'_>) {
        let chain: Vec<_> = self.interceptors.read().unwrap().clone();
        for interceptor in chain {
            if interceptor.before_retry(request, failure) {
                break;
            }
        }
    }
}
