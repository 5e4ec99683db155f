//! Retry logic with exponential backoff and a circuit breaker.
//!
//! - Exponential backoff: 1s, 2s, 4s, 8s, 16s maximum, plus jitter
//! - Circuit breaker: 5 failures opens the circuit for a 30s cooldown
//! - Configurable per-attempt and total-operation timeouts

use crate::error::{CoreError, CoreResult};
use crate::logging::{log_debug, log_error, log_warn};

use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Retry policy for provider and database calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub total_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            backoff_multiplier: 2.0,
            total_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    pub(crate) state: CircuitState,
    pub(crate) failure_count: u32,
    pub(crate) last_failure_time: Option<Instant>,
    pub(crate) failure_threshold: u32,
    pub(crate) recovery_timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreaker {
    pub fn should_allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.check_recovery_timeout(),
            CircuitState::HalfOpen => true,
        }
    }

    fn check_recovery_timeout(&mut self) -> bool {
        let Some(last_failure) = self.last_failure_time else {
            return false;
        };

        if last_failure.elapsed() >= self.recovery_timeout {
            log_debug!(
                circuit_breaker = "transitioning_to_half_open",
                recovery_timeout_seconds = self.recovery_timeout.as_secs(),
                "circuit breaker attempting recovery"
            );
            self.state = CircuitState::HalfOpen;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen | CircuitState::Open => {
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.last_failure_time = None;
            }
            CircuitState::Closed => {
                self.failure_count = 0;
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        if self.failure_count >= self.failure_threshold && self.state != CircuitState::Open {
            log_warn!(
                circuit_breaker = "opened",
                failure_count = self.failure_count,
                failure_threshold = self.failure_threshold,
                recovery_timeout_seconds = self.recovery_timeout.as_secs(),
                "circuit breaker opened due to repeated failures"
            );
            self.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.clone()
    }
}

/// Executes an operation under a retry policy and circuit breaker.
#[derive(Debug)]
pub(crate) struct RetryExecutor {
    pub(crate) policy: RetryPolicy,
    pub(crate) circuit_breaker: CircuitBreaker,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            circuit_breaker: CircuitBreaker::default(),
        }
    }

    pub async fn execute<F, Fut, T>(&mut self, operation: F) -> CoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = CoreResult<T>>,
    {
        let start_time = Instant::now();
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.policy.max_attempts {
            self.check_circuit_breaker()?;
            self.check_total_timeout(&start_time)?;

            attempt += 1;

            match self
                .execute_single_attempt(&operation, attempt, &mut last_error)
                .await
            {
                Ok(response) => return Ok(response),
                Err(should_continue) => {
                    if !should_continue {
                        break;
                    }
                }
            }
        }

        self.handle_exhausted_retries(attempt, last_error, &start_time)
    }

    async fn execute_single_attempt<F, Fut, T>(
        &mut self,
        operation: &F,
        attempt: u32,
        last_error: &mut Option<CoreError>,
    ) -> Result<T, bool>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = CoreResult<T>>,
    {
        self.log_attempt(attempt);

        let operation_start = Instant::now();
        let result = tokio::time::timeout(self.policy.request_timeout, operation()).await;

        match result {
            Ok(Ok(response)) => {
                self.circuit_breaker.record_success();
                log_debug!(
                    attempt = attempt,
                    duration_ms = operation_start.elapsed().as_millis(),
                    "request succeeded"
                );
                Ok(response)
            }
            Ok(Err(error)) => {
                let should_continue = self.handle_error(error, attempt, last_error).await;
                Err(should_continue)
            }
            Err(_timeout) => {
                let should_continue = self.handle_timeout(attempt, last_error).await;
                Err(should_continue)
            }
        }
    }

    fn check_circuit_breaker(&mut self) -> CoreResult<()> {
        if !self.circuit_breaker.should_allow_request() {
            return Err(CoreError::provider_request_failed(
                "circuit breaker is open, service temporarily unavailable",
                None,
            ));
        }
        Ok(())
    }

    fn check_total_timeout(&mut self, start_time: &Instant) -> CoreResult<()> {
        if start_time.elapsed() >= self.policy.total_timeout {
            return Err(CoreError::timeout(self.policy.total_timeout.as_secs()));
        }
        Ok(())
    }

    fn log_attempt(&mut self, attempt: u32) {
        log_debug!(
            attempt = attempt,
            max_attempts = self.policy.max_attempts,
            circuit_state = ?self.circuit_breaker.state(),
            "executing request with retry logic"
        );
    }

    async fn handle_error(&mut self, error: CoreError, attempt: u32, last_error: &mut Option<CoreError>) -> bool {
        let should_retry = error.is_retryable();
        *last_error = Some(error);

        self.circuit_breaker.record_failure();
        if should_retry && attempt < self.policy.max_attempts {
            let delay = self.calculate_delay(attempt);
            log_debug!(
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis(),
                "request failed, retrying after delay"
            );
            sleep(delay).await;
            true
        } else {
            false
        }
    }

    async fn handle_timeout(&mut self, attempt: u32, last_error: &mut Option<CoreError>) -> bool {
        let timeout_error = CoreError::timeout(self.policy.request_timeout.as_secs());
        *last_error = Some(timeout_error);

        self.circuit_breaker.record_failure();
        if attempt < self.policy.max_attempts {
            let delay = self.calculate_delay(attempt);
            log_debug!(
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis(),
                timeout_seconds = self.policy.request_timeout.as_secs(),
                "request timed out, retrying after delay"
            );
            sleep(delay).await;
            true
        } else {
            false
        }
    }

    fn handle_exhausted_retries<T>(
        &mut self,
        attempt: u32,
        last_error: Option<CoreError>,
        start_time: &Instant,
    ) -> CoreResult<T> {
        let final_error =
            last_error.unwrap_or_else(|| CoreError::provider_request_failed("maximum retry attempts exceeded", None));

        log_error!(
            attempts = attempt,
            total_duration_ms = start_time.elapsed().as_millis(),
            circuit_state = ?self.circuit_breaker.state(),
            error = %final_error,
            "request failed after all retry attempts"
        );

        Err(final_error)
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_seconds =
            self.policy.initial_delay.as_secs_f64() * self.policy.backoff_multiplier.powi((attempt - 1) as i32);

        let delay = Duration::from_secs_f64(delay_seconds.min(self.policy.max_delay.as_secs_f64()));

        let jitter = fastrand::f64() * 0.1;
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retrying_on_first_success() {
        let mut executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let result = executor
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CoreError>(42)
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_then_succeeds() {
        let mut policy = RetryPolicy::default();
        policy.initial_delay = Duration::from_millis(1);
        policy.max_delay = Duration::from_millis(2);
        let mut executor = RetryExecutor::new(policy);
        let calls = AtomicU32::new(0);
        let result = executor
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(CoreError::timeout(1))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let mut executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let result = executor
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(CoreError::configuration("bad config"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn circuit_breaker_opens_after_threshold() {
        let mut breaker = CircuitBreaker::default();
        for _ in 0..breaker.failure_threshold {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.should_allow_request());
    }
}
