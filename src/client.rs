/*!
 * Control-plane transport interface
 *
 * The authenticated transport is an external collaborator: implementations
 * own the wire protocol and session handling. This module owns what the
 * resolver needs from it — credential acquisition with caching, and
 * bounded retries that surface exhaustion as a failure of that single
 * operation, never of the batch.
 */

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ResolveConfig;
use crate::error::{Result, SlingshotError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// One control-plane operation
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get<P: Into<String>>(path: P) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post<P: Into<String>>(path: P, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Bearer token with its expiry
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub value: String,
    acquired_at: Instant,
    ttl: Duration,
}

impl BearerToken {
    pub fn new<S: Into<String>>(value: S, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            acquired_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }
}

/// The transport itself, specified at its interface only
pub trait ControlPlane: Send + Sync {
    /// Obtain a fresh token from the authentication layer
    fn acquire_token(&self) -> Result<BearerToken>;

    /// Perform one authenticated operation
    fn send(&self, token: &BearerToken, request: &ApiRequest) -> Result<Value>;
}

/// Wrapper adding token caching and bounded retries with backoff
pub struct RetryingClient<C: ControlPlane> {
    inner: C,
    attempts: u32,
    delay: Duration,
    exponential: bool,
    token: Mutex<Option<BearerToken>>,
}

impl<C: ControlPlane> RetryingClient<C> {
    pub fn new(inner: C, config: &ResolveConfig) -> Self {
        Self {
            inner,
            attempts: config.retry_attempts,
            delay: Duration::from_secs(config.retry_delay_secs),
            exponential: config.exponential_backoff,
            token: Mutex::new(None),
        }
    }

    /// Cached token, re-acquired once expired
    fn token(&self) -> Result<BearerToken> {
        let mut guard = self.token.lock().expect("token mutex poisoned");
        if let Some(token) = guard.as_ref() {
            if !token.is_expired() {
                return Ok(token.clone());
            }
            debug!("cached token expired, re-acquiring");
        }
        let token = self.inner.acquire_token()?;
        *guard = Some(token.clone());
        Ok(token)
    }

    fn invalidate_token(&self) {
        *self.token.lock().expect("token mutex poisoned") = None;
    }

    fn backoff(&self, attempt: u32) -> Duration {
        if self.exponential {
            self.delay * 2u32.saturating_pow(attempt.saturating_sub(1))
        } else {
            self.delay
        }
    }

    /// Perform one operation, retrying transient and authentication
    /// failures up to the configured number of attempts
    pub fn call(&self, request: &ApiRequest) -> Result<Value> {
        let mut attempt = 0;
        let mut last_error: Option<SlingshotError> = None;

        while attempt <= self.attempts {
            if attempt > 0 {
                thread::sleep(self.backoff(attempt));
            }
            let token = self.token()?;
            match self.inner.send(&token, request) {
                Ok(value) => return Ok(value),
                Err(SlingshotError::Auth(msg)) => {
                    // token rejected server-side: drop the cache and retry
                    warn!(%msg, "token rejected, refreshing");
                    self.invalidate_token();
                    last_error = Some(SlingshotError::Auth(msg));
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    last_error = Some(err);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Err(SlingshotError::Transport {
            attempts: self.attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts performed".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyPlane {
        tokens_issued: AtomicU32,
        sends: AtomicU32,
        fail_first: u32,
        auth_failures: u32,
    }

    impl FlakyPlane {
        fn new(fail_first: u32) -> Self {
            Self {
                tokens_issued: AtomicU32::new(0),
                sends: AtomicU32::new(0),
                fail_first,
                auth_failures: 0,
            }
        }
    }

    impl ControlPlane for FlakyPlane {
        fn acquire_token(&self) -> Result<BearerToken> {
            self.tokens_issued.fetch_add(1, Ordering::SeqCst);
            Ok(BearerToken::new("token", Duration::from_secs(3600)))
        }

        fn send(&self, _token: &BearerToken, _request: &ApiRequest) -> Result<Value> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if n < self.auth_failures {
                return Err(SlingshotError::Auth("expired".to_string()));
            }
            if n < self.auth_failures + self.fail_first {
                return Err(SlingshotError::store("connection reset"));
            }
            Ok(serde_json::json!({"ok": true}))
        }
    }

    fn quick_config() -> ResolveConfig {
        ResolveConfig {
            retry_attempts: 3,
            retry_delay_secs: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_transient_failures_retried() {
        let client = RetryingClient::new(FlakyPlane::new(2), &quick_config());
        let value = client.call(&ApiRequest::get("/requests")).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(client.inner.sends.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhaustion_is_fatal_for_the_operation() {
        let client = RetryingClient::new(FlakyPlane::new(10), &quick_config());
        let err = client.call(&ApiRequest::get("/requests")).unwrap_err();
        assert!(matches!(err, SlingshotError::Transport { attempts: 3, .. }));
    }

    #[test]
    fn test_token_cached_across_calls() {
        let client = RetryingClient::new(FlakyPlane::new(0), &quick_config());
        client.call(&ApiRequest::get("/a")).unwrap();
        client.call(&ApiRequest::get("/b")).unwrap();
        assert_eq!(client.inner.tokens_issued.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_auth_failure_refreshes_token() {
        let mut plane = FlakyPlane::new(0);
        plane.auth_failures = 1;
        let client = RetryingClient::new(plane, &quick_config());
        client.call(&ApiRequest::get("/a")).unwrap();
        // first token rejected, a second one acquired
        assert_eq!(client.inner.tokens_issued.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fatal_error_not_retried() {
        struct FatalPlane;
        impl ControlPlane for FatalPlane {
            fn acquire_token(&self) -> Result<BearerToken> {
                Ok(BearerToken::new("token", Duration::from_secs(3600)))
            }
            fn send(&self, _token: &BearerToken, _request: &ApiRequest) -> Result<Value> {
                Err(SlingshotError::config("malformed request"))
            }
        }
        let client = RetryingClient::new(FatalPlane, &quick_config());
        let err = client.call(&ApiRequest::get("/a")).unwrap_err();
        assert!(matches!(err, SlingshotError::Config(_)));
    }
}
